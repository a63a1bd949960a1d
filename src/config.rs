/// Application configuration
///
/// Loaded from `<config_dir>/lineage-editor/config.json` when present.
/// Every field has a default so partial files are accepted.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EditorError, Result};
use crate::state::data::{Credits, QualityTier};

/// Cost and timing for one quality tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierSettings {
    /// Credits charged per submission
    pub cost: Credits,
    /// Expected generation time with no other jobs running
    pub base_duration_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub catalog_path: PathBuf,
    pub blob_dir: PathBuf,
    pub quality: BTreeMap<QualityTier, TierSettings>,
    /// Jobs older than this are treated as abandoned on reload
    pub abandon_after_secs: u64,
    pub max_lineage_depth: usize,
    pub history_limit: usize,
    /// Pointer travel below which a drag is treated as a click
    pub drag_threshold_px: f32,
    pub min_shape_size: f32,
    /// Display size used when a placeholder has no resolvable parent
    pub default_display_size: (u32, u32),
    pub signed_url_ttl_secs: u64,
    pub thumbnail_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = Self::data_dir();
        Self {
            catalog_path: data_dir.join("catalog.db"),
            blob_dir: data_dir.join("blobs"),
            quality: default_tiers(),
            abandon_after_secs: 600,
            max_lineage_depth: 64,
            history_limit: 50,
            drag_threshold_px: 5.0,
            min_shape_size: 10.0,
            default_display_size: (1024, 1024),
            signed_url_ttl_secs: 3600,
            thumbnail_size: 256,
        }
    }
}

fn default_tiers() -> BTreeMap<QualityTier, TierSettings> {
    BTreeMap::from([
        (
            QualityTier::Low,
            TierSettings {
                cost: Credits::from_hundredths(50),
                base_duration_secs: 20.0,
            },
        ),
        (
            QualityTier::Medium,
            TierSettings {
                cost: Credits::from_hundredths(100),
                base_duration_secs: 40.0,
            },
        ),
        (
            QualityTier::High,
            TierSettings {
                cost: Credits::from_hundredths(200),
                base_duration_secs: 90.0,
            },
        ),
    ])
}

impl Config {
    /// Directory holding the catalog and blobs
    /// - Linux: ~/.local/share/lineage-editor
    /// - macOS: ~/Library/Application Support/lineage-editor
    /// - Windows: %APPDATA%\lineage-editor
    fn data_dir() -> PathBuf {
        let mut path = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."));
        path.push("lineage-editor");
        path
    }

    /// Default location of the config file, if the platform has one
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("lineage-editor").join("config.json"))
    }

    /// Load from the default location, falling back to defaults if missing
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)
            .map_err(|e| EditorError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.history_limit == 0 {
            return Err(EditorError::Config("history_limit must be at least 1".into()));
        }
        if self.max_lineage_depth == 0 {
            return Err(EditorError::Config("max_lineage_depth must be at least 1".into()));
        }
        Ok(())
    }

    /// Settings for a tier, defaulting when the file omits it
    pub fn tier(&self, quality: QualityTier) -> TierSettings {
        self.quality
            .get(&quality)
            .copied()
            .or_else(|| default_tiers().get(&quality).copied())
            .unwrap_or(TierSettings {
                cost: Credits::ZERO,
                base_duration_secs: 30.0,
            })
    }

    pub fn cost(&self, quality: QualityTier) -> Credits {
        self.tier(quality).cost
    }

    pub fn base_duration(&self, quality: QualityTier) -> Duration {
        Duration::from_secs_f64(self.tier(quality).base_duration_secs.max(0.0))
    }

    pub fn abandon_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.abandon_after_secs as i64)
    }

    pub fn signed_url_ttl(&self) -> Duration {
        Duration::from_secs(self.signed_url_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tiers_are_ordered_by_cost() {
        let config = Config::default();
        assert!(config.cost(QualityTier::Low) < config.cost(QualityTier::Medium));
        assert!(config.cost(QualityTier::Medium) < config.cost(QualityTier::High));
        assert_eq!(config.history_limit, 50);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "abandon_after_secs": 120 }"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.abandon_after_secs, 120);
        assert_eq!(config.max_lineage_depth, 64);
        assert_eq!(config.cost(QualityTier::Medium), Credits::from_hundredths(100));
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(Config::load_from(&path), Err(EditorError::Config(_))));
    }

    #[test]
    fn test_zero_history_limit_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "history_limit": 0 }"#).unwrap();

        assert!(matches!(Config::load_from(&path), Err(EditorError::Config(_))));
    }
}
