/// Shared data structures for the application state
///
/// These structs represent the data model that flows between
/// the catalog layer, the lineage grouper and the generation controller.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::annotate::annotation::Annotation;

/// Credit amount in hundredths, so debits and refunds conserve exactly
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credits(i64);

impl Credits {
    pub const ZERO: Credits = Credits(0);

    pub const fn from_hundredths(value: i64) -> Self {
        Self(value)
    }

    pub const fn hundredths(self) -> i64 {
        self.0
    }
}

impl std::ops::Add for Credits {
    type Output = Credits;

    fn add(self, rhs: Credits) -> Credits {
        Credits(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Credits {
    type Output = Credits;

    fn sub(self, rhs: Credits) -> Credits {
        Credits(self.0 - rhs.0)
    }
}

impl fmt::Display for Credits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

/// Named generation configuration with a fixed cost and base duration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Low,
    Medium,
    High,
}

impl QualityTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl FromStr for QualityTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown quality tier '{}'", other)),
        }
    }
}

/// Represents one image version, completed or still generating
#[derive(Debug, Clone, PartialEq)]
pub struct ImageEntity {
    /// Unique ID, shared with the generation job that produced it
    pub id: String,
    /// Version this image was derived from
    pub parent_id: Option<String>,
    /// Blob reference; None while generating
    pub storage_ref: Option<String>,
    pub thumbnail_ref: Option<String>,
    /// Display size, stable across resolution changes
    pub display_width: u32,
    pub display_height: u32,
    /// Actual pixel size of the stored blob
    pub real_width: Option<u32>,
    pub real_height: Option<u32>,
    pub title: Option<String>,
    /// Name shared by every version of an upload (e.g. file stem)
    pub base_name: String,
    pub version: u32,
    /// Prompt that produced this version
    pub prompt: Option<String>,
    /// Unsubmitted prompt text the user is working on
    pub draft_prompt: Option<String>,
    pub annotations: Vec<Annotation>,
    pub is_generating: bool,
    pub generation_started_at: Option<DateTime<Utc>>,
    pub estimated_duration_ms: Option<u64>,
    pub quality: Option<QualityTier>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImageEntity {
    /// A freshly uploaded root image with no lineage
    pub fn upload(id: impl Into<String>, base_name: impl Into<String>, width: u32, height: u32) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            parent_id: None,
            storage_ref: None,
            thumbnail_ref: None,
            display_width: width,
            display_height: height,
            real_width: Some(width),
            real_height: Some(height),
            title: None,
            base_name: base_name.into(),
            version: 1,
            prompt: None,
            draft_prompt: None,
            annotations: Vec::new(),
            is_generating: false,
            generation_started_at: None,
            estimated_duration_ms: None,
            quality: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Title shown in rows, derived from base-name and version when unset
    pub fn display_title(&self) -> String {
        match &self.title {
            Some(title) if !title.trim().is_empty() => title.clone(),
            _ => format!("{} v{}", self.base_name, self.version),
        }
    }
}

/// Lifecycle status of a generation job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Processing)
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// A submitted generation; its id becomes the produced image's id
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationJob {
    pub id: String,
    pub parent_id: Option<String>,
    pub status: JobStatus,
    pub quality: QualityTier,
    pub cost: Credits,
    pub created_at: DateTime<Utc>,
}

/// A version family displayed together, oldest version first
///
/// Derived on every reload; never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Grouping key the row was built from
    pub key: String,
    pub title: String,
    /// Creation time of the oldest member
    pub created_at: DateTime<Utc>,
    pub images: Vec<ImageEntity>,
}

impl Row {
    pub fn ids(&self) -> Vec<&str> {
        self.images.iter().map(|image| image.id.as_str()).collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.images.iter().any(|image| image.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credits_display() {
        assert_eq!(Credits::from_hundredths(500).to_string(), "5.00");
        assert_eq!(Credits::from_hundredths(1234).to_string(), "12.34");
        assert_eq!(Credits::from_hundredths(-5).to_string(), "-0.05");
    }

    #[test]
    fn test_quality_round_trips_through_str() {
        for tier in [QualityTier::Low, QualityTier::Medium, QualityTier::High] {
            assert_eq!(tier.as_str().parse::<QualityTier>().unwrap(), tier);
        }
        assert!("ultra".parse::<QualityTier>().is_err());
    }

    #[test]
    fn test_display_title_falls_back_to_version() {
        let mut image = ImageEntity::upload("a", "beach", 640, 480);
        assert_eq!(image.display_title(), "beach v1");
        image.title = Some("Sunset".into());
        assert_eq!(image.display_title(), "Sunset");
    }
}
