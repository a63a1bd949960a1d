/// Version-family grouping
///
/// Rebuilds parent/child lineage from flat, possibly paginated record sets
/// and groups every version under the id of its oldest known ancestor.
/// Grouping is a pure function of the records and `now`.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::Config;
use crate::generation::estimate::estimate_duration;
use crate::state::data::{GenerationJob, ImageEntity, QualityTier, Row};

/// Base-name used for placeholders whose parent is not loaded
pub const UNTITLED: &str = "Untitled";

/// Where a lineage walk ended
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RootKey {
    /// Oldest ancestor present in the loaded set
    Root(String),
    /// Parent id that is referenced but not loaded (e.g. on another page)
    MissingParent(String),
    /// No usable ancestor information at all
    BaseName(String),
}

impl RootKey {
    /// Grouping key. A loaded root and a missing parent with the same id
    /// produce the same key, so rows stay stable across pagination.
    pub fn group_key(&self) -> String {
        match self {
            Self::Root(id) | Self::MissingParent(id) => id.clone(),
            Self::BaseName(name) => format!("name:{}", name),
        }
    }
}

/// Result of merging completed images with in-flight jobs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prepared {
    /// Completed images plus synthesized placeholders
    pub entities: Vec<ImageEntity>,
    /// Processing jobs that produced a placeholder
    pub live_jobs: Vec<GenerationJob>,
    /// Processing jobs past the abandonment window
    pub abandoned_jobs: Vec<String>,
    /// Terminal jobs, or jobs whose image already completed
    pub settled_jobs: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupOutcome {
    pub rows: Vec<Row>,
    pub live_jobs: Vec<GenerationJob>,
    pub abandoned_jobs: Vec<String>,
    pub settled_jobs: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LineageGrouper {
    abandon_after: chrono::Duration,
    max_depth: usize,
    default_display_size: (u32, u32),
    base_durations: BTreeMap<QualityTier, Duration>,
}

impl LineageGrouper {
    pub fn from_config(config: &Config) -> Self {
        let base_durations = [QualityTier::Low, QualityTier::Medium, QualityTier::High]
            .into_iter()
            .map(|tier| (tier, config.base_duration(tier)))
            .collect();
        Self {
            abandon_after: config.abandon_after(),
            max_depth: config.max_lineage_depth.max(1),
            default_display_size: config.default_display_size,
            base_durations,
        }
    }

    /// Load-time pass: drop abandoned jobs and turn live ones into
    /// placeholder entities.
    pub fn prepare(&self, images: &[ImageEntity], jobs: &[GenerationJob], now: DateTime<Utc>) -> Prepared {
        let completed = dedupe(images.iter());
        let mut prepared = Prepared::default();

        let mut jobs: Vec<&GenerationJob> = jobs.iter().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        let mut seen = HashSet::new();
        jobs.retain(|job| seen.insert(job.id.as_str()));

        // Only fresh jobs count toward concurrency
        let mut fresh = Vec::new();
        for job in jobs {
            if completed.contains_key(job.id.as_str()) || job.status.is_terminal() {
                prepared.settled_jobs.push(job.id.clone());
            } else if now - job.created_at > self.abandon_after {
                debug!("Pruning abandoned job {} (created {})", job.id, job.created_at);
                prepared.abandoned_jobs.push(job.id.clone());
            } else {
                fresh.push(job);
            }
        }

        let concurrent = fresh.len();
        let mut placeholders = Vec::with_capacity(fresh.len());
        for job in fresh {
            let parent = job
                .parent_id
                .as_deref()
                .and_then(|id| completed.get(id).copied());
            placeholders.push(self.placeholder(job, parent, concurrent));
            prepared.live_jobs.push(job.clone());
        }

        prepared.entities = completed.into_values().cloned().collect();
        prepared.entities.extend(placeholders);
        prepared
    }

    /// Transient entity shown while a job is in flight
    pub fn placeholder(&self, job: &GenerationJob, parent: Option<&ImageEntity>, concurrent: usize) -> ImageEntity {
        let (display_width, display_height) = parent
            .map(|p| (p.display_width, p.display_height))
            .unwrap_or(self.default_display_size);
        let base = self
            .base_durations
            .get(&job.quality)
            .copied()
            .unwrap_or(Duration::from_secs(30));
        let estimate = estimate_duration(base, concurrent);

        ImageEntity {
            id: job.id.clone(),
            parent_id: job.parent_id.clone(),
            storage_ref: None,
            thumbnail_ref: None,
            display_width,
            display_height,
            real_width: None,
            real_height: None,
            title: None,
            base_name: parent.map_or_else(|| UNTITLED.to_string(), |p| p.base_name.clone()),
            version: parent.map_or(1, |p| p.version + 1),
            prompt: None,
            draft_prompt: None,
            annotations: Vec::new(),
            is_generating: true,
            generation_started_at: Some(job.created_at),
            estimated_duration_ms: Some(estimate.as_millis() as u64),
            quality: Some(job.quality),
            created_at: job.created_at,
            updated_at: job.created_at,
        }
    }

    /// Walk parent links to find the group an entity belongs to
    pub fn root_key<'a>(&self, entity: &'a ImageEntity, index: &BTreeMap<&'a str, &'a ImageEntity>) -> RootKey {
        let mut current = entity;
        let mut visited: Vec<&'a str> = vec![entity.id.as_str()];

        for _ in 0..self.max_depth {
            let parent_id = match current.parent_id.as_deref().map(str::trim) {
                None => return RootKey::Root(current.id.clone()),
                Some("") if visited.len() == 1 => {
                    return RootKey::BaseName(entity.base_name.clone());
                }
                Some("") => return RootKey::Root(current.id.clone()),
                Some(id) => id,
            };

            if let Some(position) = visited.iter().position(|id| *id == parent_id) {
                // Cyclic data: every member of the cycle resolves to its smallest id
                let smallest = visited[position..].iter().min().copied().unwrap_or(parent_id);
                return RootKey::Root(smallest.to_string());
            }

            match index.get(parent_id) {
                Some(&parent) => {
                    visited.push(parent.id.as_str());
                    current = parent;
                }
                None => return RootKey::MissingParent(parent_id.to_string()),
            }
        }

        RootKey::Root(current.id.clone())
    }

    /// Group entities into rows: oldest first within a row, rows ordered
    /// by their oldest member, newest first.
    pub fn group<'a>(&self, entities: impl IntoIterator<Item = &'a ImageEntity>) -> Vec<Row> {
        let index = dedupe(entities);

        let mut groups: BTreeMap<String, Vec<&ImageEntity>> = BTreeMap::new();
        for entity in index.values().copied() {
            let key = self.root_key(entity, &index).group_key();
            groups.entry(key).or_default().push(entity);
        }

        let mut rows: Vec<Row> = groups
            .into_iter()
            .filter_map(|(key, mut members)| {
                members.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
                let first = members.first()?;
                let created_at = first.created_at;
                let title = members
                    .iter()
                    .find(|m| m.id == key)
                    .map(|root| root.display_title())
                    .unwrap_or_else(|| first.base_name.clone());
                Some(Row {
                    created_at,
                    title,
                    key,
                    images: members.into_iter().cloned().collect(),
                })
            })
            .collect();

        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.key.cmp(&b.key)));
        rows
    }

    /// Full reload pipeline: prepare, then group
    pub fn build_rows(&self, images: &[ImageEntity], jobs: &[GenerationJob], now: DateTime<Utc>) -> GroupOutcome {
        let prepared = self.prepare(images, jobs, now);
        GroupOutcome {
            rows: self.group(&prepared.entities),
            live_jobs: prepared.live_jobs,
            abandoned_jobs: prepared.abandoned_jobs,
            settled_jobs: prepared.settled_jobs,
        }
    }
}

/// Id-indexed view that keeps the most recently updated copy of duplicates
fn dedupe<'a>(entities: impl IntoIterator<Item = &'a ImageEntity>) -> BTreeMap<&'a str, &'a ImageEntity> {
    let mut index: BTreeMap<&str, &ImageEntity> = BTreeMap::new();
    for entity in entities {
        match index.get(entity.id.as_str()) {
            Some(existing) if !prefer(entity, existing) => {}
            _ => {
                index.insert(entity.id.as_str(), entity);
            }
        }
    }
    index
}

fn prefer(candidate: &ImageEntity, existing: &ImageEntity) -> bool {
    let rank = |e: &ImageEntity| (e.updated_at, e.storage_ref.is_some());
    rank(candidate) > rank(existing)
}
