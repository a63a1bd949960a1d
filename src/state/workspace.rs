/// Shared id-indexed entity map
///
/// Holds every loaded image version, the in-flight jobs and the credit
/// ledger. The grouper only reads it; the generation controller inserts,
/// mutates and removes entries.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::data::{GenerationJob, ImageEntity, Row};
use super::ledger::CreditLedger;
use super::library::RecordStore;
use crate::annotate::annotation::Annotation;
use crate::error::{EditorError, Result};
use crate::lineage::grouper::{GroupOutcome, LineageGrouper};

#[derive(Debug, Clone, Default)]
pub struct Workspace {
    images: BTreeMap<String, ImageEntity>,
    jobs: BTreeMap<String, GenerationJob>,
    ledger: CreditLedger,
}

impl Workspace {
    pub fn new(ledger: CreditLedger) -> Self {
        Self {
            images: BTreeMap::new(),
            jobs: BTreeMap::new(),
            ledger,
        }
    }

    /// Replace the loaded set with a fresh read of the store
    pub fn reload(&mut self, store: &dyn RecordStore, grouper: &LineageGrouper, now: DateTime<Utc>) -> Result<GroupOutcome> {
        self.reload_page(store, grouper, None, now)
    }

    /// Like `reload`, loading at most `limit` completed images
    pub fn reload_page(
        &mut self,
        store: &dyn RecordStore,
        grouper: &LineageGrouper,
        limit: Option<usize>,
        now: DateTime<Utc>,
    ) -> Result<GroupOutcome> {
        let images = store.load_images(limit)?;
        let jobs = store.load_jobs()?;
        let outcome = grouper.build_rows(&images, &jobs, now);

        for id in &outcome.abandoned_jobs {
            // Abandoned placeholders may have been persisted without pixels
            if let Err(e) = store.delete_job(id).and_then(|_| store.delete_image(id)) {
                warn!("⚠️  Failed to delete abandoned job {}: {}", id, e);
            }
        }
        for id in &outcome.settled_jobs {
            if let Err(e) = store.delete_job(id) {
                warn!("⚠️  Failed to delete settled job {}: {}", id, e);
            }
        }

        self.images = outcome
            .rows
            .iter()
            .flat_map(|row| row.images.iter())
            .map(|image| (image.id.clone(), image.clone()))
            .collect();
        self.jobs = outcome
            .live_jobs
            .iter()
            .map(|job| (job.id.clone(), job.clone()))
            .collect();

        info!(
            "🔄 Reloaded {} images in {} rows ({} in flight, {} abandoned)",
            self.images.len(),
            outcome.rows.len(),
            outcome.live_jobs.len(),
            outcome.abandoned_jobs.len()
        );
        Ok(outcome)
    }

    /// Regroup the current entity map
    pub fn rows(&self, grouper: &LineageGrouper) -> Vec<Row> {
        grouper.group(self.images.values())
    }

    pub fn image(&self, id: &str) -> Option<&ImageEntity> {
        self.images.get(id)
    }

    pub fn images(&self) -> impl Iterator<Item = &ImageEntity> {
        self.images.values()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Insert or replace by id
    pub fn insert_image(&mut self, image: ImageEntity) {
        debug!("Workspace insert {} (generating: {})", image.id, image.is_generating);
        self.images.insert(image.id.clone(), image);
    }

    pub fn remove_image(&mut self, id: &str) -> Option<ImageEntity> {
        self.images.remove(id)
    }

    /// Hand a committed annotation list back to its image
    pub fn set_annotations(&mut self, id: &str, annotations: Vec<Annotation>) -> Result<()> {
        let image = self
            .images
            .get_mut(id)
            .ok_or_else(|| EditorError::ImageNotFound(id.to_string()))?;
        image.annotations = annotations;
        image.updated_at = Utc::now();
        Ok(())
    }

    /// Store the prompt text the user is still composing
    pub fn set_draft_prompt(&mut self, id: &str, draft: Option<String>) -> Result<()> {
        let image = self
            .images
            .get_mut(id)
            .ok_or_else(|| EditorError::ImageNotFound(id.to_string()))?;
        image.draft_prompt = draft.filter(|d| !d.trim().is_empty());
        Ok(())
    }

    /// Entities currently generating, including freshly inserted placeholders
    pub fn active_generation_count(&self) -> usize {
        self.images.values().filter(|image| image.is_generating).count()
    }

    pub fn job(&self, id: &str) -> Option<&GenerationJob> {
        self.jobs.get(id)
    }

    pub fn insert_job(&mut self, job: GenerationJob) {
        self.jobs.insert(job.id.clone(), job);
    }

    pub fn remove_job(&mut self, id: &str) -> Option<GenerationJob> {
        self.jobs.remove(id)
    }

    pub fn ledger(&self) -> &CreditLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut CreditLedger {
        &mut self.ledger
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::state::data::{Credits, JobStatus, QualityTier};
    use crate::state::ledger::Role;
    use crate::state::library::Library;

    fn stored(id: &str, parent: Option<&str>, created_at: DateTime<Utc>) -> ImageEntity {
        let mut image = ImageEntity::upload(id, "mug", 512, 512);
        image.parent_id = parent.map(str::to_string);
        image.storage_ref = Some(format!("{}.png", id));
        image.created_at = created_at;
        image.updated_at = created_at;
        image
    }

    fn job(id: &str, parent: &str, created_at: DateTime<Utc>) -> GenerationJob {
        GenerationJob {
            id: id.to_string(),
            parent_id: Some(parent.to_string()),
            status: JobStatus::Processing,
            quality: QualityTier::Medium,
            cost: Credits::from_hundredths(100),
            created_at,
        }
    }

    #[test]
    fn test_reload_prunes_abandoned_jobs_from_store() {
        let store = Library::open_in_memory().unwrap();
        let grouper = LineageGrouper::from_config(&Config::default());
        let now = Utc::now();

        store.upsert_image(&stored("a", None, now - chrono::Duration::hours(2))).unwrap();
        store.upsert_job(&job("stale", "a", now - chrono::Duration::hours(1))).unwrap();
        store.upsert_job(&job("fresh", "a", now - chrono::Duration::seconds(5))).unwrap();

        let mut workspace = Workspace::default();
        let outcome = workspace.reload(&store, &grouper, now).unwrap();

        assert_eq!(outcome.abandoned_jobs, vec!["stale".to_string()]);
        assert_eq!(outcome.rows.len(), 1);
        assert_eq!(outcome.rows[0].ids(), vec!["a", "fresh"]);
        assert!(workspace.image("fresh").unwrap().is_generating);
        assert!(workspace.image("stale").is_none());
        assert!(workspace.job("fresh").is_some());
        assert_eq!(workspace.active_generation_count(), 1);

        let remaining: Vec<String> = store.load_jobs().unwrap().into_iter().map(|j| j.id).collect();
        assert_eq!(remaining, vec!["fresh".to_string()]);
    }

    #[test]
    fn test_reload_keeps_ledger() {
        let store = Library::open_in_memory().unwrap();
        let grouper = LineageGrouper::from_config(&Config::default());
        let mut workspace = Workspace::new(CreditLedger::new(Credits::from_hundredths(500), Role::Standard));
        workspace.ledger_mut().debit("j", Credits::from_hundredths(100));

        workspace.reload(&store, &grouper, Utc::now()).unwrap();
        assert_eq!(workspace.ledger().balance(), Credits::from_hundredths(400));
    }

    #[test]
    fn test_set_annotations_requires_known_image() {
        let mut workspace = Workspace::default();
        assert!(matches!(
            workspace.set_annotations("nope", Vec::new()),
            Err(EditorError::ImageNotFound(_))
        ));

        workspace.insert_image(stored("a", None, Utc::now()));
        workspace.set_annotations("a", Vec::new()).unwrap();
        workspace.set_draft_prompt("a", Some("   ".into())).unwrap();
        assert_eq!(workspace.image("a").unwrap().draft_prompt, None);
    }

    #[test]
    fn test_rows_reflect_inserts_and_removals() {
        let grouper = LineageGrouper::from_config(&Config::default());
        let now = Utc::now();
        let mut workspace = Workspace::default();
        workspace.insert_image(stored("a", None, now));
        workspace.insert_image(stored("b", Some("a"), now + chrono::Duration::seconds(1)));
        assert_eq!(workspace.rows(&grouper)[0].ids(), vec!["a", "b"]);

        workspace.remove_image("b");
        assert_eq!(workspace.rows(&grouper)[0].ids(), vec!["a"]);
        assert_eq!(workspace.len(), 1);
    }
}
