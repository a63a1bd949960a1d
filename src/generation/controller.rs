/// Generation job life cycle
///
/// `begin` is synchronous: credit check, optimistic debit, placeholder and
/// job insertion, persistence. Only then does `run` call the backend and
/// reconcile the outcome. A reload between the two phases sees a
/// consistent balance and a recoverable (or prunable) placeholder.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::backend::{reference_images, GenerationBackend, GenerationRequest, MaskRasterizer, NoMask, SourceImage};
use super::estimate::{estimate_duration, progress};
use crate::annotate::annotation::Annotation;
use crate::config::Config;
use crate::error::{EditorError, GenerationError, Result};
use crate::media::blobs::BlobStore;
use crate::media::thumbnail::{derive_thumbnail, extension_for};
use crate::state::data::{Credits, GenerationJob, ImageEntity, JobStatus, QualityTier};
use crate::state::ledger::{Debit, LedgerUpdate};
use crate::state::library::RecordStore;
use crate::state::workspace::Workspace;

/// Display dimensions within this many pixels are not worth a repair
const DIMENSION_TOLERANCE_PX: u32 = 2;

/// What the user asked for
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub source_id: String,
    pub prompt: String,
    pub quality: QualityTier,
    /// Committed annotations of the source at submission time
    pub annotations: Vec<Annotation>,
}

/// A submission that passed `begin` and awaits `run`
#[derive(Debug, Clone)]
pub struct PendingGeneration {
    pub job: GenerationJob,
    pub placeholder: ImageEntity,
    pub debit: Debit,
    pub estimate: Duration,
    source: ImageEntity,
    prompt: String,
    annotations: Vec<Annotation>,
}

impl PendingGeneration {
    pub fn id(&self) -> &str {
        &self.job.id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    Completed(ImageEntity),
    /// The placeholder is gone and any charged credit is back
    Failed {
        id: String,
        message: String,
        refunded: Option<Credits>,
    },
}

pub struct GenerationJobController<B> {
    workspace: Arc<Mutex<Workspace>>,
    store: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
    backend: Arc<B>,
    rasterizer: Arc<dyn MaskRasterizer>,
    config: Arc<Config>,
}

impl<B> Clone for GenerationJobController<B> {
    fn clone(&self) -> Self {
        Self {
            workspace: Arc::clone(&self.workspace),
            store: Arc::clone(&self.store),
            blobs: Arc::clone(&self.blobs),
            backend: Arc::clone(&self.backend),
            rasterizer: Arc::clone(&self.rasterizer),
            config: Arc::clone(&self.config),
        }
    }
}

fn lock(workspace: &Mutex<Workspace>) -> MutexGuard<'_, Workspace> {
    workspace.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<B: GenerationBackend> GenerationJobController<B> {
    pub fn new(
        workspace: Arc<Mutex<Workspace>>,
        store: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
        backend: B,
        config: Config,
    ) -> Self {
        Self {
            workspace,
            store,
            blobs,
            backend: Arc::new(backend),
            rasterizer: Arc::new(NoMask),
            config: Arc::new(config),
        }
    }

    pub fn with_rasterizer(mut self, rasterizer: impl MaskRasterizer + 'static) -> Self {
        self.rasterizer = Arc::new(rasterizer);
        self
    }

    pub fn workspace(&self) -> &Arc<Mutex<Workspace>> {
        &self.workspace
    }

    /// Synchronous phase: nothing here touches the backend
    pub fn begin(&self, submission: Submission) -> Result<PendingGeneration> {
        let Submission {
            source_id,
            prompt,
            quality,
            annotations,
        } = submission;
        let cost = self.config.cost(quality);
        let now = Utc::now();

        let pending = {
            let mut workspace = lock(&self.workspace);
            let source = workspace
                .image(&source_id)
                .cloned()
                .ok_or_else(|| EditorError::ImageNotFound(source_id.clone()))?;
            if source.is_generating || source.storage_ref.is_none() {
                return Err(EditorError::SourceNotReady(source_id));
            }

            if !workspace.ledger().can_afford(cost) {
                let balance = workspace.ledger().balance();
                info!("💳 Top-up required: {} needs {}, balance {}", quality.as_str(), cost, balance);
                return Err(EditorError::InsufficientCredit {
                    required: cost,
                    balance,
                });
            }

            let id = Uuid::new_v4().to_string();
            let debit = workspace.ledger_mut().debit(&id, cost);
            let job = GenerationJob {
                id,
                parent_id: Some(source.id.clone()),
                status: JobStatus::Processing,
                quality,
                cost: match debit {
                    Debit::Charged(charged) => charged,
                    Debit::Waived => Credits::ZERO,
                },
                created_at: now,
            };

            // Count includes the job being submitted
            let concurrent = workspace.active_generation_count() + 1;
            let estimate = estimate_duration(self.config.base_duration(quality), concurrent);
            let placeholder = placeholder_for(&source, &job, &prompt, estimate, now);

            workspace.insert_image(placeholder.clone());
            workspace.insert_job(job.clone());

            PendingGeneration {
                job,
                placeholder,
                debit,
                estimate,
                source,
                prompt,
                annotations,
            }
        };

        info!(
            "🎨 Generation {} submitted from {} ({}, ~{:.0}s)",
            pending.job.id,
            pending.source.id,
            quality.as_str(),
            pending.estimate.as_secs_f64()
        );

        let persisted = self
            .store
            .upsert_job(&pending.job)
            .and_then(|_| self.store.upsert_image(&pending.placeholder));
        if let Err(e) = persisted {
            warn!("⚠️  Could not persist generation {}: {}", pending.job.id, e);
            self.roll_back(&pending);
            return Err(e);
        }

        Ok(pending)
    }

    /// Asynchronous phase: call the backend once and reconcile
    pub async fn run(&self, pending: PendingGeneration) -> GenerationOutcome {
        match self.execute(&pending).await {
            Ok(image) => {
                info!("✅ Generation {} completed ({}x{})", image.id, image.real_width.unwrap_or(0), image.real_height.unwrap_or(0));
                GenerationOutcome::Completed(image)
            }
            Err(e) => {
                let message = e.to_string();
                warn!("❌ Generation {} failed: {}", pending.job.id, message);
                let refunded = self.roll_back(&pending);
                GenerationOutcome::Failed {
                    id: pending.job.id.clone(),
                    message,
                    refunded,
                }
            }
        }
    }

    /// Both phases in one call
    pub async fn submit(&self, submission: Submission) -> Result<GenerationOutcome> {
        let pending = self.begin(submission)?;
        Ok(self.run(pending).await)
    }

    /// Run `begin`, then hand the backend call to a background task
    pub fn dispatch(&self, submission: Submission) -> Result<(PendingGeneration, JoinHandle<GenerationOutcome>)> {
        let pending = self.begin(submission)?;
        let controller = self.clone();
        let task_pending = pending.clone();
        let handle = tokio::spawn(async move { controller.run(task_pending).await });
        Ok((pending, handle))
    }

    async fn execute(&self, pending: &PendingGeneration) -> Result<ImageEntity> {
        let source = &pending.source;
        let id = pending.job.id.as_str();

        let storage_ref = source
            .storage_ref
            .clone()
            .ok_or_else(|| EditorError::SourceNotReady(source.id.clone()))?;
        let blobs = Arc::clone(&self.blobs);
        let bytes = tokio::task::spawn_blocking(move || blobs.read(&storage_ref)).await??;

        let width = source.real_width.unwrap_or(source.display_width);
        let height = source.real_height.unwrap_or(source.display_height);
        let request = GenerationRequest {
            source: SourceImage {
                id: source.id.clone(),
                bytes,
                width,
                height,
            },
            prompt: pending.prompt.clone(),
            mask: self.rasterizer.rasterize(&pending.annotations, width, height),
            references: reference_images(&pending.annotations),
            quality: pending.job.quality,
        };

        let generated = self.backend.generate(request).await?;
        if generated.bytes.is_empty() {
            return Err(GenerationError::EmptyResult.into());
        }
        debug!(
            "Generation {} usage: {} input / {} output tokens",
            id, generated.usage.input_tokens, generated.usage.output_tokens
        );

        let blobs = Arc::clone(&self.blobs);
        let size = self.config.thumbnail_size;
        let (result_ref, thumbnail_ref, real_width, real_height) = tokio::task::spawn_blocking(move || -> Result<_> {
            let thumbnail = derive_thumbnail(&generated.bytes, size)
                .map_err(|e| GenerationError::Decode(e.to_string()))?;
            let result_ref = blobs.put(&generated.bytes, extension_for(&generated.bytes))?;
            let thumbnail_ref = blobs.put(&thumbnail.bytes, "png")?;
            Ok((result_ref, thumbnail_ref, thumbnail.real_width, thumbnail.real_height))
        })
        .await??;

        let completed = {
            let workspace = lock(&self.workspace);
            // A reload may have pruned the placeholder or rebuilt it from the job alone
            let base = match workspace.image(id) {
                Some(current) => ImageEntity {
                    title: current.title.clone().or_else(|| pending.placeholder.title.clone()),
                    prompt: current.prompt.clone().or_else(|| pending.placeholder.prompt.clone()),
                    ..current.clone()
                },
                None => pending.placeholder.clone(),
            };
            let (display_width, display_height) =
                resolved_display((base.display_width, base.display_height), (real_width, real_height));
            ImageEntity {
                storage_ref: Some(result_ref.clone()),
                thumbnail_ref: Some(thumbnail_ref.clone()),
                real_width: Some(real_width),
                real_height: Some(real_height),
                display_width,
                display_height,
                is_generating: false,
                estimated_duration_ms: None,
                updated_at: Utc::now(),
                ..base
            }
        };

        let updated = self
            .store
            .complete_image(id, &result_ref, Some(&thumbnail_ref), real_width, real_height)?;
        if !updated {
            info!("♻️  Placeholder {} was pruned mid-flight, restoring its row", id);
            self.store.upsert_image(&completed)?;
        }

        {
            let mut workspace = lock(&self.workspace);
            workspace.insert_image(completed.clone());
            workspace.remove_job(id);
            workspace.ledger_mut().settle(id);
        }

        self.clear_job(&pending.job, JobStatus::Completed);

        let inherited = (pending.placeholder.display_width, pending.placeholder.display_height);
        if differs_materially(inherited, (completed.display_width, completed.display_height)) {
            debug!(
                "Display size of {} changed {:?} -> {}x{}, repairing",
                id, inherited, completed.display_width, completed.display_height
            );
            drop(self.repair_dimensions(id, completed.display_width, completed.display_height));
        }

        Ok(completed)
    }

    /// Refund (if charged) and remove every trace of the placeholder
    fn roll_back(&self, pending: &PendingGeneration) -> Option<Credits> {
        let id = pending.job.id.as_str();
        let refunded = {
            let mut workspace = lock(&self.workspace);
            workspace.remove_image(id);
            workspace.remove_job(id);
            match pending.debit {
                Debit::Charged(_) => workspace.ledger_mut().refund(id),
                Debit::Waived => None,
            }
        };
        info!("🗑️  Removed placeholder {}", id);

        if let Err(e) = self.store.delete_image(id) {
            warn!("⚠️  Failed to delete placeholder {}: {}", id, e);
        }
        self.clear_job(&pending.job, JobStatus::Failed);
        refunded
    }

    /// Record the terminal status, then drop the job row. A failed delete
    /// leaves a terminal row that the next reload settles.
    fn clear_job(&self, job: &GenerationJob, status: JobStatus) {
        let terminal = GenerationJob {
            status,
            ..job.clone()
        };
        let result = self
            .store
            .upsert_job(&terminal)
            .and_then(|_| self.store.delete_job(&terminal.id));
        if let Err(e) = result {
            warn!("⚠️  Failed to clear {} job {}: {}", status.as_str(), terminal.id, e);
        }
    }

    /// Best-effort background write of corrected display dimensions
    pub fn repair_dimensions(&self, id: &str, width: u32, height: u32) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let id = id.to_string();
        tokio::task::spawn_blocking(move || match store.update_display_dimensions(&id, width, height) {
            Ok(()) => debug!("Repaired display size of {} to {}x{}", id, width, height),
            Err(e) => warn!("⚠️  Dimension repair for {} failed: {}", id, e),
        })
    }

    /// Apply authoritative balance pushes until the sender goes away
    pub fn listen_ledger(&self, mut updates: mpsc::UnboundedReceiver<LedgerUpdate>) -> JoinHandle<()> {
        let workspace = Arc::clone(&self.workspace);
        tokio::spawn(async move {
            while let Some(update) = updates.recv().await {
                lock(&workspace).ledger_mut().apply(update);
            }
            debug!("Ledger feed closed");
        })
    }

    /// Progress of a generating image, None once it completed or vanished
    pub fn progress_of(&self, id: &str, now: DateTime<Utc>) -> Option<f32> {
        let workspace = lock(&self.workspace);
        let image = workspace.image(id).filter(|image| image.is_generating)?;
        let started = image.generation_started_at?;
        let estimate = Duration::from_millis(image.estimated_duration_ms?);
        Some(progress(started, estimate, now))
    }
}

fn placeholder_for(
    source: &ImageEntity,
    job: &GenerationJob,
    prompt: &str,
    estimate: Duration,
    now: DateTime<Utc>,
) -> ImageEntity {
    let version = source.version + 1;
    ImageEntity {
        id: job.id.clone(),
        parent_id: Some(source.id.clone()),
        storage_ref: None,
        thumbnail_ref: None,
        display_width: source.display_width,
        display_height: source.display_height,
        real_width: None,
        real_height: None,
        title: Some(format!("{} v{}", source.base_name, version)),
        base_name: source.base_name.clone(),
        version,
        prompt: Some(prompt.to_string()),
        draft_prompt: None,
        annotations: Vec::new(),
        is_generating: true,
        generation_started_at: Some(now),
        estimated_duration_ms: Some(estimate.as_millis() as u64),
        quality: Some(job.quality),
        created_at: now,
        updated_at: now,
    }
}

/// Keep the inherited display width and follow the real aspect ratio
fn resolved_display(display: (u32, u32), real: (u32, u32)) -> (u32, u32) {
    if real.0 == 0 || real.1 == 0 || display.0 == 0 {
        return display;
    }
    let height = (display.0 as f64 * real.1 as f64 / real.0 as f64).round().max(1.0) as u32;
    (display.0, height)
}

fn differs_materially(a: (u32, u32), b: (u32, u32)) -> bool {
    a.0.abs_diff(b.0) > DIMENSION_TOLERANCE_PX || a.1.abs_diff(b.1) > DIMENSION_TOLERANCE_PX
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::annotation::{AnnotationKind, ImageHandle, Point};
    use crate::generation::backend::GeneratedImage;
    use crate::generation::backend::Usage;
    use crate::lineage::grouper::LineageGrouper;
    use crate::media::blobs::LocalBlobStore;
    use crate::media::thumbnail::sample_png;
    use crate::state::ledger::{CreditLedger, Role};
    use crate::state::library::Library;
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedBackend {
        result: std::result::Result<GeneratedImage, GenerationError>,
        calls: AtomicUsize,
        requests: Mutex<Vec<GenerationRequest>>,
    }

    impl ScriptedBackend {
        fn returning(bytes: Vec<u8>) -> Self {
            Self::scripted(Ok(GeneratedImage {
                bytes,
                usage: Usage {
                    input_tokens: 10,
                    output_tokens: 20,
                },
            }))
        }

        fn failing(message: &str) -> Self {
            Self::scripted(Err(GenerationError::Backend(message.to_string())))
        }

        fn scripted(result: std::result::Result<GeneratedImage, GenerationError>) -> Self {
            Self {
                result,
                calls: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    impl GenerationBackend for ScriptedBackend {
        fn generate(
            &self,
            request: GenerationRequest,
        ) -> impl Future<Output = std::result::Result<GeneratedImage, GenerationError>> + Send {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request);
            let result = self.result.clone();
            async move { result }
        }
    }

    struct Harness {
        _blob_dir: tempfile::TempDir,
        library: Arc<Library>,
        controller: GenerationJobController<ScriptedBackend>,
    }

    fn credits(value: i64) -> Credits {
        Credits::from_hundredths(value)
    }

    fn harness(backend: ScriptedBackend, ledger: CreditLedger) -> Harness {
        let blob_dir = tempfile::tempdir().unwrap();
        let blobs = Arc::new(LocalBlobStore::open(blob_dir.path()).unwrap());
        let library = Arc::new(Library::open_in_memory().unwrap());

        let mut source = ImageEntity::upload("A", "shoe", 640, 480);
        source.real_width = Some(64);
        source.real_height = Some(48);
        source.storage_ref = Some(blobs.put(&sample_png(64, 48), "png").unwrap());
        source.created_at = Utc::now() - chrono::Duration::minutes(1);
        library.upsert_image(&source).unwrap();

        let mut workspace = Workspace::new(ledger);
        workspace.insert_image(source);

        let controller = GenerationJobController::new(
            Arc::new(Mutex::new(workspace)),
            library.clone(),
            blobs,
            backend,
            Config::default(),
        );
        Harness {
            _blob_dir: blob_dir,
            library,
            controller,
        }
    }

    fn submission(quality: QualityTier) -> Submission {
        Submission {
            source_id: "A".into(),
            prompt: "make it blue".into(),
            quality,
            annotations: Vec::new(),
        }
    }

    fn balance(controller: &GenerationJobController<ScriptedBackend>) -> Credits {
        lock(controller.workspace()).ledger().balance()
    }

    fn row_ids(controller: &GenerationJobController<ScriptedBackend>) -> Vec<Vec<String>> {
        let grouper = LineageGrouper::from_config(&Config::default());
        lock(controller.workspace())
            .rows(&grouper)
            .iter()
            .map(|row| row.images.iter().map(|image| image.id.clone()).collect())
            .collect()
    }

    #[tokio::test]
    async fn test_failed_generation_refunds_and_removes_placeholder() {
        let h = harness(
            ScriptedBackend::failing("model overloaded"),
            CreditLedger::new(credits(500), Role::Standard),
        );

        let pending = h.controller.begin(submission(QualityTier::Medium)).unwrap();
        let id = pending.id().to_string();
        assert_eq!(balance(&h.controller), credits(400));
        assert_eq!(row_ids(&h.controller), vec![vec!["A".to_string(), id.clone()]]);
        {
            let workspace = lock(h.controller.workspace());
            let placeholder = workspace.image(&id).unwrap();
            assert!(placeholder.is_generating);
            assert_eq!(placeholder.parent_id.as_deref(), Some("A"));
        }
        assert_eq!(h.library.load_jobs().unwrap().len(), 1);

        let outcome = h.controller.run(pending).await;
        match outcome {
            GenerationOutcome::Failed { id: failed, message, refunded } => {
                assert_eq!(failed, id);
                assert!(message.contains("model overloaded"));
                assert_eq!(refunded, Some(credits(100)));
            }
            other => panic!("expected failure, got {:?}", other),
        }

        assert_eq!(balance(&h.controller), credits(500));
        assert_eq!(row_ids(&h.controller), vec![vec!["A".to_string()]]);
        assert!(h.library.load_jobs().unwrap().is_empty());
        assert!(h.library.get_image(&id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_successful_generation_charges_exactly_cost() {
        let h = harness(
            ScriptedBackend::returning(sample_png(64, 64)),
            CreditLedger::new(credits(500), Role::Standard),
        );

        let outcome = h.controller.submit(submission(QualityTier::Medium)).await.unwrap();
        let image = match outcome {
            GenerationOutcome::Completed(image) => image,
            other => panic!("expected completion, got {:?}", other),
        };

        assert_eq!(balance(&h.controller), credits(400));
        assert!(!lock(h.controller.workspace()).ledger().has_pending(&image.id));
        assert!(!image.is_generating);
        assert_eq!(image.version, 2);
        assert_eq!(image.display_title(), "shoe v2");
        assert_eq!((image.real_width, image.real_height), (Some(64), Some(64)));
        assert_eq!((image.display_width, image.display_height), (640, 640));

        let stored = h.library.get_image(&image.id).unwrap().unwrap();
        assert_eq!(stored.storage_ref, image.storage_ref);
        assert!(h.library.load_jobs().unwrap().is_empty());
        assert_eq!(row_ids(&h.controller), vec![vec!["A".to_string(), image.id.clone()]]);

        h.controller.repair_dimensions(&image.id, 640, 640).await.unwrap();
        let repaired = h.library.get_image(&image.id).unwrap().unwrap();
        assert_eq!((repaired.display_width, repaired.display_height), (640, 640));
    }

    #[tokio::test]
    async fn test_unlimited_role_is_never_charged_or_refunded() {
        let h = harness(ScriptedBackend::failing("boom"), CreditLedger::new(Credits::ZERO, Role::Unlimited));

        let pending = h.controller.begin(submission(QualityTier::High)).unwrap();
        assert_eq!(pending.debit, Debit::Waived);
        assert_eq!(pending.job.cost, Credits::ZERO);

        let outcome = h.controller.run(pending).await;
        assert!(matches!(outcome, GenerationOutcome::Failed { refunded: None, .. }));
        assert_eq!(balance(&h.controller), Credits::ZERO);
    }

    #[tokio::test]
    async fn test_insufficient_credit_never_reaches_backend() {
        let h = harness(
            ScriptedBackend::returning(sample_png(8, 8)),
            CreditLedger::new(credits(50), Role::Standard),
        );

        let result = h.controller.submit(submission(QualityTier::High)).await;
        assert!(matches!(
            result,
            Err(EditorError::InsufficientCredit { required, balance }) if required == credits(200) && balance == credits(50)
        ));
        assert_eq!(h.controller.backend.calls.load(Ordering::SeqCst), 0);
        assert_eq!(lock(h.controller.workspace()).len(), 1);
        assert!(h.library.load_jobs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_generating_source_is_rejected() {
        let h = harness(
            ScriptedBackend::returning(sample_png(8, 8)),
            CreditLedger::new(credits(500), Role::Standard),
        );
        let pending = h.controller.begin(submission(QualityTier::Low)).unwrap();

        let mut chained = submission(QualityTier::Low);
        chained.source_id = pending.id().to_string();
        assert!(matches!(h.controller.begin(chained), Err(EditorError::SourceNotReady(_))));

        let mut missing = submission(QualityTier::Low);
        missing.source_id = "nope".into();
        assert!(matches!(h.controller.begin(missing), Err(EditorError::ImageNotFound(_))));
        assert_eq!(balance(&h.controller), credits(450));
    }

    #[tokio::test]
    async fn test_estimate_grows_with_concurrent_jobs() {
        let h = harness(
            ScriptedBackend::returning(sample_png(8, 8)),
            CreditLedger::new(credits(500), Role::Standard),
        );
        let first = h.controller.begin(submission(QualityTier::Medium)).unwrap();
        let second = h.controller.begin(submission(QualityTier::Medium)).unwrap();

        assert_eq!(first.estimate, Duration::from_secs(40));
        let second_ms = second.placeholder.estimated_duration_ms.unwrap();
        assert!((51_999..=52_000).contains(&second_ms));
        assert_eq!(lock(h.controller.workspace()).active_generation_count(), 2);

        let now = Utc::now();
        let fraction = h.controller.progress_of(second.id(), now).unwrap();
        assert!((0.0..=0.99).contains(&fraction));
        assert_eq!(h.controller.progress_of("A", now), None);
    }

    #[tokio::test]
    async fn test_empty_result_is_a_failure() {
        let h = harness(ScriptedBackend::returning(Vec::new()), CreditLedger::new(credits(500), Role::Standard));
        let outcome = h.controller.submit(submission(QualityTier::Low)).await.unwrap();
        assert!(matches!(outcome, GenerationOutcome::Failed { refunded: Some(r), .. } if r == credits(50)));
        assert_eq!(balance(&h.controller), credits(500));
    }

    #[tokio::test]
    async fn test_undecodable_result_is_a_failure() {
        let h = harness(
            ScriptedBackend::returning(b"garbage".to_vec()),
            CreditLedger::new(credits(500), Role::Standard),
        );
        let outcome = h.controller.submit(submission(QualityTier::Low)).await.unwrap();
        assert!(matches!(outcome, GenerationOutcome::Failed { ref message, .. } if message.contains("decoded")));
        assert_eq!(row_ids(&h.controller), vec![vec!["A".to_string()]]);
    }

    #[tokio::test]
    async fn test_request_carries_source_prompt_and_references() {
        let h = harness(
            ScriptedBackend::returning(sample_png(8, 8)),
            CreditLedger::new(credits(500), Role::Standard),
        );
        let mut request = submission(QualityTier::Low);
        request.annotations.push(Annotation {
            id: 1,
            kind: AnnotationKind::Reference {
                anchor: Point::new(5.0, 5.0),
                image: ImageHandle::Stored {
                    storage_ref: "texture.png".into(),
                },
                caption: None,
            },
        });
        h.controller.submit(request).await.unwrap();

        let requests = h.controller.backend.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].source.id, "A");
        assert_eq!((requests[0].source.width, requests[0].source.height), (64, 48));
        assert!(!requests[0].source.bytes.is_empty());
        assert_eq!(requests[0].prompt, "make it blue");
        assert_eq!(requests[0].references.len(), 1);
        assert_eq!(requests[0].mask, None);
    }

    #[tokio::test]
    async fn test_dispatch_runs_in_background() {
        let h = harness(
            ScriptedBackend::returning(sample_png(8, 8)),
            CreditLedger::new(credits(500), Role::Standard),
        );
        let (pending, handle) = h.controller.dispatch(submission(QualityTier::Low)).unwrap();
        assert_eq!(balance(&h.controller), credits(450));

        let outcome = handle.await.unwrap();
        assert!(matches!(outcome, GenerationOutcome::Completed(ref image) if image.id == pending.id()));
    }

    #[tokio::test]
    async fn test_authoritative_ledger_push_wins() {
        let h = harness(
            ScriptedBackend::returning(sample_png(8, 8)),
            CreditLedger::new(credits(500), Role::Standard),
        );
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = h.controller.listen_ledger(rx);

        tx.send(LedgerUpdate {
            balance: credits(1234),
            role: Role::Standard,
        })
        .unwrap();
        drop(tx);
        listener.await.unwrap();

        assert_eq!(balance(&h.controller), credits(1234));
    }

    fn reload_at(h: &Harness, now: DateTime<Utc>) {
        let grouper = LineageGrouper::from_config(&Config::default());
        lock(h.controller.workspace()).reload(&*h.library, &grouper, now).unwrap();
    }

    #[tokio::test]
    async fn test_completion_after_prune_restores_the_row() {
        let h = harness(
            ScriptedBackend::returning(sample_png(64, 48)),
            CreditLedger::new(credits(500), Role::Standard),
        );
        let pending = h.controller.begin(submission(QualityTier::Medium)).unwrap();
        let id = pending.id().to_string();

        reload_at(&h, Utc::now() + chrono::Duration::minutes(30));
        assert!(lock(h.controller.workspace()).image(&id).is_none());
        assert!(h.library.get_image(&id).unwrap().is_none());

        let outcome = h.controller.run(pending).await;
        assert!(matches!(outcome, GenerationOutcome::Completed(ref image) if image.id == id));
        assert_eq!(balance(&h.controller), credits(400));

        let stored = h.library.get_image(&id).unwrap().unwrap();
        assert!(!stored.is_generating);
        assert!(stored.storage_ref.is_some());
        assert_eq!(stored.parent_id.as_deref(), Some("A"));
        assert_eq!(stored.prompt.as_deref(), Some("make it blue"));

        reload_at(&h, Utc::now());
        assert_eq!(row_ids(&h.controller), vec![vec!["A".to_string(), id]]);
    }

    #[tokio::test]
    async fn test_reload_mid_flight_then_completion_keeps_prompt_and_title() {
        let h = harness(
            ScriptedBackend::returning(sample_png(64, 48)),
            CreditLedger::new(credits(500), Role::Standard),
        );
        let pending = h.controller.begin(submission(QualityTier::Medium)).unwrap();
        let id = pending.id().to_string();

        reload_at(&h, Utc::now());
        {
            let workspace = lock(h.controller.workspace());
            assert!(workspace.image(&id).unwrap().is_generating);
            assert_eq!(workspace.ledger().balance(), credits(400));
        }

        let image = match h.controller.run(pending).await {
            GenerationOutcome::Completed(image) => image,
            other => panic!("expected completion, got {:?}", other),
        };
        assert_eq!(image.prompt.as_deref(), Some("make it blue"));
        assert_eq!(image.title.as_deref(), Some("shoe v2"));
        assert_eq!(balance(&h.controller), credits(400));

        let in_memory = lock(h.controller.workspace()).image(&id).cloned().unwrap();
        assert_eq!(in_memory.prompt.as_deref(), Some("make it blue"));
        assert!(!in_memory.is_generating);
        assert!(h.library.load_jobs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reload_mid_flight_then_failure_refunds() {
        let h = harness(
            ScriptedBackend::failing("timeout"),
            CreditLedger::new(credits(500), Role::Standard),
        );
        let pending = h.controller.begin(submission(QualityTier::Medium)).unwrap();
        let id = pending.id().to_string();

        reload_at(&h, Utc::now());
        assert_eq!(balance(&h.controller), credits(400));

        let outcome = h.controller.run(pending).await;
        assert!(matches!(outcome, GenerationOutcome::Failed { refunded: Some(r), .. } if r == credits(100)));
        assert_eq!(balance(&h.controller), credits(500));
        assert!(lock(h.controller.workspace()).image(&id).is_none());
        assert!(h.library.get_image(&id).unwrap().is_none());

        reload_at(&h, Utc::now());
        assert_eq!(row_ids(&h.controller), vec![vec!["A".to_string()]]);
    }

    #[test]
    fn test_resolved_display_follows_real_aspect() {
        assert_eq!(resolved_display((640, 480), (64, 48)), (640, 480));
        assert_eq!(resolved_display((640, 480), (100, 100)), (640, 640));
        assert_eq!(resolved_display((640, 480), (0, 0)), (640, 480));
        assert!(!differs_materially((640, 480), (640, 481)));
        assert!(differs_materially((640, 480), (640, 640)));
    }
}
