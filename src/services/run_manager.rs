// src/services/run_manager.rs
use crate::errors::PageGenError;
use crate::models::{GenerationProgress, ProductAnalysis, RunRecord, RunStatus};
use crate::services::orchestrator::{
    GenerationRequest, Orchestrator, RunControl, RunFailure, eligible_count,
};
use crate::services::run_store::RunStore;
use chrono::Utc;
use log::{error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Starts orchestration runs in the background and tracks the live ones.
pub struct RunManager {
    orchestrator: Arc<Orchestrator>,
    store: Arc<dyn RunStore>,
    live: Arc<RwLock<HashMap<Uuid, RunControl>>>,
    /// Final records the store refused; served until a later write succeeds.
    unsaved: Arc<RwLock<HashMap<Uuid, RunRecord>>>,
    run_timeout: Duration,
}

const PERSIST_ATTEMPTS: u32 = 3;
const PERSIST_BACKOFF: Duration = Duration::from_millis(100);

impl RunManager {
    pub fn new(orchestrator: Arc<Orchestrator>, store: Arc<dyn RunStore>, run_timeout: Duration) -> Self {
        Self {
            orchestrator,
            store,
            live: Arc::new(RwLock::new(HashMap::new())),
            unsaved: Arc::new(RwLock::new(HashMap::new())),
            run_timeout,
        }
    }

    /// Registers and spawns a run. Returns its id and eligible unit count.
    pub async fn start(&self, request: GenerationRequest) -> Result<(Uuid, usize), PageGenError> {
        let id = Uuid::new_v4();
        let total = eligible_count(&request.analysis.sections);
        let created_at = Utc::now();
        let submitted = request.analysis.clone();

        self.store
            .put_run(&RunRecord {
                id,
                status: RunStatus::Running,
                analysis: submitted.clone(),
                error: None,
                created_at,
                finished_at: None,
            })
            .await?;

        let control = RunControl::new();
        control.progress().begin(total, created_at);
        self.live.write().await.insert(id, control.clone());

        let orchestrator = self.orchestrator.clone();
        let store = self.store.clone();
        let live = self.live.clone();
        let unsaved = self.unsaved.clone();
        let run_timeout = self.run_timeout;

        tokio::spawn(async move {
            let outcome =
                tokio::time::timeout(run_timeout, orchestrator.run(request, &control)).await;

            let (status, analysis, error) = match outcome {
                Ok(Ok(analysis)) => (RunStatus::Completed, analysis, None),
                Ok(Err(RunFailure { error: PageGenError::Cancelled, partial })) => {
                    (RunStatus::Cancelled, partial, Some(PageGenError::Cancelled.to_string()))
                }
                Ok(Err(RunFailure { error, partial })) => {
                    (RunStatus::Partial, partial, Some(error.to_string()))
                }
                Err(_) => {
                    // The run future was dropped mid-flight and never reset its progress.
                    control.progress().reset();
                    let err = PageGenError::Timeout(run_timeout.as_secs());
                    warn!("Run {} timed out: {}", id, err);
                    let partial = control.last_snapshot().unwrap_or(submitted);
                    (RunStatus::Partial, partial, Some(err.to_string()))
                }
            };

            let record = RunRecord {
                id,
                status,
                analysis,
                error,
                created_at,
                finished_at: Some(Utc::now()),
            };
            if let Err(e) = persist(store.as_ref(), &record).await {
                error!("Failed to store result of run {}: {}", id, e);
                unsaved.write().await.insert(id, record);
            }
            live.write().await.remove(&id);
            info!("Run {} ended with status {:?}", id, status);
        });

        Ok((id, total))
    }

    /// Latest progress snapshot of a live run.
    pub async fn progress(&self, run_id: &Uuid) -> Option<GenerationProgress> {
        self.live
            .read()
            .await
            .get(run_id)
            .map(|control| control.progress().snapshot())
    }

    /// Requests cancellation; false when the run is not live.
    pub async fn cancel(&self, run_id: &Uuid) -> bool {
        match self.live.read().await.get(run_id) {
            Some(control) => {
                control.cancel();
                true
            }
            None => false,
        }
    }

    /// Stored record, with the working copy substituted while the run is live.
    pub async fn get_run(&self, run_id: &Uuid) -> Result<RunRecord, PageGenError> {
        if let Some(record) = self.retry_unsaved(run_id).await {
            return Ok(record);
        }

        let working: Option<ProductAnalysis> = self
            .live
            .read()
            .await
            .get(run_id)
            .and_then(|control| control.last_snapshot());

        let mut record = self.store.get_run(run_id).await?;
        if record.status == RunStatus::Running {
            if let Some(analysis) = working {
                record.analysis = analysis;
            }
        }
        Ok(record)
    }

    pub async fn live_count(&self) -> usize {
        self.live.read().await.len()
    }

    /// Final record held back after a failed write. Persisting it is retried
    /// once per lookup; it is forgotten as soon as the store accepts it.
    async fn retry_unsaved(&self, run_id: &Uuid) -> Option<RunRecord> {
        let record = self.unsaved.read().await.get(run_id).cloned()?;
        if self.store.put_run(&record).await.is_ok() {
            self.unsaved.write().await.remove(run_id);
        }
        Some(record)
    }
}

async fn persist(store: &dyn RunStore, record: &RunRecord) -> Result<(), PageGenError> {
    let mut attempt = 1;
    loop {
        match store.put_run(record).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < PERSIST_ATTEMPTS => {
                warn!("Storing run {} failed (attempt {}): {}", record.id, attempt, e);
                tokio::time::sleep(PERSIST_BACKOFF * attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GenerationMode, LayoutType, Section};
    use crate::services::run_store::MemoryStore;
    use crate::services::synthesis::{ImageSynthesizer, SynthesisRequest};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Accepts the first `accepted` run writes, then fails until `healed`.
    struct FlakyStore {
        inner: MemoryStore,
        accepted: usize,
        writes: AtomicUsize,
        healed: AtomicBool,
    }

    impl FlakyStore {
        fn new(accepted: usize) -> Self {
            Self {
                inner: MemoryStore::new(),
                accepted,
                writes: AtomicUsize::new(0),
                healed: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl RunStore for FlakyStore {
        async fn put_run(&self, record: &RunRecord) -> Result<(), PageGenError> {
            let n = self.writes.fetch_add(1, Ordering::SeqCst);
            if n >= self.accepted && !self.healed.load(Ordering::SeqCst) {
                return Err(PageGenError::Storage("connection reset".into()));
            }
            self.inner.put_run(record).await
        }

        async fn get_run(&self, run_id: &Uuid) -> Result<RunRecord, PageGenError> {
            self.inner.get_run(run_id).await
        }

        async fn put_reference_images(
            &self,
            upload_id: &Uuid,
            images: &[crate::models::ReferenceImage],
        ) -> Result<(), PageGenError> {
            self.inner.put_reference_images(upload_id, images).await
        }

        async fn get_reference_images(
            &self,
            upload_id: &Uuid,
        ) -> Result<Vec<crate::models::ReferenceImage>, PageGenError> {
            self.inner.get_reference_images(upload_id).await
        }
    }

    struct SlowSynthesizer {
        delay: Duration,
    }

    #[async_trait]
    impl ImageSynthesizer for SlowSynthesizer {
        async fn synthesize(&self, request: &SynthesisRequest) -> Result<String, PageGenError> {
            tokio::time::sleep(self.delay).await;
            if request.prompt.contains("BROKEN") {
                return Err(PageGenError::Synthesis("scripted".into()));
            }
            Ok("data:image/png;base64,OK".to_string())
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    fn manager(delay: Duration, timeout: Duration) -> RunManager {
        let orchestrator = Arc::new(Orchestrator::new(Arc::new(SlowSynthesizer { delay })));
        RunManager::new(orchestrator, Arc::new(MemoryStore::new()), timeout)
    }

    fn request(prompts: &[&str]) -> GenerationRequest {
        GenerationRequest {
            analysis: ProductAnalysis {
                product_name: "Kettle".into(),
                features: vec![],
                marketing_copy: String::new(),
                product_visual_description: None,
                detected_category: None,
                sections: prompts
                    .iter()
                    .enumerate()
                    .map(|(i, p)| Section {
                        id: format!("s{i}"),
                        title: format!("Section {i}"),
                        layout_type: LayoutType::FullWidth,
                        image_prompt: Some(p.to_string()),
                        ..Section::default()
                    })
                    .collect(),
            },
            reference_images: vec![],
            color_options: vec![],
            mode: GenerationMode::Creation,
            model_settings: None,
        }
    }

    async fn wait_until_done(manager: &RunManager, id: &Uuid) -> RunRecord {
        for _ in 0..200 {
            let record = manager.get_run(id).await.unwrap();
            if record.status != RunStatus::Running {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run {id} did not finish");
    }

    #[tokio::test]
    async fn completed_run_is_stored_and_unregistered() {
        let manager = manager(Duration::from_millis(1), Duration::from_secs(5));
        let (id, total) = manager.start(request(&["a", "b"])).await.unwrap();
        assert_eq!(total, 2);

        let record = wait_until_done(&manager, &id).await;
        assert_eq!(record.status, RunStatus::Completed);
        assert!(record.finished_at.is_some());
        assert!(record.analysis.sections.iter().all(|s| s.image_url.is_some()));
        assert_eq!(manager.live_count().await, 0);
        assert!(manager.progress(&id).await.is_none());
    }

    #[tokio::test]
    async fn failed_run_keeps_partial_result() {
        let manager = manager(Duration::from_millis(1), Duration::from_secs(5));
        let (id, _) = manager.start(request(&["ok", "BROKEN", "later"])).await.unwrap();

        let record = wait_until_done(&manager, &id).await;
        assert_eq!(record.status, RunStatus::Partial);
        assert!(record.error.unwrap().contains("scripted"));
        assert_eq!(record.analysis.sections.len(), 3);
        assert!(record.analysis.sections[0].image_url.is_some());
        assert!(record.analysis.sections[2].image_url.is_none());
    }

    #[tokio::test]
    async fn timeout_records_last_snapshot() {
        let manager = manager(Duration::from_millis(200), Duration::from_millis(300));
        let (id, _) = manager.start(request(&["a", "b", "c"])).await.unwrap();

        let record = wait_until_done(&manager, &id).await;
        assert_eq!(record.status, RunStatus::Partial);
        assert!(record.error.unwrap().contains("deadline"));
        assert!(record.analysis.sections[0].image_url.is_some());
        assert!(record.analysis.sections[2].image_url.is_none());
    }

    #[tokio::test]
    async fn cancel_stops_live_run() {
        let manager = manager(Duration::from_millis(100), Duration::from_secs(5));
        let (id, _) = manager.start(request(&["a", "b", "c", "d"])).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let progress = manager.progress(&id).await.unwrap();
        assert_eq!(progress.total, 4);
        assert!(manager.cancel(&id).await);

        let record = wait_until_done(&manager, &id).await;
        assert_eq!(record.status, RunStatus::Cancelled);
        assert!(!manager.cancel(&id).await);
    }

    #[tokio::test]
    async fn progress_total_is_known_immediately() {
        let manager = manager(Duration::from_millis(100), Duration::from_secs(5));
        let (id, total) = manager.start(request(&["a", "b", "c"])).await.unwrap();

        let progress = manager.progress(&id).await.unwrap();
        assert_eq!(progress.total, total);
        assert!(progress.start_time.is_some());
        assert!(manager.cancel(&id).await);
    }

    #[tokio::test]
    async fn unpersisted_result_is_still_served() {
        let store = Arc::new(FlakyStore::new(1));
        let orchestrator = Arc::new(Orchestrator::new(Arc::new(SlowSynthesizer {
            delay: Duration::from_millis(1),
        })));
        let manager = RunManager::new(orchestrator, store.clone(), Duration::from_secs(5));
        let (id, _) = manager.start(request(&["a", "b"])).await.unwrap();

        // Three failed writes with backoff take a few hundred milliseconds.
        let record = wait_until_done(&manager, &id).await;
        assert_eq!(record.status, RunStatus::Completed);
        assert!(record.analysis.sections.iter().all(|s| s.image_url.is_some()));
        assert_eq!(manager.live_count().await, 0);
        assert!(store.writes.load(Ordering::SeqCst) > PERSIST_ATTEMPTS as usize);
        assert_eq!(store.inner.get_run(&id).await.unwrap().status, RunStatus::Running);

        store.healed.store(true, Ordering::SeqCst);
        assert_eq!(manager.get_run(&id).await.unwrap().status, RunStatus::Completed);
        assert_eq!(store.inner.get_run(&id).await.unwrap().status, RunStatus::Completed);
        assert!(manager.unsaved.read().await.is_empty());
    }

    #[tokio::test]
    async fn transient_store_failure_is_retried() {
        let store = Arc::new(FlakyStore::new(1));
        let orchestrator = Arc::new(Orchestrator::new(Arc::new(SlowSynthesizer {
            delay: Duration::from_millis(1),
        })));
        let manager = RunManager::new(orchestrator, store.clone(), Duration::from_secs(5));
        let (id, _) = manager.start(request(&["a"])).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        store.healed.store(true, Ordering::SeqCst);

        let record = wait_until_done(&manager, &id).await;
        assert_eq!(record.status, RunStatus::Completed);
        assert_eq!(store.inner.get_run(&id).await.unwrap().status, RunStatus::Completed);
        assert!(manager.unsaved.read().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_run_is_not_found() {
        let manager = manager(Duration::from_millis(1), Duration::from_secs(1));
        let err = manager.get_run(&Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, PageGenError::NotFound(_)));
    }
}
