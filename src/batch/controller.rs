use super::{
    BatchError,
    control::{CancelFlag, PauseGate},
    runner::BatchRunner,
    state::BatchStore,
};
use crate::bulk;
use crate::models::{BatchView, Job, StatusTone};
use crate::prompt::PromptChannel;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Entry point for front-ends. Owns the run flags of one session's batch and
/// launches the worker; never waits on it.
pub struct BatchController {
    session: String,
    store: Arc<BatchStore>,
    prompts: Arc<dyn PromptChannel>,
    runner: BatchRunner,
    gate: PauseGate,
    cancel: CancelFlag,
    // Serializes start/pause/cancel so each sees a settled running flag.
    control: Mutex<()>,
}

impl BatchController {
    pub fn new(
        session: impl Into<String>,
        store: Arc<BatchStore>,
        prompts: Arc<dyn PromptChannel>,
        runner: BatchRunner,
    ) -> Self {
        Self {
            session: session.into(),
            store,
            prompts,
            runner,
            gate: PauseGate::new(),
            cancel: CancelFlag::new(),
            control: Mutex::new(()),
        }
    }

    pub async fn preview(&self, text: &str) -> Vec<Job> {
        let jobs = if text.trim().is_empty() {
            Vec::new()
        } else {
            bulk::parse(text)
        };
        self.store.replace_draft(jobs).await
    }

    /// Seeds a new batch and spawns its worker. Returns the number of items.
    pub async fn start(&self, text: &str) -> Result<usize, BatchError> {
        let _control = self.control.lock().await;
        if self.store.is_running().await {
            return Err(BatchError::AlreadyRunning);
        }
        if text.trim().is_empty() {
            return Err(BatchError::EmptyInput);
        }
        let jobs = bulk::parse(text);
        if jobs.is_empty() {
            return Err(BatchError::NoJobs);
        }

        let total = self.store.begin(jobs.clone()).await?;
        self.gate.open();
        self.cancel.clear();
        info!(target: "relist.batch", session = %self.session, total, "bulk_started");
        self.spawn_worker(jobs);
        Ok(total)
    }

    fn spawn_worker(&self, jobs: Vec<Job>) {
        let session = self.session.clone();
        let store = self.store.clone();
        let prompts = self.prompts.clone();
        let cancel = self.cancel.clone();

        let inner = {
            let session = session.clone();
            let store = store.clone();
            let prompts = prompts.clone();
            let gate = self.gate.clone();
            let cancel = cancel.clone();
            let runner = self.runner.clone();
            async move {
                runner
                    .run(&session, &jobs, &store, prompts.as_ref(), &gate, &cancel)
                    .await
            }
        };

        tokio::spawn(async move {
            let cancelled = match tokio::spawn(inner).await {
                Ok(summary) => {
                    info!(
                        target: "relist.batch",
                        session = %session,
                        processed = summary.processed,
                        total = summary.total,
                        cancelled = summary.cancelled,
                        "bulk_worker_done"
                    );
                    summary.cancelled
                }
                Err(err) => {
                    error!(target: "relist.batch", session = %session, error = %err, "bulk_worker_crashed");
                    prompts
                        .notify_log("Bulk processing stopped unexpectedly.")
                        .await;
                    store
                        .set_status(
                            "Attention",
                            "Bulk processing stopped unexpectedly.",
                            StatusTone::Error,
                        )
                        .await;
                    cancel.is_set()
                }
            };
            store.finish(cancelled).await;
        });
    }

    /// Flips the pause gate. Returns whether the batch is now paused.
    pub async fn pause_or_resume(&self) -> Result<bool, BatchError> {
        let _control = self.control.lock().await;
        if !self.store.is_running().await {
            return Err(BatchError::NotRunning);
        }
        if self.gate.is_open() {
            self.gate.close();
            self.store.set_paused(true).await;
            self.prompts.notify_log("Bulk processing paused.").await;
            self.store
                .set_status("Paused", "Bulk processing paused.", StatusTone::Warning)
                .await;
            Ok(true)
        } else {
            self.gate.open();
            self.store.set_paused(false).await;
            self.prompts.notify_log("Bulk processing resumed.").await;
            self.store
                .set_status("Working", "Bulk processing resumed.", StatusTone::Working)
                .await;
            Ok(false)
        }
    }

    pub async fn cancel(&self) -> Result<(), BatchError> {
        let _control = self.control.lock().await;
        if !self.store.request_cancel().await? {
            debug!(target: "relist.batch", session = %self.session, "cancel_after_last_item_ignored");
            return Ok(());
        }
        self.cancel.set();
        if !self.gate.is_open() {
            self.gate.open();
            self.store.set_paused(false).await;
        }
        self.prompts.notify_log("Cancellation requested...").await;
        Ok(())
    }

    pub async fn snapshot(&self) -> BatchView {
        self.store.view().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{
        AuthError, AuthProvider, Credentials, MarketplaceSubmitter, ProductScraper, ScrapeError,
        SubmitError,
    };
    use crate::models::{JobStatus, Product, Specifics, SubmitResult};
    use crate::prompt::ScriptedPrompts;
    use crate::updates::UpdateFeed;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    const FIVE_ITEMS: &str = "Box 107\n\n\
        https://www.amazon.co.uk/dp/A1\n\n\
        https://www.amazon.co.uk/dp/A2\n\n\
        https://www.amazon.co.uk/dp/A3\n\n\
        https://www.amazon.co.uk/dp/A4\n\n\
        https://www.amazon.co.uk/dp/A5\n";

    struct OkAuth;

    #[async_trait]
    impl AuthProvider for OkAuth {
        async fn ensure(&self) -> Result<Credentials, AuthError> {
            Ok(Credentials {
                access_token: "t".into(),
                expires_in: None,
            })
        }
    }

    /// Each scrape consumes one permit, so tests release the worker item by
    /// item. `panic_on` makes a scrape blow up instead.
    struct GatedScraper {
        permits: Arc<Semaphore>,
        calls: AtomicUsize,
        panic_on: Option<usize>,
    }

    #[async_trait]
    impl ProductScraper for GatedScraper {
        async fn scrape(
            &self,
            job: &Job,
            _prompts: &dyn PromptChannel,
        ) -> Result<Product, ScrapeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.permits.acquire().await.expect("permits closed").forget();
            if self.panic_on == Some(job.index) {
                panic!("scraper exploded");
            }
            Ok(Product {
                source_url: job.url.clone(),
                title: format!("Item {}", job.index),
                price: Some(12.0),
                currency: "GBP".into(),
                quantity: job.quantity,
                seller_note: job.note.clone(),
                images: vec![],
                specifics: Specifics::new(),
                custom_specifics: job.custom_specifics.clone(),
                scraped_at: Utc::now(),
            })
        }
    }

    struct AcceptAll;

    #[async_trait]
    impl MarketplaceSubmitter for AcceptAll {
        async fn submit(
            &self,
            _product: &Product,
            _prompts: &dyn PromptChannel,
        ) -> Result<SubmitResult, SubmitError> {
            Ok(SubmitResult::listed("42"))
        }
    }

    struct Harness {
        controller: BatchController,
        permits: Arc<Semaphore>,
        scraper: Arc<GatedScraper>,
        prompts: Arc<ScriptedPrompts>,
    }

    fn harness(initial_permits: usize, panic_on: Option<usize>) -> Harness {
        let permits = Arc::new(Semaphore::new(initial_permits));
        let scraper = Arc::new(GatedScraper {
            permits: permits.clone(),
            calls: AtomicUsize::new(0),
            panic_on,
        });
        let prompts = Arc::new(ScriptedPrompts::new());
        let store = Arc::new(BatchStore::new("test", UpdateFeed::new()));
        let runner = BatchRunner::new(scraper.clone(), Arc::new(AcceptAll), Arc::new(OkAuth));
        let controller = BatchController::new("test", store, prompts.clone(), runner);
        Harness {
            controller,
            permits,
            scraper,
            prompts,
        }
    }

    async fn poll_until<F>(controller: &BatchController, predicate: F) -> BatchView
    where
        F: Fn(&BatchView) -> bool,
    {
        for _ in 0..400 {
            let view = controller.snapshot().await;
            if predicate(&view) {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition never reached: {:?}", controller.snapshot().await);
    }

    #[tokio::test]
    async fn preview_is_idempotent() {
        let h = harness(0, None);
        let first = h.controller.preview(FIVE_ITEMS).await;
        let second = h.controller.preview(FIVE_ITEMS).await;
        assert_eq!(first, second);
        assert_eq!(first.len(), 5);
        assert!(first.iter().all(|job| job.note == "Box 107"));
        assert!(h.controller.preview("   ").await.is_empty());
        assert_eq!(h.controller.snapshot().await.total, 0);
    }

    #[tokio::test]
    async fn start_validates_input() {
        let h = harness(0, None);
        assert_eq!(h.controller.start("  \n ").await, Err(BatchError::EmptyInput));
        assert_eq!(
            h.controller.start("just a label\nno links here").await,
            Err(BatchError::NoJobs)
        );
        assert!(!h.controller.snapshot().await.running);
    }

    #[tokio::test]
    async fn control_calls_need_a_running_batch() {
        let h = harness(0, None);
        assert_eq!(h.controller.pause_or_resume().await, Err(BatchError::NotRunning));
        assert_eq!(h.controller.cancel().await, Err(BatchError::NotRunning));
    }

    #[tokio::test]
    async fn second_start_is_rejected_while_running() {
        let h = harness(1, None);
        assert_eq!(h.controller.start(FIVE_ITEMS).await, Ok(5));
        poll_until(&h.controller, |view| view.processed == 1).await;

        let err = h
            .controller
            .start("https://www.amazon.co.uk/dp/ZZ")
            .await
            .unwrap_err();
        assert_eq!(err, BatchError::AlreadyRunning);
        let view = h.controller.snapshot().await;
        assert_eq!(view.total, 5);
        assert_eq!(view.processed, 1);

        let frozen = h.controller.preview("https://www.amazon.co.uk/dp/ZZ").await;
        assert_eq!(frozen.len(), 5);

        h.permits.add_permits(4);
        let done = poll_until(&h.controller, |view| !view.running).await;
        assert_eq!(done.processed, 5);
        assert_eq!(h.scraper.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn cancel_after_first_item_drains_the_rest() {
        let h = harness(0, None);
        h.controller.start(FIVE_ITEMS).await.unwrap();
        poll_until(&h.controller, |view| view.items[0].status == JobStatus::Scraping).await;

        h.controller.cancel().await.unwrap();
        h.permits.add_permits(1);
        let view = poll_until(&h.controller, |view| !view.running).await;

        assert!(view.cancelled);
        assert!(!view.paused);
        assert!(view.items[0].status.is_terminal());
        assert!(
            view.items[1..]
                .iter()
                .all(|item| item.status == JobStatus::Cancelled)
        );
        assert_eq!(h.scraper.calls.load(Ordering::SeqCst), 1);
        assert!(
            h.prompts
                .logs()
                .await
                .contains(&"Cancellation requested...".to_string())
        );
    }

    #[tokio::test]
    async fn pause_holds_progress_and_resume_finishes() {
        let h = harness(0, None);
        h.controller.start(FIVE_ITEMS).await.unwrap();
        poll_until(&h.controller, |view| view.items[0].status == JobStatus::Scraping).await;

        assert_eq!(h.controller.pause_or_resume().await, Ok(true));
        h.permits.add_permits(5);
        tokio::time::sleep(Duration::from_millis(80)).await;
        let paused = h.controller.snapshot().await;
        assert!(paused.paused);
        assert!(paused.running);
        assert_eq!(paused.items[1].status, JobStatus::Ready);
        assert_eq!(h.scraper.calls.load(Ordering::SeqCst), 1);

        assert_eq!(h.controller.pause_or_resume().await, Ok(false));
        let done = poll_until(&h.controller, |view| !view.running).await;
        assert_eq!(done.processed, 5);
        assert!(!done.cancelled);
        assert_eq!(done.status.tone, StatusTone::Success);
    }

    #[tokio::test]
    async fn cancel_reopens_a_paused_gate() {
        let h = harness(0, None);
        h.controller.start(FIVE_ITEMS).await.unwrap();
        poll_until(&h.controller, |view| view.items[0].status == JobStatus::Scraping).await;
        h.controller.pause_or_resume().await.unwrap();
        h.permits.add_permits(1);
        poll_until(&h.controller, |view| view.items[0].status == JobStatus::Listed).await;

        h.controller.cancel().await.unwrap();
        let view = poll_until(&h.controller, |view| !view.running).await;
        assert!(view.cancelled);
        assert!(!view.paused);
        assert_eq!(view.processed, 1);
    }

    #[tokio::test]
    async fn cancel_during_final_item_reports_finished() {
        let h = harness(0, None);
        h.controller
            .start("https://www.amazon.co.uk/dp/ONLY")
            .await
            .unwrap();
        poll_until(&h.controller, |view| view.items[0].status == JobStatus::Scraping).await;

        h.controller.cancel().await.unwrap();
        assert!(h.controller.snapshot().await.cancelled);
        h.permits.add_permits(1);
        let view = poll_until(&h.controller, |view| !view.running).await;

        assert!(!view.cancelled);
        assert_eq!(view.items[0].status, JobStatus::Listed);
        assert_eq!(view.status.tone, StatusTone::Success);
    }

    #[tokio::test]
    async fn panicking_worker_still_settles() {
        let h = harness(5, Some(2));
        h.controller.start(FIVE_ITEMS).await.unwrap();
        let view = poll_until(&h.controller, |view| !view.running).await;
        assert_eq!(view.status.tone, StatusTone::Error);
        assert_eq!(view.items[0].status, JobStatus::Listed);
        assert!(
            h.prompts
                .logs()
                .await
                .contains(&"Bulk processing stopped unexpectedly.".to_string())
        );

        h.permits.add_permits(5);
        assert_eq!(h.controller.start(FIVE_ITEMS).await, Ok(5));
    }
}
