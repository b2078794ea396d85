use super::control::{CancelFlag, PauseGate};
use super::state::BatchStore;
use crate::artifacts::ArtifactStore;
use crate::market::{
    AuthError, AuthProvider, Credentials, MarketplaceSubmitter, ProductScraper, ScrapeError,
    SubmitError,
};
use crate::metrics;
use crate::models::{Job, JobStatus, Product, StatusTone, SubmitResult};
use crate::prompt::PromptChannel;
use std::{sync::Arc, time::Instant};
use tracing::{debug, error, info, warn};

pub const CANCELLED_MESSAGE: &str = "Cancelled before processing.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: usize,
    pub total: usize,
    pub cancelled: bool,
    pub auth_failed: bool,
}

/// Sequential worker for one batch: scrape, persist, submit, item by item.
#[derive(Clone)]
pub struct BatchRunner {
    scraper: Arc<dyn ProductScraper>,
    submitter: Arc<dyn MarketplaceSubmitter>,
    auth: Arc<dyn AuthProvider>,
    artifacts: Option<ArtifactStore>,
}

impl BatchRunner {
    pub fn new(
        scraper: Arc<dyn ProductScraper>,
        submitter: Arc<dyn MarketplaceSubmitter>,
        auth: Arc<dyn AuthProvider>,
    ) -> Self {
        Self {
            scraper,
            submitter,
            auth,
            artifacts: None,
        }
    }

    pub fn with_artifacts(mut self, artifacts: ArtifactStore) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    pub async fn authenticate(&self) -> Result<Credentials, AuthError> {
        self.auth.ensure().await
    }

    pub async fn scrape(
        &self,
        job: &Job,
        prompts: &dyn PromptChannel,
    ) -> Result<Product, ScrapeError> {
        self.scraper.scrape(job, prompts).await
    }

    pub async fn submit(
        &self,
        product: &Product,
        prompts: &dyn PromptChannel,
    ) -> Result<SubmitResult, SubmitError> {
        self.submitter.submit(product, prompts).await
    }

    pub fn artifacts(&self) -> Option<&ArtifactStore> {
        self.artifacts.as_ref()
    }

    /// Drives every job to a terminal status. Run flags (`running`, `paused`)
    /// are left for the caller to settle so that a panic here cannot leave
    /// the batch marked as running.
    pub async fn run(
        &self,
        session: &str,
        jobs: &[Job],
        store: &BatchStore,
        prompts: &dyn PromptChannel,
        gate: &PauseGate,
        cancel: &CancelFlag,
    ) -> RunSummary {
        let total = jobs.len();
        let mut summary = RunSummary {
            processed: 0,
            total,
            cancelled: false,
            auth_failed: false,
        };

        if let Err(err) = self.auth.ensure().await {
            error!(target: "relist.batch", session, error = %err, "bulk_auth_failed");
            prompts
                .notify_log("Authentication failed. Check credentials and try again.")
                .await;
            let message = format!("Not attempted: authentication failed ({err}).");
            for job in jobs {
                store.advance(job.index, JobStatus::Failed, message.clone()).await;
            }
            store
                .settle(
                    "Attention",
                    "Authentication failed. Check credentials.",
                    StatusTone::Error,
                )
                .await;
            summary.auth_failed = true;
            metrics::batch_finished(session, 0, total, false);
            return summary;
        }

        for (position, job) in jobs.iter().enumerate() {
            if !gate.is_open() {
                debug!(target: "relist.batch", session, index = job.index, "waiting_on_pause_gate");
            }
            gate.wait_open().await;

            if cancel.is_set() {
                prompts.notify_log("Bulk process cancelled.").await;
                for pending in &jobs[position..] {
                    store
                        .advance(pending.index, JobStatus::Cancelled, CANCELLED_MESSAGE)
                        .await;
                }
                summary.cancelled = true;
                break;
            }

            store
                .set_status(
                    "Working",
                    format!("Processing item {} of {total}.", job.index),
                    StatusTone::Working,
                )
                .await;
            store
                .advance(job.index, JobStatus::Scraping, "Scraping source listing.")
                .await;
            prompts
                .notify_log(&format!("=== Processing Item {}/{total} ===", job.index))
                .await;

            let started = Instant::now();
            let outcome = self.process(session, job, store, prompts).await;
            if outcome == JobStatus::Listed {
                summary.processed += 1;
            }
            info!(
                target: "relist.batch",
                session,
                index = job.index,
                status = outcome.as_str(),
                "bulk_item_settled"
            );
            metrics::item_outcome(session, outcome, started.elapsed().as_millis());
        }

        // A cancel that arrives after the last item has started cancels nothing.
        if summary.cancelled {
            store
                .settle("Attention", "Bulk processing cancelled.", StatusTone::Warning)
                .await;
        } else {
            prompts
                .notify_log(&format!(
                    "Bulk processing finished. Processed {} items.",
                    summary.processed
                ))
                .await;
            store
                .settle("Ready", "Bulk processing finished.", StatusTone::Success)
                .await;
        }
        metrics::batch_finished(session, summary.processed, total, summary.cancelled);
        summary
    }

    async fn process(
        &self,
        session: &str,
        job: &Job,
        store: &BatchStore,
        prompts: &dyn PromptChannel,
    ) -> JobStatus {
        let product = match self.scraper.scrape(job, prompts).await {
            Ok(product) => product,
            Err(err) => {
                warn!(target: "relist.batch", session, index = job.index, error = %err, "scrape_failed");
                prompts
                    .notify_log(&format!(
                        "Skipping item {} due to scraping failure.",
                        job.index
                    ))
                    .await;
                store
                    .advance(job.index, JobStatus::Failed, format!("Scrape failed: {err}"))
                    .await;
                return JobStatus::Failed;
            }
        };

        if let Some(artifacts) = &self.artifacts {
            match artifacts.persist(session, job.index, &product).await {
                Ok(path) => {
                    debug!(target: "relist.batch", session, index = job.index, path = %path.display(), "artifact_written")
                }
                Err(err) => {
                    warn!(target: "relist.batch", session, index = job.index, error = %err, "artifact_write_failed");
                    prompts
                        .notify_log(&format!(
                            "Could not save product data for item {}: {err}",
                            job.index
                        ))
                        .await;
                }
            }
        }

        store
            .advance(job.index, JobStatus::Listing, "Submitting listing.")
            .await;

        let (status, message) = match self.submitter.submit(&product, prompts).await {
            Ok(SubmitResult {
                ok: true,
                external_id,
                ..
            }) => {
                let id = external_id.unwrap_or_else(|| "unknown".to_string());
                (
                    JobStatus::Listed,
                    format!("Listed successfully (Item ID {id})."),
                )
            }
            Ok(SubmitResult { errors, .. }) => {
                let detail = if errors.is_empty() {
                    "no reason given".to_string()
                } else {
                    errors.join("; ")
                };
                (JobStatus::Failed, format!("Listing failed: {detail}"))
            }
            Err(err) => (JobStatus::Failed, format!("Listing failed: {err}")),
        };
        if status == JobStatus::Failed {
            prompts.notify_log(&message).await;
        }
        store.advance(job.index, status, message).await;
        status
    }
}
