//! Single-product workflow next to the bulk batch: scrape one source page into
//! the session's product slot, list whatever the slot holds, or load a
//! product saved earlier. Shares the session's status line, prompt slot and
//! collaborators with the batch, and never runs at the same time as it.

use crate::batch::{BatchRunner, BatchStore};
use crate::bulk;
use crate::models::{Job, Product, StatusTone, SubmitResult};
use crate::prompt::PromptChannel;
use serde::Serialize;
use std::{future::Future, sync::Arc};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeskError {
    #[error("Another task is running.")]
    Busy,
    #[error("Please enter a source URL.")]
    MissingUrl,
    #[error("Please scrape or load a product first.")]
    NoProduct,
}

/// What a front-end form submits for a single scrape.
#[derive(Debug, Clone, Default)]
pub struct ScrapeRequest {
    pub url: String,
    pub note: String,
    pub quantity: Option<u32>,
    /// Raw `Key: Value | Key: Value` text.
    pub custom_specifics: String,
}

/// Echo of a loaded product so the form can repopulate itself.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LoadedProduct {
    pub url: String,
    pub quantity: u32,
    pub seller_note: String,
}

pub struct ProductDesk {
    session: String,
    store: Arc<BatchStore>,
    prompts: Arc<dyn PromptChannel>,
    runner: BatchRunner,
}

impl ProductDesk {
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
        }
    }

    /// Starts a background scrape whose result replaces the loaded product.
    pub async fn scrape(&self, request: ScrapeRequest) -> Result<(), DeskError> {
        let url = request.url.trim();
        if url.is_empty() {
            return Err(DeskError::MissingUrl);
        }
        // claim_task only fails when something else holds the session.
        self.store
            .claim_task()
            .await
            .map_err(|_| DeskError::Busy)?;

        let mut job = Job::new(1, url);
        job.note = request.note.trim().to_string();
        job.quantity = request.quantity.filter(|qty| *qty > 0).unwrap_or(1);
        job.custom_specifics = bulk::parse_custom_specifics(&request.custom_specifics);

        self.store
            .set_status("Working", "Scraping source product...", StatusTone::Working)
            .await;
        info!(target: "relist.desk", session = %self.session, url = %job.url, "single_scrape_started");

        let session = self.session.clone();
        let store = self.store.clone();
        let prompts = self.prompts.clone();
        let runner = self.runner.clone();
        self.spawn_task("scrape", async move {
            let product = match runner.scrape(&job, prompts.as_ref()).await {
                Ok(product) => product,
                Err(err) => {
                    warn!(target: "relist.desk", session = %session, error = %err, "single_scrape_failed");
                    prompts.notify_log(&format!("Scrape failed: {err}")).await;
                    store
                        .set_status(
                            "Attention",
                            "Scrape failed. See log for details.",
                            StatusTone::Error,
                        )
                        .await;
                    return;
                }
            };

            if let Some(artifacts) = runner.artifacts()
                && let Err(err) = artifacts.persist_single(&session, &product).await
            {
                warn!(target: "relist.desk", session = %session, error = %err, "single_artifact_write_failed");
                prompts
                    .notify_log(&format!("Could not save product data: {err}"))
                    .await;
            }
            store.set_product(product).await;
            prompts
                .notify_log("Product scraped. You can now list it.")
                .await;
            store
                .set_status("Ready", "Product scraped. Ready to list.", StatusTone::Success)
                .await;
        });
        Ok(())
    }

    /// Starts a background listing of the loaded product.
    pub async fn list(&self) -> Result<(), DeskError> {
        let claimed = self
            .store
            .claim_task()
            .await
            .map_err(|_| DeskError::Busy)?;
        let Some(product) = claimed else {
            self.store.release_task().await;
            return Err(DeskError::NoProduct);
        };

        self.store
            .set_status("Working", "Listing product...", StatusTone::Working)
            .await;
        info!(target: "relist.desk", session = %self.session, title = %product.title, "single_listing_started");

        let session = self.session.clone();
        let store = self.store.clone();
        let prompts = self.prompts.clone();
        let runner = self.runner.clone();
        self.spawn_task("list", async move {
            if let Err(err) = runner.authenticate().await {
                error!(target: "relist.desk", session = %session, error = %err, "single_auth_failed");
                prompts
                    .notify_log("Authentication failed. Check credentials and try again.")
                    .await;
                store
                    .set_status(
                        "Attention",
                        "Authentication failed. Check credentials.",
                        StatusTone::Error,
                    )
                    .await;
                return;
            }

            let failure = match runner.submit(&product, prompts.as_ref()).await {
                Ok(SubmitResult {
                    ok: true,
                    external_id,
                    ..
                }) => {
                    let id = external_id.unwrap_or_else(|| "unknown".to_string());
                    prompts
                        .notify_log(&format!("Listing complete. Item ID: {id}"))
                        .await;
                    store
                        .set_status(
                            "Ready",
                            format!("Listing complete. Item ID {id}."),
                            StatusTone::Success,
                        )
                        .await;
                    return;
                }
                Ok(SubmitResult { errors, .. }) => errors.join("; "),
                Err(err) => err.to_string(),
            };
            warn!(target: "relist.desk", session = %session, reason = %failure, "single_listing_failed");
            prompts
                .notify_log(&format!("Listing failed: {failure}"))
                .await;
            store
                .set_status(
                    "Attention",
                    "Listing failed. See log for details.",
                    StatusTone::Error,
                )
                .await;
        });
        Ok(())
    }

    /// Replaces the loaded product with one saved earlier. `source` names
    /// where it came from, for the log.
    pub async fn load(&self, product: Product, source: &str) -> Result<LoadedProduct, DeskError> {
        self.store
            .claim_task()
            .await
            .map_err(|_| DeskError::Busy)?;
        let loaded = LoadedProduct {
            url: product.source_url.clone(),
            quantity: product.quantity,
            seller_note: product.seller_note.clone(),
        };
        self.store.set_product(product).await;
        self.prompts
            .notify_log(&format!("Loaded product from {source}"))
            .await;
        self.store
            .set_status("Ready", "Product loaded from JSON.", StatusTone::Success)
            .await;
        self.store.release_task().await;
        Ok(loaded)
    }

    /// Runs `work` in its own task and always hands the session back, even
    /// when a collaborator panics.
    fn spawn_task<F>(&self, task: &'static str, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let session = self.session.clone();
        let store = self.store.clone();
        let prompts = self.prompts.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::spawn(work).await {
                error!(target: "relist.desk", session = %session, task, error = %err, "single_task_crashed");
                prompts.notify_log("Task stopped unexpectedly.").await;
                store
                    .set_status("Attention", "Task stopped unexpectedly.", StatusTone::Error)
                    .await;
            }
            store.release_task().await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ArtifactStore;
    use crate::market::demo::{DemoScraper, DemoSubmitter, StaticAuth};
    use crate::market::pricing::FeeAwarePricing;
    use crate::market::{AuthError, AuthProvider, Credentials};
    use crate::models::{BatchView, Specifics};
    use crate::prompt::ScriptedPrompts;
    use crate::updates::UpdateFeed;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::time::Duration;

    struct DeniedAuth;

    #[async_trait]
    impl AuthProvider for DeniedAuth {
        async fn ensure(&self) -> Result<Credentials, AuthError> {
            Err(AuthError::MissingCredentials)
        }
    }

    struct Fixture {
        desk: ProductDesk,
        store: Arc<BatchStore>,
        prompts: Arc<ScriptedPrompts>,
    }

    fn fixture(auth: Arc<dyn AuthProvider>, artifacts: Option<ArtifactStore>) -> Fixture {
        let prompts = Arc::new(
            ScriptedPrompts::new()
                .with_answer("What is the title:", "Cordless Drill Driver")
                .with_answer("What is the price:", "40"),
        );
        let store = Arc::new(BatchStore::new("desk", UpdateFeed::new()));
        let mut runner = crate::batch::BatchRunner::new(
            Arc::new(DemoScraper::default()),
            Arc::new(DemoSubmitter::new(Arc::new(FeeAwarePricing::new(false, 0.72)))),
            auth,
        );
        if let Some(artifacts) = artifacts {
            runner = runner.with_artifacts(artifacts);
        }
        let desk = ProductDesk::new("desk", store.clone(), prompts.clone(), runner);
        Fixture {
            desk,
            store,
            prompts,
        }
    }

    fn request() -> ScrapeRequest {
        ScrapeRequest {
            url: " https://www.amazon.co.uk/dp/D1 ".into(),
            note: "Box 4".into(),
            quantity: Some(2),
            custom_specifics: "Brand: Makita | Voltage: 18V".into(),
        }
    }

    fn saved_product() -> Product {
        Product {
            source_url: "https://www.amazon.co.uk/dp/SAVED".into(),
            title: "Saved Hose Reel".into(),
            price: Some(30.0),
            currency: "GBP".into(),
            quantity: 3,
            seller_note: "Shelf 2".into(),
            images: Vec::new(),
            specifics: Specifics::new(),
            custom_specifics: [("Brand", "Acme")].into_iter().collect(),
            scraped_at: Utc::now(),
        }
    }

    async fn settle(store: &BatchStore) -> BatchView {
        for _ in 0..400 {
            let view = store.view().await;
            if !view.processing {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("task never released the session");
    }

    #[tokio::test]
    async fn scrape_then_list_uses_the_product_slot() {
        let f = fixture(Arc::new(StaticAuth), None);
        f.desk.scrape(request()).await.unwrap();
        let view = settle(&f.store).await;
        assert!(view.product_loaded);
        assert_eq!(view.status.message, "Product scraped. Ready to list.");

        f.desk.list().await.unwrap();
        let view = settle(&f.store).await;
        assert_eq!(view.status.tone, StatusTone::Success);
        assert!(view.status.message.starts_with("Listing complete. Item ID RL-"));
        let logs = f.prompts.logs().await;
        assert!(logs.contains(&"Product scraped. You can now list it.".to_string()));
        assert!(logs.iter().any(|line| line.contains("x2 at 39.00 GBP")));
    }

    #[tokio::test]
    async fn form_input_is_validated() {
        let f = fixture(Arc::new(StaticAuth), None);
        let empty = ScrapeRequest {
            url: "   ".into(),
            ..ScrapeRequest::default()
        };
        assert_eq!(f.desk.scrape(empty).await, Err(DeskError::MissingUrl));
        assert_eq!(f.desk.list().await, Err(DeskError::NoProduct));
        assert!(!f.store.view().await.processing);
    }

    #[tokio::test]
    async fn desk_and_batch_exclude_each_other() {
        let f = fixture(Arc::new(StaticAuth), None);
        f.store.claim_task().await.unwrap();
        assert_eq!(f.desk.scrape(request()).await, Err(DeskError::Busy));
        assert_eq!(
            f.desk.load(saved_product(), "saved.json").await,
            Err(DeskError::Busy)
        );
        f.store.release_task().await;

        f.store
            .begin(vec![Job::new(1, "https://www.amazon.co.uk/dp/B1")])
            .await
            .unwrap();
        assert_eq!(f.desk.list().await, Err(DeskError::Busy));
    }

    #[tokio::test]
    async fn loaded_product_can_be_listed() {
        let f = fixture(Arc::new(StaticAuth), None);
        let loaded = f.desk.load(saved_product(), "saved.json").await.unwrap();
        assert_eq!(loaded.quantity, 3);
        assert_eq!(loaded.seller_note, "Shelf 2");
        let view = f.store.view().await;
        assert!(view.product_loaded);
        assert!(!view.processing);
        assert!(
            f.prompts
                .logs()
                .await
                .contains(&"Loaded product from saved.json".to_string())
        );

        f.desk.list().await.unwrap();
        let view = settle(&f.store).await;
        assert_eq!(view.status.tone, StatusTone::Success);
    }

    #[tokio::test]
    async fn listing_stops_on_auth_failure() {
        let f = fixture(Arc::new(DeniedAuth), None);
        f.desk.load(saved_product(), "saved.json").await.unwrap();
        f.desk.list().await.unwrap();
        let view = settle(&f.store).await;
        assert_eq!(view.status.tone, StatusTone::Error);
        assert_eq!(view.status.message, "Authentication failed. Check credentials.");
    }

    #[tokio::test]
    async fn scraped_product_is_saved() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = ArtifactStore::new(dir.path());
        let f = fixture(Arc::new(StaticAuth), Some(artifacts.clone()));
        f.desk.scrape(request()).await.unwrap();
        settle(&f.store).await;
        let raw = tokio::fs::read_to_string(artifacts.single_path("desk"))
            .await
            .unwrap();
        let saved: Product = serde_json::from_str(&raw).unwrap();
        assert_eq!(saved.title, "Cordless Drill Driver");
        assert_eq!(saved.quantity, 2);
        assert_eq!(saved.seller_note, "Box 4");
        let pairs: Vec<_> = saved.custom_specifics.iter().collect();
        assert_eq!(pairs, vec![("Brand", "Makita"), ("Voltage", "18V")]);
    }
}
