use super::BatchError;
use crate::models::{BatchView, Job, JobStatus, Product, StatusLine, StatusTone};
use crate::updates::UpdateFeed;
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Debug, Default)]
struct BatchState {
    items: Vec<Job>,
    running: bool,
    paused: bool,
    cancelled: bool,
    processed: usize,
    status: StatusLine,
    // The worker has written its final status; late cancels are ignored.
    settled: bool,
    processing: bool,
    product: Option<Product>,
}

impl BatchState {
    fn view(&self) -> BatchView {
        BatchView {
            running: self.running,
            paused: self.paused,
            cancelled: self.cancelled,
            processed: self.processed,
            total: self.items.len(),
            items: self.items.clone(),
            status: self.status.clone(),
            processing: self.processing,
            product_loaded: self.product.is_some(),
        }
    }
}

/// The shared record of one session's batch. Every mutation goes through a
/// single lock and bumps the session's update feed once the lock is released.
pub struct BatchStore {
    session: String,
    inner: Mutex<BatchState>,
    updates: UpdateFeed,
}

impl BatchStore {
    pub fn new(session: impl Into<String>, updates: UpdateFeed) -> Self {
        Self {
            session: session.into(),
            inner: Mutex::new(BatchState::default()),
            updates,
        }
    }

    pub async fn view(&self) -> BatchView {
        self.inner.lock().await.view()
    }

    pub async fn is_running(&self) -> bool {
        self.inner.lock().await.running
    }

    /// Replaces the draft queue unless a batch is in flight, in which case the
    /// running items are returned untouched.
    pub async fn replace_draft(&self, items: Vec<Job>) -> Vec<Job> {
        let items = {
            let mut state = self.inner.lock().await;
            if state.running {
                return state.items.clone();
            }
            state.items = items;
            state.processed = 0;
            state.items.clone()
        };
        self.updates.bump();
        items
    }

    /// Seeds a new run. Fails without touching anything if one is active.
    pub async fn begin(&self, items: Vec<Job>) -> Result<usize, BatchError> {
        let total = {
            let mut state = self.inner.lock().await;
            if state.running {
                return Err(BatchError::AlreadyRunning);
            }
            if state.processing {
                return Err(BatchError::Busy);
            }
            state.items = items;
            state.running = true;
            state.settled = false;
            state.paused = false;
            state.cancelled = false;
            state.processed = 0;
            state.status = StatusLine::new(
                "Working",
                format!("Bulk processing started ({} items).", state.items.len()),
                StatusTone::Working,
            );
            state.items.len()
        };
        self.updates.bump();
        Ok(total)
    }

    pub async fn set_paused(&self, paused: bool) {
        self.inner.lock().await.paused = paused;
        self.updates.bump();
    }

    /// Records a cancel request. `Ok(false)` means the worker already wrote
    /// its final status, so there is nothing left to cancel.
    pub async fn request_cancel(&self) -> Result<bool, BatchError> {
        let accepted = {
            let mut state = self.inner.lock().await;
            if !state.running {
                return Err(BatchError::NotRunning);
            }
            if state.settled {
                false
            } else {
                state.cancelled = true;
                state.status = StatusLine::new(
                    "Attention",
                    "Bulk processing cancellation requested.",
                    StatusTone::Warning,
                );
                true
            }
        };
        if accepted {
            self.updates.bump();
        }
        Ok(accepted)
    }

    /// Writes the worker's final status line.
    pub async fn settle(&self, label: &str, message: impl Into<String>, tone: StatusTone) {
        {
            let mut state = self.inner.lock().await;
            state.status = StatusLine::new(label, message, tone);
            state.settled = true;
        }
        self.updates.bump();
    }

    /// Final settle of a run: clears `running`/`paused` and records whether the
    /// run was actually cancelled.
    pub async fn finish(&self, cancelled: bool) {
        {
            let mut state = self.inner.lock().await;
            state.running = false;
            state.paused = false;
            state.cancelled = cancelled;
        }
        self.updates.bump();
    }

    /// Claims the session for a single-product task. Fails while a batch or
    /// another task runs; otherwise returns the loaded product, if any.
    pub async fn claim_task(&self) -> Result<Option<Product>, BatchError> {
        let product = {
            let mut state = self.inner.lock().await;
            if state.running || state.processing {
                return Err(BatchError::Busy);
            }
            state.processing = true;
            state.product.clone()
        };
        self.updates.bump();
        Ok(product)
    }

    pub async fn release_task(&self) {
        self.inner.lock().await.processing = false;
        self.updates.bump();
    }

    pub async fn set_product(&self, product: Product) {
        self.inner.lock().await.product = Some(product);
        self.updates.bump();
    }

    pub async fn set_status(&self, label: &str, message: impl Into<String>, tone: StatusTone) {
        self.inner.lock().await.status = StatusLine::new(label, message, tone);
        self.updates.bump();
    }

    /// Moves item `index` (1-based) forward in its lifecycle. Backward or
    /// post-terminal moves are refused and reported as `false`.
    pub async fn advance(&self, index: usize, status: JobStatus, message: impl Into<String>) -> bool {
        let message = message.into();
        let moved = {
            let mut guard = self.inner.lock().await;
            let state = &mut *guard;
            match state.items.iter_mut().find(|item| item.index == index) {
                Some(item) if item.status.can_advance_to(status) => {
                    item.status = status;
                    item.message = message;
                    if status == JobStatus::Listed {
                        state.processed += 1;
                    }
                    true
                }
                Some(item) => {
                    warn!(
                        target: "relist.batch",
                        session = %self.session,
                        index,
                        from = item.status.as_str(),
                        to = status.as_str(),
                        "illegal_item_transition"
                    );
                    false
                }
                None => {
                    warn!(target: "relist.batch", session = %self.session, index, "unknown_item_index");
                    false
                }
            }
        };
        if moved {
            self.updates.bump();
        }
        moved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jobs(count: usize) -> Vec<Job> {
        (1..=count)
            .map(|index| Job::new(index, format!("https://www.amazon.co.uk/dp/{index}")))
            .collect()
    }

    #[tokio::test]
    async fn begin_is_mutually_exclusive() {
        let store = BatchStore::new("s", UpdateFeed::new());
        assert_eq!(store.begin(jobs(2)).await.unwrap(), 2);
        store.advance(1, JobStatus::Scraping, "").await;
        store.advance(1, JobStatus::Listing, "").await;
        store.advance(1, JobStatus::Listed, "ok").await;
        let err = store.begin(jobs(5)).await.unwrap_err();
        assert!(matches!(err, BatchError::AlreadyRunning));
        let view = store.view().await;
        assert_eq!(view.total, 2);
        assert_eq!(view.processed, 1);
    }

    #[tokio::test]
    async fn draft_is_frozen_while_running() {
        let store = BatchStore::new("s", UpdateFeed::new());
        store.begin(jobs(2)).await.unwrap();
        let items = store.replace_draft(jobs(4)).await;
        assert_eq!(items.len(), 2);
        store.finish(false).await;
        let items = store.replace_draft(jobs(4)).await;
        assert_eq!(items.len(), 4);
        assert_eq!(store.view().await.processed, 0);
    }

    #[tokio::test]
    async fn transitions_never_move_backward() {
        let store = BatchStore::new("s", UpdateFeed::new());
        store.begin(jobs(1)).await.unwrap();
        assert!(store.advance(1, JobStatus::Scraping, "").await);
        assert!(!store.advance(1, JobStatus::Ready, "").await);
        assert!(!store.advance(1, JobStatus::Cancelled, "").await);
        assert!(store.advance(1, JobStatus::Failed, "boom").await);
        assert!(!store.advance(1, JobStatus::Listing, "").await);
        assert!(!store.advance(9, JobStatus::Scraping, "").await);
        let view = store.view().await;
        assert_eq!(view.items[0].status, JobStatus::Failed);
        assert_eq!(view.items[0].message, "boom");
    }

    #[tokio::test]
    async fn cancel_after_settle_keeps_final_status() {
        let store = BatchStore::new("s", UpdateFeed::new());
        assert_eq!(store.request_cancel().await, Err(BatchError::NotRunning));
        store.begin(jobs(1)).await.unwrap();
        store
            .settle("Ready", "Bulk processing finished.", StatusTone::Success)
            .await;
        assert_eq!(store.request_cancel().await, Ok(false));
        let view = store.view().await;
        assert!(!view.cancelled);
        assert_eq!(view.status.message, "Bulk processing finished.");

        store.finish(false).await;
        store.begin(jobs(1)).await.unwrap();
        assert_eq!(store.request_cancel().await, Ok(true));
        assert!(store.view().await.cancelled);
    }

    #[tokio::test]
    async fn single_tasks_and_batches_exclude_each_other() {
        let store = BatchStore::new("s", UpdateFeed::new());
        assert_eq!(store.claim_task().await, Ok(None));
        assert!(store.view().await.processing);
        assert_eq!(store.claim_task().await, Err(BatchError::Busy));
        assert_eq!(store.begin(jobs(1)).await, Err(BatchError::Busy));
        store.release_task().await;

        store.begin(jobs(1)).await.unwrap();
        assert_eq!(store.claim_task().await, Err(BatchError::Busy));
        store.finish(false).await;
        assert!(store.claim_task().await.is_ok());
    }

    #[tokio::test]
    async fn mutations_bump_update_feed() {
        let updates = UpdateFeed::new();
        let store = BatchStore::new("s", updates.clone());
        store.begin(jobs(1)).await.unwrap();
        let after_begin = updates.current();
        store.advance(1, JobStatus::Scraping, "").await;
        assert!(updates.current() > after_begin);
    }
}
