pub mod control;
pub mod controller;
pub mod runner;
pub mod state;

pub use control::{CancelFlag, PauseGate};
pub use controller::BatchController;
pub use runner::{BatchRunner, RunSummary};
pub use state::BatchStore;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("Bulk processing is already running.")]
    AlreadyRunning,
    #[error("Bulk processing is not running.")]
    NotRunning,
    #[error("Paste bulk text first.")]
    EmptyInput,
    #[error("No items could be parsed from the text.")]
    NoJobs,
    #[error("Another task is running.")]
    Busy,
}
