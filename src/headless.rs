//! Unattended bulk run for the command line: bulk text on stdin, prompt
//! answers from an optional YAML file, progress on the log.

use crate::batch::{BatchError, BatchRunner, BatchStore, CancelFlag, PauseGate, RunSummary};
use crate::bulk;
use crate::prompt::ScriptedPrompts;
use crate::updates::UpdateFeed;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

const HEADLESS_SESSION: &str = "headless";

#[derive(Debug, Error)]
pub enum HeadlessError {
    #[error("could not read bulk text from stdin: {0}")]
    Input(#[source] std::io::Error),
    #[error("could not read answers file {}: {source}", path.display())]
    Answers {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid answers file: {0}")]
    AnswersFormat(#[from] serde_yaml::Error),
    #[error("{0}")]
    Batch(#[from] BatchError),
}

pub async fn run_stdin(
    runner: BatchRunner,
    answers: Option<&Path>,
) -> Result<RunSummary, HeadlessError> {
    let prompts = match answers {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .map_err(|source| HeadlessError::Answers {
                    path: path.to_path_buf(),
                    source,
                })?;
            ScriptedPrompts::from_yaml(&raw)?
        }
        None => ScriptedPrompts::new(),
    };
    let mut text = String::new();
    tokio::io::stdin()
        .read_to_string(&mut text)
        .await
        .map_err(HeadlessError::Input)?;
    run_text(&runner, &text, &prompts).await
}

/// Parses `text` and runs it to completion with nobody attached: every
/// question gets its scripted answer or its default.
pub async fn run_text(
    runner: &BatchRunner,
    text: &str,
    prompts: &ScriptedPrompts,
) -> Result<RunSummary, HeadlessError> {
    if text.trim().is_empty() {
        return Err(BatchError::EmptyInput.into());
    }
    let jobs = bulk::parse(text);
    if jobs.is_empty() {
        return Err(BatchError::NoJobs.into());
    }
    info!(target: "relist.headless", total = jobs.len(), "headless_bulk_started");

    let store = BatchStore::new(HEADLESS_SESSION, UpdateFeed::new());
    store.begin(jobs.clone()).await?;
    let summary = runner
        .run(
            HEADLESS_SESSION,
            &jobs,
            &store,
            prompts,
            &PauseGate::new(),
            &CancelFlag::new(),
        )
        .await;
    store.finish(summary.cancelled).await;

    for item in store.view().await.items {
        info!(
            target: "relist.headless",
            index = item.index,
            status = item.status.as_str(),
            message = %item.message,
            "headless_item"
        );
    }
    let asked = prompts.asked().await;
    if !asked.is_empty() {
        info!(target: "relist.headless", questions = asked.len(), "prompts raised during run");
    }
    for question in prompts.unanswered().await {
        warn!(target: "relist.headless", question = %question, "no scripted answer; default used");
    }
    let pages = prompts.navigations().await;
    if !pages.is_empty() {
        info!(target: "relist.headless", pages = pages.len(), "source pages were requested for manual checks");
    }
    info!(
        target: "relist.headless",
        processed = summary.processed,
        total = summary.total,
        "headless_bulk_finished"
    );
    Ok(summary)
}
