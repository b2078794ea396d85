//! Blocking question/answer bridge between collaborators running inside a
//! batch worker and whatever front-end is attached to the session.

use crate::models::{LogEntry, PendingPrompt, PromptKind};
use crate::updates::UpdateFeed;
use async_trait::async_trait;
use chrono::Utc;
use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};
use tokio::sync::{Mutex, oneshot};
use tracing::{info, warn};

pub const DEFAULT_PROMPT_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

const SCRIPTED_SESSION: &str = "headless";

/// What collaborators see. Both request calls always resolve: with the
/// responder's answer, or with the fallback once the wait is over.
#[async_trait]
pub trait PromptChannel: Send + Sync {
    /// Asks a free-text question; returns `default` on timeout.
    async fn request_text(&self, question: &str, default: &str) -> String;

    /// Asks the responder to pick one of `options`; returns the first option
    /// on timeout.
    async fn request_choice(&self, question: &str, options: &[String]) -> String;

    async fn notify_log(&self, message: &str);

    /// Queues a URL for the front-end to open.
    async fn request_navigate(&self, url: &str);
}

struct ActivePrompt {
    prompt: PendingPrompt,
    reply: oneshot::Sender<Option<String>>,
}

#[derive(Default)]
struct PromptSlot {
    counter: u64,
    active: Option<ActivePrompt>,
}

struct LogRing {
    next_id: u64,
    capacity: usize,
    entries: VecDeque<LogEntry>,
}

impl LogRing {
    fn push(&mut self, message: &str) {
        self.next_id += 1;
        self.entries.push_back(LogEntry {
            id: self.next_id,
            timestamp: Utc::now(),
            message: message.to_string(),
        });
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }
}

/// Prompt adapter for remote front-ends: the pending question sits in a
/// one-entry slot that any poller can read and answer by id.
pub struct SessionPrompts {
    session: String,
    timeout: Duration,
    updates: UpdateFeed,
    slot: Mutex<PromptSlot>,
    logs: Mutex<LogRing>,
    open_urls: Mutex<Vec<String>>,
}

impl SessionPrompts {
    pub fn new(
        session: impl Into<String>,
        timeout: Duration,
        log_capacity: usize,
        updates: UpdateFeed,
    ) -> Self {
        Self {
            session: session.into(),
            timeout,
            updates,
            slot: Mutex::new(PromptSlot::default()),
            logs: Mutex::new(LogRing {
                next_id: 0,
                capacity: log_capacity.max(1),
                entries: VecDeque::new(),
            }),
            open_urls: Mutex::new(Vec::new()),
        }
    }

    pub async fn pending(&self) -> Option<PendingPrompt> {
        let slot = self.slot.lock().await;
        slot.active.as_ref().map(|active| active.prompt.clone())
    }

    /// Answers the pending prompt. Returns `false` when `id` is not the
    /// prompt currently waiting, e.g. a late answer after a timeout.
    /// A `None` value resolves the prompt with its default.
    pub async fn respond(&self, id: u64, value: Option<String>) -> bool {
        let active = {
            let mut slot = self.slot.lock().await;
            slot.active.take_if(|active| active.prompt.id == id)
        };
        let Some(active) = active else {
            warn!(target: "relist.prompt", session = %self.session, prompt_id = id, "stale_prompt_response");
            return false;
        };
        let delivered = active.reply.send(value).is_ok();
        self.updates.bump();
        delivered
    }

    pub async fn logs_since(&self, since: u64) -> (Vec<LogEntry>, u64) {
        let ring = self.logs.lock().await;
        let entries: Vec<LogEntry> = ring
            .entries
            .iter()
            .filter(|entry| entry.id > since)
            .cloned()
            .collect();
        let last_id = ring.entries.back().map(|entry| entry.id).unwrap_or(since);
        (entries, last_id)
    }

    pub async fn drain_open_urls(&self) -> Vec<String> {
        let mut urls = self.open_urls.lock().await;
        std::mem::take(&mut *urls)
    }

    async fn ask(
        &self,
        kind: PromptKind,
        question: &str,
        default: String,
        options: Vec<String>,
    ) -> String {
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut slot = self.slot.lock().await;
            if let Some(active) = &slot.active
                && !active.reply.is_closed()
            {
                warn!(
                    target: "relist.prompt",
                    session = %self.session,
                    pending = active.prompt.id,
                    "prompt_already_pending_using_default"
                );
                return default;
            }
            slot.counter += 1;
            let id = slot.counter;
            slot.active = Some(ActivePrompt {
                prompt: PendingPrompt {
                    id,
                    kind,
                    question: question.to_string(),
                    default: default.clone(),
                    options,
                },
                reply: tx,
            });
            id
        };
        self.updates.bump();
        info!(target: "relist.prompt", session = %self.session, prompt_id = id, "prompt_opened");

        let answer = tokio::time::timeout(self.timeout, rx).await;

        {
            let mut slot = self.slot.lock().await;
            slot.active.take_if(|active| active.prompt.id == id);
        }
        self.updates.bump();

        match answer {
            Ok(Ok(Some(value))) => value,
            Ok(Ok(None)) | Ok(Err(_)) => default,
            Err(_) => {
                self.notify_log("Prompt timed out; continuing with default value.")
                    .await;
                default
            }
        }
    }
}

#[async_trait]
impl PromptChannel for SessionPrompts {
    async fn request_text(&self, question: &str, default: &str) -> String {
        self.ask(PromptKind::Text, question, default.to_string(), Vec::new())
            .await
    }

    async fn request_choice(&self, question: &str, options: &[String]) -> String {
        let Some(first) = options.first() else {
            warn!(target: "relist.prompt", session = %self.session, question, "choice_without_options");
            return String::new();
        };
        self.ask(PromptKind::Choice, question, first.clone(), options.to_vec())
            .await
    }

    async fn notify_log(&self, message: &str) {
        info!(target: "relist.session", session = %self.session, "{message}");
        self.logs.lock().await.push(message);
        self.updates.bump();
    }

    async fn request_navigate(&self, url: &str) {
        self.open_urls.lock().await.push(url.to_string());
        self.updates.bump();
        self.notify_log(&format!("Opening URL: {url}")).await;
    }
}

/// In-process adapter that answers from a fixture map keyed by question and
/// falls back exactly like a timed-out remote prompt. Used for headless runs
/// and tests.
#[derive(Default)]
pub struct ScriptedPrompts {
    answers: HashMap<String, String>,
    asked: Mutex<Vec<String>>,
    logs: Mutex<Vec<String>>,
    navigations: Mutex<Vec<String>>,
}

impl ScriptedPrompts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_answer(mut self, question: impl Into<String>, answer: impl Into<String>) -> Self {
        self.answers.insert(question.into(), answer.into());
        self
    }

    /// Reads a YAML map of question to answer. Non-string scalars are taken
    /// as written (`What is the price:: 12.5`).
    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::new());
        }
        let parsed: HashMap<String, serde_yaml::Value> = serde_yaml::from_str(raw)?;
        let answers = parsed
            .into_iter()
            .filter_map(|(question, value)| {
                let answer = match value {
                    serde_yaml::Value::String(text) => text,
                    serde_yaml::Value::Number(number) => number.to_string(),
                    serde_yaml::Value::Bool(flag) => flag.to_string(),
                    _ => return None,
                };
                Some((question, answer))
            })
            .collect();
        Ok(Self {
            answers,
            ..Self::default()
        })
    }

    /// Questions asked so far, answered or not.
    pub async fn asked(&self) -> Vec<String> {
        self.asked.lock().await.clone()
    }

    /// Questions that fell back to their default.
    pub async fn unanswered(&self) -> Vec<String> {
        self.asked
            .lock()
            .await
            .iter()
            .filter(|question| !self.answers.contains_key(*question))
            .cloned()
            .collect()
    }

    #[cfg(test)]
    pub async fn logs(&self) -> Vec<String> {
        self.logs.lock().await.clone()
    }

    pub async fn navigations(&self) -> Vec<String> {
        self.navigations.lock().await.clone()
    }
}

#[async_trait]
impl PromptChannel for ScriptedPrompts {
    async fn request_text(&self, question: &str, default: &str) -> String {
        self.asked.lock().await.push(question.to_string());
        self.answers
            .get(question)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    async fn request_choice(&self, question: &str, options: &[String]) -> String {
        self.asked.lock().await.push(question.to_string());
        self.answers
            .get(question)
            .cloned()
            .or_else(|| options.first().cloned())
            .unwrap_or_default()
    }

    async fn notify_log(&self, message: &str) {
        info!(target: "relist.session", session = SCRIPTED_SESSION, "{message}");
        self.logs.lock().await.push(message.to_string());
    }

    async fn request_navigate(&self, url: &str) {
        info!(target: "relist.session", session = SCRIPTED_SESSION, url, "source page to check");
        self.navigations.lock().await.push(url.to_string());
    }
}
