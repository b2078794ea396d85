use crate::batch::{BatchController, BatchRunner, BatchStore};
use crate::desk::ProductDesk;
use crate::prompt::{PromptChannel, SessionPrompts};
use crate::updates::UpdateFeed;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tracing::info;

/// Everything one front-end user owns: a batch, the single-product desk, their
/// shared prompt slot and log, and the update counter that ties them together.
pub struct Session {
    pub prompts: Arc<SessionPrompts>,
    pub controller: BatchController,
    pub desk: ProductDesk,
    pub updates: UpdateFeed,
}

impl Session {
    pub fn new(id: impl Into<String>, runner: BatchRunner, settings: &SessionSettings) -> Self {
        let id = id.into();
        let updates = UpdateFeed::new();
        let store = Arc::new(BatchStore::new(id.clone(), updates.clone()));
        let prompts = Arc::new(SessionPrompts::new(
            id.clone(),
            settings.prompt_timeout,
            settings.log_capacity,
            updates.clone(),
        ));
        let desk = ProductDesk::new(id.clone(), store.clone(), prompts.clone(), runner.clone());
        let controller = BatchController::new(id, store, prompts.clone(), runner);
        Self {
            prompts,
            controller,
            desk,
            updates,
        }
    }

    /// Appends a front-end supplied line to the session log. Blank lines are
    /// dropped; returns whether anything was written.
    pub async fn append_log(&self, message: &str) -> bool {
        let message = message.trim();
        if message.is_empty() {
            return false;
        }
        self.prompts.notify_log(message).await;
        true
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub prompt_timeout: Duration,
    pub log_capacity: usize,
}

/// Lazily created sessions keyed by tenant (and optional sub-session).
pub struct SessionRegistry {
    runner: BatchRunner,
    settings: SessionSettings,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new(runner: BatchRunner, settings: SessionSettings) -> Self {
        Self {
            runner,
            settings,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_or_create(&self, key: &str) -> Arc<Session> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(key) {
            return session.clone();
        }
        info!(target: "relist.session", session = key, "session_created");
        let session = Arc::new(Session::new(key, self.runner.clone(), &self.settings));
        sessions.insert(key.to_string(), session.clone());
        session
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

/// Session key for a tenant, optionally narrowed by a client-chosen name.
pub fn session_key(org_id: &str, sub_session: Option<&str>) -> String {
    match sub_session.map(str::trim).filter(|name| !name.is_empty()) {
        Some(name) => format!("{org_id}:{name}"),
        None => org_id.to_string(),
    }
}
