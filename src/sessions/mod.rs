//! In-memory session registry with idle expiry.
//!
//! The registry map only stores `Arc<Mutex<Session>>` handles. Callers take a
//! brief read lock to clone a handle and then lock just that session, so
//! sessions never contend with each other. The reaper follows the same rule:
//! it snapshots handles, inspects each session under its own lock, and takes
//! the write lock only to remove the entries it marked as purged.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};

/// One message in a session history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Session state. Owned exclusively by the registry.
#[derive(Debug)]
struct Session {
    id: String,
    user_id: Option<String>,
    metadata: Option<Value>,
    messages: VecDeque<Message>,
    created_at: DateTime<Utc>,
    last_accessed_at: DateTime<Utc>,
    /// Monotonic clock used for expiry.
    last_accessed: Instant,
    /// Set once the session is ended or reaped; handles still held by
    /// in-flight callers must then behave as if it were gone.
    purged: bool,
}

impl Session {
    fn new(id: String, user_id: Option<String>, metadata: Option<Value>) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id,
            metadata,
            messages: VecDeque::new(),
            created_at: now,
            last_accessed_at: now,
            last_accessed: Instant::now(),
            purged: false,
        }
    }

    fn touch(&mut self) {
        self.last_accessed = Instant::now();
        self.last_accessed_at = Utc::now();
    }

    fn is_expired(&self, idle_timeout: std::time::Duration) -> bool {
        self.last_accessed.elapsed() >= idle_timeout
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            user_id: self.user_id.clone(),
            message_count: self.messages.len(),
            created_at: self.created_at,
            last_accessed_at: self.last_accessed_at,
            metadata: self.metadata.clone(),
        }
    }
}

/// Read-only view of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

type SessionHandle = Arc<Mutex<Session>>;

/// Registry of live sessions.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionHandle>>,
    config: SessionConfig,
    shutdown: watch::Sender<bool>,
}

impl SessionRegistry {
    pub fn new(config: SessionConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
            shutdown,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Create a session. Fails if the id is taken.
    pub async fn create(
        &self,
        id: impl Into<String>,
        user_id: Option<String>,
    ) -> SessionResult<SessionInfo> {
        self.create_with_metadata(id, user_id, None).await
    }

    /// Create a session carrying caller-defined metadata.
    pub async fn create_with_metadata(
        &self,
        id: impl Into<String>,
        user_id: Option<String>,
        metadata: Option<Value>,
    ) -> SessionResult<SessionInfo> {
        let id = id.into();
        let mut sessions = self.sessions.write().await;

        if let Some(existing) = sessions.get(&id) {
            // A purged entry the reaper has not removed yet does not count.
            if !existing.lock().await.purged {
                return Err(SessionError::DuplicateSession { session_id: id });
            }
        }

        let session = Session::new(id.clone(), user_id, metadata);
        let info = session.info();
        sessions.insert(id.clone(), Arc::new(Mutex::new(session)));
        info!(session_id = %id, "Session created");
        Ok(info)
    }

    /// Return the session, creating it if absent.
    ///
    /// Fails only when a concurrent caller created and then ended the same id
    /// between our attempts.
    pub async fn ensure(&self, id: &str) -> SessionResult<SessionInfo> {
        if let Ok(info) = self.info(id).await {
            return Ok(info);
        }
        match self.create(id, None).await {
            Ok(info) => Ok(info),
            // Lost a creation race; the winner's session is as good as ours.
            Err(SessionError::DuplicateSession { .. }) => self.info(id).await,
            Err(e) => Err(e),
        }
    }

    /// Append a message, evicting the oldest beyond the configured maximum.
    pub async fn append(
        &self,
        id: &str,
        role: impl Into<String>,
        content: impl Into<String>,
    ) -> SessionResult<()> {
        let handle = self.handle(id).await?;
        let mut session = handle.lock().await;
        if session.purged {
            return Err(unknown(id));
        }

        session.messages.push_back(Message::new(role, content));
        while session.messages.len() > self.config.max_messages {
            session.messages.pop_front();
        }
        session.touch();
        Ok(())
    }

    /// Messages in order; with a limit, only the most recent `limit`.
    pub async fn read(&self, id: &str, limit: Option<usize>) -> SessionResult<Vec<Message>> {
        let handle = self.handle(id).await?;
        let mut session = handle.lock().await;
        if session.purged {
            return Err(unknown(id));
        }

        session.touch();
        let skip = limit
            .map(|n| session.messages.len().saturating_sub(n))
            .unwrap_or(0);
        Ok(session.messages.iter().skip(skip).cloned().collect())
    }

    /// Session details without touching it.
    pub async fn info(&self, id: &str) -> SessionResult<SessionInfo> {
        let handle = self.handle(id).await?;
        let session = handle.lock().await;
        if session.purged {
            return Err(unknown(id));
        }
        Ok(session.info())
    }

    /// Drop the history but keep the session.
    pub async fn clear_messages(&self, id: &str) -> SessionResult<()> {
        let handle = self.handle(id).await?;
        let mut session = handle.lock().await;
        if session.purged {
            return Err(unknown(id));
        }
        session.messages.clear();
        session.touch();
        Ok(())
    }

    /// Purge a session immediately. Idempotent; returns whether it existed.
    pub async fn end(&self, id: &str) -> bool {
        let removed = self.sessions.write().await.remove(id);
        match removed {
            Some(handle) => {
                handle.lock().await.purged = true;
                info!(session_id = %id, "Session ended");
                true
            }
            None => false,
        }
    }

    /// Live sessions, ordered by id.
    pub async fn active_sessions(&self) -> Vec<SessionInfo> {
        let mut infos = Vec::new();
        for handle in self.snapshot().await {
            let session = handle.lock().await;
            if !session.purged {
                infos.push(session.info());
            }
        }
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Purge every session idle beyond the configured timeout.
    pub async fn reap_expired(&self) -> usize {
        let idle_timeout = self.config.idle_timeout();

        let mut expired = Vec::new();
        for handle in self.snapshot().await {
            let mut session = handle.lock().await;
            if !session.purged && session.is_expired(idle_timeout) {
                session.purged = true;
                expired.push((session.id.clone(), handle.clone()));
            }
        }

        if expired.is_empty() {
            return 0;
        }

        let mut sessions = self.sessions.write().await;
        let mut purged = 0;
        for (id, handle) in expired {
            // The id may have been re-created since the scan.
            if sessions.get(&id).is_some_and(|h| Arc::ptr_eq(h, &handle)) {
                sessions.remove(&id);
                debug!(session_id = %id, "Session expired");
                purged += 1;
            }
        }
        purged
    }

    /// Start the periodic reaper. It stops on [`SessionRegistry::shutdown`].
    pub fn spawn_reaper(self: &Arc<Self>) -> ReaperHandle {
        let registry = Arc::clone(self);
        let mut stop = self.shutdown.subscribe();
        let period = self
            .config
            .reap_interval()
            .max(std::time::Duration::from_secs(1));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let purged = registry.reap_expired().await;
                        if purged > 0 {
                            let remaining = registry.count().await;
                            info!(purged, remaining, "Reaped idle sessions");
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Session reaper stopped");
        });

        ReaperHandle { task }
    }

    /// Stop the reaper and purge every session.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let drained: Vec<_> = self.sessions.write().await.drain().collect();
        for (_, handle) in &drained {
            handle.lock().await.purged = true;
        }
        info!(purged = drained.len(), "Session registry shut down");
    }

    async fn handle(&self, id: &str) -> SessionResult<SessionHandle> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| unknown(id))
    }

    async fn snapshot(&self) -> Vec<SessionHandle> {
        self.sessions.read().await.values().cloned().collect()
    }
}

fn unknown(id: &str) -> SessionError {
    SessionError::UnknownSession {
        session_id: id.to_string(),
    }
}

/// Join handle of the background reaper.
pub struct ReaperHandle {
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Wait for the reaper to exit after shutdown was signalled.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!(error = %e, "Session reaper terminated abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
