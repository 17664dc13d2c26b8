use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use leadline_core::conversation::ConversationState;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// Opaque per-client token; the key of the session table.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accepts client-supplied tokens of up to 128 URL-safe characters.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let valid = !raw.is_empty()
            && raw.len() <= 128
            && raw.chars().all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_'));
        valid.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub type SessionSlot = Arc<Mutex<ConversationState>>;

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

struct SessionEntry {
    slot: SessionSlot,
    touched: Instant,
}

impl SessionEntry {
    fn new(now: Instant) -> Self {
        Self { slot: SessionSlot::default(), touched: now }
    }

    fn is_idle(&self, now: Instant, idle_timeout: Duration) -> bool {
        now.saturating_duration_since(self.touched) >= idle_timeout
    }
}

/// Conversation state per session token.
///
/// The outer lock only guards the table; each session's state sits behind its
/// own mutex so independent sessions never wait on each other. Entries idle
/// for longer than the timeout are dropped whenever a new session is created,
/// and an idle entry found on lookup starts over from the first question.
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, SessionEntry>>,
    idle_timeout: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT)
    }
}

impl SessionStore {
    pub fn new(idle_timeout: Duration) -> Self {
        Self { sessions: RwLock::new(HashMap::new()), idle_timeout }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub async fn slot(&self, id: &SessionId) -> SessionSlot {
        self.slot_at(id, Instant::now()).await
    }

    async fn slot_at(&self, id: &SessionId, now: Instant) -> SessionSlot {
        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions.get_mut(id) {
            if !entry.is_idle(now, self.idle_timeout) {
                entry.touched = now;
                return Arc::clone(&entry.slot);
            }
        }

        let evicted = evict(&mut sessions, now, self.idle_timeout);
        if evicted > 0 {
            debug!(
                event_name = "chat.session.evicted",
                correlation_id = "session-sweep",
                evicted,
                remaining = sessions.len(),
                "idle sessions dropped"
            );
        }

        let entry = SessionEntry::new(now);
        let slot = Arc::clone(&entry.slot);
        sessions.insert(id.clone(), entry);
        slot
    }

    /// Forgets the session so its next answer starts from the first question.
    pub async fn remove(&self, id: &SessionId) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }

    pub async fn evict_idle(&self) -> usize {
        self.evict_idle_at(Instant::now()).await
    }

    async fn evict_idle_at(&self, now: Instant) -> usize {
        evict(&mut *self.sessions.write().await, now, self.idle_timeout)
    }

    pub async fn snapshot(&self, id: &SessionId) -> Option<ConversationState> {
        let slot = {
            let sessions = self.sessions.read().await;
            let entry = sessions.get(id)?;
            if entry.is_idle(Instant::now(), self.idle_timeout) {
                return None;
            }
            Arc::clone(&entry.slot)
        };
        let state = slot.lock().await.clone();
        Some(state)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

fn evict(
    sessions: &mut HashMap<SessionId, SessionEntry>,
    now: Instant,
    idle_timeout: Duration,
) -> usize {
    let before = sessions.len();
    sessions.retain(|_, entry| !entry.is_idle(now, idle_timeout));
    before - sessions.len()
}
