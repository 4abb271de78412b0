//! Per-sender dialogue state and the session store holding it.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{EventDraft, EventKind, Role, RoleAssignments};
use crate::Result;

/// Which record the event dialogue writes to, and which roles it asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTarget {
    /// Record being edited; `None` registers a new event.
    pub editing: Option<Uuid>,
    pub kind: EventKind,
}

/// Everything collected before the role loop starts. Times are local wall-clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBasics {
    pub target: EventTarget,
    pub event_name: String,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// An upcoming record offered for editing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventChoice {
    pub id: Uuid,
    pub label: String,
}

/// Position in the dialogue graph together with the data that position needs.
///
/// `options` fields cache the list shown to the user so a numeric reply is
/// resolved against exactly what was displayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Idle,
    Menu,
    SelectExistingEvent {
        options: Vec<EventChoice>,
    },
    SelectEventType {
        editing: Option<Uuid>,
    },
    SelectEventName {
        target: EventTarget,
        options: Vec<String>,
    },
    SelectDate {
        target: EventTarget,
        event_name: String,
        options: Vec<NaiveDate>,
    },
    SelectStartTime {
        target: EventTarget,
        event_name: String,
        date: NaiveDate,
        options: Vec<NaiveTime>,
    },
    SelectEndTime {
        target: EventTarget,
        event_name: String,
        date: NaiveDate,
        start: NaiveTime,
        options: Vec<NaiveTime>,
    },
    SelectRole {
        basics: EventBasics,
        roles: RoleAssignments,
        /// Number of roles already collected
        cursor: usize,
        /// Preset names for the current role; "none" is shown in front of them
        options: Vec<String>,
    },
    EnterComment {
        basics: EventBasics,
        roles: RoleAssignments,
    },
    Confirm {
        editing: Option<Uuid>,
        draft: EventDraft,
    },
    RegisterSelectRole,
    RegisterEnterName {
        role: Role,
        options: Vec<String>,
    },
    RegisterConfirm {
        role: Role,
        name: String,
    },
}

impl Step {
    /// Short tag for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Step::Idle => "idle",
            Step::Menu => "menu",
            Step::SelectExistingEvent { .. } => "select_existing_event",
            Step::SelectEventType { .. } => "select_event_type",
            Step::SelectEventName { .. } => "select_event_name",
            Step::SelectDate { .. } => "select_date",
            Step::SelectStartTime { .. } => "select_start_time",
            Step::SelectEndTime { .. } => "select_end_time",
            Step::SelectRole { .. } => "select_role",
            Step::EnterComment { .. } => "enter_comment",
            Step::Confirm { .. } => "confirm",
            Step::RegisterSelectRole => "register_select_role",
            Step::RegisterEnterName { .. } => "register_enter_name",
            Step::RegisterConfirm { .. } => "register_confirm",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationState {
    pub step: Step,
    /// Last time the sender advanced this conversation
    pub touched_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(step: Step, now: DateTime<Utc>) -> Self {
        Self { step, touched_at: now }
    }
}

/// Conversation states keyed by sender identity.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Current state for `sender`, or `None` when absent or expired at `now`.
    async fn load(&self, sender: &str, now: DateTime<Utc>) -> Result<Option<ConversationState>>;

    async fn save(&self, sender: &str, state: ConversationState) -> Result<()>;

    async fn remove(&self, sender: &str) -> Result<()>;

    /// Drop every state idle for longer than the TTL. Returns how many were dropped.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// Process-local session store with idle expiry.
pub struct MemorySessionStore {
    ttl: Duration,
    states: Mutex<HashMap<String, ConversationState>>,
}

impl MemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.states.lock().await.len()
    }

    fn expired(&self, state: &ConversationState, now: DateTime<Utc>) -> bool {
        now - state.touched_at > self.ttl
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, sender: &str, now: DateTime<Utc>) -> Result<Option<ConversationState>> {
        let mut states = self.states.lock().await;
        match states.get(sender) {
            Some(state) if self.expired(state, now) => {
                states.remove(sender);
                Ok(None)
            }
            Some(state) => Ok(Some(state.clone())),
            None => Ok(None),
        }
    }

    async fn save(&self, sender: &str, state: ConversationState) -> Result<()> {
        self.states.lock().await.insert(sender.to_string(), state);
        Ok(())
    }

    async fn remove(&self, sender: &str) -> Result<()> {
        self.states.lock().await.remove(sender);
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut states = self.states.lock().await;
        let before = states.len();
        states.retain(|_, state| now - state.touched_at <= self.ttl);
        Ok(before - states.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[tokio::test]
    async fn test_load_drops_expired_state() {
        let store = MemorySessionStore::new(Duration::minutes(30));
        let start = at("2024-06-15T01:00:00Z");
        store.save("U1", ConversationState::new(Step::Menu, start)).await.unwrap();

        let fresh = store.load("U1", start + Duration::minutes(30)).await.unwrap();
        assert_eq!(fresh.map(|s| s.step), Some(Step::Menu));

        let stale = store.load("U1", start + Duration::minutes(31)).await.unwrap();
        assert!(stale.is_none());
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_purge_expired_keeps_active() {
        let store = MemorySessionStore::new(Duration::minutes(30));
        let start = at("2024-06-15T01:00:00Z");
        store.save("old", ConversationState::new(Step::Menu, start)).await.unwrap();
        store
            .save("new", ConversationState::new(Step::RegisterSelectRole, start + Duration::minutes(20)))
            .await
            .unwrap();

        let dropped = store.purge_expired(start + Duration::minutes(45)).await.unwrap();
        assert_eq!(dropped, 1);
        assert_eq!(store.len().await, 1);
        assert!(store.load("new", start + Duration::minutes(45)).await.unwrap().is_some());
    }
}
