//! In-memory stand-ins for the stores, the remote calendar and the messenger.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use crate::calendar::{
    CalendarError, CalendarErrorKind, CalendarResult, EventQuery, RemoteCalendar, RemoteEvent,
    RemoteEventPayload,
};
use crate::events::EventStore;
use crate::line::Messenger;
use crate::models::{EventDraft, EventRecord, SettingsItem, SyncStatus};
use crate::settings::SettingsStore;
use crate::{Error, Result};

#[derive(Default)]
pub struct MemoryEventStore {
    records: Mutex<Vec<EventRecord>>,
}

impl MemoryEventStore {
    pub fn all(&self) -> Vec<EventRecord> {
        self.records.lock().unwrap().clone()
    }

    fn sorted(&self, keep: impl Fn(&EventRecord) -> bool) -> Vec<EventRecord> {
        let mut out: Vec<EventRecord> =
            self.records.lock().unwrap().iter().filter(|r| keep(r)).cloned().collect();
        out.sort_by_key(|r| r.draft.start_time);
        out
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn get(&self, id: Uuid) -> Result<Option<EventRecord>> {
        Ok(self.records.lock().unwrap().iter().find(|r| r.id == id).cloned())
    }

    async fn list(&self) -> Result<Vec<EventRecord>> {
        Ok(self.sorted(|_| true))
    }

    async fn list_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<EventRecord>> {
        Ok(self.sorted(|r| r.draft.start_time >= from && r.draft.start_time < to))
    }

    async fn list_unsynced_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<EventRecord>> {
        Ok(self.sorted(|r| {
            r.draft.start_time >= from
                && r.draft.start_time < to
                && (r.google_event_id.is_none() || r.sync_status == SyncStatus::PendingSync)
        }))
    }

    async fn insert(&self, draft: &EventDraft) -> Result<EventRecord> {
        let now = Utc::now();
        let record = EventRecord {
            id: Uuid::new_v4(),
            draft: draft.clone(),
            google_event_id: None,
            sync_status: SyncStatus::LocalOnly,
            created_at: now,
            updated_at: now,
        };
        self.records.lock().unwrap().push(record.clone());
        Ok(record)
    }

    async fn update(&self, id: Uuid, draft: &EventDraft) -> Result<Option<EventRecord>> {
        let mut records = self.records.lock().unwrap();
        Ok(records.iter_mut().find(|r| r.id == id).map(|r| {
            r.draft = draft.clone();
            r.updated_at = Utc::now();
            r.clone()
        }))
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|r| r.id != id);
        Ok(records.len() < before)
    }

    async fn set_remote_id(&self, id: Uuid, remote_id: Option<&str>, status: SyncStatus) -> Result<()> {
        if let Some(r) = self.records.lock().unwrap().iter_mut().find(|r| r.id == id) {
            r.google_event_id = remote_id.map(str::to_string);
            r.sync_status = status;
        }
        Ok(())
    }

    async fn set_sync_status(&self, id: Uuid, status: SyncStatus) -> Result<()> {
        if let Some(r) = self.records.lock().unwrap().iter_mut().find(|r| r.id == id) {
            r.sync_status = status;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySettingsStore {
    items: Mutex<Vec<SettingsItem>>,
    pending_race: Mutex<Option<(String, String, Option<String>)>>,
    failing: AtomicBool,
}

impl MemorySettingsStore {
    /// The next insert of `(item_type, name)` finds a competing row already written.
    pub fn race_next_insert(&self, item_type: &str, name: &str, line_id: Option<&str>) {
        *self.pending_race.lock().unwrap() =
            Some((item_type.to_string(), name.to_string(), line_id.map(str::to_string)));
    }

    /// Make every read fail with a database-style error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn seed(&self, item_type: &str, name: &str, line_id: Option<&str>) {
        self.push(item_type, name, line_id);
    }

    fn push(&self, item_type: &str, name: &str, line_id: Option<&str>) -> SettingsItem {
        let now = Utc::now();
        let item = SettingsItem {
            id: Uuid::new_v4(),
            item_type: item_type.to_string(),
            name: name.to_string(),
            line_id: line_id.map(str::to_string),
            created_at: now,
            updated_at: now,
        };
        self.items.lock().unwrap().push(item.clone());
        item
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn list(&self) -> Result<Vec<SettingsItem>> {
        self.check()?;
        Ok(self.items.lock().unwrap().clone())
    }

    async fn list_by_type(&self, item_type: &str) -> Result<Vec<SettingsItem>> {
        self.check()?;
        Ok(self
            .items
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.item_type == item_type)
            .cloned()
            .collect())
    }

    async fn find(&self, item_type: &str, name: &str) -> Result<Option<SettingsItem>> {
        self.check()?;
        Ok(self
            .items
            .lock()
            .unwrap()
            .iter()
            .find(|i| i.item_type == item_type && i.name == name)
            .cloned())
    }

    async fn insert(&self, item_type: &str, name: &str, line_id: Option<&str>) -> Result<SettingsItem> {
        let race = self.pending_race.lock().unwrap().take();
        if let Some((race_type, race_name, race_line)) = race {
            self.push(&race_type, &race_name, race_line.as_deref());
        }

        let exists = self
            .items
            .lock()
            .unwrap()
            .iter()
            .any(|i| i.item_type == item_type && i.name == name);
        if exists {
            return Err(Error::Conflict(format!("settings item {}/{} already exists", item_type, name)));
        }
        Ok(self.push(item_type, name, line_id))
    }

    async fn update_line_id(&self, id: Uuid, line_id: Option<&str>) -> Result<SettingsItem> {
        let mut items = self.items.lock().unwrap();
        let item = items
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| Error::NotFound(format!("settings item {}", id)))?;
        item.line_id = line_id.map(str::to_string);
        item.updated_at = Utc::now();
        Ok(item.clone())
    }
}

/// Remote calendar kept in a vector, listing in insertion order.
#[derive(Default)]
pub struct FakeCalendar {
    events: Mutex<Vec<RemoteEvent>>,
    failure: Mutex<Option<CalendarErrorKind>>,
    title_failures: Mutex<Vec<(String, CalendarErrorKind)>>,
    next_id: AtomicUsize,
    inserts: AtomicUsize,
    deletes: AtomicUsize,
}

impl FakeCalendar {
    pub fn seed(&self, event: RemoteEvent) {
        self.events.lock().unwrap().push(event);
    }

    /// Every subsequent call fails with `kind`.
    pub fn fail_with(&self, kind: CalendarErrorKind) {
        *self.failure.lock().unwrap() = Some(kind);
    }

    /// Calls concerning events titled `title` fail with `kind`; others succeed.
    pub fn fail_for_title(&self, title: &str, kind: CalendarErrorKind) {
        self.title_failures.lock().unwrap().push((title.to_string(), kind));
    }

    pub fn clear_failures(&self) {
        *self.failure.lock().unwrap() = None;
        self.title_failures.lock().unwrap().clear();
    }

    pub fn event(&self, id: &str) -> Option<RemoteEvent> {
        self.events.lock().unwrap().iter().find(|e| e.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn insert_count(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    fn check(&self) -> CalendarResult<()> {
        match *self.failure.lock().unwrap() {
            Some(kind) => Err(CalendarError::new(kind, "injected failure")),
            None => Ok(()),
        }
    }

    fn check_title(&self, title: Option<&str>) -> CalendarResult<()> {
        self.check()?;
        let Some(title) = title else {
            return Ok(());
        };
        match self.title_failures.lock().unwrap().iter().find(|(t, _)| t == title) {
            Some((_, kind)) => Err(CalendarError::new(*kind, "injected failure")),
            None => Ok(()),
        }
    }

    fn not_found(id: &str) -> CalendarError {
        CalendarError::new(CalendarErrorKind::NotFound, format!("no event {}", id))
    }
}

#[async_trait]
impl RemoteCalendar for FakeCalendar {
    async fn list(&self, query: &EventQuery) -> CalendarResult<Vec<RemoteEvent>> {
        self.check_title(query.text.as_deref())?;
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.end > query.time_min && e.start < query.time_max)
            .filter(|e| query.text.as_deref().map_or(true, |t| e.summary.contains(t)))
            .cloned()
            .collect())
    }

    async fn get(&self, id: &str) -> CalendarResult<RemoteEvent> {
        self.check()?;
        self.event(id).ok_or_else(|| Self::not_found(id))
    }

    async fn insert(&self, payload: &RemoteEventPayload) -> CalendarResult<RemoteEvent> {
        self.check_title(Some(payload.summary.as_str()))?;
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let event = RemoteEvent {
            id: format!("remote-{}", n + 1),
            summary: payload.summary.clone(),
            description: Some(payload.description.clone()),
            start: payload.start,
            end: payload.end,
            all_day: payload.all_day,
        };
        self.inserts.fetch_add(1, Ordering::SeqCst);
        self.events.lock().unwrap().push(event.clone());
        Ok(event)
    }

    async fn update(&self, id: &str, payload: &RemoteEventPayload) -> CalendarResult<RemoteEvent> {
        self.check_title(Some(payload.summary.as_str()))?;
        let mut events = self.events.lock().unwrap();
        let event = events.iter_mut().find(|e| e.id == id).ok_or_else(|| Self::not_found(id))?;
        event.summary = payload.summary.clone();
        event.description = Some(payload.description.clone());
        event.start = payload.start;
        event.end = payload.end;
        event.all_day = payload.all_day;
        Ok(event.clone())
    }

    async fn delete(&self, id: &str) -> CalendarResult<()> {
        self.check()?;
        let mut events = self.events.lock().unwrap();
        let before = events.len();
        events.retain(|e| e.id != id);
        if events.len() == before {
            return Err(Self::not_found(id));
        }
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Records every reply and push instead of sending them.
#[derive(Default)]
pub struct RecordingMessenger {
    pub replies: Mutex<Vec<(String, String)>>,
    pub pushes: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn reply(&self, reply_token: &str, text: &str) -> Result<()> {
        self.replies
            .lock()
            .unwrap()
            .push((reply_token.to_string(), text.to_string()));
        Ok(())
    }

    async fn push(&self, to: &str, text: &str) -> Result<()> {
        self.pushes.lock().unwrap().push((to.to_string(), text.to_string()));
        Ok(())
    }
}
