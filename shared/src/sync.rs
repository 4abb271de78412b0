//! Calendar sync bridge: reconciles local event records with the remote calendar.
//!
//! The local write always happens first. The remote side is then brought in line
//! and the outcome recorded on the local row: `Synced` on success, `PendingSync`
//! when the remote call failed, so the bulk pass can retry it later.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::calendar::{
    CalendarError, CalendarErrorKind, EventQuery, RemoteCalendar, RemoteEvent, RemoteEventPayload,
};
use crate::config::Config;
use crate::events::EventStore;
use crate::models::{EventDraft, SyncStatus};

/// What the caller did locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Create,
    Update,
    Delete,
}

/// What the bridge ended up doing remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncActionTaken {
    Created,
    LinkedAndUpdated,
    Updated,
    Recreated,
    Deleted,
    DeleteFailed,
    Failed,
}

/// Result descriptor of a single reconcile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub success: bool,
    pub action_taken: SyncActionTaken,
    pub remote_id: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<CalendarErrorKind>,
}

impl SyncOutcome {
    fn ok(action_taken: SyncActionTaken, remote_id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            success: true,
            action_taken,
            remote_id,
            message: message.into(),
            error_kind: None,
        }
    }

    fn failed(err: &CalendarError, remote_id: Option<String>) -> Self {
        Self {
            success: false,
            action_taken: SyncActionTaken::Failed,
            remote_id,
            message: err.user_message(),
            error_kind: Some(err.kind),
        }
    }
}

/// Counts and per-item log of a bulk sync pass.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSyncReport {
    pub created: u32,
    pub updated: u32,
    pub skipped: u32,
    pub errors: u32,
    pub details: Vec<String>,
}

/// Result of the duplicate cleanup.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub scanned: u32,
    pub duplicate_groups: u32,
    pub deleted: u32,
    pub failed: u32,
    pub details: Vec<String>,
}

/// `[start of the current local month, start of the month after next)`, as UTC instants.
pub fn month_window(now: DateTime<Utc>, offset: &FixedOffset) -> (DateTime<Utc>, DateTime<Utc>) {
    let today = now.with_timezone(offset).date_naive();
    let this_month = first_of_month(today.year(), today.month());
    let (y, m) = add_months(today.year(), today.month(), 2);
    let after_next = first_of_month(y, m);

    let to_utc = |date: NaiveDate| {
        let local = date.and_time(chrono::NaiveTime::MIN);
        (local - Duration::seconds(i64::from(offset.local_minus_utc()))).and_utc()
    };
    (to_utc(this_month), to_utc(after_next))
}

fn first_of_month(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
}

fn add_months(year: i32, month: u32, n: u32) -> (i32, u32) {
    let zero_based = month - 1 + n;
    (year + (zero_based / 12) as i32, zero_based % 12 + 1)
}

/// Bridges local event records and the remote calendar.
pub struct SyncBridge {
    calendar: Arc<dyn RemoteCalendar>,
    events: Arc<dyn EventStore>,
    dedup_window: Duration,
    cleanup_window: Duration,
}

impl SyncBridge {
    pub fn new(
        calendar: Arc<dyn RemoteCalendar>,
        events: Arc<dyn EventStore>,
        dedup_window: Duration,
        cleanup_window: Duration,
    ) -> Self {
        Self {
            calendar,
            events,
            dedup_window,
            cleanup_window,
        }
    }

    /// Bridge with the dedup and cleanup windows taken from `config`.
    pub fn from_config(
        config: &Config,
        calendar: Arc<dyn RemoteCalendar>,
        events: Arc<dyn EventStore>,
    ) -> Self {
        Self::new(calendar, events, config.dedup_window, config.cleanup_window)
    }

    /// Reconcile the remote calendar after `action` was applied to local record `local_id`.
    pub async fn sync(&self, action: SyncAction, draft: &EventDraft, local_id: Uuid) -> SyncOutcome {
        let outcome = match action {
            SyncAction::Create => self.create(draft, local_id).await,
            SyncAction::Update => self.update(draft, local_id).await,
            SyncAction::Delete => self.delete(local_id).await,
        };

        info!(
            event_id = %local_id,
            action = ?action,
            action_taken = ?outcome.action_taken,
            success = outcome.success,
            "Calendar sync finished"
        );
        outcome
    }

    /// Link to a matching remote event or create a new one.
    pub async fn create(&self, draft: &EventDraft, local_id: Uuid) -> SyncOutcome {
        let payload = RemoteEventPayload::from_draft(draft);

        let existing = match self.find_existing(&payload).await {
            Ok(found) => found,
            Err(e) => {
                error!(event_id = %local_id, error = %e, "Remote lookup failed");
                self.mark(local_id, SyncStatus::PendingSync).await;
                return SyncOutcome::failed(&e, None);
            }
        };

        match existing {
            Some(found) => {
                info!(event_id = %local_id, remote_id = %found.id, "Linking to existing remote event");
                self.record_remote_id(local_id, &found.id, SyncStatus::PendingSync).await;

                match self.calendar.update(&found.id, &payload).await {
                    Ok(_) => {
                        self.mark(local_id, SyncStatus::Synced).await;
                        SyncOutcome::ok(
                            SyncActionTaken::LinkedAndUpdated,
                            Some(found.id),
                            "既存のGoogleカレンダー予定に紐付けて更新しました",
                        )
                    }
                    Err(e) => {
                        error!(event_id = %local_id, error = %e, "Failed to update linked remote event");
                        SyncOutcome::failed(&e, Some(found.id))
                    }
                }
            }
            None => match self.calendar.insert(&payload).await {
                Ok(created) => {
                    self.record_remote_id(local_id, &created.id, SyncStatus::Synced).await;
                    SyncOutcome::ok(
                        SyncActionTaken::Created,
                        Some(created.id),
                        "Googleカレンダーに登録しました",
                    )
                }
                Err(e) => {
                    error!(event_id = %local_id, error = %e, "Failed to create remote event");
                    self.mark(local_id, SyncStatus::PendingSync).await;
                    SyncOutcome::failed(&e, None)
                }
            },
        }
    }

    /// Push new content to the linked remote event, recreating it if it vanished.
    pub async fn update(&self, draft: &EventDraft, local_id: Uuid) -> SyncOutcome {
        let remote_id = match self.events.get(local_id).await {
            Ok(Some(record)) => record.google_event_id,
            Ok(None) => {
                warn!(event_id = %local_id, "Local record missing during update sync");
                None
            }
            Err(e) => {
                error!(event_id = %local_id, error = %e, "Failed to read local record");
                None
            }
        };

        let Some(remote_id) = remote_id else {
            return self.create(draft, local_id).await;
        };

        let payload = RemoteEventPayload::from_draft(draft);
        match self.calendar.update(&remote_id, &payload).await {
            Ok(_) => {
                self.mark(local_id, SyncStatus::Synced).await;
                SyncOutcome::ok(
                    SyncActionTaken::Updated,
                    Some(remote_id),
                    "Googleカレンダーを更新しました",
                )
            }
            Err(e) if e.kind == CalendarErrorKind::NotFound => {
                // Plain insert, no title lookup: the linked event is known gone and
                // the caller is told it was recreated rather than relinked.
                warn!(event_id = %local_id, remote_id = %remote_id, "Remote event gone, recreating");
                match self.calendar.insert(&payload).await {
                    Ok(created) => {
                        self.record_remote_id(local_id, &created.id, SyncStatus::Synced).await;
                        SyncOutcome::ok(
                            SyncActionTaken::Recreated,
                            Some(created.id),
                            "Googleカレンダーの予定が見つからなかったため再作成しました",
                        )
                    }
                    Err(e) => {
                        error!(event_id = %local_id, error = %e, "Failed to recreate remote event");
                        self.record_remote_id_cleared(local_id).await;
                        SyncOutcome::failed(&e, None)
                    }
                }
            }
            Err(e) => {
                error!(event_id = %local_id, error = %e, "Failed to update remote event");
                self.mark(local_id, SyncStatus::PendingSync).await;
                SyncOutcome::failed(&e, Some(remote_id))
            }
        }
    }

    /// Best-effort removal of the linked remote event. Never blocks the local delete.
    pub async fn delete(&self, local_id: Uuid) -> SyncOutcome {
        let remote_id = match self.events.get(local_id).await {
            Ok(record) => record.and_then(|r| r.google_event_id),
            Err(e) => {
                error!(event_id = %local_id, error = %e, "Failed to read local record");
                None
            }
        };

        let Some(remote_id) = remote_id else {
            return SyncOutcome::ok(SyncActionTaken::Deleted, None, "ローカルのみ削除しました");
        };

        match self.calendar.delete(&remote_id).await {
            Ok(()) => SyncOutcome::ok(
                SyncActionTaken::Deleted,
                Some(remote_id),
                "Googleカレンダーからも削除しました",
            ),
            Err(e) if e.kind == CalendarErrorKind::NotFound => SyncOutcome::ok(
                SyncActionTaken::Deleted,
                Some(remote_id),
                "Googleカレンダーの予定は既に削除されていました",
            ),
            Err(e) => {
                warn!(event_id = %local_id, remote_id = %remote_id, error = %e, "Remote delete failed");
                SyncOutcome {
                    success: true,
                    action_taken: SyncActionTaken::DeleteFailed,
                    remote_id: Some(remote_id),
                    message: e.user_message(),
                    error_kind: Some(e.kind),
                }
            }
        }
    }

    /// Reconcile every unsynced record in `[from, to)`, one at a time.
    ///
    /// Records already linked to a remote event are updated through that link;
    /// only unlinked records go through the create lookup.
    pub async fn sync_pending(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> crate::Result<BulkSyncReport> {
        let records = self.events.list_unsynced_between(from, to).await?;
        let mut report = BulkSyncReport::default();

        info!(records = records.len(), "Starting bulk calendar sync");

        for record in records {
            let label = format!("{} {}", record.draft.date, record.draft.event_name);

            if record.draft.end_time <= record.draft.start_time {
                report.skipped += 1;
                report.details.push(format!("skipped {}: end time is not after start time", label));
                continue;
            }

            let outcome = match record.google_event_id {
                Some(_) => self.update(&record.draft, record.id).await,
                None => self.create(&record.draft, record.id).await,
            };
            match outcome.action_taken {
                SyncActionTaken::Created => {
                    report.created += 1;
                    report.details.push(format!("created {}", label));
                }
                SyncActionTaken::Recreated => {
                    report.created += 1;
                    report.details.push(format!("recreated {}", label));
                }
                SyncActionTaken::LinkedAndUpdated => {
                    report.updated += 1;
                    report.details.push(format!("linked {}", label));
                }
                SyncActionTaken::Updated => {
                    report.updated += 1;
                    report.details.push(format!("updated {}", label));
                }
                _ => {
                    report.errors += 1;
                    report.details.push(format!("error {}: {}", label, outcome.message));
                }
            }
        }

        info!(
            created = report.created,
            updated = report.updated,
            skipped = report.skipped,
            errors = report.errors,
            "Bulk calendar sync complete"
        );
        Ok(report)
    }

    /// Delete all but the first remote event of every `(title, start, end)` group.
    pub async fn cleanup_duplicates(&self, now: DateTime<Utc>) -> crate::Result<CleanupReport> {
        let query = EventQuery {
            time_min: now,
            time_max: now + self.cleanup_window,
            text: None,
        };
        let remote_events = self.calendar.list(&query).await?;

        let mut report = CleanupReport {
            scanned: remote_events.len() as u32,
            ..Default::default()
        };

        for group in duplicate_groups(remote_events) {
            report.duplicate_groups += 1;
            let (keep, rest) = match group.split_first() {
                Some(split) => split,
                None => continue,
            };

            for dup in rest {
                match self.calendar.delete(&dup.id).await {
                    Ok(()) => {
                        info!(remote_id = %dup.id, kept = %keep.id, "Deleted duplicate remote event");
                        report.deleted += 1;
                        report.details.push(format!("deleted {} ({})", dup.id, dup.summary));
                    }
                    Err(e) => {
                        error!(remote_id = %dup.id, error = %e, "Failed to delete duplicate");
                        report.failed += 1;
                        report.details.push(format!("failed {} ({}): {}", dup.id, dup.summary, e));
                    }
                }
            }
        }

        Ok(report)
    }

    /// Same title, with start and end each within the dedup window. First listed match wins.
    async fn find_existing(&self, payload: &RemoteEventPayload) -> Result<Option<RemoteEvent>, CalendarError> {
        let query = EventQuery {
            time_min: payload.start - self.dedup_window,
            time_max: payload.end + self.dedup_window,
            text: Some(payload.summary.clone()),
        };
        let candidates = self.calendar.list(&query).await?;

        Ok(candidates.into_iter().find(|event| {
            event.summary == payload.summary
                && (event.start - payload.start).abs() <= self.dedup_window
                && (event.end - payload.end).abs() <= self.dedup_window
        }))
    }

    async fn record_remote_id(&self, local_id: Uuid, remote_id: &str, status: SyncStatus) {
        if let Err(e) = self.events.set_remote_id(local_id, Some(remote_id), status).await {
            error!(event_id = %local_id, remote_id, error = %e, "Failed to store remote id");
        }
    }

    async fn record_remote_id_cleared(&self, local_id: Uuid) {
        if let Err(e) = self.events.set_remote_id(local_id, None, SyncStatus::PendingSync).await {
            error!(event_id = %local_id, error = %e, "Failed to clear stale remote id");
        }
    }

    async fn mark(&self, local_id: Uuid, status: SyncStatus) {
        if let Err(e) = self.events.set_sync_status(local_id, status).await {
            error!(event_id = %local_id, error = %e, "Failed to record sync status");
        }
    }
}

/// Groups of remote events sharing the literal `(title, start, end)` triple,
/// only those with more than one member, in listing order.
fn duplicate_groups(events: Vec<RemoteEvent>) -> Vec<Vec<RemoteEvent>> {
    let mut index: HashMap<(String, DateTime<Utc>, DateTime<Utc>), usize> = HashMap::new();
    let mut groups: Vec<Vec<RemoteEvent>> = Vec::new();

    for event in events {
        let key = (event.summary.clone(), event.start, event.end);
        match index.get(&key) {
            Some(&i) => groups[i].push(event),
            None => {
                index.insert(key, groups.len());
                groups.push(vec![event]);
            }
        }
    }

    groups.into_iter().filter(|g| g.len() > 1).collect()
}
