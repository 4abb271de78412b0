//! Shared data models.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;
use uuid::Uuid;

use crate::{Error, Result};

/// Label used for an unassigned role slot.
pub const NONE_LABEL: &str = "なし";

/// A named function at an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Officiant,
    Sound,
    Emcee,
    Reception,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Officiant, Role::Sound, Role::Emcee, Role::Reception];

    /// Stable key used in the settings table.
    pub fn key(&self) -> &'static str {
        match self {
            Role::Officiant => "officiant",
            Role::Sound => "sound",
            Role::Emcee => "emcee",
            Role::Reception => "reception",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Role::Officiant => "祭主",
            Role::Sound => "音響",
            Role::Emcee => "司会",
            Role::Reception => "受付",
        }
    }

    pub fn from_key(key: &str) -> Option<Role> {
        Role::ALL.into_iter().find(|r| r.key() == key)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Who fills each role at an event. `None` means nobody is assigned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleAssignments {
    pub officiant: Option<String>,
    pub sound: Option<String>,
    pub emcee: Option<String>,
    pub reception: Option<String>,
}

impl RoleAssignments {
    pub fn get(&self, role: Role) -> Option<&str> {
        match role {
            Role::Officiant => self.officiant.as_deref(),
            Role::Sound => self.sound.as_deref(),
            Role::Emcee => self.emcee.as_deref(),
            Role::Reception => self.reception.as_deref(),
        }
    }

    pub fn set(&mut self, role: Role, assignee: Option<String>) {
        let slot = match role {
            Role::Officiant => &mut self.officiant,
            Role::Sound => &mut self.sound,
            Role::Emcee => &mut self.emcee,
            Role::Reception => &mut self.reception,
        };
        *slot = assignee;
    }

    /// Assigned people, in role order.
    pub fn assigned(&self) -> impl Iterator<Item = (Role, &str)> + '_ {
        Role::ALL
            .into_iter()
            .filter_map(move |role| self.get(role).map(|name| (role, name)))
    }

    /// One `label: name` line per role.
    pub fn summary_lines(&self) -> Vec<String> {
        Role::ALL
            .iter()
            .map(|role| format!("{}: {}", role.label(), self.get(*role).unwrap_or(NONE_LABEL)))
            .collect()
    }
}

/// Normalise a free-text assignee, mapping blanks and the "none" sentinel to `None`.
pub fn normalize_assignee(raw: Option<&str>) -> Option<String> {
    let value = raw?.trim();
    if value.is_empty() || value == NONE_LABEL || value.eq_ignore_ascii_case("none") {
        None
    } else {
        Some(value.to_string())
    }
}

/// Event category chosen at the start of the dialogue. Decides which roles are collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Ceremony,
    Gathering,
    Other,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [EventKind::Ceremony, EventKind::Gathering, EventKind::Other];

    pub fn label(&self) -> &'static str {
        match self {
            EventKind::Ceremony => "祭典",
            EventKind::Gathering => "行事",
            EventKind::Other => "その他",
        }
    }

    pub fn roles(&self) -> &'static [Role] {
        match self {
            EventKind::Ceremony => &[Role::Officiant, Role::Sound, Role::Emcee, Role::Reception],
            EventKind::Gathering => &[Role::Emcee, Role::Reception],
            EventKind::Other => &[Role::Reception],
        }
    }
}

/// Content of an event record, as collected by the dialogue or posted to the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDraft {
    pub event_name: String,
    pub date: NaiveDate,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(flatten)]
    pub roles: RoleAssignments,
    #[serde(default)]
    pub comment: String,
}

impl EventDraft {
    pub fn validate(&self) -> Result<()> {
        if self.event_name.trim().is_empty() {
            return Err(Error::Validation("eventName must not be empty".to_string()));
        }
        if self.end_time <= self.start_time {
            return Err(Error::Validation("endTime must be after startTime".to_string()));
        }
        Ok(())
    }

    /// Human-readable block used in chat confirmations.
    pub fn summary(&self, offset: &FixedOffset) -> String {
        let mut lines = vec![
            format!("行事名: {}", self.event_name),
            format!("日付: {}", date_label(self.date)),
            format!(
                "時間: {}〜{}",
                self.start_time.with_timezone(offset).format("%H:%M"),
                self.end_time.with_timezone(offset).format("%H:%M")
            ),
        ];
        lines.extend(self.roles.summary_lines());
        lines.push(format!(
            "備考: {}",
            if self.comment.is_empty() { NONE_LABEL } else { &self.comment }
        ));
        lines.join("\n")
    }
}

/// Whether the local record is known to match the remote calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Never pushed to the remote calendar
    LocalOnly,
    /// Last remote reconcile succeeded
    Synced,
    /// Local write succeeded but the remote side did not follow
    PendingSync,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::LocalOnly => "local_only",
            SyncStatus::Synced => "synced",
            SyncStatus::PendingSync => "pending_sync",
        }
    }

    /// Column value to status. Unknown values are logged and read as `PendingSync`
    /// so the next bulk sync pass reconciles the record.
    pub fn parse(raw: &str) -> SyncStatus {
        match raw {
            "local_only" => SyncStatus::LocalOnly,
            "synced" => SyncStatus::Synced,
            "pending_sync" => SyncStatus::PendingSync,
            other => {
                warn!(sync_status = other, "Unknown sync status in events table");
                SyncStatus::PendingSync
            }
        }
    }
}

/// Durable event record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: Uuid,
    #[serde(flatten)]
    pub draft: EventDraft,
    pub google_event_id: Option<String>,
    pub sync_status: SyncStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Row shape of the `events` table.
#[derive(Debug, sqlx::FromRow)]
pub struct EventRow {
    pub id: Uuid,
    pub event_name: String,
    pub event_date: NaiveDate,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub officiant: Option<String>,
    pub sound: Option<String>,
    pub emcee: Option<String>,
    pub reception: Option<String>,
    pub comment: String,
    pub google_event_id: Option<String>,
    pub sync_status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<EventRow> for EventRecord {
    fn from(row: EventRow) -> Self {
        Self {
            id: row.id,
            draft: EventDraft {
                event_name: row.event_name,
                date: row.event_date,
                start_time: row.start_time,
                end_time: row.end_time,
                roles: RoleAssignments {
                    officiant: row.officiant,
                    sound: row.sound,
                    emcee: row.emcee,
                    reception: row.reception,
                },
                comment: row.comment,
            },
            google_event_id: row.google_event_id,
            sync_status: SyncStatus::parse(&row.sync_status),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// A presettable entry: a role (or event name) preset, optionally bound to a LINE user.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SettingsItem {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub item_type: String,
    pub name: String,
    pub line_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const WEEKDAYS: [&str; 7] = ["月", "火", "水", "木", "金", "土", "日"];

/// Short date label such as `6/15(土)`.
pub fn date_label(date: NaiveDate) -> String {
    use chrono::Datelike;
    format!(
        "{}/{}({})",
        date.month(),
        date.day(),
        WEEKDAYS[date.weekday().num_days_from_monday() as usize]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_keys_round_trip() {
        for role in Role::ALL {
            assert_eq!(Role::from_key(role.key()), Some(role));
        }
        assert_eq!(Role::from_key("event_name"), None);
    }

    #[test]
    fn test_sync_status_column_values() {
        for status in [SyncStatus::LocalOnly, SyncStatus::Synced, SyncStatus::PendingSync] {
            assert_eq!(SyncStatus::parse(status.as_str()), status);
        }
        assert_eq!(SyncStatus::parse("SYNCED"), SyncStatus::PendingSync);
    }

    #[test]
    fn test_normalize_assignee() {
        assert_eq!(normalize_assignee(Some("  山田 ")), Some("山田".to_string()));
        assert_eq!(normalize_assignee(Some("なし")), None);
        assert_eq!(normalize_assignee(Some("None")), None);
        assert_eq!(normalize_assignee(Some("")), None);
        assert_eq!(normalize_assignee(None), None);
    }

    #[test]
    fn test_date_label() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        assert_eq!(date_label(date), "6/15(土)");
    }

    #[test]
    fn test_draft_rejects_inverted_times() {
        let start = DateTime::parse_from_rfc3339("2024-06-15T01:00:00Z").unwrap().with_timezone(&Utc);
        let draft = EventDraft {
            event_name: "月次祭".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 6, 15).unwrap(),
            start_time: start,
            end_time: start,
            roles: RoleAssignments::default(),
            comment: String::new(),
        };
        assert!(matches!(draft.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_record_serializes_flat() {
        let start = DateTime::parse_from_rfc3339("2024-06-15T01:00:00Z").unwrap().with_timezone(&Utc);
        let mut roles = RoleAssignments::default();
        roles.set(Role::Officiant, Some("A".to_string()));
        let record = EventRecord {
            id: Uuid::nil(),
            draft: EventDraft {
                event_name: "月次祭".to_string(),
                date: NaiveDate::from_ymd_opt(2024, 6, 15).unwrap(),
                start_time: start,
                end_time: start + chrono::Duration::hours(1),
                roles,
                comment: String::new(),
            },
            google_event_id: None,
            sync_status: SyncStatus::LocalOnly,
            created_at: start,
            updated_at: start,
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["eventName"], "月次祭");
        assert_eq!(json["officiant"], "A");
        assert!(json["sound"].is_null());
        assert!(json["googleEventId"].is_null());
        assert_eq!(json["syncStatus"], "local_only");
    }
}
