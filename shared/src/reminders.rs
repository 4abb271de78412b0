//! Day-ahead duty reminders pushed to registered LINE users.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};

use crate::config::ScheduleConfig;
use crate::events::EventStore;
use crate::line::Messenger;
use crate::models::{date_label, Role};
use crate::settings::{recipients, SettingsStore};
use crate::Result;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderReport {
    pub date: NaiveDate,
    pub dry_run: bool,
    pub events_checked: u32,
    pub messages_sent: u32,
    pub skipped: u32,
    pub errors: u32,
    pub details: Vec<String>,
}

/// One role someone fills at one event.
#[derive(Debug)]
struct Duty {
    event_name: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    role: Role,
}

/// The local date after `now`.
pub fn tomorrow(schedule: &ScheduleConfig, now: DateTime<Utc>) -> NaiveDate {
    schedule.local_date(now) + Duration::days(1)
}

pub struct ReminderJob {
    events: Arc<dyn EventStore>,
    settings: Arc<dyn SettingsStore>,
    messenger: Arc<dyn Messenger>,
    schedule: ScheduleConfig,
}

impl ReminderJob {
    pub fn new(
        events: Arc<dyn EventStore>,
        settings: Arc<dyn SettingsStore>,
        messenger: Arc<dyn Messenger>,
        schedule: ScheduleConfig,
    ) -> Self {
        Self {
            events,
            settings,
            messenger,
            schedule,
        }
    }

    /// Send one message per person with duties on `date`. A dry run only counts.
    pub async fn run(&self, date: NaiveDate, dry_run: bool) -> Result<ReminderReport> {
        let from = self.schedule.day_start_utc(date);
        let to = self.schedule.day_start_utc(date + Duration::days(1));

        let events = self.events.list_between(from, to).await?;
        let recipients = recipients(self.settings.as_ref()).await?;

        let mut report = ReminderReport {
            date,
            dry_run,
            events_checked: events.len() as u32,
            messages_sent: 0,
            skipped: 0,
            errors: 0,
            details: Vec::new(),
        };

        let mut duties: BTreeMap<String, Vec<Duty>> = BTreeMap::new();
        for event in &events {
            for (role, name) in event.draft.roles.assigned() {
                duties.entry(name.to_string()).or_default().push(Duty {
                    event_name: event.draft.event_name.clone(),
                    start: event.draft.start_time,
                    end: event.draft.end_time,
                    role,
                });
            }
        }

        for (name, duties) in duties {
            let Some(line_id) = recipients.get(&name) else {
                report.skipped += 1;
                report.details.push(format!("skipped {}: no LINE registration", name));
                continue;
            };

            let message = self.compose(date, &name, &duties);

            if dry_run {
                report.messages_sent += 1;
                report.details.push(format!("would send to {} ({} duties)", name, duties.len()));
                continue;
            }

            match self.messenger.push(line_id, &message).await {
                Ok(()) => {
                    report.messages_sent += 1;
                    report.details.push(format!("sent to {} ({} duties)", name, duties.len()));
                }
                Err(e) => {
                    error!(name = %name, error = %e, "Failed to push reminder");
                    report.errors += 1;
                    report.details.push(format!("failed {}: {}", name, e));
                }
            }
        }

        info!(
            date = %date,
            dry_run,
            events_checked = report.events_checked,
            messages_sent = report.messages_sent,
            skipped = report.skipped,
            errors = report.errors,
            "Reminder run complete"
        );
        Ok(report)
    }

    fn compose(&self, date: NaiveDate, name: &str, duties: &[Duty]) -> String {
        let offset = &self.schedule.offset;
        let lines: Vec<String> = duties
            .iter()
            .map(|d| {
                format!(
                    "・{}〜{} {}（{}）",
                    d.start.with_timezone(offset).format("%H:%M"),
                    d.end.with_timezone(offset).format("%H:%M"),
                    d.event_name,
                    d.role.label()
                )
            })
            .collect();

        format!(
            "{}さん\n{}の担当のお知らせです。\n\n{}\n\nよろしくお願いいたします。",
            name,
            date_label(date),
            lines.join("\n")
        )
    }
}
