//! Menu-driven dialogue that collects an event or a reminder registration.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::choices::{date_options, end_slots, numbered, pick, start_slots, Pick};
use super::state::{ConversationState, EventBasics, EventChoice, EventTarget, SessionStore, Step};
use crate::config::ScheduleConfig;
use crate::events::EventStore;
use crate::models::{date_label, normalize_assignee, EventDraft, EventKind, Role, RoleAssignments, NONE_LABEL};
use crate::settings::{upsert_item, SettingsStore, EVENT_NAME_TYPE};
use crate::sync::{SyncAction, SyncBridge};

/// Phrases that open the menu from anywhere.
pub const TRIGGERS: [&str; 2] = ["メニュー", "menu"];
/// Abandons the conversation from anywhere.
pub const CANCEL_KEYWORD: &str = "キャンセル";

const YES: &str = "はい";
const NO: &str = "いいえ";

/// Upcoming records offered for editing, counted from today.
const EDIT_WINDOW_DAYS: i64 = 30;

const GENERIC_FAILURE: &str = "エラーが発生しました。しばらくしてからもう一度お試しください。";
const CANCELLED: &str = "キャンセルしました。";
const ANSWER_YES_NO: &str = "「はい」または「いいえ」で答えてください。";

enum Transition {
    /// Keep the conversation alive at `Step`
    Next(Step, String),
    /// Drop the conversation
    Finish(String),
}

fn is_trigger(text: &str) -> bool {
    TRIGGERS.iter().any(|t| text.eq_ignore_ascii_case(t))
}

fn menu_prompt() -> String {
    format!(
        "メニューを選んでください。\n{}\n\n「{}」でいつでも中止できます。",
        numbered(["行事を登録", "行事を編集", "リマインダーの受信登録"]),
        CANCEL_KEYWORD
    )
}

fn choose_between(len: usize) -> String {
    format!("1〜{}の番号で選んでください。", len)
}

pub struct ConversationEngine {
    sessions: Arc<dyn SessionStore>,
    events: Arc<dyn EventStore>,
    settings: Arc<dyn SettingsStore>,
    bridge: Arc<SyncBridge>,
    schedule: ScheduleConfig,
}

impl ConversationEngine {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        events: Arc<dyn EventStore>,
        settings: Arc<dyn SettingsStore>,
        bridge: Arc<SyncBridge>,
        schedule: ScheduleConfig,
    ) -> Self {
        Self {
            sessions,
            events,
            settings,
            bridge,
            schedule,
        }
    }

    /// Process one inbound message and return the reply text.
    pub async fn handle(&self, sender: &str, text: &str) -> String {
        self.handle_at(sender, text, Utc::now()).await
    }

    pub async fn handle_at(&self, sender: &str, text: &str, now: DateTime<Utc>) -> String {
        let text = text.trim();

        let transition = if text == CANCEL_KEYWORD {
            Transition::Finish(CANCELLED.to_string())
        } else if is_trigger(text) {
            Transition::Next(Step::Menu, menu_prompt())
        } else {
            let step = match self.sessions.load(sender, now).await {
                Ok(state) => state.map(|s| s.step).unwrap_or(Step::Idle),
                Err(e) => {
                    error!(sender, error = %e, "Failed to load conversation state");
                    return GENERIC_FAILURE.to_string();
                }
            };
            info!(sender, step = step.name(), "Advancing conversation");
            self.advance(sender, step, text, now).await
        };

        match transition {
            Transition::Next(step, reply) => {
                if let Err(e) = self.sessions.save(sender, ConversationState::new(step, now)).await {
                    error!(sender, error = %e, "Failed to save conversation state");
                    return GENERIC_FAILURE.to_string();
                }
                reply
            }
            Transition::Finish(reply) => {
                if let Err(e) = self.sessions.remove(sender).await {
                    warn!(sender, error = %e, "Failed to remove conversation state");
                }
                reply
            }
        }
    }

    async fn advance(&self, sender: &str, step: Step, text: &str, now: DateTime<Utc>) -> Transition {
        match &step {
            Step::Idle => self.next(Step::Menu),

            Step::Menu => match pick(text, 3) {
                Pick::Index(0) => self.next(Step::SelectEventType { editing: None }),
                Pick::Index(1) => self.upcoming_events(step, now).await,
                Pick::Index(_) => self.next(Step::RegisterSelectRole),
                _ => self.reprompt(&choose_between(3), step),
            },

            Step::SelectExistingEvent { options } => match pick(text, options.len()) {
                Pick::Index(i) => self.next(Step::SelectEventType {
                    editing: Some(options[i].id),
                }),
                _ => self.reprompt(&choose_between(options.len()), step),
            },

            Step::SelectEventType { editing } => match pick(text, EventKind::ALL.len()) {
                Pick::Index(i) => {
                    let kind = EventKind::ALL[i];
                    match self.settings.list_by_type(EVENT_NAME_TYPE).await {
                        Ok(presets) => {
                            let mut options = vec![kind.label().to_string()];
                            options.extend(presets.into_iter().map(|p| p.name));
                            self.next(Step::SelectEventName {
                                target: EventTarget {
                                    editing: *editing,
                                    kind,
                                },
                                options,
                            })
                        }
                        Err(e) => {
                            error!(sender, error = %e, "Failed to load event name presets");
                            Transition::Next(step, GENERIC_FAILURE.to_string())
                        }
                    }
                }
                _ => self.reprompt(&choose_between(EventKind::ALL.len()), step),
            },

            Step::SelectEventName { target, options } => {
                let event_name = match pick(text, options.len()) {
                    Pick::Index(i) => options[i].clone(),
                    Pick::Text(name) if !name.is_empty() => name,
                    _ => return self.reprompt("番号を選ぶか、行事名を入力してください。", step),
                };
                let today = self.schedule.local_date(now);
                self.next(Step::SelectDate {
                    target: target.clone(),
                    event_name,
                    options: date_options(&self.schedule, today),
                })
            }

            Step::SelectDate {
                target,
                event_name,
                options,
            } => match pick(text, options.len()) {
                Pick::Index(i) => self.next(Step::SelectStartTime {
                    target: target.clone(),
                    event_name: event_name.clone(),
                    date: options[i],
                    options: start_slots(&self.schedule),
                }),
                _ => self.reprompt(&choose_between(options.len()), step),
            },

            Step::SelectStartTime {
                target,
                event_name,
                date,
                options,
            } => match pick(text, options.len()) {
                Pick::Index(i) => {
                    let start = options[i];
                    let ends = end_slots(&self.schedule, start);
                    if ends.is_empty() {
                        return self.reprompt("その時刻の後に選べる終了時刻がありません。", step);
                    }
                    self.next(Step::SelectEndTime {
                        target: target.clone(),
                        event_name: event_name.clone(),
                        date: *date,
                        start,
                        options: ends,
                    })
                }
                _ => self.reprompt(&choose_between(options.len()), step),
            },

            Step::SelectEndTime {
                target,
                event_name,
                date,
                start,
                options,
            } => match pick(text, options.len()) {
                Pick::Index(i) => {
                    let basics = EventBasics {
                        target: target.clone(),
                        event_name: event_name.clone(),
                        date: *date,
                        start: *start,
                        end: options[i],
                    };
                    self.role_step(sender, step.clone(), basics, RoleAssignments::default(), 0)
                        .await
                }
                _ => self.reprompt(&choose_between(options.len()), step),
            },

            Step::SelectRole {
                basics,
                roles,
                cursor,
                options,
            } => {
                let Some(role) = basics.target.kind.roles().get(*cursor).copied() else {
                    return self.next(Step::EnterComment {
                        basics: basics.clone(),
                        roles: roles.clone(),
                    });
                };
                let assignee = match pick(text, options.len() + 1) {
                    Pick::Index(0) => None,
                    Pick::Index(i) => Some(options[i - 1].clone()),
                    Pick::Text(name) if !name.is_empty() => normalize_assignee(Some(name.as_str())),
                    _ => return self.reprompt("番号を選ぶか、名前を入力してください。", step),
                };
                let mut roles = roles.clone();
                roles.set(role, assignee);
                self.role_step(sender, step.clone(), basics.clone(), roles, cursor + 1)
                    .await
            }

            Step::EnterComment { basics, roles } => {
                let comment = match text {
                    "なし" | "-" => String::new(),
                    other => other.to_string(),
                };
                let draft = EventDraft {
                    event_name: basics.event_name.clone(),
                    date: basics.date,
                    start_time: self.schedule.to_utc(basics.date, basics.start),
                    end_time: self.schedule.to_utc(basics.date, basics.end),
                    roles: roles.clone(),
                    comment,
                };
                self.next(Step::Confirm {
                    editing: basics.target.editing,
                    draft,
                })
            }

            Step::Confirm { editing, draft } => match text {
                YES => Transition::Finish(self.commit(*editing, draft).await),
                NO => Transition::Finish(CANCELLED.to_string()),
                _ => self.reprompt(ANSWER_YES_NO, step),
            },

            Step::RegisterSelectRole => match pick(text, Role::ALL.len()) {
                Pick::Index(i) => {
                    let role = Role::ALL[i];
                    match self.settings.list_by_type(role.key()).await {
                        Ok(presets) => self.next(Step::RegisterEnterName {
                            role,
                            options: presets.into_iter().map(|p| p.name).collect(),
                        }),
                        Err(e) => {
                            error!(sender, error = %e, "Failed to load role presets");
                            Transition::Next(step, GENERIC_FAILURE.to_string())
                        }
                    }
                }
                _ => self.reprompt(&choose_between(Role::ALL.len()), step),
            },

            Step::RegisterEnterName { role, options } => {
                let name = match pick(text, options.len()) {
                    Pick::Index(i) => options[i].clone(),
                    Pick::Text(name) if normalize_assignee(Some(name.as_str())).is_some() => name,
                    _ => return self.reprompt("番号を選ぶか、お名前を入力してください。", step),
                };
                self.next(Step::RegisterConfirm { role: *role, name })
            }

            Step::RegisterConfirm { role, name } => match text {
                YES => Transition::Finish(self.register(sender, *role, name).await),
                NO => Transition::Finish(CANCELLED.to_string()),
                _ => self.reprompt(ANSWER_YES_NO, step),
            },
        }
    }

    async fn upcoming_events(&self, step: Step, now: DateTime<Utc>) -> Transition {
        let from = self.schedule.day_start_utc(self.schedule.local_date(now));
        let to = from + Duration::days(EDIT_WINDOW_DAYS);

        let records = match self.events.list_between(from, to).await {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, "Failed to list upcoming events");
                return Transition::Next(step, GENERIC_FAILURE.to_string());
            }
        };

        if records.is_empty() {
            return Transition::Next(
                Step::Menu,
                format!("今後{}日間に編集できる行事はありません。\n\n{}", EDIT_WINDOW_DAYS, menu_prompt()),
            );
        }

        let options = records
            .into_iter()
            .map(|r| EventChoice {
                id: r.id,
                label: format!(
                    "{} {} {}",
                    date_label(r.draft.date),
                    r.draft.start_time.with_timezone(&self.schedule.offset).format("%H:%M"),
                    r.draft.event_name
                ),
            })
            .collect();
        self.next(Step::SelectExistingEvent { options })
    }

    /// Ask for the role at `cursor`, or move on to the comment once every role is collected.
    async fn role_step(
        &self,
        sender: &str,
        current: Step,
        basics: EventBasics,
        roles: RoleAssignments,
        cursor: usize,
    ) -> Transition {
        let Some(role) = basics.target.kind.roles().get(cursor) else {
            return self.next(Step::EnterComment { basics, roles });
        };

        match self.settings.list_by_type(role.key()).await {
            Ok(presets) => self.next(Step::SelectRole {
                basics,
                roles,
                cursor,
                options: presets.into_iter().map(|p| p.name).collect(),
            }),
            Err(e) => {
                error!(sender, role = role.key(), error = %e, "Failed to load role presets");
                Transition::Next(current, GENERIC_FAILURE.to_string())
            }
        }
    }

    /// Write the record, then reconcile the remote calendar.
    async fn commit(&self, editing: Option<Uuid>, draft: &EventDraft) -> String {
        let (record, action) = match editing {
            Some(id) => match self.events.update(id, draft).await {
                Ok(Some(record)) => (record, SyncAction::Update),
                Ok(None) => return "編集対象の行事が見つかりませんでした。".to_string(),
                Err(e) => {
                    error!(event_id = %id, error = %e, "Failed to update event");
                    return GENERIC_FAILURE.to_string();
                }
            },
            None => match self.events.insert(draft).await {
                Ok(record) => (record, SyncAction::Create),
                Err(e) => {
                    error!(error = %e, "Failed to create event");
                    return GENERIC_FAILURE.to_string();
                }
            },
        };

        info!(event_id = %record.id, action = ?action, "Event saved from chat");

        let verb = match action {
            SyncAction::Update => "更新",
            _ => "登録",
        };
        let outcome = self.bridge.sync(action, draft, record.id).await;

        if outcome.success {
            format!(
                "行事を{}しました。\n\n{}\n\n{}",
                verb,
                draft.summary(&self.schedule.offset),
                outcome.message
            )
        } else {
            format!(
                "行事を{}しました（ローカルに保存済み）。\nGoogleカレンダーへの反映は保留中です。\n{}",
                verb, outcome.message
            )
        }
    }

    async fn register(&self, sender: &str, role: Role, name: &str) -> String {
        match upsert_item(self.settings.as_ref(), role.key(), name, Some(sender)).await {
            Ok(item) => {
                info!(sender, role = role.key(), item_id = %item.id, "Registered reminder recipient");
                format!("{}「{}」としてリマインダーの受信を登録しました。", role.label(), name)
            }
            Err(e) => {
                error!(sender, role = role.key(), error = %e, "Failed to register reminder recipient");
                GENERIC_FAILURE.to_string()
            }
        }
    }

    fn next(&self, step: Step) -> Transition {
        let reply = self.prompt(&step);
        Transition::Next(step, reply)
    }

    /// Stay at `step` with an error line in front of its prompt.
    fn reprompt(&self, message: &str, step: Step) -> Transition {
        let reply = format!("{}\n\n{}", message, self.prompt(&step));
        Transition::Next(step, reply)
    }

    fn prompt(&self, step: &Step) -> String {
        match step {
            Step::Idle | Step::Menu => menu_prompt(),
            Step::SelectExistingEvent { options } => format!(
                "編集する行事を選んでください。\n{}",
                numbered(options.iter().map(|o| &o.label))
            ),
            Step::SelectEventType { .. } => format!(
                "行事の種類を選んでください。\n{}",
                numbered(EventKind::ALL.iter().map(|k| k.label()))
            ),
            Step::SelectEventName { options, .. } => format!(
                "行事名を選ぶか、入力してください。\n{}",
                numbered(options)
            ),
            Step::SelectDate { options, .. } => format!(
                "日付を選んでください。\n{}",
                numbered(options.iter().map(|d| date_label(*d)))
            ),
            Step::SelectStartTime { date, options, .. } => format!(
                "{} の開始時刻を選んでください。\n{}",
                date_label(*date),
                numbered(options.iter().map(|t| t.format("%H:%M")))
            ),
            Step::SelectEndTime { start, options, .. } => format!(
                "終了時刻を選んでください（開始 {}）。\n{}",
                start.format("%H:%M"),
                numbered(options.iter().map(|t| t.format("%H:%M")))
            ),
            Step::SelectRole {
                basics,
                cursor,
                options,
                ..
            } => {
                let label = basics
                    .target
                    .kind
                    .roles()
                    .get(*cursor)
                    .map(|r| r.label())
                    .unwrap_or_default();
                format!(
                    "{}を選ぶか、名前を入力してください。\n{}",
                    label,
                    numbered(std::iter::once(NONE_LABEL).chain(options.iter().map(String::as_str)))
                )
            }
            Step::EnterComment { .. } => "備考を入力してください（なければ「なし」）。".to_string(),
            Step::Confirm { editing, draft } => format!(
                "以下の内容で{}します。よろしいですか？\n\n{}\n\n{}",
                if editing.is_some() { "更新" } else { "登録" },
                draft.summary(&self.schedule.offset),
                ANSWER_YES_NO
            ),
            Step::RegisterSelectRole => format!(
                "リマインダーを受け取る役割を選んでください。\n{}",
                numbered(Role::ALL.iter().map(|r| r.label()))
            ),
            Step::RegisterEnterName { role, options } if options.is_empty() => {
                format!("{}のお名前を入力してください。", role.label())
            }
            Step::RegisterEnterName { role, options } => format!(
                "{}のお名前を選ぶか、入力してください。\n{}",
                role.label(),
                numbered(options)
            ),
            Step::RegisterConfirm { role, name } => format!(
                "{}「{}」としてリマインダーを受け取りますか？\n{}",
                role.label(),
                name,
                ANSWER_YES_NO
            ),
        }
    }
}
