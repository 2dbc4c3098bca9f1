//! Worker self-service: sign-in, reminder days and schedule lookups

use std::sync::Arc;

use crate::clock::Clock;
use crate::config::ExchangeSettings;
use crate::exchange::{ActionToken, ExchangeError, ExchangeResult};
use crate::gateway::{Button, NotificationGateway, Outbound};
use crate::models::{DutyCollection, UsageAction, Worker, REMINDER_DAYS};
use crate::repository::{note_usage, ScheduleRepository};

/// Length of the sign-in codes handed out by administrators
pub const LOGIN_TOKEN_LEN: usize = 16;

/// Whether `text` has the shape of a sign-in code
pub fn is_login_token(text: &str) -> bool {
    text.len() == LOGIN_TOKEN_LEN && text.chars().all(|c| c.is_ascii_alphanumeric())
}

pub struct AccountService {
    repo: Arc<dyn ScheduleRepository>,
    gateway: Arc<dyn NotificationGateway>,
    clock: Arc<dyn Clock>,
    settings: ExchangeSettings,
}

impl AccountService {
    pub fn new(
        repo: Arc<dyn ScheduleRepository>,
        gateway: Arc<dyn NotificationGateway>,
        clock: Arc<dyn Clock>,
        settings: ExchangeSettings,
    ) -> Self {
        Self {
            repo,
            gateway,
            clock,
            settings,
        }
    }

    /// Count one use of `action` by `worker` in the current month
    pub async fn record_usage(&self, worker: &str, action: UsageAction) {
        note_usage(self.repo.as_ref(), worker, self.clock.today(), action).await;
    }

    /// Worker bound to `identity`, if any
    pub async fn find(&self, identity: &str) -> ExchangeResult<Option<Worker>> {
        Ok(self.repo.find_worker_by_messaging_id(identity).await?)
    }

    /// Bind `identity` to the worker holding `login_token`
    ///
    /// A worker signing in for the first time gets Monday reminders. Signing
    /// in again from another identity moves the binding, and pushes still
    /// queued for the old identity are discarded.
    pub async fn sign_in(&self, identity: &str, login_token: &str) -> ExchangeResult<Vec<Outbound>> {
        let Some(mut worker) = self.repo.find_worker_by_login_token(login_token).await? else {
            tracing::warn!("Sign-in with unknown code from {}", identity);
            return Ok(vec![Outbound::text(
                "Sign-in failed: that code does not match anyone on the roster.",
            )]);
        };

        if !worker.is_reachable() {
            worker.reminder_days = [true, false, false, false, false, false];
        }
        let previous = worker
            .messaging_id
            .replace(identity.to_string())
            .filter(|old| !old.is_empty() && old != identity);
        self.repo.put_worker(&worker).await?;
        tracing::info!("{} signed in", worker.name);

        if let Some(old) = previous {
            tracing::info!("{} moved from {} to {}", worker.name, old, identity);
            if let Err(e) = self.gateway.forget(&old).await {
                tracing::error!("Failed to discard pushes for {}: {}", old, e);
            }
        }

        Ok(vec![
            Outbound::text(format!("Signed in. Welcome, {}!", worker.name)),
            Outbound::text("Send \"menu\" to see what I can do."),
        ])
    }

    /// Reminder day switches, each button flipping one day
    pub async fn reminder_menu(&self, identity: &str) -> ExchangeResult<Vec<Outbound>> {
        let worker = self.worker_for(identity).await?;
        let buttons = REMINDER_DAYS
            .iter()
            .zip(worker.reminder_days.iter())
            .enumerate()
            .map(|(i, (label, on))| {
                Button::new(
                    format!("{} {}", label, if *on { "on" } else { "off" }),
                    ActionToken::ToggleReminder {
                        day: i as u8 + 1,
                        on: !on,
                    },
                )
            })
            .collect();
        Ok(vec![Outbound::menu(
            "Reminders",
            "Tap a day to switch its weekly reminder.",
            buttons,
        )])
    }

    /// Switch one reminder day (1 = Monday .. 6 = Saturday)
    pub async fn toggle_reminder(&self, identity: &str, day: u8, on: bool) -> ExchangeResult<Vec<Outbound>> {
        let mut worker = self.worker_for(identity).await?;
        let index = usize::from(day)
            .checked_sub(1)
            .filter(|i| *i < REMINDER_DAYS.len())
            .ok_or_else(|| ExchangeError::UnrecognizedToken(format!("C*{}", day)))?;

        worker.reminder_days[index] = on;
        self.repo.put_worker(&worker).await?;

        let active = worker.active_reminder_days();
        let text = if active.is_empty() {
            "Reminders are off.".to_string()
        } else {
            format!("Reminders set for: {}", active.join(" "))
        };
        Ok(vec![Outbound::text(text)])
    }

    /// Current week's schedule, or a collection menu for multi-collection workers
    pub async fn week_schedule(&self, identity: &str) -> ExchangeResult<Vec<Outbound>> {
        let worker = self.worker_for(identity).await?;
        let ids: Vec<&String> = worker.duties.keys().collect();

        match ids.as_slice() {
            [] => {
                let collections = self.repo.list_collections().await?;
                let first = collections
                    .first()
                    .ok_or_else(|| ExchangeError::NotFound("Schedule".to_string()))?;
                self.render_schedule(first).await
            }
            [only] => self.view_schedule(only).await,
            many => {
                let mut buttons = Vec::new();
                for id in many {
                    let label = match self.repo.get_collection(id).await? {
                        Some(collection) => collection.display_name(),
                        None => id.to_string(),
                    };
                    buttons.push(Button::new(
                        label,
                        ActionToken::ViewSchedule {
                            collection_id: id.to_string(),
                        },
                    ));
                }
                Ok(vec![Outbound::menu(
                    "Schedules",
                    "Which schedule do you want to see?",
                    buttons,
                )])
            }
        }
    }

    /// One collection's current slot in schema order
    pub async fn view_schedule(&self, collection_id: &str) -> ExchangeResult<Vec<Outbound>> {
        let collection = self
            .repo
            .get_collection(collection_id)
            .await?
            .ok_or_else(|| ExchangeError::NotFound(format!("Collection {}", collection_id)))?;
        self.render_schedule(&collection).await
    }

    /// Link to the full schedule page
    pub async fn schedule_link(&self, identity: &str) -> ExchangeResult<Vec<Outbound>> {
        let base = self.settings.schedule_url.trim_end_matches('/');
        let text = match self.find(identity).await? {
            Some(worker) => format!("Full schedule:\n{}/?user={}", base, worker.name),
            None => format!("Full schedule:\n{}/", base),
        };
        Ok(vec![Outbound::text(text)])
    }

    async fn render_schedule(&self, collection: &DutyCollection) -> ExchangeResult<Vec<Outbound>> {
        let slot = self
            .repo
            .upcoming_slots(&collection.id, self.clock.today(), 1)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ExchangeError::NotFound(format!("Upcoming schedule of {}", collection.name)))?;

        let mut lines = vec![
            collection.display_name(),
            format!("Duties on {}", slot.date.date().format("%Y/%m/%d")),
            String::new(),
        ];
        for duty_type in &collection.duty_types {
            let names = slot.assignees(duty_type);
            let names = if names.is_empty() {
                "-".to_string()
            } else {
                names.join("/")
            };
            lines.push(format!("{}: {}", duty_type, names));
        }
        Ok(vec![Outbound::text(lines.join("\n"))])
    }

    async fn worker_for(&self, identity: &str) -> ExchangeResult<Worker> {
        self.find(identity)
            .await?
            .ok_or_else(|| ExchangeError::NotFound("Worker".to_string()))
    }
}
