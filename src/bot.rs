//! Inbound event dispatch
//!
//! Turns one chat event into the reply for its sender. Every failure is
//! resolved here into a message; tokens that do not parse get no reply.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::account::{is_login_token, AccountService};
use crate::exchange::{ActionToken, ExchangeError, ExchangeKind, ExchangeManager, ExchangeResult};
use crate::gateway::Outbound;
use crate::models::UsageAction;

/// One event from a chat client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum InboundEvent {
    /// Free text typed by the user
    Text(String),
    /// Data of a tapped button
    Postback(String),
}

/// Text commands understood from signed-in workers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Swap,
    Substitute,
    WeekSchedule,
    FullSchedule,
    Reminders,
    Menu,
}

impl Command {
    /// Usage counter bumped when the command is sent
    pub fn usage_action(self) -> UsageAction {
        match self {
            Command::Swap => UsageAction::Swap,
            Command::Substitute => UsageAction::Substitute,
            Command::WeekSchedule => UsageAction::WeekSchedule,
            Command::FullSchedule => UsageAction::FullSchedule,
            Command::Reminders => UsageAction::Reminders,
            Command::Menu => UsageAction::Menu,
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_lowercase().as_str() {
            "swap" | "trade" => Some(Command::Swap),
            "substitute" | "cover" | "sub" => Some(Command::Substitute),
            "schedule" | "this week" | "week" => Some(Command::WeekSchedule),
            "full schedule" | "all" => Some(Command::FullSchedule),
            "reminders" | "settings" => Some(Command::Reminders),
            "menu" | "help" => Some(Command::Menu),
            _ => None,
        }
    }
}

const MENU_TEXT: &str = "What I can do:\n\
    swap - trade one of your duties for someone else's date\n\
    substitute - ask someone to cover one of your duties\n\
    schedule - this week's duties\n\
    full schedule - link to the whole schedule\n\
    reminders - choose your weekly reminder days";

const SIGN_IN_TEXT: &str =
    "Please send the 16-character sign-in code you got from your administrator.\nExample: Abc123DEF456GHiJ";

pub struct Dispatcher {
    manager: Arc<ExchangeManager>,
    accounts: AccountService,
}

impl Dispatcher {
    pub fn new(manager: Arc<ExchangeManager>, accounts: AccountService) -> Self {
        Self { manager, accounts }
    }

    pub fn manager(&self) -> &Arc<ExchangeManager> {
        &self.manager
    }

    /// Handle one event from `identity`; `None` means send nothing back
    pub async fn handle(&self, identity: &str, event: InboundEvent) -> Option<Vec<Outbound>> {
        let result = match event {
            InboundEvent::Text(text) => self.handle_text(identity, text.trim()).await,
            InboundEvent::Postback(data) => self.handle_postback(identity, &data).await,
        };

        match result {
            Ok(reply) => reply,
            Err(e) => render_error(e),
        }
    }

    async fn handle_text(&self, identity: &str, text: &str) -> ExchangeResult<Option<Vec<Outbound>>> {
        let Some(worker) = self.accounts.find(identity).await? else {
            if is_login_token(text) {
                return self.accounts.sign_in(identity, text).await.map(Some);
            }
            return Ok(Some(vec![
                Outbound::text("Sorry, I can't help with that yet."),
                Outbound::text(SIGN_IN_TEXT),
            ]));
        };

        let Some(command) = Command::parse(text) else {
            // Other chatter from signed-in workers is ignored
            return Ok(None);
        };
        tracing::debug!("{} sent command {:?}", identity, command);
        self.accounts
            .record_usage(&worker.name, command.usage_action())
            .await;

        let reply = match command {
            Command::Swap => self.manager.start_exchange(identity, ExchangeKind::Swap).await?,
            Command::Substitute => {
                self.manager
                    .start_exchange(identity, ExchangeKind::Substitute)
                    .await?
            }
            Command::WeekSchedule => self.accounts.week_schedule(identity).await?,
            Command::FullSchedule => self.accounts.schedule_link(identity).await?,
            Command::Reminders => self.accounts.reminder_menu(identity).await?,
            Command::Menu => vec![Outbound::text(MENU_TEXT)],
        };
        Ok(Some(reply))
    }

    async fn handle_postback(&self, identity: &str, data: &str) -> ExchangeResult<Option<Vec<Outbound>>> {
        if data.trim().is_empty() {
            return Ok(None);
        }

        let token: ActionToken = data.parse().map_err(ExchangeError::UnrecognizedToken)?;

        if self.accounts.find(identity).await?.is_none() {
            return Ok(Some(vec![Outbound::text(SIGN_IN_TEXT)]));
        }
        tracing::debug!("{} tapped {}", identity, token.prefix());

        if let Some(result) = self.manager.handle_token(identity, token.clone()).await {
            return result.map(Some);
        }

        let reply = match token {
            ActionToken::ToggleReminder { day, on } => {
                self.accounts.toggle_reminder(identity, day, on).await?
            }
            ActionToken::ViewSchedule { collection_id } => {
                self.accounts.view_schedule(&collection_id).await?
            }
            other => return Err(ExchangeError::UnrecognizedToken(other.to_string())),
        };
        Ok(Some(reply))
    }
}

/// User-facing message for a failed step
fn render_error(error: ExchangeError) -> Option<Vec<Outbound>> {
    let text = match error {
        ExchangeError::UnrecognizedToken(raw) => {
            tracing::debug!("Dropping unrecognized token: {}", raw);
            return None;
        }
        ExchangeError::NotFound(what) => format!("{} not found.", what),
        ExchangeError::Unreachable(name) => format!(
            "{} has not signed in yet, so I can't reach them. Share the sign-in link with them first.",
            name
        ),
        ExchangeError::StaleState { reason, .. } => format!(
            "The exchange failed: someone already exchanged with a third party, or the date has passed.\n({})",
            reason
        ),
        ExchangeError::AlreadyTerminal { message, .. } => message.to_string(),
        ExchangeError::Store(e) => {
            tracing::error!("Store failure while handling event: {}", e);
            "Something went wrong, please try again later.".to_string()
        }
    };
    Some(vec![Outbound::text(text)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::ExchangeSettings;
    use crate::gateway::RecordingGateway;
    use crate::memory::MemoryStore;
    use crate::models::{DutyCollection, ScheduleSlot, SlotDate, Worker};
    use crate::repository::ScheduleRepository;

    fn date(d: u32) -> SlotDate {
        SlotDate::from_ymd(2025, 3, d).unwrap()
    }

    async fn setup() -> (Arc<MemoryStore>, Arc<RecordingGateway>, Dispatcher) {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(RecordingGateway::new());
        let clock = Arc::new(FixedClock::new(date(1)));
        let settings = ExchangeSettings::default();

        store
            .put_collection(&DutyCollection::new("sunday", "Sunday").with_duty_types(["usher"]))
            .await
            .unwrap();
        store
            .put_worker(&Worker::new("A").with_duty("sunday", "usher").with_messaging_id("UA"))
            .await
            .unwrap();
        store
            .put_worker(
                &Worker::new("B")
                    .with_duty("sunday", "usher")
                    .with_login_token("Abc123DEF456GHiJ"),
            )
            .await
            .unwrap();
        store
            .put_slot(&ScheduleSlot::new("sunday", date(2)).with_assignees("usher", ["A"]))
            .await
            .unwrap();
        store
            .put_slot(&ScheduleSlot::new("sunday", date(9)).with_assignees("usher", ["B"]))
            .await
            .unwrap();

        let manager = Arc::new(ExchangeManager::new(
            store.clone(),
            gateway.clone(),
            clock.clone(),
            settings.clone(),
        ));
        let accounts = AccountService::new(store.clone(), gateway.clone(), clock, settings);
        (store, gateway, Dispatcher::new(manager, accounts))
    }

    fn text(s: &str) -> InboundEvent {
        InboundEvent::Text(s.to_string())
    }

    fn postback(s: &str) -> InboundEvent {
        InboundEvent::Postback(s.to_string())
    }

    #[test]
    fn test_command_parse() {
        assert_eq!(Command::parse(" Swap "), Some(Command::Swap));
        assert_eq!(Command::parse("cover"), Some(Command::Substitute));
        assert_eq!(Command::parse("full schedule"), Some(Command::FullSchedule));
        assert_eq!(Command::parse("hello"), None);
    }

    #[test]
    fn test_inbound_event_json() {
        let event: InboundEvent =
            serde_json::from_str(r#"{"type": "postback", "body": "W&sunday"}"#).unwrap();
        assert_eq!(event, postback("W&sunday"));
    }

    #[tokio::test]
    async fn test_unknown_identity_is_asked_to_sign_in() {
        let (_, _, dispatcher) = setup().await;
        let reply = dispatcher.handle("UX", text("swap")).await.unwrap();
        assert_eq!(reply.len(), 2);
        assert!(reply[1].body().contains("sign-in code"));
    }

    #[tokio::test]
    async fn test_sign_in_then_command() {
        let (_, _, dispatcher) = setup().await;
        let reply = dispatcher
            .handle("UB", text("Abc123DEF456GHiJ"))
            .await
            .unwrap();
        assert!(reply[0].body().contains("Welcome, B"));

        let reply = dispatcher.handle("UB", text("swap")).await.unwrap();
        assert_eq!(reply[0].buttons()[0].data, "A*S+sunday+usher");
    }

    #[tokio::test]
    async fn test_commands_are_counted_per_worker() {
        let (store, _, dispatcher) = setup().await;
        dispatcher.handle("UA", text("schedule")).await.unwrap();
        dispatcher.handle("UA", text("week")).await.unwrap();
        dispatcher.handle("UA", text("menu")).await.unwrap();
        assert!(dispatcher.handle("UA", text("thanks!")).await.is_none());
        dispatcher.handle("UX", text("menu")).await.unwrap();

        let counts = store.usage("A", "2025.03").await.unwrap();
        assert_eq!(counts[&UsageAction::WeekSchedule], 2);
        assert_eq!(counts[&UsageAction::Menu], 1);
        assert_eq!(counts.len(), 2);
        assert!(store.usage("UX", "2025.03").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_signed_in_chatter_gets_no_reply() {
        let (_, _, dispatcher) = setup().await;
        assert!(dispatcher.handle("UA", text("thanks!")).await.is_none());
    }

    #[tokio::test]
    async fn test_unrecognized_tokens_are_dropped() {
        let (store, gateway, dispatcher) = setup().await;
        for raw in [
            "",
            "   ",
            "Z&foo",
            "A*S+sunday",
            "A*S+sunday+usher+extra",
            "A&S+2025-03-02+sunday+usher+A",
            "B#2025.03.09+C+2025.03.02+sunday+usher+A",
            "D&not-a-uuid",
            "C*7t",
            "G&B++sunday+usher+A",
        ] {
            assert!(
                dispatcher.handle("UA", postback(raw)).await.is_none(),
                "token {:?} should be ignored",
                raw
            );
        }
        assert!(store.all_requests().await.is_empty());
        assert!(gateway.pushes().await.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_respondent_message() {
        let (store, _, dispatcher) = setup().await;
        let reply = dispatcher
            .handle("UA", postback("G&B+2025.03.02+sunday+usher+A"))
            .await
            .unwrap();
        assert!(reply[0].body().starts_with("B has not signed in yet"));
        assert!(store.all_requests().await.is_empty());
    }

    #[tokio::test]
    async fn test_swap_round_trip() {
        let (store, gateway, dispatcher) = setup().await;
        dispatcher
            .handle("UB", text("Abc123DEF456GHiJ"))
            .await
            .unwrap();

        let reply = dispatcher
            .handle("UA", postback("C&2025.03.09+B+2025.03.02+sunday+usher+A"))
            .await
            .unwrap();
        assert!(reply[0].body().starts_with("Request sent to B"));

        let prompt = gateway.pushed_to("UB").await;
        let yes = prompt[0].buttons()[0].data.clone();
        let confirm = dispatcher.handle("UB", postback(&yes)).await.unwrap();
        let final_token = confirm[0].buttons()[0].data.clone();
        assert!(final_token.starts_with("F&"));

        let done = dispatcher.handle("UB", postback(&final_token)).await.unwrap();
        assert!(done[0].body().starts_with("Done!"));
        let again = dispatcher.handle("UB", postback(&final_token)).await.unwrap();
        assert_eq!(again[0].body(), "This exchange was already completed.");

        let first = store.get_slot("sunday", date(2)).await.unwrap().unwrap();
        let second = store.get_slot("sunday", date(9)).await.unwrap().unwrap();
        assert_eq!(first.assignees("usher"), ["B"]);
        assert_eq!(second.assignees("usher"), ["A"]);

        let b = store.usage("B", "2025.03").await.unwrap();
        assert_eq!(b[&UsageAction::RequestReceived], 1);
        let a = store.usage("A", "2025.03").await.unwrap();
        assert_eq!(a[&UsageAction::ExchangeCompleted], 1);
        assert!(!a.contains_key(&UsageAction::RequestReceived));
    }

    #[tokio::test]
    async fn test_reminder_toggle_via_token() {
        let (store, _, dispatcher) = setup().await;
        let reply = dispatcher.handle("UA", postback("C*5t")).await.unwrap();
        assert_eq!(reply[0].body(), "Reminders set for: Fri");
        let worker = store.get_worker("A").await.unwrap().unwrap();
        assert!(worker.reminder_days[4]);
    }

    #[tokio::test]
    async fn test_unknown_request_id() {
        let (_, _, dispatcher) = setup().await;
        let reply = dispatcher
            .handle("UA", postback(&format!("F&{}", uuid::Uuid::new_v4())))
            .await
            .unwrap();
        assert!(reply[0].body().ends_with("not found."));
    }
}
