//! Exchange request lifecycle
//!
//! The manager walks a request from the first menu to its terminal state:
//! - duty, date and counterpart selection (stateless, carried in tokens)
//! - confirm-and-send, which persists the request as `Pending`
//! - respondent yes / no / final confirm
//! - event broadcasting

use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::advisor::ConflictAdvisor;
use super::candidates::{Candidate, CandidateFinder};
use super::engine::ExecutionEngine;
use super::request::{ExchangeKind, ExchangeRequest, ExchangeStatus, NewExchangeRequest};
use super::token::{ActionToken, AmbiguousSwap, SubstituteProposal, SwapProposal};
use super::{ExchangeError, ExchangeResult};
use crate::clock::Clock;
use crate::config::ExchangeSettings;
use crate::gateway::{Button, NotificationGateway, Outbound};
use crate::models::{SlotDate, UsageAction, Worker};
use crate::repository::{note_usage, ScheduleRepository};

const DECLINED_REASON: &str = "declined by counterpart";

/// Events emitted by the exchange manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeEvent {
    /// A request was persisted and sent to the respondent
    RequestCreated {
        request_id: Uuid,
        kind: ExchangeKind,
        requester: String,
        respondent: String,
    },
    /// The respondent declined
    RequestRejected { request_id: Uuid, reason: String },
    /// The schedule was changed
    RequestExecuted { request_id: Uuid },
    /// Execution found stale data and rejected the request
    ExecutionRefused { request_id: Uuid, reason: String },
}

pub struct ExchangeManager {
    repo: Arc<dyn ScheduleRepository>,
    gateway: Arc<dyn NotificationGateway>,
    clock: Arc<dyn Clock>,
    settings: ExchangeSettings,
    finder: CandidateFinder,
    advisor: ConflictAdvisor,
    engine: ExecutionEngine,
    event_tx: broadcast::Sender<ExchangeEvent>,
}

impl ExchangeManager {
    pub fn new(
        repo: Arc<dyn ScheduleRepository>,
        gateway: Arc<dyn NotificationGateway>,
        clock: Arc<dyn Clock>,
        settings: ExchangeSettings,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            finder: CandidateFinder::new(repo.clone(), settings.lookahead),
            advisor: ConflictAdvisor::new(repo.clone()),
            engine: ExecutionEngine::new(repo.clone(), gateway.clone(), clock.clone()),
            repo,
            gateway,
            clock,
            settings,
            event_tx,
        }
    }

    /// Subscribe to exchange events
    pub fn subscribe(&self) -> broadcast::Receiver<ExchangeEvent> {
        self.event_tx.subscribe()
    }

    /// Route an exchange token; `None` for tokens handled elsewhere
    pub async fn handle_token(
        &self,
        identity: &str,
        token: ActionToken,
    ) -> Option<ExchangeResult<Vec<Outbound>>> {
        let result = match token {
            ActionToken::SelectDuty {
                kind,
                collection_id,
                duty_type,
            } => self.select_duty(identity, kind, &collection_id, &duty_type).await,
            ActionToken::SelectDate {
                kind,
                date,
                collection_id,
                duty_type,
                requester,
            } => {
                self.select_date(kind, date, &collection_id, &duty_type, &requester)
                    .await
            }
            ActionToken::Disambiguate(swap) => Ok(self.disambiguate(&swap)),
            ActionToken::ProposeSwap(proposal) => self.propose_swap(&proposal).await,
            ActionToken::ProposeSubstitute(proposal) => self.propose_substitute(&proposal).await,
            ActionToken::SendSwap(proposal) => self.confirm_and_send(proposal.to_request()).await,
            ActionToken::SendSubstitute(proposal) => {
                self.confirm_and_send(proposal.to_request()).await
            }
            ActionToken::RespondYes(id) => self.respond_yes(id).await,
            ActionToken::RespondNo(id) => self.reject(id).await,
            ActionToken::FinalConfirm(id) => self.final_confirm(id).await,
            ActionToken::ToggleReminder { .. } | ActionToken::ViewSchedule { .. } => return None,
        };
        Some(result)
    }

    /// Menu of the worker's exchangeable duties with something upcoming
    pub async fn start_exchange(
        &self,
        identity: &str,
        kind: ExchangeKind,
    ) -> ExchangeResult<Vec<Outbound>> {
        let worker = self.worker_for(identity).await?;
        let today = self.clock.today();
        let mut buttons = Vec::new();

        for (collection_id, held) in &worker.duties {
            let Some(collection) = self.repo.get_collection(collection_id).await? else {
                continue;
            };
            let slots = self
                .repo
                .upcoming_slots(collection_id, today, self.settings.lookahead)
                .await?;

            for duty_type in held {
                if !self.settings.is_exchangeable(duty_type) {
                    continue;
                }
                if slots.iter().any(|s| s.is_assigned(duty_type, &worker.name)) {
                    buttons.push(Button::new(
                        format!("{} - {}", collection.display_name(), duty_type),
                        ActionToken::SelectDuty {
                            kind,
                            collection_id: collection_id.clone(),
                            duty_type: duty_type.clone(),
                        },
                    ));
                }
            }
        }

        if buttons.is_empty() {
            return Ok(vec![Outbound::text("You have no upcoming duties to exchange.")]);
        }
        let title = match kind {
            ExchangeKind::Substitute => "Find a substitute",
            ExchangeKind::Swap => "Swap a duty",
        };
        Ok(vec![Outbound::menu(title, "Which duty?", buttons)])
    }

    /// The worker's own upcoming dates for one duty
    pub async fn select_duty(
        &self,
        identity: &str,
        kind: ExchangeKind,
        collection_id: &str,
        duty_type: &str,
    ) -> ExchangeResult<Vec<Outbound>> {
        let worker = self.worker_for(identity).await?;
        let slots = self
            .repo
            .upcoming_slots(collection_id, self.clock.today(), self.settings.lookahead)
            .await?;

        let buttons: Vec<Button> = slots
            .iter()
            .filter(|s| s.is_assigned(duty_type, &worker.name))
            .map(|s| {
                Button::new(
                    s.date.short(),
                    ActionToken::SelectDate {
                        kind,
                        date: s.date,
                        collection_id: collection_id.to_string(),
                        duty_type: duty_type.to_string(),
                        requester: worker.name.clone(),
                    },
                )
            })
            .collect();

        if buttons.is_empty() {
            return Ok(vec![Outbound::text(format!(
                "You have no upcoming {} duties.",
                duty_type
            ))]);
        }
        let text = match kind {
            ExchangeKind::Substitute => "Which date do you need covered?",
            ExchangeKind::Swap => "Which of your dates do you want to swap?",
        };
        let title = format!("{} - {}", self.collection_name(collection_id).await?, duty_type);
        Ok(vec![Outbound::menu(title, text, buttons)])
    }

    /// Candidates for the requester's chosen date
    pub async fn select_date(
        &self,
        kind: ExchangeKind,
        date: SlotDate,
        collection_id: &str,
        duty_type: &str,
        requester: &str,
    ) -> ExchangeResult<Vec<Outbound>> {
        let candidates = self
            .finder
            .find(requester, collection_id, duty_type, kind, date, self.clock.today())
            .await?;

        if candidates.is_empty() {
            let verb = match kind {
                ExchangeKind::Substitute => "cover",
                ExchangeKind::Swap => "swap with",
            };
            return Ok(vec![Outbound::text(format!(
                "Nobody is available to {} you on {}. Share the system with your co-workers so they can sign in.",
                verb,
                date.short()
            ))]);
        }

        let buttons = candidates
            .iter()
            .map(|c: &Candidate| {
                Button::new(c.label(), c.token(requester, date, collection_id, duty_type))
            })
            .collect();
        let title = match kind {
            ExchangeKind::Substitute => format!("Who should cover {}?", date.short()),
            ExchangeKind::Swap => format!("Swap {} with which date?", date.short()),
        };
        Ok(vec![Outbound::menu(title, duty_type, buttons)])
    }

    /// Ask the requester to pick exactly one occupant of the target date
    pub fn disambiguate(&self, swap: &AmbiguousSwap) -> Vec<Outbound> {
        let buttons = swap
            .occupants
            .iter()
            .filter_map(|occupant| swap.select(occupant))
            .map(|proposal| Button::new(proposal.respondent.clone(), ActionToken::ProposeSwap(proposal)))
            .collect();
        vec![Outbound::menu(
            format!("Which {} on {}?", swap.duty_type, swap.target_date.short()),
            "You can swap with one person only.",
            buttons,
        )]
    }

    /// Confirm prompt for a swap, plus conflicts the requester would walk into
    pub async fn propose_swap(&self, proposal: &SwapProposal) -> ExchangeResult<Vec<Outbound>> {
        let collection_name = self.collection_name(&proposal.collection_id).await?;
        let mut messages = vec![Outbound::confirm(
            format!(
                "Ask {} to swap your {} on {} for their {}? ({})",
                proposal.respondent,
                proposal.duty_type,
                proposal.requester_date.short(),
                proposal.target_date.short(),
                collection_name
            ),
            Button::new("Send", ActionToken::SendSwap(proposal.clone())),
            Button::dismiss("Cancel"),
        )];

        if let Some(requester) = self.repo.get_worker(&proposal.requester).await? {
            if let Some(advisory) = self.advisor.advisory(&requester, proposal.target_date).await? {
                messages.push(advisory);
            }
        }
        Ok(messages)
    }

    pub async fn propose_substitute(
        &self,
        proposal: &SubstituteProposal,
    ) -> ExchangeResult<Vec<Outbound>> {
        let collection_name = self.collection_name(&proposal.collection_id).await?;
        Ok(vec![Outbound::confirm(
            format!(
                "Ask {} to cover your {} on {}? ({})",
                proposal.respondent,
                proposal.duty_type,
                proposal.requester_date.short(),
                collection_name
            ),
            Button::new("Send", ActionToken::SendSubstitute(proposal.clone())),
            Button::dismiss("Cancel"),
        )])
    }

    /// Persist the request and ask the respondent
    ///
    /// Nothing is stored when the respondent cannot be reached.
    pub async fn confirm_and_send(
        &self,
        new: NewExchangeRequest,
    ) -> ExchangeResult<Vec<Outbound>> {
        let respondent = self
            .repo
            .get_worker(&new.respondent)
            .await?
            .ok_or_else(|| ExchangeError::NotFound(format!("Worker {}", new.respondent)))?;
        let Some(identity) = respondent.messaging_id.clone().filter(|id| !id.is_empty()) else {
            tracing::warn!("{} is not reachable, request not sent", respondent.name);
            return Err(ExchangeError::Unreachable(respondent.name));
        };

        let request = self.repo.create_request(new).await?;
        tracing::info!(
            "Created {} request {} from {} to {}",
            request.kind.as_str(),
            request.id,
            request.requester,
            request.respondent
        );
        let _ = self.event_tx.send(ExchangeEvent::RequestCreated {
            request_id: request.id,
            kind: request.kind,
            requester: request.requester.clone(),
            respondent: request.respondent.clone(),
        });
        note_usage(
            self.repo.as_ref(),
            &request.respondent,
            self.clock.today(),
            UsageAction::RequestReceived,
        )
        .await;

        let collection_name = self.collection_name(&request.collection_id).await?;
        let mut prompt = vec![Outbound::confirm(
            format!(
                "{} is asking: {}\nWill you accept?",
                request.requester,
                request.describe(&collection_name)
            ),
            Button::new("Yes", ActionToken::RespondYes(request.id)),
            Button::new("No", ActionToken::RespondNo(request.id)),
        )];
        if request.kind == ExchangeKind::Swap {
            if let Some(advisory) = self.advisor.advisory(&respondent, request.requester_date).await? {
                prompt.push(advisory);
            }
        }
        if let Err(e) = self.gateway.push(&identity, prompt).await {
            tracing::error!("Failed to deliver request {} to {}: {}", request.id, identity, e);
        }

        Ok(vec![Outbound::text(format!(
            "Request sent to {}. You will be told when they answer.",
            request.respondent
        ))])
    }

    /// Respondent agrees in principle; ask for the final confirmation
    pub async fn respond_yes(&self, request_id: Uuid) -> ExchangeResult<Vec<Outbound>> {
        let request = self.load(request_id).await?;
        if request.status != ExchangeStatus::Pending {
            return Err(decision_closed(request.status));
        }

        let collection_name = self.collection_name(&request.collection_id).await?;
        Ok(vec![Outbound::confirm(
            format!(
                "Final check: {}\nConfirming changes the schedule.",
                request.describe(&collection_name)
            ),
            Button::new("Confirm", ActionToken::FinalConfirm(request.id)),
            Button::dismiss("Not now"),
        )])
    }

    /// Respondent declines
    pub async fn reject(&self, request_id: Uuid) -> ExchangeResult<Vec<Outbound>> {
        let request = self.load(request_id).await?;
        if request.status != ExchangeStatus::Pending {
            return Err(decision_closed(request.status));
        }

        let moved = self
            .repo
            .transition_request(
                request.id,
                ExchangeStatus::Pending,
                ExchangeStatus::Rejected,
                Some(DECLINED_REASON),
            )
            .await?;
        if !moved {
            let current = self.load(request_id).await?;
            return Err(decision_closed(current.status));
        }

        tracing::info!("Request {} declined by {}", request.id, request.respondent);
        let _ = self.event_tx.send(ExchangeEvent::RequestRejected {
            request_id: request.id,
            reason: DECLINED_REASON.to_string(),
        });

        let collection_name = self.collection_name(&request.collection_id).await?;
        self.notify(
            &request.requester,
            format!(
                "{} declined: {}\nReason: {}",
                request.respondent,
                request.describe(&collection_name),
                DECLINED_REASON
            ),
        )
        .await?;

        Ok(vec![Outbound::text("You declined the request.")])
    }

    /// Respondent commits; runs the execution engine
    pub async fn final_confirm(&self, request_id: Uuid) -> ExchangeResult<Vec<Outbound>> {
        match self.engine.execute(request_id).await {
            Ok(request) => {
                let _ = self.event_tx.send(ExchangeEvent::RequestExecuted {
                    request_id: request.id,
                });
                let collection_name = self.collection_name(&request.collection_id).await?;
                Ok(vec![Outbound::text(format!(
                    "Done! {}",
                    request.describe(&collection_name)
                ))])
            }
            Err(ExchangeError::StaleState { request, reason }) => {
                let _ = self.event_tx.send(ExchangeEvent::ExecutionRefused {
                    request_id: request.id,
                    reason: reason.clone(),
                });
                Err(ExchangeError::StaleState { request, reason })
            }
            Err(e) => Err(e),
        }
    }

    async fn worker_for(&self, identity: &str) -> ExchangeResult<Worker> {
        self.repo
            .find_worker_by_messaging_id(identity)
            .await?
            .ok_or_else(|| ExchangeError::NotFound("Worker".to_string()))
    }

    async fn load(&self, request_id: Uuid) -> ExchangeResult<ExchangeRequest> {
        self.repo
            .get_request(request_id)
            .await?
            .ok_or_else(|| ExchangeError::NotFound(format!("Exchange request {}", request_id)))
    }

    async fn collection_name(&self, collection_id: &str) -> ExchangeResult<String> {
        Ok(self
            .repo
            .get_collection(collection_id)
            .await?
            .map_or_else(|| collection_id.to_string(), |c| c.display_name()))
    }

    /// Push a text to a worker if they can be reached
    async fn notify(&self, name: &str, text: String) -> ExchangeResult<()> {
        let Some(worker) = self.repo.get_worker(name).await? else {
            return Ok(());
        };
        if let Some(identity) = worker.messaging_id.filter(|id| !id.is_empty()) {
            if let Err(e) = self.gateway.push(&identity, vec![Outbound::text(text)]).await {
                tracing::error!("Failed to notify {}: {}", name, e);
            }
        }
        Ok(())
    }
}

/// Outcome of a yes/no on a request that already left `Pending`
fn decision_closed(status: ExchangeStatus) -> ExchangeError {
    let message = match status {
        ExchangeStatus::Rejected => "This request was already declined.",
        _ => "This exchange is already completed and cannot be changed.",
    };
    ExchangeError::AlreadyTerminal { status, message }
}
