//! Guarded execution of confirmed exchanges
//!
//! Execution re-reads both affected slots, checks that each party still
//! holds the duty on a date that has not passed, then commits the rewritten
//! assignee lists together with the `Pending -> Executed` transition. The
//! commit is conditional on the lists read here, so an exchange completed in
//! between is detected instead of overwritten.

use std::sync::Arc;
use uuid::Uuid;

use super::request::{ExchangeKind, ExchangeRequest, ExchangeStatus};
use super::{ExchangeError, ExchangeResult};
use crate::clock::Clock;
use crate::gateway::{NotificationGateway, Outbound};
use crate::models::{SlotDate, UsageAction};
use crate::repository::{note_usage, CommitOutcome, ScheduleRepository, SlotWrite};

/// Which party's slot failed re-validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Requester,
    Respondent,
}

pub struct ExecutionEngine {
    repo: Arc<dyn ScheduleRepository>,
    gateway: Arc<dyn NotificationGateway>,
    clock: Arc<dyn Clock>,
}

impl ExecutionEngine {
    pub fn new(
        repo: Arc<dyn ScheduleRepository>,
        gateway: Arc<dyn NotificationGateway>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repo,
            gateway,
            clock,
        }
    }

    /// Run the exchange `request_id` once
    ///
    /// Returns the executed request. A request that is no longer pending
    /// yields `AlreadyTerminal` and a slot missing from the schedule yields
    /// `NotFound`; neither changes anything. A failed re-validation
    /// rejects the request, notifies the requester and yields `StaleState`.
    pub async fn execute(&self, request_id: Uuid) -> ExchangeResult<ExchangeRequest> {
        let request = self
            .repo
            .get_request(request_id)
            .await?
            .ok_or_else(|| ExchangeError::NotFound(format!("Exchange request {}", request_id)))?;

        if request.status != ExchangeStatus::Pending {
            return Err(already_terminal(request.status));
        }

        let today = self.clock.today();
        let writes = match self.plan(&request, today).await? {
            Ok(writes) => writes,
            Err((side, reason)) => {
                return Err(self.refuse(request, Some(side), reason).await?);
            }
        };

        match self.repo.commit_exchange(request.id, &writes).await? {
            CommitOutcome::Committed => {
                let mut executed = request;
                executed.status = ExchangeStatus::Executed;
                tracing::info!(
                    "Executed {} request {} ({} -> {})",
                    executed.kind.as_str(),
                    executed.id,
                    executed.requester,
                    executed.respondent
                );
                self.notify_requester(&executed, None).await;
                note_usage(
                    self.repo.as_ref(),
                    &executed.requester,
                    self.clock.today(),
                    UsageAction::ExchangeCompleted,
                )
                .await;
                Ok(executed)
            }
            CommitOutcome::Conflict => {
                // Either a slot moved under us or the request was settled concurrently
                let current = self.repo.get_request(request.id).await?;
                match current {
                    Some(current) if current.status != ExchangeStatus::Pending => {
                        Err(already_terminal(current.status))
                    }
                    _ => Err(self
                        .refuse(request, None, "the schedule changed while confirming")
                        .await?),
                }
            }
        }
    }

    /// Re-validate both sides and build the slot writes
    ///
    /// The outer result carries store failures, the inner one the side that
    /// no longer matches.
    async fn plan(
        &self,
        request: &ExchangeRequest,
        today: SlotDate,
    ) -> ExchangeResult<Result<Vec<SlotWrite>, (Side, &'static str)>> {
        let requester_list = match self
            .current_assignees(request, request.requester_date, &request.requester, today)
            .await?
        {
            Ok(list) => list,
            Err(reason) => return Ok(Err((Side::Requester, reason))),
        };

        let mut writes = vec![SlotWrite {
            collection_id: request.collection_id.clone(),
            date: request.requester_date,
            duty_type: request.duty_type.clone(),
            replacement: replace_first(&requester_list, &request.requester, &request.respondent),
            expected: requester_list,
        }];

        if request.kind == ExchangeKind::Swap {
            let Some(respondent_date) = request.respondent_date else {
                return Ok(Err((Side::Respondent, "the swap date is missing")));
            };
            if respondent_date == request.requester_date {
                return Ok(Err((Side::Respondent, "both sides are on the same date")));
            }

            let respondent_list = match self
                .current_assignees(request, respondent_date, &request.respondent, today)
                .await?
            {
                Ok(list) => list,
                Err(reason) => return Ok(Err((Side::Respondent, reason))),
            };

            writes.push(SlotWrite {
                collection_id: request.collection_id.clone(),
                date: respondent_date,
                duty_type: request.duty_type.clone(),
                replacement: replace_first(&respondent_list, &request.respondent, &request.requester),
                expected: respondent_list,
            });
        }

        Ok(Ok(writes))
    }

    /// Assignee list of the duty on `date`, if `name` is still on it and the
    /// date has not passed
    ///
    /// A missing slot is `NotFound` and leaves the request pending.
    async fn current_assignees(
        &self,
        request: &ExchangeRequest,
        date: SlotDate,
        name: &str,
        today: SlotDate,
    ) -> ExchangeResult<Result<Vec<String>, &'static str>> {
        if date < today {
            return Ok(Err("the date has already passed"));
        }
        let Some(slot) = self.repo.get_slot(&request.collection_id, date).await? else {
            return Err(ExchangeError::NotFound(format!(
                "Slot {} {}",
                request.collection_id, date
            )));
        };
        if !slot.is_assigned(&request.duty_type, name) {
            return Ok(Err("the duty was already exchanged with someone else"));
        }
        Ok(Ok(slot.assignees(&request.duty_type).to_vec()))
    }

    /// Reject the request after a failed check and build the error to return
    async fn refuse(
        &self,
        request: ExchangeRequest,
        side: Option<Side>,
        reason: &str,
    ) -> ExchangeResult<ExchangeError> {
        let reason = match side {
            Some(Side::Requester) => format!("{}: {}", request.requester, reason),
            Some(Side::Respondent) => format!("{}: {}", request.respondent, reason),
            None => reason.to_string(),
        };
        let moved = self
            .repo
            .transition_request(
                request.id,
                ExchangeStatus::Pending,
                ExchangeStatus::Rejected,
                Some(&reason),
            )
            .await?;

        if !moved {
            let status = self
                .repo
                .get_request(request.id)
                .await?
                .map_or(ExchangeStatus::Rejected, |r| r.status);
            return Ok(already_terminal(status));
        }

        tracing::warn!("Refused request {}: {}", request.id, reason);

        let mut rejected = request;
        rejected.status = ExchangeStatus::Rejected;
        rejected.reason = Some(reason.clone());
        self.notify_requester(&rejected, Some(&reason)).await;

        Ok(ExchangeError::StaleState {
            request: Box::new(rejected),
            reason,
        })
    }

    async fn notify_requester(&self, request: &ExchangeRequest, failure: Option<&str>) {
        let requester = match self.repo.get_worker(&request.requester).await {
            Ok(Some(worker)) => worker,
            Ok(None) => return,
            Err(e) => {
                tracing::error!("Failed to load requester {}: {}", request.requester, e);
                return;
            }
        };
        let Some(identity) = requester.messaging_id.filter(|id| !id.is_empty()) else {
            return;
        };

        let collection_name = match self.repo.get_collection(&request.collection_id).await {
            Ok(Some(collection)) => collection.display_name(),
            _ => request.collection_id.clone(),
        };
        let text = match failure {
            None => format!("Exchange completed: {}", request.describe(&collection_name)),
            Some(reason) => format!(
                "Exchange failed: {}\nReason: {}",
                request.describe(&collection_name),
                reason
            ),
        };

        if let Err(e) = self.gateway.push(&identity, vec![Outbound::text(text)]).await {
            tracing::error!("Failed to notify {}: {}", request.requester, e);
        }
    }
}

pub(crate) fn already_terminal(status: ExchangeStatus) -> ExchangeError {
    let message = match status {
        ExchangeStatus::Executed => "This exchange was already completed.",
        _ => "This request was declined and cannot be changed.",
    };
    ExchangeError::AlreadyTerminal { status, message }
}

/// Replace the first occurrence of `from` with `to`, keeping every position
fn replace_first(names: &[String], from: &str, to: &str) -> Vec<String> {
    let mut replaced = names.to_vec();
    if let Some(slot) = replaced.iter_mut().find(|n| n.as_str() == from) {
        *slot = to.to_string();
    }
    replaced
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::exchange::request::NewExchangeRequest;
    use crate::gateway::RecordingGateway;
    use crate::memory::MemoryStore;
    use crate::models::{ScheduleSlot, Worker};
    use std::collections::HashMap;

    fn date(d: u32) -> SlotDate {
        SlotDate::from_ymd(2025, 3, d).unwrap()
    }

    struct Harness {
        store: Arc<MemoryStore>,
        gateway: Arc<RecordingGateway>,
        clock: Arc<FixedClock>,
        engine: ExecutionEngine,
    }

    async fn setup() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(RecordingGateway::new());
        let clock = Arc::new(FixedClock::new(date(1)));

        for (name, id) in [("A", "UA"), ("B", "UB"), ("C", "UC")] {
            store
                .put_worker(&Worker::new(name).with_duty("sunday", "usher").with_messaging_id(id))
                .await
                .unwrap();
        }
        store
            .put_slot(&ScheduleSlot::new("sunday", date(2)).with_assignees("usher", ["A", "C", "A"]))
            .await
            .unwrap();
        store
            .put_slot(&ScheduleSlot::new("sunday", date(9)).with_assignees("usher", ["B", "C"]))
            .await
            .unwrap();

        let engine = ExecutionEngine::new(store.clone(), gateway.clone(), clock.clone());
        Harness {
            store,
            gateway,
            clock,
            engine,
        }
    }

    async fn usher(store: &MemoryStore, d: u32) -> Vec<String> {
        store
            .get_slot("sunday", date(d))
            .await
            .unwrap()
            .unwrap()
            .assignees("usher")
            .to_vec()
    }

    fn counts<'a>(lists: impl IntoIterator<Item = &'a Vec<String>>) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for list in lists {
            for name in list {
                *counts.entry(name.clone()).or_default() += 1;
            }
        }
        counts
    }

    #[test]
    fn test_replace_first_keeps_positions() {
        let names: Vec<String> = ["A", "C", "A"].iter().map(|s| s.to_string()).collect();
        assert_eq!(replace_first(&names, "A", "B"), ["B", "C", "A"]);
        assert_eq!(replace_first(&names, "Z", "B"), names);
    }

    #[tokio::test]
    async fn test_substitute_replaces_in_place() {
        let h = setup().await;
        let request = h
            .store
            .create_request(NewExchangeRequest::substitute("A", "B", "sunday", "usher", date(2)))
            .await
            .unwrap();
        let before = usher(&h.store, 2).await;

        let executed = h.engine.execute(request.id).await.unwrap();
        assert_eq!(executed.status, ExchangeStatus::Executed);

        let after = usher(&h.store, 2).await;
        assert_eq!(after, ["B", "C", "A"]);
        assert_eq!(before.len(), after.len());
        // Only one occurrence of the requester moved to the respondent
        let (b, a) = (counts([&before]), counts([&after]));
        assert_eq!(b.get("C"), a.get("C"));
        assert_eq!(b["A"] - 1, a["A"]);

        let stored = h.store.get_request(request.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExchangeStatus::Executed);

        let pushed = h.gateway.pushed_to("UA").await;
        assert_eq!(pushed.len(), 1);
        assert!(pushed[0].body().starts_with("Exchange completed"));
    }

    #[tokio::test]
    async fn test_swap_preserves_lengths_and_counts() {
        let h = setup().await;
        let request = h
            .store
            .create_request(NewExchangeRequest::swap(
                "A", "B", "sunday", "usher", date(2), date(9),
            ))
            .await
            .unwrap();
        let (first, second) = (usher(&h.store, 2).await, usher(&h.store, 9).await);

        h.engine.execute(request.id).await.unwrap();

        let (new_first, new_second) = (usher(&h.store, 2).await, usher(&h.store, 9).await);
        assert_eq!(new_first, ["B", "C", "A"]);
        assert_eq!(new_second, ["A", "C"]);
        assert_eq!(first.len(), new_first.len());
        assert_eq!(second.len(), new_second.len());
        assert_eq!(counts([&first, &second]), counts([&new_first, &new_second]));
    }

    #[tokio::test]
    async fn test_execute_is_idempotent() {
        let h = setup().await;
        let request = h
            .store
            .create_request(NewExchangeRequest::substitute("A", "B", "sunday", "usher", date(2)))
            .await
            .unwrap();
        h.engine.execute(request.id).await.unwrap();
        let after_first = usher(&h.store, 2).await;

        for _ in 0..3 {
            let err = h.engine.execute(request.id).await.unwrap_err();
            assert!(matches!(
                err,
                ExchangeError::AlreadyTerminal {
                    status: ExchangeStatus::Executed,
                    message: "This exchange was already completed."
                }
            ));
        }
        assert_eq!(usher(&h.store, 2).await, after_first);

        let completed = h.store.usage("A", "2025.03").await.unwrap();
        assert_eq!(completed[&UsageAction::ExchangeCompleted], 1);
    }

    #[tokio::test]
    async fn test_third_party_change_on_requester_side() {
        let h = setup().await;
        let request = h
            .store
            .create_request(NewExchangeRequest::swap(
                "A", "B", "sunday", "usher", date(2), date(9),
            ))
            .await
            .unwrap();

        // Somebody else takes over both of A's occurrences
        let changes = std::collections::BTreeMap::from([(
            "usher".to_string(),
            vec!["C".to_string(), "C".to_string(), "D".to_string()],
        )]);
        h.store
            .update_slot_duties("sunday", date(2), &changes)
            .await
            .unwrap();
        let (first, second) = (usher(&h.store, 2).await, usher(&h.store, 9).await);

        let err = h.engine.execute(request.id).await.unwrap_err();
        match err {
            ExchangeError::StaleState { request, reason } => {
                assert_eq!(request.status, ExchangeStatus::Rejected);
                assert!(reason.starts_with("A:"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert_eq!(usher(&h.store, 2).await, first);
        assert_eq!(usher(&h.store, 9).await, second);
        let stored = h.store.get_request(request.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExchangeStatus::Rejected);

        let pushed = h.gateway.pushed_to("UA").await;
        assert_eq!(pushed.len(), 1);
        assert!(pushed[0].body().starts_with("Exchange failed"));
    }

    #[tokio::test]
    async fn test_third_party_change_on_respondent_side() {
        let h = setup().await;
        let request = h
            .store
            .create_request(NewExchangeRequest::swap(
                "A", "B", "sunday", "usher", date(2), date(9),
            ))
            .await
            .unwrap();
        h.store
            .put_slot(&ScheduleSlot::new("sunday", date(9)).with_assignees("usher", ["C"]))
            .await
            .unwrap();

        let err = h.engine.execute(request.id).await.unwrap_err();
        assert!(matches!(&err, ExchangeError::StaleState { reason, .. } if reason.starts_with("B:")));
        assert_eq!(usher(&h.store, 2).await, ["A", "C", "A"]);
    }

    #[tokio::test]
    async fn test_missing_target_slot_keeps_request_pending() {
        let h = setup().await;
        let request = h
            .store
            .create_request(NewExchangeRequest::swap(
                "A", "B", "sunday", "usher", date(2), date(16),
            ))
            .await
            .unwrap();

        let err = h.engine.execute(request.id).await.unwrap_err();
        assert!(matches!(&err, ExchangeError::NotFound(what) if what == "Slot sunday 2025.03.16"));

        let stored = h.store.get_request(request.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExchangeStatus::Pending);
        assert!(stored.reason.is_none());
        assert_eq!(usher(&h.store, 2).await, ["A", "C", "A"]);
        assert!(h.gateway.pushes().await.is_empty());
    }

    #[tokio::test]
    async fn test_elapsed_date_is_refused() {
        let h = setup().await;
        let request = h
            .store
            .create_request(NewExchangeRequest::substitute("A", "B", "sunday", "usher", date(2)))
            .await
            .unwrap();
        h.clock.set(date(3));

        let err = h.engine.execute(request.id).await.unwrap_err();
        assert!(matches!(err, ExchangeError::StaleState { .. }));
        assert_eq!(usher(&h.store, 2).await, ["A", "C", "A"]);
        assert!(h.store.usage("A", "2025.03").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_same_day_is_still_valid() {
        let h = setup().await;
        let request = h
            .store
            .create_request(NewExchangeRequest::substitute("A", "B", "sunday", "usher", date(2)))
            .await
            .unwrap();
        h.clock.set(date(2));

        assert!(h.engine.execute(request.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_rejected_request_cannot_execute() {
        let h = setup().await;
        let request = h
            .store
            .create_request(NewExchangeRequest::substitute("A", "B", "sunday", "usher", date(2)))
            .await
            .unwrap();
        h.store
            .transition_request(request.id, ExchangeStatus::Pending, ExchangeStatus::Rejected, None)
            .await
            .unwrap();

        let err = h.engine.execute(request.id).await.unwrap_err();
        assert!(matches!(
            err,
            ExchangeError::AlreadyTerminal {
                status: ExchangeStatus::Rejected,
                ..
            }
        ));
        assert_eq!(usher(&h.store, 2).await, ["A", "C", "A"]);
        assert!(h.gateway.pushes().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_request() {
        let h = setup().await;
        let err = h.engine.execute(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ExchangeError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_two_overlapping_swaps_only_one_wins() {
        let h = setup().await;
        let first = h
            .store
            .create_request(NewExchangeRequest::swap(
                "A", "B", "sunday", "usher", date(2), date(9),
            ))
            .await
            .unwrap();
        let second = h
            .store
            .create_request(NewExchangeRequest::swap(
                "B", "A", "sunday", "usher", date(9), date(2),
            ))
            .await
            .unwrap();

        h.engine.execute(first.id).await.unwrap();
        // B is no longer on 03/09, so the mirrored swap must be refused
        let err = h.engine.execute(second.id).await.unwrap_err();
        assert!(matches!(err, ExchangeError::StaleState { .. }));
        assert_eq!(usher(&h.store, 2).await, ["B", "C", "A"]);
        assert_eq!(usher(&h.store, 9).await, ["A", "C"]);
    }
}
