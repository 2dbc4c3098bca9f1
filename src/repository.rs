//! Store interface used by the exchange engine
//!
//! Both the SQLite [`Store`](crate::store::Store) and the in-memory
//! [`MemoryStore`](crate::memory::MemoryStore) implement this trait.

use async_trait::async_trait;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::exchange::request::{ExchangeRequest, ExchangeStatus, NewExchangeRequest};
use crate::exchange::token::is_token_safe;
use crate::models::{DutyCollection, ScheduleSlot, SeedData, SlotDate, UsageAction, Worker};

/// One duty list rewrite inside an exchange commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotWrite {
    pub collection_id: String,
    pub date: SlotDate,
    pub duty_type: String,
    /// Assignees observed when the exchange was re-validated
    pub expected: Vec<String>,
    /// Assignees to store
    pub replacement: Vec<String>,
}

/// Result of [`ScheduleRepository::commit_exchange`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// All writes applied and the request is `Executed`
    Committed,
    /// A slot or the request changed since it was read; nothing was written
    Conflict,
}

#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    // Collections

    async fn get_collection(&self, id: &str) -> Result<Option<DutyCollection>>;

    async fn list_collections(&self) -> Result<Vec<DutyCollection>>;

    async fn put_collection(&self, collection: &DutyCollection) -> Result<()>;

    // Slots

    async fn get_slot(&self, collection_id: &str, date: SlotDate) -> Result<Option<ScheduleSlot>>;

    /// Insert or fully replace a slot
    async fn put_slot(&self, slot: &ScheduleSlot) -> Result<()>;

    /// Overwrite only the listed duty types of an existing slot
    async fn update_slot_duties(
        &self,
        collection_id: &str,
        date: SlotDate,
        changes: &BTreeMap<String, Vec<String>>,
    ) -> Result<()>;

    /// Slots dated `from` or later, oldest first, at most `limit`
    async fn upcoming_slots(
        &self,
        collection_id: &str,
        from: SlotDate,
        limit: usize,
    ) -> Result<Vec<ScheduleSlot>>;

    // Workers

    async fn get_worker(&self, name: &str) -> Result<Option<Worker>>;

    /// Insert or fully replace a worker
    async fn put_worker(&self, worker: &Worker) -> Result<()>;

    /// All workers ordered by name
    async fn list_workers(&self) -> Result<Vec<Worker>>;

    async fn find_worker_by_messaging_id(&self, messaging_id: &str) -> Result<Option<Worker>>;

    async fn find_worker_by_login_token(&self, token: &str) -> Result<Option<Worker>>;

    // Exchange requests

    /// Persist a new pending request under a generated id
    async fn create_request(&self, new: NewExchangeRequest) -> Result<ExchangeRequest>;

    async fn get_request(&self, id: Uuid) -> Result<Option<ExchangeRequest>>;

    /// Set `to` only if the stored status is still `from`; returns whether it did
    async fn transition_request(
        &self,
        id: Uuid,
        from: ExchangeStatus,
        to: ExchangeStatus,
        reason: Option<&str>,
    ) -> Result<bool>;

    /// Apply `writes` and mark the request `Executed` as one unit
    ///
    /// Every write is checked against its `expected` list and the request
    /// must still be `Pending`; any mismatch leaves the store untouched.
    async fn commit_exchange(&self, request_id: Uuid, writes: &[SlotWrite]) -> Result<CommitOutcome>;

    // Usage statistics

    /// Add one to the counter of `action` for `worker` in `month` (`YYYY.MM`)
    async fn record_usage(&self, worker: &str, month: &str, action: UsageAction) -> Result<()>;

    /// Counters of `worker` for `month`
    async fn usage(&self, worker: &str, month: &str) -> Result<BTreeMap<UsageAction, i64>>;
}

/// Count one use of `action` by `worker` in the month of `today`
///
/// Statistics never fail the interaction they describe; errors are logged.
pub async fn note_usage(
    repo: &dyn ScheduleRepository,
    worker: &str,
    today: SlotDate,
    action: UsageAction,
) {
    if let Err(e) = repo.record_usage(worker, &today.month_key(), action).await {
        tracing::error!("Failed to record {} usage for {}: {}", action.as_str(), worker, e);
    }
}

/// Reject seed values that could not be carried inside action tokens
fn check_seed(seed: &SeedData) -> Result<()> {
    let check = |what: &str, value: &str| {
        if is_token_safe(value) {
            Ok(())
        } else {
            Err(AppError::BadRequest(format!(
                "{} {:?} must be non-empty and must not contain '+' or '/'",
                what, value
            )))
        }
    };

    for collection in &seed.collections {
        check("collection id", &collection.id)?;
        for duty in &collection.duty_types {
            check("duty type", duty)?;
        }
    }
    for worker in &seed.workers {
        check("worker name", &worker.name)?;
        for (collection_id, duties) in &worker.duties {
            check("collection id", collection_id)?;
            for duty in duties {
                check("duty type", duty)?;
            }
        }
    }
    for slot in &seed.slots {
        check("collection id", &slot.collection_id)?;
        for (duty, assignees) in &slot.assignments {
            check("duty type", duty)?;
            for name in assignees {
                check("assignee", name)?;
            }
        }
    }
    Ok(())
}

/// Load seed data into a store
///
/// Collections are upserted. Workers are upserted but keep an existing
/// messaging binding and reminder choice. Slots are only inserted when
/// missing, so executed exchanges survive a restart with the same seed.
/// A seed holding a name or id that cannot appear in a token is refused
/// before anything is written.
pub async fn apply_seed(repo: &dyn ScheduleRepository, seed: &SeedData) -> Result<()> {
    check_seed(seed)?;

    for collection in &seed.collections {
        repo.put_collection(collection).await?;
    }

    for worker in &seed.workers {
        let mut worker = worker.clone();
        if let Some(existing) = repo.get_worker(&worker.name).await? {
            if worker.messaging_id.is_none() {
                worker.messaging_id = existing.messaging_id;
                worker.reminder_days = existing.reminder_days;
            }
        }
        repo.put_worker(&worker).await?;
    }

    for slot in &seed.slots {
        if repo.get_slot(&slot.collection_id, slot.date).await?.is_none() {
            repo.put_slot(slot).await?;
        }
    }

    Ok(())
}
