//! In-memory schedule repository
//!
//! Keeps everything in `RwLock`ed maps. Used by tests and handy for local
//! demos; a commit holds both write locks so it is atomic with respect to
//! every other call on the same store.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::exchange::request::{ExchangeRequest, ExchangeStatus, NewExchangeRequest};
use crate::models::{DutyCollection, ScheduleSlot, SlotDate, UsageAction, Worker};
use crate::repository::{CommitOutcome, ScheduleRepository, SlotWrite};

#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<BTreeMap<String, DutyCollection>>,
    slots: RwLock<BTreeMap<(String, SlotDate), ScheduleSlot>>,
    workers: RwLock<BTreeMap<String, Worker>>,
    requests: RwLock<HashMap<Uuid, ExchangeRequest>>,
    usage: RwLock<HashMap<(String, String, UsageAction), i64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request ever created, oldest first
    pub async fn all_requests(&self) -> Vec<ExchangeRequest> {
        let requests = self.requests.read().await;
        let mut all: Vec<_> = requests.values().cloned().collect();
        all.sort_by_key(|r| r.created_at);
        all
    }
}

#[async_trait]
impl ScheduleRepository for MemoryStore {
    async fn get_collection(&self, id: &str) -> Result<Option<DutyCollection>> {
        Ok(self.collections.read().await.get(id).cloned())
    }

    async fn list_collections(&self) -> Result<Vec<DutyCollection>> {
        Ok(self.collections.read().await.values().cloned().collect())
    }

    async fn put_collection(&self, collection: &DutyCollection) -> Result<()> {
        self.collections
            .write()
            .await
            .insert(collection.id.clone(), collection.clone());
        Ok(())
    }

    async fn get_slot(&self, collection_id: &str, date: SlotDate) -> Result<Option<ScheduleSlot>> {
        let slots = self.slots.read().await;
        Ok(slots.get(&(collection_id.to_string(), date)).cloned())
    }

    async fn put_slot(&self, slot: &ScheduleSlot) -> Result<()> {
        self.slots
            .write()
            .await
            .insert((slot.collection_id.clone(), slot.date), slot.clone());
        Ok(())
    }

    async fn update_slot_duties(
        &self,
        collection_id: &str,
        date: SlotDate,
        changes: &BTreeMap<String, Vec<String>>,
    ) -> Result<()> {
        let mut slots = self.slots.write().await;
        let slot = slots
            .get_mut(&(collection_id.to_string(), date))
            .ok_or_else(|| AppError::NotFound(format!("Slot {} {} not found", collection_id, date)))?;
        for (duty, names) in changes {
            slot.assignments.insert(duty.clone(), names.clone());
        }
        Ok(())
    }

    async fn upcoming_slots(
        &self,
        collection_id: &str,
        from: SlotDate,
        limit: usize,
    ) -> Result<Vec<ScheduleSlot>> {
        let slots = self.slots.read().await;
        Ok(slots
            .values()
            .filter(|s| s.collection_id == collection_id && s.date >= from)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_worker(&self, name: &str) -> Result<Option<Worker>> {
        Ok(self.workers.read().await.get(name).cloned())
    }

    async fn put_worker(&self, worker: &Worker) -> Result<()> {
        self.workers
            .write()
            .await
            .insert(worker.name.clone(), worker.clone());
        Ok(())
    }

    async fn list_workers(&self) -> Result<Vec<Worker>> {
        Ok(self.workers.read().await.values().cloned().collect())
    }

    async fn find_worker_by_messaging_id(&self, messaging_id: &str) -> Result<Option<Worker>> {
        let workers = self.workers.read().await;
        Ok(workers
            .values()
            .find(|w| w.messaging_id.as_deref() == Some(messaging_id))
            .cloned())
    }

    async fn find_worker_by_login_token(&self, token: &str) -> Result<Option<Worker>> {
        let workers = self.workers.read().await;
        Ok(workers
            .values()
            .find(|w| w.login_token.as_deref() == Some(token))
            .cloned())
    }

    async fn create_request(&self, new: NewExchangeRequest) -> Result<ExchangeRequest> {
        let request = ExchangeRequest::new(new);
        self.requests
            .write()
            .await
            .insert(request.id, request.clone());
        Ok(request)
    }

    async fn get_request(&self, id: Uuid) -> Result<Option<ExchangeRequest>> {
        Ok(self.requests.read().await.get(&id).cloned())
    }

    async fn transition_request(
        &self,
        id: Uuid,
        from: ExchangeStatus,
        to: ExchangeStatus,
        reason: Option<&str>,
    ) -> Result<bool> {
        let mut requests = self.requests.write().await;
        let request = requests
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Exchange request {} not found", id)))?;
        if request.status != from {
            return Ok(false);
        }
        request.status = to;
        if let Some(reason) = reason {
            request.reason = Some(reason.to_string());
        }
        request.updated_at = Utc::now();
        Ok(true)
    }

    async fn commit_exchange(&self, request_id: Uuid, writes: &[SlotWrite]) -> Result<CommitOutcome> {
        let mut requests = self.requests.write().await;
        let mut slots = self.slots.write().await;

        let request = requests
            .get_mut(&request_id)
            .ok_or_else(|| AppError::NotFound(format!("Exchange request {} not found", request_id)))?;
        if request.status != ExchangeStatus::Pending {
            return Ok(CommitOutcome::Conflict);
        }

        for write in writes {
            let current = slots
                .get(&(write.collection_id.clone(), write.date))
                .map(|slot| slot.assignees(&write.duty_type));
            if current != Some(write.expected.as_slice()) {
                return Ok(CommitOutcome::Conflict);
            }
        }

        for write in writes {
            if let Some(slot) = slots.get_mut(&(write.collection_id.clone(), write.date)) {
                slot.assignments
                    .insert(write.duty_type.clone(), write.replacement.clone());
            }
        }
        request.status = ExchangeStatus::Executed;
        request.updated_at = Utc::now();

        Ok(CommitOutcome::Committed)
    }

    async fn record_usage(&self, worker: &str, month: &str, action: UsageAction) -> Result<()> {
        *self
            .usage
            .write()
            .await
            .entry((worker.to_string(), month.to_string(), action))
            .or_default() += 1;
        Ok(())
    }

    async fn usage(&self, worker: &str, month: &str) -> Result<BTreeMap<UsageAction, i64>> {
        Ok(self
            .usage
            .read()
            .await
            .iter()
            .filter(|((w, m, _), _)| w == worker && m == month)
            .map(|((_, _, action), count)| (*action, *count))
            .collect())
    }
}
