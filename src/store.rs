//! SQLite store for workers, schedule slots and exchange requests

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::exchange::request::{ExchangeRequest, ExchangeStatus, NewExchangeRequest};
use crate::models::{DutyCollection, ScheduleSlot, SlotDate, UsageAction, Worker};
use crate::repository::{CommitOutcome, ScheduleRepository, SlotWrite};

/// Database store
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Apply pending migrations from `./migrations`
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn slot_exists(&self, collection_id: &str, date: SlotDate) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM slots WHERE collection_id = ? AND slot_date = ?
            "#,
        )
        .bind(collection_id)
        .bind(date.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }
}

#[async_trait]
impl ScheduleRepository for Store {
    // Collection operations

    async fn get_collection(&self, id: &str) -> Result<Option<DutyCollection>> {
        let row = sqlx::query_as::<_, CollectionRow>(
            r#"
            SELECT id, name, emoji, duty_types
            FROM collections
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_collections(&self) -> Result<Vec<DutyCollection>> {
        let rows = sqlx::query_as::<_, CollectionRow>(
            r#"
            SELECT id, name, emoji, duty_types
            FROM collections
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    async fn put_collection(&self, collection: &DutyCollection) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO collections (id, name, emoji, duty_types)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                emoji = excluded.emoji,
                duty_types = excluded.duty_types
            "#,
        )
        .bind(&collection.id)
        .bind(&collection.name)
        .bind(&collection.emoji)
        .bind(to_json(&collection.duty_types)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // Slot operations

    async fn get_slot(&self, collection_id: &str, date: SlotDate) -> Result<Option<ScheduleSlot>> {
        if !self.slot_exists(collection_id, date).await? {
            return Ok(None);
        }

        let rows = sqlx::query_as::<_, DutyRow>(
            r#"
            SELECT slot_date, duty_type, assignees
            FROM slot_duties
            WHERE collection_id = ? AND slot_date = ?
            "#,
        )
        .bind(collection_id)
        .bind(date.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut slot = ScheduleSlot::new(collection_id, date);
        for row in rows {
            slot.assignments
                .insert(row.duty_type, from_json(&row.assignees, "assignees")?);
        }
        Ok(Some(slot))
    }

    async fn put_slot(&self, slot: &ScheduleSlot) -> Result<()> {
        let date = slot.date.to_string();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO slots (collection_id, slot_date) VALUES (?, ?)
            "#,
        )
        .bind(&slot.collection_id)
        .bind(&date)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            DELETE FROM slot_duties WHERE collection_id = ? AND slot_date = ?
            "#,
        )
        .bind(&slot.collection_id)
        .bind(&date)
        .execute(&mut *tx)
        .await?;

        for (duty_type, names) in &slot.assignments {
            sqlx::query(
                r#"
                INSERT INTO slot_duties (collection_id, slot_date, duty_type, assignees)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&slot.collection_id)
            .bind(&date)
            .bind(duty_type)
            .bind(to_json(names)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn update_slot_duties(
        &self,
        collection_id: &str,
        date: SlotDate,
        changes: &BTreeMap<String, Vec<String>>,
    ) -> Result<()> {
        if !self.slot_exists(collection_id, date).await? {
            return Err(AppError::NotFound(format!(
                "Slot {} {} not found",
                collection_id, date
            )));
        }

        let mut tx = self.pool.begin().await?;
        for (duty_type, names) in changes {
            sqlx::query(
                r#"
                INSERT INTO slot_duties (collection_id, slot_date, duty_type, assignees)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(collection_id, slot_date, duty_type) DO UPDATE SET
                    assignees = excluded.assignees
                "#,
            )
            .bind(collection_id)
            .bind(date.to_string())
            .bind(duty_type)
            .bind(to_json(names)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn upcoming_slots(
        &self,
        collection_id: &str,
        from: SlotDate,
        limit: usize,
    ) -> Result<Vec<ScheduleSlot>> {
        let dates: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT slot_date
            FROM slots
            WHERE collection_id = ? AND slot_date >= ?
            ORDER BY slot_date ASC
            LIMIT ?
            "#,
        )
        .bind(collection_id)
        .bind(from.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let Some(last) = dates.last() else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query_as::<_, DutyRow>(
            r#"
            SELECT slot_date, duty_type, assignees
            FROM slot_duties
            WHERE collection_id = ? AND slot_date >= ? AND slot_date <= ?
            "#,
        )
        .bind(collection_id)
        .bind(from.to_string())
        .bind(last)
        .fetch_all(&self.pool)
        .await?;

        let mut slots = BTreeMap::new();
        for date in &dates {
            slots.insert(date.clone(), ScheduleSlot::new(collection_id, parse_date(date)?));
        }
        for row in rows {
            if let Some(slot) = slots.get_mut(&row.slot_date) {
                slot.assignments
                    .insert(row.duty_type, from_json(&row.assignees, "assignees")?);
            }
        }

        Ok(slots.into_values().collect())
    }

    // Worker operations

    async fn get_worker(&self, name: &str) -> Result<Option<Worker>> {
        let row = sqlx::query_as::<_, WorkerRow>(
            r#"
            SELECT name, messaging_id, duties, reminder_days, login_token
            FROM workers
            WHERE name = ?
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn put_worker(&self, worker: &Worker) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workers (name, messaging_id, duties, reminder_days, login_token)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                messaging_id = excluded.messaging_id,
                duties = excluded.duties,
                reminder_days = excluded.reminder_days,
                login_token = excluded.login_token
            "#,
        )
        .bind(&worker.name)
        .bind(&worker.messaging_id)
        .bind(to_json(&worker.duties)?)
        .bind(to_json(&worker.reminder_days)?)
        .bind(&worker.login_token)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_workers(&self) -> Result<Vec<Worker>> {
        let rows = sqlx::query_as::<_, WorkerRow>(
            r#"
            SELECT name, messaging_id, duties, reminder_days, login_token
            FROM workers
            ORDER BY name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    async fn find_worker_by_messaging_id(&self, messaging_id: &str) -> Result<Option<Worker>> {
        let row = sqlx::query_as::<_, WorkerRow>(
            r#"
            SELECT name, messaging_id, duties, reminder_days, login_token
            FROM workers
            WHERE messaging_id = ?
            LIMIT 1
            "#,
        )
        .bind(messaging_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn find_worker_by_login_token(&self, token: &str) -> Result<Option<Worker>> {
        let row = sqlx::query_as::<_, WorkerRow>(
            r#"
            SELECT name, messaging_id, duties, reminder_days, login_token
            FROM workers
            WHERE login_token = ?
            LIMIT 1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    // Exchange request operations

    async fn create_request(&self, new: NewExchangeRequest) -> Result<ExchangeRequest> {
        let request = ExchangeRequest::new(new);

        sqlx::query(
            r#"
            INSERT INTO exchange_requests
                (id, kind, requester, respondent, collection_id, duty_type,
                 requester_date, respondent_date, status, reason, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(request.id.to_string())
        .bind(request.kind.as_str())
        .bind(&request.requester)
        .bind(&request.respondent)
        .bind(&request.collection_id)
        .bind(&request.duty_type)
        .bind(request.requester_date.to_string())
        .bind(request.respondent_date.map(|d| d.to_string()))
        .bind(request.status.as_str())
        .bind(&request.reason)
        .bind(request.created_at)
        .bind(request.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(request)
    }

    async fn get_request(&self, id: Uuid) -> Result<Option<ExchangeRequest>> {
        let row = sqlx::query_as::<_, RequestRow>(
            r#"
            SELECT id, kind, requester, respondent, collection_id, duty_type,
                   requester_date, respondent_date, status, reason, created_at, updated_at
            FROM exchange_requests
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn transition_request(
        &self,
        id: Uuid,
        from: ExchangeStatus,
        to: ExchangeStatus,
        reason: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE exchange_requests
            SET status = ?, reason = COALESCE(?, reason), updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(to.as_str())
        .bind(reason)
        .bind(Utc::now())
        .bind(id.to_string())
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        match self.get_request(id).await? {
            Some(_) => Ok(false),
            None => Err(AppError::NotFound(format!("Exchange request {} not found", id))),
        }
    }

    async fn commit_exchange(&self, request_id: Uuid, writes: &[SlotWrite]) -> Result<CommitOutcome> {
        let mut tx = self.pool.begin().await?;

        let status: Option<String> = sqlx::query_scalar(
            r#"
            SELECT status FROM exchange_requests WHERE id = ?
            "#,
        )
        .bind(request_id.to_string())
        .fetch_optional(&mut *tx)
        .await?;

        match status {
            None => {
                return Err(AppError::NotFound(format!(
                    "Exchange request {} not found",
                    request_id
                )))
            }
            Some(s) if s != ExchangeStatus::Pending.as_str() => {
                tx.rollback().await?;
                return Ok(CommitOutcome::Conflict);
            }
            Some(_) => {}
        }

        for write in writes {
            let result = sqlx::query(
                r#"
                UPDATE slot_duties
                SET assignees = ?
                WHERE collection_id = ? AND slot_date = ? AND duty_type = ? AND assignees = ?
                "#,
            )
            .bind(to_json(&write.replacement)?)
            .bind(&write.collection_id)
            .bind(write.date.to_string())
            .bind(&write.duty_type)
            .bind(to_json(&write.expected)?)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() != 1 {
                tx.rollback().await?;
                return Ok(CommitOutcome::Conflict);
            }
        }

        let result = sqlx::query(
            r#"
            UPDATE exchange_requests
            SET status = ?, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(ExchangeStatus::Executed.as_str())
        .bind(Utc::now())
        .bind(request_id.to_string())
        .bind(ExchangeStatus::Pending.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(CommitOutcome::Conflict);
        }

        tx.commit().await?;
        Ok(CommitOutcome::Committed)
    }

    // Usage statistics

    async fn record_usage(&self, worker: &str, month: &str, action: UsageAction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO usage_counts (worker, month, action, count)
            VALUES (?, ?, ?, 1)
            ON CONFLICT(worker, month, action) DO UPDATE SET count = count + 1
            "#,
        )
        .bind(worker)
        .bind(month)
        .bind(action.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn usage(&self, worker: &str, month: &str) -> Result<BTreeMap<UsageAction, i64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT action, count
            FROM usage_counts
            WHERE worker = ? AND month = ?
            "#,
        )
        .bind(worker)
        .bind(month)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(action, count)| {
                action
                    .parse::<UsageAction>()
                    .map(|action| (action, count))
                    .map_err(AppError::Internal)
            })
            .collect()
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| AppError::Internal(format!("Invalid JSON value: {}", e)))
}

fn from_json<T: DeserializeOwned>(raw: &str, column: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| AppError::Internal(format!("Invalid {} column: {}", column, e)))
}

fn parse_date(raw: &str) -> Result<SlotDate> {
    raw.parse()
        .map_err(|e| AppError::Internal(format!("Invalid date: {}", e)))
}

// Internal row types for sqlx

#[derive(sqlx::FromRow)]
struct CollectionRow {
    id: String,
    name: String,
    emoji: Option<String>,
    duty_types: String,
}

impl TryFrom<CollectionRow> for DutyCollection {
    type Error = AppError;

    fn try_from(row: CollectionRow) -> Result<Self> {
        Ok(DutyCollection {
            id: row.id,
            name: row.name,
            emoji: row.emoji,
            duty_types: from_json(&row.duty_types, "duty_types")?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct WorkerRow {
    name: String,
    messaging_id: Option<String>,
    duties: String,
    reminder_days: String,
    login_token: Option<String>,
}

impl TryFrom<WorkerRow> for Worker {
    type Error = AppError;

    fn try_from(row: WorkerRow) -> Result<Self> {
        Ok(Worker {
            name: row.name,
            messaging_id: row.messaging_id,
            duties: from_json(&row.duties, "duties")?,
            reminder_days: from_json(&row.reminder_days, "reminder_days")?,
            login_token: row.login_token,
        })
    }
}

#[derive(sqlx::FromRow)]
struct DutyRow {
    slot_date: String,
    duty_type: String,
    assignees: String,
}

#[derive(sqlx::FromRow)]
struct RequestRow {
    id: String,
    kind: String,
    requester: String,
    respondent: String,
    collection_id: String,
    duty_type: String,
    requester_date: String,
    respondent_date: Option<String>,
    status: String,
    reason: Option<String>,
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
}

impl TryFrom<RequestRow> for ExchangeRequest {
    type Error = AppError;

    fn try_from(row: RequestRow) -> Result<Self> {
        Ok(ExchangeRequest {
            id: Uuid::parse_str(&row.id)
                .map_err(|e| AppError::Internal(format!("Invalid UUID: {}", e)))?,
            kind: row
                .kind
                .parse()
                .map_err(|e| AppError::Internal(format!("Invalid kind: {}", e)))?,
            requester: row.requester,
            respondent: row.respondent,
            collection_id: row.collection_id,
            duty_type: row.duty_type,
            requester_date: parse_date(&row.requester_date)?,
            respondent_date: row.respondent_date.as_deref().map(parse_date).transpose()?,
            status: row
                .status
                .parse()
                .map_err(|e| AppError::Internal(format!("Invalid status: {}", e)))?,
            reason: row.reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> Store {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory database");

        let store = Store::new(pool);
        store.migrate().await.expect("Failed to run migrations");
        store
    }

    fn date(d: u32) -> SlotDate {
        SlotDate::from_ymd(2025, 3, d).unwrap()
    }

    fn write(date: SlotDate, expected: &[&str], replacement: &[&str]) -> SlotWrite {
        SlotWrite {
            collection_id: "sunday".to_string(),
            date,
            duty_type: "usher".to_string(),
            expected: expected.iter().map(|s| s.to_string()).collect(),
            replacement: replacement.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_put_and_get_collection() {
        let store = setup_test_db().await;
        let collection =
            DutyCollection::new("sunday", "Sunday Service").with_duty_types(["usher", "sound"]);
        store.put_collection(&collection).await.unwrap();

        let fetched = store.get_collection("sunday").await.unwrap().unwrap();
        assert_eq!(fetched, collection);
        assert!(store.get_collection("missing").await.unwrap().is_none());
        assert_eq!(store.list_collections().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_put_and_get_slot() {
        let store = setup_test_db().await;
        let slot = ScheduleSlot::new("sunday", date(2))
            .with_assignees("usher", ["A", "B", "A"])
            .with_assignees("sound", ["C"]);
        store.put_slot(&slot).await.unwrap();

        let fetched = store.get_slot("sunday", date(2)).await.unwrap().unwrap();
        assert_eq!(fetched, slot);
        assert!(store.get_slot("sunday", date(9)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_slot_replaces_duties() {
        let store = setup_test_db().await;
        store
            .put_slot(&ScheduleSlot::new("sunday", date(2)).with_assignees("usher", ["A"]))
            .await
            .unwrap();
        store
            .put_slot(&ScheduleSlot::new("sunday", date(2)).with_assignees("sound", ["B"]))
            .await
            .unwrap();

        let fetched = store.get_slot("sunday", date(2)).await.unwrap().unwrap();
        assert!(fetched.assignees("usher").is_empty());
        assert_eq!(fetched.assignees("sound"), ["B"]);
    }

    #[tokio::test]
    async fn test_update_slot_duties_is_partial() {
        let store = setup_test_db().await;
        let slot = ScheduleSlot::new("sunday", date(2))
            .with_assignees("usher", ["A"])
            .with_assignees("sound", ["B"]);
        store.put_slot(&slot).await.unwrap();

        let changes = BTreeMap::from([("usher".to_string(), vec!["C".to_string()])]);
        store
            .update_slot_duties("sunday", date(2), &changes)
            .await
            .unwrap();

        let fetched = store.get_slot("sunday", date(2)).await.unwrap().unwrap();
        assert_eq!(fetched.assignees("usher"), ["C"]);
        assert_eq!(fetched.assignees("sound"), ["B"]);
    }

    #[tokio::test]
    async fn test_update_slot_duties_not_found() {
        let store = setup_test_db().await;
        let result = store
            .update_slot_duties("sunday", date(2), &BTreeMap::new())
            .await;
        assert!(matches!(result.unwrap_err(), AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_upcoming_slots() {
        let store = setup_test_db().await;
        for d in [23, 2, 16, 9] {
            let slot = ScheduleSlot::new("sunday", date(d)).with_assignees("usher", [format!("W{}", d)]);
            store.put_slot(&slot).await.unwrap();
        }
        store
            .put_slot(&ScheduleSlot::new("youth", date(10)))
            .await
            .unwrap();

        let slots = store.upcoming_slots("sunday", date(3), 2).await.unwrap();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].date, date(9));
        assert_eq!(slots[0].assignees("usher"), ["W9"]);
        assert_eq!(slots[1].date, date(16));

        let none = store.upcoming_slots("sunday", date(24), 26).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_worker_round_trip() {
        let store = setup_test_db().await;
        let mut worker = Worker::new("A")
            .with_duty("sunday", "usher")
            .with_duty("youth", "sound")
            .with_messaging_id("U1")
            .with_login_token("Abc123DEF456GHiJ");
        worker.reminder_days[2] = true;
        store.put_worker(&worker).await.unwrap();

        assert_eq!(store.get_worker("A").await.unwrap().unwrap(), worker);
        assert_eq!(
            store.find_worker_by_messaging_id("U1").await.unwrap().unwrap().name,
            "A"
        );
        assert_eq!(
            store
                .find_worker_by_login_token("Abc123DEF456GHiJ")
                .await
                .unwrap()
                .unwrap()
                .name,
            "A"
        );
        assert!(store.find_worker_by_messaging_id("U2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_worker_updates() {
        let store = setup_test_db().await;
        store.put_worker(&Worker::new("A")).await.unwrap();
        store
            .put_worker(&Worker::new("A").with_messaging_id("U9"))
            .await
            .unwrap();

        let workers = store.list_workers().await.unwrap();
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].messaging_id.as_deref(), Some("U9"));
    }

    #[tokio::test]
    async fn test_create_and_get_request() {
        let store = setup_test_db().await;
        let created = store
            .create_request(NewExchangeRequest::swap(
                "A", "B", "sunday", "usher", date(2), date(9),
            ))
            .await
            .unwrap();

        let fetched = store.get_request(created.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.status, ExchangeStatus::Pending);
        assert_eq!(fetched.respondent_date, Some(date(9)));
        assert!(store.get_request(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transition_request() {
        let store = setup_test_db().await;
        let created = store
            .create_request(NewExchangeRequest::substitute("A", "B", "sunday", "usher", date(2)))
            .await
            .unwrap();

        assert!(store
            .transition_request(
                created.id,
                ExchangeStatus::Pending,
                ExchangeStatus::Rejected,
                Some("declined by counterpart"),
            )
            .await
            .unwrap());
        assert!(!store
            .transition_request(created.id, ExchangeStatus::Pending, ExchangeStatus::Rejected, None)
            .await
            .unwrap());

        let fetched = store.get_request(created.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, ExchangeStatus::Rejected);
        assert_eq!(fetched.reason.as_deref(), Some("declined by counterpart"));

        let missing = store
            .transition_request(Uuid::new_v4(), ExchangeStatus::Pending, ExchangeStatus::Rejected, None)
            .await;
        assert!(matches!(missing.unwrap_err(), AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_commit_exchange() {
        let store = setup_test_db().await;
        store
            .put_slot(&ScheduleSlot::new("sunday", date(2)).with_assignees("usher", ["A", "C"]))
            .await
            .unwrap();
        store
            .put_slot(&ScheduleSlot::new("sunday", date(9)).with_assignees("usher", ["B"]))
            .await
            .unwrap();
        let request = store
            .create_request(NewExchangeRequest::swap(
                "A", "B", "sunday", "usher", date(2), date(9),
            ))
            .await
            .unwrap();

        let writes = [
            write(date(2), &["A", "C"], &["B", "C"]),
            write(date(9), &["B"], &["A"]),
        ];
        let outcome = store.commit_exchange(request.id, &writes).await.unwrap();
        assert_eq!(outcome, CommitOutcome::Committed);

        let first = store.get_slot("sunday", date(2)).await.unwrap().unwrap();
        let second = store.get_slot("sunday", date(9)).await.unwrap().unwrap();
        assert_eq!(first.assignees("usher"), ["B", "C"]);
        assert_eq!(second.assignees("usher"), ["A"]);

        let fetched = store.get_request(request.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, ExchangeStatus::Executed);

        // Second commit of the same request is refused
        let again = store.commit_exchange(request.id, &writes).await.unwrap();
        assert_eq!(again, CommitOutcome::Conflict);
    }

    #[tokio::test]
    async fn test_commit_exchange_conflict_rolls_back() {
        let store = setup_test_db().await;
        store
            .put_slot(&ScheduleSlot::new("sunday", date(2)).with_assignees("usher", ["A"]))
            .await
            .unwrap();
        store
            .put_slot(&ScheduleSlot::new("sunday", date(9)).with_assignees("usher", ["X"]))
            .await
            .unwrap();
        let request = store
            .create_request(NewExchangeRequest::swap(
                "A", "B", "sunday", "usher", date(2), date(9),
            ))
            .await
            .unwrap();

        let writes = [
            write(date(2), &["A"], &["B"]),
            write(date(9), &["B"], &["A"]),
        ];
        let outcome = store.commit_exchange(request.id, &writes).await.unwrap();
        assert_eq!(outcome, CommitOutcome::Conflict);

        // First write must have been rolled back
        let first = store.get_slot("sunday", date(2)).await.unwrap().unwrap();
        assert_eq!(first.assignees("usher"), ["A"]);
        let fetched = store.get_request(request.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, ExchangeStatus::Pending);
    }

    #[tokio::test]
    async fn test_commit_exchange_unknown_request() {
        let store = setup_test_db().await;
        let result = store.commit_exchange(Uuid::new_v4(), &[]).await;
        assert!(matches!(result.unwrap_err(), AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_record_usage_increments() {
        let store = setup_test_db().await;

        store.record_usage("A", "2025.03", UsageAction::WeekSchedule).await.unwrap();
        store.record_usage("A", "2025.03", UsageAction::WeekSchedule).await.unwrap();
        store.record_usage("A", "2025.03", UsageAction::RequestReceived).await.unwrap();
        store.record_usage("A", "2025.04", UsageAction::WeekSchedule).await.unwrap();

        let march = store.usage("A", "2025.03").await.unwrap();
        assert_eq!(march[&UsageAction::WeekSchedule], 2);
        assert_eq!(march[&UsageAction::RequestReceived], 1);
        assert_eq!(march.len(), 2);

        let april = store.usage("A", "2025.04").await.unwrap();
        assert_eq!(april[&UsageAction::WeekSchedule], 1);
        assert!(store.usage("B", "2025.03").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_request_row_try_from_invalid_uuid() {
        let row = RequestRow {
            id: "not-a-uuid".to_string(),
            kind: "swap".to_string(),
            requester: "A".to_string(),
            respondent: "B".to_string(),
            collection_id: "sunday".to_string(),
            duty_type: "usher".to_string(),
            requester_date: "2025.03.02".to_string(),
            respondent_date: Some("2025.03.09".to_string()),
            status: "pending".to_string(),
            reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let result: Result<ExchangeRequest> = row.try_into();
        assert!(matches!(result.unwrap_err(), AppError::Internal(_)));
    }

    #[tokio::test]
    async fn test_request_row_try_from_invalid_status() {
        let row = RequestRow {
            id: Uuid::new_v4().to_string(),
            kind: "substitute".to_string(),
            requester: "A".to_string(),
            respondent: "B".to_string(),
            collection_id: "sunday".to_string(),
            duty_type: "usher".to_string(),
            requester_date: "2025.03.02".to_string(),
            respondent_date: None,
            status: "accepted".to_string(),
            reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let result: Result<ExchangeRequest> = row.try_into();
        assert!(result.is_err());
    }
}
