//! Exchange requests
//!
//! One record per substitute or swap request. Records are never deleted;
//! they double as the audit trail of who asked whom for what.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::SlotDate;

/// Kind of exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeKind {
    /// Respondent takes over one occurrence of the requester's duty
    Substitute,
    /// Requester and respondent trade occurrences of the same duty type
    Swap,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Substitute => "substitute",
            ExchangeKind::Swap => "swap",
        }
    }

    /// Single-letter mode code used inside action tokens
    pub fn mode_code(&self) -> &'static str {
        match self {
            ExchangeKind::Substitute => "G",
            ExchangeKind::Swap => "S",
        }
    }

    pub fn from_mode_code(code: &str) -> Option<Self> {
        match code {
            "G" => Some(ExchangeKind::Substitute),
            "S" => Some(ExchangeKind::Swap),
            _ => None,
        }
    }
}

impl std::str::FromStr for ExchangeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "substitute" => Ok(ExchangeKind::Substitute),
            "swap" => Ok(ExchangeKind::Swap),
            _ => Err(format!("Invalid exchange kind: {}", s)),
        }
    }
}

/// Persisted status of an exchange request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeStatus {
    /// Waiting for the respondent
    Pending,
    /// Declined, or refused at execution time
    Rejected,
    /// Schedule was changed
    Executed,
}

impl ExchangeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeStatus::Pending => "pending",
            ExchangeStatus::Rejected => "rejected",
            ExchangeStatus::Executed => "executed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExchangeStatus::Rejected | ExchangeStatus::Executed)
    }
}

impl std::str::FromStr for ExchangeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExchangeStatus::Pending),
            "rejected" => Ok(ExchangeStatus::Rejected),
            "executed" => Ok(ExchangeStatus::Executed),
            _ => Err(format!("Invalid exchange status: {}", s)),
        }
    }
}

/// Fields supplied by the requester when a request is sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewExchangeRequest {
    pub kind: ExchangeKind,
    pub requester: String,
    pub respondent: String,
    pub collection_id: String,
    pub duty_type: String,
    pub requester_date: SlotDate,
    /// Present exactly when `kind` is `Swap`
    pub respondent_date: Option<SlotDate>,
}

impl NewExchangeRequest {
    pub fn substitute(
        requester: impl Into<String>,
        respondent: impl Into<String>,
        collection_id: impl Into<String>,
        duty_type: impl Into<String>,
        requester_date: SlotDate,
    ) -> Self {
        Self {
            kind: ExchangeKind::Substitute,
            requester: requester.into(),
            respondent: respondent.into(),
            collection_id: collection_id.into(),
            duty_type: duty_type.into(),
            requester_date,
            respondent_date: None,
        }
    }

    pub fn swap(
        requester: impl Into<String>,
        respondent: impl Into<String>,
        collection_id: impl Into<String>,
        duty_type: impl Into<String>,
        requester_date: SlotDate,
        respondent_date: SlotDate,
    ) -> Self {
        Self {
            kind: ExchangeKind::Swap,
            requester: requester.into(),
            respondent: respondent.into(),
            collection_id: collection_id.into(),
            duty_type: duty_type.into(),
            requester_date,
            respondent_date: Some(respondent_date),
        }
    }
}

/// A persisted exchange request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRequest {
    pub id: Uuid,
    pub kind: ExchangeKind,
    pub requester: String,
    pub respondent: String,
    pub collection_id: String,
    pub duty_type: String,
    pub requester_date: SlotDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub respondent_date: Option<SlotDate>,
    pub status: ExchangeStatus,
    /// Why the request ended up rejected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExchangeRequest {
    /// Materialize a pending request with a fresh id
    pub fn new(new: NewExchangeRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind: new.kind,
            requester: new.requester,
            respondent: new.respondent,
            collection_id: new.collection_id,
            duty_type: new.duty_type,
            requester_date: new.requester_date,
            respondent_date: new.respondent_date,
            status: ExchangeStatus::Pending,
            reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ExchangeStatus::Pending
    }

    /// Move to `Rejected`
    pub fn reject(&mut self, reason: impl Into<String>) -> Result<(), String> {
        if self.status != ExchangeStatus::Pending {
            return Err(format!(
                "Cannot reject exchange request with status: {}",
                self.status.as_str()
            ));
        }
        self.status = ExchangeStatus::Rejected;
        self.reason = Some(reason.into());
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Move to `Executed`
    pub fn mark_executed(&mut self) -> Result<(), String> {
        if self.status != ExchangeStatus::Pending {
            return Err(format!(
                "Cannot execute exchange request with status: {}",
                self.status.as_str()
            ));
        }
        self.status = ExchangeStatus::Executed;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// One-line description used in prompts and notifications
    pub fn describe(&self, collection_name: &str) -> String {
        match (self.kind, self.respondent_date) {
            (ExchangeKind::Swap, Some(respondent_date)) => format!(
                "{} {} on {} swapped with {}'s {} ({})",
                self.requester,
                self.duty_type,
                self.requester_date.short(),
                self.respondent,
                respondent_date.short(),
                collection_name
            ),
            _ => format!(
                "{} covering {}'s {} on {} ({})",
                self.respondent,
                self.requester,
                self.duty_type,
                self.requester_date.short(),
                collection_name
            ),
        }
    }
}
