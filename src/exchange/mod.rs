//! Shift exchange workflow
//!
//! Candidate discovery, the request lifecycle and the guarded execution
//! step that rewrites the schedule.

pub mod advisor;
pub mod candidates;
pub mod engine;
pub mod manager;
pub mod request;
pub mod token;

pub use advisor::{ConflictAdvisor, SameWeekConflict};
pub use candidates::{Candidate, CandidateFinder};
pub use engine::ExecutionEngine;
pub use manager::{ExchangeEvent, ExchangeManager};
pub use request::{ExchangeKind, ExchangeRequest, ExchangeStatus, NewExchangeRequest};
pub use token::ActionToken;

use crate::error::AppError;

/// Failures of one exchange step
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("{0} not found")]
    NotFound(String),

    /// Respondent has no messaging identity
    #[error("{0} is not reachable")]
    Unreachable(String),

    /// Execution found the schedule changed; the request is now rejected
    #[error("exchange refused: {reason}")]
    StaleState {
        request: Box<ExchangeRequest>,
        reason: String,
    },

    /// The request already left `Pending`
    #[error("request already {}: {message}", .status.as_str())]
    AlreadyTerminal {
        status: ExchangeStatus,
        message: &'static str,
    },

    #[error("unrecognized token: {0:?}")]
    UnrecognizedToken(String),

    #[error(transparent)]
    Store(#[from] AppError),
}

pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;
