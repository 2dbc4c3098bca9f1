//! Finding workers eligible to receive an exchange request

use std::sync::Arc;

use super::request::ExchangeKind;
use super::token::{ActionToken, AmbiguousSwap, SubstituteProposal, SwapProposal};
use crate::error::Result;
use crate::models::SlotDate;
use crate::repository::ScheduleRepository;

/// One eligible counterpart
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    /// A worker who can cover the requester's date
    Substitute { worker: String },
    /// A date whose occupants could trade with the requester
    Swap {
        date: SlotDate,
        /// Distinct assignees in slot order
        occupants: Vec<String>,
    },
}

impl Candidate {
    /// Whether a single respondent still has to be picked
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Candidate::Swap { occupants, .. } if occupants.len() > 1)
    }

    pub fn label(&self) -> String {
        match self {
            Candidate::Substitute { worker } => worker.clone(),
            Candidate::Swap { date, occupants } => {
                format!("{} {}", date.short(), occupants.join("/"))
            }
        }
    }

    /// Token for the button offering this candidate to `requester`
    pub fn token(
        &self,
        requester: &str,
        requester_date: SlotDate,
        collection_id: &str,
        duty_type: &str,
    ) -> ActionToken {
        match self {
            Candidate::Substitute { worker } => ActionToken::ProposeSubstitute(SubstituteProposal {
                respondent: worker.clone(),
                requester_date,
                collection_id: collection_id.to_string(),
                duty_type: duty_type.to_string(),
                requester: requester.to_string(),
            }),
            Candidate::Swap { date, occupants } if occupants.len() > 1 => {
                ActionToken::Disambiguate(AmbiguousSwap {
                    target_date: *date,
                    occupants: occupants.clone(),
                    requester_date,
                    collection_id: collection_id.to_string(),
                    duty_type: duty_type.to_string(),
                    requester: requester.to_string(),
                })
            }
            Candidate::Swap { date, occupants } => ActionToken::ProposeSwap(SwapProposal {
                target_date: *date,
                respondent: occupants.first().cloned().unwrap_or_default(),
                requester_date,
                collection_id: collection_id.to_string(),
                duty_type: duty_type.to_string(),
                requester: requester.to_string(),
            }),
        }
    }
}

pub struct CandidateFinder {
    repo: Arc<dyn ScheduleRepository>,
    lookahead: usize,
}

impl CandidateFinder {
    pub fn new(repo: Arc<dyn ScheduleRepository>, lookahead: usize) -> Self {
        Self { repo, lookahead }
    }

    /// Eligible counterparts for `requester`'s `duty_type` in `collection_id`
    ///
    /// Substitutes are reachable workers holding the duty, by name. Swap
    /// candidates are upcoming dates (from `today`, at most `lookahead` of
    /// them, skipping `exclude_date`) where the requester is not on the duty
    /// and somebody else is, in date order. The requester is never a
    /// candidate.
    pub async fn find(
        &self,
        requester: &str,
        collection_id: &str,
        duty_type: &str,
        kind: ExchangeKind,
        exclude_date: SlotDate,
        today: SlotDate,
    ) -> Result<Vec<Candidate>> {
        match kind {
            ExchangeKind::Substitute => self.substitutes(requester, collection_id, duty_type).await,
            ExchangeKind::Swap => {
                self.swap_dates(requester, collection_id, duty_type, exclude_date, today)
                    .await
            }
        }
    }

    async fn substitutes(
        &self,
        requester: &str,
        collection_id: &str,
        duty_type: &str,
    ) -> Result<Vec<Candidate>> {
        let workers = self.repo.list_workers().await?;
        Ok(workers
            .into_iter()
            .filter(|w| w.name != requester && w.holds(collection_id, duty_type) && w.is_reachable())
            .map(|w| Candidate::Substitute { worker: w.name })
            .collect())
    }

    async fn swap_dates(
        &self,
        requester: &str,
        collection_id: &str,
        duty_type: &str,
        exclude_date: SlotDate,
        today: SlotDate,
    ) -> Result<Vec<Candidate>> {
        let slots = self
            .repo
            .upcoming_slots(collection_id, today, self.lookahead)
            .await?;

        let candidates = slots
            .into_iter()
            .filter(|slot| slot.date != exclude_date && !slot.is_assigned(duty_type, requester))
            .filter_map(|slot| {
                let mut occupants: Vec<String> = Vec::new();
                for name in slot.assignees(duty_type) {
                    if name != requester && !occupants.contains(name) {
                        occupants.push(name.clone());
                    }
                }
                (!occupants.is_empty()).then_some(Candidate::Swap {
                    date: slot.date,
                    occupants,
                })
            })
            .collect();

        Ok(candidates)
    }
}
