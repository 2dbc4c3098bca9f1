//! Action tokens carried by chat buttons
//!
//! Each button payload is a two-character prefix followed by positional,
//! `+`-delimited fields. The token is the only state carried between the
//! steps of a conversation, so parsing is strict: wrong prefix, wrong field
//! count, empty fields or malformed dates all make the token unrecognized.

use std::fmt;
use uuid::Uuid;

use super::request::{ExchangeKind, NewExchangeRequest};
use crate::models::SlotDate;

const FIELD_SEP: char = '+';
const OCCUPANT_SEP: char = '/';

/// Whether `value` can travel as one token field
///
/// Names and ids end up inside tokens, so they must be non-empty and free
/// of the field and occupant separators.
pub fn is_token_safe(value: &str) -> bool {
    !value.trim().is_empty() && !value.contains(&[FIELD_SEP, OCCUPANT_SEP][..])
}

/// A swap target chosen down to a single respondent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapProposal {
    pub target_date: SlotDate,
    pub respondent: String,
    pub requester_date: SlotDate,
    pub collection_id: String,
    pub duty_type: String,
    pub requester: String,
}

impl SwapProposal {
    pub fn to_request(&self) -> NewExchangeRequest {
        NewExchangeRequest::swap(
            &self.requester,
            &self.respondent,
            &self.collection_id,
            &self.duty_type,
            self.requester_date,
            self.target_date,
        )
    }

    fn fields(&self) -> Vec<String> {
        vec![
            self.target_date.to_string(),
            self.respondent.clone(),
            self.requester_date.to_string(),
            self.collection_id.clone(),
            self.duty_type.clone(),
            self.requester.clone(),
        ]
    }

    fn from_fields(fields: &[&str]) -> Result<Self, String> {
        let [target_date, respondent, requester_date, collection_id, duty_type, requester] =
            fixed::<6>(fields)?;
        Ok(Self {
            target_date: target_date.parse()?,
            respondent: respondent.to_string(),
            requester_date: requester_date.parse()?,
            collection_id: collection_id.to_string(),
            duty_type: duty_type.to_string(),
            requester: requester.to_string(),
        })
    }
}

/// A substitute request aimed at one respondent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubstituteProposal {
    pub respondent: String,
    pub requester_date: SlotDate,
    pub collection_id: String,
    pub duty_type: String,
    pub requester: String,
}

impl SubstituteProposal {
    pub fn to_request(&self) -> NewExchangeRequest {
        NewExchangeRequest::substitute(
            &self.requester,
            &self.respondent,
            &self.collection_id,
            &self.duty_type,
            self.requester_date,
        )
    }

    fn fields(&self) -> Vec<String> {
        vec![
            self.respondent.clone(),
            self.requester_date.to_string(),
            self.collection_id.clone(),
            self.duty_type.clone(),
            self.requester.clone(),
        ]
    }

    fn from_fields(fields: &[&str]) -> Result<Self, String> {
        let [respondent, requester_date, collection_id, duty_type, requester] =
            fixed::<5>(fields)?;
        Ok(Self {
            respondent: respondent.to_string(),
            requester_date: requester_date.parse()?,
            collection_id: collection_id.to_string(),
            duty_type: duty_type.to_string(),
            requester: requester.to_string(),
        })
    }
}

/// A swap target date that still has several occupants to choose from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmbiguousSwap {
    pub target_date: SlotDate,
    pub occupants: Vec<String>,
    pub requester_date: SlotDate,
    pub collection_id: String,
    pub duty_type: String,
    pub requester: String,
}

impl AmbiguousSwap {
    /// Narrow to one occupant; `None` if `respondent` is not among them
    pub fn select(&self, respondent: &str) -> Option<SwapProposal> {
        self.occupants
            .iter()
            .any(|o| o == respondent)
            .then(|| SwapProposal {
                target_date: self.target_date,
                respondent: respondent.to_string(),
                requester_date: self.requester_date,
                collection_id: self.collection_id.clone(),
                duty_type: self.duty_type.clone(),
                requester: self.requester.clone(),
            })
    }
}

/// Every transition a button can trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionToken {
    /// `A*` duty type chosen, list own dates
    SelectDuty {
        kind: ExchangeKind,
        collection_id: String,
        duty_type: String,
    },
    /// `A&` own date chosen, list candidates
    SelectDate {
        kind: ExchangeKind,
        date: SlotDate,
        collection_id: String,
        duty_type: String,
        requester: String,
    },
    /// `B#` swap target has several occupants
    Disambiguate(AmbiguousSwap),
    /// `B&` swap target chosen, ask requester to confirm
    ProposeSwap(SwapProposal),
    /// `G#` substitute chosen, ask requester to confirm
    ProposeSubstitute(SubstituteProposal),
    /// `C&` requester confirmed the swap
    SendSwap(SwapProposal),
    /// `G&` requester confirmed the substitution
    SendSubstitute(SubstituteProposal),
    /// `D&` respondent agrees in principle
    RespondYes(Uuid),
    /// `E&` respondent declines
    RespondNo(Uuid),
    /// `F&` respondent commits
    FinalConfirm(Uuid),
    /// `C*` reminder day 1..=6 on or off
    ToggleReminder { day: u8, on: bool },
    /// `W&` show one collection's current schedule
    ViewSchedule { collection_id: String },
}

impl ActionToken {
    pub fn prefix(&self) -> &'static str {
        match self {
            ActionToken::SelectDuty { .. } => "A*",
            ActionToken::SelectDate { .. } => "A&",
            ActionToken::Disambiguate(_) => "B#",
            ActionToken::ProposeSwap(_) => "B&",
            ActionToken::ProposeSubstitute(_) => "G#",
            ActionToken::SendSwap(_) => "C&",
            ActionToken::SendSubstitute(_) => "G&",
            ActionToken::RespondYes(_) => "D&",
            ActionToken::RespondNo(_) => "E&",
            ActionToken::FinalConfirm(_) => "F&",
            ActionToken::ToggleReminder { .. } => "C*",
            ActionToken::ViewSchedule { .. } => "W&",
        }
    }

    fn fields(&self) -> Vec<String> {
        match self {
            ActionToken::SelectDuty {
                kind,
                collection_id,
                duty_type,
            } => vec![
                kind.mode_code().to_string(),
                collection_id.clone(),
                duty_type.clone(),
            ],
            ActionToken::SelectDate {
                kind,
                date,
                collection_id,
                duty_type,
                requester,
            } => vec![
                kind.mode_code().to_string(),
                date.to_string(),
                collection_id.clone(),
                duty_type.clone(),
                requester.clone(),
            ],
            ActionToken::Disambiguate(swap) => vec![
                swap.target_date.to_string(),
                swap.occupants.join(&OCCUPANT_SEP.to_string()),
                swap.requester_date.to_string(),
                swap.collection_id.clone(),
                swap.duty_type.clone(),
                swap.requester.clone(),
            ],
            ActionToken::ProposeSwap(p) | ActionToken::SendSwap(p) => p.fields(),
            ActionToken::ProposeSubstitute(p) | ActionToken::SendSubstitute(p) => p.fields(),
            ActionToken::RespondYes(id) | ActionToken::RespondNo(id) | ActionToken::FinalConfirm(id) => {
                vec![id.to_string()]
            }
            ActionToken::ToggleReminder { .. } => Vec::new(),
            ActionToken::ViewSchedule { collection_id } => vec![collection_id.clone()],
        }
    }
}

impl fmt::Display for ActionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let ActionToken::ToggleReminder { day, on } = self {
            return write!(f, "C*{}{}", day, if *on { 't' } else { 'f' });
        }
        write!(f, "{}{}", self.prefix(), self.fields().join(&FIELD_SEP.to_string()))
    }
}

impl std::str::FromStr for ActionToken {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let prefix = s
            .get(0..2)
            .ok_or_else(|| format!("Token too short: {:?}", s))?;
        let body = &s[2..];

        if prefix == "C*" {
            return parse_reminder(body);
        }

        let fields: Vec<&str> = body.split(FIELD_SEP).collect();
        if fields.iter().any(|f| f.is_empty()) {
            return Err(format!("Empty field in token: {:?}", s));
        }

        match prefix {
            "A*" => {
                let [mode, collection_id, duty_type] = fixed::<3>(&fields)?;
                Ok(ActionToken::SelectDuty {
                    kind: parse_mode(mode)?,
                    collection_id: collection_id.to_string(),
                    duty_type: duty_type.to_string(),
                })
            }
            "A&" => {
                let [mode, date, collection_id, duty_type, requester] = fixed::<5>(&fields)?;
                Ok(ActionToken::SelectDate {
                    kind: parse_mode(mode)?,
                    date: date.parse()?,
                    collection_id: collection_id.to_string(),
                    duty_type: duty_type.to_string(),
                    requester: requester.to_string(),
                })
            }
            "B#" => {
                let [target_date, occupants, requester_date, collection_id, duty_type, requester] =
                    fixed::<6>(&fields)?;
                let occupants: Vec<String> =
                    occupants.split(OCCUPANT_SEP).map(str::to_string).collect();
                if occupants.len() < 2 || occupants.iter().any(String::is_empty) {
                    return Err(format!("Ambiguous swap needs several occupants: {:?}", s));
                }
                Ok(ActionToken::Disambiguate(AmbiguousSwap {
                    target_date: target_date.parse()?,
                    occupants,
                    requester_date: requester_date.parse()?,
                    collection_id: collection_id.to_string(),
                    duty_type: duty_type.to_string(),
                    requester: requester.to_string(),
                }))
            }
            "B&" => Ok(ActionToken::ProposeSwap(SwapProposal::from_fields(&fields)?)),
            "C&" => Ok(ActionToken::SendSwap(SwapProposal::from_fields(&fields)?)),
            "G#" => Ok(ActionToken::ProposeSubstitute(SubstituteProposal::from_fields(&fields)?)),
            "G&" => Ok(ActionToken::SendSubstitute(SubstituteProposal::from_fields(&fields)?)),
            "D&" => Ok(ActionToken::RespondYes(parse_id(&fields)?)),
            "E&" => Ok(ActionToken::RespondNo(parse_id(&fields)?)),
            "F&" => Ok(ActionToken::FinalConfirm(parse_id(&fields)?)),
            "W&" => {
                let [collection_id] = fixed::<1>(&fields)?;
                Ok(ActionToken::ViewSchedule {
                    collection_id: collection_id.to_string(),
                })
            }
            _ => Err(format!("Unknown token prefix: {:?}", prefix)),
        }
    }
}

fn fixed<'a, const N: usize>(fields: &[&'a str]) -> Result<[&'a str; N], String> {
    <[&str; N]>::try_from(fields)
        .map_err(|_| format!("Expected {} fields, got {}", N, fields.len()))
}

fn parse_mode(mode: &str) -> Result<ExchangeKind, String> {
    ExchangeKind::from_mode_code(mode).ok_or_else(|| format!("Unknown mode: {:?}", mode))
}

fn parse_id(fields: &[&str]) -> Result<Uuid, String> {
    let [id] = fixed::<1>(fields)?;
    Uuid::parse_str(id).map_err(|e| format!("Invalid request id {:?}: {}", id, e))
}

fn parse_reminder(body: &str) -> Result<ActionToken, String> {
    let mut chars = body.chars();
    let (Some(day), Some(flag), None) = (chars.next(), chars.next(), chars.next()) else {
        return Err(format!("Invalid reminder token body: {:?}", body));
    };
    let day = match day.to_digit(10) {
        Some(d @ 1..=6) => d as u8,
        _ => return Err(format!("Invalid reminder day: {:?}", day)),
    };
    let on = match flag {
        't' => true,
        'f' => false,
        _ => return Err(format!("Invalid reminder flag: {:?}", flag)),
    };
    Ok(ActionToken::ToggleReminder { day, on })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(d: u32) -> SlotDate {
        SlotDate::from_ymd(2025, 3, d).unwrap()
    }

    #[test]
    fn test_token_safe_values() {
        assert!(is_token_safe("Mary Ann"));
        assert!(is_token_safe("youth-night"));
        assert!(!is_token_safe("Ann+Lee"));
        assert!(!is_token_safe("D/E"));
        assert!(!is_token_safe(""));
        assert!(!is_token_safe("  "));
    }

    fn swap() -> SwapProposal {
        SwapProposal {
            target_date: date(9),
            respondent: "B".to_string(),
            requester_date: date(2),
            collection_id: "sunday".to_string(),
            duty_type: "usher".to_string(),
            requester: "A".to_string(),
        }
    }

    #[test]
    fn test_encode_swap_proposal() {
        let token = ActionToken::ProposeSwap(swap());
        assert_eq!(token.to_string(), "B&2025.03.09+B+2025.03.02+sunday+usher+A");
    }

    #[test]
    fn test_encode_reminder() {
        let token = ActionToken::ToggleReminder { day: 3, on: false };
        assert_eq!(token.to_string(), "C*3f");
    }

    #[test]
    fn test_parse_every_prefix() {
        let id = Uuid::new_v4();
        let tokens = [
            "A*S+sunday+usher".to_string(),
            "A&G+2025.03.02+sunday+usher+A".to_string(),
            "B#2025.03.09+C/D+2025.03.02+sunday+usher+A".to_string(),
            "B&2025.03.09+C+2025.03.02+sunday+usher+A".to_string(),
            "C&2025.03.09+C+2025.03.02+sunday+usher+A".to_string(),
            "G#B+2025.03.02+sunday+usher+A".to_string(),
            "G&B+2025.03.02+sunday+usher+A".to_string(),
            format!("D&{}", id),
            format!("E&{}", id),
            format!("F&{}", id),
            "C*1t".to_string(),
            "W&sunday".to_string(),
        ];
        for raw in tokens {
            let token: ActionToken = raw.parse().unwrap();
            assert_eq!(token.to_string(), raw);
        }
    }

    #[test]
    fn test_parse_select_date() {
        let token: ActionToken = "A&S+2025.03.02+sunday+usher+A".parse().unwrap();
        assert_eq!(
            token,
            ActionToken::SelectDate {
                kind: ExchangeKind::Swap,
                date: date(2),
                collection_id: "sunday".to_string(),
                duty_type: "usher".to_string(),
                requester: "A".to_string(),
            }
        );
    }

    #[test]
    fn test_rejects_wrong_field_count() {
        assert!("B&2025.03.09+C+2025.03.02+sunday+usher".parse::<ActionToken>().is_err());
        assert!("B&2025.03.09+C+2025.03.02+sunday+usher+A+extra"
            .parse::<ActionToken>()
            .is_err());
        assert!("A*S+sunday".parse::<ActionToken>().is_err());
    }

    #[test]
    fn test_rejects_extra_delimiters() {
        assert!("G#B++2025.03.02+sunday+usher+A".parse::<ActionToken>().is_err());
        assert!("W&sunday+".parse::<ActionToken>().is_err());
        assert!("W&".parse::<ActionToken>().is_err());
    }

    #[test]
    fn test_rejects_bad_dates_and_ids() {
        assert!("G#B+2025-03-02+sunday+usher+A".parse::<ActionToken>().is_err());
        assert!("G#B+2025/03/02+sunday+usher+A".parse::<ActionToken>().is_err());
        assert!("D&not-a-uuid".parse::<ActionToken>().is_err());
    }

    #[test]
    fn test_rejects_unknown_prefix_and_mode() {
        assert!("Z&whatever".parse::<ActionToken>().is_err());
        assert!("A*X+sunday+usher".parse::<ActionToken>().is_err());
        assert!("".parse::<ActionToken>().is_err());
        assert!(" ".parse::<ActionToken>().is_err());
    }

    #[test]
    fn test_rejects_bad_reminder() {
        assert!("C*0t".parse::<ActionToken>().is_err());
        assert!("C*7t".parse::<ActionToken>().is_err());
        assert!("C*1x".parse::<ActionToken>().is_err());
        assert!("C*1".parse::<ActionToken>().is_err());
        assert!("C*1tt".parse::<ActionToken>().is_err());
    }

    #[test]
    fn test_disambiguate_requires_several_occupants() {
        assert!("B#2025.03.09+C+2025.03.02+sunday+usher+A"
            .parse::<ActionToken>()
            .is_err());
        assert!("B#2025.03.09+C/+2025.03.02+sunday+usher+A"
            .parse::<ActionToken>()
            .is_err());
    }

    #[test]
    fn test_select_one_occupant() {
        let token: ActionToken = "B#2025.03.09+C/D+2025.03.02+sunday+usher+A".parse().unwrap();
        let ActionToken::Disambiguate(ambiguous) = token else {
            panic!("expected disambiguate");
        };
        let chosen = ambiguous.select("C").unwrap();
        assert_eq!(chosen.respondent, "C");
        let encoded = ActionToken::ProposeSwap(chosen).to_string();
        assert!(!encoded.contains('/'));
        assert!(!encoded[2..].split('+').any(|field| field == "D"));
        assert!(ambiguous.select("E").is_none());
    }

    #[test]
    fn test_proposal_to_request() {
        let request = swap().to_request();
        assert_eq!(request.kind, ExchangeKind::Swap);
        assert_eq!(request.requester, "A");
        assert_eq!(request.respondent, "B");
        assert_eq!(request.requester_date, date(2));
        assert_eq!(request.respondent_date, Some(date(9)));
    }
}
