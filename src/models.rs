//! Data models for workers, duty collections and schedule slots

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Labels for the six reminder days, Monday first
pub const REMINDER_DAYS: [&str; 6] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// A calendar date rendered as `YYYY.MM.DD`
///
/// The dotted form is both the storage key and the date encoding inside
/// action tokens, so lexical and chronological order agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SlotDate(NaiveDate);

impl SlotDate {
    pub const FORMAT: &'static str = "%Y.%m.%d";

    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    /// Build from year/month/day, `None` for impossible dates
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self)
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// `MM/DD`, the form shown on buttons and in notifications
    pub fn short(&self) -> String {
        format!("{:02}/{:02}", self.0.month(), self.0.day())
    }

    /// `YYYY.MM`, the bucket usage counters are kept in
    pub fn month_key(&self) -> String {
        self.0.format("%Y.%m").to_string()
    }
}

impl fmt::Display for SlotDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(Self::FORMAT))
    }
}

impl std::str::FromStr for SlotDate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Strict width check: chrono accepts unpadded fields, the wire form does not.
        if s.len() != 10 {
            return Err(format!("Invalid slot date: {}", s));
        }
        NaiveDate::parse_from_str(s, Self::FORMAT)
            .map(Self)
            .map_err(|_| format!("Invalid slot date: {}", s))
    }
}

impl TryFrom<String> for SlotDate {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SlotDate> for String {
    fn from(value: SlotDate) -> Self {
        value.to_string()
    }
}

/// A registered volunteer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    /// Unique display name, also the key used inside schedule slots
    pub name: String,
    /// Chat identity; empty until the worker signs in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messaging_id: Option<String>,
    /// Collection id -> duty types held in that collection
    #[serde(default)]
    pub duties: BTreeMap<String, Vec<String>>,
    /// Weekly reminder flags, Monday..Saturday
    #[serde(default)]
    pub reminder_days: [bool; 6],
    /// One-time sign-in code handed out by an administrator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_token: Option<String>,
}

impl Worker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            messaging_id: None,
            duties: BTreeMap::new(),
            reminder_days: [false; 6],
            login_token: None,
        }
    }

    pub fn with_duty(mut self, collection_id: impl Into<String>, duty_type: impl Into<String>) -> Self {
        self.duties
            .entry(collection_id.into())
            .or_default()
            .push(duty_type.into());
        self
    }

    pub fn with_messaging_id(mut self, messaging_id: impl Into<String>) -> Self {
        self.messaging_id = Some(messaging_id.into());
        self
    }

    pub fn with_login_token(mut self, token: impl Into<String>) -> Self {
        self.login_token = Some(token.into());
        self
    }

    /// Whether a push message can reach this worker
    pub fn is_reachable(&self) -> bool {
        self.messaging_id.as_deref().is_some_and(|id| !id.is_empty())
    }

    pub fn holds(&self, collection_id: &str, duty_type: &str) -> bool {
        self.duties
            .get(collection_id)
            .is_some_and(|duties| duties.iter().any(|d| d == duty_type))
    }

    /// Labels of the days with reminders switched on
    pub fn active_reminder_days(&self) -> Vec<&'static str> {
        REMINDER_DAYS
            .iter()
            .zip(self.reminder_days.iter())
            .filter(|(_, on)| **on)
            .map(|(label, _)| *label)
            .collect()
    }
}

/// A recurring event series with its own duty schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DutyCollection {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
    /// Recognized duty types in display order
    #[serde(default)]
    pub duty_types: Vec<String>,
}

impl DutyCollection {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            emoji: None,
            duty_types: Vec::new(),
        }
    }

    pub fn with_duty_types<I, S>(mut self, duty_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.duty_types = duty_types.into_iter().map(Into::into).collect();
        self
    }

    pub fn display_name(&self) -> String {
        match &self.emoji {
            Some(emoji) => format!("{} {}", emoji, self.name),
            None => self.name.clone(),
        }
    }
}

/// Duty assignments for one collection on one date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSlot {
    pub collection_id: String,
    pub date: SlotDate,
    /// Duty type -> assignees; order matters and duplicates are co-assignments
    #[serde(default)]
    pub assignments: BTreeMap<String, Vec<String>>,
}

impl ScheduleSlot {
    pub fn new(collection_id: impl Into<String>, date: SlotDate) -> Self {
        Self {
            collection_id: collection_id.into(),
            date,
            assignments: BTreeMap::new(),
        }
    }

    pub fn with_assignees<I, S>(mut self, duty_type: impl Into<String>, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.assignments
            .insert(duty_type.into(), names.into_iter().map(Into::into).collect());
        self
    }

    pub fn assignees(&self, duty_type: &str) -> &[String] {
        self.assignments
            .get(duty_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_assigned(&self, duty_type: &str, name: &str) -> bool {
        self.assignees(duty_type).iter().any(|n| n == name)
    }

    /// Duty types held by `name` on this date
    pub fn duties_of<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.assignments
            .iter()
            .filter(move |(_, names)| names.iter().any(|n| n == name))
            .map(|(duty, _)| duty.as_str())
    }
}

/// Bot interactions counted per worker and month
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageAction {
    FullSchedule,
    WeekSchedule,
    Swap,
    Substitute,
    Reminders,
    Menu,
    /// An exchange request was delivered to the worker
    RequestReceived,
    /// The worker was told their exchange went through
    ExchangeCompleted,
}

impl UsageAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageAction::FullSchedule => "full_schedule",
            UsageAction::WeekSchedule => "week_schedule",
            UsageAction::Swap => "swap",
            UsageAction::Substitute => "substitute",
            UsageAction::Reminders => "reminders",
            UsageAction::Menu => "menu",
            UsageAction::RequestReceived => "request_received",
            UsageAction::ExchangeCompleted => "exchange_completed",
        }
    }
}

impl std::str::FromStr for UsageAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full_schedule" => Ok(UsageAction::FullSchedule),
            "week_schedule" => Ok(UsageAction::WeekSchedule),
            "swap" => Ok(UsageAction::Swap),
            "substitute" => Ok(UsageAction::Substitute),
            "reminders" => Ok(UsageAction::Reminders),
            "menu" => Ok(UsageAction::Menu),
            "request_received" => Ok(UsageAction::RequestReceived),
            "exchange_completed" => Ok(UsageAction::ExchangeCompleted),
            _ => Err(format!("Invalid usage action: {}", s)),
        }
    }
}

/// Initial data loaded at startup
#[derive(Debug, Default, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub collections: Vec<DutyCollection>,
    #[serde(default)]
    pub workers: Vec<Worker>,
    #[serde(default)]
    pub slots: Vec<ScheduleSlot>,
}
