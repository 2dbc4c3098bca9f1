//! Server configuration

use clap::Parser;
use std::path::PathBuf;

/// Shiftswap server
#[derive(Debug, Clone, Parser)]
#[command(name = "shiftswap", version, about = "Volunteer duty exchange server")]
pub struct Config {
    /// SQLite connection string
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:shiftswap.db")]
    pub database_url: String,

    /// Address to listen on
    #[arg(long, env = "SHIFTSWAP_BIND", default_value = "0.0.0.0:3000")]
    pub bind: String,

    /// Number of upcoming occasions searched for swap partners
    #[arg(long, env = "SHIFTSWAP_LOOKAHEAD", default_value_t = 26)]
    pub lookahead: usize,

    /// Duty types that never appear in the exchange menu
    #[arg(long, env = "SHIFTSWAP_NON_EXCHANGEABLE", value_delimiter = ',')]
    pub non_exchangeable: Vec<String>,

    /// JSON file with collections, workers and slots loaded at startup
    #[arg(long, env = "SHIFTSWAP_SEED")]
    pub seed: Option<PathBuf>,

    /// Base URL of the full schedule page
    #[arg(
        long,
        env = "SHIFTSWAP_SCHEDULE_URL",
        default_value = "http://localhost:3000/schedule"
    )]
    pub schedule_url: String,
}

impl Config {
    pub fn exchange_settings(&self) -> ExchangeSettings {
        ExchangeSettings {
            lookahead: self.lookahead,
            non_exchangeable: self
                .non_exchangeable
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            schedule_url: self.schedule_url.clone(),
        }
    }
}

/// Settings the exchange workflow needs at runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSettings {
    /// Occasions scanned ahead of today
    pub lookahead: usize,
    /// Duty types hidden from the exchange menu
    pub non_exchangeable: Vec<String>,
    pub schedule_url: String,
}

impl ExchangeSettings {
    pub fn is_exchangeable(&self, duty_type: &str) -> bool {
        !self.non_exchangeable.iter().any(|d| d == duty_type)
    }
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            lookahead: 26,
            non_exchangeable: Vec::new(),
            schedule_url: "http://localhost:3000/schedule".to_string(),
        }
    }
}
