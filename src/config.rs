use std::env;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Upper bound on poll ticks per generation.
    pub max_poll_count: u32,
    /// Progress-less ticks tolerated before a run counts as stalled.
    pub stall_ticks: u32,
    /// Reject unknown models on international tokens (mainland always
    /// falls back to the default model).
    pub strict_international_models: bool,
    /// Optional JSON file overriding the terminal status table.
    pub status_table_path: Option<String>,
    /// Optional external session provisioning endpoint.
    pub session_provider_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| "5100".into())
                .parse()
                .context("PORT must be a valid u16")?,
            max_poll_count: env::var("MAX_POLL_COUNT")
                .unwrap_or_else(|_| "120".into())
                .parse()
                .unwrap_or(120),
            stall_ticks: env::var("STALL_TICKS")
                .unwrap_or_else(|_| "30".into())
                .parse()
                .unwrap_or(30),
            strict_international_models: env::var("JIMENG_INTL_STRICT_MODELS")
                .unwrap_or_else(|_| "true".into())
                .parse()
                .unwrap_or(true),
            status_table_path: env::var("JIMENG_STATUS_TABLE").ok().filter(|s| !s.is_empty()),
            session_provider_url: env::var("SESSION_PROVIDER_URL")
                .ok()
                .filter(|s| !s.is_empty()),
        })
    }
}
