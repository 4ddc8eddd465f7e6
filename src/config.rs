use crate::consts::{DEFAULT_BAUD_RATE, DEFAULT_LISTEN_ADDR, DEFAULT_RING_GAP};
use crate::error::AppError;
use crate::monitor::MonitorSettings;
use crate::types::LineIdentity;

use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing_subscriber::filter::LevelFilter;

pub const LINES_VAR: &str = "CALLERID_LINES";
pub const BAUD_RATE_VAR: &str = "CALLERID_BAUD_RATE";
pub const RING_GAP_VAR: &str = "CALLERID_RING_GAP_SECS";
pub const LISTEN_ADDR_VAR: &str = "CALLERID_LISTEN_ADDR";
pub const WEBHOOK_URL_VAR: &str = "CALLERID_WEBHOOK_URL";
pub const LOG_LEVEL_VAR: &str = "CALLERID_LOG_LEVEL";

/// One monitored line, as given in `CALLERID_LINES`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LineConfig {
    pub port: String,
    pub line: String,
    #[serde(default)]
    pub description: String,
}

impl LineConfig {
    pub fn identity(&self) -> LineIdentity {
        LineIdentity {
            line: self.line.clone(),
            description: self.description.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub lines: Vec<LineConfig>,
    pub baud_rate: u32,
    pub ring_gap: Duration,
    pub listen_addr: SocketAddr,
    pub webhook_url: Option<String>,
    pub log_level: LevelFilter,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key lookup, e.g. a map in tests.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let lines = match lookup(LINES_VAR) {
            Some(json) => parse_lines(&json)?,
            None => return Err(AppError::Config(format!("{LINES_VAR} not set"))),
        };

        let baud_rate = parse_or(&lookup, BAUD_RATE_VAR, DEFAULT_BAUD_RATE)?;
        let ring_gap = match lookup(RING_GAP_VAR) {
            Some(raw) => parse_ring_gap(&raw)?,
            None => DEFAULT_RING_GAP,
        };
        let listen_addr = match lookup(LISTEN_ADDR_VAR) {
            Some(raw) => parse_value(LISTEN_ADDR_VAR, &raw)?,
            None => parse_value(LISTEN_ADDR_VAR, DEFAULT_LISTEN_ADDR)?,
        };
        let webhook_url = lookup(WEBHOOK_URL_VAR).filter(|url| !url.trim().is_empty());
        let log_level = parse_or(&lookup, LOG_LEVEL_VAR, LevelFilter::DEBUG)?;

        Ok(Self {
            lines,
            baud_rate,
            ring_gap,
            listen_addr,
            webhook_url,
            log_level,
        })
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            ring_gap: self.ring_gap,
        }
    }
}

fn parse_lines(json: &str) -> Result<Vec<LineConfig>, AppError> {
    let lines: Vec<LineConfig> = serde_json::from_str(json)
        .map_err(|e| AppError::Config(format!("{LINES_VAR} is not a valid line list: {e}")))?;
    if lines.is_empty() {
        return Err(AppError::Config(format!("{LINES_VAR} lists no lines")));
    }
    let mut seen = HashSet::new();
    for line in &lines {
        if line.port.trim().is_empty() || line.line.trim().is_empty() {
            return Err(AppError::Config(format!(
                "{LINES_VAR} entries need a port and a line"
            )));
        }
        if !seen.insert(line.line.as_str()) {
            return Err(AppError::Config(format!(
                "line {} configured more than once",
                line.line
            )));
        }
    }
    Ok(lines)
}

fn parse_ring_gap(raw: &str) -> Result<Duration, AppError> {
    let secs: u64 = parse_value(RING_GAP_VAR, raw)?;
    if secs == 0 {
        return Err(AppError::Config(format!("{RING_GAP_VAR} must be positive")));
    }
    Ok(Duration::from_secs(secs))
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, AppError>
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, AppError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| AppError::Config(format!("{key}={raw:?}: {e}")))
}
