//! Agenda configuration system.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::availability::WorkingHours;
use crate::error::{AgendaError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgendaConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub availability: AvailabilityConfig,
    #[serde(default)]
    pub wake: WakeConfig,
    #[serde(default)]
    pub actions: ActionsConfig,
}

fn default_db_path() -> String { "~/.agenda/events.db".into() }

impl Default for AgendaConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            scheduler: SchedulerConfig::default(),
            availability: AvailabilityConfig::default(),
            wake: WakeConfig::default(),
            actions: ActionsConfig::default(),
        }
    }
}

impl AgendaConfig {
    /// Load config from the default path (~/.agenda/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AgendaError::config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    /// Parse config from TOML text and validate it.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AgendaError::config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to a path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AgendaError::config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values the scheduler cannot work with.
    pub fn validate(&self) -> Result<()> {
        self.availability.working_hours()?;
        self.wake.maintenance_time()?;
        if self.scheduler.max_idle_secs == 0 {
            return Err(AgendaError::config("scheduler.max_idle_secs must be > 0"));
        }
        if !(1..=MAX_HORIZON_HOURS).contains(&self.scheduler.horizon_hours) {
            return Err(AgendaError::config(format!(
                "scheduler.horizon_hours must be between 1 and {MAX_HORIZON_HOURS}"
            )));
        }
        if !(0..=MAX_LEAD_MINUTES).contains(&self.scheduler.pre_notify_minutes) {
            return Err(AgendaError::config(format!(
                "scheduler.pre_notify_minutes must be between 0 and {MAX_LEAD_MINUTES}"
            )));
        }
        if !(0..=MAX_LEAD_MINUTES).contains(&self.wake.lead_minutes) {
            return Err(AgendaError::config(format!(
                "wake.lead_minutes must be between 0 and {MAX_LEAD_MINUTES}"
            )));
        }
        Ok(())
    }

    /// Database path with `~` expanded.
    pub fn resolved_db_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.db_path).to_string())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Agenda home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".agenda")
    }
}

/// Longest scheduling horizon accepted (100 years).
pub const MAX_HORIZON_HOURS: i64 = 100 * 366 * 24;
/// Longest reminder or wake lead accepted (one year).
pub const MAX_LEAD_MINUTES: i64 = 366 * 24 * 60;

/// Scheduler engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Category that marks an event as schedulable.
    #[serde(default = "default_schedulable_category")]
    pub schedulable_category: String,
    /// Reminder lead time before each task occurrence.
    #[serde(default = "default_pre_notify_minutes")]
    pub pre_notify_minutes: i64,
    /// Events further out than this are not armed until a later maintenance pass.
    #[serde(default = "default_horizon_hours")]
    pub horizon_hours: i64,
    /// Max events loaded per re-hydration pass.
    #[serde(default = "default_rehydrate_limit")]
    pub rehydrate_limit: usize,
    /// Upper bound on a single driver sleep, so wall-clock jumps are noticed.
    #[serde(default = "default_max_idle_secs")]
    pub max_idle_secs: u64,
    /// Fire records kept for diagnostics.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_schedulable_category() -> String { "task".into() }
fn default_pre_notify_minutes() -> i64 { 10 }
fn default_horizon_hours() -> i64 { 24 * 365 }
fn default_rehydrate_limit() -> usize { 1000 }
fn default_max_idle_secs() -> u64 { 60 }
fn default_history_limit() -> usize { 100 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            schedulable_category: default_schedulable_category(),
            pre_notify_minutes: default_pre_notify_minutes(),
            horizon_hours: default_horizon_hours(),
            rehydrate_limit: default_rehydrate_limit(),
            max_idle_secs: default_max_idle_secs(),
            history_limit: default_history_limit(),
        }
    }
}

impl SchedulerConfig {
    pub fn pre_notify_lead(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.pre_notify_minutes.clamp(0, MAX_LEAD_MINUTES))
    }

    pub fn horizon(&self) -> chrono::Duration {
        chrono::Duration::hours(self.horizon_hours.clamp(1, MAX_HORIZON_HOURS))
    }
}

/// Working window used by the availability finder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityConfig {
    #[serde(default = "default_day_start")]
    pub day_start: String,
    #[serde(default = "default_day_end")]
    pub day_end: String,
}

fn default_day_start() -> String { "08:00".into() }
fn default_day_end() -> String { "18:00".into() }

impl Default for AvailabilityConfig {
    fn default() -> Self {
        Self {
            day_start: default_day_start(),
            day_end: default_day_end(),
        }
    }
}

impl AvailabilityConfig {
    pub fn working_hours(&self) -> Result<WorkingHours> {
        WorkingHours::new(parse_clock(&self.day_start)?, parse_clock(&self.day_end)?)
    }
}

/// Timeouts for outbound HTTP calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpTimeouts {
    #[serde(default = "default_connect_timeout", alias = "connectTimeoutSeconds")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_total_timeout", alias = "totalTimeoutSeconds")]
    pub total_timeout_seconds: u64,
}

fn default_connect_timeout() -> u64 { 3 }
fn default_total_timeout() -> u64 { 5 }

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect_timeout_seconds: default_connect_timeout(),
            total_timeout_seconds: default_total_timeout(),
        }
    }
}

/// Wake trigger and daily maintenance configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WakeConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Endpoint that wakes the external device. Empty disables the wake call.
    #[serde(default)]
    pub server_url: String,
    /// How long before the day's first task the device is woken.
    #[serde(default = "default_wake_lead_minutes")]
    pub lead_minutes: i64,
    /// Local time of the daily maintenance pass (HH:MM).
    #[serde(default = "default_maintenance_time")]
    pub maintenance_time: String,
    #[serde(flatten)]
    pub timeouts: HttpTimeouts,
}

fn bool_true() -> bool { true }
fn default_wake_lead_minutes() -> i64 { 30 }
fn default_maintenance_time() -> String { "00:05".into() }

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            server_url: String::new(),
            lead_minutes: default_wake_lead_minutes(),
            maintenance_time: default_maintenance_time(),
            timeouts: HttpTimeouts::default(),
        }
    }
}

impl WakeConfig {
    pub fn lead(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.lead_minutes.clamp(0, MAX_LEAD_MINUTES))
    }

    pub fn maintenance_time(&self) -> Result<NaiveTime> {
        parse_clock(&self.maintenance_time)
    }

    /// Wake calls are only made with a configured endpoint.
    pub fn is_active(&self) -> bool {
        self.enabled && !self.server_url.trim().is_empty()
    }
}

/// Built-in action and notifier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionsConfig {
    /// Endpoint that runs named home-automation protocols.
    #[serde(default = "default_protocol_endpoint")]
    pub protocol_endpoint: String,
    /// When set, a `webhook` notifier posting reminders here is registered.
    #[serde(default)]
    pub notify_webhook_url: Option<String>,
    #[serde(flatten)]
    pub timeouts: HttpTimeouts,
}

fn default_protocol_endpoint() -> String { "http://0.0.0.0:8000/protocols/run".into() }

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            protocol_endpoint: default_protocol_endpoint(),
            notify_webhook_url: None,
            timeouts: HttpTimeouts::default(),
        }
    }
}

/// Parse "HH:MM" or "HH:MM:SS".
pub fn parse_clock(s: &str) -> Result<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|_| AgendaError::config(format!("Invalid time of day: '{s}' (expected HH:MM)")))
}
