//! TOML configuration for the coach: database path, scheduler triggers,
//! session policy, and logging.

use anyhow::{Context, Result};
use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SchedulerConfig {
    /// Daily reminder trigger, "HH:MM" local time.
    #[serde(default = "default_daily_reminder_time")]
    pub daily_reminder_time: String,
    /// Weekly report day, 0 = Monday .. 6 = Sunday.
    #[serde(default = "default_weekly_report_day")]
    pub weekly_report_day: u8,
    /// Weekly report trigger, "HH:MM" local time.
    #[serde(default = "default_weekly_report_time")]
    pub weekly_report_time: String,
    /// Tick cadence of the scheduler loop, in seconds.
    #[serde(default = "default_tick_seconds")]
    pub tick_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionConfig {
    /// Maximum number of cards pulled into one review session.
    #[serde(default = "default_session_limit")]
    pub size_limit: usize,
    /// Minutes of inactivity after which an in-progress session is treated
    /// as completed.
    #[serde(default = "default_idle_timeout_minutes")]
    pub idle_timeout_minutes: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            daily_reminder_time: default_daily_reminder_time(),
            weekly_report_day: default_weekly_report_day(),
            weekly_report_time: default_weekly_report_time(),
            tick_seconds: default_tick_seconds(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            size_limit: default_session_limit(),
            idle_timeout_minutes: default_idle_timeout_minutes(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_db_path() -> String {
    "vocab-coach.db".to_string()
}

fn default_daily_reminder_time() -> String {
    "09:00".to_string()
}

fn default_weekly_report_day() -> u8 {
    0 // Monday
}

fn default_weekly_report_time() -> String {
    "10:00".to_string()
}

fn default_tick_seconds() -> u64 {
    60
}

fn default_session_limit() -> usize {
    10
}

fn default_idle_timeout_minutes() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load config from a TOML file. A missing file yields the defaults, so a
    /// first run needs no setup.
    pub fn load_from_file(path: &str) -> Result<Self> {
        let expanded = shellexpand::tilde(path);
        let expanded_path = PathBuf::from(expanded.as_ref());
        if !expanded_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&expanded_path)
            .with_context(|| format!("Failed to read config file: {path}"))?;

        let mut config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse TOML config")?;

        // Environment overrides the file for the database location.
        if let Ok(db) = std::env::var("VOCAB_COACH_DB") {
            config.database.path = db;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        parse_hhmm(&self.scheduler.daily_reminder_time)
            .with_context(|| "Invalid scheduler.daily_reminder_time")?;
        parse_hhmm(&self.scheduler.weekly_report_time)
            .with_context(|| "Invalid scheduler.weekly_report_time")?;

        if self.scheduler.weekly_report_day > 6 {
            anyhow::bail!(
                "scheduler.weekly_report_day must be 0-6 (0 = Monday), got {}",
                self.scheduler.weekly_report_day
            );
        }
        if self.scheduler.tick_seconds == 0 {
            anyhow::bail!("scheduler.tick_seconds must be positive");
        }
        if self.session.size_limit == 0 {
            anyhow::bail!("session.size_limit must be positive");
        }
        if self.session.idle_timeout_minutes == 0 {
            anyhow::bail!("session.idle_timeout_minutes must be positive");
        }
        Ok(())
    }

    /// Database path with `~` expanded.
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.database.path).as_ref())
    }

    pub fn daily_reminder_time(&self) -> NaiveTime {
        // validate() guarantees these parse.
        parse_hhmm(&self.scheduler.daily_reminder_time).unwrap_or(NaiveTime::MIN)
    }

    pub fn weekly_report_time(&self) -> NaiveTime {
        parse_hhmm(&self.scheduler.weekly_report_time).unwrap_or(NaiveTime::MIN)
    }

    pub fn weekly_report_day(&self) -> Weekday {
        match self.scheduler.weekly_report_day {
            0 => Weekday::Mon,
            1 => Weekday::Tue,
            2 => Weekday::Wed,
            3 => Weekday::Thu,
            4 => Weekday::Fri,
            5 => Weekday::Sat,
            _ => Weekday::Sun,
        }
    }

    pub fn session_idle_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.session.idle_timeout_minutes as i64)
    }
}

fn parse_hhmm(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .with_context(|| format!("Expected HH:MM, got '{value}'"))
}
