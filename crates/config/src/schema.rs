//! Config schema for the sync service.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RacefeedConfig {
    pub database: DatabaseConfig,
    pub source: SourceConfig,
    pub scheduler: SchedulerConfig,
    pub notifications: NotificationsConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLx connection URL, e.g. `sqlite:///var/lib/racefeed/racefeed.db?mode=rwc`.
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let path = crate::loader::data_dir()
            .map(|dir| dir.join("racefeed.db"))
            .unwrap_or_else(|| "racefeed.db".into());
        Self {
            url: format!("sqlite://{}?mode=rwc", path.display()),
        }
    }
}

/// The scraper service the executor pulls from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub base_url: String,
    /// Transport timeout for `/sync/*` calls.
    pub request_timeout_secs: u64,
    pub health_timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8088".into(),
            request_timeout_secs: 300,
            health_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// When false, `serve` registers no timers.
    pub enabled: bool,
    /// IANA zone cron expressions are evaluated in. UTC when unset.
    pub timezone: Option<String>,
    /// Run deadline for configurations whose `timeoutMinutes` is 0.
    pub default_timeout_minutes: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timezone: None,
            default_timeout_minutes: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    /// Failed scheduled runs are POSTed here. Log-only when unset.
    pub webhook_url: Option<String>,
    /// Upper bound on one webhook delivery.
    pub timeout_secs: u64,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
}
