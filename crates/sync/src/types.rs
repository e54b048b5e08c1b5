//! Core data types for configurations, schedules and run logs.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::Error;

/// What a run pulls from the data source.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SyncType {
    Events,
    News,
    All,
}

impl SyncType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Events => "events",
            Self::News => "news",
            Self::All => "all",
        }
    }
}

impl fmt::Display for SyncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "events" => Ok(Self::Events),
            "news" => Ok(Self::News),
            "all" => Ok(Self::All),
            other => Err(Error::validation(format!("unknown sync type: {other}"))),
        }
    }
}

/// Provenance of a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Manual,
    Scheduled,
    Test,
}

impl TriggerType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "scheduled" => Ok(Self::Scheduled),
            "test" => Ok(Self::Test),
            other => Err(Error::validation(format!("unknown trigger type: {other}"))),
        }
    }
}

/// Lifecycle of a run log. `Running` is only ever followed by one terminal value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Running,
    Completed,
    Failed,
}

impl SyncStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(Error::validation(format!("unknown sync status: {other}"))),
        }
    }
}

/// A named set of toggles describing what, when and how to synchronize.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfiguration {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub sync_events: bool,
    pub sync_news: bool,
    pub sync_usabmx: bool,
    pub sync_uci: bool,
    pub sync_frequency: String,
    pub sync_time: String,
    pub auto_sync_enabled: bool,
    pub is_active: bool,
    pub notifications_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_email: Option<String>,
    pub max_retries: u32,
    pub timeout_minutes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl SyncConfiguration {
    /// `events` when only events are enabled, `news` when only news, `all` otherwise.
    #[must_use]
    pub fn sync_type(&self) -> SyncType {
        match (self.sync_events, self.sync_news) {
            (true, false) => SyncType::Events,
            (false, true) => SyncType::News,
            _ => SyncType::All,
        }
    }

    /// Whether the scheduler should own a live timer for this configuration.
    #[must_use]
    pub fn is_schedulable(&self) -> bool {
        self.is_active && self.auto_sync_enabled
    }
}

/// Cron binding and computed run timestamps for one configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncSchedule {
    pub configuration_id: i64,
    pub cron_expression: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_ms: Option<u64>,
    pub updated_at_ms: u64,
}

/// A configuration joined with its schedule, as loaded by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationWithSchedule {
    pub configuration: SyncConfiguration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<SyncSchedule>,
}

pub const DEFAULT_SYNC_FREQUENCY: &str = "daily";
pub const DEFAULT_SYNC_TIME: &str = "02:00";
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_TIMEOUT_MINUTES: u32 = 30;

/// Input for creating or updating a configuration, keyed by `name`.
///
/// Omitted fields take the documented defaults on creation and keep their
/// stored value on update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationUpsert {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sync_events: Option<bool>,
    #[serde(default)]
    pub sync_news: Option<bool>,
    #[serde(default)]
    pub sync_usabmx: Option<bool>,
    #[serde(default)]
    pub sync_uci: Option<bool>,
    #[serde(default)]
    pub sync_frequency: Option<String>,
    #[serde(default)]
    pub sync_time: Option<String>,
    #[serde(default)]
    pub auto_sync_enabled: Option<bool>,
    #[serde(default)]
    pub notifications_enabled: Option<bool>,
    #[serde(default)]
    pub notification_email: Option<String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub timeout_minutes: Option<u32>,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
}

impl ConfigurationUpsert {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Build a brand-new configuration from this input.
    #[must_use]
    pub fn create(&self, id: i64, now_ms: u64) -> SyncConfiguration {
        SyncConfiguration {
            id,
            name: self.name.clone(),
            description: self.description.clone(),
            sync_events: self.sync_events.unwrap_or(true),
            sync_news: self.sync_news.unwrap_or(true),
            sync_usabmx: self.sync_usabmx.unwrap_or(true),
            sync_uci: self.sync_uci.unwrap_or(true),
            sync_frequency: self
                .sync_frequency
                .clone()
                .unwrap_or_else(|| DEFAULT_SYNC_FREQUENCY.into()),
            sync_time: self
                .sync_time
                .clone()
                .unwrap_or_else(|| DEFAULT_SYNC_TIME.into()),
            auto_sync_enabled: self.auto_sync_enabled.unwrap_or(false),
            is_active: true,
            notifications_enabled: self.notifications_enabled.unwrap_or(false),
            notification_email: self.notification_email.clone(),
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            timeout_minutes: self.timeout_minutes.unwrap_or(DEFAULT_TIMEOUT_MINUTES),
            created_by: self.created_by.clone(),
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }

    /// Overwrite the supplied fields of an existing configuration.
    pub fn apply(&self, existing: &mut SyncConfiguration, now_ms: u64) {
        if let Some(description) = &self.description {
            existing.description = Some(description.clone());
        }
        if let Some(v) = self.sync_events {
            existing.sync_events = v;
        }
        if let Some(v) = self.sync_news {
            existing.sync_news = v;
        }
        if let Some(v) = self.sync_usabmx {
            existing.sync_usabmx = v;
        }
        if let Some(v) = self.sync_uci {
            existing.sync_uci = v;
        }
        if let Some(v) = &self.sync_frequency {
            existing.sync_frequency = v.clone();
        }
        if let Some(v) = &self.sync_time {
            existing.sync_time = v.clone();
        }
        if let Some(v) = self.auto_sync_enabled {
            existing.auto_sync_enabled = v;
        }
        if let Some(v) = self.notifications_enabled {
            existing.notifications_enabled = v;
        }
        if let Some(v) = &self.notification_email {
            existing.notification_email = Some(v.clone());
        }
        if let Some(v) = self.max_retries {
            existing.max_retries = v;
        }
        if let Some(v) = self.timeout_minutes {
            existing.timeout_minutes = v;
        }
        existing.updated_at_ms = now_ms;
    }
}

/// Per-provider item counts.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceCounts {
    pub usabmx: u64,
    pub uci: u64,
}

impl SourceCounts {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.usabmx + self.uci
    }
}

/// Result of a single-kind data-source call (`syncEvents` / `syncNews`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceSyncResult {
    pub success: bool,
    #[serde(default)]
    pub usabmx: u64,
    #[serde(default)]
    pub uci: u64,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Normalized result of any sync: the unused half is zero-filled.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncResult {
    pub success: bool,
    #[serde(default)]
    pub events: SourceCounts,
    #[serde(default)]
    pub news: SourceCounts,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl SyncResult {
    #[must_use]
    pub fn from_events(r: SourceSyncResult) -> Self {
        Self {
            success: r.success,
            events: SourceCounts {
                usabmx: r.usabmx,
                uci: r.uci,
            },
            news: SourceCounts::default(),
            errors: r.errors,
        }
    }

    #[must_use]
    pub fn from_news(r: SourceSyncResult) -> Self {
        Self {
            success: r.success,
            events: SourceCounts::default(),
            news: SourceCounts {
                usabmx: r.usabmx,
                uci: r.uci,
            },
            errors: r.errors,
        }
    }
}

/// Health snapshot reported by the data source.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub is_healthy: bool,
}

/// One row per execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncLog {
    pub id: i64,
    pub sync_type: SyncType,
    pub trigger_type: TriggerType,
    pub status: SyncStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub triggered_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration_id: Option<i64>,
    pub events_usabmx: u64,
    pub events_uci: u64,
    pub news_usabmx: u64,
    pub news_uci: u64,
    pub events_synced: u64,
    pub news_synced: u64,
    pub total_errors: u64,
    pub error_details: Vec<String>,
    pub started_at_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub scraper_health: bool,
}

/// Fields recorded when a log row is created.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSyncLog {
    pub sync_type: SyncType,
    pub trigger_type: TriggerType,
    pub status: SyncStatus,
    pub triggered_by: Option<String>,
    pub configuration_id: Option<i64>,
    pub scraper_health: bool,
    pub started_at_ms: u64,
    /// Only set when a log is created directly in a terminal state.
    pub terminal: Option<SyncLogUpdate>,
}

impl NewSyncLog {
    #[must_use]
    pub fn into_log(self, id: i64) -> SyncLog {
        let mut log = SyncLog {
            id,
            sync_type: self.sync_type,
            trigger_type: self.trigger_type,
            status: self.status,
            triggered_by: self.triggered_by,
            configuration_id: self.configuration_id,
            events_usabmx: 0,
            events_uci: 0,
            news_usabmx: 0,
            news_uci: 0,
            events_synced: 0,
            news_synced: 0,
            total_errors: 0,
            error_details: Vec::new(),
            started_at_ms: self.started_at_ms,
            completed_at_ms: None,
            duration_ms: None,
            scraper_health: self.scraper_health,
        };
        if let Some(update) = &self.terminal {
            update.apply(&mut log);
        }
        log
    }
}

/// Terminal update applied to a running log.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncLogUpdate {
    pub status: SyncStatus,
    pub events: SourceCounts,
    pub news: SourceCounts,
    pub error_details: Vec<String>,
    pub completed_at_ms: u64,
    pub duration_ms: u64,
}

impl SyncLogUpdate {
    #[must_use]
    pub fn from_result(result: &SyncResult, completed_at_ms: u64, duration_ms: u64) -> Self {
        Self {
            status: if result.success {
                SyncStatus::Completed
            } else {
                SyncStatus::Failed
            },
            events: result.events,
            news: result.news,
            error_details: result.errors.clone(),
            completed_at_ms,
            duration_ms,
        }
    }

    #[must_use]
    pub fn failed(error: impl Into<String>, completed_at_ms: u64, duration_ms: u64) -> Self {
        Self {
            status: SyncStatus::Failed,
            events: SourceCounts::default(),
            news: SourceCounts::default(),
            error_details: vec![error.into()],
            completed_at_ms,
            duration_ms,
        }
    }

    pub fn apply(&self, log: &mut SyncLog) {
        log.status = self.status;
        log.events_usabmx = self.events.usabmx;
        log.events_uci = self.events.uci;
        log.news_usabmx = self.news.usabmx;
        log.news_uci = self.news.uci;
        log.events_synced = self.events.total();
        log.news_synced = self.news.total();
        log.total_errors = self.error_details.len() as u64;
        log.error_details = self.error_details.clone();
        log.completed_at_ms = Some(self.completed_at_ms);
        log.duration_ms = Some(self.duration_ms);
    }
}

/// Filter for log listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogFilter {
    pub status: Option<SyncStatus>,
    pub configuration_id: Option<i64>,
}

impl LogFilter {
    #[must_use]
    pub fn matches(&self, log: &SyncLog) -> bool {
        self.status.is_none_or(|s| log.status == s)
            && self
                .configuration_id
                .is_none_or(|id| log.configuration_id == Some(id))
    }
}

/// One page of logs as returned by a store, most recent first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogPage {
    pub logs: Vec<SyncLog>,
    pub total: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub pages: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncLogsPage {
    pub logs: Vec<SyncLog>,
    pub pagination: Pagination,
}

/// Aggregates over a trailing window of days.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatistics {
    pub period_days: u32,
    pub total_syncs: u64,
    pub successful: u64,
    pub failed: u64,
    pub success_rate: f64,
    pub total_events: u64,
    pub total_news: u64,
    pub average_duration_ms: f64,
    pub recent_logs: Vec<SyncLog>,
}

/// What a caller gets back from one executor run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub success: bool,
    pub log_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<SyncResult>,
    /// Set when the data-source call failed outright and no result exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncOutcome {
    /// The error details recorded on the run's log.
    #[must_use]
    pub fn error_details(&self) -> &[String] {
        match (&self.result, &self.error) {
            (Some(result), _) => &result.errors,
            (None, Some(error)) => std::slice::from_ref(error),
            (None, None) => &[],
        }
    }
}

/// Snapshot of one registered timer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTaskStatus {
    pub configuration_id: i64,
    pub cron_expression: String,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run_ms: Option<u64>,
}

/// Snapshot of the scheduler.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub total_tasks: usize,
    pub initialized: bool,
    pub tasks: Vec<ScheduledTaskStatus>,
}
