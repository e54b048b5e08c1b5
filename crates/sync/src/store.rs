//! Persistence trait for configurations, schedules and run logs.

use async_trait::async_trait;

use crate::{
    Result,
    types::{
        ConfigurationUpsert, ConfigurationWithSchedule, LogFilter, LogPage, NewSyncLog,
        SyncConfiguration, SyncLog, SyncLogUpdate, SyncSchedule,
    },
};

/// Persistence backend for the sync subsystem.
///
/// Configurations are never physically deleted; deactivation goes through
/// [`ConfigurationStore::set_configuration_active`].
#[async_trait]
pub trait ConfigurationStore: Send + Sync {
    /// Configurations with `is_active && auto_sync_enabled`, each with its schedule.
    async fn list_active_auto_sync_configurations(&self) -> Result<Vec<ConfigurationWithSchedule>>;
    async fn list_configurations(&self) -> Result<Vec<ConfigurationWithSchedule>>;
    async fn get_configuration(&self, id: i64) -> Result<Option<SyncConfiguration>>;
    /// Create-or-update keyed by the unique `name`.
    async fn upsert_configuration(&self, data: &ConfigurationUpsert) -> Result<SyncConfiguration>;
    async fn set_configuration_active(&self, id: i64, is_active: bool)
    -> Result<SyncConfiguration>;

    async fn get_schedule(&self, configuration_id: i64) -> Result<Option<SyncSchedule>>;
    async fn upsert_schedule(
        &self,
        configuration_id: i64,
        cron_expression: &str,
        next_run_ms: Option<u64>,
    ) -> Result<SyncSchedule>;
    async fn update_schedule_run_times(
        &self,
        configuration_id: i64,
        last_run_ms: Option<u64>,
        next_run_ms: Option<u64>,
    ) -> Result<()>;

    async fn create_log(&self, data: &NewSyncLog) -> Result<i64>;
    /// Apply the terminal update to a `running` log. Fails with
    /// `LogAlreadyFinished` once the log has a terminal status.
    async fn update_log(&self, log_id: i64, data: &SyncLogUpdate) -> Result<()>;
    async fn get_log(&self, log_id: i64) -> Result<Option<SyncLog>>;
    /// Offset page of logs matching `filter`, most recent first.
    async fn list_logs(&self, filter: &LogFilter, page: u32, limit: u32) -> Result<LogPage>;
    /// All logs with `started_at_ms >= since_ms`, most recent first.
    async fn aggregate_logs(&self, since_ms: u64) -> Result<Vec<SyncLog>>;
    /// Mark every `running` log as failed with `reason`. Returns how many were touched.
    async fn fail_stale_running_logs(&self, reason: &str, now_ms: u64) -> Result<u64>;
}
