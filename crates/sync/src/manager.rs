//! Executor: turns one sync request into exactly one terminal log row.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use {
    chrono_tz::Tz,
    tracing::{error, info, warn},
};

#[cfg(feature = "metrics")]
use racefeed_metrics::{counter, histogram, labels, sync as sync_metrics};

use crate::{
    Error, Result,
    cron_expr::CronExpression,
    notify::best_effort,
    now_ms,
    source::DataSourceClient,
    store::ConfigurationStore,
    types::*,
};

const DAY_MS: u64 = 24 * 60 * 60 * 1000;
const RECENT_LOGS: usize = 10;
/// Upper bound on `limit` for log pagination.
pub const MAX_PAGE_LIMIT: u32 = 500;
/// Error detail recorded on logs left `running` by a previous process.
pub const INTERRUPTED_DETAIL: &str = "interrupted: process stopped before the run completed";

/// Parameters for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub sync_type: SyncType,
    pub trigger_type: TriggerType,
    pub triggered_by: Option<String>,
    pub configuration_id: Option<i64>,
    /// Deadline for the data-source call. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl SyncRequest {
    #[must_use]
    pub fn new(sync_type: SyncType, trigger_type: TriggerType) -> Self {
        Self {
            sync_type,
            trigger_type,
            triggered_by: None,
            configuration_id: None,
            timeout: None,
        }
    }

    #[must_use]
    pub fn triggered_by(mut self, actor: impl Into<String>) -> Self {
        self.triggered_by = Some(actor.into());
        self
    }

    #[must_use]
    pub fn configuration(mut self, configuration_id: i64) -> Self {
        self.configuration_id = Some(configuration_id);
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Runs syncs against the data source and owns the log lifecycle.
pub struct SyncManager {
    store: Arc<dyn ConfigurationStore>,
    source: Arc<dyn DataSourceClient>,
    timezone: Option<Tz>,
}

impl SyncManager {
    pub fn new(store: Arc<dyn ConfigurationStore>, source: Arc<dyn DataSourceClient>) -> Self {
        Self {
            store,
            source,
            timezone: None,
        }
    }

    /// Evaluate cron expressions in `tz` when computing `nextRun`.
    #[must_use]
    pub fn with_timezone(mut self, tz: Option<Tz>) -> Self {
        self.timezone = tz;
        self
    }

    #[must_use]
    pub fn timezone(&self) -> Option<Tz> {
        self.timezone
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn ConfigurationStore> {
        &self.store
    }

    /// Run one sync end-to-end.
    ///
    /// A log row is created in `running` state and updated exactly once to
    /// `completed` or `failed` before this returns. Data-source errors,
    /// timeouts and panics become a `failed` log and `success: false`; only
    /// store failures surface as `Err`. If the row was created but could not
    /// be closed, the error is [`Error::LogNotClosed`] carrying its id.
    pub async fn execute_sync_with_logging(&self, request: SyncRequest) -> Result<SyncOutcome> {
        let scraper_health = match self.source.check_health().await {
            Ok(health) => health.is_healthy,
            Err(e) => {
                warn!(error = %e, "data source health check failed");
                false
            },
        };

        let started_at_ms = now_ms();
        let clock = Instant::now();
        let log_id = self
            .store
            .create_log(&NewSyncLog {
                sync_type: request.sync_type,
                trigger_type: request.trigger_type,
                status: SyncStatus::Running,
                triggered_by: request.triggered_by.clone(),
                configuration_id: request.configuration_id,
                scraper_health,
                started_at_ms,
                terminal: None,
            })
            .await?;

        info!(
            log_id,
            sync_type = %request.sync_type,
            trigger = %request.trigger_type,
            configuration_id = ?request.configuration_id,
            scraper_health,
            "sync started"
        );

        #[cfg(feature = "metrics")]
        counter!(sync_metrics::RUNS_TOTAL, labels::TRIGGER => request.trigger_type.as_str())
            .increment(1);

        let dispatched = self.dispatch(request.sync_type, request.timeout).await;

        let duration_ms = clock.elapsed().as_millis() as u64;
        let completed_at_ms = now_ms();

        #[cfg(feature = "metrics")]
        histogram!(sync_metrics::RUN_DURATION_SECONDS).record(duration_ms as f64 / 1000.0);

        let (update, outcome) = match dispatched {
            Ok(result) => {
                if result.success {
                    info!(
                        log_id,
                        events = result.events.total(),
                        news = result.news.total(),
                        duration_ms,
                        "sync completed"
                    );
                } else {
                    warn!(
                        log_id,
                        errors = result.errors.len(),
                        duration_ms,
                        "sync finished with errors"
                    );
                    #[cfg(feature = "metrics")]
                    counter!(sync_metrics::RUN_FAILURES_TOTAL).increment(1);
                }
                let update = SyncLogUpdate::from_result(&result, completed_at_ms, duration_ms);
                (update, SyncOutcome {
                    success: result.success,
                    log_id,
                    result: Some(result),
                    error: None,
                })
            },
            Err(e) => {
                error!(log_id, error = %e, duration_ms, "sync failed");
                #[cfg(feature = "metrics")]
                counter!(sync_metrics::RUN_FAILURES_TOTAL).increment(1);
                let message = e.to_string();
                let update = SyncLogUpdate::failed(message.clone(), completed_at_ms, duration_ms);
                (update, SyncOutcome {
                    success: false,
                    log_id,
                    result: None,
                    error: Some(message),
                })
            },
        };

        match self.close_log(log_id, &update).await? {
            None => Ok(outcome),
            Some(recorded) => Ok(SyncOutcome {
                success: false,
                log_id,
                result: None,
                error: Some(recorded),
            }),
        }
    }

    /// Write the terminal update for `log_id`.
    ///
    /// If the write fails, one bare `failed` update is attempted so the row
    /// does not stay `running`; its error text is returned when it lands.
    /// When that fails too the error carries `log_id` for the caller.
    async fn close_log(&self, log_id: i64, update: &SyncLogUpdate) -> Result<Option<String>> {
        let first = match self.store.update_log(log_id, update).await {
            Ok(()) => return Ok(None),
            Err(e @ (Error::LogAlreadyFinished { .. } | Error::LogNotFound { .. })) => {
                return Err(e);
            },
            Err(e) => e,
        };
        warn!(log_id, error = %first, "could not record sync result, marking log failed");

        let recorded = format!("could not record sync result: {first}");
        let fallback = SyncLogUpdate::failed(
            recorded.clone(),
            update.completed_at_ms,
            update.duration_ms,
        );
        match self.store.update_log(log_id, &fallback).await {
            Ok(()) => Ok(Some(recorded)),
            Err(e) => Err(Error::log_not_closed(log_id, e)),
        }
    }

    /// Call the data source on its own task so a panic or an expired
    /// deadline is reported as an error instead of escaping this call.
    async fn dispatch(&self, sync_type: SyncType, timeout: Option<Duration>) -> Result<SyncResult> {
        let source = Arc::clone(&self.source);
        let mut task = tokio::spawn(async move {
            match sync_type {
                SyncType::Events => source.sync_events().await.map(SyncResult::from_events),
                SyncType::News => source.sync_news().await.map(SyncResult::from_news),
                SyncType::All => source.sync_all().await,
            }
        });

        let joined = match timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    task.abort();
                    return Err(Error::Timeout { after: limit });
                },
            },
            None => task.await,
        };

        joined.map_err(|e| Error::message(format!("sync task did not complete: {e}")))?
    }

    /// Mark logs left `running` by a previous process as failed.
    pub async fn recover_stale_logs(&self) -> Result<u64> {
        let count = self
            .store
            .fail_stale_running_logs(INTERRUPTED_DETAIL, now_ms())
            .await?;
        if count > 0 {
            warn!(count, "marked interrupted sync logs as failed");
        }
        Ok(count)
    }

    /// Create or update a configuration by name.
    ///
    /// A supplied cron expression is validated before anything is written;
    /// a failure to write the schedule afterwards does not undo the
    /// configuration write.
    pub async fn upsert_configuration(
        &self,
        data: &ConfigurationUpsert,
    ) -> Result<SyncConfiguration> {
        if data.name.trim().is_empty() {
            return Err(Error::validation("configuration name must not be empty"));
        }
        if data.timeout_minutes == Some(0) {
            return Err(Error::validation("timeoutMinutes must be > 0"));
        }
        let cron = data
            .cron_expression
            .as_deref()
            .map(CronExpression::parse)
            .transpose()?;

        let configuration = self.store.upsert_configuration(data).await?;
        info!(
            configuration_id = configuration.id,
            name = %configuration.name,
            "configuration saved"
        );

        if let Some(cron) = cron {
            let next_run_ms = cron.next_run_ms(now_ms(), self.timezone);
            best_effort(
                "schedule upsert",
                self.store
                    .upsert_schedule(configuration.id, cron.as_str(), next_run_ms),
            )
            .await;
        }

        Ok(configuration)
    }

    /// Flip `is_active`. Live timers are not touched; callers that need the
    /// change to take effect now reload the scheduler.
    pub async fn toggle_configuration(
        &self,
        id: i64,
        is_active: bool,
    ) -> Result<SyncConfiguration> {
        validate_id(id)?;
        let configuration = self.store.set_configuration_active(id, is_active).await?;
        info!(configuration_id = id, is_active, "configuration toggled");
        Ok(configuration)
    }

    pub async fn list_configurations(&self) -> Result<Vec<ConfigurationWithSchedule>> {
        self.store.list_configurations().await
    }

    pub async fn get_configuration(&self, id: i64) -> Result<SyncConfiguration> {
        validate_id(id)?;
        self.store
            .get_configuration(id)
            .await?
            .ok_or_else(|| Error::configuration_not_found(id))
    }

    pub async fn get_log(&self, log_id: i64) -> Result<SyncLog> {
        self.store
            .get_log(log_id)
            .await?
            .ok_or(Error::LogNotFound { log_id })
    }

    /// Aggregates over logs started in the last `days` days.
    pub async fn get_sync_statistics(&self, days: u32) -> Result<SyncStatistics> {
        let since = now_ms().saturating_sub(u64::from(days) * DAY_MS);
        let logs = self.store.aggregate_logs(since).await?;
        Ok(compute_statistics(days, logs))
    }

    /// Offset page of logs, most recent first, optionally filtered by status.
    pub async fn get_sync_logs(
        &self,
        page: u32,
        limit: u32,
        status: Option<SyncStatus>,
    ) -> Result<SyncLogsPage> {
        if page == 0 {
            return Err(Error::validation("page must be >= 1"));
        }
        if limit == 0 || limit > MAX_PAGE_LIMIT {
            return Err(Error::validation(format!(
                "limit must be between 1 and {MAX_PAGE_LIMIT}"
            )));
        }

        let filter = LogFilter {
            status,
            ..Default::default()
        };
        let LogPage { logs, total } = self.store.list_logs(&filter, page, limit).await?;
        Ok(SyncLogsPage {
            logs,
            pagination: Pagination {
                page,
                limit,
                total,
                pages: total.div_ceil(u64::from(limit)),
            },
        })
    }
}

pub(crate) fn validate_id(id: i64) -> Result<()> {
    if id <= 0 {
        return Err(Error::validation(format!("invalid configuration id: {id}")));
    }
    Ok(())
}

/// `logs` must be ordered most recent first.
fn compute_statistics(days: u32, logs: Vec<SyncLog>) -> SyncStatistics {
    let total_syncs = logs.len() as u64;
    let successful = logs
        .iter()
        .filter(|l| l.status == SyncStatus::Completed)
        .count() as u64;
    let failed = logs
        .iter()
        .filter(|l| l.status == SyncStatus::Failed)
        .count() as u64;
    let success_rate = if total_syncs == 0 {
        0.0
    } else {
        successful as f64 / total_syncs as f64 * 100.0
    };

    let durations: Vec<u64> = logs.iter().filter_map(|l| l.duration_ms).collect();
    let average_duration_ms = if durations.is_empty() {
        0.0
    } else {
        durations.iter().sum::<u64>() as f64 / durations.len() as f64
    };

    SyncStatistics {
        period_days: days,
        total_syncs,
        successful,
        failed,
        success_rate,
        total_events: logs.iter().map(|l| l.events_synced).sum(),
        total_news: logs.iter().map(|l| l.news_synced).sum(),
        average_duration_ms,
        recent_logs: logs.into_iter().take(RECENT_LOGS).collect(),
    }
}
