//! Live cron timers, one per configuration, and the scheduled-run callback.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Weak},
    time::Duration,
};

use {
    chrono::{DateTime, Utc},
    chrono_tz::Tz,
    tokio::{sync::Mutex, task::JoinHandle},
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

#[cfg(feature = "metrics")]
use racefeed_metrics::{counter, gauge, sync as sync_metrics};

use crate::{
    Error, Result,
    cron_expr::CronExpression,
    manager::{SyncManager, SyncRequest, validate_id},
    notify::{NotificationSink, best_effort},
    now_ms,
    store::ConfigurationStore,
    types::{
        ConfigurationWithSchedule, NewSyncLog, ScheduledTaskStatus, SchedulerStatus,
        SyncConfiguration, SyncLogUpdate, SyncOutcome, SyncStatus, TriggerType,
        DEFAULT_TIMEOUT_MINUTES,
    },
};

/// Tunables that are not stored per configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// Deadline for configurations whose `timeout_minutes` is 0.
    pub default_timeout: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(u64::from(DEFAULT_TIMEOUT_MINUTES) * 60),
        }
    }
}

struct ScheduledTask {
    cron: CronExpression,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    fn stop(self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

#[derive(Default)]
struct SchedulerState {
    tasks: HashMap<i64, ScheduledTask>,
    initialized: bool,
}

/// Owns the timers. Every mutation of the task map goes through `state`.
pub struct SyncScheduler {
    store: Arc<dyn ConfigurationStore>,
    manager: Arc<SyncManager>,
    notifier: Arc<dyn NotificationSink>,
    timezone: Option<Tz>,
    options: SchedulerOptions,
    state: Mutex<SchedulerState>,
    in_flight: std::sync::Mutex<HashSet<i64>>,
}

impl SyncScheduler {
    pub fn new(manager: Arc<SyncManager>, notifier: Arc<dyn NotificationSink>) -> Arc<Self> {
        Self::with_options(manager, notifier, SchedulerOptions::default())
    }

    pub fn with_options(
        manager: Arc<SyncManager>,
        notifier: Arc<dyn NotificationSink>,
        options: SchedulerOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            store: Arc::clone(manager.store()),
            timezone: manager.timezone(),
            manager,
            notifier,
            options,
            state: Mutex::new(SchedulerState::default()),
            in_flight: std::sync::Mutex::new(HashSet::new()),
        })
    }

    /// Register a timer for every active auto-sync configuration that has a
    /// schedule. A second call is a no-op.
    ///
    /// Store errors are returned and leave the scheduler uninitialized. A
    /// stored cron expression that no longer parses only skips that
    /// configuration.
    pub async fn initialize(self: &Arc<Self>) -> Result<()> {
        let mut state = self.state.lock().await;
        self.initialize_locked(&mut state).await
    }

    /// Cancel any existing timer for `configuration_id` and start a new one.
    ///
    /// Nothing changes if `cron_expression` does not parse.
    pub async fn schedule_task(
        self: &Arc<Self>,
        configuration_id: i64,
        cron_expression: &str,
    ) -> Result<()> {
        validate_id(configuration_id)?;
        let cron = CronExpression::parse(cron_expression)?;
        let mut state = self.state.lock().await;
        self.schedule_locked(&mut state, configuration_id, cron).await;
        Ok(())
    }

    /// Stop and drop the timer for `configuration_id`. Unknown ids are ignored.
    ///
    /// A run that already started is left to finish.
    pub async fn cancel_task(&self, configuration_id: i64) {
        let mut state = self.state.lock().await;
        self.cancel_locked(&mut state, configuration_id);
    }

    /// Drop every timer and load configurations again.
    pub async fn reload_configurations(self: &Arc<Self>) -> Result<()> {
        let mut state = self.state.lock().await;
        self.cancel_all_locked(&mut state);
        info!("reloading sync configurations");
        self.initialize_locked(&mut state).await
    }

    /// Drop every timer and mark the scheduler uninitialized.
    pub async fn stop_all(&self) {
        let mut state = self.state.lock().await;
        let stopped = state.tasks.len();
        self.cancel_all_locked(&mut state);
        info!(stopped, "sync scheduler stopped");
    }

    pub async fn get_scheduled_tasks_status(&self) -> SchedulerStatus {
        let state = self.state.lock().await;
        let now = now_ms();
        let mut tasks: Vec<ScheduledTaskStatus> = state
            .tasks
            .iter()
            .map(|(&configuration_id, task)| ScheduledTaskStatus {
                configuration_id,
                cron_expression: task.cron.as_str().to_string(),
                running: !task.handle.is_finished(),
                next_run_ms: task.cron.next_run_ms(now, self.timezone),
            })
            .collect();
        tasks.sort_by_key(|t| t.configuration_id);
        SchedulerStatus {
            total_tasks: tasks.len(),
            initialized: state.initialized,
            tasks,
        }
    }

    /// Run a configuration now with `trigger_type = test`.
    ///
    /// The configuration does not need to be active.
    pub async fn test_run(&self, configuration_id: i64) -> Result<SyncOutcome> {
        validate_id(configuration_id)?;
        let configuration = self
            .store
            .get_configuration(configuration_id)
            .await?
            .ok_or_else(|| Error::configuration_not_found(configuration_id))?;
        info!(configuration_id, "test run requested");
        let request = SyncRequest::new(configuration.sync_type(), TriggerType::Test)
            .configuration(configuration_id)
            .timeout(self.deadline_for(&configuration));
        self.manager.execute_sync_with_logging(request).await
    }

    /// What a fired timer does.
    ///
    /// Re-reads the configuration and cancels its own timer if it is gone,
    /// inactive or no longer auto-synced. Never returns an error: a failing
    /// run is recorded on its log and, when enabled, reported to the
    /// notification sink. Returns the run's outcome, or `None` when no run
    /// was recorded.
    pub async fn execute_scheduled_sync(&self, configuration_id: i64) -> Option<SyncOutcome> {
        let configuration = match self.store.get_configuration(configuration_id).await {
            Ok(Some(c)) if c.is_schedulable() => c,
            Ok(found) => {
                info!(
                    configuration_id,
                    exists = found.is_some(),
                    "configuration no longer schedulable, cancelling its task"
                );
                #[cfg(feature = "metrics")]
                counter!(sync_metrics::SELF_CANCELLATIONS_TOTAL).increment(1);
                self.cancel_task(configuration_id).await;
                return None;
            },
            Err(e) => {
                error!(configuration_id, error = %e, "could not load configuration for scheduled sync");
                return None;
            },
        };

        let Some(guard) = InFlightGuard::acquire(&self.in_flight, configuration_id) else {
            warn!(
                configuration_id,
                "previous scheduled sync still running, skipping this fire"
            );
            #[cfg(feature = "metrics")]
            counter!(sync_metrics::OVERLAPPING_FIRES_SKIPPED_TOTAL).increment(1);
            return None;
        };

        let request = SyncRequest::new(configuration.sync_type(), TriggerType::Scheduled)
            .configuration(configuration_id)
            .timeout(self.deadline_for(&configuration));
        let started_at_ms = now_ms();

        let outcome = match self.manager.execute_sync_with_logging(request).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!(configuration_id, error = %e, "scheduled sync could not be recorded");
                self.record_unlogged_failure(&configuration, &e, started_at_ms)
                    .await
            },
        };
        drop(guard);

        self.refresh_run_times(configuration_id).await;

        if let Some(outcome) = &outcome
            && !outcome.success
            && configuration.notifications_enabled
        {
            let delivered = best_effort(
                "failure notification",
                self.notifier.notify_failure(&configuration, outcome),
            )
            .await;
            if delivered.is_none() {
                #[cfg(feature = "metrics")]
                counter!(sync_metrics::NOTIFICATION_FAILURES_TOTAL).increment(1);
            }
        }

        outcome
    }

    // ── Internal ────────────────────────────────────────────────────────

    async fn initialize_locked(self: &Arc<Self>, state: &mut SchedulerState) -> Result<()> {
        if state.initialized {
            info!("sync scheduler already initialized");
            return Ok(());
        }

        let configurations = self.store.list_active_auto_sync_configurations().await?;
        let mut scheduled = 0usize;
        for ConfigurationWithSchedule {
            configuration,
            schedule,
        } in configurations
        {
            let Some(schedule) = schedule else {
                debug!(
                    configuration_id = configuration.id,
                    "active configuration has no schedule"
                );
                continue;
            };
            match CronExpression::parse(&schedule.cron_expression) {
                Ok(cron) => {
                    self.schedule_locked(state, configuration.id, cron).await;
                    scheduled += 1;
                },
                Err(e) => warn!(
                    configuration_id = configuration.id,
                    error = %e,
                    "skipping configuration with invalid cron expression"
                ),
            }
        }

        state.initialized = true;
        info!(tasks = scheduled, "sync scheduler initialized");
        Ok(())
    }

    async fn schedule_locked(
        self: &Arc<Self>,
        state: &mut SchedulerState,
        configuration_id: i64,
        cron: CronExpression,
    ) {
        self.cancel_locked(state, configuration_id);

        let cancel = CancellationToken::new();
        let handle = spawn_timer(
            Arc::downgrade(self),
            configuration_id,
            cron.clone(),
            self.timezone,
            cancel.clone(),
        );
        let next_run_ms = cron.next_run_ms(now_ms(), self.timezone);
        info!(
            configuration_id,
            cron = %cron,
            next_run_ms = ?next_run_ms,
            "scheduled sync task"
        );

        best_effort(
            "persist next run",
            self.store
                .upsert_schedule(configuration_id, cron.as_str(), next_run_ms),
        )
        .await;

        state.tasks.insert(configuration_id, ScheduledTask {
            cron,
            cancel,
            handle,
        });

        #[cfg(feature = "metrics")]
        gauge!(sync_metrics::TASKS_SCHEDULED).set(state.tasks.len() as f64);
    }

    fn cancel_locked(&self, state: &mut SchedulerState, configuration_id: i64) {
        if let Some(task) = state.tasks.remove(&configuration_id) {
            task.stop();
            info!(configuration_id, "cancelled sync task");
            #[cfg(feature = "metrics")]
            gauge!(sync_metrics::TASKS_SCHEDULED).set(state.tasks.len() as f64);
        }
    }

    fn cancel_all_locked(&self, state: &mut SchedulerState) {
        for (_, task) in state.tasks.drain() {
            task.stop();
        }
        state.initialized = false;
        #[cfg(feature = "metrics")]
        gauge!(sync_metrics::TASKS_SCHEDULED).set(0.0);
    }

    fn deadline_for(&self, configuration: &SyncConfiguration) -> Duration {
        match configuration.timeout_minutes {
            0 => self.options.default_timeout,
            minutes => Duration::from_secs(u64::from(minutes) * 60),
        }
    }

    async fn refresh_run_times(&self, configuration_id: i64) {
        let live = {
            let state = self.state.lock().await;
            state.tasks.get(&configuration_id).map(|t| t.cron.clone())
        };
        let cron = match live {
            Some(cron) => Some(cron),
            None => best_effort("load schedule", self.store.get_schedule(configuration_id))
                .await
                .flatten()
                .and_then(|s| CronExpression::parse(&s.cron_expression).ok()),
        };
        let now = now_ms();
        let next_run_ms = cron.and_then(|c| c.next_run_ms(now, self.timezone));
        best_effort(
            "refresh schedule run times",
            self.store
                .update_schedule_run_times(configuration_id, Some(now), next_run_ms),
        )
        .await;
    }

    /// Give a run whose executor call failed exactly one terminal log.
    ///
    /// Closes the row the executor left `running` when there is one, and
    /// only creates a new `failed` row when none was written.
    async fn record_unlogged_failure(
        &self,
        configuration: &SyncConfiguration,
        error: &Error,
        started_at_ms: u64,
    ) -> Option<SyncOutcome> {
        let completed_at_ms = now_ms();
        let message = error.to_string();
        let failed = SyncLogUpdate::failed(
            message.clone(),
            completed_at_ms,
            completed_at_ms.saturating_sub(started_at_ms),
        );

        let log_id = match (error, error.unclosed_log_id()) {
            // The executor's row is already terminal.
            (Error::LogAlreadyFinished { log_id, .. }, _) => *log_id,
            (_, Some(log_id)) => {
                best_effort("close running log", self.store.update_log(log_id, &failed)).await?;
                log_id
            },
            (_, None) => {
                best_effort(
                    "fallback failure log",
                    self.store.create_log(&NewSyncLog {
                        sync_type: configuration.sync_type(),
                        trigger_type: TriggerType::Scheduled,
                        status: SyncStatus::Failed,
                        triggered_by: None,
                        configuration_id: Some(configuration.id),
                        scraper_health: false,
                        started_at_ms,
                        terminal: Some(failed),
                    }),
                )
                .await?
            },
        };
        Some(SyncOutcome {
            success: false,
            log_id,
            result: None,
            error: Some(message),
        })
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        for (_, task) in self.state.get_mut().tasks.drain() {
            task.stop();
        }
    }
}

/// Marks a configuration as having a scheduled run in flight until dropped.
struct InFlightGuard<'a> {
    set: &'a std::sync::Mutex<HashSet<i64>>,
    configuration_id: i64,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(set: &'a std::sync::Mutex<HashSet<i64>>, configuration_id: i64) -> Option<Self> {
        let inserted = set
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(configuration_id);
        inserted.then_some(Self {
            set,
            configuration_id,
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.configuration_id);
    }
}

/// Next fire time, never earlier than or equal to the previous one.
fn next_fire(
    cron: &CronExpression,
    previous: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    tz: Option<Tz>,
) -> Option<DateTime<Utc>> {
    let after = previous.map_or(now, |p| p.max(now));
    cron.next_after(after, tz)
}

/// Sleep until each occurrence and hand the run to its own task, so a slow
/// run neither delays the next fire nor dies when the timer is cancelled.
fn spawn_timer(
    scheduler: Weak<SyncScheduler>,
    configuration_id: i64,
    cron: CronExpression,
    tz: Option<Tz>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut previous = None;
        loop {
            let Some(next) = next_fire(&cron, previous, Utc::now(), tz) else {
                warn!(configuration_id, cron = %cron, "cron expression has no future occurrence");
                break;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(wait) => {},
            }
            previous = Some(next);

            let Some(scheduler) = scheduler.upgrade() else {
                break;
            };
            debug!(configuration_id, "sync timer fired");
            tokio::spawn(async move {
                scheduler.execute_scheduled_sync(configuration_id).await;
            });
        }
    })
}
