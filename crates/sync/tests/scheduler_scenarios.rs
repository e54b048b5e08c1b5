#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end scenarios against the in-memory store and scripted sources.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use {
    async_trait::async_trait,
    racefeed_sync::{
        Error, Result, SyncManager, SyncRequest, SyncScheduler,
        notify::NotificationSink,
        source::DataSourceClient,
        store::ConfigurationStore,
        store_memory::InMemoryStore,
        types::*,
    },
};

/// Data source whose `sync_all` answer is swapped per test.
struct ScriptedSource {
    all: Mutex<Result<SyncResult>>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    fn returning(result: Result<SyncResult>) -> Arc<Self> {
        Arc::new(Self {
            all: Mutex::new(result),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSourceClient for ScriptedSource {
    async fn check_health(&self) -> Result<HealthStatus> {
        Ok(HealthStatus { is_healthy: true })
    }

    async fn sync_events(&self) -> Result<SourceSyncResult> {
        Err(Error::data_source("events not scripted"))
    }

    async fn sync_news(&self) -> Result<SourceSyncResult> {
        Err(Error::data_source("news not scripted"))
    }

    async fn sync_all(&self) -> Result<SyncResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &*self.all.lock().unwrap() {
            Ok(result) => Ok(result.clone()),
            Err(e) => Err(Error::message(e.to_string())),
        }
    }
}

#[derive(Default)]
struct RecordingSink {
    failures: Mutex<Vec<(i64, i64)>>,
    broken: bool,
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify_failure(
        &self,
        configuration: &SyncConfiguration,
        outcome: &SyncOutcome,
    ) -> Result<()> {
        self.failures
            .lock()
            .unwrap()
            .push((configuration.id, outcome.log_id));
        if self.broken {
            return Err(Error::message("smtp relay refused"));
        }
        Ok(())
    }
}

/// Delegates to an in-memory store, optionally failing selected calls.
///
/// Log writes fail for the next N calls, where N is the stored count.
struct FlakyStore {
    inner: InMemoryStore,
    fail_listing: AtomicBool,
    log_create_failures: AtomicUsize,
    log_update_failures: AtomicUsize,
    fail_schedule_writes: AtomicBool,
}

impl FlakyStore {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryStore::new(),
            fail_listing: AtomicBool::new(false),
            log_create_failures: AtomicUsize::new(0),
            log_update_failures: AtomicUsize::new(0),
            fail_schedule_writes: AtomicBool::new(false),
        })
    }
}

/// Take one failure from `budget`, if any are left.
fn spend(budget: &AtomicUsize) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn db_down() -> Error {
    Error::message("database is locked")
}

#[async_trait]
impl ConfigurationStore for FlakyStore {
    async fn list_active_auto_sync_configurations(&self) -> Result<Vec<ConfigurationWithSchedule>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(db_down());
        }
        self.inner.list_active_auto_sync_configurations().await
    }

    async fn list_configurations(&self) -> Result<Vec<ConfigurationWithSchedule>> {
        self.inner.list_configurations().await
    }

    async fn get_configuration(&self, id: i64) -> Result<Option<SyncConfiguration>> {
        self.inner.get_configuration(id).await
    }

    async fn upsert_configuration(&self, data: &ConfigurationUpsert) -> Result<SyncConfiguration> {
        self.inner.upsert_configuration(data).await
    }

    async fn set_configuration_active(
        &self,
        id: i64,
        is_active: bool,
    ) -> Result<SyncConfiguration> {
        self.inner.set_configuration_active(id, is_active).await
    }

    async fn get_schedule(&self, configuration_id: i64) -> Result<Option<SyncSchedule>> {
        self.inner.get_schedule(configuration_id).await
    }

    async fn upsert_schedule(
        &self,
        configuration_id: i64,
        cron_expression: &str,
        next_run_ms: Option<u64>,
    ) -> Result<SyncSchedule> {
        if self.fail_schedule_writes.load(Ordering::SeqCst) {
            return Err(db_down());
        }
        self.inner
            .upsert_schedule(configuration_id, cron_expression, next_run_ms)
            .await
    }

    async fn update_schedule_run_times(
        &self,
        configuration_id: i64,
        last_run_ms: Option<u64>,
        next_run_ms: Option<u64>,
    ) -> Result<()> {
        if self.fail_schedule_writes.load(Ordering::SeqCst) {
            return Err(db_down());
        }
        self.inner
            .update_schedule_run_times(configuration_id, last_run_ms, next_run_ms)
            .await
    }

    async fn create_log(&self, data: &NewSyncLog) -> Result<i64> {
        if spend(&self.log_create_failures) {
            return Err(db_down());
        }
        self.inner.create_log(data).await
    }

    async fn update_log(&self, log_id: i64, data: &SyncLogUpdate) -> Result<()> {
        if spend(&self.log_update_failures) {
            return Err(db_down());
        }
        self.inner.update_log(log_id, data).await
    }

    async fn get_log(&self, log_id: i64) -> Result<Option<SyncLog>> {
        self.inner.get_log(log_id).await
    }

    async fn list_logs(&self, filter: &LogFilter, page: u32, limit: u32) -> Result<LogPage> {
        self.inner.list_logs(filter, page, limit).await
    }

    async fn aggregate_logs(&self, since_ms: u64) -> Result<Vec<SyncLog>> {
        self.inner.aggregate_logs(since_ms).await
    }

    async fn fail_stale_running_logs(&self, reason: &str, now_ms: u64) -> Result<u64> {
        self.inner.fail_stale_running_logs(reason, now_ms).await
    }
}

fn counts_5_3_2_1() -> SyncResult {
    SyncResult {
        success: true,
        events: SourceCounts { usabmx: 5, uci: 3 },
        news: SourceCounts { usabmx: 2, uci: 1 },
        errors: vec![],
    }
}

struct Harness {
    store: Arc<FlakyStore>,
    source: Arc<ScriptedSource>,
    sink: Arc<RecordingSink>,
    manager: Arc<SyncManager>,
    scheduler: Arc<SyncScheduler>,
}

fn harness(result: Result<SyncResult>, sink: RecordingSink) -> Harness {
    let store = FlakyStore::new();
    let source = ScriptedSource::returning(result);
    let sink = Arc::new(sink);
    let manager = Arc::new(SyncManager::new(store.clone(), source.clone()));
    let scheduler = SyncScheduler::new(Arc::clone(&manager), sink.clone());
    Harness {
        store,
        source,
        sink,
        manager,
        scheduler,
    }
}

async fn configure(h: &Harness, upsert: ConfigurationUpsert) -> SyncConfiguration {
    h.manager.upsert_configuration(&upsert).await.unwrap()
}

fn nightly(name: &str) -> ConfigurationUpsert {
    ConfigurationUpsert {
        auto_sync_enabled: Some(true),
        cron_expression: Some("0 2 * * *".into()),
        ..ConfigurationUpsert::named(name)
    }
}

#[tokio::test]
async fn scheduled_run_records_completed_counts() {
    let h = harness(Ok(counts_5_3_2_1()), RecordingSink::default());
    let config = configure(&h, nightly("nightly")).await;

    h.scheduler.initialize().await.unwrap();
    let status = h.scheduler.get_scheduled_tasks_status().await;
    assert_eq!(status.total_tasks, 1);
    assert_eq!(status.tasks[0].configuration_id, config.id);

    let outcome = h
        .scheduler
        .execute_scheduled_sync(config.id)
        .await
        .unwrap();
    assert!(outcome.success);

    let log = h.store.get_log(outcome.log_id).await.unwrap().unwrap();
    assert_eq!(log.status, SyncStatus::Completed);
    assert_eq!(log.trigger_type, TriggerType::Scheduled);
    assert_eq!(log.events_synced, 8);
    assert_eq!(log.news_synced, 3);
    assert_eq!(log.total_errors, 0);
    assert!(h.sink.failures.lock().unwrap().is_empty());
}

#[tokio::test]
async fn thrown_sync_fails_with_single_error_detail() {
    let h = harness(
        Err(Error::data_source("ECONNREFUSED")),
        RecordingSink::default(),
    );

    let outcome = h
        .manager
        .execute_sync_with_logging(SyncRequest::new(SyncType::All, TriggerType::Manual))
        .await
        .unwrap();
    assert!(!outcome.success);
    assert!(outcome.result.is_none());

    let log = h.store.get_log(outcome.log_id).await.unwrap().unwrap();
    assert_eq!(log.status, SyncStatus::Failed);
    assert_eq!(log.error_details.len(), 1);
}

#[tokio::test]
async fn every_run_leaves_exactly_one_terminal_log() {
    let h = harness(Ok(counts_5_3_2_1()), RecordingSink::default());
    for trigger in [TriggerType::Manual, TriggerType::Test, TriggerType::Scheduled] {
        h.manager
            .execute_sync_with_logging(SyncRequest::new(SyncType::All, trigger))
            .await
            .unwrap();
    }
    *h.source.all.lock().unwrap() = Err(Error::data_source("boom"));
    h.manager
        .execute_sync_with_logging(SyncRequest::new(SyncType::All, TriggerType::Manual))
        .await
        .unwrap();

    let page = h.manager.get_sync_logs(1, 50, None).await.unwrap();
    assert_eq!(page.pagination.total, 4);
    assert!(page.logs.iter().all(|l| l.status.is_terminal()));
    let running = h
        .manager
        .get_sync_logs(1, 50, Some(SyncStatus::Running))
        .await
        .unwrap();
    assert_eq!(running.pagination.total, 0);
}

#[tokio::test]
async fn failed_scheduled_run_notifies_when_enabled() {
    let h = harness(
        Ok(SyncResult {
            success: false,
            errors: vec!["uci: 503".into()],
            ..Default::default()
        }),
        RecordingSink::default(),
    );
    let quiet = configure(&h, nightly("quiet")).await;
    let loud = configure(&h, ConfigurationUpsert {
        notifications_enabled: Some(true),
        notification_email: Some("ops@example.com".into()),
        ..nightly("loud")
    })
    .await;

    let q = h.scheduler.execute_scheduled_sync(quiet.id).await.unwrap();
    let l = h.scheduler.execute_scheduled_sync(loud.id).await.unwrap();
    assert!(!q.success && !l.success);

    let failures = h.sink.failures.lock().unwrap().clone();
    assert_eq!(failures, vec![(loud.id, l.log_id)]);
}

#[tokio::test]
async fn broken_notification_channel_does_not_fail_the_callback() {
    let h = harness(
        Err(Error::data_source("scraper down")),
        RecordingSink {
            broken: true,
            ..Default::default()
        },
    );
    let config = configure(&h, ConfigurationUpsert {
        notifications_enabled: Some(true),
        ..nightly("loud")
    })
    .await;

    let outcome = h.scheduler.execute_scheduled_sync(config.id).await.unwrap();
    assert!(!outcome.success);
    assert_eq!(h.sink.failures.lock().unwrap().len(), 1);
}

async fn all_logs(h: &Harness) -> Vec<SyncLog> {
    h.manager.get_sync_logs(1, 50, None).await.unwrap().logs
}

#[tokio::test]
async fn unrecordable_result_closes_the_original_log() {
    let h = harness(Ok(counts_5_3_2_1()), RecordingSink::default());
    let config = configure(&h, nightly("nightly")).await;
    // Executor write and its retry both fail; the callback's write lands.
    h.store.log_update_failures.store(2, Ordering::SeqCst);

    let outcome = h.scheduler.execute_scheduled_sync(config.id).await.unwrap();
    assert!(!outcome.success);

    let logs = all_logs(&h).await;
    assert_eq!(logs.len(), 1);
    let log = &logs[0];
    assert_eq!(log.id, outcome.log_id);
    assert_eq!(log.status, SyncStatus::Failed);
    assert_eq!(log.configuration_id, Some(config.id));
    assert!(log.error_details[0].contains("database is locked"));
    assert_eq!(
        h.manager
            .get_sync_logs(1, 10, Some(SyncStatus::Running))
            .await
            .unwrap()
            .pagination
            .total,
        0
    );
}

#[tokio::test]
async fn executor_retries_a_failed_terminal_write() {
    let h = harness(Ok(counts_5_3_2_1()), RecordingSink::default());
    h.store.log_update_failures.store(1, Ordering::SeqCst);

    let outcome = h
        .manager
        .execute_sync_with_logging(SyncRequest::new(SyncType::All, TriggerType::Manual))
        .await
        .unwrap();
    assert!(!outcome.success);
    assert!(outcome.result.is_none());
    assert!(
        outcome.error_details()[0].starts_with("could not record sync result"),
        "{outcome:?}"
    );

    let logs = all_logs(&h).await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, SyncStatus::Failed);
    assert_eq!(logs[0].error_details, outcome.error_details());
}

#[tokio::test]
async fn executor_reports_the_log_it_could_not_close() {
    let h = harness(Ok(counts_5_3_2_1()), RecordingSink::default());
    h.store.log_update_failures.store(2, Ordering::SeqCst);

    let err = h
        .manager
        .execute_sync_with_logging(SyncRequest::new(SyncType::All, TriggerType::Manual))
        .await
        .unwrap_err();
    let log_id = err.unclosed_log_id().unwrap();
    let log = h.store.get_log(log_id).await.unwrap().unwrap();
    assert_eq!(log.status, SyncStatus::Running);
}

#[tokio::test]
async fn unwritable_log_falls_back_to_a_failed_row() {
    let h = harness(Ok(counts_5_3_2_1()), RecordingSink::default());
    let config = configure(&h, nightly("nightly")).await;
    h.store.log_create_failures.store(1, Ordering::SeqCst);

    let outcome = h.scheduler.execute_scheduled_sync(config.id).await.unwrap();
    assert!(!outcome.success);
    assert_eq!(h.source.calls(), 0);

    let logs = all_logs(&h).await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].id, outcome.log_id);
    assert_eq!(logs[0].status, SyncStatus::Failed);
    assert_eq!(logs[0].trigger_type, TriggerType::Scheduled);
    assert!(logs[0].error_details[0].contains("database is locked"));
}

/// Sink whose delivery never completes.
#[derive(Default)]
struct StalledSink {
    entered: AtomicUsize,
}

#[async_trait]
impl NotificationSink for StalledSink {
    async fn notify_failure(
        &self,
        _configuration: &SyncConfiguration,
        _outcome: &SyncOutcome,
    ) -> Result<()> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

#[tokio::test]
async fn stalled_notification_does_not_block_later_fires() {
    let store = FlakyStore::new();
    let source = ScriptedSource::returning(Err(Error::data_source("scraper down")));
    let sink = Arc::new(StalledSink::default());
    let manager = Arc::new(SyncManager::new(store.clone(), source.clone()));
    let scheduler = SyncScheduler::new(Arc::clone(&manager), sink.clone());
    let config = manager
        .upsert_configuration(&ConfigurationUpsert {
            notifications_enabled: Some(true),
            ..nightly("loud")
        })
        .await
        .unwrap();

    let stuck = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.execute_scheduled_sync(config.id).await })
    };
    for _ in 0..100 {
        if sink.entered.load(Ordering::SeqCst) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(sink.entered.load(Ordering::SeqCst), 1);

    // The first callback is parked in delivery; the next fire still runs.
    let second = tokio::spawn({
        let scheduler = Arc::clone(&scheduler);
        async move { scheduler.execute_scheduled_sync(config.id).await }
    });
    for _ in 0..100 {
        if source.calls() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(source.calls(), 2);
    assert_eq!(store.inner.log_count(), 2);

    stuck.abort();
    second.abort();
}

#[tokio::test]
async fn deactivation_between_fires_self_cancels() {
    let h = harness(Ok(counts_5_3_2_1()), RecordingSink::default());
    let config = configure(&h, nightly("nightly")).await;
    h.scheduler.initialize().await.unwrap();

    h.scheduler.execute_scheduled_sync(config.id).await.unwrap();
    assert_eq!(h.source.calls(), 1);

    h.manager
        .toggle_configuration(config.id, false)
        .await
        .unwrap();
    // Toggling alone leaves the timer registered.
    assert_eq!(h.scheduler.get_scheduled_tasks_status().await.total_tasks, 1);

    assert!(h.scheduler.execute_scheduled_sync(config.id).await.is_none());
    assert_eq!(h.source.calls(), 1);
    assert_eq!(h.scheduler.get_scheduled_tasks_status().await.total_tasks, 0);
}

#[tokio::test]
async fn auto_sync_disabled_self_cancels() {
    let h = harness(Ok(counts_5_3_2_1()), RecordingSink::default());
    let config = configure(&h, nightly("nightly")).await;
    h.scheduler.initialize().await.unwrap();

    configure(&h, ConfigurationUpsert {
        auto_sync_enabled: Some(false),
        ..ConfigurationUpsert::named("nightly")
    })
    .await;
    assert!(h.scheduler.execute_scheduled_sync(config.id).await.is_none());
    assert_eq!(h.scheduler.get_scheduled_tasks_status().await.total_tasks, 0);
}

#[tokio::test]
async fn invalid_cron_registers_nothing() {
    let h = harness(Ok(counts_5_3_2_1()), RecordingSink::default());
    for bad in [
        "",
        "* * * *",
        "* * * * * *",
        "61 * * * *",
        "not a cron at all",
        "@daily",
    ] {
        let err = h.scheduler.schedule_task(42, bad).await.unwrap_err();
        assert!(err.is_validation(), "{bad:?} should be rejected");
    }
    assert_eq!(h.scheduler.get_scheduled_tasks_status().await.total_tasks, 0);
}

#[tokio::test]
async fn double_schedule_leaves_one_task() {
    let h = harness(Ok(counts_5_3_2_1()), RecordingSink::default());
    h.scheduler.schedule_task(42, "0 2 * * *").await.unwrap();
    h.scheduler.schedule_task(42, "0 2 * * *").await.unwrap();
    let status = h.scheduler.get_scheduled_tasks_status().await;
    assert_eq!(status.total_tasks, 1);
    assert!(status.tasks[0].running);
}

#[tokio::test]
async fn cancel_unknown_is_a_no_op() {
    let h = harness(Ok(counts_5_3_2_1()), RecordingSink::default());
    h.scheduler.schedule_task(42, "0 2 * * *").await.unwrap();
    h.scheduler.cancel_task(999).await;
    assert_eq!(h.scheduler.get_scheduled_tasks_status().await.total_tasks, 1);
}

#[tokio::test]
async fn schedule_write_failure_still_registers_timer() {
    let h = harness(Ok(counts_5_3_2_1()), RecordingSink::default());
    let config = configure(&h, nightly("nightly")).await;
    h.store.fail_schedule_writes.store(true, Ordering::SeqCst);

    h.scheduler
        .schedule_task(config.id, "30 6 * * 1-5")
        .await
        .unwrap();
    assert_eq!(h.scheduler.get_scheduled_tasks_status().await.total_tasks, 1);

    // The run itself still succeeds when the timestamp refresh cannot be written.
    let outcome = h.scheduler.execute_scheduled_sync(config.id).await.unwrap();
    assert!(outcome.success);
}

#[tokio::test]
async fn initialize_propagates_store_errors() {
    let h = harness(Ok(counts_5_3_2_1()), RecordingSink::default());
    configure(&h, nightly("nightly")).await;
    h.store.fail_listing.store(true, Ordering::SeqCst);

    assert!(h.scheduler.initialize().await.is_err());
    let status = h.scheduler.get_scheduled_tasks_status().await;
    assert!(!status.initialized);
    assert_eq!(status.total_tasks, 0);

    h.store.fail_listing.store(false, Ordering::SeqCst);
    h.scheduler.initialize().await.unwrap();
    assert!(h.scheduler.get_scheduled_tasks_status().await.initialized);
}

#[tokio::test]
async fn reload_reflects_toggles() {
    let h = harness(Ok(counts_5_3_2_1()), RecordingSink::default());
    let a = configure(&h, nightly("a")).await;
    configure(&h, nightly("b")).await;
    h.scheduler.initialize().await.unwrap();
    assert_eq!(h.scheduler.get_scheduled_tasks_status().await.total_tasks, 2);

    h.manager.toggle_configuration(a.id, false).await.unwrap();
    h.scheduler.reload_configurations().await.unwrap();

    let status = h.scheduler.get_scheduled_tasks_status().await;
    assert!(status.initialized);
    assert_eq!(status.total_tasks, 1);
    assert!(status.tasks.iter().all(|t| t.configuration_id != a.id));
}

#[tokio::test]
async fn log_pagination_second_page() {
    let store = Arc::new(InMemoryStore::new());
    let manager = SyncManager::new(store.clone(), ScriptedSource::returning(Ok(counts_5_3_2_1())));
    for i in 0..25u64 {
        store
            .create_log(&NewSyncLog {
                sync_type: SyncType::All,
                trigger_type: TriggerType::Scheduled,
                status: SyncStatus::Completed,
                triggered_by: None,
                configuration_id: None,
                scraper_health: true,
                started_at_ms: 1_000_000 + i * 1_000,
                terminal: None,
            })
            .await
            .unwrap();
    }

    let page = manager.get_sync_logs(2, 10, None).await.unwrap();
    assert_eq!(page.pagination, Pagination {
        page: 2,
        limit: 10,
        total: 25,
        pages: 3,
    });
    let starts: Vec<u64> = page.logs.iter().map(|l| l.started_at_ms).collect();
    let expected: Vec<u64> = (5..15u64).rev().map(|i| 1_000_000 + i * 1_000).collect();
    assert_eq!(starts, expected);
}

#[tokio::test]
async fn statistics_average_ignores_runs_without_duration() {
    let h = harness(Ok(counts_5_3_2_1()), RecordingSink::default());
    for _ in 0..3 {
        h.manager
            .execute_sync_with_logging(SyncRequest::new(SyncType::All, TriggerType::Manual))
            .await
            .unwrap();
    }
    // A run still in progress has no duration yet.
    h.store
        .create_log(&NewSyncLog {
            sync_type: SyncType::All,
            trigger_type: TriggerType::Manual,
            status: SyncStatus::Running,
            triggered_by: None,
            configuration_id: None,
            scraper_health: true,
            started_at_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_millis() as u64,
            terminal: None,
        })
        .await
        .unwrap();

    let logs = h.store.aggregate_logs(0).await.unwrap();
    let timed: Vec<u64> = logs.iter().filter_map(|l| l.duration_ms).collect();
    assert_eq!(timed.len(), 3);
    let expected = timed.iter().sum::<u64>() as f64 / timed.len() as f64;

    let stats = h.manager.get_sync_statistics(1).await.unwrap();
    assert_eq!(stats.total_syncs, 4);
    assert_eq!(stats.successful, 3);
    assert!((stats.average_duration_ms - expected).abs() < 1e-9);
    assert_eq!(stats.total_events, 24);
    assert_eq!(stats.total_news, 9);
}
