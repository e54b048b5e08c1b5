//! In-memory store for tests and embedding. No persistence.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Mutex,
};

use async_trait::async_trait;

use crate::{
    Error, Result, now_ms,
    store::ConfigurationStore,
    types::{
        ConfigurationUpsert, ConfigurationWithSchedule, LogFilter, LogPage, NewSyncLog,
        SyncConfiguration, SyncLog, SyncLogUpdate, SyncSchedule, SyncStatus,
    },
};

#[derive(Default)]
struct Inner {
    configurations: BTreeMap<i64, SyncConfiguration>,
    schedules: HashMap<i64, SyncSchedule>,
    logs: Vec<SyncLog>,
    next_configuration_id: i64,
    next_log_id: i64,
}

impl Inner {
    fn with_schedule(&self, configuration: &SyncConfiguration) -> ConfigurationWithSchedule {
        ConfigurationWithSchedule {
            configuration: configuration.clone(),
            schedule: self.schedules.get(&configuration.id).cloned(),
        }
    }

    /// Logs ordered most recent first; id breaks ties between equal start times.
    fn sorted_logs(&self) -> Vec<&SyncLog> {
        let mut logs: Vec<&SyncLog> = self.logs.iter().collect();
        logs.sort_by(|a, b| {
            b.started_at_ms
                .cmp(&a.started_at_ms)
                .then_with(|| b.id.cmp(&a.id))
        });
        logs
    }
}

/// `HashMap`-backed store guarded by a single mutex.
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_configuration_id: 1,
                next_log_id: 1,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert a log row verbatim. Used to seed history in tests.
    pub fn insert_log(&self, log: SyncLog) {
        let mut inner = self.lock();
        inner.next_log_id = inner.next_log_id.max(log.id + 1);
        inner.logs.push(log);
    }

    /// Number of log rows currently stored.
    pub fn log_count(&self) -> usize {
        self.lock().logs.len()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigurationStore for InMemoryStore {
    async fn list_active_auto_sync_configurations(&self) -> Result<Vec<ConfigurationWithSchedule>> {
        let inner = self.lock();
        Ok(inner
            .configurations
            .values()
            .filter(|c| c.is_schedulable())
            .map(|c| inner.with_schedule(c))
            .collect())
    }

    async fn list_configurations(&self) -> Result<Vec<ConfigurationWithSchedule>> {
        let inner = self.lock();
        Ok(inner
            .configurations
            .values()
            .map(|c| inner.with_schedule(c))
            .collect())
    }

    async fn get_configuration(&self, id: i64) -> Result<Option<SyncConfiguration>> {
        Ok(self.lock().configurations.get(&id).cloned())
    }

    async fn upsert_configuration(&self, data: &ConfigurationUpsert) -> Result<SyncConfiguration> {
        let now = now_ms();
        let mut inner = self.lock();
        if let Some(existing) = inner
            .configurations
            .values_mut()
            .find(|c| c.name == data.name)
        {
            data.apply(existing, now);
            return Ok(existing.clone());
        }

        let id = inner.next_configuration_id;
        inner.next_configuration_id += 1;
        let created = data.create(id, now);
        inner.configurations.insert(id, created.clone());
        Ok(created)
    }

    async fn set_configuration_active(
        &self,
        id: i64,
        is_active: bool,
    ) -> Result<SyncConfiguration> {
        let mut inner = self.lock();
        let configuration = inner
            .configurations
            .get_mut(&id)
            .ok_or_else(|| Error::configuration_not_found(id))?;
        configuration.is_active = is_active;
        configuration.updated_at_ms = now_ms();
        Ok(configuration.clone())
    }

    async fn get_schedule(&self, configuration_id: i64) -> Result<Option<SyncSchedule>> {
        Ok(self.lock().schedules.get(&configuration_id).cloned())
    }

    async fn upsert_schedule(
        &self,
        configuration_id: i64,
        cron_expression: &str,
        next_run_ms: Option<u64>,
    ) -> Result<SyncSchedule> {
        let now = now_ms();
        let mut inner = self.lock();
        if !inner.configurations.contains_key(&configuration_id) {
            return Err(Error::configuration_not_found(configuration_id));
        }
        let schedule = inner
            .schedules
            .entry(configuration_id)
            .and_modify(|s| {
                s.cron_expression = cron_expression.to_string();
                s.next_run_ms = next_run_ms;
                s.updated_at_ms = now;
            })
            .or_insert_with(|| SyncSchedule {
                configuration_id,
                cron_expression: cron_expression.to_string(),
                next_run_ms,
                last_run_ms: None,
                updated_at_ms: now,
            });
        Ok(schedule.clone())
    }

    async fn update_schedule_run_times(
        &self,
        configuration_id: i64,
        last_run_ms: Option<u64>,
        next_run_ms: Option<u64>,
    ) -> Result<()> {
        let mut inner = self.lock();
        let schedule = inner
            .schedules
            .get_mut(&configuration_id)
            .ok_or_else(|| Error::configuration_not_found(configuration_id))?;
        if last_run_ms.is_some() {
            schedule.last_run_ms = last_run_ms;
        }
        schedule.next_run_ms = next_run_ms;
        schedule.updated_at_ms = now_ms();
        Ok(())
    }

    async fn create_log(&self, data: &NewSyncLog) -> Result<i64> {
        let mut inner = self.lock();
        let id = inner.next_log_id;
        inner.next_log_id += 1;
        inner.logs.push(data.clone().into_log(id));
        Ok(id)
    }

    async fn update_log(&self, log_id: i64, data: &SyncLogUpdate) -> Result<()> {
        let mut inner = self.lock();
        let log = inner
            .logs
            .iter_mut()
            .find(|l| l.id == log_id)
            .ok_or(Error::LogNotFound { log_id })?;
        if log.status != SyncStatus::Running {
            return Err(Error::LogAlreadyFinished {
                log_id,
                status: log.status.to_string(),
            });
        }
        data.apply(log);
        Ok(())
    }

    async fn get_log(&self, log_id: i64) -> Result<Option<SyncLog>> {
        Ok(self.lock().logs.iter().find(|l| l.id == log_id).cloned())
    }

    async fn list_logs(&self, filter: &LogFilter, page: u32, limit: u32) -> Result<LogPage> {
        let inner = self.lock();
        let matching: Vec<&SyncLog> = inner
            .sorted_logs()
            .into_iter()
            .filter(|l| filter.matches(l))
            .collect();
        let skip = (page.saturating_sub(1) as usize).saturating_mul(limit as usize);
        Ok(LogPage {
            total: matching.len() as u64,
            logs: matching
                .into_iter()
                .skip(skip)
                .take(limit as usize)
                .cloned()
                .collect(),
        })
    }

    async fn aggregate_logs(&self, since_ms: u64) -> Result<Vec<SyncLog>> {
        let inner = self.lock();
        Ok(inner
            .sorted_logs()
            .into_iter()
            .filter(|l| l.started_at_ms >= since_ms)
            .cloned()
            .collect())
    }

    async fn fail_stale_running_logs(&self, reason: &str, now_ms: u64) -> Result<u64> {
        let mut inner = self.lock();
        let mut touched = 0;
        for log in inner
            .logs
            .iter_mut()
            .filter(|l| l.status == SyncStatus::Running)
        {
            SyncLogUpdate::failed(reason, now_ms, now_ms.saturating_sub(log.started_at_ms))
                .apply(log);
            touched += 1;
        }
        Ok(touched)
    }
}
