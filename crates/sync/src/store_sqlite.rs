//! SQLite-backed store using sqlx.

use {
    async_trait::async_trait,
    sqlx::{
        Row, SqliteConnection, SqlitePool,
        sqlite::{SqlitePoolOptions, SqliteRow},
    },
};

use crate::{
    Error, Result, now_ms,
    store::ConfigurationStore,
    types::{
        ConfigurationUpsert, ConfigurationWithSchedule, LogFilter, LogPage, NewSyncLog,
        SyncConfiguration, SyncLog, SyncLogUpdate, SyncSchedule, SyncStatus,
    },
};

const CONFIGURATION_COLUMNS: &str = "c.id, c.name, c.description, c.sync_events, c.sync_news, \
     c.sync_usabmx, c.sync_uci, c.sync_frequency, c.sync_time, c.auto_sync_enabled, c.is_active, \
     c.notifications_enabled, c.notification_email, c.max_retries, c.timeout_minutes, \
     c.created_by, c.created_at_ms, c.updated_at_ms, \
     s.cron_expression, s.next_run_ms, s.last_run_ms, s.updated_at_ms AS schedule_updated_at_ms";

const LOG_COLUMNS: &str = "id, sync_type, trigger_type, status, triggered_by, configuration_id, \
     events_usabmx, events_uci, news_usabmx, news_uci, events_synced, news_synced, total_errors, \
     error_details, started_at_ms, completed_at_ms, duration_ms, scraper_health";

/// SQLite-backed persistence for configurations, schedules and logs.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect, run migrations and return a ready store.
    ///
    /// In-memory databases get a single connection so every query sees the
    /// same schema.
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = options.connect(database_url).await?;

        crate::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Create a store using an existing pool (migrations must already be run).
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch_configuration(
        conn: &mut SqliteConnection,
        clause: &str,
        bind: QueryKey<'_>,
    ) -> Result<Option<ConfigurationWithSchedule>> {
        let sql = format!(
            "SELECT {CONFIGURATION_COLUMNS} FROM sync_configurations c
             LEFT JOIN sync_schedules s ON s.configuration_id = c.id
             WHERE {clause}"
        );
        let query = sqlx::query(&sql);
        let query = match bind {
            QueryKey::Id(id) => query.bind(id),
            QueryKey::Name(name) => query.bind(name),
        };
        query
            .fetch_optional(conn)
            .await?
            .map(|row| configuration_from_row(&row))
            .transpose()
    }

    async fn write_configuration(
        conn: &mut SqliteConnection,
        c: &SyncConfiguration,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE sync_configurations SET
                description = ?, sync_events = ?, sync_news = ?, sync_usabmx = ?, sync_uci = ?,
                sync_frequency = ?, sync_time = ?, auto_sync_enabled = ?, is_active = ?,
                notifications_enabled = ?, notification_email = ?, max_retries = ?,
                timeout_minutes = ?, updated_at_ms = ?
             WHERE id = ?",
        )
        .bind(&c.description)
        .bind(c.sync_events)
        .bind(c.sync_news)
        .bind(c.sync_usabmx)
        .bind(c.sync_uci)
        .bind(&c.sync_frequency)
        .bind(&c.sync_time)
        .bind(c.auto_sync_enabled)
        .bind(c.is_active)
        .bind(c.notifications_enabled)
        .bind(&c.notification_email)
        .bind(i64::from(c.max_retries))
        .bind(i64::from(c.timeout_minutes))
        .bind(c.updated_at_ms as i64)
        .bind(c.id)
        .execute(conn)
        .await?;
        Ok(())
    }
}

enum QueryKey<'a> {
    Id(i64),
    Name(&'a str),
}

fn configuration_from_row(row: &SqliteRow) -> Result<ConfigurationWithSchedule> {
    let configuration = SyncConfiguration {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        sync_events: row.get("sync_events"),
        sync_news: row.get("sync_news"),
        sync_usabmx: row.get("sync_usabmx"),
        sync_uci: row.get("sync_uci"),
        sync_frequency: row.get("sync_frequency"),
        sync_time: row.get("sync_time"),
        auto_sync_enabled: row.get("auto_sync_enabled"),
        is_active: row.get("is_active"),
        notifications_enabled: row.get("notifications_enabled"),
        notification_email: row.get("notification_email"),
        max_retries: row.get::<i64, _>("max_retries") as u32,
        timeout_minutes: row.get::<i64, _>("timeout_minutes") as u32,
        created_by: row.get("created_by"),
        created_at_ms: row.get::<i64, _>("created_at_ms") as u64,
        updated_at_ms: row.get::<i64, _>("updated_at_ms") as u64,
    };
    let schedule = row
        .get::<Option<String>, _>("cron_expression")
        .map(|cron_expression| SyncSchedule {
            configuration_id: configuration.id,
            cron_expression,
            next_run_ms: opt_u64(row, "next_run_ms"),
            last_run_ms: opt_u64(row, "last_run_ms"),
            updated_at_ms: opt_u64(row, "schedule_updated_at_ms").unwrap_or_default(),
        });
    Ok(ConfigurationWithSchedule {
        configuration,
        schedule,
    })
}

fn log_from_row(row: &SqliteRow) -> Result<SyncLog> {
    let error_details: String = row.get("error_details");
    Ok(SyncLog {
        id: row.get("id"),
        sync_type: row.get::<String, _>("sync_type").parse()?,
        trigger_type: row.get::<String, _>("trigger_type").parse()?,
        status: row.get::<String, _>("status").parse()?,
        triggered_by: row.get("triggered_by"),
        configuration_id: row.get("configuration_id"),
        events_usabmx: row.get::<i64, _>("events_usabmx") as u64,
        events_uci: row.get::<i64, _>("events_uci") as u64,
        news_usabmx: row.get::<i64, _>("news_usabmx") as u64,
        news_uci: row.get::<i64, _>("news_uci") as u64,
        events_synced: row.get::<i64, _>("events_synced") as u64,
        news_synced: row.get::<i64, _>("news_synced") as u64,
        total_errors: row.get::<i64, _>("total_errors") as u64,
        error_details: serde_json::from_str(&error_details)?,
        started_at_ms: row.get::<i64, _>("started_at_ms") as u64,
        completed_at_ms: opt_u64(row, "completed_at_ms"),
        duration_ms: opt_u64(row, "duration_ms"),
        scraper_health: row.get("scraper_health"),
    })
}

fn opt_u64(row: &SqliteRow, column: &str) -> Option<u64> {
    row.try_get::<Option<i64>, _>(column)
        .ok()
        .flatten()
        .map(|v| v as u64)
}

#[async_trait]
impl ConfigurationStore for SqliteStore {
    async fn list_active_auto_sync_configurations(&self) -> Result<Vec<ConfigurationWithSchedule>> {
        let sql = format!(
            "SELECT {CONFIGURATION_COLUMNS} FROM sync_configurations c
             LEFT JOIN sync_schedules s ON s.configuration_id = c.id
             WHERE c.is_active = 1 AND c.auto_sync_enabled = 1
             ORDER BY c.id"
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(configuration_from_row).collect()
    }

    async fn list_configurations(&self) -> Result<Vec<ConfigurationWithSchedule>> {
        let sql = format!(
            "SELECT {CONFIGURATION_COLUMNS} FROM sync_configurations c
             LEFT JOIN sync_schedules s ON s.configuration_id = c.id
             ORDER BY c.id"
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(configuration_from_row).collect()
    }

    async fn get_configuration(&self, id: i64) -> Result<Option<SyncConfiguration>> {
        let mut conn = self.pool.acquire().await?;
        Ok(
            Self::fetch_configuration(&mut conn, "c.id = ?", QueryKey::Id(id))
                .await?
                .map(|c| c.configuration),
        )
    }

    async fn upsert_configuration(&self, data: &ConfigurationUpsert) -> Result<SyncConfiguration> {
        let now = now_ms();
        let mut tx = self.pool.begin().await?;

        let existing =
            Self::fetch_configuration(&mut tx, "c.name = ?", QueryKey::Name(&data.name)).await?;
        let configuration = match existing {
            Some(found) => {
                let mut configuration = found.configuration;
                data.apply(&mut configuration, now);
                Self::write_configuration(&mut tx, &configuration).await?;
                configuration
            },
            None => {
                let draft = data.create(0, now);
                let result = sqlx::query(
                    "INSERT INTO sync_configurations (
                        name, description, sync_events, sync_news, sync_usabmx, sync_uci,
                        sync_frequency, sync_time, auto_sync_enabled, is_active,
                        notifications_enabled, notification_email, max_retries, timeout_minutes,
                        created_by, created_at_ms, updated_at_ms
                     ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&draft.name)
                .bind(&draft.description)
                .bind(draft.sync_events)
                .bind(draft.sync_news)
                .bind(draft.sync_usabmx)
                .bind(draft.sync_uci)
                .bind(&draft.sync_frequency)
                .bind(&draft.sync_time)
                .bind(draft.auto_sync_enabled)
                .bind(draft.is_active)
                .bind(draft.notifications_enabled)
                .bind(&draft.notification_email)
                .bind(i64::from(draft.max_retries))
                .bind(i64::from(draft.timeout_minutes))
                .bind(&draft.created_by)
                .bind(now as i64)
                .bind(now as i64)
                .execute(&mut *tx)
                .await?;
                SyncConfiguration {
                    id: result.last_insert_rowid(),
                    ..draft
                }
            },
        };

        tx.commit().await?;
        Ok(configuration)
    }

    async fn set_configuration_active(
        &self,
        id: i64,
        is_active: bool,
    ) -> Result<SyncConfiguration> {
        let result = sqlx::query(
            "UPDATE sync_configurations SET is_active = ?, updated_at_ms = ? WHERE id = ?",
        )
        .bind(is_active)
        .bind(now_ms() as i64)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::configuration_not_found(id));
        }
        self.get_configuration(id)
            .await?
            .ok_or_else(|| Error::configuration_not_found(id))
    }

    async fn get_schedule(&self, configuration_id: i64) -> Result<Option<SyncSchedule>> {
        let mut conn = self.pool.acquire().await?;
        Ok(Self::fetch_configuration(
            &mut conn,
            "c.id = ?",
            QueryKey::Id(configuration_id),
        )
        .await?
        .and_then(|c| c.schedule))
    }

    async fn upsert_schedule(
        &self,
        configuration_id: i64,
        cron_expression: &str,
        next_run_ms: Option<u64>,
    ) -> Result<SyncSchedule> {
        if self.get_configuration(configuration_id).await?.is_none() {
            return Err(Error::configuration_not_found(configuration_id));
        }
        let now = now_ms();
        sqlx::query(
            "INSERT INTO sync_schedules (configuration_id, cron_expression, next_run_ms, updated_at_ms)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(configuration_id) DO UPDATE SET
                cron_expression = excluded.cron_expression,
                next_run_ms = excluded.next_run_ms,
                updated_at_ms = excluded.updated_at_ms",
        )
        .bind(configuration_id)
        .bind(cron_expression)
        .bind(next_run_ms.map(|v| v as i64))
        .bind(now as i64)
        .execute(&self.pool)
        .await?;

        self.get_schedule(configuration_id)
            .await?
            .ok_or_else(|| Error::configuration_not_found(configuration_id))
    }

    async fn update_schedule_run_times(
        &self,
        configuration_id: i64,
        last_run_ms: Option<u64>,
        next_run_ms: Option<u64>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE sync_schedules SET
                last_run_ms = COALESCE(?, last_run_ms),
                next_run_ms = ?,
                updated_at_ms = ?
             WHERE configuration_id = ?",
        )
        .bind(last_run_ms.map(|v| v as i64))
        .bind(next_run_ms.map(|v| v as i64))
        .bind(now_ms() as i64)
        .bind(configuration_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::message(format!(
                "no schedule for configuration {configuration_id}"
            )));
        }
        Ok(())
    }

    async fn create_log(&self, data: &NewSyncLog) -> Result<i64> {
        // Build the full row in memory so a log created in a terminal state
        // carries its counts in the same insert.
        let log = data.clone().into_log(0);
        let result = sqlx::query(
            "INSERT INTO sync_logs (
                sync_type, trigger_type, status, triggered_by, configuration_id,
                events_usabmx, events_uci, news_usabmx, news_uci, events_synced, news_synced,
                total_errors, error_details, started_at_ms, completed_at_ms, duration_ms,
                scraper_health
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(log.sync_type.as_str())
        .bind(log.trigger_type.as_str())
        .bind(log.status.as_str())
        .bind(&log.triggered_by)
        .bind(log.configuration_id)
        .bind(log.events_usabmx as i64)
        .bind(log.events_uci as i64)
        .bind(log.news_usabmx as i64)
        .bind(log.news_uci as i64)
        .bind(log.events_synced as i64)
        .bind(log.news_synced as i64)
        .bind(log.total_errors as i64)
        .bind(serde_json::to_string(&log.error_details)?)
        .bind(log.started_at_ms as i64)
        .bind(log.completed_at_ms.map(|v| v as i64))
        .bind(log.duration_ms.map(|v| v as i64))
        .bind(log.scraper_health)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn update_log(&self, log_id: i64, data: &SyncLogUpdate) -> Result<()> {
        let result = sqlx::query(
            "UPDATE sync_logs SET
                status = ?, events_usabmx = ?, events_uci = ?, news_usabmx = ?, news_uci = ?,
                events_synced = ?, news_synced = ?, total_errors = ?, error_details = ?,
                completed_at_ms = ?, duration_ms = ?
             WHERE id = ? AND status = 'running'",
        )
        .bind(data.status.as_str())
        .bind(data.events.usabmx as i64)
        .bind(data.events.uci as i64)
        .bind(data.news.usabmx as i64)
        .bind(data.news.uci as i64)
        .bind(data.events.total() as i64)
        .bind(data.news.total() as i64)
        .bind(data.error_details.len() as i64)
        .bind(serde_json::to_string(&data.error_details)?)
        .bind(data.completed_at_ms as i64)
        .bind(data.duration_ms as i64)
        .bind(log_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            let status: Option<String> =
                sqlx::query_scalar("SELECT status FROM sync_logs WHERE id = ?")
                    .bind(log_id)
                    .fetch_optional(&self.pool)
                    .await?;
            return Err(match status {
                Some(status) => Error::LogAlreadyFinished { log_id, status },
                None => Error::LogNotFound { log_id },
            });
        }
        Ok(())
    }

    async fn get_log(&self, log_id: i64) -> Result<Option<SyncLog>> {
        let sql = format!("SELECT {LOG_COLUMNS} FROM sync_logs WHERE id = ?");
        sqlx::query(&sql)
            .bind(log_id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| log_from_row(&row))
            .transpose()
    }

    async fn list_logs(&self, filter: &LogFilter, page: u32, limit: u32) -> Result<LogPage> {
        let status = filter.status.map(SyncStatus::as_str);
        let where_clause = "WHERE (? IS NULL OR status = ?) AND (? IS NULL OR configuration_id = ?)";

        let total: i64 = sqlx::query(&format!(
            "SELECT COUNT(*) AS total FROM sync_logs {where_clause}"
        ))
        .bind(status)
        .bind(status)
        .bind(filter.configuration_id)
        .bind(filter.configuration_id)
        .fetch_one(&self.pool)
        .await?
        .get("total");

        let offset = i64::from(page.saturating_sub(1)) * i64::from(limit);
        let rows = sqlx::query(&format!(
            "SELECT {LOG_COLUMNS} FROM sync_logs {where_clause}
             ORDER BY started_at_ms DESC, id DESC
             LIMIT ? OFFSET ?"
        ))
        .bind(status)
        .bind(status)
        .bind(filter.configuration_id)
        .bind(filter.configuration_id)
        .bind(i64::from(limit))
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(LogPage {
            logs: rows.iter().map(log_from_row).collect::<Result<_>>()?,
            total: total as u64,
        })
    }

    async fn aggregate_logs(&self, since_ms: u64) -> Result<Vec<SyncLog>> {
        let sql = format!(
            "SELECT {LOG_COLUMNS} FROM sync_logs WHERE started_at_ms >= ?
             ORDER BY started_at_ms DESC, id DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(since_ms as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(log_from_row).collect()
    }

    async fn fail_stale_running_logs(&self, reason: &str, now_ms: u64) -> Result<u64> {
        let details = serde_json::to_string(&[reason])?;
        let result = sqlx::query(
            "UPDATE sync_logs SET
                status = 'failed', total_errors = 1, error_details = ?,
                completed_at_ms = ?, duration_ms = MAX(? - started_at_ms, 0)
             WHERE status = 'running'",
        )
        .bind(details)
        .bind(now_ms as i64)
        .bind(now_ms as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
