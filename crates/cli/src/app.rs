//! Wires config into the store, data source, notifier, executor and scheduler.

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    anyhow::Context,
    racefeed_config::{RacefeedConfig, Severity, validate_config},
    racefeed_metrics::{MetricsHandle, MetricsRecorderConfig, init_metrics},
    racefeed_sync::{
        SyncManager, SyncScheduler,
        cron_expr::parse_timezone,
        notify::{LogNotifier, NotificationSink, WebhookNotifier},
        scheduler::SchedulerOptions,
        source_http::HttpDataSource,
        store_sqlite::SqliteStore,
    },
    tracing::{debug, error, info, warn},
};

pub struct App {
    pub manager: Arc<SyncManager>,
    pub scheduler: Arc<SyncScheduler>,
    pub metrics: MetricsHandle,
}

impl App {
    /// Validate `config` and wire the engine. Any error diagnostic aborts.
    pub async fn build(config: &RacefeedConfig) -> anyhow::Result<Self> {
        ensure_valid(config)?;

        let timezone = config
            .scheduler
            .timezone
            .as_deref()
            .map(parse_timezone)
            .transpose()?;

        let store = Arc::new(open_store(&config.database.url).await?);
        let source = Arc::new(HttpDataSource::with_timeouts(
            &config.source.base_url,
            Duration::from_secs(config.source.request_timeout_secs),
            Duration::from_secs(config.source.health_timeout_secs),
        )?);

        let notifier: Arc<dyn NotificationSink> = match &config.notifications.webhook_url {
            Some(url) => {
                info!(url = %url, "failure notifications go to webhook");
                Arc::new(WebhookNotifier::with_timeout(
                    url,
                    Duration::from_secs(config.notifications.timeout_secs),
                )?)
            },
            None => Arc::new(LogNotifier),
        };

        let manager = Arc::new(SyncManager::new(store, source).with_timezone(timezone));
        let scheduler = SyncScheduler::with_options(
            Arc::clone(&manager),
            notifier,
            SchedulerOptions {
                default_timeout: Duration::from_secs(
                    u64::from(config.scheduler.default_timeout_minutes) * 60,
                ),
            },
        );

        let metrics = init_metrics(MetricsRecorderConfig {
            enabled: config.metrics.enabled,
            global_labels: Vec::new(),
        })?;

        Ok(Self {
            manager,
            scheduler,
            metrics,
        })
    }
}

/// Refuse to wire anything up from a config with error diagnostics.
fn ensure_valid(config: &RacefeedConfig) -> anyhow::Result<()> {
    let result = validate_config(config);
    for d in &result.diagnostics {
        match d.severity {
            Severity::Error => error!("{d}"),
            Severity::Warning => warn!("{d}"),
        }
    }
    if result.has_errors() {
        anyhow::bail!(
            "invalid configuration ({} error(s)); run `racefeed config check`",
            result.count(Severity::Error)
        );
    }
    Ok(())
}

/// Connect the SQLite store, creating the database directory first.
pub async fn open_store(url: &str) -> anyhow::Result<SqliteStore> {
    if let Some(path) = sqlite_file(url)
        && let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    debug!(url, "opening sync database");
    SqliteStore::new(url)
        .await
        .with_context(|| format!("failed to open database {url}"))
}

/// File path behind a `sqlite:` URL, or `None` for in-memory databases.
pub fn sqlite_file(url: &str) -> Option<PathBuf> {
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or_default();
    if path.is_empty() || path.contains(":memory:") {
        return None;
    }
    Some(PathBuf::from(path))
}
