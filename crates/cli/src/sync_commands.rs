use std::time::Duration;

use {
    chrono::{DateTime, Utc},
    chrono_tz::Tz,
    clap::ValueEnum,
    racefeed_config::RacefeedConfig,
    racefeed_sync::{
        SyncRequest,
        cron_expr::{CronExpression, parse_timezone},
        types::{SyncOutcome, SyncStatus, SyncType, TriggerType},
    },
    serde::Serialize,
    tracing::{info, warn},
};

use crate::app::App;

/// Scope argument for `racefeed sync`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SyncKind {
    Events,
    News,
    All,
}

impl From<SyncKind> for SyncType {
    fn from(kind: SyncKind) -> Self {
        match kind {
            SyncKind::Events => Self::Events,
            SyncKind::News => Self::News,
            SyncKind::All => Self::All,
        }
    }
}

/// Status filter for `racefeed logs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatusFilter {
    Running,
    Completed,
    Failed,
}

impl From<StatusFilter> for SyncStatus {
    fn from(status: StatusFilter) -> Self {
        match status {
            StatusFilter::Running => Self::Running,
            StatusFilter::Completed => Self::Completed,
            StatusFilter::Failed => Self::Failed,
        }
    }
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run the scheduler until Ctrl-C. SIGHUP reloads configurations.
pub async fn serve(app: &App, config: &RacefeedConfig) -> anyhow::Result<()> {
    app.manager.recover_stale_logs().await?;

    if config.scheduler.enabled {
        app.scheduler.initialize().await?;
        let status = app.scheduler.get_scheduled_tasks_status().await;
        info!(tasks = status.total_tasks, "sync scheduler running");
    } else {
        info!("scheduler disabled in config, no timers registered");
    }

    wait_for_shutdown(app, config.scheduler.enabled).await?;
    app.scheduler.stop_all().await;

    let rendered = app.metrics.render();
    if !rendered.is_empty() {
        print!("{rendered}");
    }
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown(app: &App, reload: bool) -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup())?;
    loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res?;
                info!("shutdown requested");
                return Ok(());
            },
            _ = hangup.recv() => {
                if !reload {
                    continue;
                }
                match app.scheduler.reload_configurations().await {
                    Ok(()) => {
                        let status = app.scheduler.get_scheduled_tasks_status().await;
                        info!(tasks = status.total_tasks, "configurations reloaded");
                    },
                    Err(e) => warn!(error = %e, "configuration reload failed"),
                }
            },
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_app: &App, _reload: bool) -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    Ok(())
}

/// Manual run. No deadline unless one is given.
pub async fn run_sync(
    app: &App,
    kind: SyncKind,
    triggered_by: Option<String>,
    timeout_minutes: Option<u32>,
) -> anyhow::Result<SyncOutcome> {
    let mut request = SyncRequest::new(kind.into(), TriggerType::Manual);
    if let Some(actor) = triggered_by {
        request = request.triggered_by(actor);
    }
    if let Some(minutes) = timeout_minutes.filter(|m| *m > 0) {
        request = request.timeout(Duration::from_secs(u64::from(minutes) * 60));
    }
    Ok(app.manager.execute_sync_with_logging(request).await?)
}

/// Print an outcome and exit non-zero when the run failed.
pub fn report_outcome(outcome: &SyncOutcome) -> anyhow::Result<()> {
    print_json(outcome)?;
    if !outcome.success {
        std::process::exit(1);
    }
    Ok(())
}

/// The next `count` firings of `expr`, rendered in `tz` (UTC when unset).
pub fn upcoming_runs(
    expr: &str,
    timezone: Option<&str>,
    after: DateTime<Utc>,
    count: usize,
) -> anyhow::Result<Vec<String>> {
    let cron = CronExpression::parse(expr)?;
    let tz: Option<Tz> = timezone.map(parse_timezone).transpose()?;
    Ok(cron
        .upcoming(after, tz, count)
        .into_iter()
        .map(|dt| match tz {
            Some(tz) => dt.with_timezone(&tz).to_rfc3339(),
            None => dt.to_rfc3339(),
        })
        .collect())
}

pub fn check_cron(expr: &str, config: &RacefeedConfig, count: usize) -> anyhow::Result<()> {
    let timezone = config.scheduler.timezone.as_deref();
    let runs = upcoming_runs(expr, timezone, Utc::now(), count)?;
    println!("{expr} ({})", timezone.unwrap_or("UTC"));
    for run in runs {
        println!("  {run}");
    }
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, racefeed_sync::types::ConfigurationUpsert};

    async fn offline_app() -> App {
        let mut config = RacefeedConfig::default();
        config.database.url = "sqlite::memory:".into();
        // Nothing listens here; every data-source call fails fast.
        config.source.base_url = "http://127.0.0.1:9".into();
        config.source.health_timeout_secs = 1;
        config.source.request_timeout_secs = 2;
        App::build(&config).await.unwrap()
    }

    #[test]
    fn upcoming_runs_in_timezone() {
        let after = DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let runs = upcoming_runs("0 2 * * *", Some("America/Denver"), after, 2).unwrap();
        assert_eq!(
            runs,
            vec!["2026-03-02T02:00:00-07:00", "2026-03-03T02:00:00-07:00"]
        );
    }

    #[test]
    fn upcoming_runs_rejects_bad_input() {
        let now = Utc::now();
        assert!(upcoming_runs("* * * *", None, now, 1).is_err());
        assert!(upcoming_runs("0 2 * * *", Some("Nowhere/Land"), now, 1).is_err());
    }

    #[tokio::test]
    async fn manual_run_against_unreachable_source_is_logged_as_failed() {
        let app = offline_app().await;
        let outcome = run_sync(&app, SyncKind::Events, Some("ops".into()), None)
            .await
            .unwrap();
        assert!(!outcome.success);

        let log = app.manager.get_log(outcome.log_id).await.unwrap();
        assert_eq!(log.status, SyncStatus::Failed);
        assert_eq!(log.trigger_type, TriggerType::Manual);
        assert_eq!(log.triggered_by.as_deref(), Some("ops"));
        assert!(!log.scraper_health);
        assert_eq!(log.error_details, outcome.error_details());
        assert_eq!(log.error_details.len(), 1);
    }

    #[tokio::test]
    async fn test_run_uses_test_trigger() {
        let app = offline_app().await;
        let mut upsert = ConfigurationUpsert::named("nightly");
        upsert.sync_events = Some(false);
        let configuration = app.manager.upsert_configuration(&upsert).await.unwrap();

        let outcome = app.scheduler.test_run(configuration.id).await.unwrap();
        let log = app.manager.get_log(outcome.log_id).await.unwrap();
        assert_eq!(log.trigger_type, TriggerType::Test);
        assert_eq!(log.sync_type, SyncType::News);
        assert_eq!(log.configuration_id, Some(configuration.id));
    }
}
