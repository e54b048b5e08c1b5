//! `racefeed doctor`: config validation, database and data-source checks.
//!
//! Prints a report with `[ok]`, `[warn]`, `[fail]`, `[skip]` or `[info]`
//! per item and exits non-zero when anything failed.

use std::time::Duration;

use {
    anyhow::Result,
    racefeed_config::{LoadedConfig, Severity},
    racefeed_sync::{
        cron_expr::CronExpression, source::DataSourceClient, source_http::HttpDataSource,
    },
};

use crate::{app::sqlite_file, config_commands::validate_loaded};

// ── ANSI helpers ────────────────────────────────────────────────────────────

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const DIM: &str = "\x1b[2m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Ok,
    Warn,
    Fail,
    Skip,
    Info,
}

impl Status {
    fn label(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Warn => "warn",
            Self::Fail => "fail",
            Self::Skip => "skip",
            Self::Info => "info",
        }
    }

    fn color(self) -> &'static str {
        match self {
            Self::Ok => GREEN,
            Self::Warn => YELLOW,
            Self::Fail => RED,
            Self::Skip => DIM,
            Self::Info => CYAN,
        }
    }
}

struct CheckItem {
    status: Status,
    message: String,
}

struct Section {
    title: String,
    items: Vec<CheckItem>,
}

impl Section {
    fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            items: Vec::new(),
        }
    }

    fn push(&mut self, status: Status, message: impl Into<String>) {
        self.items.push(CheckItem {
            status,
            message: message.into(),
        });
    }

    fn has(&self, status: Status) -> bool {
        self.items.iter().any(|i| i.status == status)
    }
}

fn print_report(sections: &[Section]) -> (usize, usize) {
    let mut errors = 0usize;
    let mut warnings = 0usize;

    for section in sections {
        eprintln!("{BOLD}{}{RESET}", section.title);
        for item in &section.items {
            let color = item.status.color();
            let label = item.status.label();
            eprintln!("  [{color}{label}{RESET}]  {}", item.message);
            match item.status {
                Status::Fail => errors += 1,
                Status::Warn => warnings += 1,
                _ => {},
            }
        }
        eprintln!();
    }

    (errors, warnings)
}

// ── Entry point ─────────────────────────────────────────────────────────────

pub async fn handle_doctor(loaded: &LoadedConfig) -> Result<()> {
    eprintln!("{BOLD}racefeed doctor{RESET}");
    eprintln!("{BOLD}==============={RESET}\n");

    let config = &loaded.config;
    let sections = vec![
        check_config(loaded),
        check_database(&config.database.url).await,
        check_source(
            &config.source.base_url,
            Duration::from_secs(config.source.health_timeout_secs.max(1)),
        )
        .await,
    ];

    let (errors, warnings) = print_report(&sections);
    eprintln!("{BOLD}Summary:{RESET} {errors} error(s), {warnings} warning(s)");

    if errors > 0 {
        std::process::exit(1);
    }
    Ok(())
}

// ── 1. Config ───────────────────────────────────────────────────────────────

fn check_config(loaded: &LoadedConfig) -> Section {
    let label = loaded
        .path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "defaults".into());
    let mut section = Section::new(format!("Config ({label})"));

    let result = match validate_loaded(loaded) {
        Ok(r) => r,
        Err(e) => {
            section.push(Status::Fail, format!("{e:#}"));
            return section;
        },
    };

    if result.diagnostics.is_empty() {
        section.push(Status::Ok, "No issues found");
    }
    for d in &result.diagnostics {
        let status = match d.severity {
            Severity::Error => Status::Fail,
            Severity::Warning => Status::Warn,
        };
        let msg = if d.path.is_empty() {
            d.message.clone()
        } else {
            format!("{}: {}", d.path, d.message)
        };
        section.push(status, msg);
    }

    let tz = loaded.config.scheduler.timezone.as_deref().unwrap_or("UTC");
    section.push(Status::Info, format!("Cron expressions evaluated in {tz}"));
    if !loaded.config.scheduler.enabled {
        section.push(Status::Info, "Scheduler disabled: serve registers no timers");
    }
    section
}

// ── 2. Database ─────────────────────────────────────────────────────────────

async fn check_database(url: &str) -> Section {
    let mut section = Section::new("Database");

    match sqlite_file(url) {
        Some(path) if !path.exists() => {
            section.push(
                Status::Skip,
                format!(
                    "{} not found (created on first start or `racefeed db migrate`)",
                    path.display()
                ),
            );
            return section;
        },
        Some(path) => section.push(Status::Ok, format!("Database file: {}", path.display())),
        None => section.push(Status::Info, format!("Non-file database: {url}")),
    }

    let pool = match sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect(url)
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            section.push(Status::Fail, format!("Cannot open database: {e}"));
            return section;
        },
    };

    match sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM sync_configurations")
        .fetch_one(&pool)
        .await
    {
        Ok(n) => section.push(Status::Ok, format!("{n} sync configuration(s)")),
        Err(e) => {
            section.push(
                Status::Fail,
                format!("Sync tables unavailable (run `racefeed db migrate`): {e}"),
            );
            pool.close().await;
            return section;
        },
    }

    check_stored_crons(&pool, &mut section).await;
    check_running_logs(&pool, &mut section).await;

    pool.close().await;
    section
}

async fn check_stored_crons(pool: &sqlx::SqlitePool, section: &mut Section) {
    let rows: Vec<(i64, String)> = match sqlx::query_as(
        "SELECT configuration_id, cron_expression FROM sync_schedules ORDER BY configuration_id",
    )
    .fetch_all(pool)
    .await
    {
        Ok(rows) => rows,
        Err(e) => {
            section.push(Status::Fail, format!("Cannot read schedules: {e}"));
            return;
        },
    };

    for (id, expr) in &rows {
        if let Err(e) = CronExpression::parse(expr) {
            section.push(
                Status::Warn,
                format!("Configuration {id} will not be scheduled: {e}"),
            );
        }
    }
    if !section.has(Status::Warn) {
        section.push(Status::Ok, format!("{} stored schedule(s) parse", rows.len()));
    }
}

async fn check_running_logs(pool: &sqlx::SqlitePool, section: &mut Section) {
    match sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM sync_logs WHERE status = 'running'")
        .fetch_one(pool)
        .await
    {
        Ok(0) => {},
        Ok(n) => section.push(
            Status::Info,
            format!("{n} run(s) still marked running; failed as interrupted on next serve"),
        ),
        Err(e) => section.push(Status::Fail, format!("Cannot read sync logs: {e}")),
    }
}

// ── 3. Data source ──────────────────────────────────────────────────────────

async fn check_source(base_url: &str, timeout: Duration) -> Section {
    let mut section = Section::new(format!("Data source ({base_url})"));

    let source = match HttpDataSource::with_timeouts(base_url, timeout, timeout) {
        Ok(s) => s,
        Err(e) => {
            section.push(Status::Fail, format!("Cannot build HTTP client: {e}"));
            return section;
        },
    };

    match source.check_health().await {
        Ok(h) if h.is_healthy => section.push(Status::Ok, "Health check passed"),
        Ok(_) => section.push(Status::Warn, "Source reports unhealthy"),
        Err(e) => section.push(Status::Warn, format!("Health check failed: {e}")),
    }
    section
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        racefeed_sync::{
            store::ConfigurationStore, store_sqlite::SqliteStore, types::ConfigurationUpsert,
        },
        std::path::Path,
    };

    fn statuses(section: &Section) -> Vec<Status> {
        section.items.iter().map(|i| i.status).collect()
    }

    fn database_url(path: &Path) -> String {
        format!("sqlite://{}?mode=rwc", path.display())
    }

    #[tokio::test]
    async fn missing_database_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let section = check_database(&database_url(&dir.path().join("racefeed.db"))).await;
        assert_eq!(statuses(&section), vec![Status::Skip]);
    }

    #[tokio::test]
    async fn migrated_database_reports_ok() {
        let dir = tempfile::tempdir().unwrap();
        let url = database_url(&dir.path().join("racefeed.db"));
        let store = SqliteStore::new(&url).await.unwrap();
        let mut upsert = ConfigurationUpsert::named("nightly");
        upsert.cron_expression = Some("0 2 * * *".into());
        let configuration = store.upsert_configuration(&upsert).await.unwrap();
        store
            .upsert_schedule(configuration.id, "0 2 * * *", None)
            .await
            .unwrap();

        let section = check_database(&url).await;
        assert!(!section.has(Status::Fail), "{:?}", statuses(&section));
        assert!(!section.has(Status::Warn));
        assert!(
            section
                .items
                .iter()
                .any(|i| i.message == "1 sync configuration(s)")
        );
    }

    #[tokio::test]
    async fn bad_stored_cron_warns() {
        let dir = tempfile::tempdir().unwrap();
        let url = database_url(&dir.path().join("racefeed.db"));
        let store = SqliteStore::new(&url).await.unwrap();
        let configuration = store
            .upsert_configuration(&ConfigurationUpsert::named("broken"))
            .await
            .unwrap();
        store
            .upsert_schedule(configuration.id, "* * * *", None)
            .await
            .unwrap();

        let section = check_database(&url).await;
        assert!(section.has(Status::Warn));
        assert!(!section.has(Status::Fail));
    }

    #[tokio::test]
    async fn unreachable_source_warns() {
        let section = check_source("http://127.0.0.1:9", Duration::from_secs(1)).await;
        assert_eq!(statuses(&section), vec![Status::Warn]);
    }
}
