mod app;
mod config_commands;
mod db_commands;
mod doctor_commands;
mod sync_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use crate::{
    app::App,
    sync_commands::{StatusFilter, SyncKind, print_json},
};

#[derive(Parser)]
#[command(name = "racefeed", about = "racefeed: scheduled race event and news sync")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery of ./racefeed.toml and ~/.config/racefeed/).
    #[arg(long, global = true, env = "RACEFEED_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until Ctrl-C (default when no subcommand is provided).
    Serve,
    /// Run a manual sync now.
    Sync {
        #[arg(value_enum)]
        kind: SyncKind,
        /// Who asked for the run, recorded on the log.
        #[arg(long)]
        by: Option<String>,
        /// Abort the run after this many minutes.
        #[arg(long)]
        timeout_minutes: Option<u32>,
    },
    /// Run a stored configuration now with the `test` trigger.
    TestRun { id: i64 },
    /// Config file checks and sync configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
    /// Page through sync logs, most recent first.
    Logs {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 20)]
        limit: u32,
        #[arg(long, value_enum)]
        status: Option<StatusFilter>,
    },
    /// Aggregate statistics over recent runs.
    Stats {
        #[arg(long, default_value_t = 7)]
        days: u32,
    },
    /// Validate a cron expression and print its next firings.
    CheckCron {
        expr: String,
        #[arg(long, default_value_t = 5)]
        count: usize,
    },
    /// Config validation, database and data-source checks.
    Doctor,
    /// Database management (reset, migrate).
    Db {
        #[command(subcommand)]
        action: db_commands::DbAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);

    let loaded = racefeed_config::load(cli.config.as_deref())?;
    let config = &loaded.config;

    match cli.command {
        None | Some(Commands::Serve) => {
            info!(version = env!("CARGO_PKG_VERSION"), "racefeed starting");
            let app = App::build(config).await?;
            sync_commands::serve(&app, config).await
        },
        Some(Commands::Sync {
            kind,
            by,
            timeout_minutes,
        }) => {
            let app = App::build(config).await?;
            let outcome = sync_commands::run_sync(&app, kind, by, timeout_minutes).await?;
            sync_commands::report_outcome(&outcome)
        },
        Some(Commands::TestRun { id }) => {
            let app = App::build(config).await?;
            let outcome = app.scheduler.test_run(id).await?;
            sync_commands::report_outcome(&outcome)
        },
        Some(Commands::Config { action }) => {
            config_commands::handle_config(action, &loaded).await
        },
        Some(Commands::Logs {
            page,
            limit,
            status,
        }) => {
            let app = App::build(config).await?;
            let logs = app
                .manager
                .get_sync_logs(page, limit, status.map(Into::into))
                .await?;
            print_json(&logs)
        },
        Some(Commands::Stats { days }) => {
            let app = App::build(config).await?;
            print_json(&app.manager.get_sync_statistics(days).await?)
        },
        Some(Commands::CheckCron { expr, count }) => {
            sync_commands::check_cron(&expr, config, count)
        },
        Some(Commands::Doctor) => doctor_commands::handle_doctor(&loaded).await,
        Some(Commands::Db { action }) => db_commands::handle_db(action, config).await,
    }
}
