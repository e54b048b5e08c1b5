use std::path::Path;

use {
    anyhow::{Context, Result},
    clap::Subcommand,
    racefeed_config::{
        LoadedConfig, Severity, ValidationResult, validate_config, validate_toml_str,
    },
    racefeed_sync::types::ConfigurationUpsert,
};

use crate::{app::App, sync_commands::print_json};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the config file and report errors/warnings.
    Check,
    /// List sync configurations with their schedules.
    List,
    /// Create or update a sync configuration by name.
    Upsert(UpsertArgs),
    /// Activate or deactivate a configuration.
    Toggle {
        id: i64,
        #[arg(action = clap::ArgAction::Set)]
        active: bool,
    },
}

#[derive(Debug, clap::Args)]
pub struct UpsertArgs {
    name: String,
    #[arg(long)]
    description: Option<String>,
    /// Five-field cron expression, e.g. "0 2 * * *".
    #[arg(long)]
    cron: Option<String>,
    #[arg(long)]
    events: Option<bool>,
    #[arg(long)]
    news: Option<bool>,
    #[arg(long)]
    usabmx: Option<bool>,
    #[arg(long)]
    uci: Option<bool>,
    #[arg(long)]
    auto_sync: Option<bool>,
    #[arg(long)]
    notify: Option<bool>,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    max_retries: Option<u32>,
    #[arg(long)]
    timeout_minutes: Option<u32>,
    #[arg(long)]
    by: Option<String>,
}

impl From<UpsertArgs> for ConfigurationUpsert {
    fn from(args: UpsertArgs) -> Self {
        Self {
            name: args.name,
            description: args.description,
            sync_events: args.events,
            sync_news: args.news,
            sync_usabmx: args.usabmx,
            sync_uci: args.uci,
            auto_sync_enabled: args.auto_sync,
            notifications_enabled: args.notify,
            notification_email: args.email,
            max_retries: args.max_retries,
            timeout_minutes: args.timeout_minutes,
            cron_expression: args.cron,
            created_by: args.by,
            ..Default::default()
        }
    }
}

pub async fn handle_config(action: ConfigAction, loaded: &LoadedConfig) -> Result<()> {
    match action {
        ConfigAction::Check => check(loaded),
        ConfigAction::List => {
            let app = App::build(&loaded.config).await?;
            print_json(&app.manager.list_configurations().await?)
        },
        ConfigAction::Upsert(args) => {
            let app = App::build(&loaded.config).await?;
            let configuration = app.manager.upsert_configuration(&args.into()).await?;
            print_json(&configuration)
        },
        ConfigAction::Toggle { id, active } => {
            let app = App::build(&loaded.config).await?;
            print_json(&app.manager.toggle_configuration(id, active).await?)
        },
    }
}

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// Validate the config file behind `loaded`, or the effective defaults.
pub fn validate_loaded(loaded: &LoadedConfig) -> Result<ValidationResult> {
    match &loaded.path {
        Some(path) => validate_file(path),
        None => Ok(validate_config(&loaded.config)),
    }
}

fn validate_file(path: &Path) -> Result<ValidationResult> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let is_toml = path
        .extension()
        .is_none_or(|ext| ext.eq_ignore_ascii_case("toml"));
    let mut result = if is_toml {
        validate_toml_str(&racefeed_config::env_subst::substitute_env(&raw))
    } else {
        // Unknown-key detection is TOML-only; other formats get value checks.
        racefeed_config::load_config(path).map(|c| validate_config(&c))?
    };
    result.config_path = Some(path.to_path_buf());
    Ok(result)
}

fn check(loaded: &LoadedConfig) -> Result<()> {
    let result = validate_loaded(loaded)?;

    if let Some(ref path) = result.config_path {
        eprintln!("Checking {}\n", path.display());
    } else {
        eprintln!("No config file found; checking defaults.\n");
    }

    for d in &result.diagnostics {
        let (color, label) = match d.severity {
            Severity::Error => (RED, "error"),
            Severity::Warning => (YELLOW, "warning"),
        };
        if d.path.is_empty() {
            eprintln!("  {BOLD}{color}{label}{RESET} {}", d.message);
        } else {
            eprintln!("  {BOLD}{color}{label}{RESET} {}: {}", d.path, d.message);
        }
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);

    if !result.diagnostics.is_empty() {
        eprintln!();
    }

    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    if errors > 0 {
        std::process::exit(1);
    }

    Ok(())
}
