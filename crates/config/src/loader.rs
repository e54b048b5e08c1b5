use std::path::{Path, PathBuf};

use {
    anyhow::Context,
    tracing::{debug, info, warn},
};

use crate::{env_subst::substitute_env, schema::RacefeedConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "racefeed.toml",
    "racefeed.yaml",
    "racefeed.yml",
    "racefeed.json",
];

/// A parsed config and the file it came from, if any.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: RacefeedConfig,
    pub path: Option<PathBuf>,
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<RacefeedConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path).with_context(|| format!("failed to parse {}", path.display()))
}

/// Load config for the binary.
///
/// An explicit path must exist and parse. Without one, the standard
/// locations are searched and defaults are used when nothing is found.
/// `RACEFEED_*` overrides are applied in both cases.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<LoadedConfig> {
    let path = match explicit {
        Some(p) => Some(p.to_path_buf()),
        None => find_config_file(),
    };

    let mut config = match &path {
        Some(p) => {
            info!(path = %p.display(), "loading config");
            load_config(p)?
        },
        None => {
            debug!("no config file found, using defaults");
            RacefeedConfig::default()
        },
    };
    apply_env_overrides(&mut config);
    Ok(LoadedConfig { config, path })
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./racefeed.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/racefeed/racefeed.{toml,yaml,yml,json}` (user-global)
///
/// Returns `RacefeedConfig::default()` if no file is found or it fails to
/// load.
pub fn discover_and_load() -> RacefeedConfig {
    let mut config = match find_config_file() {
        Some(path) => match load_config(&path) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                RacefeedConfig::default()
            },
        },
        None => RacefeedConfig::default(),
    };
    apply_env_overrides(&mut config);
    config
}

/// Apply `RACEFEED_*` environment overrides on top of a parsed config.
pub fn apply_env_overrides(config: &mut RacefeedConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

fn apply_env_overrides_with(
    config: &mut RacefeedConfig,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let set = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(url) = set("RACEFEED_DATABASE_URL") {
        config.database.url = url;
    }
    if let Some(url) = set("RACEFEED_SOURCE_URL") {
        config.source.base_url = url;
    }
    if let Some(tz) = set("RACEFEED_TIMEZONE") {
        config.scheduler.timezone = Some(tz);
    }
    if let Some(url) = set("RACEFEED_WEBHOOK_URL") {
        config.notifications.webhook_url = Some(url);
    }
}

pub(crate) fn find_config_file() -> Option<PathBuf> {
    find_in(Path::new(".")).or_else(|| config_dir().and_then(|dir| find_in(&dir)))
}

fn find_in(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "racefeed")
}

/// Returns the user-global config directory (`~/.config/racefeed/`).
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|d| d.config_dir().to_path_buf())
}

/// Returns the user data directory, home of the default SQLite database.
pub fn data_dir() -> Option<PathBuf> {
    project_dirs().map(|d| d.data_dir().to_path_buf())
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<RacefeedConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
