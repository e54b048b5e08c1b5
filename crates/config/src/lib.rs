//! Configuration loading, validation and env substitution.
//!
//! Config files: `racefeed.toml`, `racefeed.yaml`, `racefeed.yml` or
//! `racefeed.json`, searched in `./` then `~/.config/racefeed/`.
//!
//! Supports `${ENV_VAR}` substitution in the raw file text and `RACEFEED_*`
//! overrides after parsing.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{
        LoadedConfig, apply_env_overrides, config_dir, data_dir, discover_and_load, load,
        load_config,
    },
    schema::{
        DatabaseConfig, MetricsConfig, NotificationsConfig, RacefeedConfig, SchedulerConfig,
        SourceConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate_config, validate_toml_str},
};
