//! Configuration validation.
//!
//! Detects unknown or misspelled keys in TOML files and checks values the
//! type system cannot: timezone names, URL schemes and zero timeouts.

use std::{collections::HashMap, path::PathBuf};

use crate::schema::RacefeedConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "value"
    pub category: &'static str,
    /// Dotted path, e.g. "scheduler.timezone"
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{} [{}]: {}", self.severity, self.category, self.message)
        } else {
            write!(
                f,
                "{} [{}] {}: {}",
                self.severity, self.category, self.path, self.message
            )
        }
    }
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

/// Known keys per section. Top-level keys are the section names.
fn known_keys() -> HashMap<&'static str, &'static [&'static str]> {
    HashMap::from([
        ("database", &["url"][..]),
        (
            "source",
            &["base_url", "request_timeout_secs", "health_timeout_secs"][..],
        ),
        (
            "scheduler",
            &["enabled", "timezone", "default_timeout_minutes"][..],
        ),
        ("notifications", &["webhook_url", "timeout_secs"][..]),
        ("metrics", &["enabled"][..]),
    ])
}

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, &cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}

/// Closest candidate within `max_distance` edits, if any.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|&c| (c, levenshtein(needle, c)))
        .filter(|&(_, d)| d > 0 && d <= max_distance)
        .min_by_key(|&(_, d)| d)
        .map(|(c, _)| c)
}

/// Validate raw TOML text: syntax, unknown keys, types, then values.
#[must_use]
pub fn validate_toml_str(toml_str: &str) -> ValidationResult {
    let mut diagnostics = Vec::new();

    let value: toml::Value = match toml::from_str(toml_str) {
        Ok(v) => v,
        Err(e) => {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message: format!("TOML syntax error: {e}"),
            });
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    check_unknown_fields(&value, &mut diagnostics);

    match toml::from_str::<RacefeedConfig>(toml_str) {
        Ok(config) => diagnostics.extend(validate_config(&config).diagnostics),
        Err(e) => diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "type-error",
            path: String::new(),
            message: format!("type error: {e}"),
        }),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn check_unknown_fields(value: &toml::Value, diagnostics: &mut Vec<Diagnostic>) {
    let Some(root) = value.as_table() else {
        return;
    };
    let schema = known_keys();
    let sections: Vec<&str> = schema.keys().copied().collect();

    for (section, body) in root {
        let Some(fields) = schema.get(section.as_str()) else {
            diagnostics.push(unknown_field(section.clone(), suggest(section, &sections, 3)));
            continue;
        };
        let Some(table) = body.as_table() else {
            continue;
        };
        for key in table.keys() {
            if !fields.contains(&key.as_str()) {
                diagnostics.push(unknown_field(
                    format!("{section}.{key}"),
                    suggest(key, fields, 3),
                ));
            }
        }
    }
}

fn unknown_field(path: String, suggestion: Option<&str>) -> Diagnostic {
    let message = match suggestion {
        Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
        None => "unknown field".to_string(),
    };
    Diagnostic {
        severity: Severity::Error,
        category: "unknown-field",
        path,
        message,
    }
}

/// Semantic checks on a parsed config.
#[must_use]
pub fn validate_config(config: &RacefeedConfig) -> ValidationResult {
    let mut diagnostics = Vec::new();
    let mut error = |path: &str, message: String| {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "value",
            path: path.into(),
            message,
        });
    };

    if let Some(tz) = &config.scheduler.timezone
        && tz.parse::<chrono_tz::Tz>().is_err()
    {
        error("scheduler.timezone", format!("unknown timezone \"{tz}\""));
    }
    if !is_http_url(&config.source.base_url) {
        error(
            "source.base_url",
            format!("expected an http(s) URL, got \"{}\"", config.source.base_url),
        );
    }
    if let Some(url) = &config.notifications.webhook_url
        && !is_http_url(url)
    {
        error(
            "notifications.webhook_url",
            format!("expected an http(s) URL, got \"{url}\""),
        );
    }
    if config.source.request_timeout_secs == 0 {
        error("source.request_timeout_secs", "must be > 0".into());
    }
    if config.source.health_timeout_secs == 0 {
        error("source.health_timeout_secs", "must be > 0".into());
    }
    if config.scheduler.default_timeout_minutes == 0 {
        error("scheduler.default_timeout_minutes", "must be > 0".into());
    }
    if config.notifications.timeout_secs == 0 {
        error("notifications.timeout_secs", "must be > 0".into());
    }

    if config.database.url.contains("${") {
        diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            category: "value",
            path: "database.url".into(),
            message: "contains an unresolved ${...} placeholder".into(),
        });
    }
    if u64::from(config.scheduler.default_timeout_minutes) * 60
        < config.source.request_timeout_secs
    {
        diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            category: "value",
            path: "scheduler.default_timeout_minutes".into(),
            message: "shorter than source.request_timeout_secs; runs will hit the scheduler deadline first".into(),
        });
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_clean() {
        let result = validate_config(&RacefeedConfig::default());
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    }

    #[test]
    fn misspelled_key_gets_suggestion() {
        let result = validate_toml_str("[scheduler]\ntimezon = \"UTC\"\n");
        let d = &result.diagnostics[0];
        assert_eq!(d.category, "unknown-field");
        assert_eq!(d.path, "scheduler.timezon");
        assert!(d.message.contains("\"timezone\""));
        assert!(result.has_errors());
    }

    #[test]
    fn unknown_section_gets_suggestion() {
        let result = validate_toml_str("[sorce]\nbase_url = \"http://x\"\n");
        assert!(result.diagnostics[0].message.contains("\"source\""));
    }

    #[test]
    fn syntax_error_stops_early() {
        let result = validate_toml_str("[scheduler\n");
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].category, "syntax");
    }

    #[test]
    fn type_error_is_reported() {
        let result = validate_toml_str("[scheduler]\nenabled = \"yes\"\n");
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.category == "type-error")
        );
    }

    #[test]
    fn bad_values_are_errors() {
        let mut config = RacefeedConfig::default();
        config.scheduler.timezone = Some("Mars/Olympus".into());
        config.source.base_url = "ftp://scraper".into();
        config.notifications.webhook_url = Some("hooks.example.com".into());
        config.source.health_timeout_secs = 0;

        let result = validate_config(&config);
        assert_eq!(result.count(Severity::Error), 4);
        let paths: Vec<&str> = result.diagnostics.iter().map(|d| d.path.as_str()).collect();
        assert!(paths.contains(&"scheduler.timezone"));
        assert!(paths.contains(&"notifications.webhook_url"));
    }

    #[test]
    fn short_deadline_warns() {
        let mut config = RacefeedConfig::default();
        config.scheduler.default_timeout_minutes = 1;
        let result = validate_config(&config);
        assert!(!result.has_errors());
        assert_eq!(result.count(Severity::Warning), 1);
    }

    #[test]
    fn metrics_only_accepts_enabled() {
        let result = validate_toml_str("[metrics]\nenabled = true\nprometheus_path = \"/m\"\n");
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].path, "metrics.prometheus_path");
        assert_eq!(result.diagnostics[0].category, "unknown-field");
    }

    #[test]
    fn zero_webhook_timeout_is_an_error() {
        let mut config = RacefeedConfig::default();
        config.notifications.timeout_secs = 0;
        let result = validate_config(&config);
        assert_eq!(result.count(Severity::Error), 1);
        assert_eq!(result.diagnostics[0].path, "notifications.timeout_secs");
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("enabled", "enabld"), 1);
        assert_eq!(levenshtein("same", "same"), 0);
    }
}
