//! Semantic checks on a loaded configuration.

use std::{fmt, path::PathBuf};

use crate::schema::ParleyConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "unknown-field", "range", "security", "missing"
    pub category: &'static str,
    /// Dotted path, e.g. "transcription.workers"
    pub path: String,
    pub message: String,
}

/// Result of validating a configuration file.
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

    fn push(
        &mut self,
        severity: Severity,
        category: &'static str,
        path: &str,
        message: impl Into<String>,
    ) {
        self.diagnostics.push(Diagnostic {
            severity,
            category,
            path: path.to_string(),
            message: message.into(),
        });
    }
}

const KNOWN_SECTIONS: &[&str] = &[
    "server",
    "registry",
    "router",
    "sessions",
    "transcription",
    "whatsapp",
    "metrics",
];

/// Flag top-level sections that the schema does not know. Serde silently
/// ignores them, which usually hides a typo.
pub fn check_unknown_sections(raw: &serde_json::Value, result: &mut ValidationResult) {
    let Some(map) = raw.as_object() else {
        return;
    };
    for key in map.keys() {
        if !KNOWN_SECTIONS.contains(&key.as_str()) {
            result.push(
                Severity::Warning,
                "unknown-field",
                key,
                format!("unknown section \"{key}\""),
            );
        }
    }
}

/// Validate value ranges and cross-field requirements.
pub fn validate(config: &ParleyConfig) -> ValidationResult {
    let mut result = ValidationResult::default();

    if config.transcription.enabled {
        if config.transcription.workers == 0 {
            result.push(
                Severity::Error,
                "range",
                "transcription.workers",
                "at least one worker is required when transcription is enabled",
            );
        }
        if config.transcription.backlog == 0 {
            result.push(
                Severity::Error,
                "range",
                "transcription.backlog",
                "backlog must be greater than zero",
            );
        }
        if config.transcription.job_timeout_secs == 0 {
            result.push(
                Severity::Error,
                "range",
                "transcription.job_timeout_secs",
                "job timeout must be greater than zero",
            );
        }
    }

    for (path, value) in [
        ("sessions.lock_timeout_secs", config.sessions.lock_timeout_secs),
        (
            "sessions.critical_section_timeout_secs",
            config.sessions.critical_section_timeout_secs,
        ),
        ("router.connect_timeout_secs", config.router.connect_timeout_secs),
        ("router.idle_ttl_secs", config.router.idle_ttl_secs),
    ] {
        if value == 0 {
            result.push(Severity::Error, "range", path, "must be greater than zero");
        }
    }

    if config.router.max_connections == 0 {
        result.push(
            Severity::Error,
            "range",
            "router.max_connections",
            "pool size must be greater than zero",
        );
    }

    if parley_common::types::TenantKey::parse(&config.registry.default_tenant).is_err() {
        result.push(
            Severity::Error,
            "range",
            "registry.default_tenant",
            "not a valid tenant key",
        );
    }

    if config.whatsapp.is_configured() {
        if config.whatsapp.verify_token.is_none() {
            result.push(
                Severity::Warning,
                "missing",
                "whatsapp.verify_token",
                "webhook subscription cannot be verified without a verify token",
            );
        }
        if config.whatsapp.app_secret.is_none() {
            result.push(
                Severity::Warning,
                "security",
                "whatsapp.app_secret",
                "webhook signatures will not be checked",
            );
        }
    }

    if config.server.bind != "127.0.0.1"
        && config.server.bind != "localhost"
        && config.server.api_token.is_none()
    {
        result.push(
            Severity::Warning,
            "security",
            "server.api_token",
            "admin API is reachable without a token on a non-loopback address",
        );
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let result = validate(&ParleyConfig::default());
        assert!(!result.has_errors(), "{:?}", result.diagnostics);
    }

    #[test]
    fn zero_workers_is_an_error() {
        let mut cfg = ParleyConfig::default();
        cfg.transcription.workers = 0;
        let result = validate(&cfg);
        assert!(result.has_errors());
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.path == "transcription.workers")
        );
    }

    #[test]
    fn zero_workers_ignored_when_disabled() {
        let mut cfg = ParleyConfig::default();
        cfg.transcription.enabled = false;
        cfg.transcription.workers = 0;
        assert!(!validate(&cfg).has_errors());
    }

    #[test]
    fn invalid_default_tenant_is_reported() {
        let mut cfg = ParleyConfig::default();
        cfg.registry.default_tenant = "bad key".into();
        assert!(validate(&cfg).has_errors());
    }

    #[test]
    fn unknown_sections_are_warnings() {
        let raw = serde_json::json!({ "server": {}, "sesions": {} });
        let mut result = ValidationResult::default();
        check_unknown_sections(&raw, &mut result);
        assert_eq!(result.count(Severity::Warning), 1);
        assert_eq!(result.diagnostics[0].path, "sesions");
    }
}
