use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    env_subst::substitute_env,
    error::{Error, Result},
    schema::ParleyConfig,
    validate::{ValidationResult, check_unknown_sections, validate},
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["parley.toml", "parley.yaml", "parley.yml", "parley.json"];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<ParleyConfig> {
    let raw = read_substituted(path)?;
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./parley.{toml,yaml,yml,json}` (project-local)
/// 2. `<user config dir>/parley.{toml,yaml,yml,json}`
///
/// Returns `ParleyConfig::default()` if no config file is found.
pub fn discover_and_load() -> ParleyConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    ParleyConfig::default()
}

/// Parse, then run unknown-section and semantic checks on a config file.
pub fn validate_file(path: &Path) -> Result<(ParleyConfig, ValidationResult)> {
    let raw = read_substituted(path)?;
    let value = parse_config_value(&raw, path)?;
    let config = parse_config(&raw, path)?;
    let mut result = validate(&config);
    check_unknown_sections(&value, &mut result);
    result.config_path = Some(path.to_path_buf());
    Ok((config, result))
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "parley").map(|d| d.config_dir().to_path_buf())
}

/// Platform data directory, or `./data` when none can be determined.
pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "parley")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("data"))
}

fn read_substituted(path: &Path) -> Result<String> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(substitute_env(&raw))
}

fn extension(path: &Path) -> &str {
    path.extension().and_then(|e| e.to_str()).unwrap_or("toml")
}

fn parse_config(raw: &str, path: &Path) -> Result<ParleyConfig> {
    match extension(path) {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        ext => Err(Error::UnsupportedFormat(ext.to_string())),
    }
}

fn parse_config_value(raw: &str, path: &Path) -> Result<serde_json::Value> {
    match extension(path) {
        "toml" => {
            let v: toml::Value = toml::from_str(raw)?;
            Ok(serde_json::to_value(v)?)
        },
        "yaml" | "yml" => {
            let v: serde_yaml::Value = serde_yaml::from_str(raw)?;
            Ok(serde_json::to_value(v)?)
        },
        "json" => Ok(serde_json::from_str(raw)?),
        ext => Err(Error::UnsupportedFormat(ext.to_string())),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn loads_yaml_and_toml_equivalently() {
        let dir = tempfile::tempdir().unwrap();
        let toml_path = dir.path().join("parley.toml");
        std::fs::write(&toml_path, "[sessions]\ninactivity_timeout_secs = 30\n").unwrap();
        let yaml_path = dir.path().join("parley.yaml");
        std::fs::write(&yaml_path, "sessions:\n  inactivity_timeout_secs: 30\n").unwrap();

        let a = load_config(&toml_path).unwrap();
        let b = load_config(&yaml_path).unwrap();
        assert_eq!(a.sessions.inactivity_timeout_secs, 30);
        assert_eq!(b.sessions.inactivity_timeout_secs, 30);
    }

    #[test]
    fn rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parley.ini");
        std::fs::write(&path, "x=1").unwrap();
        assert!(matches!(
            load_config(&path),
            Err(Error::UnsupportedFormat(ext)) if ext == "ini"
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_config(Path::new("/nonexistent/parley.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/parley.toml"));
    }

    #[test]
    fn validate_file_flags_unknown_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parley.toml");
        std::fs::write(&path, "[routr]\nidle_ttl_secs = 1\n").unwrap();
        let (_, result) = validate_file(&path).unwrap();
        assert!(result.diagnostics.iter().any(|d| d.path == "routr"));
        assert_eq!(result.config_path.as_deref(), Some(path.as_path()));
    }
}
