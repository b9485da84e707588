//! Layered configuration resolution: command-line flags >
//! process environment (`META_*`) > project config (`.meta/config`) > global
//! config (user home) > built-in defaults.
//!
//! `CliOverrides`/`RuntimeOptions`/`build_runtime_options` split the
//! concerns the same way a layered CLI config merge always does, with an
//! extra layer: `EnvOverrides` sits between CLI flags and the project file,
//! using the same `Option`-means-"unset" convention `CliOverrides` already
//! uses.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The recognized options, each `Option` so a layer can
/// leave a field unset and defer to the next one down.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetaConfig {
    pub default_env: Option<String>,
    pub manifests_dir: Option<String>,
    pub parallel_jobs: Option<usize>,
    pub show_progress: Option<bool>,
    pub log_level: Option<String>,
    pub remote_cache: Option<String>,
    pub remote_store: Option<String>,
}

impl MetaConfig {
    fn merge_from(mut self, other: &MetaConfig) -> Self {
        self.default_env = self.default_env.or_else(|| other.default_env.clone());
        self.manifests_dir = self.manifests_dir.or_else(|| other.manifests_dir.clone());
        self.parallel_jobs = self.parallel_jobs.or(other.parallel_jobs);
        self.show_progress = self.show_progress.or(other.show_progress);
        self.log_level = self.log_level.or_else(|| other.log_level.clone());
        self.remote_cache = self.remote_cache.or_else(|| other.remote_cache.clone());
        self.remote_store = self.remote_store.or_else(|| other.remote_store.clone());
        self
    }
}

/// Command-line flag overrides. `None` means "the user did not pass this
/// flag".
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub default_env: Option<String>,
    pub manifests_dir: Option<String>,
    pub parallel_jobs: Option<usize>,
    pub show_progress: Option<bool>,
    pub log_level: Option<String>,
    pub remote_cache: Option<String>,
    pub remote_store: Option<String>,
}

impl CliOverrides {
    fn into_config(self) -> MetaConfig {
        MetaConfig {
            default_env: self.default_env,
            manifests_dir: self.manifests_dir,
            parallel_jobs: self.parallel_jobs,
            show_progress: self.show_progress,
            log_level: self.log_level,
            remote_cache: self.remote_cache,
            remote_store: self.remote_store,
        }
    }
}

/// The fully resolved, defaulted configuration an invocation runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeOptions {
    pub default_env: String,
    pub manifests_dir: PathBuf,
    pub parallel_jobs: usize,
    pub show_progress: bool,
    pub log_level: String,
    pub remote_cache: Option<String>,
    pub remote_store: Option<String>,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            default_env: "dev".to_string(),
            manifests_dir: PathBuf::from("manifests"),
            parallel_jobs: 4,
            show_progress: true,
            log_level: "info".to_string(),
            remote_cache: None,
            remote_store: None,
        }
    }
}

fn project_config_path(workspace_root: &Path) -> PathBuf {
    workspace_root.join(".meta/config")
}

fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("meta").join("config"))
}

pub fn load_project_config(workspace_root: &Path) -> Result<MetaConfig> {
    load_toml_config(&project_config_path(workspace_root))
}

pub fn load_global_config() -> Result<MetaConfig> {
    match global_config_path() {
        Some(path) => load_toml_config(&path),
        None => Ok(MetaConfig::default()),
    }
}

fn load_toml_config(path: &Path) -> Result<MetaConfig> {
    match std::fs::read_to_string(path) {
        Ok(raw) => toml::from_str(&raw)
            .map_err(|e| Error::manifest(format!("{}: {e}", path.display()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(MetaConfig::default()),
        Err(e) => Err(Error::io(path, e)),
    }
}

fn write_toml_config(path: &Path, config: &MetaConfig) -> Result<()> {
    let body = toml::to_string_pretty(config)
        .map_err(|e| Error::manifest(format!("failed to serialize config: {e}")))?;
    crate::hashing::atomic_write(path, body.as_bytes())
}

pub fn write_project_config(workspace_root: &Path, config: &MetaConfig) -> Result<()> {
    write_toml_config(&project_config_path(workspace_root), config)
}

pub fn write_global_config(config: &MetaConfig) -> Result<()> {
    let path = global_config_path()
        .ok_or_else(|| Error::manifest("could not determine a global config directory"))?;
    write_toml_config(&path, config)
}

/// Reads the recognized `META_*` environment variables.
pub fn env_overrides() -> MetaConfig {
    MetaConfig {
        default_env: std::env::var("META_DEFAULT_ENV").ok(),
        manifests_dir: std::env::var("META_MANIFESTS_DIR").ok(),
        parallel_jobs: std::env::var("META_PARALLEL_JOBS")
            .ok()
            .and_then(|v| v.parse().ok()),
        show_progress: std::env::var("META_SHOW_PROGRESS")
            .ok()
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true")),
        log_level: None,
        remote_cache: std::env::var("META_REMOTE_CACHE").ok(),
        remote_store: std::env::var("META_REMOTE_STORE").ok(),
    }
}

/// Resolves the final `RuntimeOptions` by layering, highest priority first:
/// `cli` > `env` > `project` > `global` > built-in defaults.
pub fn resolve_runtime_options(
    cli: CliOverrides,
    env: MetaConfig,
    project: MetaConfig,
    global: MetaConfig,
) -> RuntimeOptions {
    let merged = cli
        .into_config()
        .merge_from(&env)
        .merge_from(&project)
        .merge_from(&global);

    let defaults = RuntimeOptions::default();
    RuntimeOptions {
        default_env: merged.default_env.unwrap_or(defaults.default_env),
        manifests_dir: merged
            .manifests_dir
            .map(PathBuf::from)
            .unwrap_or(defaults.manifests_dir),
        parallel_jobs: merged.parallel_jobs.unwrap_or(defaults.parallel_jobs),
        show_progress: merged.show_progress.unwrap_or(defaults.show_progress),
        log_level: merged.log_level.unwrap_or(defaults.log_level),
        remote_cache: merged.remote_cache,
        remote_store: merged.remote_store,
    }
}

/// Gets a single key by name, for `config get <key>`. Keys mirror the
/// `MetaConfig` field names.
pub fn get_key(config: &MetaConfig, key: &str) -> Option<String> {
    match key {
        "default_env" => config.default_env.clone(),
        "manifests_dir" => config.manifests_dir.clone(),
        "parallel_jobs" => config.parallel_jobs.map(|v| v.to_string()),
        "show_progress" => config.show_progress.map(|v| v.to_string()),
        "log_level" => config.log_level.clone(),
        "remote_cache" => config.remote_cache.clone(),
        "remote_store" => config.remote_store.clone(),
        _ => None,
    }
}

/// Sets a single key by name, for `config set <key> <value>`. Returns a
/// `ManifestError` for an unrecognized key.
pub fn set_key(config: &mut MetaConfig, key: &str, value: &str) -> Result<()> {
    match key {
        "default_env" => config.default_env = Some(value.to_string()),
        "manifests_dir" => config.manifests_dir = Some(value.to_string()),
        "parallel_jobs" => {
            config.parallel_jobs = Some(
                value
                    .parse()
                    .map_err(|_| Error::manifest(format!("parallel_jobs must be an integer, got {value:?}")))?,
            )
        }
        "show_progress" => {
            config.show_progress = Some(
                value
                    .parse()
                    .map_err(|_| Error::manifest(format!("show_progress must be a bool, got {value:?}")))?,
            )
        }
        "log_level" => config.log_level = Some(value.to_string()),
        "remote_cache" => config.remote_cache = Some(value.to_string()),
        "remote_store" => config.remote_store = Some(value.to_string()),
        other => return Err(Error::manifest(format!("unknown config key {other:?}"))),
    }
    Ok(())
}

/// Unsets a single key, for `config unset <key>`.
pub fn unset_key(config: &mut MetaConfig, key: &str) -> Result<()> {
    match key {
        "default_env" => config.default_env = None,
        "manifests_dir" => config.manifests_dir = None,
        "parallel_jobs" => config.parallel_jobs = None,
        "show_progress" => config.show_progress = None,
        "log_level" => config.log_level = None,
        "remote_cache" => config.remote_cache = None,
        "remote_store" => config.remote_store = None,
        other => return Err(Error::manifest(format!("unknown config key {other:?}"))),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn cli_overrides_beat_every_other_layer() {
        let cli = CliOverrides {
            default_env: Some("prod".to_string()),
            ..Default::default()
        };
        let env = MetaConfig {
            default_env: Some("staging".to_string()),
            ..Default::default()
        };
        let project = MetaConfig {
            default_env: Some("dev".to_string()),
            ..Default::default()
        };
        let opts = resolve_runtime_options(cli, env, project, MetaConfig::default());
        assert_eq!(opts.default_env, "prod");
    }

    #[test]
    fn falls_through_to_project_then_global_then_default() {
        let project = MetaConfig {
            parallel_jobs: Some(8),
            ..Default::default()
        };
        let global = MetaConfig {
            parallel_jobs: Some(2),
            log_level: Some("debug".to_string()),
            ..Default::default()
        };
        let opts = resolve_runtime_options(
            CliOverrides::default(),
            MetaConfig::default(),
            project,
            global,
        );
        assert_eq!(opts.parallel_jobs, 8);
        assert_eq!(opts.log_level, "debug");
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let opts = resolve_runtime_options(
            CliOverrides::default(),
            MetaConfig::default(),
            MetaConfig::default(),
            MetaConfig::default(),
        );
        assert_eq!(opts, RuntimeOptions::default());
    }

    #[test]
    fn project_config_round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let mut config = MetaConfig::default();
        set_key(&mut config, "default_env", "staging").unwrap();
        write_project_config(dir.path(), &config).unwrap();

        let loaded = load_project_config(dir.path()).unwrap();
        assert_eq!(loaded.default_env, Some("staging".to_string()));
    }

    #[test]
    fn set_key_rejects_unknown_key() {
        let mut config = MetaConfig::default();
        assert!(set_key(&mut config, "bogus", "x").is_err());
    }

    #[test]
    fn missing_project_config_yields_defaults_not_an_error() {
        let dir = tempdir().unwrap();
        let loaded = load_project_config(dir.path()).unwrap();
        assert_eq!(loaded, MetaConfig::default());
    }
}
