use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use facematch_core::{ExtractorBackend, MatchPolicy, Metric};
use facematch_store::StoreKind;
use serde::{Deserialize, Serialize};

/// Settings read from the optional TOML file. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub backend: Option<ExtractorBackend>,
    pub metric: Option<Metric>,
    pub login_threshold: Option<f32>,
    pub enroll_threshold: Option<f32>,
    pub store: Option<StoreKind>,
    pub db_path: Option<PathBuf>,
}

/// Effective configuration: defaults, then the TOML file, then `FACEMATCH_*` variables.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Extractor the stored embeddings came from; decides metric and threshold defaults.
    pub backend: ExtractorBackend,
    pub policy: MatchPolicy,
    pub store: StoreKind,
    pub db_path: PathBuf,
    /// TOML file that was read, if any.
    pub config_file: Option<PathBuf>,
}

impl Config {
    /// Load from `explicit` (or `FACEMATCH_CONFIG`, or the XDG default) and the environment.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let env = |key: &str| std::env::var(key).ok();

        let (path, required) = match explicit
            .map(Path::to_path_buf)
            .or_else(|| env("FACEMATCH_CONFIG").map(PathBuf::from))
        {
            Some(p) => (Some(p), true),
            None => (default_config_path(&env), false),
        };

        let mut file = FileConfig::default();
        let mut config_file = None;
        if let Some(path) = path {
            match std::fs::read_to_string(&path) {
                Ok(text) => {
                    file = toml::from_str(&text)
                        .with_context(|| format!("invalid config file {}", path.display()))?;
                    config_file = Some(path);
                }
                Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("cannot read config file {}", path.display()))
                }
            }
        }

        let mut config = Self::resolve(file, env)?;
        config.config_file = config_file;
        Ok(config)
    }

    /// Merge file settings with environment overrides and fill backend defaults.
    pub fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let backend = env_parse(&env, "FACEMATCH_BACKEND")
            .or(file.backend)
            .unwrap_or(ExtractorBackend::InsightFace);
        let defaults = MatchPolicy::for_backend(backend);

        let policy = MatchPolicy {
            metric: env_parse(&env, "FACEMATCH_METRIC")
                .or(file.metric)
                .unwrap_or(defaults.metric),
            login_threshold: env_parse(&env, "FACEMATCH_LOGIN_THRESHOLD")
                .or(file.login_threshold)
                .unwrap_or(defaults.login_threshold),
            enroll_threshold: env_parse(&env, "FACEMATCH_ENROLL_THRESHOLD")
                .or(file.enroll_threshold)
                .unwrap_or(defaults.enroll_threshold),
        };
        policy.validate()?;

        let store = env_parse(&env, "FACEMATCH_STORE")
            .or(file.store)
            .unwrap_or(StoreKind::Json);

        let db_path = env("FACEMATCH_DB_PATH")
            .map(PathBuf::from)
            .or(file.db_path)
            .unwrap_or_else(|| default_data_dir(&env).join(default_db_file(store)));

        Ok(Self {
            backend,
            policy,
            store,
            db_path,
            config_file: None,
        })
    }
}

fn default_config_path(env: &impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    env("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env("HOME").map(|h| PathBuf::from(h).join(".config")))
        .map(|dir| dir.join("facematch").join("config.toml"))
}

fn default_data_dir(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    env("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facematch")
}

fn default_db_file(store: StoreKind) -> &'static str {
    match store {
        StoreKind::Sqlite => "faces.db",
        StoreKind::Json | StoreKind::Memory => "users_db.json",
    }
}

/// Parse an environment variable, ignoring (with a warning) unparsable values.
fn env_parse<T>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = env(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(key, value = %raw, error = %e, "ignoring invalid environment value");
            None
        }
    }
}
