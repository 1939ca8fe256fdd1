//! Configuration loading, environment overlay, and validation.
//!
//! Precedence, lowest to highest: built-in defaults, `cadenza.yaml`, then
//! `CADENZA_*` environment variables. Validation runs after the overlay, so
//! a bad override pin aborts before any pipeline node runs.

use std::fs;
use std::path::Path;

use thiserror::Error;

use cadenza_core::types::{validate_name_segment, OverrideTable};

use crate::{CadenzaConfig, RUN_MODE_FAKE, RUN_MODE_REMOTE};

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Load configuration: optional YAML file, then the environment overlay.
pub fn load_config(path: Option<&Path>) -> Result<CadenzaConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            serde_yaml::from_str(&content)?
        }
        None => CadenzaConfig::default(),
    };
    apply_env(&mut config, |name| std::env::var(name).ok());
    validate_config(&config)?;
    Ok(config)
}

/// Overlay `CADENZA_*` environment variables onto a config.
///
/// `env` is injectable so tests don't mutate process state.
fn apply_env(config: &mut CadenzaConfig, env: impl Fn(&str) -> Option<String>) {
    if let Some(name) = env("CADENZA_PROJECT") {
        config.project.name = name;
    }
    if let Some(org) = env("CADENZA_ORG") {
        config.project.org = (!org.is_empty()).then_some(org);
    }
    if let Some(mode) = env("CADENZA_RUN_MODE") {
        config.run.mode = mode;
    }
    if let Some(max_parallel) = env("CADENZA_MAX_PARALLEL") {
        if let Ok(value) = max_parallel.parse() {
            config.run.max_parallel = value;
        }
    }
    if let Some(tags) = env("CADENZA_TAGS") {
        config.run.tags = split_csv(&tags);
    }
    if let Some(debug) = env("CADENZA_DEBUG") {
        config.run.debug = matches!(debug.as_str(), "1" | "true" | "yes");
    }
    if let Some(cache_root) = env("CADENZA_CACHE_ROOT") {
        config.store.cache_root = cache_root;
    }
    if let Some(fake_cache_root) = env("CADENZA_FAKE_CACHE_ROOT") {
        config.store.fake_cache_root = fake_cache_root;
    }
    if let Some(region) = env("CADENZA_REMOTE_REGION") {
        config.store.remote.region = (!region.is_empty()).then_some(region);
    }
    if let Some(endpoint) = env("CADENZA_REMOTE_ENDPOINT") {
        config.store.remote.endpoint = (!endpoint.is_empty()).then_some(endpoint);
    }
    if let Some(access_key_id) = env("CADENZA_ACCESS_KEY_ID") {
        config.store.remote.access_key_id = (!access_key_id.is_empty()).then_some(access_key_id);
    }
    if let Some(secret) = env("CADENZA_SECRET_ACCESS_KEY") {
        config.store.remote.secret_access_key = (!secret.is_empty()).then_some(secret);
    }
    if let Some(bucket) = env("CADENZA_DEFAULT_BUCKET") {
        config.store.default_bucket = (!bucket.is_empty()).then_some(bucket);
    }
    if let Some(allow) = env("CADENZA_ALLOW_UNVERSIONED") {
        config.store.allow_unversioned = matches!(allow.as_str(), "1" | "true" | "yes");
    }
    if let Some(overrides) = env("CADENZA_ARTIFACT_OVERRIDES") {
        config.artifacts.overrides = split_csv(&overrides);
    }
    if let Some(log_level) = env("CADENZA_LOG_LEVEL") {
        config.observability.log_level = log_level;
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|piece| piece.trim().to_string())
        .filter(|piece| !piece.is_empty())
        .collect()
}

/// Validate a fully overlaid config.
pub fn validate_config(config: &CadenzaConfig) -> Result<(), ConfigError> {
    if config.version == 0 {
        return Err(ConfigError::Invalid(
            "version must be greater than 0".to_string(),
        ));
    }

    validate_name_segment(Some(&config.project.name), "project")
        .map_err(|e| ConfigError::Invalid(e.to_string()))?;
    validate_name_segment(config.project.org.as_deref(), "org")
        .map_err(|e| ConfigError::Invalid(e.to_string()))?;

    if config.run.mode != RUN_MODE_REMOTE && config.run.mode != RUN_MODE_FAKE {
        return Err(ConfigError::Invalid(format!(
            "run.mode must be '{RUN_MODE_REMOTE}' or '{RUN_MODE_FAKE}', got {:?}",
            config.run.mode
        )));
    }

    if config.run.max_parallel == 0 {
        return Err(ConfigError::Invalid(
            "run.max_parallel must be > 0".to_string(),
        ));
    }

    if config.store.cache_root.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "store.cache_root must not be empty".to_string(),
        ));
    }

    if config.store.cache_root == config.store.fake_cache_root {
        return Err(ConfigError::Invalid(
            "store.fake_cache_root must differ from store.cache_root".to_string(),
        ));
    }

    // Parse the pins now so a typo fails the whole run up front.
    OverrideTable::parse(&config.artifacts.overrides)
        .map_err(|e| ConfigError::Invalid(format!("artifacts.overrides: {e}")))?;

    Ok(())
}
