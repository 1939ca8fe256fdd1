//! # Cadenza Config
//!
//! Unified configuration for Cadenza pipelines. A single `cadenza.yaml`
//! configures the project, run behavior, store locations, artifact version
//! pins, and observability settings; `CADENZA_*` environment variables
//! override individual fields on top of the file.

mod loader;

pub use loader::{load_config, validate_config, ConfigError};

use serde::Deserialize;

/// Top-level configuration schema for Cadenza.
#[derive(Debug, Clone, Deserialize)]
pub struct CadenzaConfig {
    /// Config schema version.
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for CadenzaConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            project: ProjectConfig::default(),
            run: RunConfig::default(),
            store: StoreConfig::default(),
            artifacts: ArtifactsConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectConfig {
    #[serde(default = "default_project_name")]
    pub name: String,
    /// Optional owning organization, prepended to fully qualified names.
    #[serde(default)]
    pub org: Option<String>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: default_project_name(),
            org: None,
        }
    }
}

fn default_project_name() -> String {
    "cadenza".to_string()
}

/// How values of [`RunConfig::mode`] select a tracker backend.
pub const RUN_MODE_REMOTE: &str = "remote";
pub const RUN_MODE_FAKE: &str = "fake";

#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// Tracker backend: "remote" or "fake".
    #[serde(default = "default_run_mode")]
    pub mode: String,
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Tags attached to every launched job.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Extra diagnostic output from actions that opt into it.
    #[serde(default)]
    pub debug: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mode: default_run_mode(),
            max_parallel: default_max_parallel(),
            tags: Vec::new(),
            debug: false,
        }
    }
}

fn default_run_mode() -> String {
    RUN_MODE_REMOTE.to_string()
}

fn default_max_parallel() -> usize {
    4
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Root directory of the local content-addressed cache.
    #[serde(default = "default_cache_root")]
    pub cache_root: String,
    /// Separate cache root used by fake-mode runs, so offline outputs never
    /// mix with mirrored remote objects.
    #[serde(default = "default_fake_cache_root")]
    pub fake_cache_root: String,
    /// Bucket new outputs are written to when actions don't name one.
    #[serde(default)]
    pub default_bucket: Option<String>,
    /// Permit fetching objects without version information. Use caution.
    #[serde(default)]
    pub allow_unversioned: bool,
    #[serde(default)]
    pub remote: RemoteStoreConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cache_root: default_cache_root(),
            fake_cache_root: default_fake_cache_root(),
            default_bucket: None,
            allow_unversioned: false,
            remote: RemoteStoreConfig::default(),
        }
    }
}

fn default_cache_root() -> String {
    ".cadenza-cache".to_string()
}

fn default_fake_cache_root() -> String {
    ".cadenza-fake-cache".to_string()
}

/// Connection settings for the remote object store backend.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RemoteStoreConfig {
    #[serde(default)]
    pub region: Option<String>,
    /// Endpoint URL, for self-hosted or non-default deployments.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    /// Usually left unset here and supplied via environment.
    #[serde(default)]
    pub secret_access_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ArtifactsConfig {
    /// Version pins as `name:version` strings, first match wins.
    #[serde(default)]
    pub overrides: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_file: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
