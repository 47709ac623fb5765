//! Runner configuration
//!
//! Defines the configurable parameters of a job runner: the build it belongs
//! to, polling intervals, the startup guard, mount locations and the podman
//! backend settings.

use anyhow::Context;
use shipyard_core::{BuildId, MountConfig};
use std::path::PathBuf;
use std::time::Duration;

/// Runner configuration
///
/// All intervals are configurable to allow tuning for different
/// deployment scenarios (local podman vs. a remote cluster).
#[derive(Debug, Clone)]
pub struct Config {
    /// Build every job run with this configuration belongs to
    pub build_id: BuildId,

    /// How often to ask the backend for the job's status
    pub poll_interval: Duration,

    /// How often streamed logs are pulled from the backend
    pub log_stream_interval: Duration,

    /// Maximum time a job may stay pending before it is given up on
    pub startup_timeout: Duration,

    /// Container-side mount points shared by all jobs
    pub mounts: MountConfig,

    pub podman: PodmanConfig,
}

/// Settings for the podman backend
#[derive(Debug, Clone)]
pub struct PodmanConfig {
    /// podman executable
    pub binary: String,

    /// Host directory holding one cache directory per job name
    pub cache_root: PathBuf,

    /// Host directory holding one shared storage directory per build
    pub storage_root: PathBuf,

    /// Source checkout mounted into jobs that use source
    pub source_dir: Option<PathBuf>,

    /// Directory of registry auth files named `<pull secret>.json`
    pub auth_dir: Option<PathBuf>,

    /// Grace period given to `podman stop` before the container is killed
    pub stop_timeout: Duration,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(build_id: BuildId) -> Self {
        Self {
            build_id,
            poll_interval: Duration::from_millis(500),
            log_stream_interval: Duration::from_secs(2),
            startup_timeout: Duration::from_secs(600), // 10 minutes
            mounts: MountConfig::default(),
            podman: PodmanConfig::default(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Optional environment variables:
    /// - SHIPYARD_BUILD_ID (default: generated)
    /// - POLL_INTERVAL_MS (default: 500)
    /// - LOG_STREAM_INTERVAL_MS (default: 2000)
    /// - STARTUP_TIMEOUT (seconds, default: 600)
    /// - PODMAN_BIN (default: podman)
    /// - SHIPYARD_CACHE_ROOT, SHIPYARD_STORAGE_ROOT (default: under the temp dir)
    /// - SHIPYARD_SOURCE_DIR, SHIPYARD_AUTH_DIR (default: unset)
    /// - SHIPYARD_CACHE_MOUNT, SHIPYARD_STORAGE_MOUNT, SHIPYARD_DOCKER_SOCKET
    pub fn from_env() -> anyhow::Result<Self> {
        let build_id = match std::env::var("SHIPYARD_BUILD_ID") {
            Ok(value) => BuildId::parse(&value).context("Invalid SHIPYARD_BUILD_ID")?,
            Err(_) => BuildId::generate(),
        };

        let mut config = Self::new(build_id);

        if let Some(ms) = env_parse::<u64>("POLL_INTERVAL_MS")? {
            config.poll_interval = Duration::from_millis(ms);
        }

        if let Some(ms) = env_parse::<u64>("LOG_STREAM_INTERVAL_MS")? {
            config.log_stream_interval = Duration::from_millis(ms);
        }

        if let Some(secs) = env_parse::<u64>("STARTUP_TIMEOUT")? {
            config.startup_timeout = Duration::from_secs(secs);
        }

        config.mounts = MountConfig::from_env();

        if let Ok(binary) = std::env::var("PODMAN_BIN") {
            config.podman.binary = binary;
        }
        if let Ok(dir) = std::env::var("SHIPYARD_CACHE_ROOT") {
            config.podman.cache_root = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("SHIPYARD_STORAGE_ROOT") {
            config.podman.storage_root = PathBuf::from(dir);
        }
        config.podman.source_dir = std::env::var("SHIPYARD_SOURCE_DIR").ok().map(PathBuf::from);
        config.podman.auth_dir = std::env::var("SHIPYARD_AUTH_DIR").ok().map(PathBuf::from);

        Ok(config)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_log_stream_interval(mut self, interval: Duration) -> Self {
        self.log_stream_interval = interval;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_mounts(mut self, mounts: MountConfig) -> Self {
        self.mounts = mounts;
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.log_stream_interval.is_zero() {
            anyhow::bail!("log_stream_interval must be greater than 0");
        }

        if self.startup_timeout.is_zero() {
            anyhow::bail!("startup_timeout must be greater than 0");
        }

        self.mounts
            .validate()
            .context("Invalid mount configuration")?;

        if self.podman.binary.is_empty() {
            anyhow::bail!("podman binary cannot be empty");
        }

        if self.podman.cache_root == self.podman.storage_root {
            anyhow::bail!("cache_root and storage_root must differ");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(BuildId::generate())
    }
}

impl Default for PodmanConfig {
    fn default() -> Self {
        let base = std::env::temp_dir().join("shipyard");
        Self {
            binary: "podman".to_string(),
            cache_root: base.join("cache"),
            storage_root: base.join("storage"),
            source_dir: None,
            auth_dir: None,
            stop_timeout: Duration::from_secs(10),
        }
    }
}

/// Reads an optional numeric environment variable, failing on garbage
fn env_parse<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("Invalid value for {}: '{}'", key, value)),
        Err(_) => Ok(None),
    }
}
