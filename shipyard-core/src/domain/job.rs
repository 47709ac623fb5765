//! Job specification
//!
//! A [`JobSpec`] declares what a job runs and the environment it needs. It is
//! plain data: runners read it, translate it for their backend and write
//! back only the generated execution id.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;

use crate::config::MountConfig;
use crate::domain::identity::{self, ExecutionId};
use crate::error::JobError;

pub const DEFAULT_IMAGE: &str = "debian:stable-slim";
pub const DEFAULT_SHELL: &str = "/bin/sh";
pub const DEFAULT_MOUNT_PATH: &str = "/src";
pub const DEFAULT_CACHE_SIZE: &str = "5Mi";

/// Default job timeout: 15 minutes
pub const DEFAULT_TIMEOUT_MS: u64 = 15 * 60 * 1000;

/// Declarative description of one containerized job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobSpec {
    name: String,

    pub image: String,
    pub image_force_pull: bool,

    /// Names of registry credentials, never the credentials themselves
    pub image_pull_secrets: Vec<String>,

    pub shell: String,
    pub tasks: Vec<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, EnvValue>,

    /// Where the source checkout appears inside the container
    pub mount_path: String,
    pub use_source: bool,

    /// Wall-clock limit in milliseconds, counted from when the job runs
    pub timeout_ms: u64,

    pub privileged: bool,

    /// `None` inherits the pipeline's default identity
    pub service_account: Option<String>,

    pub resource_requests: ResourceQuantities,
    pub resource_limits: ResourceQuantities,
    pub host: HostConstraints,
    pub cache: CacheSpec,
    pub storage: StorageSpec,
    pub docker: DockerSpec,
    pub annotations: BTreeMap<String, String>,
    pub stream_logs: bool,

    #[serde(skip)]
    execution_id: OnceLock<ExecutionId>,
}

impl JobSpec {
    /// Creates a job with every optional setting at its default
    ///
    /// Never fails; the name is checked when the job is started.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn with_tasks<I, S>(mut self, tasks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tasks = tasks.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_image_force_pull(mut self, force: bool) -> Self {
        self.image_force_pull = force;
        self
    }

    /// Adds an inline environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), EnvValue::Literal(value.into()));
        self
    }

    /// Adds an environment variable resolved from a secret by the backend
    pub fn with_secret_env(
        mut self,
        key: impl Into<String>,
        secret: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        self.env.insert(
            key.into(),
            EnvValue::Secret(SecretKeyRef {
                name: secret.into(),
                key: secret_key.into(),
            }),
        );
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Checks the job name without starting anything
    pub fn validate(&self) -> Result<(), JobError> {
        identity::validate_name(&self.name).map_err(|e| JobError::validation(&self.name, e))
    }

    /// The generated execution id, once a runner has assigned one
    pub fn execution_id(&self) -> Option<&ExecutionId> {
        self.execution_id.get()
    }

    /// Assigns the execution id if none is set yet
    ///
    /// Returns the id actually held, which is the earlier one when the id had
    /// already been assigned.
    pub fn assign_execution_id(&self, id: ExecutionId) -> &ExecutionId {
        self.execution_id.get_or_init(|| id)
    }

    /// Privileged jobs with the container engine socket mounted can take over
    /// the host
    pub fn is_security_sensitive(&self) -> bool {
        self.privileged && self.docker.enabled
    }
}

impl Default for JobSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            image: DEFAULT_IMAGE.to_string(),
            image_force_pull: false,
            image_pull_secrets: Vec::new(),
            shell: DEFAULT_SHELL.to_string(),
            tasks: Vec::new(),
            args: Vec::new(),
            env: BTreeMap::new(),
            mount_path: DEFAULT_MOUNT_PATH.to_string(),
            use_source: true,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            privileged: false,
            service_account: None,
            resource_requests: ResourceQuantities::default(),
            resource_limits: ResourceQuantities::default(),
            host: HostConstraints::default(),
            cache: CacheSpec::default(),
            storage: StorageSpec::default(),
            docker: DockerSpec::default(),
            annotations: BTreeMap::new(),
            stream_logs: false,
            execution_id: OnceLock::new(),
        }
    }
}

/// Environment variable value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    Literal(String),

    /// Resolved by the backend when the container starts
    Secret(SecretKeyRef),
}

/// Reference to one key of a named secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretKeyRef {
    pub name: String,
    pub key: String,
}

/// CPU and memory quantities in the backend's own syntax
///
/// Opaque here: passed through without parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceQuantities {
    pub cpu: Option<String>,
    pub memory: Option<String>,
}

impl ResourceQuantities {
    pub fn is_empty(&self) -> bool {
        self.cpu.is_none() && self.memory.is_none()
    }
}

/// Placement hints; advisory, a scheduler may or may not honor them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostConstraints {
    pub os: Option<String>,
    pub name: Option<String>,
    pub node_selector: BTreeMap<String, String>,
}

impl HostConstraints {
    pub fn is_empty(&self) -> bool {
        self.os.is_none() && self.name.is_none() && self.node_selector.is_empty()
    }
}

/// Per-job cache, shared by repeated runs of jobs with the same name
///
/// No consistency guarantee between concurrent writers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSpec {
    pub enabled: bool,
    pub size: String,
}

impl CacheSpec {
    /// Mount point of the cache inside the container
    pub fn path<'a>(&self, mounts: &'a MountConfig) -> &'a str {
        &mounts.cache_path
    }
}

impl Default for CacheSpec {
    fn default() -> Self {
        Self {
            enabled: false,
            size: DEFAULT_CACHE_SIZE.to_string(),
        }
    }
}

/// Opt-in access to the storage area shared by every job of a build
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSpec {
    pub enabled: bool,
}

impl StorageSpec {
    /// Mount point of the shared storage inside the container
    pub fn path<'a>(&self, mounts: &'a MountConfig) -> &'a str {
        &mounts.storage_path
    }
}

/// Opt-in bind mount of the host's container engine socket
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerSpec {
    pub enabled: bool,
}
