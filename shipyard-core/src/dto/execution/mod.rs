//! Execution request DTOs
//!
//! [`ExecutionRequest`] is what a runner hands to its backend: the job
//! specification resolved against the build, the generated execution id and
//! the well-known mount points.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::MountConfig;
use crate::domain::identity::{BuildId, ExecutionId};
use crate::domain::job::{EnvValue, HostConstraints, JobSpec, ResourceQuantities};

pub const LABEL_JOB_NAME: &str = "shipyard.job";
pub const LABEL_BUILD_ID: &str = "shipyard.build";

pub const ENV_JOB_NAME: &str = "SHIPYARD_JOB_NAME";
pub const ENV_BUILD_ID: &str = "SHIPYARD_BUILD_ID";
pub const ENV_SOURCE_PATH: &str = "SHIPYARD_SOURCE_PATH";

/// Backend-neutral request to run one execution instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub execution_id: ExecutionId,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub image: String,
    pub pull_policy: PullPolicy,
    pub image_pull_secrets: Vec<String>,

    /// Empty means "use the image's entrypoint"
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, EnvValue>,
    pub working_dir: Option<String>,
    pub resources: ResourceRequirements,
    pub host: HostConstraints,

    /// In mount order: source, cache, storage, container engine socket
    pub volumes: Vec<VolumeMount>,
    pub security: SecurityContext,
    pub service_account: Option<String>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PullPolicy {
    Always,
    IfNotPresent,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    pub requests: ResourceQuantities,
    pub limits: ResourceQuantities,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityContext {
    pub privileged: bool,
    pub docker_socket: bool,
}

/// A volume and where it is mounted in the container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    pub name: String,
    pub source: VolumeSource,
    pub mount_path: String,
    pub read_only: bool,
}

/// What backs a volume; backends map these onto real storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VolumeSource {
    /// The pipeline's source checkout
    Source,

    /// Per-job cache, keyed by job name
    Cache { key: String, size: String },

    /// Storage shared by every job of one build
    SharedStorage { build_id: BuildId },

    /// A path on the host
    HostPath(String),
}

impl ExecutionRequest {
    /// Translates a job specification into a backend request
    ///
    /// The job name must already have been validated.
    pub fn from_spec(
        spec: &JobSpec,
        execution_id: ExecutionId,
        build_id: &BuildId,
        mounts: &MountConfig,
    ) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_JOB_NAME.to_string(), spec.name().to_string());
        labels.insert(LABEL_BUILD_ID.to_string(), build_id.to_string());

        let mut env = BTreeMap::new();
        env.insert(
            ENV_JOB_NAME.to_string(),
            EnvValue::Literal(spec.name().to_string()),
        );
        env.insert(
            ENV_BUILD_ID.to_string(),
            EnvValue::Literal(build_id.to_string()),
        );
        if spec.use_source {
            env.insert(
                ENV_SOURCE_PATH.to_string(),
                EnvValue::Literal(spec.mount_path.clone()),
            );
        }
        // User-supplied values win over the injected ones
        env.extend(spec.env.clone());

        Self {
            execution_id,
            labels,
            annotations: spec.annotations.clone(),
            image: spec.image.clone(),
            pull_policy: if spec.image_force_pull {
                PullPolicy::Always
            } else {
                PullPolicy::IfNotPresent
            },
            image_pull_secrets: spec.image_pull_secrets.clone(),
            command: command_for(spec),
            args: spec.args.clone(),
            env,
            working_dir: spec.use_source.then(|| spec.mount_path.clone()),
            resources: ResourceRequirements {
                requests: spec.resource_requests.clone(),
                limits: spec.resource_limits.clone(),
            },
            host: spec.host.clone(),
            volumes: volumes_for(spec, build_id, mounts),
            security: SecurityContext {
                privileged: spec.privileged,
                docker_socket: spec.docker.enabled,
            },
            service_account: spec.service_account.clone(),
            timeout_ms: spec.timeout_ms,
        }
    }

    /// Name of the job this request was built from
    pub fn job_name(&self) -> Option<&str> {
        self.labels.get(LABEL_JOB_NAME).map(String::as_str)
    }
}

/// Runs the tasks as one shell script that stops at the first failure
fn command_for(spec: &JobSpec) -> Vec<String> {
    if spec.tasks.is_empty() {
        return Vec::new();
    }

    let mut script = String::from("set -e\n");
    script.push_str(&spec.tasks.join("\n"));

    vec![spec.shell.clone(), "-c".to_string(), script]
}

fn volumes_for(spec: &JobSpec, build_id: &BuildId, mounts: &MountConfig) -> Vec<VolumeMount> {
    let mut volumes = Vec::new();

    if spec.use_source {
        volumes.push(VolumeMount {
            name: "source".to_string(),
            source: VolumeSource::Source,
            mount_path: spec.mount_path.clone(),
            read_only: false,
        });
    }

    if spec.cache.enabled {
        volumes.push(VolumeMount {
            name: format!("{}-cache", spec.name()),
            source: VolumeSource::Cache {
                key: spec.name().to_string(),
                size: spec.cache.size.clone(),
            },
            mount_path: spec.cache.path(mounts).to_string(),
            read_only: false,
        });
    }

    if spec.storage.enabled {
        volumes.push(VolumeMount {
            name: "build-storage".to_string(),
            source: VolumeSource::SharedStorage {
                build_id: build_id.clone(),
            },
            mount_path: spec.storage.path(mounts).to_string(),
            read_only: false,
        });
    }

    if spec.docker.enabled {
        volumes.push(VolumeMount {
            name: mounts.docker_socket_volume.clone(),
            source: VolumeSource::HostPath(mounts.docker_socket_path.clone()),
            mount_path: mounts.docker_socket_path.clone(),
            read_only: false,
        });
    }

    volumes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build() -> BuildId {
        BuildId::parse("b123").unwrap()
    }

    fn translate(spec: &JobSpec) -> ExecutionRequest {
        let id = ExecutionId::new(spec.name(), &build());
        ExecutionRequest::from_spec(spec, id, &build(), &MountConfig::default())
    }

    #[test]
    fn test_default_spec_translates() {
        let request = translate(&JobSpec::new("build-1"));

        assert_eq!(request.execution_id.as_str(), "build-1-b123");
        assert_eq!(request.job_name(), Some("build-1"));
        assert_eq!(request.pull_policy, PullPolicy::IfNotPresent);
        assert!(request.command.is_empty());
        assert_eq!(request.working_dir.as_deref(), Some("/src"));
        assert_eq!(request.volumes.len(), 1);
        assert_eq!(request.volumes[0].source, VolumeSource::Source);
        assert!(!request.security.privileged);
        assert!(!request.security.docker_socket);
        assert_eq!(request.timeout_ms, crate::domain::job::DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn test_tasks_become_shell_script() {
        let spec = JobSpec::new("build-1")
            .with_tasks(["apk add make", "make test"])
            .with_args(["--verbose"]);
        let request = translate(&spec);

        assert_eq!(
            request.command,
            vec!["/bin/sh", "-c", "set -e\napk add make\nmake test"]
        );
        assert_eq!(request.args, vec!["--verbose"]);
    }

    #[test]
    fn test_force_pull() {
        let request = translate(&JobSpec::new("build-1").with_image_force_pull(true));
        assert_eq!(request.pull_policy, PullPolicy::Always);
    }

    #[test]
    fn test_env_injection_and_override() {
        let spec = JobSpec::new("build-1")
            .with_env(ENV_SOURCE_PATH, "/custom")
            .with_secret_env("TOKEN", "ci-secrets", "token");
        let request = translate(&spec);

        assert_eq!(
            request.env.get(ENV_JOB_NAME),
            Some(&EnvValue::Literal("build-1".to_string()))
        );
        assert_eq!(
            request.env.get(ENV_BUILD_ID),
            Some(&EnvValue::Literal("b123".to_string()))
        );
        assert_eq!(
            request.env.get(ENV_SOURCE_PATH),
            Some(&EnvValue::Literal("/custom".to_string()))
        );
        assert!(matches!(request.env.get("TOKEN"), Some(EnvValue::Secret(_))));
    }

    #[test]
    fn test_without_source() {
        let mut spec = JobSpec::new("lint");
        spec.use_source = false;
        let request = translate(&spec);

        assert!(request.working_dir.is_none());
        assert!(request.volumes.is_empty());
        assert!(!request.env.contains_key(ENV_SOURCE_PATH));
    }

    #[test]
    fn test_all_volumes_in_order() {
        let mut spec = JobSpec::new("dind");
        spec.cache.enabled = true;
        spec.cache.size = "1Gi".to_string();
        spec.storage.enabled = true;
        spec.docker.enabled = true;
        spec.privileged = true;
        let request = translate(&spec);

        let paths: Vec<&str> = request
            .volumes
            .iter()
            .map(|v| v.mount_path.as_str())
            .collect();
        assert_eq!(
            paths,
            vec![
                "/src",
                "/mnt/shipyard/cache",
                "/mnt/shipyard/share",
                "/var/run/docker.sock"
            ]
        );
        assert_eq!(
            request.volumes[1].source,
            VolumeSource::Cache {
                key: "dind".to_string(),
                size: "1Gi".to_string()
            }
        );
        assert_eq!(
            request.volumes[2].source,
            VolumeSource::SharedStorage { build_id: build() }
        );
        assert!(request.security.privileged);
        assert!(request.security.docker_socket);
    }

    #[test]
    fn test_mount_config_is_injected() {
        let mut spec = JobSpec::new("build-1");
        spec.cache.enabled = true;
        let mounts = MountConfig {
            cache_path: "/alt/cache".to_string(),
            ..MountConfig::default()
        };
        let request = ExecutionRequest::from_spec(
            &spec,
            ExecutionId::new("build-1", &build()),
            &build(),
            &mounts,
        );
        assert_eq!(request.volumes[1].mount_path, "/alt/cache");
    }

    #[test]
    fn test_same_name_shares_cache_key() {
        let mut first = JobSpec::new("deps");
        first.cache.enabled = true;
        let second = first.clone();

        let a = ExecutionRequest::from_spec(
            &first,
            ExecutionId::new("deps", &BuildId::parse("one").unwrap()),
            &BuildId::parse("one").unwrap(),
            &MountConfig::default(),
        );
        let b = ExecutionRequest::from_spec(
            &second,
            ExecutionId::new("deps", &BuildId::parse("two").unwrap()),
            &BuildId::parse("two").unwrap(),
            &MountConfig::default(),
        );

        assert_ne!(a.execution_id, b.execution_id);
        assert_eq!(a.volumes[1], b.volumes[1]);
    }

    #[test]
    fn test_resources_and_placement_pass_through() {
        let mut spec = JobSpec::new("build-1");
        spec.resource_requests.cpu = Some("500m".to_string());
        spec.resource_limits.memory = Some("not-a-quantity".to_string());
        spec.host.os = Some("linux".to_string());
        spec.host
            .node_selector
            .insert("pool".to_string(), "ci".to_string());
        spec.service_account = Some("builder".to_string());
        let request = translate(&spec);

        assert_eq!(request.resources.requests.cpu.as_deref(), Some("500m"));
        assert_eq!(
            request.resources.limits.memory.as_deref(),
            Some("not-a-quantity")
        );
        assert_eq!(request.host, spec.host);
        assert_eq!(request.service_account.as_deref(), Some("builder"));
    }
}
