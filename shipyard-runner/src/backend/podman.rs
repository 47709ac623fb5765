//! Podman execution backend
//!
//! Runs each execution request as a detached podman container:
//! - Checking podman availability
//! - Resolving cache, storage, source and socket volumes to host directories
//! - Translating requests into `podman run` arguments
//! - Inspecting container state, fetching logs, stopping and removing

use async_trait::async_trait;
use shipyard_core::dto::execution::{PullPolicy, VolumeSource};
use shipyard_core::domain::job::EnvValue;
use shipyard_core::{
    BackendError, ExecutionBackend, ExecutionHandle, ExecutionRequest, ExecutionStatus,
};
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::config::PodmanConfig;

/// Label carrying the requested service account; podman has no equivalent
pub const LABEL_SERVICE_ACCOUNT: &str = "shipyard.service-account";

/// A volume resolved to a directory on the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMount {
    pub host_path: PathBuf,
    pub container_path: String,
    pub read_only: bool,
}

/// Backend driving the local podman CLI
#[derive(Debug, Clone)]
pub struct PodmanBackend {
    config: PodmanConfig,
}

impl PodmanBackend {
    pub fn new(config: PodmanConfig) -> Self {
        Self { config }
    }

    /// Checks that podman is installed and working, returning its version
    pub async fn check_available(&self) -> Result<String, BackendError> {
        let output = Command::new(&self.config.binary)
            .arg("--version")
            .output()
            .await
            .map_err(|e| {
                BackendError::unavailable(format!(
                    "Failed to execute '{} --version'. Is podman installed? {}",
                    self.config.binary, e
                ))
            })?;

        if !output.status.success() {
            return Err(BackendError::unavailable(
                "Podman is not working correctly",
            ));
        }

        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!("Podman is available: {}", version);

        Ok(version)
    }

    /// Host directory backing a volume, if this backend has one for it
    pub fn host_path(&self, source: &VolumeSource) -> Option<PathBuf> {
        match source {
            VolumeSource::Source => self.config.source_dir.clone(),
            VolumeSource::Cache { key, .. } => Some(self.config.cache_root.join(key)),
            VolumeSource::SharedStorage { build_id } => {
                Some(self.config.storage_root.join(build_id.as_str()))
            }
            VolumeSource::HostPath(path) => Some(PathBuf::from(path)),
        }
    }

    /// Resolves the request's volumes, creating cache and storage directories
    ///
    /// Bind mounts cannot enforce the cache size; it is only logged.
    pub async fn prepare_volumes(
        &self,
        request: &ExecutionRequest,
    ) -> Result<Vec<ResolvedMount>, BackendError> {
        let mut mounts = Vec::with_capacity(request.volumes.len());

        for volume in &request.volumes {
            let Some(host_path) = self.host_path(&volume.source) else {
                warn!(
                    "No source directory configured, nothing mounted at {} for {}",
                    volume.mount_path, request.execution_id
                );
                continue;
            };

            match &volume.source {
                VolumeSource::Cache { size, .. } => {
                    debug!(
                        "Cache for {} at {:?} (size hint {})",
                        request.execution_id, host_path, size
                    );
                    tokio::fs::create_dir_all(&host_path).await?;
                }
                VolumeSource::SharedStorage { .. } => {
                    tokio::fs::create_dir_all(&host_path).await?;
                }
                VolumeSource::Source | VolumeSource::HostPath(_) => {}
            }

            mounts.push(ResolvedMount {
                host_path,
                container_path: volume.mount_path.clone(),
                read_only: volume.read_only,
            });
        }

        Ok(mounts)
    }

    /// Registry auth file for the first pull secret
    ///
    /// podman accepts a single auth file per run.
    fn auth_file(&self, request: &ExecutionRequest) -> Option<PathBuf> {
        let dir = self.config.auth_dir.as_ref()?;
        let first = request.image_pull_secrets.first()?;
        if request.image_pull_secrets.len() > 1 {
            warn!(
                "podman uses one auth file per run, ignoring pull secrets after '{}'",
                first
            );
        }
        Some(dir.join(format!("{}.json", first)))
    }

    /// Host constraints are advisory; a single podman host cannot honor most
    fn check_placement(&self, request: &ExecutionRequest) {
        let host = &request.host;

        if let Some(ref os) = host.os {
            if os != std::env::consts::OS {
                warn!(
                    "{} asks for os '{}' but podman runs on '{}'",
                    request.execution_id,
                    os,
                    std::env::consts::OS
                );
            }
        }

        if host.name.is_some() || !host.node_selector.is_empty() {
            debug!(
                "Ignoring host name and node selector hints for {}",
                request.execution_id
            );
        }
    }

    async fn podman(&self, args: &[String]) -> Result<Output, BackendError> {
        Command::new(&self.config.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| {
                BackendError::unavailable(format!(
                    "Failed to execute {} {}: {}",
                    self.config.binary,
                    args.first().map(String::as_str).unwrap_or_default(),
                    e
                ))
            })
    }

    /// Runs a podman command against an existing container
    async fn container_command(
        &self,
        handle: &ExecutionHandle,
        args: &[String],
    ) -> Result<Output, BackendError> {
        let output = self.podman(args).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_no_such_container(&stderr) {
                return Err(BackendError::NotFound(handle.execution_id.to_string()));
            }
            return Err(BackendError::unavailable(format!(
                "podman {} failed for {}: {}",
                args.first().map(String::as_str).unwrap_or_default(),
                handle.execution_id,
                stderr.trim()
            )));
        }

        Ok(output)
    }
}

#[async_trait]
impl ExecutionBackend for PodmanBackend {
    async fn submit(&self, request: &ExecutionRequest) -> Result<ExecutionHandle, BackendError> {
        self.check_placement(request);

        let mounts = self.prepare_volumes(request).await?;
        let auth_file = self.auth_file(request);
        let args = run_args(request, &mounts, auth_file.as_deref());

        info!(
            "Creating container {} for image {}",
            request.execution_id, request.image
        );

        let output = self.podman(&args).await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !stdout.trim().is_empty() {
            debug!("podman run stdout: {}", stdout.trim());
        }
        if !stderr.trim().is_empty() {
            debug!("podman run stderr: {}", stderr.trim());
        }

        if !output.status.success() {
            let exit_code = output.status.code().unwrap_or(-1);

            let error_msg = format!(
                "Failed to start container for image {}: exit_code={}, stderr='{}'",
                request.image,
                exit_code,
                stderr.trim()
            );

            error!("{}", error_msg);
            return Err(BackendError::Rejected(error_msg));
        }

        let container_id = stdout.trim().to_string();
        info!(
            "Container {} started with ID: {}",
            request.execution_id, container_id
        );

        Ok(ExecutionHandle {
            execution_id: request.execution_id.clone(),
            backend_ref: container_id,
        })
    }

    async fn status(&self, handle: &ExecutionHandle) -> Result<ExecutionStatus, BackendError> {
        let args = vec![
            "inspect".to_string(),
            "--format".to_string(),
            "{{.State.Status}} {{.State.ExitCode}}".to_string(),
            handle.execution_id.to_string(),
        ];
        let output = self.container_command(handle, &args).await?;

        parse_state(&String::from_utf8_lossy(&output.stdout))
    }

    async fn logs(&self, handle: &ExecutionHandle) -> Result<String, BackendError> {
        let args = vec!["logs".to_string(), handle.execution_id.to_string()];
        let output = self.container_command(handle, &args).await?;

        // podman replays the container's stderr on its own stderr
        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }

    async fn terminate(&self, handle: &ExecutionHandle) -> Result<(), BackendError> {
        info!("Stopping container {}", handle.execution_id);

        let args = vec![
            "stop".to_string(),
            "-t".to_string(),
            self.config.stop_timeout.as_secs().to_string(),
            handle.execution_id.to_string(),
        ];
        self.container_command(handle, &args).await?;
        Ok(())
    }

    async fn release(&self, handle: &ExecutionHandle) -> Result<(), BackendError> {
        let args = vec![
            "rm".to_string(),
            "-f".to_string(),
            handle.execution_id.to_string(),
        ];

        match self.container_command(handle, &args).await {
            Ok(_) => {
                debug!("Container {} removed", handle.execution_id);
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Builds the `podman run` arguments for a request
pub fn run_args(
    request: &ExecutionRequest,
    mounts: &[ResolvedMount],
    auth_file: Option<&Path>,
) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(), // Detached
        "--name".to_string(),
        request.execution_id.to_string(),
    ];

    for (key, value) in &request.labels {
        push_flag(&mut args, "--label", format!("{}={}", key, value));
    }
    if let Some(ref account) = request.service_account {
        push_flag(
            &mut args,
            "--label",
            format!("{}={}", LABEL_SERVICE_ACCOUNT, account),
        );
    }
    for (key, value) in &request.annotations {
        push_flag(&mut args, "--annotation", format!("{}={}", key, value));
    }

    let pull = match request.pull_policy {
        PullPolicy::Always => "always",
        PullPolicy::IfNotPresent => "missing",
    };
    push_flag(&mut args, "--pull", pull.to_string());
    if let Some(path) = auth_file {
        push_flag(&mut args, "--authfile", path.display().to_string());
    }

    if request.security.privileged {
        args.push("--privileged".to_string());
    }

    let limits = &request.resources.limits;
    let requests = &request.resources.requests;
    if let Some(ref cpu) = limits.cpu {
        push_flag(&mut args, "--cpus", podman_cpus(cpu));
    }
    if let Some(ref memory) = limits.memory {
        push_flag(&mut args, "--memory", podman_memory(memory));
    }
    if let Some(ref cpu) = requests.cpu {
        push_flag(&mut args, "--cpu-shares", podman_cpu_shares(cpu));
    }
    if let Some(ref memory) = requests.memory {
        push_flag(&mut args, "--memory-reservation", podman_memory(memory));
    }

    for (key, value) in &request.env {
        match value {
            EnvValue::Literal(literal) => {
                push_flag(&mut args, "-e", format!("{}={}", key, literal));
            }
            // podman secrets hold one value each, so a key is its own secret
            EnvValue::Secret(secret) => push_flag(
                &mut args,
                "--secret",
                format!("{}-{},type=env,target={}", secret.name, secret.key, key),
            ),
        }
    }

    for mount in mounts {
        let mode = if mount.read_only { ":ro" } else { "" };
        push_flag(
            &mut args,
            "-v",
            format!("{}:{}{}", mount.host_path.display(), mount.container_path, mode),
        );
    }

    if let Some(ref dir) = request.working_dir {
        push_flag(&mut args, "-w", dir.clone());
    }

    // Override the image entrypoint when the job brings its own command
    let mut command = request.command.iter();
    if let Some(entrypoint) = command.next() {
        push_flag(&mut args, "--entrypoint", entrypoint.clone());
    }

    args.push(request.image.clone());
    args.extend(command.cloned());
    args.extend(request.args.iter().cloned());

    args
}

fn push_flag(args: &mut Vec<String>, flag: &str, value: String) {
    args.push(flag.to_string());
    args.push(value);
}

/// Maps `podman inspect` state output onto an execution status
pub fn parse_state(output: &str) -> Result<ExecutionStatus, BackendError> {
    let mut parts = output.split_whitespace();
    let state = parts
        .next()
        .ok_or_else(|| BackendError::unavailable("empty podman inspect output"))?;
    let exit_code = parts.next().and_then(|code| code.parse::<i32>().ok());

    let status = match state {
        "created" | "configured" | "initialized" => ExecutionStatus::Pending,
        "running" | "paused" | "stopping" => ExecutionStatus::Running,
        "exited" | "stopped" => match exit_code {
            Some(0) => ExecutionStatus::Succeeded,
            Some(code) => ExecutionStatus::Failed {
                exit_code: Some(code),
                message: format!("container exited with code {}", code),
            },
            None => ExecutionStatus::Failed {
                exit_code: None,
                message: "container exited without an exit code".to_string(),
            },
        },
        "removing" | "dead" => ExecutionStatus::Failed {
            exit_code,
            message: format!("container is {}", state),
        },
        other => {
            return Err(BackendError::unavailable(format!(
                "unknown container state '{}'",
                other
            )));
        }
    };

    Ok(status)
}

fn is_no_such_container(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    stderr.contains("no such container") || stderr.contains("no such object")
}

/// Converts a CPU quantity to `--cpus` syntax: `500m` becomes `0.5`
///
/// Anything unrecognized is passed through for podman to judge.
pub fn podman_cpus(quantity: &str) -> String {
    match parse_millicores(quantity) {
        Some(millis) if quantity.ends_with('m') => format!("{}", millis as f64 / 1000.0),
        _ => quantity.to_string(),
    }
}

/// Converts a CPU quantity to relative `--cpu-shares` (1024 per core)
pub fn podman_cpu_shares(quantity: &str) -> String {
    match parse_millicores(quantity) {
        Some(millis) => match millis.checked_mul(1024) {
            Some(scaled) => (scaled / 1000).max(2).to_string(),
            None => quantity.to_string(),
        },
        None => quantity.to_string(),
    }
}

fn parse_millicores(quantity: &str) -> Option<u64> {
    if let Some(millis) = quantity.strip_suffix('m') {
        return millis.parse::<u64>().ok();
    }
    let cores = quantity.parse::<f64>().ok()?;
    (cores >= 0.0).then(|| (cores * 1000.0).round() as u64)
}

/// Converts a memory quantity to podman units
///
/// Binary suffixes map onto podman's (which are binary too); decimal
/// suffixes are expanded to bytes. Anything else is passed through.
pub fn podman_memory(quantity: &str) -> String {
    const BINARY: [(&str, &str, u64); 4] = [
        ("Ki", "k", 1),
        ("Mi", "m", 1),
        ("Gi", "g", 1),
        ("Ti", "g", 1024),
    ];
    const DECIMAL: [(&str, u64); 5] = [
        ("k", 1_000),
        ("K", 1_000),
        ("M", 1_000_000),
        ("G", 1_000_000_000),
        ("T", 1_000_000_000_000),
    ];

    // Out-of-range values fall through untouched for podman to reject
    for (suffix, unit, factor) in BINARY {
        if let Some(n) = scaled(quantity, suffix, factor) {
            return format!("{}{}", n, unit);
        }
    }

    for (suffix, factor) in DECIMAL {
        if let Some(n) = scaled(quantity, suffix, factor) {
            return format!("{}b", n);
        }
    }

    quantity.to_string()
}

/// `<n><suffix>` as `n * factor`, or `None` if it does not parse or fit
fn scaled(quantity: &str, suffix: &str, factor: u64) -> Option<u64> {
    quantity
        .strip_suffix(suffix)?
        .parse::<u64>()
        .ok()?
        .checked_mul(factor)
}
