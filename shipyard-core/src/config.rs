//! Well-known mount locations
//!
//! Every job in a system must agree on where the cache, the shared storage
//! area and the container engine socket appear inside the container. The
//! values live in one [`MountConfig`] handed to request translation.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_CACHE_MOUNT_PATH: &str = "/mnt/shipyard/cache";
pub const DEFAULT_STORAGE_MOUNT_PATH: &str = "/mnt/shipyard/share";
pub const DEFAULT_DOCKER_SOCKET_PATH: &str = "/var/run/docker.sock";
pub const DEFAULT_DOCKER_SOCKET_VOLUME: &str = "docker-socket";

/// Container-side mount points shared by all jobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountConfig {
    /// Where the per-job cache is mounted
    pub cache_path: String,

    /// Where the build-wide shared storage is mounted
    pub storage_path: String,

    /// Path of the container engine socket, identical on host and container
    pub docker_socket_path: String,

    /// Volume name used for the socket bind mount
    pub docker_socket_volume: String,
}

impl MountConfig {
    /// Creates configuration from environment variables
    ///
    /// Optional environment variables, each falling back to its default:
    /// - SHIPYARD_CACHE_MOUNT
    /// - SHIPYARD_STORAGE_MOUNT
    /// - SHIPYARD_DOCKER_SOCKET
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cache_path: std::env::var("SHIPYARD_CACHE_MOUNT").unwrap_or(defaults.cache_path),
            storage_path: std::env::var("SHIPYARD_STORAGE_MOUNT")
                .unwrap_or(defaults.storage_path),
            docker_socket_path: std::env::var("SHIPYARD_DOCKER_SOCKET")
                .unwrap_or(defaults.docker_socket_path),
            docker_socket_volume: defaults.docker_socket_volume,
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, path) in [
            ("cache_path", &self.cache_path),
            ("storage_path", &self.storage_path),
            ("docker_socket_path", &self.docker_socket_path),
        ] {
            if !path.starts_with('/') {
                return Err(ConfigError::RelativeMountPath {
                    field,
                    path: path.clone(),
                });
            }
        }

        if self.cache_path == self.storage_path {
            return Err(ConfigError::SharedMountPath(self.cache_path.clone()));
        }

        if self.docker_socket_volume.is_empty() {
            return Err(ConfigError::EmptyVolumeName);
        }

        Ok(())
    }
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            cache_path: DEFAULT_CACHE_MOUNT_PATH.to_string(),
            storage_path: DEFAULT_STORAGE_MOUNT_PATH.to_string(),
            docker_socket_path: DEFAULT_DOCKER_SOCKET_PATH.to_string(),
            docker_socket_volume: DEFAULT_DOCKER_SOCKET_VOLUME.to_string(),
        }
    }
}
