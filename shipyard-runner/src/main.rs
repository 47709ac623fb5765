//! Shipyard Runner
//!
//! Runs one job described by a JSON job file as a podman container.
//!
//! Usage: `shipyard-runner <job.json>` or `JOB_FILE=<job.json> shipyard-runner`
//!
//! The process exits non-zero unless the job succeeds. Ctrl-C cancels the
//! job and stops its container.

use anyhow::{Context, Result};
use shipyard_core::{Job, JobError, JobRunner, JobSpec};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shipyard_runner::backend::PodmanBackend;
use shipyard_runner::service::JOB_LOG_TARGET;
use shipyard_runner::{Config, ContainerJob};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("shipyard_runner=info,{}=info", JOB_LOG_TARGET).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Shipyard Runner");

    let config = load_config()?;
    info!(
        "Loaded configuration: build_id={}, poll_interval={:?}, startup_timeout={:?}",
        config.build_id, config.poll_interval, config.startup_timeout
    );

    let spec = load_job()?;
    spec.validate()?;
    info!("Loaded job {} (image {})", spec.name(), spec.image);

    let backend = Arc::new(PodmanBackend::new(config.podman.clone()));
    wait_for_backend(&backend).await?;

    let stream_logs = spec.stream_logs;
    let job = ContainerJob::new(spec, backend, config);

    let result = tokio::select! {
        result = job.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, canceling job");
            match job.runner().cancel().await {
                Err(JobError::NotStarted) => {
                    anyhow::bail!("Interrupted before the job was submitted")
                }
                other => other?,
            }
            job.runner().wait().await?
        }
    };

    if !stream_logs {
        let logs = job.logs().await?;
        if !logs.is_empty() {
            print!("{}", logs);
        }
    }

    println!("{}", result);

    if !result.is_success() {
        error!("Job did not succeed");
        std::process::exit(1);
    }

    Ok(())
}

/// Loads configuration from environment variables with fallback to defaults
fn load_config() -> Result<Config> {
    match Config::from_env() {
        Ok(config) => {
            config.validate()?;
            Ok(config)
        }
        Err(e) => {
            warn!("Failed to load config from environment ({:#}), using defaults", e);
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}

/// Reads the job file named on the command line or in `JOB_FILE`
fn load_job() -> Result<JobSpec> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("JOB_FILE").ok())
        .map(PathBuf::from)
        .context("No job file given; pass a path or set JOB_FILE")?;

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read job file {}", path.display()))?;

    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse job file {}", path.display()))
}

/// Checks podman with retry and exponential backoff
///
/// The podman service may still be coming up when the runner starts inside
/// a container.
async fn wait_for_backend(backend: &PodmanBackend) -> Result<()> {
    const MAX_RETRIES: u32 = 5;
    const INITIAL_DELAY_MS: u64 = 500;
    const MAX_DELAY_MS: u64 = 8_000;

    let mut attempt = 0;
    let mut delay_ms = INITIAL_DELAY_MS;

    loop {
        attempt += 1;

        match backend.check_available().await {
            Ok(_) => return Ok(()),
            Err(e) => {
                if attempt >= MAX_RETRIES {
                    error!("Podman unavailable after {} attempts", MAX_RETRIES);
                    return Err(anyhow::anyhow!("Podman is not available: {}", e));
                }

                warn!(
                    "Podman not available (attempt {}/{}): {}",
                    attempt, MAX_RETRIES, e
                );
                warn!("Retrying in {} ms...", delay_ms);

                tokio::time::sleep(Duration::from_millis(delay_ms)).await;

                // Exponential backoff with cap
                delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
            }
        }
    }
}
