//! Provisioning of the containerised engine and store.

use async_trait::async_trait;
use thiserror::Error;

mod compose;

pub use compose::{ComposeFile, DEFAULT_SUBNET, DockerComposeEnvironment, Platform, SubnetConfig, render_compose_file};

#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("unsupported platform '{0}'; only linux and macos are supported")]
    UnsupportedPlatform(String),

    #[error("invalid environment address base '{0}'; expected an IPv4 address such as 240.10.2.0")]
    InvalidSubnet(String),

    #[error("failed to render compose file: {0}")]
    Render(#[from] serde_yaml::Error),

    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed { command: String, status: String, stderr: String },

    #[error("{service} did not become reachable at {address} within {timeout_ms} ms")]
    NotReady {
        service: String,
        address: String,
        timeout_ms: u128,
    },
}

/// Starts, probes and stops the environment a run executes in.
#[async_trait]
pub trait EnvironmentProvisioner: Send + Sync {
    /// Bring the environment up; returns once it is ready.
    async fn start(&self) -> Result<(), EnvironmentError>;

    /// Wait until every service accepts connections.
    async fn ready(&self) -> Result<(), EnvironmentError>;

    /// Tear the environment down.
    async fn stop(&self) -> Result<(), EnvironmentError>;
}
