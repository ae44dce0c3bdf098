//! Harness configuration.
//!
//! Read from `$SFN_TESTER_CONFIG_PATH` or `<config dir>/sfn-tester/config.json`.
//! Every field has a default, so a missing file or an empty object is a valid
//! configuration. A handful of `SFN_TESTER_*` environment variables override the
//! file.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dirs_next::config_dir;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::ledger::DEFAULT_NAMESPACE;
use crate::rewrite::{DEFAULT_IDENTITY_KEY, DEFAULT_TIMEOUT_SECONDS, DEFAULT_WORKER_RESOURCE, DefinitionRewriter};

/// Environment variable naming an alternative configuration file.
pub const CONFIG_PATH_ENV: &str = "SFN_TESTER_CONFIG_PATH";

/// Placeholder IAM role every definition is created with.
pub const DEFAULT_ROLE_ARN: &str = "arn:aws:iam::012345678901:role/DummyRole";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration file {path} is invalid: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("environment variable {name} has invalid value '{value}': {reason}")]
    InvalidOverride { name: String, value: String, reason: String },
}

/// Settings for one harness environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HarnessConfig {
    /// Host the harness uses to reach the engine and the store.
    pub host: String,
    /// Host port of Step Functions Local.
    pub step_functions_port: u16,
    /// Port the mock worker listens on.
    pub worker_port: u16,
    /// Host port of Redis.
    pub redis_port: u16,
    /// Interface the mock worker binds to.
    pub worker_bind_host: String,
    pub region: String,
    /// Prefix of every store key the harness writes.
    pub namespace: String,
    /// Prefix of created definition names.
    pub definition_prefix: String,
    pub role_arn: String,
    /// Docker compose project name.
    pub compose_project: String,
    pub step_functions_image: String,
    pub redis_image: String,
    pub execution_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// How long `set_up` waits for the environment to accept connections.
    pub ready_timeout_ms: u64,
    /// Value forced onto every `TimeoutSeconds` of a rewritten definition.
    pub rewrite_timeout_seconds: u64,
    pub identity_key: String,
    pub worker_resource: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            step_functions_port: 8083,
            worker_port: 3001,
            redis_port: 6379,
            worker_bind_host: "0.0.0.0".to_string(),
            region: "us-east-1".to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            definition_prefix: "testStepFunction".to_string(),
            role_arn: DEFAULT_ROLE_ARN.to_string(),
            compose_project: "sfn-tester".to_string(),
            step_functions_image: "amazon/aws-stepfunctions-local".to_string(),
            redis_image: "redis".to_string(),
            execution_timeout_ms: 100_000,
            poll_interval_ms: 100,
            ready_timeout_ms: 60_000,
            rewrite_timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            identity_key: DEFAULT_IDENTITY_KEY.to_string(),
            worker_resource: DEFAULT_WORKER_RESOURCE.to_string(),
        }
    }
}

impl HarnessConfig {
    pub fn step_functions_endpoint(&self) -> String {
        format!("http://{}:{}", self.host, self.step_functions_port)
    }

    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}", self.host, self.redis_port)
    }

    pub fn worker_bind_address(&self) -> String {
        format!("{}:{}", self.worker_bind_host, self.worker_port)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn rewriter(&self) -> DefinitionRewriter {
        DefinitionRewriter::new(&self.identity_key, &self.worker_resource, self.rewrite_timeout_seconds)
    }

    /// Apply `SFN_TESTER_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(host) = non_empty_var("SFN_TESTER_HOST") {
            self.host = host;
        }
        if let Some(region) = non_empty_var("SFN_TESTER_REGION") {
            self.region = region;
        }
        if let Some(namespace) = non_empty_var("SFN_TESTER_NAMESPACE") {
            self.namespace = namespace;
        }
        if let Some(port) = port_var("SFN_TESTER_STEP_FUNCTIONS_PORT")? {
            self.step_functions_port = port;
        }
        if let Some(port) = port_var("SFN_TESTER_WORKER_PORT")? {
            self.worker_port = port;
        }
        if let Some(port) = port_var("SFN_TESTER_REDIS_PORT")? {
            self.redis_port = port;
        }
        Ok(())
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn port_var(name: &str) -> Result<Option<u16>, ConfigError> {
    let Some(value) = non_empty_var(name) else {
        return Ok(None);
    };
    value
        .trim()
        .parse::<u16>()
        .map(Some)
        .map_err(|error| ConfigError::InvalidOverride {
            name: name.to_string(),
            value,
            reason: error.to_string(),
        })
}

/// Returns the default path for the harness configuration file.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_PATH_ENV)
        && !path.trim().is_empty()
    {
        return PathBuf::from(path);
    }

    config_dir().unwrap_or_else(|| PathBuf::from(".")).join("sfn-tester").join("config.json")
}

/// Load the configuration from the default path, then apply environment overrides.
pub fn load_config() -> Result<HarnessConfig, ConfigError> {
    let mut config = load_config_from_path(&default_config_path())?;
    config.apply_env_overrides()?;
    Ok(config)
}

/// Load the configuration from `path`; a missing file yields the defaults.
pub fn load_config_from_path(path: &Path) -> Result<HarnessConfig, ConfigError> {
    if !path.exists() {
        debug!(path = %path.display(), "no configuration file, using defaults");
        return Ok(HarnessConfig::default());
    }

    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
