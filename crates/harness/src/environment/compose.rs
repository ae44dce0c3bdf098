//! Docker compose environment: Step Functions Local plus Redis.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use super::{EnvironmentError, EnvironmentProvisioner};
use crate::config::HarnessConfig;

/// Address base of the compose network when none is given.
pub const DEFAULT_SUBNET: &str = "240.10.2.0";

const STEP_FUNCTIONS_CONTAINER_PORT: u16 = 8083;
const REDIS_CONTAINER_PORT: u16 = 6379;
const READY_RETRY_DELAY: Duration = Duration::from_millis(500);

static SUBNET_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,3}\.\d{1,3}\.\d{1,2})\.\d{1,3}$").expect("valid subnet pattern"));

/// Host platform, which decides how containers reach the mock worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Host networking; the worker is `localhost`.
    Linux,
    /// Bridge networking; the worker is `host.docker.internal`.
    MacOs,
}

impl Platform {
    pub fn current() -> Result<Self, EnvironmentError> {
        Self::from_os(std::env::consts::OS)
    }

    pub fn from_os(os: &str) -> Result<Self, EnvironmentError> {
        match os {
            "linux" => Ok(Platform::Linux),
            "macos" => Ok(Platform::MacOs),
            other => Err(EnvironmentError::UnsupportedPlatform(other.to_string())),
        }
    }

    fn worker_host(self) -> &'static str {
        match self {
            Platform::Linux => "http://localhost",
            Platform::MacOs => "http://host.docker.internal",
        }
    }
}

/// `/24` network derived from an address base such as `240.10.2.0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubnetConfig {
    pub subnet: String,
    pub gateway: String,
}

impl SubnetConfig {
    pub fn from_address_base(address_base: &str) -> Result<Self, EnvironmentError> {
        let prefix = SUBNET_PATTERN
            .captures(address_base)
            .and_then(|captures| captures.get(1))
            .map(|prefix| prefix.as_str())
            .ok_or_else(|| EnvironmentError::InvalidSubnet(address_base.to_string()))?;
        Ok(Self {
            subnet: format!("{prefix}.0/24"),
            gateway: format!("{prefix}.1"),
        })
    }
}

impl Default for SubnetConfig {
    fn default() -> Self {
        Self {
            subnet: "240.10.2.0/24".to_string(),
            gateway: "240.10.2.1".to_string(),
        }
    }
}

/// Compose document, serialised with `serde_yaml`.
#[derive(Debug, Clone, Serialize)]
pub struct ComposeFile {
    pub services: IndexMap<String, ComposeService>,
    pub networks: IndexMap<String, ComposeNetwork>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComposeService {
    pub image: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub environment: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_mode: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComposeNetwork {
    pub driver: String,
    pub ipam: ComposeIpam,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComposeIpam {
    pub driver: String,
    pub config: Vec<SubnetConfig>,
}

/// Build the compose document for `config` on `platform`.
pub fn render_compose_file(config: &HarnessConfig, platform: Platform, subnet: &SubnetConfig) -> ComposeFile {
    let (network_mode, networks) = match platform {
        Platform::Linux => (Some("host".to_string()), Vec::new()),
        Platform::MacOs => (None, vec!["default".to_string()]),
    };

    let mut services = IndexMap::new();
    services.insert(
        "step_functions".to_string(),
        ComposeService {
            image: config.step_functions_image.clone(),
            ports: vec![format!("{}:{STEP_FUNCTIONS_CONTAINER_PORT}", config.step_functions_port)],
            environment: vec![format!("LAMBDA_ENDPOINT={}:{}", platform.worker_host(), config.worker_port)],
            network_mode,
            networks,
        },
    );
    services.insert(
        "redis".to_string(),
        ComposeService {
            image: config.redis_image.clone(),
            ports: vec![format!("{}:{REDIS_CONTAINER_PORT}", config.redis_port)],
            environment: Vec::new(),
            network_mode: None,
            networks: Vec::new(),
        },
    );

    let mut network_map = IndexMap::new();
    network_map.insert(
        "default".to_string(),
        ComposeNetwork {
            driver: "bridge".to_string(),
            ipam: ComposeIpam {
                driver: "default".to_string(),
                config: vec![subnet.clone()],
            },
        },
    );

    ComposeFile {
        services,
        networks: network_map,
    }
}

/// Environment managed through `docker compose`.
#[derive(Debug, Clone)]
pub struct DockerComposeEnvironment {
    config: HarnessConfig,
    platform: Platform,
    subnet: SubnetConfig,
}

impl DockerComposeEnvironment {
    /// Environment for the current platform; `address_base` defaults to [`DEFAULT_SUBNET`].
    pub fn new(config: HarnessConfig, address_base: Option<&str>) -> Result<Self, EnvironmentError> {
        Self::for_platform(config, Platform::current()?, address_base)
    }

    pub fn for_platform(config: HarnessConfig, platform: Platform, address_base: Option<&str>) -> Result<Self, EnvironmentError> {
        let subnet = SubnetConfig::from_address_base(address_base.unwrap_or(DEFAULT_SUBNET))?;
        Ok(Self {
            config,
            platform,
            subnet,
        })
    }

    pub fn compose_file(&self) -> ComposeFile {
        render_compose_file(&self.config, self.platform, &self.subnet)
    }

    pub fn compose_yaml(&self) -> Result<String, EnvironmentError> {
        Ok(serde_yaml::to_string(&self.compose_file())?)
    }

    async fn compose(&self, arguments: &[&str]) -> Result<(), EnvironmentError> {
        let yaml = self.compose_yaml()?;
        let command_line = format!("docker compose -p {} {}", self.config.compose_project, arguments.join(" "));
        debug!(command = %command_line, "running docker compose");

        let mut child = Command::new("docker")
            .arg("compose")
            .arg("-p")
            .arg(&self.config.compose_project)
            .arg("-f")
            .arg("-")
            .args(arguments)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| EnvironmentError::Spawn {
                command: command_line.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(yaml.as_bytes()).await.map_err(|source| EnvironmentError::Spawn {
                command: command_line.clone(),
                source,
            })?;
        }

        let output = child.wait_with_output().await.map_err(|source| EnvironmentError::Spawn {
            command: command_line.clone(),
            source,
        })?;
        if !output.status.success() {
            return Err(EnvironmentError::CommandFailed {
                command: command_line,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    async fn wait_for_port(&self, service: &str, port: u16) -> Result<(), EnvironmentError> {
        let address = format!("{}:{port}", self.config.host);
        let timeout = self.config.ready_timeout();
        let deadline = Instant::now() + timeout;

        loop {
            match TcpStream::connect(&address).await {
                Ok(_) => {
                    debug!(service, %address, "service reachable");
                    return Ok(());
                }
                Err(error) if Instant::now() < deadline => {
                    debug!(service, %address, %error, "service not reachable yet");
                    sleep(READY_RETRY_DELAY).await;
                }
                Err(_) => {
                    return Err(EnvironmentError::NotReady {
                        service: service.to_string(),
                        address,
                        timeout_ms: timeout.as_millis(),
                    });
                }
            }
        }
    }
}

#[async_trait]
impl EnvironmentProvisioner for DockerComposeEnvironment {
    async fn start(&self) -> Result<(), EnvironmentError> {
        info!(project = %self.config.compose_project, subnet = %self.subnet.subnet, "starting environment");
        self.compose(&["up", "-d"]).await?;
        self.ready().await
    }

    async fn ready(&self) -> Result<(), EnvironmentError> {
        self.wait_for_port("step_functions", self.config.step_functions_port).await?;
        self.wait_for_port("redis", self.config.redis_port).await
    }

    async fn stop(&self) -> Result<(), EnvironmentError> {
        info!(project = %self.config.compose_project, "stopping environment");
        if let Err(error) = self.compose(&["down", "--remove-orphans"]).await {
            warn!(%error, "docker compose down failed");
            return Err(error);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_base_yields_slash_24() {
        let subnet = SubnetConfig::from_address_base("10.99.7.42").expect("subnet");
        assert_eq!(subnet.subnet, "10.99.7.0/24");
        assert_eq!(subnet.gateway, "10.99.7.1");
        assert_eq!(SubnetConfig::from_address_base(DEFAULT_SUBNET).expect("default"), SubnetConfig::default());
    }

    #[test]
    fn malformed_address_base_is_rejected() {
        for address_base in ["240.10.2", "240.10.200.0", "not-an-ip", "240.10.2.0/24"] {
            assert!(
                matches!(SubnetConfig::from_address_base(address_base), Err(EnvironmentError::InvalidSubnet(_))),
                "{address_base} should be rejected"
            );
        }
    }

    #[test]
    fn linux_uses_host_networking() {
        let compose = render_compose_file(&HarnessConfig::default(), Platform::Linux, &SubnetConfig::default());
        let step_functions = &compose.services["step_functions"];
        assert_eq!(step_functions.network_mode.as_deref(), Some("host"));
        assert_eq!(step_functions.environment, vec!["LAMBDA_ENDPOINT=http://localhost:3001"]);
        assert_eq!(step_functions.ports, vec!["8083:8083"]);
        assert_eq!(compose.services["redis"].ports, vec!["6379:6379"]);
    }

    #[test]
    fn macos_reaches_worker_through_docker_host() {
        let mut config = HarnessConfig::default();
        config.worker_port = 4001;
        config.redis_port = 6380;
        let environment = DockerComposeEnvironment::for_platform(config, Platform::MacOs, Some("240.20.3.0")).expect("environment");
        let yaml = environment.compose_yaml().expect("yaml");
        let document: serde_yaml::Value = serde_yaml::from_str(&yaml).expect("parse");

        assert_eq!(
            document["services"]["step_functions"]["environment"][0].as_str(),
            Some("LAMBDA_ENDPOINT=http://host.docker.internal:4001")
        );
        assert_eq!(document["services"]["step_functions"]["networks"][0].as_str(), Some("default"));
        assert!(document["services"]["step_functions"].get("network_mode").is_none());
        assert_eq!(document["services"]["redis"]["ports"][0].as_str(), Some("6380:6379"));
        assert_eq!(document["networks"]["default"]["ipam"]["config"][0]["subnet"].as_str(), Some("240.20.3.0/24"));
        assert_eq!(document["networks"]["default"]["ipam"]["config"][0]["gateway"].as_str(), Some("240.20.3.1"));
    }

    #[test]
    fn unknown_platforms_are_unsupported() {
        assert_eq!(Platform::from_os("linux").expect("linux"), Platform::Linux);
        assert!(matches!(Platform::from_os("windows"), Err(EnvironmentError::UnsupportedPlatform(_))));
    }
}
