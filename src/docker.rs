//! Docker-backed process runtime: proxy containers are listed and signaled
//! through the Docker Engine API

use crate::config::DockerConfig;
use crate::runtime::{ProcessInfo, ProcessRuntime, RuntimeError};
use async_trait::async_trait;
use bollard::container::{KillContainerOptions, ListContainersOptions};
use bollard::Docker;
use tracing::{debug, info};

pub struct DockerRuntime {
    client: Docker,
    signal: String,
}

impl DockerRuntime {
    /// Create a client for the configured endpoint.
    ///
    /// Supported endpoint forms are `unix:///path/to/socket` and
    /// `tcp://host:port` (or `http://`). An empty endpoint falls back to
    /// `DOCKER_HOST` and then the local socket defaults. No request is made
    /// until [`DockerRuntime::ping`] or the first listing.
    pub fn connect(config: &DockerConfig) -> Result<Self, RuntimeError> {
        let client = if !config.endpoint.is_empty() {
            Self::connect_to_host(&config.endpoint, config.timeout_secs)?
        } else if let Ok(host) = std::env::var("DOCKER_HOST") {
            Self::connect_to_host(&host, config.timeout_secs)?
        } else {
            Docker::connect_with_socket_defaults().map_err(|e| RuntimeError::Connect {
                endpoint: "default socket".to_string(),
                reason: e.to_string(),
            })?
        };

        debug!(endpoint = %config.endpoint, signal = %config.signal, "Docker client created");
        Ok(Self {
            client,
            signal: config.signal.clone(),
        })
    }

    fn connect_to_host(host: &str, timeout_secs: u64) -> Result<Docker, RuntimeError> {
        let connect_err = |e: bollard::errors::Error| RuntimeError::Connect {
            endpoint: host.to_string(),
            reason: e.to_string(),
        };

        if let Some(socket_path) = host.strip_prefix("unix://") {
            Docker::connect_with_socket(socket_path, timeout_secs, bollard::API_DEFAULT_VERSION)
                .map_err(connect_err)
        } else if host.starts_with("tcp://") || host.starts_with("http://") {
            Docker::connect_with_http(host, timeout_secs, bollard::API_DEFAULT_VERSION)
                .map_err(connect_err)
        } else {
            Err(RuntimeError::Connect {
                endpoint: host.to_string(),
                reason: "expected 'unix:///path/to/socket' or 'tcp://host:port'".to_string(),
            })
        }
    }

    /// Check that the daemon answers
    pub async fn ping(&self) -> Result<(), RuntimeError> {
        self.client
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| RuntimeError::Request {
                operation: "ping docker daemon",
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl ProcessRuntime for DockerRuntime {
    async fn list_processes(&self) -> Result<Vec<ProcessInfo>, RuntimeError> {
        let options = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };

        let containers = self
            .client
            .list_containers(Some(options))
            .await
            .map_err(|e| RuntimeError::Request {
                operation: "list containers",
                message: e.to_string(),
            })?;

        let processes = containers
            .into_iter()
            .filter_map(|container| match container.id {
                Some(id) => Some(ProcessInfo {
                    id,
                    names: container.names.unwrap_or_default(),
                }),
                None => {
                    debug!(names = ?container.names, "Skipping container without id");
                    None
                }
            })
            .collect();

        Ok(processes)
    }

    async fn send_reload_signal(&self, id: &str) -> Result<(), RuntimeError> {
        let options = KillContainerOptions {
            signal: self.signal.as_str(),
        };

        self.client
            .kill_container(id, Some(options))
            .await
            .map_err(|e| RuntimeError::Request {
                operation: "kill container",
                message: e.to_string(),
            })?;

        info!(container_id = id, signal = %self.signal, "Signaled container");
        Ok(())
    }
}
