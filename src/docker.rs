//! Docker-backed container runtime for the sidecar
//!
//! Creates the container from a validated [`ContainerRequest`], waits for the
//! image's HEALTHCHECK to report healthy and exposes the resulting port mapping
//! through [`ContainerEndpoint`].

use crate::config::{Configuration, WaitStrategy};
use crate::container::{CitmContainer, ContainerEndpoint, ContainerRequest};
use crate::error::{CitmError, Result};
use crate::settings::{DockerSettings, PullPolicy};
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{
    ContainerInspectResponse, EndpointSettings, HealthStatusEnum, HostConfig, PortBinding, PortMap,
};
use bollard::network::ConnectNetworkOptions;
use bollard::Docker;
use futures::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Hostname used when the Docker endpoint is a local socket
const LOCAL_HOST: &str = "127.0.0.1";

/// Environment variable overriding the hostname reported for published ports
pub const HOST_OVERRIDE_ENV: &str = "TESTCONTAINERS_HOST_OVERRIDE";

/// Connection to a Docker daemon that can start citm sidecars
pub struct DockerRuntime {
    client: Docker,
    settings: DockerSettings,
    host: String,
}

impl DockerRuntime {
    /// Connect to the Docker daemon
    ///
    /// Connection priority:
    /// 1. `settings.host`
    /// 2. DOCKER_HOST environment variable
    /// 3. Endpoint of the current `docker context`
    /// 4. Common socket paths (platform-specific)
    ///
    /// The reported hostname comes from `settings.host_override`, then
    /// TESTCONTAINERS_HOST_OVERRIDE, then the endpoint itself.
    pub async fn connect(settings: &DockerSettings) -> Result<Self> {
        let env_host = std::env::var("DOCKER_HOST").ok().filter(|h| !h.is_empty());
        let endpoint = match settings.host.clone().or(env_host) {
            Some(host) => Some(host),
            None => Self::docker_context_host().await,
        };

        let client = match endpoint.as_deref() {
            Some(host) => Self::connect_to_host(host)?,
            None => Self::connect_with_defaults().await?,
        };

        client.ping().await.map_err(|e| {
            CitmError::Connection(format!(
                "Docker daemon is not responding: {}. \
                 Ensure Docker Desktop, Colima, or dockerd is running.",
                e
            ))
        })?;

        let reported = host_override(settings, |key| std::env::var(key).ok());
        let host = resolve_host(reported.as_deref(), endpoint.as_deref());
        debug!(host, "Connected to Docker daemon");

        Ok(Self {
            client,
            settings: settings.clone(),
            host,
        })
    }

    fn connect_to_host(host: &str) -> Result<Docker> {
        if let Some(socket_path) = host.strip_prefix("unix://") {
            Docker::connect_with_socket(socket_path, 120, bollard::API_DEFAULT_VERSION)
                .map_err(|e| CitmError::Connection(format!("Unix socket '{}': {}", socket_path, e)))
        } else if host.starts_with("tcp://") || host.starts_with("http://") {
            Docker::connect_with_http(host, 120, bollard::API_DEFAULT_VERSION)
                .map_err(|e| CitmError::Connection(format!("TCP endpoint '{}': {}", host, e)))
        } else {
            Err(CitmError::Connection(format!(
                "invalid Docker host '{}', expected 'unix:///path/to/socket' or 'tcp://host:port'",
                host
            )))
        }
    }

    /// Ask the docker CLI for the current context's endpoint; None if unavailable
    async fn docker_context_host() -> Option<String> {
        let output = Command::new("docker")
            .args(["context", "inspect", "--format", "{{.Endpoints.docker.Host}}"])
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                let host = parse_context_host(&String::from_utf8_lossy(&output.stdout));
                if let Some(ref host) = host {
                    debug!(host, "Using Docker endpoint from current context");
                }
                host
            }
            Ok(output) => {
                debug!(
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "docker context inspect failed"
                );
                None
            }
            Err(e) => {
                debug!(error = %e, "docker CLI not available");
                None
            }
        }
    }

    async fn connect_with_defaults() -> Result<Docker> {
        let home = std::env::var("HOME").unwrap_or_default();
        let xdg_runtime = std::env::var("XDG_RUNTIME_DIR").unwrap_or_default();

        let socket_paths: Vec<(&str, String)> = vec![
            ("Linux default", "/var/run/docker.sock".to_string()),
            ("Docker Desktop (macOS)", format!("{}/.docker/run/docker.sock", home)),
            ("Colima (macOS)", format!("{}/.colima/default/docker.sock", home)),
            ("Rancher Desktop", format!("{}/.rd/docker.sock", home)),
            ("Podman (Linux)", format!("{}/podman/podman.sock", xdg_runtime)),
        ];

        let mut tried_paths = Vec::new();

        for (name, path) in &socket_paths {
            let usable = path.starts_with('/') && !path.starts_with("//");
            if usable && std::path::Path::new(path).exists() {
                debug!(path, name, "Found Docker socket");
                match Docker::connect_with_socket(path, 120, bollard::API_DEFAULT_VERSION) {
                    Ok(client) => {
                        if client.ping().await.is_ok() {
                            return Ok(client);
                        }
                        tried_paths.push(format!("{} ({}) - daemon not responding", path, name));
                    }
                    Err(e) => {
                        tried_paths.push(format!("{} ({}) - {}", path, name, e));
                    }
                }
            }
        }

        Docker::connect_with_socket_defaults().map_err(|e| {
            let tried_info = if tried_paths.is_empty() {
                "no Docker socket found at common locations".to_string()
            } else {
                format!("tried {}", tried_paths.join(", "))
            };
            CitmError::Connection(format!(
                "{}; set DOCKER_HOST or the docker.host setting ({})",
                tried_info, e
            ))
        })
    }

    /// Hostname through which published ports are reached
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn settings(&self) -> &DockerSettings {
        &self.settings
    }

    /// Pull an image if needed based on pull policy
    pub async fn pull_image_if_needed(&self, image: &str, policy: &PullPolicy) -> Result<()> {
        let should_pull = match policy {
            PullPolicy::Always => true,
            PullPolicy::Never => {
                if self.client.inspect_image(image).await.is_err() {
                    return Err(CitmError::ImageUnavailable {
                        image: image.to_string(),
                        reason: "not found locally and pull_policy is 'never'".to_string(),
                    });
                }
                false
            }
            PullPolicy::IfNotPresent => match self.client.inspect_image(image).await {
                Ok(_) => {
                    debug!(image, "Image exists locally, skipping pull");
                    false
                }
                Err(_) => true,
            },
        };

        if !should_pull {
            return Ok(());
        }

        info!(image, "Pulling Docker image");
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };

        let mut stream = self.client.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            let progress = result.map_err(|e| CitmError::ImageUnavailable {
                image: image.to_string(),
                reason: e.to_string(),
            })?;
            if let Some(error) = progress.error {
                return Err(CitmError::ImageUnavailable {
                    image: image.to_string(),
                    reason: error,
                });
            }
            if let Some(status) = progress.status {
                debug!(image, status, "Pull progress");
            }
        }

        info!(image, "Image pulled successfully");
        Ok(())
    }

    /// Create, start and wait for a sidecar container
    pub async fn start(&self, request: &ContainerRequest) -> Result<DockerInstance> {
        let configuration = request.configuration();
        let image = configuration
            .image()
            .ok_or_else(|| CitmError::Configuration("an image reference is required".to_string()))?;

        self.pull_image_if_needed(image, &self.settings.pull_policy)
            .await?;

        let name = format!("citm-{}", uuid::Uuid::new_v4().simple());
        let container_config = container_config(configuration)?;

        let response = self
            .client
            .create_container(
                Some(CreateContainerOptions {
                    name: name.clone(),
                    platform: None,
                }),
                container_config,
            )
            .await?;
        let id = response.id;
        info!(container_id = %id, name, image, "Created citm container");

        match self.start_and_wait(&id, &name, configuration).await {
            Ok(info) => {
                let ports = info
                    .network_settings
                    .as_ref()
                    .and_then(|n| n.ports.as_ref())
                    .map(parse_port_map)
                    .unwrap_or_default();

                info!(container_id = %id, name, ports = ?ports, "citm container is ready");
                Ok(DockerInstance {
                    client: self.client.clone(),
                    id,
                    name,
                    host: self.host.clone(),
                    ports: RwLock::new(ports),
                    stop_timeout: self.settings.stop_timeout(),
                })
            }
            Err(e) => {
                warn!(container_id = %id, name, error = %e, "citm container failed to start");
                self.remove_quietly(&id).await;
                Err(e)
            }
        }
    }

    async fn start_and_wait(
        &self,
        id: &str,
        name: &str,
        configuration: &Configuration,
    ) -> Result<ContainerInspectResponse> {
        // network_mode attaches the first network, the rest are connected before start
        for network in configuration.networks().iter().skip(1) {
            self.client
                .connect_network(
                    network,
                    ConnectNetworkOptions {
                        container: id.to_string(),
                        endpoint_config: EndpointSettings::default(),
                    },
                )
                .await?;
        }

        self.client
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        info!(container_id = %id, name, "Started citm container");

        match configuration.wait_strategy() {
            Some(WaitStrategy::UntilHealthy) => self.wait_until_healthy(id, name).await,
            None => Ok(self.client.inspect_container(id, None).await?),
        }
    }

    async fn wait_until_healthy(&self, id: &str, name: &str) -> Result<ContainerInspectResponse> {
        let timeout = self.settings.startup_timeout();
        let interval = self.settings.health_poll_interval();
        let start = Instant::now();

        loop {
            let info = self.client.inspect_container(id, None).await?;
            let state = info.state.clone().unwrap_or_default();

            if state.running != Some(true) {
                return Err(CitmError::ContainerFailed {
                    name: name.to_string(),
                    reason: format!(
                        "container exited with code {}",
                        state.exit_code.unwrap_or_default()
                    ),
                });
            }

            match state.health.and_then(|h| h.status) {
                Some(HealthStatusEnum::HEALTHY) => return Ok(info),
                Some(HealthStatusEnum::UNHEALTHY) => {
                    return Err(CitmError::ContainerFailed {
                        name: name.to_string(),
                        reason: "health check reported unhealthy".to_string(),
                    });
                }
                None | Some(HealthStatusEnum::NONE) => {
                    return Err(CitmError::ContainerFailed {
                        name: name.to_string(),
                        reason: "image defines no HEALTHCHECK".to_string(),
                    });
                }
                Some(status) => {
                    debug!(container_id = %id, status = ?status, "Waiting for citm health check");
                }
            }

            if start.elapsed() >= timeout {
                return Err(CitmError::HealthTimeout {
                    name: name.to_string(),
                    timeout,
                });
            }
            tokio::time::sleep(interval).await;
        }
    }

    async fn remove_quietly(&self, id: &str) {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        if let Err(e) = self.client.remove_container(id, Some(options)).await {
            warn!(container_id = %id, error = %e, "Failed to remove container");
        }
    }
}

impl ContainerRequest {
    /// Start the sidecar on `runtime` and return a handle once it reports healthy
    pub async fn start(self, runtime: &DockerRuntime) -> Result<CitmContainer<DockerInstance>> {
        let instance = runtime.start(&self).await?;
        Ok(self.attach(instance))
    }
}

/// A started sidecar container
///
/// The container is not removed on drop; call [`DockerInstance::remove`] when done.
pub struct DockerInstance {
    client: Docker,
    id: String,
    name: String,
    host: String,
    ports: RwLock<HashMap<u16, u16>>,
    stop_timeout: Duration,
}

impl DockerInstance {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Re-read the port mapping from the daemon
    pub async fn refresh(&self) -> Result<()> {
        let info = self.client.inspect_container(&self.id, None).await?;
        let ports = info
            .network_settings
            .as_ref()
            .and_then(|n| n.ports.as_ref())
            .map(parse_port_map)
            .unwrap_or_default();
        *self.ports.write() = ports;
        Ok(())
    }

    /// Current health status as reported by Docker
    pub async fn health(&self) -> Result<Option<HealthStatusEnum>> {
        let info = self.client.inspect_container(&self.id, None).await?;
        Ok(info.state.and_then(|s| s.health).and_then(|h| h.status))
    }

    /// Stop the container gracefully
    pub async fn stop(&self) -> Result<()> {
        let options = StopContainerOptions {
            t: self.stop_timeout.as_secs() as i64,
        };

        match self.client.stop_container(&self.id, Some(options)).await {
            Ok(_) => {
                info!(container_id = %self.id, "Stopped citm container");
                Ok(())
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => {
                debug!(container_id = %self.id, "Container was already stopped");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Force-remove the container and its anonymous volumes
    pub async fn remove(&self) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        match self.client.remove_container(&self.id, Some(options)).await {
            Ok(_) => {
                info!(container_id = %self.id, "Removed citm container");
                Ok(())
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!(container_id = %self.id, "Container not found");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl ContainerEndpoint for DockerInstance {
    fn host(&self) -> String {
        self.host.clone()
    }

    fn mapped_public_port(&self, container_port: u16) -> Result<u16> {
        self.ports
            .read()
            .get(&container_port)
            .copied()
            .ok_or(CitmError::PortNotMapped(container_port))
    }
}

/// Translate a configuration into Docker's create-container body
fn container_config(configuration: &Configuration) -> Result<Config<String>> {
    let env: Vec<String> = configuration
        .environment()
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();

    let labels: HashMap<String, String> = configuration
        .labels()
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let binds = configuration
        .bind_mounts()
        .iter()
        .map(|mount| Ok(mount.bind_spec(&std::path::absolute(&mount.source)?)))
        .collect::<Result<Vec<_>>>()?;

    let mut port_bindings: PortMap = HashMap::new();
    let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
    for port in configuration.exposed_ports() {
        let key = format!("{}/tcp", port);
        // No host port: Docker picks a free one
        port_bindings.insert(
            key.clone(),
            Some(vec![PortBinding {
                host_ip: None,
                host_port: None,
            }]),
        );
        exposed_ports.insert(key, HashMap::new());
    }

    let host_config = HostConfig {
        binds: if binds.is_empty() { None } else { Some(binds) },
        port_bindings: Some(port_bindings),
        network_mode: configuration.networks().first().cloned(),
        ..Default::default()
    };

    Ok(Config {
        image: configuration.image().map(str::to_string),
        env: if env.is_empty() { None } else { Some(env) },
        labels: if labels.is_empty() { None } else { Some(labels) },
        exposed_ports: Some(exposed_ports),
        host_config: Some(host_config),
        ..Default::default()
    })
}

/// `{"80/tcp": [{"HostPort": "32768"}]}` to `{80: 32768}`
fn parse_port_map(ports: &PortMap) -> HashMap<u16, u16> {
    ports
        .iter()
        .filter_map(|(key, bindings)| {
            let container_port = key.split('/').next()?.parse::<u16>().ok()?;
            let public_port = bindings
                .as_ref()?
                .iter()
                .find_map(|b| b.host_port.as_deref()?.parse::<u16>().ok())?;
            Some((container_port, public_port))
        })
        .collect()
}

/// First line of `docker context inspect` output, if it names an endpoint
fn parse_context_host(stdout: &str) -> Option<String> {
    let host = stdout.lines().next()?.trim();
    let known = ["unix://", "tcp://", "http://"];
    known
        .iter()
        .any(|scheme| host.starts_with(scheme))
        .then(|| host.to_string())
}

/// Settings override, else a non-blank TESTCONTAINERS_HOST_OVERRIDE from `lookup`
fn host_override<F>(settings: &DockerSettings, lookup: F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    settings
        .host_override
        .clone()
        .filter(|h| !h.trim().is_empty())
        .or_else(|| lookup(HOST_OVERRIDE_ENV).filter(|h| !h.trim().is_empty()))
}

/// Hostname for published ports: explicit override, else the host of a TCP endpoint,
/// else loopback for local sockets
pub fn resolve_host(host_override: Option<&str>, docker_host: Option<&str>) -> String {
    if let Some(host) = host_override.filter(|h| !h.trim().is_empty()) {
        return host.trim().to_string();
    }

    let remote = docker_host.and_then(|endpoint| {
        let rest = ["tcp://", "http://", "https://"]
            .iter()
            .find_map(|scheme| endpoint.strip_prefix(scheme))?;
        let authority = rest.split('/').next()?;

        let host = if let Some(bracketed) = authority.strip_prefix('[') {
            bracketed.split(']').next()?
        } else {
            authority.rsplit_once(':').map_or(authority, |(h, _)| h)
        };
        (!host.is_empty()).then(|| host.to_string())
    });

    remote.unwrap_or_else(|| LOCAL_HOST.to_string())
}
