//! Runtime handle for a started citm sidecar
//!
//! [`CitmContainer`] is generic over a [`ContainerEndpoint`], the seam to whatever
//! started the instance. It asks the endpoint for the hostname and public ports on
//! every call and never caches them itself.

use crate::address::{base_url, hostname_with_subdomains};
use crate::builder::{ADMIN_PORT, HTTPS_PORT, HTTP_PORT, HTTP_PROXY_PORT, SOCKS_PROXY_PORT};
use crate::config::Configuration;
use crate::error::{CitmError, Result};
use std::collections::HashMap;
use tracing::warn;

/// Hostname and port mapping reported by a container runtime
pub trait ContainerEndpoint {
    /// Host through which published ports are reachable
    fn host(&self) -> String;

    /// Host port the runtime assigned to `container_port`
    fn mapped_public_port(&self, container_port: u16) -> Result<u16>;
}

/// Fixed hostname and port mapping, for instances started outside this crate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticEndpoint {
    host: String,
    ports: HashMap<u16, u16>,
}

impl StaticEndpoint {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ports: HashMap::new(),
        }
    }

    pub fn with_port(mut self, container_port: u16, public_port: u16) -> Self {
        self.ports.insert(container_port, public_port);
        self
    }
}

impl ContainerEndpoint for StaticEndpoint {
    fn host(&self) -> String {
        self.host.clone()
    }

    fn mapped_public_port(&self, container_port: u16) -> Result<u16> {
        self.ports
            .get(&container_port)
            .copied()
            .ok_or(CitmError::PortNotMapped(container_port))
    }
}

/// A validated configuration, ready to be handed to a container runtime
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerRequest {
    configuration: Configuration,
}

impl ContainerRequest {
    pub(crate) fn new(configuration: Configuration) -> Self {
        Self { configuration }
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// Attach the request to an instance some other runtime already started
    pub fn attach<E: ContainerEndpoint>(self, endpoint: E) -> CitmContainer<E> {
        CitmContainer::new(self.configuration, endpoint)
    }
}

/// A running sidecar and the addresses it serves on
pub struct CitmContainer<E> {
    configuration: Configuration,
    endpoint: E,
}

impl<E: ContainerEndpoint> CitmContainer<E> {
    pub fn new(configuration: Configuration, endpoint: E) -> Self {
        Self {
            configuration,
            endpoint,
        }
    }

    /// The frozen configuration the container was started with
    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn endpoint(&self) -> &E {
        &self.endpoint
    }

    /// Hostname as reported by the runtime, without any rewriting
    pub fn hostname(&self) -> String {
        self.endpoint.host()
    }

    pub fn hostname_with_subdomains(&self, subdomains: &[&str]) -> String {
        hostname_with_subdomains(&self.endpoint.host(), subdomains)
    }

    fn routed_url(&self, scheme: &str, container_port: u16, subdomains: &[&str]) -> Result<String> {
        let port = self.endpoint.mapped_public_port(container_port)?;
        Ok(base_url(scheme, &self.hostname_with_subdomains(subdomains), port))
    }

    /// `http://[subdomains.]host:port` for the plain HTTP listener
    pub fn http_base_url(&self, subdomains: &[&str]) -> Result<String> {
        self.routed_url("http", HTTP_PORT, subdomains)
    }

    /// `https://[subdomains.]host:port` for the HTTPS listener
    pub fn https_base_url(&self, subdomains: &[&str]) -> Result<String> {
        self.routed_url("https", HTTPS_PORT, subdomains)
    }

    /// `https://[subdomains.]host:port` for the admin API
    pub fn admin_base_url(&self, subdomains: &[&str]) -> Result<String> {
        self.routed_url("https", ADMIN_PORT, subdomains)
    }

    /// Forward HTTP proxy address; proxies are not virtual hosts, so the raw hostname is used
    pub fn http_proxy_address(&self) -> Result<String> {
        let port = self.endpoint.mapped_public_port(HTTP_PROXY_PORT)?;
        Ok(base_url("http", &self.endpoint.host(), port))
    }

    /// SOCKS5 proxy address using the raw hostname
    pub fn socks_proxy_address(&self) -> Result<String> {
        let port = self.endpoint.mapped_public_port(SOCKS_PROXY_PORT)?;
        Ok(base_url("socks5", &self.endpoint.host(), port))
    }

    /// Build an HTTP client that sends all traffic through the sidecar's HTTP proxy.
    ///
    /// With `ignore_tls_errors` the client accepts any server certificate, which is
    /// what tests against the generated root CA usually want. Never use it outside tests.
    pub fn new_proxy_client(&self, ignore_tls_errors: bool) -> Result<reqwest::Client> {
        let proxy = reqwest::Proxy::all(self.http_proxy_address()?)?;
        let mut builder = reqwest::Client::builder().proxy(proxy);

        if ignore_tls_errors {
            warn!("Proxy client accepts invalid TLS certificates; test use only");
            builder = builder.danger_accept_invalid_certs(true);
        }

        Ok(builder.build()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::CitmBuilder;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn endpoint(host: &str) -> StaticEndpoint {
        StaticEndpoint::new(host)
            .with_port(80, 32780)
            .with_port(443, 32781)
            .with_port(8380, 32782)
            .with_port(8381, 32783)
            .with_port(3858, 32784)
    }

    fn container(host: &str) -> CitmContainer<StaticEndpoint> {
        CitmBuilder::new()
            .with_certs_directory("/tmp/certs")
            .build()
            .unwrap()
            .attach(endpoint(host))
    }

    #[test]
    fn test_http_base_url_with_subdomains() {
        let container = container("127.0.0.1");
        assert_eq!(
            container.http_base_url(&["s1", "s2"]).unwrap(),
            "http://s1.s2.localhost:32780"
        );
        assert_eq!(container.http_base_url(&[]).unwrap(), "http://localhost:32780");
    }

    #[test]
    fn test_https_and_admin_urls() {
        let container = container("docker.example.com");
        assert_eq!(
            container.https_base_url(&["api"]).unwrap(),
            "https://api.docker.example.com:32781"
        );
        assert_eq!(
            container.admin_base_url(&["utils", "citm"]).unwrap(),
            "https://utils.citm.docker.example.com:32784"
        );
    }

    #[test]
    fn test_proxy_addresses_use_raw_hostname() {
        let container = container("127.0.0.1");
        assert_eq!(
            container.http_proxy_address().unwrap(),
            "http://127.0.0.1:32782"
        );
        assert_eq!(
            container.socks_proxy_address().unwrap(),
            "socks5://127.0.0.1:32783"
        );
    }

    #[test]
    fn test_ipv6_loopback_proxy_is_bracketed() {
        let container = container("::1");
        assert_eq!(container.http_proxy_address().unwrap(), "http://[::1]:32782");
        assert_eq!(container.http_base_url(&[]).unwrap(), "http://localhost:32780");
    }

    #[test]
    fn test_unmapped_port_is_an_error() {
        let container = CitmBuilder::new()
            .with_certs_directory("/tmp/certs")
            .build()
            .unwrap()
            .attach(StaticEndpoint::new("localhost").with_port(80, 1));

        assert!(matches!(
            container.admin_base_url(&[]),
            Err(CitmError::PortNotMapped(3858))
        ));
    }

    #[test]
    fn test_configuration_accessor_returns_frozen_value() {
        let request = CitmBuilder::new()
            .with_certs_directory("/tmp/certs")
            .with_mocks_directory("/tmp/mocks")
            .build()
            .unwrap();
        let expected = request.configuration().clone();

        let container = request.attach(endpoint("localhost"));
        assert_eq!(container.configuration(), &expected);
    }

    #[tokio::test]
    async fn test_proxy_client_routes_through_http_proxy() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let proxy = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok")
                .await
                .unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });

        let container = CitmBuilder::new()
            .with_certs_directory("/tmp/certs")
            .build()
            .unwrap()
            .attach(StaticEndpoint::new("127.0.0.1").with_port(8380, port));

        let client = container.new_proxy_client(true).unwrap();
        let body = client
            .get("http://service.citm.invalid/ping")
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();

        assert_eq!(body, "ok");
        let request = proxy.await.unwrap();
        assert!(request.starts_with("GET http://service.citm.invalid/ping HTTP/1.1"));
    }

    #[test]
    fn test_proxy_client_requires_proxy_port() {
        let container = CitmBuilder::new()
            .with_certs_directory("/tmp/certs")
            .build()
            .unwrap()
            .attach(StaticEndpoint::new("127.0.0.1"));

        assert!(container.new_proxy_client(false).is_err());
    }
}
