//! Fluent, immutable builder for the citm sidecar
//!
//! Every `with_*` call borrows the builder and returns a new one, so a base
//! builder can be shared and specialized by several tests at once:
//!
//! ```no_run
//! use citm::CitmBuilder;
//!
//! let base = CitmBuilder::new().with_certs_directory("/tmp/certs");
//! let with_mocks = base.with_mocks_directory("/tmp/mocks");
//! let request = with_mocks.build().unwrap();
//! ```

use crate::config::{
    normalize_mock_path, AccessMode, BindMount, Configuration, WaitStrategy, CADDYFILE_MOUNT,
    CERTS_MOUNT, DEFAULT_MOCK_PATHS, DNS_NAMES_LABEL, DOCKER_SOCKET, MOCKS_MOUNT,
    MOCK_PATHS_ENV, NETWORK_LABEL,
};
use crate::container::ContainerRequest;
use crate::error::{CitmError, Result};
use crate::settings::ContainerSettings;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Image repository of the sidecar
pub const IMAGE_NAME: &str = "fardjad/citm";

/// Plain HTTP virtual hosts
pub const HTTP_PORT: u16 = 80;
/// HTTPS virtual hosts, served with leaf certificates minted from the root CA
pub const HTTPS_PORT: u16 = 443;
/// Forward HTTP proxy
pub const HTTP_PROXY_PORT: u16 = 8380;
/// SOCKS5 proxy
pub const SOCKS_PROXY_PORT: u16 = 8381;
/// Admin API
pub const ADMIN_PORT: u16 = 3858;

/// Every port published by the sidecar, each to a dynamically assigned host port
pub const PUBLISHED_PORTS: [u16; 5] = [
    HTTP_PORT,
    HTTPS_PORT,
    HTTP_PROXY_PORT,
    SOCKS_PROXY_PORT,
    ADMIN_PORT,
];

/// Default image reference, tagged with this crate's version
pub fn default_image() -> String {
    let version = option_env!("CARGO_PKG_VERSION")
        .filter(|v| !v.trim().is_empty())
        .unwrap_or("0.0.0");
    format!("{}:{}", IMAGE_NAME, version)
}

#[derive(Debug, Clone, PartialEq)]
pub struct CitmBuilder {
    configuration: Configuration,
}

impl Default for CitmBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CitmBuilder {
    /// Create a builder carrying the sidecar's fixed image, ports, socket mount and wait strategy
    pub fn new() -> Self {
        let init = Configuration {
            image: Some(default_image()),
            exposed_ports: PUBLISHED_PORTS.to_vec(),
            bind_mounts: vec![BindMount::new(
                DOCKER_SOCKET,
                DOCKER_SOCKET,
                AccessMode::ReadWrite,
            )],
            wait_strategy: Some(WaitStrategy::UntilHealthy),
            ..Default::default()
        };

        Self {
            configuration: Configuration::default().merge(&init),
        }
    }

    /// Create a builder and replay the settings file's container section onto it
    pub fn from_settings(settings: &ContainerSettings) -> Result<Self> {
        settings.apply(Self::new())
    }

    fn merge(&self, delta: Configuration) -> Self {
        Self {
            configuration: self.configuration.merge(&delta),
        }
    }

    /// The configuration accumulated so far
    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// Override the image reference
    pub fn with_image(&self, image: impl Into<String>) -> Self {
        self.merge(Configuration {
            image: Some(image.into()),
            ..Default::default()
        })
    }

    /// Set an arbitrary environment variable on the container
    pub fn with_env(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.merge(Configuration {
            environment: BTreeMap::from([(key.into(), value.into())]),
            ..Default::default()
        })
    }

    /// Set an arbitrary container label
    pub fn with_label(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.merge(Configuration {
            labels: BTreeMap::from([(key.into(), value.into())]),
            ..Default::default()
        })
    }

    /// Mount the directory holding `rootCA.pem` and `rootCA-key.pem` at `/certs`
    pub fn with_certs_directory(&self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        self.merge(Configuration {
            certs_directory: Some(path.to_path_buf()),
            bind_mounts: vec![BindMount::new(path, CERTS_MOUNT, AccessMode::ReadOnly)],
            ..Default::default()
        })
    }

    /// Mount a directory of extra Caddyfile snippets
    pub fn with_caddyfile_directory(&self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        self.merge(Configuration {
            caddyfile_directory: Some(path.to_path_buf()),
            bind_mounts: vec![BindMount::new(path, CADDYFILE_MOUNT, AccessMode::ReadOnly)],
            ..Default::default()
        })
    }

    /// Attach to an existing network and advertise it through the `citm_network` label.
    ///
    /// A blank name leaves the builder unchanged.
    pub fn with_network(&self, name: impl Into<String>) -> Self {
        let name = name.into();
        if name.trim().is_empty() {
            return self.clone();
        }

        self.merge(Configuration {
            networks: vec![name.clone()],
            labels: BTreeMap::from([(NETWORK_LABEL.to_string(), name.clone())]),
            network_name: Some(name),
            ..Default::default()
        })
    }

    /// Register DNS names for service discovery via the `citm_dns_names` label.
    ///
    /// An empty list leaves the builder unchanged.
    pub fn with_dns_names<I, S>(&self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return self.clone();
        }

        self.merge(Configuration {
            labels: BTreeMap::from([(DNS_NAMES_LABEL.to_string(), names.join(","))]),
            dns_names: Some(names),
            ..Default::default()
        })
    }

    /// Mount a directory of mock templates at `/citm-mocks/`.
    ///
    /// Unless mock paths were already set, `MOCK_PATHS` defaults to every `.mako`
    /// file below the mount.
    pub fn with_mocks_directory(&self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let mut delta = Configuration {
            mocks_directory: Some(path.to_path_buf()),
            bind_mounts: vec![BindMount::new(path, MOCKS_MOUNT, AccessMode::ReadOnly)],
            ..Default::default()
        };

        if !self.configuration.has_mock_paths() {
            delta
                .environment
                .insert(MOCK_PATHS_ENV.to_string(), DEFAULT_MOCK_PATHS.to_string());
        }

        self.merge(delta)
    }

    /// Restrict the mock templates loaded to the given globs.
    ///
    /// Each glob is normalized lexically and must lie under `/citm-mocks/`; one bad
    /// entry rejects the whole call.
    pub fn with_mock_paths<I, S>(&self, paths: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let normalized = paths
            .into_iter()
            .map(|p| normalize_mock_path(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        if normalized.is_empty() {
            return Err(CitmError::Configuration(
                "at least one mock path is required".to_string(),
            ));
        }

        Ok(self.merge(Configuration {
            environment: BTreeMap::from([(MOCK_PATHS_ENV.to_string(), normalized.join(","))]),
            mock_paths: Some(normalized),
            ..Default::default()
        }))
    }

    /// Validate and freeze the configuration into a startable request
    pub fn build(&self) -> Result<ContainerRequest> {
        self.configuration.validate()?;
        debug!(
            image = self.configuration.image().unwrap_or_default(),
            mounts = self.configuration.bind_mounts().len(),
            "Validated citm configuration"
        );
        Ok(ContainerRequest::new(self.configuration.clone()))
    }
}
