//! Immutable container configuration and its field-wise merge
//!
//! A [`Configuration`] is never modified in place. Every builder call produces a
//! single-field delta (itself a `Configuration`) and merges it onto the previous
//! value with [`Configuration::merge`]:
//! - scalar and list fields: the delta's value wins when present and non-empty
//! - labels and environment: merged key-wise, delta keys override
//! - ports, bind mounts, networks: concatenated, skipping entries already present

use crate::error::{CitmError, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// In-container mount point for the root CA material
pub const CERTS_MOUNT: &str = "/certs";
/// In-container directory for additional Caddyfile snippets
pub const CADDYFILE_MOUNT: &str = "/etc/caddy/conf.d";
/// In-container mount point for mock templates
pub const MOCKS_MOUNT: &str = "/citm-mocks/";
/// Docker control socket, mounted onto itself for service discovery
pub const DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Environment variable holding the comma-separated mock globs
pub const MOCK_PATHS_ENV: &str = "MOCK_PATHS";
/// Glob installed when only a mocks directory is configured
pub const DEFAULT_MOCK_PATHS: &str = "/citm-mocks/**/*.mako";

pub const NETWORK_LABEL: &str = "citm_network";
pub const DNS_NAMES_LABEL: &str = "citm_dns_names";

/// Access mode for a bind mount
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

impl AccessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::ReadOnly => "ro",
            AccessMode::ReadWrite => "rw",
        }
    }
}

/// A host path exposed at a fixed path inside the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub source: PathBuf,
    pub target: String,
    pub access_mode: AccessMode,
}

impl BindMount {
    pub fn new(
        source: impl Into<PathBuf>,
        target: impl Into<String>,
        access_mode: AccessMode,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            access_mode,
        }
    }

    /// Docker `binds` entry (`source:target:mode`) for the given resolved source
    pub fn bind_spec(&self, source: &Path) -> String {
        format!(
            "{}:{}:{}",
            source.display(),
            self.target,
            self.access_mode.as_str()
        )
    }
}

/// Condition the runtime must observe before the container counts as started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStrategy {
    /// Wait until the image's own HEALTHCHECK reports healthy
    UntilHealthy,
}

/// Everything needed to start the sidecar
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Configuration {
    pub(crate) image: Option<String>,
    pub(crate) exposed_ports: Vec<u16>,
    pub(crate) bind_mounts: Vec<BindMount>,
    pub(crate) networks: Vec<String>,
    pub(crate) labels: BTreeMap<String, String>,
    pub(crate) environment: BTreeMap<String, String>,
    pub(crate) wait_strategy: Option<WaitStrategy>,

    pub(crate) certs_directory: Option<PathBuf>,
    pub(crate) caddyfile_directory: Option<PathBuf>,
    pub(crate) network_name: Option<String>,
    pub(crate) dns_names: Option<Vec<String>>,
    pub(crate) mocks_directory: Option<PathBuf>,
    pub(crate) mock_paths: Option<Vec<String>>,
}

/// Values that count as "not set" when merging
trait Blank {
    fn is_blank(&self) -> bool;
}

impl Blank for String {
    fn is_blank(&self) -> bool {
        self.trim().is_empty()
    }
}

impl Blank for PathBuf {
    fn is_blank(&self) -> bool {
        self.to_string_lossy().trim().is_empty()
    }
}

impl<T> Blank for Vec<T> {
    fn is_blank(&self) -> bool {
        self.is_empty()
    }
}

impl Blank for WaitStrategy {
    fn is_blank(&self) -> bool {
        false
    }
}

fn last_non_blank<T: Blank + Clone>(old: &Option<T>, new: &Option<T>) -> Option<T> {
    match new {
        Some(value) if !value.is_blank() => Some(value.clone()),
        _ => old.clone(),
    }
}

fn concat_distinct<T: PartialEq + Clone>(old: &[T], new: &[T]) -> Vec<T> {
    let mut merged = old.to_vec();
    for item in new {
        if !merged.contains(item) {
            merged.push(item.clone());
        }
    }
    merged
}

// Docker rejects two mounts on one target, so a later mount replaces an earlier one in place.
fn merge_bind_mounts(old: &[BindMount], new: &[BindMount]) -> Vec<BindMount> {
    let mut merged = old.to_vec();
    for mount in new {
        match merged.iter_mut().find(|m| m.target == mount.target) {
            Some(existing) => *existing = mount.clone(),
            None => merged.push(mount.clone()),
        }
    }
    merged
}

fn merge_maps(
    old: &BTreeMap<String, String>,
    new: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = old.clone();
    merged.extend(new.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

impl Configuration {
    /// Merge `delta` onto `self`, returning the combined value
    pub fn merge(&self, delta: &Configuration) -> Configuration {
        Configuration {
            image: last_non_blank(&self.image, &delta.image),
            exposed_ports: concat_distinct(&self.exposed_ports, &delta.exposed_ports),
            bind_mounts: merge_bind_mounts(&self.bind_mounts, &delta.bind_mounts),
            networks: concat_distinct(&self.networks, &delta.networks),
            labels: merge_maps(&self.labels, &delta.labels),
            environment: merge_maps(&self.environment, &delta.environment),
            wait_strategy: last_non_blank(&self.wait_strategy, &delta.wait_strategy),
            certs_directory: last_non_blank(&self.certs_directory, &delta.certs_directory),
            caddyfile_directory: last_non_blank(
                &self.caddyfile_directory,
                &delta.caddyfile_directory,
            ),
            network_name: last_non_blank(&self.network_name, &delta.network_name),
            dns_names: last_non_blank(&self.dns_names, &delta.dns_names),
            mocks_directory: last_non_blank(&self.mocks_directory, &delta.mocks_directory),
            mock_paths: last_non_blank(&self.mock_paths, &delta.mock_paths),
        }
    }

    /// Check the invariants required before a container may be created
    pub fn validate(&self) -> Result<()> {
        if self.image.as_ref().map_or(true, |i| i.is_blank()) {
            return Err(CitmError::Configuration(
                "an image reference is required".to_string(),
            ));
        }

        if self.certs_directory.as_ref().map_or(true, |d| d.is_blank()) {
            return Err(CitmError::Configuration(
                "certs directory is required, use with_certs_directory()".to_string(),
            ));
        }

        if let Some(paths) = &self.mock_paths {
            for path in paths {
                normalize_mock_path(path)?;
            }
        }

        Ok(())
    }

    pub fn image(&self) -> Option<&str> {
        self.image.as_deref()
    }

    pub fn exposed_ports(&self) -> &[u16] {
        &self.exposed_ports
    }

    pub fn bind_mounts(&self) -> &[BindMount] {
        &self.bind_mounts
    }

    /// The bind mount targeting the given in-container path, if any
    pub fn bind_mount_for(&self, target: &str) -> Option<&BindMount> {
        self.bind_mounts.iter().find(|m| m.target == target)
    }

    pub fn networks(&self) -> &[String] {
        &self.networks
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    pub fn env(&self, key: &str) -> Option<&str> {
        self.environment.get(key).map(String::as_str)
    }

    pub fn wait_strategy(&self) -> Option<WaitStrategy> {
        self.wait_strategy
    }

    pub fn certs_directory(&self) -> Option<&Path> {
        self.certs_directory.as_deref()
    }

    pub fn caddyfile_directory(&self) -> Option<&Path> {
        self.caddyfile_directory.as_deref()
    }

    pub fn network_name(&self) -> Option<&str> {
        self.network_name.as_deref()
    }

    pub fn dns_names(&self) -> Option<&[String]> {
        self.dns_names.as_deref()
    }

    pub fn mocks_directory(&self) -> Option<&Path> {
        self.mocks_directory.as_deref()
    }

    pub fn mock_paths(&self) -> Option<&[String]> {
        self.mock_paths.as_deref()
    }

    /// True when explicit mock paths have been recorded
    pub fn has_mock_paths(&self) -> bool {
        self.mock_paths.as_ref().is_some_and(|p| !p.is_empty())
    }
}

/// Resolve `.` and `..` lexically and anchor the result at `/`.
///
/// The filesystem is never consulted; glob characters are ordinary path characters.
pub fn normalize_lexically(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Normalize a mock glob and require it to live under [`MOCKS_MOUNT`]
pub fn normalize_mock_path(path: &str) -> Result<String> {
    let normalized = normalize_lexically(path.trim());
    if !normalized.starts_with(MOCKS_MOUNT) {
        return Err(CitmError::MockPath {
            path: path.to_string(),
            root: MOCKS_MOUNT,
        });
    }
    Ok(normalized)
}
