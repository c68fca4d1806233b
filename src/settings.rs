use crate::builder::CitmBuilder;
use crate::docker::HOST_OVERRIDE_ENV;
use crate::error::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings file for running the sidecar outside of code-only setups
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    /// Docker connection and startup behaviour
    #[serde(default)]
    pub docker: DockerSettings,

    /// Sidecar configuration replayed through [`CitmBuilder`]
    #[serde(default)]
    pub container: ContainerSettings,
}

/// When to pull the sidecar image
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum PullPolicy {
    /// Always pull, even if the image exists locally
    Always,
    /// Pull only when the image is missing locally
    #[default]
    IfNotPresent,
    /// Never pull; fail if the image is missing
    Never,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DockerSettings {
    /// Docker endpoint (`unix:///path` or `tcp://host:port`); falls back to DOCKER_HOST
    pub host: Option<String>,

    /// Hostname reported for published ports instead of the one derived from the endpoint
    pub host_override: Option<String>,

    #[serde(default)]
    pub pull_policy: PullPolicy,

    /// Time allowed for the container to report healthy (default: 120)
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,

    /// Interval between health polls (default: 250)
    #[serde(default = "default_health_poll_interval")]
    pub health_poll_interval_ms: u64,

    /// Grace period when stopping the container (default: 10)
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            host: None,
            host_override: None,
            pull_policy: PullPolicy::default(),
            startup_timeout_secs: default_startup_timeout(),
            health_poll_interval_ms: default_health_poll_interval(),
            stop_timeout_secs: default_stop_timeout(),
        }
    }
}

fn default_startup_timeout() -> u64 {
    120
}

fn default_health_poll_interval() -> u64 {
    250
}

fn default_stop_timeout() -> u64 {
    10
}

impl DockerSettings {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn health_poll_interval(&self) -> Duration {
        Duration::from_millis(self.health_poll_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

/// Container section of the settings file; every field maps to a builder call
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct ContainerSettings {
    pub image: Option<String>,
    pub certs_directory: Option<PathBuf>,
    pub caddyfile_directory: Option<PathBuf>,
    pub network: Option<String>,
    #[serde(default)]
    pub dns_names: Vec<String>,
    pub mocks_directory: Option<PathBuf>,
    #[serde(default)]
    pub mock_paths: Vec<String>,
}

impl ContainerSettings {
    /// Replay these settings onto `builder` in declaration order
    pub fn apply(&self, builder: CitmBuilder) -> Result<CitmBuilder> {
        let mut builder = builder;

        if let Some(ref image) = self.image {
            builder = builder.with_image(image.as_str());
        }
        if let Some(ref dir) = self.certs_directory {
            builder = builder.with_certs_directory(dir);
        }
        if let Some(ref dir) = self.caddyfile_directory {
            builder = builder.with_caddyfile_directory(dir);
        }
        if let Some(ref network) = self.network {
            builder = builder.with_network(network.as_str());
        }
        if !self.dns_names.is_empty() {
            builder = builder.with_dns_names(self.dns_names.iter().cloned());
        }
        if let Some(ref dir) = self.mocks_directory {
            builder = builder.with_mocks_directory(dir);
        }
        if !self.mock_paths.is_empty() {
            builder = builder.with_mock_paths(&self.mock_paths)?;
        }

        Ok(builder)
    }
}

impl Settings {
    /// Load settings from a TOML file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut settings = Self::from_toml(&content)?;
        settings.apply_overrides(|key| std::env::var(key).ok());
        Ok(settings)
    }

    /// Default settings with environment overrides applied
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        settings.apply_overrides(|key| std::env::var(key).ok());
        settings
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `CITM_IMAGE` and `TESTCONTAINERS_HOST_OVERRIDE` from `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_blank = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(image) = non_blank("CITM_IMAGE") {
            self.container.image = Some(image);
        }
        if let Some(host) = non_blank(HOST_OVERRIDE_ENV) {
            self.docker.host_override = Some(host);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MOCK_PATHS_ENV;
    use std::collections::HashMap;

    #[test]
    fn test_parse_settings() {
        let toml = r#"
[docker]
host = "unix:///var/run/docker.sock"
pull_policy = "always"
startup_timeout_secs = 30

[container]
image = "fardjad/citm:1.2.3"
certs_directory = "/tmp/certs"
network = "test-net"
dns_names = ["api.test", "web.test"]
mocks_directory = "/tmp/mocks"
mock_paths = ["/citm-mocks/api/*.mako"]
"#;

        let settings = Settings::from_toml(toml).unwrap();
        assert_eq!(settings.docker.host.as_deref(), Some("unix:///var/run/docker.sock"));
        assert_eq!(settings.docker.pull_policy, PullPolicy::Always);
        assert_eq!(settings.docker.startup_timeout(), Duration::from_secs(30));
        assert_eq!(settings.docker.health_poll_interval(), Duration::from_millis(250));
        assert_eq!(settings.container.dns_names.len(), 2);
    }

    #[test]
    fn test_empty_settings() {
        let settings = Settings::from_toml("").unwrap();
        assert!(settings.docker.host.is_none());
        assert_eq!(settings.docker.pull_policy, PullPolicy::IfNotPresent);
        assert_eq!(settings.docker.startup_timeout_secs, 120);
        assert_eq!(settings.docker.stop_timeout(), Duration::from_secs(10));
        assert_eq!(settings.container, ContainerSettings::default());
    }

    #[test]
    fn test_invalid_pull_policy() {
        let toml = r#"
[docker]
pull_policy = "sometimes"
"#;
        assert!(Settings::from_toml(toml).is_err());
    }

    #[test]
    fn test_apply_container_settings() {
        let toml = r#"
[container]
certs_directory = "/tmp/certs"
network = "test-net"
dns_names = ["api.test", "web.test"]
mocks_directory = "/tmp/mocks"
mock_paths = ["/citm-mocks/api/*.mako"]
"#;
        let settings = Settings::from_toml(toml).unwrap();
        let builder = CitmBuilder::from_settings(&settings.container).unwrap();
        let config = builder.configuration();

        assert_eq!(config.certs_directory(), Some(Path::new("/tmp/certs")));
        assert_eq!(config.label("citm_network"), Some("test-net"));
        assert_eq!(config.label("citm_dns_names"), Some("api.test,web.test"));
        assert_eq!(config.env(MOCK_PATHS_ENV), Some("/citm-mocks/api/*.mako"));
        assert!(builder.build().is_ok());
    }

    #[test]
    fn test_apply_rejects_bad_mock_paths() {
        let settings = ContainerSettings {
            mock_paths: vec!["/etc/*.mako".to_string()],
            ..Default::default()
        };
        assert!(CitmBuilder::from_settings(&settings).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("CITM_IMAGE", "registry.local/citm:dev"),
            ("TESTCONTAINERS_HOST_OVERRIDE", "docker.internal"),
        ]);

        let mut settings = Settings::default();
        settings.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(settings.container.image.as_deref(), Some("registry.local/citm:dev"));
        assert_eq!(settings.docker.host_override.as_deref(), Some("docker.internal"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("citm.toml");
        std::fs::write(
            &path,
            r#"
[docker]
pull_policy = "never"
stop_timeout_secs = 3

[container]
certs_directory = "/tmp/certs"
dns_names = ["api.test"]
"#,
        )
        .unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.docker.pull_policy, PullPolicy::Never);
        assert_eq!(settings.docker.stop_timeout(), Duration::from_secs(3));
        assert_eq!(settings.container.certs_directory, Some(PathBuf::from("/tmp/certs")));
        assert_eq!(settings.container.dns_names, vec!["api.test".to_string()]);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Settings::load(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, crate::error::CitmError::Io(_)));
    }

    #[test]
    fn test_from_env_reads_overrides() {
        std::env::set_var("CITM_IMAGE", "registry.local/citm:from-env");
        let settings = Settings::from_env();
        std::env::remove_var("CITM_IMAGE");

        assert_eq!(
            settings.container.image.as_deref(),
            Some("registry.local/citm:from-env")
        );
        assert_eq!(settings.docker.startup_timeout_secs, 120);
    }

    #[test]
    fn test_blank_env_overrides_are_ignored() {
        let mut settings = Settings::default();
        settings.container.image = Some("fardjad/citm:1.0.0".to_string());
        settings.apply_overrides(|_| Some("  ".to_string()));

        assert_eq!(settings.container.image.as_deref(), Some("fardjad/citm:1.0.0"));
        assert!(settings.docker.host_override.is_none());
    }
}
