//! Error types for the citm sidecar

use std::time::Duration;
use thiserror::Error;

/// Errors produced while configuring, starting or addressing the sidecar
#[derive(Debug, Error)]
pub enum CitmError {
    /// The accumulated configuration is not valid for building a container
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// A mock path does not resolve under the mocks mount point
    #[error("Mock path '{path}' must be under '{root}'")]
    MockPath { path: String, root: &'static str },

    /// The runtime reported no public port for a container port
    #[error("No public port is mapped for container port {0}")]
    PortNotMapped(u16),

    /// Root CA generation failed
    #[error("Certificate generation failed: {0}")]
    Certificate(String),

    /// Settings file could not be parsed or holds invalid values
    #[error("Invalid settings: {0}")]
    Settings(String),

    /// No usable Docker daemon could be reached
    #[error("Cannot connect to Docker: {0}")]
    Connection(String),

    /// Image missing locally or failed to pull
    #[error("Image '{image}' is not available: {reason}")]
    ImageUnavailable { image: String, reason: String },

    /// Error reported by the Docker daemon or client
    #[error(transparent)]
    Docker(#[from] bollard::errors::Error),

    /// Container never reported a healthy status
    #[error("Container '{name}' did not become healthy within {timeout:?}")]
    HealthTimeout { name: String, timeout: Duration },

    /// Container stopped or turned unhealthy during startup
    #[error("Container '{name}' failed during startup: {reason}")]
    ContainerFailed { name: String, reason: String },

    /// HTTP client construction failed
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<rcgen::Error> for CitmError {
    fn from(e: rcgen::Error) -> Self {
        CitmError::Certificate(e.to_string())
    }
}

impl From<toml::de::Error> for CitmError {
    fn from(e: toml::de::Error) -> Self {
        CitmError::Settings(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CitmError>;
