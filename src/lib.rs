//! citm - disposable caddy-in-the-middle sidecar for test suites
//!
//! This library provides what a test fixture needs to run the sidecar:
//! - Generates a throwaway root CA the proxy signs per-host certificates with
//! - Builds an immutable, validated container configuration (mounts, labels, mocks)
//! - Starts the container on Docker and waits for its health check
//! - Resolves HTTP, HTTPS, proxy and admin addresses from the dynamic port mapping
//!
//! ```no_run
//! use citm::{generate_root_ca, CitmBuilder, DockerRuntime, DockerSettings};
//!
//! # async fn run() -> citm::Result<()> {
//! let certs = tempfile::tempdir()?;
//! generate_root_ca(certs.path())?;
//!
//! let runtime = DockerRuntime::connect(&DockerSettings::default()).await?;
//! let citm = CitmBuilder::new()
//!     .with_certs_directory(certs.path())
//!     .build()?
//!     .start(&runtime)
//!     .await?;
//!
//! let client = citm.new_proxy_client(true)?;
//! let url = citm.https_base_url(&["api"])?;
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod builder;
pub mod certs;
pub mod config;
pub mod container;
pub mod docker;
pub mod error;
pub mod settings;

pub use builder::CitmBuilder;
pub use certs::{generate_root_ca, RootCaFiles};
pub use config::Configuration;
pub use container::{CitmContainer, ContainerEndpoint, ContainerRequest, StaticEndpoint};
pub use docker::{DockerInstance, DockerRuntime};
pub use error::{CitmError, Result};
pub use settings::{ContainerSettings, DockerSettings, PullPolicy, Settings};
