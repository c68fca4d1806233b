//! citm-certs - generate the root CA the citm sidecar mounts at /certs
//!
//! Usage:
//!   citm-certs [OUTPUT_DIR]      Write rootCA.pem, rootCA-key.pem and rootCA.cer
//!                                (default: ./certs)

use anyhow::Context;
use citm::generate_root_ca;
use std::path::PathBuf;
use tracing::info;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("citm=debug".parse().expect("valid log directive")),
        )
        .init();

    let output_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("certs"));

    let files = generate_root_ca(&output_dir)
        .with_context(|| format!("Failed to generate root CA in '{}'", output_dir.display()))?;

    info!(path = %files.cert_pem.display(), "Wrote certificate (PEM)");
    info!(path = %files.key_pem.display(), "Wrote private key (PKCS#8 PEM)");
    info!(path = %files.cert_der.display(), "Wrote certificate (DER)");

    Ok(())
}
