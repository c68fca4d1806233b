//! Throwaway root certificate authority for the sidecar
//!
//! The proxy mints a leaf certificate per virtual host at runtime and signs it
//! with the root CA mounted at `/certs`. Test clients trust that root (or skip
//! verification) to talk HTTPS to the synthetic subdomains.
//!
//! # Security Considerations
//!
//! The private key is written unencrypted. Point the output at a temporary
//! directory owned by the test fixture and delete it afterwards.

use crate::error::{CitmError, Result};
use rand::RngCore;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    KeyUsagePurpose, SerialNumber, PKCS_RSA_SHA256,
};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::{debug, info};

/// Common name of the generated root
pub const ROOT_CA_COMMON_NAME: &str = "CITM Root CA";

/// Certificate, PEM encoded
pub const ROOT_CA_CERT_PEM: &str = "rootCA.pem";
/// Private key, PKCS#8 PEM encoded
pub const ROOT_CA_KEY_PEM: &str = "rootCA-key.pem";
/// Certificate, DER encoded
pub const ROOT_CA_CERT_DER: &str = "rootCA.cer";

/// RSA modulus length of the root key
pub const ROOT_CA_KEY_BITS: usize = 4096;

/// Paths of the files written by [`generate_root_ca`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootCaFiles {
    pub cert_pem: PathBuf,
    pub key_pem: PathBuf,
    pub cert_der: PathBuf,
}

impl RootCaFiles {
    pub fn in_dir(output_dir: &Path) -> Self {
        Self {
            cert_pem: output_dir.join(ROOT_CA_CERT_PEM),
            key_pem: output_dir.join(ROOT_CA_KEY_PEM),
            cert_der: output_dir.join(ROOT_CA_CERT_DER),
        }
    }
}

/// Generate a fresh self-signed root CA into `output_dir`.
///
/// Writes `rootCA.pem`, `rootCA-key.pem` and `rootCA.cer`, replacing any earlier
/// output. Every call creates a new RSA-4096 key pair. The certificate is valid
/// from now until the same instant one year later (UTC).
pub fn generate_root_ca(output_dir: impl AsRef<Path>) -> Result<RootCaFiles> {
    let output_dir = output_dir.as_ref();
    std::fs::create_dir_all(output_dir)?;

    debug!(bits = ROOT_CA_KEY_BITS, "Generating root CA key pair");
    let key_pair = generate_rsa_key_pair()?;

    let now = OffsetDateTime::now_utc();
    let now = now.replace_nanosecond(0).unwrap_or(now);
    let params = root_ca_params(now);
    let not_after = params.not_after;
    let cert = params.self_signed(&key_pair)?;

    let files = RootCaFiles::in_dir(output_dir);
    std::fs::write(&files.cert_pem, cert.pem())?;
    std::fs::write(&files.key_pem, key_pair.serialize_pem())?;
    std::fs::write(&files.cert_der, cert.der())?;

    info!(
        dir = %output_dir.display(),
        %not_after,
        "Generated root CA"
    );

    Ok(files)
}

fn generate_rsa_key_pair() -> Result<KeyPair> {
    let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), ROOT_CA_KEY_BITS)
        .map_err(|e| CitmError::Certificate(format!("RSA key generation failed: {}", e)))?;

    let pkcs8 = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| CitmError::Certificate(format!("PKCS#8 encoding failed: {}", e)))?;

    Ok(KeyPair::from_pem_and_sign_algo(&pkcs8, &PKCS_RSA_SHA256)?)
}

fn root_ca_params(now: OffsetDateTime) -> CertificateParams {
    let mut params = CertificateParams::default();

    params.distinguished_name = DistinguishedName::new();
    params
        .distinguished_name
        .push(DnType::CommonName, ROOT_CA_COMMON_NAME);

    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
    ];

    params.serial_number = Some(SerialNumber::from_slice(&random_serial()));
    params.not_before = now;
    params.not_after = one_year_after(now);
    params
}

/// 128-bit positive serial
fn random_serial() -> [u8; 16] {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes[0] &= 0x7f;
    bytes
}

/// Same instant one calendar year later; Feb 29 falls back to Feb 28
fn one_year_after(at: OffsetDateTime) -> OffsetDateTime {
    let year = at.year() + 1;
    at.replace_year(year).unwrap_or_else(|_| {
        at.replace_day(28)
            .and_then(|d| d.replace_year(year))
            .unwrap_or(at + time::Duration::days(365))
    })
}
