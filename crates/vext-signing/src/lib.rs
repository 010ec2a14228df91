//! Code-signing trust chain for extension packages.
//!
//! Builds the canonical file-hash list shared by signer and verifier, signs it
//! with an ed25519 key, verifies packages against a certificate, and keeps the
//! trust store of certificates accepted for install.

pub mod canonical;
pub mod keys;
pub mod signature;
pub mod trust_store;

use thiserror::Error;

pub use canonical::{
    build_canonical_list, canonicalize, serialize_canonical_list, sha256_hex, FileDigest,
};
pub use keys::{
    check_key_directory_permissions, decode_base64_fixed, encode_private_key,
    load_signing_material, verify_ed25519_signature, SigningCertificate, SigningMaterial,
};
pub use signature::{
    render_signature_verify_report, sign_package_dir, verify_package_dir, verify_package_with,
    SignatureDocument, SignatureVerifyReport,
};
pub use trust_store::{
    apply_trust_store_mutations, authorize_certificate, load_trust_store, save_trust_store,
    TrustMutationReport, TrustedCertificateRecord,
};

/// Signature document written at the package root.
pub const SIGNATURE_FILE_NAME: &str = ".p4-signatures.json";
/// Signer certificate copied into signed packages.
pub const PACKAGE_CERTIFICATE_FILE_NAME: &str = ".p4-certificate.txt";
/// Private key file expected inside a signing key directory.
pub const PRIVATE_KEY_FILE_NAME: &str = "privatekey.txt";
/// Certificate file expected inside a signing key directory.
pub const CERTIFICATE_FILE_NAME: &str = "certificate.txt";

/// Failure while building, signing, or verifying a package signature.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SigningError {
    #[error("invalid signature file {path}: {reason}")]
    InvalidSignatureFile { path: String, reason: String },
    #[error("package contents do not match the signed file list: {detail}")]
    ManifestMismatch { detail: String },
    #[error("signature verification failed: {reason}")]
    SignatureInvalid { reason: String },
    #[error("missing signing material {path}")]
    MissingKeyMaterial { path: String },
    #[error("key directory {path} must have permissions 0700 or 0500 (found {mode:04o})")]
    InsecureKeyDirectory { path: String, mode: u32 },
    #[error("invalid key material {path}: {reason}")]
    InvalidKeyMaterial { path: String, reason: String },
    #[error("certificate '{id}' is not trusted: {reason}")]
    UntrustedCertificate { id: String, reason: String },
    #[error("unsupported package entry {path}: {reason}")]
    UnsupportedEntry { path: String, reason: String },
    #[error("{action} {path}: {message}")]
    Io {
        action: &'static str,
        path: String,
        message: String,
    },
    #[error("internal signing error: {0}")]
    Internal(String),
}

impl SigningError {
    /// Error taxonomy bucket used for operator-facing reports.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Io { .. } | Self::UnsupportedEntry { .. } => "input",
            Self::Internal(_) => "internal",
            _ => "trust",
        }
    }

    pub(crate) fn io(action: &'static str, path: &std::path::Path, error: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.display().to_string(),
            message: error.to_string(),
        }
    }
}
