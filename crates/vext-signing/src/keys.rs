//! Signing key material and ed25519 helpers.

use std::{
    fs,
    path::{Path, PathBuf},
};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::{canonical::sha256_hex, SigningError, CERTIFICATE_FILE_NAME, PRIVATE_KEY_FILE_NAME};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Public half of a signing identity, distributed as `certificate.txt`.
pub struct SigningCertificate {
    pub id: String,
    #[serde(default)]
    pub subject: String,
    pub public_key: String,
    #[serde(default)]
    pub expires_unix: Option<u64>,
}

impl SigningCertificate {
    pub fn for_key(id: &str, subject: &str, key: &VerifyingKey) -> Self {
        Self {
            id: id.to_string(),
            subject: subject.to_string(),
            public_key: BASE64.encode(key.as_bytes()),
            expires_unix: None,
        }
    }

    pub fn load(path: &Path) -> Result<Self, SigningError> {
        let raw = fs::read_to_string(path)
            .map_err(|error| SigningError::io("failed to read certificate", path, error))?;
        Self::parse(path, &raw)
    }

    pub fn parse(path: &Path, raw: &str) -> Result<Self, SigningError> {
        let certificate = serde_json::from_str::<Self>(raw).map_err(|error| {
            SigningError::InvalidKeyMaterial {
                path: path.display().to_string(),
                reason: format!("certificate is not valid json: {error}"),
            }
        })?;
        if certificate.id.trim().is_empty() {
            return Err(SigningError::InvalidKeyMaterial {
                path: path.display().to_string(),
                reason: "certificate 'id' must not be empty".to_string(),
            });
        }
        certificate.verifying_key()?;
        Ok(certificate)
    }

    pub fn verifying_key(&self) -> Result<VerifyingKey, SigningError> {
        let bytes = decode_base64_fixed::<32>("certificate public key", self.public_key.trim())
            .map_err(|reason| SigningError::InvalidKeyMaterial {
                path: self.id.clone(),
                reason,
            })?;
        VerifyingKey::from_bytes(&bytes).map_err(|error| SigningError::InvalidKeyMaterial {
            path: self.id.clone(),
            reason: format!("invalid certificate public key: {error}"),
        })
    }

    /// SHA-256 of the raw public key bytes, used in reports.
    pub fn fingerprint(&self) -> String {
        match BASE64.decode(self.public_key.trim()) {
            Ok(bytes) => sha256_hex(&bytes),
            Err(_) => sha256_hex(self.public_key.trim().as_bytes()),
        }
    }

    pub fn to_json(&self) -> Result<String, SigningError> {
        let mut rendered = serde_json::to_string_pretty(self).map_err(|error| {
            SigningError::Internal(format!("failed to serialize certificate: {error}"))
        })?;
        rendered.push('\n');
        Ok(rendered)
    }
}

/// Private key plus certificate loaded from a key directory.
pub struct SigningMaterial {
    pub signing_key: SigningKey,
    pub certificate: SigningCertificate,
    pub certificate_path: PathBuf,
}

/// Loads `privatekey.txt` and `certificate.txt` after checking the directory is locked down.
pub fn load_signing_material(key_dir: &Path) -> Result<SigningMaterial, SigningError> {
    let private_key_path = key_dir.join(PRIVATE_KEY_FILE_NAME);
    let certificate_path = key_dir.join(CERTIFICATE_FILE_NAME);
    for path in [&private_key_path, &certificate_path] {
        if !path.is_file() {
            return Err(SigningError::MissingKeyMaterial {
                path: path.display().to_string(),
            });
        }
    }
    check_key_directory_permissions(key_dir)?;

    let raw_private_key = fs::read_to_string(&private_key_path)
        .map_err(|error| SigningError::io("failed to read private key", &private_key_path, error))?;
    let seed = decode_base64_fixed::<32>("private key", raw_private_key.trim()).map_err(
        |reason| SigningError::InvalidKeyMaterial {
            path: private_key_path.display().to_string(),
            reason,
        },
    )?;
    let signing_key = SigningKey::from_bytes(&seed);

    let certificate = SigningCertificate::load(&certificate_path)?;
    if certificate.verifying_key()? != signing_key.verifying_key() {
        return Err(SigningError::InvalidKeyMaterial {
            path: private_key_path.display().to_string(),
            reason: format!(
                "private key does not match certificate '{}'",
                certificate.id
            ),
        });
    }

    tracing::debug!(
        key_dir = %key_dir.display(),
        certificate_id = %certificate.id,
        "loaded signing material"
    );
    Ok(SigningMaterial {
        signing_key,
        certificate,
        certificate_path,
    })
}

/// Requires owner-only `0700` or `0500` on the key directory.
#[cfg(unix)]
pub fn check_key_directory_permissions(key_dir: &Path) -> Result<(), SigningError> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = fs::metadata(key_dir)
        .map_err(|error| SigningError::io("failed to inspect key directory", key_dir, error))?;
    let mode = metadata.permissions().mode() & 0o777;
    if mode != 0o700 && mode != 0o500 {
        return Err(SigningError::InsecureKeyDirectory {
            path: key_dir.display().to_string(),
            mode,
        });
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn check_key_directory_permissions(key_dir: &Path) -> Result<(), SigningError> {
    fs::metadata(key_dir)
        .map_err(|error| SigningError::io("failed to inspect key directory", key_dir, error))?;
    Ok(())
}

pub fn encode_private_key(key: &SigningKey) -> String {
    BASE64.encode(key.to_bytes())
}

pub fn verify_ed25519_signature(
    message: &[u8],
    signature_base64: &str,
    key: &VerifyingKey,
) -> Result<(), SigningError> {
    let signature_bytes = decode_base64_fixed::<64>("signature", signature_base64.trim())
        .map_err(|reason| SigningError::SignatureInvalid { reason })?;
    let signature = Signature::from_bytes(&signature_bytes);
    key.verify_strict(message, &signature)
        .map_err(|error| SigningError::SignatureInvalid {
            reason: format!("invalid ed25519 signature: {error}"),
        })
}

pub fn decode_base64_fixed<const N: usize>(label: &str, raw: &str) -> Result<[u8; N], String> {
    let decoded = BASE64
        .decode(raw)
        .map_err(|error| format!("failed to decode {label} as base64: {error}"))?;
    let length = decoded.len();
    decoded
        .try_into()
        .map_err(|_| format!("{label} must decode to {N} bytes, got {length}"))
}
