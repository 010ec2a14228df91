//! Signature document creation and verification.

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signer as _, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use vext_core::write_text_atomic;

use crate::{
    canonical::{
        build_canonical_list, describe_list_difference, serialize_canonical_list,
        to_indented_json, FileDigest,
    },
    keys::{verify_ed25519_signature, SigningCertificate},
    SigningError, SIGNATURE_FILE_NAME,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Contents of `.p4-signatures.json`.
pub struct SignatureDocument {
    pub filelist: Vec<FileDigest>,
    pub signature: String,
}

impl SignatureDocument {
    pub fn to_json(&self) -> Result<String, SigningError> {
        let value = serde_json::to_value(self).map_err(|error| {
            SigningError::Internal(format!("failed to encode signature document: {error}"))
        })?;
        let mut rendered = to_indented_json(&value)?;
        rendered.push('\n');
        Ok(rendered)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `SignatureVerifyReport` used across vext components.
pub struct SignatureVerifyReport {
    pub package_root: PathBuf,
    pub files: usize,
    pub certificate_id: String,
    pub fingerprint: String,
}

/// Signs the canonical list of `root` and writes the signature document into it.
pub fn sign_package_dir(
    root: &Path,
    signing_key: &SigningKey,
) -> Result<SignatureDocument, SigningError> {
    let filelist = build_canonical_list(root)?;
    let serialized = serialize_canonical_list(&filelist)?;
    let signature = BASE64.encode(signing_key.sign(serialized.as_bytes()).to_bytes());
    let document = SignatureDocument {
        filelist,
        signature,
    };

    let path = root.join(SIGNATURE_FILE_NAME);
    write_text_atomic(&path, &document.to_json()?).map_err(|error| SigningError::Io {
        action: "failed to write signature file",
        path: path.display().to_string(),
        message: format!("{error:#}"),
    })?;
    tracing::info!(
        package = %root.display(),
        files = document.filelist.len(),
        "signed extension package"
    );
    Ok(document)
}

/// Verifies `root` against the public key carried by `certificate`.
pub fn verify_package_dir(
    root: &Path,
    certificate: &SigningCertificate,
) -> Result<SignatureVerifyReport, SigningError> {
    let key = certificate.verifying_key()?;
    let files = verify_package_with(root, &key)?;
    Ok(SignatureVerifyReport {
        package_root: root.to_path_buf(),
        files,
        certificate_id: certificate.id.clone(),
        fingerprint: certificate.fingerprint(),
    })
}

/// Compares the embedded file list against the disk first, then checks the signature.
///
/// Returns the number of files covered by the signature.
pub fn verify_package_with(root: &Path, key: &VerifyingKey) -> Result<usize, SigningError> {
    let path = root.join(SIGNATURE_FILE_NAME);
    let invalid = |reason: &str| SigningError::InvalidSignatureFile {
        path: path.display().to_string(),
        reason: reason.to_string(),
    };
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == ErrorKind::NotFound => {
            return Err(invalid("signature file is missing"))
        }
        Err(error) => return Err(SigningError::io("failed to read", &path, error)),
    };
    let document = serde_json::from_str::<Value>(&raw)
        .map_err(|error| invalid(&format!("not valid json: {error}")))?;
    let Some(object) = document.as_object() else {
        return Err(invalid("not an object"));
    };
    let signature = object
        .get("signature")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("missing 'signature' string"))?;
    let filelist = object
        .get("filelist")
        .filter(|value| value.is_array())
        .ok_or_else(|| invalid("missing 'filelist' array"))?;

    let signed_serialized = to_indented_json(filelist)?;
    let actual = build_canonical_list(root)?;
    let actual_serialized = serialize_canonical_list(&actual)?;
    if signed_serialized != actual_serialized {
        let signed = serde_json::from_value::<Vec<FileDigest>>(filelist.clone()).unwrap_or_default();
        let detail = describe_list_difference(&signed, &actual);
        tracing::warn!(package = %root.display(), detail = %detail, "signed file list mismatch");
        return Err(SigningError::ManifestMismatch { detail });
    }

    verify_ed25519_signature(actual_serialized.as_bytes(), signature, key)?;
    tracing::debug!(package = %root.display(), files = actual.len(), "verified package signature");
    Ok(actual.len())
}

pub fn render_signature_verify_report(report: &SignatureVerifyReport) -> String {
    format!(
        "extension verify: package={} status=verified files={} certificate={} fingerprint={}",
        report.package_root.display(),
        report.files,
        report.certificate_id,
        report.fingerprint
    )
}
