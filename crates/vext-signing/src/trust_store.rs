//! Persistent store of certificates trusted to sign installable packages.

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use vext_core::{is_expired_unix, write_text_atomic};

use crate::{keys::SigningCertificate, SigningError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Public struct `TrustedCertificateRecord` used across vext components.
pub struct TrustedCertificateRecord {
    pub id: String,
    pub public_key: String,
    #[serde(default)]
    pub revoked: bool,
    pub expires_unix: Option<u64>,
    pub rotated_from: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum TrustStoreFileFormat {
    List(Vec<TrustedCertificateRecord>),
    Wrapped {
        certificates: Vec<TrustedCertificateRecord>,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// Public struct `TrustMutationReport` used across vext components.
pub struct TrustMutationReport {
    pub added: usize,
    pub updated: usize,
    pub revoked: usize,
    pub rotated: usize,
}

pub fn load_trust_store(path: &Path) -> Result<Vec<TrustedCertificateRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let parsed = serde_json::from_str::<TrustStoreFileFormat>(&raw)
        .with_context(|| format!("failed to parse trust store {}", path.display()))?;
    Ok(match parsed {
        TrustStoreFileFormat::List(records) => records,
        TrustStoreFileFormat::Wrapped { certificates } => certificates,
    })
}

pub fn save_trust_store(path: &Path, records: &[TrustedCertificateRecord]) -> Result<()> {
    let mut payload = serde_json::to_string_pretty(&TrustStoreFileFormat::Wrapped {
        certificates: records.to_vec(),
    })
    .context("failed to serialize trust store")?;
    payload.push('\n');
    write_text_atomic(path, &payload)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Parses `old_id:certificate_path`.
fn parse_rotation_spec(raw: &str) -> Result<(String, &Path)> {
    let (old_id, certificate_path) = raw.split_once(':').ok_or_else(|| {
        anyhow!("invalid --extension-trust-rotate '{raw}', expected old_id:certificate_path")
    })?;
    let old_id = old_id.trim();
    let certificate_path = certificate_path.trim();
    if old_id.is_empty() || certificate_path.is_empty() {
        bail!("invalid --extension-trust-rotate '{raw}', expected old_id:certificate_path");
    }
    Ok((old_id.to_string(), Path::new(certificate_path)))
}

/// Applies certificate additions, revocations, and rotations in that order.
pub fn apply_trust_store_mutations(
    records: &mut Vec<TrustedCertificateRecord>,
    add_certificates: &[std::path::PathBuf],
    revoke_ids: &[String],
    rotate_specs: &[String],
) -> Result<TrustMutationReport> {
    let mut report = TrustMutationReport::default();

    for path in add_certificates {
        let certificate = SigningCertificate::load(path)
            .with_context(|| format!("failed to add trusted certificate {}", path.display()))?;
        if upsert_certificate(records, &certificate, None) {
            report.added += 1;
        } else {
            report.updated += 1;
        }
    }

    for id in revoke_ids {
        let id = id.trim();
        if id.is_empty() {
            continue;
        }
        let record = records
            .iter_mut()
            .find(|record| record.id == id)
            .ok_or_else(|| anyhow!("cannot revoke unknown certificate id '{}'", id))?;
        if !record.revoked {
            record.revoked = true;
            report.revoked += 1;
        }
    }

    for spec in rotate_specs {
        let (old_id, certificate_path) = parse_rotation_spec(spec)?;
        let certificate = SigningCertificate::load(certificate_path).with_context(|| {
            format!(
                "failed to load rotated certificate {}",
                certificate_path.display()
            )
        })?;
        let old = records
            .iter_mut()
            .find(|record| record.id == old_id)
            .ok_or_else(|| anyhow!("cannot rotate unknown certificate id '{}'", old_id))?;
        old.revoked = true;
        if upsert_certificate(records, &certificate, Some(old_id)) {
            report.added += 1;
        } else {
            report.updated += 1;
        }
        report.rotated += 1;
    }

    Ok(report)
}

/// Returns true when a new record was inserted.
fn upsert_certificate(
    records: &mut Vec<TrustedCertificateRecord>,
    certificate: &SigningCertificate,
    rotated_from: Option<String>,
) -> bool {
    if let Some(existing) = records
        .iter_mut()
        .find(|record| record.id == certificate.id)
    {
        existing.public_key = certificate.public_key.trim().to_string();
        existing.revoked = false;
        existing.expires_unix = certificate.expires_unix;
        existing.rotated_from = rotated_from;
        return false;
    }
    records.push(TrustedCertificateRecord {
        id: certificate.id.clone(),
        public_key: certificate.public_key.trim().to_string(),
        revoked: false,
        expires_unix: certificate.expires_unix,
        rotated_from,
    });
    true
}

/// Resolves the verifying key for `certificate` if the store trusts it at `now_unix`.
pub fn authorize_certificate(
    records: &[TrustedCertificateRecord],
    certificate: &SigningCertificate,
    now_unix: u64,
) -> Result<VerifyingKey, SigningError> {
    let untrusted = |reason: &str| SigningError::UntrustedCertificate {
        id: certificate.id.clone(),
        reason: reason.to_string(),
    };
    let key = certificate.verifying_key()?;
    let public_key = certificate.public_key.trim();
    let matching = records
        .iter()
        .filter(|record| record.public_key.trim() == public_key)
        .collect::<Vec<_>>();
    // A live record for the key wins over revoked or expired ones.
    let Some(record) = matching
        .iter()
        .find(|record| !record.revoked && !is_expired_unix(record.expires_unix, now_unix))
        .or_else(|| matching.first())
    else {
        return Err(untrusted("public key is not present in the trust store"));
    };
    if record.revoked {
        return Err(untrusted(&format!("trust record '{}' is revoked", record.id)));
    }
    if is_expired_unix(record.expires_unix, now_unix) {
        return Err(untrusted(&format!("trust record '{}' is expired", record.id)));
    }
    if is_expired_unix(certificate.expires_unix, now_unix) {
        return Err(untrusted("certificate is expired"));
    }
    Ok(key)
}
