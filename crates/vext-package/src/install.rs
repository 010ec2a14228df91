//! Installs validated packages into `<root>/<key>/<revision>-arch`.

use std::{
    fs,
    path::{Path, PathBuf},
};

use vext_signing::{
    authorize_certificate, verify_package_with, SigningCertificate, TrustedCertificateRecord,
    PACKAGE_CERTIFICATE_FILE_NAME, SIGNATURE_FILE_NAME,
};

use crate::{name::ExtensionIdentity, package::ExtensionPackage, PackageError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// How signatures are treated before install.
pub enum SignaturePolicy {
    #[default]
    Skip,
    VerifyIfSigned,
    RequireSigned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureStatus {
    NotChecked,
    Unsigned,
    Verified {
        certificate_id: String,
        files: usize,
    },
}

impl SignatureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotChecked => "not_checked",
            Self::Unsigned => "unsigned",
            Self::Verified { .. } => "verified",
        }
    }
}

#[derive(Debug, Clone, Default)]
/// Public struct `InstallOptions` used across vext components.
pub struct InstallOptions {
    pub root: PathBuf,
    pub host_product: Option<String>,
    pub policy: SignaturePolicy,
    pub trust_records: Vec<TrustedCertificateRecord>,
    pub now_unix: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `InstallReport` used across vext components.
pub struct InstallReport {
    pub identity: ExtensionIdentity,
    pub key: String,
    pub arch_dir: PathBuf,
    pub data_dir: PathBuf,
    pub signature: SignatureStatus,
}

/// Applies `policy` to the package tree at `root`.
///
/// Signed packages are verified against their embedded certificate, which
/// must itself be trusted by `trust_records` at `now_unix`.
pub fn verify_package_for_install(
    root: &Path,
    policy: SignaturePolicy,
    trust_records: &[TrustedCertificateRecord],
    now_unix: u64,
) -> Result<SignatureStatus, PackageError> {
    if policy == SignaturePolicy::Skip {
        return Ok(SignatureStatus::NotChecked);
    }
    if !root.join(SIGNATURE_FILE_NAME).is_file() {
        if policy == SignaturePolicy::RequireSigned {
            return Err(PackageError::UnsignedPackage {
                path: root.display().to_string(),
            });
        }
        return Ok(SignatureStatus::Unsigned);
    }

    let certificate_path = root.join(PACKAGE_CERTIFICATE_FILE_NAME);
    if !certificate_path.is_file() {
        return Err(PackageError::MissingFile {
            file: PACKAGE_CERTIFICATE_FILE_NAME,
            path: root.display().to_string(),
        });
    }
    let certificate = SigningCertificate::load(&certificate_path)?;
    let key = authorize_certificate(trust_records, &certificate, now_unix)?;
    let files = verify_package_with(root, &key)?;
    Ok(SignatureStatus::Verified {
        certificate_id: certificate.id,
        files,
    })
}

pub fn install_package(
    package: ExtensionPackage,
    options: &InstallOptions,
) -> Result<InstallReport, PackageError> {
    if let Some(product) = options.host_product.as_deref() {
        package.check_compatibility(product)?;
    }
    let signature = verify_package_for_install(
        package.root(),
        options.policy,
        &options.trust_records,
        options.now_unix,
    )?;

    let identity = package.identity.clone();
    let key = package.manifest.key.clone();
    let key_dir = options.root.join(&key);
    fs::create_dir_all(&key_dir)
        .map_err(|error| PackageError::io("failed to create", &key_dir, error))?;
    let arch_dir = key_dir.join(format!("{}-arch", identity.revision));
    let data_dir = key_dir.join(format!("{}-data", identity.revision));
    if arch_dir.exists() {
        return Err(PackageError::AlreadyInstalled {
            path: arch_dir.display().to_string(),
        });
    }

    let archive = package.into_archive();
    if archive.is_temporary() {
        fs::rename(archive.path(), &arch_dir)
            .map_err(|error| PackageError::io("failed to move package to", &arch_dir, error))?;
    } else {
        copy_tree(archive.path(), &arch_dir)?;
    }
    if let Err(error) = fs::create_dir_all(&data_dir) {
        let _ = fs::remove_dir_all(&arch_dir);
        return Err(PackageError::io("failed to create", &data_dir, error));
    }
    archive.disarm();

    tracing::info!(
        extension = %identity,
        arch = %arch_dir.display(),
        signature = signature.as_str(),
        "installed extension"
    );
    Ok(InstallReport {
        identity,
        key,
        arch_dir,
        data_dir,
        signature,
    })
}

fn copy_tree(source: &Path, target: &Path) -> Result<(), PackageError> {
    fs::create_dir(target).map_err(|error| PackageError::io("failed to create", target, error))?;
    let entries =
        fs::read_dir(source).map_err(|error| PackageError::io("failed to read", source, error))?;
    for entry in entries {
        let entry = entry.map_err(|error| PackageError::io("failed to read", source, error))?;
        let path = entry.path();
        let destination = target.join(entry.file_name());
        let file_type = entry
            .file_type()
            .map_err(|error| PackageError::io("failed to stat", &path, error))?;
        if file_type.is_dir() {
            copy_tree(&path, &destination)?;
        } else if file_type.is_file() {
            fs::copy(&path, &destination)
                .map_err(|error| PackageError::io("failed to copy", &path, error))?;
        }
    }
    Ok(())
}

pub fn render_install_report(report: &InstallReport) -> String {
    let certificate = match &report.signature {
        SignatureStatus::Verified { certificate_id, .. } => certificate_id.as_str(),
        _ => "none",
    };
    format!(
        "extension install: extension={} key={} arch={} data={} signature={} certificate={}",
        report.identity,
        report.key,
        report.arch_dir.display(),
        report.data_dir.display(),
        report.signature.as_str(),
        certificate
    )
}
