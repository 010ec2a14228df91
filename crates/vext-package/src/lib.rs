//! Extension package handling.
//!
//! Extracts `.p4-extension` archives into a private temp directory, validates
//! the manifest, identity tokens and translations, checks host compatibility,
//! installs into the keyed layout, and packs (optionally signed) archives.

pub mod archive;
pub mod commands;
pub mod install;
pub mod manifest;
pub mod name;
pub mod pack;
pub mod package;
pub mod translation;

use std::path::Path;

use thiserror::Error;
use vext_signing::SigningError;

pub use archive::{extract_archive, is_restricted_text_entry, validate_entry_name, ArchiveDir};
pub use commands::{
    execute_extension_inspect_command, execute_extension_install_command,
    execute_extension_package_command, execute_extension_trust_command,
    execute_extension_verify_command,
};
pub use install::{
    install_package, render_install_report, verify_package_for_install, InstallOptions,
    InstallReport, SignaturePolicy, SignatureStatus,
};
pub use manifest::{
    parse_extension_manifest, DeveloperInfo, ExtensionManifest, KNOWN_API_VERSIONS,
    LEGACY_API_VERSION, LEGACY_COMPATIBLE_PRODUCT, LEGACY_NAMESPACE, MANIFEST_FILE_NAME,
};
pub use name::{parse_extension_name, ExtensionIdentity, ExtensionNameKind};
pub use pack::{pack_extension, render_pack_report, PackReport, EXTENSION_ARCHIVE_SUFFIX};
pub use package::{render_inspect_report, ExtensionPackage};
pub use translation::{
    load_translations, validate_placeholders, TranslationMessage, Translations, LOCALES_DIR,
};

/// Failure while reading, validating, installing, or packing an extension package.
#[derive(Debug, Error)]
pub enum PackageError {
    #[error("invalid extension {kind} '{value}'")]
    InvalidName { kind: &'static str, value: String },
    #[error("failed to parse manifest: {reason}")]
    ManifestParse { reason: String },
    #[error("manifest key not found: '{key}'")]
    ManifestKeyNotFound { key: String },
    #[error("manifest key '{key}' is not a valid UUID: {reason}")]
    InvalidKey { key: String, reason: String },
    #[error("unsupported script runtime '{language}' '{version}'")]
    UnsupportedRuntime { language: String, version: String },
    #[error("unsupported extension API version {0}")]
    UnsupportedApiVersion(i64),
    #[error("extension is incompatible with '{product}', supports '{supported}'")]
    IncompatibleProduct { product: String, supported: String },
    #[error("invalid archive entry '{name}': {reason}")]
    InvalidEntryName { name: String, reason: String },
    #[error("archive entries are not valid UTF-8 text: {}", files.join(", "))]
    InvalidTextEncoding { files: Vec<String> },
    #[error("invalid archive {path}: {message}")]
    Archive { path: String, message: String },
    #[error("translation error in locale '{locale}': {detail}")]
    Translation { locale: String, detail: String },
    #[error("missing {file} in {path}")]
    MissingFile { file: &'static str, path: String },
    #[error("extension is already installed at {path}")]
    AlreadyInstalled { path: String },
    #[error("invalid package source '{path}': {reason}")]
    InvalidSource { path: String, reason: String },
    #[error("package {path} is not signed and unsigned packages are not allowed")]
    UnsignedPackage { path: String },
    #[error(transparent)]
    Signing(#[from] SigningError),
    #[error("{action} {path}: {message}")]
    Io {
        action: &'static str,
        path: String,
        message: String,
    },
    #[error("internal package error: {0}")]
    Internal(String),
}

impl PackageError {
    /// Error taxonomy bucket used for operator-facing reports.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Signing(error) => error.category(),
            Self::UnsignedPackage { .. } => "trust",
            Self::Internal(_) => "internal",
            _ => "input",
        }
    }

    pub(crate) fn io(action: &'static str, path: &Path, error: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.display().to_string(),
            message: error.to_string(),
        }
    }
}
