//! Validated extension package: extracted tree, manifest, translations.

use std::{
    fs,
    path::{Path, PathBuf},
};

use vext_signing::SIGNATURE_FILE_NAME;

use crate::{
    archive::{extract_archive, ArchiveDir},
    manifest::{parse_extension_manifest, ExtensionManifest, MANIFEST_FILE_NAME},
    name::ExtensionIdentity,
    translation::{load_translations, Translations},
    PackageError,
};

#[derive(Debug)]
/// Public struct `ExtensionPackage` used across vext components.
pub struct ExtensionPackage {
    archive: ArchiveDir,
    pub manifest: ExtensionManifest,
    pub translations: Translations,
    pub identity: ExtensionIdentity,
}

impl ExtensionPackage {
    /// Extracts `archive_path` next to `destination_root` and validates it.
    pub fn open(
        archive_path: &Path,
        destination_root: &Path,
        revision: u32,
    ) -> Result<Self, PackageError> {
        let archive = extract_archive(archive_path, destination_root)?;
        Self::load(archive, revision)
    }

    /// Validates an already-unpacked package directory in place.
    pub fn from_dir(dir: &Path, revision: u32) -> Result<Self, PackageError> {
        if !dir.is_dir() {
            return Err(PackageError::InvalidSource {
                path: dir.display().to_string(),
                reason: "not a directory".to_string(),
            });
        }
        Self::load(ArchiveDir::existing(dir), revision)
    }

    fn load(archive: ArchiveDir, revision: u32) -> Result<Self, PackageError> {
        let root = archive.path();
        let manifest_path = root.join(MANIFEST_FILE_NAME);
        if !manifest_path.is_file() {
            return Err(PackageError::MissingFile {
                file: MANIFEST_FILE_NAME,
                path: root.display().to_string(),
            });
        }
        let raw = fs::read_to_string(&manifest_path)
            .map_err(|error| PackageError::io("failed to read", &manifest_path, error))?;
        let manifest = parse_extension_manifest(&raw)?;

        let main_file = manifest.runtime.main_file_name();
        if !root.join(main_file).is_file() {
            return Err(PackageError::MissingFile {
                file: main_file,
                path: root.display().to_string(),
            });
        }
        let translations = load_translations(root, &manifest.supported_locales)?;
        let identity = ExtensionIdentity::new(&manifest.namespace, &manifest.name, revision)?;
        tracing::debug!(
            extension = %identity,
            key = %manifest.key,
            root = %root.display(),
            "loaded extension package"
        );
        Ok(Self {
            archive,
            manifest,
            translations,
            identity,
        })
    }

    pub fn root(&self) -> &Path {
        self.archive.path()
    }

    pub fn script_path(&self) -> PathBuf {
        self.root().join(self.manifest.runtime.main_file_name())
    }

    pub fn is_signed(&self) -> bool {
        self.root().join(SIGNATURE_FILE_NAME).is_file()
    }

    pub fn check_compatibility(&self, host_product: &str) -> Result<(), PackageError> {
        self.manifest.check_product_compatibility(host_product)
    }

    pub(crate) fn into_archive(self) -> ArchiveDir {
        self.archive
    }
}

pub fn render_inspect_report(package: &ExtensionPackage) -> String {
    let manifest = &package.manifest;
    format!(
        "extension inspect: name={} key={} version={} api_version={} runtime={} products={} locales={} translated_locales={} signed={}",
        package.identity.full_name(),
        manifest.key,
        manifest.version,
        manifest.api_version,
        manifest.runtime.as_str(),
        manifest
            .compatible_products
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(","),
        manifest.supported_locales.join(","),
        package.translations.locales().count(),
        package.is_signed()
    )
}
