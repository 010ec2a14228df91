//! Builds `<dir>.p4-extension` archives, optionally signing the tree first.

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use vext_core::write_text_atomic;
use vext_signing::{
    build_canonical_list, load_signing_material, sign_package_dir,
    PACKAGE_CERTIFICATE_FILE_NAME, SIGNATURE_FILE_NAME,
};
use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

use crate::{manifest::MANIFEST_FILE_NAME, PackageError};

pub const EXTENSION_ARCHIVE_SUFFIX: &str = ".p4-extension";

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `PackReport` used across vext components.
pub struct PackReport {
    pub source: PathBuf,
    pub archive: PathBuf,
    pub files: usize,
    pub signed_by: Option<String>,
}

fn invalid_source(path: &str, reason: impl Into<String>) -> PackageError {
    PackageError::InvalidSource {
        path: path.to_string(),
        reason: reason.into(),
    }
}

/// Packs `source` into `<source>.p4-extension`.
///
/// With `sign_dir`, the signer certificate is copied into the tree and the
/// signature file is written before the archive is built.
pub fn pack_extension(source: &Path, sign_dir: Option<&Path>) -> Result<PackReport, PackageError> {
    let raw = source.to_string_lossy();
    if matches!(raw.as_ref(), "" | "." | "/" | "\\") {
        return Err(invalid_source(&raw, "refusing to pack this directory"));
    }
    let trimmed = raw.trim_end_matches(['/', '\\']);
    if trimmed.is_empty() {
        return Err(invalid_source(&raw, "refusing to pack this directory"));
    }
    let source = PathBuf::from(trimmed);
    if !source.is_dir() {
        return Err(invalid_source(trimmed, "not a directory"));
    }
    let archive = PathBuf::from(format!("{trimmed}{EXTENSION_ARCHIVE_SUFFIX}"));
    if archive.exists() {
        return Err(invalid_source(
            trimmed,
            format!("{} already exists", archive.display()),
        ));
    }
    if !source.join(MANIFEST_FILE_NAME).is_file() {
        return Err(PackageError::MissingFile {
            file: MANIFEST_FILE_NAME,
            path: source.display().to_string(),
        });
    }

    let signed_by = match sign_dir {
        Some(sign_dir) => {
            let material = load_signing_material(sign_dir)?;
            let certificate_copy = source.join(PACKAGE_CERTIFICATE_FILE_NAME);
            write_text_atomic(&certificate_copy, &material.certificate.to_json()?).map_err(
                |error| PackageError::Io {
                    action: "failed to write",
                    path: certificate_copy.display().to_string(),
                    message: format!("{error:#}"),
                },
            )?;
            sign_package_dir(&source, &material.signing_key)?;
            Some(material.certificate.id)
        }
        None => None,
    };

    let mut files = build_canonical_list(&source)?
        .into_iter()
        .map(|entry| entry.file)
        .collect::<Vec<_>>();
    if source.join(SIGNATURE_FILE_NAME).is_file() {
        files.push(SIGNATURE_FILE_NAME.to_string());
    }

    if let Err(error) = write_archive(&source, &archive, &files) {
        let _ = fs::remove_file(&archive);
        return Err(error);
    }
    tracing::info!(
        source = %source.display(),
        archive = %archive.display(),
        files = files.len(),
        signed = signed_by.is_some(),
        "packed extension"
    );
    Ok(PackReport {
        source,
        archive,
        files: files.len(),
        signed_by,
    })
}

fn write_archive(source: &Path, archive: &Path, files: &[String]) -> Result<(), PackageError> {
    let zip_error = |error: zip::result::ZipError| PackageError::Archive {
        path: archive.display().to_string(),
        message: error.to_string(),
    };
    let output = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(archive)
        .map_err(|error| PackageError::io("failed to create", archive, error))?;
    let mut zip = ZipWriter::new(output);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);
    for name in files {
        let path = source.join(name);
        let bytes =
            fs::read(&path).map_err(|error| PackageError::io("failed to read", &path, error))?;
        zip.start_file(name.as_str(), options).map_err(zip_error)?;
        zip.write_all(&bytes)
            .map_err(|error| PackageError::io("failed to write", archive, error))?;
    }
    zip.finish().map_err(zip_error)?;
    Ok(())
}

pub fn render_pack_report(report: &PackReport) -> String {
    format!(
        "extension package: source={} archive={} files={} signed_by={}",
        report.source.display(),
        report.archive.display(),
        report.files,
        report.signed_by.as_deref().unwrap_or("none")
    )
}
