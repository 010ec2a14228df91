//! Archive extraction into a temp directory collocated with the install root.

use std::{
    fs::{self, File},
    io::Read,
    path::{Path, PathBuf},
};

use tempfile::TempDir;
use zip::ZipArchive;

use crate::{manifest::MANIFEST_FILE_NAME, translation::LOCALES_DIR, PackageError};

const EXTRACT_DIR_PREFIX: &str = ".vext-extract-";
const SCRIPT_MAIN_PREFIX: &str = "main.";

/// Unpacked package tree; removed on drop unless it was extracted and then installed.
#[derive(Debug)]
pub struct ArchiveDir {
    root: PathBuf,
    temp: Option<TempDir>,
}

impl ArchiveDir {
    /// Wraps an already-unpacked directory. It is never deleted.
    pub fn existing(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            temp: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn is_temporary(&self) -> bool {
        self.temp.is_some()
    }

    /// Stops the auto-delete once the extracted tree has been moved into place.
    pub(crate) fn disarm(mut self) {
        if let Some(temp) = self.temp.take() {
            let _ = temp.keep();
        }
    }
}

/// Validates an archive entry name and returns it with `/` separators.
pub fn validate_entry_name(raw: &str) -> Result<String, PackageError> {
    let invalid = |reason: &str| PackageError::InvalidEntryName {
        name: raw.to_string(),
        reason: reason.to_string(),
    };
    if raw.is_empty() {
        return Err(invalid("empty name"));
    }
    if let Some(bad) = raw
        .chars()
        .find(|ch| !(ch.is_ascii_alphanumeric() || matches!(ch, '-' | '.' | '_' | '/' | '\\')))
    {
        return Err(invalid(&format!("illegal character {bad:?}")));
    }
    let normalized = raw.replace('\\', "/");
    if normalized.starts_with('/') {
        return Err(invalid("absolute path"));
    }
    if normalized.contains("..") {
        return Err(invalid("parent directory reference"));
    }
    Ok(normalized)
}

/// Entries that must be well-formed UTF-8: the script entry point, the
/// manifest, and anything under the locales directory.
pub fn is_restricted_text_entry(name: &str) -> bool {
    let name = name.trim_start_matches("./");
    (name.starts_with(SCRIPT_MAIN_PREFIX) && !name.contains('/'))
        || name == MANIFEST_FILE_NAME
        || name.starts_with(LOCALES_DIR)
}

fn archive_error(path: &Path, error: impl std::fmt::Display) -> PackageError {
    PackageError::Archive {
        path: path.display().to_string(),
        message: error.to_string(),
    }
}

/// Extracts `archive_path` into a fresh temp directory inside `destination_root`.
///
/// An invalid entry name aborts immediately. Restricted entries that are not
/// UTF-8 are collected and reported once the whole archive has been written.
pub fn extract_archive(
    archive_path: &Path,
    destination_root: &Path,
) -> Result<ArchiveDir, PackageError> {
    fs::create_dir_all(destination_root).map_err(|error| {
        PackageError::io("failed to create install root", destination_root, error)
    })?;
    let temp = tempfile::Builder::new()
        .prefix(EXTRACT_DIR_PREFIX)
        .tempdir_in(destination_root)
        .map_err(|error| {
            PackageError::io("failed to create extraction dir in", destination_root, error)
        })?;

    let file = File::open(archive_path)
        .map_err(|error| PackageError::io("failed to open archive", archive_path, error))?;
    let mut archive = ZipArchive::new(file).map_err(|error| archive_error(archive_path, error))?;
    tracing::debug!(
        archive = %archive_path.display(),
        entries = archive.len(),
        target = %temp.path().display(),
        "extracting extension archive"
    );

    let mut invalid_text = Vec::new();
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|error| archive_error(archive_path, error))?;
        let name = match validate_entry_name(entry.name()) {
            Ok(name) => name,
            Err(error) => {
                tracing::warn!(
                    archive = %archive_path.display(),
                    entry = %entry.name(),
                    "rejected archive entry"
                );
                return Err(error);
            }
        };
        let target = temp.path().join(&name);
        if entry.is_dir() || name.ends_with('/') {
            fs::create_dir_all(&target)
                .map_err(|error| PackageError::io("failed to create", &target, error))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|error| PackageError::io("failed to create", parent, error))?;
        }

        let mut bytes = Vec::new();
        entry
            .read_to_end(&mut bytes)
            .map_err(|error| archive_error(archive_path, format!("{name}: {error}")))?;
        if is_restricted_text_entry(&name) && std::str::from_utf8(&bytes).is_err() {
            invalid_text.push(name.clone());
        }
        fs::write(&target, &bytes)
            .map_err(|error| PackageError::io("failed to write", &target, error))?;
        set_read_only(&target)?;
    }

    if !invalid_text.is_empty() {
        tracing::warn!(
            archive = %archive_path.display(),
            files = %invalid_text.join(","),
            "archive contains invalid text entries"
        );
        return Err(PackageError::InvalidTextEncoding {
            files: invalid_text,
        });
    }

    Ok(ArchiveDir {
        root: temp.path().to_path_buf(),
        temp: Some(temp),
    })
}

fn set_read_only(path: &Path) -> Result<(), PackageError> {
    let mut permissions = fs::metadata(path)
        .map_err(|error| PackageError::io("failed to stat", path, error))?
        .permissions();
    permissions.set_readonly(true);
    fs::set_permissions(path, permissions)
        .map_err(|error| PackageError::io("failed to set permissions on", path, error))
}
