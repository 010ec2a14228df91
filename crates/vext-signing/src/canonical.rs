//! Canonical `{file, SHA256}` list computed identically by signer and verifier.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serde_json::{ser::PrettyFormatter, Serializer, Value};
use sha2::{Digest, Sha256};

use crate::{SigningError, SIGNATURE_FILE_NAME};

const CANONICAL_JSON_INDENT: &[u8] = b"    ";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
/// One file covered by a package signature.
pub struct FileDigest {
    #[serde(rename = "SHA256")]
    pub sha256: String,
    pub file: String,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Walks `root` and hashes every regular file except the root signature document.
pub fn build_canonical_list(root: &Path) -> Result<Vec<FileDigest>, SigningError> {
    let mut entries = Vec::new();
    let mut pending = vec![PathBuf::new()];
    while let Some(relative_dir) = pending.pop() {
        let dir = root.join(&relative_dir);
        let read_dir =
            fs::read_dir(&dir).map_err(|error| SigningError::io("failed to read", &dir, error))?;
        for entry in read_dir {
            let entry = entry.map_err(|error| SigningError::io("failed to inspect", &dir, error))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                return Err(SigningError::UnsupportedEntry {
                    path: entry.path().display().to_string(),
                    reason: "file name is not valid UTF-8".to_string(),
                });
            };
            let relative = relative_dir.join(name);
            let file_type = entry
                .file_type()
                .map_err(|error| SigningError::io("failed to inspect", &entry.path(), error))?;
            if file_type.is_symlink() {
                return Err(SigningError::UnsupportedEntry {
                    path: relative.display().to_string(),
                    reason: "symbolic links cannot be signed".to_string(),
                });
            }
            if file_type.is_dir() {
                pending.push(relative);
                continue;
            }
            if relative_dir.as_os_str().is_empty() && name == SIGNATURE_FILE_NAME {
                continue;
            }
            let path = entry.path();
            let bytes =
                fs::read(&path).map_err(|error| SigningError::io("failed to read", &path, error))?;
            entries.push(FileDigest {
                sha256: sha256_hex(&bytes),
                file: normalize_relative_path(&relative),
            });
        }
    }
    Ok(canonicalize(entries))
}

/// Sorts entries by path so discovery order never affects the serialized bytes.
pub fn canonicalize(mut entries: Vec<FileDigest>) -> Vec<FileDigest> {
    entries.sort_by(|left, right| {
        left.file
            .cmp(&right.file)
            .then_with(|| left.sha256.cmp(&right.sha256))
    });
    entries
}

/// Serializes a file list with sorted object keys and 4-space indentation.
pub fn serialize_canonical_list(entries: &[FileDigest]) -> Result<String, SigningError> {
    let value = serde_json::to_value(entries)
        .map_err(|error| SigningError::Internal(format!("failed to encode file list: {error}")))?;
    to_indented_json(&value)
}

pub(crate) fn to_indented_json(value: &Value) -> Result<String, SigningError> {
    let mut buffer = Vec::new();
    let mut serializer =
        Serializer::with_formatter(&mut buffer, PrettyFormatter::with_indent(CANONICAL_JSON_INDENT));
    value
        .serialize(&mut serializer)
        .map_err(|error| SigningError::Internal(format!("failed to serialize json: {error}")))?;
    String::from_utf8(buffer)
        .map_err(|error| SigningError::Internal(format!("serialized json is not utf-8: {error}")))
}

fn normalize_relative_path(path: &Path) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Names the first difference between a signed list and the on-disk list.
pub(crate) fn describe_list_difference(signed: &[FileDigest], actual: &[FileDigest]) -> String {
    for entry in actual {
        match signed.iter().find(|candidate| candidate.file == entry.file) {
            None => return format!("file '{}' is not covered by the signature", entry.file),
            Some(candidate) if candidate.sha256 != entry.sha256 => {
                return format!("file '{}' changed since signing", entry.file)
            }
            Some(_) => {}
        }
    }
    for entry in signed {
        if !actual.iter().any(|candidate| candidate.file == entry.file) {
            return format!("file '{}' is missing from the package", entry.file);
        }
    }
    "signed file list is not in canonical form".to_string()
}
