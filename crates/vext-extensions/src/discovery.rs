//! Loose extension script discovery.
//!
//! A search specification is a comma-separated list of patterns. Patterns
//! without a path separator are looked up from the start directory (and its
//! ancestors when parent search is on); patterns with a separator search the
//! pattern's own parent directory for its final component.

use std::{
    collections::{HashMap, HashSet},
    fs,
    path::{Path, PathBuf},
};

use vext_runtime::ScriptVersion;

const PATTERN_SEPARATOR: char = ',';

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `DiscoveredScript` used across vext components.
pub struct DiscoveredScript {
    pub path: PathBuf,
    pub version: ScriptVersion,
}

/// Directory listings scanned during one discovery pass.
///
/// Scoped to a single command invocation; listings are never shared across
/// invocations.
#[derive(Debug, Default)]
pub struct DiscoveryState {
    listings: HashMap<PathBuf, Option<Vec<String>>>,
}

impl DiscoveryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn directories_scanned(&self) -> usize {
        self.listings.len()
    }

    /// Sorted (case-insensitive) file names in `dir`, or `None` if unreadable.
    fn listing(&mut self, dir: &Path) -> Option<&[String]> {
        self.listings
            .entry(dir.to_path_buf())
            .or_insert_with(|| scan_directory(dir))
            .as_deref()
    }
}

fn scan_directory(dir: &Path) -> Option<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(error) => {
            tracing::trace!(dir = %dir.display(), error = %error, "skipping unreadable directory");
            return None;
        }
    };
    let mut names = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().map(|kind| kind.is_file()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect::<Vec<_>>();
    names.sort_by(|left, right| {
        left.to_lowercase()
            .cmp(&right.to_lowercase())
            .then_with(|| left.cmp(right))
    });
    Some(names)
}

/// Splits a comma-separated search specification, trimming each element.
pub fn parse_search_patterns(raw: &str) -> Vec<String> {
    raw.split(PATTERN_SEPARATOR)
        .map(str::trim)
        .filter(|pattern| !pattern.is_empty())
        .map(str::to_string)
        .collect()
}

/// Resolves the runtime a loose script needs from its last two dot fields.
///
/// `check.53.lua` needs Lua 5.3; names with fewer than two dots or with
/// unrecognized tags are not loose scripts.
pub fn script_version_from_file_name(file_name: &str) -> Option<ScriptVersion> {
    let mut fields = file_name.rsplitn(3, '.');
    let language_tag = fields.next()?;
    let version_tag = fields.next()?;
    fields.next()?;
    ScriptVersion::from_file_tags(version_tag, language_tag)
}

fn has_separator(pattern: &str) -> bool {
    pattern.contains('/') || pattern.contains('\\')
}

/// Finds loose scripts for every pattern, in pattern order then directory order.
///
/// A relative `start_dir` is resolved against the current directory first so
/// ancestor search reaches the filesystem root. Running discovery again over
/// an unchanged tree yields the same list.
pub fn find_loose_scripts(
    state: &mut DiscoveryState,
    patterns: &[String],
    start_dir: &Path,
    search_parents: bool,
) -> Vec<DiscoveredScript> {
    let start_dir = std::path::absolute(start_dir).unwrap_or_else(|error| {
        tracing::debug!(
            start_dir = %start_dir.display(),
            error = %error,
            "using start directory as given"
        );
        start_dir.to_path_buf()
    });
    let mut found = Vec::new();
    let mut seen = HashSet::new();

    for pattern in patterns {
        let pattern = pattern.trim();
        if pattern.is_empty() || pattern.ends_with('/') || pattern.ends_with('\\') {
            continue;
        }

        let (mut dir, needle, recurse) = if has_separator(pattern) {
            let normalized = pattern.replace('\\', "/");
            let (parent, file) = match normalized.rsplit_once('/') {
                Some(("", file)) => ("/".to_string(), file.to_string()),
                Some((parent, file)) => (parent.to_string(), file.to_string()),
                None => continue,
            };
            (Some(start_dir.join(parent)), file, false)
        } else {
            (Some(start_dir.to_path_buf()), pattern.to_string(), search_parents)
        };

        while let Some(current) = dir {
            if let Some(names) = state.listing(&current) {
                for name in names.iter().filter(|name| name.contains(needle.as_str())) {
                    let Some(version) = script_version_from_file_name(name) else {
                        continue;
                    };
                    let path = current.join(name);
                    if seen.insert(path.clone()) {
                        tracing::debug!(
                            path = %path.display(),
                            version = version.as_str(),
                            "discovered loose extension script"
                        );
                        found.push(DiscoveredScript { path, version });
                    }
                }
            }
            dir = if recurse {
                current.parent().map(Path::to_path_buf)
            } else {
                None
            };
        }
    }
    found
}
