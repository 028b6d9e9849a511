//! Metadata sidecar lookup for samples stored in a structured repository.
//!
//! A sample's metadata is the single `.json` file in the nearest ancestor
//! directory that holds any `.json` file at all. The walk never climbs into
//! the filesystem root; the root is only scanned when it is the start
//! directory, which needs a path like `//sample`. A path without any
//! separator (or directly under the root, like `/sample`) starts from the
//! current directory.

use std::env;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR};

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

pub use crate::format::{to_compact_json, PythonCompactFormatter};

/// Upper bound on directories visited by [`find_metadata_dir`].
pub const MAX_WALK_DEPTH: usize = 4096;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("No metadata JSON found in {} or any of its parents", .0.display())]
    NotFound(PathBuf),
    #[error("Expected exactly one JSON file in {}, found {}: {:?}", .dir.display(), .files.len(), .files)]
    Ambiguous { dir: PathBuf, files: Vec<String> },
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse metadata JSON at {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// First ancestor directory holding JSON files, with their names (sorted).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataDir {
    pub dir: PathBuf,
    pub files: Vec<String>,
}

/// Lexically normalize `path` (drop `.`, resolve `..`) without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Directory the upward walk starts from: `path` with its last segment
/// dropped textually, then made absolute.
///
/// A trailing separator leaves an empty last segment, so the path itself is
/// the start. `..` and `.` endings are dropped like any other segment. An
/// empty remainder means the current directory.
pub fn start_dir(path: &Path) -> io::Result<PathBuf> {
    let raw = path.as_os_str().to_string_lossy();
    let parent = match raw.rfind(MAIN_SEPARATOR) {
        Some(idx) => &raw[..idx],
        None => "",
    };
    let cwd = env::current_dir()?;
    if parent.is_empty() {
        return Ok(cwd);
    }
    let parent = Path::new(parent);
    let absolute = if parent.is_absolute() { parent.to_path_buf() } else { cwd.join(parent) };
    Ok(normalize(&absolute))
}

/// Names of regular files (symlinks followed) in `dir` ending in `.json`, sorted.
pub fn json_files(dir: &Path) -> io::Result<Vec<String>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.ends_with(".json") && entry.path().is_file() {
            files.push(name);
        }
    }
    files.sort();
    Ok(files)
}

/// Walk upward from `start` until a directory with JSON files is found.
///
/// Returns `Ok(None)` when the walk reaches the filesystem root first.
pub fn find_metadata_dir(start: &Path) -> Result<Option<MetadataDir>, MetadataError> {
    let mut current = normalize(start);
    for _ in 0..MAX_WALK_DEPTH {
        let files = json_files(&current)
            .map_err(|source| MetadataError::Io { path: current.clone(), source })?;
        if !files.is_empty() {
            debug!(dir = %current.display(), files = ?files, "metadata directory found");
            return Ok(Some(MetadataDir { dir: current, files }));
        }
        match current.parent() {
            Some(parent) if parent.parent().is_some() => current = parent.to_path_buf(),
            _ => return Ok(None),
        }
    }
    Ok(None)
}

/// Locate and parse the metadata JSON for the sample at `path`.
pub fn read_metadata(path: &Path) -> Result<Value, MetadataError> {
    let start =
        start_dir(path).map_err(|source| MetadataError::Io { path: path.to_path_buf(), source })?;
    let found = find_metadata_dir(&start)?.ok_or_else(|| MetadataError::NotFound(start.clone()))?;

    if found.files.len() != 1 {
        return Err(MetadataError::Ambiguous { dir: found.dir, files: found.files });
    }

    let json_path = found.dir.join(&found.files[0]);
    let body = fs::read_to_string(&json_path)
        .map_err(|source| MetadataError::Io { path: json_path.clone(), source })?;
    serde_json::from_str(&body).map_err(|source| MetadataError::Parse { path: json_path, source })
}

/// Third-from-last segment of `path` (the family directory in the usual layout).
pub fn tag_name(path: &str) -> Option<String> {
    let parts: Vec<&str> = path.split(MAIN_SEPARATOR).collect();
    parts.len().checked_sub(3).map(|idx| parts[idx].to_string())
}
