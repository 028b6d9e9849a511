//! On-disk tag store: one JSON file per tag under the home's `tags/` directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::Tag;

#[derive(Debug, Error)]
pub enum TagError {
    #[error("Invalid tag name '{0}'")]
    InvalidName(String),
    #[error("Tag '{name}' already exists at {}; use --force to replace it", .path.display())]
    AlreadyExists { name: String, path: PathBuf },
    #[error("{} exists but is not a regular file", .0.display())]
    NotAFile(PathBuf),
    #[error("Failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to serialize tag: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Tag names become file names and must stay inside the tag directory.
fn validate_name(name: &str) -> Result<(), TagError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(TagError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct TagStore {
    tags_dir: PathBuf,
}

impl TagStore {
    pub fn new(tags_dir: impl Into<PathBuf>) -> Self {
        Self { tags_dir: tags_dir.into() }
    }

    pub fn tags_dir(&self) -> &Path {
        &self.tags_dir
    }

    pub fn tag_path(&self, name: &str) -> Result<PathBuf, TagError> {
        validate_name(name)?;
        Ok(self.tags_dir.join(name))
    }

    /// Load every readable tag with a non-empty histogram, sorted by name.
    ///
    /// Unparsable files are skipped with a warning; a missing directory yields no tags.
    pub fn load_tags(&self) -> Result<Vec<Tag>, TagError> {
        if !self.tags_dir.is_dir() {
            warn!(dir = %self.tags_dir.display(), "tag directory does not exist");
            return Ok(Vec::new());
        }
        info!(dir = %self.tags_dir.display(), "reading tags");

        let entries = fs::read_dir(&self.tags_dir)
            .map_err(|source| TagError::Io { path: self.tags_dir.clone(), source })?;
        let mut tags = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|source| TagError::Io { path: self.tags_dir.clone(), source })?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let tag = match fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|body| serde_json::from_str::<Tag>(&body).map_err(|e| e.to_string()))
            {
                Ok(tag) => tag,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "could not load tag");
                    continue;
                }
            };
            if tag.histogram.is_empty() {
                debug!(path = %path.display(), "skipping tag with empty histogram");
                continue;
            }
            debug!(tag = %tag.tag, functions = tag.histogram.len(), "loaded tag");
            tags.push(tag);
        }
        tags.sort_by(|a, b| a.tag.cmp(&b.tag));
        Ok(tags)
    }

    /// Write `tag` to its file, creating directories as needed.
    ///
    /// An existing tag is only replaced when `overwrite` is set.
    pub fn save_tag(&self, tag: &Tag, overwrite: bool) -> Result<PathBuf, TagError> {
        let path = self.tag_path(&tag.tag)?;
        fs::create_dir_all(&self.tags_dir)
            .map_err(|source| TagError::Io { path: self.tags_dir.clone(), source })?;

        if path.is_file() {
            if !overwrite {
                return Err(TagError::AlreadyExists { name: tag.tag.clone(), path });
            }
        } else if path.exists() {
            return Err(TagError::NotAFile(path));
        }

        let body = serde_json::to_string(tag)? + "\n";
        fs::write(&path, body).map_err(|source| TagError::Io { path: path.clone(), source })?;
        info!(tag = %tag.tag, path = %path.display(), "tag written");
        Ok(path)
    }
}
