pub mod commands;
pub mod logging;

use std::env;
use std::fs;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

/// Canonicalize `path` if possible, falling back to joining it onto the
/// current working directory (e.g., when it does not exist yet).
pub fn canonicalize_or_current(path: &Path) -> Result<PathBuf> {
    match path.canonicalize() {
        Ok(p) => Ok(p),
        Err(_) if path.is_absolute() => Ok(path.to_path_buf()),
        Err(_) => {
            let cwd = env::current_dir().context("Failed to get current directory")?;
            Ok(cwd.join(path))
        }
    }
}

/// Default tag name for a sample: its family directory (third-from-last path
/// segment of the absolute path), else the file name, else `unnamed-tag`.
pub fn infer_tag_name(binary: &Path) -> String {
    bintag_core::metadata::tag_name(&binary.to_string_lossy())
        .filter(|name| !name.is_empty())
        .or_else(|| binary.file_name().and_then(|os_str| os_str.to_str()).map(str::to_string))
        .unwrap_or_else(|| "unnamed-tag".to_string())
}

/// Compute the SHA-256 hash of a file and return it as a hex string.
pub fn sha256_file(path: &Path) -> Result<String> {
    let file = fs::File::open(path)
        .with_context(|| format!("Failed to open binary for hashing: {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];

    loop {
        let n = reader
            .read(&mut buf)
            .with_context(|| format!("Failed to read binary for hashing: {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    let digest = hasher.finalize();
    Ok(format!("{:x}", digest))
}
