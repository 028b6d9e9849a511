use std::path::Path;

use anyhow::{Context, Result};

use bintag_core::metadata::{read_metadata, to_compact_json};

/// Print the metadata JSON governing the sample at `path`.
pub fn read_metadata_command(path: &Path) -> Result<()> {
    let value = read_metadata(path)
        .with_context(|| format!("Failed to read metadata for {}", path.display()))?;
    println!("{}", to_compact_json(&value)?);
    Ok(())
}
