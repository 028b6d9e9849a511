//! Mnemonic/import export: drive an [`AnalysisHost`] and serialize what it reports.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use thiserror::Error;
use tracing::{debug, info};

use crate::analysis::histogram_map;
use crate::format::escape_non_ascii;
use crate::model::{BinaryHistogram, ExportRecord, FunctionRecord};
use crate::services::host::{AnalysisHost, HostError};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Host(#[from] HostError),
    #[error("Failed to serialize export: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Failed to write export to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Flatten the imported names of every module, in module then table order.
///
/// Duplicates are kept.
pub fn collect_imports(host: &dyn AnalysisHost) -> Result<Vec<String>, HostError> {
    let mut imports = Vec::new();
    for index in 0..host.import_module_count()? {
        imports.extend(host.import_names(index)?);
    }
    Ok(imports)
}

pub fn collect_functions(host: &dyn AnalysisHost) -> Result<Vec<FunctionRecord>, HostError> {
    host.functions()
}

/// Histogram per function name; a later function with the same name replaces an earlier one.
pub fn collect_histograms(
    host: &dyn AnalysisHost,
    functions: &[FunctionRecord],
) -> Result<BinaryHistogram, HostError> {
    let mut histogram = BinaryHistogram::new();
    for function in functions {
        let mnemonics = host.function_mnemonics(function.address)?;
        debug!(
            function = %function.name,
            address = function.address,
            instructions = mnemonics.len(),
            "collected mnemonics"
        );
        histogram.insert(function.name.clone(), histogram_map(mnemonics));
    }
    Ok(histogram)
}

/// Run the full export against `host`: wait for analysis, then gather arch, imports and histograms.
pub fn build_export(host: &mut dyn AnalysisHost) -> Result<ExportRecord, HostError> {
    host.wait_for_analysis()?;

    let arch = host.arch();
    let imports = collect_imports(&*host)?;
    let functions = collect_functions(&*host)?;
    let histogram = collect_histograms(&*host, &functions)?;

    info!(
        functions = functions.len(),
        imports = imports.len(),
        is_32bit = arch.is_32bit,
        is_64bit = arch.is_64bit,
        "export collected"
    );
    Ok(ExportRecord { arch, histogram, imports })
}

/// Pretty JSON with sorted keys, 4-space indent, ASCII-only strings and a
/// trailing newline.
pub fn to_export_json(record: &ExportRecord) -> Result<String, serde_json::Error> {
    let mut buf = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    record.serialize(&mut ser)?;
    buf.push(b'\n');
    // serde_json only ever emits UTF-8.
    Ok(escape_non_ascii(&String::from_utf8_lossy(&buf)))
}

/// Write `record` to `path`, replacing any existing file.
pub fn write_export(path: &Path, record: &ExportRecord) -> Result<(), ExportError> {
    let body = to_export_json(record)?;
    fs::write(path, body)
        .map_err(|source| ExportError::Io { path: path.to_path_buf(), source })?;
    info!(path = %path.display(), "export written");
    Ok(())
}

/// [`build_export`] followed by [`write_export`].
pub fn export_to_file(
    host: &mut dyn AnalysisHost,
    path: &Path,
) -> Result<ExportRecord, ExportError> {
    let record = build_export(host)?;
    write_export(path, &record)?;
    Ok(record)
}
