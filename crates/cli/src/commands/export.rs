use std::path::Path;

use anyhow::{anyhow, Context, Result};
use clap::Args;
use tracing::info;

use bintag_core::config::{load_config, BinTagConfig, BinTagLayout};
use bintag_core::model::ExportRecord;
use bintag_core::services::export::{build_export, write_export};
use bintag_core::services::host::{default_backend_registry, LoadRequest};

/// Host selection flags shared by every command that analyses a binary.
#[derive(Args, Debug, Clone, Default)]
pub struct HostArgs {
    /// Analysis backend (defaults to the config's `default_backend`).
    #[arg(long)]
    pub backend: Option<String>,

    /// Architecture hint overriding detection (e.g., x86, x86_64, arm64).
    #[arg(long)]
    pub arch: Option<String>,

    /// Per-function instruction cap (0 = unlimited).
    #[arg(long)]
    pub max_instructions: Option<usize>,
}

/// Load `binary` into the selected host and collect its export record.
pub fn analyze_binary(
    config: &BinTagConfig,
    binary: &Path,
    host_args: &HostArgs,
) -> Result<ExportRecord> {
    let registry = default_backend_registry();
    let backend_name = host_args.backend.as_deref().unwrap_or(&config.default_backend);
    let backend = registry.get(backend_name).ok_or_else(|| {
        anyhow!(
            "Unknown backend '{}'. Available backends: {}",
            backend_name,
            registry.names().join(", ")
        )
    })?;

    let request = LoadRequest {
        binary_path: binary.to_path_buf(),
        arch: host_args.arch.clone(),
        max_instructions: host_args.max_instructions.or(config.max_instructions_per_function),
    };
    info!(backend = backend.name(), binary = %binary.display(), "loading binary");
    let mut host = backend
        .load(&request)
        .with_context(|| format!("Failed to load {} with backend '{}'", binary.display(), backend_name))?;
    build_export(host.as_mut())
        .with_context(|| format!("Failed to analyse {}", binary.display()))
}

/// Export the mnemonic histograms and imports of `binary` to `output`.
pub fn export_mnemonics_command(
    layout: &BinTagLayout,
    binary: &Path,
    output: &Path,
    host_args: &HostArgs,
) -> Result<()> {
    let config = load_config(layout)?;
    let record = analyze_binary(&config, binary, host_args)?;
    write_export(output, &record)
        .with_context(|| format!("Failed to write export for {}", binary.display()))?;

    println!(
        "Exported {} functions and {} imports to {}",
        record.function_count(),
        record.imports.len(),
        output.display()
    );
    Ok(())
}
