use anyhow::Result;
use serde::Serialize;

use bintag_core::config::{init_home, load_config, BinTagConfig, BinTagLayout};

use crate::commands::backend_infos;

#[derive(Serialize)]
pub struct ConfigInfoSnapshot {
    pub home: String,
    pub config_file: String,
    pub config_file_exists: bool,
    pub tags_dir: String,
    pub tag_count: usize,
    pub available_backends: Vec<String>,
    pub config: BinTagConfig,
}

/// Create the home directory layout and a default config.
pub fn init_command(layout: &BinTagLayout) -> Result<()> {
    let wrote = init_home(layout)?;

    println!("Initialized bintag home:");
    println!("  Root: {}", layout.root.display());
    if wrote {
        println!("  Config: {} (written)", layout.config_path.display());
    } else {
        println!("  Config: {} (kept existing)", layout.config_path.display());
    }
    println!("  Tags dir: {}", layout.tags_dir.display());
    Ok(())
}

/// Show resolved paths and effective configuration values.
pub fn config_info_command(layout: &BinTagLayout, json: bool) -> Result<()> {
    let config = load_config(layout)?;
    let tag_count = bintag_core::tags::TagStore::new(&layout.tags_dir).load_tags()?.len();
    let available_backends: Vec<String> = backend_infos().into_iter().map(|b| b.name).collect();

    if json {
        let snapshot = ConfigInfoSnapshot {
            home: layout.root.display().to_string(),
            config_file: layout.config_path.display().to_string(),
            config_file_exists: layout.config_path.is_file(),
            tags_dir: layout.tags_dir.display().to_string(),
            tag_count,
            available_backends,
            config,
        };
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    println!("bintag Config Info");
    println!("==================");
    println!("Home: {}", layout.root.display());
    let state = if layout.config_path.is_file() { "OK" } else { "MISSING, using defaults" };
    println!("Config file: {} ({})", layout.config_path.display(), state);
    println!("Config version: {}", config.config_version);
    println!("Tags dir: {} ({} tags)", layout.tags_dir.display(), tag_count);
    println!("Default backend: {}", config.default_backend);
    println!("Available backends: {}", available_backends.join(", "));
    println!("Max distance: {}", config.max_distance);
    println!("Function count tolerance: {}", config.function_count_tolerance);
    match config.max_instructions_per_function {
        Some(limit) => println!("Max instructions per function: {}", limit),
        None => println!("Max instructions per function: (backend default)"),
    }
    Ok(())
}
