use anyhow::Result;
use serde::Serialize;

use bintag_core::services::host::default_backend_registry;

#[derive(Debug, Serialize)]
pub struct BackendInfo {
    pub name: String,
    pub description: String,
}

pub fn backend_infos() -> Vec<BackendInfo> {
    let registry = default_backend_registry();
    registry
        .names()
        .into_iter()
        .filter_map(|name| {
            registry.get(&name).map(|backend| BackendInfo {
                name: name.clone(),
                description: backend.description().to_string(),
            })
        })
        .collect()
}

/// List the analysis hosts compiled into this binary.
pub fn list_backends_command(json: bool) -> Result<()> {
    let entries = backend_infos();

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("Backends: (none)");
        return Ok(());
    }

    println!("Backends:");
    for entry in entries {
        println!("- {}: {}", entry.name, entry.description);
    }

    Ok(())
}
