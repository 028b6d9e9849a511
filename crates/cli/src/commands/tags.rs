use std::path::Path;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use bintag_core::analysis::similarity::{match_tags, TagMatch};
use bintag_core::config::{load_config, BinTagLayout};
use bintag_core::model::{ArchInfo, Tag};
use bintag_core::tags::TagStore;

use crate::commands::{analyze_binary, HostArgs};
use crate::{canonicalize_or_current, infer_tag_name, sha256_file};

#[derive(Debug, Serialize)]
pub struct TagSummary {
    pub tag: String,
    pub description: String,
    pub arch: ArchInfo,
    pub functions: usize,
    pub imports: usize,
    pub created_at: Option<String>,
    pub sha256: Option<String>,
}

impl From<&Tag> for TagSummary {
    fn from(tag: &Tag) -> Self {
        Self {
            tag: tag.tag.clone(),
            description: tag.description.clone(),
            arch: tag.arch,
            functions: tag.histogram.len(),
            imports: tag.imports.len(),
            created_at: tag.created_at.clone(),
            sha256: tag.sha256.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MatchReport {
    pub binary: String,
    pub tags_checked: usize,
    pub matches: Vec<TagMatch>,
}

/// Analyse `binary` and store its export as a named tag.
pub fn add_tag_command(
    layout: &BinTagLayout,
    binary: &Path,
    name: Option<String>,
    description: Option<String>,
    force: bool,
    host_args: &HostArgs,
) -> Result<()> {
    let config = load_config(layout)?;
    let abs_path = canonicalize_or_current(binary)?;
    let tag_name = name.unwrap_or_else(|| infer_tag_name(&abs_path));

    let record = analyze_binary(&config, binary, host_args)?;
    let sha256 = sha256_file(binary)?;
    let tag = Tag::from_export(tag_name, description.unwrap_or_default(), record)
        .with_created_at(Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)))
        .with_sha256(Some(sha256));

    let store = TagStore::new(&layout.tags_dir);
    let path = store
        .save_tag(&tag, force)
        .with_context(|| format!("Failed to save tag '{}'", tag.tag))?;

    println!("Added tag: {}", tag.tag);
    println!("  Functions: {}", tag.histogram.len());
    println!("  Imports: {}", tag.imports.len());
    println!("  File: {}", path.display());
    Ok(())
}

/// List stored tags.
pub fn list_tags_command(layout: &BinTagLayout, json: bool) -> Result<()> {
    let store = TagStore::new(&layout.tags_dir);
    let tags = store.load_tags()?;
    let summaries: Vec<TagSummary> = tags.iter().map(TagSummary::from).collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    if summaries.is_empty() {
        println!("No tags found in {}.", layout.tags_dir.display());
        return Ok(());
    }

    println!("Tags:");
    for summary in summaries {
        let desc = summary.description.lines().next().unwrap_or("(no description)");
        println!(
            "- {} [functions: {}, imports: {}] -- {}",
            summary.tag, summary.functions, summary.imports, desc
        );
    }
    Ok(())
}

/// Score `binary` against every stored tag and print the close ones.
pub fn match_command(
    layout: &BinTagLayout,
    binary: &Path,
    host_args: &HostArgs,
    json: bool,
) -> Result<()> {
    let config = load_config(layout)?;
    let tags = TagStore::new(&layout.tags_dir).load_tags()?;
    let record = analyze_binary(&config, binary, host_args)?;
    let matches = match_tags(&record, &tags, &config.match_options());

    if json {
        let report = MatchReport {
            binary: binary.display().to_string(),
            tags_checked: tags.len(),
            matches,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if matches.is_empty() {
        println!("No matching tags ({} checked).", tags.len());
        return Ok(());
    }

    for m in matches {
        println!("{} ({:.6})", m.tag, m.distance);
        if m.imports_match {
            println!("* imports match");
        }
        for line in m.description.lines() {
            println!("{}", line);
        }
        println!();
    }
    Ok(())
}
