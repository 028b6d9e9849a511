use std::path::PathBuf;

use anyhow::Result;
use bintag::commands::*;
use bintag::logging::init_tracing;
use bintag_core::config::BinTagLayout;
use clap::{Parser, Subcommand};

/// Mnemonic-histogram export, sample metadata lookup and tag matching.
///
/// This CLI is a thin wrapper around `bintag-core` (`bintag_core` in code).
#[derive(Parser, Debug)]
#[command(
    name = "bintag",
    version,
    about = "Mnemonic histogram export and tagging of binaries",
    long_about = None
)]
struct Cli {
    /// bintag home directory (defaults to $BINTAG_HOME, else $HOME/.bintag).
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace). `RUST_LOG` takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write per-function mnemonic histograms and imports of a binary to a JSON file.
    ExportMnemonics {
        /// Binary to analyse.
        binary: PathBuf,

        /// Output JSON path (overwritten if present).
        output: PathBuf,

        #[command(flatten)]
        host: HostArgs,
    },

    /// Print the metadata JSON found by walking upward from a sample path.
    ReadMetadata {
        /// Sample path inside the repository; it need not exist.
        path: PathBuf,
    },

    /// Analyse a binary and store it as a named tag.
    AddTag {
        /// Binary to analyse.
        binary: PathBuf,

        /// Tag name. Defaults to the sample's family directory, else its file name.
        #[arg(long)]
        name: Option<String>,

        /// Free-form description (may span several lines).
        #[arg(long)]
        description: Option<String>,

        /// Replace an existing tag with the same name.
        #[arg(long, default_value_t = false)]
        force: bool,

        #[command(flatten)]
        host: HostArgs,
    },

    /// List stored tags.
    ListTags {
        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Score a binary against every stored tag.
    Match {
        /// Binary to analyse.
        binary: PathBuf,

        #[command(flatten)]
        host: HostArgs,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// List analysis backends compiled into this binary.
    ListBackends {
        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Create the home directory, the tag directory and a default config.
    Init,

    /// Show resolved paths and effective configuration.
    ConfigInfo {
        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let layout = BinTagLayout::resolve(cli.home.as_deref());

    match cli.command {
        Command::ExportMnemonics { binary, output, host } => {
            export_mnemonics_command(&layout, &binary, &output, &host)?
        }
        Command::ReadMetadata { path } => read_metadata_command(&path)?,
        Command::AddTag { binary, name, description, force, host } => {
            add_tag_command(&layout, &binary, name, description, force, &host)?
        }
        Command::ListTags { json } => list_tags_command(&layout, json)?,
        Command::Match { binary, host, json } => match_command(&layout, &binary, &host, json)?,
        Command::ListBackends { json } => list_backends_command(json)?,
        Command::Init => init_command(&layout)?,
        Command::ConfigInfo { json } => config_info_command(&layout, json)?,
    }

    Ok(())
}
