//! Core data model shared by the exporter, the tag store and the matcher.
//!
//! Every record here is serde-friendly; field declaration order is kept
//! alphabetical where the JSON output must have sorted keys.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Mnemonic -> occurrence count for a single function.
pub type MnemonicHistogram = BTreeMap<String, u64>;

/// Function name -> mnemonic histogram for a whole binary.
pub type BinaryHistogram = BTreeMap<String, MnemonicHistogram>;

/// Address width flags as reported by the analysis host.
///
/// The two flags are sourced independently and are not mutually exclusive:
/// a 64-bit image reports both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchInfo {
    pub is_32bit: bool,
    pub is_64bit: bool,
}

impl ArchInfo {
    pub fn new(is_32bit: bool, is_64bit: bool) -> Self {
        Self { is_32bit, is_64bit }
    }
}

/// A function discovered by the analysis host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionRecord {
    pub address: u64,
    pub name: String,
}

impl FunctionRecord {
    pub fn new(address: u64, name: impl Into<String>) -> Self {
        Self { address, name: name.into() }
    }
}

/// Summary written by `export-mnemonics`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRecord {
    pub arch: ArchInfo,
    pub histogram: BinaryHistogram,
    pub imports: Vec<String>,
}

impl ExportRecord {
    /// Number of functions with a histogram entry.
    pub fn function_count(&self) -> usize {
        self.histogram.len()
    }
}

/// A named, described export of a known sample, used as a match reference.
///
/// Fields are declared in key order so tag files come out with sorted keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub arch: ArchInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    pub description: String,
    pub histogram: BinaryHistogram,
    pub imports: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    pub tag: String,
}

impl Tag {
    /// Build a tag from an export of the sample it describes.
    pub fn from_export(
        name: impl Into<String>,
        description: impl Into<String>,
        export: ExportRecord,
    ) -> Self {
        Self {
            tag: name.into(),
            description: description.into(),
            arch: export.arch,
            imports: export.imports,
            histogram: export.histogram,
            created_at: None,
            sha256: None,
        }
    }

    pub fn with_created_at(mut self, created_at: Option<String>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_sha256(mut self, sha256: Option<String>) -> Self {
        self.sha256 = sha256;
        self
    }
}
