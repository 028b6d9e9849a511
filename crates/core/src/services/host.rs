use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{ArchInfo, FunctionRecord};

#[derive(Debug, Error)]
pub enum HostError {
    #[error("Binary not found at {0}")]
    MissingBinary(PathBuf),
    #[error("Failed to parse binary: {0}")]
    Parse(String),
    #[error("Analysis backend error: {0}")]
    Backend(String),
    #[error("Analysis has not completed; call wait_for_analysis first")]
    AnalysisPending,
    #[error("No function at 0x{0:X}")]
    UnknownFunction(u64),
    #[error("Import module index {index} out of range (module count {count})")]
    NoSuchModule { index: usize, count: usize },
}

/// What to load into a host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadRequest {
    pub binary_path: PathBuf,
    /// Optional architecture hint (e.g., x86, x86_64, arm64) overriding detection.
    pub arch: Option<String>,
    /// Optional per-function instruction budget for backends that disassemble.
    pub max_instructions: Option<usize>,
}

impl LoadRequest {
    pub fn new(binary_path: impl Into<PathBuf>) -> Self {
        Self { binary_path: binary_path.into(), ..Self::default() }
    }
}

/// A binary loaded into an analysis environment.
///
/// Queries other than [`AnalysisHost::wait_for_analysis`] and
/// [`AnalysisHost::arch`] may fail with [`HostError::AnalysisPending`] until
/// the automatic analysis pass has completed.
pub trait AnalysisHost {
    /// Block until the automatic analysis pass has completed.
    fn wait_for_analysis(&mut self) -> Result<(), HostError>;

    fn arch(&self) -> ArchInfo;

    fn import_module_count(&self) -> Result<usize, HostError>;

    /// Imported names of module `index`, lazily, in table order.
    fn import_names(
        &self,
        index: usize,
    ) -> Result<Box<dyn Iterator<Item = String> + '_>, HostError>;

    /// Every discovered function, in host order.
    fn functions(&self) -> Result<Vec<FunctionRecord>, HostError>;

    /// Mnemonics of the instructions belonging to the function at `address`, in item order.
    fn function_mnemonics(&self, address: u64) -> Result<Vec<String>, HostError>;
}

/// Trait implemented by host backends (e.g., Capstone + goblin).
pub trait HostBackend: Send + Sync {
    fn load(&self, request: &LoadRequest) -> Result<Box<dyn AnalysisHost>, HostError>;
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str {
        ""
    }
}

/// Registry for host backends; callers select by name.
#[derive(Default)]
pub struct BackendRegistry {
    backends: HashMap<String, Box<dyn HostBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self { backends: HashMap::new() }
    }

    pub fn register<B: HostBackend + 'static>(&mut self, backend: B) -> &mut Self {
        self.backends.insert(backend.name().to_string(), Box::new(backend));
        self
    }

    pub fn get(&self, name: &str) -> Option<&dyn HostBackend> {
        self.backends.get(name).map(|b| &**b)
    }

    /// Return a sorted list of registered backend names for error messages/help.
    pub fn names(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.backends.keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// Registry populated with every backend compiled into this build.
pub fn default_backend_registry() -> BackendRegistry {
    #[allow(unused_mut)]
    let mut registry = BackendRegistry::new();
    #[cfg(feature = "capstone-backend")]
    {
        registry.register(crate::services::backends::CapstoneBackend);
    }
    registry
}

/// Name of the backend used when neither the CLI nor the config picks one.
pub const DEFAULT_BACKEND: &str = "capstone";
