//! Loading and persisting assemblies.
//!
//! Reading and writing PE images is delegated to a [`ModuleStore`] implementation so the
//! patching engine stays independent of any particular PE reader/writer. The store is shared
//! with the parallel compile phase and therefore has to be `Send + Sync`.

use std::path::{Path, PathBuf};

use crate::{module::CilAssembly, Result};

/// Options controlling how an assembly is opened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// The assembly will be modified and written back
    pub writable: bool,
    /// Directories searched when resolving references to other assemblies
    pub search_paths: Vec<PathBuf>,
}

impl LoadOptions {
    /// Options for an assembly that is only inspected
    #[must_use]
    pub fn read_only() -> Self {
        LoadOptions::default()
    }

    /// Options for an assembly that will be patched, resolving references from `directory`
    #[must_use]
    pub fn writable_in(directory: impl Into<PathBuf>) -> Self {
        LoadOptions {
            writable: true,
            search_paths: vec![directory.into()],
        }
    }
}

/// Loads assemblies into the in-memory model and writes them back.
pub trait ModuleStore: Send + Sync {
    /// Loads the assembly at `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not a .NET assembly.
    fn load(&self, path: &Path, options: &LoadOptions) -> Result<CilAssembly>;

    /// Writes `assembly` to `path`, replacing the file.
    ///
    /// # Errors
    /// Returns an error if the assembly cannot be serialized or the file cannot be written.
    fn write(&self, assembly: &CilAssembly, path: &Path) -> Result<()>;
}
