//! Reference sets handed to the compiler.

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

/// Core libraries of the host runtime every patch compiles against
pub const BASELINE_LIBRARIES: [&str; 19] = [
    "System.Private.CoreLib.dll",
    "System.Runtime.dll",
    "System.Console.dll",
    "System.Text.RegularExpressions.dll",
    "System.Linq.dll",
    "System.Linq.Expressions.dll",
    "System.IO.dll",
    "System.Net.Primitives.dll",
    "System.Net.Http.dll",
    "System.Private.Uri.dll",
    "System.Reflection.dll",
    "System.ComponentModel.Primitives.dll",
    "System.Globalization.dll",
    "System.Collections.dll",
    "System.Collections.Concurrent.dll",
    "System.Collections.Generic.dll",
    "System.Collections.NonGeneric.dll",
    "netstandard.dll",
    "Microsoft.CSharp.dll",
];

/// An ordered, de-duplicated list of existing library files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceSet {
    paths: Vec<PathBuf>,
}

impl ReferenceSet {
    /// Starts an empty builder
    #[must_use]
    pub fn builder() -> ReferenceSetBuilder {
        ReferenceSetBuilder::default()
    }

    /// Library paths in insertion order
    #[must_use]
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Number of libraries
    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// True if the set holds no library
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// True if `path` is part of the set
    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.paths.iter().any(|p| p == path)
    }
}

/// Collects candidate libraries for a [`ReferenceSet`].
#[derive(Debug, Default)]
pub struct ReferenceSetBuilder {
    candidates: Vec<PathBuf>,
}

impl ReferenceSetBuilder {
    /// Adds the [`BASELINE_LIBRARIES`] found in `runtime_dir`
    #[must_use]
    pub fn runtime_libraries(mut self, runtime_dir: &Path) -> Self {
        self.candidates.extend(
            BASELINE_LIBRARIES
                .iter()
                .map(|library| runtime_dir.join(library)),
        );
        self
    }

    /// Adds explicit references, such as a patch's `@using` lines
    #[must_use]
    pub fn references<I, P>(mut self, references: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.candidates.extend(references.into_iter().map(Into::into));
        self
    }

    /// Adds every `*.dll` in `dir`, sorted by file name.
    ///
    /// An unreadable directory is logged and contributes nothing.
    #[must_use]
    pub fn directory_libraries(mut self, dir: &Path) -> Self {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "Cannot list reference directory");
                return self;
            }
        };

        let mut libraries: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("dll"))
            })
            .collect();
        libraries.sort();

        debug!(path = %dir.display(), count = libraries.len(), "Adding directory references");
        self.candidates.extend(libraries);
        self
    }

    /// Drops duplicates and files that do not exist, keeping first-seen order
    #[must_use]
    pub fn build(self) -> ReferenceSet {
        let mut seen = HashSet::new();
        let mut paths = Vec::with_capacity(self.candidates.len());

        for candidate in self.candidates {
            if !seen.insert(candidate.clone()) {
                continue;
            }
            if !candidate.is_file() {
                warn!(path = %candidate.display(), "Skipping missing reference");
                continue;
            }
            paths.push(candidate);
        }

        ReferenceSet { paths }
    }
}
