//! The immutable description of one patch.

use std::path::{Path, PathBuf};

use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

use crate::cache::Checksum;

/// Where the patch call is inserted into the target method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString)]
pub enum InjectionLocation {
    /// Before the first instruction, once
    Prefix,
    /// Before every `ret`
    Postfix,
}

impl InjectionLocation {
    /// Accepted header values, comma separated
    #[must_use]
    pub fn valid_values() -> String {
        InjectionLocation::iter()
            .map(|location| location.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Identity and target coordinates of one patch source file.
///
/// Created by [`crate::patch::parse_descriptor`] and never modified afterwards;
/// [`PatchDescriptor::with_artifact`] produces a new descriptor once the patch is compiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchDescriptor {
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) references: Vec<PathBuf>,
    pub(crate) checksum: Checksum,
    pub(crate) source_path: PathBuf,
    pub(crate) artifact_location: Option<PathBuf>,
    pub(crate) target_framework: String,
    pub(crate) target_assembly: String,
    pub(crate) target_module: String,
    pub(crate) target_namespace: String,
    pub(crate) target_class: String,
    pub(crate) target_method: String,
    pub(crate) target_location: InjectionLocation,
    pub(crate) patch_class: String,
    pub(crate) patch_method: String,
}

impl PatchDescriptor {
    /// Patch name, `UnnamedPatch(<checksum>)` when the header has none
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Free-form description, empty when absent
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Library references from `@using` lines, as absolute paths in header order
    #[must_use]
    pub fn references(&self) -> &[PathBuf] {
        &self.references
    }

    /// Checksum of the source file the descriptor was parsed from
    #[must_use]
    pub fn checksum(&self) -> Checksum {
        self.checksum
    }

    /// The patch source file
    #[must_use]
    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Compiled artifact, once one exists
    #[must_use]
    pub fn artifact_location(&self) -> Option<&Path> {
        self.artifact_location.as_deref()
    }

    /// Target framework moniker recorded in the compiled artifact
    #[must_use]
    pub fn target_framework(&self) -> &str {
        &self.target_framework
    }

    /// File name of the binary to patch
    #[must_use]
    pub fn target_assembly(&self) -> &str {
        &self.target_assembly
    }

    /// Module inside the target binary, `MainModule` by default
    #[must_use]
    pub fn target_module(&self) -> &str {
        &self.target_module
    }

    /// Namespace of the target type, empty for the global namespace
    #[must_use]
    pub fn target_namespace(&self) -> &str {
        &self.target_namespace
    }

    /// Target type name
    #[must_use]
    pub fn target_class(&self) -> &str {
        &self.target_class
    }

    /// Target method name
    #[must_use]
    pub fn target_method(&self) -> &str {
        &self.target_method
    }

    /// Injection position
    #[must_use]
    pub fn target_location(&self) -> InjectionLocation {
        self.target_location
    }

    /// Type in the compiled patch holding the patch method, optionally namespace-qualified
    #[must_use]
    pub fn patch_class(&self) -> &str {
        &self.patch_class
    }

    /// Name of the public static patch method
    #[must_use]
    pub fn patch_method(&self) -> &str {
        &self.patch_method
    }

    /// Splits [`PatchDescriptor::patch_class`] into namespace and simple name
    #[must_use]
    pub fn patch_type_name(&self) -> (&str, &str) {
        match self.patch_class.rsplit_once('.') {
            Some((namespace, name)) => (namespace, name),
            None => ("", &self.patch_class),
        }
    }

    /// Returns a copy of this descriptor pointing at a compiled artifact
    #[must_use]
    pub fn with_artifact(&self, artifact: PathBuf) -> Self {
        PatchDescriptor {
            artifact_location: Some(artifact),
            ..self.clone()
        }
    }
}
