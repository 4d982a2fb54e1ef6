//! Configuration for a patching session.

use std::path::PathBuf;

use crate::patch::DescriptorDefaults;

/// Folder names, file extensions and behaviour switches of a [`crate::patcher::PatchSession`].
///
/// Relative directories are resolved against the game folder, except `backup_dir`, which is
/// resolved against the current directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatcherConfig {
    /// Patch sources inside the game folder (default: `Patches`).
    pub patches_dir: PathBuf,

    /// Private patch libraries inside `patches_dir` (default: `Lib`).
    pub library_dir: PathBuf,

    /// Compiled artifacts and their checksum sidecars (default: `CompiledPatches`).
    pub compiled_dir: PathBuf,

    /// Pristine copies of patched binaries, keyed by game name (default: `Games`).
    pub backup_dir: PathBuf,

    /// File name of the primary game binary (default: `Assembly-CSharp.dll`).
    pub primary_assembly: String,

    /// Folder holding the game binaries inside the `*_Data` folder (default: `Managed`).
    pub managed_dir: String,

    /// Extension of patch source files (default: `cs`).
    pub source_extension: String,

    /// Extension of compiled artifacts (default: `dll`).
    pub artifact_extension: String,

    /// Let patches reference every binary beside the primary one (default: `false`).
    pub include_game_references: bool,

    /// Target framework for patches that declare none and games that record none
    /// (default: `.NETStandard,Version=v2.1`).
    pub target_framework: String,

    /// Directory holding the compiler's core libraries (default: none).
    pub runtime_dir: Option<PathBuf>,

    /// Parse and compile patch sources on the rayon thread pool (default: `true`).
    pub parallel_compile: bool,
}

impl Default for PatcherConfig {
    fn default() -> Self {
        let defaults = DescriptorDefaults::default();
        PatcherConfig {
            patches_dir: PathBuf::from("Patches"),
            library_dir: PathBuf::from("Lib"),
            compiled_dir: PathBuf::from("CompiledPatches"),
            backup_dir: PathBuf::from("Games"),
            primary_assembly: defaults.target_assembly,
            managed_dir: "Managed".to_string(),
            source_extension: "cs".to_string(),
            artifact_extension: "dll".to_string(),
            include_game_references: false,
            target_framework: defaults.target_framework,
            runtime_dir: None,
            parallel_compile: true,
        }
    }
}

impl PatcherConfig {
    /// Sets where backups are kept
    #[must_use]
    pub fn with_backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = dir.into();
        self
    }

    /// Sets the primary game binary's file name
    #[must_use]
    pub fn with_primary_assembly(mut self, name: impl Into<String>) -> Self {
        self.primary_assembly = name.into();
        self
    }

    /// Enables or disables referencing the game's own binaries from patches
    #[must_use]
    pub fn with_game_references(mut self, enabled: bool) -> Self {
        self.include_game_references = enabled;
        self
    }

    /// Sets the fallback target framework
    #[must_use]
    pub fn with_target_framework(mut self, framework: impl Into<String>) -> Self {
        self.target_framework = framework.into();
        self
    }

    /// Sets the directory of the compiler's core libraries
    #[must_use]
    pub fn with_runtime_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.runtime_dir = Some(dir.into());
        self
    }

    /// Enables or disables parallel compilation
    #[must_use]
    pub fn with_parallel_compile(mut self, enabled: bool) -> Self {
        self.parallel_compile = enabled;
        self
    }

    /// Parser fallbacks, preferring the framework recorded in the game binary
    #[must_use]
    pub fn descriptor_defaults(&self, game_framework: Option<&str>) -> DescriptorDefaults {
        DescriptorDefaults {
            target_framework: game_framework
                .unwrap_or(&self.target_framework)
                .to_string(),
            target_assembly: self.primary_assembly.clone(),
        }
    }
}
