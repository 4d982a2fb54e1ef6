//! One patching invocation against one game folder.

use std::{
    collections::{hash_map::Entry, BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
};

use rayon::prelude::*;
use tracing::{debug, error, info};

use crate::{
    cache::{sanitize_file_name, CompilationCache, CompiledPatch},
    compiler::PatchCompiler,
    injection::{inject, InjectionOutcome},
    module::{CilAssembly, ExternalMethod, LoadOptions, ModuleStore, WriteGate},
    patch::{parse_descriptor, DescriptorDefaults, PatchDescriptor},
    patcher::{
        BackupStore, Failure, GameLayout, PatchOutcome, PatchRecord, PatchReport, PatcherConfig,
    },
    Error, Result,
};

/// Everything one run needs: configuration and the two external services.
///
/// A session holds no state between calls; every [`PatchSession::patch`] rediscovers the game
/// and reloads its binaries.
pub struct PatchSession<'a> {
    config: PatcherConfig,
    store: &'a dyn ModuleStore,
    compiler: &'a dyn PatchCompiler,
    gate: WriteGate,
}

impl<'a> PatchSession<'a> {
    /// Creates a session with the default [`WriteGate`]
    #[must_use]
    pub fn new(
        config: PatcherConfig,
        store: &'a dyn ModuleStore,
        compiler: &'a dyn PatchCompiler,
    ) -> Self {
        PatchSession {
            config,
            store,
            compiler,
            gate: WriteGate::default(),
        }
    }

    /// Replaces the checks run before a binary is written
    #[must_use]
    pub fn with_gate(mut self, gate: WriteGate) -> Self {
        self.gate = gate;
        self
    }

    /// The session configuration
    #[must_use]
    pub fn config(&self) -> &PatcherConfig {
        &self.config
    }

    /// Compiles all patch sources of the game at `game_path` and applies them.
    ///
    /// Failures of a single source, patch or secondary binary are recorded in the report and
    /// do not stop the run.
    ///
    /// # Errors
    /// Returns an error if the game layout cannot be discovered, the working folders or the
    /// primary backup cannot be created, or the primary binary cannot be loaded.
    pub fn patch(&self, game_path: &Path) -> Result<PatchReport> {
        info!(path = %game_path.display(), "Patching game");
        let layout = GameLayout::discover(game_path, &self.config)?;
        info!(game = %layout.name(), "Game name: {}", layout.name());

        layout.ensure_directories()?;
        let backups = BackupStore::new(&self.config.backup_dir, layout.name());
        backups.backup_primary(layout.primary_assembly())?;

        let mut primary = self.store.load(
            layout.primary_assembly(),
            &LoadOptions::writable_in(layout.managed_dir()),
        )?;
        let defaults = self
            .config
            .descriptor_defaults(primary.target_framework.as_deref());

        let mut report = PatchReport::default();
        let compiled = self.compile_patches(&layout, &defaults, &mut report)?;
        if compiled.is_empty() {
            info!("No patches to apply");
            return Ok(report);
        }

        let primary_name = layout.primary_file_name();
        let mut own = Vec::new();
        let mut secondary: BTreeMap<String, Vec<PatchDescriptor>> = BTreeMap::new();
        for descriptor in compiled {
            if descriptor.target_assembly() == primary_name {
                own.push(descriptor);
            } else {
                secondary
                    .entry(descriptor.target_assembly().to_string())
                    .or_default()
                    .push(descriptor);
            }
        }

        if !own.is_empty() {
            let changed =
                self.apply_group(&mut primary, layout.primary_assembly(), &own, &mut report);
            self.persist(&primary, layout.primary_assembly(), changed, &mut report);
        }
        drop(primary);

        for (file_name, group) in secondary {
            let path = layout.assembly_path(&file_name);
            let loaded = backups.backup_secondary(&path).and_then(|_| {
                self.store
                    .load(&path, &LoadOptions::writable_in(layout.managed_dir()))
            });

            match loaded {
                Ok(mut assembly) => {
                    let changed = self.apply_group(&mut assembly, &path, &group, &mut report);
                    self.persist(&assembly, &path, changed, &mut report);
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Cannot open target binary");
                    for descriptor in &group {
                        report.patches.push(record(
                            descriptor,
                            PatchOutcome::Failed(e.to_string()),
                        ));
                    }
                    report.rejected.push(Failure {
                        path,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            injected = report.injected_count(),
            already_present = report.already_present_count(),
            failed = report.failed_count() + report.compile_failures.len(),
            "Patching finished"
        );
        Ok(report)
    }

    /// Replaces the primary binary of the game at `game_path` with its pristine backup.
    ///
    /// # Errors
    /// Returns an error if the game layout cannot be discovered or no backup exists.
    pub fn restore(&self, game_path: &Path) -> Result<()> {
        let layout = GameLayout::discover(game_path, &self.config)?;
        BackupStore::new(&self.config.backup_dir, layout.name())
            .restore_primary(layout.primary_assembly())
    }

    /// True if the primary binary differs from the state recorded at backup time.
    ///
    /// # Errors
    /// Returns an error if the game layout cannot be discovered or the files cannot be read.
    pub fn is_modified(&self, game_path: &Path) -> Result<bool> {
        let layout = GameLayout::discover(game_path, &self.config)?;
        BackupStore::new(&self.config.backup_dir, layout.name())
            .is_modified(layout.primary_assembly())
    }

    /// Parses and compiles every source, in source order
    fn compile_patches(
        &self,
        layout: &GameLayout,
        defaults: &DescriptorDefaults,
        report: &mut PatchReport,
    ) -> Result<Vec<PatchDescriptor>> {
        let sources = layout.source_files()?;
        info!(
            count = sources.len(),
            "Found {} patches. Only new or modified patches will be compiled.",
            sources.len()
        );

        let cache = CompilationCache::new(
            layout.compiled_dir(),
            self.config.artifact_extension.as_str(),
            self.compiler,
        )
        .with_runtime_dir(self.config.runtime_dir.clone())
        .with_game_libraries(
            self.config
                .include_game_references
                .then(|| layout.managed_dir().to_path_buf()),
        );

        let parsed: Vec<Result<PatchDescriptor>> = if self.config.parallel_compile {
            sources
                .par_iter()
                .map(|source| parse_descriptor(source, defaults))
                .collect()
        } else {
            sources
                .iter()
                .map(|source| parse_descriptor(source, defaults))
                .collect()
        };

        // The first source claiming an artifact name keeps it
        let mut claimed: HashMap<String, PathBuf> = HashMap::new();
        let mut accepted = Vec::with_capacity(parsed.len());
        for (source, result) in sources.into_iter().zip(parsed) {
            let checked = result.and_then(|descriptor| {
                let name = sanitize_file_name(descriptor.name());
                // Case-insensitive file systems map `Fix` and `fix` onto one artifact
                match claimed.entry(name.to_lowercase()) {
                    Entry::Occupied(first) => Err(Error::DuplicatePatchName {
                        name,
                        first: first.get().clone(),
                    }),
                    Entry::Vacant(slot) => {
                        slot.insert(source.clone());
                        Ok(descriptor)
                    }
                }
            });
            match checked {
                Ok(descriptor) => accepted.push(descriptor),
                Err(e) => compile_failure(report, source, &e),
            }
        }

        let build = |descriptor: &PatchDescriptor| cache.compile(descriptor);
        let results: Vec<Result<CompiledPatch>> = if self.config.parallel_compile {
            accepted.par_iter().map(build).collect()
        } else {
            accepted.iter().map(build).collect()
        };

        let mut compiled = Vec::with_capacity(results.len());
        for (descriptor, result) in accepted.iter().zip(results) {
            match result {
                Ok(patch) => compiled.push(patch.descriptor),
                Err(e) => compile_failure(report, descriptor.source_path().to_path_buf(), &e),
            }
        }
        Ok(compiled)
    }

    /// Applies `group` to `assembly`; returns true if any call was inserted
    fn apply_group(
        &self,
        assembly: &mut CilAssembly,
        target_path: &Path,
        group: &[PatchDescriptor],
        report: &mut PatchReport,
    ) -> bool {
        let mut changed = false;

        for descriptor in group {
            info!(patch = %descriptor.name(), "Applying patch: {}", descriptor.name());
            let outcome = match self.apply_patch(assembly, descriptor) {
                Ok(outcome) => {
                    changed |= matches!(outcome, InjectionOutcome::Injected { .. });
                    match deploy_artifact(descriptor, target_path) {
                        Ok(()) => PatchOutcome::from(outcome),
                        Err(e) => {
                            error!(patch = %descriptor.name(), error = %e, "Cannot deploy compiled patch");
                            PatchOutcome::Failed(e.to_string())
                        }
                    }
                }
                Err(e) => {
                    error!(
                        patch = %descriptor.name(),
                        path = %descriptor.source_path().display(),
                        error = %e,
                        "Failed to apply patch"
                    );
                    PatchOutcome::Failed(e.to_string())
                }
            };
            report.patches.push(record(descriptor, outcome));
        }

        changed
    }

    fn apply_patch(
        &self,
        assembly: &mut CilAssembly,
        descriptor: &PatchDescriptor,
    ) -> Result<InjectionOutcome> {
        let artifact = descriptor.artifact_location().ok_or_else(|| {
            Error::Error(format!("Patch {} has not been compiled", descriptor.name()))
        })?;
        let patch_assembly = self.store.load(artifact, &LoadOptions::read_only())?;
        let patch_module = patch_assembly
            .modules
            .first()
            .ok_or_else(|| Error::ModuleNotFound(patch_assembly.name.clone()))?;

        let (namespace, class) = descriptor.patch_type_name();
        let handle = patch_module.resolve(namespace, class, descriptor.patch_method())?;
        let owner = &patch_module.types[handle.type_index];
        let external = ExternalMethod {
            scope: &patch_assembly.name,
            owner,
            method: &owner.methods[handle.method_index],
        };

        let module = assembly.module_mut(descriptor.target_module())?;
        let target = module.resolve(
            descriptor.target_namespace(),
            descriptor.target_class(),
            descriptor.target_method(),
        )?;

        inject(module, target, &external, descriptor.target_location())
    }

    /// Writes `assembly` through the gate if it changed
    fn persist(&self, assembly: &CilAssembly, path: &Path, changed: bool, report: &mut PatchReport) {
        if !changed {
            debug!(path = %path.display(), "No new injections, binary left untouched");
            return;
        }

        match self.gate.write(self.store, assembly, path) {
            Ok(()) => {
                info!(path = %path.display(), "{} state is valid. Assembly written.", assembly.name);
                report.written.push(path.to_path_buf());
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Binary not written");
                report.rejected.push(Failure {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        }
    }
}

/// Copies the compiled patch next to the binary that now references it
fn deploy_artifact(descriptor: &PatchDescriptor, target_path: &Path) -> Result<()> {
    let artifact = descriptor.artifact_location().ok_or_else(|| {
        Error::Error(format!("Patch {} has not been compiled", descriptor.name()))
    })?;
    let (Some(dir), Some(file_name)) = (target_path.parent(), artifact.file_name()) else {
        return Err(Error::Error(format!(
            "Cannot place {} beside {}",
            artifact.display(),
            target_path.display()
        )));
    };

    let destination = dir.join(file_name);
    fs::copy(artifact, &destination).map_err(|e| Error::io(&destination, e))?;
    debug!(path = %destination.display(), "Deployed compiled patch");
    Ok(())
}

fn compile_failure(report: &mut PatchReport, source: PathBuf, e: &Error) {
    error!(
        path = %source.display(),
        error = %e,
        "There was an error while compiling the patch"
    );
    report.compile_failures.push(Failure {
        path: source,
        reason: e.to_string(),
    });
}

fn record(descriptor: &PatchDescriptor, outcome: PatchOutcome) -> PatchRecord {
    PatchRecord {
        name: descriptor.name().to_string(),
        source: descriptor.source_path().to_path_buf(),
        target_assembly: descriptor.target_assembly().to_string(),
        outcome,
    }
}
