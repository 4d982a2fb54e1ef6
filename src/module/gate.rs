//! Integrity checks that run before a mutated assembly is persisted.
//!
//! A [`WriteGate`] runs a list of [`IntegrityCheck`] stages against an assembly and only hands
//! it to the [`ModuleStore`] if every stage passes. A failed gate leaves the file on disk
//! untouched.

use std::path::Path;

use tracing::{debug, error};

use crate::{
    module::{CilAssembly, ModuleStore},
    Error, Result,
};

/// One integrity rule checked before writing.
pub trait IntegrityCheck: Send + Sync {
    /// Checks `assembly`.
    ///
    /// # Errors
    /// Returns [`crate::Error::ModuleIntegrity`] if the assembly must not be written.
    fn check(&self, assembly: &CilAssembly) -> Result<()>;

    /// Returns the name of this check.
    fn name(&self) -> &'static str;
}

/// The primary module must still define at least one type.
pub struct HasTypesCheck;

impl IntegrityCheck for HasTypesCheck {
    fn check(&self, assembly: &CilAssembly) -> Result<()> {
        if assembly.has_any_type() {
            Ok(())
        } else {
            Err(Error::ModuleIntegrity(assembly.name.clone()))
        }
    }

    fn name(&self) -> &'static str {
        "HasTypesCheck"
    }
}

/// Every method body must still encode.
pub struct BodiesEncodeCheck;

impl IntegrityCheck for BodiesEncodeCheck {
    fn check(&self, assembly: &CilAssembly) -> Result<()> {
        for module in &assembly.modules {
            for ty in &module.types {
                for method in &ty.methods {
                    let Some(body) = &method.body else {
                        continue;
                    };
                    if let Err(e) = body.encode() {
                        error!(
                            method = %format!("{}::{}", ty.full_name(), method.name),
                            error = %e,
                            "Method body no longer encodes"
                        );
                        return Err(Error::ModuleIntegrity(assembly.name.clone()));
                    }
                }
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "BodiesEncodeCheck"
    }
}

/// Ordered list of integrity checks guarding [`ModuleStore::write`].
pub struct WriteGate {
    /// Checks to run, in order
    pub stages: Vec<Box<dyn IntegrityCheck>>,
}

impl WriteGate {
    /// Creates a gate without any checks
    #[must_use]
    pub fn new() -> Self {
        WriteGate { stages: Vec::new() }
    }

    /// Adds a check to the gate.
    #[must_use]
    pub fn add_stage<S: IntegrityCheck + 'static>(mut self, stage: S) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Runs every check in order, stopping at the first failure.
    ///
    /// # Errors
    /// Returns the error of the first failing check.
    pub fn verify(&self, assembly: &CilAssembly) -> Result<()> {
        for stage in &self.stages {
            debug!(stage = stage.name(), assembly = %assembly.name, "Running integrity check");
            stage.check(assembly)?;
        }
        Ok(())
    }

    /// Verifies `assembly` and writes it to `path` through `store`.
    ///
    /// # Errors
    /// Returns the first failing check's error without touching `path`, or the store's error.
    pub fn write(&self, store: &dyn ModuleStore, assembly: &CilAssembly, path: &Path) -> Result<()> {
        self.verify(assembly)?;
        store.write(assembly, path)
    }
}

impl Default for WriteGate {
    fn default() -> Self {
        Self::new()
            .add_stage(HasTypesCheck)
            .add_stage(BodiesEncodeCheck)
    }
}
