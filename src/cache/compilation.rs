//! Checksum-keyed reuse of compiled patches.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::{
    compiler::{CompileOutput, CompileRequest, PatchCompiler, ReferenceSet},
    patch::{prepare_source, PatchDescriptor},
    Error, Result,
};

/// Extension appended to an artifact path to form its checksum sidecar
const SIDECAR_EXTENSION: &str = "md5";

/// Characters that cannot appear in artifact file names
const RESERVED_CHARACTERS: [char; 9] = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// How an artifact was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// The stored artifact matched the source checksum
    Reused,
    /// The source was compiled and the artifact written
    Compiled,
}

/// A descriptor bound to its compiled artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledPatch {
    /// Descriptor with [`PatchDescriptor::artifact_location`] set
    pub descriptor: PatchDescriptor,
    /// Whether the compiler ran
    pub status: CacheStatus,
}

/// Compiles patch sources at most once per distinct content.
///
/// Every patch owns the artifact `<compiled_dir>/<name>.<ext>` and the sidecar
/// `<name>.<ext>.md5` holding the checksum of the source it was built from. A matching sidecar
/// next to an existing artifact short-circuits compilation. A failed compile writes nothing,
/// so the patch is simply retried on the next run.
pub struct CompilationCache<'c> {
    compiled_dir: PathBuf,
    artifact_extension: String,
    runtime_dir: Option<PathBuf>,
    game_library_dir: Option<PathBuf>,
    compiler: &'c dyn PatchCompiler,
}

impl<'c> CompilationCache<'c> {
    /// Creates a cache writing `.<artifact_extension>` files into `compiled_dir`
    #[must_use]
    pub fn new(
        compiled_dir: impl Into<PathBuf>,
        artifact_extension: impl Into<String>,
        compiler: &'c dyn PatchCompiler,
    ) -> Self {
        CompilationCache {
            compiled_dir: compiled_dir.into(),
            artifact_extension: artifact_extension.into(),
            runtime_dir: None,
            game_library_dir: None,
            compiler,
        }
    }

    /// Compiles against the core libraries found in `runtime_dir`
    #[must_use]
    pub fn with_runtime_dir(mut self, runtime_dir: Option<PathBuf>) -> Self {
        self.runtime_dir = runtime_dir;
        self
    }

    /// Adds every library in `dir`, typically the game's managed folder, to each compile
    #[must_use]
    pub fn with_game_libraries(mut self, dir: Option<PathBuf>) -> Self {
        self.game_library_dir = dir;
        self
    }

    /// Deterministic artifact location for a patch name
    #[must_use]
    pub fn artifact_path(&self, patch_name: &str) -> PathBuf {
        self.compiled_dir.join(format!(
            "{}.{}",
            sanitize_file_name(patch_name),
            self.artifact_extension
        ))
    }

    /// Sidecar location for an artifact
    #[must_use]
    pub fn sidecar_path(artifact: &Path) -> PathBuf {
        let mut sidecar = artifact.as_os_str().to_os_string();
        sidecar.push(".");
        sidecar.push(SIDECAR_EXTENSION);
        PathBuf::from(sidecar)
    }

    /// Returns the artifact for `descriptor`, compiling only when its checksum changed.
    ///
    /// # Errors
    /// Returns [`crate::Error::MissingDirectory`] if the compiled folder is gone,
    /// [`crate::Error::EmptySource`] for a source without content,
    /// [`crate::Error::Compilation`] with the joined diagnostics if the compiler rejects the
    /// source, and [`crate::Error::Io`] for read or write failures.
    pub fn compile(&self, descriptor: &PatchDescriptor) -> Result<CompiledPatch> {
        if !self.compiled_dir.is_dir() {
            return Err(Error::MissingDirectory(self.compiled_dir.clone()));
        }

        let artifact = self.artifact_path(descriptor.name());
        if self.is_current(descriptor, &artifact) {
            info!(patch = %descriptor.name(), "Using cached patch");
            return Ok(CompiledPatch {
                descriptor: descriptor.with_artifact(artifact),
                status: CacheStatus::Reused,
            });
        }

        let source_path = descriptor.source_path();
        let data = fs::read(source_path).map_err(|e| Error::io(source_path, e))?;
        let content = String::from_utf8_lossy(&data);
        if content.trim().is_empty() {
            return Err(Error::EmptySource(source_path.to_path_buf()));
        }

        let request = CompileRequest {
            assembly_name: sanitize_file_name(descriptor.name()),
            source: prepare_source(&content, descriptor.target_framework()),
            references: self.references(descriptor),
        };

        info!(patch = %descriptor.name(), path = %source_path.display(), "Compiling patch");
        let binary = match self.compiler.compile(&request)? {
            CompileOutput::Binary(binary) => binary,
            CompileOutput::Diagnostics(diagnostics) => {
                return Err(Error::Compilation {
                    file: source_path.to_path_buf(),
                    diagnostics: diagnostics.join("\n"),
                })
            }
        };

        write_atomic(&self.compiled_dir, &artifact, &binary)?;
        write_atomic(
            &self.compiled_dir,
            &Self::sidecar_path(&artifact),
            descriptor.checksum().to_hex().as_bytes(),
        )?;
        debug!(path = %artifact.display(), size = binary.len(), "Stored compiled patch");

        Ok(CompiledPatch {
            descriptor: descriptor.with_artifact(artifact),
            status: CacheStatus::Compiled,
        })
    }

    /// True if the artifact exists and its sidecar records the descriptor's checksum
    fn is_current(&self, descriptor: &PatchDescriptor, artifact: &Path) -> bool {
        if !artifact.is_file() {
            return false;
        }

        match fs::read_to_string(Self::sidecar_path(artifact)) {
            Ok(stored) => descriptor.checksum().matches(&stored),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(patch = %descriptor.name(), error = %e, "Unreadable checksum sidecar");
                }
                false
            }
        }
    }

    fn references(&self, descriptor: &PatchDescriptor) -> ReferenceSet {
        let mut builder = ReferenceSet::builder();
        if let Some(runtime_dir) = &self.runtime_dir {
            builder = builder.runtime_libraries(runtime_dir);
        }
        builder = builder.references(descriptor.references());
        if let Some(game_dir) = &self.game_library_dir {
            builder = builder.directory_libraries(game_dir);
        }
        builder.build()
    }
}

/// Replaces characters that are not allowed in file names with `_`
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if RESERVED_CHARACTERS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect()
}

/// Writes `data` to `path` through a temporary file in `dir`, so readers never see a partial file
fn write_atomic(dir: &Path, path: &Path, data: &[u8]) -> Result<()> {
    let mut file = NamedTempFile::new_in(dir).map_err(|e| Error::io(dir, e))?;
    file.write_all(data).map_err(|e| Error::io(file.path(), e))?;
    file.persist(path).map_err(|e| Error::io(path, e.error))?;
    Ok(())
}
