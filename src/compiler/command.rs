//! Driver for command line C# compilers.

use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Output},
};

use tracing::debug;

use crate::{
    compiler::{CompileOutput, CompileRequest, PatchCompiler},
    Error, Result,
};

/// Supported compiler front ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilerKind {
    /// Roslyn `csc`
    Csc,
    /// Mono `mcs`
    Mcs,
}

impl CompilerKind {
    /// Default executable name
    #[must_use]
    pub fn program(self) -> &'static str {
        match self {
            CompilerKind::Csc => "csc",
            CompilerKind::Mcs => "mcs",
        }
    }
}

/// Compiles patches by running an external compiler in a scratch directory.
#[derive(Debug, Clone)]
pub struct CommandCompiler {
    kind: CompilerKind,
    program: PathBuf,
}

impl CommandCompiler {
    /// Uses `kind` through its default executable name on `PATH`
    #[must_use]
    pub fn new(kind: CompilerKind) -> Self {
        CommandCompiler {
            kind,
            program: PathBuf::from(kind.program()),
        }
    }

    /// Uses `kind` through an explicit executable
    #[must_use]
    pub fn with_program(kind: CompilerKind, program: impl Into<PathBuf>) -> Self {
        CommandCompiler {
            kind,
            program: program.into(),
        }
    }

    /// Probes `PATH` for `csc`, then `mcs`
    #[must_use]
    pub fn detect() -> Option<Self> {
        [CompilerKind::Csc, CompilerKind::Mcs]
            .into_iter()
            .find(|kind| {
                Command::new(kind.program())
                    .arg("-help")
                    .output()
                    .is_ok()
            })
            .map(CommandCompiler::new)
    }

    /// The compiler front end in use
    #[must_use]
    pub fn kind(&self) -> CompilerKind {
        self.kind
    }

    fn arguments(&self, request: &CompileRequest, source: &Path, output: &Path) -> Vec<String> {
        let mut args = vec!["-target:library".to_string(), "-optimize+".to_string()];
        if self.kind == CompilerKind::Csc {
            args.push("-nologo".to_string());
        }
        args.push(format!("-out:{}", output.display()));
        args.extend(
            request
                .references
                .paths()
                .iter()
                .map(|reference| format!("-reference:{}", reference.display())),
        );
        args.push(source.display().to_string());
        args
    }
}

impl PatchCompiler for CommandCompiler {
    fn compile(&self, request: &CompileRequest) -> Result<CompileOutput> {
        let scratch = tempfile::tempdir()?;
        let source = scratch.path().join(format!("{}.cs", request.assembly_name));
        let output = scratch.path().join(format!("{}.dll", request.assembly_name));
        fs::write(&source, &request.source).map_err(|e| Error::io(&source, e))?;

        let args = self.arguments(request, &source, &output);
        debug!(
            program = %self.program.display(),
            assembly = %request.assembly_name,
            references = request.references.len(),
            "Running compiler"
        );

        let result = Command::new(&self.program).args(&args).output().map_err(|e| {
            Error::Error(format!(
                "Failed to execute {}: {e}",
                self.program.display()
            ))
        })?;

        if result.status.success() && output.is_file() {
            let binary = fs::read(&output).map_err(|e| Error::io(&output, e))?;
            return Ok(CompileOutput::Binary(binary));
        }

        Ok(CompileOutput::Diagnostics(collect_diagnostics(&result)))
    }
}

/// Error lines of a failed run, or all of its output if none mention an error
fn collect_diagnostics(result: &Output) -> Vec<String> {
    let stdout = String::from_utf8_lossy(&result.stdout);
    let stderr = String::from_utf8_lossy(&result.stderr);
    let lines: Vec<&str> = stdout
        .lines()
        .chain(stderr.lines())
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    let errors: Vec<String> = lines
        .iter()
        .filter(|line| line.contains("error"))
        .map(|line| (*line).to_string())
        .collect();

    if !errors.is_empty() {
        errors
    } else if !lines.is_empty() {
        lines.into_iter().map(String::from).collect()
    } else {
        vec![format!("Compiler exited with {}", result.status)]
    }
}
