//! The compiler service that turns patch sources into loadable binaries.
//!
//! Compilation itself happens outside this crate. [`PatchCompiler`] is the seam: the
//! compilation cache hands it a [`CompileRequest`] and gets back either the produced binary or
//! the compiler's diagnostics. [`CommandCompiler`] drives an installed `csc` or `mcs`;
//! tests plug in recording fakes.
//!
//! References are collected into an immutable [`ReferenceSet`] per compile, so concurrent
//! compilations never share mutable state.
//!
//! # Examples
//!
//! ```rust
//! use cilpatch::compiler::{CompileOutput, CompileRequest, PatchCompiler, ReferenceSet};
//!
//! struct Echo;
//!
//! impl PatchCompiler for Echo {
//!     fn compile(&self, request: &CompileRequest) -> cilpatch::Result<CompileOutput> {
//!         Ok(CompileOutput::Binary(request.source.clone().into_bytes()))
//!     }
//! }
//!
//! let request = CompileRequest {
//!     assembly_name: "GodMode".to_string(),
//!     source: "class P {}".to_string(),
//!     references: ReferenceSet::builder().build(),
//! };
//! assert!(matches!(Echo.compile(&request)?, CompileOutput::Binary(_)));
//! # Ok::<(), cilpatch::Error>(())
//! ```

mod command;
mod references;

pub use command::{CommandCompiler, CompilerKind};
pub use references::{ReferenceSet, ReferenceSetBuilder, BASELINE_LIBRARIES};

use crate::Result;

/// One compilation job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileRequest {
    /// Name of the produced assembly, without extension
    pub assembly_name: String,
    /// Prepared source text
    pub source: String,
    /// Libraries the source may reference
    pub references: ReferenceSet,
}

/// Result of a compiler invocation that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileOutput {
    /// The compiled binary
    Binary(Vec<u8>),
    /// The compiler rejected the source; one entry per diagnostic
    Diagnostics(Vec<String>),
}

/// A compiler for patch sources.
///
/// Implementations must be usable from several threads at once; the orchestrator compiles
/// patches in parallel.
pub trait PatchCompiler: Send + Sync {
    /// Compiles one request.
    ///
    /// # Errors
    /// Returns an error only when the compiler could not be run at all. Rejected sources are
    /// reported as [`CompileOutput::Diagnostics`].
    fn compile(&self, request: &CompileRequest) -> Result<CompileOutput>;
}
