//! # cilpatch Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the cilpatch library. Import this module to get quick access to everything needed to
//! run a patching session or drive the injection engine directly.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all cilpatch operations
pub use crate::Error;

/// The result type used throughout cilpatch
pub use crate::Result;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// Orchestrator, its configuration and outcome types
pub use crate::patcher::{
    BackupStore, GameLayout, PatchOutcome, PatchRecord, PatchReport, PatchSession, PatcherConfig,
};

// ================================================================================================
// Patches and Compilation
// ================================================================================================

/// Patch descriptors and parsing
pub use crate::patch::{
    parse_descriptor, DescriptorDefaults, InjectionLocation, PatchDescriptor,
};

/// Checksums and the compilation cache
pub use crate::cache::{CacheStatus, Checksum, CompilationCache, CompiledPatch};

/// Compiler service
pub use crate::compiler::{
    CommandCompiler, CompileOutput, CompileRequest, CompilerKind, PatchCompiler, ReferenceSet,
};

// ================================================================================================
// Module Model and Injection
// ================================================================================================

/// In-memory assemblies and their persistence
pub use crate::module::{
    CilAssembly, CilModule, ExternalMethod, LoadOptions, MethodDef, MethodHandle, ModuleStore,
    TypeDef, WriteGate, MAIN_MODULE,
};

/// The injection engine
pub use crate::injection::{inject, InjectionOutcome};

// ================================================================================================
// Bytecode
// ================================================================================================

/// Metadata token type for referencing table entries
pub use crate::metadata::token::Token;

/// Method bodies and exception handlers
pub use crate::metadata::method::{ExceptionHandler, ExceptionHandlerFlags, MethodBody};

/// Instructions and opcodes
pub use crate::assembly::{Instruction, OpCode, Operand};
