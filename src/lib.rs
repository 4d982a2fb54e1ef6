// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

//! # cilpatch
//!
//! [![Crates.io](https://img.shields.io/crates/v/cilpatch.svg)](https://crates.io/crates/cilpatch)
//! [![Documentation](https://docs.rs/cilpatch/badge.svg)](https://docs.rs/cilpatch)
//! [![License](https://img.shields.io/badge/license-Apache--2.0-blue.svg)](https://github.com/BinFlip/cilpatch/blob/main/LICENSE-APACHE)
//!
//! Patching of compiled .NET game binaries. `cilpatch` compiles small C# patch sources and
//! inserts calls to their entry methods into existing methods of a game, without touching the
//! game's source code. Re-running it is cheap and safe: unchanged patches are not recompiled
//! and patches that are already in place are not inserted twice.
//!
//! ## Features
//!
//! - **Header-driven patches** - every patch source describes its target in a leading comment
//! - **Compilation cache** - artifacts are reused as long as the source checksum matches
//! - **Idempotent injection** - Prefix and Postfix calls are detected and never duplicated
//! - **Safe rewriting** - branches and exception ranges are kept consistent, short branch forms
//!   are re-selected after every edit
//! - **Write gate** - structurally emptied binaries are never written
//! - **Backups** - pristine binaries are kept on first touch and can be restored
//!
//! ## Quick Start
//!
//! A patch source:
//!
//! ```text
//! /*
//!  @Name=GodMode
//!  @TargetClass=Player
//!  @TargetMethod=TakeDamage
//!  @TargetLocation=Prefix
//!  @PatchClass=P
//!  @PatchMethod=M
//! */
//! public class P
//! {
//!     public static void M() { UnityEngine.Debug.Log("hit"); }
//! }
//! ```
//!
//! dropped into `<game>/Patches/` is applied by a [`patcher::PatchSession`]:
//!
//! ```rust,no_run
//! use cilpatch::prelude::*;
//! use std::path::Path;
//!
//! fn run(store: &dyn ModuleStore) -> cilpatch::Result<()> {
//!     let compiler = CommandCompiler::detect()
//!         .ok_or_else(|| Error::Error("no C# compiler found".to_string()))?;
//!     let session = PatchSession::new(PatcherConfig::default(), store, &compiler);
//!
//!     let report = session.patch(Path::new("/games/Demo"))?;
//!     for record in &report.patches {
//!         println!("{}: {:?}", record.name, record.outcome);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Reading and writing PE images is left to a [`module::ModuleStore`] implementation; this
//! crate works on the in-memory [`module::CilAssembly`] model.
//!
//! ## Architecture
//!
//! - [`patch`] - patch descriptors, the header parser and source preparation
//! - [`cache`] - content checksums and the compilation cache
//! - [`compiler`] - the compiler service seam, reference sets and a `csc`/`mcs` driver
//! - [`injection`] - the injection engine
//! - [`patcher`] - the orchestrator: game layout, backups, sessions and reports
//! - [`module`] - the in-memory assembly model, reference import and the write gate
//! - [`metadata`] - tokens and method bodies with exception handlers
//! - [`assembly`] - CIL opcodes, instruction decoding, encoding and macro forms
//! - [`Error`] and [`Result`] - error handling
//!
//! ## Logging
//!
//! All diagnostics are emitted through [`tracing`](https://docs.rs/tracing). The crate never
//! installs a subscriber; binaries embedding it choose one.
//!
//! ## Error Handling
//!
//! All operations return [`Result<T, Error>`](Result). Per-patch failures during a session
//! are collected in the [`patcher::PatchReport`] instead of aborting the run:
//!
//! ```rust
//! use cilpatch::{cache::Checksum, patch::{parse_descriptor_str, DescriptorDefaults}, Error};
//! use std::path::Path;
//!
//! let result = parse_descriptor_str(
//!     "/*\n@TargetClass=Player\n*/",
//!     Path::new("Patches/Broken.cs"),
//!     Checksum::of_bytes(b""),
//!     &DescriptorDefaults::default(),
//! );
//! assert!(matches!(result, Err(Error::MissingHeaderField("TargetMethod"))));
//! ```

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit- and integration-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use cilpatch::prelude::*;
///
/// let config = PatcherConfig::default();
/// assert_eq!(config.primary_assembly, "Assembly-CSharp.dll");
/// ```
pub mod prelude;

/// Bounds-checked little-endian primitives
pub mod file;

/// CIL instruction set, decoding, encoding and macro forms
///
/// # Examples
///
/// ```rust
/// use cilpatch::assembly::{decode_stream, OpCode};
///
/// let (instructions, _) = decode_stream(&[0x00, 0x2A])?;
/// assert_eq!(instructions[1].opcode, OpCode::Ret);
/// # Ok::<(), cilpatch::Error>(())
/// ```
pub mod assembly;

/// Metadata tokens and method bodies
pub mod metadata;

/// The in-memory assembly model patches are applied to
pub mod module;

/// Patch descriptors and their sources
pub mod patch;

/// Checksums and the compilation cache
pub mod cache;

/// The compiler service
pub mod compiler;

/// The injection engine
pub mod injection;

/// The patch orchestrator
pub mod patcher;

/// `cilpatch` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `cilpatch` Error type
///
/// The main error type for all operations in this crate.
///
/// # Examples
///
/// ```rust
/// use cilpatch::{assembly::decode_stream, Error};
///
/// match decode_stream(&[0xA6]) {
///     Err(Error::UnknownOpcode(code)) => assert_eq!(code, 0xA6),
///     other => panic!("unexpected: {other:?}"),
/// }
/// ```
pub use error::Error;
