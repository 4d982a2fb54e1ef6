//! Content checksums and the compilation cache.
//!
//! [`Checksum`] identifies patch sources and game binaries by content. [`CompilationCache`]
//! uses it to skip recompiling a patch whose source did not change since its artifact was
//! built: the artifact's `.md5` sidecar records the checksum it was built from.

mod checksum;
mod compilation;

pub use checksum::Checksum;
pub use compilation::{sanitize_file_name, CacheStatus, CompilationCache, CompiledPatch};
