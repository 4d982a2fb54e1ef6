//! In-memory assembly model, loading/persisting seam and the write gate.
//!
//! # Key Types
//! - [`CilAssembly`] / [`CilModule`] - loaded assembly with its modules
//! - [`TypeDef`] / [`MethodDef`] - definitions resolved by name
//! - [`ExternalMethod`] - a patch method as seen from the module that will call it
//! - [`ModuleStore`] - loads and writes assemblies
//! - [`WriteGate`] - integrity checks before persisting
//!
//! # Example
//! ```rust
//! use cilpatch::module::{CilAssembly, WriteGate};
//!
//! let assembly = CilAssembly::new("Empty");
//! assert!(WriteGate::default().verify(&assembly).is_err());
//! ```

mod gate;
mod model;
mod store;

pub use gate::{BodiesEncodeCheck, HasTypesCheck, IntegrityCheck, WriteGate};
pub use model::{
    CilAssembly, CilModule, ExternalMethod, MemberRef, MethodDef, MethodHandle, TypeAttributes,
    TypeDef, TypeRef, MAIN_MODULE,
};
pub use store::{LoadOptions, ModuleStore};
