//! Patch descriptors and patch source handling.
//!
//! A patch is a C# source file whose leading block comment describes where its entry method
//! goes. [`parse_descriptor`] turns that header into an immutable [`PatchDescriptor`];
//! [`prepare_source`] stamps the target framework into the source before compilation.
//!
//! # Examples
//!
//! ```rust
//! use cilpatch::{cache::Checksum, patch::{parse_descriptor_str, DescriptorDefaults, InjectionLocation}};
//! use std::path::Path;
//!
//! let content = "/*\n@TargetClass=Player\n@TargetMethod=Update\n@TargetLocation=Prefix\n\
//!                @PatchClass=P\n@PatchMethod=M\n*/\nclass P {}";
//! let descriptor = parse_descriptor_str(
//!     content,
//!     Path::new("Patches/Tick.cs"),
//!     Checksum::of_bytes(content.as_bytes()),
//!     &DescriptorDefaults::default(),
//! )?;
//! assert_eq!(descriptor.target_location(), InjectionLocation::Prefix);
//! assert!(descriptor.name().starts_with("UnnamedPatch("));
//! # Ok::<(), cilpatch::Error>(())
//! ```

mod descriptor;
mod parser;
mod source;

pub use descriptor::{InjectionLocation, PatchDescriptor};
pub use parser::{header_lines, parse_descriptor, parse_descriptor_str, DescriptorDefaults};
pub use source::prepare_source;
