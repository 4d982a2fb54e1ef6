//! Low-level binary access helpers.
//!
//! # Key Components
//! - [`crate::file::io`] - Little-endian reading and writing of primitive values
//!
//! All multi-byte values in CIL method bodies and metadata are little-endian; the helpers in
//! [`io`] bounds-check every access and report [`crate::Error::OutOfBounds`] instead of
//! panicking on truncated input.

pub mod io;
