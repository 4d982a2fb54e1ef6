//! Metadata building blocks shared by the module model and the injection engine.
//!
//! # Key Components
//!
//! - [`method`] - Method bodies, exception handlers and method attribute flags
//! - [`token`] - Metadata table row references used throughout .NET

/// Implementation of editable CIL method bodies
pub mod method;
/// Commonly used metadata token type
pub mod token;
