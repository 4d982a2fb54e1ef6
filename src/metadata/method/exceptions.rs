//! Exception handler representation for editable CIL method bodies.
//!
//! Handler ranges are stored as instruction indices, like branch targets, so that inserting
//! instructions only requires shifting indices. The `*_end` fields are exclusive and may equal
//! the instruction count when a region runs to the end of the body.

use bitflags::bitflags;

use crate::metadata::token::Token;

bitflags! {
    /// Exception handler flags defining the type of exception handling clause.
    ///
    /// These flags determine how the exception handler processes exceptions and
    /// control flow within try/catch/finally blocks.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExceptionHandlerFlags: u16 {
        /// A typed exception clause.
        ///
        /// The `class_token` field contains the metadata token of the exception type
        /// that this handler catches.
        const EXCEPTION = 0x0000;

        /// An exception filter and handler clause.
        const FILTER = 0x0001;

        /// A finally clause.
        const FINALLY = 0x0002;

        /// A fault clause (finally that executes only on exception).
        const FAULT = 0x0004;
    }
}

/// Exception handler defining a protected region and its handler within a method.
///
/// # Layout in IL
///
/// ```text
/// try {
///     // try_start .. try_end
/// }
/// catch (ExceptionType) {
///     // handler_start .. handler_end
/// }
/// ```
///
/// # References
/// - ECMA-335 6th Edition, Partition II, Section 25.4.6 - Exception Handling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Flags describing the type of exception handler (catch, filter, finally, fault).
    pub flags: ExceptionHandlerFlags,
    /// Index of the first protected instruction.
    pub try_start: usize,
    /// Index one past the last protected instruction.
    pub try_end: usize,
    /// Index of the first handler instruction.
    pub handler_start: usize,
    /// Index one past the last handler instruction.
    pub handler_end: usize,
    /// Index of the first filter instruction, for filter clauses.
    pub filter_start: Option<usize>,
    /// Type caught by a typed exception clause.
    pub class_token: Option<Token>,
}

impl ExceptionHandler {
    /// Returns true for `finally` clauses
    #[must_use]
    pub fn is_finally(&self) -> bool {
        self.flags.contains(ExceptionHandlerFlags::FINALLY)
    }

    /// Returns true for filter clauses
    #[must_use]
    pub fn is_filter(&self) -> bool {
        self.flags.contains(ExceptionHandlerFlags::FILTER)
    }

    /// Returns true for `fault` clauses
    #[must_use]
    pub fn is_fault(&self) -> bool {
        self.flags.contains(ExceptionHandlerFlags::FAULT)
    }

    /// Returns true for typed `catch` clauses
    #[must_use]
    pub fn is_typed(&self) -> bool {
        !(self.is_filter() || self.is_finally() || self.is_fault())
    }

    /// Adjusts the ranges after one instruction was inserted at `index`.
    ///
    /// Region starts at or after the insertion point move with the shifted code. Region ends
    /// move only when they lie strictly after the insertion point, so a region that ends right
    /// before `index` does not grow to cover the new instruction.
    pub fn shift_for_insert(&mut self, index: usize) {
        let start = |value: &mut usize| {
            if *value >= index {
                *value += 1;
            }
        };
        let end = |value: &mut usize| {
            if *value > index {
                *value += 1;
            }
        };

        start(&mut self.try_start);
        end(&mut self.try_end);
        start(&mut self.handler_start);
        end(&mut self.handler_end);
        if let Some(filter) = self.filter_start.as_mut() {
            start(filter);
        }
    }
}
