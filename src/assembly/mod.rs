//! CIL instruction model, bytecode codec and form selection.
//!
//! Method bodies are edited as lists of [`Instruction`]s whose branch and switch operands hold
//! the index of the target instruction instead of a byte offset. Inserting or removing an
//! instruction therefore only needs an index remap; byte distances are recomputed when the list
//! is encoded again.
//!
//! # Key Types
//! - [`OpCode`] - every ECMA-335 opcode with its encoding, operand kind and flow behaviour
//! - [`Instruction`] - an opcode plus its [`Operand`]
//!
//! # Main Functions
//! - [`decode_stream`] - bytes to instructions, binding branch targets to indices
//! - [`encode`] - instructions to bytes
//! - [`simplify_macros`] / [`optimize_macros`] - switch between compact and canonical forms
//!
//! # Example
//! ```rust
//! use cilpatch::assembly::{decode_stream, encode, optimize_macros, simplify_macros};
//!
//! // ldarg.0; brfalse.s +1; nop; ret
//! let (mut instructions, _) = decode_stream(&[0x02, 0x2C, 0x01, 0x00, 0x2A])?;
//! simplify_macros(&mut instructions);
//! optimize_macros(&mut instructions)?;
//! assert_eq!(encode(&instructions)?, vec![0x02, 0x2C, 0x01, 0x00, 0x2A]);
//! # Ok::<(), cilpatch::Error>(())
//! ```

mod decoder;
mod encoder;
mod forms;
mod instruction;
mod opcodes;

pub use decoder::{decode_stream, index_of_offset};
pub use encoder::{encode, layout};
pub use forms::{
    long_branch_form, optimize_branches, optimize_macros, short_branch_form, simplify_macros,
};
pub use instruction::{FlowType, Immediate, Instruction, Operand, OperandType};
pub use opcodes::{OpCode, PREFIX_FE};
