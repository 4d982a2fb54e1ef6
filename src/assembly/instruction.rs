//! Editable CIL instruction representation.
//!
//! Unlike a disassembly listing, an [`Instruction`] here does not know its own byte offset.
//! Branch and switch operands point at other instructions by **index** into the owning
//! instruction list, so instructions can be inserted or resized without re-resolving targets.
//! Byte offsets are recomputed by the encoder when a body is serialized.
//!
//! # Key Components
//!
//! - [`Instruction`] - an opcode together with its operand
//! - [`Operand`] / [`Immediate`] - typed operand values
//! - [`OperandType`] - inline operand layout of an opcode
//! - [`FlowType`] - control-flow classification of an opcode
//!
//! # Examples
//!
//! ```rust
//! use cilpatch::assembly::{Instruction, OpCode, Operand};
//! use cilpatch::metadata::token::Token;
//!
//! let call = Instruction::call(Token::new(0x0A000001));
//! assert_eq!(call.opcode, OpCode::Call);
//! assert_eq!(call.size(), 5);
//! assert!(call.is_call_to(Token::new(0x0A000001)));
//!
//! let branch = Instruction::branch(OpCode::BrS, 3);
//! assert_eq!(branch.operand, Operand::Target(3));
//! ```

use std::fmt;

use crate::{assembly::opcodes::OpCode, metadata::token::Token};

/// Layout of the inline operand that follows an opcode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperandType {
    /// No operand
    None,
    /// Signed 8-bit immediate (`ldc.i4.s`)
    Int8,
    /// Unsigned 8-bit index (`ldarg.s`, `ldloc.s`, `unaligned.`)
    UInt8,
    /// Unsigned 16-bit index (`ldarg`, `ldloc`, `stloc`)
    UInt16,
    /// Signed 32-bit immediate (`ldc.i4`)
    Int32,
    /// Signed 64-bit immediate (`ldc.i8`)
    Int64,
    /// 32-bit float (`ldc.r4`)
    Float32,
    /// 64-bit float (`ldc.r8`)
    Float64,
    /// Metadata token
    Token,
    /// Signed 8-bit branch offset
    ShortBranch,
    /// Signed 32-bit branch offset
    Branch,
    /// Jump table: `u32` count followed by `count` signed 32-bit offsets
    Switch,
}

impl OperandType {
    /// Encoded size of the operand in bytes; `None` for the variable-length switch table
    #[must_use]
    pub const fn size(self) -> Option<usize> {
        match self {
            OperandType::None => Some(0),
            OperandType::Int8 | OperandType::UInt8 | OperandType::ShortBranch => Some(1),
            OperandType::UInt16 => Some(2),
            OperandType::Int32
            | OperandType::Float32
            | OperandType::Token
            | OperandType::Branch => Some(4),
            OperandType::Int64 | OperandType::Float64 => Some(8),
            OperandType::Switch => None,
        }
    }
}

/// How an instruction affects control flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowType {
    /// Falls through to the next instruction
    Sequential,
    /// Branches or falls through depending on a condition
    ConditionalBranch,
    /// Always transfers control to its target
    UnconditionalBranch,
    /// Calls another method and continues afterwards
    Call,
    /// Returns from the method
    Return,
    /// Multi-way branch through a jump table
    Switch,
    /// Raises an exception
    Throw,
    /// Ends a finally/fault/filter block
    EndFinally,
    /// Leaves a protected region
    Leave,
}

/// Numeric immediate operand.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Immediate {
    /// Signed 8-bit value
    Int8(i8),
    /// Unsigned 8-bit value
    UInt8(u8),
    /// Unsigned 16-bit value
    UInt16(u16),
    /// Signed 32-bit value
    Int32(i32),
    /// Signed 64-bit value
    Int64(i64),
    /// 32-bit float
    Float32(f32),
    /// 64-bit float
    Float64(f64),
}

impl Immediate {
    /// Returns the value widened to `i64` for the integer variants
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Immediate::Int8(v) => Some(i64::from(v)),
            Immediate::UInt8(v) => Some(i64::from(v)),
            Immediate::UInt16(v) => Some(i64::from(v)),
            Immediate::Int32(v) => Some(i64::from(v)),
            Immediate::Int64(v) => Some(v),
            Immediate::Float32(_) | Immediate::Float64(_) => None,
        }
    }

    fn matches(&self, operand_type: OperandType) -> bool {
        matches!(
            (self, operand_type),
            (Immediate::Int8(_), OperandType::Int8)
                | (Immediate::UInt8(_), OperandType::UInt8)
                | (Immediate::UInt16(_), OperandType::UInt16)
                | (Immediate::Int32(_), OperandType::Int32)
                | (Immediate::Int64(_), OperandType::Int64)
                | (Immediate::Float32(_), OperandType::Float32)
                | (Immediate::Float64(_), OperandType::Float64)
        )
    }
}

impl fmt::Display for Immediate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Immediate::Int8(v) => write!(f, "{v}"),
            Immediate::UInt8(v) => write!(f, "{v}"),
            Immediate::UInt16(v) => write!(f, "{v}"),
            Immediate::Int32(v) => write!(f, "{v}"),
            Immediate::Int64(v) => write!(f, "{v}"),
            Immediate::Float32(v) => write!(f, "{v}"),
            Immediate::Float64(v) => write!(f, "{v}"),
        }
    }
}

/// Operand of an instruction.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    /// No operand
    None,
    /// Numeric immediate or local/argument index
    Immediate(Immediate),
    /// Metadata token
    Token(Token),
    /// Index of the branch target instruction
    Target(usize),
    /// Indices of the switch target instructions
    Switch(Vec<usize>),
}

/// A single editable CIL instruction.
#[derive(Clone, Debug, PartialEq)]
pub struct Instruction {
    /// The opcode
    pub opcode: OpCode,
    /// The inline operand, shaped according to [`OpCode::operand_type`]
    pub operand: Operand,
}

impl Instruction {
    /// Creates an instruction without operand
    #[must_use]
    pub fn new(opcode: OpCode) -> Self {
        Instruction {
            opcode,
            operand: Operand::None,
        }
    }

    /// Creates an instruction with the given operand
    #[must_use]
    pub fn with_operand(opcode: OpCode, operand: Operand) -> Self {
        Instruction { opcode, operand }
    }

    /// Creates a `call` to the method identified by `token`
    #[must_use]
    pub fn call(token: Token) -> Self {
        Instruction::with_operand(OpCode::Call, Operand::Token(token))
    }

    /// Creates a branch instruction targeting the instruction at `target`
    #[must_use]
    pub fn branch(opcode: OpCode, target: usize) -> Self {
        Instruction::with_operand(opcode, Operand::Target(target))
    }

    /// Returns true if this is a `call` whose operand is `token`
    #[must_use]
    pub fn is_call_to(&self, token: Token) -> bool {
        self.opcode == OpCode::Call && self.operand == Operand::Token(token)
    }

    /// Returns true for `ret`
    #[must_use]
    pub fn is_return(&self) -> bool {
        self.opcode == OpCode::Ret
    }

    /// Encoded size of the instruction in bytes
    #[must_use]
    pub fn size(&self) -> usize {
        let operand_size = match (&self.operand, self.opcode.operand_type().size()) {
            (Operand::Switch(targets), None) => 4 + 4 * targets.len(),
            (_, Some(size)) => size,
            (_, None) => 4,
        };
        self.opcode.size() + operand_size
    }

    /// Indices of all instructions this one may transfer control to
    #[must_use]
    pub fn targets(&self) -> Vec<usize> {
        match &self.operand {
            Operand::Target(target) => vec![*target],
            Operand::Switch(targets) => targets.clone(),
            _ => Vec::new(),
        }
    }

    /// Applies `f` to every branch/switch target index of this instruction
    pub fn remap_targets(&mut self, mut f: impl FnMut(usize) -> usize) {
        match &mut self.operand {
            Operand::Target(target) => *target = f(*target),
            Operand::Switch(targets) => {
                for target in targets.iter_mut() {
                    *target = f(*target);
                }
            }
            _ => {}
        }
    }

    /// Returns true if the operand has the shape the opcode expects
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        match (self.opcode.operand_type(), &self.operand) {
            (OperandType::None, Operand::None)
            | (OperandType::Token, Operand::Token(_))
            | (OperandType::ShortBranch | OperandType::Branch, Operand::Target(_))
            | (OperandType::Switch, Operand::Switch(_)) => true,
            (expected, Operand::Immediate(value)) => value.matches(expected),
            _ => false,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        match &self.operand {
            Operand::None => Ok(()),
            Operand::Immediate(value) => write!(f, " {value}"),
            Operand::Token(token) => write!(f, " {token}"),
            Operand::Target(target) => write!(f, " #{target}"),
            Operand::Switch(targets) => {
                let list: Vec<String> = targets.iter().map(|t| format!("#{t}")).collect();
                write!(f, " ({})", list.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        assert_eq!(Instruction::new(OpCode::Ret).size(), 1);
        assert_eq!(Instruction::new(OpCode::Ceq).size(), 2);
        assert_eq!(Instruction::branch(OpCode::BrS, 0).size(), 2);
        assert_eq!(Instruction::branch(OpCode::Br, 0).size(), 5);
        assert_eq!(Instruction::call(Token::new(0x0A000001)).size(), 5);
        assert_eq!(
            Instruction::with_operand(OpCode::Ldarg, Operand::Immediate(Immediate::UInt16(4)))
                .size(),
            4
        );
        assert_eq!(
            Instruction::with_operand(OpCode::Switch, Operand::Switch(vec![1, 2, 3])).size(),
            17
        );
        assert_eq!(
            Instruction::with_operand(OpCode::LdcR8, Operand::Immediate(Immediate::Float64(1.0)))
                .size(),
            9
        );
    }

    #[test]
    fn call_detection() {
        let call = Instruction::call(Token::new(0x0A000002));
        assert!(call.is_call_to(Token::new(0x0A000002)));
        assert!(!call.is_call_to(Token::new(0x0A000003)));

        let callvirt =
            Instruction::with_operand(OpCode::Callvirt, Operand::Token(Token::new(0x0A000002)));
        assert!(!callvirt.is_call_to(Token::new(0x0A000002)));
    }

    #[test]
    fn remap_targets() {
        let mut branch = Instruction::branch(OpCode::Brtrue, 4);
        branch.remap_targets(|t| t + 1);
        assert_eq!(branch.targets(), vec![5]);

        let mut switch = Instruction::with_operand(OpCode::Switch, Operand::Switch(vec![1, 7]));
        switch.remap_targets(|t| if t > 3 { t + 1 } else { t });
        assert_eq!(switch.targets(), vec![1, 8]);

        let mut plain = Instruction::new(OpCode::Nop);
        plain.remap_targets(|t| t + 1);
        assert!(plain.targets().is_empty());
    }

    #[test]
    fn well_formedness() {
        assert!(Instruction::new(OpCode::Nop).is_well_formed());
        assert!(Instruction::branch(OpCode::Leave, 2).is_well_formed());
        assert!(
            Instruction::with_operand(OpCode::LdcI4S, Operand::Immediate(Immediate::Int8(-3)))
                .is_well_formed()
        );
        assert!(
            !Instruction::with_operand(OpCode::LdcI4S, Operand::Immediate(Immediate::Int32(-3)))
                .is_well_formed()
        );
        assert!(!Instruction::new(OpCode::Call).is_well_formed());
        assert!(!Instruction::branch(OpCode::Ret, 0).is_well_formed());
    }

    #[test]
    fn display() {
        assert_eq!(
            Instruction::call(Token::new(0x0A000001)).to_string(),
            "call 0x0a000001"
        );
        assert_eq!(Instruction::branch(OpCode::BneUnS, 3).to_string(), "bne.un.s #3");
        assert_eq!(
            Instruction::with_operand(OpCode::Switch, Operand::Switch(vec![0, 2])).to_string(),
            "switch (#0, #2)"
        );
    }
}
