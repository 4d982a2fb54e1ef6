//! Conversion between compact ("macro") and canonical instruction forms.
//!
//! CIL has several families of instructions with a compact encoding: `ldarg.0` for `ldarg 0`,
//! `ldc.i4.s 5` for `ldc.i4 5`, `br.s` for `br`, and so on. Editing a body is simplest on the
//! canonical long forms because their operands can address any index and any branch distance.
//! [`simplify_macros`] expands every compact form; [`optimize_macros`] picks the most compact
//! legal encoding again once editing is done.
//!
//! Branch shrinking is iterative: converting one branch to its short form moves everything
//! behind it closer, which can bring further branches into short range. The loop stops once a
//! pass finds nothing left to shrink.
//!
//! # Examples
//!
//! ```rust
//! use cilpatch::assembly::{optimize_macros, simplify_macros, Instruction, OpCode};
//!
//! let mut instructions = vec![
//!     Instruction::branch(OpCode::BrS, 2),
//!     Instruction::new(OpCode::Ldarg0),
//!     Instruction::new(OpCode::Ret),
//! ];
//!
//! simplify_macros(&mut instructions);
//! assert_eq!(instructions[0].opcode, OpCode::Br);
//! assert_eq!(instructions[1].opcode, OpCode::Ldarg);
//!
//! optimize_macros(&mut instructions)?;
//! assert_eq!(instructions[0].opcode, OpCode::BrS);
//! assert_eq!(instructions[1].opcode, OpCode::Ldarg0);
//! # Ok::<(), cilpatch::Error>(())
//! ```

use crate::{
    assembly::{
        encoder::{layout, relative_offset},
        instruction::{Immediate, Instruction, Operand},
        opcodes::OpCode,
    },
    Result,
};

/// Short and long forms of every branch that has both
const BRANCH_FORMS: [(OpCode, OpCode); 14] = [
    (OpCode::BrS, OpCode::Br),
    (OpCode::BrfalseS, OpCode::Brfalse),
    (OpCode::BrtrueS, OpCode::Brtrue),
    (OpCode::BeqS, OpCode::Beq),
    (OpCode::BgeS, OpCode::Bge),
    (OpCode::BgtS, OpCode::Bgt),
    (OpCode::BleS, OpCode::Ble),
    (OpCode::BltS, OpCode::Blt),
    (OpCode::BneUnS, OpCode::BneUn),
    (OpCode::BgeUnS, OpCode::BgeUn),
    (OpCode::BgtUnS, OpCode::BgtUn),
    (OpCode::BleUnS, OpCode::BleUn),
    (OpCode::BltUnS, OpCode::BltUn),
    (OpCode::LeaveS, OpCode::Leave),
];

/// Size difference between a long (5 byte) and a short (2 byte) branch
const BRANCH_SHRINK: i64 = 3;

/// Returns the long form of a short branch opcode
#[must_use]
pub fn long_branch_form(opcode: OpCode) -> Option<OpCode> {
    BRANCH_FORMS
        .iter()
        .find(|(short, _)| *short == opcode)
        .map(|(_, long)| *long)
}

/// Returns the short form of a long branch opcode
#[must_use]
pub fn short_branch_form(opcode: OpCode) -> Option<OpCode> {
    BRANCH_FORMS
        .iter()
        .find(|(_, long)| *long == opcode)
        .map(|(short, _)| *short)
}

/// Expands every compact instruction form into its canonical long form.
///
/// Branch targets are indices and therefore survive the conversion unchanged.
pub fn simplify_macros(instructions: &mut [Instruction]) {
    for instruction in instructions.iter_mut() {
        if let Some(long) = long_branch_form(instruction.opcode) {
            instruction.opcode = long;
            continue;
        }

        if let Some((opcode, index)) = expand_indexed(instruction) {
            *instruction =
                Instruction::with_operand(opcode, Operand::Immediate(Immediate::UInt16(index)));
            continue;
        }

        if let Some(value) = expand_constant(instruction) {
            *instruction =
                Instruction::with_operand(OpCode::LdcI4, Operand::Immediate(Immediate::Int32(value)));
        }
    }
}

/// Picks the most compact legal encoding for every instruction.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if a branch targets an instruction outside the list.
pub fn optimize_macros(instructions: &mut [Instruction]) -> Result<()> {
    for instruction in instructions.iter_mut() {
        compact_indexed(instruction);
        compact_constant(instruction);
    }
    optimize_branches(instructions)
}

/// Re-selects branch forms: every branch is widened, then shrunk again wherever the short form
/// can reach its target.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if a branch targets an instruction outside the list.
pub fn optimize_branches(instructions: &mut [Instruction]) -> Result<()> {
    for instruction in instructions.iter_mut() {
        if let Some(long) = long_branch_form(instruction.opcode) {
            instruction.opcode = long;
        }
    }

    loop {
        let shrinkable = find_shrinkable_branches(instructions)?;
        if shrinkable.is_empty() {
            return Ok(());
        }

        for index in shrinkable {
            if let Some(short) = short_branch_form(instructions[index].opcode) {
                instructions[index].opcode = short;
            }
        }
    }
}

/// Finds long branches whose distance would fit a signed byte in short form.
///
/// The distance is computed against the current layout with the branch itself already
/// shrunk, which is exact for the branch under test and conservative with respect to all
/// other branches that shrink in the same pass.
fn find_shrinkable_branches(instructions: &[Instruction]) -> Result<Vec<usize>> {
    let offsets = layout(instructions)?;
    let count = instructions.len();
    let mut shrinkable = Vec::new();

    for (index, instruction) in instructions.iter().enumerate() {
        if short_branch_form(instruction.opcode).is_none() {
            continue;
        }
        let Operand::Target(target) = instruction.operand else {
            continue;
        };

        let short_end = i64::from(offsets[index]) + 2;
        let mut delta = relative_offset(&offsets, count, index, target, short_end)?;
        if target > index {
            delta -= BRANCH_SHRINK;
        }

        if i8::try_from(delta).is_ok() {
            shrinkable.push(index);
        }
    }

    Ok(shrinkable)
}

/// Long opcode and index for the argument/local macro forms
fn expand_indexed(instruction: &Instruction) -> Option<(OpCode, u16)> {
    let short_index = || match instruction.operand {
        Operand::Immediate(Immediate::UInt8(index)) => Some(u16::from(index)),
        _ => None,
    };

    match instruction.opcode {
        OpCode::Ldarg0 => Some((OpCode::Ldarg, 0)),
        OpCode::Ldarg1 => Some((OpCode::Ldarg, 1)),
        OpCode::Ldarg2 => Some((OpCode::Ldarg, 2)),
        OpCode::Ldarg3 => Some((OpCode::Ldarg, 3)),
        OpCode::Ldloc0 => Some((OpCode::Ldloc, 0)),
        OpCode::Ldloc1 => Some((OpCode::Ldloc, 1)),
        OpCode::Ldloc2 => Some((OpCode::Ldloc, 2)),
        OpCode::Ldloc3 => Some((OpCode::Ldloc, 3)),
        OpCode::Stloc0 => Some((OpCode::Stloc, 0)),
        OpCode::Stloc1 => Some((OpCode::Stloc, 1)),
        OpCode::Stloc2 => Some((OpCode::Stloc, 2)),
        OpCode::Stloc3 => Some((OpCode::Stloc, 3)),
        OpCode::LdargS => short_index().map(|index| (OpCode::Ldarg, index)),
        OpCode::LdargaS => short_index().map(|index| (OpCode::Ldarga, index)),
        OpCode::StargS => short_index().map(|index| (OpCode::Starg, index)),
        OpCode::LdlocS => short_index().map(|index| (OpCode::Ldloc, index)),
        OpCode::LdlocaS => short_index().map(|index| (OpCode::Ldloca, index)),
        OpCode::StlocS => short_index().map(|index| (OpCode::Stloc, index)),
        _ => None,
    }
}

/// Constant pushed by the `ldc.i4` macro forms
fn expand_constant(instruction: &Instruction) -> Option<i32> {
    match instruction.opcode {
        OpCode::LdcI4M1 => Some(-1),
        OpCode::LdcI40 => Some(0),
        OpCode::LdcI41 => Some(1),
        OpCode::LdcI42 => Some(2),
        OpCode::LdcI43 => Some(3),
        OpCode::LdcI44 => Some(4),
        OpCode::LdcI45 => Some(5),
        OpCode::LdcI46 => Some(6),
        OpCode::LdcI47 => Some(7),
        OpCode::LdcI48 => Some(8),
        OpCode::LdcI4S => match instruction.operand {
            Operand::Immediate(Immediate::Int8(value)) => Some(i32::from(value)),
            _ => None,
        },
        _ => None,
    }
}

fn compact_indexed(instruction: &mut Instruction) {
    let Operand::Immediate(Immediate::UInt16(index)) = instruction.operand else {
        return;
    };

    let fixed = match (instruction.opcode, index) {
        (OpCode::Ldarg, 0) => Some(OpCode::Ldarg0),
        (OpCode::Ldarg, 1) => Some(OpCode::Ldarg1),
        (OpCode::Ldarg, 2) => Some(OpCode::Ldarg2),
        (OpCode::Ldarg, 3) => Some(OpCode::Ldarg3),
        (OpCode::Ldloc, 0) => Some(OpCode::Ldloc0),
        (OpCode::Ldloc, 1) => Some(OpCode::Ldloc1),
        (OpCode::Ldloc, 2) => Some(OpCode::Ldloc2),
        (OpCode::Ldloc, 3) => Some(OpCode::Ldloc3),
        (OpCode::Stloc, 0) => Some(OpCode::Stloc0),
        (OpCode::Stloc, 1) => Some(OpCode::Stloc1),
        (OpCode::Stloc, 2) => Some(OpCode::Stloc2),
        (OpCode::Stloc, 3) => Some(OpCode::Stloc3),
        _ => None,
    };
    if let Some(opcode) = fixed {
        *instruction = Instruction::new(opcode);
        return;
    }

    let Ok(short_index) = u8::try_from(index) else {
        return;
    };
    let short = match instruction.opcode {
        OpCode::Ldarg => OpCode::LdargS,
        OpCode::Ldarga => OpCode::LdargaS,
        OpCode::Starg => OpCode::StargS,
        OpCode::Ldloc => OpCode::LdlocS,
        OpCode::Ldloca => OpCode::LdlocaS,
        OpCode::Stloc => OpCode::StlocS,
        _ => return,
    };
    *instruction =
        Instruction::with_operand(short, Operand::Immediate(Immediate::UInt8(short_index)));
}

fn compact_constant(instruction: &mut Instruction) {
    if instruction.opcode != OpCode::LdcI4 {
        return;
    }
    let Operand::Immediate(Immediate::Int32(value)) = instruction.operand else {
        return;
    };

    let fixed = match value {
        -1 => Some(OpCode::LdcI4M1),
        0 => Some(OpCode::LdcI40),
        1 => Some(OpCode::LdcI41),
        2 => Some(OpCode::LdcI42),
        3 => Some(OpCode::LdcI43),
        4 => Some(OpCode::LdcI44),
        5 => Some(OpCode::LdcI45),
        6 => Some(OpCode::LdcI46),
        7 => Some(OpCode::LdcI47),
        8 => Some(OpCode::LdcI48),
        _ => None,
    };
    if let Some(opcode) = fixed {
        *instruction = Instruction::new(opcode);
    } else if let Ok(short) = i8::try_from(value) {
        *instruction =
            Instruction::with_operand(OpCode::LdcI4S, Operand::Immediate(Immediate::Int8(short)));
    }
}
