//! CIL bytecode decoding into editable instruction lists.
//!
//! Decoding happens in two passes. The first pass walks the byte stream, decodes every opcode
//! and operand and records the byte offset of each instruction. The second pass turns the
//! relative branch and switch offsets into indices of the target instructions. A branch that
//! lands between two instructions or outside the body is reported as malformed.
//!
//! # Key Components
//!
//! - [`crate::assembly::decode_stream`] - whole method body decoding
//! - [`crate::assembly::index_of_offset`] - byte offset to instruction index lookup
//!
//! # Examples
//!
//! ```rust
//! use cilpatch::assembly::{decode_stream, OpCode, Operand};
//!
//! // brfalse.s +1; nop; ret
//! let (instructions, offsets) = decode_stream(&[0x2C, 0x01, 0x00, 0x2A])?;
//! assert_eq!(instructions.len(), 3);
//! assert_eq!(instructions[0].opcode, OpCode::BrfalseS);
//! assert_eq!(instructions[0].operand, Operand::Target(2));
//! assert_eq!(offsets, vec![0, 2, 3, 4]);
//! # Ok::<(), cilpatch::Error>(())
//! ```

use crate::{
    assembly::{
        instruction::{Immediate, Instruction, Operand, OperandType},
        opcodes::{OpCode, PREFIX_FE},
    },
    file::io::read_le_at,
    metadata::token::Token,
    Error, Result,
};

/// Operand as read from the byte stream, before branch offsets are bound to instructions.
enum RawOperand {
    Ready(Operand),
    Branch(i64),
    Switch(Vec<i64>),
}

/// Decodes a complete CIL byte stream.
///
/// Returns the decoded instructions together with the byte offset of every instruction. The
/// offset list has one extra trailing entry holding the total code size, so that the end of
/// the last instruction (used by exception handler ranges) can be looked up as well.
///
/// # Errors
///
/// Returns [`crate::Error::UnknownOpcode`] for reserved opcodes, [`crate::Error::OutOfBounds`]
/// for truncated operands and [`crate::Error::Malformed`] for branches that do not land on an
/// instruction boundary.
pub fn decode_stream(code: &[u8]) -> Result<(Vec<Instruction>, Vec<u32>)> {
    let mut raw = Vec::new();
    let mut offsets = Vec::new();
    let mut cursor = 0_usize;

    while cursor < code.len() {
        offsets.push(to_offset(cursor)?);
        raw.push(decode_instruction(code, &mut cursor)?);
    }
    offsets.push(to_offset(cursor)?);

    let count = raw.len();
    let mut instructions = Vec::with_capacity(count);
    for (index, (opcode, operand)) in raw.into_iter().enumerate() {
        let operand = match operand {
            RawOperand::Ready(operand) => operand,
            RawOperand::Branch(target) => {
                Operand::Target(branch_target(&offsets, count, index, target)?)
            }
            RawOperand::Switch(targets) => Operand::Switch(
                targets
                    .into_iter()
                    .map(|target| branch_target(&offsets, count, index, target))
                    .collect::<Result<Vec<_>>>()?,
            ),
        };
        instructions.push(Instruction::with_operand(opcode, operand));
    }

    Ok((instructions, offsets))
}

/// Looks up the index of the instruction starting at `offset`.
///
/// `offsets` is the list produced by [`decode_stream`] or the encoder layout, including the
/// trailing end offset; looking up the end offset yields the instruction count.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if no instruction starts at `offset`.
pub fn index_of_offset(offsets: &[u32], offset: u32) -> Result<usize> {
    offsets
        .binary_search(&offset)
        .map_err(|_| malformed_error!("Offset 0x{:X} is not an instruction boundary", offset))
}

fn branch_target(offsets: &[u32], count: usize, index: usize, target: i64) -> Result<usize> {
    let offset = u32::try_from(target).map_err(|_| {
        malformed_error!(
            "Branch at instruction {} targets offset {} outside of the body",
            index,
            target
        )
    })?;
    let target_index = index_of_offset(offsets, offset)?;
    if target_index >= count {
        return Err(malformed_error!(
            "Branch at instruction {} targets the end of the body",
            index
        ));
    }
    Ok(target_index)
}

fn to_offset(cursor: usize) -> Result<u32> {
    u32::try_from(cursor).map_err(|_| malformed_error!("Method body exceeds 4 GiB"))
}

fn decode_instruction(code: &[u8], cursor: &mut usize) -> Result<(OpCode, RawOperand)> {
    let first_byte = read_le_at::<u8>(code, cursor)?;
    let value = if first_byte == PREFIX_FE {
        let second_byte = read_le_at::<u8>(code, cursor)?;
        u16::from_be_bytes([PREFIX_FE, second_byte])
    } else {
        u16::from(first_byte)
    };

    let opcode = OpCode::from_code(value).ok_or(Error::UnknownOpcode(value))?;

    let operand = match opcode.operand_type() {
        OperandType::None => RawOperand::Ready(Operand::None),
        OperandType::Int8 => {
            RawOperand::Ready(Operand::Immediate(Immediate::Int8(read_le_at(code, cursor)?)))
        }
        OperandType::UInt8 => {
            RawOperand::Ready(Operand::Immediate(Immediate::UInt8(read_le_at(code, cursor)?)))
        }
        OperandType::UInt16 => RawOperand::Ready(Operand::Immediate(Immediate::UInt16(
            read_le_at(code, cursor)?,
        ))),
        OperandType::Int32 => {
            RawOperand::Ready(Operand::Immediate(Immediate::Int32(read_le_at(code, cursor)?)))
        }
        OperandType::Int64 => {
            RawOperand::Ready(Operand::Immediate(Immediate::Int64(read_le_at(code, cursor)?)))
        }
        OperandType::Float32 => RawOperand::Ready(Operand::Immediate(Immediate::Float32(
            read_le_at(code, cursor)?,
        ))),
        OperandType::Float64 => RawOperand::Ready(Operand::Immediate(Immediate::Float64(
            read_le_at(code, cursor)?,
        ))),
        OperandType::Token => {
            RawOperand::Ready(Operand::Token(Token::new(read_le_at::<u32>(code, cursor)?)))
        }
        OperandType::ShortBranch => {
            let delta = read_le_at::<i8>(code, cursor)?;
            RawOperand::Branch(*cursor as i64 + i64::from(delta))
        }
        OperandType::Branch => {
            let delta = read_le_at::<i32>(code, cursor)?;
            RawOperand::Branch(*cursor as i64 + i64::from(delta))
        }
        OperandType::Switch => {
            let case_count = read_le_at::<u32>(code, cursor)? as usize;
            let table_size = case_count
                .checked_mul(4)
                .ok_or_else(|| malformed_error!("Switch table too large: {}", case_count))?;
            if cursor.saturating_add(table_size) > code.len() {
                return Err(Error::OutOfBounds);
            }

            let base = (*cursor + table_size) as i64;
            let mut targets = Vec::with_capacity(case_count);
            for _ in 0..case_count {
                targets.push(base + i64::from(read_le_at::<i32>(code, cursor)?));
            }
            RawOperand::Switch(targets)
        }
    };

    Ok((opcode, operand))
}
