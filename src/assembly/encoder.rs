//! CIL bytecode encoding of editable instruction lists.
//!
//! The encoder lays the instructions out sequentially, computes the byte offset of every
//! instruction and then writes each opcode and operand. Branch targets stored as instruction
//! indices are turned back into offsets relative to the end of the branch instruction, which is
//! how ECMA-335 encodes them.
//!
//! The encoder never changes instruction forms. A short branch whose distance no longer fits a
//! signed byte is an error; callers run [`crate::assembly::optimize_macros`] first to pick
//! legal forms.
//!
//! # Examples
//!
//! ```rust
//! use cilpatch::assembly::{encode, Instruction, OpCode};
//!
//! let code = encode(&[
//!     Instruction::branch(OpCode::BrfalseS, 2),
//!     Instruction::new(OpCode::Nop),
//!     Instruction::new(OpCode::Ret),
//! ])?;
//! assert_eq!(code, vec![0x2C, 0x01, 0x00, 0x2A]);
//! # Ok::<(), cilpatch::Error>(())
//! ```

use crate::{
    assembly::{
        instruction::{Immediate, Instruction, Operand, OperandType},
        opcodes::PREFIX_FE,
    },
    file::io::push_le,
    Error, Result,
};

/// Computes the byte offset of every instruction.
///
/// The result has one trailing entry with the total code size, mirroring
/// [`crate::assembly::decode_stream`].
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if the code would exceed the 32-bit offset space.
pub fn layout(instructions: &[Instruction]) -> Result<Vec<u32>> {
    let mut offsets = Vec::with_capacity(instructions.len() + 1);
    let mut position = 0_u32;
    for instruction in instructions {
        offsets.push(position);
        let size = u32::try_from(instruction.size())
            .map_err(|_| malformed_error!("Instruction too large: {}", instruction))?;
        position = position
            .checked_add(size)
            .ok_or_else(|| malformed_error!("Method body exceeds 4 GiB"))?;
    }
    offsets.push(position);
    Ok(offsets)
}

/// Encodes an instruction list into CIL bytecode.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] for operands that do not match their opcode or targets
/// outside the list, and [`crate::Error::BranchOutOfRange`] for short branches that cannot
/// reach their target.
pub fn encode(instructions: &[Instruction]) -> Result<Vec<u8>> {
    let offsets = layout(instructions)?;
    let mut code = Vec::with_capacity(offsets[offsets.len() - 1] as usize);

    for (index, instruction) in instructions.iter().enumerate() {
        if !instruction.is_well_formed() {
            return Err(malformed_error!(
                "Operand does not match opcode at instruction {}: {}",
                index,
                instruction
            ));
        }

        let value = instruction.opcode.code();
        if value > 0xFF {
            code.push(PREFIX_FE);
        }
        code.push((value & 0xFF) as u8);

        let next = i64::from(offsets[index + 1]);
        match &instruction.operand {
            Operand::None => {}
            Operand::Immediate(immediate) => write_immediate(&mut code, *immediate),
            Operand::Token(token) => push_le(&mut code, token.value()),
            Operand::Target(target) => {
                let delta = relative_offset(&offsets, instructions.len(), index, *target, next)?;
                if instruction.opcode.operand_type() == OperandType::ShortBranch {
                    let short = i8::try_from(delta)
                        .map_err(|_| Error::BranchOutOfRange { index, offset: delta })?;
                    push_le(&mut code, short);
                } else {
                    push_le(&mut code, to_i32(delta, index)?);
                }
            }
            Operand::Switch(targets) => {
                let count = u32::try_from(targets.len())
                    .map_err(|_| malformed_error!("Switch table too large at {}", index))?;
                push_le(&mut code, count);
                for target in targets {
                    let delta =
                        relative_offset(&offsets, instructions.len(), index, *target, next)?;
                    push_le(&mut code, to_i32(delta, index)?);
                }
            }
        }
    }

    Ok(code)
}

/// Distance from the end of the instruction at `index` to the start of `target`.
pub(crate) fn relative_offset(
    offsets: &[u32],
    count: usize,
    index: usize,
    target: usize,
    next: i64,
) -> Result<i64> {
    if target >= count {
        return Err(malformed_error!(
            "Instruction {} targets #{} outside of a body with {} instructions",
            index,
            target,
            count
        ));
    }
    Ok(i64::from(offsets[target]) - next)
}

fn to_i32(delta: i64, index: usize) -> Result<i32> {
    i32::try_from(delta).map_err(|_| Error::BranchOutOfRange {
        index,
        offset: delta,
    })
}

fn write_immediate(code: &mut Vec<u8>, immediate: Immediate) {
    match immediate {
        Immediate::Int8(v) => push_le(code, v),
        Immediate::UInt8(v) => push_le(code, v),
        Immediate::UInt16(v) => push_le(code, v),
        Immediate::Int32(v) => push_le(code, v),
        Immediate::Int64(v) => push_le(code, v),
        Immediate::Float32(v) => push_le(code, v),
        Immediate::Float64(v) => push_le(code, v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::{decode_stream, OpCode},
        metadata::token::Token,
    };

    #[test]
    fn test_simple_instruction_encoding() -> Result<()> {
        let code = encode(&[Instruction::new(OpCode::Nop), Instruction::new(OpCode::Ret)])?;
        assert_eq!(code, vec![0x00, 0x2A]);
        Ok(())
    }

    #[test]
    fn test_instruction_with_operands() -> Result<()> {
        let code = encode(&[
            Instruction::with_operand(OpCode::LdcI4S, Operand::Immediate(Immediate::Int8(42))),
            Instruction::with_operand(OpCode::Ldarg, Operand::Immediate(Immediate::UInt16(300))),
            Instruction::call(Token::new(0x0A000001)),
            Instruction::new(OpCode::Ret),
        ])?;
        assert_eq!(
            code,
            vec![0x1F, 0x2A, 0xFE, 0x09, 0x2C, 0x01, 0x28, 0x01, 0x00, 0x00, 0x0A, 0x2A]
        );
        Ok(())
    }

    #[test]
    fn test_backward_branch() -> Result<()> {
        let code = encode(&[Instruction::new(OpCode::Nop), Instruction::branch(OpCode::BrS, 0)])?;
        assert_eq!(code, vec![0x00, 0x2B, 0xFD]);
        Ok(())
    }

    #[test]
    fn test_long_branch() -> Result<()> {
        let code = encode(&[
            Instruction::branch(OpCode::Br, 2),
            Instruction::new(OpCode::Nop),
            Instruction::new(OpCode::Ret),
        ])?;
        assert_eq!(code, vec![0x38, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2A]);
        Ok(())
    }

    #[test]
    fn test_switch() -> Result<()> {
        let code = encode(&[
            Instruction::with_operand(OpCode::Switch, Operand::Switch(vec![1, 2])),
            Instruction::new(OpCode::Nop),
            Instruction::new(OpCode::Ret),
        ])?;
        let (decoded, _) = decode_stream(&code)?;
        assert_eq!(decoded[0].operand, Operand::Switch(vec![1, 2]));
        Ok(())
    }

    #[test]
    fn test_short_branch_out_of_range() {
        let mut instructions = vec![Instruction::branch(OpCode::BrS, 201)];
        instructions.extend((0..200).map(|_| Instruction::new(OpCode::Nop)));
        instructions.push(Instruction::new(OpCode::Ret));

        let result = encode(&instructions);
        assert!(matches!(
            result,
            Err(Error::BranchOutOfRange {
                index: 0,
                offset: 200
            })
        ));
    }

    #[test]
    fn test_target_outside_body() {
        let result = encode(&[Instruction::branch(OpCode::Br, 5), Instruction::new(OpCode::Ret)]);
        assert!(matches!(result, Err(Error::Malformed { .. })));
    }

    #[test]
    fn test_mismatched_operand() {
        let result = encode(&[Instruction::with_operand(
            OpCode::Call,
            Operand::Immediate(Immediate::Int32(1)),
        )]);
        assert!(matches!(result, Err(Error::Malformed { .. })));
    }

    #[test]
    fn test_layout() -> Result<()> {
        let offsets = layout(&[
            Instruction::new(OpCode::Nop),
            Instruction::call(Token::new(0x06000001)),
            Instruction::new(OpCode::Ret),
        ])?;
        assert_eq!(offsets, vec![0, 1, 6, 7]);
        Ok(())
    }
}
