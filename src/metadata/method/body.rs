//! Representation, parsing and re-encoding of CIL method bodies.
//!
//! A [`MethodBody`] is the editable form of a method's implementation: header values, the
//! decoded instruction list and the exception handlers with index-based ranges. It is parsed
//! from the raw bytes at a method's RVA and encoded back after modification, choosing a tiny or
//! fat header and small or fat exception sections depending on what the content requires.
//!
//! # Examples
//!
//! ```rust
//! use cilpatch::assembly::{Instruction, OpCode};
//! use cilpatch::metadata::method::MethodBody;
//!
//! // tiny header, 2 bytes of code: nop; ret
//! let mut body = MethodBody::parse(&[0x0A, 0x00, 0x2A])?;
//! assert_eq!(body.instructions.len(), 2);
//!
//! body.insert_before(0, Instruction::new(OpCode::Nop))?;
//! assert_eq!(body.encode()?, vec![0x0E, 0x00, 0x00, 0x2A]);
//! # Ok::<(), cilpatch::Error>(())
//! ```
//!
//! # References
//! - ECMA-335 6th Edition, Partition II, Section 25.4 - Method Header Format

use crate::{
    assembly::{
        decode_stream, encode, index_of_offset, layout, optimize_macros, simplify_macros,
        Instruction,
    },
    file::io::{push_le, read_le, read_le_at},
    metadata::{
        method::{ExceptionHandler, ExceptionHandlerFlags, MethodBodyFlags, SectionFlags},
        token::Token,
    },
    Error::OutOfBounds,
    Result,
};

/// Size of a fat method header in bytes
const FAT_HEADER_SIZE: usize = 12;
/// Size of a fat header in 4-byte units, as stored in the upper nibble of the flags
const FAT_HEADER_DWORDS: u16 = 3;
/// Largest code size a tiny header can describe
const TINY_MAX_CODE: usize = 63;
/// Stack depth implied by a tiny header
const TINY_MAX_STACK: u16 = 8;
/// Size of a small exception clause
const SMALL_CLAUSE_SIZE: usize = 12;
/// Size of a fat exception clause
const FAT_CLAUSE_SIZE: usize = 24;
/// Size of an exception section header
const SECTION_HEADER_SIZE: usize = 4;

/// Exception clause with byte offsets, as stored in the method data section
struct RawClause {
    flags: ExceptionHandlerFlags,
    try_offset: u32,
    try_length: u32,
    handler_offset: u32,
    handler_length: u32,
    extra: u32,
}

/// Describes one method that has been compiled to CIL bytecode, in editable form.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodBody {
    /// Maximum number of items on the operand stack
    pub max_stack: u16,
    /// `MetaData` token for a signature describing the layout of the local variables for the method. 0 == no local variables
    pub local_var_sig_token: u32,
    /// Flag, indicating to call default constructor on all local variables
    pub init_locals: bool,
    /// The decoded instructions, branch targets bound to indices
    pub instructions: Vec<Instruction>,
    /// A list of exception handlers this method has
    pub exception_handlers: Vec<ExceptionHandler>,
}

impl MethodBody {
    /// Creates a body with a tiny-compatible header around `instructions`
    #[must_use]
    pub fn new(instructions: Vec<Instruction>) -> Self {
        MethodBody {
            max_stack: TINY_MAX_STACK,
            local_var_sig_token: 0,
            init_locals: false,
            instructions,
            exception_handlers: Vec::new(),
        }
    }

    /// Parses a method body from the bytes at its RVA.
    ///
    /// # Arguments
    /// * `data` - The byte slice starting with the method header
    ///
    /// # Errors
    /// Returns an error if the data is empty, out of bounds, or malformed.
    pub fn parse(data: &[u8]) -> Result<MethodBody> {
        if data.is_empty() {
            return Err(malformed_error!("Provided data for body parsing is empty"));
        }

        let first_byte = read_le::<u8>(data)?;
        match MethodBodyFlags::from_bits_truncate(u16::from(first_byte & 0b_00000011_u8)) {
            MethodBodyFlags::TINY_FORMAT => {
                let size_code = (first_byte >> 2) as usize;
                let code = data.get(1..=size_code).ok_or(OutOfBounds)?;
                let (instructions, _) = decode_stream(code)?;

                Ok(MethodBody::new(instructions))
            }
            MethodBodyFlags::FAT_FORMAT => {
                if data.len() < FAT_HEADER_SIZE {
                    return Err(OutOfBounds);
                }

                let first_duo = read_le::<u16>(data)?;
                let size_header = ((first_duo >> 12) * 4) as usize;
                let size_code = read_le::<u32>(&data[4..])? as usize;
                let code_end = size_header.checked_add(size_code).ok_or(OutOfBounds)?;
                let code = data.get(size_header..code_end).ok_or(OutOfBounds)?;

                let flags_header =
                    MethodBodyFlags::from_bits_truncate(first_duo & 0b_0000111111111111_u16);
                let (instructions, offsets) = decode_stream(code)?;

                // Exception Handling -> II.25.4.6
                let mut exception_handlers = Vec::new();
                if flags_header.contains(MethodBodyFlags::MORE_SECTS) {
                    for clause in read_sections(data, (code_end + 3) & !3)? {
                        exception_handlers.push(bind_clause(&clause, &offsets)?);
                    }
                }

                Ok(MethodBody {
                    max_stack: read_le::<u16>(&data[2..])?,
                    local_var_sig_token: read_le::<u32>(&data[8..])?,
                    init_locals: flags_header.contains(MethodBodyFlags::INIT_LOCALS),
                    instructions,
                    exception_handlers,
                })
            }
            _ => Err(malformed_error!(
                "MethodHeader is neither FAT nor TINY - {}",
                first_byte
            )),
        }
    }

    /// Encodes the body back into header, code and exception sections.
    ///
    /// A tiny header is used when the code is shorter than 64 bytes and the body has no locals,
    /// no exception handlers, no `init_locals` and a stack depth of at most 8.
    ///
    /// # Errors
    /// Returns an error if the instructions cannot be encoded or a handler range is invalid.
    // Tiny code sizes are bounded by TINY_MAX_CODE
    #[allow(clippy::cast_possible_truncation)]
    pub fn encode(&self) -> Result<Vec<u8>> {
        let code = encode(&self.instructions)?;

        let is_tiny = code.len() <= TINY_MAX_CODE
            && self.max_stack <= TINY_MAX_STACK
            && self.local_var_sig_token == 0
            && !self.init_locals
            && self.exception_handlers.is_empty();

        if is_tiny {
            let mut body = Vec::with_capacity(code.len() + 1);
            body.push(((code.len() as u8) << 2) | MethodBodyFlags::TINY_FORMAT.bits() as u8);
            body.extend_from_slice(&code);
            return Ok(body);
        }

        let mut flags = MethodBodyFlags::FAT_FORMAT;
        if !self.exception_handlers.is_empty() {
            flags |= MethodBodyFlags::MORE_SECTS;
        }
        if self.init_locals {
            flags |= MethodBodyFlags::INIT_LOCALS;
        }

        let code_size = u32::try_from(code.len())
            .map_err(|_| malformed_error!("Method body size exceeds u32 range"))?;

        let mut body = Vec::with_capacity(FAT_HEADER_SIZE + code.len());
        push_le(&mut body, flags.bits() | (FAT_HEADER_DWORDS << 12));
        push_le(&mut body, self.max_stack);
        push_le(&mut body, code_size);
        push_le(&mut body, self.local_var_sig_token);
        body.extend_from_slice(&code);

        if !self.exception_handlers.is_empty() {
            while body.len() % 4 != 0 {
                body.push(0x00);
            }
            self.write_exception_section(&mut body)?;
        }

        Ok(body)
    }

    /// Returns true if the body has no instructions
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Indices of all `ret` instructions, in ascending order
    #[must_use]
    pub fn return_indices(&self) -> Vec<usize> {
        self.instructions
            .iter()
            .enumerate()
            .filter(|(_, instruction)| instruction.is_return())
            .map(|(index, _)| index)
            .collect()
    }

    /// Expands all compact instruction forms, see [`crate::assembly::simplify_macros`]
    pub fn simplify_macros(&mut self) {
        simplify_macros(&mut self.instructions);
    }

    /// Selects the most compact legal instruction forms, see [`crate::assembly::optimize_macros`]
    ///
    /// # Errors
    /// Returns an error if a branch targets an instruction outside the body.
    pub fn optimize_macros(&mut self) -> Result<()> {
        optimize_macros(&mut self.instructions)
    }

    /// Inserts `instruction` at `index`, in front of the instruction currently there.
    ///
    /// Branches that targeted the displaced instruction keep targeting it, so control flow
    /// entering at `index` skips the new instruction.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `index` is past the end of the body.
    pub fn insert_before(&mut self, index: usize, instruction: Instruction) -> Result<()> {
        self.insert(index, instruction, |target| target >= index)
    }

    /// Inserts `instruction` at `index` and redirects every branch that targeted the displaced
    /// instruction to the new one.
    ///
    /// Exception handler ranges follow the same rules as [`MethodBody::insert_before`].
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `index` is past the end of the body.
    pub fn insert_before_redirect(&mut self, index: usize, instruction: Instruction) -> Result<()> {
        self.insert(index, instruction, |target| target > index)
    }

    fn insert(
        &mut self,
        index: usize,
        instruction: Instruction,
        shifts: impl Fn(usize) -> bool,
    ) -> Result<()> {
        if index > self.instructions.len() {
            return Err(malformed_error!(
                "Cannot insert at {} into a body of {} instructions",
                index,
                self.instructions.len()
            ));
        }

        for existing in &mut self.instructions {
            existing.remap_targets(|target| if shifts(target) { target + 1 } else { target });
        }
        for handler in &mut self.exception_handlers {
            handler.shift_for_insert(index);
        }

        self.instructions.insert(index, instruction);
        Ok(())
    }

    // Narrowing casts of small clauses are guarded by fits_small
    #[allow(clippy::cast_possible_truncation)]
    fn write_exception_section(&self, body: &mut Vec<u8>) -> Result<()> {
        let offsets = layout(&self.instructions)?;
        let clauses = self
            .exception_handlers
            .iter()
            .map(|handler| unbind_clause(handler, &offsets))
            .collect::<Result<Vec<_>>>()?;

        let small_size = SECTION_HEADER_SIZE + clauses.len() * SMALL_CLAUSE_SIZE;
        let fits_small = small_size <= usize::from(u8::MAX)
            && clauses.iter().all(|clause| {
                clause.try_offset <= u32::from(u16::MAX)
                    && clause.try_length <= u32::from(u8::MAX)
                    && clause.handler_offset <= u32::from(u16::MAX)
                    && clause.handler_length <= u32::from(u8::MAX)
            });

        if fits_small {
            body.push(SectionFlags::EHTABLE.bits());
            body.push(small_size as u8);
            push_le(body, 0_u16);
            for clause in &clauses {
                push_le(body, clause.flags.bits());
                push_le(body, clause.try_offset as u16);
                push_le(body, clause.try_length as u8);
                push_le(body, clause.handler_offset as u16);
                push_le(body, clause.handler_length as u8);
                push_le(body, clause.extra);
            }
        } else {
            let fat_size = SECTION_HEADER_SIZE + clauses.len() * FAT_CLAUSE_SIZE;
            let fat_size = u32::try_from(fat_size)
                .ok()
                .filter(|size| *size <= 0x00FF_FFFF)
                .ok_or_else(|| malformed_error!("Too many exception handlers: {}", clauses.len()))?;

            body.push((SectionFlags::EHTABLE | SectionFlags::FAT_FORMAT).bits());
            body.extend_from_slice(&fat_size.to_le_bytes()[..3]);
            for clause in &clauses {
                push_le(body, u32::from(clause.flags.bits()));
                push_le(body, clause.try_offset);
                push_le(body, clause.try_length);
                push_le(body, clause.handler_offset);
                push_le(body, clause.handler_length);
                push_le(body, clause.extra);
            }
        }

        Ok(())
    }
}

/// Reads all exception handling sections starting at `cursor`.
fn read_sections(data: &[u8], mut cursor: usize) -> Result<Vec<RawClause>> {
    let mut clauses = Vec::new();

    while data.len() >= cursor + SECTION_HEADER_SIZE {
        let section_flags = SectionFlags::from_bits_truncate(read_le::<u8>(&data[cursor..])?);
        if !section_flags.contains(SectionFlags::EHTABLE) {
            break;
        }

        if section_flags.contains(SectionFlags::FAT_FORMAT) {
            let section_size = (read_le::<u32>(&data[cursor..])? >> 8) as usize;
            if section_size < SECTION_HEADER_SIZE || data.len() < cursor + section_size {
                return Err(OutOfBounds);
            }

            let mut clause_cursor = cursor + SECTION_HEADER_SIZE;
            for _ in 0..(section_size - SECTION_HEADER_SIZE) / FAT_CLAUSE_SIZE {
                // Intentionally truncating u32 to u16 for exception handler flags
                #[allow(clippy::cast_possible_truncation)]
                let flags = ExceptionHandlerFlags::from_bits_truncate(
                    read_le_at::<u32>(data, &mut clause_cursor)? as u16,
                );
                clauses.push(RawClause {
                    flags,
                    try_offset: read_le_at::<u32>(data, &mut clause_cursor)?,
                    try_length: read_le_at::<u32>(data, &mut clause_cursor)?,
                    handler_offset: read_le_at::<u32>(data, &mut clause_cursor)?,
                    handler_length: read_le_at::<u32>(data, &mut clause_cursor)?,
                    extra: read_le_at::<u32>(data, &mut clause_cursor)?,
                });
            }
            cursor += section_size;
        } else {
            let section_size = usize::from(read_le::<u8>(&data[cursor + 1..])?);
            if section_size < SECTION_HEADER_SIZE || data.len() < cursor + section_size {
                return Err(OutOfBounds);
            }

            let mut clause_cursor = cursor + SECTION_HEADER_SIZE;
            for _ in 0..(section_size - SECTION_HEADER_SIZE) / SMALL_CLAUSE_SIZE {
                clauses.push(RawClause {
                    flags: ExceptionHandlerFlags::from_bits_truncate(read_le_at::<u16>(
                        data,
                        &mut clause_cursor,
                    )?),
                    try_offset: u32::from(read_le_at::<u16>(data, &mut clause_cursor)?),
                    try_length: u32::from(read_le_at::<u8>(data, &mut clause_cursor)?),
                    handler_offset: u32::from(read_le_at::<u16>(data, &mut clause_cursor)?),
                    handler_length: u32::from(read_le_at::<u8>(data, &mut clause_cursor)?),
                    extra: read_le_at::<u32>(data, &mut clause_cursor)?,
                });
            }
            cursor += section_size;
        }

        if !section_flags.contains(SectionFlags::MORE_SECTS) {
            break;
        }
        cursor = (cursor + 3) & !3;
    }

    Ok(clauses)
}

fn bind_clause(clause: &RawClause, offsets: &[u32]) -> Result<ExceptionHandler> {
    let end = |start: u32, length: u32| {
        start
            .checked_add(length)
            .ok_or_else(|| malformed_error!("Exception range overflows: {} + {}", start, length))
    };

    let is_filter = clause.flags.contains(ExceptionHandlerFlags::FILTER);
    let is_typed = !clause.flags.intersects(
        ExceptionHandlerFlags::FILTER | ExceptionHandlerFlags::FINALLY | ExceptionHandlerFlags::FAULT,
    );

    Ok(ExceptionHandler {
        flags: clause.flags,
        try_start: index_of_offset(offsets, clause.try_offset)?,
        try_end: index_of_offset(offsets, end(clause.try_offset, clause.try_length)?)?,
        handler_start: index_of_offset(offsets, clause.handler_offset)?,
        handler_end: index_of_offset(offsets, end(clause.handler_offset, clause.handler_length)?)?,
        filter_start: if is_filter {
            Some(index_of_offset(offsets, clause.extra)?)
        } else {
            None
        },
        class_token: if is_typed {
            Some(Token::new(clause.extra))
        } else {
            None
        },
    })
}

fn unbind_clause(handler: &ExceptionHandler, offsets: &[u32]) -> Result<RawClause> {
    let offset = |index: usize| {
        offsets.get(index).copied().ok_or_else(|| {
            malformed_error!(
                "Exception handler index {} outside of a body with {} instructions",
                index,
                offsets.len() - 1
            )
        })
    };
    let length = |start: usize, end: usize| -> Result<u32> {
        let (start, end) = (offset(start)?, offset(end)?);
        end.checked_sub(start)
            .ok_or_else(|| malformed_error!("Exception range ends before it starts"))
    };

    let extra = match (handler.filter_start, handler.class_token) {
        (Some(filter), _) if handler.is_filter() => offset(filter)?,
        (_, Some(token)) if handler.is_typed() => token.value(),
        _ => 0,
    };

    Ok(RawClause {
        flags: handler.flags,
        try_offset: offset(handler.try_start)?,
        try_length: length(handler.try_start, handler.try_end)?,
        handler_offset: offset(handler.handler_start)?,
        handler_length: length(handler.handler_start, handler.handler_end)?,
        extra,
    })
}
