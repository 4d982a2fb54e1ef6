//! Bounds-checked little-endian reading and writing of primitive values.
//!
//! Method bodies, exception handler sections and instruction operands are all stored in
//! little-endian order. Every function in this module checks the buffer length before touching
//! it and reports [`crate::Error::OutOfBounds`] instead of panicking.
//!
//! # Key Components
//!
//! - [`crate::file::io::CilIO`] - conversion between primitives and their byte arrays
//! - [`crate::file::io::read_le`] / [`crate::file::io::read_le_at`] - reading with offset tracking
//! - [`crate::file::io::write_le_at`] - writing into a pre-sized buffer
//! - [`crate::file::io::push_le`] - appending to a growing buffer
//!
//! # Examples
//!
//! ```rust
//! use cilpatch::file::io::{read_le_at, push_le};
//!
//! let mut data = Vec::new();
//! push_le(&mut data, 0x2Au8);
//! push_le(&mut data, 0x0A000001u32);
//!
//! let mut offset = 0;
//! let opcode: u8 = read_le_at(&data, &mut offset)?;
//! let token: u32 = read_le_at(&data, &mut offset)?;
//! assert_eq!((opcode, token, offset), (0x2A, 0x0A000001, 5));
//! # Ok::<(), cilpatch::Error>(())
//! ```

use crate::{Error::OutOfBounds, Result};

/// Trait for primitive types that can be converted from and to little-endian byte arrays.
///
/// Each implementation defines a `Bytes` associated type holding the fixed-size byte array
/// for that particular type (e.g., `[u8; 4]` for `u32`).
pub trait CilIO: Sized {
    /// Byte array type for this numeric type
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Read T from a byte array in little-endian
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Write T to a byte array in little-endian
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_cil_io {
    ($($ty:ty => $len:expr),* $(,)?) => {
        $(
            impl CilIO for $ty {
                type Bytes = [u8; $len];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$ty>::to_le_bytes(self)
                }
            }
        )*
    };
}

impl_cil_io! {
    u8 => 1,
    i8 => 1,
    u16 => 2,
    i16 => 2,
    u32 => 4,
    i32 => 4,
    u64 => 8,
    i64 => 8,
    f32 => 4,
    f64 => 8,
}

/// Safely reads a value of type `T` in little-endian byte order from the start of `data`.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le<T: CilIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Safely reads a value of type `T` in little-endian byte order at `offset`, advancing the
/// offset by the size of `T`.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes. The offset is left
/// untouched in that case.
pub fn read_le_at<T: CilIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let end = offset.checked_add(type_len).ok_or(OutOfBounds)?;
    if end > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(OutOfBounds);
    };

    *offset = end;

    Ok(T::from_le_bytes(read))
}

/// Safely writes `value` in little-endian byte order at `offset`, advancing the offset.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if the buffer is too small.
pub fn write_le_at<T: CilIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let type_len = std::mem::size_of::<T>();
    let end = offset.checked_add(type_len).ok_or(OutOfBounds)?;
    if end > data.len() {
        return Err(OutOfBounds);
    }

    data[*offset..end].copy_from_slice(value.to_le_bytes().as_ref());
    *offset = end;

    Ok(())
}

/// Appends `value` in little-endian byte order to a growable buffer.
pub fn push_le<T: CilIO>(buffer: &mut Vec<u8>, value: T) {
    buffer.extend_from_slice(value.to_le_bytes().as_ref());
}
