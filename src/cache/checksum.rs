//! Content checksums of patch sources and game binaries.
//!
//! Checksums are MD5 digests rendered as 32 lowercase hex characters, the format of the
//! `.md5` sidecar and marker files. Comparison against stored text is case-insensitive.

use std::{fmt, fs, path::Path, str::FromStr};

use md5::{Digest, Md5};

use crate::{Error, Result};

/// A 128-bit content digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Checksum([u8; 16]);

impl Checksum {
    /// Digest of `data`
    #[must_use]
    pub fn of_bytes(data: &[u8]) -> Self {
        let mut hasher = Md5::new();
        hasher.update(data);
        Checksum(hasher.finalize().into())
    }

    /// Digest of the file at `path`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Io`] if the file cannot be read.
    pub fn of_file(path: &Path) -> Result<Self> {
        let data = fs::read(path).map_err(|e| Error::io(path, e))?;
        Ok(Self::of_bytes(&data))
    }

    /// Raw digest bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Lowercase hex rendering
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|byte| format!("{byte:02x}")).collect()
    }

    /// Compares against stored text, ignoring case and surrounding whitespace
    #[must_use]
    pub fn matches(&self, stored: &str) -> bool {
        stored.trim().eq_ignore_ascii_case(&self.to_hex())
    }
}

impl FromStr for Checksum {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != 32 || !s.is_ascii() {
            return Err(Error::Error(format!("Invalid checksum: '{s}'")));
        }

        let mut digest = [0_u8; 16];
        for (index, byte) in digest.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[index * 2..index * 2 + 2], 16)
                .map_err(|_| Error::Error(format!("Invalid checksum: '{s}'")))?;
        }
        Ok(Checksum(digest))
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", self.to_hex())
    }
}
