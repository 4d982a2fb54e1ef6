use std::fmt;
use std::hash::{Hash, Hasher};

use strum::{Display, EnumIter, FromRepr};

/// Metadata tables a patcher token can point into.
///
/// Only the tables that appear as `call`/`ldtoken`-style operands or that the patcher creates
/// rows in are listed; the discriminant is the table byte of the token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumIter, FromRepr)]
#[repr(u8)]
pub enum TableId {
    /// Type references into other assemblies
    TypeRef = 0x01,
    /// Type definitions of this module
    TypeDef = 0x02,
    /// Field definitions
    Field = 0x04,
    /// Method definitions of this module
    MethodDef = 0x06,
    /// Member references (methods and fields of other modules)
    MemberRef = 0x0A,
    /// Standalone signatures (local variable signatures, `calli` sites)
    StandAloneSig = 0x11,
    /// Type specifications (generic instantiations, arrays)
    TypeSpec = 0x1B,
    /// Method specifications (generic method instantiations)
    MethodSpec = 0x2B,
    /// User string heap entries referenced by `ldstr`
    UserString = 0x70,
}

/// A metadata token representing a reference to a metadata table entry.
///
/// Tokens in .NET metadata consist of a 32-bit value where:
/// - The high byte (bits 24-31) indicates the table type
/// - The low 24 bits (bits 0-23) indicate the row index within that table
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Token(pub u32);

impl Token {
    /// Creates a new token from a raw 32-bit value
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Creates a token for `row` in `table`
    #[must_use]
    pub fn from_parts(table: TableId, row: u32) -> Self {
        Token((u32::from(table as u8) << 24) | (row & 0x00FF_FFFF))
    }

    /// Returns the raw token value
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Extracts the table type from the token (high byte)
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Returns the table this token points into, if it is one the patcher knows
    #[must_use]
    pub fn table_id(&self) -> Option<TableId> {
        TableId::from_repr(self.table())
    }

    /// Extracts the row index from the token (low 24 bits)
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Returns true if this is a null token (value 0)
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_token_parts() {
        let token = Token(0x06000001);
        assert_eq!(token.table(), 0x06);
        assert_eq!(token.row(), 1);
        assert_eq!(token.table_id(), Some(TableId::MethodDef));
    }

    #[test]
    fn test_token_from_parts() {
        let token = Token::from_parts(TableId::MemberRef, 5);
        assert_eq!(token.value(), 0x0A000005);

        let truncated = Token::from_parts(TableId::TypeRef, 0x0100_0002);
        assert_eq!(truncated.value(), 0x01000002);
    }

    #[test]
    fn test_token_unknown_table() {
        let token = Token(0x23000001);
        assert_eq!(token.table_id(), None);
    }

    #[test]
    fn test_token_is_null() {
        assert!(Token(0).is_null());
        assert!(!Token(0x0A000001).is_null());
    }

    #[test]
    fn test_token_from_conversion() {
        let token: Token = 0x0A000003u32.into();
        let back: u32 = token.into();
        assert_eq!(back, 0x0A000003);
    }

    #[test]
    fn test_token_display() {
        assert_eq!(format!("{}", Token(0x06000001)), "0x06000001");
    }

    #[test]
    fn test_token_debug() {
        let debug_str = format!("{:?}", Token(0x0A000002));
        assert!(debug_str.contains("Token(0x0a000002"));
        assert!(debug_str.contains("table: 0x0a"));
        assert!(debug_str.contains("row: 2"));
    }

    #[test]
    fn test_token_hash() {
        let mut map = HashMap::new();
        map.insert(Token(0x06000001), "TakeDamage");
        map.insert(Token(0x0A000001), "OnDamage");

        assert_eq!(map.get(&Token(0x0A000001)), Some(&"OnDamage"));
    }

    #[test]
    fn test_table_id_display() {
        assert_eq!(TableId::MemberRef.to_string(), "MemberRef");
    }
}
