//! Key model error types.

use thiserror::Error;

/// Result type for key operations.
pub type KeyResult<T> = Result<T, KeyError>;

/// Errors raised when key bytes do not match the expected encoding.
///
/// All variants describe a malformed key: the byte layout disagrees with the
/// schema the caller supplied. They are fatal to the operation that tried to
/// decode the key; the bytes themselves are left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// The encoding ended in the middle of a length prefix or component.
    #[error("malformed key: truncated at offset {offset}, needed {needed} more byte(s)")]
    Truncated {
        /// Byte offset at which the encoding ran out.
        offset: usize,
        /// How many more bytes were required.
        needed: usize,
    },

    /// The encoding holds a different number of components than the schema.
    #[error("malformed key: schema has {expected} component(s), encoding has {found}")]
    ComponentCount {
        /// Component count declared by the schema.
        expected: u16,
        /// Component count found in the encoding.
        found: u16,
    },

    /// A component value is too large for the compound length prefix.
    #[error("malformed key: component of {len} bytes exceeds the u16 length prefix")]
    OversizedComponent {
        /// Length of the offending component.
        len: usize,
    },

    /// A sentinel key has no encoded components to decode.
    #[error("malformed key: {kind} sentinel carries no components")]
    SentinelComponents {
        /// Which sentinel was asked for components.
        kind: &'static str,
    },
}
