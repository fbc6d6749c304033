//! Partition keys: canonical encoding plus sentinel kinds.
//!
//! A [`PartitionKey`] is an opaque ordered byte sequence. The two sentinel
//! kinds exist so that range bounds over the key space can be expressed
//! without an `Option` at every call site: `before_all` sorts below every
//! regular key and `after_all` above.

use std::cmp::Ordering;
use std::fmt;

use bytes::Bytes;

use crate::composite::{decode_components, encode_components, KeySchema};
use crate::error::{KeyError, KeyResult};

/// The kind of a partition key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyKind {
    /// Sentinel ordering below every regular key.
    BeforeAll,
    /// A real key with an encoding.
    Regular,
    /// Sentinel ordering above every regular key.
    AfterAll,
}

/// A canonical, immutable partition key.
///
/// Two regular keys compare by unsigned lexicographic order of their
/// encodings; sentinel kinds compare before/after everything regular. The
/// ordering is a strict total order and is representation-independent: keys
/// built from components and keys built from raw bytes compare equal
/// whenever their encodings are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionKey {
    kind: KeyKind,
    bytes: Bytes,
}

impl PartitionKey {
    /// Creates a regular key from its canonical encoding.
    #[must_use]
    pub const fn from_bytes(bytes: Bytes) -> Self {
        Self {
            kind: KeyKind::Regular,
            bytes,
        }
    }

    /// Creates a regular key by serializing component values per the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the component count does not match the schema or
    /// a component is too large for the compound encoding.
    pub fn from_components(schema: KeySchema, components: &[Bytes]) -> KeyResult<Self> {
        Ok(Self::from_bytes(encode_components(schema, components)?))
    }

    /// Returns the sentinel ordering below all regular keys.
    #[must_use]
    pub const fn before_all() -> Self {
        Self {
            kind: KeyKind::BeforeAll,
            bytes: Bytes::new(),
        }
    }

    /// Returns the sentinel ordering above all regular keys.
    #[must_use]
    pub const fn after_all() -> Self {
        Self {
            kind: KeyKind::AfterAll,
            bytes: Bytes::new(),
        }
    }

    /// Returns the key's kind.
    #[must_use]
    pub const fn kind(&self) -> KeyKind {
        self.kind
    }

    /// Returns true for a regular (non-sentinel) key.
    #[must_use]
    pub const fn is_regular(&self) -> bool {
        matches!(self.kind, KeyKind::Regular)
    }

    /// Returns the canonical encoding. Empty for sentinels.
    #[must_use]
    pub const fn encoded(&self) -> &Bytes {
        &self.bytes
    }

    /// Splits the key back into its component values.
    ///
    /// Inverse of [`PartitionKey::from_components`]; used when a caller must
    /// inspect individual column values, e.g. to recompute a token.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is a sentinel or its byte layout does not
    /// match the schema.
    pub fn components(&self, schema: KeySchema) -> KeyResult<Vec<Bytes>> {
        match self.kind {
            KeyKind::Regular => decode_components(schema, &self.bytes),
            KeyKind::BeforeAll => Err(KeyError::SentinelComponents { kind: "before_all" }),
            KeyKind::AfterAll => Err(KeyError::SentinelComponents { kind: "after_all" }),
        }
    }
}

impl Ord for PartitionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.kind.cmp(&other.kind) {
            // Same kind: sentinels are equal to themselves, regular keys
            // compare by unsigned byte order of the encoding.
            Ordering::Equal => self.bytes.cmp(&other.bytes),
            unequal => unequal,
        }
    }
}

impl PartialOrd for PartitionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            KeyKind::BeforeAll => write!(f, "-inf"),
            KeyKind::AfterAll => write!(f, "+inf"),
            KeyKind::Regular => {
                for byte in &self.bytes {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}
