//! Decorated keys: the `(token, key)` pair defining stream order.

use std::cmp::Ordering;
use std::fmt;

use crate::key::PartitionKey;
use crate::token::Token;

/// A partition key paired with its token.
///
/// Defines the primary sort order of a mutation stream: token first, key
/// bytes as tie-break. Token collisions are possible and are not key
/// equality, which is why the tie-break exists. Clones are cheap (the key's
/// encoding is shared).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecoratedKey {
    token: Token,
    key: PartitionKey,
}

impl DecoratedKey {
    /// Pairs a token with its partition key.
    #[must_use]
    pub const fn new(token: Token, key: PartitionKey) -> Self {
        Self { token, key }
    }

    /// Returns the token.
    #[must_use]
    pub const fn token(&self) -> Token {
        self.token
    }

    /// Returns the partition key.
    #[must_use]
    pub const fn key(&self) -> &PartitionKey {
        &self.key
    }
}

impl Ord for DecoratedKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.token
            .cmp(&other.token)
            .then_with(|| self.key.cmp(&other.key))
    }
}

impl PartialOrd for DecoratedKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for DecoratedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{token={}, key={}}}", self.token, self.key)
    }
}
