//! Tokens: hash-space coordinates for ownership routing.
//!
//! A token is derived from a partition key by a [`Partitioner`] and decides
//! which shard owns the partition. Tokens are only ever compared numerically;
//! byte-level comparisons stay with [`PartitionKey`](crate::PartitionKey).

use std::fmt;

use crate::key::PartitionKey;

/// A scalar coordinate in the hash space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Token(i64);

impl Token {
    /// Creates a token from a raw value.
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw token value.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }

    /// Returns the shard owning this token out of `shard_count` shards.
    ///
    /// Ownership is the Euclidean remainder of the token, so consecutive
    /// tokens round-robin across shards and negative tokens still map into
    /// `0..shard_count`.
    ///
    /// # Panics
    ///
    /// Panics if `shard_count` is zero.
    #[must_use]
    pub fn owning_shard(self, shard_count: u32) -> u32 {
        assert!(shard_count > 0, "shard count must be positive");
        // Safe cast: rem_euclid of a positive i64 modulus is in 0..modulus.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let shard = self.0.rem_euclid(i64::from(shard_count)) as u32;
        shard
    }
}

impl From<i64> for Token {
    fn from(value: i64) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Derives tokens from partition keys.
///
/// The partitioning function is an external collaborator: the storage engine
/// chooses it per keyspace and it never changes for the lifetime of the data.
/// Implementations must be pure.
pub trait Partitioner: Send + Sync {
    /// Returns the token for a regular key's canonical encoding.
    fn token_of(&self, key: &PartitionKey) -> Token;
}

/// Default multiplicative-hash partitioner.
///
/// Good distribution for tests and tools; production deployments inject
/// whatever partitioner their on-disk data was written with.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashPartitioner;

impl Partitioner for HashPartitioner {
    fn token_of(&self, key: &PartitionKey) -> Token {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for &byte in key.encoded() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        // Mix the top bits down; raw FNV is weak in the low bits.
        hash ^= hash >> 33;
        hash = hash.wrapping_mul(0xff51_afd7_ed55_8ccd);
        hash ^= hash >> 33;
        // Safe cast: tokens span the full i64 range by design.
        #[allow(clippy::cast_possible_wrap)]
        Token::new(hash as i64)
    }
}
