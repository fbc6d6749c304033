//! System limits for the segregation pipeline.
//!
//! Following TigerStyle: put limits on everything. A classifier that fans a
//! stream out into millions of classes is a bug, not a workload.

use thiserror::Error;

/// A limit failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid limit {name}: {reason}")]
pub struct InvalidLimit {
    /// Which limit is invalid.
    pub name: &'static str,
    /// Why it is invalid.
    pub reason: &'static str,
}

/// Bounds on the resources a segregation run may consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum class id value a classifier may return, exclusive. Bounds
    /// the number of sub-writers a run can create.
    pub max_classes: u32,
    /// Maximum encoded partition-key size in bytes.
    pub max_partition_key_bytes: u32,
    /// Maximum row payload size in bytes.
    pub max_payload_bytes: u32,
}

impl Limits {
    /// Creates limits with safe defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            // One class per shard on the largest supported topology.
            max_classes: 65_536,
            // Matches the u16 component length prefix of compound keys.
            max_partition_key_bytes: 64 * 1024,
            max_payload_bytes: 16 * 1024 * 1024,
        }
    }

    /// Validates that all limits are internally consistent.
    ///
    /// # Errors
    /// Returns an error if any limit is zero or out of range.
    pub const fn validate(&self) -> Result<(), InvalidLimit> {
        if self.max_classes == 0 {
            return Err(InvalidLimit {
                name: "max_classes",
                reason: "must be positive",
            });
        }
        if self.max_partition_key_bytes == 0 {
            return Err(InvalidLimit {
                name: "max_partition_key_bytes",
                reason: "must be positive",
            });
        }
        if self.max_payload_bytes == 0 {
            return Err(InvalidLimit {
                name: "max_payload_bytes",
                reason: "must be positive",
            });
        }
        Ok(())
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::new()
    }
}
