//! Mutation fragments: the units of a sorted change stream.
//!
//! A mutation stream is a flat sequence of fragments: each partition opens
//! with [`PartitionStart`], carries an optional static row, then clustering
//! rows and range-tombstone changes in clustering order, and closes with
//! `PartitionEnd`. Partitions follow each other in decorated-key order.
//!
//! # Range tombstones
//!
//! A deletion over a contiguous clustering interval is expressed as a pair
//! of [`RangeTombstoneChange`] fragments: one carrying `Some(tombstone)` at
//! the position where the deletion starts (or changes), and one carrying
//! `None` at the position where it ends. Between the two, every clustering
//! row is logically covered by the deletion.

use std::fmt;

use bytes::Bytes;
use sift_keys::DecoratedKey;

/// Write time of a row or tombstone, in microseconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from microseconds since the Unix epoch.
    #[must_use]
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    /// Returns the timestamp as microseconds since the Unix epoch.
    #[must_use]
    pub const fn as_micros(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}us", self.0)
    }
}

/// Deletion metadata carried by a range-tombstone change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tombstone {
    /// Write time of the deletion; data written before it is dead.
    pub timestamp: Timestamp,
}

impl Tombstone {
    /// Creates a tombstone with the given write time.
    #[must_use]
    pub const fn new(timestamp: Timestamp) -> Self {
        Self { timestamp }
    }
}

/// A clustering position within a partition.
///
/// Opaque bytes, ordered by unsigned lexicographic comparison. Fragments of
/// one partition are totally ordered by this position.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClusteringKey(Bytes);

impl ClusteringKey {
    /// Creates a clustering key from its encoding.
    #[must_use]
    pub const fn new(bytes: Bytes) -> Self {
        Self(bytes)
    }

    /// Creates a clustering key from a static byte string.
    #[must_use]
    pub const fn from_static(bytes: &'static [u8]) -> Self {
        Self(Bytes::from_static(bytes))
    }

    /// Returns the encoding.
    #[must_use]
    pub const fn as_bytes(&self) -> &Bytes {
        &self.0
    }
}

impl fmt::Display for ClusteringKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Opens a partition in the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionStart {
    /// The partition's decorated key; owns the key data for all fragments
    /// of this partition.
    pub key: DecoratedKey,
}

/// The partition's single row without a clustering position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticRow {
    /// Write time of the row.
    pub timestamp: Timestamp,
    /// Opaque cell payload.
    pub payload: Bytes,
}

/// A regular row at a clustering position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusteringRow {
    /// The row's clustering position.
    pub key: ClusteringKey,
    /// Write time of the row.
    pub timestamp: Timestamp,
    /// Opaque cell payload.
    pub payload: Bytes,
}

/// Marks the position where the active range deletion begins, changes, or
/// ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeTombstoneChange {
    /// The clustering position the change takes effect at.
    pub position: ClusteringKey,
    /// The deletion active from this position on; `None` ends the active
    /// deletion.
    pub tombstone: Option<Tombstone>,
}

/// One unit of a sorted mutation stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationFragment {
    /// Opens a partition.
    PartitionStart(PartitionStart),
    /// The partition's static row; at most one, before all positioned
    /// fragments.
    StaticRow(StaticRow),
    /// A clustering row.
    ClusteringRow(ClusteringRow),
    /// A range-tombstone change.
    RangeTombstoneChange(RangeTombstoneChange),
    /// Closes the current partition.
    PartitionEnd,
}

impl MutationFragment {
    /// Creates a partition-start fragment.
    #[must_use]
    pub const fn partition_start(key: DecoratedKey) -> Self {
        Self::PartitionStart(PartitionStart { key })
    }

    /// Creates a static-row fragment.
    #[must_use]
    pub const fn static_row(timestamp: Timestamp, payload: Bytes) -> Self {
        Self::StaticRow(StaticRow { timestamp, payload })
    }

    /// Creates a clustering-row fragment.
    #[must_use]
    pub const fn clustering_row(key: ClusteringKey, timestamp: Timestamp, payload: Bytes) -> Self {
        Self::ClusteringRow(ClusteringRow {
            key,
            timestamp,
            payload,
        })
    }

    /// Creates a range-tombstone-change fragment.
    #[must_use]
    pub const fn range_tombstone_change(
        position: ClusteringKey,
        tombstone: Option<Tombstone>,
    ) -> Self {
        Self::RangeTombstoneChange(RangeTombstoneChange {
            position,
            tombstone,
        })
    }

    /// Returns the fragment's kind, for diagnostics.
    #[must_use]
    pub const fn kind(&self) -> FragmentKind {
        match self {
            Self::PartitionStart(_) => FragmentKind::PartitionStart,
            Self::StaticRow(_) => FragmentKind::StaticRow,
            Self::ClusteringRow(_) => FragmentKind::ClusteringRow,
            Self::RangeTombstoneChange(_) => FragmentKind::RangeTombstoneChange,
            Self::PartitionEnd => FragmentKind::PartitionEnd,
        }
    }

    /// Returns the partition key, if this fragment carries one.
    #[must_use]
    pub const fn partition_key(&self) -> Option<&DecoratedKey> {
        match self {
            Self::PartitionStart(ps) => Some(&ps.key),
            _ => None,
        }
    }

    /// Returns the clustering position, if this fragment has one.
    #[must_use]
    pub const fn position(&self) -> Option<&ClusteringKey> {
        match self {
            Self::ClusteringRow(row) => Some(&row.key),
            Self::RangeTombstoneChange(change) => Some(&change.position),
            _ => None,
        }
    }

    /// Returns the write time carried by this fragment, if any.
    ///
    /// A closing tombstone change carries no write time.
    #[must_use]
    pub const fn timestamp(&self) -> Option<Timestamp> {
        match self {
            Self::StaticRow(row) => Some(row.timestamp),
            Self::ClusteringRow(row) => Some(row.timestamp),
            Self::RangeTombstoneChange(change) => match change.tombstone {
                Some(tombstone) => Some(tombstone.timestamp),
                None => None,
            },
            Self::PartitionStart(_) | Self::PartitionEnd => None,
        }
    }
}

/// Discriminant of a [`MutationFragment`], for logging and error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentKind {
    /// A partition-start fragment.
    PartitionStart,
    /// A static-row fragment.
    StaticRow,
    /// A clustering-row fragment.
    ClusteringRow,
    /// A range-tombstone-change fragment.
    RangeTombstoneChange,
    /// A partition-end fragment.
    PartitionEnd,
}

impl fmt::Display for FragmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PartitionStart => "partition-start",
            Self::StaticRow => "static-row",
            Self::ClusteringRow => "clustering-row",
            Self::RangeTombstoneChange => "range-tombstone-change",
            Self::PartitionEnd => "partition-end",
        };
        write!(f, "{name}")
    }
}
