//! Sift Core - Shared mutation-stream model for the Sift storage engine.
//!
//! This crate defines the vocabulary the segregation pipeline speaks: the
//! mutation fragments that make up a sorted stream, the timestamps rows and
//! tombstones carry, the class ids that name output streams, and the system
//! limits that bound everything.
//!
//! # Design Principles (TigerStyle)
//!
//! - **Strongly-typed wrappers**: a `ClassId` is not a `Timestamp` is not a
//!   raw integer
//! - **Explicit limits**: every resource the engine touches has a bounded
//!   maximum in [`Limits`]
//! - **No unsafe code**: Safety > Performance

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod fragment;
mod limits;
mod types;

pub use fragment::{
    ClusteringKey, ClusteringRow, FragmentKind, MutationFragment, PartitionStart,
    RangeTombstoneChange, StaticRow, Timestamp, Tombstone,
};
pub use limits::{InvalidLimit, Limits};
pub use types::ClassId;
