//! Sift Writer - Mutation-stream segregation for the Sift storage engine.
//!
//! This crate reorganizes one sorted stream of mutation fragments into
//! multiple independently sorted output streams, splitting by physical
//! ownership (shard) or by write time, while preserving the logical content
//! of every partition. It backs two production operations:
//!
//! - **Resharding** ([`segregate_by_shard`]): after a topology change, data
//!   is rewritten so each shard's output stream only holds the partitions it
//!   now owns.
//! - **Repair-aware reorganization** ([`segregate_by_timestamp`]): data is
//!   separated by write time so a later process can treat the subsets
//!   differently, e.g. repaired vs. unrepaired writes.
//!
//! # Design
//!
//! A [`SegregationEngine`] pulls fragments from a [`FragmentSource`] in a
//! single forward pass, asks a [`Classifier`] which output class each
//! fragment belongs to, and hands the fragment to that class's sub-writer.
//! Sub-writers are created lazily through a caller-supplied
//! [`WriterFactory`], at most once per class per run, and are closed as a
//! unit on completion or failure. Every output stream is itself a
//! well-formed mutation stream: partition boundaries are replayed per class,
//! and a range deletion is forwarded to every class that receives rows under
//! it - and to no other.
//!
//! # `TigerStyle` Principles
//!
//! - Explicit limits on classes and fragment sizes
//! - Every failure is fatal and surfaces the original error
//! - No unsafe code

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod classify;
mod engine;
mod error;
mod registry;
mod source;
mod writer;

pub use classify::{
    Classifier, ClassifyScope, RoutingContext, ShardClassifier, TimestampClassifier, TimestampFn,
    SHARD_COUNT_MAX,
};
pub use engine::{
    segregate_by_shard, segregate_by_timestamp, AbortSignal, SegregationConfig, SegregationEngine,
};
pub use error::{ClassifyError, SegregateError, SegregateResult, WriterError};
pub use registry::WriterRegistry;
pub use source::{FragmentSource, VecSource};
pub use writer::{
    FragmentWriter, MemoryWriter, MemoryWriterFactory, WriterFactory, WriterFaultConfig,
};
