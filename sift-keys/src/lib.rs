//! Sift Keys - Canonical partition-key model for the Sift storage engine.
//!
//! This crate defines how partition keys are encoded, ordered, and paired
//! with their hash-space tokens. It is the foundation of the stream order
//! used by the rest of the engine: mutation streams are sorted by
//! [`DecoratedKey`] (token first, key bytes as tie-break), and every
//! reorganization pass relies on that order being a strict total order.
//!
//! # Design
//!
//! - **Canonical encoding**: a key is a single byte sequence. Compound
//!   schemas serialize each component with a big-endian `u16` length prefix;
//!   single-component schemas store the raw value. Equal keys have equal
//!   encodings no matter how they were constructed.
//! - **Sentinels**: `before_all` and `after_all` keys order below and above
//!   every regular key, so open range bounds need no special casing.
//! - **Immutability**: keys are immutable once built and cheap to clone
//!   (shared `Bytes`), so they can be handed across tasks freely.
//!
//! # `TigerStyle` Principles
//!
//! - Explicit types: tokens are `i64`, shard counts are `u32`
//! - Every decode failure is an explicit [`KeyError`], never a panic
//! - No unsafe code

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod composite;
mod decorated;
mod error;
mod key;
mod token;

pub use composite::KeySchema;
pub use decorated::DecoratedKey;
pub use error::{KeyError, KeyResult};
pub use key::{KeyKind, PartitionKey};
pub use token::{HashPartitioner, Partitioner, Token};
