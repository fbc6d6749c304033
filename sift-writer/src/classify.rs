//! Classifiers: routing attributes to output classes.
//!
//! A classifier is a pure function from a routing attribute to a class id.
//! Two strategies exist:
//!
//! - [`ShardClassifier`] routes by ownership: the partition's token decides
//!   everything, so classification happens once per partition.
//! - [`TimestampClassifier`] routes by write time: distinct rows within one
//!   partition can land in distinct classes, so classification happens per
//!   fragment.
//!
//! The engine may call a classifier speculatively (e.g. to probe a class
//! before opening its writer); implementations must be deterministic and
//! side-effect-free.

use sift_core::{ClassId, Timestamp};
use sift_keys::DecoratedKey;

use crate::error::ClassifyError;

/// Maximum number of shards a shard classifier supports.
pub const SHARD_COUNT_MAX: u32 = 65_536;

/// How often the engine must consult a classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifyScope {
    /// One classification per partition; all fragments of a partition share
    /// the class.
    Partition,
    /// One classification per row or tombstone fragment.
    Row,
}

/// The routing attribute a classification decision is based on.
#[derive(Debug, Clone, Copy)]
pub enum RoutingContext<'a> {
    /// The partition's decorated key, for ownership-based routing.
    Ownership(&'a DecoratedKey),
    /// The write time of the current row or tombstone.
    WriteTime(Timestamp),
}

/// Maps a routing attribute to an output class.
pub trait Classifier: Send {
    /// Returns how often the engine must consult this classifier.
    fn scope(&self) -> ClassifyScope;

    /// Classifies one routing context.
    ///
    /// # Errors
    ///
    /// Returns an error if the context cannot be classified; the engine
    /// treats any error as fatal to the run.
    fn classify(&self, ctx: RoutingContext<'_>) -> Result<ClassId, ClassifyError>;
}

/// Routes whole partitions to the shard owning their token.
#[derive(Debug, Clone, Copy)]
pub struct ShardClassifier {
    shard_count: u32,
}

impl ShardClassifier {
    /// Creates a classifier over `shard_count` shards.
    ///
    /// # Panics
    ///
    /// Panics if `shard_count` is zero or exceeds [`SHARD_COUNT_MAX`].
    #[must_use]
    pub fn new(shard_count: u32) -> Self {
        assert!(shard_count > 0, "shard count must be positive");
        assert!(
            shard_count <= SHARD_COUNT_MAX,
            "shard count {shard_count} exceeds {SHARD_COUNT_MAX}"
        );
        Self { shard_count }
    }

    /// Returns the shard count.
    #[must_use]
    pub const fn shard_count(&self) -> u32 {
        self.shard_count
    }
}

impl Classifier for ShardClassifier {
    fn scope(&self) -> ClassifyScope {
        ClassifyScope::Partition
    }

    fn classify(&self, ctx: RoutingContext<'_>) -> Result<ClassId, ClassifyError> {
        match ctx {
            RoutingContext::Ownership(key) => {
                Ok(ClassId::new(key.token().owning_shard(self.shard_count)))
            }
            RoutingContext::WriteTime(_) => Err(ClassifyError::new(
                "shard classifier cannot route a write-time context",
            )),
        }
    }
}

/// Classification function injected into a [`TimestampClassifier`].
pub type TimestampFn = dyn Fn(Timestamp) -> Result<ClassId, ClassifyError> + Send + Sync;

/// Routes rows and tombstones by their write time.
///
/// Wraps a caller-supplied predicate; the canonical use splits data at a
/// repair watermark so repaired and unrepaired writes land in different
/// output streams.
pub struct TimestampClassifier {
    classify: Box<TimestampFn>,
}

impl TimestampClassifier {
    /// Creates a classifier from a write-time predicate.
    ///
    /// The predicate must be deterministic: the engine may evaluate it more
    /// than once for the same timestamp.
    #[must_use]
    pub fn new<F>(classify: F) -> Self
    where
        F: Fn(Timestamp) -> Result<ClassId, ClassifyError> + Send + Sync + 'static,
    {
        Self {
            classify: Box::new(classify),
        }
    }

    /// Creates the two-class watermark split: writes before `watermark` map
    /// to class 0, writes at or after it to class 1.
    #[must_use]
    pub fn watermark(watermark: Timestamp) -> Self {
        Self::new(move |ts| {
            if ts < watermark {
                Ok(ClassId::new(0))
            } else {
                Ok(ClassId::new(1))
            }
        })
    }
}

impl std::fmt::Debug for TimestampClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimestampClassifier").finish_non_exhaustive()
    }
}

impl Classifier for TimestampClassifier {
    fn scope(&self) -> ClassifyScope {
        ClassifyScope::Row
    }

    fn classify(&self, ctx: RoutingContext<'_>) -> Result<ClassId, ClassifyError> {
        match ctx {
            RoutingContext::WriteTime(ts) => (self.classify)(ts),
            RoutingContext::Ownership(_) => Err(ClassifyError::new(
                "timestamp classifier cannot route an ownership context",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use sift_keys::{PartitionKey, Token};

    fn dkey(token: i64) -> DecoratedKey {
        DecoratedKey::new(
            Token::new(token),
            PartitionKey::from_bytes(Bytes::from_static(b"pk")),
        )
    }

    #[test]
    fn test_shard_classifier_maps_by_token() {
        let classifier = ShardClassifier::new(2);
        assert_eq!(classifier.scope(), ClassifyScope::Partition);

        for (token, expected) in [(10, 0), (21, 1), (34, 0), (45, 1)] {
            let key = dkey(token);
            let class = classifier
                .classify(RoutingContext::Ownership(&key))
                .unwrap();
            assert_eq!(class, ClassId::new(expected));
        }
    }

    #[test]
    fn test_shard_classifier_rejects_write_time() {
        let classifier = ShardClassifier::new(2);
        let err = classifier
            .classify(RoutingContext::WriteTime(Timestamp::from_micros(1)))
            .unwrap_err();
        assert!(err.message.contains("write-time"));
    }

    #[test]
    #[should_panic(expected = "shard count must be positive")]
    fn test_shard_classifier_zero_shards_panics() {
        let _ = ShardClassifier::new(0);
    }

    #[test]
    fn test_watermark_split() {
        let classifier = TimestampClassifier::watermark(Timestamp::from_micros(10));
        assert_eq!(classifier.scope(), ClassifyScope::Row);

        let class_of = |micros| {
            classifier
                .classify(RoutingContext::WriteTime(Timestamp::from_micros(micros)))
                .unwrap()
        };
        assert_eq!(class_of(5), ClassId::new(0));
        assert_eq!(class_of(9), ClassId::new(0));
        assert_eq!(class_of(10), ClassId::new(1));
        assert_eq!(class_of(25), ClassId::new(1));
    }

    #[test]
    fn test_classification_is_deterministic() {
        let classifier = TimestampClassifier::watermark(Timestamp::from_micros(100));
        let ctx = RoutingContext::WriteTime(Timestamp::from_micros(7));
        assert_eq!(
            classifier.classify(ctx).unwrap(),
            classifier.classify(ctx).unwrap()
        );
    }

    #[test]
    fn test_timestamp_classifier_propagates_errors() {
        let classifier =
            TimestampClassifier::new(|_| Err(ClassifyError::new("malformed timestamp")));
        let err = classifier
            .classify(RoutingContext::WriteTime(Timestamp::from_micros(0)))
            .unwrap_err();
        assert_eq!(err.message, "malformed timestamp");
    }
}
