//! The segregation engine: one sorted stream in, one sorted stream per
//! class out.
//!
//! # Design
//!
//! The engine pulls fragments from a [`FragmentSource`] in a single forward
//! pass and routes each one to the sub-writers whose class needs it. Writers
//! are created lazily through the [`WriterRegistry`] the first time a
//! fragment is routed to their class; a class that receives nothing never
//! gets a writer.
//!
//! # Range-tombstone routing
//!
//! A range deletion logically covers every clustering position until closed,
//! regardless of which class later rows land in. The engine tracks the
//! source's active deletion and, per class, what that class's stream
//! currently believes:
//!
//! - `Open` - the class holds the source's current deletion.
//! - `PendingClose(position)` - the class holds a deletion the source has
//!   since ended at `position`.
//!
//! Before a row reaches a class, the class is brought current: a pending
//! close is flushed at the deletion's true end position, then the active
//! deletion (if any) is opened at its original start position. Closes are
//! never broadcast; they materialize only in classes that saw the matching
//! open, at the latest when the partition ends. A forwarded deletion
//! therefore never covers more of the clustering space in any output stream
//! than it did in the source.
//!
//! # Suspension points
//!
//! Writer creation, fragment emission, writer close, and producer pulls are
//! the only awaits; classification and routing between them are synchronous,
//! so no interleaving is observable within one fragment's processing.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sift_core::{
    ClassId, ClusteringKey, ClusteringRow, Limits, MutationFragment, PartitionStart,
    RangeTombstoneChange, StaticRow, Timestamp, Tombstone,
};
use sift_keys::DecoratedKey;
use tracing::{debug, info, warn};

use crate::classify::{
    Classifier, ClassifyScope, RoutingContext, ShardClassifier, TimestampClassifier,
};
use crate::error::{ClassifyError, SegregateError, SegregateResult};
use crate::registry::WriterRegistry;
use crate::source::FragmentSource;
use crate::writer::WriterFactory;

// -----------------------------------------------------------------------------
// Abort signal
// -----------------------------------------------------------------------------

/// Cooperative cancellation for a segregation run.
///
/// The engine observes the signal between fragments; an observed abort takes
/// the same close-all path as any other failure and surfaces
/// [`SegregateError::Aborted`]. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    flag: Arc<AtomicBool>,
}

impl AbortSignal {
    /// Creates a signal in the not-aborted state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests the run to stop at the next fragment boundary.
    pub fn abort(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Returns true once [`AbortSignal::abort`] has been called.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

// -----------------------------------------------------------------------------
// Configuration
// -----------------------------------------------------------------------------

/// Configuration for a segregation run.
#[derive(Debug, Clone, Default)]
pub struct SegregationConfig {
    /// Resource bounds enforced during the run.
    pub limits: Limits,
    /// Optional cancellation signal.
    pub abort: Option<AbortSignal>,
}

impl SegregationConfig {
    /// Creates a config with default limits and no abort signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the resource limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Attaches a cancellation signal.
    #[must_use]
    pub fn with_abort(mut self, abort: AbortSignal) -> Self {
        self.abort = Some(abort);
        self
    }
}

// -----------------------------------------------------------------------------
// Per-partition state
// -----------------------------------------------------------------------------

/// The source's currently active range deletion.
#[derive(Debug, Clone)]
struct ActiveTombstone {
    /// Position the deletion (last) took effect at.
    opened_at: ClusteringKey,
    /// The deletion itself.
    tombstone: Tombstone,
}

/// What one class's output stream currently believes about the deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ClassTombstoneState {
    /// The class holds the source's current deletion.
    Open,
    /// The class holds a deletion the source ended at this position.
    PendingClose(ClusteringKey),
}

/// Routing state scoped to one partition, cleared at `partition-end`.
#[derive(Debug)]
struct PartitionState {
    /// The partition's key; owns the data replayed into lazy
    /// `partition-start` fragments.
    key: DecoratedKey,
    /// The singleton destination under partition-scoped classification.
    partition_class: Option<ClassId>,
    /// Classes that received their `partition-start` this partition.
    opened: BTreeSet<ClassId>,
    /// Whether the static row was seen.
    seen_static: bool,
    /// Whether any positioned fragment was seen.
    seen_positioned: bool,
    /// Highest position seen so far.
    last_position: Option<ClusteringKey>,
    /// Position of the last clustering row (rows must strictly increase).
    last_row: Option<ClusteringKey>,
    /// The source's active deletion.
    active: Option<ActiveTombstone>,
    /// Per-class tombstone beliefs; absent means "nothing communicated".
    states: BTreeMap<ClassId, ClassTombstoneState>,
}

impl PartitionState {
    fn new(key: DecoratedKey, partition_class: Option<ClassId>) -> Self {
        Self {
            key,
            partition_class,
            opened: BTreeSet::new(),
            seen_static: false,
            seen_positioned: false,
            last_position: None,
            last_row: None,
            active: None,
            states: BTreeMap::new(),
        }
    }
}

// -----------------------------------------------------------------------------
// SegregationEngine
// -----------------------------------------------------------------------------

/// Splits one sorted mutation stream into independent per-class streams.
///
/// The engine owns the producer and every sub-writer for the duration of the
/// run. On any failure it stops consuming, best-effort-closes all created
/// writers, and surfaces the original error (cleanup failures become
/// secondary context). There is no partial-success outcome and the run is
/// not resumable.
pub struct SegregationEngine<S: FragmentSource> {
    source: S,
    classifier: Box<dyn Classifier>,
    registry: WriterRegistry,
    config: SegregationConfig,
    /// Key of the previous partition, for cross-partition order checks.
    prev_key: Option<DecoratedKey>,
    /// State of the currently open partition, if any.
    partition: Option<PartitionState>,
    partitions: u64,
    fragments_in: u64,
    fragments_out: u64,
}

impl<S: FragmentSource> SegregationEngine<S> {
    /// Creates an engine over a producer, a classifier, and a writer
    /// factory.
    ///
    /// # Panics
    ///
    /// Panics if the configured limits fail validation.
    #[must_use]
    pub fn new(
        source: S,
        classifier: Box<dyn Classifier>,
        factory: Box<dyn WriterFactory>,
        config: SegregationConfig,
    ) -> Self {
        assert!(config.limits.validate().is_ok(), "invalid limits");
        Self {
            source,
            classifier,
            registry: WriterRegistry::new(factory),
            config,
            prev_key: None,
            partition: None,
            partitions: 0,
            fragments_in: 0,
            fragments_out: 0,
        }
    }

    /// Drives the run to completion.
    ///
    /// Returns only after every created sub-writer has been closed, on
    /// success and on failure alike.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error; see [`SegregateError`].
    pub async fn run(mut self) -> SegregateResult<()> {
        match self.consume().await {
            Ok(()) => {
                self.registry.close_all().await?;
                info!(
                    partitions = self.partitions,
                    fragments_in = self.fragments_in,
                    fragments_out = self.fragments_out,
                    classes = self.registry.created(),
                    "segregation complete"
                );
                Ok(())
            }
            Err(primary) => {
                warn!(error = %primary, "segregation failed, closing sub-writers");
                match self.registry.close_all().await {
                    Ok(()) => Err(primary),
                    Err(cleanup) => Err(SegregateError::Cleanup {
                        primary: Box::new(primary),
                        cleanup: Box::new(cleanup),
                    }),
                }
            }
        }
    }

    /// Pulls and routes fragments until end of stream or failure.
    async fn consume(&mut self) -> SegregateResult<()> {
        loop {
            if let Some(abort) = &self.config.abort {
                if abort.is_aborted() {
                    return Err(SegregateError::Aborted);
                }
            }

            let Some(fragment) = self.source.next_fragment().await? else {
                break;
            };
            self.fragments_in += 1;

            match fragment {
                MutationFragment::PartitionStart(start) => self.on_partition_start(start).await?,
                MutationFragment::StaticRow(row) => self.on_static_row(row).await?,
                MutationFragment::ClusteringRow(row) => self.on_clustering_row(row).await?,
                MutationFragment::RangeTombstoneChange(change) => {
                    self.on_tombstone_change(change).await?;
                }
                MutationFragment::PartitionEnd => self.on_partition_end().await?,
            }
        }

        if self.partition.is_some() {
            return Err(out_of_order("stream ended inside a partition"));
        }
        Ok(())
    }

    // -- fragment handlers ----------------------------------------------------

    async fn on_partition_start(&mut self, start: PartitionStart) -> SegregateResult<()> {
        if self.partition.is_some() {
            return Err(out_of_order(format!(
                "partition-start at {} while a partition is open",
                start.key
            )));
        }
        if let Some(prev) = &self.prev_key {
            if start.key <= *prev {
                return Err(out_of_order(format!(
                    "partition key {} does not sort above previous {prev}",
                    start.key
                )));
            }
        }
        let key_len = start.key.key().encoded().len() as u64;
        if key_len > u64::from(self.config.limits.max_partition_key_bytes) {
            return Err(SegregateError::LimitExceeded {
                limit: "max_partition_key_bytes",
                max: u64::from(self.config.limits.max_partition_key_bytes),
                actual: key_len,
            });
        }

        // Under partition-scoped classification the destination is known up
        // front: the boundary itself is routed, so even an empty partition
        // reaches its owner.
        let partition_class = match self.classifier.scope() {
            ClassifyScope::Partition => {
                Some(self.classify(RoutingContext::Ownership(&start.key))?)
            }
            ClassifyScope::Row => None,
        };

        self.prev_key = Some(start.key.clone());
        self.partition = Some(PartitionState::new(start.key, partition_class));
        self.partitions += 1;

        if let Some(class) = partition_class {
            self.open_class(class).await?;
        }
        Ok(())
    }

    async fn on_static_row(&mut self, row: StaticRow) -> SegregateResult<()> {
        let Some(partition) = self.partition.as_ref() else {
            return Err(out_of_order("static-row outside a partition"));
        };
        if partition.seen_static {
            return Err(out_of_order("second static-row in one partition"));
        }
        if partition.seen_positioned {
            return Err(out_of_order("static-row after positioned fragments"));
        }
        // Static rows precede every position; no deletion can be active yet.
        debug_assert!(partition.active.is_none());

        self.check_payload(row.payload.len())?;
        let class = match partition.partition_class {
            Some(class) => class,
            None => self.classify(RoutingContext::WriteTime(row.timestamp))?,
        };

        self.open_class(class).await?;
        self.partition_mut().seen_static = true;
        self.emit(class, MutationFragment::StaticRow(row)).await
    }

    async fn on_clustering_row(&mut self, row: ClusteringRow) -> SegregateResult<()> {
        let Some(partition) = self.partition.as_ref() else {
            return Err(out_of_order("clustering-row outside a partition"));
        };
        if let Some(last) = &partition.last_position {
            if row.key < *last {
                return Err(out_of_order(format!(
                    "clustering position {} sorts below previous {last}",
                    row.key
                )));
            }
        }
        if partition.last_row.as_ref() == Some(&row.key) {
            return Err(out_of_order(format!("duplicate clustering key {}", row.key)));
        }

        self.check_payload(row.payload.len())?;
        let class = match partition.partition_class {
            Some(class) => class,
            None => self.classify(RoutingContext::WriteTime(row.timestamp))?,
        };

        self.open_class(class).await?;
        self.sync_tombstone(class).await?;

        let partition = self.partition_mut();
        partition.seen_positioned = true;
        partition.last_position = Some(row.key.clone());
        partition.last_row = Some(row.key.clone());

        self.emit(class, MutationFragment::ClusteringRow(row)).await
    }

    async fn on_tombstone_change(&mut self, change: RangeTombstoneChange) -> SegregateResult<()> {
        let Some(partition) = self.partition.as_ref() else {
            return Err(out_of_order("range-tombstone-change outside a partition"));
        };
        if let Some(last) = &partition.last_position {
            if change.position < *last {
                return Err(out_of_order(format!(
                    "tombstone position {} sorts below previous {last}",
                    change.position
                )));
            }
        }
        if change.tombstone.is_none() && partition.active.is_none() {
            return Err(out_of_order(format!(
                "tombstone close at {} without an active deletion",
                change.position
            )));
        }

        let position = change.position.clone();
        match change.tombstone {
            Some(tombstone) => self.on_tombstone_open(change.position, tombstone).await?,
            None => self.on_tombstone_close(change.position).await?,
        }

        let partition = self.partition_mut();
        partition.seen_positioned = true;
        partition.last_position = Some(position);
        Ok(())
    }

    /// Routes an opening (or changing) deletion.
    async fn on_tombstone_open(
        &mut self,
        position: ClusteringKey,
        tombstone: Tombstone,
    ) -> SegregateResult<()> {
        let class = match self.partition_ref().partition_class {
            Some(class) => class,
            None => self.classify(RoutingContext::WriteTime(tombstone.timestamp))?,
        };

        // The previous deletion, if any, ends where this one takes effect.
        for state in self.partition_mut().states.values_mut() {
            if *state == ClassTombstoneState::Open {
                *state = ClassTombstoneState::PendingClose(position.clone());
            }
        }

        self.open_class(class).await?;

        // A pending close at an earlier position must materialize before the
        // new deletion; one at this exact position is subsumed by the change
        // fragment itself.
        let earlier_close = match self.partition_ref().states.get(&class) {
            Some(ClassTombstoneState::PendingClose(at)) if *at < position => Some(at.clone()),
            _ => None,
        };
        if let Some(at) = earlier_close {
            self.emit(class, MutationFragment::range_tombstone_change(at, None))
                .await?;
        }

        self.emit(
            class,
            MutationFragment::range_tombstone_change(position.clone(), Some(tombstone)),
        )
        .await?;

        let partition = self.partition_mut();
        partition.states.insert(class, ClassTombstoneState::Open);
        partition.active = Some(ActiveTombstone {
            opened_at: position,
            tombstone,
        });
        Ok(())
    }

    /// Routes a closing deletion.
    async fn on_tombstone_close(&mut self, position: ClusteringKey) -> SegregateResult<()> {
        let partition_class = self.partition_ref().partition_class;
        if let Some(class) = partition_class {
            // Partition scope: the close passes through verbatim.
            self.emit(
                class,
                MutationFragment::range_tombstone_change(position, None),
            )
            .await?;
            let partition = self.partition_mut();
            partition.states.remove(&class);
            partition.active = None;
            return Ok(());
        }

        // Row scope: record lazily. Classes holding the deletion get their
        // close when they next receive a fragment, or at partition-end.
        let partition = self.partition_mut();
        for state in partition.states.values_mut() {
            if *state == ClassTombstoneState::Open {
                *state = ClassTombstoneState::PendingClose(position.clone());
            }
        }
        partition.active = None;
        Ok(())
    }

    async fn on_partition_end(&mut self) -> SegregateResult<()> {
        let Some(partition) = self.partition.as_ref() else {
            return Err(out_of_order("partition-end outside a partition"));
        };
        if partition.active.is_some() {
            return Err(out_of_order("partition ended with an open range deletion"));
        }

        // Materialize the closes still owed to classes holding a deletion.
        // Open states cannot exist here: clearing the active deletion demoted
        // them all.
        let pending: Vec<(ClassId, ClusteringKey)> = partition
            .states
            .iter()
            .map(|(class, state)| match state {
                ClassTombstoneState::PendingClose(at) => (*class, at.clone()),
                ClassTombstoneState::Open => unreachable!("open deletion survived its close"),
            })
            .collect();
        for (class, at) in pending {
            self.emit(class, MutationFragment::range_tombstone_change(at, None))
                .await?;
        }

        let opened: Vec<ClassId> = self.partition_ref().opened.iter().copied().collect();
        for class in opened {
            self.emit(class, MutationFragment::PartitionEnd).await?;
        }

        self.partition = None;
        Ok(())
    }

    // -- routing helpers ------------------------------------------------------

    /// Classifies a routing context, enforcing the class-id bound.
    fn classify(&self, ctx: RoutingContext<'_>) -> SegregateResult<ClassId> {
        let class = self
            .classifier
            .classify(ctx)
            .map_err(|e| SegregateError::Classifier { detail: e.message })?;
        if class.get() >= self.config.limits.max_classes {
            return Err(SegregateError::Classifier {
                detail: format!(
                    "{class} is out of range (max_classes={})",
                    self.config.limits.max_classes
                ),
            });
        }
        Ok(class)
    }

    /// Opens `class` for the current partition if this is its first
    /// fragment: creates the writer if the run has not yet, then replays the
    /// partition boundary.
    async fn open_class(&mut self, class: ClassId) -> SegregateResult<()> {
        if self.partition_ref().opened.contains(&class) {
            return Ok(());
        }
        let key = self.partition_ref().key.clone();

        self.registry.get_or_create(class).await?;
        self.partition_mut().opened.insert(class);
        debug!(class = class.get(), key = %key, "opened partition for class");
        self.emit(class, MutationFragment::partition_start(key)).await
    }

    /// Brings `class`'s tombstone state current before it receives a row.
    async fn sync_tombstone(&mut self, class: ClassId) -> SegregateResult<()> {
        let partition = self.partition_ref();
        let pending_close = match partition.states.get(&class) {
            Some(ClassTombstoneState::PendingClose(at)) => Some(at.clone()),
            _ => None,
        };
        let need_open = match (&partition.active, partition.states.get(&class)) {
            (Some(_), Some(ClassTombstoneState::Open)) | (None, _) => None,
            (Some(active), _) => Some((active.opened_at.clone(), active.tombstone)),
        };

        if let Some(at) = pending_close {
            // A new deletion starting at the same position subsumes the
            // close; otherwise the old deletion must end where it ended in
            // the source.
            let subsumed = need_open
                .as_ref()
                .is_some_and(|(opened_at, _)| *opened_at == at);
            if subsumed {
                self.partition_mut().states.remove(&class);
            } else {
                self.emit(class, MutationFragment::range_tombstone_change(at, None))
                    .await?;
                self.partition_mut().states.remove(&class);
            }
        }

        if let Some((opened_at, tombstone)) = need_open {
            self.emit(
                class,
                MutationFragment::range_tombstone_change(opened_at, Some(tombstone)),
            )
            .await?;
            self.partition_mut()
                .states
                .insert(class, ClassTombstoneState::Open);
        }
        Ok(())
    }

    /// Hands a fragment to an already-opened class's writer.
    async fn emit(&mut self, class: ClassId, fragment: MutationFragment) -> SegregateResult<()> {
        let writer = self
            .registry
            .writer(class)
            .expect("emit to a class without a writer");
        writer
            .accept(fragment)
            .await
            .map_err(|e| SegregateError::Writer {
                class,
                operation: "accept",
                detail: e.message,
            })?;
        self.fragments_out += 1;
        Ok(())
    }

    fn check_payload(&self, len: usize) -> SegregateResult<()> {
        let len = len as u64;
        if len > u64::from(self.config.limits.max_payload_bytes) {
            return Err(SegregateError::LimitExceeded {
                limit: "max_payload_bytes",
                max: u64::from(self.config.limits.max_payload_bytes),
                actual: len,
            });
        }
        Ok(())
    }

    fn partition_ref(&self) -> &PartitionState {
        self.partition.as_ref().expect("no open partition")
    }

    fn partition_mut(&mut self) -> &mut PartitionState {
        self.partition.as_mut().expect("no open partition")
    }
}

impl<S: FragmentSource> std::fmt::Debug for SegregationEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegregationEngine")
            .field("partitions", &self.partitions)
            .field("fragments_in", &self.fragments_in)
            .field("fragments_out", &self.fragments_out)
            .finish_non_exhaustive()
    }
}

fn out_of_order(detail: impl Into<String>) -> SegregateError {
    SegregateError::OutOfOrderInput {
        detail: detail.into(),
    }
}

// -----------------------------------------------------------------------------
// Entry points
// -----------------------------------------------------------------------------

/// Segregates a stream by shard ownership.
///
/// Every partition lands, whole, in the class of the shard owning its token.
/// This is the resharding path: after a topology change, each output stream
/// holds exactly the partitions its shard now owns.
///
/// # Errors
///
/// Returns the first fatal error after best-effort cleanup; see
/// [`SegregateError`].
pub async fn segregate_by_shard<S: FragmentSource>(
    source: S,
    shard_count: u32,
    factory: Box<dyn WriterFactory>,
) -> SegregateResult<()> {
    SegregationEngine::new(
        source,
        Box::new(ShardClassifier::new(shard_count)),
        factory,
        SegregationConfig::default(),
    )
    .run()
    .await
}

/// Segregates a stream by write time.
///
/// Rows and tombstones are routed per-fragment through the caller's
/// predicate, so one partition's data can fan out across classes. This is
/// the repair-aware reorganization path: a watermark predicate separates
/// repaired from unrepaired writes.
///
/// # Errors
///
/// Returns the first fatal error after best-effort cleanup; see
/// [`SegregateError`].
pub async fn segregate_by_timestamp<S, F>(
    source: S,
    classify: F,
    factory: Box<dyn WriterFactory>,
) -> SegregateResult<()>
where
    S: FragmentSource,
    F: Fn(Timestamp) -> Result<ClassId, ClassifyError> + Send + Sync + 'static,
{
    SegregationEngine::new(
        source,
        Box::new(TimestampClassifier::new(classify)),
        factory,
        SegregationConfig::default(),
    )
    .run()
    .await
}
