//! Sub-writer capability traits and the in-memory test writer.
//!
//! A sub-writer consumes one class's complete, self-consistent fragment
//! stream and persists it. Concrete writers are supplied by storage-engine
//! collaborators through a [`WriterFactory`]; the engine only ever talks to
//! the capability interface.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sift_core::{ClassId, MutationFragment};

use crate::error::WriterError;

// -----------------------------------------------------------------------------
// Capability traits
// -----------------------------------------------------------------------------

/// Consumes one class's fragment stream.
///
/// Implementations must be `Send`; the engine owns each writer exclusively
/// and drives it sequentially. `accept` and `close` may suspend (they touch
/// storage); they are the engine's only suspension points besides writer
/// creation and producer pulls.
#[async_trait]
pub trait FragmentWriter: Send {
    /// Accepts the next fragment of this class's stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the fragment cannot be persisted; the engine
    /// treats any error as fatal to the whole run.
    async fn accept(&mut self, fragment: MutationFragment) -> Result<(), WriterError>;

    /// Closes the writer, making everything accepted durable.
    ///
    /// Called exactly once, on success or on engine failure. The writer is
    /// never reused afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be made durable.
    async fn close(&mut self) -> Result<(), WriterError>;
}

/// Constructs sub-writers on first assignment of a class.
///
/// Invoked at most once per distinct class id per run.
#[async_trait]
pub trait WriterFactory: Send {
    /// Creates the writer for `class`.
    ///
    /// # Errors
    ///
    /// Returns an error if the writer cannot be constructed.
    async fn create(&mut self, class: ClassId) -> Result<Box<dyn FragmentWriter>, WriterError>;
}

// -----------------------------------------------------------------------------
// Fault configuration
// -----------------------------------------------------------------------------

/// Fault injection for [`MemoryWriterFactory`], per class.
///
/// All faults are deterministic; the accept fault fires on the n-th accepted
/// fragment, the create/close faults are one-shot flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriterFaultConfig {
    /// If true, creating the writer fails.
    pub force_create_fail: bool,
    /// If set, the n-th call to `accept` (1-based) fails.
    pub fail_accept_at: Option<u32>,
    /// If true, `close` fails (the writer still transitions to closed).
    pub force_close_fail: bool,
}

impl WriterFaultConfig {
    /// Creates a config with no faults.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            force_create_fail: false,
            fail_accept_at: None,
            force_close_fail: false,
        }
    }

    /// Makes writer creation fail.
    #[must_use]
    pub const fn with_force_create_fail(mut self) -> Self {
        self.force_create_fail = true;
        self
    }

    /// Makes the n-th accepted fragment (1-based) fail.
    #[must_use]
    pub const fn with_fail_accept_at(mut self, nth: u32) -> Self {
        self.fail_accept_at = Some(nth);
        self
    }

    /// Makes `close` fail.
    #[must_use]
    pub const fn with_force_close_fail(mut self) -> Self {
        self.force_close_fail = true;
        self
    }
}

// -----------------------------------------------------------------------------
// MemoryWriter
// -----------------------------------------------------------------------------

/// Per-class recording state shared between factory handles and writers.
#[derive(Debug, Default)]
struct ClassSink {
    fragments: Vec<MutationFragment>,
    accepted: u32,
    created: bool,
    closed: bool,
    faults: WriterFaultConfig,
}

#[derive(Debug, Default)]
struct SharedSinks {
    classes: BTreeMap<ClassId, ClassSink>,
}

/// An in-memory sub-writer recording its class's fragments.
///
/// Produced by [`MemoryWriterFactory`]; used by unit tests, integration
/// tests, and benchmarks to observe exactly what each class received.
#[derive(Debug)]
pub struct MemoryWriter {
    class: ClassId,
    shared: Arc<Mutex<SharedSinks>>,
}

#[async_trait]
impl FragmentWriter for MemoryWriter {
    async fn accept(&mut self, fragment: MutationFragment) -> Result<(), WriterError> {
        let mut shared = self.shared.lock().expect("sink lock poisoned");
        let sink = shared
            .classes
            .get_mut(&self.class)
            .expect("writer without sink");

        // Precondition: a closed writer is never reused.
        assert!(!sink.closed, "accept on closed writer {}", self.class);

        sink.accepted += 1;
        if sink.faults.fail_accept_at == Some(sink.accepted) {
            return Err(WriterError::new(format!(
                "simulated accept failure on fragment {}",
                sink.accepted
            )));
        }
        sink.fragments.push(fragment);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), WriterError> {
        let mut shared = self.shared.lock().expect("sink lock poisoned");
        let sink = shared
            .classes
            .get_mut(&self.class)
            .expect("writer without sink");

        // Precondition: close is called exactly once.
        assert!(!sink.closed, "double close of writer {}", self.class);
        sink.closed = true;

        if sink.faults.force_close_fail {
            return Err(WriterError::new("simulated close failure"));
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// MemoryWriterFactory
// -----------------------------------------------------------------------------

/// Factory for [`MemoryWriter`]s with per-class fault injection.
///
/// Clones share the same underlying sinks, so a test can keep a handle for
/// inspection while the engine consumes another.
#[derive(Debug, Default)]
pub struct MemoryWriterFactory {
    shared: Arc<Mutex<SharedSinks>>,
}

impl MemoryWriterFactory {
    /// Creates a factory with no faults configured.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures fault injection for one class.
    #[must_use]
    pub fn with_fault(self, class: ClassId, faults: WriterFaultConfig) -> Self {
        {
            let mut shared = self.shared.lock().expect("sink lock poisoned");
            shared.classes.entry(class).or_default().faults = faults;
        }
        self
    }

    /// Returns the classes whose writers were created, in order.
    ///
    /// # Panics
    ///
    /// Panics if the sink lock is poisoned.
    #[must_use]
    pub fn created_classes(&self) -> Vec<ClassId> {
        let shared = self.shared.lock().expect("sink lock poisoned");
        shared
            .classes
            .iter()
            .filter(|(_, sink)| sink.created)
            .map(|(class, _)| *class)
            .collect()
    }

    /// Returns a copy of the fragments one class received.
    ///
    /// Empty if the class's writer was never created.
    ///
    /// # Panics
    ///
    /// Panics if the sink lock is poisoned.
    #[must_use]
    pub fn fragments(&self, class: ClassId) -> Vec<MutationFragment> {
        let shared = self.shared.lock().expect("sink lock poisoned");
        shared
            .classes
            .get(&class)
            .map(|sink| sink.fragments.clone())
            .unwrap_or_default()
    }

    /// Returns true if the class's writer was created and closed.
    ///
    /// # Panics
    ///
    /// Panics if the sink lock is poisoned.
    #[must_use]
    pub fn is_closed(&self, class: ClassId) -> bool {
        let shared = self.shared.lock().expect("sink lock poisoned");
        shared.classes.get(&class).is_some_and(|sink| sink.closed)
    }
}

impl Clone for MemoryWriterFactory {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

#[async_trait]
impl WriterFactory for MemoryWriterFactory {
    async fn create(&mut self, class: ClassId) -> Result<Box<dyn FragmentWriter>, WriterError> {
        let mut shared = self.shared.lock().expect("sink lock poisoned");
        let sink = shared.classes.entry(class).or_default();

        // Precondition: at most one writer per class per run.
        assert!(!sink.created, "writer for {class} created twice");

        if sink.faults.force_create_fail {
            return Err(WriterError::new("simulated create failure"));
        }
        sink.created = true;
        drop(shared);

        Ok(Box::new(MemoryWriter {
            class,
            shared: self.shared.clone(),
        }))
    }
}
