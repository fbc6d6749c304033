//! Fragment producers: the input side of a segregation run.

use std::collections::VecDeque;

use async_trait::async_trait;
use sift_core::MutationFragment;

use crate::error::SegregateResult;

/// An abstract producer of mutation fragments in stream order.
///
/// The engine owns the source exclusively for the duration of a run and
/// pulls it sequentially. A source yields `None` exactly once, at end of
/// stream; the engine treats anything arriving out of order as a fatal
/// protocol violation, not a recoverable condition.
#[async_trait]
pub trait FragmentSource: Send {
    /// Returns the next fragment, or `None` at end of stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying reader fails; any error is fatal
    /// to the run.
    async fn next_fragment(&mut self) -> SegregateResult<Option<MutationFragment>>;
}

/// An in-memory source over a pre-built fragment sequence.
///
/// Used by tests and benchmarks; production runs wrap the storage layer's
/// own readers instead.
#[derive(Debug, Default)]
pub struct VecSource {
    fragments: VecDeque<MutationFragment>,
}

impl VecSource {
    /// Creates a source yielding the given fragments in order.
    #[must_use]
    pub fn new(fragments: Vec<MutationFragment>) -> Self {
        Self {
            fragments: fragments.into(),
        }
    }

    /// Returns the number of fragments not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.fragments.len()
    }
}

#[async_trait]
impl FragmentSource for VecSource {
    async fn next_fragment(&mut self) -> SegregateResult<Option<MutationFragment>> {
        Ok(self.fragments.pop_front())
    }
}
