//! Sub-writer registry: lazy, at-most-once writer creation per class.

use std::collections::BTreeMap;

use sift_core::ClassId;
use tracing::{debug, warn};

use crate::error::{SegregateError, SegregateResult};
use crate::writer::{FragmentWriter, WriterFactory};

/// Owns one sub-writer per class, created lazily on first use.
///
/// Creation is at-most-once per class: asking for a class that already has a
/// writer is the normal success path, not an error. Writers are closed
/// exactly once by [`WriterRegistry::close_all`] and never reused after.
pub struct WriterRegistry {
    factory: Box<dyn WriterFactory>,
    writers: BTreeMap<ClassId, Box<dyn FragmentWriter>>,
    created: u32,
    closed: bool,
}

impl WriterRegistry {
    /// Creates an empty registry around a writer factory.
    #[must_use]
    pub fn new(factory: Box<dyn WriterFactory>) -> Self {
        Self {
            factory,
            writers: BTreeMap::new(),
            created: 0,
            closed: false,
        }
    }

    /// Returns the writer for `class`, constructing it on first request.
    ///
    /// # Errors
    ///
    /// Returns [`SegregateError::Writer`] if the factory fails.
    pub async fn get_or_create(
        &mut self,
        class: ClassId,
    ) -> SegregateResult<&mut (dyn FragmentWriter + 'static)> {
        // Precondition: a closed registry hands out no writers.
        assert!(!self.closed, "registry used after close_all");

        if !self.writers.contains_key(&class) {
            let writer =
                self.factory
                    .create(class)
                    .await
                    .map_err(|e| SegregateError::Writer {
                        class,
                        operation: "create",
                        detail: e.message,
                    })?;
            self.writers.insert(class, writer);
            self.created += 1;
            debug!(class = class.get(), "created sub-writer");
        }

        let writer = self.writers.get_mut(&class).expect("writer just ensured");
        Ok(&mut **writer)
    }

    /// Returns the already-created writer for `class`, if any.
    pub fn writer(&mut self, class: ClassId) -> Option<&mut (dyn FragmentWriter + 'static)> {
        self.writers.get_mut(&class).map(|writer| &mut **writer)
    }

    /// Returns true if a writer exists for `class`.
    #[must_use]
    pub fn contains(&self, class: ClassId) -> bool {
        self.writers.contains_key(&class)
    }

    /// Returns how many writers were created this run.
    #[must_use]
    pub const fn created(&self) -> u32 {
        self.created
    }

    /// Closes every created writer, keeping the first failure while still
    /// attempting the rest.
    ///
    /// Idempotent: a second call is a no-op. Each writer is closed at most
    /// once; failures beyond the first are logged, not returned.
    ///
    /// # Errors
    ///
    /// Returns the first close failure as [`SegregateError::Writer`].
    pub async fn close_all(&mut self) -> SegregateResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut first_error = None;
        let writers = std::mem::take(&mut self.writers);
        for (class, mut writer) in writers {
            if let Err(e) = writer.close().await {
                warn!(class = class.get(), error = %e, "sub-writer close failed");
                if first_error.is_none() {
                    first_error = Some(SegregateError::Writer {
                        class,
                        operation: "close",
                        detail: e.message,
                    });
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for WriterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterRegistry")
            .field("created", &self.created)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{MemoryWriterFactory, WriterFaultConfig};

    #[tokio::test]
    async fn test_get_or_create_is_at_most_once() {
        let factory = MemoryWriterFactory::new();
        let inspect = factory.clone();
        let mut registry = WriterRegistry::new(Box::new(factory));

        // Second request for the same class is the normal success path; the
        // MemoryWriterFactory would panic on a second create.
        let _ = registry.get_or_create(ClassId::new(3)).await.unwrap();
        let _ = registry.get_or_create(ClassId::new(3)).await.unwrap();

        assert_eq!(registry.created(), 1);
        assert_eq!(inspect.created_classes(), vec![ClassId::new(3)]);
    }

    #[tokio::test]
    async fn test_create_failure_is_wrapped() {
        let factory = MemoryWriterFactory::new()
            .with_fault(ClassId::new(0), WriterFaultConfig::none().with_force_create_fail());
        let mut registry = WriterRegistry::new(Box::new(factory));

        let err = registry.get_or_create(ClassId::new(0)).await.err().unwrap();
        assert!(matches!(
            err,
            SegregateError::Writer {
                operation: "create",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_close_all_keeps_first_failure_closes_rest() {
        let factory = MemoryWriterFactory::new()
            .with_fault(ClassId::new(0), WriterFaultConfig::none().with_force_close_fail());
        let inspect = factory.clone();
        let mut registry = WriterRegistry::new(Box::new(factory));

        let _ = registry.get_or_create(ClassId::new(0)).await.unwrap();
        let _ = registry.get_or_create(ClassId::new(1)).await.unwrap();

        let err = registry.close_all().await.unwrap_err();
        assert!(matches!(
            err,
            SegregateError::Writer {
                operation: "close",
                ..
            }
        ));
        // The healthy writer was still closed.
        assert!(inspect.is_closed(ClassId::new(1)));
    }

    #[tokio::test]
    async fn test_close_all_is_idempotent() {
        let mut registry = WriterRegistry::new(Box::new(MemoryWriterFactory::new()));
        let _ = registry.get_or_create(ClassId::new(0)).await.unwrap();

        registry.close_all().await.unwrap();
        registry.close_all().await.unwrap();
    }
}
