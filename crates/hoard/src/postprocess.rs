use std::{
    collections::{BTreeMap, BTreeSet},
    panic::{catch_unwind, AssertUnwindSafe},
};

use camino::Utf8PathBuf;

use crate::id::Guid;

/// Everything that happened to the asset set during one orchestration pass.
///
/// Each asset appears in at most one of the sets. The batch is constructed
/// once, after the last import of the pass, and handed read-only to every
/// subscriber.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PostprocessBatch {
    /// Assets reimported in place.
    pub refreshed: BTreeSet<Guid>,

    /// Assets imported for the first time.
    pub added: BTreeSet<Guid>,

    /// Assets whose source disappeared.
    pub removed: BTreeSet<Guid>,

    /// Assets whose source changed path, with the new path.
    pub moved: BTreeMap<Guid, Utf8PathBuf>,
}

impl PostprocessBatch {
    pub fn is_empty(&self) -> bool {
        self.refreshed.is_empty()
            && self.added.is_empty()
            && self.removed.is_empty()
            && self.moved.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{reason}")]
pub struct PostprocessError {
    pub reason: String,
}

impl PostprocessError {
    pub fn new(reason: impl Into<String>) -> Self {
        PostprocessError {
            reason: reason.into(),
        }
    }
}

/// Observer of completed import batches.
///
/// Subscribers must treat the batch as read-only and must not trigger
/// another import pass from inside the callback.
pub trait Postprocessor: Send + Sync {
    fn name(&self) -> &str {
        "postprocessor"
    }

    fn on_batch(&self, batch: &PostprocessBatch) -> Result<(), PostprocessError>;
}

/// Ordered list of batch subscribers.
///
/// Subscribers accumulate in registration order for the life of the process
/// and are notified synchronously, in that order. A failing or panicking
/// subscriber is logged and the rest still observe the batch.
#[derive(Default)]
pub struct PostprocessBus {
    subscribers: Vec<Box<dyn Postprocessor>>,
}

impl PostprocessBus {
    pub fn new() -> Self {
        PostprocessBus::default()
    }

    pub fn register(&mut self, subscriber: Box<dyn Postprocessor>) {
        tracing::debug!("Registered postprocessor '{}'", subscriber.name());
        self.subscribers.push(subscriber);
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn notify(&self, batch: &PostprocessBatch) {
        for subscriber in &self.subscribers {
            match catch_unwind(AssertUnwindSafe(|| subscriber.on_batch(batch))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::error!("Postprocessor '{}' failed. {err}", subscriber.name());
                }
                Err(_) => {
                    tracing::error!("Postprocessor '{}' panicked", subscriber.name());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    struct Counter {
        calls: Arc<AtomicUsize>,
    }

    impl Postprocessor for Counter {
        fn on_batch(&self, _batch: &PostprocessBatch) -> Result<(), PostprocessError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Faulty;

    impl Postprocessor for Faulty {
        fn on_batch(&self, _batch: &PostprocessBatch) -> Result<(), PostprocessError> {
            Err(PostprocessError::new("broken subscriber"))
        }
    }

    struct Panicky;

    impl Postprocessor for Panicky {
        fn on_batch(&self, _batch: &PostprocessBatch) -> Result<(), PostprocessError> {
            panic!("subscriber panic");
        }
    }

    #[test]
    fn test_failing_subscriber_does_not_stop_the_rest() {
        let calls = Arc::new(AtomicUsize::new(0));

        let mut bus = PostprocessBus::new();
        bus.register(Box::new(Faulty));
        bus.register(Box::new(Panicky));
        bus.register(Box::new(Counter {
            calls: calls.clone(),
        }));

        bus.notify(&PostprocessBatch::default());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
