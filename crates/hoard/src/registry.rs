//! Registry of importer plugins.
//!
//! The registry is an explicit object built once at startup and handed to the
//! database; plugins register during construction rather than through hidden
//! global state.

use std::sync::Arc;

use camino::Utf8Path;

use crate::import::Importer;

/// Result of resolving the importer that owns a path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Selection {
    /// Index of the winning importer inside the registry.
    pub index: usize,
    /// Import queue of the winning importer.
    pub queue: i32,
    /// Version of the winning importer.
    pub version: u32,
}

/// All registered importers.
#[derive(Default)]
pub struct Importers {
    entries: Vec<Arc<dyn Importer>>,
}

impl Importers {
    pub fn new() -> Self {
        Importers {
            entries: Vec::new(),
        }
    }

    pub fn register(&mut self, importer: Arc<dyn Importer>) {
        tracing::debug!(
            "Registered importer '{}' for {:?}",
            importer.name(),
            importer.extensions()
        );
        self.entries.push(importer);
    }

    /// Builder form of [`register`](Self::register) for startup code.
    pub fn with(mut self, importer: Arc<dyn Importer>) -> Self {
        self.register(importer);
        self
    }

    pub fn get(&self, index: usize) -> Option<&Arc<dyn Importer>> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolves the importer owning `path`.
    ///
    /// Returns `None` when no importer claims the extension; such paths are
    /// not assets and the pipeline ignores them. When several importers
    /// claim the extension the lowest `order` wins, ties fall to the lowest
    /// `queue`, remaining ties to registration order. The rule is part of
    /// the contract: changing it silently changes which importer owns
    /// ambiguous extensions.
    pub fn resolve(&self, path: &Utf8Path) -> Option<Selection> {
        let extension = path.extension()?;

        self.entries
            .iter()
            .enumerate()
            .filter(|(_, importer)| {
                importer
                    .extensions()
                    .iter()
                    .any(|e| e.eq_ignore_ascii_case(extension))
            })
            .min_by_key(|(index, importer)| (importer.order(), importer.queue(), *index))
            .map(|(index, importer)| Selection {
                index,
                queue: importer.queue(),
                version: importer.version(),
            })
    }
}

#[cfg(test)]
mod tests {
    use camino::Utf8Path;

    use crate::import::{ImportContext, ImportError};

    use super::*;

    struct FakeImporter {
        name: &'static str,
        extensions: &'static [&'static str],
        queue: i32,
        order: i32,
    }

    impl Importer for FakeImporter {
        fn name(&self) -> &str {
            self.name
        }

        fn extensions(&self) -> &[&str] {
            self.extensions
        }

        fn target(&self) -> &str {
            self.name
        }

        fn version(&self) -> u32 {
            1
        }

        fn queue(&self) -> i32 {
            self.queue
        }

        fn order(&self) -> i32 {
            self.order
        }

        fn import(
            &self,
            _source: &Utf8Path,
            _ctx: &mut ImportContext<'_>,
        ) -> Result<(), ImportError> {
            Ok(())
        }
    }

    fn fake(name: &'static str, extensions: &'static [&'static str], queue: i32, order: i32) -> Arc<dyn Importer> {
        Arc::new(FakeImporter {
            name,
            extensions,
            queue,
            order,
        })
    }

    #[test]
    fn test_unclaimed_extension_resolves_to_none() {
        let importers = Importers::new().with(fake("text", &["txt"], 0, 0));
        assert_eq!(importers.resolve(Utf8Path::new("a.bin")), None);
    }

    #[test]
    fn test_lowest_order_wins() {
        let importers = Importers::new()
            .with(fake("generic", &["txt"], 0, 10))
            .with(fake("special", &["txt"], 0, 5));

        let selection = importers.resolve(Utf8Path::new("a.txt")).unwrap();
        assert_eq!(selection.index, 1);
    }

    #[test]
    fn test_order_tie_falls_to_queue_then_registration() {
        let importers = Importers::new()
            .with(fake("late", &["txt"], 20, 0))
            .with(fake("early", &["txt"], 10, 0))
            .with(fake("also-early", &["txt"], 10, 0));

        let selection = importers.resolve(Utf8Path::new("a.txt")).unwrap();
        assert_eq!(selection.index, 1);
    }

    #[test]
    fn test_extension_match_ignores_case() {
        let importers = Importers::new().with(fake("text", &["txt"], 0, 0));
        assert!(importers.resolve(Utf8Path::new("a.TXT")).is_some());
    }
}
