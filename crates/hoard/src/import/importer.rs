use std::fmt::Display;

use camino::Utf8Path;

use super::ImportContext;

/// Error of `Importer::import` method.
#[derive(Debug)]
pub enum ImportError {
    /// Source file cannot be parsed as the declared format.
    Malformed {
        /// Failure reason.
        reason: String,
    },

    /// Importer failed to import the asset.
    Other {
        /// Failure reason.
        reason: String,
    },
}

impl ImportError {
    pub fn malformed(error: impl Display) -> Self {
        ImportError::Malformed {
            reason: error.to_string(),
        }
    }

    pub fn other(error: impl Display) -> Self {
        ImportError::Other {
            reason: error.to_string(),
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            ImportError::Malformed { reason } => reason,
            ImportError::Other { reason } => reason,
        }
    }
}

/// How bad a message attached to an import is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// One entry of an asset's import log.
#[derive(Clone, Debug)]
pub struct ImportMessage {
    pub severity: Severity,
    pub text: String,
}

/// Trait for an importer.
///
/// One importer owns every source file it claims through [`extensions`](Self::extensions).
/// Implementations may parallelize their own heavy work internally, but must
/// only touch the pipeline's tables through the context they are handed, on
/// the thread that called them.
pub trait Importer: Send + Sync + 'static {
    /// Short name used in logs and error messages.
    fn name(&self) -> &str;

    /// Returns list of extensions for source formats this importer claims.
    fn extensions(&self) -> &[&str];

    /// Returns target format importer produces.
    fn target(&self) -> &str;

    /// Version of the importer's output.
    ///
    /// Bumping it makes every asset this importer owns stale at the next
    /// scan, without touching any source file.
    fn version(&self) -> u32;

    /// Import queue index. Lower queues import earlier within a batch,
    /// so assets whose importers read other kinds of assets can rely on
    /// those kinds being imported first.
    fn queue(&self) -> i32 {
        0
    }

    /// Tie-breaker when several importers claim the same path.
    /// Lower order wins.
    fn order(&self) -> i32 {
        0
    }

    /// Reads data from `source` path and produces objects through `ctx`.
    ///
    /// Failures are reported by returning an error or through
    /// [`ImportContext::add_message`]; an import that produces no objects at
    /// all is treated as failed.
    fn import(&self, source: &Utf8Path, ctx: &mut ImportContext<'_>) -> Result<(), ImportError>;
}
