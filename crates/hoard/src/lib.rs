//! Incremental asset import pipeline.
//!
//! Source files inside an asset root are converted into persisted objects by
//! importer plugins. The pipeline decides which files must be (re)converted,
//! in what order, and guarantees stable object identity across repeated
//! imports so that cross-references between assets never silently break.
//!
//! - Every asset is identified by a 128-bit guid minted on first import.
//!   The guid lives in a sidecar file next to the source and survives moves
//!   and renames.
//!
//! - Every object an importer produces gets a 32-bit local identifier that
//!   is stable across reimports for the same object name. The name-to-id
//!   table is persisted in the sidecar as well.
//!
//! - A refresh pass walks the root, classifies every path as unchanged,
//!   changed, added, removed or moved in a single traversal, imports what
//!   went stale in import-queue order, and hands the resulting batch to
//!   registered postprocessors.
//!
//! - A failed import rolls the asset back to its last successful state and
//!   is retried at the next pass; one broken asset never aborts a batch.

mod database;
mod gen;
mod id;
mod import;
mod meta;
mod objects;
mod postprocess;
mod registry;
mod sha256;
mod stable_id;
mod staleness;

pub use self::{
    database::{
        AbortHandle, AssetDatabase, AssetRecord, DatabaseInfo, Force, MoveError, OpenError,
        RefreshError, RefreshOutcome, RemoveError,
    },
    gen::Generator,
    id::{Guid, LocalId, ObjectKind, ParseGuidError, MAX_OBJECTS_PER_KIND},
    import::{ImportContext, ImportError, ImportMessage, Importer, Severity},
    meta::{AssetMeta, MetaError, META_EXTENSION},
    objects::{ObjectRecord, ObjectSet},
    postprocess::{PostprocessBatch, PostprocessBus, PostprocessError, Postprocessor},
    registry::{Importers, Selection},
    sha256::Sha256Hash,
    stable_id::StableIdTable,
    staleness::{Stamp, StampTable, StateError},
};
