//! Contains everything that is required to implement an importer plugin.
//!
//! An importer converts one recognized source file into one or more persisted
//! objects. Implementations never mint identifiers themselves: every object
//! goes through the [`ImportContext`], which recycles the stable identifier
//! recorded for the object's name on previous imports.
//!
//! # Usage
//!
//! ```
//! struct FooImporter;
//!
//! impl hoard::Importer for FooImporter {
//!     fn name(&self) -> &str {
//!         "foo"
//!     }
//!
//!     fn extensions(&self) -> &[&str] {
//!         &["foo"]
//!     }
//!
//!     fn target(&self) -> &str {
//!         "foo"
//!     }
//!
//!     fn version(&self) -> u32 {
//!         1
//!     }
//!
//!     fn import(
//!         &self,
//!         source: &camino::Utf8Path,
//!         ctx: &mut hoard::ImportContext<'_>,
//!     ) -> Result<(), hoard::ImportError> {
//!         let bytes = std::fs::read(source.as_std_path()).map_err(hoard::ImportError::other)?;
//!         let id = ctx.produce(hoard::ObjectKind(1), "content");
//!         ctx.set_payload(id, bytes);
//!         Ok(())
//!     }
//! }
//! ```

mod context;
mod importer;

pub use self::{
    context::ImportContext,
    importer::{ImportError, ImportMessage, Importer, Severity},
};
