//! Sidecar metadata stored next to every importable file.
//!
//! The sidecar carries the asset's identity: its guid, the identifier-to-name
//! association of every object the file produces, the importer version that
//! wrote it, labels and the importer's own settings. It travels with the file,
//! which is what lets a moved asset keep its guid.

use std::collections::BTreeSet;

use camino::{Utf8Path, Utf8PathBuf};
use hashbrown::HashMap;

use crate::id::{Guid, LocalId};

pub const META_EXTENSION: &'static str = "hoard";
const DOT_META_EXTENSION: &'static str = ".hoard";

/// Current sidecar schema.
///
/// Schema 1 stored a flat `names` table mapping object name to identifier;
/// it is migrated on read by [`migrate`].
const CURRENT_SCHEMA: i64 = 2;

#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    #[error("Failed to read file '{path}': {error}")]
    ReadError {
        error: std::io::Error,
        path: Utf8PathBuf,
    },

    #[error("Failed to write file '{path}': {error}")]
    WriteError {
        error: std::io::Error,
        path: Utf8PathBuf,
    },

    #[error("Failed to deserialize TOML '{path}': {error}")]
    DeserializeError {
        error: toml::de::Error,
        path: Utf8PathBuf,
    },

    #[error("Failed to serialize TOML '{path}': {error}")]
    SerializeError {
        error: toml::ser::Error,
        path: Utf8PathBuf,
    },
}

/// Metadata associated with one asset source file or folder.
/// Stored in a sibling file with `.hoard` extension added.
#[derive(serde::Serialize, serde::Deserialize)]
pub struct AssetMeta {
    schema: i64,

    guid: Guid,

    #[serde(skip_serializing_if = "is_zero", default)]
    importer_version: u32,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    main: Option<LocalId>,

    #[serde(skip_serializing_if = "BTreeSet::is_empty", default)]
    labels: BTreeSet<String>,

    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    file_ids: HashMap<LocalId, String>,

    #[serde(skip_serializing_if = "toml::Table::is_empty", default)]
    settings: toml::Table,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

impl AssetMeta {
    /// Creates fresh metadata with no prior identity.
    pub fn new(guid: Guid) -> Self {
        AssetMeta {
            schema: CURRENT_SCHEMA,
            guid,
            importer_version: 0,
            main: None,
            labels: BTreeSet::new(),
            file_ids: HashMap::new(),
            settings: toml::Table::new(),
        }
    }

    /// Sidecar path for a source path.
    pub fn meta_path(source: &Utf8Path) -> Utf8PathBuf {
        let mut filename = source.file_name().unwrap_or("").to_owned();
        filename.push_str(DOT_META_EXTENSION);
        source.with_file_name(filename)
    }

    pub fn is_meta_path(path: &Utf8Path) -> bool {
        path.extension().map_or(false, |e| e == META_EXTENSION)
    }

    /// Source path a sidecar belongs to.
    pub fn primary_path(meta_path: &Utf8Path) -> Utf8PathBuf {
        meta_path.with_extension("")
    }

    /// Reads a sidecar. Returns `None` when the file does not exist.
    /// Schema 1 documents are migrated before deserialization.
    pub fn read(meta_path: &Utf8Path) -> Result<Option<AssetMeta>, MetaError> {
        let data = match std::fs::read_to_string(meta_path.as_std_path()) {
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => {
                return Err(MetaError::ReadError {
                    error,
                    path: meta_path.to_owned(),
                })
            }
            Ok(data) => data,
        };

        let document: toml::Table =
            toml::from_str(&data).map_err(|error| MetaError::DeserializeError {
                error,
                path: meta_path.to_owned(),
            })?;

        let document = migrate(document);

        let mut meta: AssetMeta =
            document
                .try_into()
                .map_err(|error| MetaError::DeserializeError {
                    error,
                    path: meta_path.to_owned(),
                })?;

        // Odd identifiers are corrupt legacy data, downgrade them to fresh allocation.
        meta.file_ids.retain(|id, name| {
            if id.is_valid() {
                true
            } else {
                tracing::warn!(
                    "Dropping corrupt odd identifier {id} for '{name}' in '{meta_path}'"
                );
                false
            }
        });

        Ok(Some(meta))
    }

    pub fn write(&self, meta_path: &Utf8Path) -> Result<(), MetaError> {
        let data = toml::to_string_pretty(self).map_err(|error| MetaError::SerializeError {
            error,
            path: meta_path.to_owned(),
        })?;
        std::fs::write(meta_path.as_std_path(), data.as_bytes()).map_err(|error| {
            MetaError::WriteError {
                error,
                path: meta_path.to_owned(),
            }
        })?;
        Ok(())
    }

    pub fn guid(&self) -> Guid {
        self.guid
    }

    pub fn set_guid(&mut self, guid: Guid) {
        self.guid = guid;
    }

    pub fn importer_version(&self) -> u32 {
        self.importer_version
    }

    pub fn set_importer_version(&mut self, version: u32) {
        self.importer_version = version;
    }

    pub fn main(&self) -> Option<LocalId> {
        self.main
    }

    pub fn set_main(&mut self, main: Option<LocalId>) {
        self.main = main;
    }

    pub fn labels(&self) -> &BTreeSet<String> {
        &self.labels
    }

    pub fn set_labels(&mut self, labels: BTreeSet<String>) {
        self.labels = labels;
    }

    pub fn file_ids(&self) -> impl Iterator<Item = (LocalId, &str)> + '_ {
        self.file_ids.iter().map(|(&id, name)| (id, &**name))
    }

    pub fn set_file_ids<'a>(&mut self, entries: impl IntoIterator<Item = (LocalId, &'a str)>) {
        self.file_ids = entries
            .into_iter()
            .map(|(id, name)| (id, name.to_owned()))
            .collect();
    }

    pub fn settings(&self) -> &toml::Table {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut toml::Table {
        &mut self.settings
    }
}

/// Rewrites a legacy sidecar document into the current schema.
/// Documents already at the current schema pass through unchanged.
fn migrate(mut document: toml::Table) -> toml::Table {
    let schema = document
        .get("schema")
        .and_then(toml::Value::as_integer)
        .unwrap_or(1);

    if schema >= CURRENT_SCHEMA {
        return document;
    }

    // Schema 1: `names` table of object name to identifier, `version` key
    // for the importer version. Invert the orientation, keep the smallest
    // identifier when a name was recorded twice.
    let mut file_ids = toml::Table::new();
    if let Some(toml::Value::Table(names)) = document.remove("names") {
        let mut entries: Vec<(i64, String)> = names
            .into_iter()
            .filter_map(|(name, id)| id.as_integer().map(|id| (id, name)))
            .collect();
        entries.sort();

        for (id, name) in entries {
            if id < 0 || id > u32::MAX as i64 || id % 2 != 0 {
                tracing::warn!("Dropping corrupt legacy identifier {id} for '{name}'");
                continue;
            }
            if file_ids.values().any(|n| n.as_str() == Some(name.as_str())) {
                tracing::warn!("Dropping duplicate legacy identifier {id} for '{name}'");
                continue;
            }
            file_ids.insert(id.to_string(), toml::Value::String(name));
        }
    }

    if !file_ids.is_empty() {
        document.insert("file_ids".to_owned(), toml::Value::Table(file_ids));
    }

    if let Some(version) = document.remove("version") {
        document.insert("importer_version".to_owned(), version);
    }

    document.insert("schema".to_owned(), toml::Value::Integer(CURRENT_SCHEMA));
    document
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_path_round_trip() {
        let source = Utf8Path::new("textures/ship.qoi");
        let meta = AssetMeta::meta_path(source);
        assert_eq!(meta, Utf8Path::new("textures/ship.qoi.hoard"));
        assert!(AssetMeta::is_meta_path(&meta));
        assert_eq!(AssetMeta::primary_path(&meta), source);
    }

    #[test]
    fn test_migrate_inverts_legacy_names() {
        let legacy: toml::Table = toml::from_str(
            r#"
            guid = "00000000000000000000000000000abc"
            version = 3

            [names]
            hull = 400002
            mast = 400005
            "#,
        )
        .unwrap();

        let document = migrate(legacy);
        let meta: AssetMeta = document.try_into().unwrap();

        assert_eq!(meta.importer_version(), 3);
        let ids: Vec<(LocalId, &str)> = meta.file_ids().collect();
        // The odd identifier is corrupt and dropped.
        assert_eq!(ids, vec![(LocalId::from_raw(400_002), "hull")]);
    }

    #[test]
    fn test_current_schema_passes_through() {
        let meta = AssetMeta::new(Guid::new(7).unwrap());
        let data = toml::to_string_pretty(&meta).unwrap();
        let document: toml::Table = toml::from_str(&data).unwrap();
        let back: AssetMeta = migrate(document).try_into().unwrap();
        assert_eq!(back.guid(), meta.guid());
    }
}
