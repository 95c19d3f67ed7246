//! Reference importers for the pipeline: plain text and QOI images.

use std::fmt::Display;

use camino::Utf8Path;
use hoard::{ImportContext, ImportError, Importer, ObjectKind, Severity};

/// Object kind of text documents.
pub const TEXT_KIND: ObjectKind = ObjectKind(49);

/// Object kind of images.
pub const IMAGE_KIND: ObjectKind = ObjectKind(28);

/// Imports plain text documents as a single text object.
pub struct TextImporter;

impl Importer for TextImporter {
    fn name(&self) -> &str {
        "text"
    }

    fn extensions(&self) -> &[&str] {
        &["txt", "md"]
    }

    fn target(&self) -> &str {
        "text"
    }

    fn version(&self) -> u32 {
        1
    }

    fn import(&self, source: &Utf8Path, ctx: &mut ImportContext<'_>) -> Result<(), ImportError> {
        let text = std::fs::read_to_string(source.as_std_path()).map_err(error_to_reason)?;

        if text.is_empty() {
            ctx.add_message(Severity::Warning, "Document is empty");
        }

        let id = ctx.produce(TEXT_KIND, "content");
        ctx.set_payload(id, text.into_bytes());
        Ok(())
    }
}

/// Imports QOI images.
///
/// QOI already is the engine-native image encoding, so the payload is the
/// source file as-is; decoding only validates it and extracts dimensions.
pub struct QoiImporter;

impl Importer for QoiImporter {
    fn name(&self) -> &str {
        "qoi"
    }

    fn extensions(&self) -> &[&str] {
        &["qoi"]
    }

    fn target(&self) -> &str {
        "qoi"
    }

    fn version(&self) -> u32 {
        1
    }

    fn queue(&self) -> i32 {
        10
    }

    fn import(&self, source: &Utf8Path, ctx: &mut ImportContext<'_>) -> Result<(), ImportError> {
        let bytes = std::fs::read(source.as_std_path()).map_err(error_to_reason)?;

        let (qoi, _pixels) =
            rapid_qoi::Qoi::decode_alloc(&bytes).map_err(|error| ImportError::Malformed {
                reason: error.to_string(),
            })?;

        let id = ctx.produce(IMAGE_KIND, "image");
        ctx.set_payload(id, bytes);
        ctx.set_main(id);

        let settings = ctx.settings_mut();
        settings.insert("width".to_owned(), toml::Value::Integer(qoi.width as i64));
        settings.insert("height".to_owned(), toml::Value::Integer(qoi.height as i64));

        Ok(())
    }
}

fn error_to_reason<E: Display>(error: E) -> ImportError {
    ImportError::Other {
        reason: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use hoard::{AssetDatabase, DatabaseInfo, Importers, RefreshOutcome};
    use std::sync::Arc;

    use super::*;

    fn database(root: &std::path::Path) -> AssetDatabase {
        let importers = Importers::new()
            .with(Arc::new(TextImporter))
            .with(Arc::new(QoiImporter));
        AssetDatabase::open(root, importers, DatabaseInfo::default()).unwrap()
    }

    fn encode_qoi(width: u32, height: u32) -> Vec<u8> {
        let qoi = rapid_qoi::Qoi {
            width,
            height,
            colors: rapid_qoi::Colors::SrgbLinA,
        };
        let pixels = vec![0x7f; (width * height * 4) as usize];
        qoi.encode_alloc(&pixels).unwrap()
    }

    #[test]
    fn test_text_import_produces_content_object() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("note.txt"), "ahoy").unwrap();

        let mut database = database(dir.path());
        let batch = database.refresh().unwrap().batch().unwrap();
        assert_eq!(batch.added.len(), 1);

        let guid = *batch.added.iter().next().unwrap();
        let objects = database.objects(guid).unwrap();
        assert_eq!(objects.len(), 1);

        let (id, record) = objects.iter().next().unwrap();
        assert_eq!(id.kind(), TEXT_KIND);
        assert_eq!(record.payload, b"ahoy");
    }

    #[test]
    fn test_qoi_import_records_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ship.qoi"), encode_qoi(2, 3)).unwrap();

        let mut database = database(dir.path());
        let batch = database.refresh().unwrap().batch().unwrap();
        assert_eq!(batch.added.len(), 1);

        let guid = *batch.added.iter().next().unwrap();
        let objects = database.objects(guid).unwrap();
        let (id, _) = objects.iter().next().unwrap();
        assert_eq!(id.kind(), IMAGE_KIND);
        assert_eq!(objects.main(), Some(id));

        let meta_path = dir.path().join("ship.qoi.hoard");
        let meta = std::fs::read_to_string(meta_path).unwrap();
        let meta: toml::Table = toml::from_str(&meta).unwrap();
        let settings = meta["settings"].as_table().unwrap();
        assert_eq!(settings["width"].as_integer(), Some(2));
        assert_eq!(settings["height"].as_integer(), Some(3));
    }

    #[test]
    fn test_truncated_qoi_fails_and_keeps_nothing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.qoi"), &encode_qoi(2, 2)[..10]).unwrap();

        let mut database = database(dir.path());
        let outcome = database.refresh().unwrap();
        let batch = match outcome {
            RefreshOutcome::Completed(batch) => batch,
            RefreshOutcome::Aborted => panic!("not aborted"),
        };

        assert!(batch.added.is_empty());
    }
}
