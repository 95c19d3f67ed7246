use crate::{
    id::{LocalId, ObjectKind},
    objects::ObjectSet,
    stable_id::StableIdTable,
};

use super::{ImportMessage, Severity};

/// The importer's only channel back into the pipeline.
///
/// Produces objects with stable identifiers, collects the import log and
/// gives access to the importer's persisted settings. Identifier bookkeeping
/// stays inside the pipeline; importers never invent identifiers.
pub struct ImportContext<'a> {
    ids: &'a mut StableIdTable,
    objects: &'a mut ObjectSet,
    messages: &'a mut Vec<ImportMessage>,
    settings: &'a mut toml::Table,
}

impl<'a> ImportContext<'a> {
    pub(crate) fn new(
        ids: &'a mut StableIdTable,
        objects: &'a mut ObjectSet,
        messages: &'a mut Vec<ImportMessage>,
        settings: &'a mut toml::Table,
    ) -> Self {
        ImportContext {
            ids,
            objects,
            messages,
            settings,
        }
    }

    /// Produces a named object, recycling the identifier recorded for the
    /// name on previous imports.
    ///
    /// Producing two distinct objects under one name in the same pass is a
    /// name collision: the second object receives a fresh identifier and a
    /// warning lands in the import log. An empty name produces an anonymous
    /// object.
    pub fn produce(&mut self, kind: ObjectKind, name: &str) -> LocalId {
        if name.is_empty() {
            return self.produce_anonymous(kind, 0);
        }

        let id = self.ids.allocate(kind, name);

        if self.objects.get(id).is_some_and(|record| record.is_used()) {
            tracing::warn!("Two objects named '{name}' produced in one pass");
            self.add_message(
                Severity::Warning,
                format!("Duplicate object name '{name}', one object lost its stable identifier"),
            );
            let fresh = self.ids.allocate_fresh(kind);
            self.objects.insert(fresh, name, kind);
            return fresh;
        }

        self.objects.insert(id, name, kind);
        id
    }

    /// Same contract as [`produce`](Self::produce); spelled differently to
    /// document that the caller expects the object to exist from a previous
    /// import.
    pub fn recycle(&mut self, kind: ObjectKind, name: &str) -> LocalId {
        self.produce(kind, name)
    }

    /// Produces an anonymous object. `hash` should be a stable content or
    /// structure hash so the identifier is deterministic across reimports
    /// of unchanged data.
    pub fn produce_anonymous(&mut self, kind: ObjectKind, hash: u64) -> LocalId {
        let id = self.ids.allocate_anonymous(kind, hash);
        self.objects.insert(id, "", kind);
        id
    }

    /// Attaches the persisted payload to a produced object.
    pub fn set_payload(&mut self, id: LocalId, payload: Vec<u8>) {
        if !self.objects.set_payload(id, payload) {
            tracing::warn!("Payload for unknown object {id} ignored");
        }
    }

    /// Marks the asset's main representation.
    /// Defaults to the first produced object.
    pub fn set_main(&mut self, id: LocalId) {
        self.objects.set_main(id);
    }

    /// Reports a warning or error without aborting the import.
    pub fn add_message(&mut self, severity: Severity, text: impl Into<String>) {
        self.messages.push(ImportMessage {
            severity,
            text: text.into(),
        });
    }

    /// Importer settings persisted in the asset's sidecar.
    /// Opaque to the pipeline.
    pub fn settings(&self) -> &toml::Table {
        self.settings
    }

    pub fn settings_mut(&mut self) -> &mut toml::Table {
        self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KIND: ObjectKind = ObjectKind(1);

    #[test]
    fn test_duplicate_name_gets_fresh_id() {
        let mut ids = StableIdTable::new();
        let mut objects = ObjectSet::new();
        let mut messages = Vec::new();
        let mut settings = toml::Table::new();

        ids.begin_pass();
        let mut ctx = ImportContext::new(&mut ids, &mut objects, &mut messages, &mut settings);

        let first = ctx.produce(KIND, "sprite");
        let second = ctx.produce(KIND, "sprite");

        assert_ne!(first, second);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].severity, Severity::Warning);
    }

    #[test]
    fn test_recycled_id_survives_passes() {
        let mut ids = StableIdTable::new();
        let mut messages = Vec::new();
        let mut settings = toml::Table::new();

        let first = {
            let mut objects = ObjectSet::new();
            ids.begin_pass();
            let mut ctx = ImportContext::new(&mut ids, &mut objects, &mut messages, &mut settings);
            ctx.produce(KIND, "sprite")
        };
        ids.forget_unused();

        let second = {
            let mut objects = ObjectSet::new();
            ids.begin_pass();
            let mut ctx = ImportContext::new(&mut ids, &mut objects, &mut messages, &mut settings);
            ctx.recycle(KIND, "sprite")
        };

        assert_eq!(first, second);
    }
}
