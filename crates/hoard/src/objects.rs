use hashbrown::HashMap;

use crate::id::{LocalId, ObjectKind};

/// One object produced by an import.
#[derive(Clone)]
pub struct ObjectRecord {
    pub name: String,
    pub kind: ObjectKind,
    pub payload: Vec<u8>,
    used: bool,
}

impl ObjectRecord {
    pub fn is_used(&self) -> bool {
        self.used
    }
}

/// Every object currently persisted for one asset.
///
/// Records carry a `used` flag driven by the import cycle: a pass begins by
/// marking everything unused, the importer re-produces what still exists, and
/// the pass ends by dropping what stayed unused. A failed pass instead marks
/// everything used again, which restores the set of the last successful
/// import.
#[derive(Default)]
pub struct ObjectSet {
    records: HashMap<LocalId, ObjectRecord>,
    main: Option<LocalId>,
}

impl ObjectSet {
    pub fn new() -> Self {
        ObjectSet::default()
    }

    pub fn get(&self, id: LocalId) -> Option<&ObjectRecord> {
        self.records.get(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (LocalId, &ObjectRecord)> + '_ {
        self.records.iter().map(|(&id, record)| (id, record))
    }

    /// Identifier of the asset's main representation.
    pub fn main(&self) -> Option<LocalId> {
        self.main
    }

    pub fn set_main(&mut self, id: LocalId) {
        if self.records.contains_key(&id) {
            self.main = Some(id);
        }
    }

    /// Inserts or replaces a record and marks it used.
    /// The first record of a pass becomes the main representation
    /// unless one was chosen explicitly.
    pub fn insert(&mut self, id: LocalId, name: impl Into<String>, kind: ObjectKind) {
        self.records.insert(
            id,
            ObjectRecord {
                name: name.into(),
                kind,
                payload: Vec::new(),
                used: true,
            },
        );
        if self.main.is_none() || !self.records.contains_key(&self.main.unwrap()) {
            self.main = Some(id);
        }
    }

    pub fn set_payload(&mut self, id: LocalId, payload: Vec<u8>) -> bool {
        match self.records.get_mut(&id) {
            None => false,
            Some(record) => {
                record.payload = payload;
                true
            }
        }
    }

    pub fn used_count(&self) -> usize {
        self.records.values().filter(|r| r.used).count()
    }

    /// Begins an import pass: every record becomes a deletion candidate.
    pub fn mark_all_unused(&mut self) {
        for record in self.records.values_mut() {
            record.used = false;
        }
    }

    /// Reverts a failed pass: the previous object set survives intact.
    pub fn mark_all_used(&mut self) {
        for record in self.records.values_mut() {
            record.used = true;
        }
    }

    /// Ends a successful pass, dropping objects the importer did not
    /// re-produce. Returns the dropped identifiers.
    pub fn drop_unused(&mut self) -> Vec<LocalId> {
        let dropped: Vec<LocalId> = self
            .records
            .iter()
            .filter(|(_, record)| !record.used)
            .map(|(&id, _)| id)
            .collect();
        for id in &dropped {
            self.records.remove(id);
        }
        if let Some(main) = self.main {
            if !self.records.contains_key(&main) {
                self.main = self.records.keys().copied().min();
            }
        }
        dropped
    }
}
