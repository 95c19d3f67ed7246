//! Stable local-identifier table.
//!
//! One table is owned by each importable file. It remembers which identifier
//! was handed to every named object the file ever produced, so that reimports
//! yield the same identifier for the same name and cross-references into the
//! file never move underneath their holders.

use hashbrown::HashMap;

use crate::id::{LocalId, ObjectKind, MAX_OBJECTS_PER_KIND};

/// Who claimed an identifier during the current import pass.
enum Claim {
    Named(String),
    Anonymous,
}

/// Per-file table mapping object names to stable local identifiers.
///
/// `name_to_id` and `id_to_name` are exact inverses. An identifier recorded
/// against a name is never handed to a different name while the mapping
/// exists; mappings are dropped only by [`forget_unused`](Self::forget_unused)
/// once their object stops being produced.
pub struct StableIdTable {
    name_to_id: HashMap<String, LocalId>,
    id_to_name: HashMap<LocalId, String>,
    claims: HashMap<LocalId, Claim>,
}

impl StableIdTable {
    pub fn new() -> Self {
        StableIdTable {
            name_to_id: HashMap::new(),
            id_to_name: HashMap::new(),
            claims: HashMap::new(),
        }
    }

    /// Rebuilds the table from a persisted id-to-name association.
    ///
    /// Odd identifiers are corrupt legacy data and are dropped.
    /// If two identifiers carry the same name the smallest one wins,
    /// the rest lose their mapping.
    pub fn from_file_ids<'a>(entries: impl IntoIterator<Item = (LocalId, &'a str)>) -> Self {
        let mut entries: Vec<(LocalId, &str)> = entries.into_iter().collect();
        entries.sort();

        let mut table = StableIdTable::new();
        for (id, name) in entries {
            if !id.is_valid() {
                tracing::warn!("Dropping corrupt odd identifier {id} for '{name}'");
                continue;
            }
            if name.is_empty() {
                tracing::warn!("Dropping identifier {id} with empty name");
                continue;
            }
            if table.name_to_id.contains_key(name) {
                tracing::warn!("Dropping duplicate identifier {id} for '{name}'");
                continue;
            }
            table.name_to_id.insert(name.to_owned(), id);
            table.id_to_name.insert(id, name.to_owned());
        }
        table
    }

    /// Persisted form of the table.
    pub fn file_ids(&self) -> impl Iterator<Item = (LocalId, &str)> + '_ {
        self.id_to_name.iter().map(|(&id, name)| (id, &**name))
    }

    pub fn len(&self) -> usize {
        self.id_to_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_name.is_empty()
    }

    /// Starts a new import pass, releasing all claims of the previous one.
    pub fn begin_pass(&mut self) {
        self.claims.clear();
    }

    /// Returns the stable identifier for a named object.
    ///
    /// The same non-empty name always yields the same identifier within one
    /// pass and, as long as the mapping survives, across passes. If the
    /// persisted identifier is already claimed by a different name this pass
    /// the mapping is rewritten to a fresh identifier; references through the
    /// old identifier may break, the import itself continues.
    pub fn allocate(&mut self, kind: ObjectKind, name: &str) -> LocalId {
        debug_assert!(!name.is_empty());

        if let Some(&id) = self.name_to_id.get(name) {
            match self.claims.get(&id) {
                None => {
                    self.claims.insert(id, Claim::Named(name.to_owned()));
                    return id;
                }
                Some(Claim::Named(claimant)) if claimant.as_str() == name => return id,
                Some(_) => {
                    tracing::warn!(
                        "Identifier {id} recorded for '{name}' is already claimed this pass, reallocating"
                    );
                }
            }
        }

        let id = self.smallest_free(kind);
        if let Some(old) = self.name_to_id.insert(name.to_owned(), id) {
            if self.id_to_name.get(&old).is_some_and(|n| n == name) {
                self.id_to_name.remove(&old);
            }
        }
        self.id_to_name.insert(id, name.to_owned());
        self.claims.insert(id, Claim::Named(name.to_owned()));
        id
    }

    /// Same contract as [`allocate`](Self::allocate); spelled differently to
    /// document that the caller expects the object to exist already.
    pub fn recycle(&mut self, kind: ObjectKind, name: &str) -> LocalId {
        self.allocate(kind, name)
    }

    /// Returns a deterministic identifier for an anonymous object.
    ///
    /// The caller's content hash is folded into the kind's range; occupied
    /// slots are resolved by probing. No name mapping is recorded.
    pub fn allocate_anonymous(&mut self, kind: ObjectKind, hash: u64) -> LocalId {
        let slots = MAX_OBJECTS_PER_KIND / 2;
        let mut slot = (hash % slots as u64) as u32;

        for _ in 0..slots {
            let id = LocalId::compose(kind, slot * 2);
            if !self.id_to_name.contains_key(&id) && !self.claims.contains_key(&id) {
                self.claims.insert(id, Claim::Anonymous);
                return id;
            }
            slot = (slot + 1) % slots;
        }

        panic!("Object kind range exhausted");
    }

    /// Allocates an identifier with no stable mapping at all.
    /// Used when a name lost the collision for its recorded identifier.
    pub fn allocate_fresh(&mut self, kind: ObjectKind) -> LocalId {
        let id = self.smallest_free(kind);
        self.claims.insert(id, Claim::Anonymous);
        id
    }

    /// Drops every mapping whose identifier was not claimed this pass.
    ///
    /// The object is no longer produced by the source, so its identifier is
    /// released. It may be reused later, but only for the same name while a
    /// mapping exists.
    pub fn forget_unused(&mut self) {
        let claims = &self.claims;
        self.id_to_name.retain(|id, _| claims.contains_key(id));
        let id_to_name = &self.id_to_name;
        self.name_to_id
            .retain(|_, id| id_to_name.contains_key(id));
    }

    fn smallest_free(&self, kind: ObjectKind) -> LocalId {
        let mut offset = 0;
        while offset < MAX_OBJECTS_PER_KIND {
            let id = LocalId::compose(kind, offset);
            if !self.id_to_name.contains_key(&id) && !self.claims.contains_key(&id) {
                return id;
            }
            offset += 2;
        }
        panic!("Object kind range exhausted");
    }
}

impl Default for StableIdTable {
    fn default() -> Self {
        StableIdTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESH: ObjectKind = ObjectKind(4);
    const MATERIAL: ObjectKind = ObjectKind(2);

    #[test]
    fn test_same_name_same_id_across_passes() {
        let mut table = StableIdTable::new();

        table.begin_pass();
        let first = table.allocate(MESH, "hull");
        table.forget_unused();

        table.begin_pass();
        let second = table.allocate(MESH, "hull");

        assert_eq!(first, second);
    }

    #[test]
    fn test_same_name_idempotent_within_pass() {
        let mut table = StableIdTable::new();

        table.begin_pass();
        assert_eq!(table.allocate(MESH, "hull"), table.allocate(MESH, "hull"));
    }

    #[test]
    fn test_kinds_partition_the_range() {
        let mut table = StableIdTable::new();

        table.begin_pass();
        let mesh = table.allocate(MESH, "hull");
        let material = table.allocate(MATERIAL, "hull paint");

        assert_eq!(mesh.kind(), MESH);
        assert_eq!(material.kind(), MATERIAL);
        assert_ne!(mesh, material);
    }

    #[test]
    fn test_forget_unused_releases_only_unclaimed() {
        let mut table = StableIdTable::new();

        table.begin_pass();
        let hull = table.allocate(MESH, "hull");
        let mast = table.allocate(MESH, "mast");
        table.forget_unused();

        // Second pass produces only the hull.
        table.begin_pass();
        assert_eq!(table.allocate(MESH, "hull"), hull);
        table.forget_unused();
        assert_eq!(table.len(), 1);

        // The mast reappears: its old mapping is gone, the released
        // identifier may be handed back to it or to anyone else.
        table.begin_pass();
        let reborn = table.allocate(MESH, "mast");
        assert_ne!(reborn, hull);
        assert_eq!(reborn, mast);
    }

    #[test]
    fn test_anonymous_never_steals_named_id() {
        let mut table = StableIdTable::new();

        table.begin_pass();
        let named = table.allocate(MESH, "hull");
        table.forget_unused();

        table.begin_pass();
        // Hash chosen to land exactly on the named slot.
        let hash = (named.offset() / 2) as u64;
        let anon = table.allocate_anonymous(MESH, hash);
        assert_ne!(anon, named);

        // The named object still gets its identifier back.
        assert_eq!(table.allocate(MESH, "hull"), named);
    }

    #[test]
    fn test_anonymous_is_deterministic_when_free() {
        let mut a = StableIdTable::new();
        let mut b = StableIdTable::new();

        a.begin_pass();
        b.begin_pass();
        assert_eq!(a.allocate_anonymous(MESH, 17), b.allocate_anonymous(MESH, 17));
    }

    #[test]
    fn test_claimed_id_is_never_reused_for_another_name() {
        let mut table = StableIdTable::new();

        table.begin_pass();
        let hull = table.allocate(MESH, "hull");
        let ids: Vec<LocalId> = (0..100).map(|i| table.allocate(MESH, &format!("rib {i}"))).collect();

        assert!(!ids.contains(&hull));
    }

    #[test]
    fn test_corrupt_odd_ids_dropped_on_load() {
        let table = StableIdTable::from_file_ids([
            (LocalId::from_raw(400_002), "hull"),
            (LocalId::from_raw(400_005), "mast"),
        ]);

        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_duplicate_names_deduplicated_on_load() {
        let mut table = StableIdTable::from_file_ids([
            (LocalId::from_raw(400_002), "hull"),
            (LocalId::from_raw(400_004), "hull"),
        ]);

        table.begin_pass();
        assert_eq!(table.allocate(MESH, "hull"), LocalId::from_raw(400_002));
    }
}
