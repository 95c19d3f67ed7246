//! The import orchestrator.
//!
//! [`AssetDatabase`] walks candidate paths, decides which ones must be
//! (re)imported, resolves the owning importer, drives the produce/recycle
//! cycle and fans out a batch notification once per pass. Assets keep their
//! guid across moves and renames because identity lives in the sidecar that
//! travels with the file; objects keep their local identifiers across
//! reimports because the sidecar also carries the identifier-to-name table.

use std::{
    collections::{BTreeSet, VecDeque},
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::SystemTime,
};

use camino::{Utf8Path, Utf8PathBuf};
use hashbrown::{HashMap, HashSet};

use crate::{
    gen::Generator,
    id::{Guid, LocalId},
    import::{ImportMessage, ImportContext, Severity},
    meta::{AssetMeta, MetaError},
    objects::ObjectSet,
    postprocess::{PostprocessBatch, PostprocessBus, Postprocessor},
    registry::{Importers, Selection},
    sha256::Sha256Hash,
    stable_id::StableIdTable,
    staleness::{Stamp, StampTable, StateError},
};

const DEFAULT_STATE_DIR: &'static str = ".hoard";
const STATE_FILE_NAME: &'static str = "state.toml";

/// Database configuration.
#[derive(Default, serde::Serialize, serde::Deserialize)]
pub struct DatabaseInfo {
    /// State file location, relative to the asset root.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub state: Option<Utf8PathBuf>,

    /// Record content hashes and skip reimports whose modification time
    /// moved while the bytes did not.
    #[serde(default)]
    pub hash_content: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error("Failed to resolve asset root '{path}'")]
    PathError { path: std::path::PathBuf },

    #[error(transparent)]
    StateError(#[from] StateError),
}

#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error("Failed to scan '{path}': {error}")]
    ScanError {
        error: std::io::Error,
        path: Utf8PathBuf,
    },

    #[error(transparent)]
    StateError(#[from] StateError),
}

#[derive(Debug, thiserror::Error)]
pub enum RemoveError {
    #[error("Asset {guid} is not tracked")]
    UnknownAsset { guid: Guid },

    #[error("Folder '{path}' still has children")]
    FolderNotEmpty { path: Utf8PathBuf },

    #[error("Failed to remove '{path}': {error}")]
    IoError {
        error: std::io::Error,
        path: Utf8PathBuf,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum MoveError {
    #[error("Asset {guid} is not tracked")]
    UnknownAsset { guid: Guid },

    #[error("Folders move through a refresh pass, not through this call")]
    IsFolder,

    #[error("Path '{path}' is already occupied")]
    Occupied { path: Utf8PathBuf },

    #[error("Failed to rename '{from}' to '{to}': {error}")]
    RenameError {
        error: std::io::Error,
        from: Utf8PathBuf,
        to: Utf8PathBuf,
    },
}

/// Force-reimport request accompanying a refresh.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Force {
    /// Only genuinely stale paths are imported.
    #[default]
    None,

    /// The listed paths are imported even when fresh.
    Paths(Vec<Utf8PathBuf>),

    /// Every recognized path is imported.
    All,
}

impl Force {
    fn applies(&self, path: &Utf8Path) -> bool {
        match self {
            Force::None => false,
            Force::Paths(paths) => paths.iter().any(|p| p.as_path() == path),
            Force::All => true,
        }
    }
}

/// How a refresh pass ended.
#[derive(Debug)]
pub enum RefreshOutcome {
    /// The pass ran to completion and subscribers were notified.
    Completed(PostprocessBatch),

    /// The pass was aborted between imports. No notification went out;
    /// completed paths keep their new state and a later refresh resumes.
    Aborted,
}

impl RefreshOutcome {
    pub fn batch(self) -> Option<PostprocessBatch> {
        match self {
            RefreshOutcome::Completed(batch) => Some(batch),
            RefreshOutcome::Aborted => None,
        }
    }
}

/// Cooperative abort flag for a running refresh, checked between imports.
#[derive(Clone)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}

/// One tracked asset.
pub struct AssetRecord {
    pub guid: Guid,
    /// Path relative to the asset root. Unique among live assets.
    pub path: Utf8PathBuf,
    pub is_folder: bool,
    pub parent: Guid,
    /// Child assets ordered by path.
    pub children: Vec<Guid>,
    /// Target format of the owning importer.
    pub target: Option<String>,
    /// Main representation among the asset's objects.
    pub main: Option<LocalId>,
    pub labels: BTreeSet<String>,
    /// Messages of the last import attempt.
    pub log: Vec<ImportMessage>,
}

impl AssetRecord {
    fn new(guid: Guid, path: Utf8PathBuf, is_folder: bool) -> Self {
        AssetRecord {
            guid,
            path,
            is_folder,
            parent: Guid::ROOT,
            children: Vec::new(),
            target: None,
            main: None,
            labels: BTreeSet::new(),
            log: Vec::new(),
        }
    }
}

struct ScanEntry {
    rel: Utf8PathBuf,
    abs: Utf8PathBuf,
    modified: SystemTime,
    folder: bool,
    meta_present: bool,
}

enum Placement {
    New,
    Known,
    Moved,
}

/// The asset database.
///
/// Single-writer: one instance owns the asset root, its sidecars and its
/// state file. Importers may parallelize internally but every table mutation
/// happens on the thread driving the refresh.
pub struct AssetDatabase {
    root: Utf8PathBuf,
    state_path: Utf8PathBuf,
    hash_content: bool,
    importers: Importers,
    stamps: StampTable,
    assets: HashMap<Guid, AssetRecord>,
    paths: HashMap<Utf8PathBuf, Guid>,
    objects: HashMap<Guid, ObjectSet>,
    bus: PostprocessBus,
    guid_gen: Generator,
    abort: Arc<AtomicBool>,
}

impl AssetDatabase {
    /// Opens the database over an asset root, restoring persisted state
    /// when present.
    pub fn open(
        root: impl AsRef<std::path::Path>,
        importers: Importers,
        info: DatabaseInfo,
    ) -> Result<Self, OpenError> {
        let root = root.as_ref();
        let root = dunce::canonicalize(root).map_err(|_| OpenError::PathError {
            path: root.to_owned(),
        })?;
        let root = Utf8PathBuf::from_path_buf(root).map_err(|path| OpenError::PathError { path })?;

        let state_rel = info
            .state
            .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_STATE_DIR).join(STATE_FILE_NAME));
        let state_path = root.join(state_rel);

        let stamps = StampTable::load(&state_path)?;

        let mut database = AssetDatabase {
            root: root.clone(),
            state_path,
            hash_content: info.hash_content,
            importers,
            stamps,
            assets: HashMap::new(),
            paths: HashMap::new(),
            objects: HashMap::new(),
            bus: PostprocessBus::new(),
            guid_gen: Generator::new(),
            abort: Arc::new(AtomicBool::new(false)),
        };

        database
            .assets
            .insert(Guid::ROOT, AssetRecord::new(Guid::ROOT, Utf8PathBuf::new(), true));

        database.restore_from_stamps();
        Ok(database)
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn importers(&self) -> &Importers {
        &self.importers
    }

    pub fn guid_at(&self, path: &Utf8Path) -> Option<Guid> {
        self.paths.get(path).copied()
    }

    pub fn path_of(&self, guid: Guid) -> Option<&Utf8Path> {
        self.assets.get(&guid).map(|record| &*record.path)
    }

    pub fn asset(&self, guid: Guid) -> Option<&AssetRecord> {
        self.assets.get(&guid)
    }

    pub fn assets(&self) -> impl Iterator<Item = &AssetRecord> + '_ {
        self.assets.values()
    }

    pub fn objects(&self, guid: Guid) -> Option<&ObjectSet> {
        self.objects.get(&guid)
    }

    pub fn labels(&self, guid: Guid) -> Option<&BTreeSet<String>> {
        self.assets.get(&guid).map(|record| &record.labels)
    }

    /// Messages of the asset's last import attempt.
    pub fn import_log(&self, guid: Guid) -> Option<&[ImportMessage]> {
        self.assets.get(&guid).map(|record| &*record.log)
    }

    pub fn register_postprocessor(&mut self, subscriber: Box<dyn Postprocessor>) {
        self.bus.register(subscriber);
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            flag: self.abort.clone(),
        }
    }

    /// Replaces an asset's labels and persists them in the sidecar.
    /// Does not trigger an import.
    pub fn set_labels(&mut self, guid: Guid, labels: BTreeSet<String>) -> Result<(), MetaError> {
        let Some(record) = self.assets.get_mut(&guid) else {
            return Ok(());
        };

        let meta_path = self.root.join(AssetMeta::meta_path(&record.path));
        let mut meta = match AssetMeta::read(&meta_path)? {
            Some(meta) => meta,
            None => AssetMeta::new(guid),
        };
        meta.set_labels(labels.clone());
        meta.write(&meta_path)?;

        record.labels = labels;
        Ok(())
    }

    /// Scans the whole asset root and imports what went stale.
    pub fn refresh(&mut self) -> Result<RefreshOutcome, RefreshError> {
        self.refresh_with(Force::None)
    }

    /// Scans the whole asset root, importing what went stale plus whatever
    /// `force` requests.
    #[tracing::instrument(skip(self))]
    pub fn refresh_with(&mut self, force: Force) -> Result<RefreshOutcome, RefreshError> {
        self.abort.store(false, Ordering::SeqCst);

        let entries = self.scan()?;
        let previous = self.stamps.paths();
        let current: HashSet<Utf8PathBuf> = entries.iter().map(|entry| entry.rel.clone()).collect();

        let mut batch = PostprocessBatch::default();

        // Folders first; sorting puts parents before their children.
        let mut folders: Vec<&ScanEntry> = entries.iter().filter(|entry| entry.folder).collect();
        folders.sort_by(|a, b| a.rel.cmp(&b.rel));
        for entry in folders {
            self.process_folder(entry, &mut batch);
        }

        let stale = self.collect_stale(&entries, &force);

        for (entry, selection) in stale {
            if self.abort.swap(false, Ordering::SeqCst) {
                tracing::info!("Refresh aborted");
                self.stamps.save(&self.state_path)?;
                return Ok(RefreshOutcome::Aborted);
            }
            self.import_one(entry, selection, &mut batch);
        }

        // Mark-and-sweep as a snapshot diff: what was tracked before the
        // scan and was not seen by it is gone, unless it moved.
        for path in &previous {
            if current.contains(path) {
                continue;
            }
            let Some(stamp) = self.stamps.remove(path) else {
                continue;
            };
            if batch.moved.contains_key(&stamp.guid) {
                continue;
            }
            self.drop_asset_state(stamp.guid, path);
            batch.removed.insert(stamp.guid);
        }

        self.rebuild_tree();
        self.stamps.save(&self.state_path)?;

        if !batch.is_empty() {
            self.bus.notify(&batch);
        }
        Ok(RefreshOutcome::Completed(batch))
    }

    /// Imports an explicit list of paths, e.g. from a file system
    /// notification. Paths that vanished are recorded as removals; nothing
    /// else is swept.
    #[tracing::instrument(skip(self))]
    pub fn refresh_paths(
        &mut self,
        paths: &[Utf8PathBuf],
        force: bool,
    ) -> Result<RefreshOutcome, RefreshError> {
        self.abort.store(false, Ordering::SeqCst);

        let mut entries = Vec::new();
        let mut batch = PostprocessBatch::default();

        for rel in paths {
            let abs = self.root.join(rel);
            let metadata = match abs.as_std_path().metadata() {
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    if let Some(stamp) = self.stamps.remove(rel) {
                        self.drop_asset_state(stamp.guid, rel);
                        batch.removed.insert(stamp.guid);
                    }
                    continue;
                }
                Err(error) => return Err(RefreshError::ScanError { error, path: abs }),
                Ok(metadata) => metadata,
            };

            if metadata.is_dir() {
                let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                let entry = ScanEntry {
                    rel: rel.clone(),
                    abs,
                    modified,
                    folder: true,
                    meta_present: true,
                };
                self.process_folder(&entry, &mut batch);
                continue;
            }

            let modified = match metadata.modified() {
                Err(error) => return Err(RefreshError::ScanError { error, path: abs }),
                Ok(modified) => modified,
            };

            let meta_present = self
                .root
                .join(AssetMeta::meta_path(rel))
                .as_std_path()
                .exists();

            entries.push(ScanEntry {
                rel: rel.clone(),
                abs,
                modified,
                folder: false,
                meta_present,
            });
        }

        let force = if force {
            Force::All
        } else {
            Force::None
        };
        let stale = self.collect_stale(&entries, &force);

        for (entry, selection) in stale {
            if self.abort.swap(false, Ordering::SeqCst) {
                tracing::info!("Refresh aborted");
                self.stamps.save(&self.state_path)?;
                return Ok(RefreshOutcome::Aborted);
            }
            self.import_one(entry, selection, &mut batch);
        }

        self.rebuild_tree();
        self.stamps.save(&self.state_path)?;

        if !batch.is_empty() {
            self.bus.notify(&batch);
        }
        Ok(RefreshOutcome::Completed(batch))
    }

    /// Deletes an asset's source file, sidecar and every trace in the
    /// database. Folders must be empty.
    pub fn remove_asset(&mut self, guid: Guid) -> Result<(), RemoveError> {
        let Some(record) = self.assets.get(&guid) else {
            return Err(RemoveError::UnknownAsset { guid });
        };
        let path = record.path.clone();
        let is_folder = record.is_folder;

        if is_folder && self.assets.values().any(|r| r.parent == guid && r.guid != guid) {
            return Err(RemoveError::FolderNotEmpty { path });
        }

        let abs = self.root.join(&path);
        let result = if is_folder {
            std::fs::remove_dir(abs.as_std_path())
        } else {
            std::fs::remove_file(abs.as_std_path())
        };
        match result {
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => return Err(RemoveError::IoError { error, path: abs }),
            Ok(()) => {}
        }

        let meta_abs = self.root.join(AssetMeta::meta_path(&path));
        match std::fs::remove_file(meta_abs.as_std_path()) {
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => {
                return Err(RemoveError::IoError {
                    error,
                    path: meta_abs,
                })
            }
            Ok(()) => {}
        }

        self.stamps.remove(&path);
        self.drop_asset_state(guid, &path);
        self.rebuild_tree();

        if let Err(err) = self.stamps.save(&self.state_path) {
            tracing::error!("Failed to save state after removal. {err}");
        }

        let mut batch = PostprocessBatch::default();
        batch.removed.insert(guid);
        self.bus.notify(&batch);
        Ok(())
    }

    /// Renames an asset's source file together with its sidecar.
    /// The guid is unchanged. Folder renames are picked up by a full
    /// refresh instead.
    pub fn move_asset(&mut self, guid: Guid, to: Utf8PathBuf) -> Result<(), MoveError> {
        let Some(record) = self.assets.get(&guid) else {
            return Err(MoveError::UnknownAsset { guid });
        };
        if record.is_folder {
            return Err(MoveError::IsFolder);
        }
        let from = record.path.clone();

        let to_abs = self.root.join(&to);
        if self.paths.contains_key(&to) || to_abs.as_std_path().exists() {
            return Err(MoveError::Occupied { path: to });
        }

        let from_abs = self.root.join(&from);
        std::fs::rename(from_abs.as_std_path(), to_abs.as_std_path()).map_err(|error| {
            MoveError::RenameError {
                error,
                from: from_abs.clone(),
                to: to_abs.clone(),
            }
        })?;

        let meta_from = self.root.join(AssetMeta::meta_path(&from));
        let meta_to = self.root.join(AssetMeta::meta_path(&to));
        match std::fs::rename(meta_from.as_std_path(), meta_to.as_std_path()) {
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => {
                // The primary already moved; moving it back would lose the
                // rename either way. Report and let the next refresh settle it.
                tracing::error!("Failed to move sidecar '{meta_from}'. {error}");
            }
            Ok(()) => {}
        }

        self.paths.remove(&from);
        self.paths.insert(to.clone(), guid);
        if let Some(stamp) = self.stamps.remove(&from) {
            self.stamps.record(to.clone(), stamp);
        }
        if let Some(record) = self.assets.get_mut(&guid) {
            record.path = to.clone();
        }
        self.rebuild_tree();

        if let Err(err) = self.stamps.save(&self.state_path) {
            tracing::error!("Failed to save state after move. {err}");
        }

        let mut batch = PostprocessBatch::default();
        batch.moved.insert(guid, to);
        self.bus.notify(&batch);
        Ok(())
    }

    fn restore_from_stamps(&mut self) {
        let entries: Vec<(Utf8PathBuf, Stamp)> = self
            .stamps
            .iter()
            .map(|(path, stamp)| (path.to_owned(), stamp.clone()))
            .collect();

        for (path, stamp) in entries {
            let mut record = AssetRecord::new(stamp.guid, path.clone(), stamp.folder);

            let meta_path = self.root.join(AssetMeta::meta_path(&path));
            match AssetMeta::read(&meta_path) {
                Ok(Some(meta)) if meta.guid() == stamp.guid => {
                    record.labels = meta.labels().clone();
                    record.main = meta.main();

                    let mut set = ObjectSet::new();
                    for (id, name) in meta.file_ids() {
                        set.insert(id, name, id.kind());
                    }
                    if let Some(main) = meta.main() {
                        set.set_main(main);
                    }
                    self.objects.insert(stamp.guid, set);
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!("Failed to restore sidecar '{meta_path}'. {err}");
                }
            }

            self.paths.insert(path, stamp.guid);
            self.assets.insert(stamp.guid, record);
        }

        self.rebuild_tree();
    }

    /// Walks the asset root. Failure to enumerate the root itself is fatal;
    /// deeper failures are logged and the walk continues.
    fn scan(&self) -> Result<Vec<ScanEntry>, RefreshError> {
        let mut entries = Vec::new();
        let mut meta_paths: HashSet<Utf8PathBuf> = HashSet::new();

        let mut queue = VecDeque::new();
        queue.push_back(self.root.clone());

        while let Some(dir_path) = queue.pop_front() {
            let dir = match std::fs::read_dir(dir_path.as_std_path()) {
                Err(error) if dir_path == self.root => {
                    return Err(RefreshError::ScanError {
                        error,
                        path: dir_path,
                    });
                }
                Err(err) => {
                    tracing::error!("Failed to scan directory '{dir_path}'. {err:#}");
                    continue;
                }
                Ok(dir) => dir,
            };

            for entry in dir {
                let entry = match entry {
                    Err(err) => {
                        tracing::error!("Failed to read entry in '{dir_path}'. {err:#}");
                        continue;
                    }
                    Ok(entry) => entry,
                };

                let name = entry.file_name();
                let Some(name) = name.to_str() else {
                    tracing::warn!("Skipping non-UTF8 entry in '{dir_path}'");
                    continue;
                };
                if name.starts_with('.') {
                    continue;
                }

                let path = dir_path.join(name);
                let file_type = match entry.file_type() {
                    Err(err) => {
                        tracing::error!("Failed to check '{path}'. {err:#}");
                        continue;
                    }
                    Ok(file_type) => file_type,
                };

                let rel = match path.strip_prefix(&self.root) {
                    Err(_) => continue,
                    Ok(rel) => rel.to_owned(),
                };

                if file_type.is_dir() {
                    queue.push_back(path.clone());
                    let modified = path
                        .as_std_path()
                        .metadata()
                        .and_then(|m| m.modified())
                        .unwrap_or(SystemTime::UNIX_EPOCH);
                    entries.push(ScanEntry {
                        rel,
                        abs: path,
                        modified,
                        folder: true,
                        meta_present: false,
                    });
                } else if file_type.is_file() {
                    if AssetMeta::is_meta_path(&path) {
                        meta_paths.insert(AssetMeta::primary_path(&rel));
                        continue;
                    }

                    let modified = match path.as_std_path().metadata().and_then(|m| m.modified()) {
                        Err(err) => {
                            tracing::error!("Failed to check '{path}'. {err:#}");
                            continue;
                        }
                        Ok(modified) => modified,
                    };

                    entries.push(ScanEntry {
                        rel,
                        abs: path,
                        modified,
                        folder: false,
                        meta_present: false,
                    });
                }
            }
        }

        for entry in &mut entries {
            entry.meta_present = meta_paths.contains(&entry.rel);
        }

        Ok(entries)
    }

    /// Stale files of a scan, ordered by import queue then path.
    fn collect_stale<'e>(
        &mut self,
        entries: &'e [ScanEntry],
        force: &Force,
    ) -> Vec<(&'e ScanEntry, Selection)> {
        let mut stale = Vec::new();

        for entry in entries.iter().filter(|entry| !entry.folder) {
            let Some(selection) = self.importers.resolve(&entry.rel) else {
                continue;
            };

            let forced = force.applies(&entry.rel);
            if !self.stamps.needs_update(
                &entry.rel,
                entry.modified,
                selection.version,
                entry.meta_present,
                forced,
            ) {
                continue;
            }

            if !forced && self.skip_by_content_hash(entry, selection) {
                continue;
            }

            stale.push((entry, selection));
        }

        stale.sort_by(|a, b| {
            (a.1.queue, &a.0.rel).cmp(&(b.1.queue, &b.0.rel))
        });
        stale
    }

    /// With content hashing enabled, a path whose modification time moved
    /// while its bytes did not is freshened in place instead of reimported.
    fn skip_by_content_hash(&mut self, entry: &ScanEntry, selection: Selection) -> bool {
        if !self.hash_content {
            return false;
        }

        let Some(stamp) = self.stamps.get(&entry.rel) else {
            return false;
        };
        if !entry.meta_present || stamp.importer_version != selection.version {
            return false;
        }
        let Some(stored) = stamp.content_hash else {
            return false;
        };

        match Sha256Hash::file_hash(entry.abs.as_std_path()) {
            Err(err) => {
                tracing::error!("Failed to hash '{}'. {err:#}", entry.abs);
                false
            }
            Ok(hash) if hash == stored => {
                tracing::debug!("'{}' was touched but not changed", entry.rel);
                let mut stamp = stamp.clone();
                stamp.modified = entry.modified;
                self.stamps.record(entry.rel.clone(), stamp);
                true
            }
            Ok(_) => false,
        }
    }

    fn process_folder(&mut self, entry: &ScanEntry, batch: &mut PostprocessBatch) {
        if self.paths.get(&entry.rel).is_some() {
            return;
        }

        let meta_path = self.root.join(AssetMeta::meta_path(&entry.rel));
        let (mut meta, meta_was_present) = self.read_meta_or_default(&meta_path, None);
        let (guid, placement) = self.resolve_identity(&mut meta, &meta_path, &entry.rel);

        if !meta_was_present {
            if let Err(err) = meta.write(&meta_path) {
                tracing::error!("Failed to write sidecar '{meta_path}'. {err}");
            }
        }

        let mut record = AssetRecord::new(guid, entry.rel.clone(), true);
        record.labels = meta.labels().clone();
        if let Some(existing) = self.assets.get(&guid) {
            record.log = existing.log.clone();
        }
        self.assets.insert(guid, record);
        self.paths.insert(entry.rel.clone(), guid);
        self.stamps.record(
            entry.rel.clone(),
            Stamp {
                guid,
                importer_version: 0,
                meta_seen: true,
                folder: true,
                content_hash: None,
                modified: entry.modified,
            },
        );

        match placement {
            Placement::Moved => {
                batch.moved.insert(guid, entry.rel.clone());
            }
            _ => {
                batch.added.insert(guid);
            }
        }
    }

    #[tracing::instrument(skip_all, fields(path = %entry.rel))]
    fn import_one(&mut self, entry: &ScanEntry, selection: Selection, batch: &mut PostprocessBatch) {
        let importer = self
            .importers
            .get(selection.index)
            .expect("Selection comes from this registry")
            .clone();

        // Decides added-vs-refreshed below: an asset only counts as added
        // once it has a successful import behind it.
        let previously_stamped = self.stamps.get(&entry.rel).is_some();

        let meta_path = self.root.join(AssetMeta::meta_path(&entry.rel));
        let (mut meta, meta_was_present) =
            self.read_meta_or_default(&meta_path, self.stamps.get(&entry.rel).map(|s| s.guid));
        let (guid, placement) = self.resolve_identity(&mut meta, &meta_path, &entry.rel);

        if !meta_was_present {
            if let Err(err) = meta.write(&meta_path) {
                tracing::error!("Failed to write sidecar '{meta_path}'. {err}");
            }
        }

        // A new identity at an already-tracked path means the previous
        // asset died together with its sidecar.
        if let Some(old) = self.paths.get(&entry.rel).copied() {
            if old != guid {
                self.assets.remove(&old);
                self.objects.remove(&old);
                batch.removed.insert(old);
            }
        }
        self.paths.insert(entry.rel.clone(), guid);

        let mut record = match self.assets.remove(&guid) {
            Some(record) => record,
            None => AssetRecord::new(guid, entry.rel.clone(), false),
        };
        record.path = entry.rel.clone();
        record.target = Some(importer.target().to_owned());

        let mut ids = StableIdTable::from_file_ids(meta.file_ids());
        let mut objects = self.objects.remove(&guid).unwrap_or_default();

        // Start of the import cycle: everything previously produced is a
        // deletion candidate until the importer re-produces it.
        ids.begin_pass();
        objects.mark_all_unused();

        let mut messages = Vec::new();
        let mut settings = std::mem::take(meta.settings_mut());

        let result = {
            let mut ctx =
                ImportContext::new(&mut ids, &mut objects, &mut messages, &mut settings);
            catch_unwind(AssertUnwindSafe(|| importer.import(&entry.abs, &mut ctx)))
        };
        *meta.settings_mut() = settings;

        let outcome = match result {
            Ok(Ok(())) if objects.used_count() > 0 => Ok(()),
            Ok(Ok(())) => Err("Importer produced no objects".to_owned()),
            Ok(Err(err)) => Err(err.reason().to_owned()),
            Err(_) => Err("Importer panicked".to_owned()),
        };

        match outcome {
            Ok(()) => {
                let dropped = objects.drop_unused();
                if !dropped.is_empty() {
                    tracing::debug!(
                        "'{}' no longer produces {} object(s)",
                        entry.rel,
                        dropped.len()
                    );
                }
                ids.forget_unused();

                meta.set_file_ids(ids.file_ids());
                meta.set_importer_version(selection.version);
                meta.set_main(objects.main());

                if let Err(err) = meta.write(&meta_path) {
                    // Identity that is not persisted is identity lost at the
                    // next restart. Roll back and retry at the next scan.
                    tracing::error!("Failed to write sidecar '{meta_path}'. {err}");
                    objects.mark_all_used();
                    messages.push(ImportMessage {
                        severity: Severity::Error,
                        text: format!("Failed to persist sidecar: {err}"),
                    });
                    record.log = messages;
                    self.assets.insert(guid, record);
                    self.objects.insert(guid, objects);
                    return;
                }

                let content_hash = if self.hash_content {
                    Sha256Hash::file_hash(entry.abs.as_std_path()).ok()
                } else {
                    None
                };

                self.stamps.record(
                    entry.rel.clone(),
                    Stamp {
                        guid,
                        importer_version: selection.version,
                        meta_seen: true,
                        folder: false,
                        content_hash,
                        modified: entry.modified,
                    },
                );

                record.labels = meta.labels().clone();
                record.main = objects.main();
                record.log = messages;

                tracing::debug!("Imported '{}' with '{}'", entry.rel, importer.name());

                match placement {
                    Placement::Moved => {
                        batch.moved.insert(guid, entry.rel.clone());
                    }
                    Placement::Known if previously_stamped => {
                        batch.refreshed.insert(guid);
                    }
                    _ => {
                        batch.added.insert(guid);
                    }
                }
            }
            Err(reason) => {
                tracing::error!(
                    "Failed to import '{}' with '{}'. {reason}",
                    entry.rel,
                    importer.name()
                );

                // Roll back to the previous successful import: the old
                // object set survives and the stamp stays untouched, so the
                // next scan retries this path.
                objects.mark_all_used();
                messages.push(ImportMessage {
                    severity: Severity::Error,
                    text: reason,
                });
                record.log = messages;
            }
        }

        self.assets.insert(guid, record);
        self.objects.insert(guid, objects);
    }

    /// Reads a sidecar, downgrading corruption to a fresh identity.
    /// `fallback_guid` preserves the asset's guid when the sidecar is gone
    /// but the path is still tracked.
    fn read_meta_or_default(
        &self,
        meta_path: &Utf8Path,
        fallback_guid: Option<Guid>,
    ) -> (AssetMeta, bool) {
        match AssetMeta::read(meta_path) {
            Ok(Some(meta)) => (meta, true),
            Ok(None) => {
                let guid = fallback_guid.unwrap_or_else(|| self.guid_gen.generate());
                (AssetMeta::new(guid), false)
            }
            Err(err) => {
                tracing::warn!(
                    "Corrupt sidecar '{meta_path}', starting with fresh identity. {err}"
                );
                let guid = fallback_guid.unwrap_or_else(|| self.guid_gen.generate());
                (AssetMeta::new(guid), false)
            }
        }
    }

    /// Decides whether the sidecar's guid denotes a known asset at this
    /// path, an asset that moved here, or a brand-new asset. A guid that is
    /// simultaneously alive at another existing path was copied along with
    /// its file; the copy receives a fresh identity.
    fn resolve_identity(
        &mut self,
        meta: &mut AssetMeta,
        meta_path: &Utf8Path,
        rel: &Utf8Path,
    ) -> (Guid, Placement) {
        let guid = meta.guid();

        let Some(existing) = self.assets.get(&guid) else {
            return (guid, Placement::New);
        };

        if existing.path.as_path() == rel {
            return (guid, Placement::Known);
        }

        let old_path = existing.path.clone();
        let old_abs = self.root.join(&old_path);
        if old_abs.as_std_path().exists() {
            let fresh = self.guid_gen.generate();
            tracing::warn!(
                "Guid {guid} of '{rel}' already lives at '{old_path}', assigning {fresh}"
            );
            meta.set_guid(fresh);
            if let Err(err) = meta.write(meta_path) {
                tracing::error!("Failed to write sidecar '{meta_path}'. {err}");
            }
            return (fresh, Placement::New);
        }

        // The sidecar travelled with the file: same asset, new path.
        tracing::debug!("'{old_path}' moved to '{rel}'");
        self.stamps.remove(&old_path);
        self.paths.remove(&old_path);
        (guid, Placement::Moved)
    }

    fn drop_asset_state(&mut self, guid: Guid, path: &Utf8Path) {
        self.assets.remove(&guid);
        self.objects.remove(&guid);
        if self.paths.get(path).copied() == Some(guid) {
            self.paths.remove(path);
        }
    }

    /// Rebuilds parent links and ordered child lists from live paths.
    fn rebuild_tree(&mut self) {
        let mut children: HashMap<Guid, Vec<(Utf8PathBuf, Guid)>> = HashMap::new();

        for (&guid, record) in &self.assets {
            if guid == Guid::ROOT {
                continue;
            }
            let parent = record
                .path
                .parent()
                .filter(|parent| !parent.as_str().is_empty())
                .and_then(|parent| self.paths.get(parent).copied())
                .unwrap_or(Guid::ROOT);
            children
                .entry(parent)
                .or_default()
                .push((record.path.clone(), guid));
        }

        for record in self.assets.values_mut() {
            record.children.clear();
        }

        for (parent, mut kids) in children {
            kids.sort();
            for (_, kid) in &kids {
                if let Some(record) = self.assets.get_mut(kid) {
                    record.parent = parent;
                }
            }
            if let Some(record) = self.assets.get_mut(&parent) {
                record.children = kids.into_iter().map(|(_, guid)| guid).collect();
            }
        }
    }
}
