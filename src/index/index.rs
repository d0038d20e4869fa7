//! Index management and coordination.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use ahash::AHashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::barrel::field::{FieldInfo, FieldsInfo, flags};
use crate::barrel::info::{BARRELS_FILE, BarrelInfo, BarrelsInfo};
use crate::barrel::memory::{FieldOccurrences, MemBarrel};
use crate::barrel::reader::{BarrelCaches, BarrelReader};
use crate::barrel::writer::remove_barrel_files;
use crate::bitset::Bitset;
use crate::config::{Codec, IndexConfig};
use crate::error::{BarrelError, Result};
use crate::index::reader::{IndexReader, ReaderBarrel};
use crate::merger::{BarrelMerger, MergeInput, MergeStats};
use crate::storage::{MemoryStorage, Storage};
use crate::types::{CollectionId, DocId, FieldId};

/// Name of the persisted deletion bitset.
pub const DELETED_FILE: &str = "deleted.bits";

/// Name of the persisted bitset of every doc id ever added.
pub const DOCUMENTS_FILE: &str = "documents.bits";

/// Extensions of the files a barrel owns.
const BARREL_EXTENSIONS: [&str; 4] = ["voc", "dfp", "pop", "fdi"];

/// Statistics about an index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    /// Number of barrels, flushed or not.
    pub barrel_count: usize,

    /// Number of live documents.
    pub doc_count: u64,

    /// Number of deleted documents still stored in barrels.
    pub deleted_count: u64,

    /// Highest doc id added so far.
    pub max_doc_id: Option<DocId>,

    /// Persisted generation of the barrel directory.
    pub version: u64,

    /// Bytes held by the in-memory barrel.
    pub memory_usage: usize,

    /// Whether a merge is running.
    pub merging: bool,
}

/// Outcome of a merge published into the directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeReport {
    /// Name of the new barrel.
    pub barrel: String,

    /// Barrels it replaced.
    pub inputs: Vec<String>,

    pub stats: MergeStats,
}

/// An index: the barrel directory, the barrel being written, the field
/// registry and the deletion bitset.
///
/// The handle is cheap to clone; every clone refers to the same index.
/// Ingestion and deletion are serialized by an internal lock. A merge holds
/// that lock only while it claims its inputs and while it publishes its
/// output, so documents can be added and readers opened while it runs.
#[derive(Debug, Clone)]
pub struct Index {
    inner: Arc<IndexInner>,
}

#[derive(Debug)]
struct IndexInner {
    storage: Arc<dyn Storage>,
    config: IndexConfig,
    state: Mutex<IndexState>,
}

#[derive(Debug)]
struct IndexState {
    barrels: BarrelsInfo,
    schema: FieldsInfo,
    current: Option<MemBarrel>,
    last_doc_id: Option<DocId>,
    deleted: Arc<Bitset>,
    deletions_dirty: bool,
    documents: Bitset,
    documents_dirty: bool,
    readers: AHashMap<String, Arc<BarrelReader>>,
}

/// Inputs claimed by a merge.
struct MergePlan {
    output: String,
    inputs: Vec<BarrelInfo>,
    readers: Vec<Arc<BarrelReader>>,
    deleted: Arc<Bitset>,
    first_doc: DocId,
    last_doc: DocId,
    deleted_before: usize,
}

impl Index {
    /// Open the index stored in `storage`, creating an empty one if the
    /// storage holds none.
    ///
    /// A merge lock left behind by an interrupted process is cleared, and
    /// barrel files not referenced by the directory are deleted.
    pub fn open(storage: Arc<dyn Storage>, config: IndexConfig) -> Result<Self> {
        config.validate()?;

        let mut barrels = BarrelsInfo::read(storage.as_ref())?;
        if barrels.is_locked() {
            log::warn!("clearing merge lock left by an interrupted merge");
            barrels.unlock();
            barrels.write(storage.as_ref())?;
        }
        remove_orphans(storage.as_ref(), &barrels)?;

        let deleted = if storage.file_exists(DELETED_FILE) {
            Bitset::read(storage.as_ref(), DELETED_FILE)?
        } else {
            Bitset::new()
        };
        let (documents, documents_dirty) = if storage.file_exists(DOCUMENTS_FILE) {
            (Bitset::read(storage.as_ref(), DOCUMENTS_FILE)?, false)
        } else {
            (covered_doc_ids(&barrels), !barrels.is_empty())
        };

        let mut schema = FieldsInfo::new();
        for barrel in barrels.iter() {
            let fields = FieldsInfo::read(storage.as_ref(), &barrel.name)?;
            for field in fields.iter() {
                if schema.get_by_name(&field.name).is_some() {
                    continue;
                }
                let id = if schema.get(field.id).is_none() {
                    field.id
                } else {
                    next_field_id(&schema)
                };
                schema.add_field(FieldInfo::new(id, field.name.clone(), field.flags, field.codec))?;
            }
        }

        log::debug!(
            "opened index v{}: {} barrels, {} documents, {} deleted",
            barrels.version(),
            barrels.len(),
            barrels.doc_count(),
            deleted.count()
        );
        let last_doc_id = barrels.max_doc_id();
        Ok(Index {
            inner: Arc::new(IndexInner {
                storage,
                config,
                state: Mutex::new(IndexState {
                    barrels,
                    schema,
                    current: None,
                    last_doc_id,
                    deleted: Arc::new(deleted),
                    deletions_dirty: false,
                    documents,
                    documents_dirty,
                    readers: AHashMap::new(),
                }),
            }),
        })
    }

    /// Open a fresh index held in memory.
    pub fn in_memory(config: IndexConfig) -> Result<Self> {
        Self::open(Arc::new(MemoryStorage::new()), config)
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.inner.storage
    }

    pub fn config(&self) -> &IndexConfig {
        &self.inner.config
    }

    /// Register a field, or return the id it is already registered with.
    ///
    /// Fields first seen in [`Index::add_document`] are registered
    /// implicitly with the configured codec.
    pub fn register_field(&self, name: &str, field_flags: u8, codec: Codec) -> Result<FieldId> {
        let mut state = self.inner.state.lock();
        if let Some(existing) = state.schema.get_by_name(name) {
            if existing.flags != field_flags || existing.codec != codec {
                return Err(BarrelError::invalid_argument(format!(
                    "field {name} is already registered with flags {:#04b} and codec {:?}",
                    existing.flags, existing.codec
                )));
            }
            return Ok(existing.id);
        }
        let id = next_field_id(&state.schema);
        state
            .schema
            .add_field(FieldInfo::new(id, name, field_flags, codec))?;
        Ok(id)
    }

    /// The field registry.
    pub fn schema(&self) -> FieldsInfo {
        self.inner.state.lock().schema.clone()
    }

    /// Add a document. Doc ids must be strictly increasing over the whole
    /// index.
    ///
    /// The in-memory barrel is flushed once its postings exceed the memory
    /// budget.
    pub fn add_document(
        &self,
        doc_id: DocId,
        collection: CollectionId,
        fields: &[FieldOccurrences],
    ) -> Result<()> {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        if let Some(last) = state.last_doc_id
            && doc_id <= last
        {
            return Err(BarrelError::invalid_argument(format!(
                "doc {doc_id} added after doc {last}"
            )));
        }

        for occurrences in fields {
            if state.schema.get_by_name(&occurrences.field).is_none() {
                let mut field_flags = flags::INDEXED;
                if occurrences.positions {
                    field_flags |= flags::POSITIONS;
                }
                let id = next_field_id(&state.schema);
                state.schema.add_field(FieldInfo::new(
                    id,
                    occurrences.field.clone(),
                    field_flags,
                    self.inner.config.posting.codec,
                ))?;
            }
        }

        if state.current.is_none() {
            let name = state.barrels.new_barrel_name();
            let mut info = BarrelInfo::new(name.clone());
            info.attach_writer()?;
            state.barrels.add_barrel(info)?;
            state.current = Some(MemBarrel::new(name));
        }
        let Some(current) = state.current.as_mut() else {
            return Err(BarrelError::index("no barrel is being written"));
        };
        current.add_document(doc_id, fields, &state.schema)?;
        state.documents.set(doc_id as usize)?;
        state.documents_dirty = true;
        let name = current.name().to_string();
        let memory_usage = current.memory_usage();

        match state.barrels.get_mut(&name) {
            Some(info) => info.add_document(doc_id, collection),
            None => {
                return Err(BarrelError::index(format!(
                    "barrel {name} is missing from the directory"
                )));
            }
        }
        state.last_doc_id = Some(doc_id);

        if memory_usage >= self.inner.config.memory_budget_bytes {
            log::debug!("barrel {name} uses {memory_usage} bytes, flushing");
            self.inner.flush_locked(state)?;
        }
        Ok(())
    }

    /// Mark a document deleted. Returns `false` if the document was never
    /// added, no barrel holds it any more, or it is already deleted.
    ///
    /// The owning barrel's document count drops immediately; its
    /// `max_doc_id` is never lowered. The bitset is persisted by
    /// [`Index::commit`].
    pub fn delete_document(&self, doc_id: DocId) -> bool {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let pos = doc_id as usize;
        if !state.documents.test(pos) || state.deleted.test(pos) {
            return false;
        }
        let Some(barrel) = state.barrels.barrel_for_doc_mut(doc_id) else {
            return false;
        };
        if Arc::make_mut(&mut state.deleted).set(pos).is_err() {
            return false;
        }
        barrel.delete_document();
        state.deletions_dirty = true;
        true
    }

    pub fn is_deleted(&self, doc_id: DocId) -> bool {
        self.inner.state.lock().deleted.test(doc_id as usize)
    }

    /// Write the in-memory barrel to storage. Returns its name, or `None`
    /// if there was nothing to flush.
    pub fn flush(&self) -> Result<Option<String>> {
        let mut state = self.inner.state.lock();
        self.inner.flush_locked(&mut state)
    }

    /// Flush and persist the deletion bitset and the barrel directory.
    pub fn commit(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        self.inner.flush_locked(&mut state)?;
        self.inner.persist_locked(&mut state)
    }

    /// Snapshot of every barrel record.
    pub fn barrels(&self) -> Vec<BarrelInfo> {
        self.inner.state.lock().barrels.iter().cloned().collect()
    }

    pub fn stats(&self) -> IndexStats {
        let state = self.inner.state.lock();
        IndexStats {
            barrel_count: state.barrels.len(),
            doc_count: state.barrels.doc_count(),
            deleted_count: state.barrels.deleted_doc_count(),
            max_doc_id: state.last_doc_id,
            version: state.barrels.version(),
            memory_usage: state.current.as_ref().map_or(0, MemBarrel::memory_usage),
            merging: state.barrels.is_locked(),
        }
    }

    /// Merge the named flushed barrels into a new barrel.
    ///
    /// The barrels must be adjacent in merge order, so the output covers a
    /// doc-id range no other barrel overlaps. Documents deleted before the
    /// merge starts are dropped from the output; deletions made while it
    /// runs stay recorded in the bitset and in the output's deleted count.
    pub fn merge<S: AsRef<str>>(&self, names: &[S]) -> Result<MergeReport> {
        self.inner.merge(names)
    }

    /// Merge every flushed barrel. Returns `None` if there are fewer than
    /// two.
    pub fn merge_all(&self) -> Result<Option<MergeReport>> {
        let names: Vec<String> = {
            let state = self.inner.state.lock();
            state
                .barrels
                .merge_ordered()
                .into_iter()
                .map(|b| b.name.clone())
                .collect()
        };
        if names.len() < 2 {
            return Ok(None);
        }
        self.inner.merge(&names).map(Some)
    }

    /// Run [`Index::merge`] on a separate thread.
    pub fn merge_in_background(&self, names: Vec<String>) -> Result<JoinHandle<Result<MergeReport>>> {
        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name("barrels-merge".to_string())
            .spawn(move || inner.merge(&names))?;
        Ok(handle)
    }

    /// Open a reader over the flushed barrels.
    ///
    /// Barrel readers and their listing caches are shared by every reader
    /// taken from this index until the barrel is merged away.
    pub fn reader(&self) -> Result<IndexReader> {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let infos: Vec<BarrelInfo> = state.barrels.merge_ordered().into_iter().cloned().collect();
        let mut barrels = Vec::with_capacity(infos.len());
        for info in infos {
            let reader = self.inner.barrel_reader(state, &info.name)?;
            barrels.push(ReaderBarrel { info, reader });
        }
        Ok(IndexReader::new(
            barrels,
            Arc::clone(&state.deleted),
            state.barrels.version(),
        ))
    }
}

impl IndexInner {
    fn flush_locked(&self, state: &mut IndexState) -> Result<Option<String>> {
        let Some(barrel) = state.current.take() else {
            return Ok(None);
        };
        if barrel.is_empty() {
            state.barrels.remove_barrel(barrel.name());
            return Ok(None);
        }

        let start = Instant::now();
        if let Err(e) = barrel.flush(
            Arc::clone(&self.storage),
            &self.config.posting,
            self.config.merge.term_ring_capacity,
        ) {
            state.current = Some(barrel);
            return Err(e);
        }
        let name = barrel.name().to_string();
        match state.barrels.get_mut(&name) {
            Some(info) => info.mark_flushed(),
            None => {
                return Err(BarrelError::index(format!(
                    "barrel {name} is missing from the directory"
                )));
            }
        }
        self.persist_locked(state)?;

        log::debug!(
            "flushed barrel {name}: {} documents in {}ms",
            barrel.doc_count(),
            start.elapsed().as_millis()
        );
        Ok(Some(name))
    }

    /// Persist the document and deletion bitsets if they changed, then the
    /// directory.
    fn persist_locked(&self, state: &mut IndexState) -> Result<()> {
        if state.documents_dirty {
            state.documents.write(
                self.storage.as_ref(),
                DOCUMENTS_FILE,
                self.config.compress_deletions,
            )?;
            state.documents_dirty = false;
        }
        if state.deletions_dirty {
            state.deleted.write(
                self.storage.as_ref(),
                DELETED_FILE,
                self.config.compress_deletions,
            )?;
            state.deletions_dirty = false;
        }
        if state.barrels.iter().any(|b| b.dirty && b.is_flushed()) {
            state.barrels.write(self.storage.as_ref())?;
        }
        Ok(())
    }

    fn barrel_reader(&self, state: &mut IndexState, name: &str) -> Result<Arc<BarrelReader>> {
        if let Some(reader) = state.readers.get(name) {
            return Ok(Arc::clone(reader));
        }
        let caches = self
            .config
            .cache
            .enabled
            .then(|| BarrelCaches::from_config(&self.config.cache));
        let reader = Arc::new(BarrelReader::open(
            Arc::clone(&self.storage),
            name,
            caches.as_ref(),
        )?);
        state.readers.insert(name.to_string(), Arc::clone(&reader));
        Ok(reader)
    }

    fn merge<S: AsRef<str>>(&self, names: &[S]) -> Result<MergeReport> {
        let start = Instant::now();
        let plan = self.begin_merge(names)?;

        let inputs: Vec<MergeInput> = plan
            .inputs
            .iter()
            .zip(&plan.readers)
            .map(|(info, reader)| {
                MergeInput::new(Arc::clone(reader), info.min_base_doc_id().unwrap_or(0))
            })
            .collect();
        let merger = BarrelMerger::new(
            Arc::clone(&self.storage),
            &self.config.posting,
            &self.config.merge,
        );
        let deleted = plan.deleted.any().then_some(plan.deleted.as_ref());
        let result = merger.merge(&inputs, &plan.output, deleted);
        drop(inputs);

        match result {
            Ok(outcome) => {
                let mut report = self.publish_merge(plan, outcome.stats)?;
                report.stats.merge_time_ms = start.elapsed().as_millis() as u64;
                Ok(report)
            }
            Err(e) => {
                log::warn!("merge into {} failed: {e}", plan.output);
                self.abandon_merge(&plan);
                Err(e)
            }
        }
    }

    /// Validate and claim the inputs of a merge under the lock.
    fn begin_merge<S: AsRef<str>>(&self, names: &[S]) -> Result<MergePlan> {
        if names.is_empty() {
            return Err(BarrelError::invalid_argument("no barrels to merge"));
        }
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let ordered: Vec<String> = state
            .barrels
            .merge_ordered()
            .into_iter()
            .map(|b| b.name.clone())
            .collect();
        let mut slots = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            let Some(info) = state.barrels.get(name) else {
                return Err(BarrelError::invalid_argument(format!("unknown barrel {name}")));
            };
            if !info.is_flushed() {
                return Err(BarrelError::index(format!(
                    "barrel {name} is still being written"
                )));
            }
            match ordered.iter().position(|n| n == name) {
                Some(slot) => slots.push(slot),
                None => {
                    return Err(BarrelError::index(format!(
                        "barrel {name} cannot be merged"
                    )));
                }
            }
        }
        slots.sort_unstable();
        if slots.windows(2).any(|w| w[0] == w[1]) {
            return Err(BarrelError::invalid_argument(
                "a barrel is listed twice in the merge",
            ));
        }
        if slots.windows(2).any(|w| w[1] != w[0] + 1) {
            return Err(BarrelError::invalid_argument(
                "merged barrels must be adjacent in doc-id order",
            ));
        }

        state.barrels.lock()?;
        let output = state.barrels.new_barrel_name();
        let input_names: Vec<String> = slots.iter().map(|&slot| ordered[slot].clone()).collect();
        let mut inputs = Vec::with_capacity(input_names.len());
        for name in &input_names {
            if let Some(info) = state.barrels.get_mut(name) {
                info.merging = true;
                inputs.push(info.clone());
            }
        }

        let readers = match self.claim_inputs(state, &input_names) {
            Ok(readers) => readers,
            Err(e) => {
                release_inputs(state, &input_names);
                return Err(e);
            }
        };

        let first_doc = inputs
            .iter()
            .filter_map(BarrelInfo::min_base_doc_id)
            .min()
            .unwrap_or(0);
        let last_doc = inputs.iter().map(|b| b.max_doc_id).max().unwrap_or(0);
        let deleted = Arc::clone(&state.deleted);
        let deleted_before = deleted.count_range(first_doc as usize, last_doc as usize + 1);
        log::debug!(
            "merging {} into {output} (docs {first_doc}..={last_doc}, {deleted_before} deleted)",
            input_names.join(", ")
        );

        Ok(MergePlan {
            output,
            inputs,
            readers,
            deleted,
            first_doc,
            last_doc,
            deleted_before,
        })
    }

    /// Persist the lock and open the inputs.
    fn claim_inputs(&self, state: &mut IndexState, names: &[String]) -> Result<Vec<Arc<BarrelReader>>> {
        state.barrels.write(self.storage.as_ref())?;
        names
            .iter()
            .map(|name| self.barrel_reader(state, name))
            .collect()
    }

    /// Swap the inputs for the output in the directory and delete their
    /// files.
    fn publish_merge(&self, plan: MergePlan, stats: MergeStats) -> Result<MergeReport> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let mut removed = Vec::with_capacity(plan.inputs.len());
        for input in &plan.inputs {
            if let Some(mut info) = state.barrels.remove_barrel(&input.name) {
                info.merging = false;
                removed.push(info);
            }
        }
        let mut merged = BarrelInfo::merged(plan.output.clone(), &removed);
        let deleted_now = state
            .deleted
            .count_range(plan.first_doc as usize, plan.last_doc as usize + 1);
        merged.deleted_count = deleted_now.saturating_sub(plan.deleted_before) as u32;
        merged.has_updates = merged.deleted_count > 0;
        state.barrels.add_barrel(merged)?;
        state.barrels.unlock();

        if let Err(e) = self.persist_locked(state) {
            state.barrels.remove_barrel(&plan.output);
            for info in removed {
                state.barrels.add_barrel(info)?;
            }
            remove_barrel_files(self.storage.as_ref(), &plan.output);
            return Err(e);
        }

        let inputs: Vec<String> = removed.into_iter().map(|b| b.name).collect();
        for name in &inputs {
            state.readers.remove(name);
            remove_barrel_files(self.storage.as_ref(), name);
        }
        log::info!(
            "published barrel {} replacing {}",
            plan.output,
            inputs.join(", ")
        );
        Ok(MergeReport {
            barrel: plan.output,
            inputs,
            stats,
        })
    }

    fn abandon_merge(&self, plan: &MergePlan) {
        let mut state = self.state.lock();
        let names: Vec<String> = plan.inputs.iter().map(|b| b.name.clone()).collect();
        release_inputs(&mut state, &names);
        if let Err(e) = state.barrels.write(self.storage.as_ref()) {
            log::warn!("failed to persist the barrel directory after a failed merge: {e}");
        }
    }
}

fn release_inputs(state: &mut IndexState, names: &[String]) {
    for name in names {
        if let Some(info) = state.barrels.get_mut(name) {
            info.merging = false;
        }
    }
    state.barrels.unlock();
}

fn next_field_id(schema: &FieldsInfo) -> FieldId {
    schema.iter().map(|f| f.id + 1).max().unwrap_or(0)
}

/// Every doc id inside a barrel's range. Used for directories written
/// without a document bitset.
fn covered_doc_ids(barrels: &BarrelsInfo) -> Bitset {
    let mut documents = Bitset::new();
    for barrel in barrels.iter() {
        if let Some(first) = barrel.min_base_doc_id()
            && barrel.doc_count > 0
        {
            documents.set_range(first as usize, barrel.max_doc_id as usize + 1);
        }
    }
    documents
}

/// Delete temporary files and barrel files the directory does not know.
fn remove_orphans(storage: &dyn Storage, barrels: &BarrelsInfo) -> Result<()> {
    for file in storage.list_files()? {
        if file == BARRELS_FILE || file == DELETED_FILE || file == DOCUMENTS_FILE {
            continue;
        }
        let orphan = match file.rsplit_once('.') {
            Some((_, "tmp")) => true,
            Some((stem, ext)) => BARREL_EXTENSIONS.contains(&ext) && barrels.get(stem).is_none(),
            None => false,
        };
        if orphan {
            log::warn!("removing orphan file {file}");
            storage.delete_file(&file)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MergeStrategy, PostingConfig};

    fn config() -> IndexConfig {
        IndexConfig {
            posting: PostingConfig {
                chunk_size: 4,
                skip_interval: 2,
                ..PostingConfig::default()
            },
            ..IndexConfig::default()
        }
    }

    fn doc(tokens: &[&str]) -> Vec<FieldOccurrences> {
        vec![FieldOccurrences::from_tokens("body", tokens.iter().copied())]
    }

    fn docs_of(reader: &IndexReader, term: &str) -> Vec<DocId> {
        reader
            .postings("body", term)
            .unwrap()
            .into_iter()
            .map(|(doc, _)| doc)
            .collect()
    }

    #[test]
    fn test_add_flush_read() {
        let index = Index::in_memory(config()).unwrap();
        index.add_document(1, 0, &doc(&["a", "b"])).unwrap();
        index.add_document(2, 0, &doc(&["b"])).unwrap();
        assert_eq!(index.flush().unwrap(), Some("_0".to_string()));
        assert_eq!(index.flush().unwrap(), None);

        index.add_document(7, 1, &doc(&["b", "c"])).unwrap();
        index.commit().unwrap();

        let reader = index.reader().unwrap();
        assert_eq!(reader.barrels().len(), 2);
        assert_eq!(reader.doc_count(), 3);
        assert_eq!(docs_of(&reader, "b"), vec![1, 2, 7]);
        assert_eq!(reader.doc_freq("body", "b").unwrap(), 3);
        assert!(reader.postings("title", "b").unwrap().is_empty());

        let schema = index.schema();
        assert!(schema.get_by_name("body").unwrap().has_positions());
    }

    #[test]
    fn test_doc_ids_must_increase() {
        let index = Index::in_memory(config()).unwrap();
        index.add_document(5, 0, &doc(&["a"])).unwrap();
        assert!(index.add_document(5, 0, &doc(&["a"])).is_err());
        index.flush().unwrap();
        assert!(index.add_document(3, 0, &doc(&["a"])).is_err());
        index.add_document(6, 0, &doc(&["a"])).unwrap();
    }

    #[test]
    fn test_register_field() {
        let index = Index::in_memory(config()).unwrap();
        let id = index
            .register_field("tags", flags::INDEXED, Codec::VByte)
            .unwrap();
        assert_eq!(
            index
                .register_field("tags", flags::INDEXED, Codec::VByte)
                .unwrap(),
            id
        );
        assert!(
            index
                .register_field("tags", flags::INDEXED | flags::POSITIONS, Codec::VByte)
                .is_err()
        );
        index.add_document(0, 0, &doc(&["x"])).unwrap();
        assert_eq!(index.schema().field_id("body"), Some(id + 1));
    }

    #[test]
    fn test_delete_document() {
        let index = Index::in_memory(config()).unwrap();
        for id in 0..5 {
            index.add_document(id, 0, &doc(&["t"])).unwrap();
        }
        index.flush().unwrap();

        assert!(index.delete_document(3));
        assert!(!index.delete_document(3));
        assert!(!index.delete_document(100));
        assert!(index.is_deleted(3));

        let barrel = &index.barrels()[0];
        assert_eq!(barrel.doc_count, 4);
        assert_eq!(barrel.deleted_count, 1);
        assert_eq!(barrel.max_doc_id, 4);

        let reader = index.reader().unwrap();
        assert_eq!(docs_of(&reader, "t"), vec![0, 1, 2, 4]);
        assert_eq!(reader.doc_freq("body", "t").unwrap(), 5);
    }

    #[test]
    fn test_deleting_a_gap_in_a_barrel_is_refused() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        {
            let index = Index::open(Arc::clone(&storage), config()).unwrap();
            for id in [10, 12, 20] {
                index.add_document(id, 0, &doc(&["t"])).unwrap();
            }
            index.commit().unwrap();

            assert!(!index.delete_document(11));
            assert!(!index.delete_document(15));
            assert!(!index.is_deleted(11));
            let barrel = &index.barrels()[0];
            assert_eq!((barrel.doc_count, barrel.deleted_count), (3, 0));
        }

        let index = Index::open(Arc::clone(&storage), config()).unwrap();
        assert!(!index.delete_document(11));
        assert!(index.delete_document(12));
        let barrel = &index.barrels()[0];
        assert_eq!((barrel.doc_count, barrel.deleted_count), (2, 1));
    }

    #[test]
    fn test_merge_drops_deleted_documents() {
        let index = Index::in_memory(config()).unwrap();
        for id in 0..6 {
            index.add_document(id, 0, &doc(&["bar"])).unwrap();
        }
        index.flush().unwrap();
        for id in 6..9 {
            index.add_document(id, 0, &doc(&["bar", "baz"])).unwrap();
        }
        index.flush().unwrap();
        assert!(index.delete_document(5));

        let report = index.merge_all().unwrap().unwrap();
        assert_eq!(report.inputs, vec!["_0".to_string(), "_1".to_string()]);
        assert_eq!(report.stats.deleted_postings_removed, 1);

        let barrels = index.barrels();
        assert_eq!(barrels.len(), 1);
        assert_eq!(barrels[0].name, report.barrel);
        assert_eq!(barrels[0].doc_count, 8);
        assert_eq!(barrels[0].deleted_count, 0);

        let reader = index.reader().unwrap();
        assert_eq!(reader.doc_freq("body", "bar").unwrap(), 8);
        assert_eq!(docs_of(&reader, "bar"), vec![0, 1, 2, 3, 4, 6, 7, 8]);
        assert!(!index.storage().file_exists("_0.dfp"));
        assert!(!index.storage().file_exists("_1.fdi"));
    }

    #[test]
    fn test_merge_requires_adjacent_barrels() {
        let index = Index::in_memory(config()).unwrap();
        for doc_id in 0..3 {
            index.add_document(doc_id * 10, 0, &doc(&["x"])).unwrap();
            index.flush().unwrap();
        }
        assert!(index.merge(&["_0", "_2"]).is_err());
        assert!(index.merge(&["_0", "_0"]).is_err());
        assert!(index.merge(&["_9"]).is_err());
        assert!(index.merge::<&str>(&[]).is_err());
        assert!(!index.stats().merging);

        let report = index.merge(&["_1", "_2"]).unwrap();
        assert_eq!(report.barrel, "_3");
        assert_eq!(index.barrels().len(), 2);
    }

    #[test]
    fn test_unflushed_barrel_is_not_merged() {
        let index = Index::in_memory(config()).unwrap();
        index.add_document(0, 0, &doc(&["x"])).unwrap();
        assert!(index.merge(&["_0"]).is_err());
        assert_eq!(index.merge_all().unwrap().map(|r| r.barrel), None);
    }

    #[test]
    fn test_background_merge() {
        let mut config = config();
        config.merge.strategy = MergeStrategy::Streaming;
        let index = Index::in_memory(config).unwrap();
        for id in 0..40 {
            index.add_document(id, 0, &doc(&["all", "more"])).unwrap();
            if id % 10 == 9 {
                index.flush().unwrap();
            }
        }
        let names: Vec<String> = index.barrels().into_iter().map(|b| b.name).collect();
        let handle = index.merge_in_background(names).unwrap();

        index.add_document(40, 0, &doc(&["all"])).unwrap();
        let report = handle.join().unwrap().unwrap();
        assert_eq!(report.inputs.len(), 4);
        assert!(report.stats.chunks_copied > 0);

        index.commit().unwrap();
        let reader = index.reader().unwrap();
        assert_eq!(docs_of(&reader, "all"), (0..41).collect::<Vec<_>>());
    }

    #[test]
    fn test_auto_flush_on_memory_budget() {
        let mut config = config();
        config.memory_budget_bytes = 1;
        let index = Index::in_memory(config).unwrap();
        index.add_document(0, 0, &doc(&["a"])).unwrap();
        index.add_document(1, 0, &doc(&["b"])).unwrap();
        let barrels = index.barrels();
        assert_eq!(barrels.len(), 2);
        assert!(barrels.iter().all(BarrelInfo::is_flushed));
    }

    #[test]
    fn test_reopen_restores_state() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        {
            let index = Index::open(Arc::clone(&storage), config()).unwrap();
            index.add_document(1, 0, &doc(&["a"])).unwrap();
            index.add_document(2, 0, &doc(&["a", "b"])).unwrap();
            index.delete_document(1);
            index.commit().unwrap();
            // Never committed.
            index.add_document(3, 0, &doc(&["c"])).unwrap();
        }
        storage.create_output("_7.voc").unwrap().close().unwrap();

        let index = Index::open(Arc::clone(&storage), config()).unwrap();
        assert!(!storage.file_exists("_7.voc"));
        assert!(index.is_deleted(1));
        assert_eq!(index.stats().doc_count, 1);
        assert_eq!(index.stats().max_doc_id, Some(2));
        assert!(index.schema().get_by_name("body").is_some());

        let reader = index.reader().unwrap();
        assert_eq!(docs_of(&reader, "a"), vec![2]);
        index.add_document(3, 0, &doc(&["c"])).unwrap();
    }

    #[test]
    fn test_stale_lock_is_cleared() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let mut barrels = BarrelsInfo::new();
        barrels.lock().unwrap();
        barrels.write(storage.as_ref()).unwrap();

        let index = Index::open(Arc::clone(&storage), config()).unwrap();
        assert!(!index.stats().merging);
        assert!(!BarrelsInfo::read(storage.as_ref()).unwrap().is_locked());
    }
}
