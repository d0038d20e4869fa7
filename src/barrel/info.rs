//! Barrel (segment) records and the barrel directory.
//!
//! A [`BarrelInfo`] describes one barrel: its name, where each collection's
//! documents start inside it, how many documents it holds and whether it is
//! still being written. [`BarrelsInfo`] owns every record of an index and
//! persists the flushed ones to the `barrels` file.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{BarrelError, Result};
use crate::storage::{Storage, StructReader, StructWriter};
use crate::types::{CollectionId, DocId};

/// Name of the barrel directory file.
pub const BARRELS_FILE: &str = "barrels";

/// Magic number of the barrel directory file ("BRLS").
const BARRELS_MAGIC: u32 = 0x4252_4C53;

/// Format version of the barrel directory file.
pub const BARRELS_FORMAT_VERSION: u32 = 1;

/// Lifecycle of a barrel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BarrelState {
    /// A writer is attached and documents are still being added.
    Writing,
    /// Written to storage; immutable apart from deletions.
    Flushed,
}

/// Metadata of one barrel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarrelInfo {
    /// Barrel name, also the prefix of its files.
    pub name: String,

    /// First doc id of each collection within this barrel.
    pub base_doc_ids: BTreeMap<CollectionId, DocId>,

    /// Number of live documents.
    pub doc_count: u32,

    /// Highest doc id ever added. Never shrinks on delete.
    pub max_doc_id: DocId,

    /// Number of documents deleted since the barrel was flushed.
    pub deleted_count: u32,

    /// Deletions were applied after the flush.
    pub has_updates: bool,

    /// Metadata changed since the directory was last persisted.
    pub dirty: bool,

    /// The barrel is an input of a running merge.
    pub merging: bool,

    state: BarrelState,
}

impl BarrelInfo {
    /// Create an empty barrel in the writing state, with a writer attached.
    pub fn new(name: impl Into<String>) -> Self {
        BarrelInfo {
            name: name.into(),
            base_doc_ids: BTreeMap::new(),
            doc_count: 0,
            max_doc_id: 0,
            deleted_count: 0,
            has_updates: false,
            dirty: true,
            merging: false,
            state: BarrelState::Writing,
        }
    }

    /// Record of the barrel produced by merging `inputs`. The result is
    /// flushed; deletions must be recounted by the caller.
    pub fn merged<'a, I>(name: impl Into<String>, inputs: I) -> Self
    where
        I: IntoIterator<Item = &'a BarrelInfo>,
    {
        let mut barrel = BarrelInfo::new(name);
        for input in inputs {
            for (&collection, &base) in &input.base_doc_ids {
                barrel
                    .base_doc_ids
                    .entry(collection)
                    .and_modify(|b| *b = (*b).min(base))
                    .or_insert(base);
            }
            barrel.doc_count += input.doc_count;
            barrel.max_doc_id = barrel.max_doc_id.max(input.max_doc_id);
        }
        barrel.state = BarrelState::Flushed;
        barrel
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BarrelState {
        self.state
    }

    /// Whether the barrel has been written to storage.
    pub fn is_flushed(&self) -> bool {
        self.state == BarrelState::Flushed
    }

    /// Attach a writer. A barrel accepts at most one writer, and only
    /// before it is flushed.
    pub fn attach_writer(&mut self) -> Result<()> {
        match self.state {
            BarrelState::Flushed => Err(BarrelError::index(format!(
                "barrel {} is flushed and cannot be written",
                self.name
            ))),
            BarrelState::Writing if self.doc_count > 0 || !self.base_doc_ids.is_empty() => {
                Err(BarrelError::index(format!(
                    "barrel {} already has a writer",
                    self.name
                )))
            }
            BarrelState::Writing => Ok(()),
        }
    }

    /// Detach the writer and mark the barrel flushed.
    pub fn mark_flushed(&mut self) {
        self.state = BarrelState::Flushed;
        self.dirty = true;
    }

    /// Record a newly added document.
    pub fn add_document(&mut self, doc_id: DocId, collection: CollectionId) {
        self.base_doc_ids.entry(collection).or_insert(doc_id);
        if self.doc_count == 0 && self.deleted_count == 0 {
            self.max_doc_id = doc_id;
        } else {
            self.max_doc_id = self.max_doc_id.max(doc_id);
        }
        self.doc_count += 1;
        self.dirty = true;
    }

    /// Record a deletion. `max_doc_id` is left untouched.
    pub fn delete_document(&mut self) {
        self.doc_count = self.doc_count.saturating_sub(1);
        self.deleted_count += 1;
        self.has_updates = true;
        self.dirty = true;
    }

    /// Smallest base doc id over all collections.
    pub fn min_base_doc_id(&self) -> Option<DocId> {
        self.base_doc_ids.values().copied().min()
    }

    /// Whether `doc_id` falls in the doc-id range covered by this barrel.
    pub fn covers(&self, doc_id: DocId) -> bool {
        match self.min_base_doc_id() {
            Some(base) => base <= doc_id && doc_id <= self.max_doc_id,
            None => false,
        }
    }

    /// Merge order: smallest base doc id first, larger barrels first on ties.
    pub fn merge_order(&self, other: &BarrelInfo) -> Ordering {
        let lhs = self.min_base_doc_id().unwrap_or(DocId::MAX);
        let rhs = other.min_base_doc_id().unwrap_or(DocId::MAX);
        lhs.cmp(&rhs)
            .then_with(|| other.doc_count.cmp(&self.doc_count))
            .then_with(|| self.name.cmp(&other.name))
    }
}

/// The ordered collection of all barrels of one index.
#[derive(Debug, Clone, PartialEq)]
pub struct BarrelsInfo {
    barrels: Vec<BarrelInfo>,
    name_counter: u32,
    version: u64,
    locked: bool,
}

impl Default for BarrelsInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl BarrelsInfo {
    /// Create an empty directory.
    pub fn new() -> Self {
        BarrelsInfo {
            barrels: Vec::new(),
            name_counter: 0,
            version: 0,
            locked: false,
        }
    }

    /// Allocate the next unused barrel name (`_0`, `_1`, ...).
    pub fn new_barrel_name(&mut self) -> String {
        let name = format!("_{}", self.name_counter);
        self.name_counter += 1;
        name
    }

    /// Add a barrel record.
    pub fn add_barrel(&mut self, barrel: BarrelInfo) -> Result<()> {
        if self.get(&barrel.name).is_some() {
            return Err(BarrelError::index(format!(
                "barrel {} already exists",
                barrel.name
            )));
        }
        self.barrels.push(barrel);
        Ok(())
    }

    /// Remove a barrel record.
    pub fn remove_barrel(&mut self, name: &str) -> Option<BarrelInfo> {
        let idx = self.barrels.iter().position(|b| b.name == name)?;
        Some(self.barrels.remove(idx))
    }

    /// Look up a barrel by name.
    pub fn get(&self, name: &str) -> Option<&BarrelInfo> {
        self.barrels.iter().find(|b| b.name == name)
    }

    /// Look up a barrel by name for modification.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut BarrelInfo> {
        self.barrels.iter_mut().find(|b| b.name == name)
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &BarrelInfo> {
        self.barrels.iter()
    }

    /// Number of barrels.
    pub fn len(&self) -> usize {
        self.barrels.len()
    }

    /// Whether the directory has no barrels.
    pub fn is_empty(&self) -> bool {
        self.barrels.is_empty()
    }

    /// Live documents over all barrels.
    pub fn doc_count(&self) -> u64 {
        self.barrels.iter().map(|b| b.doc_count as u64).sum()
    }

    /// Deleted documents over all barrels.
    pub fn deleted_doc_count(&self) -> u64 {
        self.barrels.iter().map(|b| b.deleted_count as u64).sum()
    }

    /// Highest doc id over all barrels.
    pub fn max_doc_id(&self) -> Option<DocId> {
        self.barrels
            .iter()
            .filter(|b| b.doc_count > 0 || b.deleted_count > 0)
            .map(|b| b.max_doc_id)
            .max()
    }

    /// Barrel whose doc-id range covers `doc_id`.
    pub fn barrel_for_doc_mut(&mut self, doc_id: DocId) -> Option<&mut BarrelInfo> {
        self.barrels.iter_mut().find(|b| b.covers(doc_id))
    }

    /// Flushed barrels in merge order.
    pub fn merge_ordered(&self) -> Vec<&BarrelInfo> {
        let mut barrels: Vec<&BarrelInfo> =
            self.barrels.iter().filter(|b| b.is_flushed()).collect();
        barrels.sort_by(|a, b| a.merge_order(b));
        barrels
    }

    /// Persisted generation of the directory.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Next name counter value.
    pub fn name_counter(&self) -> u32 {
        self.name_counter
    }

    /// Whether a merge holds the advisory lock.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Take the advisory merge lock. Fails if it is already held.
    pub fn lock(&mut self) -> Result<()> {
        if self.locked {
            return Err(BarrelError::index("a merge is already in progress"));
        }
        self.locked = true;
        Ok(())
    }

    /// Release the advisory merge lock.
    pub fn unlock(&mut self) {
        self.locked = false;
    }

    /// Persist the flushed barrels, bumping the version.
    ///
    /// The file is written under a temporary name and renamed into place.
    pub fn write(&mut self, storage: &dyn Storage) -> Result<()> {
        self.version += 1;

        let tmp_name = format!("{BARRELS_FILE}.tmp");
        let output = storage.create_output(&tmp_name)?;
        let mut writer = StructWriter::new(output);

        writer.write_u32(BARRELS_MAGIC)?;
        writer.write_u32(BARRELS_FORMAT_VERSION)?;
        writer.write_u64(self.version)?;
        writer.write_u32(self.name_counter)?;
        writer.write_u8(self.locked as u8)?;

        let flushed: Vec<&BarrelInfo> = self.barrels.iter().filter(|b| b.is_flushed()).collect();
        writer.write_varint(flushed.len() as u64)?;
        for barrel in flushed {
            writer.write_string(&barrel.name)?;
            writer.write_varint(barrel.base_doc_ids.len() as u64)?;
            for (&collection, &base) in &barrel.base_doc_ids {
                writer.write_varint(collection as u64)?;
                writer.write_varint(base as u64)?;
            }
            writer.write_varint(barrel.doc_count as u64)?;
            writer.write_varint(barrel.max_doc_id as u64)?;
            writer.write_varint(barrel.deleted_count as u64)?;
            writer.write_u8(barrel.has_updates as u8)?;
        }
        writer.close()?;
        storage.rename_file(&tmp_name, BARRELS_FILE)?;

        for barrel in self.barrels.iter_mut().filter(|b| b.is_flushed()) {
            barrel.dirty = false;
        }
        log::debug!(
            "persisted barrel directory v{} ({} barrels)",
            self.version,
            self.barrels.len()
        );
        Ok(())
    }

    /// Load the directory. A missing file yields an empty directory.
    pub fn read(storage: &dyn Storage) -> Result<Self> {
        if !storage.file_exists(BARRELS_FILE) {
            return Ok(BarrelsInfo::new());
        }

        let input = storage.open_input(BARRELS_FILE)?;
        let mut reader = StructReader::new(input)?;

        let magic = reader.read_u32()?;
        if magic != BARRELS_MAGIC {
            return Err(BarrelError::corruption(format!(
                "invalid barrel directory magic {magic:#x}"
            )));
        }
        let format = reader.read_u32()?;
        if format != BARRELS_FORMAT_VERSION {
            return Err(BarrelError::corruption(format!(
                "unsupported barrel directory format {format}"
            )));
        }

        let version = reader.read_u64()?;
        let name_counter = reader.read_u32()?;
        let locked = reader.read_u8()? != 0;

        let count = reader.read_varint()?;
        let mut barrels = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            let name = reader.read_string()?;
            let entries = reader.read_varint()?;
            let mut base_doc_ids = BTreeMap::new();
            for _ in 0..entries {
                let collection = reader.read_varint_u32()?;
                let base = reader.read_varint_u32()?;
                base_doc_ids.insert(collection, base);
            }
            let doc_count = reader.read_varint_u32()?;
            let max_doc_id = reader.read_varint_u32()?;
            let deleted_count = reader.read_varint_u32()?;
            let has_updates = reader.read_u8()? != 0;

            barrels.push(BarrelInfo {
                name,
                base_doc_ids,
                doc_count,
                max_doc_id,
                deleted_count,
                has_updates,
                dirty: false,
                merging: false,
                state: BarrelState::Flushed,
            });
        }
        reader.verify_checksum()?;

        Ok(BarrelsInfo {
            barrels,
            name_counter,
            version,
            locked,
        })
    }
}
