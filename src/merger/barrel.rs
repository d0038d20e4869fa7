//! Merging whole barrels.

use std::sync::Arc;
use std::time::Instant;

use ahash::{AHashMap, AHashSet};

use crate::barrel::field::{FieldInfo, FieldsInfo, flags};
use crate::barrel::reader::BarrelReader;
use crate::barrel::writer::{BarrelWriter, remove_barrel_files};
use crate::bitset::Bitset;
use crate::config::{MergeConfig, PostingConfig};
use crate::error::{BarrelError, Result};
use crate::merger::MergeStats;
use crate::merger::field::{FieldInput, FieldMerger};
use crate::storage::Storage;
use crate::types::DocId;

/// One barrel to merge.
#[derive(Debug, Clone)]
pub struct MergeInput {
    pub barrel: Arc<BarrelReader>,
    /// First doc id of the barrel.
    pub base_doc_id: DocId,
    /// Added to every doc id of the barrel. Zero when doc ids are already
    /// global.
    pub doc_offset: DocId,
}

impl MergeInput {
    pub fn new(barrel: Arc<BarrelReader>, base_doc_id: DocId) -> Self {
        MergeInput {
            barrel,
            base_doc_id,
            doc_offset: 0,
        }
    }

    pub fn with_offset(mut self, doc_offset: DocId) -> Self {
        self.doc_offset = doc_offset;
        self
    }
}

/// Result of a successful merge.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub fields: FieldsInfo,
    pub stats: MergeStats,
}

/// Merges barrels into a new barrel.
#[derive(Debug)]
pub struct BarrelMerger {
    storage: Arc<dyn Storage>,
    posting: PostingConfig,
    config: MergeConfig,
}

impl BarrelMerger {
    pub fn new(storage: Arc<dyn Storage>, posting: &PostingConfig, config: &MergeConfig) -> Self {
        BarrelMerger {
            storage,
            posting: posting.clone(),
            config: config.clone(),
        }
    }

    /// Merge `inputs` into the barrel `output`, dropping documents set in
    /// `deleted`.
    ///
    /// The output is complete once this returns; on error every file of
    /// `output` is removed and the inputs are left as they were.
    pub fn merge(
        &self,
        inputs: &[MergeInput],
        output: &str,
        deleted: Option<&Bitset>,
    ) -> Result<MergeOutcome> {
        if inputs.is_empty() {
            return Err(BarrelError::invalid_argument("nothing to merge"));
        }
        if inputs.iter().any(|input| input.barrel.name() == output) {
            return Err(BarrelError::invalid_argument(format!(
                "merge output {output} is also an input"
            )));
        }

        let start = Instant::now();
        let fields = self.plan_fields(inputs)?;
        let mut stats = MergeStats {
            barrels_merged: inputs.len(),
            ..MergeStats::default()
        };

        let mut writer = BarrelWriter::create(
            Arc::clone(&self.storage),
            output,
            &self.posting,
            self.config.term_ring_capacity,
        )?;
        if let Err(e) = self.write_fields(&mut writer, inputs, &fields, deleted, &mut stats) {
            writer.abort();
            return Err(e);
        }
        let fields = match writer.finish() {
            Ok(fields) => fields,
            Err(e) => {
                remove_barrel_files(self.storage.as_ref(), output);
                return Err(e);
            }
        };

        stats.merge_time_ms = start.elapsed().as_millis() as u64;
        log::info!(
            "merged {} barrels into {output}: {} terms, {} postings, {} deleted postings removed in {}ms",
            stats.barrels_merged,
            stats.terms_written,
            stats.postings_written,
            stats.deleted_postings_removed,
            stats.merge_time_ms
        );
        Ok(MergeOutcome { fields, stats })
    }

    /// Output field table: fields are matched by name. Positions are kept
    /// only if every input stores them; the codec is kept if every input
    /// agrees, otherwise the configured one is used.
    fn plan_fields(&self, inputs: &[MergeInput]) -> Result<Vec<FieldInfo>> {
        let mut planned: Vec<FieldInfo> = Vec::new();
        let mut by_name: AHashMap<String, usize> = AHashMap::new();
        for input in inputs {
            for field in input.barrel.fields().iter() {
                match by_name.get(&field.name) {
                    Some(&idx) => {
                        let out = &mut planned[idx];
                        let positions = out.flags & field.flags & flags::POSITIONS;
                        out.flags = ((out.flags | field.flags) & !flags::POSITIONS) | positions;
                        if out.codec != field.codec {
                            out.codec = self.posting.codec;
                        }
                    }
                    None => {
                        by_name.insert(field.name.clone(), planned.len());
                        planned.push(FieldInfo::new(
                            field.id,
                            field.name.clone(),
                            field.flags,
                            field.codec,
                        ));
                    }
                }
            }
        }

        // Keep ids where possible; give a fresh id to any name whose id is
        // already taken.
        planned.sort_by_key(|field| field.id);
        let mut used = AHashSet::new();
        let mut next_free = planned.iter().map(|f| f.id + 1).max().unwrap_or(0);
        for field in planned.iter_mut() {
            if !used.insert(field.id) {
                log::warn!(
                    "field {} reuses id {} across barrels, renumbered to {next_free}",
                    field.name,
                    field.id
                );
                field.id = next_free;
                used.insert(next_free);
                next_free += 1;
            }
        }
        Ok(planned)
    }

    fn write_fields(
        &self,
        writer: &mut BarrelWriter,
        inputs: &[MergeInput],
        fields: &[FieldInfo],
        deleted: Option<&Bitset>,
        stats: &mut MergeStats,
    ) -> Result<()> {
        let mut merger = FieldMerger::new(self.config.strategy, deleted);
        for field in fields {
            let mut field_inputs = Vec::with_capacity(inputs.len());
            for input in inputs {
                if let Some(terms) = input.barrel.term_iterator(&field.name, None)? {
                    field_inputs.push(FieldInput {
                        terms,
                        base_doc_id: input.base_doc_id,
                        doc_offset: input.doc_offset,
                    });
                }
            }
            merger.merge(writer, field, field_inputs, stats)?;
        }
        Ok(())
    }
}
