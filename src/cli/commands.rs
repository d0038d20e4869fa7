//! Command implementations for the barrels CLI.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};

use crate::barrel::barrel_files;
use crate::barrel::field::FieldsInfo;
use crate::barrel::info::BarrelsInfo;
use crate::barrel::reader::BarrelReader;
use crate::cli::args::*;
use crate::cli::output::*;
use crate::config::IndexConfig;
use crate::index::Index;
use crate::storage::{FileStorage, Storage, StorageConfig};

/// Execute a CLI command.
///
/// Errors carry the index path or barrel they concern as context.
pub fn execute_command(args: BarrelsArgs) -> Result<()> {
    match &args.command {
        Command::Info(info_args) => show_info(info_args, &args),
        Command::Terms(terms_args) => list_terms(terms_args, &args),
        Command::Merge(merge_args) => merge_barrels(merge_args, &args),
    }
}

fn open_storage(path: &Path) -> Result<Arc<dyn Storage>> {
    if !path.is_dir() {
        bail!("{} is not an index directory", path.display());
    }
    let storage = FileStorage::new(path, StorageConfig::default())
        .with_context(|| format!("failed to open {}", path.display()))?;
    Ok(Arc::new(storage))
}

fn load_config(args: &BarrelsArgs) -> Result<IndexConfig> {
    match &args.config {
        Some(path) => {
            log::info!("loading configuration from {}", path.display());
            IndexConfig::load(path)
                .with_context(|| format!("failed to load configuration {}", path.display()))
        }
        None => Ok(IndexConfig::default()),
    }
}

/// Show the barrel directory without modifying the index.
fn show_info(args: &InfoArgs, cli_args: &BarrelsArgs) -> Result<()> {
    let storage = open_storage(&args.index_path)?;
    let directory = BarrelsInfo::read(storage.as_ref()).with_context(|| {
        format!("failed to read the barrel directory of {}", args.index_path.display())
    })?;

    let mut barrels = Vec::with_capacity(directory.len());
    for barrel in directory.iter() {
        let size_bytes = barrel_files(&barrel.name)
            .iter()
            .filter(|file| storage.file_exists(file))
            .map(|file| storage.file_size(file))
            .sum::<crate::error::Result<u64>>()?;
        let fields = if args.fields {
            let table = FieldsInfo::read(storage.as_ref(), &barrel.name)
                .with_context(|| format!("failed to read the field table of {}", barrel.name))?;
            Some(
                table
                    .iter()
                    .map(|field| FieldSummary {
                        id: field.id,
                        name: field.name.clone(),
                        positions: field.has_positions(),
                        codec: format!("{:?}", field.codec),
                        term_count: field.term_count,
                        vocabulary_bytes: field.vocabulary_length,
                        posting_bytes: field.dfp_length,
                        position_bytes: field.pop_length,
                    })
                    .collect(),
            )
        } else {
            None
        };
        barrels.push(BarrelSummary {
            name: barrel.name.clone(),
            base_doc_ids: barrel.base_doc_ids.iter().map(|(&c, &b)| (c, b)).collect(),
            doc_count: barrel.doc_count,
            max_doc_id: barrel.max_doc_id,
            deleted_count: barrel.deleted_count,
            size_bytes,
            fields,
        });
    }

    let info = DirectoryInfo {
        path: args.index_path.display().to_string(),
        version: directory.version(),
        locked: directory.is_locked(),
        doc_count: directory.doc_count(),
        deleted_count: directory.deleted_doc_count(),
        barrels,
    };
    output_result("Barrel directory", &info, cli_args)?;
    Ok(())
}

/// List the vocabulary of one field.
fn list_terms(args: &TermsArgs, cli_args: &BarrelsArgs) -> Result<()> {
    let storage = open_storage(&args.index_path)?;
    let reader = BarrelReader::open(storage, &args.barrel, None)
        .with_context(|| format!("failed to open barrel {}", args.barrel))?;
    let field = reader
        .field(&args.field)
        .with_context(|| format!("barrel {} has no field {}", args.barrel, args.field))?;
    let vocabulary = reader.vocabulary(field)?;

    let prefix = args.prefix.as_deref().unwrap_or("");
    let start = match vocabulary.search(prefix) {
        Ok(idx) | Err(idx) => idx,
    };
    let mut terms: Vec<TermRow> = vocabulary
        .iter()
        .skip(start)
        .take_while(|(term, _)| term.starts_with(prefix))
        .map(|(term, info)| TermRow {
            term: term.to_string(),
            doc_freq: info.doc_freq,
            ctf: info.ctf,
            posting_bytes: info.posting_length,
            position_bytes: info.position_length,
        })
        .collect();
    let term_count = terms.len();
    if let Some(limit) = args.limit {
        terms.truncate(limit);
    }

    let listing = TermListing {
        barrel: args.barrel.clone(),
        field: args.field.clone(),
        term_count,
        terms,
    };
    output_result("Vocabulary", &listing, cli_args)?;
    Ok(())
}

/// Merge barrels and commit the result.
fn merge_barrels(args: &MergeArgs, cli_args: &BarrelsArgs) -> Result<()> {
    let storage = open_storage(&args.index_path)?;
    let index = Index::open(storage, load_config(cli_args)?)
        .with_context(|| format!("failed to open index {}", args.index_path.display()))?;

    let report = if args.barrels.is_empty() {
        index.merge_all()?
    } else {
        let report = index
            .merge(args.barrels.as_slice())
            .with_context(|| format!("failed to merge {}", args.barrels.join(", ")))?;
        Some(report)
    };
    index.commit()?;
    output_result("Merge", &report, cli_args)?;
    Ok(())
}
