//! Output formatting for CLI commands.

use serde::{Deserialize, Serialize};

use crate::cli::args::{BarrelsArgs, OutputFormat};
use crate::error::Result;
use crate::index::MergeReport;

/// One row of the barrel directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarrelSummary {
    pub name: String,
    pub base_doc_ids: Vec<(u32, u32)>,
    pub doc_count: u32,
    pub max_doc_id: u32,
    pub deleted_count: u32,
    pub size_bytes: u64,
    pub fields: Option<Vec<FieldSummary>>,
}

/// One row of a barrel's field table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSummary {
    pub id: u32,
    pub name: String,
    pub positions: bool,
    pub codec: String,
    pub term_count: u64,
    pub vocabulary_bytes: u64,
    pub posting_bytes: u64,
    pub position_bytes: u64,
}

/// The barrel directory of an index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryInfo {
    pub path: String,
    pub version: u64,
    pub locked: bool,
    pub doc_count: u64,
    pub deleted_count: u64,
    pub barrels: Vec<BarrelSummary>,
}

/// One vocabulary entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TermRow {
    pub term: String,
    pub doc_freq: u32,
    pub ctf: u64,
    pub posting_bytes: u64,
    pub position_bytes: u64,
}

/// Terms of one field of a barrel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TermListing {
    pub barrel: String,
    pub field: String,
    pub term_count: usize,
    pub terms: Vec<TermRow>,
}

/// Human-readable rendering of a command result.
pub trait HumanOutput {
    fn print_human(&self, args: &BarrelsArgs);
}

/// Output the result in the requested format.
pub fn output_result<T>(message: &str, result: &T, args: &BarrelsArgs) -> Result<()>
where
    T: Serialize + HumanOutput,
{
    match args.output_format {
        OutputFormat::Human => {
            if args.verbosity() > 1 {
                println!("{message}");
                println!();
            }
            result.print_human(args);
            Ok(())
        }
        OutputFormat::Json => output_json(result, args),
    }
}

/// Output in JSON format.
fn output_json<T: Serialize>(result: &T, args: &BarrelsArgs) -> Result<()> {
    let json = if args.pretty {
        serde_json::to_string_pretty(result)?
    } else {
        serde_json::to_string(result)?
    };
    println!("{json}");
    Ok(())
}

impl HumanOutput for DirectoryInfo {
    fn print_human(&self, args: &BarrelsArgs) {
        println!("Index: {}", self.path);
        println!("════════════════");
        println!("Version: {}", self.version);
        println!("Documents: {} ({} deleted)", self.doc_count, self.deleted_count);
        if self.locked {
            println!("A merge holds the directory lock");
        }
        println!();
        println!(
            "{:<10} {:>10} {:>10} {:>10} {:>12}",
            "barrel", "docs", "deleted", "max doc", "bytes"
        );
        for barrel in &self.barrels {
            println!(
                "{:<10} {:>10} {:>10} {:>10} {:>12}",
                barrel.name, barrel.doc_count, barrel.deleted_count, barrel.max_doc_id, barrel.size_bytes
            );
            if args.verbosity() > 1 {
                for (collection, base) in &barrel.base_doc_ids {
                    println!("    collection {collection} starts at doc {base}");
                }
            }
            for field in barrel.fields.iter().flatten() {
                println!(
                    "    field {} ({}): {} terms, {} codec{}, {}/{}/{} bytes",
                    field.name,
                    field.id,
                    field.term_count,
                    field.codec,
                    if field.positions { ", positions" } else { "" },
                    field.vocabulary_bytes,
                    field.posting_bytes,
                    field.position_bytes
                );
            }
        }
    }
}

impl HumanOutput for TermListing {
    fn print_human(&self, _args: &BarrelsArgs) {
        println!(
            "{} terms in field {} of barrel {}",
            self.term_count, self.field, self.barrel
        );
        println!("{:<32} {:>10} {:>12}", "term", "docs", "occurrences");
        for row in &self.terms {
            println!("{:<32} {:>10} {:>12}", row.term, row.doc_freq, row.ctf);
        }
        if self.terms.len() < self.term_count {
            println!("... {} more", self.term_count - self.terms.len());
        }
    }
}

impl HumanOutput for Option<MergeReport> {
    fn print_human(&self, _args: &BarrelsArgs) {
        let Some(report) = self else {
            println!("Nothing to merge");
            return;
        };
        let stats = &report.stats;
        println!("Merged {} into {}", report.inputs.join(", "), report.barrel);
        println!(
            "Terms: {} written, {} dropped ({} streamed, {} sorted)",
            stats.terms_written, stats.terms_dropped, stats.terms_streamed, stats.terms_sorted
        );
        println!(
            "Postings: {} written, {} deleted removed",
            stats.postings_written, stats.deleted_postings_removed
        );
        println!(
            "Chunks: {} copied, {} re-encoded ({:.1}% copied)",
            stats.chunks_copied,
            stats.chunks_reencoded,
            stats.copy_ratio() * 100.0
        );
        println!("Time: {}ms", stats.merge_time_ms);
    }
}
