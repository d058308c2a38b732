//! Shared CLI plumbing for the binaries: input flags, input loading with the
//! alignment summary, logging setup.

use crate::alignment::{Alignment, TipAligner};
use crate::data::{load_tip_mapping, SpeciesTable, DEFAULT_AXES};
use crate::tree::PhyloTree;
use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Unmatched names shown in the alignment summary
const UNMATCHED_SAMPLE: usize = 10;

#[derive(Debug, Clone, Args)]
pub struct InputArgs {
    /// Species indicator table (CSV or Parquet)
    #[arg(long)]
    pub input: PathBuf,

    /// Species identifier column
    #[arg(long, default_value = "wfo_taxon_id")]
    pub id_col: String,

    /// Scientific name column used for name matching (defaults to the ID column)
    #[arg(long)]
    pub name_col: Option<String>,

    /// Indicator columns, comma separated
    #[arg(long, value_delimiter = ',', default_values_t = DEFAULT_AXES.map(String::from))]
    pub axes: Vec<String>,

    /// Newick tree file
    #[arg(long)]
    pub tree: PathBuf,

    /// Species ID → tree tip table; replaces name matching when given
    #[arg(long)]
    pub tip_mapping: Option<PathBuf>,

    #[arg(long, default_value = "wfo_taxon_id")]
    pub mapping_id_col: String,

    #[arg(long, default_value = "tree_tip")]
    pub mapping_tip_col: String,
}

/// Tree, species table and their alignment
pub struct Inputs {
    pub tree: PhyloTree,
    pub table: SpeciesTable,
    pub alignment: Alignment,
}

impl InputArgs {
    /// Load every input and print the match summary before any computation
    ///
    /// Zero matched species is fatal.
    pub fn load(&self) -> Result<Inputs> {
        println!("\nLoading inputs...");
        let tree = PhyloTree::from_file(&self.tree)
            .with_context(|| format!("Failed to load tree: {}", self.tree.display()))?;
        println!("  Tree: {} tips, {} nodes", tree.num_tips(), tree.num_nodes());

        let table = SpeciesTable::load(
            &self.input,
            &self.id_col,
            self.name_col.as_deref(),
            &self.axes,
        )?;
        println!("  Species: {}", table.len());
        for axis in &table.axes {
            println!("    {:<12} {} with values", axis.name, axis.known_count());
        }

        let mapping = match &self.tip_mapping {
            Some(path) => {
                let mapping = load_tip_mapping(path, &self.mapping_id_col, &self.mapping_tip_col)?;
                println!("  Tip mapping: {} entries", mapping.len());
                Some(mapping)
            }
            None => None,
        };

        let mut aligner = TipAligner::new(&tree);
        if let Some(mapping) = &mapping {
            aligner = aligner.with_id_mapping(mapping);
        }
        let alignment = aligner.align(&table.ids, &table.names);
        print_match_summary(&alignment);
        alignment.ensure_any_matched()?;

        Ok(Inputs {
            tree,
            table,
            alignment,
        })
    }
}

pub fn print_match_summary(alignment: &Alignment) {
    let matched = alignment.matched_count();
    let total = alignment.total();
    let pct = if total > 0 {
        matched as f64 / total as f64 * 100.0
    } else {
        0.0
    };
    println!("\nTree alignment:");
    println!("  Matched: {}/{} ({:.1}%)", matched, total, pct);
    for (strategy, count) in alignment.strategy_counts() {
        println!("    {:<16} {}", strategy, count);
    }

    let unmatched: Vec<&str> = alignment
        .unmatched()
        .map(|m| m.species_name.as_str())
        .collect();
    if !unmatched.is_empty() {
        println!("  Unmatched: {}", unmatched.len());
        for name in unmatched.iter().take(UNMATCHED_SAMPLE) {
            println!("    - {}", name);
        }
        if unmatched.len() > UNMATCHED_SAMPLE {
            println!("    ... and {} more", unmatched.len() - UNMATCHED_SAMPLE);
        }
    }
}

/// Structured logging to stderr; stdout is kept for the run summary
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "eive_phylo_rust=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

pub fn banner(title: &str) {
    println!("\n{}", "=".repeat(80));
    println!("{}", title);
    println!("{}", "=".repeat(80));
}
