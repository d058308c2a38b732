//! Tree Alignment
//!
//! Maps species records to tree tips through an explicit, priority-ordered
//! list of strategies. A species either resolves to exactly one tip or is
//! reported as unmatched: ambiguous candidates are never guessed.
//!
//! Strategy order:
//! - ID mapping supplied: `IdMapping` → `CompoundId` (name matching disabled)
//! - otherwise: `ExactName` → `NormalizedName` → `CompoundId`
//!
//! Tip labels may be compound `wfo-0000832453|Fraxinus_excelsior`; the part
//! before `|` is an ID, the part after it a name.

use crate::error::{PhyloError, PhyloResult};
use crate::tree::PhyloTree;
use rustc_hash::FxHashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchStrategy {
    /// External species ID → tip table
    IdMapping,
    /// Species ID equals the ID part of a compound tip
    CompoundId,
    /// Name with spaces written as underscores equals the tip name verbatim
    ExactName,
    /// Canonical keys (underscores as spaces, whitespace collapsed) agree
    NormalizedName,
}

impl fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MatchStrategy::IdMapping => "id_mapping",
            MatchStrategy::CompoundId => "compound_id",
            MatchStrategy::ExactName => "exact_name",
            MatchStrategy::NormalizedName => "normalized_name",
        };
        f.write_str(name)
    }
}

/// Canonical key for name comparison
///
/// Underscores and spaces are equivalent, runs of whitespace collapse to a
/// single space, surrounding whitespace is dropped. Case is preserved.
pub fn normalize_name(name: &str) -> String {
    name.replace('_', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split `ID|Name` into `(Some(ID), Name)`; plain labels give `(None, label)`
pub fn split_compound_tip(label: &str) -> (Option<&str>, &str) {
    match label.split_once('|') {
        Some((id, name)) if !id.is_empty() => (Some(id), name),
        _ => (None, label),
    }
}

/// Resolution of one species against the tree
#[derive(Debug, Clone)]
pub struct TipMatch {
    pub species_id: String,
    pub species_name: String,
    /// Exact tree tip label, `None` when unmatched
    pub tip: Option<String>,
    pub strategy: Option<MatchStrategy>,
}

impl TipMatch {
    pub fn is_matched(&self) -> bool {
        self.tip.is_some()
    }
}

/// Lookup tables built once from the tree's tip labels
pub struct TipAligner<'a> {
    tree: &'a PhyloTree,
    /// Name part (verbatim) → tip labels carrying it
    by_name: FxHashMap<&'a str, Vec<&'a str>>,
    /// Canonical name key → tip labels
    by_key: FxHashMap<String, Vec<&'a str>>,
    /// ID part of compound tips → tip labels
    by_id: FxHashMap<&'a str, Vec<&'a str>>,
    id_mapping: Option<&'a FxHashMap<String, String>>,
}

impl<'a> TipAligner<'a> {
    pub fn new(tree: &'a PhyloTree) -> Self {
        let mut by_name: FxHashMap<&str, Vec<&str>> = FxHashMap::default();
        let mut by_key: FxHashMap<String, Vec<&str>> = FxHashMap::default();
        let mut by_id: FxHashMap<&str, Vec<&str>> = FxHashMap::default();

        for label in tree.tip_labels() {
            let (id, name) = split_compound_tip(label);
            by_name.entry(name).or_default().push(label);
            by_key.entry(normalize_name(name)).or_default().push(label);
            if let Some(id) = id {
                by_id.entry(id).or_default().push(label);
            }
        }

        Self {
            tree,
            by_name,
            by_key,
            by_id,
            id_mapping: None,
        }
    }

    /// Use an external species ID → tip table; disables name matching
    pub fn with_id_mapping(mut self, mapping: &'a FxHashMap<String, String>) -> Self {
        self.id_mapping = Some(mapping);
        self
    }

    pub fn strategies(&self) -> &'static [MatchStrategy] {
        if self.id_mapping.is_some() {
            &[MatchStrategy::IdMapping, MatchStrategy::CompoundId]
        } else {
            &[
                MatchStrategy::ExactName,
                MatchStrategy::NormalizedName,
                MatchStrategy::CompoundId,
            ]
        }
    }

    fn try_strategy(&self, strategy: MatchStrategy, id: &str, name: &str) -> Option<&'a str> {
        match strategy {
            MatchStrategy::IdMapping => {
                let tip = self.id_mapping?.get(id)?;
                if self.tree.has_tip(tip) {
                    // Recover the tree-owned label
                    self.tree
                        .tip_node(tip)
                        .map(|node| self.tree.nodes()[node].label.as_str())
                } else {
                    unique(self.by_key.get(&normalize_name(tip)))
                }
            }
            MatchStrategy::CompoundId => unique(self.by_id.get(id)),
            MatchStrategy::ExactName => {
                let underscored = name.trim().replace(' ', "_");
                unique(self.by_name.get(underscored.as_str()))
                    .or_else(|| unique(self.by_name.get(name)))
            }
            MatchStrategy::NormalizedName => unique(self.by_key.get(&normalize_name(name))),
        }
    }

    /// Resolve one species
    pub fn resolve(&self, species_id: &str, species_name: &str) -> TipMatch {
        let found = self.strategies().iter().find_map(|&strategy| {
            self.try_strategy(strategy, species_id, species_name)
                .map(|tip| (tip.to_string(), strategy))
        });
        let (tip, strategy) = match found {
            Some((tip, strategy)) => (Some(tip), Some(strategy)),
            None => (None, None),
        };
        TipMatch {
            species_id: species_id.to_string(),
            species_name: species_name.to_string(),
            tip,
            strategy,
        }
    }

    /// Resolve every species; `ids` and `names` are parallel columns of one table
    pub fn align(&self, ids: &[String], names: &[String]) -> Alignment {
        let matches = ids
            .iter()
            .zip(names)
            .map(|(id, name)| self.resolve(id, name))
            .collect();
        Alignment::new(matches)
    }
}

fn unique<'a>(candidates: Option<&Vec<&'a str>>) -> Option<&'a str> {
    match candidates {
        Some(tips) if tips.len() == 1 => Some(tips[0]),
        _ => None,
    }
}

/// Alignment of a whole species table, keyed by species ID
#[derive(Debug, Clone)]
pub struct Alignment {
    matches: Vec<TipMatch>,
    by_species: FxHashMap<String, usize>,
}

impl Alignment {
    pub fn new(matches: Vec<TipMatch>) -> Self {
        let by_species = matches
            .iter()
            .enumerate()
            .map(|(i, m)| (m.species_id.clone(), i))
            .collect();
        Self {
            matches,
            by_species,
        }
    }

    pub fn matches(&self) -> &[TipMatch] {
        &self.matches
    }

    pub fn tip_for(&self, species_id: &str) -> Option<&str> {
        let idx = *self.by_species.get(species_id)?;
        self.matches[idx].tip.as_deref()
    }

    pub fn total(&self) -> usize {
        self.matches.len()
    }

    pub fn matched_count(&self) -> usize {
        self.matches.iter().filter(|m| m.is_matched()).count()
    }

    pub fn unmatched(&self) -> impl Iterator<Item = &TipMatch> {
        self.matches.iter().filter(|m| !m.is_matched())
    }

    /// Matched species per strategy, in first-use order
    pub fn strategy_counts(&self) -> Vec<(MatchStrategy, usize)> {
        let mut counts: Vec<(MatchStrategy, usize)> = Vec::new();
        for strategy in self.matches.iter().filter_map(|m| m.strategy) {
            match counts.iter_mut().find(|(s, _)| *s == strategy) {
                Some((_, n)) => *n += 1,
                None => counts.push((strategy, 1)),
            }
        }
        counts
    }

    /// (species ID, tip) pairs for matched species
    pub fn species_tips(&self) -> Vec<(String, String)> {
        self.matches
            .iter()
            .filter_map(|m| m.tip.as_ref().map(|tip| (m.species_id.clone(), tip.clone())))
            .collect()
    }

    /// Zero matches after every strategy is fatal
    pub fn ensure_any_matched(&self) -> PhyloResult<()> {
        if self.matched_count() == 0 {
            return Err(PhyloError::NoSpeciesMatched {
                total: self.total(),
            });
        }
        Ok(())
    }
}
