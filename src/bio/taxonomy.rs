//! Taxonomic classification utilities.
//!
//! This module provides the rank hierarchy used by the 16S reference
//! databases, lineages assigned to individual sequence variants, and the
//! sequence → lineage table persisted next to the abundance table.

use indexmap::IndexMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Taxonomic ranks of 16S reference databases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TaxonomicLevel {
    Kingdom,
    Phylum,
    Class,
    Order,
    Family,
    Genus,
    Species,
}

impl TaxonomicLevel {
    /// Returns a string representation of the taxonomic level.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaxonomicLevel::Kingdom => "Kingdom",
            TaxonomicLevel::Phylum => "Phylum",
            TaxonomicLevel::Class => "Class",
            TaxonomicLevel::Order => "Order",
            TaxonomicLevel::Family => "Family",
            TaxonomicLevel::Genus => "Genus",
            TaxonomicLevel::Species => "Species",
        }
    }

    /// Returns all taxonomic levels in hierarchical order.
    pub fn all_levels() -> [TaxonomicLevel; 7] {
        [
            TaxonomicLevel::Kingdom,
            TaxonomicLevel::Phylum,
            TaxonomicLevel::Class,
            TaxonomicLevel::Order,
            TaxonomicLevel::Family,
            TaxonomicLevel::Genus,
            TaxonomicLevel::Species,
        ]
    }
}

/// A lineage from kingdom down to the deepest confidently assigned rank.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomicLineage {
    levels: BTreeMap<TaxonomicLevel, String>,
}

impl TaxonomicLineage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a taxonomic level with its taxon name.
    pub fn set_level(&mut self, level: TaxonomicLevel, name: String) {
        self.levels.insert(level, name);
    }

    /// Gets the taxon name at a specific taxonomic level.
    pub fn get_level(&self, level: TaxonomicLevel) -> Option<&str> {
        self.levels.get(&level).map(String::as_str)
    }

    /// Drops the given level and every level below it.
    pub fn truncate_from(&mut self, level: TaxonomicLevel) {
        self.levels.retain(|l, _| *l < level);
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Semicolon-joined names from kingdom to the most specific level.
    pub fn to_lineage_string(&self) -> String {
        self.levels.values().join("; ")
    }
}

/// Parses a lineage string such as `"Bacteria;Firmicutes;Bacilli;"`.
///
/// Names are assigned to ranks in order starting at kingdom; empty fields
/// and fields past species are ignored.
pub fn parse_lineage(lineage_str: &str) -> TaxonomicLineage {
    let mut lineage = TaxonomicLineage::new();
    for (level, part) in TaxonomicLevel::all_levels()
        .into_iter()
        .zip(lineage_str.split(';').map(str::trim))
    {
        if !part.is_empty() {
            lineage.set_level(level, part.to_string());
        }
    }
    lineage
}

/// Sequence → assigned lineage, in abundance-table column order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaxonomyTable {
    pub assignments: IndexMap<String, TaxonomicLineage>,
}

impl TaxonomyTable {
    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn get(&self, sequence: &str) -> Option<&TaxonomicLineage> {
        self.assignments.get(sequence)
    }

    /// Number of sequences assigned at least down to `level`.
    pub fn assigned_at(&self, level: TaxonomicLevel) -> usize {
        self.assignments
            .values()
            .filter(|l| l.get_level(level).is_some())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomic_level_order() {
        assert!(TaxonomicLevel::Kingdom < TaxonomicLevel::Phylum);
        assert!(TaxonomicLevel::Genus < TaxonomicLevel::Species);
        assert_eq!(TaxonomicLevel::Genus.as_str(), "Genus");
    }

    #[test]
    fn test_taxonomic_lineage_basics() {
        let mut lineage = TaxonomicLineage::new();
        assert!(lineage.is_empty());
        assert_eq!(lineage.to_lineage_string(), "");

        lineage.set_level(TaxonomicLevel::Phylum, "Firmicutes".to_string());
        lineage.set_level(TaxonomicLevel::Kingdom, "Bacteria".to_string());

        assert_eq!(lineage.get_level(TaxonomicLevel::Kingdom), Some("Bacteria"));
        assert_eq!(lineage.to_lineage_string(), "Bacteria; Firmicutes");

        lineage.truncate_from(TaxonomicLevel::Phylum);
        assert_eq!(lineage.get_level(TaxonomicLevel::Phylum), None);
        assert_eq!(lineage.to_lineage_string(), "Bacteria");
    }

    #[test]
    fn test_parse_lineage_reference_header() {
        let lineage = parse_lineage(
            "Bacteria;Firmicutes;Bacilli;Lactobacillales;Streptococcaceae;Streptococcus;",
        );
        assert_eq!(lineage.get_level(TaxonomicLevel::Kingdom), Some("Bacteria"));
        assert_eq!(lineage.get_level(TaxonomicLevel::Genus), Some("Streptococcus"));
        assert_eq!(lineage.get_level(TaxonomicLevel::Species), None);
    }

    #[test]
    fn test_lineage_serializes_with_rank_keys() {
        let lineage = parse_lineage("Bacteria;Firmicutes");
        let json = serde_json::to_string(&lineage).unwrap();
        assert!(json.contains("\"Kingdom\":\"Bacteria\""));
        let back: TaxonomicLineage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, lineage);
    }
}
