//! Simplification of PanelApp mode of inheritance texts into categories.

use std::collections::HashMap;

use regex::{Regex, RegexBuilder};

use super::conf::{Config, NamedRule};
use super::panelapp::PanelAppIndex;
use super::panels::{GeneId, GeneSet};

/// Simplified mode of inheritance.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    enum_map::Enum,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum MoiCategory {
    Biallelic,
    Monoallelic,
    /// Both monoallelic and biallelic.
    Both,
    /// X-linked recessive.
    Xlr,
    /// X-linked dominant.
    Xld,
    Mitochondrial,
    Other,
    /// Gene known to PanelApp but MOI empty or not recognised.
    Unknown,
    /// Gene absent from PanelApp.
    None,
}

impl MoiCategory {
    /// Whether the category was derived from a recognised MOI text.
    pub fn is_resolved(self) -> bool {
        !matches!(self, MoiCategory::Unknown | MoiCategory::None)
    }

    /// Name of the rule used for the category unless overridden.
    pub fn default_rule_name(self) -> Option<&'static str> {
        match self {
            MoiCategory::Biallelic => Some("biallelic"),
            MoiCategory::Monoallelic => Some("monoallelic"),
            MoiCategory::Both => Some("both_monoallelic_and_biallelic"),
            MoiCategory::Xlr
            | MoiCategory::Xld
            | MoiCategory::Mitochondrial
            | MoiCategory::Other => Some(super::conf::STANDARD_FILTERING),
            MoiCategory::Unknown | MoiCategory::None => None,
        }
    }
}

/// Ordered table of MOI patterns; the first matching pattern wins.
#[derive(Debug, Clone)]
pub struct MoiMatcher {
    patterns: Vec<(Regex, MoiCategory)>,
}

impl MoiMatcher {
    pub fn new() -> Result<Self, regex::Error> {
        let table = [
            (r"^BIALLELIC", MoiCategory::Biallelic),
            (r"^MONOALLELIC", MoiCategory::Monoallelic),
            (r"^BOTH", MoiCategory::Both),
            (r"^X-?LINKED.*\bbiallelic", MoiCategory::Xlr),
            (r"^X-?LINKED", MoiCategory::Xld),
            (r"^MITOCHONDRIAL", MoiCategory::Mitochondrial),
            (r"^OTHER", MoiCategory::Other),
        ];
        let patterns = table
            .into_iter()
            .map(|(pattern, category)| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map(|re| (re, category))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Classify a raw MOI text; empty or unmatched text yields `Unknown`.
    pub fn classify(&self, raw_moi: &str) -> MoiCategory {
        let raw_moi = raw_moi.trim();
        self.patterns
            .iter()
            .find(|(re, _)| re.is_match(raw_moi))
            .map(|(_, category)| *category)
            .unwrap_or(MoiCategory::Unknown)
    }
}

/// Determine the category of `gene`, warning if PanelApp does not know it.
pub fn categorize(gene: &GeneId, panelapp: &PanelAppIndex, matcher: &MoiMatcher) -> MoiCategory {
    match panelapp.get(gene.as_str()) {
        None => {
            tracing::warn!(
                "gene {} not found in PanelApp dump, variants will not be assessed",
                gene
            );
            MoiCategory::None
        }
        Some(entry) => match entry.mode_of_inheritance.as_deref() {
            Some(raw_moi) => matcher.classify(raw_moi),
            None => MoiCategory::Unknown,
        },
    }
}

/// Category and rule resolved once for a gene in scope.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneEntry {
    pub gene_id: GeneId,
    pub symbol: Option<String>,
    pub raw_moi: Option<String>,
    pub category: MoiCategory,
    /// The applicable rule; `None` if the category has no rule.
    pub rule: Option<NamedRule>,
}

/// Genes in scope with their categories, reachable by ID and symbol.
#[derive(Debug, Clone, Default)]
pub struct GeneCategories {
    entries: Vec<GeneEntry>,
    by_key: HashMap<String, usize>,
}

impl GeneCategories {
    /// Resolve category and rule for each gene in `genes`.
    pub fn build(
        genes: &GeneSet,
        panelapp: &PanelAppIndex,
        matcher: &MoiMatcher,
        config: &Config,
    ) -> Self {
        let mut result = Self::default();
        for gene_id in genes {
            let category = categorize(gene_id, panelapp, matcher);
            let panelapp_entry = panelapp.get(gene_id.as_str());
            let rule = config.rule_for(category);
            if category.is_resolved() && rule.is_none() {
                tracing::warn!(
                    "no filtering rule configured for gene {} with category {}",
                    gene_id,
                    category
                );
            }
            let entry = GeneEntry {
                gene_id: gene_id.clone(),
                symbol: panelapp_entry.and_then(|e| e.symbol.clone()),
                raw_moi: panelapp_entry.and_then(|e| e.mode_of_inheritance.clone()),
                category,
                rule,
            };

            let idx = result.entries.len();
            result.by_key.entry(gene_id.to_string()).or_insert(idx);
            if let Some(symbol) = entry.symbol.as_ref() {
                result.by_key.entry(symbol.clone()).or_insert(idx);
            }
            result.entries.push(entry);
        }
        result
    }

    /// Look up a gene by HGNC ID or symbol.
    pub fn get(&self, key: &str) -> Option<&GeneEntry> {
        self.by_key.get(key).map(|idx| &self.entries[*idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &GeneEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
