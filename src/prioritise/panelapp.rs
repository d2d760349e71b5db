//! Reading of PanelApp dumps and lookup of gene records.

use std::collections::HashMap;
use std::path::Path;

use indexmap::IndexMap;
use serde_with::{serde_as, DisplayFromStr, PickFirst};

use super::panels::GeneId;
use crate::common::io::open_read_maybe_gz;

/// Errors while loading the PanelApp dump.
#[derive(thiserror::Error, Debug)]
pub enum PanelAppError {
    #[error("could not open PanelApp dump: {0}")]
    Open(String),
    #[error("problem parsing PanelApp dump: {0}")]
    Json(#[from] serde_json::Error),
}

/// A string or number in the JSON, e.g., the `external_id` of a panel.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Number(u64),
    Text(String),
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Number(value) => write!(f, "{}", value),
            Scalar::Text(value) => f.write_str(value),
        }
    }
}

/// One gene as found in the dump.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
pub struct GeneRecord {
    #[serde(default)]
    pub gene_symbol: Option<String>,
    #[serde(default)]
    pub hgnc_id: Option<String>,
    #[serde(default)]
    pub mode_of_inheritance: Option<String>,
    /// Confidence level, given as integer or string in the wild.
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub confidence_level: Option<u32>,
}

/// One region (e.g., a CNV locus) of a panel, looked up by its name.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
pub struct RegionRecord {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mode_of_inheritance: Option<String>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub confidence_level: Option<u32>,
}

impl From<&RegionRecord> for GeneRecord {
    fn from(region: &RegionRecord) -> Self {
        GeneRecord {
            gene_symbol: None,
            hgnc_id: None,
            mode_of_inheritance: region.mode_of_inheritance.clone(),
            confidence_level: region.confidence_level,
        }
    }
}

/// One panel of the PanelApp panel list.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
pub struct PanelRecord {
    #[serde(default)]
    pub external_id: Option<Scalar>,
    #[serde(default)]
    pub panel_name: Option<String>,
    #[serde(default)]
    pub genes: Vec<GeneRecord>,
    #[serde(default)]
    pub regions: Vec<RegionRecord>,
}

/// The two supported shapes of the dump.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(untagged)]
pub enum PanelAppDump {
    /// List of PanelApp panels, each with its genes.
    Panels(Vec<PanelRecord>),
    /// Object with gene records keyed by gene identifier or symbol.
    Genes(IndexMap<String, GeneRecord>),
}

impl PanelAppDump {
    /// Load the dump from a JSON file (plain or gzip).
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, PanelAppError> {
        let reader = open_read_maybe_gz(path.as_ref())
            .map_err(|e| PanelAppError::Open(format!("{:?}: {}", path.as_ref(), e)))?;
        Ok(serde_json::from_reader(reader)?)
    }
}

/// A gene record that made it into the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelAppEntry {
    pub gene_id: Option<GeneId>,
    pub symbol: Option<String>,
    pub mode_of_inheritance: Option<String>,
    /// ID of the panel the entry was taken from, if any.
    pub panel_id: Option<String>,
}

/// Index of PanelApp gene records by HGNC ID and gene symbol.
#[derive(Debug, Clone, Default)]
pub struct PanelAppIndex {
    entries: Vec<PanelAppEntry>,
    by_key: HashMap<String, usize>,
}

impl PanelAppIndex {
    /// Build the index from `dump`.
    ///
    /// Regions of a panel are indexed by name after its genes.  Genes
    /// below `min_confidence` are skipped; a missing confidence level
    /// is accepted. Genes of the panels in `preferred_panels` are indexed
    /// before all others, and the first record seen for a key wins.
    pub fn build(dump: &PanelAppDump, preferred_panels: &[String], min_confidence: u32) -> Self {
        let mut result = Self::default();
        match dump {
            PanelAppDump::Genes(genes) => {
                for (key, record) in genes {
                    result.insert(Some(key.as_str()), record, None, min_confidence);
                }
            }
            PanelAppDump::Panels(panels) => {
                let is_preferred = |panel: &PanelRecord| {
                    panel
                        .external_id
                        .as_ref()
                        .map(|id| preferred_panels.contains(&id.to_string()))
                        .unwrap_or(false)
                };
                let ordered = panels
                    .iter()
                    .filter(|panel| is_preferred(panel))
                    .chain(panels.iter().filter(|panel| !is_preferred(panel)));
                for panel in ordered {
                    let panel_id = panel.external_id.as_ref().map(|id| id.to_string());
                    for record in &panel.genes {
                        result.insert(None, record, panel_id.as_deref(), min_confidence);
                    }
                    for region in &panel.regions {
                        result.insert(
                            region.name.as_deref(),
                            &GeneRecord::from(region),
                            panel_id.as_deref(),
                            min_confidence,
                        );
                    }
                }
            }
        }

        tracing::debug!(
            "indexed {} PanelApp gene records under {} keys",
            result.entries.len(),
            result.by_key.len()
        );
        result
    }

    fn insert(
        &mut self,
        key: Option<&str>,
        record: &GeneRecord,
        panel_id: Option<&str>,
        min_confidence: u32,
    ) {
        if record.confidence_level.unwrap_or(min_confidence) < min_confidence {
            return;
        }

        let keys = [key, record.hgnc_id.as_deref(), record.gene_symbol.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|key| !key.is_empty() && !self.by_key.contains_key(*key))
            .map(str::to_string)
            .collect::<Vec<_>>();
        if keys.is_empty() {
            return;
        }

        let idx = self.entries.len();
        self.entries.push(PanelAppEntry {
            gene_id: record
                .hgnc_id
                .as_deref()
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(GeneId::from),
            symbol: record.gene_symbol.clone(),
            mode_of_inheritance: record.mode_of_inheritance.clone(),
            panel_id: panel_id.map(str::to_string),
        });
        for key in keys {
            self.by_key.insert(key, idx);
        }
    }

    /// Look up the record for an HGNC ID or gene symbol.
    pub fn get(&self, key: &str) -> Option<&PanelAppEntry> {
        self.by_key.get(key).map(|idx| &self.entries[*idx])
    }

    /// Number of distinct records in the index.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
