//! Resolution of panel specifiers into gene sets via the genepanels table.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::Path;

use crate::common::io::open_read_maybe_gz;

/// Opaque, stable gene identifier (e.g., `HGNC:1100`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(transparent)]
pub struct GeneId(String);

impl GeneId {
    pub fn new<S: Into<String>>(value: S) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for GeneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GeneId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Set of unique gene identifiers that defines the scope of a run.
pub type GeneSet = BTreeSet<GeneId>;

/// Errors while loading the genepanels table.
#[derive(thiserror::Error, Debug)]
pub enum GenePanelsError {
    #[error("could not open genepanels file: {0}")]
    Open(String),
    #[error("problem parsing genepanels file: {0}")]
    Csv(#[from] csv::Error),
    #[error("genepanels line {line}: expected at least 3 columns but found {found}")]
    TooFewColumns { line: u64, found: usize },
    #[error("multiple panel IDs found for clinical indications: {0}")]
    MultiplePanelIds(String),
}

/// Errors while resolving a panel specifier; all of them abort the run.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PanelError {
    #[error("the panel specifier is empty")]
    EmptyPanelSpec,
    #[error("more than one panel given: {}", .0.join(";"))]
    MultiplePanels(Vec<String>),
    #[error("panel {0:?} not found in genepanels table")]
    PanelNotFound(String),
    #[error("panel code {code:?} is ambiguous, it matches: {}", .candidates.join(", "))]
    AmbiguousPanelCode {
        code: String,
        candidates: Vec<String>,
    },
}

/// One clinical indication of the genepanels table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PanelEntry {
    /// Clinical indication, e.g., `R149.1_Severe early-onset obesity_P`.
    pub clinical_indication: String,
    /// Names of the panels contributing genes.
    pub panel_names: BTreeSet<String>,
    /// Genes of the clinical indication.
    pub genes: GeneSet,
    /// PanelApp panel ID, if any.
    pub panel_id: Option<String>,
}

/// Mapping from panel code to gene set; read-only once loaded.
#[derive(Debug, Clone, Default)]
pub struct GenePanelsTable {
    /// Entries by clinical indication.
    panels: BTreeMap<String, PanelEntry>,
    /// Clinical indications by test code (the part before the first `_`).
    test_codes: BTreeMap<String, BTreeSet<String>>,
}

/// Return the test code of a clinical indication, e.g., `R149.1`.
fn test_code(clinical_indication: &str) -> &str {
    clinical_indication
        .split_once('_')
        .map(|(code, _)| code)
        .unwrap_or(clinical_indication)
}

impl GenePanelsTable {
    /// Load the table from a TSV file (plain or gzip).
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, GenePanelsError> {
        let reader = open_read_maybe_gz(path.as_ref())
            .map_err(|e| GenePanelsError::Open(format!("{:?}: {}", path.as_ref(), e)))?;
        Self::from_reader(reader)
    }

    /// Load the table from TSV with columns clinical indication, panel name,
    /// HGNC ID and optional PanelApp panel ID.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, GenePanelsError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .delimiter(b'\t')
            .comment(Some(b'#'))
            .flexible(true)
            .from_reader(reader);

        let mut panels: BTreeMap<String, PanelEntry> = BTreeMap::new();
        let mut panel_ids: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for result in reader.records() {
            let record = result?;
            if record.len() < 3 {
                return Err(GenePanelsError::TooFewColumns {
                    line: record.position().map(|pos| pos.line()).unwrap_or_default(),
                    found: record.len(),
                });
            }
            let clinical_indication = record[0].trim();
            let panel_name = record[1].trim();
            let hgnc_id = record[2].trim();
            let panel_id = record.get(3).map(str::trim).unwrap_or_default();

            let entry = panels
                .entry(clinical_indication.to_string())
                .or_insert_with(|| PanelEntry {
                    clinical_indication: clinical_indication.to_string(),
                    ..Default::default()
                });
            entry.panel_names.insert(panel_name.to_string());
            if !hgnc_id.is_empty() {
                entry.genes.insert(GeneId::from(hgnc_id));
            }
            let ids = panel_ids.entry(clinical_indication.to_string()).or_default();
            if !panel_id.is_empty() {
                ids.insert(panel_id.to_string());
            }
        }

        let duplicate_ids = panel_ids
            .iter()
            .filter(|(_, ids)| ids.len() > 1)
            .map(|(ci, ids)| format!("{:?}: {:?}", ci, ids))
            .collect::<Vec<_>>();
        if !duplicate_ids.is_empty() {
            return Err(GenePanelsError::MultiplePanelIds(duplicate_ids.join(", ")));
        }
        let without_id = panel_ids
            .iter()
            .filter(|(_, ids)| ids.is_empty())
            .map(|(ci, _)| ci.as_str())
            .collect::<Vec<_>>();
        if !without_id.is_empty() {
            tracing::warn!(
                "the following clinical indications have no PanelApp panel ID: {:?}",
                without_id
            );
        }

        let mut test_codes: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (ci, entry) in panels.iter_mut() {
            entry.panel_id = panel_ids
                .get(ci)
                .and_then(|ids| ids.iter().next().cloned());
            test_codes
                .entry(test_code(ci).to_string())
                .or_default()
                .insert(ci.clone());
        }

        Ok(Self { panels, test_codes })
    }

    /// Number of clinical indications in the table.
    pub fn len(&self) -> usize {
        self.panels.len()
    }

    /// Look up a panel by full clinical indication or by its test code.
    pub fn lookup(&self, code: &str) -> Result<&PanelEntry, PanelError> {
        if let Some(entry) = self.panels.get(code) {
            return Ok(entry);
        }
        match self.test_codes.get(code) {
            Some(candidates) if candidates.len() == 1 => candidates
                .iter()
                .next()
                .and_then(|ci| self.panels.get(ci))
                .ok_or_else(|| PanelError::PanelNotFound(code.to_string())),
            Some(candidates) => Err(PanelError::AmbiguousPanelCode {
                code: code.to_string(),
                candidates: candidates.iter().cloned().collect(),
            }),
            None => Err(PanelError::PanelNotFound(code.to_string())),
        }
    }
}

/// A parsed panel specifier: at most one panel code plus gene identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelSpec {
    /// The panel code, if any.
    pub panel: Option<String>,
    /// Gene identifiers given explicitly.
    pub genes: GeneSet,
}

/// Interpret `token` as gene identifier `HGNC:<digits>`, optionally prefixed by `_`.
fn parse_gene_token(token: &str) -> Option<GeneId> {
    let id = token.strip_prefix('_').unwrap_or(token);
    let digits = id.strip_prefix("HGNC:")?;
    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
        Some(GeneId::from(id))
    } else {
        None
    }
}

impl std::str::FromStr for PanelSpec {
    type Err = PanelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut panels = Vec::new();
        let mut genes = GeneSet::new();
        for token in s.split(';').map(str::trim).filter(|t| !t.is_empty()) {
            match parse_gene_token(token) {
                Some(gene) => {
                    genes.insert(gene);
                }
                None => panels.push(token.to_string()),
            }
        }

        if panels.len() > 1 {
            return Err(PanelError::MultiplePanels(panels));
        }
        if panels.is_empty() && genes.is_empty() {
            return Err(PanelError::EmptyPanelSpec);
        }

        Ok(Self {
            panel: panels.pop(),
            genes,
        })
    }
}

/// Result of resolving a `PanelSpec`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPanel {
    /// Clinical indication of the panel, if a panel code was given.
    pub clinical_indication: Option<String>,
    /// PanelApp ID of the panel, if known.
    pub panel_id: Option<String>,
    /// The genes in scope.
    pub genes: GeneSet,
}

/// Resolve `spec` into the set of genes in scope.
///
/// A specifier consisting of gene identifiers only resolves to exactly these
/// genes without consulting `genepanels`.
pub fn resolve(
    spec: &PanelSpec,
    genepanels: &GenePanelsTable,
) -> Result<ResolvedPanel, PanelError> {
    let Some(code) = spec.panel.as_deref() else {
        return Ok(ResolvedPanel {
            clinical_indication: None,
            panel_id: None,
            genes: spec.genes.clone(),
        });
    };

    let entry = genepanels.lookup(code)?;
    if entry.panel_id.is_none() {
        tracing::warn!(
            "panel {} has no PanelApp ID in the genepanels table",
            &entry.clinical_indication
        );
    }
    let mut genes = entry.genes.clone();
    genes.extend(spec.genes.iter().cloned());

    Ok(ResolvedPanel {
        clinical_indication: Some(entry.clinical_indication.clone()),
        panel_id: entry.panel_id.clone(),
        genes,
    })
}
