//! Run-level summary of the prioritisation.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use enum_map::EnumMap;
use thousands::Separable;

use super::interpreter::decision::{Decision, Flag, NotAssessedCause};
use super::interpreter::frequency::AfValue;
use super::interpreter::zygosity::{FrozenVerdicts, GeneVerdict};
use super::interpreter::VariantFacts;

/// Counts of one run, collected during the second pass.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct RunSummary {
    /// Clinical indication of the resolved panel, if any.
    pub panel: Option<String>,
    pub panel_id: Option<String>,
    pub genes_in_scope: usize,
    pub total_records: usize,
    pub flags: EnumMap<Flag, usize>,
    pub not_assessed: BTreeMap<NotAssessedCause, usize>,
    /// AF annotations of assessed records that were missing.
    pub af_missing: usize,
    /// AF annotations of assessed records that could not be parsed.
    pub af_unparseable: usize,
    /// Records that could not be decoded and were written unchanged.
    pub undecodable_records: usize,
    pub genes: Vec<GeneVerdict>,
}

impl RunSummary {
    /// Count one record with its decision.
    pub fn record(&mut self, facts: &VariantFacts, decision: &Decision) {
        self.total_records += 1;
        self.flags[decision.flag()] += 1;
        if let Decision::NotAssessed { cause } = decision {
            *self.not_assessed.entry(*cause).or_default() += 1;
            return;
        }
        for af in [facts.afs.exome, facts.afs.genome] {
            match af {
                AfValue::Missing => self.af_missing += 1,
                AfValue::Unparseable => self.af_unparseable += 1,
                AfValue::Present(_) => (),
            }
        }
    }

    /// Count one record that could not be decoded.
    pub fn record_undecodable(&mut self) {
        self.total_records += 1;
        self.undecodable_records += 1;
    }

    /// Combine the counts of two summaries of disjoint records.
    pub fn merge(mut self, other: Self) -> Self {
        self.total_records += other.total_records;
        for (flag, count) in other.flags {
            self.flags[flag] += count;
        }
        for (cause, count) in other.not_assessed {
            *self.not_assessed.entry(cause).or_default() += count;
        }
        self.af_missing += other.af_missing;
        self.af_unparseable += other.af_unparseable;
        self.undecodable_records += other.undecodable_records;
        self
    }

    /// Copy the gene verdicts into the summary.
    pub fn set_verdicts(&mut self, verdicts: &FrozenVerdicts) {
        self.genes = verdicts.sorted().into_iter().cloned().collect();
    }

    /// Log the summary at INFO level.
    pub fn log(&self) {
        tracing::info!(
            "processed {} records",
            self.total_records.separate_with_commas()
        );
        for (flag, count) in &self.flags {
            tracing::info!("  {:<16} {:>12}", flag, count.separate_with_commas());
        }
        for (cause, count) in &self.not_assessed {
            tracing::info!(
                "  not assessed, {:<28} {:>12}",
                cause,
                count.separate_with_commas()
            );
        }
        if self.af_missing > 0 || self.af_unparseable > 0 {
            tracing::info!(
                "AF annotations of assessed records: {} missing, {} unparseable (treated as 0)",
                self.af_missing.separate_with_commas(),
                self.af_unparseable.separate_with_commas()
            );
        }
        if self.undecodable_records > 0 {
            tracing::warn!(
                "{} records could not be decoded and were written unchanged",
                self.undecodable_records.separate_with_commas()
            );
        }
        let passing = self.genes.iter().filter(|verdict| verdict.gene_pass).count();
        tracing::info!(
            "{} of {} assessable genes met their zygosity requirement",
            passing,
            self.genes.len()
        );
    }

    /// Write the summary as pretty-printed JSON to `path`.
    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<(), anyhow::Error> {
        let file = std::fs::File::create(path.as_ref()).map_err(|e| {
            anyhow::anyhow!("could not create summary file {:?}: {}", path.as_ref(), e)
        })?;
        let mut writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)
            .map_err(|e| anyhow::anyhow!("could not write summary: {}", e))?;
        writer
            .flush()
            .map_err(|e| anyhow::anyhow!("could not write summary: {}", e))
    }
}
