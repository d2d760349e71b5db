//! Classification of genotypes and per-gene zygosity counting.

use std::collections::HashMap;

use crate::prioritise::conf::NamedRule;
use crate::prioritise::moi::{GeneCategories, MoiCategory};
use crate::prioritise::panels::GeneId;

/// Zygosity of the sample's genotype call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Zygosity {
    /// Exactly one alternate allele, or two different alternate alleles.
    Het,
    /// At least two copies of the same alternate allele and nothing else.
    Hom,
    /// Called but no alternate allele, e.g., `0/0` or `0/.`.
    Neither,
    /// No allele called or no genotype at all.
    #[default]
    NoCall,
}

impl Zygosity {
    /// Classify a genotype given as allele indices (`None` for no call).
    pub fn from_alleles(alleles: &[Option<usize>]) -> Self {
        if alleles.iter().all(Option::is_none) {
            return Zygosity::NoCall;
        }
        let alts = alleles
            .iter()
            .flatten()
            .filter(|allele| **allele > 0)
            .collect::<Vec<_>>();
        match alts.as_slice() {
            [] => Zygosity::Neither,
            [_] => Zygosity::Het,
            [first, rest @ ..] => {
                if alts.len() == alleles.len() && rest.iter().all(|allele| allele == first) {
                    Zygosity::Hom
                } else {
                    Zygosity::Het
                }
            }
        }
    }
}

/// Qualifying heterozygous and homozygous calls of one gene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct ZygosityTally {
    pub het: u32,
    pub hom: u32,
}

impl ZygosityTally {
    pub fn add(&mut self, zygosity: Zygosity) {
        match zygosity {
            Zygosity::Het => self.het += 1,
            Zygosity::Hom => self.hom += 1,
            Zygosity::Neither | Zygosity::NoCall => (),
        }
    }

    pub fn merge(mut self, other: Self) -> Self {
        self.het += other.het;
        self.hom += other.hom;
        self
    }
}

/// Counters of the first pass, keyed by gene.
///
/// Aggregators of disjoint record batches are combined with `merge`, so the
/// first pass can be folded and reduced in parallel.
#[derive(Debug, Clone, Default)]
pub struct ZygosityAggregator {
    tallies: HashMap<GeneId, ZygosityTally>,
}

impl ZygosityAggregator {
    /// Count a qualifying call for `gene`.
    pub fn add(&mut self, gene: &GeneId, zygosity: Zygosity) {
        match self.tallies.get_mut(gene) {
            Some(tally) => tally.add(zygosity),
            None => {
                let mut tally = ZygosityTally::default();
                tally.add(zygosity);
                self.tallies.insert(gene.clone(), tally);
            }
        }
    }

    pub fn merge(mut self, other: Self) -> Self {
        for (gene, tally) in other.tallies {
            let entry = self.tallies.entry(gene).or_default();
            *entry = entry.merge(tally);
        }
        self
    }

    pub fn tally(&self, gene: &GeneId) -> ZygosityTally {
        self.tallies.get(gene).copied().unwrap_or_default()
    }

    /// Finish the first pass and evaluate every gene that has a rule.
    pub fn freeze(self, categories: &GeneCategories) -> FrozenVerdicts {
        let verdicts = categories
            .iter()
            .filter_map(|entry| {
                let rule = entry.rule.clone()?;
                let tally = self.tally(&entry.gene_id);
                let gene_pass =
                    tally.het >= rule.rule.het_required || tally.hom >= rule.rule.hom_required;
                Some((
                    entry.gene_id.clone(),
                    GeneVerdict {
                        gene_id: entry.gene_id.clone(),
                        symbol: entry.symbol.clone(),
                        category: entry.category,
                        rule,
                        tally,
                        gene_pass,
                    },
                ))
            })
            .collect();
        FrozenVerdicts { verdicts }
    }
}

/// Evaluated zygosity requirement of one gene.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct GeneVerdict {
    pub gene_id: GeneId,
    pub symbol: Option<String>,
    pub category: MoiCategory,
    pub rule: NamedRule,
    pub tally: ZygosityTally,
    /// Whether enough heterozygous or homozygous calls were seen.
    pub gene_pass: bool,
}

/// Read-only verdicts of all genes after the first pass.
#[derive(Debug, Clone, Default)]
pub struct FrozenVerdicts {
    verdicts: HashMap<GeneId, GeneVerdict>,
}

impl FrozenVerdicts {
    pub fn get(&self, gene: &GeneId) -> Option<&GeneVerdict> {
        self.verdicts.get(gene)
    }

    /// Whether the gene met its requirement; genes without verdict did not.
    pub fn gene_pass(&self, gene: &GeneId) -> bool {
        self.get(gene).map(|verdict| verdict.gene_pass).unwrap_or(false)
    }

    /// Verdicts sorted by gene identifier.
    pub fn sorted(&self) -> Vec<&GeneVerdict> {
        let mut result = self.verdicts.values().collect::<Vec<_>>();
        result.sort_by(|lhs, rhs| lhs.gene_id.cmp(&rhs.gene_id));
        result
    }

    pub fn len(&self) -> usize {
        self.verdicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verdicts.is_empty()
    }
}
