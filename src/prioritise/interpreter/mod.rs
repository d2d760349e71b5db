//! Apply the configured rules to the facts extracted from variant records.

pub mod decision;
pub mod frequency;
pub mod zygosity;

use self::decision::{Assessment, Decision, NotAssessedCause};
use self::frequency::AfAnnotations;
use self::zygosity::{FrozenVerdicts, Zygosity, ZygosityAggregator};
use super::conf::NamedRule;
use super::moi::{GeneCategories, GeneEntry, MoiCategory};

/// The parts of a variant record that the prioritisation looks at.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariantFacts {
    /// Gene symbol or identifier from the gene annotation field.
    pub gene: Option<String>,
    /// Whether the upstream soft filter set `PASS`.
    pub filter_pass: bool,
    pub afs: AfAnnotations,
    /// Zygosity of the selected sample.
    pub zygosity: Zygosity,
}

/// Hold the per-run lookup tables needed to interpret `VariantFacts`.
#[derive(Debug, Default)]
pub struct PrioInterpreter {
    /// Genes in scope with category and rule.
    pub categories: GeneCategories,
}

impl PrioInterpreter {
    /// Construct new `PrioInterpreter` with the given gene categories.
    pub fn new(categories: GeneCategories) -> Self {
        PrioInterpreter { categories }
    }

    /// Resolve the gene entry and rule for the variant.
    pub fn resolve(
        &self,
        facts: &VariantFacts,
    ) -> Result<(&GeneEntry, &NamedRule), NotAssessedCause> {
        let gene = facts
            .gene
            .as_deref()
            .ok_or(NotAssessedCause::NoGeneAnnotation)?;
        let entry = self
            .categories
            .get(gene)
            .ok_or(NotAssessedCause::OutOfPanel)?;
        match (entry.category, entry.rule.as_ref()) {
            (MoiCategory::None, _) => Err(NotAssessedCause::GeneAbsentFromPanelApp),
            (MoiCategory::Unknown, _) => Err(NotAssessedCause::MoiUnrecognised),
            (_, None) => Err(NotAssessedCause::NoMatchingRule),
            (_, Some(rule)) => Ok((entry, rule)),
        }
    }

    /// Count the variant towards its gene if it qualifies, i.e., passes the
    /// standard filter and the AF threshold of its gene's rule.
    pub fn observe(&self, facts: &VariantFacts, aggregator: &mut ZygosityAggregator) {
        if !facts.filter_pass {
            return;
        }
        if let Ok((entry, rule)) = self.resolve(facts) {
            if frequency::evaluate(&facts.afs, &rule.rule).pass {
                aggregator.add(&entry.gene_id, facts.zygosity);
            }
        }
    }

    /// Decide the flag of the variant given the frozen gene verdicts.
    pub fn decide(&self, facts: &VariantFacts, verdicts: &FrozenVerdicts) -> Decision {
        let assessment = self.resolve(facts).map(|(entry, rule)| Assessment {
            category: entry.category,
            rule,
            af: frequency::evaluate(&facts.afs, &rule.rule),
            gene_pass: verdicts.gene_pass(&entry.gene_id),
        });
        decision::decide(facts.filter_pass, assessment)
    }

    /// Category to write into the MOI field; `None` for genes out of scope.
    pub fn category(&self, facts: &VariantFacts) -> Option<MoiCategory> {
        facts
            .gene
            .as_deref()
            .and_then(|gene| self.categories.get(gene))
            .map(|entry| entry.category)
    }
}
