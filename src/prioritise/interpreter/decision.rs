//! Combination of filter status, AF evaluation and gene verdict into a flag.

use super::frequency::AfEvaluation;
use crate::prioritise::conf::NamedRule;
use crate::prioritise::moi::MoiCategory;

/// The flag written to the output record.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    strum::Display,
    strum::EnumString,
    enum_map::Enum,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Flag {
    Prioritised,
    NotPrioritised,
    NotAssessed,
}

/// Why a variant was not assessed at all.
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
    strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotAssessedCause {
    /// The record carries no gene annotation.
    NoGeneAnnotation,
    /// The gene is not part of the resolved panel.
    OutOfPanel,
    /// The gene is in scope but not found in the PanelApp dump.
    GeneAbsentFromPanelApp,
    /// The gene's MOI is empty or not recognised.
    MoiUnrecognised,
    /// No rule is configured for the gene's category.
    NoMatchingRule,
}

/// Why a variant was not prioritised.
#[derive(Debug, Clone, PartialEq)]
pub enum Reason {
    StandardFilter,
    AlleleFrequency {
        rule: String,
        observed_af: f32,
        threshold: f32,
    },
    Zygosity {
        category: MoiCategory,
    },
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reason::StandardFilter => f.write_str("standard filter excluded"),
            Reason::AlleleFrequency {
                rule,
                observed_af,
                threshold,
            } => write!(
                f,
                "allele frequency {} exceeds {} threshold {}",
                observed_af, rule, threshold
            ),
            Reason::Zygosity { category } => write!(
                f,
                "zygosity requirement not met for category {}",
                category
            ),
        }
    }
}

/// Final outcome for one variant.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Prioritised,
    NotPrioritised { reason: Reason },
    NotAssessed { cause: NotAssessedCause },
}

impl Decision {
    pub fn flag(&self) -> Flag {
        match self {
            Decision::Prioritised => Flag::Prioritised,
            Decision::NotPrioritised { .. } => Flag::NotPrioritised,
            Decision::NotAssessed { .. } => Flag::NotAssessed,
        }
    }

    /// The reason; present iff the flag is `NOT_PRIORITISED`.
    pub fn reason(&self) -> Option<&Reason> {
        match self {
            Decision::NotPrioritised { reason } => Some(reason),
            Decision::Prioritised | Decision::NotAssessed { .. } => None,
        }
    }
}

/// Inputs of the decision for a variant in an assessable gene.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment<'a> {
    pub category: MoiCategory,
    pub rule: &'a NamedRule,
    pub af: AfEvaluation,
    /// Frozen verdict of the variant's gene.
    pub gene_pass: bool,
}

/// Decide the flag of a variant.
///
/// `assessment` is the error cause if the variant's gene could not be
/// resolved to a rule.
pub fn decide(filter_pass: bool, assessment: Result<Assessment<'_>, NotAssessedCause>) -> Decision {
    let assessment = match assessment {
        Ok(assessment) => assessment,
        Err(cause) => return Decision::NotAssessed { cause },
    };

    if !filter_pass {
        Decision::NotPrioritised {
            reason: Reason::StandardFilter,
        }
    } else if !assessment.af.pass {
        Decision::NotPrioritised {
            reason: Reason::AlleleFrequency {
                rule: assessment.rule.name.clone(),
                observed_af: assessment.af.observed_af.unwrap_or_default(),
                threshold: assessment.rule.rule.af_threshold,
            },
        }
    } else if !assessment.gene_pass {
        Decision::NotPrioritised {
            reason: Reason::Zygosity {
                category: assessment.category,
            },
        }
    } else {
        Decision::Prioritised
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::{Assessment, Decision, Flag, NotAssessedCause, Reason};
    use crate::prioritise::conf::{AfSource, FilterRule, NamedRule};
    use crate::prioritise::interpreter::frequency::AfEvaluation;
    use crate::prioritise::moi::MoiCategory;

    fn biallelic() -> NamedRule {
        NamedRule {
            name: "biallelic".into(),
            rule: FilterRule {
                af_threshold: 0.005,
                het_required: 2,
                hom_required: 1,
                af_source: AfSource::Both,
            },
        }
    }

    #[rstest]
    // -- not assessed wins over everything -----------------------------------
    #[case(false, Err(NotAssessedCause::GeneAbsentFromPanelApp), true, true, Flag::NotAssessed)]
    #[case(true, Err(NotAssessedCause::MoiUnrecognised), false, false, Flag::NotAssessed)]
    // -- standard filter wins over AF and zygosity ---------------------------
    #[case(false, Ok(()), true, true, Flag::NotPrioritised)]
    #[case(false, Ok(()), false, false, Flag::NotPrioritised)]
    // -- AF wins over zygosity -----------------------------------------------
    #[case(true, Ok(()), false, false, Flag::NotPrioritised)]
    #[case(true, Ok(()), false, true, Flag::NotPrioritised)]
    // -- zygosity ------------------------------------------------------------
    #[case(true, Ok(()), true, false, Flag::NotPrioritised)]
    // -- all pass ------------------------------------------------------------
    #[case(true, Ok(()), true, true, Flag::Prioritised)]
    fn decide_flag(
        #[case] filter_pass: bool,
        #[case] resolved: Result<(), NotAssessedCause>,
        #[case] af_pass: bool,
        #[case] gene_pass: bool,
        #[case] expected: Flag,
    ) {
        let rule = biallelic();
        let assessment = resolved.map(|()| Assessment {
            category: MoiCategory::Biallelic,
            rule: &rule,
            af: AfEvaluation {
                pass: af_pass,
                observed_af: Some(if af_pass { 0.001 } else { 0.01 }),
            },
            gene_pass,
        });

        let decision = super::decide(filter_pass, assessment);

        assert_eq!(decision.flag(), expected);
        assert_eq!(decision.reason().is_some(), expected == Flag::NotPrioritised);
    }

    #[test]
    fn reason_texts() {
        let rule = biallelic();
        let assessment = |af_pass: bool, gene_pass: bool| Assessment {
            category: MoiCategory::Biallelic,
            rule: &rule,
            af: AfEvaluation {
                pass: af_pass,
                observed_af: Some(0.02),
            },
            gene_pass,
        };

        assert_eq!(
            super::decide(false, Ok(assessment(true, true))),
            Decision::NotPrioritised {
                reason: Reason::StandardFilter
            }
        );
        assert_eq!(
            super::decide(false, Ok(assessment(true, true)))
                .reason()
                .map(|r| r.to_string()),
            Some("standard filter excluded".to_string())
        );
        assert_eq!(
            super::decide(true, Ok(assessment(false, true)))
                .reason()
                .map(|r| r.to_string()),
            Some("allele frequency 0.02 exceeds biallelic threshold 0.005".to_string())
        );
        assert_eq!(
            super::decide(true, Ok(assessment(true, false)))
                .reason()
                .map(|r| r.to_string()),
            Some("zygosity requirement not met for category BIALLELIC".to_string())
        );
    }

    #[test]
    fn flag_strings() {
        assert_eq!(Flag::Prioritised.to_string(), "PRIORITISED");
        assert_eq!(Flag::NotPrioritised.to_string(), "NOT_PRIORITISED");
        assert_eq!(Flag::NotAssessed.to_string(), "NOT_ASSESSED");
        assert_eq!(
            NotAssessedCause::GeneAbsentFromPanelApp.to_string(),
            "gene_absent_from_panel_app"
        );
    }
}
