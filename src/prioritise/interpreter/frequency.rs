use crate::prioritise::conf::{AfSource, FilterRule};

/// Population AF annotation of one source as found on a record.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum AfValue {
    /// No value present.
    #[default]
    Missing,
    /// A value is present but could not be interpreted.
    Unparseable,
    /// The maximal value present.
    Present(f32),
}

impl AfValue {
    /// Interpret an annotation text; multiple values may be separated by `&`
    /// or `,` and the maximum is used.
    pub fn from_text(text: &str) -> Self {
        text.split(|c: char| c == '&' || c == ',')
            .map(str::trim)
            .filter(|token| !token.is_empty() && *token != ".")
            .map(|token| match token.parse::<f32>() {
                Ok(af) if af.is_finite() => AfValue::Present(af),
                _ => AfValue::Unparseable,
            })
            .fold(AfValue::Missing, AfValue::combine)
    }

    /// Combine two values; a present value wins over `Unparseable`, which
    /// wins over `Missing`.
    pub fn combine(self, other: Self) -> Self {
        match (self, other) {
            (AfValue::Present(lhs), AfValue::Present(rhs)) => AfValue::Present(lhs.max(rhs)),
            (AfValue::Present(af), _) | (_, AfValue::Present(af)) => AfValue::Present(af),
            (AfValue::Unparseable, _) | (_, AfValue::Unparseable) => AfValue::Unparseable,
            (AfValue::Missing, AfValue::Missing) => AfValue::Missing,
        }
    }

    /// Value used for comparison; absent values count as 0.
    pub fn for_comparison(self) -> f32 {
        match self {
            AfValue::Present(af) => af,
            AfValue::Missing | AfValue::Unparseable => 0.0,
        }
    }
}

/// Exome and genome AF annotations of one record.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AfAnnotations {
    pub exome: AfValue,
    pub genome: AfValue,
}

impl AfAnnotations {
    /// The annotations considered for the given `source`.
    pub fn considered(&self, source: AfSource) -> Vec<AfValue> {
        match source {
            AfSource::Exome => vec![self.exome],
            AfSource::Genome => vec![self.genome],
            AfSource::Both => vec![self.exome, self.genome],
        }
    }
}

/// Result of comparing AF annotations against a rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AfEvaluation {
    pub pass: bool,
    /// Maximal considered AF, `None` if no considered value was present.
    pub observed_af: Option<f32>,
}

/// Compare the AF annotations considered by `rule` against its threshold.
pub fn evaluate(afs: &AfAnnotations, rule: &FilterRule) -> AfEvaluation {
    let considered = afs.considered(rule.af_source);
    let pass = considered
        .iter()
        .all(|af| af.for_comparison() <= rule.af_threshold);
    let observed_af = match considered.into_iter().fold(AfValue::Missing, AfValue::combine) {
        AfValue::Present(af) => Some(af),
        AfValue::Missing | AfValue::Unparseable => None,
    };
    if !pass {
        tracing::trace!(
            "AF {:?} fails threshold {} of source {}",
            afs,
            rule.af_threshold,
            rule.af_source
        );
    }
    AfEvaluation { pass, observed_af }
}
