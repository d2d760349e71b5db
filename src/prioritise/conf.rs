//! Rule configuration of the prioritisation.

use std::path::Path;

use enum_map::EnumMap;
use indexmap::IndexMap;
use serde_json::Value;

use super::moi::MoiCategory;
use crate::common::is_valid_info_key;

/// Name of the rule used for genes without a more specific rule.
pub const STANDARD_FILTERING: &str = "standard_filtering";

/// Which population AF annotations a rule considers.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AfSource {
    Exome,
    Genome,
    #[default]
    Both,
}

/// AF threshold and zygosity requirement for one rule.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct FilterRule {
    /// Maximal population AF, inclusive.
    pub af_threshold: f32,
    /// Number of qualifying heterozygous calls in the gene that suffices.
    pub het_required: u32,
    /// Number of qualifying homozygous calls in the gene that suffices.
    pub hom_required: u32,
    pub af_source: AfSource,
}

/// A `FilterRule` together with its name from the configuration.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct NamedRule {
    pub name: String,
    pub rule: FilterRule,
}

/// Errors while loading the configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not read configuration file: {0}")]
    Io(String),
    #[error("configuration is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("missing configuration key {0:?}")]
    MissingKey(String),
    #[error("invalid value for configuration key {key:?}: {message}")]
    InvalidValue { key: String, message: String },
}

impl ConfigError {
    fn invalid<K: Into<String>, M: Into<String>>(key: K, message: M) -> Self {
        ConfigError::InvalidValue {
            key: key.into(),
            message: message.into(),
        }
    }
}

fn default_moi_field_name() -> Option<String> {
    Some("MOI".to_string())
}

/// The configuration JSON as written by the user.
#[derive(Debug, serde::Deserialize)]
struct RawConfig {
    #[serde(default, alias = "flag_field_name")]
    flag_name: Option<String>,
    #[serde(default)]
    filtering_rules: Option<IndexMap<String, RawRule>>,
    #[serde(default, alias = "standard_filter_expression")]
    bcftools_filter_string: Option<String>,
    #[serde(default)]
    reason_field_name: Option<String>,
    /// `null` disables the MOI field.
    #[serde(default = "default_moi_field_name")]
    moi_field_name: Option<String>,
    #[serde(default)]
    gene_field: Option<String>,
    #[serde(default)]
    exome_af_field: Option<String>,
    #[serde(default)]
    genome_af_field: Option<String>,
    #[serde(default)]
    min_confidence_level: Option<Value>,
    #[serde(default)]
    category_rules: Option<IndexMap<String, String>>,
}

#[derive(Debug, serde::Deserialize)]
struct RawRule {
    #[serde(default, alias = "af_threshold")]
    af: Option<Value>,
    #[serde(default, rename = "HET", alias = "het_required")]
    het: Option<Value>,
    #[serde(default, rename = "HOM", alias = "hom_required")]
    hom: Option<Value>,
    #[serde(default)]
    af_source: Option<Value>,
}

/// Validated, immutable configuration of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub flag_field_name: String,
    pub reason_field_name: String,
    pub moi_field_name: Option<String>,
    pub gene_field: String,
    pub exome_af_field: String,
    pub genome_af_field: String,
    /// Passed through to the upstream soft-filter step.
    pub standard_filter_expression: Option<String>,
    pub min_confidence_level: u32,
    pub rules: IndexMap<String, FilterRule>,
    /// Rule name per category.
    pub category_rules: EnumMap<MoiCategory, Option<String>>,
}

/// Interpret `value` at `key` as a non-negative integer.
fn parse_count(key: &str, value: Option<&Value>) -> Result<u32, ConfigError> {
    let value = value.ok_or_else(|| ConfigError::MissingKey(key.to_string()))?;
    match value.as_u64() {
        Some(count) => u32::try_from(count).map_err(|_| ConfigError::invalid(key, "too large")),
        None if value.as_i64().is_some() => Err(ConfigError::invalid(
            key,
            format!("must not be negative, got {}", value),
        )),
        None => Err(ConfigError::invalid(
            key,
            format!("expected a non-negative integer, got {}", value),
        )),
    }
}

fn parse_af(key: &str, value: Option<&Value>) -> Result<f32, ConfigError> {
    let value = value.ok_or_else(|| ConfigError::MissingKey(key.to_string()))?;
    let af = value
        .as_f64()
        .ok_or_else(|| ConfigError::invalid(key, format!("expected a number, got {}", value)))?;
    if (0.0..=1.0).contains(&af) {
        Ok(af as f32)
    } else {
        Err(ConfigError::invalid(
            key,
            format!("must be between 0 and 1, got {}", af),
        ))
    }
}

fn parse_rule(name: &str, raw: &RawRule) -> Result<FilterRule, ConfigError> {
    let key = |field: &str| format!("filtering_rules.{}.{}", name, field);
    let af_source = match raw.af_source.as_ref() {
        None | Some(Value::Null) => AfSource::default(),
        Some(value) => serde_json::from_value::<AfSource>(value.clone()).map_err(|_| {
            ConfigError::invalid(
                key("af_source"),
                format!("expected one of exome, genome, both, got {}", value),
            )
        })?,
    };
    Ok(FilterRule {
        af_threshold: parse_af(&key("af"), raw.af.as_ref())?,
        het_required: parse_count(&key("HET"), raw.het.as_ref())?,
        hom_required: parse_count(&key("HOM"), raw.hom.as_ref())?,
        af_source,
    })
}

/// Check that `value` (or `default`) is a valid INFO key.
fn info_key(key: &str, value: Option<String>, default: &str) -> Result<String, ConfigError> {
    let value = value.unwrap_or_else(|| default.to_string());
    if is_valid_info_key(&value) {
        Ok(value)
    } else {
        Err(ConfigError::invalid(
            key,
            format!("{:?} is not a valid INFO key", value),
        ))
    }
}

impl Config {
    /// Parse and validate the configuration from JSON text.
    pub fn load(raw_json: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(raw_json)?;
        Self::try_from(raw)
    }

    /// Read configuration from the file at `path`.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw_json = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(format!("{:?}: {}", path.as_ref(), e)))?;
        Self::load(&raw_json)
    }

    /// Return the rule for `category`, if the category has one.
    pub fn rule_for(&self, category: MoiCategory) -> Option<NamedRule> {
        let name = self.category_rules[category].as_ref()?;
        self.rules.get(name).map(|rule| NamedRule {
            name: name.clone(),
            rule: *rule,
        })
    }
}

impl TryFrom<RawConfig> for Config {
    type Error = ConfigError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        let flag_field_name = info_key(
            "flag_name",
            Some(
                raw.flag_name
                    .ok_or_else(|| ConfigError::MissingKey("flag_name".into()))?,
            ),
            "",
        )?;
        let reason_field_name =
            info_key("reason_field_name", raw.reason_field_name, "Filter_reason")?;
        let moi_field_name = raw
            .moi_field_name
            .map(|name| info_key("moi_field_name", Some(name), ""))
            .transpose()?;
        let mut output_keys = vec![&flag_field_name, &reason_field_name];
        output_keys.extend(moi_field_name.as_ref());
        for (i, lhs) in output_keys.iter().enumerate() {
            if output_keys[i + 1..].contains(lhs) {
                return Err(ConfigError::invalid(
                    "flag_name",
                    format!("INFO key {:?} is used for more than one output field", lhs),
                ));
            }
        }

        let raw_rules = raw
            .filtering_rules
            .ok_or_else(|| ConfigError::MissingKey("filtering_rules".into()))?;
        if raw_rules.is_empty() {
            return Err(ConfigError::invalid("filtering_rules", "must not be empty"));
        }
        if !raw_rules.contains_key(STANDARD_FILTERING) {
            return Err(ConfigError::MissingKey(format!(
                "filtering_rules.{}",
                STANDARD_FILTERING
            )));
        }
        let rules = raw_rules
            .iter()
            .map(|(name, raw_rule)| Ok((name.clone(), parse_rule(name, raw_rule)?)))
            .collect::<Result<IndexMap<_, _>, ConfigError>>()?;

        let mut category_rules: EnumMap<MoiCategory, Option<String>> =
            EnumMap::from_fn(|category: MoiCategory| {
                category.default_rule_name().map(str::to_string)
            });
        for (raw_category, rule_name) in raw.category_rules.unwrap_or_default() {
            let key = format!("category_rules.{}", raw_category);
            let category = raw_category
                .parse::<MoiCategory>()
                .map_err(|_| ConfigError::invalid(&key, "unknown MOI category"))?;
            if !category.is_resolved() {
                return Err(ConfigError::invalid(
                    &key,
                    format!("category {} cannot be mapped to a rule", category),
                ));
            }
            if !rules.contains_key(&rule_name) {
                return Err(ConfigError::invalid(
                    &key,
                    format!("no filtering rule named {:?}", rule_name),
                ));
            }
            category_rules[category] = Some(rule_name);
        }

        let min_confidence_level = match raw.min_confidence_level.as_ref() {
            None | Some(Value::Null) => 3,
            value => parse_count("min_confidence_level", value)?,
        };

        Ok(Config {
            flag_field_name,
            reason_field_name,
            moi_field_name,
            gene_field: info_key("gene_field", raw.gene_field, "CSQ_SYMBOL")?,
            exome_af_field: info_key("exome_af_field", raw.exome_af_field, "CSQ_gnomADe_AF")?,
            genome_af_field: info_key("genome_af_field", raw.genome_af_field, "CSQ_gnomADg_AF")?,
            standard_filter_expression: raw.bcftools_filter_string,
            min_confidence_level,
            rules,
            category_rules,
        })
    }
}

#[cfg(test)]
mod test {
    use float_cmp::approx_eq;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::{AfSource, Config, ConfigError};
    use crate::prioritise::moi::MoiCategory;

    const FULL: &str = r#"{
        "flag_name": "PRIORITY",
        "filtering_rules": {
            "biallelic": {"af": 0.005, "HET": 2, "HOM": 1, "af_source": "exome"},
            "monoallelic": {"af": 0.0001, "HET": 1, "HOM": 1},
            "both_monoallelic_and_biallelic": {"af": 0.005, "HET": 1, "HOM": 1},
            "standard_filtering": {"af": 0.01, "HET": 1, "HOM": 1}
        },
        "bcftools_filter_string": "bcftools filter --soft-filter EXCLUDE -m + -e 'QUAL<20'",
        "VEP_fields_to_split": ["SYMBOL", "gnomADe_AF"],
        "category_rules": {"XLR": "biallelic"}
    }"#;

    #[test]
    fn load_full() {
        let config = Config::load(FULL).unwrap();

        assert_eq!(config.flag_field_name, "PRIORITY");
        assert_eq!(config.reason_field_name, "Filter_reason");
        assert_eq!(config.moi_field_name.as_deref(), Some("MOI"));
        assert_eq!(config.gene_field, "CSQ_SYMBOL");
        assert_eq!(config.min_confidence_level, 3);
        assert_eq!(config.rules.len(), 4);
        let biallelic = config.rules["biallelic"];
        assert!(approx_eq!(f32, biallelic.af_threshold, 0.005, ulps = 2));
        assert_eq!(biallelic.het_required, 2);
        assert_eq!(biallelic.hom_required, 1);
        assert_eq!(biallelic.af_source, AfSource::Exome);
        assert_eq!(config.rules["monoallelic"].af_source, AfSource::Both);
        assert!(config
            .standard_filter_expression
            .as_deref()
            .unwrap()
            .starts_with("bcftools filter"));
    }

    #[test]
    fn load_aliases() {
        let config = Config::load(
            r#"{
                "flag_field_name": "PRIO",
                "standard_filter_expression": "QUAL<20",
                "moi_field_name": null,
                "filtering_rules": {
                    "standard_filtering": {"af_threshold": 0.01, "het_required": 1, "hom_required": 0}
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.flag_field_name, "PRIO");
        assert_eq!(config.moi_field_name, None);
        assert_eq!(config.standard_filter_expression.as_deref(), Some("QUAL<20"));
        assert_eq!(config.rules["standard_filtering"].hom_required, 0);
    }

    #[rstest]
    #[case(MoiCategory::Biallelic, Some("biallelic"))]
    #[case(MoiCategory::Monoallelic, Some("monoallelic"))]
    #[case(MoiCategory::Both, Some("both_monoallelic_and_biallelic"))]
    #[case(MoiCategory::Xlr, Some("biallelic"))]
    #[case(MoiCategory::Xld, Some("standard_filtering"))]
    #[case(MoiCategory::Mitochondrial, Some("standard_filtering"))]
    #[case(MoiCategory::Other, Some("standard_filtering"))]
    #[case(MoiCategory::Unknown, None)]
    #[case(MoiCategory::None, None)]
    fn rule_for(#[case] category: MoiCategory, #[case] expected: Option<&str>) {
        let config = Config::load(FULL).unwrap();

        let rule = config.rule_for(category);

        assert_eq!(rule.as_ref().map(|r| r.name.as_str()), expected);
    }

    #[test]
    fn rule_for_missing_named_rule() {
        let config = Config::load(
            r#"{
                "flag_name": "PRIORITY",
                "filtering_rules": {
                    "standard_filtering": {"af": 0.01, "HET": 1, "HOM": 1}
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.rule_for(MoiCategory::Biallelic), None);
        assert!(config.rule_for(MoiCategory::Mitochondrial).is_some());
    }

    #[rstest]
    #[case::missing_flag(
        r#"{"filtering_rules": {"standard_filtering": {"af": 0.01, "HET": 1, "HOM": 1}}}"#,
        "missing configuration key \"flag_name\""
    )]
    #[case::missing_rules(
        r#"{"flag_name": "PRIORITY"}"#,
        "missing configuration key \"filtering_rules\""
    )]
    #[case::empty_rules(
        r#"{"flag_name": "PRIORITY", "filtering_rules": {}}"#,
        "invalid value for configuration key \"filtering_rules\": must not be empty"
    )]
    #[case::missing_standard(
        r#"{"flag_name": "PRIORITY", "filtering_rules": {"biallelic": {"af": 0.01, "HET": 1, "HOM": 1}}}"#,
        "missing configuration key \"filtering_rules.standard_filtering\""
    )]
    #[case::af_out_of_range(
        r#"{"flag_name": "PRIORITY", "filtering_rules": {"standard_filtering": {"af": 1.5, "HET": 1, "HOM": 1}}}"#,
        "invalid value for configuration key \"filtering_rules.standard_filtering.af\": must be between 0 and 1, got 1.5"
    )]
    #[case::negative_het(
        r#"{"flag_name": "PRIORITY", "filtering_rules": {"standard_filtering": {"af": 0.1, "HET": -1, "HOM": 1}}}"#,
        "invalid value for configuration key \"filtering_rules.standard_filtering.HET\": must not be negative, got -1"
    )]
    #[case::fractional_hom(
        r#"{"flag_name": "PRIORITY", "filtering_rules": {"standard_filtering": {"af": 0.1, "HET": 1, "HOM": 0.5}}}"#,
        "invalid value for configuration key \"filtering_rules.standard_filtering.HOM\": expected a non-negative integer, got 0.5"
    )]
    #[case::missing_hom(
        r#"{"flag_name": "PRIORITY", "filtering_rules": {"standard_filtering": {"af": 0.1, "HET": 1}}}"#,
        "missing configuration key \"filtering_rules.standard_filtering.HOM\""
    )]
    #[case::bad_af_source(
        r#"{"flag_name": "PRIORITY", "filtering_rules": {"standard_filtering": {"af": 0.1, "HET": 1, "HOM": 1, "af_source": "max"}}}"#,
        "invalid value for configuration key \"filtering_rules.standard_filtering.af_source\": expected one of exome, genome, both, got \"max\""
    )]
    #[case::bad_flag_key(
        r#"{"flag_name": "MY FLAG", "filtering_rules": {"standard_filtering": {"af": 0.1, "HET": 1, "HOM": 1}}}"#,
        "invalid value for configuration key \"flag_name\": \"MY FLAG\" is not a valid INFO key"
    )]
    #[case::clashing_keys(
        r#"{"flag_name": "MOI", "filtering_rules": {"standard_filtering": {"af": 0.1, "HET": 1, "HOM": 1}}}"#,
        "invalid value for configuration key \"flag_name\": INFO key \"MOI\" is used for more than one output field"
    )]
    #[case::unknown_category(
        r#"{"flag_name": "PRIORITY", "filtering_rules": {"standard_filtering": {"af": 0.1, "HET": 1, "HOM": 1}}, "category_rules": {"AR": "standard_filtering"}}"#,
        "invalid value for configuration key \"category_rules.AR\": unknown MOI category"
    )]
    #[case::unmappable_category(
        r#"{"flag_name": "PRIORITY", "filtering_rules": {"standard_filtering": {"af": 0.1, "HET": 1, "HOM": 1}}, "category_rules": {"UNKNOWN": "standard_filtering"}}"#,
        "invalid value for configuration key \"category_rules.UNKNOWN\": category UNKNOWN cannot be mapped to a rule"
    )]
    #[case::missing_category_rule(
        r#"{"flag_name": "PRIORITY", "filtering_rules": {"standard_filtering": {"af": 0.1, "HET": 1, "HOM": 1}}, "category_rules": {"XLR": "x_linked"}}"#,
        "invalid value for configuration key \"category_rules.XLR\": no filtering rule named \"x_linked\""
    )]
    fn load_invalid(#[case] raw_json: &str, #[case] expected: &str) {
        let err = Config::load(raw_json).unwrap_err();

        assert_eq!(err.to_string(), expected);
    }

    #[test]
    fn load_invalid_json() {
        let err = Config::load("{").unwrap_err();

        assert!(matches!(err, ConfigError::Json(_)));
    }
}
