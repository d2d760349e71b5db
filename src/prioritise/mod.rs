//! Implementation of the `annotate` subcommand.
//!
//! The input VCF is read twice.  The first pass counts the qualifying
//! heterozygous and homozygous calls per gene; the frozen per-gene verdicts
//! are then used in the second pass to flag each record.

pub mod categorize;
pub mod conf;
pub mod interpreter;
pub mod moi;
pub mod panelapp;
pub mod panels;
pub mod summary;

use std::io::Write as _;
use std::path::Path;
use std::time::Instant;

use noodles_vcf as vcf;
use rayon::prelude::*;
use thousands::Separable;
use vcf::variant::io::Write as _;

use crate::common::{self, noodles as vcf_utils};
use crate::err::AppError;

use self::conf::Config;
use self::interpreter::decision::Decision;
use self::interpreter::frequency::{AfAnnotations, AfValue};
use self::interpreter::zygosity::{FrozenVerdicts, Zygosity, ZygosityAggregator};
use self::interpreter::{PrioInterpreter, VariantFacts};
use self::moi::{GeneCategories, MoiCategory, MoiMatcher};
use self::panelapp::{PanelAppDump, PanelAppIndex};
use self::panels::{GenePanelsTable, PanelSpec, ResolvedPanel};
use self::summary::RunSummary;

/// Command line arguments for the `annotate` subcommand.
#[derive(Debug, clap::Parser)]
#[command(author, version, about = "Annotate VCF records with prioritisation flags", long_about = None)]
pub struct Args {
    /// Path to the input VCF file; read twice.
    #[arg(long)]
    pub path_input: String,
    /// Path to the output VCF file; `.gz` is written as BGZF.
    #[arg(long)]
    pub path_output: String,
    /// Panel specifier, e.g., `R149.1` or `_HGNC:1100;_HGNC:1101`.
    #[arg(long)]
    pub panel: String,
    /// Path to the configuration JSON file.
    #[arg(long)]
    pub path_config: String,
    /// Path to the genepanels TSV file.
    #[arg(long)]
    pub path_genepanels: String,
    /// Path to the PanelApp dump JSON file.
    #[arg(long)]
    pub path_panelapp_dump: String,
    /// Name of the sample to count genotypes of; defaults to the first.
    #[arg(long)]
    pub sample: Option<String>,
    /// Optional path to write the run summary JSON to.
    #[arg(long)]
    pub path_summary: Option<String>,
    /// Number of records processed in parallel at a time.
    #[arg(long, default_value_t = 10_000)]
    pub batch_size: usize,
    /// Number of worker threads; defaults to the number of CPUs.
    #[arg(long)]
    pub num_threads: Option<usize>,
}

/// Lookup tables of one run, loaded once and read-only afterwards.
#[derive(Debug)]
pub struct Context {
    pub config: Config,
    pub panel: ResolvedPanel,
    pub categories: GeneCategories,
}

impl Context {
    /// Load configuration, resolve the panel, and categorize its genes.
    pub fn load(
        panel: &str,
        path_config: &str,
        path_genepanels: &str,
        path_panelapp_dump: &str,
    ) -> Result<Self, anyhow::Error> {
        tracing::info!("loading configuration from {}...", path_config);
        let config = Config::from_path(path_config).map_err(AppError::from)?;

        tracing::info!("resolving panel {:?}...", panel);
        let spec: PanelSpec = panel.parse().map_err(AppError::from)?;
        let genepanels = if spec.panel.is_some() {
            let table = GenePanelsTable::from_path(path_genepanels).map_err(AppError::from)?;
            tracing::info!("... loaded {} clinical indications", table.len());
            table
        } else {
            GenePanelsTable::default()
        };
        let resolved = panels::resolve(&spec, &genepanels).map_err(AppError::from)?;
        tracing::info!(
            "... panel {} (PanelApp ID {}) has {} genes",
            resolved.clinical_indication.as_deref().unwrap_or("<gene list>"),
            resolved.panel_id.as_deref().unwrap_or("-"),
            resolved.genes.len()
        );

        tracing::info!("loading PanelApp dump from {}...", path_panelapp_dump);
        let dump = PanelAppDump::from_path(path_panelapp_dump).map_err(AppError::from)?;
        let preferred = resolved.panel_id.iter().cloned().collect::<Vec<_>>();
        let panelapp = PanelAppIndex::build(&dump, &preferred, config.min_confidence_level);
        tracing::info!("... indexed {} PanelApp genes", panelapp.len());

        let matcher = MoiMatcher::new()?;
        let categories = GeneCategories::build(&resolved.genes, &panelapp, &matcher, &config);

        Ok(Self {
            config,
            panel: resolved,
            categories,
        })
    }
}

/// Index of the sample to count genotypes of, `None` if the VCF has no samples.
fn select_sample(header: &vcf::Header, sample: Option<&str>) -> Result<Option<usize>, AppError> {
    let sample_names = header.sample_names();
    match sample {
        Some(name) => sample_names
            .get_index_of(name)
            .map(Some)
            .ok_or_else(|| AppError::Input(format!("sample {:?} not found in VCF header", name))),
        None if sample_names.is_empty() => {
            tracing::warn!("VCF has no samples, no zygosity will be counted");
            Ok(None)
        }
        None => Ok(Some(0)),
    }
}

/// Extract the facts relevant for prioritisation from `record`.
fn extract_facts(
    record: &vcf::variant::RecordBuf,
    config: &Config,
    sample_idx: Option<usize>,
) -> VariantFacts {
    let gene = vcf_utils::info_texts(record, &config.gene_field)
        .into_iter()
        .map(|gene| gene.trim().to_string())
        .find(|gene| !gene.is_empty() && gene != ".");
    let af = |key: &str| {
        vcf_utils::info_texts(record, key)
            .iter()
            .map(|text| AfValue::from_text(text))
            .fold(AfValue::Missing, AfValue::combine)
    };
    let zygosity = sample_idx
        .and_then(|idx| vcf_utils::genotype_alleles(record, idx))
        .map(|alleles| Zygosity::from_alleles(&alleles))
        .unwrap_or_default();

    VariantFacts {
        gene,
        filter_pass: vcf_utils::is_filter_pass(record),
        afs: AfAnnotations {
            exome: af(&config.exome_af_field),
            genome: af(&config.genome_af_field),
        },
        zygosity,
    }
}

/// Write flag, reason and MOI category into the INFO fields of `record`.
///
/// A reason left over from an earlier run is removed.
fn apply_decision(
    record: &mut vcf::variant::RecordBuf,
    config: &Config,
    decision: &Decision,
    category: Option<MoiCategory>,
) {
    vcf_utils::set_info_string(
        record,
        &config.flag_field_name,
        Some(decision.flag().to_string()),
    );
    vcf_utils::set_info_string(
        record,
        &config.reason_field_name,
        decision.reason().map(|reason| reason.to_string()),
    );
    if let Some(moi_field_name) = config.moi_field_name.as_ref() {
        vcf_utils::set_info_string(
            record,
            moi_field_name,
            category.map(|category| category.to_string()),
        );
    }
}

/// Generate the output header from the input header.
fn build_output_header(input_header: &vcf::Header, config: &Config) -> vcf::Header {
    let mut header = input_header.clone();
    vcf_utils::upsert_info_header(
        &mut header,
        &config.flag_field_name,
        "Prioritisation flag (PRIORITISED, NOT_PRIORITISED or NOT_ASSESSED)",
    );
    vcf_utils::upsert_info_header(
        &mut header,
        &config.reason_field_name,
        "Reason why the variant was not prioritised",
    );
    if let Some(moi_field_name) = config.moi_field_name.as_ref() {
        vcf_utils::upsert_info_header(
            &mut header,
            moi_field_name,
            "Mode of inheritance from PanelApp (simplified)",
        );
    }
    header
}

/// Header used for decoding records.
///
/// The gene and AF fields are read as text, so values that do not match
/// their declared type end up as unparseable AF rather than failing the record.
fn decoding_header(input_header: &vcf::Header, config: &Config) -> vcf::Header {
    vcf_utils::relax_info_header(
        input_header,
        &[
            config.gene_field.as_str(),
            config.exome_af_field.as_str(),
            config.genome_af_field.as_str(),
        ],
    )
}

/// First pass: count qualifying calls per gene and freeze the verdicts.
fn count_zygosity(
    path_input: &str,
    interpreter: &PrioInterpreter,
    config: &Config,
    sample: Option<&str>,
    batch_size: usize,
) -> Result<FrozenVerdicts, anyhow::Error> {
    let (mut reader, input_header) =
        vcf_utils::open_vcf_reader(path_input).map_err(|e| AppError::Input(e.to_string()))?;
    let sample_idx = select_sample(&input_header, sample)?;
    let header = decoding_header(&input_header, config);

    let mut aggregator = ZygosityAggregator::default();
    let mut total_records = 0usize;
    loop {
        let batch = vcf_utils::read_batch(&mut reader, batch_size)
            .map_err(|e| AppError::Input(e.to_string()))?;
        if batch.is_empty() {
            break; // all done
        }
        total_records += batch.len();
        // undecodable records are reported in the second pass
        let batch_aggregator = batch
            .par_iter()
            .fold(ZygosityAggregator::default, |mut aggregator, line| {
                if let Ok(record) = vcf_utils::decode_record(&header, line) {
                    let facts = extract_facts(&record, config, sample_idx);
                    interpreter.observe(&facts, &mut aggregator);
                }
                aggregator
            })
            .reduce(ZygosityAggregator::default, ZygosityAggregator::merge);
        aggregator = aggregator.merge(batch_aggregator);
        tracing::debug!("... counted {} records", total_records.separate_with_commas());
    }
    tracing::info!(
        "... counted zygosity of {} records",
        total_records.separate_with_commas()
    );

    Ok(aggregator.freeze(&interpreter.categories))
}

/// Outcome of the second pass for one record line.
enum Outcome {
    Decided {
        record: vcf::variant::RecordBuf,
        facts: VariantFacts,
        decision: Decision,
    },
    Undecodable {
        message: String,
    },
}

/// Second pass: decide each record and write it to `path_output`.
///
/// Records that cannot be decoded are written unchanged.
fn write_decisions(
    path_input: &str,
    path_output: &Path,
    interpreter: &PrioInterpreter,
    verdicts: &FrozenVerdicts,
    config: &Config,
    sample: Option<&str>,
    batch_size: usize,
) -> Result<RunSummary, anyhow::Error> {
    let (mut reader, input_header) =
        vcf_utils::open_vcf_reader(path_input).map_err(|e| AppError::Input(e.to_string()))?;
    let sample_idx = select_sample(&input_header, sample)?;
    let header = decoding_header(&input_header, config);
    let output_header = build_output_header(&input_header, config);

    let mut writer =
        vcf_utils::open_vcf_writer(path_output).map_err(|e| AppError::Output(e.to_string()))?;
    writer
        .write_header(&output_header)
        .map_err(|e| AppError::Output(format!("could not write VCF header: {}", e)))?;

    let mut summary = RunSummary::default();
    loop {
        let batch = vcf_utils::read_batch(&mut reader, batch_size)
            .map_err(|e| AppError::Input(e.to_string()))?;
        if batch.is_empty() {
            break; // all done
        }
        let outcomes = batch
            .par_iter()
            .map(|line| match vcf_utils::decode_record(&header, line) {
                Ok(mut record) => {
                    let facts = extract_facts(&record, config, sample_idx);
                    let decision = interpreter.decide(&facts, verdicts);
                    apply_decision(&mut record, config, &decision, interpreter.category(&facts));
                    Outcome::Decided {
                        record,
                        facts,
                        decision,
                    }
                }
                Err(e) => Outcome::Undecodable {
                    message: e.to_string(),
                },
            })
            .collect::<Vec<_>>();
        let batch_summary = outcomes
            .par_iter()
            .fold(RunSummary::default, |mut summary, outcome| {
                match outcome {
                    Outcome::Decided {
                        facts, decision, ..
                    } => summary.record(facts, decision),
                    Outcome::Undecodable { .. } => summary.record_undecodable(),
                }
                summary
            })
            .reduce(RunSummary::default, RunSummary::merge);
        summary = summary.merge(batch_summary);

        for (line, outcome) in batch.iter().zip(outcomes.iter()) {
            match outcome {
                Outcome::Decided { record, .. } => writer
                    .write_variant_record(&output_header, record)
                    .map_err(|e| AppError::Output(format!("could not write VCF record: {}", e)))?,
                Outcome::Undecodable { message } => {
                    tracing::warn!(
                        "could not decode VCF record, writing it unchanged: {}: {}",
                        message,
                        line
                    );
                    let out = writer.get_mut();
                    out.write_all(line.as_bytes())
                        .and_then(|()| out.write_all(b"\n"))
                        .map_err(|e| {
                            AppError::Output(format!("could not write VCF record: {}", e))
                        })?;
                }
            }
        }
    }
    writer
        .get_mut()
        .flush()
        .map_err(|e| AppError::Output(format!("could not flush VCF file: {}", e)))?;

    Ok(summary)
}

/// Create the temporary output file next to `path_output`.
fn create_tempfile(path_output: &Path) -> Result<tempfile::NamedTempFile, AppError> {
    let dir = path_output
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let suffix = if path_output.extension().and_then(|ext| ext.to_str()) == Some("gz") {
        ".vcf.gz"
    } else {
        ".vcf"
    };
    tempfile::Builder::new()
        .prefix(".moi-prioritiser.")
        .suffix(suffix)
        .tempfile_in(dir)
        .map_err(|e| AppError::Output(format!("could not create file in {:?}: {}", dir, e)))
}

/// Main entry point for the `annotate` sub command.
pub fn run(args_common: &crate::common::Args, args: &Args) -> Result<(), anyhow::Error> {
    let before_anything = Instant::now();
    tracing::info!("args_common = {:#?}", &args_common);
    tracing::info!("args = {:#?}", &args);

    if let Some(num_threads) = args.num_threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build_global()
            .map_err(|e| anyhow::anyhow!("could not configure thread pool: {}", e))?;
    }
    let batch_size = args.batch_size.max(1);

    let Context {
        config,
        panel,
        categories,
    } = Context::load(
        &args.panel,
        &args.path_config,
        &args.path_genepanels,
        &args.path_panelapp_dump,
    )?;
    let genes_in_scope = categories.len();
    let interpreter = PrioInterpreter::new(categories);
    common::trace_rss_now();

    tracing::info!("counting zygosity per gene...");
    let before_counting = Instant::now();
    let verdicts = count_zygosity(
        &args.path_input,
        &interpreter,
        &config,
        args.sample.as_deref(),
        batch_size,
    )?;
    tracing::info!(
        "... done counting for {} genes in {:?}",
        verdicts.len(),
        before_counting.elapsed()
    );
    common::trace_rss_now();

    tracing::info!("writing decisions to {}...", &args.path_output);
    let before_writing = Instant::now();
    let path_output = Path::new(&args.path_output);
    let tmp_output = create_tempfile(path_output)?;
    let mut summary = write_decisions(
        &args.path_input,
        tmp_output.path(),
        &interpreter,
        &verdicts,
        &config,
        args.sample.as_deref(),
        batch_size,
    )?;
    tracing::info!("... done writing in {:?}", before_writing.elapsed());

    summary.panel = panel.clinical_indication.clone();
    summary.panel_id = panel.panel_id.clone();
    summary.genes_in_scope = genes_in_scope;
    summary.set_verdicts(&verdicts);
    summary.log();

    tmp_output.persist(path_output).map_err(|e| {
        AppError::Output(format!("could not move output to {:?}: {}", path_output, e))
    })?;
    if let Some(path_summary) = args.path_summary.as_ref() {
        summary.write_json(path_summary)?;
    }

    tracing::info!(
        "All of `annotate` completed in {:?}",
        before_anything.elapsed()
    );
    Ok(())
}
