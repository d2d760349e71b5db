//! Implementation of the `categorize` subcommand.

use std::io::Write;

use super::moi::GeneCategories;

/// Command line arguments for the `categorize` subcommand.
#[derive(Debug, clap::Parser)]
#[command(author, version, about = "Write the category and rule of each gene in a panel", long_about = None)]
pub struct Args {
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
    /// Path to the output TSV file; written to stdout if omitted.
    #[arg(long)]
    pub path_output: Option<String>,
}

/// One row of the output table.
#[derive(Debug, serde::Serialize)]
struct Row<'a> {
    hgnc_id: &'a str,
    gene_symbol: &'a str,
    category: String,
    rule: &'a str,
    af_threshold: Option<f32>,
    het_required: Option<u32>,
    hom_required: Option<u32>,
    mode_of_inheritance: &'a str,
}

/// Write the category table for `categories` as TSV to `writer`.
pub fn write_table<W: Write>(categories: &GeneCategories, writer: W) -> Result<(), anyhow::Error> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_writer(writer);
    for entry in categories.iter() {
        writer
            .serialize(Row {
                hgnc_id: entry.gene_id.as_str(),
                gene_symbol: entry.symbol.as_deref().unwrap_or("."),
                category: entry.category.to_string(),
                rule: entry.rule.as_ref().map(|r| r.name.as_str()).unwrap_or("."),
                af_threshold: entry.rule.as_ref().map(|r| r.rule.af_threshold),
                het_required: entry.rule.as_ref().map(|r| r.rule.het_required),
                hom_required: entry.rule.as_ref().map(|r| r.rule.hom_required),
                mode_of_inheritance: entry.raw_moi.as_deref().unwrap_or("."),
            })
            .map_err(|e| anyhow::anyhow!("could not write category table: {}", e))?;
    }
    writer
        .flush()
        .map_err(|e| anyhow::anyhow!("could not flush category table: {}", e))?;
    Ok(())
}

/// Main entry point for the `categorize` sub command.
pub fn run(args_common: &crate::common::Args, args: &Args) -> Result<(), anyhow::Error> {
    let before_anything = std::time::Instant::now();
    tracing::info!("args_common = {:#?}", &args_common);
    tracing::info!("args = {:#?}", &args);

    let context = super::Context::load(
        &args.panel,
        &args.path_config,
        &args.path_genepanels,
        &args.path_panelapp_dump,
    )?;

    match args.path_output.as_ref() {
        Some(path_output) => {
            let file = std::fs::File::create(path_output).map_err(|e| {
                crate::err::AppError::Output(format!("{}: {}", path_output, e))
            })?;
            write_table(&context.categories, file)?;
        }
        None => write_table(&context.categories, std::io::stdout().lock())?,
    }

    tracing::info!(
        "All of `categorize` completed in {:?}",
        before_anything.elapsed()
    );
    Ok(())
}

#[cfg(test)]
mod test {
    use crate::prioritise::conf::Config;
    use crate::prioritise::moi::{GeneCategories, MoiMatcher};
    use crate::prioritise::panelapp::{PanelAppDump, PanelAppIndex};
    use crate::prioritise::panels::GeneId;

    #[test]
    fn write_table() -> Result<(), anyhow::Error> {
        let config = Config::load(
            r#"{
                "flag_name": "PRIORITY",
                "filtering_rules": {
                    "biallelic": {"af": 0.005, "HET": 2, "HOM": 1},
                    "standard_filtering": {"af": 0.01, "HET": 1, "HOM": 1}
                }
            }"#,
        )?;
        let dump: PanelAppDump = serde_json::from_str(
            r#"{
                "HGNC:1": {
                    "gene_symbol": "GENEA",
                    "hgnc_id": "HGNC:1",
                    "mode_of_inheritance": "BIALLELIC, autosomal or pseudoautosomal",
                    "confidence_level": 3
                },
                "HGNC:2": {
                    "gene_symbol": "GENEB",
                    "hgnc_id": "HGNC:2",
                    "mode_of_inheritance": "X-LINKED: hemizygous mutation in males, biallelic mutations in females",
                    "confidence_level": 3
                }
            }"#,
        )?;
        let panelapp = PanelAppIndex::build(&dump, &[], config.min_confidence_level);
        let genes = ["HGNC:1", "HGNC:2", "HGNC:9"]
            .into_iter()
            .map(GeneId::from)
            .collect();
        let categories = GeneCategories::build(&genes, &panelapp, &MoiMatcher::new()?, &config);

        let mut buf = Vec::new();
        super::write_table(&categories, &mut buf)?;

        insta::assert_snapshot!(String::from_utf8(buf)?, @r###"
        hgnc_id	gene_symbol	category	rule	af_threshold	het_required	hom_required	mode_of_inheritance
        HGNC:1	GENEA	BIALLELIC	biallelic	0.005	2	1	BIALLELIC, autosomal or pseudoautosomal
        HGNC:2	GENEB	XLR	standard_filtering	0.01	1	1	X-LINKED: hemizygous mutation in males, biallelic mutations in females
        HGNC:9	.	NONE	.				.
        "###);

        Ok(())
    }
}
