//! Common utility code for noodles.

use std::io::BufRead;
use std::path::Path;

use indexmap::IndexMap;
use noodles_vcf as vcf;
use vcf::header::record::value::map::info::{Number, Type};
use vcf::header::record::value::{map::Info, Map};
use vcf::variant::record_buf::info::field::{value::Array, Value};

/// VCF reader as returned by `open_vcf_reader`.
pub type VcfReader = vcf::io::Reader<Box<dyn BufRead>>;

/// VCF writer as returned by `open_vcf_writer`.
pub type VcfWriter = vcf::io::Writer<Box<dyn std::io::Write>>;

/// Open VCF file at `path` (plain, gzip or BGZF) and read its header.
pub fn open_vcf_reader<P: AsRef<Path>>(path: P) -> Result<(VcfReader, vcf::Header), anyhow::Error> {
    let mut reader = vcf::io::reader::Builder::default()
        .build_from_path(path.as_ref())
        .map_err(|e| anyhow::anyhow!("could not open VCF file {:?}: {}", path.as_ref(), e))?;
    let header = reader
        .read_header()
        .map_err(|e| anyhow::anyhow!("could not read VCF header of {:?}: {}", path.as_ref(), e))?;
    Ok((reader, header))
}

/// Open VCF file at `path` for writing; `.gz` files are written as BGZF.
pub fn open_vcf_writer<P: AsRef<Path>>(path: P) -> Result<VcfWriter, anyhow::Error> {
    vcf::io::writer::Builder::default()
        .build_from_path(path.as_ref())
        .map_err(|e| anyhow::anyhow!("could not open VCF file {:?} for writing: {}", path.as_ref(), e))
}

/// Read up to `batch_size` raw record lines; an empty result signals the end
/// of input.
///
/// Lines are decoded separately with `decode_record` so that one malformed
/// record does not stop the stream.
pub fn read_batch(reader: &mut VcfReader, batch_size: usize) -> Result<Vec<String>, anyhow::Error> {
    let mut result = Vec::with_capacity(batch_size);
    while result.len() < batch_size {
        let mut line = String::new();
        let bytes_read = reader
            .get_mut()
            .read_line(&mut line)
            .map_err(|e| anyhow::anyhow!("problem reading VCF record: {}", e))?;
        if bytes_read == 0 {
            break; // EOF
        }
        let line = line.trim_end_matches(|c: char| c == '\n' || c == '\r');
        if !line.is_empty() {
            result.push(line.to_string());
        }
    }
    Ok(result)
}

/// Decode one raw record line against `header`.
pub fn decode_record(
    header: &vcf::Header,
    line: &str,
) -> Result<vcf::variant::RecordBuf, anyhow::Error> {
    let mut reader = vcf::io::Reader::new(line.as_bytes());
    let mut record = vcf::variant::RecordBuf::default();
    reader
        .read_record_buf(header, &mut record)
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    Ok(record)
}

/// Copy of `header` that declares the INFO fields `keys` as `Number=.,Type=String`.
///
/// Decoding against it keeps values that do not match the declared type,
/// e.g., `abc` or `0.001&0.002` in a `Type=Float` field, as text.
pub fn relax_info_header(header: &vcf::Header, keys: &[&str]) -> vcf::Header {
    let mut result = header.clone();
    for key in keys {
        let description = header
            .infos()
            .get(*key)
            .map(|info| info.description().to_string())
            .unwrap_or_default();
        result.infos_mut().insert(
            key.to_string(),
            Map::<Info>::new(Number::Unknown, Type::String, description),
        );
    }
    result
}

/// Add a `Number=1,Type=String` INFO definition, replacing one with the same key.
pub fn upsert_info_header(header: &mut vcf::Header, key: &str, description: &str) {
    header.infos_mut().insert(
        key.to_string(),
        Map::<Info>::new(Number::Count(1), Type::String, description),
    );
}

/// Whether the FILTER column is exactly `PASS`.
pub fn is_filter_pass(record: &vcf::variant::RecordBuf) -> bool {
    let filters = record.filters().as_ref();
    filters.len() == 1 && filters.contains("PASS")
}

/// Render the non-missing values of INFO field `key` as strings.
///
/// Returns an empty list if the field is absent or has no value.
pub fn info_texts(record: &vcf::variant::RecordBuf, key: &str) -> Vec<String> {
    let Some(Some(value)) = record.info().get(key) else {
        return Vec::new();
    };
    match value {
        Value::Integer(value) => vec![value.to_string()],
        Value::Float(value) => vec![value.to_string()],
        Value::Flag => Vec::new(),
        Value::Character(value) => vec![value.to_string()],
        Value::String(value) => vec![value.clone()],
        Value::Array(Array::Integer(values)) => values.iter().flatten().map(i32::to_string).collect(),
        Value::Array(Array::Float(values)) => values.iter().flatten().map(f32::to_string).collect(),
        Value::Array(Array::Character(values)) => {
            values.iter().flatten().map(char::to_string).collect()
        }
        Value::Array(Array::String(values)) => values.iter().flatten().cloned().collect(),
    }
}

/// Set the string INFO field `key`, or remove it if `value` is `None`.
///
/// Existing fields keep their position.
pub fn set_info_string(record: &mut vcf::variant::RecordBuf, key: &str, value: Option<String>) {
    let info: &mut IndexMap<String, Option<Value>> = record.info_mut().as_mut();
    match value {
        Some(value) => {
            info.insert(key.to_string(), Some(Value::String(value)));
        }
        None => {
            info.shift_remove(key);
        }
    }
}

/// Split a genotype string such as `0/1` or `1|.` into allele indices.
pub fn parse_genotype(gt: &str) -> Vec<Option<usize>> {
    gt.split(|c: char| c == '/' || c == '|')
        .map(|allele| allele.parse::<usize>().ok())
        .collect()
}

/// Allele indices of the genotype of the sample at `sample_idx`.
///
/// `None` entries are no-calls; returns `None` if there is no genotype.
pub fn genotype_alleles(
    record: &vcf::variant::RecordBuf,
    sample_idx: usize,
) -> Option<Vec<Option<usize>>> {
    use vcf::variant::record::samples::keys::key;
    use vcf::variant::record_buf::samples::sample::Value;

    let sample = record.samples().get_index(sample_idx)?;
    match sample.get(key::GENOTYPE) {
        Some(Some(Value::Genotype(gt))) => Some(
            gt.as_ref()
                .iter()
                .map(|allele| allele.position())
                .collect(),
        ),
        Some(Some(Value::String(gt))) => Some(parse_genotype(gt)),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    const VCF: &str = "\
##fileformat=VCFv4.2
##FILTER=<ID=PASS,Description=\"All filters passed\">
##FILTER=<ID=EXCLUDE,Description=\"Excluded\">
##INFO=<ID=CSQ_SYMBOL,Number=.,Type=String,Description=\"Gene symbol\">
##INFO=<ID=CSQ_gnomADe_AF,Number=.,Type=Float,Description=\"gnomAD exomes AF\">
##INFO=<ID=CSQ_gnomADg_AF,Number=.,Type=String,Description=\"gnomAD genomes AF\">
##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">
##contig=<ID=1>
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tSAMPLE1\tSAMPLE2
1\t100\t.\tA\tG\t50\tPASS\tCSQ_SYMBOL=GENEA;CSQ_gnomADe_AF=0.001,0.002;CSQ_gnomADg_AF=0.003&0.004\tGT\t0/1\t1|1
1\t200\t.\tC\tT\t50\tEXCLUDE\t.\tGT\t./.\t0/0
";

    fn read_records(
        path: &std::path::Path,
        batch_size: usize,
    ) -> Result<Vec<noodles_vcf::variant::RecordBuf>, anyhow::Error> {
        let (mut reader, header) = super::open_vcf_reader(path)?;
        super::read_batch(&mut reader, batch_size)?
            .iter()
            .map(|line| super::decode_record(&header, line))
            .collect()
    }

    fn write_vcf(tmp_dir: &temp_testdir::TempDir) -> std::path::PathBuf {
        let path = tmp_dir.join("input.vcf");
        std::fs::write(&path, VCF).unwrap();
        path
    }

    #[test]
    fn read_and_inspect_records() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let records = read_records(&write_vcf(&tmp_dir), 10)?;

        assert_eq!(records.len(), 2);
        assert!(super::is_filter_pass(&records[0]));
        assert!(!super::is_filter_pass(&records[1]));
        assert_eq!(super::info_texts(&records[0], "CSQ_SYMBOL"), vec!["GENEA"]);
        assert_eq!(
            super::info_texts(&records[0], "CSQ_gnomADe_AF"),
            vec!["0.001", "0.002"]
        );
        assert_eq!(
            super::info_texts(&records[0], "CSQ_gnomADg_AF"),
            vec!["0.003&0.004"]
        );
        assert!(super::info_texts(&records[1], "CSQ_SYMBOL").is_empty());
        assert_eq!(
            super::genotype_alleles(&records[0], 0),
            Some(vec![Some(0), Some(1)])
        );
        assert_eq!(
            super::genotype_alleles(&records[0], 1),
            Some(vec![Some(1), Some(1)])
        );
        assert_eq!(super::genotype_alleles(&records[1], 0), Some(vec![None, None]));
        assert_eq!(super::genotype_alleles(&records[1], 5), None);

        Ok(())
    }

    #[test]
    fn read_batches() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let (mut reader, _) = super::open_vcf_reader(write_vcf(&tmp_dir))?;

        let first = super::read_batch(&mut reader, 1)?;
        assert_eq!(first.len(), 1);
        assert!(first[0].starts_with("1\t100\t"));
        assert_eq!(super::read_batch(&mut reader, 1)?.len(), 1);
        assert!(super::read_batch(&mut reader, 1)?.is_empty());

        Ok(())
    }

    #[test]
    fn set_info_string() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let mut record = read_records(&write_vcf(&tmp_dir), 1)?.remove(0);

        super::set_info_string(&mut record, "PRIORITY", Some("PRIORITISED".into()));
        super::set_info_string(&mut record, "CSQ_SYMBOL", Some("GENEB".into()));
        super::set_info_string(&mut record, "CSQ_gnomADe_AF", None);

        let keys = record.info().as_ref().keys().cloned().collect::<Vec<_>>();
        assert_eq!(keys, vec!["CSQ_SYMBOL", "CSQ_gnomADg_AF", "PRIORITY"]);
        assert_eq!(super::info_texts(&record, "CSQ_SYMBOL"), vec!["GENEB"]);
        assert_eq!(super::info_texts(&record, "PRIORITY"), vec!["PRIORITISED"]);

        Ok(())
    }

    #[test]
    fn upsert_info_header() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let (_, mut header) = super::open_vcf_reader(write_vcf(&tmp_dir))?;

        super::upsert_info_header(&mut header, "PRIORITY", "first");
        super::upsert_info_header(&mut header, "PRIORITY", "second");

        let info = header.infos().get("PRIORITY").expect("inserted");
        assert_eq!(info.description(), "second");
        assert_eq!(header.infos().len(), 4);

        Ok(())
    }

    #[test]
    fn decode_malformed_float_as_text() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let path = tmp_dir.join("float.vcf");
        std::fs::write(
            &path,
            "##fileformat=VCFv4.2\n\
             ##INFO=<ID=AF,Number=A,Type=Float,Description=\"Allele frequency\">\n\
             ##INFO=<ID=DP,Number=1,Type=Integer,Description=\"Depth\">\n\
             #CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n\
             1\t100\t.\tA\tG\t50\tPASS\tAF=abc\n\
             1\t200\t.\tA\tG\t50\tPASS\tAF=0.001&0.002\n\
             1\t300\t.\tA\tG\t50\tPASS\tAF=0.1;DP=high\n",
        )?;
        let (mut reader, header) = super::open_vcf_reader(&path)?;
        let lines = super::read_batch(&mut reader, 10)?;
        assert_eq!(lines.len(), 3);

        assert!(super::decode_record(&header, &lines[0]).is_err());
        let relaxed = super::relax_info_header(&header, &["AF"]);

        let first = super::decode_record(&relaxed, &lines[0])?;
        assert_eq!(super::info_texts(&first, "AF"), vec!["abc"]);
        let second = super::decode_record(&relaxed, &lines[1])?;
        assert_eq!(super::info_texts(&second, "AF"), vec!["0.001&0.002"]);
        assert!(super::decode_record(&relaxed, &lines[2]).is_err());
        assert_eq!(
            relaxed.infos().get("AF").map(|info| info.description()),
            Some("Allele frequency")
        );

        Ok(())
    }
}
