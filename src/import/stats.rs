use std::sync::LazyLock;
use regex::Regex;

use crate::{
    db::GenomeStat,
    error::RowError,
};

static STAT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([^:]+):\s+(.+)$").expect("valid stat line pattern")
});

fn int(value: &str) -> Result<i64, String> {
    value.parse::<i64>()
        .or_else(|_| value.parse::<f64>().map(|v| v.round() as i64))
        .map_err(|_| format!("`{value}` is not a number"))
}

fn real(value: &str) -> Result<f64, String> {
    value.parse::<f64>().map_err(|_| format!("`{value}` is not a number"))
}

// Ok(false) means the key is not a stat we keep
fn set_field(stat: &mut GenomeStat, key: &str, value: &str) -> Result<bool, String> {
    match key {
        "nof_genes" => stat.nof_genes = Some(int(value)?),
        "nof_coding_genes" => stat.nof_coding_genes = Some(int(value)?),
        "nof_noncoding_genes" => stat.nof_noncoding_genes = Some(int(value)?),
        "nof_pseudogenes" => stat.nof_pseudogenes = Some(int(value)?),
        "nof_pseudochr" => stat.nof_pseudochr = Some(int(value)?),
        "nof_regions" => stat.nof_regions = Some(int(value)?),
        "nof_genes_with_mult_cds" => stat.nof_genes_with_mult_cds = Some(int(value)?),
        "nof_genes_with_function" => stat.nof_genes_with_function = Some(int(value)?),
        "nof_trnas" => stat.nof_trnas = Some(int(value)?),
        "nof_rrnas" => stat.nof_rrnas = Some(int(value)?),
        "nof_snrnas" => stat.nof_snrnas = Some(int(value)?),
        "nof_snornas" => stat.nof_snornas = Some(int(value)?),
        "nof_ncrnas" => stat.nof_ncrnas = Some(int(value)?),
        "total_coding_length" => stat.total_coding_length = Some(int(value)?),
        "gc_overall" => stat.gc_overall = Some(real(value)?),
        "gc_coding" => stat.gc_coding = Some(real(value)?),
        "gene_density" => stat.gene_density = Some(real(value)?),
        "avg_gene_length" => stat.avg_gene_length = Some(real(value)?),
        "avg_protein_length" => stat.avg_protein_length = Some(real(value)?),
        "avg_exons_per_gene" => stat.avg_exons_per_gene = Some(real(value)?),
        "avg_coding_length" => stat.avg_coding_length = Some(real(value)?),
        _ => return Ok(false),
    }
    Ok(true)
}

// `Key: value` per line; unknown keys and non-matching lines are ignored
pub fn parse_stats(job_id: &str, text: &str) -> (GenomeStat, Vec<RowError>) {
    let mut stat = GenomeStat::new(job_id);
    let mut errors = vec![];
    for (index, line) in text.lines().enumerate() {
        let Some(caps) = STAT_LINE.captures(line.trim_end()) else {
            continue
        };
        let key = caps[1].trim();
        let value = caps[2].trim();
        if let Err(reason) = set_field(&mut stat, key, value) {
            errors.push(RowError::new(index + 1, format!("{key}: {reason}")));
        }
    }
    (stat, errors)
}
