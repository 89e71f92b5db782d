use crate::error::RowError;

// one row of the pipeline's gene list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneRow {
    pub gene_id: String,
    pub gtype: String,
    pub product: String,
    pub seqid: String,
    pub start: u64,
    pub stop: u64,
    pub strand: String,
}

const COLUMNS: usize = 7;

fn coordinate(line: usize, name: &str, value: &str) -> Result<u64, RowError> {
    value.trim()
        .parse::<u64>()
        .map_err(|_| RowError::new(line, format!("{name} `{value}` is not a coordinate")))
}

// id, type, product, seqid, start, stop, strand separated by tabs
pub fn parse_gene_row(line: usize, raw: &str) -> Result<GeneRow, RowError> {
    let fields: Vec<&str> = raw.split('\t').collect();
    if fields.len() != COLUMNS {
        return Err(RowError::new(
            line,
            format!("expected {COLUMNS} columns, found {}", fields.len())
        ))
    }
    if fields[0].trim().is_empty() {
        return Err(RowError::new(line, "empty gene id"))
    }
    Ok(GeneRow {
        gene_id: fields[0].trim().to_string(),
        gtype: fields[1].to_string(),
        product: fields[2].to_string(),
        seqid: fields[3].to_string(),
        start: coordinate(line, "start", fields[4])?,
        stop: coordinate(line, "stop", fields[5])?,
        strand: fields[6].trim().to_string(),
    })
}

pub fn parse_gene_list(text: &str) -> (Vec<GeneRow>, Vec<RowError>) {
    let mut rows = vec![];
    let mut errors = vec![];
    for (index, line) in text.lines().enumerate() {
        let line_no = index + 1;
        let raw = line.trim_end_matches('\r');
        if raw.trim().is_empty() {
            continue
        }
        match parse_gene_row(line_no, raw) {
            Ok(row) => rows.push(row),
            Err(e) => errors.push(e),
        }
    }
    (rows, errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_rows_parse() {
        let text = "PFA_0001\tgene\tconserved protein\tPFA_01\t100\t900\t+\n\
                    PFA_0002\tpseudogene\t\tPFA_01\t1200\t1500\t-\r\n\
                    \n";
        let (rows, errors) = parse_gene_list(text);
        assert!(errors.is_empty());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].product, "conserved protein");
        assert_eq!(rows[1].product, "");
        assert_eq!(rows[1].strand, "-");
        assert_eq!((rows[1].start, rows[1].stop), (1200, 1500));
    }

    #[test]
    fn malformed_rows_are_reported_not_fatal() {
        let text = "PFA_0001\tgene\tp\tPFA_01\t100\t900\t+\n\
                    PFA_0002\tgene\tp\tPFA_01\t100\n\
                    PFA_0003\tgene\tp\tPFA_01\tabc\t900\t+\n\
                    PFA_0004\tgene\tp\tPFA_01\t5\t50\t-\n";
        let (rows, errors) = parse_gene_list(text);
        assert_eq!(rows.len(), 2);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].line, 2);
        assert!(errors[1].reason.contains("start"));
    }
}
