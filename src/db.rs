use serde::{
    Serialize, Deserialize
};
use uuid::Uuid;
use xxhash_rust::xxh3::xxh3_128;

// database models for the results of a run, all linked to their job by `job_id`

pub fn new_record_id() -> String {
    Uuid::new_v4().simple().to_string()
}

// larger contents do not fit in one mongodb document and go to gridfs
pub const INLINE_CONTENT_LIMIT: usize = 15 * 1024 * 1024;

// hex encoded xxh3-128 digest
pub fn checksum(content: &[u8]) -> String {
    hex::encode(xxh3_128(content).to_be_bytes())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultFile {
    pub id: String,

    pub job_id: String,

    pub name: String,

    #[serde(with = "serde_bytes")]
    pub content: Vec<u8>,

    pub checksum: String,

    pub size: u64,

    // content lives outside the record, keyed by the record id
    #[serde(default)]
    pub external: bool,
}

impl ResultFile {
    pub fn new(job_id: &str, name: &str, content: Vec<u8>) -> Self {
        Self {
            id: new_record_id(),
            job_id: job_id.to_string(),
            name: name.to_string(),
            checksum: checksum(&content),
            size: content.len() as u64,
            content: content,
            external: false,
        }
    }

    pub fn needs_external_storage(&self) -> bool {
        self.content.len() > INLINE_CONTENT_LIMIT
    }

    // takes the content out, size and checksum still describe it
    pub fn detach_content(&mut self) -> Vec<u8> {
        self.external = true;
        std::mem::take(&mut self.content)
    }

    pub fn attach_content(&mut self, content: Vec<u8>) {
        self.content = content;
        self.external = false;
    }

    pub fn is_intact(&self) -> bool {
        self.size == self.content.len() as u64 &&
        self.checksum == checksum(&self.content)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircosImage {
    pub id: String,

    pub job_id: String,

    pub chromosome: String,

    #[serde(with = "serde_bytes")]
    pub content: Vec<u8>,
}

// summary numbers of an annotation; only what the stats file mentions is set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenomeStat {
    pub job_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nof_genes: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nof_coding_genes: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nof_noncoding_genes: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nof_pseudogenes: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nof_pseudochr: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nof_regions: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nof_genes_with_mult_cds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nof_genes_with_function: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nof_trnas: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nof_rrnas: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nof_snrnas: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nof_snornas: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nof_ncrnas: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_coding_length: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gc_overall: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gc_coding: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gene_density: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_gene_length: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_protein_length: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_exons_per_gene: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_coding_length: Option<f64>,
}

impl GenomeStat {
    pub fn new(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            ..Default::default()
        }
    }

    // a run that finished without producing any annotation
    pub fn empty(job_id: &str) -> Self {
        Self {
            nof_genes: Some(0),
            ..Self::new(job_id)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gene {
    pub id: String,

    pub gene_id: String,

    pub gtype: String,

    pub product: String,

    pub seqid: String,

    pub loc_start: u64,

    pub loc_end: u64,

    pub strand: String,

    pub species: String,

    pub section: String,

    // none for reference genes shared by all jobs
    pub job_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: String,

    pub cluster_id: String,

    pub job_id: String,

    // record ids of member genes
    pub gene_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
    pub id: String,

    pub job_id: String,

    // raw alignment
    pub alignment: String,

    pub gene_ids: Vec<String>,
}
