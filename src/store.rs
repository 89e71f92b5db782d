use std::{
    collections::HashMap,
    sync::Mutex,
};
use async_trait::async_trait;
use anyhow::anyhow;

use crate::{
    db::{
        CircosImage, Cluster, Gene, GenomeStat, ResultFile, Tree,
    },
    job::{
        Job, Reference,
    },
};

// upper bound on candidates returned for one membership lookup
pub const MAX_PREFIX_CANDIDATES: usize = 64;

// which genes a membership lookup may see
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneScope<'a> {
    // genes imported for this job
    Job(&'a str),

    // reference genes with no job
    Global,
}

// persistence contract the worker needs; the schema itself is owned elsewhere
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: &Job) -> anyhow::Result<()>;

    async fn load(&self, id: &str) -> anyhow::Result<Job>;

    async fn persist(&self, job: &Job) -> anyhow::Result<()>;

    async fn load_reference(&self, id: &str) -> anyhow::Result<Reference>;

    async fn add_result_file(&self, file: ResultFile) -> anyhow::Result<()>;

    async fn add_circos_image(&self, image: CircosImage) -> anyhow::Result<()>;

    // replaces any stat already linked to the job
    async fn set_genome_stat(&self, stat: GenomeStat) -> anyhow::Result<()>;

    // one round trip for the whole batch
    async fn insert_genes(&self, genes: Vec<Gene>) -> anyhow::Result<usize>;

    // genes in `scope` whose gene_id starts with `prefix`, shortest id first
    // and ties by id, at most MAX_PREFIX_CANDIDATES
    async fn genes_with_prefix(
        &self,
        scope: GeneScope<'_>,
        prefix: &str,
    ) -> anyhow::Result<Vec<Gene>>;

    async fn add_cluster(&self, cluster: Cluster) -> anyhow::Result<()>;

    // replaces any tree already linked to the job
    async fn set_tree(&self, tree: Tree) -> anyhow::Result<()>;

    async fn result_files(&self, job_id: &str) -> anyhow::Result<Vec<ResultFile>>;

    async fn circos_images(&self, job_id: &str) -> anyhow::Result<Vec<CircosImage>>;

    async fn genome_stat(&self, job_id: &str) -> anyhow::Result<Option<GenomeStat>>;

    async fn genes(&self, job_id: &str) -> anyhow::Result<Vec<Gene>>;

    async fn clusters(&self, job_id: &str) -> anyhow::Result<Vec<Cluster>>;

    async fn tree(&self, job_id: &str) -> anyhow::Result<Option<Tree>>;
}

#[derive(Debug, Default)]
struct Tables {
    jobs: HashMap<String, Job>,
    references: HashMap<String, Reference>,
    result_files: Vec<ResultFile>,
    circos_images: Vec<CircosImage>,
    genome_stats: HashMap<String, GenomeStat>,
    genes: Vec<Gene>,
    clusters: Vec<Cluster>,
    trees: HashMap<String, Tree>,
}

// process local store, handy for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    tables: Mutex<Tables>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_reference(&self, reference: Reference) {
        self.lock().references.insert(reference.id.clone(), reference);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        // a panicked writer leaves plain data behind, keep going
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &Job) -> anyhow::Result<()> {
        let mut tables = self.lock();
        if tables.jobs.contains_key(&job.id) {
            return Err(anyhow!("Job `{}` already exists", job.id));
        }
        tables.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn load(&self, id: &str) -> anyhow::Result<Job> {
        self.lock()
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("No such job: `{id}`"))
    }

    async fn persist(&self, job: &Job) -> anyhow::Result<()> {
        self.lock().jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn load_reference(&self, id: &str) -> anyhow::Result<Reference> {
        self.lock()
            .references
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("No such reference: `{id}`"))
    }

    async fn add_result_file(&self, file: ResultFile) -> anyhow::Result<()> {
        self.lock().result_files.push(file);
        Ok(())
    }

    async fn add_circos_image(&self, image: CircosImage) -> anyhow::Result<()> {
        self.lock().circos_images.push(image);
        Ok(())
    }

    async fn set_genome_stat(&self, stat: GenomeStat) -> anyhow::Result<()> {
        self.lock().genome_stats.insert(stat.job_id.clone(), stat);
        Ok(())
    }

    async fn insert_genes(&self, genes: Vec<Gene>) -> anyhow::Result<usize> {
        let count = genes.len();
        self.lock().genes.extend(genes);
        Ok(count)
    }

    async fn genes_with_prefix(
        &self,
        scope: GeneScope<'_>,
        prefix: &str,
    ) -> anyhow::Result<Vec<Gene>> {
        let tables = self.lock();
        let mut candidates: Vec<Gene> = tables.genes
            .iter()
            .filter(|g| match scope {
                GeneScope::Job(job_id) => g.job_id.as_deref() == Some(job_id),
                GeneScope::Global => g.job_id.is_none(),
            })
            .filter(|g| g.gene_id.starts_with(prefix))
            .cloned()
            .collect();
        candidates.sort_by(|a, b|
            a.gene_id.len()
                .cmp(&b.gene_id.len())
                .then_with(|| a.gene_id.cmp(&b.gene_id))
        );
        candidates.truncate(MAX_PREFIX_CANDIDATES);
        Ok(candidates)
    }

    async fn add_cluster(&self, cluster: Cluster) -> anyhow::Result<()> {
        self.lock().clusters.push(cluster);
        Ok(())
    }

    async fn set_tree(&self, tree: Tree) -> anyhow::Result<()> {
        self.lock().trees.insert(tree.job_id.clone(), tree);
        Ok(())
    }

    async fn result_files(&self, job_id: &str) -> anyhow::Result<Vec<ResultFile>> {
        Ok(
            self.lock()
                .result_files
                .iter()
                .filter(|f| f.job_id == job_id)
                .cloned()
                .collect()
        )
    }

    async fn circos_images(&self, job_id: &str) -> anyhow::Result<Vec<CircosImage>> {
        Ok(
            self.lock()
                .circos_images
                .iter()
                .filter(|i| i.job_id == job_id)
                .cloned()
                .collect()
        )
    }

    async fn genome_stat(&self, job_id: &str) -> anyhow::Result<Option<GenomeStat>> {
        Ok(self.lock().genome_stats.get(job_id).cloned())
    }

    async fn genes(&self, job_id: &str) -> anyhow::Result<Vec<Gene>> {
        Ok(
            self.lock()
                .genes
                .iter()
                .filter(|g| g.job_id.as_deref() == Some(job_id))
                .cloned()
                .collect()
        )
    }

    async fn clusters(&self, job_id: &str) -> anyhow::Result<Vec<Cluster>> {
        Ok(
            self.lock()
                .clusters
                .iter()
                .filter(|c| c.job_id == job_id)
                .cloned()
                .collect()
        )
    }

    async fn tree(&self, job_id: &str) -> anyhow::Result<Option<Tree>> {
        Ok(self.lock().trees.get(job_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::new_record_id;

    fn gene(gene_id: &str, job_id: Option<&str>) -> Gene {
        Gene {
            id: new_record_id(),
            gene_id: gene_id.to_string(),
            gtype: "gene".to_string(),
            product: String::new(),
            seqid: "chr1".to_string(),
            loc_start: 1,
            loc_end: 10,
            strand: "+".to_string(),
            species: "PFA".to_string(),
            section: "Apicomplexa".to_string(),
            job_id: job_id.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn prefix_lookup_respects_scope() {
        let store = MemoryJobStore::new();
        store.insert_genes(vec![
            gene("PFA_0001", Some("j1")),
            gene("PFA_0001", Some("j2")),
            gene("PFA_0001.1", None),
        ]).await.unwrap();
        let own = store.genes_with_prefix(GeneScope::Job("j1"), "PFA_0001").await.unwrap();
        assert_eq!(own.len(), 1);
        assert_eq!(own[0].job_id.as_deref(), Some("j1"));
        let global = store.genes_with_prefix(GeneScope::Global, "PFA_").await.unwrap();
        assert_eq!(global.len(), 1);
        assert!(global[0].job_id.is_none());
    }

    #[tokio::test]
    async fn capped_lookup_keeps_shortest_ids() {
        let store = MemoryJobStore::new();
        let mut genes: Vec<Gene> = (1..=100)
            .map(|n| gene(&format!("X_{n:04}"), None))
            .collect();
        genes.push(gene("X_0", None));
        store.insert_genes(genes).await.unwrap();
        let found = store.genes_with_prefix(GeneScope::Global, "X_0").await.unwrap();
        assert_eq!(found.len(), MAX_PREFIX_CANDIDATES);
        assert_eq!(found[0].gene_id, "X_0");
        assert_eq!(found[1].gene_id, "X_0001");
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let store = MemoryJobStore::new();
        let job = Job::new("r1", "PFA", "/uploads/seq.fasta");
        store.insert(&job).await.unwrap();
        assert!(store.insert(&job).await.is_err());
        assert!(store.load("nope").await.is_err());
    }
}
