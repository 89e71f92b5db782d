//! Structured import of the pipeline's text outputs into linked records.
//!
//! Each import is independent: a missing file means there is nothing to
//! import, unusable rows and unresolvable gene references are logged and
//! skipped. Only store failures and unreadable files surface as errors.

pub mod clusters;
pub mod genes;
pub mod stats;
pub mod tree;

use std::{
    collections::HashMap,
    path::Path,
};
use anyhow::Context;
use log::{info, warn};

use crate::{
    db::{
        new_record_id, Cluster, Gene, Tree,
    },
    store::{
        GeneScope, JobStore,
    },
};

pub const STATS_FILE: &str = "stats.txt";
pub const GENE_LIST_FILE: &str = "genelist.csv";
pub const CLUSTER_FILE: &str = "orthomcl_out";
pub const TREE_SELECTION_FILE: &str = "tree_selection.genes";
pub const TREE_ALIGNMENT_FILE: &str = "tree.aln";

// outcome of one import step
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,

    // rows or references that could not be used
    pub skipped: usize,
}

async fn read_text(path: &Path) -> anyhow::Result<Option<String>> {
    if !path.exists() {
        return Ok(None)
    }
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read `{}`", path.display()))?;
    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}

// shortest id wins: the member covers most of it
fn best_candidate(stripped: &str, candidates: Vec<Gene>) -> Option<Gene> {
    candidates
        .into_iter()
        .filter(|g| g.gene_id.starts_with(stripped))
        .min_by(|a, b|
            a.gene_id.len()
                .cmp(&b.gene_id.len())
                .then_with(|| a.gene_id.cmp(&b.gene_id))
        )
}

// maps membership ids to gene records of the job, falling back to reference genes
pub struct GeneResolver<'a> {
    store: &'a dyn JobStore,
    job_id: &'a str,
    // <member, record id>
    cache: HashMap<String, Option<String>>,
}

impl<'a> GeneResolver<'a> {
    pub fn new(store: &'a dyn JobStore, job_id: &'a str) -> Self {
        Self {
            store: store,
            job_id: job_id,
            cache: HashMap::new(),
        }
    }

    // an exact id match on any qualifier variant wins, then the best prefix
    // match with the fewest qualifiers dropped; job genes before reference genes
    pub async fn resolve(&mut self, member: &str) -> anyhow::Result<Option<String>> {
        if let Some(hit) = self.cache.get(member) {
            return Ok(hit.clone())
        }
        let mut lookups = vec![];
        for id in clusters::qualifier_variants(member) {
            for scope in [GeneScope::Job(self.job_id), GeneScope::Global] {
                let candidates = self.store
                    .genes_with_prefix(scope, &id)
                    .await?;
                if let Some(gene) = candidates.iter().find(|g| g.gene_id == id) {
                    let found = Some(gene.id.clone());
                    self.cache.insert(member.to_string(), found.clone());
                    return Ok(found)
                }
                lookups.push((id.clone(), candidates));
            }
        }
        let found = lookups
            .into_iter()
            .find_map(|(id, candidates)| best_candidate(&id, candidates))
            .map(|gene| gene.id);
        if found.is_none() {
            warn!(
                "{member} (with job ID {}) not found!",
                self.job_id
            );
        }
        self.cache.insert(member.to_string(), found.clone());
        Ok(found)
    }
}

pub struct Importer<'a> {
    store: &'a dyn JobStore,
    job_id: &'a str,
}

impl<'a> Importer<'a> {
    pub fn new(store: &'a dyn JobStore, job_id: &'a str) -> Self {
        Self {
            store: store,
            job_id: job_id,
        }
    }

    pub async fn import_stats(&self, path: &Path) -> anyhow::Result<Option<ImportReport>> {
        let Some(text) = read_text(path).await? else {
            return Ok(None)
        };
        let (stat, errors) = stats::parse_stats(self.job_id, &text);
        for e in errors.iter() {
            warn!("Ignored stat of job `{}`, {e}", self.job_id);
        }
        self.store
            .set_genome_stat(stat)
            .await
            .context("Failed to save genome stats")?;
        Ok(Some(ImportReport {
            imported: 1,
            skipped: errors.len(),
        }))
    }

    pub async fn import_genes(
        &self,
        path: &Path,
        species: &str,
        section: &str,
    ) -> anyhow::Result<Option<ImportReport>> {
        let Some(text) = read_text(path).await? else {
            return Ok(None)
        };
        let (rows, errors) = genes::parse_gene_list(&text);
        for e in errors.iter() {
            warn!("Skipped gene row of job `{}`, {e}", self.job_id);
        }
        let batch: Vec<Gene> = rows.into_iter()
            .map(|row| Gene {
                id: new_record_id(),
                gene_id: row.gene_id,
                gtype: row.gtype,
                product: row.product,
                seqid: row.seqid,
                loc_start: row.start,
                loc_end: row.stop,
                strand: row.strand,
                species: species.to_string(),
                section: section.to_string(),
                job_id: Some(self.job_id.to_string()),
            })
            .collect();
        let imported = self.store
            .insert_genes(batch)
            .await
            .context("Failed to insert genes")?;
        info!(
            "Imported `{imported}` genes for job `{}`, `{}` rows skipped.",
            self.job_id,
            errors.len()
        );
        Ok(Some(ImportReport {
            imported: imported,
            skipped: errors.len(),
        }))
    }

    pub async fn import_clusters(&self, path: &Path) -> anyhow::Result<Option<ImportReport>> {
        let Some(text) = read_text(path).await? else {
            return Ok(None)
        };
        let mut resolver = GeneResolver::new(self.store, self.job_id);
        let mut report = ImportReport::default();
        for line in text.lines() {
            let Some(parsed) = clusters::parse_cluster_line(line) else {
                continue
            };
            let mut gene_ids = Vec::with_capacity(parsed.members.len());
            for member in parsed.members.iter() {
                match resolver.resolve(member).await? {
                    Some(id) => gene_ids.push(id),
                    None => report.skipped += 1,
                }
            }
            self.store
                .add_cluster(Cluster {
                    id: new_record_id(),
                    cluster_id: parsed.cluster_id.clone(),
                    job_id: self.job_id.to_string(),
                    gene_ids: gene_ids,
                })
                .await
                .with_context(|| format!("Failed to save cluster `{}`", parsed.cluster_id))?;
            report.imported += 1;
        }
        info!(
            "Imported `{}` clusters for job `{}`, `{}` members unresolved.",
            report.imported,
            self.job_id,
            report.skipped
        );
        Ok(Some(report))
    }

    // needs both the alignment and the member selection
    pub async fn import_tree(
        &self,
        alignment_path: &Path,
        selection_path: &Path,
    ) -> anyhow::Result<Option<ImportReport>> {
        if !alignment_path.exists() || !selection_path.exists() {
            return Ok(None)
        }
        let (Some(alignment), Some(selection)) = (
            read_text(alignment_path).await?,
            read_text(selection_path).await?,
        ) else {
            return Ok(None)
        };
        let mut resolver = GeneResolver::new(self.store, self.job_id);
        let mut report = ImportReport::default();
        let mut gene_ids = vec![];
        for member in tree::parse_tree_selection(&selection) {
            match resolver.resolve(&member).await? {
                Some(id) => {
                    gene_ids.push(id);
                    report.imported += 1;
                },
                None => report.skipped += 1,
            }
        }
        self.store
            .set_tree(Tree {
                id: new_record_id(),
                job_id: self.job_id.to_string(),
                alignment: alignment,
                gene_ids: gene_ids,
            })
            .await
            .context("Failed to save tree")?;
        Ok(Some(report))
    }
}
