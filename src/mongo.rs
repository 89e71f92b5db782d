use async_trait::async_trait;
use anyhow::Context;
use futures::{
    io::{
        AsyncReadExt,
        AsyncWriteExt,
    },
    TryStreamExt,
};
use log::info;
use mongodb::{
    bson::{
        doc,
        Bson,
        Document,
    },
    gridfs::GridFsBucket,
    options::{
        ClientOptions,
        GridFsBucketOptions,
        ServerApi,
        ServerApiVersion
    },
    Collection,
};

use crate::{
    config::MongoSettings,
    db::{
        CircosImage, Cluster, Gene, GenomeStat, ResultFile, Tree,
    },
    job::{
        Job, Reference,
    },
    store::{
        GeneScope, JobStore, MAX_PREFIX_CANDIDATES,
    },
};

pub async fn mongodb_setup(
    uri: &str,
) -> anyhow::Result<mongodb::Client> {
    info!("Connecting to the MongoDB daemon...");
    let mut client_options = ClientOptions::parse(
        uri
    ).await?;
    let server_api = ServerApi::builder().version(
        ServerApiVersion::V1
    ).build();
    client_options.server_api = Some(server_api);
    let client = mongodb::Client::with_options(client_options)?;
    // Send a ping to confirm a successful connection
    client
        .database("admin")
        .run_command(doc! { "ping": 1 })
        .await?;
    info!("Successfully connected to the MongoDB instance!");
    Ok(client)
}

pub struct MongoJobStore {
    jobs: Collection<Job>,
    references: Collection<Reference>,
    result_files: Collection<ResultFile>,
    circos_images: Collection<CircosImage>,
    genome_stats: Collection<GenomeStat>,
    genes: Collection<Gene>,
    clusters: Collection<Cluster>,
    trees: Collection<Tree>,
    // result file contents too large for a document
    blobs: GridFsBucket,
}

impl MongoJobStore {
    pub async fn connect(settings: &MongoSettings) -> anyhow::Result<Self> {
        let client = mongodb_setup(&settings.uri).await?;
        Ok(Self::new(&client.database(&settings.database)))
    }

    pub fn new(db: &mongodb::Database) -> Self {
        Self {
            jobs: db.collection::<Job>("jobs"),
            references: db.collection::<Reference>("references"),
            result_files: db.collection::<ResultFile>("result_files"),
            circos_images: db.collection::<CircosImage>("circos_images"),
            genome_stats: db.collection::<GenomeStat>("genome_stats"),
            genes: db.collection::<Gene>("genes"),
            clusters: db.collection::<Cluster>("clusters"),
            trees: db.collection::<Tree>("trees"),
            blobs: db.gridfs_bucket(
                GridFsBucketOptions::builder()
                    .bucket_name("result_files".to_string())
                    .build()
            ),
        }
    }
}

fn by_job(job_id: &str) -> Document {
    doc! { "job_id": job_id }
}

// shortest ids first so the cap never hides the best candidate
fn prefix_pipeline(scope: GeneScope<'_>, prefix: &str) -> Vec<Document> {
    let job_filter = match scope {
        GeneScope::Job(job_id) => Bson::String(job_id.to_string()),

        GeneScope::Global => Bson::Null,
    };
    vec![
        doc! {
            "$match": {
                "gene_id": {
                    "$regex": format!("^{}", regex::escape(prefix))
                },
                "job_id": job_filter,
            }
        },
        doc! { "$addFields": { "id_length": { "$strLenCP": "$gene_id" } } },
        doc! { "$sort": { "id_length": 1, "gene_id": 1 } },
        doc! { "$limit": MAX_PREFIX_CANDIDATES as i64 },
        doc! { "$project": { "id_length": 0 } },
    ]
}

#[async_trait]
impl JobStore for MongoJobStore {
    async fn insert(&self, job: &Job) -> anyhow::Result<()> {
        self.jobs
            .insert_one(job)
            .await
            .with_context(|| format!("Failed to insert job `{}`", job.id))?;
        Ok(())
    }

    async fn load(&self, id: &str) -> anyhow::Result<Job> {
        self.jobs
            .find_one(doc! { "id": id })
            .await?
            .ok_or_else(|| anyhow::anyhow!("No such job in db: `{id}`"))
    }

    async fn persist(&self, job: &Job) -> anyhow::Result<()> {
        self.jobs
            .replace_one(doc! { "id": &job.id }, job)
            .upsert(true)
            .await
            .with_context(|| format!("Failed to save job `{}`", job.id))?;
        Ok(())
    }

    async fn load_reference(&self, id: &str) -> anyhow::Result<Reference> {
        self.references
            .find_one(doc! { "id": id })
            .await?
            .ok_or_else(|| anyhow::anyhow!("No such reference in db: `{id}`"))
    }

    async fn add_result_file(&self, mut file: ResultFile) -> anyhow::Result<()> {
        if file.needs_external_storage() {
            let content = file.detach_content();
            let mut upload = self.blobs
                .open_upload_stream(&file.id)
                .await?;
            upload.write_all(&content).await?;
            upload.close().await?;
            info!("Stored `{}` ({} bytes) in gridfs.", file.name, file.size);
        }
        self.result_files
            .insert_one(&file)
            .await
            .with_context(|| format!("Failed to save result file `{}`", file.name))?;
        Ok(())
    }

    async fn add_circos_image(&self, image: CircosImage) -> anyhow::Result<()> {
        self.circos_images.insert_one(image).await?;
        Ok(())
    }

    async fn set_genome_stat(&self, stat: GenomeStat) -> anyhow::Result<()> {
        self.genome_stats
            .replace_one(by_job(&stat.job_id), &stat)
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn insert_genes(&self, genes: Vec<Gene>) -> anyhow::Result<usize> {
        if genes.is_empty() {
            return Ok(0)
        }
        let res = self.genes.insert_many(genes).await?;
        Ok(res.inserted_ids.len())
    }

    async fn genes_with_prefix(
        &self,
        scope: GeneScope<'_>,
        prefix: &str,
    ) -> anyhow::Result<Vec<Gene>> {
        let cursor = self.genes
            .aggregate(prefix_pipeline(scope, prefix))
            .await?;
        let docs: Vec<Document> = cursor.try_collect().await?;
        docs.into_iter()
            .map(|d| mongodb::bson::from_document::<Gene>(d).map_err(anyhow::Error::from))
            .collect()
    }

    async fn add_cluster(&self, cluster: Cluster) -> anyhow::Result<()> {
        self.clusters.insert_one(cluster).await?;
        Ok(())
    }

    async fn set_tree(&self, tree: Tree) -> anyhow::Result<()> {
        self.trees
            .replace_one(by_job(&tree.job_id), &tree)
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn result_files(&self, job_id: &str) -> anyhow::Result<Vec<ResultFile>> {
        let cursor = self.result_files.find(by_job(job_id)).await?;
        let mut files: Vec<ResultFile> = cursor.try_collect().await?;
        for file in files.iter_mut().filter(|f| f.external) {
            let mut download = self.blobs
                .open_download_stream_by_name(&file.id)
                .await
                .with_context(|| format!("Failed to open stored `{}`", file.name))?;
            let mut content = Vec::with_capacity(file.size as usize);
            download.read_to_end(&mut content).await?;
            file.attach_content(content);
        }
        Ok(files)
    }

    async fn circos_images(&self, job_id: &str) -> anyhow::Result<Vec<CircosImage>> {
        let cursor = self.circos_images.find(by_job(job_id)).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn genome_stat(&self, job_id: &str) -> anyhow::Result<Option<GenomeStat>> {
        Ok(self.genome_stats.find_one(by_job(job_id)).await?)
    }

    async fn genes(&self, job_id: &str) -> anyhow::Result<Vec<Gene>> {
        let cursor = self.genes.find(by_job(job_id)).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn clusters(&self, job_id: &str) -> anyhow::Result<Vec<Cluster>> {
        let cursor = self.clusters.find(by_job(job_id)).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn tree(&self, job_id: &str) -> anyhow::Result<Option<Tree>> {
        Ok(self.trees.find_one(by_job(job_id)).await?)
    }
}
