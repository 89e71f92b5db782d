//! Drives one run of the annotation pipeline for a job: workspace and
//! configuration, the supervised `nextflow` child, cooperative cancellation,
//! and finally collection and import of what the run produced.
//!
//! A run ends in exactly one terminal state. Success and cancellation clean up
//! the scratch directories, a failure leaves them for inspection and records
//! the stage it failed at in the job's stderr.

use std::{
    fmt,
    path::Path,
    process::{
        ExitStatus,
        Stdio,
    },
    sync::Arc,
};
use anyhow::Context;
use log::{debug, error, info, warn};
use tokio::{
    io::{
        AsyncRead,
        AsyncReadExt,
    },
    process::{
        Child,
        Command,
    },
    task::JoinHandle,
    time::{
        timeout,
        MissedTickBehavior,
    },
};

use crate::{
    cancel::{
        CancellationStore, CANCELLATION_TTL,
    },
    collector::{
        archive_embl, Collector, COMPLETION_MARKER,
    },
    config::Config,
    db::GenomeStat,
    error::RunError,
    import::{
        Importer, CLUSTER_FILE, GENE_LIST_FILE, STATS_FILE, TREE_ALIGNMENT_FILE,
        TREE_SELECTION_FILE,
    },
    job::{
        Job, JobState, Reference,
    },
    notify::Notifier,
    pipeline::{
        self, Invocation,
    },
    store::JobStore,
    workspace::Workspace,
};

// where in a run things went wrong
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Preparation,

    Configuration,

    Nextflow,

    Collection,

    Import,

    Finalisation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Preparation => "preparation",
            Stage::Configuration => "configuration",
            Stage::Nextflow => "nextflow",
            Stage::Collection => "collection",
            Stage::Import => "import",
            Stage::Finalisation => "finalisation",
        };
        f.write_str(name)
    }
}

enum Outcome {
    Exited {
        status: ExitStatus,
        stdout: String,
        stderr: String,
    },

    Cancelled,
}

pub struct Supervisor {
    config: Arc<Config>,

    store: Arc<dyn JobStore>,

    cancellations: Arc<dyn CancellationStore>,

    notifier: Arc<dyn Notifier>,
}

impl Supervisor {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn JobStore>,
        cancellations: Arc<dyn CancellationStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config: config,
            store: store,
            cancellations: cancellations,
            notifier: notifier,
        }
    }

    // asks the run holding `token` to stop, observed within one poll interval
    pub async fn cancel(&self, token: &str) -> anyhow::Result<()> {
        self.cancellations
            .set_with_expiry(token, CANCELLATION_TTL)
            .await
            .with_context(|| format!("Failed to flag run `{token}` as cancelled"))?;
        info!("Run `{token}` is flagged for cancellation.");
        Ok(())
    }

    pub async fn run(&self, job_id: &str) -> anyhow::Result<JobState> {
        let mut job = self.store
            .load(job_id)
            .await
            .with_context(|| format!("Failed to load job `{job_id}`"))?;
        let token = job.begin_run();
        self.store.persist(&job).await?;
        info!("Job `{job_id}` starts run `{token}`.");
        if job.contact().is_some() {
            if let Err(e) = self.notifier.notify_start(&job).await {
                warn!("Failed to send start notice for job `{job_id}`: `{e:?}`");
            }
        }

        let workspace = Workspace::for_job(&self.config.directories, &job.id);
        let mut stage = Stage::Preparation;
        match self.execute(&mut job, &token, &workspace, &mut stage).await {
            Ok(state) => Ok(state),

            Err(e) => {
                self.fail(&mut job, stage, &e).await;
                Err(e)
            },
        }
    }

    async fn execute(
        &self,
        job: &mut Job,
        token: &str,
        workspace: &Workspace,
        stage: &mut Stage,
    ) -> anyhow::Result<JobState> {
        *stage = Stage::Preparation;
        workspace.create()?;

        *stage = Stage::Configuration;
        let reference = self.store
            .load_reference(&job.reference_id)
            .await
            .with_context(|| format!("Failed to load reference `{}`", job.reference_id))?;
        let (config_path, invocation) = pipeline::prepare(
            job,
            &reference,
            &self.config.pipeline,
            workspace,
        )?;
        job.config_file = Some(config_path.to_string_lossy().into_owned());
        self.store.persist(job).await?;

        *stage = Stage::Nextflow;
        let child = spawn(&invocation)?;
        job.state = JobState::Running;
        self.store.persist(job).await?;

        match self.monitor(child, token).await? {
            Outcome::Cancelled => {
                if let Err(e) = workspace.cleanup(self.config.directories.keep_work_directories) {
                    warn!("Cleanup after cancelling job `{}` was incomplete: `{e:?}`", job.id);
                }
                job.finish(JobState::Cancelled);
                self.store.persist(job).await?;
                info!("Job `{}` is cancelled.", job.id);
                Ok(JobState::Cancelled)
            },

            Outcome::Exited { status, stdout, stderr } => {
                info!("Pipeline of job `{}` exited with `{status}`.", job.id);
                job.stdout = Some(stdout);
                job.stderr = Some(stderr);
                self.store.persist(job).await?;
                self.post_process(job, &reference, workspace, status, stage).await
            },
        }
    }

    async fn monitor(&self, mut child: Child, token: &str) -> anyhow::Result<Outcome> {
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let mut ticker = tokio::time::interval(self.config.monitor.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Some(status) = child
                .try_wait()
                .context("Failed to poll the pipeline process")? {
                return Ok(Outcome::Exited {
                    status: status,
                    stdout: stdout.await.context("Stdout reader failed")?,
                    stderr: stderr.await.context("Stderr reader failed")?,
                })
            }
            match self.cancellations.exists(token).await {
                Ok(false) => {},

                Ok(true) => {
                    info!("Run `{token}` is cancelled, interrupting the pipeline.");
                    interrupt(&mut child);
                    let grace = self.config.monitor.cancel_grace();
                    match timeout(grace, child.wait()).await {
                        Ok(Ok(status)) => debug!("Interrupted pipeline exited with `{status}`."),

                        Ok(Err(e)) => warn!("Failed to wait for the interrupted pipeline: `{e:?}`"),

                        Err(_) => {
                            warn!("Pipeline ignored the interrupt for {grace:?}, killing it.");
                            if let Err(e) = child.kill().await {
                                warn!("Failed to kill the pipeline: `{e:?}`");
                            }
                        },
                    }
                    stdout.abort();
                    stderr.abort();
                    return Ok(Outcome::Cancelled)
                },

                Err(e) => warn!("Cancellation check for run `{token}` failed: `{e:?}`"),
            }
        }
    }

    async fn post_process(
        &self,
        job: &mut Job,
        reference: &Reference,
        workspace: &Workspace,
        status: ExitStatus,
        stage: &mut Stage,
    ) -> anyhow::Result<JobState> {
        *stage = Stage::Collection;
        let job_dir = workspace.job_dir.clone();
        if status.success() && !job_dir.join(COMPLETION_MARKER).exists() {
            info!("Job `{}` completed without producing annotations.", job.id);
            self.store
                .set_genome_stat(GenomeStat::empty(&job.id))
                .await?;
            *stage = Stage::Finalisation;
            return self.succeed(job, workspace).await
        }

        let dir = job_dir.clone();
        match tokio::task::spawn_blocking(move || archive_embl(&dir)).await? {
            Ok(_) => {},

            Err(e) => warn!("EMBL files of job `{}` are left unbundled: `{e:?}`", job.id),
        }
        let collector = Collector::new(self.store.as_ref(), &job.id, &job_dir);
        // whatever a failed run left behind is still worth keeping
        collector.collect(status.success()).await?;
        if !status.success() {
            *stage = Stage::Nextflow;
            return Err(RunError::PipelineExit { status: status }.into())
        }

        *stage = Stage::Import;
        self.import(job, reference, &collector, &job_dir).await?;

        *stage = Stage::Finalisation;
        self.succeed(job, workspace).await
    }

    // every step is attempted, the run fails afterwards if any of them did
    async fn import(
        &self,
        job: &Job,
        reference: &Reference,
        collector: &Collector<'_>,
        job_dir: &Path,
    ) -> anyhow::Result<()> {
        let importer = Importer::new(self.store.as_ref(), &job.id);
        let mut failed = vec![];

        let results = [
            (
                "stats",
                importer.import_stats(&job_dir.join(STATS_FILE)).await.map(|_| ()),
            ),
            (
                "circos",
                collector.extract_circos_images().await.map(|_| ()),
            ),
            (
                "genes",
                importer
                    .import_genes(&job_dir.join(GENE_LIST_FILE), &job.prefix, &reference.section)
                    .await
                    .map(|_| ()),
            ),
            (
                "clusters",
                importer.import_clusters(&job_dir.join(CLUSTER_FILE)).await.map(|_| ()),
            ),
            (
                "tree",
                importer
                    .import_tree(
                        &job_dir.join(TREE_ALIGNMENT_FILE),
                        &job_dir.join(TREE_SELECTION_FILE),
                    )
                    .await
                    .map(|_| ()),
            ),
        ];
        let attempted = results.len();
        for (step, result) in results {
            if let Err(e) = result {
                error!("Import of {step} for job `{}` failed: `{e:?}`", job.id);
                failed.push(step.to_string());
            }
        }
        if !failed.is_empty() {
            return Err(RunError::Import {
                attempted: attempted,
                failed: failed.len(),
                steps: failed,
            }.into())
        }
        Ok(())
    }

    async fn succeed(&self, job: &mut Job, workspace: &Workspace) -> anyhow::Result<JobState> {
        job.finish(JobState::Succeeded);
        self.store.persist(job).await?;
        if let Err(e) = workspace.cleanup(self.config.directories.keep_work_directories) {
            warn!("Cleanup after job `{}` was incomplete: `{e:?}`", job.id);
        }
        info!("Job `{}` has succeeded.", job.id);
        if job.contact().is_some() {
            if let Err(e) = self.notifier.notify_success(job).await {
                warn!("Failed to send success notice for job `{}`: `{e:?}`", job.id);
            }
        }
        Ok(JobState::Succeeded)
    }

    // scratch directories stay in place for a postmortem
    async fn fail(&self, job: &mut Job, stage: Stage, e: &anyhow::Error) {
        error!("Job `{}` failed at {stage} stage: `{e:?}`", job.id);
        job.append_stderr(&format!("run failed at {stage} stage: {e:?}"));
        job.finish(JobState::Failed);
        if let Err(pe) = self.store.persist(job).await {
            error!("Failed to record the failure of job `{}`: `{pe:?}`", job.id);
        }
        if job.contact().is_some() {
            if let Err(ne) = self.notifier.notify_failure(job).await {
                warn!("Failed to send failure notice for job `{}`: `{ne:?}`", job.id);
            }
        }
        if let Err(ne) = self.notifier.notify_failure_to_maintainers(job).await {
            warn!("Failed to tell maintainers about job `{}`: `{ne:?}`", job.id);
        }
    }
}

// the environment override applies to this child only
fn spawn(invocation: &Invocation) -> anyhow::Result<Child> {
    info!("Starting `{}`", invocation.command_line());
    Command::new(&invocation.program)
        .args(&invocation.args)
        .envs(invocation.env.iter().cloned())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to start `{}`", invocation.program.display()))
}

// reads a pipe to the end so the child never blocks on it
fn drain<R>(pipe: Option<R>) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            if let Err(e) = pipe.read_to_end(&mut buf).await {
                warn!("Failed to read pipeline output: `{e:?}`");
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

// SIGINT lets nextflow shut its tasks down; a child that is already gone is fine
#[cfg(unix)]
fn interrupt(child: &mut Child) {
    use nix::{
        errno::Errno,
        sys::signal::{
            kill,
            Signal,
        },
        unistd::Pid,
    };
    let Some(pid) = child.id() else {
        debug!("Pipeline has already been reaped.");
        return
    };
    match kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
        Ok(()) => {},

        Err(Errno::ESRCH) => debug!("Pipeline `{pid}` exited before the interrupt."),

        Err(e) => warn!("Failed to interrupt pipeline `{pid}`: `{e:?}`"),
    }
}

#[cfg(not(unix))]
fn interrupt(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!("Failed to stop the pipeline: `{e:?}`");
    }
}
