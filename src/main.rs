use std::{
    path::PathBuf,
    sync::Arc,
};
use anyhow::Context;
use clap::{
    Parser,
    Subcommand,
};
use log::{info, warn};
use tracing_subscriber::EnvFilter;

use companion_worker::{
    cancel::{
        CancellationStore, RedisCancellationStore, CANCELLATION_TTL,
    },
    config::{
        self, Config,
    },
    mongo::MongoJobStore,
    notify,
    queue::JobQueue,
    store::JobStore,
    supervisor::Supervisor,
    worker,
    workspace::Workspace,
};

// CLI
#[derive(Parser, Debug)]
#[command(name = "Worker CLI for Companion: genome annotation jobs.")]
#[command(version = "1.0")]
#[command(about = "Runs Companion annotation pipelines as supervised jobs and \
                   imports their results.",
          long_about = None)
]
struct Cli {
    /// The config file, `~/.companion/config.toml` if not given
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve jobs from the queue
    Work,

    /// Run a single job in the foreground
    Run {
        /// The job id
        #[arg(short, long)]
        job_id: String,
    },

    /// Put a job on the queue
    Submit {
        /// The job id
        #[arg(short, long)]
        job_id: String,
    },

    /// Cancel a running job
    Cancel {
        /// The run token of the job
        #[arg(short, long)]
        token: String,
    },

    /// Delete the result directory of a job
    Purge {
        /// The job id
        #[arg(short, long)]
        job_id: String,
    },
}

async fn redis_setup(uri: &str) -> anyhow::Result<redis::aio::MultiplexedConnection> {
    let redis_client = redis::Client::open(uri)?;
    let redis_con = redis_client
        .get_multiplexed_async_connection()
        .await
        .with_context(|| format!("Failed to connect to redis at `{uri}`"))?;
    Ok(redis_con)
}

async fn supervisor_setup(config: Arc<Config>) -> anyhow::Result<Supervisor> {
    let store = MongoJobStore::connect(&config.mongodb).await?;
    let redis_con = redis_setup(&config.redis.uri).await?;
    let notifier = notify::from_settings(&config.notifications)?;
    Ok(Supervisor::new(
        config,
        Arc::new(store),
        Arc::new(RedisCancellationStore::new(redis_con)),
        Arc::from(notifier),
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();

    let cli = Cli::parse();
    info!("<-> Companion annotation worker <->");
    let config_path = match cli.config {
        Some(path) => path,

        None => config::default_config_path()?,
    };
    let config = Arc::new(Config::from_file(&config_path)?);
    info!("Config is loaded from `{}`", config_path.display());

    match cli.command {
        Commands::Work => {
            let supervisor = Arc::new(supervisor_setup(config.clone()).await?);
            let queue = JobQueue::new(
                redis_setup(&config.redis.uri).await?,
                &config.redis.queue,
            );
            worker::serve(supervisor, queue, &config.worker).await?;
        },

        Commands::Run { job_id } => {
            let supervisor = supervisor_setup(config.clone()).await?;
            let state = worker::run_with_retry(&supervisor, &job_id).await?;
            info!("Job `{job_id}` ended as `{state}`.");
        },

        Commands::Submit { job_id } => {
            let queue = JobQueue::new(
                redis_setup(&config.redis.uri).await?,
                &config.redis.queue,
            );
            queue.push(&job_id).await?;
        },

        Commands::Cancel { token } => {
            let cancellations = RedisCancellationStore::new(
                redis_setup(&config.redis.uri).await?
            );
            cancellations
                .set_with_expiry(&token, CANCELLATION_TTL)
                .await?;
            info!("Run `{token}` is flagged for cancellation.");
        },

        Commands::Purge { job_id } => {
            let store = MongoJobStore::connect(&config.mongodb).await?;
            let job = store.load(&job_id).await?;
            if job.run_token.is_none() {
                warn!("Job `{job_id}` has never run, nothing to purge.");
                return Ok(())
            }
            let workspace = Workspace::for_job(&config.directories, &job.id);
            workspace
                .remove_job_dir()
                .with_context(|| format!("Failed to remove `{}`", workspace.job_dir.display()))?;
            info!("Removed `{}`.", workspace.job_dir.display());
        },
    }
    Ok(())
}
