use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use serde::Deserialize;
use anyhow::Context;

// worker configuration as read in from disk(toml)
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub pipeline: PipelineSettings,

    pub directories: DirectorySettings,

    #[serde(default)]
    pub monitor: MonitorSettings,

    #[serde(default)]
    pub mongodb: MongoSettings,

    #[serde(default)]
    pub redis: RedisSettings,

    #[serde(default)]
    pub notifications: NotificationSettings,

    #[serde(default)]
    pub worker: WorkerSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSettings {
    // the nextflow executable
    pub nextflow: PathBuf,

    // site-wide nextflow config, passed with the first `-c`
    pub location_config: PathBuf,

    // the annotation pipeline script(or repository) handed to `nextflow run`
    pub script: String,

    // extra engine arguments, e.g. ["-with-docker", "sangerpathogens/companion"]
    #[serde(default)]
    pub docker_args: Vec<String>,

    // exported to the pipeline as ROOTDIR
    pub root_dir: PathBuf,

    // where reference annotations live
    pub reference_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectorySettings {
    // permanent per-run result directories
    pub jobs: PathBuf,

    // transient, per-run nextflow work directories
    pub work: PathBuf,

    // transient, per-run nextflow temp directories
    pub temp: PathBuf,

    #[serde(default)]
    pub keep_work_directories: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub poll_interval_ms: u64,

    // time a cancelled pipeline gets to wind down after SIGINT
    pub cancel_grace_secs: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            cancel_grace_secs: 120,
        }
    }
}

impl MonitorSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MongoSettings {
    pub uri: String,

    pub database: String,
}

impl Default for MongoSettings {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017".to_string(),
            database: "companion".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisSettings {
    pub uri: String,

    // list holding ids of jobs waiting to run
    pub queue: String,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            uri: "redis://127.0.0.1:6379/".to_string(),
            queue: "companion:jobs".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    // notices are only logged when absent
    pub webhook_url: Option<String>,

    // addresses told about every failed run
    pub maintainers: Vec<String>,

    pub timeout_secs: u64,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            webhook_url: None,
            maintainers: vec![],
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    // max number of jobs supervised at the same time
    pub concurrency: usize,

    // how often the queue is checked for new jobs
    pub idle_poll_ms: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: 2,
            idle_poll_ms: 5_000,
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file `{}`", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file `{}`", path.display()))
    }
}

// ~/.companion/config.toml
pub fn default_config_path() -> anyhow::Result<PathBuf> {
    let home_dir = home::home_dir()
        .ok_or_else(|| anyhow::Error::msg("Home dir is not available"))?;
    Ok(home_dir.join(".companion").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg: Config = toml::from_str(r#"
            [pipeline]
            nextflow = "/opt/nextflow/nextflow"
            location_config = "/opt/companion/loc.config"
            script = "/opt/companion/annot.nf"
            root_dir = "/opt/companion"
            reference_dir = "/data/references"

            [directories]
            jobs = "/srv/jobs"
            work = "/scratch/work"
            temp = "/scratch/tmp"
        "#).unwrap();
        assert_eq!(cfg.monitor.poll_interval(), Duration::from_secs(5));
        assert!(!cfg.directories.keep_work_directories);
        assert!(cfg.pipeline.docker_args.is_empty());
        assert_eq!(cfg.redis.queue, "companion:jobs");
        assert!(cfg.notifications.webhook_url.is_none());
        assert_eq!(cfg.worker.concurrency, 2);
    }

    #[test]
    fn overrides_are_honoured() {
        let cfg: Config = toml::from_str(r#"
            [pipeline]
            nextflow = "nextflow"
            location_config = "loc.config"
            script = "annot.nf"
            docker_args = ["-with-docker", "companion:latest"]
            root_dir = "/opt/companion"
            reference_dir = "/data/references"

            [directories]
            jobs = "/srv/jobs"
            work = "/scratch/work"
            temp = "/scratch/tmp"
            keep_work_directories = true

            [monitor]
            poll_interval_ms = 250

            [notifications]
            maintainers = ["dev@example.org"]
        "#).unwrap();
        assert!(cfg.directories.keep_work_directories);
        assert_eq!(cfg.monitor.poll_interval(), Duration::from_millis(250));
        assert_eq!(cfg.monitor.cancel_grace(), Duration::from_secs(120));
        assert_eq!(cfg.pipeline.docker_args.len(), 2);
        assert_eq!(cfg.notifications.maintainers, vec!["dev@example.org"]);
        assert_eq!(cfg.notifications.timeout_secs, 10);
    }
}
