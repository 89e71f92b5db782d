use std::{
    fs,
    io,
    path::{Path, PathBuf},
};
use log::{debug, warn};

use crate::{
    config::DirectorySettings,
    error::RunError,
};

// directories of a job: the permanent result directory and two scratch
// directories handed to the pipeline engine. Keyed by job id so that a retry
// finds the engine's cache from the attempt before.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub job_dir: PathBuf,

    pub work_dir: PathBuf,

    pub temp_dir: PathBuf,
}

impl Workspace {
    pub fn for_job(dirs: &DirectorySettings, job_id: &str) -> Self {
        Self {
            job_dir: dirs.jobs.join(job_id),
            work_dir: dirs.work.join(job_id),
            temp_dir: dirs.temp.join(job_id),
        }
    }

    // safe to call again for a workspace that already exists
    pub fn create(&self) -> Result<(), RunError> {
        for dir in [&self.job_dir, &self.work_dir, &self.temp_dir] {
            fs::create_dir_all(dir)
                .map_err(|e| RunError::Workspace {
                    path: dir.clone(),
                    source: e,
                })?;
        }
        Ok(())
    }

    pub fn job_file(&self, name: &str) -> PathBuf {
        self.job_dir.join(name)
    }

    // drops the scratch directories unless they are to be kept for inspection
    pub fn cleanup(&self, keep: bool) -> io::Result<()> {
        if keep {
            debug!("Keeping work directories of `{}`.", self.job_dir.display());
            return Ok(())
        }
        let mut result = Ok(());
        for dir in [&self.temp_dir, &self.work_dir] {
            if let Err(e) = remove_dir_if_exists(dir) {
                warn!("Failed to remove `{}`: `{e:?}`", dir.display());
                result = Err(e);
            }
        }
        result
    }

    // the permanent directory goes only on explicit request
    pub fn remove_job_dir(&self) -> io::Result<()> {
        remove_dir_if_exists(&self.job_dir)
    }
}

fn remove_dir_if_exists(dir: &Path) -> io::Result<()> {
    match fs::remove_dir_all(dir) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(root: &Path) -> DirectorySettings {
        DirectorySettings {
            jobs: root.join("jobs"),
            work: root.join("work"),
            temp: root.join("tmp"),
            keep_work_directories: false,
        }
    }

    #[test]
    fn create_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::for_job(&settings(root.path()), "abc");
        ws.create().unwrap();
        fs::write(ws.job_file("keep.txt"), "x").unwrap();
        ws.create().unwrap();
        assert!(ws.job_file("keep.txt").exists());
        assert!(ws.work_dir.ends_with("work/abc"));
        assert!(ws.temp_dir.is_dir());
    }

    #[test]
    fn cleanup_leaves_job_dir_and_honours_keep() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::for_job(&settings(root.path()), "abc");
        ws.create().unwrap();
        ws.cleanup(true).unwrap();
        assert!(ws.work_dir.exists() && ws.temp_dir.exists());
        ws.cleanup(false).unwrap();
        assert!(!ws.work_dir.exists());
        assert!(!ws.temp_dir.exists());
        assert!(ws.job_dir.exists());
        // nothing left to remove is fine
        ws.cleanup(false).unwrap();
        ws.remove_job_dir().unwrap();
        assert!(!ws.job_dir.exists());
    }

    #[test]
    fn unusable_root_is_a_workspace_error() {
        let root = tempfile::tempdir().unwrap();
        let blocker = root.path().join("jobs");
        fs::write(&blocker, "not a directory").unwrap();
        let ws = Workspace::for_job(&settings(root.path()), "abc");
        match ws.create() {
            Err(RunError::Workspace { path, .. }) => assert_eq!(path, blocker.join("abc")),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
