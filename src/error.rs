use std::{
    path::PathBuf,
    process::ExitStatus,
};
use thiserror::Error;

// fatal conditions of a single run, everything else travels as anyhow::Error
#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to prepare directory `{}`: {source}", path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("required file not present: {}", path.display())]
    MissingArtifact {
        path: PathBuf,
    },

    #[error("pipeline exited unsuccessfully ({status})")]
    PipelineExit {
        status: ExitStatus,
    },

    #[error("{failed} of {attempted} import steps failed: {}", steps.join(", "))]
    Import {
        attempted: usize,
        failed: usize,
        steps: Vec<String>,
    },
}

// a single unusable line in one of the pipeline's text outputs
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {reason}")]
pub struct RowError {
    pub line: usize,
    pub reason: String,
}

impl RowError {
    pub fn new(line: usize, reason: impl Into<String>) -> Self {
        Self {
            line: line,
            reason: reason.into(),
        }
    }
}
