use std::fmt;
use chrono::{
    DateTime, Utc,
};
use serde::{
    Serialize, Deserialize
};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Pending,

    // workspace created, token assigned
    Preparing,

    // pipeline process is alive
    Running,

    Succeeded,

    Failed,

    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed | JobState::Cancelled)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Preparing => "preparing",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

fn enabled() -> bool {
    true
}

fn pending() -> JobState {
    JobState::Pending
}

// an annotation job as submitted, plus everything a run records on it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,

    #[serde(default)]
    pub name: String,

    // assigned at the start of every execution attempt
    #[serde(default)]
    pub run_token: Option<String>,

    #[serde(default = "pending")]
    pub state: JobState,

    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,

    // submitted parameters
    pub reference_id: String,

    pub prefix: String,

    // uploaded target sequence, already validated upstream
    pub sequence_file: String,

    #[serde(default)]
    pub transcript_file: Option<String>,

    #[serde(default)]
    pub use_transcriptome_data: bool,

    #[serde(default)]
    pub do_contiguate: bool,

    #[serde(default)]
    pub do_exonerate: bool,

    #[serde(default)]
    pub do_ratt: bool,

    #[serde(default)]
    pub do_pseudo: bool,

    #[serde(default = "enabled")]
    pub make_embl: bool,

    #[serde(default = "enabled")]
    pub do_circos: bool,

    #[serde(default)]
    pub no_resume: bool,

    #[serde(default)]
    pub email: Option<String>,

    // captured pipeline output
    #[serde(default)]
    pub stdout: Option<String>,

    #[serde(default)]
    pub stderr: Option<String>,

    #[serde(default)]
    pub config_file: Option<String>,
}

impl Job {
    pub fn new(
        reference_id: &str,
        prefix: &str,
        sequence_file: &str,
    ) -> Job {
        Job {
            id: Uuid::new_v4().simple().to_string(),
            name: String::new(),
            run_token: None,
            state: JobState::Pending,
            started_at: None,
            finished_at: None,
            reference_id: reference_id.to_string(),
            prefix: prefix.to_string(),
            sequence_file: sequence_file.to_string(),
            transcript_file: None,
            use_transcriptome_data: false,
            do_contiguate: false,
            do_exonerate: false,
            do_ratt: false,
            do_pseudo: false,
            make_embl: true,
            do_circos: true,
            no_resume: false,
            email: None,
            stdout: None,
            stderr: None,
            config_file: None,
        }
    }

    // starts a new execution attempt and returns its token
    pub fn begin_run(&mut self) -> String {
        let token = Uuid::new_v4().simple().to_string();
        self.run_token = Some(token.clone());
        self.started_at = Some(Utc::now());
        self.finished_at = None;
        self.state = JobState::Preparing;
        token
    }

    pub fn finish(&mut self, state: JobState) {
        self.state = state;
        self.finished_at = Some(Utc::now());
    }

    pub fn append_stderr(&mut self, text: &str) {
        match self.stderr.as_mut() {
            Some(stderr) if !stderr.is_empty() => {
                stderr.push('\n');
                stderr.push_str(text);
            },

            _ => self.stderr = Some(text.to_string()),
        }
    }

    // submitter notices go out only when there is someone to tell
    pub fn contact(&self) -> Option<&str> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }
}

// reference genome a job is annotated against
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reference {
    pub id: String,

    // species abbreviation known to the pipeline, e.g. `Pfalciparum`
    pub abbr: String,

    #[serde(default)]
    pub name: String,

    // taxonomic section genes are filed under
    #[serde(default)]
    pub section: String,

    #[serde(default)]
    pub has_chromosomes: bool,

    #[serde(default)]
    pub chromosome_pattern: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_run_assigns_fresh_token() {
        let mut job = Job::new("ref", "PFA", "/uploads/seq.fasta");
        let first = job.begin_run();
        assert_eq!(job.run_token.as_deref(), Some(first.as_str()));
        assert_eq!(job.state, JobState::Preparing);
        assert!(job.started_at.is_some());
        let second = job.begin_run();
        assert_ne!(first, second);
    }

    #[test]
    fn stderr_is_appended_not_replaced() {
        let mut job = Job::new("ref", "PFA", "/uploads/seq.fasta");
        job.append_stderr("first");
        job.append_stderr("second");
        assert_eq!(job.stderr.as_deref(), Some("first\nsecond"));
    }

    #[test]
    fn blank_email_is_no_contact() {
        let mut job = Job::new("ref", "PFA", "/uploads/seq.fasta");
        assert!(job.contact().is_none());
        job.email = Some("  ".to_string());
        assert!(job.contact().is_none());
        job.email = Some("me@example.org".to_string());
        assert_eq!(job.contact(), Some("me@example.org"));
    }

    #[test]
    fn feature_toggles_default_from_json() {
        let job: Job = serde_json::from_str(r#"{
            "id": "j1",
            "reference_id": "r1",
            "prefix": "PFA",
            "sequence_file": "/uploads/seq.fasta"
        }"#).unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert!(job.make_embl);
        assert!(job.do_circos);
        assert!(!job.do_ratt);
    }
}
