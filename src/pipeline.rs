use std::{
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};
use anyhow::Context;

use crate::{
    config::PipelineSettings,
    job::{
        Job, Reference,
    },
    workspace::Workspace,
};

pub const CONFIG_FILE_NAME: &str = "pipeline.config";

// environment the engine expects, set on the spawned process only
pub const ENV_ROOT_DIR: &str = "ROOTDIR";
pub const ENV_WORK_DIR: &str = "NXF_WORK";
pub const ENV_TEMP_DIR: &str = "NXF_TEMP";

// per-job pipeline parameters, rendered as a nextflow `params` block
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineParams {
    pub inseq: String,
    pub ref_dir: String,
    pub ref_species: String,
    pub genome_prefix: String,
    pub chr_pattern: Option<String>,
    pub do_contiguation: bool,
    pub transcript_file: Option<String>,
    pub make_embl: bool,
    pub use_reference: bool,
    pub do_circos: bool,
    pub run_exonerate: bool,
    pub run_ratt: bool,
    pub do_pseudo: bool,
}

impl PipelineParams {
    pub fn new(
        job: &Job,
        reference: &Reference,
        settings: &PipelineSettings,
    ) -> Self {
        // contiguation needs a chromosome level reference assembly
        let do_contiguation = job.do_contiguate && reference.has_chromosomes;
        let transcript_file = if job.use_transcriptome_data {
            job.transcript_file
                .clone()
                .filter(|f| !f.trim().is_empty())
        } else {
            None
        };
        Self {
            inseq: job.sequence_file.clone(),
            ref_dir: settings.reference_dir.to_string_lossy().into_owned(),
            ref_species: reference.abbr.clone(),
            genome_prefix: job.prefix.clone(),
            chr_pattern: reference.chromosome_pattern.clone(),
            do_contiguation: do_contiguation,
            transcript_file: transcript_file,
            make_embl: job.make_embl,
            use_reference: true,
            do_circos: job.do_circos,
            run_exonerate: job.do_exonerate,
            run_ratt: job.do_ratt,
            do_pseudo: job.do_pseudo,
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::from("params {\n");
        let mut text = |key: &str, value: &str| {
            let _ = writeln!(out, "    {key} = {}", quote(value));
        };
        text("inseq", &self.inseq);
        text("ref_dir", &self.ref_dir);
        text("ref_species", &self.ref_species);
        text("GENOME_PREFIX", &self.genome_prefix);
        if let Some(pattern) = &self.chr_pattern {
            text("CHR_PATTERN", pattern);
        }
        if let Some(transcripts) = &self.transcript_file {
            text("transcript_file", transcripts);
        }
        for (key, value) in [
            ("do_contiguation", self.do_contiguation),
            ("make_embl", self.make_embl),
            ("use_reference", self.use_reference),
            ("do_circos", self.do_circos),
            ("run_exonerate", self.run_exonerate),
            ("run_ratt", self.run_ratt),
            ("do_pseudo", self.do_pseudo),
        ] {
            let _ = writeln!(out, "    {key} = {value}");
        }
        out.push_str("}\n");
        out
    }

    // writes the rendered config into the job directory
    pub fn write(&self, workspace: &Workspace) -> anyhow::Result<PathBuf> {
        let path = workspace.job_file(CONFIG_FILE_NAME);
        fs::write(&path, self.render())
            .with_context(|| format!("Failed to write pipeline config `{}`", path.display()))?;
        Ok(path)
    }
}

// groovy single quoted string
fn quote(value: &str) -> String {
    let escaped = value
        .replace('\\', "\\\\")
        .replace('\'', "\\'")
        .replace('\n', "\\n");
    format!("'{escaped}'")
}

// everything needed to start the engine for one run
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub program: PathBuf,

    pub args: Vec<String>,

    pub env: Vec<(String, String)>,
}

impl Invocation {
    pub fn new(
        settings: &PipelineSettings,
        job_config: &Path,
        workspace: &Workspace,
        resume: bool,
    ) -> Self {
        let mut args = vec![
            "-c".to_string(),
            settings.location_config.to_string_lossy().into_owned(),
            "-c".to_string(),
            job_config.to_string_lossy().into_owned(),
            "run".to_string(),
            settings.script.clone(),
        ];
        args.extend(settings.docker_args.iter().cloned());
        if resume {
            args.push("-resume".to_string());
        }
        args.push("--dist_dir".to_string());
        args.push(workspace.job_dir.to_string_lossy().into_owned());
        let env = vec![
            (ENV_ROOT_DIR.to_string(), settings.root_dir.to_string_lossy().into_owned()),
            (ENV_WORK_DIR.to_string(), workspace.work_dir.to_string_lossy().into_owned()),
            (ENV_TEMP_DIR.to_string(), workspace.temp_dir.to_string_lossy().into_owned()),
        ];
        Self {
            program: settings.nextflow.clone(),
            args: args,
            env: env,
        }
    }

    pub fn command_line(&self) -> String {
        let mut line = self.program.to_string_lossy().into_owned();
        for arg in self.args.iter() {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

// builds and writes the job config, then derives the invocation from it
pub fn prepare(
    job: &Job,
    reference: &Reference,
    settings: &PipelineSettings,
    workspace: &Workspace,
) -> anyhow::Result<(PathBuf, Invocation)> {
    let params = PipelineParams::new(job, reference, settings);
    let config_path = params.write(workspace)?;
    let invocation = Invocation::new(
        settings,
        &config_path,
        workspace,
        !job.no_resume,
    );
    Ok((config_path, invocation))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> PipelineSettings {
        PipelineSettings {
            nextflow: PathBuf::from("/opt/nextflow/nextflow"),
            location_config: PathBuf::from("/opt/companion/loc_web.config"),
            script: "/opt/companion/annot.nf".to_string(),
            docker_args: vec!["-with-docker".to_string(), "companion:latest".to_string()],
            root_dir: PathBuf::from("/opt/companion"),
            reference_dir: PathBuf::from("/data/references"),
        }
    }

    fn reference(has_chromosomes: bool) -> Reference {
        Reference {
            id: "r1".to_string(),
            abbr: "Pfalciparum".to_string(),
            name: "Plasmodium falciparum 3D7".to_string(),
            section: "Apicomplexa".to_string(),
            has_chromosomes: has_chromosomes,
            chromosome_pattern: Some("Pf3D7_(%w+)".to_string()),
        }
    }

    fn workspace() -> Workspace {
        Workspace {
            job_dir: PathBuf::from("/srv/jobs/tok"),
            work_dir: PathBuf::from("/scratch/work/tok"),
            temp_dir: PathBuf::from("/scratch/tmp/tok"),
        }
    }

    #[test]
    fn contiguation_needs_chromosome_reference() {
        let mut job = Job::new("r1", "PFA", "/uploads/seq.fasta");
        job.do_contiguate = true;
        assert!(PipelineParams::new(&job, &reference(true), &settings()).do_contiguation);
        assert!(!PipelineParams::new(&job, &reference(false), &settings()).do_contiguation);
        job.do_contiguate = false;
        assert!(!PipelineParams::new(&job, &reference(true), &settings()).do_contiguation);
    }

    #[test]
    fn transcripts_only_when_requested_and_present() {
        let mut job = Job::new("r1", "PFA", "/uploads/seq.fasta");
        job.transcript_file = Some("/uploads/rnaseq.gff3".to_string());
        assert!(PipelineParams::new(&job, &reference(true), &settings()).transcript_file.is_none());
        job.use_transcriptome_data = true;
        assert_eq!(
            PipelineParams::new(&job, &reference(true), &settings()).transcript_file.as_deref(),
            Some("/uploads/rnaseq.gff3")
        );
        job.transcript_file = None;
        assert!(PipelineParams::new(&job, &reference(true), &settings()).transcript_file.is_none());
    }

    #[test]
    fn render_emits_params_block() {
        let mut job = Job::new("r1", "PFA", "/uploads/it's.fasta");
        job.do_ratt = true;
        job.do_circos = false;
        let rendered = PipelineParams::new(&job, &reference(false), &settings()).render();
        assert!(rendered.starts_with("params {\n"));
        assert!(rendered.contains("    inseq = '/uploads/it\\'s.fasta'\n"));
        assert!(rendered.contains("    ref_species = 'Pfalciparum'\n"));
        assert!(rendered.contains("    GENOME_PREFIX = 'PFA'\n"));
        assert!(rendered.contains("    run_ratt = true\n"));
        assert!(rendered.contains("    do_circos = false\n"));
        assert!(rendered.contains("    use_reference = true\n"));
        assert!(!rendered.contains("transcript_file"));
        assert!(rendered.ends_with("}\n"));
    }

    #[test]
    fn invocation_resumes_by_default_and_targets_job_dir() {
        let ws = workspace();
        let cfg = PathBuf::from("/srv/jobs/tok/pipeline.config");
        let inv = Invocation::new(&settings(), &cfg, &ws, true);
        assert_eq!(inv.program, PathBuf::from("/opt/nextflow/nextflow"));
        assert_eq!(
            inv.command_line(),
            "/opt/nextflow/nextflow -c /opt/companion/loc_web.config \
             -c /srv/jobs/tok/pipeline.config run /opt/companion/annot.nf \
             -with-docker companion:latest -resume --dist_dir /srv/jobs/tok"
        );
        let no_resume = Invocation::new(&settings(), &cfg, &ws, false);
        assert!(!no_resume.args.iter().any(|a| a == "-resume"));
    }

    #[test]
    fn invocation_env_points_at_run_dirs() {
        let ws = workspace();
        let inv = Invocation::new(&settings(), Path::new("c"), &ws, true);
        assert_eq!(inv.env, vec![
            ("ROOTDIR".to_string(), "/opt/companion".to_string()),
            ("NXF_WORK".to_string(), "/scratch/work/tok".to_string()),
            ("NXF_TEMP".to_string(), "/scratch/tmp/tok".to_string()),
        ]);
    }

    #[test]
    fn prepare_writes_config_into_job_dir() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace {
            job_dir: root.path().to_path_buf(),
            work_dir: root.path().join("w"),
            temp_dir: root.path().join("t"),
        };
        let job = Job::new("r1", "PFA", "/uploads/seq.fasta");
        let (path, inv) = prepare(&job, &reference(true), &settings(), &ws).unwrap();
        assert_eq!(path, root.path().join(CONFIG_FILE_NAME));
        assert!(fs::read_to_string(&path).unwrap().contains("GENOME_PREFIX = 'PFA'"));
        assert!(inv.args.contains(&path.to_string_lossy().into_owned()));
    }
}
