use std::{
    fs,
    path::{Path, PathBuf},
    sync::LazyLock,
};
use anyhow::Context;
use flate2::{
    write::GzEncoder,
    Compression,
};
use log::{info, warn};
use regex::Regex;

use crate::{
    db::{
        new_record_id, CircosImage, ResultFile,
    },
    error::RunError,
    store::JobStore,
};

// present only when the pipeline actually produced annotations
pub const COMPLETION_MARKER: &str = "pseudo.out.gff3";

pub const EMBL_BUNDLE: &str = "embl.tar.gz";

// what a successful run leaves in the job directory
pub const MANIFEST: [&str; 8] = [
    "pseudochr.fasta.gz",
    "pseudo.out.gff3",
    "pseudo.pseudochr.agp",
    "scafs.fasta.gz",
    "scaffold.out.gff3",
    "pseudo.scafs.agp",
    "out.gaf",
    "proteins.fasta",
];

pub const UNNAMED_CHROMOSOME: &str = "unnamed chromosome";

static CIRCOS_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^chr(.*)\.png$").expect("valid circos image pattern")
});

fn files_in(dir: &Path, keep: impl Fn(&str) -> bool) -> anyhow::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Failed to list `{}`", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(&keep)
        )
        .collect();
    files.sort();
    Ok(files)
}

fn write_bundle(bundle: &Path, files: &[PathBuf]) -> anyhow::Result<()> {
    let file = fs::File::create(bundle)?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    for path in files.iter() {
        let name = path.file_name().context("EMBL file without a name")?;
        builder.append_path_with_name(path, name)?;
    }
    builder.into_inner()?.finish()?;
    Ok(())
}

// packs per-chromosome EMBL files into one gzipped tarball, originals are
// removed only once the bundle is complete
pub fn archive_embl(job_dir: &Path) -> anyhow::Result<Option<PathBuf>> {
    let embl_files = files_in(job_dir, |name| name.ends_with(".embl"))?;
    if embl_files.is_empty() {
        return Ok(None)
    }
    let bundle = job_dir.join(EMBL_BUNDLE);
    let partial = job_dir.join(format!("{EMBL_BUNDLE}.part"));
    if let Err(e) = write_bundle(&partial, &embl_files) {
        let _ = fs::remove_file(&partial);
        return Err(e.context("Failed to archive EMBL files"))
    }
    if let Err(e) = fs::rename(&partial, &bundle) {
        let _ = fs::remove_file(&partial);
        return Err(anyhow::Error::new(e).context("Failed to move the EMBL bundle into place"))
    }
    for path in embl_files.iter() {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to remove archived `{}`: `{e:?}`", path.display());
        }
    }
    info!("Archived `{}` EMBL files into `{}`.", embl_files.len(), bundle.display());
    Ok(Some(bundle))
}

pub fn chromosome_label(file_name: &str) -> String {
    CIRCOS_IMAGE
        .captures(file_name)
        .map(|caps| caps[1].to_string())
        .filter(|label| !label.is_empty())
        .unwrap_or_else(|| UNNAMED_CHROMOSOME.to_string())
}

pub struct Collector<'a> {
    store: &'a dyn JobStore,
    job_id: &'a str,
    job_dir: &'a Path,
}

impl<'a> Collector<'a> {
    pub fn new(store: &'a dyn JobStore, job_id: &'a str, job_dir: &'a Path) -> Self {
        Self {
            store: store,
            job_id: job_id,
            job_dir: job_dir,
        }
    }

    async fn add_result_file(&self, name: &str) -> anyhow::Result<()> {
        let path = self.job_dir.join(name);
        let content = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read `{}`", path.display()))?;
        let rf = ResultFile::new(self.job_id, name, content);
        anyhow::ensure!(rf.is_intact(), "Checksum mismatch for `{}`", path.display());
        info!("Collected `{name}` ({} bytes, checksum `{}`).", rf.size, rf.checksum);
        self.store.add_result_file(rf).await
    }

    // with `strict` a missing manifest file is fatal, otherwise it is logged
    pub async fn collect(&self, strict: bool) -> anyhow::Result<usize> {
        let mut collected = 0;
        for name in MANIFEST {
            let path = self.job_dir.join(name);
            if !path.exists() {
                if strict {
                    return Err(RunError::MissingArtifact { path: path }.into())
                }
                warn!("Expected output is missing: `{}`", path.display());
                continue;
            }
            self.add_result_file(name).await?;
            collected += 1;
        }
        if self.job_dir.join(EMBL_BUNDLE).exists() {
            self.add_result_file(EMBL_BUNDLE).await?;
            collected += 1;
        }
        Ok(collected)
    }

    pub async fn extract_circos_images(&self) -> anyhow::Result<usize> {
        let images = files_in(self.job_dir, |name| {
            name.starts_with("chr") && name.ends_with(".png")
        })?;
        let mut stored = 0;
        for path in images.iter() {
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            let content = tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read `{}`", path.display()))?;
            self.store
                .add_circos_image(CircosImage {
                    id: new_record_id(),
                    job_id: self.job_id.to_string(),
                    chromosome: chromosome_label(file_name),
                    content: content,
                })
                .await?;
            stored += 1;
            if let Err(e) = tokio::fs::remove_file(path).await {
                warn!("Failed to remove stored image `{}`: `{e:?}`", path.display());
            }
        }
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use crate::store::MemoryJobStore;

    fn write_manifest(dir: &Path) {
        for name in MANIFEST {
            fs::write(dir.join(name), format!("content of {name}")).unwrap();
        }
    }

    #[tokio::test]
    async fn full_manifest_is_collected_with_checksums() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path());
        let store = MemoryJobStore::new();
        let n = Collector::new(&store, "j1", dir.path()).collect(true).await.unwrap();
        assert_eq!(n, MANIFEST.len());
        let files = store.result_files("j1").await.unwrap();
        assert_eq!(files.len(), MANIFEST.len());
        assert!(files.iter().all(|f| f.is_intact()));
        assert!(!files.iter().any(|f| f.name == EMBL_BUNDLE));
    }

    #[tokio::test]
    async fn missing_file_is_fatal_only_when_strict() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path());
        fs::remove_file(dir.path().join("out.gaf")).unwrap();
        let store = MemoryJobStore::new();
        let collector = Collector::new(&store, "j1", dir.path());
        let err = collector.collect(true).await.unwrap_err();
        match err.downcast_ref::<RunError>() {
            Some(RunError::MissingArtifact { path }) => assert!(path.ends_with("out.gaf")),
            other => panic!("unexpected: {other:?}"),
        }
        let store = MemoryJobStore::new();
        let n = Collector::new(&store, "j1", dir.path()).collect(false).await.unwrap();
        assert_eq!(n, MANIFEST.len() - 1);
    }

    #[tokio::test]
    async fn embl_files_are_bundled_then_removed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("PFA_01.embl"), "ID   PFA_01\n").unwrap();
        fs::write(dir.path().join("PFA_02.embl"), "ID   PFA_02\n").unwrap();
        let bundle = archive_embl(dir.path()).unwrap().unwrap();
        assert_eq!(bundle, dir.path().join(EMBL_BUNDLE));
        assert!(!dir.path().join("PFA_01.embl").exists());

        let gz = flate2::read::GzDecoder::new(fs::File::open(&bundle).unwrap());
        let mut archive = tar::Archive::new(gz);
        let mut names = vec![];
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let mut text = String::new();
            entry.read_to_string(&mut text).unwrap();
            assert!(text.starts_with("ID   PFA_0"));
            names.push(entry.path().unwrap().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["PFA_01.embl", "PFA_02.embl"]);

        write_manifest(dir.path());
        let store = MemoryJobStore::new();
        let n = Collector::new(&store, "j1", dir.path()).collect(true).await.unwrap();
        assert_eq!(n, MANIFEST.len() + 1);
    }

    #[test]
    fn failed_rename_leaves_no_partial_bundle() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("PFA_01.embl"), "ID   PFA_01\n").unwrap();
        // a non-empty directory where the bundle should go
        let blocker = dir.path().join(EMBL_BUNDLE);
        fs::create_dir(&blocker).unwrap();
        fs::write(blocker.join("occupied"), "x").unwrap();

        assert!(archive_embl(dir.path()).is_err());
        assert!(!dir.path().join(format!("{EMBL_BUNDLE}.part")).exists());
        assert!(dir.path().join("PFA_01.embl").exists());
        assert!(blocker.join("occupied").exists());
    }

    #[test]
    fn no_embl_files_no_bundle() {
        let dir = tempfile::tempdir().unwrap();
        assert!(archive_embl(dir.path()).unwrap().is_none());
        assert!(!dir.path().join(EMBL_BUNDLE).exists());
    }

    #[test]
    fn chromosome_labels() {
        assert_eq!(chromosome_label("chr1.png"), "1");
        assert_eq!(chromosome_label("chrPFA_MIT.png"), "PFA_MIT");
        assert_eq!(chromosome_label("chr.png"), UNNAMED_CHROMOSOME);
    }

    #[tokio::test]
    async fn circos_images_are_stored_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("chr1.png"), b"\x89PNG1").unwrap();
        fs::write(dir.path().join("chr2.png"), b"\x89PNG2").unwrap();
        fs::write(dir.path().join("other.png"), b"\x89PNG").unwrap();
        let store = MemoryJobStore::new();
        let n = Collector::new(&store, "j1", dir.path()).extract_circos_images().await.unwrap();
        assert_eq!(n, 2);
        let images = store.circos_images("j1").await.unwrap();
        let labels: Vec<_> = images.iter().map(|i| i.chromosome.as_str()).collect();
        assert_eq!(labels, vec!["1", "2"]);
        assert!(!dir.path().join("chr1.png").exists());
        assert!(dir.path().join("other.png").exists());
    }
}
