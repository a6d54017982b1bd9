//! Report artifacts on disk.
//!
//! Every artifact is written to a temporary sibling and renamed into place,
//! so a reader never observes a partially written file.

use anyhow::{anyhow, Context, Result};
use rand::Rng;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::RenderSettings;
use crate::pipeline::Analysis;

pub const REPORT_JSON: &str = "report.json";
pub const REPORT_PDF: &str = "report.pdf";
pub const ANNOTATED_STEM: &str = "annotated";

/// Paths of the artifacts written for one analysis.
#[derive(Debug, Clone)]
pub struct ArtifactSet {
    pub dir: PathBuf,
    pub json: PathBuf,
    pub annotated_image: Option<PathBuf>,
    /// Why the annotated image is missing when there was one to write.
    pub image_error: Option<String>,
    pub pdf: Option<PathBuf>,
    /// Why the PDF is missing when it was requested.
    pub pdf_error: Option<String>,
}

pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create output dir {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write the JSON report, the annotated image and (if enabled) the PDF
    /// into a directory named after the source image.
    ///
    /// Only a failure to write the JSON report fails the call. Image and PDF
    /// failures are reported through `image_error` and `pdf_error`.
    pub fn persist(&self, analysis: &Analysis, render: &RenderSettings) -> Result<ArtifactSet> {
        let meta = &analysis.report.metadata;
        let dir = self.root.join(artifact_dir_name(
            meta.filename.as_deref(),
            meta.image_sha256.as_deref(),
        ));
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create artifact dir {}", dir.display()))?;

        let json = dir.join(REPORT_JSON);
        let body = analysis
            .report
            .to_json_pretty()
            .map_err(|e| anyhow!("serialize report: {}", e))?;
        write_atomic(&json, body.as_bytes())?;

        // Once report.json is in place, the image and the PDF are best effort.
        let (annotated_image, image_error) = match &analysis.annotated {
            Some(img) => {
                let path = dir.join(format!("{}.{}", ANNOTATED_STEM, img.file_extension()));
                let written = img
                    .to_source_format(render.jpeg_quality)
                    .map_err(|e| anyhow!("encode annotated image: {}", e))
                    .and_then(|bytes| write_atomic(&path, &bytes));
                match written {
                    Ok(()) => (Some(path), None),
                    Err(e) => {
                        log::warn!("annotated image for {} not written: {:#}", dir.display(), e);
                        (None, Some(format!("{:#}", e)))
                    }
                }
            }
            None => (None, None),
        };

        let (pdf, pdf_error) = if render.pdf {
            let path = dir.join(REPORT_PDF);
            let written = analysis
                .render_pdf()
                .map_err(|e| anyhow!("{}", e))
                .and_then(|bytes| write_atomic(&path, &bytes));
            match written {
                Ok(()) => (Some(path), None),
                Err(e) => {
                    log::warn!("pdf report for {} not generated: {:#}", dir.display(), e);
                    (None, Some(format!("{:#}", e)))
                }
            }
        } else {
            (None, None)
        };

        Ok(ArtifactSet {
            dir,
            json,
            annotated_image,
            image_error,
            pdf,
            pdf_error,
        })
    }
}

/// `{file stem}-{first 12 hex of the digest}`, restricted to `[A-Za-z0-9_-]`.
pub fn artifact_dir_name(filename: Option<&str>, sha256: Option<&str>) -> String {
    let stem = filename
        .map(|name| {
            Path::new(name)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
        .unwrap_or_default();
    let mut clean: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if clean.is_empty() {
        clean.push_str("scan");
    }
    match sha256 {
        Some(digest) if digest.len() >= 12 => format!("{}-{}", clean, &digest[..12]),
        _ => clean,
    }
}

/// Write `data` to `path` via a uniquely named temporary file and a rename.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("artifact path {} has no file name", path.display()))?;
    let suffix: u64 = rand::thread_rng().gen();
    let tmp_path = path.with_file_name(format!(
        ".{}.{:016x}.tmp",
        file_name.to_string_lossy(),
        suffix
    ));
    let written = (|| -> Result<()> {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        Ok(())
    })();
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.context(format!("failed to write {}", tmp_path.display())));
    }
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        anyhow!("failed to move artifact into {}: {}", path.display(), e)
    })?;
    Ok(())
}
