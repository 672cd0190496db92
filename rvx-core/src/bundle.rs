//! Turning a downloaded artifact into one installable package.
//!
//! Single packages are passed through untouched. Stripping unused resources from them was
//! found to corrupt newer packages, so no repackaging is done at all.

use std::{
    fs::File,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::info;
use rvx_zip::ZipFile;

use crate::{error::PipelineError, version::VersionCandidate};

/// Extensions that are only ever used for split bundles.
pub const BUNDLE_EXTENSIONS: [&str; 3] = ["apkm", "apks", "xapk"];
const PACKAGE_EXTENSION: &str = ".apk";
const MANIFEST_ENTRY: &str = "AndroidManifest.xml";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactKind {
    SinglePackage,
    Bundle,
}

/// A downloaded package for one app version, owned by a single unit of work.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedArtifact {
    pub path: PathBuf,
    pub kind: ArtifactKind,
    pub version: VersionCandidate,
}

/// Produces one package from a directory of split packages.
pub trait BundleMerger {
    fn merge(&self, input: &Path, output: &Path) -> Result<()>;
}

fn has_bundle_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| BUNDLE_EXTENSIONS.iter().any(|b| ext.eq_ignore_ascii_case(b)))
}

/// Classifies the artifact at `path` by its content.
///
/// An archive with at least one `.apk` entry at its root is a bundle, unless it has a root manifest.
/// Anything else, including a single package (which is itself an archive, and may carry packages
/// deeper inside, e.g. a wear companion under `assets/`), is a single package.
/// A file with a bundle extension that is not a readable archive fails with [PipelineError::MergeFailed].
pub fn classify(path: &Path) -> Result<ArtifactKind, PipelineError> {
    let file = File::open(path).map_err(|err| {
        PipelineError::MergeFailed(format!("Could not open {}: {err}", path.display()))
    })?;

    match ZipFile::open(file) {
        Ok(archive) => {
            let has_manifest = archive.iter_entry_names().any(|name| name == MANIFEST_ENTRY);
            let nested = archive
                .iter_entry_names()
                .filter(|name| !name.contains('/'))
                .any(|name| name.to_ascii_lowercase().ends_with(PACKAGE_EXTENSION));
            Ok(if nested && !has_manifest {
                ArtifactKind::Bundle
            } else {
                ArtifactKind::SinglePackage
            })
        }
        Err(err) if has_bundle_extension(path) => Err(PipelineError::MergeFailed(format!(
            "{} is not a valid archive: {err:#}",
            path.display()
        ))),
        Err(_) => Ok(ArtifactKind::SinglePackage),
    }
}

/// Path the merged package of `bundle` is written to: the bundle extension replaced with `_merged.apk`.
pub fn merged_output_path(bundle: &Path) -> PathBuf {
    let file_name = bundle
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let merged = match file_name.rsplit_once('.') {
        Some((stem, ext)) if BUNDLE_EXTENSIONS.iter().any(|b| ext.eq_ignore_ascii_case(b)) => {
            format!("{stem}_merged.apk")
        }
        _ => format!("{file_name}_merged.apk"),
    };
    bundle.with_file_name(merged)
}

// Replaces `dir` with an empty directory.
fn clear_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        std::fs::remove_dir_all(dir).context("Removing previous extraction")?;
    }
    std::fs::create_dir_all(dir).context("Creating extraction directory")
}

fn extract_and_merge(bundle: &Path, extract_dir: &Path, merger: &dyn BundleMerger) -> Result<PathBuf> {
    clear_dir(extract_dir)?;
    let mut archive = ZipFile::open(File::open(bundle)?).context("Opening bundle")?;
    archive
        .extract_to_directory(extract_dir)
        .context("Extracting bundle")?;

    let output = merged_output_path(bundle);
    merger.merge(extract_dir, &output)?;
    if !output.exists() {
        anyhow::bail!("Merge tool did not produce {}", output.display());
    }
    Ok(output)
}

/// Produces the single package to patch from `artifact`.
/// Bundles are extracted into `extract_dir` (discarding anything already there) and merged.
pub fn normalize(
    artifact: &ResolvedArtifact,
    extract_dir: &Path,
    merger: &dyn BundleMerger,
) -> Result<PathBuf, PipelineError> {
    match artifact.kind {
        ArtifactKind::SinglePackage => {
            info!("Using original package {}", artifact.path.display());
            Ok(artifact.path.clone())
        }
        ArtifactKind::Bundle => {
            info!("Merging bundle {}", artifact.path.display());
            let merged = extract_and_merge(&artifact.path, extract_dir, merger)
                .map_err(|err| PipelineError::MergeFailed(format!("{err:#}")))?;
            info!("Merge successful: {}", merged.display());
            Ok(merged)
        }
    }
}
