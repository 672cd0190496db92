//! Reporting the results of a batch: a JSON summary, and release details for the CI workflow.

use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use log::info;

use crate::orchestrator::BatchSummary;

pub const SUMMARY_FILE_NAME: &str = "summary.json";

/// Writes the summaries of every batch in a run to `summary.json` in `dist_dir`.
pub fn write_summary(summaries: &[BatchSummary], dist_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dist_dir).context("Creating output directory")?;
    let path = dist_dir.join(SUMMARY_FILE_NAME);

    let mut handle = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&path)
        .context("Creating summary file")?;
    serde_json::to_writer_pretty(&mut handle, summaries)?;

    info!("Wrote summary to {}", path.display());
    Ok(path)
}

/// Tag of the release made from a batch, e.g. `v2024.06.01-revanced`.
pub fn release_tag(patch_source: &str, date: NaiveDate) -> String {
    format!("v{}-{patch_source}", date.format("%Y.%m.%d"))
}

/// Title of the release made from a batch, e.g. `ReVanced Revanced - 2024.06.01`.
pub fn release_name(patch_source: &str, date: NaiveDate) -> String {
    let mut chars = patch_source.chars();
    let capitalized: String = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    };
    format!("ReVanced {capitalized} - {}", date.format("%Y.%m.%d"))
}

/// The `KEY=value` lines describing the release made from a batch.
/// The package and version of the last successful unit are included if there is one.
pub fn env_lines(summary: &BatchSummary, date: NaiveDate) -> Vec<String> {
    let mut lines = vec![
        format!("RELEASE_TAG={}", release_tag(&summary.patch_source, date)),
        format!("RELEASE_NAME={}", release_name(&summary.patch_source, date)),
    ];

    if let Some(success) = summary.last_success() {
        if let Some(output) = &success.output {
            lines.push(format!("PATCHED_APK={}", output.display()));
        }
        if let Some(version) = &success.version {
            lines.push(format!("APP_VERSION={version}"));
        }
    }
    lines
}

/// Appends the release details of `summary` to the workflow environment file at `path`.
pub fn append_env_file(path: &Path, summary: &BatchSummary, date: NaiveDate) -> Result<()> {
    let mut handle = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Opening {}", path.display()))?;

    for line in env_lines(summary, date) {
        writeln!(handle, "{line}")?;
    }
    Ok(())
}
