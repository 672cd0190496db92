//! Running the pipeline for every app of a batch, under one patch source at a time.
//!
//! Each unit of work moves through [UnitState]s in order. Any failure skips the unit, is recorded
//! in the [BatchSummary] and the batch moves on to the next app. The batch as a whole fails only
//! if no unit succeeded, or if the tools of a patch source cannot be fetched.

use std::{
    fmt::Display,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::Serialize;

use crate::{
    bundle::{classify, normalize, BundleMerger, ResolvedArtifact},
    catalog::{AppTarget, Catalog, PatchSource},
    compat::{resolve_candidates, VersionRequest},
    error::PipelineError,
    parameters::BuildParameters,
    sources::Acquire,
    tools::{PatchToolchain, ToolSet},
    version::VersionCandidate,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitState {
    Pending,
    VersionResolved,
    ArtifactAcquired,
    Normalized,
    Patched,
    Skipped,
}

impl Display for UnitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "PENDING",
            Self::VersionResolved => "VERSION_RESOLVED",
            Self::ArtifactAcquired => "ARTIFACT_ACQUIRED",
            Self::Normalized => "NORMALIZED",
            Self::Patched => "PATCHED",
            Self::Skipped => "SKIPPED",
        };
        f.write_str(name)
    }
}

/// The result of one unit of work.
#[derive(Clone, Debug, Serialize)]
pub struct BuildOutcome {
    pub app: String,
    pub patch_source: String,
    pub success: bool,
    pub version: Option<VersionCandidate>,
    pub output: Option<PathBuf>,
    /// State the unit was in when it was skipped.
    pub failed_at: Option<UnitState>,
    pub reason: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct BatchSummary {
    pub patch_source: String,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<BuildOutcome>,
}

impl BatchSummary {
    pub fn success_count(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.success).count()
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    /// A batch succeeds if at least one unit did, regardless of how many were skipped.
    pub fn is_success(&self) -> bool {
        self.success_count() > 0
    }

    /// The last successful outcome, if any.
    pub fn last_success(&self) -> Option<&BuildOutcome> {
        self.outcomes.iter().rev().find(|outcome| outcome.success)
    }
}

/// Everything a batch needs, passed in explicitly.
pub struct Orchestrator<'a> {
    pub catalog: &'a Catalog,
    pub params: &'a BuildParameters,
    pub toolchain: &'a dyn PatchToolchain,
    pub acquirer: &'a dyn Acquire,
    pub merger: &'a dyn BundleMerger,
}

// Tracks the state of a unit of work, so that a failure can be attributed to the step that failed.
struct Unit<'u> {
    app: &'u str,
    patch_source: &'u str,
    state: UnitState,
}

impl Unit<'_> {
    fn advance(&mut self, state: UnitState) {
        info!("{} ({}): {} -> {state}", self.app, self.patch_source, self.state);
        self.state = state;
    }
}

impl<'a> Orchestrator<'a> {
    /// Runs every app in `apps` under `source`, using the already fetched `tools`.
    /// `version_setting` is the raw version configuration: `auto`, one version, or a per-app map.
    pub fn run_batch(
        &self,
        source: &PatchSource,
        tools: &ToolSet,
        apps: &[String],
        version_setting: &str,
    ) -> BatchSummary {
        info!("Batch processing {apps:?} using {}", source.name);

        let mut outcomes = Vec::with_capacity(apps.len());
        for app_key in apps {
            info!("Starting {app_key}...");
            let request = VersionRequest::for_app(version_setting, app_key);
            outcomes.push(self.run_unit(source, tools, app_key, &request));
        }

        let summary = BatchSummary {
            patch_source: source.name.clone(),
            finished_at: Utc::now(),
            outcomes,
        };
        info!(
            "Batch completed. Successful builds: {}/{}",
            summary.success_count(),
            summary.total()
        );
        summary
    }

    /// Runs one app through the whole pipeline. Never fails: a failure is recorded in the outcome.
    pub fn run_unit(
        &self,
        source: &PatchSource,
        tools: &ToolSet,
        app_key: &str,
        request: &VersionRequest,
    ) -> BuildOutcome {
        let mut unit = Unit {
            app: app_key,
            patch_source: &source.name,
            state: UnitState::Pending,
        };

        match self.try_unit(&mut unit, source, tools, request) {
            Ok((version, output)) => {
                info!("Successfully created {} ({version})", output.display());
                BuildOutcome {
                    app: app_key.to_string(),
                    patch_source: source.name.clone(),
                    success: true,
                    version: Some(version),
                    output: Some(output),
                    failed_at: None,
                    reason: None,
                }
            }
            Err(err) => {
                let failed_at = unit.state;
                match err {
                    PipelineError::AcquisitionFailed { .. } | PipelineError::UnknownApp(_) => {
                        warn!("SKIP {app_key} ({}) at {failed_at}: {err}", source.name)
                    }
                    _ => error!("FAILED {app_key} ({}) at {failed_at}: {err}", source.name),
                }
                unit.advance(UnitState::Skipped);

                BuildOutcome {
                    app: app_key.to_string(),
                    patch_source: source.name.clone(),
                    success: false,
                    version: None,
                    output: None,
                    failed_at: Some(failed_at),
                    reason: Some(err.to_string()),
                }
            }
        }
    }

    fn try_unit(
        &self,
        unit: &mut Unit,
        source: &PatchSource,
        tools: &ToolSet,
        request: &VersionRequest,
    ) -> Result<(VersionCandidate, PathBuf), PipelineError> {
        let app = self
            .catalog
            .app(unit.app)
            .ok_or_else(|| PipelineError::UnknownApp(unit.app.to_string()))?;

        let candidates = resolve_candidates(self.toolchain, tools, &app.package_id, request)?;
        unit.advance(UnitState::VersionResolved);

        // Removed when the unit finishes, whether it succeeded or not.
        std::fs::create_dir_all(&self.params.work_dir).map_err(|err| {
            PipelineError::AcquisitionFailed {
                app: app.key.clone(),
                reason: format!("Creating {}: {err}", self.params.work_dir.display()),
            }
        })?;
        let scratch = tempfile::Builder::new()
            .prefix(&format!("{}-{}-", app.key, source.name))
            .tempdir_in(&self.params.work_dir)
            .map_err(|err| PipelineError::AcquisitionFailed {
                app: app.key.clone(),
                reason: format!("Creating scratch directory: {err}"),
            })?;

        let artifact = self.acquire_first(app, &candidates, &scratch.path().join("downloads"))?;
        unit.advance(UnitState::ArtifactAcquired);

        let package = normalize(&artifact, &scratch.path().join("bundle"), self.merger)?;
        unit.advance(UnitState::Normalized);

        let output = self.patch(unit, source, tools, &package, &artifact.version)?;
        unit.advance(UnitState::Patched);
        Ok((artifact.version, output))
    }

    /// Tries each candidate in order, stopping at the first that any source has.
    fn acquire_first(
        &self,
        app: &AppTarget,
        candidates: &[VersionCandidate],
        dir: &Path,
    ) -> Result<ResolvedArtifact, PipelineError> {
        for version in candidates {
            match self.acquirer.acquire(app, version, dir)? {
                Some(path) => {
                    let kind = classify(&path)?;
                    return Ok(ResolvedArtifact {
                        path,
                        kind,
                        version: version.clone(),
                    });
                }
                None => info!("Version {version} of {} not found, trying next...", app.key),
            }
        }

        let tried: Vec<_> = candidates.iter().map(VersionCandidate::as_str).collect();
        Err(PipelineError::AcquisitionFailed {
            app: app.key.clone(),
            reason: format!("No source had any compatible version. Checked: {}", tried.join(", ")),
        })
    }

    fn patch(
        &self,
        unit: &Unit,
        source: &PatchSource,
        tools: &ToolSet,
        package: &Path,
        version: &VersionCandidate,
    ) -> Result<PathBuf, PipelineError> {
        let output = self
            .params
            .output_path(unit.app, &source.name, version.as_str());
        std::fs::create_dir_all(&self.params.dist_dir)
            .map_err(|err| PipelineError::PatchFailed(format!("Creating output directory: {err}")))?;

        info!("Patching {}...", unit.app);
        self.toolchain
            .patch(tools, &[package.to_path_buf()], &output)
            .map_err(|err| PipelineError::PatchFailed(format!("{err:#}")))?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, collections::HashSet, fs::File, io::Write};

    use anyhow::{anyhow, Result};
    use zip::{write::FileOptions, ZipWriter};

    use super::*;

    struct FakeToolchain {
        listing: String,
        patched: RefCell<Vec<PathBuf>>,
        patch_inputs: RefCell<Vec<PathBuf>>,
        fail_patch: bool,
    }

    impl FakeToolchain {
        fn new(listing: &str) -> Self {
            Self {
                listing: listing.to_string(),
                patched: RefCell::new(Vec::new()),
                patch_inputs: RefCell::new(Vec::new()),
                fail_patch: false,
            }
        }
    }

    impl PatchToolchain for FakeToolchain {
        fn list_versions(&self, _tools: &ToolSet) -> Result<String> {
            Ok(self.listing.clone())
        }

        fn list_patches(&self, _tools: &ToolSet) -> Result<String> {
            Ok(String::new())
        }

        fn patch(&self, _tools: &ToolSet, inputs: &[PathBuf], output: &Path) -> Result<()> {
            if self.fail_patch {
                return Err(anyhow!("exit status: 1"));
            }
            assert!(inputs.iter().all(|input| input.exists()));
            self.patch_inputs.borrow_mut().extend_from_slice(inputs);
            std::fs::write(output, b"patched")?;
            self.patched.borrow_mut().push(output.to_path_buf());
            Ok(())
        }
    }

    /// Has packages only for the given (app, version) pairs, and records every attempt.
    struct FakeAcquirer {
        available: HashSet<(&'static str, &'static str)>,
        attempts: RefCell<Vec<String>>,
        scratch_dirs: RefCell<Vec<PathBuf>>,
    }

    impl FakeAcquirer {
        fn new(available: &[(&'static str, &'static str)]) -> Self {
            Self {
                available: available.iter().copied().collect(),
                attempts: RefCell::new(Vec::new()),
                scratch_dirs: RefCell::new(Vec::new()),
            }
        }
    }

    impl Acquire for FakeAcquirer {
        fn acquire(
            &self,
            app: &AppTarget,
            version: &VersionCandidate,
            dir: &Path,
        ) -> Result<Option<PathBuf>, PipelineError> {
            self.attempts.borrow_mut().push(version.to_string());
            self.scratch_dirs.borrow_mut().push(dir.to_path_buf());
            if !self.available.contains(&(app.key.as_str(), version.as_str())) {
                return Ok(None);
            }

            std::fs::create_dir_all(dir).unwrap();
            let path = dir.join(format!("{}-v{version}.apk", app.key));
            std::fs::write(&path, b"not an archive, so a single package").unwrap();
            Ok(Some(path))
        }
    }

    struct NoMerge;

    impl BundleMerger for NoMerge {
        fn merge(&self, _input: &Path, _output: &Path) -> Result<()> {
            panic!("Single packages must not be merged")
        }
    }

    /// Always hands out a split bundle of the requested version.
    struct BundleAcquirer;

    impl Acquire for BundleAcquirer {
        fn acquire(
            &self,
            app: &AppTarget,
            version: &VersionCandidate,
            dir: &Path,
        ) -> Result<Option<PathBuf>, PipelineError> {
            std::fs::create_dir_all(dir).unwrap();
            let path = dir.join(format!("{}-v{version}.apkm", app.key));
            let mut writer = ZipWriter::new(File::create(&path).unwrap());
            for name in ["base.apk", "split_config.arm64_v8a.apk"] {
                writer.start_file(name, FileOptions::default()).unwrap();
                writer.write_all(name.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
            Ok(Some(path))
        }
    }

    /// Records the extracted packages and output of every merge.
    #[derive(Default)]
    struct RecordingMerger {
        merged: RefCell<Vec<(Vec<String>, PathBuf)>>,
    }

    impl BundleMerger for RecordingMerger {
        fn merge(&self, input: &Path, output: &Path) -> Result<()> {
            let mut names: Vec<String> = std::fs::read_dir(input)?
                .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
                .collect::<std::io::Result<_>>()?;
            names.sort();
            self.merged.borrow_mut().push((names, output.to_path_buf()));
            std::fs::write(output, b"merged")?;
            Ok(())
        }
    }

    fn revanced() -> PatchSource {
        Catalog::builtin().source("revanced").unwrap().clone()
    }

    fn tools() -> ToolSet {
        ToolSet {
            cli: PathBuf::from("cli.jar"),
            patches: PathBuf::from("patches.rvp"),
        }
    }

    fn apps(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|key| key.to_string()).collect()
    }

    const LISTING: &str = "\
Package name: com.google.android.youtube
2.0
1.9
1.8
Package name: com.reddit.frontpage
2024.17.0
Package name: com.spotify.music
8.9.18.512
";

    #[test]
    fn stops_at_first_acquired_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let params = BuildParameters::with_root(dir.path());
        let catalog = Catalog::builtin();
        let toolchain = FakeToolchain::new(LISTING);
        let acquirer = FakeAcquirer::new(&[("youtube", "1.9"), ("youtube", "1.8")]);
        let orchestrator = Orchestrator {
            catalog: &catalog,
            params: &params,
            toolchain: &toolchain,
            acquirer: &acquirer,
            merger: &NoMerge,
        };

        let outcome = orchestrator.run_unit(&revanced(), &tools(), "youtube", &VersionRequest::Auto);

        assert!(outcome.success);
        assert_eq!(outcome.version.unwrap().as_str(), "1.9");
        assert_eq!(*acquirer.attempts.borrow(), vec!["2.0", "1.9"]);
        let output = outcome.output.unwrap();
        assert_eq!(output, dir.path().join("dist/youtube-revanced-v1.9-arm64.apk"));
        assert_eq!(std::fs::read(output).unwrap(), b"patched");
    }

    #[test]
    fn scratch_directory_is_removed_after_unit() {
        let dir = tempfile::tempdir().unwrap();
        let params = BuildParameters::with_root(dir.path());
        let catalog = Catalog::builtin();
        let toolchain = FakeToolchain::new(LISTING);
        let acquirer = FakeAcquirer::new(&[("youtube", "2.0")]);
        let orchestrator = Orchestrator {
            catalog: &catalog,
            params: &params,
            toolchain: &toolchain,
            acquirer: &acquirer,
            merger: &NoMerge,
        };

        orchestrator.run_unit(&revanced(), &tools(), "youtube", &VersionRequest::Auto);
        orchestrator.run_unit(&revanced(), &tools(), "reddit", &VersionRequest::Auto);

        let scratch_dirs = acquirer.scratch_dirs.borrow();
        assert_eq!(scratch_dirs.len(), 2);
        assert_ne!(scratch_dirs[0], scratch_dirs[1]);
        assert!(scratch_dirs.iter().all(|dir| !dir.exists()));
    }

    #[test]
    fn exhausted_candidates_are_listed_in_reason() {
        let dir = tempfile::tempdir().unwrap();
        let params = BuildParameters::with_root(dir.path());
        let catalog = Catalog::builtin();
        let toolchain = FakeToolchain::new(LISTING);
        let acquirer = FakeAcquirer::new(&[]);
        let orchestrator = Orchestrator {
            catalog: &catalog,
            params: &params,
            toolchain: &toolchain,
            acquirer: &acquirer,
            merger: &NoMerge,
        };

        let outcome = orchestrator.run_unit(&revanced(), &tools(), "youtube", &VersionRequest::Auto);

        assert!(!outcome.success);
        assert_eq!(outcome.failed_at, Some(UnitState::VersionResolved));
        assert!(outcome.reason.unwrap().contains("2.0, 1.9, 1.8"));
    }

    #[test]
    fn all_skipped_batch_fails() {
        let dir = tempfile::tempdir().unwrap();
        let params = BuildParameters::with_root(dir.path());
        let catalog = Catalog::builtin();
        let toolchain = FakeToolchain::new(LISTING);
        let acquirer = FakeAcquirer::new(&[]);
        let orchestrator = Orchestrator {
            catalog: &catalog,
            params: &params,
            toolchain: &toolchain,
            acquirer: &acquirer,
            merger: &NoMerge,
        };

        // Unknown app, no compatible version listed, no package found.
        let summary = orchestrator.run_batch(
            &revanced(),
            &tools(),
            &apps(&["tiktok", "twitter", "youtube"]),
            "auto",
        );

        assert_eq!(summary.total(), 3);
        assert_eq!(summary.success_count(), 0);
        assert!(!summary.is_success());
        assert_eq!(summary.outcomes[0].failed_at, Some(UnitState::Pending));
        assert!(summary.outcomes[1]
            .reason
            .as_deref()
            .unwrap()
            .contains("com.twitter.android"));
    }

    #[test]
    fn one_success_passes_batch() {
        let dir = tempfile::tempdir().unwrap();
        let params = BuildParameters::with_root(dir.path());
        let catalog = Catalog::builtin();
        let toolchain = FakeToolchain::new(LISTING);
        let acquirer = FakeAcquirer::new(&[("spotify", "8.9.18.512")]);
        let orchestrator = Orchestrator {
            catalog: &catalog,
            params: &params,
            toolchain: &toolchain,
            acquirer: &acquirer,
            merger: &NoMerge,
        };

        let summary = orchestrator.run_batch(
            &revanced(),
            &tools(),
            &apps(&["youtube", "reddit", "spotify"]),
            "auto",
        );

        assert_eq!(summary.success_count(), 1);
        assert!(summary.is_success());
        assert_eq!(summary.last_success().unwrap().app, "spotify");
    }

    #[test]
    fn per_app_override_bypasses_listing() {
        let dir = tempfile::tempdir().unwrap();
        let params = BuildParameters::with_root(dir.path());
        let catalog = Catalog::builtin();
        // No versions listed at all, so only the override can succeed.
        let toolchain = FakeToolchain::new("");
        let acquirer = FakeAcquirer::new(&[("youtube", "19.16.38")]);
        let orchestrator = Orchestrator {
            catalog: &catalog,
            params: &params,
            toolchain: &toolchain,
            acquirer: &acquirer,
            merger: &NoMerge,
        };

        let summary = orchestrator.run_batch(
            &revanced(),
            &tools(),
            &apps(&["youtube", "reddit"]),
            "youtube=19.16.38",
        );

        assert!(summary.outcomes[0].success);
        assert_eq!(*acquirer.attempts.borrow(), vec!["19.16.38"]);
        assert_eq!(summary.outcomes[1].failed_at, Some(UnitState::Pending));
    }

    #[test]
    fn patch_failure_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let params = BuildParameters::with_root(dir.path());
        let catalog = Catalog::builtin();
        let mut toolchain = FakeToolchain::new(LISTING);
        toolchain.fail_patch = true;
        let acquirer = FakeAcquirer::new(&[("reddit", "2024.17.0")]);
        let orchestrator = Orchestrator {
            catalog: &catalog,
            params: &params,
            toolchain: &toolchain,
            acquirer: &acquirer,
            merger: &NoMerge,
        };

        let outcome = orchestrator.run_unit(&revanced(), &tools(), "reddit", &VersionRequest::Auto);

        assert!(!outcome.success);
        assert_eq!(outcome.failed_at, Some(UnitState::Normalized));
        assert!(outcome.reason.unwrap().starts_with("Patching failed"));
    }

    #[test]
    fn bundle_is_patched_through_merged_package() {
        let dir = tempfile::tempdir().unwrap();
        let params = BuildParameters::with_root(dir.path());
        let catalog = Catalog::builtin();
        let toolchain = FakeToolchain::new(LISTING);
        let merger = RecordingMerger::default();
        let orchestrator = Orchestrator {
            catalog: &catalog,
            params: &params,
            toolchain: &toolchain,
            acquirer: &BundleAcquirer,
            merger: &merger,
        };

        let outcome = orchestrator.run_unit(&revanced(), &tools(), "youtube", &VersionRequest::Auto);

        assert!(outcome.success);
        let merged = merger.merged.borrow();
        assert_eq!(merged.len(), 1);
        let (extracted, merged_path) = &merged[0];
        assert_eq!(
            *extracted,
            vec!["base.apk".to_string(), "split_config.arm64_v8a.apk".to_string()]
        );
        assert_eq!(merged_path.file_name().unwrap(), "youtube-v2.0_merged.apk");
        assert_eq!(*toolchain.patch_inputs.borrow(), vec![merged_path.clone()]);
    }
}
