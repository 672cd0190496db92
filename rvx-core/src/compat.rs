//! Working out which versions of an app a patch-set supports.

use log::{info, warn};

use crate::{
    error::PipelineError,
    listing::{parse_listing, CompatibilityMap},
    tools::{PatchToolchain, ToolSet},
    version::{sort_descending, VersionCandidate},
};

/// Version setting meaning "whatever the patch-set supports".
pub const AUTO_VERSION: &str = "auto";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VersionRequest {
    Auto,
    Manual(String),
}

impl VersionRequest {
    pub fn parse(setting: &str) -> Self {
        let setting = setting.trim();
        if setting.is_empty() || setting.eq_ignore_ascii_case(AUTO_VERSION) {
            Self::Auto
        } else {
            Self::Manual(setting.to_string())
        }
    }

    /// Picks the request for `app_key` out of a version setting.
    ///
    /// The setting is either a single value used for every app, or a map of the form
    /// `youtube=19.16.39,reddit=2024.17.0`. Apps missing from a map use [AUTO_VERSION].
    /// A map which cannot be parsed is ignored with a warning, i.e. every app uses [AUTO_VERSION].
    pub fn for_app(setting: &str, app_key: &str) -> Self {
        if !setting.contains('=') {
            return Self::parse(setting);
        }

        match parse_override_map(setting) {
            Some(overrides) => overrides
                .into_iter()
                .find(|(key, _)| key == app_key)
                .map(|(_, version)| Self::parse(&version))
                .unwrap_or(Self::Auto),
            None => {
                warn!("Failed to parse version override string '{setting}'. Using auto.");
                Self::Auto
            }
        }
    }
}

// Parses `key=value,key=value`. Every non-empty part must have exactly one `=` and a non-empty key.
fn parse_override_map(setting: &str) -> Option<Vec<(String, String)>> {
    setting
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| {
            let (key, value) = part.split_once('=')?;
            let key = key.trim();
            if key.is_empty() || value.contains('=') {
                return None;
            }
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Produces the versions of `package_id` supported by the patch-set, newest first.
///
/// A manual request is returned as the only candidate, without running the tool.
/// Otherwise `list-versions` is run first. If its output does not announce the package,
/// `list-patches` is run, and its output parsed according to its shape.
pub fn resolve_candidates(
    toolchain: &dyn PatchToolchain,
    tools: &ToolSet,
    package_id: &str,
    request: &VersionRequest,
) -> Result<Vec<VersionCandidate>, PipelineError> {
    if let VersionRequest::Manual(version) = request {
        info!("Manual version override: {version}");
        return Ok(vec![VersionCandidate::new(version)]);
    }

    let undetermined = |reason: String| PipelineError::VersionUndetermined {
        package: package_id.to_string(),
        reason,
    };

    info!("Auto-detecting versions for {package_id}");
    let listing = toolchain
        .list_versions(tools)
        .map_err(|err| undetermined(format!("list-versions failed: {err:#}")))?;

    let (shape, mut map) = parse_listing(&listing);
    if !map.contains_key(package_id) {
        info!("{package_id} not in version list ({shape:?} output), checking patch list");
        let listing = toolchain
            .list_patches(tools)
            .map_err(|err| undetermined(format!("list-patches failed: {err:#}")))?;
        (_, map) = parse_listing(&listing);
    }

    let versions = candidates_for(map, package_id);
    if versions.is_empty() {
        return Err(undetermined("no compatible version listed".to_string()));
    }

    info!(
        "Detected compatible versions: {}",
        versions.iter().map(VersionCandidate::as_str).collect::<Vec<_>>().join(", ")
    );
    Ok(versions)
}

fn candidates_for(mut map: CompatibilityMap, package_id: &str) -> Vec<VersionCandidate> {
    map.remove(package_id)
        .map(sort_descending)
        .unwrap_or_default()
}

/// The newest version of `package_id` in a patch listing, in whichever shape it is.
pub fn newest_listed(listing: &str, package_id: &str) -> Option<VersionCandidate> {
    let (_, map) = parse_listing(listing);
    candidates_for(map, package_id).into_iter().next()
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, path::Path, path::PathBuf};

    use anyhow::{anyhow, Result};

    use super::*;

    /// Toolchain returning fixed listings, and recording which listings were requested.
    struct FakeToolchain {
        versions_output: Result<String, String>,
        patches_output: String,
        calls: RefCell<Vec<&'static str>>,
    }

    impl FakeToolchain {
        fn new(versions_output: &str, patches_output: &str) -> Self {
            Self {
                versions_output: Ok(versions_output.to_string()),
                patches_output: patches_output.to_string(),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl PatchToolchain for FakeToolchain {
        fn list_versions(&self, _tools: &ToolSet) -> Result<String> {
            self.calls.borrow_mut().push("list-versions");
            self.versions_output.clone().map_err(|err| anyhow!(err))
        }

        fn list_patches(&self, _tools: &ToolSet) -> Result<String> {
            self.calls.borrow_mut().push("list-patches");
            Ok(self.patches_output.clone())
        }

        fn patch(&self, _tools: &ToolSet, _inputs: &[PathBuf], _output: &Path) -> Result<()> {
            unreachable!()
        }
    }

    fn tools() -> ToolSet {
        ToolSet {
            cli: PathBuf::from("cli.jar"),
            patches: PathBuf::from("patches.rvp"),
        }
    }

    fn strings(versions: &[VersionCandidate]) -> Vec<&str> {
        versions.iter().map(VersionCandidate::as_str).collect()
    }

    #[test]
    fn manual_override_skips_tool() {
        let toolchain = FakeToolchain::new("", "");
        let versions = resolve_candidates(
            &toolchain,
            &tools(),
            "com.google.android.youtube",
            &VersionRequest::parse("19.16.38"),
        )
        .unwrap();

        assert_eq!(strings(&versions), vec!["19.16.38"]);
        assert!(toolchain.calls.borrow().is_empty());
    }

    #[test]
    fn grouped_listing_is_sorted_descending() {
        let toolchain = FakeToolchain::new(
            "Package name: com.google.android.youtube\n19.2.1\n19.16.39\n19.9.0\n",
            "",
        );
        let versions = resolve_candidates(
            &toolchain,
            &tools(),
            "com.google.android.youtube",
            &VersionRequest::Auto,
        )
        .unwrap();

        assert_eq!(strings(&versions), vec!["19.16.39", "19.9.0", "19.2.1"]);
        assert_eq!(*toolchain.calls.borrow(), vec!["list-versions"]);
    }

    #[test]
    fn falls_back_to_patch_list_when_package_not_announced() {
        let toolchain = FakeToolchain::new(
            "Package name: com.reddit.frontpage\n2024.17.0\n",
            "Compatible packages: com.spotify.music (8.9.18.512, 8.9.20.100)\n",
        );
        let versions = resolve_candidates(
            &toolchain,
            &tools(),
            "com.spotify.music",
            &VersionRequest::Auto,
        )
        .unwrap();

        assert_eq!(strings(&versions), vec!["8.9.20.100", "8.9.18.512"]);
        assert_eq!(
            *toolchain.calls.borrow(),
            vec!["list-versions", "list-patches"]
        );
    }

    #[test]
    fn undetermined_when_nothing_listed_or_tool_fails() {
        let toolchain = FakeToolchain::new("Package name: com.reddit.frontpage\n", "");
        let err = resolve_candidates(
            &toolchain,
            &tools(),
            "com.reddit.frontpage",
            &VersionRequest::Auto,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::VersionUndetermined { .. }));

        let mut failing = FakeToolchain::new("", "");
        failing.versions_output = Err("java not found".to_string());
        let err = resolve_candidates(&failing, &tools(), "com.reddit.frontpage", &VersionRequest::Auto)
            .unwrap_err();
        assert!(err.to_string().contains("java not found"));
        assert_eq!(*failing.calls.borrow(), vec!["list-versions"]);
    }

    #[test]
    fn per_app_overrides() {
        let setting = "youtube=19.16.39, reddit = 2024.17.0";
        assert_eq!(
            VersionRequest::for_app(setting, "youtube"),
            VersionRequest::Manual("19.16.39".to_string())
        );
        assert_eq!(
            VersionRequest::for_app(setting, "reddit"),
            VersionRequest::Manual("2024.17.0".to_string())
        );
        assert_eq!(VersionRequest::for_app(setting, "spotify"), VersionRequest::Auto);
        assert_eq!(VersionRequest::for_app("youtube=auto", "youtube"), VersionRequest::Auto);
    }

    #[test]
    fn malformed_override_map_means_auto() {
        assert_eq!(
            VersionRequest::for_app("youtube=19.16.39,reddit", "youtube"),
            VersionRequest::Auto
        );
        assert_eq!(VersionRequest::for_app("=1.0", "youtube"), VersionRequest::Auto);
    }

    #[test]
    fn single_setting_applies_to_every_app() {
        assert_eq!(
            VersionRequest::for_app("19.16.39", "spotify"),
            VersionRequest::Manual("19.16.39".to_string())
        );
        assert_eq!(VersionRequest::for_app(" AUTO ", "youtube"), VersionRequest::Auto);
    }
}
