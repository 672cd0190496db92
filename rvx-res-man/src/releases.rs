//! Lookup of the latest GitHub release of a repository, and selection of the right file among its assets.

use std::{
    fmt::Display,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{anyhow, Context, Result};
use log::info;

use crate::{
    fetch::{FetchOptions, FetchOutcome, Fetcher},
    models::{GithubRelease, ReleaseAsset},
};

pub const API_ROOT: &str = "https://api.github.com";

/// Extension of assets that are "generically packaged executables", for which an
/// all-inclusive build is preferred whenever one is published.
const EXECUTABLE_EXTENSION: &str = ".jar";
/// Token in an asset's file name marking the build bundled with all of its dependencies.
const ALL_INCLUSIVE_MARKER: &str = "all";
/// Assets containing this are source archives, never the artifact we want.
const SOURCE_MARKER: &str = "source";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Repo {
    pub owner: String,
    pub repo: String,
}

impl FromStr for Repo {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
                Ok(Self {
                    owner: owner.to_string(),
                    repo: repo.to_string(),
                })
            }
            _ => Err(anyhow!("Repository `{s}` was not in the form owner/repo")),
        }
    }
}

impl Display for Repo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

#[derive(Clone, Debug)]
pub struct Release {
    pub repo: Repo,
    pub tag_name: String,
    pub assets: Vec<ReleaseAsset>,
}

/// We separate out the reasons a release asset can't be obtained, as not being able to reach the
/// release index is a different problem for the user than the release lacking the file.
#[derive(Debug)]
pub enum LocateError {
    IndexUnavailable(anyhow::Error),
    NoMatchingAsset { repo: String, extension: String },
    DownloadFailed(anyhow::Error),
}

impl std::error::Error for LocateError {}

impl Display for LocateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IndexUnavailable(e) => write!(f, "Failed to fetch release index: {e:#}"),
            Self::NoMatchingAsset { repo, extension } => {
                write!(f, "Latest release of {repo} has no `{extension}` asset")
            }
            Self::DownloadFailed(e) => write!(f, "Failed to download release asset: {e:#}"),
        }
    }
}

// True if the file name has an `all` token, e.g. `revanced-cli-4.6.0-all.jar`.
fn is_all_inclusive(name: &str) -> bool {
    let stem = name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(name);
    stem.split(['-', '_'])
        .any(|token| token.eq_ignore_ascii_case(ALL_INCLUSIVE_MARKER))
}

/// Picks the asset to download from a release.
/// - Assets with `source` in their name are never chosen.
/// - For `.jar` files, if any asset is an all-inclusive build, only all-inclusive builds are considered.
/// - Otherwise, the first asset (in release order) with the given extension is returned.
pub fn select_asset<'a>(assets: &'a [ReleaseAsset], extension: &str) -> Option<&'a ReleaseAsset> {
    let candidates = assets
        .iter()
        .filter(|asset| asset.name.ends_with(extension) && !asset.name.contains(SOURCE_MARKER))
        .collect::<Vec<_>>();

    let require_all_inclusive = extension == EXECUTABLE_EXTENSION
        && candidates.iter().any(|asset| is_all_inclusive(&asset.name));

    candidates
        .into_iter()
        .find(|asset| !require_all_inclusive || is_all_inclusive(&asset.name))
}

/// Access to the GitHub releases API.
pub struct ReleaseIndex<'f> {
    fetcher: &'f Fetcher<'f>,
    api_root: String,
}

impl<'f> ReleaseIndex<'f> {
    /// `api_root` is normally [API_ROOT]. Authentication is taken from the fetcher's token, if any.
    pub fn new(fetcher: &'f Fetcher<'f>, api_root: impl Into<String>) -> Self {
        Self {
            fetcher,
            api_root: api_root.into().trim_end_matches('/').to_string(),
        }
    }

    fn set_headers(&self, req: ureq::Request) -> ureq::Request {
        self.fetcher
            .authorize(req)
            .set("Accept", "application/vnd.github+json")
            .set("X-GitHub-Api-Version", "2022-11-28")
    }

    /// Gets the latest published release of `repo`.
    pub fn get_latest_release(&self, repo: &Repo) -> Result<Release> {
        let req_path = format!(
            "{}/repos/{}/{}/releases/latest",
            self.api_root, repo.owner, repo.repo
        );

        let resp = self
            .set_headers(self.fetcher.get_agent().get(&req_path))
            .call()
            .with_context(|| format!("GET latest release of {repo}"))?;

        let document: GithubRelease = serde_json::from_reader(resp.into_reader())
            .context("Release index was invalid JSON")?;

        Ok(Release {
            repo: repo.clone(),
            tag_name: document.tag_name,
            assets: document.assets.into_iter().map(ReleaseAsset::from).collect(),
        })
    }

    /// Finds the asset with the given extension in the latest release of `repo`.
    pub fn locate(&self, repo: &Repo, extension: &str) -> Result<ReleaseAsset, LocateError> {
        let release = self
            .get_latest_release(repo)
            .map_err(LocateError::IndexUnavailable)?;

        select_asset(&release.assets, extension)
            .cloned()
            .ok_or_else(|| LocateError::NoMatchingAsset {
                repo: repo.to_string(),
                extension: extension.to_string(),
            })
    }

    /// Finds the asset with the given extension in the latest release of `repo` and downloads it into `dir`,
    /// under the asset's own file name.
    /// If a file with that name already exists in `dir`, it is assumed to be complete and is not downloaded again.
    pub fn locate_and_fetch(
        &self,
        repo: &Repo,
        extension: &str,
        dir: impl AsRef<Path>,
    ) -> Result<PathBuf, LocateError> {
        let asset = self.locate(repo, extension)?;
        let dest = dir.as_ref().join(&asset.name);
        if dest.exists() {
            info!("Using existing {}", dest.display());
            return Ok(dest);
        }

        std::fs::create_dir_all(dir.as_ref())
            .context("Creating download directory")
            .map_err(LocateError::DownloadFailed)?;

        let outcome = self
            .fetcher
            .fetch_to_file(
                &asset.download_url,
                &dest,
                FetchOptions {
                    authenticated: true,
                    accept: None,
                },
            )
            .map_err(LocateError::DownloadFailed)?;

        match outcome {
            FetchOutcome::Fetched(_) => Ok(dest),
            FetchOutcome::NotFound => Err(LocateError::DownloadFailed(anyhow!(
                "{} returned 404",
                asset.download_url
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{run_blocking, test_agent};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn asset(name: &str) -> ReleaseAsset {
        ReleaseAsset {
            name: name.to_string(),
            download_url: format!("https://example.com/{name}"),
            api_url: format!("https://api.example.com/assets/{name}"),
            size: None,
        }
    }

    fn names(assets: &[&str]) -> Vec<ReleaseAsset> {
        assets.iter().map(|name| asset(name)).collect()
    }

    #[test]
    fn prefers_all_inclusive_jar() {
        let assets = names(&["cli.jar", "cli-all.jar"]);
        assert_eq!(select_asset(&assets, ".jar").unwrap().name, "cli-all.jar");
    }

    #[test]
    fn falls_back_to_plain_jar() {
        let assets = names(&["cli.jar"]);
        assert_eq!(select_asset(&assets, ".jar").unwrap().name, "cli.jar");
    }

    #[test]
    fn skips_source_archives() {
        let assets = names(&["patches-sources.rvp", "patches-5.0.0.rvp", "patches-5.0.0.rvp.asc"]);
        assert_eq!(select_asset(&assets, ".rvp").unwrap().name, "patches-5.0.0.rvp");

        let only_sources = names(&["revanced-cli-4.6.0-sources.jar"]);
        assert!(select_asset(&only_sources, ".jar").is_none());
    }

    #[test]
    fn all_inclusive_rule_only_applies_to_jars() {
        let assets = names(&["patches.rvp", "patches-all.rvp"]);
        assert_eq!(select_asset(&assets, ".rvp").unwrap().name, "patches.rvp");
    }

    #[test]
    fn all_marker_must_be_a_token() {
        assert!(is_all_inclusive("revanced-cli-4.6.0-all.jar"));
        assert!(is_all_inclusive("cli_all.jar"));
        assert!(!is_all_inclusive("installer.jar"));
        assert!(!is_all_inclusive("small-cli.jar"));
    }

    #[test]
    fn parses_repo_identifiers() {
        let repo: Repo = "ReVanced/revanced-cli".parse().unwrap();
        assert_eq!(repo.owner, "ReVanced");
        assert_eq!(repo.repo, "revanced-cli");
        assert_eq!(repo.to_string(), "ReVanced/revanced-cli");
        assert!("no-slash".parse::<Repo>().is_err());
        assert!("a/b/c".parse::<Repo>().is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn downloads_selected_asset_only_once() {
        let server = MockServer::start().await;
        let release = serde_json::json!({
            "tag_name": "v4.6.0",
            "assets": [
                {
                    "name": "revanced-cli-4.6.0.jar",
                    "browser_download_url": format!("{}/dl/revanced-cli-4.6.0.jar", server.uri()),
                    "url": format!("{}/api/assets/1", server.uri()),
                    "size": 3
                },
                {
                    "name": "revanced-cli-4.6.0-all.jar",
                    "browser_download_url": format!("{}/dl/revanced-cli-4.6.0-all.jar", server.uri()),
                    "url": format!("{}/api/assets/2", server.uri()),
                    "size": 3
                }
            ]
        });
        Mock::given(method("GET"))
            .and(path("/repos/ReVanced/revanced-cli/releases/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_json(release))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/dl/revanced-cli-4.6.0-all.jar"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jar".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let tools = dir.path().to_path_buf();
        let api_root = server.uri();
        let (first, second) = run_blocking(move || {
            let agent = test_agent();
            let fetcher = Fetcher::new(&agent, None);
            let index = ReleaseIndex::new(&fetcher, api_root);
            let repo: Repo = "ReVanced/revanced-cli".parse().unwrap();
            let first = index.locate_and_fetch(&repo, ".jar", &tools).unwrap();
            let second = index.locate_and_fetch(&repo, ".jar", &tools).unwrap();
            (first, second)
        })
        .await;

        assert_eq!(first, dir.path().join("revanced-cli-4.6.0-all.jar"));
        assert_eq!(first, second);
        assert_eq!(std::fs::read(&first).unwrap(), b"jar");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unreachable_index_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let api_root = server.uri();
        let result = run_blocking(move || {
            let agent = test_agent();
            let fetcher = Fetcher::new(&agent, None);
            let repo: Repo = "ReVanced/revanced-patches".parse().unwrap();
            ReleaseIndex::new(&fetcher, api_root).locate(&repo, ".rvp")
        })
        .await;

        assert!(matches!(result, Err(LocateError::IndexUnavailable(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn release_without_matching_asset_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "tag_name": "v1", "assets": [] })),
            )
            .mount(&server)
            .await;

        let api_root = server.uri();
        let result = run_blocking(move || {
            let agent = test_agent();
            let fetcher = Fetcher::new(&agent, None);
            let repo: Repo = "MorpheApp/morphe-patches".parse().unwrap();
            ReleaseIndex::new(&fetcher, api_root).locate(&repo, ".mpp")
        })
        .await;

        assert!(matches!(result, Err(LocateError::NoMatchingAsset { .. })));
    }
}
