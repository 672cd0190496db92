//! Locations and settings used throughout a batch run, constructed once at start-up.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use const_format::formatcp;
use rvx_res_man::{releases::Repo, scraper};

pub const STORAGE_OWNER: &str = "krishhari2105";
pub const STORAGE_REPO: &str = "base-apks";
pub const RAW_STORAGE_BASE: &str =
    formatcp!("https://raw.githubusercontent.com/{STORAGE_OWNER}/{STORAGE_REPO}/main/apps");

pub const APKEDITOR_VERSION: &str = "1.4.7";
pub const APKEDITOR_URL: &str = formatcp!(
    "https://github.com/REAndroid/APKEditor/releases/download/V{APKEDITOR_VERSION}/APKEditor-{APKEDITOR_VERSION}.jar"
);
pub const APKEDITOR_FILE_NAME: &str = formatcp!("APKEditor-{APKEDITOR_VERSION}.jar");

/// Upper bound on a patch listing invocation.
pub const DEFAULT_LISTING_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Clone, Debug)]
pub struct BuildParameters {
    /// Tools, patch-sets and the merge tool are downloaded here, and reused if already present.
    pub tools_dir: PathBuf,
    /// Tools fetched by the version report, kept apart from those used by builds.
    pub check_dir: PathBuf,
    /// Each unit of work gets its own scratch directory in here, removed once the unit finishes.
    pub work_dir: PathBuf,
    /// Patched packages and the batch summary are written here.
    pub dist_dir: PathBuf,

    /// Repository whose latest release holds stored base packages.
    pub storage_repo: Repo,
    /// Base URL of base packages stored as plain files.
    pub raw_storage_base: String,
    pub github_api_root: String,
    pub apkmirror_root: String,
    pub uptodown_root: String,
    pub uptodown_download_root: String,
    /// Set to false to only acquire packages from storage.
    pub use_catalogs: bool,

    pub merge_tool_url: String,
    pub java: PathBuf,
    pub listing_timeout: Duration,
    pub scrape_timeout: Duration,
    pub blocked_retry_delay: Duration,

    /// Sent as a bearer token to GitHub, and to the storage repository.
    pub auth_token: Option<String>,
    /// When set, release information for the workflow is appended to this file.
    pub env_file: Option<PathBuf>,
}

impl BuildParameters {
    /// Default parameters with all working directories placed below `root`.
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            tools_dir: root.join("tools"),
            check_dir: root.join("tools_check"),
            work_dir: root.join("work"),
            dist_dir: root.join("dist"),
            storage_repo: Repo {
                owner: STORAGE_OWNER.to_string(),
                repo: STORAGE_REPO.to_string(),
            },
            raw_storage_base: RAW_STORAGE_BASE.to_string(),
            github_api_root: rvx_res_man::releases::API_ROOT.to_string(),
            apkmirror_root: scraper::apkmirror::DEFAULT_ROOT.to_string(),
            uptodown_root: scraper::uptodown::DEFAULT_ROOT.to_string(),
            uptodown_download_root: scraper::uptodown::DEFAULT_DOWNLOAD_ROOT.to_string(),
            use_catalogs: true,
            merge_tool_url: APKEDITOR_URL.to_string(),
            java: PathBuf::from("java"),
            listing_timeout: DEFAULT_LISTING_TIMEOUT,
            scrape_timeout: scraper::DEFAULT_SCRAPE_TIMEOUT,
            blocked_retry_delay: scraper::DEFAULT_BLOCKED_RETRY_DELAY,
            auth_token: None,
            env_file: None,
        }
    }

    /// Path a patched package is written to.
    pub fn output_path(&self, app_key: &str, source_name: &str, version: &str) -> PathBuf {
        self.dist_dir
            .join(format!("{app_key}-{source_name}-v{version}-arm64.apk"))
    }
}

impl Default for BuildParameters {
    fn default() -> Self {
        Self::with_root(".")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_expand() {
        assert_eq!(
            APKEDITOR_URL,
            "https://github.com/REAndroid/APKEditor/releases/download/V1.4.7/APKEditor-1.4.7.jar"
        );
        assert_eq!(
            RAW_STORAGE_BASE,
            "https://raw.githubusercontent.com/krishhari2105/base-apks/main/apps"
        );
    }

    #[test]
    fn output_naming() {
        let params = BuildParameters::with_root("/tmp/run");
        assert_eq!(
            params.output_path("yt-music", "anddea", "7.03.52"),
            PathBuf::from("/tmp/run/dist/yt-music-anddea-v7.03.52-arm64.apk")
        );
    }
}
