use serde::Deserialize;

/// The subset of a GitHub release (as returned by `GET /repos/{owner}/{repo}/releases/latest`) that we use.
#[derive(Clone, Debug, Deserialize)]
pub struct GithubRelease {
    pub tag_name: String,
    #[serde(default)]
    pub assets: Vec<GithubAsset>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct GithubAsset {
    pub name: String,
    /// Public download URL, which redirects to the CDN.
    pub browser_download_url: String,
    /// API URL of the asset. Downloading it requires `Accept: application/octet-stream`, but works for private repositories.
    pub url: String,
    #[serde(default)]
    pub size: Option<u64>,
}

/// A named downloadable file discovered from an upstream release.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReleaseAsset {
    pub name: String,
    pub download_url: String,
    pub api_url: String,
    pub size: Option<u64>,
}

impl From<GithubAsset> for ReleaseAsset {
    fn from(asset: GithubAsset) -> Self {
        Self {
            name: asset.name,
            download_url: asset.browser_download_url,
            api_url: asset.url,
            size: asset.size,
        }
    }
}
