//! Places a base package for an app version can be acquired from, tried in a fixed order.

use std::{
    cell::RefCell,
    path::{Path, PathBuf},
};

use anyhow::Result;
use log::{info, warn};
use rvx_res_man::{
    fetch::{FetchOptions, FetchOutcome, Fetcher},
    releases::{Release, ReleaseIndex, Repo},
    scraper::{Catalog, CatalogQuery},
};

use crate::{catalog::AppTarget, error::PipelineError, version::VersionCandidate};

/// Extensions of stored base packages.
const STORED_EXTENSIONS: [&str; 4] = [".apk", ".apkm", ".apks", ".xapk"];
const ASSET_ACCEPT: &str = "application/octet-stream";

/// A download location for a base package.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedUrl {
    pub url: String,
    /// File name to save the download as.
    pub file_name: String,
    /// Whether the URL requires our token. It is never forwarded on redirect.
    pub authenticated: bool,
    pub accept: Option<&'static str>,
}

/// Something that can say where the base package of an app version is.
/// Sources report a miss as [PipelineError::NotFound] or [PipelineError::Blocked];
/// any other error ends acquisition for the unit of work.
pub trait ArtifactSource {
    fn name(&self) -> &str;

    fn resolve(&self, app: &AppTarget, version: &VersionCandidate) -> Result<ResolvedUrl, PipelineError>;
}

/// Downloads a resolved URL.
pub trait ArtifactFetch {
    fn fetch(&self, resolved: &ResolvedUrl, dest: &Path) -> Result<FetchOutcome>;
}

impl ArtifactFetch for Fetcher<'_> {
    fn fetch(&self, resolved: &ResolvedUrl, dest: &Path) -> Result<FetchOutcome> {
        self.fetch_to_file(
            &resolved.url,
            dest,
            FetchOptions {
                authenticated: resolved.authenticated,
                accept: resolved.accept,
            },
        )
    }
}

/// Gets the base package of an app version into a directory.
pub trait Acquire {
    /// Returns the downloaded file, or None if no source has this version.
    fn acquire(
        &self,
        app: &AppTarget,
        version: &VersionCandidate,
        dir: &Path,
    ) -> Result<Option<PathBuf>, PipelineError>;
}

fn stored_base_name(app: &AppTarget, version: &VersionCandidate) -> String {
    format!("{}-v{}", app.key, version)
}

/// True if `name` is a stored package of `base`, e.g. `youtube-v19.16.39.apkm` or `youtube-v19.16.39-arm64.apk`.
/// `youtube-v19.16.3.apk` is not a stored package of `youtube-v19.16.39`, nor the other way around.
fn is_stored_package(name: &str, base: &str) -> bool {
    let Some(rest) = name.strip_prefix(base) else {
        return false;
    };

    rest.starts_with(['.', '-', '_'])
        && STORED_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

/// Base packages attached as assets to the latest release of the storage repository.
/// The release is looked up once, on first use, and reused for every later lookup.
pub struct StorageRelease<'a> {
    index: &'a ReleaseIndex<'a>,
    repo: Repo,
    release: RefCell<Option<Release>>,
}

impl<'a> StorageRelease<'a> {
    pub fn new(index: &'a ReleaseIndex<'a>, repo: Repo) -> Self {
        Self {
            index,
            repo,
            release: RefCell::new(None),
        }
    }

    fn find_asset(&self, base: &str) -> Result<Option<ResolvedUrl>> {
        let mut cached = self.release.borrow_mut();
        if cached.is_none() {
            *cached = Some(self.index.get_latest_release(&self.repo)?);
        }

        Ok(cached
            .iter()
            .flat_map(|release| &release.assets)
            .find(|asset| is_stored_package(&asset.name, base))
            .map(|asset| ResolvedUrl {
                url: asset.api_url.clone(),
                file_name: asset.name.clone(),
                authenticated: true,
                accept: Some(ASSET_ACCEPT),
            }))
    }
}

impl ArtifactSource for StorageRelease<'_> {
    fn name(&self) -> &str {
        "storage release"
    }

    fn resolve(&self, app: &AppTarget, version: &VersionCandidate) -> Result<ResolvedUrl, PipelineError> {
        let base = stored_base_name(app, version);
        match self.find_asset(&base) {
            Ok(Some(resolved)) => Ok(resolved),
            Ok(None) => Err(PipelineError::NotFound(format!(
                "{base} in release of {}",
                self.repo
            ))),
            Err(err) => Err(PipelineError::AcquisitionFailed {
                app: app.key.clone(),
                reason: format!("Could not fetch storage release of {}: {err:#}", self.repo),
            }),
        }
    }
}

/// Base packages stored as plain files at `<base>/<app>-v<version>.apk`.
/// Whether one exists is only known once it is downloaded.
pub struct RawStorage {
    base_url: String,
}

impl RawStorage {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

impl ArtifactSource for RawStorage {
    fn name(&self) -> &str {
        "raw storage"
    }

    fn resolve(&self, app: &AppTarget, version: &VersionCandidate) -> Result<ResolvedUrl, PipelineError> {
        let file_name = format!("{}.apk", stored_base_name(app, version));
        Ok(ResolvedUrl {
            url: format!("{}/{file_name}", self.base_url),
            file_name,
            authenticated: false,
            accept: None,
        })
    }
}

/// Looks up apps on a catalog site by their display name.
pub struct CatalogSource<C: Catalog> {
    catalog: C,
}

impl<C: Catalog> CatalogSource<C> {
    pub fn new(catalog: C) -> Self {
        Self { catalog }
    }
}

impl<C: Catalog> ArtifactSource for CatalogSource<C> {
    fn name(&self) -> &str {
        self.catalog.name()
    }

    fn resolve(&self, app: &AppTarget, version: &VersionCandidate) -> Result<ResolvedUrl, PipelineError> {
        let query = CatalogQuery {
            display_name: &app.display_name,
            catalog_path: app.catalog_path.as_deref(),
            version: Some(version.as_str()),
        };

        match self.catalog.resolve(&query) {
            Some(hit) => Ok(ResolvedUrl {
                url: hit.url,
                file_name: format!("{}.{}", stored_base_name(app, version), hit.kind.extension()),
                authenticated: false,
                accept: None,
            }),
            None => Err(PipelineError::NotFound(format!(
                "{} {version} on {}",
                app.display_name,
                self.catalog.name()
            ))),
        }
    }
}

/// Sources tried in order for each version. The first source whose package downloads wins,
/// and the remaining sources are not consulted.
pub struct SourceChain<'a> {
    sources: Vec<Box<dyn ArtifactSource + 'a>>,
    fetcher: &'a dyn ArtifactFetch,
}

impl<'a> SourceChain<'a> {
    pub fn new(sources: Vec<Box<dyn ArtifactSource + 'a>>, fetcher: &'a dyn ArtifactFetch) -> Self {
        Self { sources, fetcher }
    }
}

impl Acquire for SourceChain<'_> {
    fn acquire(
        &self,
        app: &AppTarget,
        version: &VersionCandidate,
        dir: &Path,
    ) -> Result<Option<PathBuf>, PipelineError> {
        let failed = |reason: String| PipelineError::AcquisitionFailed {
            app: app.key.clone(),
            reason,
        };

        for source in &self.sources {
            let resolved = match source.resolve(app, version) {
                Ok(resolved) => resolved,
                Err(err) if err.is_soft() => {
                    info!("{}: {err}", source.name());
                    continue;
                }
                Err(err) => return Err(err),
            };

            std::fs::create_dir_all(dir)
                .map_err(|err| failed(format!("Creating {}: {err}", dir.display())))?;
            let dest = dir.join(&resolved.file_name);
            match self.fetcher.fetch(&resolved, &dest) {
                Ok(FetchOutcome::Fetched(_)) => {
                    info!("Found {} {version} via {}", app.key, source.name());
                    return Ok(Some(dest));
                }
                Ok(FetchOutcome::NotFound) => {
                    info!("{}: {} not present", source.name(), resolved.file_name)
                }
                Err(err) => {
                    warn!("Download of {} failed", resolved.url);
                    return Err(failed(format!(
                        "Downloading from {}: {err:#}",
                        source.name()
                    )));
                }
            }
        }

        Ok(None)
    }
}
