//! The build pipeline: which app versions a patch-set supports, where to get those versions from,
//! and running a batch of apps through acquisition, bundle merging and patching.

pub mod bundle;
pub mod catalog;
pub mod compat;
pub mod error;
pub mod listing;
pub mod orchestrator;
pub mod outcome;
pub mod parameters;
pub mod report;
pub mod sources;
pub mod tools;
pub mod version;

use log::info;
use rvx_res_man::{
    fetch::Fetcher,
    releases::ReleaseIndex,
    scraper::{apkmirror::ApkMirror, uptodown::Uptodown, PageFetcher},
};

use crate::{
    catalog::{Catalog, PatchSource},
    error::PipelineError,
    orchestrator::{BatchSummary, Orchestrator},
    parameters::{BuildParameters, APKEDITOR_FILE_NAME},
    sources::{ArtifactSource, CatalogSource, RawStorage, SourceChain, StorageRelease},
    tools::{fetch_tools, ApkEditor, JavaToolchain},
};

/// Builds the source chain used to acquire base packages: the storage release, then raw storage,
/// then (if enabled) the APKMirror and Uptodown catalogs.
pub fn default_sources<'a>(
    params: &'a BuildParameters,
    index: &'a ReleaseIndex<'a>,
    fetcher: &'a Fetcher<'a>,
) -> Vec<Box<dyn ArtifactSource + 'a>> {
    let mut sources: Vec<Box<dyn ArtifactSource + 'a>> = vec![
        Box::new(StorageRelease::new(index, params.storage_repo.clone())),
        Box::new(RawStorage::new(params.raw_storage_base.clone())),
    ];

    if params.use_catalogs {
        let pages = || {
            PageFetcher::new(
                fetcher.get_agent(),
                params.scrape_timeout,
                params.blocked_retry_delay,
            )
        };
        sources.push(Box::new(CatalogSource::new(ApkMirror::new(
            pages(),
            params.apkmirror_root.clone(),
        ))));
        sources.push(Box::new(CatalogSource::new(Uptodown::new(
            pages(),
            params.uptodown_root.clone(),
            params.uptodown_download_root.clone(),
        ))));
    }
    sources
}

/// Runs a batch of `apps` under each of `patch_sources` in turn.
///
/// The tools of every source are fetched before its apps are processed. Failing to fetch them
/// aborts the whole run with [PipelineError::ToolFetchFailed].
pub fn run_build(
    catalog: &Catalog,
    params: &BuildParameters,
    fetcher: &Fetcher,
    patch_sources: &[&PatchSource],
    apps: &[String],
    version_setting: &str,
) -> Result<Vec<BatchSummary>, PipelineError> {
    let index = ReleaseIndex::new(fetcher, params.github_api_root.clone());
    let chain = SourceChain::new(default_sources(params, &index, fetcher), fetcher);
    let toolchain = JavaToolchain::new(&params.java, params.listing_timeout);
    let merger = ApkEditor::new(
        toolchain.clone(),
        fetcher,
        params.merge_tool_url.clone(),
        params.tools_dir.join(APKEDITOR_FILE_NAME),
    );

    let orchestrator = Orchestrator {
        catalog,
        params,
        toolchain: &toolchain,
        acquirer: &chain,
        merger: &merger,
    };

    let mut summaries = Vec::with_capacity(patch_sources.len());
    for source in patch_sources {
        info!("Fetching tools for {}", source.name);
        let tools = fetch_tools(&index, source, &params.tools_dir)?;
        summaries.push(orchestrator.run_batch(source, &tools, apps, version_setting));
    }
    Ok(summaries)
}
