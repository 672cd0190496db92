//! Lookup of downloads on APKMirror.
//!
//! Getting to the final link takes four pages:
//! search results -> release page (lists variants) -> variant page -> interstitial download page.

use log::{debug, info, warn};
use url::Url;

use super::{
    find_hrefs, select_best_variant, text_content, Arch, Catalog, CatalogHit, CatalogQuery,
    PackageKind, PageFetcher, PageOutcome, Variant,
};

pub const DEFAULT_ROOT: &str = "https://www.apkmirror.com";

// Marks the start of every row in the variants table of a release page.
const VARIANT_ROW_MARKER: &str = "table-row headerFont";
const VARIANT_CELL_MARKER: &str = "table-cell";

pub struct ApkMirror<'agent> {
    pages: PageFetcher<'agent>,
    root: String,
}

impl<'agent> ApkMirror<'agent> {
    pub fn new(pages: PageFetcher<'agent>, root: impl Into<String>) -> Self {
        Self {
            pages,
            root: root.into(),
        }
    }

    fn absolute(&self, href: &str) -> Option<String> {
        let joined = Url::parse(&self.root).and_then(|root| root.join(href));
        match joined {
            Ok(url) => Some(url.to_string()),
            Err(err) => {
                warn!("Invalid link {href} on APKMirror: {err}");
                None
            }
        }
    }

    fn search_url(&self, query: &CatalogQuery) -> Option<String> {
        let mut url = match Url::parse(&self.root) {
            Ok(url) => url,
            Err(err) => {
                warn!("Invalid APKMirror root {}: {err}", self.root);
                return None;
            }
        };

        let term = match query.version {
            Some(version) => format!("{} {version}", query.display_name),
            None => query.display_name.to_string(),
        };
        url.query_pairs_mut()
            .append_pair("post_type", "app_release")
            .append_pair("searchtype", "apk")
            .append_pair("s", &term);
        Some(url.to_string())
    }

    // Gets a page in the chain, logging why the chain ends if it cannot be read.
    fn get_page(&self, stage: &str, url: &str) -> Option<String> {
        debug!("APKMirror {stage}: {url}");
        match self.pages.get_page(url) {
            Ok(PageOutcome::Page(html)) => Some(html),
            Ok(PageOutcome::NotFound) => {
                warn!("APKMirror {stage} not found: {url}");
                None
            }
            Ok(PageOutcome::Blocked) => {
                warn!("APKMirror blocked the {stage} request");
                None
            }
            Err(err) => {
                warn!("APKMirror {stage} failed: {err:#}");
                None
            }
        }
    }
}

/// Finds the first release page link in search results that belongs to the app and version wanted.
/// Without a version, pre-releases are skipped so the newest stable release is picked.
pub(crate) fn find_release_link(html: &str, query: &CatalogQuery) -> Option<String> {
    let app_prefix = query.catalog_path.map(|path| format!("/apk/{}/", path.trim_matches('/')));
    let version_suffix = query
        .version
        .map(|version| format!("-{}-release/", version.trim_start_matches('v').replace('.', "-")));

    find_hrefs(html, |_, href| {
        if !href.contains("/apk/") || !href.ends_with("-release/") {
            return false;
        }
        if let Some(prefix) = &app_prefix {
            if !href.contains(prefix.as_str()) {
                return false;
            }
        }
        match &version_suffix {
            Some(suffix) => href.ends_with(suffix.as_str()),
            None => {
                let lower = href.to_ascii_lowercase();
                !lower.contains("beta") && !lower.contains("alpha")
            }
        }
    })
    .into_iter()
    .next()
}

/// Reads the variants table of a release page.
/// Rows are expected to hold cells for the variant (link and APK/BUNDLE badge), architecture,
/// minimum Android version and screen density, in that order. Rows without a variant link,
/// such as the table header, are skipped.
pub(crate) fn parse_variants(html: &str) -> Vec<Variant> {
    html.split(VARIANT_ROW_MARKER)
        .skip(1)
        .filter_map(|row| {
            let page_url = find_hrefs(row, |_, href| {
                href.contains("/apk/") && href.ends_with("-download/")
            })
            .into_iter()
            .next()?;

            let cells: Vec<String> = row
                .split(VARIANT_CELL_MARKER)
                .skip(1)
                .map(|cell| text_content(cell.split_once('>').map_or(cell, |(_, inner)| inner)))
                .collect();
            if cells.len() < 4 {
                return None;
            }

            let kind = if cells[0].contains("BUNDLE") {
                PackageKind::Bundle
            } else {
                PackageKind::Apk
            };
            Some(Variant {
                arch: Arch::parse(&cells[1]),
                density: cells[3].clone(),
                kind,
                page_url,
            })
        })
        .collect()
}

/// Finds the button on a variant page leading to the interstitial download page.
pub(crate) fn find_download_button(html: &str) -> Option<String> {
    find_hrefs(html, |tag, _| tag.contains("downloadButton"))
        .into_iter()
        .next()
}

/// Finds the final file link on the interstitial download page.
pub(crate) fn find_final_link(html: &str) -> Option<String> {
    find_hrefs(html, |_, href| href.contains("download.php"))
        .into_iter()
        .next()
}

impl Catalog for ApkMirror<'_> {
    fn name(&self) -> &str {
        "APKMirror"
    }

    fn resolve(&self, query: &CatalogQuery) -> Option<CatalogHit> {
        let search_url = self.search_url(query)?;
        let search = self.get_page("search", &search_url)?;
        let Some(release_href) = find_release_link(&search, query) else {
            warn!(
                "No APKMirror release for {} {}",
                query.display_name,
                query.version.unwrap_or("(latest)")
            );
            return None;
        };

        let release_page = self.get_page("release page", &self.absolute(&release_href)?)?;
        let variants = parse_variants(&release_page);
        let Some(variant) = select_best_variant(&variants) else {
            warn!(
                "No usable variant among {} listed on {release_href}",
                variants.len()
            );
            return None;
        };
        info!(
            "Selected {:?} {:?} variant ({})",
            variant.arch, variant.kind, variant.density
        );

        let variant_page = self.get_page("variant page", &self.absolute(&variant.page_url)?)?;
        let Some(button_href) = find_download_button(&variant_page) else {
            warn!("No download button on {}", variant.page_url);
            return None;
        };

        let download_page = self.get_page("download page", &self.absolute(&button_href)?)?;
        let Some(final_href) = find_final_link(&download_page) else {
            warn!("No final download link on {button_href}");
            return None;
        };

        Some(CatalogHit {
            url: self.absolute(&final_href)?,
            kind: variant.kind,
        })
    }
}
