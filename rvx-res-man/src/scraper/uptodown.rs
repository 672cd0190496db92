//! Lookup of downloads on Uptodown, tried after APKMirror.
//!
//! search results -> app page -> versions list -> version page, whose download button carries
//! the token of the final link. Uptodown publishes one build per version, so there is no variant choice.

use std::sync::OnceLock;

use log::{debug, info, warn};
use regex::Regex;
use url::Url;

use super::{
    decode_entities, find_links, Catalog, CatalogHit, CatalogQuery, PackageKind, PageFetcher,
    PageOutcome,
};

pub const DEFAULT_ROOT: &str = "https://en.uptodown.com";
/// Final download links are this followed by the token on the download button.
pub const DEFAULT_DOWNLOAD_ROOT: &str = "https://dw.uptodown.com/dwn/";

const DOWNLOAD_BUTTON_ID: &str = "detail-download-button";

fn version_item_regex() -> &'static Regex {
    static ITEM: OnceLock<Regex> = OnceLock::new();
    ITEM.get_or_init(|| {
        Regex::new(r#"(?is)data-url\s*=\s*"([^"]+)"[^>]*>.*?class\s*=\s*"version"[^>]*>\s*([^<]+?)\s*<"#)
            .expect("Version item regex is valid")
    })
}

fn button_regex() -> &'static Regex {
    static BUTTON: OnceLock<Regex> = OnceLock::new();
    BUTTON.get_or_init(|| {
        Regex::new(r#"(?is)(<button\s[^>]*>)(.*?)</button>"#).expect("Button regex is valid")
    })
}

fn data_url_regex() -> &'static Regex {
    static DATA_URL: OnceLock<Regex> = OnceLock::new();
    DATA_URL.get_or_init(|| {
        Regex::new(r#"(?i)data-url\s*=\s*"([^"]*)""#).expect("Data URL regex is valid")
    })
}

pub struct Uptodown<'agent> {
    pages: PageFetcher<'agent>,
    root: String,
    download_root: String,
}

impl<'agent> Uptodown<'agent> {
    pub fn new(pages: PageFetcher<'agent>, root: impl Into<String>, download_root: impl Into<String>) -> Self {
        Self {
            pages,
            root: root.into(),
            download_root: download_root.into(),
        }
    }

    fn absolute(&self, href: &str) -> Option<String> {
        let joined = Url::parse(&self.root).and_then(|root| root.join(href));
        match joined {
            Ok(url) => Some(url.to_string()),
            Err(err) => {
                warn!("Invalid link {href} on Uptodown: {err}");
                None
            }
        }
    }

    fn search_url(&self, query: &CatalogQuery) -> Option<String> {
        let mut url = match Url::parse(&self.root).and_then(|root| root.join("/android/search")) {
            Ok(url) => url,
            Err(err) => {
                warn!("Invalid Uptodown root {}: {err}", self.root);
                return None;
            }
        };
        url.query_pairs_mut().append_pair("q", query.display_name);
        Some(url.to_string())
    }

    fn get_page(&self, stage: &str, url: &str) -> Option<String> {
        debug!("Uptodown {stage}: {url}");
        match self.pages.get_page(url) {
            Ok(PageOutcome::Page(html)) => Some(html),
            Ok(PageOutcome::NotFound) => {
                warn!("Uptodown {stage} not found: {url}");
                None
            }
            Ok(PageOutcome::Blocked) => {
                warn!("Uptodown blocked the {stage} request");
                None
            }
            Err(err) => {
                warn!("Uptodown {stage} failed: {err:#}");
                None
            }
        }
    }
}

/// Finds the app page among search results: an `/android` link whose text is the app's name.
pub(crate) fn find_app_link(html: &str, display_name: &str) -> Option<String> {
    find_links(html)
        .into_iter()
        .find(|(href, text)| {
            href.trim_end_matches('/').ends_with("/android") && text.eq_ignore_ascii_case(display_name)
        })
        .map(|(href, _)| href)
}

/// Reads the versions list of an app, newest first, as (version, version page) pairs.
pub(crate) fn parse_versions(html: &str) -> Vec<(String, String)> {
    version_item_regex()
        .captures_iter(html)
        .map(|caps| (decode_entities(&caps[2]), decode_entities(&caps[1])))
        .collect()
}

/// Picks the page of the wanted version, or of the newest stable version if none is wanted.
pub(crate) fn select_version_page(versions: &[(String, String)], version: Option<&str>) -> Option<String> {
    versions
        .iter()
        .find(|(listed, _)| match version {
            Some(wanted) => listed.trim_start_matches('v') == wanted.trim_start_matches('v'),
            None => {
                let lower = listed.to_ascii_lowercase();
                !lower.contains("beta") && !lower.contains("alpha")
            }
        })
        .map(|(_, page)| page.clone())
}

/// Finds the download token of a version page, and whether it downloads a bundle (XAPK).
pub(crate) fn find_download_token(html: &str) -> Option<(String, PackageKind)> {
    button_regex().captures_iter(html).find_map(|caps| {
        let tag = caps.get(1)?.as_str();
        if !tag.contains(DOWNLOAD_BUTTON_ID) {
            return None;
        }

        let token = decode_entities(data_url_regex().captures(tag)?.get(1)?.as_str());
        if token.is_empty() {
            return None;
        }
        let kind = if caps[2].to_ascii_lowercase().contains("xapk") {
            PackageKind::Bundle
        } else {
            PackageKind::Apk
        };
        Some((token, kind))
    })
}

impl Catalog for Uptodown<'_> {
    fn name(&self) -> &str {
        "Uptodown"
    }

    fn resolve(&self, query: &CatalogQuery) -> Option<CatalogHit> {
        let search = self.get_page("search", &self.search_url(query)?)?;
        let Some(app_href) = find_app_link(&search, query.display_name) else {
            warn!("No Uptodown app page for {}", query.display_name);
            return None;
        };

        let app_url = self.absolute(&app_href)?;
        let versions_url = format!("{}/versions", app_url.trim_end_matches('/'));
        let versions = parse_versions(&self.get_page("versions list", &versions_url)?);
        let Some(version_href) = select_version_page(&versions, query.version) else {
            warn!(
                "Uptodown does not list {} {} among {} versions",
                query.display_name,
                query.version.unwrap_or("(latest)"),
                versions.len()
            );
            return None;
        };

        let version_page = self.get_page("version page", &self.absolute(&version_href)?)?;
        let Some((token, kind)) = find_download_token(&version_page) else {
            warn!("No download button on {version_href}");
            return None;
        };
        info!("Found {:?} on Uptodown", kind);

        Some(CatalogHit {
            url: format!("{}{token}", self.download_root),
            kind,
        })
    }
}
