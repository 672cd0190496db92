//! Scraping of third-party APK catalogs.
//!
//! Catalog sites are unreliable: pages move, markup changes and requests get blocked.
//! Every failure in here is therefore reported as "not found" to the caller, and only logged.

pub mod apkmirror;
pub mod uptodown;

use std::{sync::OnceLock, time::Duration};

use anyhow::{anyhow, Context, Result};
use log::warn;
use regex::Regex;

use crate::fetch::is_redirect;

/// Sent on scraping requests, as catalog sites tend to reject unknown clients outright.
pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36";
/// Delay before the single retry after a catalog blocks a request.
pub const DEFAULT_BLOCKED_RETRY_DELAY: Duration = Duration::from_secs(5);
/// Upper bound for every scraping request.
pub const DEFAULT_SCRAPE_TIMEOUT: Duration = Duration::from_secs(30);

/// Processor architecture of a published variant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Arch {
    Arm64,
    /// Architecture independent (`universal`/`noarch`).
    Universal,
    X86,
    Other(String),
}

impl Arch {
    /// Classifies the architecture text shown by a catalog, e.g. `arm64-v8a + armeabi-v7a`.
    pub fn parse(text: &str) -> Self {
        let lower = text.trim().to_ascii_lowercase();
        if lower.contains("arm64") {
            Self::Arm64
        } else if lower.contains("universal") || lower.contains("noarch") {
            Self::Universal
        } else if lower.contains("x86") {
            Self::X86
        } else {
            Self::Other(lower)
        }
    }
}

/// Whether a download is a single installable package or a split bundle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PackageKind {
    Apk,
    Bundle,
}

impl PackageKind {
    /// The file extension a download of this kind is saved with.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Apk => "apk",
            Self::Bundle => "apkm",
        }
    }
}

/// One published build of an app version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Variant {
    pub arch: Arch,
    /// Density text, e.g. `nodpi` or `120-640dpi`.
    pub density: String,
    pub kind: PackageKind,
    /// Page (relative or absolute) from which this variant is downloaded.
    pub page_url: String,
}

/// Scores how suitable a variant is for patching. Higher is better.
/// arm64 beats universal which beats other architectures, x86 is effectively disqualified,
/// density independent builds are preferred, and a plain APK beats a bundle.
pub fn score_variant(variant: &Variant) -> i32 {
    let arch_score = match variant.arch {
        Arch::Arm64 => 100,
        Arch::Universal => 50,
        Arch::X86 => -1000,
        Arch::Other(_) => -100,
    };
    let density_score = if variant.density.to_ascii_lowercase().contains("nodpi") {
        20
    } else {
        0
    };
    let kind_score = match variant.kind {
        PackageKind::Apk => 10,
        PackageKind::Bundle => 5,
    };

    arch_score + density_score + kind_score
}

/// Selects the variant with the strictly highest score, keeping the earliest on a tie.
/// Returns None if there are no variants, or if only x86 builds exist.
pub fn select_best_variant(variants: &[Variant]) -> Option<&Variant> {
    let mut best: Option<(&Variant, i32)> = None;
    for variant in variants {
        let score = score_variant(variant);
        match best {
            Some((_, best_score)) if best_score >= score => {}
            _ => best = Some((variant, score)),
        }
    }

    best.map(|(variant, _)| variant)
        .filter(|variant| variant.arch != Arch::X86)
}

/// What to look up in a catalog.
#[derive(Clone, Debug)]
pub struct CatalogQuery<'a> {
    /// The name the app is listed under, used for searching.
    pub display_name: &'a str,
    /// The catalog's own path for the app (e.g. `google-inc/youtube`), used to reject unrelated search results.
    pub catalog_path: Option<&'a str>,
    /// The version wanted, or None for the newest stable release.
    pub version: Option<&'a str>,
}

/// A direct download link resolved from a catalog.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogHit {
    pub url: String,
    pub kind: PackageKind,
}

/// A catalog that can turn an app name and version into a download link.
pub trait Catalog {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Resolves a direct download URL, or None if any step of the lookup failed.
    fn resolve(&self, query: &CatalogQuery) -> Option<CatalogHit>;
}

/// The result of getting a catalog page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PageOutcome {
    Page(String),
    NotFound,
    /// The site refused the request even after retrying.
    Blocked,
}

/// Gets HTML pages from catalog sites with a bounded timeout, retrying once after an access denial.
pub struct PageFetcher<'agent> {
    agent: &'agent ureq::Agent,
    timeout: Duration,
    blocked_retry_delay: Duration,
}

impl<'agent> PageFetcher<'agent> {
    pub fn new(agent: &'agent ureq::Agent, timeout: Duration, blocked_retry_delay: Duration) -> Self {
        Self {
            agent,
            timeout,
            blocked_retry_delay,
        }
    }

    fn get_once(&self, url: &str) -> Result<Option<PageOutcome>> {
        let resp = self
            .agent
            .get(url)
            .timeout(self.timeout)
            .set("User-Agent", BROWSER_USER_AGENT)
            .set("Accept", "text/html,application/xhtml+xml")
            .call();

        match resp {
            Ok(resp) if is_redirect(resp.status()) => Err(anyhow!(
                "Unexpected redirect to {}",
                resp.header("Location").unwrap_or("<none>")
            )),
            Ok(resp) => Ok(Some(PageOutcome::Page(
                resp.into_string().context("Reading page body")?,
            ))),
            Err(ureq::Error::Status(404, _)) => Ok(Some(PageOutcome::NotFound)),
            Err(ureq::Error::Status(403, _)) => Ok(None),
            Err(ureq::Error::Status(code, _)) => Err(anyhow!("Got status {code} from {url}")),
            Err(ureq::Error::Transport(err)) => Err(err).context("Failed to make request"),
        }
    }

    /// Gets a page. An access denial (403) is retried exactly once after a fixed delay.
    pub fn get_page(&self, url: &str) -> Result<PageOutcome> {
        if let Some(outcome) = self.get_once(url)? {
            return Ok(outcome);
        }

        warn!(
            "Blocked by {url}, retrying in {}s",
            self.blocked_retry_delay.as_secs_f32()
        );
        std::thread::sleep(self.blocked_retry_delay);
        Ok(self.get_once(url)?.unwrap_or(PageOutcome::Blocked))
    }
}

fn anchor_regex() -> &'static Regex {
    static ANCHOR: OnceLock<Regex> = OnceLock::new();
    ANCHOR.get_or_init(|| Regex::new(r#"(?is)<a\s[^>]*>"#).expect("Anchor regex is valid"))
}

fn link_regex() -> &'static Regex {
    static LINK: OnceLock<Regex> = OnceLock::new();
    LINK.get_or_init(|| Regex::new(r#"(?is)(<a\s[^>]*>)(.*?)</a>"#).expect("Link regex is valid"))
}

fn href_regex() -> &'static Regex {
    static HREF: OnceLock<Regex> = OnceLock::new();
    HREF.get_or_init(|| Regex::new(r#"(?i)href\s*=\s*"([^"]*)""#).expect("Href regex is valid"))
}

fn tag_regex() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"(?s)<[^>]*(?:>|$)").expect("Tag regex is valid"))
}

/// Decodes the few HTML entities that show up in links and short cell text.
pub(crate) fn decode_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&#038;", "&")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}

/// Returns the `href` of every anchor tag (in document order) for which `accept(tag, href)` holds.
pub(crate) fn find_hrefs<F>(html: &str, mut accept: F) -> Vec<String>
where
    F: FnMut(&str, &str) -> bool,
{
    anchor_regex()
        .find_iter(html)
        .filter_map(|tag| {
            let href = decode_entities(href_regex().captures(tag.as_str())?.get(1)?.as_str());
            accept(tag.as_str(), &href).then_some(href)
        })
        .collect()
}

/// Returns the `href` and text of every anchor with an `href`, in document order.
pub(crate) fn find_links(html: &str) -> Vec<(String, String)> {
    link_regex()
        .captures_iter(html)
        .filter_map(|caps| {
            let href = decode_entities(href_regex().captures(caps.get(1)?.as_str())?.get(1)?.as_str());
            Some((href, text_content(caps.get(2)?.as_str())))
        })
        .collect()
}

/// Strips tags (including one left unclosed at the end) and collapses whitespace.
pub(crate) fn text_content(html: &str) -> String {
    decode_entities(&tag_regex().replace_all(html, " "))
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
