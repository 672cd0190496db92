//! Parsing of the compatibility listings printed by patch tools.
//!
//! Two output shapes exist:
//! - Grouped: a `Package name: <id>` line, followed by one line per supported version.
//! - Inline: `<id> (<version>, <version>, ...)` on a single line.
//!
//! The shape is detected once per output and the matching parser is used on the whole text.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::OnceLock,
};

use regex::Regex;

use crate::version::VersionCandidate;

/// Supported versions by package ID.
/// A package can be present with no versions, if it was announced but no version was listed for it.
pub type CompatibilityMap = BTreeMap<String, BTreeSet<VersionCandidate>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListingShape {
    Grouped,
    Inline,
}

fn package_announcement() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Package name:\s*([a-zA-Z0-9_.]+)").expect("Announcement regex is valid")
    })
}

fn leading_version() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(v?\d+(\.\d+)+)").expect("Version regex is valid"))
}

fn inline_entry() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:^|[^\w.])([A-Za-z]\w*(?:\.[A-Za-z]\w*)+)\s*\(([\d.,\s\w]+)\)")
            .expect("Inline entry regex is valid")
    })
}

fn dotted_number() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+(\.\d+)+$").expect("Dotted number regex is valid"))
}

/// Grouped if any line announces a package, otherwise inline.
pub fn detect_shape(output: &str) -> ListingShape {
    if output.lines().any(|line| package_announcement().is_match(line)) {
        ListingShape::Grouped
    } else {
        ListingShape::Inline
    }
}

/// Parses the grouped shape. Lines before the first announcement are ignored.
pub fn parse_grouped(output: &str) -> CompatibilityMap {
    let mut map = CompatibilityMap::new();
    let mut current: Option<String> = None;

    for line in output.lines().map(str::trim).filter(|line| !line.is_empty()) {
        if let Some(caps) = package_announcement().captures(line) {
            let package = caps[1].to_string();
            map.entry(package.clone()).or_default();
            current = Some(package);
            continue;
        }

        let Some(package) = &current else { continue };
        if let Some(caps) = leading_version().captures(line) {
            if let Some(versions) = map.get_mut(package) {
                versions.insert(VersionCandidate::new(&caps[1]));
            }
        }
    }

    map
}

/// Parses the inline shape. Only tokens inside the parentheses that are purely dotted numbers are taken.
/// Packages whose parentheses contain no such token are left out.
pub fn parse_inline(output: &str) -> CompatibilityMap {
    let mut map = CompatibilityMap::new();

    for line in output.lines() {
        for caps in inline_entry().captures_iter(line) {
            let versions: BTreeSet<_> = caps[2]
                .split([',', ' ', '\t'])
                .map(str::trim)
                .filter(|token| dotted_number().is_match(token))
                .map(VersionCandidate::new)
                .collect();

            if !versions.is_empty() {
                map.entry(caps[1].to_string()).or_default().extend(versions);
            }
        }
    }

    map
}

/// Parses `output` with the parser for its shape.
/// In grouped output, inline entries are still taken for packages that are never announced.
pub fn parse_listing(output: &str) -> (ListingShape, CompatibilityMap) {
    let shape = detect_shape(output);
    let map = match shape {
        ListingShape::Grouped => {
            let mut map = parse_grouped(output);
            for (package, versions) in parse_inline(output) {
                map.entry(package).or_insert(versions);
            }
            map
        }
        ListingShape::Inline => parse_inline(output),
    };
    (shape, map)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GROUPED: &str = "\
INFO: Most common compatible versions
Package name: com.google.android.youtube
Most common compatible versions:
    19.16.39 (41 patches)
    19.2.1 (3 patches)
    19.9.0
    19.16.39

Package name: com.google.android.apps.youtube.music
    v7.03.52 (12 patches)
Package name: com.reddit.frontpage
Any version
";

    const INLINE: &str = "\
Index: 0
Name: Hide ads
Compatible packages: com.google.android.youtube (19.16.39, 19.25.37), com.google.android.apps.youtube.music (7.03.52)
Index: 1
Name: Spoof client
Compatible packages: com.google.android.youtube (19.16.39 19.9.0)
Compatible packages: com.reddit.frontpage (any)
";

    fn versions(map: &CompatibilityMap, package: &str) -> Vec<String> {
        map[package].iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn detects_shape() {
        assert_eq!(detect_shape(GROUPED), ListingShape::Grouped);
        assert_eq!(detect_shape(INLINE), ListingShape::Inline);
        assert_eq!(detect_shape(""), ListingShape::Inline);
    }

    #[test]
    fn grouped_versions_belong_to_their_announcement() {
        let (shape, map) = parse_listing(GROUPED);
        assert_eq!(shape, ListingShape::Grouped);
        assert_eq!(
            versions(&map, "com.google.android.youtube"),
            vec!["19.2.1", "19.9.0", "19.16.39"]
        );
        assert_eq!(
            versions(&map, "com.google.android.apps.youtube.music"),
            vec!["7.03.52"]
        );
        // Announced, but with no version.
        assert!(map["com.reddit.frontpage"].is_empty());
    }

    #[test]
    fn inline_packages_match_exactly() {
        let (shape, map) = parse_listing(INLINE);
        assert_eq!(shape, ListingShape::Inline);
        assert_eq!(
            versions(&map, "com.google.android.youtube"),
            vec!["19.9.0", "19.16.39", "19.25.37"]
        );
        assert_eq!(
            versions(&map, "com.google.android.apps.youtube.music"),
            vec!["7.03.52"]
        );
        assert!(!map.contains_key("com.reddit.frontpage"));
    }

    #[test]
    fn inline_entries_fill_in_unannounced_packages() {
        let mixed = "\
Package name: com.google.android.youtube
    19.16.39
Compatible packages: com.google.android.youtube (18.0.0), com.twitter.android (10.48.0)
";
        let (shape, map) = parse_listing(mixed);
        assert_eq!(shape, ListingShape::Grouped);
        assert_eq!(versions(&map, "com.google.android.youtube"), vec!["19.16.39"]);
        assert_eq!(versions(&map, "com.twitter.android"), vec!["10.48.0"]);
    }
}
