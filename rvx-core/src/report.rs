//! The version report: the newest version of every app supported by each patch source.

use std::path::Path;

use log::warn;
use rvx_res_man::releases::ReleaseIndex;

use crate::{
    catalog::Catalog,
    compat::newest_listed,
    tools::{fetch_tools, PatchToolchain},
};

/// Shown for an app when the patch-set lists no particular version of it.
pub const ANY_VERSION: &str = "Any/Universal";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReportRow {
    Version {
        source: String,
        package: String,
        version: String,
    },
    Error {
        source: String,
        message: String,
    },
}

/// Checks every patch source in `catalog`, fetching tools into `dir`.
/// A source that cannot be checked produces an error row, and the remaining sources are still checked.
pub fn check_versions(
    catalog: &Catalog,
    index: &ReleaseIndex,
    toolchain: &dyn PatchToolchain,
    dir: &Path,
) -> Vec<ReportRow> {
    let mut rows = Vec::new();
    for source in catalog.sources() {
        let tools = match fetch_tools(index, source, dir) {
            Ok(tools) => tools,
            Err(err) => {
                warn!("{err}");
                rows.push(ReportRow::Error {
                    source: source.name.clone(),
                    message: "ERROR: Could not download tools".to_string(),
                });
                continue;
            }
        };

        let listing = match toolchain.list_patches(&tools) {
            Ok(listing) => listing,
            Err(err) => {
                rows.push(ReportRow::Error {
                    source: source.name.clone(),
                    message: format!("CLI Error: {err:#}"),
                });
                continue;
            }
        };

        rows.extend(listing_rows(&source.name, catalog, &listing));
    }
    rows
}

fn listing_rows(source: &str, catalog: &Catalog, listing: &str) -> Vec<ReportRow> {
    catalog
        .apps()
        .iter()
        .map(|app| ReportRow::Version {
            source: source.to_string(),
            package: app.package_id.clone(),
            version: newest_listed(listing, &app.package_id)
                .map(|version| version.to_string())
                .unwrap_or_else(|| ANY_VERSION.to_string()),
        })
        .collect()
}

/// Formats the report as a table.
pub fn format_report(rows: &[ReportRow]) -> String {
    let mut table = format!("{:<15} | {:<40} | Recommended Version\n", "Source", "App Package");
    table.push_str(&"-".repeat(80));
    table.push('\n');

    for row in rows {
        let line = match row {
            ReportRow::Version {
                source,
                package,
                version,
            } => format!("{source:<15} | {package:<40} | {version}"),
            ReportRow::Error { source, message } => format!("{source:<15} | {message}"),
        };
        table.push_str(&line);
        table.push('\n');
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_for_every_app() {
        let catalog = Catalog::builtin();
        let listing = "\
Compatible packages: com.google.android.youtube (19.16.39, 19.25.37)
Compatible packages: com.google.android.youtube (19.9.0), com.reddit.frontpage (2024.17.0)
";
        let rows = listing_rows("revanced", &catalog, listing);

        assert_eq!(rows.len(), catalog.apps().len());
        assert_eq!(
            rows[0],
            ReportRow::Version {
                source: "revanced".to_string(),
                package: "com.google.android.youtube".to_string(),
                version: "19.25.37".to_string(),
            }
        );
        assert!(rows.contains(&ReportRow::Version {
            source: "revanced".to_string(),
            package: "com.spotify.music".to_string(),
            version: ANY_VERSION.to_string(),
        }));
    }

    #[test]
    fn formats_table() {
        let table = format_report(&[
            ReportRow::Version {
                source: "anddea".to_string(),
                package: "com.reddit.frontpage".to_string(),
                version: "2024.17.0".to_string(),
            },
            ReportRow::Error {
                source: "morphe".to_string(),
                message: "ERROR: Could not download tools".to_string(),
            },
        ]);
        let lines: Vec<_> = table.lines().collect();

        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("Source          | App Package"));
        assert_eq!(
            lines[2],
            format!("{:<15} | {:<40} | 2024.17.0", "anddea", "com.reddit.frontpage")
        );
        assert_eq!(lines[3], "morphe          | ERROR: Could not download tools");
    }
}
