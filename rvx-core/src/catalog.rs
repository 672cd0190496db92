//! The fixed tables of patch sources and apps a batch can be run against.

use rvx_res_man::releases::Repo;

/// An upstream provider of a patch-set and the command line tool that applies it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatchSource {
    pub name: String,
    pub patches_repo: Repo,
    pub tool_repo: Repo,
    /// e.g. `.rvp`
    pub patches_extension: String,
    /// e.g. `.jar`
    pub tool_extension: String,
}

/// An app that can be patched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppTarget {
    /// Short key used in configuration and output file names, e.g. `yt-music`.
    pub key: String,
    /// Android package ID.
    pub package_id: String,
    /// Name the app is listed under on catalog sites.
    pub display_name: String,
    /// Path of the app on APKMirror, below `/apk/`.
    pub catalog_path: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Catalog {
    sources: Vec<PatchSource>,
    apps: Vec<AppTarget>,
}

fn repo(owner: &str, name: &str) -> Repo {
    Repo {
        owner: owner.to_string(),
        repo: name.to_string(),
    }
}

fn source(name: &str, patches: (&str, &str), tool: (&str, &str), patches_extension: &str) -> PatchSource {
    PatchSource {
        name: name.to_string(),
        patches_repo: repo(patches.0, patches.1),
        tool_repo: repo(tool.0, tool.1),
        patches_extension: patches_extension.to_string(),
        tool_extension: ".jar".to_string(),
    }
}

fn app(key: &str, package_id: &str, display_name: &str, catalog_path: &str) -> AppTarget {
    AppTarget {
        key: key.to_string(),
        package_id: package_id.to_string(),
        display_name: display_name.to_string(),
        catalog_path: Some(catalog_path.to_string()),
    }
}

impl Catalog {
    pub fn new(sources: Vec<PatchSource>, apps: Vec<AppTarget>) -> Self {
        Self { sources, apps }
    }

    /// The sources and apps supported out of the box.
    pub fn builtin() -> Self {
        Self::new(
            vec![
                source(
                    "revanced",
                    ("ReVanced", "revanced-patches"),
                    ("ReVanced", "revanced-cli"),
                    ".rvp",
                ),
                source(
                    "inotia00",
                    ("inotia00", "revanced-patches"),
                    ("inotia00", "revanced-cli"),
                    ".rvp",
                ),
                // anddea publishes patches only, and is compatible with inotia00's CLI.
                source(
                    "anddea",
                    ("anddea", "revanced-patches"),
                    ("inotia00", "revanced-cli"),
                    ".rvp",
                ),
                source(
                    "morphe",
                    ("MorpheApp", "morphe-patches"),
                    ("MorpheApp", "morphe-cli"),
                    ".mpp",
                ),
            ],
            vec![
                app("youtube", "com.google.android.youtube", "YouTube", "google-inc/youtube"),
                app(
                    "yt-music",
                    "com.google.android.apps.youtube.music",
                    "YouTube Music",
                    "google-inc/youtube-music",
                ),
                app("reddit", "com.reddit.frontpage", "Reddit", "redditinc/reddit"),
                app("twitter", "com.twitter.android", "X", "x-corp/twitter"),
                app("spotify", "com.spotify.music", "Spotify", "spotify-ab/spotify"),
            ],
        )
    }

    pub fn sources(&self) -> &[PatchSource] {
        &self.sources
    }

    pub fn apps(&self) -> &[AppTarget] {
        &self.apps
    }

    pub fn source(&self, name: &str) -> Option<&PatchSource> {
        self.sources.iter().find(|source| source.name == name)
    }

    pub fn app(&self, key: &str) -> Option<&AppTarget> {
        self.apps.iter().find(|app| app.key == key)
    }

    /// Expands an app list as given in configuration: either `all`, or comma separated keys.
    /// Unknown keys are kept, so that they are reported as skipped rather than silently ignored.
    pub fn select_apps(&self, list: &str) -> Vec<String> {
        if list.trim().eq_ignore_ascii_case("all") {
            self.apps.iter().map(|app| app.key.clone()).collect()
        } else {
            list.split(',')
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(str::to_string)
                .collect()
        }
    }
}
