//! Invocation of the external java tools: the patch CLI and the bundle merge tool.

use std::{
    ffi::OsStr,
    io::Read,
    path::{Path, PathBuf},
    process::{Command, Output, Stdio},
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use rvx_res_man::{
    fetch::{FetchOptions, FetchOutcome, Fetcher},
    releases::{ReleaseIndex, Repo},
};

use crate::{bundle::BundleMerger, catalog::PatchSource, error::PipelineError};

// Interval at which a process run with a timeout is checked for exit.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The CLI and patch-set of one patch source, as fetched for a batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolSet {
    pub cli: PathBuf,
    pub patches: PathBuf,
}

/// The capabilities of a patch CLI used by the pipeline.
pub trait PatchToolchain {
    /// Output of `list-versions`, which lists the most common supported versions per package.
    fn list_versions(&self, tools: &ToolSet) -> Result<String>;

    /// Output of `list-patches --with-packages --with-versions`.
    fn list_patches(&self, tools: &ToolSet) -> Result<String>;

    /// Applies the patch-set to `inputs` (a base package, optionally followed by splits), writing `output`.
    fn patch(&self, tools: &ToolSet, inputs: &[PathBuf], output: &Path) -> Result<()>;
}

/// Fetches the CLI and patch-set of `source` into `dir`. Files already in `dir` are reused.
pub fn fetch_tools(
    index: &ReleaseIndex,
    source: &PatchSource,
    dir: &Path,
) -> Result<ToolSet, PipelineError> {
    let fetch = |repo: &Repo, extension: &str| {
        index
            .locate_and_fetch(repo, extension, dir)
            .map_err(|err| PipelineError::ToolFetchFailed {
                patch_source: source.name.clone(),
                reason: err.to_string(),
            })
    };

    let cli = fetch(&source.tool_repo, &source.tool_extension)?;
    let patches = fetch(&source.patches_repo, &source.patches_extension)?;
    info!("Using {} with {}", cli.display(), patches.display());
    Ok(ToolSet { cli, patches })
}

fn check_status(output: Output, what: &str) -> Result<Output> {
    if output.status.success() {
        Ok(output)
    } else {
        Err(anyhow!(
            "{what} exited with {}. stderr: {}, stdout: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim(),
            String::from_utf8_lossy(&output.stdout).trim(),
        ))
    }
}

fn drain(mut pipe: impl Read + Send + 'static) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

/// Runs `command` to completion, killing it if it has not exited after `timeout`.
fn output_with_timeout(mut command: Command, timeout: Duration) -> Result<Output> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .context("Starting process")?;

    let stdout = drain(child.stdout.take().ok_or(anyhow!("No stdout pipe"))?);
    let stderr = drain(child.stderr.take().ok_or(anyhow!("No stderr pipe"))?);

    let started = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait().context("Waiting for process")? {
            break status;
        }
        if started.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Err(anyhow!("Timed out after {}s", timeout.as_secs()));
        }
        thread::sleep(POLL_INTERVAL);
    };

    Ok(Output {
        status,
        stdout: stdout.join().map_err(|_| anyhow!("Reading stdout panicked"))?,
        stderr: stderr.join().map_err(|_| anyhow!("Reading stderr panicked"))?,
    })
}

/// Runs jars with a java executable.
#[derive(Clone, Debug)]
pub struct JavaToolchain {
    java: PathBuf,
    listing_timeout: Duration,
}

impl JavaToolchain {
    pub fn new(java: impl Into<PathBuf>, listing_timeout: Duration) -> Self {
        Self {
            java: java.into(),
            listing_timeout,
        }
    }

    fn jar_command(&self, jar: &Path, args: impl IntoIterator<Item = impl AsRef<OsStr>>) -> Command {
        let mut command = Command::new(&self.java);
        command.arg("-jar").arg(jar).args(args);
        debug!("Invoking {command:?}");
        command
    }

    fn list(&self, tools: &ToolSet, args: &[&str]) -> Result<String> {
        let mut command = self.jar_command(&tools.cli, args);
        command.arg(&tools.patches);

        let output = output_with_timeout(command, self.listing_timeout)
            .with_context(|| format!("Running {}", args[0]))?;
        let output = check_status(output, args[0])?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Runs `jar` with `args`, failing on a non-zero exit. Output is not captured so that tool progress is visible.
    fn run(&self, jar: &Path, args: impl IntoIterator<Item = impl AsRef<OsStr>>) -> Result<()> {
        let status = self
            .jar_command(jar, args)
            .status()
            .context("Invoking java")?;

        if status.success() {
            Ok(())
        } else {
            Err(anyhow!("{} exited with {status}", jar.display()))
        }
    }
}

impl PatchToolchain for JavaToolchain {
    fn list_versions(&self, tools: &ToolSet) -> Result<String> {
        self.list(tools, &["list-versions"])
    }

    fn list_patches(&self, tools: &ToolSet) -> Result<String> {
        self.list(tools, &["list-patches", "--with-packages", "--with-versions"])
    }

    fn patch(&self, tools: &ToolSet, inputs: &[PathBuf], output: &Path) -> Result<()> {
        let mut args = vec![
            OsStr::new("patch"),
            OsStr::new("-p"),
            tools.patches.as_os_str(),
            OsStr::new("-o"),
            output.as_os_str(),
        ];
        args.extend(inputs.iter().map(|input| input.as_os_str()));

        self.run(&tools.cli, args)
    }
}

/// Merges bundles with APKEditor, downloading its jar the first time it is needed.
pub struct ApkEditor<'a> {
    java: JavaToolchain,
    fetcher: &'a Fetcher<'a>,
    jar_url: String,
    jar_path: PathBuf,
}

impl<'a> ApkEditor<'a> {
    pub fn new(java: JavaToolchain, fetcher: &'a Fetcher<'a>, jar_url: impl Into<String>, jar_path: PathBuf) -> Self {
        Self {
            java,
            fetcher,
            jar_url: jar_url.into(),
            jar_path,
        }
    }

    /// Downloads the jar unless it is already present.
    fn ensure_jar(&self) -> Result<&Path> {
        if self.jar_path.exists() {
            return Ok(&self.jar_path);
        }

        if let Some(parent) = self.jar_path.parent() {
            std::fs::create_dir_all(parent).context("Creating tools directory")?;
        }
        info!("Downloading APKEditor");
        match self
            .fetcher
            .fetch_to_file(&self.jar_url, &self.jar_path, FetchOptions::default())?
        {
            FetchOutcome::Fetched(_) => Ok(&self.jar_path),
            FetchOutcome::NotFound => Err(anyhow!("APKEditor was not found at {}", self.jar_url)),
        }
    }
}

impl BundleMerger for ApkEditor<'_> {
    fn merge(&self, input: &Path, output: &Path) -> Result<()> {
        let jar = self.ensure_jar().context("Fetching APKEditor")?;
        self.java.run(
            jar,
            [
                OsStr::new("m"),
                OsStr::new("-i"),
                input.as_os_str(),
                OsStr::new("-o"),
                output.as_os_str(),
            ],
        )
    }
}
