use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{error, info, warn};
use rvx_core::{
    catalog::{Catalog, PatchSource},
    outcome,
    parameters::BuildParameters,
    report,
    tools::JavaToolchain,
};
use rvx_res_man::{
    default_agent::{build_agent, AgentSettings},
    fetch::Fetcher,
    releases::ReleaseIndex,
};

#[derive(Parser)]
#[command(version, long_about = None)]
#[command(arg_required_else_help = true)]
#[command(about = "Acquires base packages of apps compatible with ReVanced patch-sets, and patches them")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CommonArgs {
    /// Directory below which tools, work and output directories are created.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    /// Token used for the GitHub API and the storage repository.
    #[arg(long, global = true, env = "PRIVATE_REPO_TOKEN", hide_env_values = true)]
    token: Option<String>,
    /// Used if no other token is given.
    #[arg(long, global = true, env = "GITHUB_TOKEN", hide_env_values = true, hide = true)]
    github_token: Option<String>,
    /// The java executable to run tools with.
    #[arg(long, global = true, env = "JAVA", default_value = "java")]
    java: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Patches a batch of apps with one or more patch sources.
    Build {
        /// Patch source(s) to use, comma separated.
        #[arg(short, long, env = "PATCH_SOURCE")]
        source: String,
        /// `all`, or comma separated app keys.
        #[arg(short, long, env = "APPS_LIST", default_value = "all")]
        apps: String,
        /// `auto`, a version for every app, or a per-app map such as `youtube=19.16.39,reddit=2024.17.0`.
        #[arg(short, long, env = "VERSION", default_value = "auto")]
        version: String,
        /// File that release details are appended to.
        #[arg(long, env = "GITHUB_ENV")]
        env_file: Option<PathBuf>,
        /// Only acquire base packages from storage, never from catalog sites.
        #[arg(long)]
        no_catalogs: bool,
    },
    /// Prints the newest version of every app supported by each patch source.
    CheckVersions,
}

fn build_parameters(common: CommonArgs) -> BuildParameters {
    let mut params = BuildParameters::with_root(&common.root);
    params.auth_token = common
        .token
        .or(common.github_token)
        .filter(|token| !token.is_empty());
    params.java = common.java;
    params
}

fn resolve_sources<'c>(catalog: &'c Catalog, names: &str) -> Result<Vec<&'c PatchSource>> {
    let sources = names
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            catalog
                .source(name)
                .ok_or_else(|| anyhow!("Invalid source: {name}"))
        })
        .collect::<Result<Vec<_>>>()?;

    if sources.is_empty() {
        return Err(anyhow!("No patch source given"));
    }
    Ok(sources)
}

fn build(
    catalog: &Catalog,
    params: &BuildParameters,
    fetcher: &Fetcher,
    source_names: &str,
    apps_list: &str,
    version: &str,
) -> Result<bool> {
    let sources = resolve_sources(catalog, source_names)?;
    let apps = catalog.select_apps(apps_list);

    let summaries = match rvx_core::run_build(catalog, params, fetcher, &sources, &apps, version) {
        Ok(summaries) => summaries,
        Err(err) => {
            error!("Critical: {err}");
            return Ok(false);
        }
    };

    outcome::write_summary(&summaries, &params.dist_dir)?;
    if let Some(env_file) = &params.env_file {
        let today = chrono::Local::now().date_naive();
        for summary in &summaries {
            outcome::append_env_file(env_file, summary, today)
                .context("Writing release details")?;
        }
    }

    let succeeded: usize = summaries.iter().map(|s| s.success_count()).sum();
    let attempted: usize = summaries.iter().map(|s| s.total()).sum();
    info!("Successful builds across all sources: {succeeded}/{attempted}");
    if succeeded == 0 {
        warn!("No app was built successfully");
    }
    Ok(succeeded > 0)
}

fn check_versions(catalog: &Catalog, params: &BuildParameters, fetcher: &Fetcher) {
    let index = ReleaseIndex::new(fetcher, params.github_api_root.clone());
    let toolchain = JavaToolchain::new(&params.java, params.listing_timeout);

    let rows = report::check_versions(catalog, &index, &toolchain, &params.check_dir);
    print!("{}", report::format_report(&rows));
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let catalog = Catalog::builtin();
    let mut params = build_parameters(cli.common);

    let agent = build_agent(&AgentSettings::default());
    let fetcher = Fetcher::new(&agent, params.auth_token.clone());

    match cli.command {
        Commands::Build {
            source,
            apps,
            version,
            env_file,
            no_catalogs,
        } => {
            params.env_file = env_file;
            params.use_catalogs = !no_catalogs;
            if !build(&catalog, &params, &fetcher, &source, &apps, &version)? {
                std::process::exit(1);
            }
        }
        Commands::CheckVersions => check_versions(&catalog, &params, &fetcher),
    }

    Ok(())
}
