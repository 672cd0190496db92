//! Downloads of single artifacts to disk.
//! - A 404 is reported as [FetchOutcome::NotFound] so that callers can move on to another candidate.
//! - Redirects are followed by hand, and the `Authorization` header is only ever sent to the URL the caller gave.
//! - Content is written to a `.part` file which is renamed into place once complete, so the destination
//!   path only exists if the whole body was received.

use std::{
    fs::OpenOptions,
    io::{self, Write},
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use url::Url;

// Maximum number of redirect hops followed for a single download.
const MAX_REDIRECTS: u32 = 5;

/// The result of a download attempt that did not fail outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The file was written to the destination path. Contains the number of bytes written.
    Fetched(u64),
    /// The server responded with 404.
    NotFound,
}

/// How a request should be authenticated and what content it should ask for.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions<'a> {
    /// Sends the fetcher's token (if any) to the first URL. Never sent to redirect targets.
    pub authenticated: bool,
    /// Value of the `Accept` header, if one is needed (e.g. GitHub release asset API URLs).
    pub accept: Option<&'a str>,
}

pub struct Fetcher<'agent> {
    agent: &'agent ureq::Agent,
    auth_token: Option<String>,
}

pub(crate) fn is_redirect(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

// Works out the absolute URL given in the `Location` header of a redirect response.
fn redirect_target(resp: &ureq::Response) -> Result<String> {
    let location = resp
        .header("Location")
        .ok_or(anyhow!("Redirect response had no Location header"))?;
    let base = Url::parse(resp.get_url()).context("Request URL was invalid")?;

    Ok(base
        .join(location)
        .context("Redirect Location was not a valid URL")?
        .to_string())
}

/// The temporary path a download is written to before being moved to `dest`.
fn partial_path(dest: &Path) -> PathBuf {
    let mut file_name = dest
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    file_name.push(".part");
    dest.with_file_name(file_name)
}

impl<'agent> Fetcher<'agent> {
    /// Creates a fetcher. `auth_token` is sent as `Authorization: Bearer <value>` on authenticated requests.
    pub fn new(agent: &'agent ureq::Agent, auth_token: Option<String>) -> Self {
        Self {
            agent,
            auth_token: auth_token.filter(|token| !token.is_empty()),
        }
    }

    /// Gets the agent used by the fetcher.
    pub fn get_agent(&self) -> &'agent ureq::Agent {
        self.agent
    }

    /// Adds the authorization header to `req` if a token is available.
    pub fn authorize(&self, req: ureq::Request) -> ureq::Request {
        match &self.auth_token {
            Some(token) => req.set("Authorization", &format!("Bearer {token}")),
            None => req,
        }
    }

    /// Downloads `url` to `dest`, following redirects without credentials.
    /// Any status other than success, redirect or 404 is an error.
    /// On any error or 404, nothing is left at `dest` (or at the temporary `.part` path).
    pub fn fetch_to_file(
        &self,
        url: &str,
        dest: impl AsRef<Path>,
        options: FetchOptions,
    ) -> Result<FetchOutcome> {
        let dest = dest.as_ref();
        info!("Downloading {url} -> {}", dest.display());

        let mut current_url = url.to_string();
        let mut hops = 0;
        let resp = loop {
            let mut req = self.agent.get(&current_url);
            if let Some(accept) = options.accept {
                req = req.set("Accept", accept);
            }
            // Credentials are scoped to the URL we were given, not wherever it redirects to.
            if options.authenticated && hops == 0 {
                req = self.authorize(req);
            }

            match req.call() {
                Ok(resp) if is_redirect(resp.status()) => {
                    if hops == MAX_REDIRECTS {
                        return Err(anyhow!("Too many redirects while downloading {url}"));
                    }
                    hops += 1;
                    current_url = redirect_target(&resp)?;
                    debug!("Following redirect to {current_url}");
                }
                Ok(resp) => break resp,
                Err(ureq::Error::Status(404, _)) => {
                    warn!("404 Not Found for {current_url}");
                    return Ok(FetchOutcome::NotFound);
                }
                Err(ureq::Error::Status(code, _)) => {
                    return Err(anyhow!("Request failed as got status {code} from server"))
                }
                Err(ureq::Error::Transport(transport_err)) => {
                    return Err(transport_err).context("Failed to make request")
                }
            }
        };

        let part_path = partial_path(dest);
        let completed = write_body(resp, &part_path).and_then(|written| {
            std::fs::rename(&part_path, dest)
                .context("Moving completed download into place")
                .map(|_| written)
        });

        match completed {
            Ok(written) => Ok(FetchOutcome::Fetched(written)),
            Err(err) => {
                let _ = std::fs::remove_file(&part_path);
                Err(err)
            }
        }
    }
}

// Copies the response body to a fresh file at `to`, returning the number of bytes written.
fn write_body(resp: ureq::Response, to: &Path) -> Result<u64> {
    let mut handle = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(to)
        .context("Failed to create destination file")?;

    let written = io::copy(&mut resp.into_reader(), &mut handle)
        .context("Lost connection mid download")?;
    handle.flush()?;
    handle.sync_all().context("Flushing download to disk")?;
    Ok(written)
}
