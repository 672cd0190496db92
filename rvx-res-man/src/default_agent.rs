use std::time::Duration;

// If no data is read for this period of time during a file download, the download will be failed.
pub const REQUEST_TIMEOUT_READ_SECS: u64 = 30;
// If no data is written for this period of time during a file download, the download will be failed
pub const REQUEST_TIMEOUT_WRITE_SECS: u64 = 30;
// Upper bound on establishing a connection to any upstream.
pub const REQUEST_TIMEOUT_CONNECT_SECS: u64 = 15;

/// Settings for the HTTP agent shared by every component of a batch run.
#[derive(Clone, Debug)]
pub struct AgentSettings {
    pub timeout_read: Duration,
    pub timeout_write: Duration,
    pub timeout_connect: Duration,
    /// Refuse plain `http://` URLs. Only disabled when talking to local test servers.
    pub https_only: bool,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            timeout_read: Duration::from_secs(REQUEST_TIMEOUT_READ_SECS),
            timeout_write: Duration::from_secs(REQUEST_TIMEOUT_WRITE_SECS),
            timeout_connect: Duration::from_secs(REQUEST_TIMEOUT_CONNECT_SECS),
            https_only: true,
        }
    }
}

/// Builds the agent used for all requests.
/// Redirects are never followed automatically: the fetcher follows them itself so that
/// credentials are not forwarded to a different host.
pub fn build_agent(settings: &AgentSettings) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_read(settings.timeout_read)
        .timeout_write(settings.timeout_write)
        .timeout_connect(settings.timeout_connect)
        .redirects(0)
        .https_only(settings.https_only)
        .try_proxy_from_env(true)
        .user_agent(format!("rvx/{}", env!("CARGO_PKG_VERSION")).as_str())
        .build()
}
