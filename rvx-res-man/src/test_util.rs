use crate::default_agent::{build_agent, AgentSettings};

/// An agent which is allowed to talk to plain-http mock servers.
pub(crate) fn test_agent() -> ureq::Agent {
    build_agent(&AgentSettings {
        https_only: false,
        ..Default::default()
    })
}

/// Runs blocking request code off the async test runtime so the mock server keeps responding.
pub(crate) async fn run_blocking<T, F>(f: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .expect("Blocking test task panicked")
}
