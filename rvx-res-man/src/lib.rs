//! Network resources for the build pipeline: the shared HTTP agent, artifact downloads,
//! GitHub release lookup and the third-party catalog scraper.

pub mod default_agent;
pub mod fetch;
pub mod models;
pub mod releases;
pub mod scraper;

#[cfg(test)]
pub(crate) mod test_util;
