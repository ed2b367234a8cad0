use std::time::Duration;

use crate::config::HttpClientSettings;
use crate::error::Result;

/// Build the shared outbound client used for both provider calls and ledger
/// calls. The pool is bounded (idle count and idle lifetime) and every call
/// carries a fixed timeout; callers clone the returned `reqwest::Client`
/// freely, clones share the same pool.
pub fn build_shared_client(settings: &HttpClientSettings) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(settings.timeout_secs))
        .pool_max_idle_per_host(settings.pool_max_idle_per_host)
        .pool_idle_timeout(Duration::from_secs(settings.pool_idle_timeout_secs))
        .build()?;
    Ok(client)
}
