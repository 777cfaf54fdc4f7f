use std::time::Duration;

use reqwest::Client;

/// Default budget for any single call to an upstream collaborator.
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(5);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Build an HTTP client whose every request is bounded by `timeout`.
pub fn build_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(CONNECT_TIMEOUT.min(timeout))
        .pool_idle_timeout(Duration::from_secs(90))
        .user_agent(concat!("remindly/", env!("CARGO_PKG_VERSION")))
        .build()
}
