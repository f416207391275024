use std::{sync::OnceLock, time::Duration};

use http::{HeaderMap, HeaderValue, header};
use reqwest::Client;

/// Pooled HTTP client shared by every adapter
///
/// No overall timeout is set so long streams are not cut off; adapters
/// apply their configured per-request timeout instead.
pub fn http_client() -> Client {
    static CLIENT: OnceLock<Client> = OnceLock::new();

    CLIENT
        .get_or_init(|| {
            let mut headers = HeaderMap::new();
            headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));

            Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .pool_idle_timeout(Some(Duration::from_secs(90)))
                .tcp_nodelay(true)
                .tcp_keepalive(Some(Duration::from_secs(60)))
                .default_headers(headers)
                .build()
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "falling back to a default HTTP client");
                    Client::new()
                })
        })
        .clone()
}
