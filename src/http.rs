use crate::config::AppConfig;
use reqwest::Client;
use std::time::Duration;
use tracing::warn;

pub fn build_client(config: &AppConfig) -> Client {
    Client::builder()
        .user_agent(concat!("relist-api-rs/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(config.http_timeout_secs))
        .connect_timeout(Duration::from_secs(config.http_connect_timeout_secs))
        .build()
        .unwrap_or_else(|err| {
            warn!(target: "relist.api", error = %err, "falling back to default http client");
            Client::new()
        })
}
