use crate::config::EbayCredentials;
use crate::market::{AuthError, AuthProvider, Credentials};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use reqwest::{Client, header::AUTHORIZATION};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

pub const USER_SCOPES: &[&str] = &[
    "https://api.ebay.com/oauth/api_scope/sell.inventory",
    "https://api.ebay.com/oauth/api_scope/sell.marketing",
    "https://api.ebay.com/oauth/api_scope/sell.account",
    "https://api.ebay.com/oauth/api_scope/sell.fulfillment",
];

// Refresh this long before eBay says the token dies.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    credentials: Credentials,
    valid_until: Instant,
}

/// Exchanges the seller's long-lived refresh token for a user access token
/// and caches it until shortly before expiry.
pub struct EbayRefreshAuth {
    client: Client,
    credentials: EbayCredentials,
    token_url: String,
    cached: Mutex<Option<CachedToken>>,
}

impl EbayRefreshAuth {
    pub fn new(client: Client, credentials: EbayCredentials) -> Self {
        let token_url = super::oauth_token_url(credentials.is_production());
        Self {
            client,
            credentials,
            token_url,
            cached: Mutex::new(None),
        }
    }

    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    fn basic_auth_header(&self) -> Result<String, AuthError> {
        if self.credentials.app_id.is_empty() || self.credentials.cert_id.is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        let raw = format!("{}:{}", self.credentials.app_id, self.credentials.cert_id);
        Ok(format!("Basic {}", BASE64.encode(raw)))
    }

    async fn request_token(&self) -> Result<TokenResponse, AuthError> {
        let header = self.basic_auth_header()?;
        if self.credentials.refresh_token.trim().is_empty() {
            return Err(AuthError::MissingRefreshToken);
        }
        let scope = USER_SCOPES.join(" ");
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", self.credentials.refresh_token.trim()),
            ("scope", scope.as_str()),
        ];
        let response = self
            .client
            .post(&self.token_url)
            .header(AUTHORIZATION, header)
            .form(&params)
            .send()
            .await
            .map_err(|err| AuthError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::Request(format!("HTTP {}", response.status())));
        }

        response
            .json()
            .await
            .map_err(|err| AuthError::Request(err.to_string()))
    }
}

#[async_trait]
impl AuthProvider for EbayRefreshAuth {
    async fn ensure(&self) -> Result<Credentials, AuthError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref()
            && token.valid_until > Instant::now()
        {
            return Ok(token.credentials.clone());
        }

        let token = match self.request_token().await {
            Ok(token) => token,
            Err(err) => {
                warn!(target: "relist.ebay", error = %err, "token_refresh_failed");
                return Err(err);
            }
        };
        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(0));
        let credentials = Credentials {
            access_token: token.access_token,
            expires_in: token.expires_in,
        };
        info!(target: "relist.ebay", expires_in = ?token.expires_in, "user_token_refreshed");
        *cached = Some(CachedToken {
            credentials: credentials.clone(),
            valid_until: Instant::now() + lifetime.saturating_sub(EXPIRY_MARGIN),
        });
        Ok(credentials)
    }
}
