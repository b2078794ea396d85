pub mod auth;

pub use auth::EbayRefreshAuth;

pub fn api_root(production: bool) -> &'static str {
    if production {
        "https://api.ebay.com"
    } else {
        "https://api.sandbox.ebay.com"
    }
}

pub fn oauth_token_url(production: bool) -> String {
    format!("{}/identity/v1/oauth2/token", api_root(production))
}
