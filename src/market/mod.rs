//! Collaborator seams the batch core calls out to. The core never knows how a
//! page is scraped, how a listing is shaped on the wire, or where tokens come
//! from; it only sees these traits and their errors.

pub mod demo;
pub mod pricing;

use crate::models::{Job, Product, SubmitResult};
use crate::prompt::PromptChannel;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("invalid source url: {0}")]
    InvalidUrl(String),
    #[error("could not extract product: {0}")]
    Extract(String),
}

#[derive(Debug, Error)]
pub enum SubmitError {
    /// The record is not a listable product at all, e.g. a hand-loaded file
    /// without a title.
    #[error("product cannot be submitted: {0}")]
    InvalidProduct(String),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing marketplace app credentials in env")]
    MissingCredentials,
    #[error("no refresh token configured")]
    MissingRefreshToken,
    #[error("oauth request failed: {0}")]
    Request(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub access_token: String,
    pub expires_in: Option<u64>,
}

#[async_trait]
pub trait ProductScraper: Send + Sync {
    /// Turns a source page into a normalized product, carrying the job's
    /// quantity, note and custom specifics through.
    async fn scrape(&self, job: &Job, prompts: &dyn PromptChannel)
    -> Result<Product, ScrapeError>;
}

#[async_trait]
pub trait MarketplaceSubmitter: Send + Sync {
    /// Creates a live listing. Any local correct-and-retry loop happens in
    /// here; callers only see the final outcome.
    async fn submit(
        &self,
        product: &Product,
        prompts: &dyn PromptChannel,
    ) -> Result<SubmitResult, SubmitError>;
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn ensure(&self) -> Result<Credentials, AuthError>;
}

#[async_trait]
pub trait PricingPolicy: Send + Sync {
    /// Maps the source price to the price to list at.
    async fn adjust(&self, source_price: f64, prompts: &dyn PromptChannel) -> f64;
}
