//! Offline collaborators that keep the service usable without a scraper or a
//! marketplace account. They still exercise every prompt path a real adapter
//! would use.

use super::{
    AuthError, AuthProvider, Credentials, MarketplaceSubmitter, PricingPolicy, ProductScraper,
    ScrapeError, SubmitError,
};
use crate::models::{Job, Product, Specifics, SubmitResult};
use crate::prompt::PromptChannel;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

pub const MAX_TITLE_CHARS: usize = 80;
const DEFAULT_SUBMIT_ATTEMPTS: usize = 3;

pub struct StaticAuth;

#[async_trait]
impl AuthProvider for StaticAuth {
    async fn ensure(&self) -> Result<Credentials, AuthError> {
        Ok(Credentials {
            access_token: format!("demo_{}", Uuid::new_v4().simple()),
            expires_in: Some(3600),
        })
    }
}

/// Builds products from what the bulk text already says about the item.
pub struct DemoScraper {
    pub currency: String,
}

impl Default for DemoScraper {
    fn default() -> Self {
        Self {
            currency: "GBP".to_string(),
        }
    }
}

#[async_trait]
impl ProductScraper for DemoScraper {
    async fn scrape(
        &self,
        job: &Job,
        prompts: &dyn PromptChannel,
    ) -> Result<Product, ScrapeError> {
        let parsed = reqwest::Url::parse(&job.url)
            .map_err(|_| ScrapeError::InvalidUrl(job.url.clone()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ScrapeError::InvalidUrl(job.url.clone()));
        }

        let title = match job.title_hint.as_deref().map(str::trim) {
            Some(hint) if !hint.is_empty() => hint.to_string(),
            _ => {
                prompts.request_navigate(&job.url).await;
                prompts.request_text("What is the title:", "").await
            }
        };
        let title = title.trim().to_string();
        if title.is_empty() {
            return Err(ScrapeError::Extract("no title available".into()));
        }

        prompts.notify_log("Source scrape complete").await;
        Ok(Product {
            source_url: job.url.clone(),
            title,
            price: None,
            currency: self.currency.clone(),
            quantity: job.quantity,
            seller_note: job.note.clone(),
            images: Vec::new(),
            specifics: Specifics::new(),
            custom_specifics: job.custom_specifics.clone(),
            scraped_at: Utc::now(),
        })
    }
}

fn is_listable_price(price: f64) -> bool {
    price.is_finite() && price > 0.0
}

/// An item specific the marketplace insists on, with values to offer.
#[derive(Debug, Clone)]
struct RequiredAspect {
    name: String,
    suggestions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
enum ListingProblem {
    TitleTooLong,
    NonPositivePrice,
}

impl ListingProblem {
    fn describe(&self) -> &'static str {
        match self {
            ListingProblem::TitleTooLong => "title exceeds 80 characters",
            ListingProblem::NonPositivePrice => "price must be a number greater than zero",
        }
    }
}

struct ListingDraft {
    title: String,
    price: f64,
    quantity: u32,
    specifics: Specifics,
}

/// Validates a product the way the marketplace would and hands out a
/// synthetic listing id.
pub struct DemoSubmitter {
    pricing: Arc<dyn PricingPolicy>,
    required_aspects: Vec<RequiredAspect>,
    max_attempts: usize,
}

impl DemoSubmitter {
    pub fn new(pricing: Arc<dyn PricingPolicy>) -> Self {
        Self {
            pricing,
            required_aspects: vec![RequiredAspect {
                name: "Brand".into(),
                suggestions: vec!["Unbranded".into()],
            }],
            max_attempts: DEFAULT_SUBMIT_ATTEMPTS,
        }
    }

    async fn resolve_price(&self, product: &Product, prompts: &dyn PromptChannel) -> Option<f64> {
        if let Some(price) = product.price.filter(|price| is_listable_price(*price)) {
            return Some(price);
        }
        prompts.request_navigate(&product.source_url).await;
        let entered = prompts.request_text("What is the price:", "").await;
        entered
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|price| is_listable_price(*price))
    }

    fn validate(draft: &ListingDraft) -> Vec<ListingProblem> {
        let mut problems = Vec::new();
        if draft.title.chars().count() > MAX_TITLE_CHARS {
            problems.push(ListingProblem::TitleTooLong);
        }
        if !is_listable_price(draft.price) {
            problems.push(ListingProblem::NonPositivePrice);
        }
        problems
    }

    async fn correct(
        draft: &mut ListingDraft,
        problem: &ListingProblem,
        prompts: &dyn PromptChannel,
    ) {
        match problem {
            ListingProblem::TitleTooLong => {
                let suggestion: String = draft.title.chars().take(MAX_TITLE_CHARS).collect();
                let entered = prompts
                    .request_text(
                        "Title is longer than 80 characters. Enter a shorter title:",
                        suggestion.trim_end(),
                    )
                    .await;
                draft.title = entered.trim().to_string();
            }
            ListingProblem::NonPositivePrice => {
                let entered = prompts
                    .request_text("Price must be above zero. Enter a price:", "")
                    .await;
                if let Ok(price) = entered.trim().parse::<f64>()
                    && price.is_finite()
                {
                    draft.price = price;
                }
            }
        }
    }
}

#[async_trait]
impl MarketplaceSubmitter for DemoSubmitter {
    async fn submit(
        &self,
        product: &Product,
        prompts: &dyn PromptChannel,
    ) -> Result<SubmitResult, SubmitError> {
        if product.title.trim().is_empty() {
            return Err(SubmitError::InvalidProduct("title is empty".into()));
        }
        if product.currency.trim().is_empty() {
            return Err(SubmitError::InvalidProduct("currency is empty".into()));
        }
        prompts.notify_log("Preparing listing payload").await;

        let Some(source_price) = self.resolve_price(product, prompts).await else {
            return Ok(SubmitResult::rejected(vec!["no usable price".into()]));
        };

        let mut specifics = product.specifics.clone();
        specifics.extend(product.custom_specifics.clone());
        for aspect in &self.required_aspects {
            if specifics.contains_key_ignore_case(&aspect.name) {
                continue;
            }
            let question = format!("Item specific '{}' is required. Choose a value:", aspect.name);
            let value = if aspect.suggestions.is_empty() {
                prompts.request_text(&question, "").await
            } else {
                prompts.request_choice(&question, &aspect.suggestions).await
            };
            let value = value.trim();
            if value.is_empty() {
                return Ok(SubmitResult::rejected(vec![format!(
                    "missing required item specific '{}'",
                    aspect.name
                )]));
            }
            specifics.insert(aspect.name.clone(), value);
        }

        let mut draft = ListingDraft {
            title: product.title.clone(),
            price: self.pricing.adjust(source_price, prompts).await,
            quantity: product.quantity.max(1),
            specifics,
        };

        for attempt in 1..=self.max_attempts {
            let problems = Self::validate(&draft);
            if problems.is_empty() {
                let listing_id = format!("RL-{}", Uuid::new_v4().simple());
                prompts
                    .notify_log(&format!(
                        "Listed '{}' x{} at {:.2} {} with {} item specifics",
                        draft.title,
                        draft.quantity,
                        draft.price,
                        product.currency,
                        draft.specifics.len()
                    ))
                    .await;
                return Ok(SubmitResult::listed(listing_id));
            }

            let described: Vec<String> = problems
                .iter()
                .map(|problem| problem.describe().to_string())
                .collect();
            if attempt == self.max_attempts {
                return Ok(SubmitResult::rejected(described));
            }
            prompts
                .notify_log(&format!(
                    "Marketplace rejected attempt {attempt}: {}",
                    described.join("; ")
                ))
                .await;
            for problem in &problems {
                Self::correct(&mut draft, problem, prompts).await;
            }
        }

        Ok(SubmitResult::rejected(vec!["no submission attempts configured".into()]))
    }
}
