use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scraper::http_client::FetchError;
use crate::scraper::parsers::ParseError;

// ── Stored rows ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: i64,
    pub code: String,
    pub name: String,
}

/// One colour/size variant of a product. Unique per (product_id, colour, size).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Style {
    pub id: i64,
    pub product_id: i64,
    pub style_code: String,
    pub colour: String,
    pub size: String,
    pub image_url: String,
}

impl Style {
    pub fn key(&self) -> StyleKey {
        StyleKey::new(&self.colour, &self.size)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceObservation {
    pub id: i64,
    pub style_id: i64,
    pub price: i64,
    pub stock: i64,
    pub observed_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Target {
    pub id: i64,
    pub product_code: String,
    pub product_id: i64,
    pub style_id: i64,
    pub target_price: i64,
}

/// A target joined with its style, product and latest observation.
/// `price`/`stock` are `None` when the style has never been observed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetStatus {
    pub target_id: i64,
    pub product_code: String,
    pub name: String,
    pub colour: String,
    pub size: String,
    pub image_url: String,
    pub target_price: i64,
    pub price: Option<i64>,
    pub stock: Option<i64>,
}

/// Identity of a variant within one product.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StyleKey {
    pub colour: String,
    pub size: String,
}

impl StyleKey {
    pub fn new(colour: &str, size: &str) -> Self {
        Self {
            colour: colour.to_string(),
            size: size.to_string(),
        }
    }
}

// ── Scrape records ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ScrapedProduct {
    pub name: String,
    pub styles: Vec<ScrapedStyle>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ScrapedStyle {
    pub style_code: String,
    pub image_url: String,
    pub colour: String,
    pub size: String,
    pub price: i64,
    pub stock: i64,
}

impl ScrapedStyle {
    pub fn key(&self) -> StyleKey {
        StyleKey::new(&self.colour, &self.size)
    }
}

#[derive(Debug, Clone, Error)]
pub enum ScrapeError {
    #[error("transport: {0}")]
    Transport(#[from] FetchError),

    /// The site answered but the product is gone.
    #[error("product not found")]
    NotFound,

    #[error("parse: {0}")]
    Parse(#[from] ParseError),

    #[error("scrape task aborted: {0}")]
    Task(String),
}

impl ScrapeError {
    /// Whether the code should be scraped again on the next cycle.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ScrapeError::NotFound | ScrapeError::Transport(FetchError::InvalidCode(_))
        )
    }
}

/// Result of scraping one product code. Not persisted.
#[derive(Debug, Clone)]
pub struct ScrapeOutcome {
    pub product_code: String,
    pub result: Result<ScrapedProduct, ScrapeError>,
}

impl ScrapeOutcome {
    pub fn new(product_code: impl Into<String>, result: Result<ScrapedProduct, ScrapeError>) -> Self {
        Self {
            product_code: product_code.into(),
            result,
        }
    }

    pub fn is_retryable_failure(&self) -> bool {
        matches!(&self.result, Err(e) if e.is_retryable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_and_scraped_keys_agree() {
        let scraped = ScrapedStyle {
            colour: "Navy".into(),
            size: "M/Long".into(),
            ..Default::default()
        };
        let stored = Style {
            id: 7,
            product_id: 1,
            style_code: "01001".into(),
            colour: scraped.colour.clone(),
            size: scraped.size.clone(),
            image_url: String::new(),
        };
        assert_eq!(stored.key(), scraped.key());
    }

    #[test]
    fn not_found_and_bad_codes_are_terminal() {
        assert!(!ScrapeError::NotFound.is_retryable());
        assert!(!ScrapeError::Transport(FetchError::InvalidCode("../x".into())).is_retryable());
        assert!(ScrapeError::Transport(FetchError::Status(503)).is_retryable());
        assert!(ScrapeError::Parse(ParseError::MissingElement("variant area")).is_retryable());
        assert!(ScrapeError::Task("panicked".into()).is_retryable());
    }
}
