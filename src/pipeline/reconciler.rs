//! Merges one scrape outcome into the price-history store.
//!
//! History is append-only. A product is created the first time it scrapes
//! successfully; a variant is created the first time its (colour, size) is
//! seen. Variants missing from a later scrape simply get no new observation.

use crate::models::{ScrapeError, ScrapeOutcome, ScrapedProduct, Style, StyleKey};
use crate::storage::{Repository, StoreResult};
use chrono::{NaiveDateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStatus {
    Created,
    Updated,
    /// Nothing was written.
    Skipped,
}

pub struct Reconciler {
    repo: Arc<Repository>,
}

impl Reconciler {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }

    pub fn merge(&self, outcome: &ScrapeOutcome) -> StoreResult<MergeStatus> {
        self.merge_at(outcome, Utc::now().naive_utc())
    }

    pub fn merge_at(&self, outcome: &ScrapeOutcome, now: NaiveDateTime) -> StoreResult<MergeStatus> {
        let code = outcome.product_code.as_str();

        match &outcome.result {
            Ok(scraped) => self.merge_scraped(code, scraped, now),
            Err(ScrapeError::NotFound) => self.mark_delisted(code, now),
            // retry scheduling belongs to the caller
            Err(_) => Ok(MergeStatus::Skipped),
        }
    }

    fn merge_scraped(
        &self,
        code: &str,
        scraped: &ScrapedProduct,
        now: NaiveDateTime,
    ) -> StoreResult<MergeStatus> {
        let (product, status, mut known) = match self.repo.find_product_by_code(code)? {
            Some(product) => {
                if product.name != scraped.name {
                    info!("{}: renamed {:?} → {:?}", code, product.name, scraped.name);
                    self.repo.rename_product(product.id, &scraped.name)?;
                }
                let known: HashMap<StyleKey, Style> = self
                    .repo
                    .styles_for_product(product.id)?
                    .into_iter()
                    .map(|s| (s.key(), s))
                    .collect();
                (product, MergeStatus::Updated, known)
            }
            None => {
                let product = self.repo.create_product(code, &scraped.name)?;
                (product, MergeStatus::Created, HashMap::new())
            }
        };

        let mut appended = 0usize;
        let mut created = 0usize;
        for style in &scraped.styles {
            let style_id = match known.get(&style.key()) {
                Some(existing) => existing.id,
                None => {
                    let new_style = self.repo.create_style(product.id, style)?;
                    let id = new_style.id;
                    known.insert(new_style.key(), new_style);
                    created += 1;
                    id
                }
            };
            self.repo
                .append_observation(style_id, style.price, style.stock, now)?;
            appended += 1;
        }

        debug!(
            "{}: {:?}, {} new styles, {} observations",
            code, status, created, appended
        );
        Ok(status)
    }

    /// Zero price and stock on every known style; never creates anything.
    fn mark_delisted(&self, code: &str, now: NaiveDateTime) -> StoreResult<MergeStatus> {
        let Some(product) = self.repo.find_product_by_code(code)? else {
            debug!("{}: not found and never stored, nothing to do", code);
            return Ok(MergeStatus::Skipped);
        };

        let styles = self.repo.styles_for_product(product.id)?;
        for style in &styles {
            self.repo.append_observation(style.id, 0, 0, now)?;
        }
        info!("{}: delisted, zeroed {} styles", code, styles.len());
        Ok(MergeStatus::Updated)
    }
}
