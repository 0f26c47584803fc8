use crate::models::TargetStatus;
use crate::storage::{Repository, StoreResult};
use crate::utils::fmt_number;
use std::sync::Arc;
use tracing::debug;

const TARGET_MET_HEADER: &str = "The following products have achieved your target price:";
const LOW_STOCK_HEADER: &str =
    "The following products have not achieved your target price but the stock is low now:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alert {
    TargetMet,
    LowStock,
}

/// At price == target only `TargetMet` is reported, even if stock is low.
pub fn classify(status: &TargetStatus, low_stock_threshold: i64) -> Option<Alert> {
    let (price, stock) = (status.price?, status.stock?);
    if price <= status.target_price {
        Some(Alert::TargetMet)
    } else if stock <= low_stock_threshold {
        Some(Alert::LowStock)
    } else {
        None
    }
}

fn line(status: &TargetStatus) -> String {
    format!(
        "{} ({} / {}): target price: ¥{}, current price: ¥{}, stock: {}",
        status.name,
        status.colour,
        status.size,
        fmt_number(status.target_price),
        fmt_number(status.price.unwrap_or_default()),
        status.stock.unwrap_or_default(),
    )
}

/// Build the digest body, or `None` when nothing qualifies.
pub fn compose_digest(statuses: &[TargetStatus], low_stock_threshold: i64) -> Option<String> {
    let mut met = Vec::new();
    let mut low = Vec::new();
    for status in statuses {
        match classify(status, low_stock_threshold) {
            Some(Alert::TargetMet) => met.push(line(status)),
            Some(Alert::LowStock) => low.push(line(status)),
            None => {}
        }
    }
    debug!("digest: {} target met, {} low stock", met.len(), low.len());

    let mut sections = Vec::new();
    for (header, lines) in [(TARGET_MET_HEADER, met), (LOW_STOCK_HEADER, low)] {
        if !lines.is_empty() {
            sections.push(format!("{header}\n{}", lines.join("\n")));
        }
    }

    if sections.is_empty() {
        None
    } else {
        Some(sections.join("\n\n"))
    }
}

pub struct ReportGenerator {
    repo: Arc<Repository>,
    low_stock_threshold: i64,
}

impl ReportGenerator {
    pub fn new(repo: Arc<Repository>, low_stock_threshold: i64) -> Self {
        Self {
            repo,
            low_stock_threshold,
        }
    }

    pub fn generate(&self) -> StoreResult<Option<String>> {
        let statuses = self.repo.target_statuses()?;
        Ok(compose_digest(&statuses, self.low_stock_threshold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(price: Option<i64>, stock: Option<i64>) -> TargetStatus {
        TargetStatus {
            target_id: 1,
            product_code: "1129250".into(),
            name: "Chair".into(),
            colour: "Red".into(),
            size: "M".into(),
            image_url: String::new(),
            target_price: 1000,
            price,
            stock,
        }
    }

    #[test]
    fn classification_at_threshold_nine() {
        assert_eq!(classify(&status(Some(900), Some(5)), 9), Some(Alert::TargetMet));
        assert_eq!(classify(&status(Some(1100), Some(5)), 9), Some(Alert::LowStock));
        assert_eq!(classify(&status(Some(1000), Some(20)), 9), Some(Alert::TargetMet));
        assert_eq!(classify(&status(Some(1100), Some(20)), 9), None);
        assert_eq!(classify(&status(Some(1000), Some(3)), 9), Some(Alert::TargetMet));
        assert_eq!(classify(&status(Some(1100), Some(9)), 9), Some(Alert::LowStock));
        assert_eq!(classify(&status(None, None), 9), None);
    }

    #[test]
    fn nothing_qualifies_means_no_digest() {
        assert_eq!(compose_digest(&[status(Some(1100), Some(20))], 9), None);
        assert_eq!(compose_digest(&[], 9), None);
    }

    #[test]
    fn digest_groups_sections() {
        let body = compose_digest(
            &[status(Some(900), Some(99)), status(Some(1_200), Some(2))],
            9,
        )
        .unwrap();
        assert!(body.starts_with(TARGET_MET_HEADER));
        assert!(body.contains("current price: ¥900"));
        assert!(body.contains(LOW_STOCK_HEADER));
        assert!(body.contains("target price: ¥1,000, current price: ¥1,200, stock: 2"));
    }
}
