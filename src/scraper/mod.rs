pub mod cleaner;
pub mod http_client;
pub mod parsers;

use crate::models::{ScrapeError, ScrapeOutcome};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

pub use self::http_client::{FetchError, HttpFetcher, PageFetcher};
use self::parsers::parse_product_page;

// ── Coordinator ───────────────────────────────────────────────────────────────

/// Fans fetch + parse out across product codes and joins the results.
///
/// Every input code yields exactly one [`ScrapeOutcome`]; a failure on one
/// code never affects the others. At most `concurrency` fetches are in
/// flight at once.
pub struct ScrapeCoordinator {
    fetcher: Arc<dyn PageFetcher>,
    permits: Arc<Semaphore>,
}

impl ScrapeCoordinator {
    pub fn new(fetcher: Arc<dyn PageFetcher>, concurrency: usize) -> Self {
        Self {
            fetcher,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    pub async fn run(&self, codes: &[String]) -> Vec<ScrapeOutcome> {
        if codes.is_empty() {
            return Vec::new();
        }
        info!("Scraping {} product codes", codes.len());

        let mut handles = Vec::with_capacity(codes.len());
        for code in codes {
            let task_code = code.clone();
            let fetcher = Arc::clone(&self.fetcher);
            let permits = Arc::clone(&self.permits);

            let handle = tokio::spawn(async move {
                let page = {
                    let _permit = permits
                        .acquire_owned()
                        .await
                        .map_err(|e| ScrapeError::Task(e.to_string()))?;
                    fetcher.fetch(&task_code).await?
                };

                // parsing is CPU-bound; keep it off the async workers
                let product = tokio::task::spawn_blocking(move || parse_product_page(&page))
                    .await
                    .map_err(|e| ScrapeError::Task(e.to_string()))??;
                Ok::<_, ScrapeError>(product)
            });

            handles.push((code.clone(), handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (code, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    error!("Task panic for {}: {}", code, e);
                    Err(ScrapeError::Task(e.to_string()))
                }
            };

            match &result {
                Ok(product) => debug!("{}: {} styles", code, product.styles.len()),
                Err(ScrapeError::NotFound) => info!("{}: product not found", code),
                Err(e) => warn!("{}: {}", code, e),
            }
            outcomes.push(ScrapeOutcome::new(code, result));
        }

        outcomes
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    pub(crate) const NOT_FOUND_PAGE: &str =
        r#"<html><body><h1 class="title">お探しの商品が見つかりません</h1></body></html>"#;

    pub(crate) fn product_page(name: &str, variants: &[(&str, &str, &str, &str)]) -> String {
        let infos: String = variants
            .iter()
            .map(|(colour, size, price, stock)| {
                format!(
                    r#"<div class="standard-info" data-standard-detail2="{colour}" data-standard-detail1="{size}" data-price="{price}" data-stock-status="{stock}" data-nucleus-sku-code="112925001001"></div>"#
                )
            })
            .collect();
        format!(
            r#"<html><body><h1 class="product-name text-weight-bold">{name}</h1><div><p id="commodityStandardAreaMessage"></p>{infos}</div></body></html>"#
        )
    }

    /// Serves canned pages per code; unknown codes answer 503.
    #[derive(Default)]
    pub(crate) struct MockFetcher {
        pages: Mutex<HashMap<String, Result<String, FetchError>>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        delay: Option<Duration>,
    }

    impl MockFetcher {
        pub(crate) fn page(self, code: &str, html: impl Into<String>) -> Self {
            self.set(code, Ok(html.into()));
            self
        }

        pub(crate) fn failing(self, code: &str, err: FetchError) -> Self {
            self.set(code, Err(err));
            self
        }

        pub(crate) fn set(&self, code: &str, page: Result<String, FetchError>) {
            self.pages.lock().unwrap().insert(code.to_string(), page);
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }
    }

    #[async_trait]
    impl PageFetcher for MockFetcher {
        async fn fetch(&self, code: &str) -> Result<Vec<u8>, FetchError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let page = self.pages.lock().unwrap().get(code).cloned();
            match page {
                Some(Ok(html)) => Ok(html.into_bytes()),
                Some(Err(e)) => Err(e),
                None => Err(FetchError::Status(503)),
            }
        }
    }

    fn codes(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn one_outcome_per_code() {
        let fetcher = MockFetcher::default()
            .page("1", product_page("A", &[("Red", "M", "1,000", "在庫あり")]))
            .page("2", NOT_FOUND_PAGE)
            .failing("3", FetchError::Status(500))
            .page("4", "<html><body>maintenance</body></html>");
        let coordinator = ScrapeCoordinator::new(Arc::new(fetcher), 2);

        // duplicates are kept, not merged
        let input = codes(&["1", "2", "3", "4", "1"]);
        let outcomes = coordinator.run(&input).await;

        assert_eq!(outcomes.len(), input.len());
        let mut seen: Vec<&str> = outcomes.iter().map(|o| o.product_code.as_str()).collect();
        seen.sort();
        assert_eq!(seen, vec!["1", "1", "2", "3", "4"]);

        for outcome in &outcomes {
            match outcome.product_code.as_str() {
                "1" => assert_eq!(outcome.result.as_ref().unwrap().styles[0].price, 1000),
                "2" => assert!(matches!(outcome.result, Err(ScrapeError::NotFound))),
                "3" => assert!(matches!(
                    outcome.result,
                    Err(ScrapeError::Transport(FetchError::Status(500)))
                )),
                "4" => assert!(matches!(outcome.result, Err(ScrapeError::Parse(_)))),
                other => panic!("unexpected code {other}"),
            }
        }
    }

    #[tokio::test]
    async fn empty_input_is_empty_output() {
        let coordinator = ScrapeCoordinator::new(Arc::new(MockFetcher::default()), 4);
        assert!(coordinator.run(&[]).await.is_empty());
    }

    #[tokio::test]
    async fn in_flight_fetches_are_bounded() {
        let fetcher = Arc::new(MockFetcher::default().with_delay(Duration::from_millis(20)));
        let coordinator = ScrapeCoordinator::new(fetcher.clone(), 3);

        let input: Vec<String> = (0..12).map(|i| i.to_string()).collect();
        let outcomes = coordinator.run(&input).await;

        assert_eq!(outcomes.len(), 12);
        assert!(fetcher.peak.load(Ordering::SeqCst) <= 3);
    }
}
