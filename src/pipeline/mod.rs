//! Tracker: the context every scheduled job and command runs against.
//!
//! ## Cycle
//!
//! `assign_jobs()` — daily: replace the queue with every tracked product code.
//! `drain()` — hourly: scrape everything queued, reconcile each outcome, and
//!   put back codes whose scrape or reconcile failed. Not-found is terminal.
//! `clear_jobs()` — nightly: empty the queue so retries never outlive a day.
//! `send_daily_report()` — daily: digest of targets met / running low.
//!
//! The queue lock is held for the whole of each queue job, so two of them
//! never interleave.

pub mod queue;
pub mod reconciler;
pub mod report;

use crate::cache::TtlCache;
use crate::config::AppConfig;
use crate::models::{ScrapeError, ScrapeOutcome, Target, TargetStatus};
use crate::notify::{self, Notifier};
use crate::scraper::http_client::normalise_code;
use crate::scraper::{FetchError, HttpFetcher, PageFetcher, ScrapeCoordinator};
use crate::storage::{Repository, StoreError, StoreResult};
use crate::utils::Timer;
use anyhow::{Context, Result};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use self::queue::JobQueue;
use self::reconciler::{MergeStatus, Reconciler};
use self::report::ReportGenerator;

const TARGETS_CACHE_KEY: &str = "targets";

fn scrape_cache_key(code: &str) -> String {
    format!("scrape_result_{code}")
}

fn build_cache<V: Clone>(max_entries: Option<usize>) -> TtlCache<String, V> {
    match max_entries {
        Some(n) => TtlCache::with_capacity(n),
        None => TtlCache::new(),
    }
}

#[derive(Debug, Error)]
pub enum TrackError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    InvalidCode(FetchError),

    #[error("product {code} is unavailable: {source}")]
    Unavailable { code: String, source: ScrapeError },

    #[error("product {code} has no style {colour} / {size}")]
    UnknownStyle {
        code: String,
        colour: String,
        size: String,
    },
}

impl TrackError {
    pub fn is_already_tracked(&self) -> bool {
        matches!(self, TrackError::Store(StoreError::AlreadyTracked { .. }))
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrainStats {
    pub processed: usize,
    pub created: usize,
    pub updated: usize,
    pub not_found: usize,
    pub retried: usize,
}

pub struct Tracker {
    config: AppConfig,
    repo: Arc<Repository>,
    coordinator: ScrapeCoordinator,
    reconciler: Reconciler,
    reporter: ReportGenerator,
    notifier: Arc<dyn Notifier>,
    queue: Mutex<JobQueue>,
    scrape_cache: TtlCache<String, ScrapeOutcome>,
    targets_cache: TtlCache<String, Vec<TargetStatus>>,
}

impl Tracker {
    pub fn new(
        config: AppConfig,
        repo: Arc<Repository>,
        fetcher: Arc<dyn PageFetcher>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            coordinator: ScrapeCoordinator::new(fetcher, config.pipeline.concurrency),
            reconciler: Reconciler::new(Arc::clone(&repo)),
            reporter: ReportGenerator::new(Arc::clone(&repo), config.report.low_stock_threshold),
            scrape_cache: build_cache(config.cache.max_entries),
            targets_cache: build_cache(config.cache.max_entries),
            queue: Mutex::new(JobQueue::new()),
            notifier,
            repo,
            config,
        }
    }

    /// Open storage, build the HTTP fetcher and notifier. Any failure here is
    /// fatal to startup.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let repo = Arc::new(
            Repository::open(&config.storage.db_path).context("Failed to open DuckDB")?,
        );
        if config.storage.run_migrations {
            repo.run_migrations().context("Migrations failed")?;
        }

        let fetcher = Arc::new(HttpFetcher::new(&config.scraper).context("Failed to build fetcher")?);
        let notifier = notify::from_config(&config.notify)?;

        Ok(Self::new(config, repo, fetcher, notifier))
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    // ── Queue jobs ────────────────────────────────────────────────────────────

    pub async fn assign_jobs(&self) -> Result<usize> {
        let codes = self.repo.tracked_codes().context("Failed to list tracked codes")?;
        let n = codes.len();
        self.queue.lock().await.assign(codes);
        info!("Assigned {} product codes", n);
        Ok(n)
    }

    pub async fn clear_jobs(&self) {
        let mut queue = self.queue.lock().await;
        if !queue.is_empty() {
            info!("Clearing {} pending codes", queue.len());
        }
        queue.clear();

        let purged = self.scrape_cache.purge_expired() + self.targets_cache.purge_expired();
        if purged > 0 {
            info!(
                "Purged {} expired cache entries, {} remain",
                purged,
                self.scrape_cache.len() + self.targets_cache.len()
            );
        }
    }

    pub async fn drain(&self) -> Result<DrainStats> {
        let mut queue = self.queue.lock().await;
        if queue.is_empty() {
            info!("No jobs queued ({:?}), nothing to scrape", queue.state());
            return Ok(DrainStats::default());
        }

        let _t = Timer::start("Scrape cycle");
        let run_id = match self.repo.begin_scrape_run() {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Failed to record scrape run start: {}", e);
                None
            }
        };

        let codes = queue.take();
        let outcomes = self.coordinator.run(&codes).await;

        let mut stats = DrainStats {
            processed: outcomes.len(),
            ..Default::default()
        };

        for outcome in &outcomes {
            if outcome.is_retryable_failure() {
                queue.requeue(outcome.product_code.as_str());
                stats.retried += 1;
                continue;
            }
            if matches!(outcome.result, Err(ScrapeError::NotFound)) {
                stats.not_found += 1;
            }

            match self.reconciler.merge(outcome) {
                Ok(MergeStatus::Created) => stats.created += 1,
                Ok(MergeStatus::Updated) => stats.updated += 1,
                Ok(MergeStatus::Skipped) => {}
                Err(e) => {
                    warn!("{}: reconcile failed, will retry: {}", outcome.product_code, e);
                    queue.requeue(outcome.product_code.as_str());
                    stats.retried += 1;
                }
            }
        }
        queue.finish_drain();
        drop(queue);

        if stats.created + stats.updated > 0 {
            self.targets_cache.delete(&TARGETS_CACHE_KEY.to_string());
        }

        if let Some(run_id) = run_id {
            let note = (stats.retried > 0).then(|| format!("{} codes queued for retry", stats.retried));
            let finished =
                self.repo
                    .finish_scrape_run(run_id, stats.processed, stats.retried, note.as_deref());
            if let Err(e) = finished {
                warn!("Failed to record scrape run {}: {}", run_id, e);
            }
        }

        info!(
            "=== Done: {} codes | {} created | {} updated | {} not found | {} retrying ===",
            stats.processed, stats.created, stats.updated, stats.not_found, stats.retried
        );
        Ok(stats)
    }

    /// Seed the queue and drain it immediately.
    pub async fn scrape_now(&self) -> Result<DrainStats> {
        self.assign_jobs().await?;
        self.drain().await
    }

    pub async fn queued_codes(&self) -> Vec<String> {
        self.queue.lock().await.codes().to_vec()
    }

    // ── Reporting ─────────────────────────────────────────────────────────────

    /// Generate today's digest and send it. Returns whether a message went
    /// out; delivery failures are logged, not returned.
    pub async fn send_daily_report(&self) -> Result<bool> {
        info!("Generating daily report…");
        let Some(body) = self.reporter.generate().context("Report query failed")? else {
            info!("Nothing to report");
            return Ok(false);
        };

        notify::deliver(
            self.notifier.as_ref(),
            &self.config.report.subject,
            &body,
            &self.config.notify.recipients,
        )
        .await;
        Ok(true)
    }

    // ── On-demand lookups ─────────────────────────────────────────────────────

    /// Merge a scrape result obtained outside the schedule.
    pub fn reconcile_one(&self, outcome: &ScrapeOutcome) -> StoreResult<MergeStatus> {
        let status = self.reconciler.merge(outcome)?;
        if status != MergeStatus::Skipped {
            self.targets_cache.delete(&TARGETS_CACHE_KEY.to_string());
        }
        Ok(status)
    }

    /// Scrape one product, reusing a recent result when cached. Fresh
    /// results are reconciled; transient failures are not cached.
    pub async fn lookup(&self, code: &str) -> Result<ScrapeOutcome> {
        let code = normalise_code(code)?;
        let key = scrape_cache_key(code);
        if let Some(outcome) = self.scrape_cache.get(&key) {
            return Ok(outcome);
        }

        let outcome = self
            .coordinator
            .run(&[code.to_string()])
            .await
            .into_iter()
            .next()
            .context("Coordinator returned no outcome")?;

        if !outcome.is_retryable_failure() {
            self.reconcile_one(&outcome)
                .with_context(|| format!("Failed to reconcile {code}"))?;
            self.scrape_cache
                .add(key, outcome.clone(), self.config.cache.lookup_ttl());
        }
        Ok(outcome)
    }

    // ── Targets ───────────────────────────────────────────────────────────────

    pub async fn add_target(
        &self,
        code: &str,
        colour: &str,
        size: &str,
        target_price: i64,
    ) -> Result<Target, TrackError> {
        let code = normalise_code(code).map_err(TrackError::InvalidCode)?;
        let outcome = self
            .lookup(code)
            .await
            .map_err(|e| TrackError::Unavailable {
                code: code.to_string(),
                source: ScrapeError::Task(format!("{e:#}")),
            })?;
        if let Err(e) = outcome.result {
            // an already stored product can still be tracked
            if self.repo.find_product_by_code(code)?.is_none() {
                return Err(TrackError::Unavailable {
                    code: code.to_string(),
                    source: e,
                });
            }
        }

        let product = self
            .repo
            .find_product_by_code(code)?
            .ok_or_else(|| StoreError::NotFound(format!("product {code}")))?;
        let style = self
            .repo
            .find_style(product.id, colour, size)?
            .ok_or_else(|| TrackError::UnknownStyle {
                code: code.to_string(),
                colour: colour.to_string(),
                size: size.to_string(),
            })?;

        let target = self
            .repo
            .create_target(code, product.id, style.id, target_price)?;
        self.targets_cache.delete(&TARGETS_CACHE_KEY.to_string());
        info!("Tracking {} {} / {} at ¥{}", code, colour, size, target_price);
        Ok(target)
    }

    pub fn remove_target(&self, id: i64) -> StoreResult<()> {
        self.repo.delete_target(id)?;
        self.targets_cache.delete(&TARGETS_CACHE_KEY.to_string());
        Ok(())
    }

    pub fn target_statuses(&self) -> StoreResult<Vec<TargetStatus>> {
        let key = TARGETS_CACHE_KEY.to_string();
        if let Some(statuses) = self.targets_cache.get(&key) {
            return Ok(statuses);
        }
        let statuses = self.repo.target_statuses()?;
        self.targets_cache
            .add(key, statuses.clone(), self.config.cache.targets_ttl());
        Ok(statuses)
    }

    pub fn delete_product(&self, code: &str) -> StoreResult<bool> {
        let code = code.trim();
        let deleted = self.repo.delete_product(code)?;
        if deleted {
            self.scrape_cache.delete(&scrape_cache_key(code));
            self.targets_cache.delete(&TARGETS_CACHE_KEY.to_string());
        }
        Ok(deleted)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::tests::RecordingNotifier;
    use crate::scraper::FetchError;
    use crate::scraper::tests::{MockFetcher, NOT_FOUND_PAGE, product_page};
    use crate::storage::tests::repo;
    use tokio_test::{assert_err, assert_ok};

    struct Harness {
        tracker: Tracker,
        fetcher: Arc<MockFetcher>,
        notifier: Arc<RecordingNotifier>,
    }

    fn harness(fetcher: MockFetcher) -> Harness {
        let fetcher = Arc::new(fetcher);
        let notifier = Arc::new(RecordingNotifier::default());
        let mut config = AppConfig::default();
        config.notify.recipients = vec!["me@example.com".into()];
        let tracker = Tracker::new(
            config,
            Arc::new(repo()),
            fetcher.clone(),
            notifier.clone(),
        );
        Harness {
            tracker,
            fetcher,
            notifier,
        }
    }

    fn page(price: &str, stock: &str) -> String {
        product_page("Chair", &[("Red", "M", price, stock), ("Blue", "M", "2,000", "在庫あり")])
    }

    #[tokio::test]
    async fn add_target_creates_product_and_rejects_duplicates() {
        let h = harness(MockFetcher::default().page("1", page("1,000", "在庫あり")));

        let target = assert_ok!(h.tracker.add_target("1", "Red", "M", 900).await);
        assert_eq!(target.target_price, 900);
        assert_eq!(h.tracker.repo().product_count().unwrap(), 1);

        let err = assert_err!(h.tracker.add_target("1", "Red", "M", 800).await);
        assert!(err.is_already_tracked());

        let err = assert_err!(h.tracker.add_target("1", "Green", "M", 800).await);
        assert!(matches!(err, TrackError::UnknownStyle { .. }));
    }

    #[tokio::test]
    async fn add_target_for_unreachable_product_fails() {
        let h = harness(MockFetcher::default().failing("1", FetchError::Status(500)));
        let err = assert_err!(h.tracker.add_target("1", "Red", "M", 900).await);
        assert!(matches!(err, TrackError::Unavailable { .. }));
        assert_eq!(h.tracker.repo().product_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn transport_errors_retry_and_not_found_does_not() {
        let h = harness(
            MockFetcher::default()
                .page("1", page("1,000", "在庫あり"))
                .page("2", page("1,000", "在庫あり")),
        );
        h.tracker.add_target("1", "Red", "M", 900).await.unwrap();
        h.tracker.add_target("2", "Red", "M", 900).await.unwrap();

        // cycle N: 1 is unreachable, 2 is gone
        h.fetcher.set("1", Err(FetchError::Status(503)));
        h.fetcher.set("2", Ok(NOT_FOUND_PAGE.to_string()));
        h.tracker.assign_jobs().await.unwrap();
        let stats = h.tracker.drain().await.unwrap();
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.retried, 1);
        assert_eq!(stats.not_found, 1);
        assert_eq!(h.tracker.repo().scrape_run_count().unwrap(), 1);

        // cycle N+1 sees only the transient failure
        assert_eq!(h.tracker.queued_codes().await, vec!["1".to_string()]);

        h.fetcher.set("1", Ok(page("850", "在庫：3")));
        let stats = h.tracker.drain().await.unwrap();
        assert_eq!((stats.processed, stats.updated, stats.retried), (1, 1, 0));
        assert!(h.tracker.queued_codes().await.is_empty());
    }

    #[tokio::test]
    async fn clear_empties_pending_retries() {
        let h = harness(MockFetcher::default().page("1", page("1,000", "在庫あり")));
        h.tracker.add_target("1", "Red", "M", 900).await.unwrap();

        h.fetcher.set("1", Err(FetchError::Request("reset".into())));
        h.tracker.scrape_now().await.unwrap();
        assert_eq!(h.tracker.queued_codes().await.len(), 1);

        h.tracker.clear_jobs().await;
        assert!(h.tracker.queued_codes().await.is_empty());
        assert_eq!(h.tracker.drain().await.unwrap(), DrainStats::default());
    }

    #[tokio::test]
    async fn daily_report_sends_one_digest() {
        let h = harness(MockFetcher::default().page("1", page("1,000", "在庫あり")));
        h.tracker.add_target("1", "Red", "M", 900).await.unwrap();

        // 1,000 > 900 with plenty of stock: nothing to say
        assert!(!h.tracker.send_daily_report().await.unwrap());
        assert!(h.notifier.sent.lock().unwrap().is_empty());

        h.fetcher.set("1", Ok(page("880", "在庫あり")));
        h.tracker.scrape_now().await.unwrap();
        assert!(h.tracker.send_daily_report().await.unwrap());

        let sent = h.notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("current price: ¥880"));
    }

    #[tokio::test]
    async fn lookup_serves_cached_result_without_refetch() {
        let h = harness(MockFetcher::default().page("1", page("1,000", "在庫あり")));
        h.tracker.lookup("1").await.unwrap();
        let observed = h.tracker.repo().observation_count().unwrap();

        // a changed page is not seen until the cached result expires
        h.fetcher.set("1", Ok(page("500", "在庫あり")));
        let outcome = h.tracker.lookup("1").await.unwrap();
        assert_eq!(outcome.result.unwrap().styles[0].price, 1000);
        assert_eq!(h.tracker.repo().observation_count().unwrap(), observed);
    }

    #[tokio::test]
    async fn lookup_trims_codes_and_rejects_paths() {
        let h = harness(MockFetcher::default().page("1", page("1,000", "在庫あり")));

        let outcome = assert_ok!(h.tracker.lookup(" 1 ").await);
        assert_eq!(outcome.product_code, "1");
        assert!(h.tracker.repo().find_product_by_code("1").unwrap().is_some());
        assert!(h.tracker.repo().find_product_by_code(" 1 ").unwrap().is_none());

        assert_err!(h.tracker.lookup("//evil.example/x").await);
        assert_err!(h.tracker.lookup("../x").await);

        let err = assert_err!(h.tracker.add_target("../1", "Red", "M", 900).await);
        assert!(matches!(err, TrackError::InvalidCode(_)));
        assert_eq!(h.tracker.repo().product_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn target_list_cache_is_invalidated_on_change() {
        let h = harness(MockFetcher::default().page("1", page("1,000", "在庫あり")));
        assert!(h.tracker.target_statuses().unwrap().is_empty());

        let target = h.tracker.add_target("1", "Red", "M", 900).await.unwrap();
        assert_eq!(h.tracker.target_statuses().unwrap().len(), 1);

        h.tracker.remove_target(target.id).unwrap();
        assert!(h.tracker.target_statuses().unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_product_removes_targets() {
        let h = harness(MockFetcher::default().page("1", page("1,000", "在庫あり")));
        h.tracker.add_target("1", "Red", "M", 900).await.unwrap();
        assert_eq!(h.tracker.target_statuses().unwrap().len(), 1);

        assert!(h.tracker.delete_product("1").unwrap());
        assert!(h.tracker.target_statuses().unwrap().is_empty());
        assert_eq!(h.tracker.assign_jobs().await.unwrap(), 0);
    }
}
