// tests/pool_bounds.rs
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use schema_tracker::fetch::pool::FetchPool;
use schema_tracker::fetch::{ConditionalFetch, FetchError, FetchOutcome, FetchTask, Tier};

/// Tracks how many fetches run at once and the high-water mark.
struct GatedFetcher {
    in_flight: AtomicUsize,
    high_water: AtomicUsize,
}

impl GatedFetcher {
    fn new() -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            high_water: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl ConditionalFetch for GatedFetcher {
    async fn conditional_get(
        &self,
        _url: &str,
        _token: Option<&str>,
    ) -> Result<FetchOutcome, FetchError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(FetchOutcome::Fresh {
            body: "{}".into(),
            token: None,
        })
    }
}

fn task(n: usize) -> FetchTask {
    FetchTask {
        source: format!("source-{n}"),
        tier: Tier::Api,
        url: format!("http://example.test/{n}"),
        token: None,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn pool_bounds_concurrency_and_yields_one_result_per_task() {
    const WORKERS: usize = 3;
    const TASKS: usize = 12;

    let fetcher = Arc::new(GatedFetcher::new());
    let mut pool = FetchPool::spawn(fetcher.clone(), WORKERS, TASKS);

    for n in 0..TASKS {
        pool.submit(task(n)).await.expect("submit");
    }

    let mut per_source: HashMap<String, usize> = HashMap::new();
    for _ in 0..TASKS {
        let result = pool
            .take_result(Duration::from_secs(5))
            .await
            .expect("every task yields a result");
        *per_source.entry(result.source).or_default() += 1;
    }

    // Exactly one result per submitted task, nothing dropped or duplicated.
    assert_eq!(per_source.len(), TASKS);
    assert!(per_source.values().all(|&count| count == 1));

    // Never more than the worker count in flight.
    assert!(fetcher.high_water.load(Ordering::SeqCst) <= WORKERS);

    pool.shutdown().await;
}

#[tokio::test]
async fn take_result_times_out_quietly_when_idle() {
    let fetcher = Arc::new(GatedFetcher::new());
    let mut pool = FetchPool::spawn(fetcher, 2, 4);

    let got = pool.take_result(Duration::from_millis(50)).await;
    assert!(got.is_none());

    pool.shutdown().await;
}

/// Fetcher errors surface as `Failed` results; the contract of one result
/// per task holds on the failure path too.
struct FailingFetcher;

#[async_trait::async_trait]
impl ConditionalFetch for FailingFetcher {
    async fn conditional_get(
        &self,
        _url: &str,
        _token: Option<&str>,
    ) -> Result<FetchOutcome, FetchError> {
        Err(FetchError::Http { status: 503 })
    }
}

#[tokio::test]
async fn fetcher_errors_become_failed_results() {
    let mut pool = FetchPool::spawn(Arc::new(FailingFetcher), 1, 2);
    pool.submit(task(0)).await.expect("submit");

    let result = pool
        .take_result(Duration::from_secs(5))
        .await
        .expect("result");
    match result.outcome {
        FetchOutcome::Failed(FetchError::Http { status }) => assert_eq!(status, 503),
        other => panic!("expected Failed outcome, got {other:?}"),
    }

    pool.shutdown().await;
}
