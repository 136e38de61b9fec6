// src/daemon.rs
//! Polling orchestrator. Each cycle: submit one API fetch per source, collect
//! with a bounded retry budget, resolve client schema URLs, submit the client
//! wave, collect again, commit whatever came back fresh, push once if
//! anything landed, sleep. The loop never terminates on its own; a failed
//! cycle is logged and the next one starts on schedule.

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::TrackerConfig;
use crate::fetch::pool::FetchPool;
use crate::fetch::{ConditionalFetch, FetchError, FetchOutcome, Tier};
use crate::resolver::{CommitBatch, Resolver};
use crate::store::VersionStore;

/// One-time metrics registration.
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("tracker_cycles_total", "Polling cycles started.");
        describe_counter!("tracker_fresh_total", "Fetches that returned new content.");
        describe_counter!(
            "tracker_not_modified_total",
            "Fetches answered 304 against a cached token."
        );
        describe_counter!(
            "tracker_fetch_failures_total",
            "Fetches that failed or never returned."
        );
        describe_counter!("tracker_commits_total", "Commits created across all lines.");
        describe_gauge!("tracker_last_cycle_ts", "Unix ts when the last cycle finished.");
    });
}

/// What one cycle did, for the summary log line and for tests.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub fresh: usize,
    pub not_modified: usize,
    pub failed: usize,
    pub committed: Vec<String>,
    pub partial: bool,
    pub pushed: bool,
}

impl CycleReport {
    fn tally(&mut self, outcome: &FetchOutcome) {
        match outcome {
            FetchOutcome::Fresh { .. } => self.fresh += 1,
            FetchOutcome::NotModified => self.not_modified += 1,
            FetchOutcome::Failed(_) => self.failed += 1,
        }
    }
}

pub struct Daemon {
    cfg: TrackerConfig,
    resolver: Resolver,
    pool: FetchPool,
    store: Arc<dyn VersionStore>,
}

impl Daemon {
    pub fn new(
        cfg: TrackerConfig,
        fetcher: Arc<dyn ConditionalFetch>,
        store: Arc<dyn VersionStore>,
    ) -> Self {
        let workers = cfg.pool_size();
        let pool = FetchPool::spawn(fetcher, workers, workers * 2);
        let resolver = Resolver::new(&cfg.sources);
        Self {
            cfg,
            resolver,
            pool,
            store,
        }
    }

    /// Run forever. Cycle errors are logged, never fatal.
    pub async fn run(mut self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.cfg.poll_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.run_cycle().await {
                Ok(report) => tracing::info!(
                    fresh = report.fresh,
                    not_modified = report.not_modified,
                    failed = report.failed,
                    committed = report.committed.len(),
                    partial = report.partial,
                    pushed = report.pushed,
                    "cycle finished"
                ),
                Err(err) => tracing::error!(error = ?err, "cycle failed; continuing"),
            }
            tracing::info!(secs = self.cfg.poll_interval_secs, "sleeping until next check");
        }
    }

    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        ensure_metrics_described();
        counter!("tracker_cycles_total").increment(1);

        self.resolver.begin_cycle();
        let mut report = CycleReport::default();

        // API wave.
        tracing::info!("downloading api schemas");
        for source in &self.cfg.sources {
            let task = self.resolver.api_task(&self.cfg, source);
            self.pool.submit(task).await?;
        }
        let (mut api_results, partial_api) =
            self.collect_wave(Tier::Api, self.cfg.sources.len()).await;
        report.partial |= partial_api;

        // Resolve and submit the client wave. A source with no known client
        // URL (failed fetch, never resolved) is skipped for this cycle.
        tracing::info!("downloading client schemas");
        let names: Vec<String> = self.cfg.sources.iter().map(|s| s.name.clone()).collect();
        let mut client_sources: Vec<String> = Vec::new();
        for name in &names {
            let outcome = api_results
                .remove(name)
                .unwrap_or(FetchOutcome::Failed(FetchError::Timeout));
            report.tally(&outcome);
            if let Some(task) = self
                .resolver
                .absorb_api_result(name, outcome, self.store.as_ref())
                .await
            {
                self.pool.submit(task).await?;
                client_sources.push(name.clone());
            } else {
                tracing::info!(source = %name, "no client schema url known; skipping source this cycle");
            }
        }

        let (mut client_results, partial_client) = self
            .collect_wave(Tier::Client, client_sources.len())
            .await;
        report.partial |= partial_client;
        for name in &client_sources {
            let outcome = client_results
                .remove(name)
                .unwrap_or(FetchOutcome::Failed(FetchError::Timeout));
            report.tally(&outcome);
            self.resolver.absorb_client_result(name, outcome);
        }

        // Commit per source; one source's failure never blocks the rest.
        let batches = self.resolver.take_batches();
        for batch in &batches {
            match self.commit_batch(batch).await {
                Ok(true) => {
                    self.resolver.mark_committed(&batch.source);
                    report.committed.push(batch.source.clone());
                    tracing::info!(source = %batch.source, files = %batch.summary_header, "committed");
                }
                Ok(false) => {
                    // Bytes already match what is durable; safe to advance.
                    self.resolver.mark_committed(&batch.source);
                    tracing::info!(source = %batch.source, "fresh fetch matched stored content; nothing to commit");
                }
                Err(err) => {
                    tracing::warn!(
                        source = %batch.source,
                        error = %err,
                        "commit failed; revision will be fetched again next cycle"
                    );
                }
            }
        }
        let changed: std::collections::HashSet<&str> =
            batches.iter().map(|b| b.source.as_str()).collect();
        for name in &names {
            if !changed.contains(name.as_str()) {
                tracing::info!(source = %name, "nothing changed");
            }
        }

        // One mirror push covers every line that moved.
        if let Some(push_url) = self.cfg.push_url.as_deref().filter(|u| !u.is_empty()) {
            if !report.committed.is_empty() {
                tracing::info!("pushing commits");
                match self.store.push_all(push_url).await {
                    Ok(()) => report.pushed = true,
                    Err(err) => tracing::warn!(error = %err, "mirror push failed"),
                }
            }
        }

        counter!("tracker_fresh_total").increment(report.fresh as u64);
        counter!("tracker_not_modified_total").increment(report.not_modified as u64);
        counter!("tracker_fetch_failures_total").increment(report.failed as u64);
        counter!("tracker_commits_total").increment(report.committed.len() as u64);
        gauge!("tracker_last_cycle_ts").set(chrono::Utc::now().timestamp().max(0) as f64);

        Ok(report)
    }

    /// Drain one wave's results. Tolerates out-of-order arrival, discards
    /// stragglers from an earlier wave, and gives up after
    /// `empty_poll_budget` consecutive timeouts; the cycle then proceeds
    /// with whatever arrived.
    async fn collect_wave(
        &mut self,
        tier: Tier,
        expected: usize,
    ) -> (HashMap<String, FetchOutcome>, bool) {
        let mut results: HashMap<String, FetchOutcome> = HashMap::new();
        let mut empty_polls = 0u32;
        while results.len() < expected && empty_polls < self.cfg.empty_poll_budget {
            match self.pool.take_result(self.cfg.collect_timeout()).await {
                Some(result) => {
                    empty_polls = 0;
                    if result.tier != tier {
                        tracing::warn!(
                            source = %result.source,
                            tier = %result.tier,
                            "discarding late result from a previous wave"
                        );
                        continue;
                    }
                    results.insert(result.source, result.outcome);
                }
                None => empty_polls += 1,
            }
        }

        let partial = results.len() < expected;
        if partial {
            tracing::warn!(
                tier = %tier,
                collected = results.len(),
                expected,
                "retry budget exhausted before all results arrived; continuing with a partial cycle"
            );
        }
        (results, partial)
    }

    async fn commit_batch(&self, batch: &CommitBatch) -> Result<bool, crate::store::StoreError> {
        self.store.ensure_line(&batch.line).await?;
        self.store.switch_to(&batch.line).await?;
        self.store.write_files(&batch.files).await?;
        self.store
            .commit(&batch.summary_header, &batch.summary_body)
            .await
    }
}
