// src/resolver.rs
//! Two-tier resolution: each cycle fetches the API schema, follows its
//! embedded `items_game_url` to the client schema, and stages whatever came
//! back fresh for the version store. The freshness table lives here and has a
//! single writer: results are absorbed one at a time after dequeue, workers
//! never touch it.

use std::collections::{BTreeMap, HashMap};

use crate::config::{SourceConfig, TrackerConfig};
use crate::fetch::{FetchOutcome, FetchTask, Tier};
use crate::store::{line_name, VersionStore};

/// Freshness state for one source, both tiers. Tokens only move via
/// [`Resolver::mark_committed`]; a fresh fetch whose commit never lands
/// leaves them untouched, so the revision is fetched again next cycle.
#[derive(Debug, Clone, Default)]
pub struct SourceState {
    pub api_token: Option<String>,
    pub client_token: Option<String>,
    pub client_url: Option<String>,
    recovery_attempted: bool,
}

/// Per-cycle staging. `staged_*` is `Some(new_token)` only when that tier
/// came back fresh this cycle; the inner token may itself be absent when the
/// server sent no `Last-Modified` (such a source re-checks forever).
#[derive(Debug, Default)]
struct Pending {
    files: BTreeMap<String, String>,
    summary: Vec<(String, String)>,
    staged_api_token: Option<Option<String>>,
    staged_client_token: Option<Option<String>>,
}

/// Everything the store needs to persist one source's changes this cycle.
#[derive(Debug)]
pub struct CommitBatch {
    pub source: String,
    pub line: String,
    pub files: BTreeMap<String, String>,
    pub summary_header: String,
    pub summary_body: String,
}

pub struct Resolver {
    states: HashMap<String, SourceState>,
    pending: HashMap<String, Pending>,
}

impl Resolver {
    pub fn new(sources: &[SourceConfig]) -> Self {
        let states = sources
            .iter()
            .map(|s| (s.name.clone(), SourceState::default()))
            .collect();
        Self {
            states,
            pending: HashMap::new(),
        }
    }

    pub fn state(&self, source: &str) -> Option<&SourceState> {
        self.states.get(source)
    }

    /// Drop staging left over from the previous cycle, including staged
    /// tokens whose commit never landed.
    pub fn begin_cycle(&mut self) {
        self.pending.clear();
    }

    pub fn api_task(&self, cfg: &TrackerConfig, source: &SourceConfig) -> FetchTask {
        let token = self
            .states
            .get(&source.name)
            .and_then(|s| s.api_token.clone());
        FetchTask {
            source: source.name.clone(),
            tier: Tier::Api,
            url: cfg.api_schema_url(source),
            token,
        }
    }

    /// Absorb one API-tier result. Returns the client-tier task when a
    /// client schema URL is known, whether cached from a prior cycle, parsed
    /// out of this cycle's fresh body, or recovered from the store on cold
    /// start.
    pub async fn absorb_api_result(
        &mut self,
        source: &str,
        outcome: FetchOutcome,
        store: &dyn VersionStore,
    ) -> Option<FetchTask> {
        let file = Tier::Api.file_name(source);
        match outcome {
            FetchOutcome::Fresh { body, token } => {
                match extract_client_url(&body) {
                    Some(url) => {
                        let state = self.states.entry(source.to_string()).or_default();
                        state.client_url = Some(url);
                    }
                    None => tracing::warn!(
                        source,
                        "api schema carried no client schema url; keeping cached one"
                    ),
                }
                let pending = self.pending.entry(source.to_string()).or_default();
                pending
                    .summary
                    .push((file.clone(), display_token(token.as_deref())));
                pending.files.insert(file, body);
                pending.staged_api_token = Some(token);
            }
            FetchOutcome::NotModified => {
                tracing::info!(source, tier = %Tier::Api, "server says nothing new");
                self.try_recover_client_url(source, store).await;
            }
            FetchOutcome::Failed(err) => {
                tracing::warn!(source, tier = %Tier::Api, error = %err, "fetch failed");
            }
        }

        let state = self.states.get(source)?;
        let url = state.client_url.clone()?;
        Some(FetchTask {
            source: source.to_string(),
            tier: Tier::Client,
            url,
            token: state.client_token.clone(),
        })
    }

    pub fn absorb_client_result(&mut self, source: &str, outcome: FetchOutcome) {
        match outcome {
            FetchOutcome::Fresh { body, token } => {
                let file = Tier::Client.file_name(source);
                let pending = self.pending.entry(source.to_string()).or_default();
                pending
                    .summary
                    .push((file.clone(), display_token(token.as_deref())));
                pending.files.insert(file, body);
                pending.staged_client_token = Some(token);
            }
            FetchOutcome::NotModified => {
                tracing::info!(source, tier = %Tier::Client, "server says nothing new");
            }
            FetchOutcome::Failed(err) => {
                tracing::warn!(source, tier = %Tier::Client, error = %err, "fetch failed");
            }
        }
    }

    /// Batches for every source that staged fresh content this cycle, in
    /// name order. Staged tokens stay behind until `mark_committed`.
    pub fn take_batches(&mut self) -> Vec<CommitBatch> {
        let mut batches: Vec<CommitBatch> = Vec::new();
        for (source, pending) in self.pending.iter_mut() {
            if pending.files.is_empty() {
                continue;
            }
            let files = std::mem::take(&mut pending.files);
            let summary_header = files.keys().cloned().collect::<Vec<_>>().join(", ");
            let summary_body = pending
                .summary
                .iter()
                .map(|(file, token)| format!("{file}: {token}"))
                .collect::<Vec<_>>()
                .join("\n\n");
            batches.push(CommitBatch {
                source: source.clone(),
                line: line_name(source),
                files,
                summary_header,
                summary_body,
            });
        }
        batches.sort_by(|a, b| a.source.cmp(&b.source));
        batches
    }

    /// The source's commit is durable; advance whatever tokens were staged.
    pub fn mark_committed(&mut self, source: &str) {
        let Some(pending) = self.pending.get_mut(source) else {
            return;
        };
        let state = self.states.entry(source.to_string()).or_default();
        if let Some(token) = pending.staged_api_token.take() {
            state.api_token = token;
        }
        if let Some(token) = pending.staged_client_token.take() {
            state.client_token = token;
        }
    }

    /// Cold start: the API schema is unchanged upstream but this process has
    /// never resolved a client URL. Parse the copy the store already holds,
    /// at most once per source per process lifetime.
    async fn try_recover_client_url(&mut self, source: &str, store: &dyn VersionStore) {
        let state = self.states.entry(source.to_string()).or_default();
        if state.client_url.is_some() || state.recovery_attempted {
            return;
        }
        state.recovery_attempted = true;

        let line = line_name(source);
        let file = Tier::Api.file_name(source);
        match store.read_persisted(&line, &file).await {
            Ok(Some(body)) => match extract_client_url(&body) {
                Some(url) => {
                    tracing::info!(source, url = %url, "recovered client schema url from store");
                    self.states.entry(source.to_string()).or_default().client_url = Some(url);
                }
                None => tracing::warn!(source, "persisted api schema carried no client schema url"),
            },
            Ok(None) => tracing::debug!(source, "no persisted api schema to recover from"),
            Err(err) => tracing::warn!(source, error = %err, "reading persisted api schema failed"),
        }
    }
}

/// The one field this daemon consumes from the API schema body.
pub fn extract_client_url(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("result")?
        .get("items_game_url")?
        .as_str()
        .map(str::to_string)
}

fn display_token(token: Option<&str>) -> String {
    token.unwrap_or("eternal").to_string()
}
