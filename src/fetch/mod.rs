// src/fetch/mod.rs
pub mod http;
pub mod pool;

/// Which of the two documents a task targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// The `GetSchema` response from the Steam Web API.
    Api,
    /// The client schema referenced by the API schema's `items_game_url`.
    Client,
}

impl Tier {
    /// File name used in the tracking tree.
    pub fn file_name(self, source: &str) -> String {
        match self {
            Tier::Api => format!("{source} Schema"),
            Tier::Client => format!("{source} Client Schema"),
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Api => f.write_str("api"),
            Tier::Client => f.write_str("client"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("server returned HTTP {status}")]
    Http { status: u16 },
}

/// Outcome of one conditional fetch. Errors are data here, not `Err`; a
/// worker always produces exactly one outcome per task.
#[derive(Debug)]
pub enum FetchOutcome {
    /// 200 with a body; `token` is the response's `Last-Modified`, absent
    /// when the server omits one (such a source re-fetches every cycle).
    Fresh {
        body: String,
        token: Option<String>,
    },
    /// 304 against the token we sent.
    NotModified,
    Failed(FetchError),
}

/// One unit of work for the pool. Built by the orchestrator, consumed once
/// by exactly one worker.
#[derive(Debug, Clone)]
pub struct FetchTask {
    pub source: String,
    pub tier: Tier,
    pub url: String,
    /// Cached freshness token; `None` means "always fetch".
    pub token: Option<String>,
}

/// Keyed result; arrival order carries no meaning relative to submit order.
#[derive(Debug)]
pub struct FetchResult {
    pub source: String,
    pub tier: Tier,
    pub outcome: FetchOutcome,
}

/// Seam between the pool and the HTTP client, mockable in tests. The pool
/// folds `Err` into `FetchOutcome::Failed`, so every submitted task still
/// yields exactly one result.
#[async_trait::async_trait]
pub trait ConditionalFetch: Send + Sync {
    async fn conditional_get(
        &self,
        url: &str,
        token: Option<&str>,
    ) -> Result<FetchOutcome, FetchError>;
}
