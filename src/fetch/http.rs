// src/fetch/http.rs
use reqwest::header::{IF_MODIFIED_SINCE, LAST_MODIFIED};
use reqwest::StatusCode;
use std::time::Duration;

use crate::fetch::{ConditionalFetch, FetchError, FetchOutcome};

/// Conditional GET over reqwest. One client is shared by all workers;
/// reqwest pools connections internally.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(
        user_agent: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent.to_string())
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl ConditionalFetch for HttpFetcher {
    async fn conditional_get(
        &self,
        url: &str,
        token: Option<&str>,
    ) -> Result<FetchOutcome, FetchError> {
        let mut req = self.client.get(url);
        if let Some(tok) = token {
            req = req.header(IF_MODIFIED_SINCE, tok);
        }

        let resp = req.send().await.map_err(map_send_error)?;
        let status = resp.status();

        if status == StatusCode::NOT_MODIFIED {
            return Ok(FetchOutcome::NotModified);
        }
        if status != StatusCode::OK {
            return Err(FetchError::Http {
                status: status.as_u16(),
            });
        }

        let new_token = resp
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string());

        let body = resp.text().await.map_err(map_send_error)?;
        Ok(FetchOutcome::Fresh {
            body: normalize_newlines(&body),
            token: new_token,
        })
    }
}

fn map_send_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Network(e.to_string())
    }
}

/// Normalize CR/CRLF to LF so diffs in the tracking history stay stable
/// across upstream platform changes.
pub fn normalize_newlines(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\r' {
            if chars.peek() == Some(&'\n') {
                chars.next();
            }
            out.push('\n');
        } else {
            out.push(c);
        }
    }
    out
}
