// src/store/git.rs
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;

use crate::store::{StoreError, VersionStore};

const GITIGNORE: &str = "daemon.log\n";

/// Version store backed by the system git binary. Authentication, remotes
/// and credentials are whatever the host git is configured with.
pub struct GitStore {
    work_dir: PathBuf,
    baseline: String,
    author_name: String,
    author_email: String,
}

impl GitStore {
    /// Open the tracking repository, initializing it with a baseline
    /// "Origin" commit on first run. Failure here is fatal to the process;
    /// everything after init is per-cycle and soft.
    pub async fn open(work_dir: &Path, author_name: &str, author_email: &str) -> Result<Self> {
        let store = Self {
            work_dir: work_dir.to_path_buf(),
            baseline: String::new(),
            author_name: author_name.to_string(),
            author_email: author_email.to_string(),
        };

        if !work_dir.join(".git").exists() {
            tracing::info!(dir = %work_dir.display(), "initializing tracking repository");
            tokio::fs::create_dir_all(work_dir)
                .await
                .context("creating tracker dir")?;
            store.run(&["init"]).await.context("git init")?;
            tokio::fs::write(work_dir.join(".gitignore"), GITIGNORE)
                .await
                .context("writing .gitignore")?;
            store.run(&["add", "-A"]).await.context("staging origin files")?;
            store
                .run(&["commit", "-m", "Origin"])
                .await
                .context("creating baseline commit")?;

            // Record the baseline branch; HEAD will wander across source
            // branches once cycles start, so it cannot be re-derived later.
            let head = store
                .run(&["symbolic-ref", "--short", "HEAD"])
                .await
                .context("resolving baseline branch")?;
            let name = String::from_utf8_lossy(&head.stdout).trim().to_string();
            store
                .run(&["config", "schema-tracker.baseline", &name])
                .await
                .context("recording baseline branch")?;
        }

        let baseline = match store.run(&["config", "--get", "schema-tracker.baseline"]).await {
            Ok(out) => String::from_utf8_lossy(&out.stdout).trim().to_string(),
            Err(_) => {
                // Pre-existing repo without the marker; HEAD is the best guess.
                let head = store
                    .run(&["symbolic-ref", "--short", "HEAD"])
                    .await
                    .context("resolving baseline branch")?;
                String::from_utf8_lossy(&head.stdout).trim().to_string()
            }
        };

        Ok(Self { baseline, ..store })
    }

    pub fn baseline(&self) -> &str {
        &self.baseline
    }

    async fn run(&self, args: &[&str]) -> Result<Output, StoreError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.work_dir)
            .env("GIT_AUTHOR_NAME", &self.author_name)
            .env("GIT_AUTHOR_EMAIL", &self.author_email)
            .env("GIT_COMMITTER_NAME", &self.author_name)
            .env("GIT_COMMITTER_EMAIL", &self.author_email)
            .output()
            .await
            .map_err(|e| StoreError::Io {
                op: "spawning git",
                source: e,
            })?;

        let op = args.first().copied().unwrap_or_default();
        let code = output.status.code().unwrap_or(-1);
        tracing::debug!(op, code, "git");

        if output.status.success() {
            Ok(output)
        } else {
            Err(StoreError::Exit {
                op: op.to_string(),
                code,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    async fn line_exists(&self, line: &str) -> bool {
        let spec = format!("refs/heads/{line}");
        self.run(&["show-ref", "--verify", "--quiet", &spec])
            .await
            .is_ok()
    }
}

#[async_trait::async_trait]
impl VersionStore for GitStore {
    async fn ensure_line(&self, line: &str) -> Result<(), StoreError> {
        if self.line_exists(line).await {
            return Ok(());
        }
        self.run(&["branch", line, &self.baseline]).await?;
        Ok(())
    }

    async fn switch_to(&self, line: &str) -> Result<(), StoreError> {
        self.run(&["checkout", line]).await?;
        Ok(())
    }

    async fn write_files(&self, files: &BTreeMap<String, String>) -> Result<(), StoreError> {
        for (name, content) in files {
            tokio::fs::write(self.work_dir.join(name), content)
                .await
                .map_err(|e| StoreError::Io {
                    op: "writing schema file",
                    source: e,
                })?;
        }
        Ok(())
    }

    async fn commit(&self, header: &str, body: &str) -> Result<bool, StoreError> {
        self.run(&["add", "-A"]).await?;

        // Identical content under a new freshness token stages nothing;
        // that is "already durable", not a failure.
        let status = self.run(&["status", "--porcelain"]).await?;
        if status.stdout.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(false);
        }

        let message = format!("{header}\n\n{body}\n");
        self.run(&["commit", "-m", &message]).await?;
        Ok(true)
    }

    async fn push_all(&self, remote: &str) -> Result<(), StoreError> {
        self.run(&["push", "--porcelain", "--mirror", remote]).await?;
        Ok(())
    }

    async fn read_persisted(&self, line: &str, file: &str) -> Result<Option<String>, StoreError> {
        // `git show` reads straight from the object store, leaving the
        // worktree checkout alone.
        let spec = format!("{line}:{file}");
        match self.run(&["show", &spec]).await {
            Ok(output) => Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned())),
            Err(StoreError::Exit { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
