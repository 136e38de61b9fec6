// src/store/mod.rs
pub mod git;

use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{op}: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("git {op} exited with code {code}: {stderr}")]
    Exit {
        op: String,
        code: i32,
        stderr: String,
    },
}

/// Append-only per-source history. One line (git branch) per source, created
/// lazily from the baseline; operations on one line never touch another.
#[async_trait::async_trait]
pub trait VersionStore: Send + Sync {
    /// Create the source's history line from the baseline if it does not
    /// exist yet.
    async fn ensure_line(&self, line: &str) -> Result<(), StoreError>;

    async fn switch_to(&self, line: &str) -> Result<(), StoreError>;

    /// Write the given files into the currently checked-out line's tree.
    async fn write_files(&self, files: &BTreeMap<String, String>) -> Result<(), StoreError>;

    /// Commit staged changes on the current line. Returns `false` when the
    /// tree turned out unchanged and no commit was created; not an error.
    async fn commit(&self, header: &str, body: &str) -> Result<bool, StoreError>;

    /// Replicate all lines to the mirror in one operation.
    async fn push_all(&self, remote: &str) -> Result<(), StoreError>;

    /// Read a previously persisted file from a line, if both exist. Used by
    /// the resolver to recover a client schema URL on cold start.
    async fn read_persisted(&self, line: &str, file: &str) -> Result<Option<String>, StoreError>;
}

/// Branch name for a source's history line: display name lowercased with
/// spaces removed, e.g. "Team Fortress 2" -> "teamfortress2".
pub fn line_name(source: &str) -> String {
    source.replace(' ', "").to_lowercase()
}

// --- Test helper ---

/// In-memory store double for tests: records every operation and can be told
/// to fail commits.
pub struct MockStore {
    pub ops: std::sync::Mutex<Vec<String>>,
    pub files: std::sync::Mutex<BTreeMap<(String, String), String>>,
    pub current_line: std::sync::Mutex<String>,
    pub fail_commits: std::sync::atomic::AtomicBool,
}

impl MockStore {
    pub fn new() -> Self {
        Self {
            ops: std::sync::Mutex::new(Vec::new()),
            files: std::sync::Mutex::new(BTreeMap::new()),
            current_line: std::sync::Mutex::new(String::new()),
            fail_commits: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn seed_file(&self, line: &str, file: &str, content: &str) {
        self.files
            .lock()
            .unwrap()
            .insert((line.to_string(), file.to_string()), content.to_string());
    }

    pub fn commit_count(&self) -> usize {
        self.ops
            .lock()
            .unwrap()
            .iter()
            .filter(|op| op.starts_with("commit"))
            .count()
    }
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl VersionStore for MockStore {
    async fn ensure_line(&self, line: &str) -> Result<(), StoreError> {
        self.ops.lock().unwrap().push(format!("ensure_line {line}"));
        Ok(())
    }

    async fn switch_to(&self, line: &str) -> Result<(), StoreError> {
        self.ops.lock().unwrap().push(format!("switch_to {line}"));
        *self.current_line.lock().unwrap() = line.to_string();
        Ok(())
    }

    async fn write_files(&self, files: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let line = self.current_line.lock().unwrap().clone();
        let mut stored = self.files.lock().unwrap();
        for (name, content) in files {
            stored.insert((line.clone(), name.clone()), content.clone());
        }
        self.ops
            .lock()
            .unwrap()
            .push(format!("write_files {}", files.len()));
        Ok(())
    }

    async fn commit(&self, header: &str, _body: &str) -> Result<bool, StoreError> {
        if self.fail_commits.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(StoreError::Exit {
                op: "commit".into(),
                code: 128,
                stderr: "simulated failure".into(),
            });
        }
        self.ops.lock().unwrap().push(format!("commit {header}"));
        Ok(true)
    }

    async fn push_all(&self, remote: &str) -> Result<(), StoreError> {
        self.ops.lock().unwrap().push(format!("push_all {remote}"));
        Ok(())
    }

    async fn read_persisted(&self, line: &str, file: &str) -> Result<Option<String>, StoreError> {
        self.ops
            .lock()
            .unwrap()
            .push(format!("read_persisted {line}/{file}"));
        Ok(self
            .files
            .lock()
            .unwrap()
            .get(&(line.to_string(), file.to_string()))
            .cloned())
    }
}
