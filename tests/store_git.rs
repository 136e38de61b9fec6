// tests/store_git.rs
//! Exercises the git-backed store against a real repository in a tempdir.
//! Each test skips itself when no git binary is on PATH.

use std::collections::BTreeMap;

use schema_tracker::store::git::GitStore;
use schema_tracker::store::VersionStore;

async fn git_available() -> bool {
    tokio::process::Command::new("git")
        .arg("--version")
        .output()
        .await
        .is_ok()
}

fn files(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn init_creates_baseline_and_reopen_keeps_it() {
    if !git_available().await {
        eprintln!("git not available; skipping");
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("tracking");

    let store = GitStore::open(&dir, "tester", "tester@localhost")
        .await
        .expect("init");
    let baseline = store.baseline().to_string();
    assert!(!baseline.is_empty());
    assert!(dir.join(".git").exists());
    assert!(dir.join(".gitignore").exists());

    // Leave HEAD on a source branch, then reopen: the recorded baseline must
    // win over wherever HEAD happens to sit.
    store.ensure_line("alpha").await.expect("branch");
    store.switch_to("alpha").await.expect("checkout");
    drop(store);

    let reopened = GitStore::open(&dir, "tester", "tester@localhost")
        .await
        .expect("reopen");
    assert_eq!(reopened.baseline(), baseline);
}

#[tokio::test]
async fn commit_is_idempotent_for_unchanged_content() {
    if !git_available().await {
        eprintln!("git not available; skipping");
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let store = GitStore::open(&tmp.path().join("tracking"), "tester", "tester@localhost")
        .await
        .expect("init");

    store.ensure_line("alpha").await.unwrap();
    store.switch_to("alpha").await.unwrap();
    store
        .write_files(&files(&[("Alpha Schema", "{\"a\":1}\n")]))
        .await
        .unwrap();
    let committed = store
        .commit("Alpha Schema", "Alpha Schema: T1")
        .await
        .unwrap();
    assert!(committed);

    // Same bytes again: nothing staged, no second commit, no error.
    store
        .write_files(&files(&[("Alpha Schema", "{\"a\":1}\n")]))
        .await
        .unwrap();
    let committed = store
        .commit("Alpha Schema", "Alpha Schema: T1")
        .await
        .unwrap();
    assert!(!committed);
}

#[tokio::test]
async fn lines_are_isolated_from_each_other() {
    if !git_available().await {
        eprintln!("git not available; skipping");
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let store = GitStore::open(&tmp.path().join("tracking"), "tester", "tester@localhost")
        .await
        .expect("init");

    store.ensure_line("alpha").await.unwrap();
    store.switch_to("alpha").await.unwrap();
    store
        .write_files(&files(&[("Alpha Schema", "alpha content\n")]))
        .await
        .unwrap();
    assert!(store.commit("Alpha Schema", "Alpha Schema: T1").await.unwrap());

    // A line created afterwards starts from the baseline, not from alpha.
    store.ensure_line("beta").await.unwrap();
    assert_eq!(
        store.read_persisted("beta", "Alpha Schema").await.unwrap(),
        None
    );
    assert_eq!(
        store
            .read_persisted("alpha", "Alpha Schema")
            .await
            .unwrap()
            .as_deref(),
        Some("alpha content\n")
    );

    // Committing to beta leaves alpha's history alone.
    store.switch_to("beta").await.unwrap();
    store
        .write_files(&files(&[("Beta Schema", "beta content\n")]))
        .await
        .unwrap();
    assert!(store.commit("Beta Schema", "Beta Schema: T1").await.unwrap());
    assert_eq!(
        store.read_persisted("alpha", "Beta Schema").await.unwrap(),
        None
    );
}

#[tokio::test]
async fn read_persisted_is_none_for_missing_line_or_file() {
    if !git_available().await {
        eprintln!("git not available; skipping");
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let store = GitStore::open(&tmp.path().join("tracking"), "tester", "tester@localhost")
        .await
        .expect("init");

    assert_eq!(
        store.read_persisted("nosuchline", "Alpha Schema").await.unwrap(),
        None
    );
    store.ensure_line("alpha").await.unwrap();
    assert_eq!(
        store.read_persisted("alpha", "No Such File").await.unwrap(),
        None
    );
}
