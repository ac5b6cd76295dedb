use mirror_sync::daemon::{
    Daemon, GitSyncRunner, LogSink, StateStore, SyncCommand, SyncOutcome, SyncStatus,
};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const SCRIPT: &str = r#"case "$0" in
    *slow.git) sleep 30 ;;
    *broken.git) echo "fatal: remote hung up" >&2; exit 2 ;;
esac"#;

fn bare_mirror(repo_dir: &Path, name: &str) {
    let repository = git2::Repository::init_bare(repo_dir.join(format!("{name}.git"))).unwrap();
    repository
        .remote("origin", "https://example.invalid/upstream.git")
        .unwrap();
}

fn setup(root: &TempDir) -> (Daemon<GitSyncRunner>, Arc<StateStore>) {
    let repo_dir = root.path().join("repositories");
    fs::create_dir_all(&repo_dir).unwrap();
    for name in ["good", "broken", "slow"] {
        bare_mirror(&repo_dir, name);
    }

    let log = Arc::new(
        LogSink::new(root.path().join("logs").join("mirror-sync.log"))
            .unwrap()
            .with_console(Box::new(io::sink())),
    );
    let store = Arc::new(StateStore::open(
        root.path().join("mirror-config.json"),
        Arc::clone(&log),
    ));
    store.enable("good", None, None).unwrap();
    store.enable("broken", None, None).unwrap();
    store.enable("missing", None, None).unwrap();
    store.enable("slow", None, Some(1)).unwrap();

    let runner = GitSyncRunner::new(&repo_dir)
        .with_command(SyncCommand::new("sh", ["-c", SCRIPT, "{path}"]));
    let daemon = Daemon::new(runner, Arc::clone(&store), log, Duration::from_secs(60));
    (daemon, store)
}

#[tokio::test]
async fn one_cycle_isolates_every_kind_of_outcome() {
    let root = TempDir::new().unwrap();
    let (daemon, store) = setup(&root);

    let results = daemon.run_cycle().await;

    assert_eq!(results.len(), 4);
    let slow = results.iter().find(|r| r.name == "slow").unwrap();
    assert_eq!(
        slow.outcome,
        SyncOutcome::Timeout {
            limit: Duration::from_secs(1)
        }
    );
    assert!(slow.duration >= Duration::from_secs(1));

    let config = store.load();
    let status = |name: &str| config.mirrors[name].last_status;
    assert_eq!(status("good"), SyncStatus::Success);
    assert_eq!(status("broken"), SyncStatus::Failed);
    assert_eq!(status("missing"), SyncStatus::Error);
    assert_eq!(status("slow"), SyncStatus::Timeout);

    assert_eq!(
        config.mirrors["broken"].last_error.as_deref(),
        Some("Git command failed (exit 2): fatal: remote hung up")
    );
    assert_eq!(
        config.mirrors["slow"].last_error.as_deref(),
        Some("timeout after 1s")
    );
    assert!(config.mirrors["missing"]
        .last_error
        .as_deref()
        .unwrap()
        .starts_with("Repository path does not exist"));
    assert!(config.mirrors.values().all(|m| m.next_sync_at.is_some()));
}

#[tokio::test]
async fn cycle_leaves_an_event_trail() {
    let root = TempDir::new().unwrap();
    let (daemon, _store) = setup(&root);

    daemon.run_cycle().await;

    let log = fs::read_to_string(root.path().join("logs").join("mirror-sync.log")).unwrap();
    assert!(log.contains("[INFO] Found 4 repositories due for sync"));
    assert!(log.contains("[SUCCESS] good: Synced successfully"));
    assert!(log.contains("[ERROR] slow: Timeout after 1s"));
    assert!(log.contains("[INFO] Sync cycle complete: 4 repositories processed"));
}

#[test]
fn legacy_config_is_rewritten_with_current_field_names() {
    let root = TempDir::new().unwrap();
    let path = root.path().join("mirror-config.json");
    fs::write(
        &path,
        r#"{
  "version": "1.0",
  "defaults": { "schedule": "0 */6 * * *", "timeout": 600, "max_concurrent": 3 },
  "mirrors": {
    "linux": {
      "enabled": true,
      "schedule": "0 */6 * * *",
      "timeout": 900,
      "last_sync": "2024-05-01T10:00:00.000000Z",
      "last_status": "success",
      "last_error": null,
      "next_sync": "2024-05-01T12:00:00Z"
    }
  }
}"#,
    )
    .unwrap();

    let store = StateStore::open(&path, Arc::new(LogSink::console(Box::new(io::sink()))));
    store.disable("linux").unwrap();

    let written = fs::read_to_string(&path).unwrap();
    assert!(written.contains("\"timeout_seconds\": 900"));
    assert!(written.contains("\"last_sync_at\": \"2024-05-01T10:00:00Z\""));
    assert!(written.contains("\"enabled\": false"));
    assert!(!written.contains("\"last_sync\":"));
}
