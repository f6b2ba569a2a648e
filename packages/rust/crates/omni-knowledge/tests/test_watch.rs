//! Integration tests for the watch loop.

use std::fs;
use std::time::Duration;
use tempfile::TempDir;

use omni_knowledge::{ProjectContext, SyncConfig, WatchMode};

fn config() -> SyncConfig {
    SyncConfig {
        debounce_ms: 50,
        scan_interval_secs: 1,
        workers: 2,
        ..SyncConfig::default()
    }
}

/// Poll `check` until it holds or ten seconds pass.
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    check()
}

#[tokio::test]
async fn test_watch_picks_up_create_and_delete() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("existing.md"), "# Existing\n").unwrap();
    let project = ProjectContext::open(dir.path(), config()).unwrap();

    let mode = project.start_watch().await.unwrap();
    assert_ne!(mode, WatchMode::Off);
    // Startup runs a full pass before watching.
    assert!(project.get_by_path("existing.md").unwrap().is_some());
    assert_eq!(project.start_watch().await.unwrap(), mode);

    fs::create_dir_all(dir.path().join("notes")).unwrap();
    fs::write(
        dir.path().join("notes/live.md"),
        "# Live\n\n- links_to [[Existing]]\n",
    )
    .unwrap();
    assert!(
        eventually(|| project.get_by_path("notes/live.md").unwrap().is_some()).await,
        "created note never synced"
    );
    let live = project.get_by_path("notes/live.md").unwrap().unwrap();
    assert!(live.outgoing[0].target.entity_id().is_some());

    fs::remove_file(dir.path().join("notes/live.md")).unwrap();
    assert!(
        eventually(|| project.get_by_path("notes/live.md").unwrap().is_none()).await,
        "deleted note never removed"
    );

    project.stop_watch().await.unwrap();
    let status = project.status();
    assert_eq!(status.watch_mode, WatchMode::Off);
    assert_eq!(status.pending, 0);
    project.stop_watch().await.unwrap();
}

#[tokio::test]
async fn test_ignored_writes_are_not_tracked_while_watching() {
    let dir = TempDir::new().unwrap();
    let project = ProjectContext::open(dir.path(), config()).unwrap();
    project.start_watch().await.unwrap();

    fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
    fs::write(dir.path().join("node_modules/pkg/readme.md"), "# Pkg\n").unwrap();
    fs::write(dir.path().join("tracked.md"), "# Tracked\n").unwrap();
    assert!(eventually(|| project.get_by_path("tracked.md").unwrap().is_some()).await);
    assert_eq!(project.stats().unwrap().entities, 1);

    project.stop_watch().await.unwrap();
}

#[tokio::test]
async fn test_stop_without_start_is_a_noop() {
    let dir = TempDir::new().unwrap();
    let project = ProjectContext::open(dir.path(), config()).unwrap();
    project.stop_watch().await.unwrap();
    assert_eq!(project.status().watch_mode, WatchMode::Off);
}
