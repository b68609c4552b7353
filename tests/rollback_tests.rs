mod common;

use common::{as_runner, at, record, write_history, ScriptedRunner};
use std::sync::Arc;
use tempfile::TempDir;
use upkeep::backends::{BackendRegistry, RegistryOptions};
use upkeep::history::{HistoryStore, BULK_TRANSACTION};
use upkeep::rollback::{BatchSelector, RevertOutcome, RollbackEngine};
use upkeep::BackendKind;

fn setup() -> (TempDir, HistoryStore) {
    let temp = TempDir::new().unwrap();
    let store = HistoryStore::open(temp.path().join("transactions.log"));
    (temp, store)
}

fn registry(runner: &Arc<ScriptedRunner>) -> BackendRegistry {
    BackendRegistry::standard(as_runner(runner), &RegistryOptions::default())
}

#[tokio::test]
async fn test_batch_reverted_in_reverse_order() {
    let (_temp, store) = setup();
    write_history(
        &store,
        &[
            record(at(0, 1), "B1", BackendKind::Apt, "curl", "1.0", "1.1"),
            record(at(0, 2), "B1", BackendKind::Apt, "wget", "NONE", "2.0"),
        ],
    );

    let runner = Arc::new(ScriptedRunner::new());
    let registry = registry(&runner);
    let engine = RollbackEngine::new(&registry, store);

    let summary = engine
        .rollback(&BatchSelector::Batch("B1".to_string()))
        .await
        .unwrap();

    assert_eq!(
        runner.command_lines(),
        vec![
            "apt-get -q -y remove wget",
            "apt-get -q -y install --allow-downgrades curl=1.0",
        ]
    );
    assert_eq!(summary.batch_id.as_deref(), Some("B1"));
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.outcomes[0].unit, "wget");
    assert_eq!(summary.outcomes[1].unit, "curl");
}

#[tokio::test]
async fn test_fresh_install_is_removed_not_pinned() {
    let (_temp, store) = setup();
    write_history(
        &store,
        &[record(at(0, 1), "B1", BackendKind::Apt, "htop", "NONE", "3.3.0-4")],
    );

    let runner = Arc::new(ScriptedRunner::new());
    let registry = registry(&runner);
    RollbackEngine::new(&registry, store)
        .rollback(&BatchSelector::Latest)
        .await
        .unwrap();

    let lines = runner.command_lines();
    assert_eq!(lines, vec!["apt-get -q -y remove htop"]);
    assert!(!lines.iter().any(|line| line.contains("htop=")));
}

#[tokio::test]
async fn test_dnf_per_package_record_is_refused_without_commands() {
    let (_temp, store) = setup();
    write_history(
        &store,
        &[record(at(0, 1), "B1", BackendKind::Dnf, "kernel", "6.8.8", "6.8.9")],
    );

    let runner = Arc::new(ScriptedRunner::new());
    let registry = registry(&runner);
    let summary = RollbackEngine::new(&registry, store)
        .rollback(&BatchSelector::Latest)
        .await
        .unwrap();

    assert!(runner.calls().is_empty());
    assert_eq!(summary.failed, 1);
    match &summary.outcomes[0].outcome {
        RevertOutcome::Failed(reason) => assert!(reason.contains("not supported")),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn test_dnf_bulk_record_undoes_transaction() {
    let (_temp, store) = setup();
    write_history(
        &store,
        &[record(at(0, 1), "B1", BackendKind::Dnf, BULK_TRANSACTION, "58", "58")],
    );

    let runner = Arc::new(ScriptedRunner::new());
    let registry = registry(&runner);
    let summary = RollbackEngine::new(&registry, store)
        .rollback(&BatchSelector::Latest)
        .await
        .unwrap();

    assert_eq!(runner.command_lines(), vec!["dnf -y history undo 58"]);
    assert_eq!(summary.succeeded, 1);
}

#[tokio::test]
async fn test_empty_history_makes_no_adapter_calls() {
    let (_temp, store) = setup();
    let runner = Arc::new(ScriptedRunner::new());
    let registry = registry(&runner);
    let engine = RollbackEngine::new(&registry, store.clone());

    let summary = engine.rollback(&BatchSelector::Latest).await.unwrap();
    assert_eq!(summary.batch_id, None);
    assert_eq!((summary.succeeded, summary.failed), (0, 0));

    // A batch that matches nothing behaves the same way.
    write_history(
        &store,
        &[record(at(0, 1), "B1", BackendKind::Snap, "firefox", "4090", "4173")],
    );
    let summary = engine
        .rollback(&BatchSelector::Batch("B9".to_string()))
        .await
        .unwrap();
    assert_eq!((summary.succeeded, summary.failed), (0, 0));
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_failed_revert_does_not_stop_the_batch() {
    let (_temp, store) = setup();
    write_history(
        &store,
        &[
            record(at(0, 1), "B1", BackendKind::Snap, "firefox", "4090", "4173"),
            record(at(0, 2), "B1", BackendKind::Apt, "curl", "1.0", "1.1"),
        ],
    );

    let runner = Arc::new(ScriptedRunner::new().fail(
        "apt-get",
        &["-q", "-y", "install", "--allow-downgrades"],
        100,
        "E: Version '1.0' for 'curl' was not found",
    ));
    let registry = registry(&runner);
    let summary = RollbackEngine::new(&registry, store)
        .rollback(&BatchSelector::Latest)
        .await
        .unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    assert!(matches!(
        &summary.outcomes[0].outcome,
        RevertOutcome::Failed(reason) if reason.contains("no longer available")
    ));
    assert_eq!(summary.outcomes[1].outcome, RevertOutcome::Reverted);
    assert_eq!(runner.command_lines().last().unwrap(), "snap revert firefox");
}

#[tokio::test]
async fn test_snap_without_prior_revision() {
    let (_temp, store) = setup();
    write_history(
        &store,
        &[record(at(0, 1), "B1", BackendKind::Snap, "hello", "29", "42")],
    );

    let runner = Arc::new(ScriptedRunner::new().fail(
        "snap",
        &["revert"],
        1,
        "error: cannot revert \"hello\": no revision to revert to",
    ));
    let registry = registry(&runner);
    let summary = RollbackEngine::new(&registry, store)
        .rollback(&BatchSelector::Latest)
        .await
        .unwrap();

    assert!(matches!(
        &summary.outcomes[0].outcome,
        RevertOutcome::Failed(reason) if reason.contains("no prior revision")
    ));
}

#[tokio::test]
async fn test_latest_batch_spans_backends() {
    let (_temp, store) = setup();
    write_history(
        &store,
        &[
            record(at(0, 1), "B1", BackendKind::Apt, "curl", "1.0", "1.1"),
            record(at(5, 0), "B2", BackendKind::Flatpak, "org.gimp.GIMP", "user:abc", "user:def"),
            record(at(5, 1), "B2", BackendKind::Apt, "vim", "9.0", "9.1"),
        ],
    );

    let runner = Arc::new(ScriptedRunner::new());
    let registry = registry(&runner);
    let summary = RollbackEngine::new(&registry, store)
        .rollback(&BatchSelector::Latest)
        .await
        .unwrap();

    assert_eq!(summary.batch_id.as_deref(), Some("B2"));
    assert_eq!(
        runner.command_lines(),
        vec![
            "apt-get -q -y install --allow-downgrades vim=9.0",
            "flatpak update --user -y --noninteractive --commit=abc org.gimp.GIMP",
        ]
    );
}

#[tokio::test]
async fn test_flatpak_commit_unavailable() {
    let (_temp, store) = setup();
    write_history(
        &store,
        &[record(at(0, 1), "B1", BackendKind::Flatpak, "org.gimp.GIMP", "system:abc", "system:def")],
    );

    let runner = Arc::new(ScriptedRunner::new().fail(
        "flatpak",
        &["update", "--system"],
        1,
        "error: Commit abc not found",
    ));
    let registry = registry(&runner);
    let summary = RollbackEngine::new(&registry, store)
        .rollback(&BatchSelector::Latest)
        .await
        .unwrap();

    assert!(matches!(
        &summary.outcomes[0].outcome,
        RevertOutcome::Failed(reason) if reason.contains("Commit abc")
    ));
}

#[tokio::test]
async fn test_explicit_history_file() {
    let (temp, default_store) = setup();
    let other = HistoryStore::open(temp.path().join("copied.log"));
    write_history(
        &other,
        &[record(at(0, 1), "B7", BackendKind::Snap, "firefox", "4090", "4173")],
    );

    let runner = Arc::new(ScriptedRunner::new());
    let registry = registry(&runner);
    let engine = RollbackEngine::new(&registry, default_store);

    let selector = BatchSelector::parse(&other.path().to_string_lossy()).unwrap();
    let summary = engine.rollback(&selector).await.unwrap();

    assert_eq!(summary.batch_id.as_deref(), Some("B7"));
    assert_eq!(runner.command_lines(), vec!["snap revert firefox"]);
}

#[tokio::test]
async fn test_unreadable_lines_are_skipped() {
    let (_temp, store) = setup();
    write_history(
        &store,
        &[record(at(0, 1), "B1", BackendKind::Snap, "firefox", "4090", "4173")],
    );
    std::fs::OpenOptions::new()
        .append(true)
        .open(store.path())
        .and_then(|mut file| {
            use std::io::Write;
            file.write_all(b"2024-05-02T09:00:02Z|B1|PACMAN|vim|UPDATE|1|2\n")
        })
        .unwrap();

    let runner = Arc::new(ScriptedRunner::new());
    let registry = registry(&runner);
    let summary = RollbackEngine::new(&registry, store)
        .rollback(&BatchSelector::Batch("B1".to_string()))
        .await
        .unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.succeeded, 1);
    assert!(!summary.is_clean());
}

#[tokio::test]
async fn test_missing_adapter_is_a_per_record_failure() {
    let (_temp, store) = setup();
    write_history(
        &store,
        &[
            record(at(0, 1), "B1", BackendKind::Apt, "curl", "1.0", "1.1"),
            record(at(0, 2), "B1", BackendKind::Snap, "firefox", "4090", "4173"),
        ],
    );

    let runner = Arc::new(ScriptedRunner::new());
    let options = RegistryOptions {
        flatpak_user: true,
        disabled: vec!["SNAP".to_string()],
    };
    let registry = BackendRegistry::standard(as_runner(&runner), &options);
    let summary = RollbackEngine::new(&registry, store)
        .rollback(&BatchSelector::Latest)
        .await
        .unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(runner.command_lines(), vec!["apt-get -q -y install --allow-downgrades curl=1.0"]);
}
