//! Sequence runner integration tests over the mock controller.

use stagectl::config::{HardwareMap, HardwareSnapshot, MotionSettings, StageId, HARDWARE_FILE};
use stagectl::error::MotionError;
use stagectl::hardware::MockController;
use stagectl::sequence::MotionLine;
use stagectl::session::MotionSession;
use stagectl::storage::PositionLog;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;

fn write_snapshot(dir: &Path, offsets: &[(&str, f64)]) {
    let snapshot = HardwareSnapshot {
        groups: vec!["G1".into()],
        stages: vec![StageId::new("G1.S1"), StageId::new("G1.S2")],
        labels: Vec::new(),
        zero_offsets: offsets
            .iter()
            .map(|(id, offset)| (id.to_string(), *offset))
            .collect::<BTreeMap<_, _>>(),
        motion: MotionSettings::default(),
    };
    snapshot.save(&dir.join(HARDWARE_FILE)).unwrap();
}

fn mock() -> Arc<MockController> {
    Arc::new(
        MockController::builder()
            .group("G1", &["G1.S1", "G1.S2"])
            .build(),
    )
}

fn session(dir: &Path, controller: Arc<MockController>) -> MotionSession {
    let map = HardwareMap::load(dir).unwrap();
    let (_tx, rx) = watch::channel(false);
    MotionSession::with_controller(controller, map, None, rx).unwrap()
}

fn lines(raw: &[&str]) -> Vec<MotionLine> {
    raw.iter().map(|l| MotionLine::parse(l).unwrap()).collect()
}

#[tokio::test]
async fn mismatched_line_is_skipped_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    write_snapshot(dir.path(), &[("G1.S1", 0.0), ("G1.S2", 0.0)]);
    let controller = mock();
    let session = session(dir.path(), controller.clone());

    // Line 2 has three targets against two active stages.
    let lines = lines(&["10, 20", "1, 2, 3", "30, 40"]);
    let report = session
        .run_sequence(&lines, &session.default_options(), false, None)
        .await
        .unwrap();

    assert_eq!(report.executed, 2);
    assert_eq!(report.skipped, 1);

    // Lines 1 and 3 both ran; the stages end where line 3 put them.
    let snapshot = session.positions().await.unwrap();
    assert_eq!(snapshot.entries[0].logical, 30.0);
    assert_eq!(snapshot.entries[1].logical, 40.0);
}

#[tokio::test]
async fn missing_offset_stops_the_run() {
    let dir = tempfile::tempdir().unwrap();
    // Only S1 is calibrated; calibration absence is an operator error, not
    // a skippable line.
    write_snapshot(dir.path(), &[("G1.S1", 0.0)]);
    let session = session(dir.path(), mock());

    let lines = lines(&["10, 20", "30, 40"]);
    let err = session
        .run_sequence(&lines, &session.default_options(), false, None)
        .await
        .unwrap_err();
    assert!(matches!(err, MotionError::OffsetMissing { .. }));
}

#[tokio::test]
async fn confirmed_moves_are_logged_with_labels() {
    let dir = tempfile::tempdir().unwrap();
    write_snapshot(dir.path(), &[("G1.S1", 0.0), ("G1.S2", 0.0)]);
    let session = session(dir.path(), mock());

    let log_path = dir.path().join("positions.csv");
    let log = PositionLog::open(&log_path).unwrap();

    let lines = lines(&["10, 20, first_move", "1, 2, 3", "30, 40"]);
    let report = session
        .run_sequence(&lines, &session.default_options(), false, Some(log))
        .await
        .unwrap();
    assert_eq!(report.executed, 2);

    // Only confirmed moves hit the log; the skipped line does not.
    let contents = std::fs::read_to_string(&log_path).unwrap();
    let rows: Vec<&str> = contents.lines().collect();
    assert_eq!(rows.len(), 2);
    assert!(rows[0].ends_with("first_move"));
    assert!(rows[1].contains("30.0000"));
}

#[tokio::test]
async fn loop_mode_stops_cleanly_on_cancellation() {
    let dir = tempfile::tempdir().unwrap();
    write_snapshot(dir.path(), &[("G1.S1", 0.0), ("G1.S2", 0.0)]);
    let controller = mock();

    let map = HardwareMap::load(dir.path()).unwrap();
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let session = MotionSession::with_controller(controller, map, None, cancel_rx).unwrap();

    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let _ = cancel_tx.send(true);
    });

    let lines = lines(&["10, 20", "30, 40"]);
    let report = session
        .run_sequence(&lines, &session.default_options(), true, None)
        .await
        .unwrap();

    // The loop ran at least one full pass before the interrupt landed.
    assert!(report.executed >= 2);
}
