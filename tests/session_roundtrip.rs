//! End-to-end session flow over the mock controller: prepare, calibrate,
//! move, read back, and come back in a second session.

use stagectl::config::{HardwareMap, HardwareSnapshot, MotionSettings, StageId, HARDWARE_FILE};
use stagectl::hardware::{GroupState, MockController, MotionController};
use stagectl::sequence::MotionLine;
use stagectl::session::MotionSession;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;

fn write_snapshot(dir: &Path) {
    let snapshot = HardwareSnapshot {
        groups: vec!["G1".into()],
        stages: vec![StageId::new("G1.S1"), StageId::new("G1.S2")],
        labels: Vec::new(),
        zero_offsets: BTreeMap::new(),
        motion: MotionSettings::default(),
    };
    snapshot.save(&dir.join(HARDWARE_FILE)).unwrap();
}

fn session(dir: &Path, controller: Arc<MockController>) -> MotionSession {
    let map = HardwareMap::load(dir).unwrap();
    let (_tx, rx) = watch::channel(false);
    MotionSession::with_controller(controller, map, None, rx).unwrap()
}

#[tokio::test]
async fn calibrate_move_and_read_back() {
    let dir = tempfile::tempdir().unwrap();
    write_snapshot(dir.path());

    // S2 sits at physical 5.0 when the operator declares logical zero.
    let controller = Arc::new(
        MockController::builder()
            .group("G1", &["G1.S1", "G1.S2"])
            .position("G1.S2", 5.0)
            .build(),
    );
    let session = session(dir.path(), controller.clone());

    session.prepare(false).await.unwrap();
    session.set_zero().await.unwrap();
    session
        .move_to(&[10.0, 90.0], &session.default_options())
        .await
        .unwrap();

    // Physical dispatch honored the offsets.
    assert_eq!(
        controller
            .read_position(&StageId::new("G1.S1"))
            .await
            .unwrap(),
        10.0
    );
    assert_eq!(
        controller
            .read_position(&StageId::new("G1.S2"))
            .await
            .unwrap(),
        95.0
    );

    // Logical read-back undoes them.
    let positions = session.positions().await.unwrap();
    assert_eq!(positions.entries[0].logical, 10.0);
    assert_eq!(positions.entries[1].logical, 90.0);
}

#[tokio::test]
async fn offsets_survive_into_a_new_session() {
    let dir = tempfile::tempdir().unwrap();
    write_snapshot(dir.path());

    let controller = Arc::new(
        MockController::builder()
            .group("G1", &["G1.S1", "G1.S2"])
            .position("G1.S1", 2.5)
            .build(),
    );

    // First session calibrates and disconnects.
    let first = session(dir.path(), controller.clone());
    first.set_zero().await.unwrap();
    first.close().await.unwrap();

    // Second session loads the persisted offsets from the snapshot file.
    let second = session(dir.path(), controller.clone());
    second
        .move_to(&[1.0, 1.0], &second.default_options())
        .await
        .unwrap();
    assert_eq!(
        controller
            .read_position(&StageId::new("G1.S1"))
            .await
            .unwrap(),
        3.5
    );
}

#[tokio::test]
async fn second_run_skips_preparation_against_a_ready_controller() {
    let dir = tempfile::tempdir().unwrap();
    write_snapshot(dir.path());

    // The controller was prepared by an earlier process and is still
    // referenced and enabled.
    let controller = Arc::new(
        MockController::builder()
            .group("G1", &["G1.S1", "G1.S2"])
            .state("G1", GroupState::Ready)
            .build(),
    );
    let session = session(dir.path(), controller.clone());

    session.prepare(false).await.unwrap();
    let mut options = session.default_options();
    options.uncalibrated_ok = true;
    session.move_to(&[1.0, 2.0], &options).await.unwrap();

    assert_eq!(controller.lifecycle_commands_issued().await, 0);
}

#[tokio::test]
async fn whole_sequence_flow_with_mixed_lines() {
    let dir = tempfile::tempdir().unwrap();
    write_snapshot(dir.path());
    let controller = Arc::new(
        MockController::builder()
            .group("G1", &["G1.S1", "G1.S2"])
            .build(),
    );
    let session = session(dir.path(), controller);

    session.prepare(false).await.unwrap();
    session.set_zero().await.unwrap();

    let raw = ["# comment", "5, 15", "", "oops, 1", "7, 17, labeled"];
    let lines: Vec<MotionLine> = raw.iter().filter_map(|l| {
        let trimmed = l.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return None;
        }
        MotionLine::parse(trimmed)
    }).collect();
    assert_eq!(lines.len(), 2);

    let report = session
        .run_sequence(&lines, &session.default_options(), false, None)
        .await
        .unwrap();
    assert_eq!(report.executed, 2);
    assert_eq!(report.skipped, 0);

    let positions = session.positions().await.unwrap();
    assert_eq!(positions.entries[0].logical, 7.0);
    assert_eq!(positions.entries[1].logical, 17.0);
}
