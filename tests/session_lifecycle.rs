//! Session configuration tests against the virtual rig.
//!
//! These tests cover:
//! - Exactly one active input across camera switches
//! - Atomic rollback of failed input and output switches
//! - Falling back to Uninitialized when a rollback itself fails
//! - Photo/video output mutual exclusivity and ordering
//! - Missing-camera scenarios

use glitters::camera::{
    list_devices, select, CameraError, Facing, OutputKind, RigOp, Session, SessionPreset,
    SessionState, VirtualRig,
};

fn running_session(rig: &VirtualRig) -> Session {
    let devices = list_devices(rig);
    let mut session = Session::new(Box::new(rig.clone()));
    session
        .configure_facing(&devices, Facing::Rear, OutputKind::Photo)
        .unwrap();
    session.start().unwrap();
    session
}

fn position(journal: &[RigOp], op: &RigOp) -> usize {
    journal
        .iter()
        .position(|o| o == op)
        .unwrap_or_else(|| panic!("{:?} not in journal {:?}", op, journal))
}

// === Input switching ===

#[test]
fn test_switch_sequence_keeps_exactly_one_input() {
    let rig = VirtualRig::default_rig();
    let devices = list_devices(&rig);
    let mut session = running_session(&rig);

    let sequence = [
        Facing::Front,
        Facing::Rear,
        Facing::Rear,
        Facing::Front,
        Facing::Front,
        Facing::Rear,
        Facing::Front,
    ];
    for facing in sequence {
        session.switch_facing(&devices, facing).unwrap();

        let inputs = rig.inputs();
        assert_eq!(inputs.len(), 1, "after switching to {}", facing);
        let active = session.active_input().unwrap();
        assert_eq!(inputs[0], active.id);
        assert_eq!(active.facing, Some(facing));
        assert_eq!(session.state(), SessionState::Running);
    }

    assert!(rig.violations().is_empty(), "{:?}", rig.violations());
    assert!(!rig.in_transaction());
}

#[test]
fn test_failed_switch_keeps_previous_input() {
    let rig = VirtualRig::default_rig();
    let devices = list_devices(&rig);
    let mut session = running_session(&rig);
    rig.reject_input("rig-front");

    let result = session.switch_facing(&devices, Facing::Front);

    assert!(matches!(result, Err(CameraError::ConfigurationFailed(_))));
    assert_eq!(rig.inputs(), vec!["rig-rear".to_string()]);
    assert_eq!(session.active_input().unwrap().id, "rig-rear");
    assert_eq!(session.state(), SessionState::Running);
    assert!(!rig.in_transaction());
}

#[test]
fn test_failed_restore_leaves_session_uninitialized() {
    let rig = VirtualRig::default_rig();
    let devices = list_devices(&rig);
    let mut session = running_session(&rig);
    rig.reject_input("rig-front");
    rig.reject_input("rig-rear");

    let result = session.switch_facing(&devices, Facing::Front);

    assert!(matches!(result, Err(CameraError::ConfigurationFailed(_))));
    assert!(rig.inputs().is_empty());
    assert!(rig.outputs().is_empty());
    assert!(session.active_input().is_none());
    assert_eq!(session.output_kind(), None);
    assert_eq!(session.state(), SessionState::Uninitialized);
    assert!(!rig.is_running());
    assert!(!rig.in_transaction());
    assert_eq!(session.start(), Err(CameraError::SessionNotReady));
}

#[test]
fn test_switch_to_missing_facing_is_invalid_operation() {
    let rig = VirtualRig::new(vec![VirtualRig::rear_camera()]);
    let devices = list_devices(&rig);
    let mut session = running_session(&rig);

    let result = session.switch_facing(&devices, Facing::Front);

    assert!(matches!(result, Err(CameraError::InvalidOperation(_))));
    assert_eq!(rig.inputs(), vec!["rig-rear".to_string()]);
}

// === Output switching ===

#[test]
fn test_photo_to_video_removes_photo_before_adding_video() {
    let rig = VirtualRig::default_rig();
    let mut session = running_session(&rig);
    rig.clear_journal();

    session.set_output_kind(OutputKind::Video).unwrap();

    let journal = rig.journal();
    let removed = position(&journal, &RigOp::RemoveOutput(OutputKind::Photo));
    let added = position(&journal, &RigOp::AddOutput(OutputKind::Video));
    assert!(removed < added);
    assert_eq!(journal.first(), Some(&RigOp::Begin));
    assert_eq!(journal.last(), Some(&RigOp::Commit));
    assert_eq!(rig.outputs(), vec![OutputKind::Video]);
    assert_eq!(rig.preset(), Some(SessionPreset::High));
    assert_eq!(session.output_kind(), Some(OutputKind::Video));
}

#[test]
fn test_video_to_photo_removes_video_before_adding_photo() {
    let rig = VirtualRig::default_rig();
    let mut session = running_session(&rig);
    session.set_output_kind(OutputKind::Video).unwrap();
    rig.clear_journal();

    session.set_output_kind(OutputKind::Photo).unwrap();

    let journal = rig.journal();
    let removed = position(&journal, &RigOp::RemoveOutput(OutputKind::Video));
    let added = position(&journal, &RigOp::AddOutput(OutputKind::Photo));
    assert!(removed < added);
    assert_eq!(rig.outputs(), vec![OutputKind::Photo]);
    assert_eq!(rig.preset(), Some(SessionPreset::Photo));
}

#[test]
fn test_failed_output_switch_restores_previous_output() {
    let rig = VirtualRig::default_rig();
    let mut session = running_session(&rig);
    rig.reject_output(OutputKind::Video);

    let result = session.set_output_kind(OutputKind::Video);

    assert!(matches!(result, Err(CameraError::ConfigurationFailed(_))));
    assert_eq!(rig.outputs(), vec![OutputKind::Photo]);
    assert_eq!(session.output_kind(), Some(OutputKind::Photo));
    assert!(!rig.in_transaction());
}

// === Missing cameras ===

#[test]
fn test_rear_only_rig_cannot_configure_front() {
    let rig = VirtualRig::new(vec![VirtualRig::rear_camera()]);
    let devices = list_devices(&rig);
    assert!(select(&devices, Facing::Front).is_none());

    let mut session = Session::new(Box::new(rig.clone()));
    let result = session.configure_facing(&devices, Facing::Front, OutputKind::Photo);

    assert_eq!(result, Err(CameraError::NoCameraAvailable));
    assert_eq!(session.state(), SessionState::Uninitialized);
    assert!(rig.inputs().is_empty());
    assert!(rig.outputs().is_empty());
}

#[test]
fn test_front_only_rig_cannot_configure_rear() {
    let rig = VirtualRig::new(vec![VirtualRig::front_camera()]);
    let devices = list_devices(&rig);

    let mut session = Session::new(Box::new(rig.clone()));
    let result = session.configure_facing(&devices, Facing::Rear, OutputKind::Photo);

    assert_eq!(result, Err(CameraError::NoCameraAvailable));
}

// === Lifecycle ===

#[test]
fn test_stop_requires_fresh_configuration() {
    let rig = VirtualRig::default_rig();
    let devices = list_devices(&rig);
    let mut session = running_session(&rig);

    session.stop();
    assert_eq!(session.state(), SessionState::Uninitialized);
    assert!(!rig.is_running());
    assert!(rig.inputs().is_empty());
    assert_eq!(session.start(), Err(CameraError::SessionNotReady));

    session
        .configure_facing(&devices, Facing::Front, OutputKind::Photo)
        .unwrap();
    session.start().unwrap();
    assert_eq!(rig.inputs(), vec!["rig-front".to_string()]);
}

#[test]
fn test_configure_while_running_is_rejected() {
    let rig = VirtualRig::default_rig();
    let devices = list_devices(&rig);
    let mut session = running_session(&rig);

    let result = session.configure(&devices[1], OutputKind::Photo);

    assert_eq!(result, Err(CameraError::SessionAlreadyRunning));
    assert_eq!(rig.inputs(), vec!["rig-rear".to_string()]);
}
