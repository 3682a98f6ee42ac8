//! FSM unit tests

use webpilotx::deploy::fsm::{DeploymentEvent, DeploymentFsm, DeploymentState};
use webpilotx::models::DeploymentStatus;

#[test]
fn test_fsm_initial_state() {
    let fsm = DeploymentFsm::new();
    assert_eq!(fsm.state(), DeploymentState::Pending);
    assert!(fsm.exit_code().is_none());
}

#[test]
fn test_fsm_success_flow() {
    let mut fsm = DeploymentFsm::new();

    // Pending -> Running
    fsm.process(DeploymentEvent::Start).unwrap();
    assert_eq!(fsm.state(), DeploymentState::Running);

    // Running -> Succeeded
    fsm.process(DeploymentEvent::Complete(0)).unwrap();
    assert_eq!(fsm.state(), DeploymentState::Succeeded);
    assert_eq!(DeploymentStatus::from(fsm.state()), DeploymentStatus::Succeeded);
}

#[test]
fn test_fsm_failure_keeps_exit_code() {
    let mut fsm = DeploymentFsm::new();

    fsm.process(DeploymentEvent::Start).unwrap();
    fsm.process(DeploymentEvent::Complete(137)).unwrap();

    assert_eq!(fsm.state(), DeploymentState::Failed);
    assert_eq!(fsm.exit_code(), Some(137));
    assert!(fsm.process(DeploymentEvent::Complete(0)).is_err());
}

#[test]
fn test_fsm_abort_before_start() {
    let mut fsm = DeploymentFsm::new();

    // Pending -> Failed, e.g. cancelled while queued
    fsm.process(DeploymentEvent::Abort(130)).unwrap();
    assert_eq!(fsm.state(), DeploymentState::Failed);
    assert_eq!(fsm.exit_code(), Some(130));
}

#[test]
fn test_fsm_invalid_transition() {
    let mut fsm = DeploymentFsm::new();

    // Cannot complete what never started
    let result = fsm.process(DeploymentEvent::Complete(0));
    assert!(result.is_err());
    assert_eq!(fsm.state(), DeploymentState::Pending);

    // Cannot start twice
    fsm.process(DeploymentEvent::Start).unwrap();
    assert!(fsm.process(DeploymentEvent::Start).is_err());
}
