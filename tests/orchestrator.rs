mod common;

use std::time::Duration;

use common::*;
use servicemode::{
    Command, CommandData, Phase, Session, SessionError, SessionEvent, SettingsBuilder, TestStatus,
};

#[test]
fn unsupported_test_is_not_sent() {
    let device = ScriptedDevice::new();
    let mut session = ready_session(&device);
    let sent = device.written().len();

    let err = session.run_test("rfid", CommandData::new()).unwrap_err();
    assert!(matches!(err, SessionError::UnsupportedTest(ref name) if name == "rfid"));
    assert_eq!(device.written().len(), sent);
    assert!(session.state().test_result("rfid").is_none());
}

#[test]
fn unlisted_test_command_is_not_sent() {
    let device = ScriptedDevice::new();
    let mut session = ready_session(&device);
    let sent = device.written().len();

    let err = session.send_command(Command::new("test_rfid")).unwrap_err();
    assert!(matches!(err, SessionError::UnsupportedTest(ref name) if name == "rfid"));
    assert_eq!(device.written().len(), sent);
    assert_eq!(session.phase(), Phase::InServiceMode);

    device.on("test_button", &[OK]);
    assert!(session.send_command(Command::new("test_button")).unwrap().is_success());
}

#[test]
fn tests_need_a_manifest() {
    let device = ScriptedDevice::new();
    device.on("enter_service_mode", &[BEACON]);
    let mut session = session(&device);
    session.connect(PORT).unwrap();
    session.enter_service_mode().unwrap();

    let err = session.run_test("wifi", CommandData::new()).unwrap_err();
    assert!(matches!(err, SessionError::NoManifest));
    assert!(matches!(session.test_all().unwrap_err(), SessionError::NoManifest));
}

#[test]
fn device_failure_is_a_failed_result() {
    let device = ScriptedDevice::new();
    let mut session = ready_session(&device);
    device.on(
        "test_wifi",
        &[r#"{"status":"failed","message":"wifi_timeout"}"#],
    );

    let result = session.run_test("wifi", CommandData::new()).unwrap();
    assert_eq!(result.status, TestStatus::Failed);
    assert!(!result.timed_out);
    assert!(result.message.unwrap().contains("wifi_timeout"));
    assert_eq!(session.phase(), Phase::InServiceMode);
    assert_eq!(
        session.state().test_result("wifi").map(|r| r.status),
        Some(TestStatus::Failed)
    );
}

#[test]
fn test_progress_is_published() {
    let device = ScriptedDevice::new();
    let mut session = ready_session(&device);
    device.on("test_button", &[r#"{"status":"ok","message":"pressed"}"#]);
    let events = session.subscribe();

    let result = session.run_test("button", CommandData::new()).unwrap();
    assert_eq!(result.status, TestStatus::Passed);
    assert_eq!(result.message.as_deref(), Some("pressed"));

    let updates: Vec<TestStatus> = events
        .try_iter()
        .filter_map(|event| match event {
            SessionEvent::TestUpdated(result) => Some(result.status),
            _ => None,
        })
        .collect();
    assert_eq!(updates, vec![TestStatus::Running, TestStatus::Passed]);
}

#[test]
fn test_all_continues_after_a_timeout() {
    let device = ScriptedDevice::new();
    let mut session = ready_session(&device);
    device.on("test_button", &[OK]);

    let summary = session.test_all().unwrap();
    assert!(summary.aborted.is_none());
    assert_eq!(summary.results.len(), 2);

    let wifi = &summary.results[0];
    assert_eq!(wifi.name, "wifi");
    assert_eq!(wifi.status, TestStatus::Failed);
    assert!(wifi.timed_out);

    let button = &summary.results[1];
    assert_eq!(button.name, "button");
    assert_eq!(button.status, TestStatus::Passed);

    assert_eq!((summary.passed(), summary.failed(), summary.skipped()), (1, 1, 0));
    assert!(!summary.all_passed());
    assert_eq!(session.phase(), Phase::InServiceMode);
    assert_eq!(device.commands()[device.commands().len() - 2..], ["test_wifi", "test_button"]);
}

#[test]
fn test_all_skips_what_no_longer_fits() {
    let device = ScriptedDevice::new();
    device.on("enter_service_mode", &[BEACON]);
    device.on("get_manifest", &[MANIFEST]);
    device.on("test_button", &[OK]);
    let settings = SettingsBuilder::new()
        .timeouts(fast_policy().with_run_all(Duration::from_millis(80)))
        .finalize();
    let mut session = Session::new(settings, device.connector());
    session.connect(PORT).unwrap();
    session.enter_service_mode().unwrap();
    session.get_manifest().unwrap();

    let summary = session.test_all().unwrap();
    assert_eq!(summary.results.len(), 2);
    assert!(summary.results[0].timed_out);
    assert_eq!(summary.results[1].status, TestStatus::Skipped);
    assert_eq!(device.count("test_button"), 0);
    assert_eq!(
        session.state().test_result("button").map(|r| r.status),
        Some(TestStatus::Skipped)
    );
}

#[test]
fn test_all_aborts_on_fatal_error() {
    let device = ScriptedDevice::new();
    let mut session = ready_session(&device);
    device.on(
        "test_wifi",
        &[r#"{"status":"error","message":"not_in_service_mode"}"#],
    );
    device.on("test_button", &[OK]);

    let summary = session.test_all().unwrap();
    assert_eq!(session.phase(), Phase::Error);
    assert!(summary.aborted.is_some());
    assert_eq!(summary.results.len(), 1);
    assert_eq!(summary.results[0].status, TestStatus::Failed);
    assert_eq!(device.count("test_button"), 0);
}

#[test]
fn device_side_test_run() {
    let device = ScriptedDevice::new();
    let mut session = ready_session(&device);
    device.on(
        "test_all",
        &[r#"{"status":"ok","data":{"results":{
            "wifi":true,
            "button":{"status":"failed","message":"no press detected"}
        }}}"#],
    );

    let outcome = session.device_test_all().unwrap();
    assert!(outcome.is_success());

    let state = session.state();
    assert_eq!(state.test_result("wifi").map(|r| r.status), Some(TestStatus::Passed));
    let button = state.test_result("button").unwrap();
    assert_eq!(button.status, TestStatus::Failed);
    assert_eq!(button.message.as_deref(), Some("no press detected"));
}
