use std::time::Duration;

use esp32_console::config_loader::ConsoleSettings;
use esp32_console::controller::{Controller, IndicatorColor, Intent, LedId, NOT_CONNECTED_MSG};
use esp32_console::mock_device::{MockConnector, MockDevice};
use esp32_console::serial_session::{SessionError, SessionManager};

fn mock_settings(auto_connect: bool) -> ConsoleSettings {
    ConsoleSettings {
        port: "MOCK0".to_string(),
        auto_connect,
        ..ConsoleSettings::default()
    }
}

fn mock_session(device: &MockDevice) -> SessionManager {
    SessionManager::new(Box::new(MockConnector::new().with_device("MOCK0", device.clone())))
}

#[test]
fn ping_pong_round_trip_is_logged_in_order() {
    let device = MockDevice::new().reply_to("PING", "PONG");
    let mut controller = Controller::new(mock_session(&device), &mock_settings(true));
    controller.dispatch(Intent::Clear);

    controller.dispatch(Intent::Send("PING".to_string()));
    controller.dispatch(Intent::PollTick);

    assert_eq!(
        controller.log().lines(),
        &["Comando enviado: PING".to_string(), "Recebido: PONG".to_string()]
    );
    assert_eq!(device.written(), vec!["PING".to_string()]);
}

#[test]
fn send_with_nothing_open_reports_one_error_line() {
    let device = MockDevice::new();
    let mut controller = Controller::new(mock_session(&device), &mock_settings(false));
    controller.input_mut().push_str("PING");

    controller.dispatch(Intent::Send("PING".to_string()));

    assert_eq!(controller.log().lines(), &[NOT_CONNECTED_MSG.to_string()]);
    assert_eq!(controller.input(), "");
    assert!(device.written().is_empty());
}

#[test]
fn led1_pressed_twice_is_gray_again() {
    let device = MockDevice::new();
    let mut controller = Controller::new(mock_session(&device), &mock_settings(false));
    let before = controller.led(LedId::Led1).color();

    controller.dispatch(Intent::ToggleLed(LedId::Led1));
    controller.dispatch(Intent::ToggleLed(LedId::Led1));

    assert_eq!(before, IndicatorColor::Gray);
    assert_eq!(controller.led(LedId::Led1).color(), before);
}

#[test]
fn session_state_tracks_last_open_or_close() {
    let device = MockDevice::new();
    let mut session = mock_session(&device);
    let timeout = Duration::from_millis(200);

    let steps: [(&str, bool); 6] = [
        ("open MOCK0", true),
        ("close", false),
        ("open MOCK0", true),
        ("open MISSING", true),
        ("open MOCK0", true),
        ("close", false),
    ];
    for (step, expect_open) in steps {
        match step.split_once(' ') {
            Some(("open", endpoint)) => {
                let _ = session.open(endpoint, 115200, timeout);
            }
            _ => session.close(),
        }
        assert_eq!(session.is_open(), expect_open, "after {}", step);
        if !expect_open {
            assert!(matches!(session.send_line("PING"), Err(SessionError::NotConnected)));
        }
    }
    assert_eq!(device.open_links(), 0);
}

#[test]
fn lines_split_across_polls_are_reassembled() {
    let device = MockDevice::new();
    let mut controller = Controller::new(mock_session(&device), &mock_settings(true));
    controller.dispatch(Intent::Clear);

    device.push_bytes(b"dist");
    controller.dispatch(Intent::PollTick);
    assert!(controller.log().is_empty());

    device.push_bytes(b"=42\r\n");
    controller.dispatch(Intent::PollTick);
    assert_eq!(controller.log().lines(), &["Recebido: dist=42".to_string()]);
}

#[test]
fn dropping_the_controller_releases_the_port() {
    let device = MockDevice::new();
    {
        let controller = Controller::new(mock_session(&device), &mock_settings(true));
        assert!(controller.is_connected());
        assert_eq!(device.open_links(), 1);
    }
    assert_eq!(device.open_links(), 0);
}
