/// Interaction controller
///
/// Turns user intents into session calls and keeps the state the window
/// shows: the message log, the LED indicators, the connect toggle and the
/// sensor readouts. Nothing here knows about egui; the window maps each
/// widget event to an `Intent` and renders from the accessors.

use std::fs::File;
use std::io::Write;
use std::time::{Duration, Instant};

use crate::config_loader::ConsoleSettings;
use crate::serial_session::{LinkSettings, SessionError, SessionManager};

pub const CUSTOM_BUTTON_COUNT: usize = 6;

pub const NOT_CONNECTED_MSG: &str = "Erro: Porta serial não está conectada.";
pub const CONNECT_FAILED_MSG: &str = "Erro: Não foi possível conectar ao ESP32.";
pub const READ_FAULT_MSG: &str = "Erro ao ler dados do ESP32.";
pub const DISCONNECTED_MSG: &str = "Desconectado.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedId {
    Led1,
    Led2,
    Led3,
}

impl LedId {
    pub const ALL: [LedId; 3] = [LedId::Led1, LedId::Led2, LedId::Led3];

    pub fn number(self) -> u8 {
        match self {
            LedId::Led1 => 1,
            LedId::Led2 => 2,
            LedId::Led3 => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            LedId::Led1 => "LED1",
            LedId::Led2 => "LED2",
            LedId::Led3 => "LED3",
        }
    }

    pub fn active_color(self) -> IndicatorColor {
        match self {
            LedId::Led1 => IndicatorColor::Blue,
            LedId::Led2 => IndicatorColor::Yellow,
            LedId::Led3 => IndicatorColor::Red,
        }
    }

    fn index(self) -> usize {
        self.number() as usize - 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorState {
    Inactive,
    Active,
}

impl IndicatorState {
    pub fn toggled(self) -> Self {
        match self {
            IndicatorState::Inactive => IndicatorState::Active,
            IndicatorState::Active => IndicatorState::Inactive,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorColor {
    Gray,
    Blue,
    Yellow,
    Red,
}

impl IndicatorColor {
    pub fn rgb(self) -> [u8; 3] {
        match self {
            IndicatorColor::Gray => [0x80, 0x80, 0x80],
            IndicatorColor::Blue => [0x00, 0x00, 0xff],
            IndicatorColor::Yellow => [0xff, 0xff, 0x00],
            IndicatorColor::Red => [0xff, 0x00, 0x00],
        }
    }
}

/// Displayed color of an indicator
pub fn indicator_color(led: LedId, state: IndicatorState) -> IndicatorColor {
    match state {
        IndicatorState::Inactive => IndicatorColor::Gray,
        IndicatorState::Active => led.active_color(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndicatorControl {
    id: LedId,
    state: IndicatorState,
}

impl IndicatorControl {
    pub fn new(id: LedId) -> Self {
        Self { id, state: IndicatorState::Inactive }
    }

    pub fn id(&self) -> LedId {
        self.id
    }

    pub fn state(&self) -> IndicatorState {
        self.state
    }

    pub fn label(&self) -> &'static str {
        self.id.label()
    }

    pub fn color(&self) -> IndicatorColor {
        indicator_color(self.id, self.state)
    }

    fn toggle(&mut self) {
        self.state = self.state.toggled();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleColor {
    Green,
    Red,
}

impl ToggleColor {
    pub fn rgb(self) -> [u8; 3] {
        match self {
            ToggleColor::Green => [0x00, 0x80, 0x00],
            ToggleColor::Red => [0xff, 0x00, 0x00],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectToggle {
    connected: bool,
}

impl ConnectToggle {
    pub fn is_on(&self) -> bool {
        self.connected
    }

    pub fn label(&self) -> &'static str {
        if self.connected { "ON" } else { "OFF" }
    }

    pub fn color(&self) -> ToggleColor {
        if self.connected { ToggleColor::Green } else { ToggleColor::Red }
    }
}

/// Append-only message log. Grows without bound until cleared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogBuffer {
    lines: Vec<String>,
}

impl LogBuffer {
    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn last(&self) -> Option<&str> {
        self.lines.last().map(|s| s.as_str())
    }
}

/// Placeholder readouts. Nothing feeds them yet; they show the board's
/// idle values.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SensorReadouts {
    pub distance_cm: f32,
    pub temperature_c: f32,
    pub humidity_pct: f32,
}

impl SensorReadouts {
    pub fn distance_text(&self) -> String {
        format!("{} cm", self.distance_cm)
    }

    pub fn temperature_text(&self) -> String {
        format!("{} °C", self.temperature_c)
    }

    pub fn humidity_text(&self) -> String {
        format!("{} %", self.humidity_pct)
    }
}

/// One user action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Send(String),
    CustomButton(usize),
    ToggleLed(LedId),
    ToggleConnect,
    Clear,
    PollTick,
}

/// Decides when the next poll tick is due
#[derive(Debug, Clone)]
pub struct PollTimer {
    interval: Duration,
    last: Option<Instant>,
}

impl PollTimer {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    /// True (and re-armed) when at least one interval has passed since the
    /// last tick. The first call always fires.
    pub fn due(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    /// Time left until the next tick
    pub fn remaining(&self, now: Instant) -> Duration {
        match self.last {
            Some(last) => self.interval.saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }
}

pub struct Controller {
    session: SessionManager,
    link: LinkSettings,
    led_commands: bool,
    log: LogBuffer,
    input: String,
    leds: [IndicatorControl; 3],
    connect: ConnectToggle,
    readouts: SensorReadouts,
    debug_file: Option<File>,
}

impl Controller {
    /// Build the controller. With `auto_connect` the configured port is
    /// opened right away.
    pub fn new(session: SessionManager, settings: &ConsoleSettings) -> Self {
        let mut controller = Self {
            session,
            link: LinkSettings {
                endpoint: settings.port.clone(),
                baud_rate: settings.baud_rate,
                timeout: settings.read_timeout,
            },
            led_commands: settings.led_commands,
            log: LogBuffer::default(),
            input: String::new(),
            leds: LedId::ALL.map(IndicatorControl::new),
            connect: ConnectToggle::default(),
            readouts: SensorReadouts::default(),
            debug_file: None,
        };
        if settings.auto_connect {
            controller.connect_now();
        }
        controller
    }

    /// Mirror every log line to `file` with a timestamp
    pub fn with_debug_file(mut self, file: File) -> Self {
        self.debug_file = Some(file);
        self
    }

    pub fn dispatch(&mut self, intent: Intent) {
        match intent {
            Intent::Send(text) => self.on_send_pressed(&text),
            Intent::CustomButton(index) => self.on_custom_button_pressed(index),
            Intent::ToggleLed(led) => self.on_led_toggle_pressed(led),
            Intent::ToggleConnect => self.on_connect_toggle_pressed(),
            Intent::Clear => self.on_clear_pressed(),
            Intent::PollTick => self.poll_tick(),
        }
    }

    pub fn on_send_pressed(&mut self, command: &str) {
        self.transmit(command);
        self.input.clear();
    }

    pub fn on_custom_button_pressed(&mut self, index: usize) {
        if index >= CUSTOM_BUTTON_COUNT {
            log::warn!(target: "controller", "Ignoring custom button index {}", index);
            return;
        }
        self.append_log(format!("Botão {} pressionado. (Ação personalizada aqui)", index + 1));
    }

    pub fn on_led_toggle_pressed(&mut self, led: LedId) {
        self.leds[led.index()].toggle();
        log::debug!(target: "controller", "{} -> {:?}", led.label(), self.leds[led.index()].state());
        if self.led_commands {
            self.transmit(&format!("LED{}", led.number()));
        }
    }

    pub fn on_connect_toggle_pressed(&mut self) {
        if self.connect.is_on() {
            self.session.close();
            self.connect.connected = false;
            self.append_log(DISCONNECTED_MSG);
        } else {
            self.connect_now();
        }
    }

    pub fn on_clear_pressed(&mut self) {
        self.log.clear();
    }

    /// Read at most one line from the link. Errors are logged; the next tick
    /// runs regardless.
    pub fn poll_tick(&mut self) {
        if !self.session.is_open() {
            return;
        }
        match self.session.try_read_line() {
            Ok(Some(line)) => self.append_log(format!("Recebido: {}", line)),
            Ok(None) => {}
            Err(e) => {
                log::warn!(target: "controller", "Poll failed: {}", e);
                self.append_error(READ_FAULT_MSG);
                self.sync_toggle();
            }
        }
    }

    /// Close the link before the window goes away
    pub fn shutdown(&mut self) {
        self.session.close();
        self.connect.connected = false;
    }

    fn connect_now(&mut self) {
        let LinkSettings { endpoint, baud_rate, timeout } = self.link.clone();
        match self.session.open(&endpoint, baud_rate, timeout) {
            Ok(()) => {
                self.connect.connected = true;
                self.append_log(format!("Conectado a {} ({} baud).", endpoint, baud_rate));
            }
            Err(e) => {
                log::warn!(target: "controller", "{}", e);
                self.connect.connected = false;
                self.append_error(CONNECT_FAILED_MSG);
            }
        }
    }

    fn transmit(&mut self, command: &str) {
        match self.session.send_line(command) {
            Ok(()) => self.append_log(format!("Comando enviado: {}", command)),
            Err(SessionError::NotConnected) => self.append_error(NOT_CONNECTED_MSG),
            Err(e) => {
                self.append_error(format!("Erro ao enviar comando: {}", e));
                self.sync_toggle();
            }
        }
    }

    fn sync_toggle(&mut self) {
        self.connect.connected = self.session.is_open();
    }

    fn append_log(&mut self, line: impl Into<String>) {
        let line = line.into();
        log::info!(target: "esp32_console::log", "{}", line);
        self.mirror(&line);
        self.log.push(line);
    }

    fn append_error(&mut self, line: impl Into<String>) {
        let line = line.into();
        log::warn!(target: "esp32_console::log", "{}", line);
        self.mirror(&line);
        self.log.push(line);
    }

    /// A failed write drops the debug file; the in-window log carries on.
    fn mirror(&mut self, line: &str) {
        let Some(f) = self.debug_file.as_mut() else {
            return;
        };
        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        if let Err(e) = writeln!(f, "[{}] {}", stamp, line) {
            log::warn!(target: "controller", "Debug log write failed, mirroring disabled: {}", e);
            self.debug_file = None;
        }
    }

    pub fn log(&self) -> &LogBuffer {
        &self.log
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut String {
        &mut self.input
    }

    pub fn leds(&self) -> &[IndicatorControl; 3] {
        &self.leds
    }

    pub fn led(&self, led: LedId) -> &IndicatorControl {
        &self.leds[led.index()]
    }

    pub fn connect_toggle(&self) -> ConnectToggle {
        self.connect
    }

    pub fn readouts(&self) -> SensorReadouts {
        self.readouts
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_open()
    }

    pub fn endpoint(&self) -> &str {
        &self.link.endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_device::{MockConnector, MockDevice};

    fn settings(auto_connect: bool) -> ConsoleSettings {
        ConsoleSettings {
            port: "MOCK0".to_string(),
            auto_connect,
            ..ConsoleSettings::default()
        }
    }

    fn controller(device: &MockDevice, settings: &ConsoleSettings) -> Controller {
        let connector = MockConnector::new().with_device("MOCK0", device.clone());
        Controller::new(SessionManager::new(Box::new(connector)), settings)
    }

    #[test]
    fn indicator_colors_are_fixed_per_led() {
        assert_eq!(indicator_color(LedId::Led1, IndicatorState::Active), IndicatorColor::Blue);
        assert_eq!(indicator_color(LedId::Led2, IndicatorState::Active), IndicatorColor::Yellow);
        assert_eq!(indicator_color(LedId::Led3, IndicatorState::Active), IndicatorColor::Red);
        for led in LedId::ALL {
            assert_eq!(indicator_color(led, IndicatorState::Inactive), IndicatorColor::Gray);
        }
    }

    #[test]
    fn led_toggle_twice_returns_to_gray() {
        let device = MockDevice::new();
        let mut c = controller(&device, &settings(false));
        c.dispatch(Intent::ToggleLed(LedId::Led1));
        assert_eq!(c.led(LedId::Led1).color(), IndicatorColor::Blue);
        assert_eq!(c.led(LedId::Led2).color(), IndicatorColor::Gray);
        c.dispatch(Intent::ToggleLed(LedId::Led1));
        assert_eq!(c.led(LedId::Led1).state(), IndicatorState::Inactive);
        assert_eq!(c.led(LedId::Led1).color(), IndicatorColor::Gray);
        assert!(c.log().is_empty());
    }

    #[test]
    fn led_toggle_stays_local_by_default() {
        let device = MockDevice::new();
        let mut c = controller(&device, &settings(true));
        c.on_led_toggle_pressed(LedId::Led3);
        assert!(device.written().is_empty());
        assert_eq!(c.led(LedId::Led3).color(), IndicatorColor::Red);
    }

    #[test]
    fn led_commands_are_sent_when_enabled() {
        let device = MockDevice::new();
        let mut s = settings(true);
        s.led_commands = true;
        let mut c = controller(&device, &s);
        c.on_led_toggle_pressed(LedId::Led2);
        assert_eq!(device.written(), vec!["LED2".to_string()]);
        assert_eq!(c.log().last(), Some("Comando enviado: LED2"));
    }

    #[test]
    fn led_command_without_link_still_toggles() {
        let device = MockDevice::new();
        let mut s = settings(false);
        s.led_commands = true;
        let mut c = controller(&device, &s);
        c.on_led_toggle_pressed(LedId::Led1);
        assert_eq!(c.led(LedId::Led1).state(), IndicatorState::Active);
        assert_eq!(c.log().last(), Some(NOT_CONNECTED_MSG));
    }

    #[test]
    fn send_without_connection_logs_error_and_clears_input() {
        let device = MockDevice::new();
        let mut c = controller(&device, &settings(false));
        c.input_mut().push_str("PING");
        let text = c.input().to_string();
        c.dispatch(Intent::Send(text));
        assert_eq!(c.log().lines(), &[NOT_CONNECTED_MSG.to_string()]);
        assert_eq!(c.input(), "");
    }

    #[test]
    fn send_when_connected_writes_and_logs() {
        let device = MockDevice::new();
        let mut c = controller(&device, &settings(true));
        c.on_clear_pressed();
        c.input_mut().push_str("STATUS");
        c.on_send_pressed("STATUS");
        assert_eq!(device.written(), vec!["STATUS".to_string()]);
        assert_eq!(c.log().lines(), &["Comando enviado: STATUS".to_string()]);
        assert_eq!(c.input(), "");
    }

    #[test]
    fn write_fault_is_logged_and_toggle_falls_back() {
        let device = MockDevice::new();
        let mut c = controller(&device, &settings(true));
        device.fail_writes("unplugged");
        c.on_send_pressed("PING");
        assert!(c.log().last().unwrap().starts_with("Erro ao enviar comando:"));
        assert!(!c.connect_toggle().is_on());
        assert!(!c.is_connected());
        c.on_send_pressed("PING");
        assert_eq!(c.log().last(), Some(NOT_CONNECTED_MSG));
    }

    #[test]
    fn custom_buttons_log_placeholder() {
        let device = MockDevice::new();
        let mut c = controller(&device, &settings(false));
        c.dispatch(Intent::CustomButton(0));
        c.dispatch(Intent::CustomButton(5));
        c.dispatch(Intent::CustomButton(6));
        assert_eq!(
            c.log().lines(),
            &[
                "Botão 1 pressionado. (Ação personalizada aqui)".to_string(),
                "Botão 6 pressionado. (Ação personalizada aqui)".to_string(),
            ]
        );
        assert!(device.written().is_empty());
    }

    #[test]
    fn clear_always_empties_log() {
        let device = MockDevice::new();
        let mut c = controller(&device, &settings(false));
        c.dispatch(Intent::Clear);
        assert!(c.log().is_empty());
        for i in 0..4 {
            c.on_custom_button_pressed(i);
        }
        c.dispatch(Intent::Clear);
        assert!(c.log().is_empty());
    }

    #[test]
    fn auto_connect_failure_is_reported() {
        let device = MockDevice::new();
        let mut s = settings(true);
        s.port = "COM3".to_string();
        let c = controller(&device, &s);
        assert_eq!(c.log().lines(), &[CONNECT_FAILED_MSG.to_string()]);
        assert!(!c.connect_toggle().is_on());
        assert_eq!(c.connect_toggle().label(), "OFF");
        assert_eq!(c.connect_toggle().color(), ToggleColor::Red);
    }

    #[test]
    fn connect_toggle_opens_and_closes() {
        let device = MockDevice::new();
        let mut c = controller(&device, &settings(false));
        assert_eq!(device.open_links(), 0);
        c.dispatch(Intent::ToggleConnect);
        assert!(c.connect_toggle().is_on());
        assert_eq!(c.connect_toggle().label(), "ON");
        assert_eq!(c.connect_toggle().color(), ToggleColor::Green);
        assert_eq!(device.open_links(), 1);
        assert_eq!(c.log().last(), Some("Conectado a MOCK0 (115200 baud)."));
        c.dispatch(Intent::ToggleConnect);
        assert!(!c.connect_toggle().is_on());
        assert_eq!(device.open_links(), 0);
        assert_eq!(c.log().last(), Some(DISCONNECTED_MSG));
    }

    #[test]
    fn poll_logs_received_lines() {
        let device = MockDevice::new();
        let mut c = controller(&device, &settings(true));
        c.on_clear_pressed();
        c.dispatch(Intent::PollTick);
        assert!(c.log().is_empty());
        device.push_line("temp=21");
        c.dispatch(Intent::PollTick);
        assert_eq!(c.log().lines(), &["Recebido: temp=21".to_string()]);
    }

    #[test]
    fn poll_when_closed_is_silent() {
        let device = MockDevice::new();
        let mut c = controller(&device, &settings(false));
        device.push_line("ignored");
        c.poll_tick();
        assert!(c.log().is_empty());
    }

    #[test]
    fn read_fault_is_logged_once_and_polling_continues() {
        let device = MockDevice::new();
        let mut c = controller(&device, &settings(true));
        c.on_clear_pressed();
        device.fail_reads("EIO");
        c.poll_tick();
        c.poll_tick();
        assert_eq!(c.log().lines(), &[READ_FAULT_MSG.to_string()]);
        assert!(!c.connect_toggle().is_on());

        device.heal();
        device.push_line("back");
        c.on_connect_toggle_pressed();
        c.poll_tick();
        assert_eq!(c.log().last(), Some("Recebido: back"));
    }

    #[test]
    fn shutdown_releases_link() {
        let device = MockDevice::new();
        let mut c = controller(&device, &settings(true));
        assert_eq!(device.open_links(), 1);
        c.shutdown();
        assert_eq!(device.open_links(), 0);
        assert!(!c.connect_toggle().is_on());
    }

    #[test]
    fn debug_file_mirrors_log_lines() {
        let path = std::env::temp_dir().join(format!("esp32_console_mirror_{}.log", std::process::id()));
        let file = File::create(&path).unwrap();
        let device = MockDevice::new();
        let mut c = controller(&device, &settings(false)).with_debug_file(file);
        c.on_custom_button_pressed(2);
        let written = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert!(written.trim_end().ends_with("Botão 3 pressionado. (Ação personalizada aqui)"));
        assert!(c.debug_file.is_some());
    }

    #[test]
    fn failed_debug_write_drops_the_file() {
        let path = std::env::temp_dir().join(format!("esp32_console_readonly_{}.log", std::process::id()));
        File::create(&path).unwrap();
        let read_only = File::open(&path).unwrap();
        let device = MockDevice::new();
        let mut c = controller(&device, &settings(false)).with_debug_file(read_only);
        c.on_custom_button_pressed(0);
        assert!(c.debug_file.is_none());
        c.on_custom_button_pressed(1);
        assert_eq!(c.log().lines().len(), 2);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn readouts_show_placeholders() {
        let r = SensorReadouts::default();
        assert_eq!(r.distance_text(), "0 cm");
        assert_eq!(r.temperature_text(), "0 °C");
        assert_eq!(r.humidity_text(), "0 %");
    }

    #[test]
    fn poll_timer_fires_once_per_interval() {
        let start = Instant::now();
        let mut timer = PollTimer::new(Duration::from_millis(100));
        assert_eq!(timer.remaining(start), Duration::ZERO);
        assert!(timer.due(start));
        assert!(!timer.due(start + Duration::from_millis(40)));
        assert_eq!(timer.remaining(start + Duration::from_millis(40)), Duration::from_millis(60));
        assert!(timer.due(start + Duration::from_millis(100)));
        assert!(!timer.due(start + Duration::from_millis(150)));
        assert!(timer.due(start + Duration::from_millis(250)));
    }
}
