/// ESP32 Console Library
///
/// Serial session handling and the toolkit-independent controller behind the
/// console window

pub mod config_loader;
pub mod controller;
pub mod gui;
pub mod mock_device;
pub mod serial_session;
