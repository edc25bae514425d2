/// In-memory stand-in for the board on the other end of the serial link.
///
/// Used by the test suite and by `--mock` runs when no hardware is attached.
/// A `MockDevice` is a cheap handle; clones share the same state, so a test
/// can keep one handle while the session owns the link.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::serial_session::{Connector, LinkSettings, SerialLink, SessionError, SessionResult};

#[derive(Debug, Default)]
struct DeviceState {
    inbound: VecDeque<u8>,
    raw_written: Vec<u8>,
    partial_write: Vec<u8>,
    written: Vec<String>,
    replies: HashMap<String, String>,
    read_fault: Option<String>,
    write_fault: Option<String>,
    open_links: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MockDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Board used by `--mock`: answers PING and acknowledges the LED commands
    pub fn demo() -> Self {
        let device = Self::new().reply_to("PING", "PONG");
        for n in 1..=3 {
            device.add_reply(&format!("LED{}", n), &format!("LED{} OK", n));
        }
        device.push_line("ESP32 pronto");
        device
    }

    /// Answer `command` with `reply` whenever the host sends it
    pub fn reply_to(self, command: &str, reply: &str) -> Self {
        self.add_reply(command, reply);
        self
    }

    fn add_reply(&self, command: &str, reply: &str) {
        self.state().replies.insert(command.to_string(), reply.to_string());
    }

    /// Queue a line as if the board had printed it
    pub fn push_line(&self, line: &str) {
        let mut state = self.state();
        state.inbound.extend(line.as_bytes());
        state.inbound.push_back(b'\n');
    }

    pub fn push_bytes(&self, bytes: &[u8]) {
        self.state().inbound.extend(bytes);
    }

    /// Complete lines received from the host, terminators stripped
    pub fn written(&self) -> Vec<String> {
        self.state().written.clone()
    }

    pub fn raw_written(&self) -> Vec<u8> {
        self.state().raw_written.clone()
    }

    pub fn fail_reads(&self, reason: &str) {
        self.state().read_fault = Some(reason.to_string());
    }

    pub fn fail_writes(&self, reason: &str) {
        self.state().write_fault = Some(reason.to_string());
    }

    /// Clear injected faults
    pub fn heal(&self) {
        let mut state = self.state();
        state.read_fault = None;
        state.write_fault = None;
    }

    pub fn open_links(&self) -> usize {
        self.state().open_links
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct MockLink {
    device: MockDevice,
}

impl Read for MockLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.device.state();
        if let Some(reason) = state.read_fault.as_ref() {
            return Err(io::Error::new(io::ErrorKind::Other, reason.clone()));
        }
        if state.inbound.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "Operation timed out"));
        }
        let n = buf.len().min(state.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.device.state();
        if let Some(reason) = state.write_fault.as_ref() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, reason.clone()));
        }
        state.raw_written.extend_from_slice(buf);
        state.partial_write.extend_from_slice(buf);
        while let Some(end) = memchr::memchr(b'\n', &state.partial_write) {
            let raw: Vec<u8> = state.partial_write.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw).trim_end_matches(['\r', '\n']).to_string();
            if let Some(reply) = state.replies.get(&line).cloned() {
                state.inbound.extend(reply.as_bytes());
                state.inbound.push_back(b'\n');
            }
            state.written.push(line);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SerialLink for MockLink {
    fn bytes_pending(&mut self) -> io::Result<usize> {
        let state = self.device.state();
        if let Some(reason) = state.read_fault.as_ref() {
            return Err(io::Error::new(io::ErrorKind::Other, reason.clone()));
        }
        Ok(state.inbound.len())
    }
}

impl Drop for MockLink {
    fn drop(&mut self) {
        let mut state = self.device.state();
        state.open_links = state.open_links.saturating_sub(1);
    }
}

/// Connector that resolves endpoint names to mock devices
#[derive(Debug, Default)]
pub struct MockConnector {
    devices: HashMap<String, MockDevice>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, endpoint: &str, device: MockDevice) -> Self {
        self.devices.insert(endpoint.to_string(), device);
        self
    }
}

impl Connector for MockConnector {
    fn connect(&self, settings: &LinkSettings) -> SessionResult<Box<dyn SerialLink>> {
        let device = self.devices.get(&settings.endpoint).ok_or_else(|| SessionError::ConnectionOpen {
            endpoint: settings.endpoint.clone(),
            reason: "No such device".to_string(),
        })?;
        {
            let mut state = device.state();
            if state.open_links > 0 {
                return Err(SessionError::ConnectionOpen {
                    endpoint: settings.endpoint.clone(),
                    reason: "Device or resource busy".to_string(),
                });
            }
            state.open_links += 1;
        }
        Ok(Box::new(MockLink { device: device.clone() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn settings(endpoint: &str) -> LinkSettings {
        LinkSettings {
            endpoint: endpoint.to_string(),
            baud_rate: 115200,
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn scripted_reply_is_queued_after_full_line() {
        let device = MockDevice::new().reply_to("PING", "PONG");
        let connector = MockConnector::new().with_device("MOCK0", device.clone());
        let mut link = connector.connect(&settings("MOCK0")).unwrap();
        link.write_all(b"PI").unwrap();
        assert_eq!(link.bytes_pending().unwrap(), 0);
        link.write_all(b"NG\n").unwrap();
        assert_eq!(device.written(), vec!["PING".to_string()]);
        let mut buf = [0u8; 16];
        let n = link.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"PONG\n");
    }

    #[test]
    fn empty_read_times_out() {
        let connector = MockConnector::new().with_device("MOCK0", MockDevice::new());
        let mut link = connector.connect(&settings("MOCK0")).unwrap();
        let mut buf = [0u8; 4];
        let err = link.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn device_is_exclusive_until_link_dropped() {
        let device = MockDevice::new();
        let connector = MockConnector::new().with_device("MOCK0", device.clone());
        let link = connector.connect(&settings("MOCK0")).unwrap();
        assert!(connector.connect(&settings("MOCK0")).is_err());
        drop(link);
        assert_eq!(device.open_links(), 0);
        assert!(connector.connect(&settings("MOCK0")).is_ok());
    }

    #[test]
    fn faults_can_be_cleared() {
        let device = MockDevice::new();
        let connector = MockConnector::new().with_device("MOCK0", device.clone());
        let mut link = connector.connect(&settings("MOCK0")).unwrap();
        device.fail_writes("unplugged");
        assert!(link.write_all(b"x\n").is_err());
        device.heal();
        assert!(link.write_all(b"x\n").is_ok());
    }
}
