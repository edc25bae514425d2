/// Serial session manager
///
/// Owns the one serial connection to the board. Everything else goes through
/// `SessionManager` for open/close and line I/O; nobody else touches the
/// port handle.

use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, StopBits};
use thiserror::Error;

/// Largest chunk pulled from the driver in one poll
const READ_CHUNK: usize = 256;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to open {endpoint}: {reason}")]
    ConnectionOpen { endpoint: String, reason: String },
    #[error("serial port not connected")]
    NotConnected,
    #[error("read error: {0}")]
    ReadFault(String),
    #[error("write error: {0}")]
    WriteFault(String),
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Where and how to open the link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSettings {
    pub endpoint: String,
    pub baud_rate: u32,
    pub timeout: Duration,
}

/// An open byte stream to the device.
///
/// `bytes_pending` lets the poll skip the blocking read when nothing has
/// arrived, so an idle tick never stalls the UI for the whole timeout.
pub trait SerialLink: Read + Write + Send {
    fn bytes_pending(&mut self) -> io::Result<usize>;
}

/// Opens links. Real ports go through `SerialConnector`; tests and `--mock`
/// runs use `mock_device::MockConnector`.
pub trait Connector: Send {
    fn connect(&self, settings: &LinkSettings) -> SessionResult<Box<dyn SerialLink>>;
}

struct PortLink {
    port: Box<dyn serialport::SerialPort>,
}

impl Read for PortLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for PortLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl SerialLink for PortLink {
    fn bytes_pending(&mut self) -> io::Result<usize> {
        Ok(self.port.bytes_to_read()? as usize)
    }
}

/// Connector for OS serial ports (8N1, no flow control)
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialConnector;

impl Connector for SerialConnector {
    fn connect(&self, settings: &LinkSettings) -> SessionResult<Box<dyn SerialLink>> {
        let port = serialport::new(settings.endpoint.as_str(), settings.baud_rate)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .flow_control(FlowControl::None)
            .timeout(settings.timeout)
            .open()
            .map_err(|e| SessionError::ConnectionOpen {
                endpoint: settings.endpoint.clone(),
                reason: e.to_string(),
            })?;
        Ok(Box::new(PortLink { port }))
    }
}

/// List the serial ports the OS knows about
pub fn available_endpoints() -> anyhow::Result<Vec<String>> {
    let ports = serialport::available_ports()?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

/// Accumulates raw bytes and hands back complete, trimmed, non-blank lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    pub fn next_line(&mut self) -> Option<String> {
        loop {
            let end = memchr::memchr(b'\n', &self.pending)?;
            let raw: Vec<u8> = self.pending.drain(..=end).collect();
            let text = String::from_utf8_lossy(&raw).trim().to_string();
            if !text.is_empty() {
                return Some(text);
            }
        }
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

pub struct SessionManager {
    connector: Box<dyn Connector>,
    link: Option<Box<dyn SerialLink>>,
    settings: Option<LinkSettings>,
    lines: LineBuffer,
}

impl SessionManager {
    pub fn new(connector: Box<dyn Connector>) -> Self {
        Self {
            connector,
            link: None,
            settings: None,
            lines: LineBuffer::default(),
        }
    }

    /// Session backed by real serial ports
    pub fn serial() -> Self {
        Self::new(Box::new(SerialConnector))
    }

    /// Open `endpoint`. Reopening the current endpoint closes it first since
    /// the port is exclusive. For any other endpoint the open link is only
    /// replaced once the new one is up; a failed open leaves it untouched.
    pub fn open(&mut self, endpoint: &str, baud_rate: u32, timeout: Duration) -> SessionResult<()> {
        if self.endpoint() == Some(endpoint) {
            self.close();
        }
        let settings = LinkSettings {
            endpoint: endpoint.to_string(),
            baud_rate,
            timeout,
        };
        log::info!(target: "serial_session", "Opening {} @{} (timeout {:?})", endpoint, baud_rate, timeout);
        let link = self.connector.connect(&settings)?;
        self.close();
        self.link = Some(link);
        self.settings = Some(settings);
        Ok(())
    }

    /// Release the link. No-op when nothing is open.
    pub fn close(&mut self) {
        if let Some(mut link) = self.link.take() {
            let _ = link.flush();
            if let Some(settings) = self.settings.take() {
                log::info!(target: "serial_session", "Closed {}", settings.endpoint);
            }
        }
        self.settings = None;
        self.lines.clear();
    }

    pub fn is_open(&self) -> bool {
        self.link.is_some()
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.settings.as_ref().map(|s| s.endpoint.as_str())
    }

    /// Write `text` followed by `\n`. A write error closes the link.
    pub fn send_line(&mut self, text: &str) -> SessionResult<()> {
        let link = self.link.as_mut().ok_or(SessionError::NotConnected)?;
        let mut buf = Vec::with_capacity(text.len() + 1);
        buf.extend_from_slice(text.as_bytes());
        buf.push(b'\n');
        log::debug!(target: "serial_session", "SEND: {:?}", text);
        if let Err(e) = link.write_all(&buf).and_then(|_| link.flush()) {
            log::warn!(target: "serial_session", "Write failed, closing link: {}", e);
            self.close();
            return Err(SessionError::WriteFault(e.to_string()));
        }
        Ok(())
    }

    /// One complete line if available. Timeouts are `Ok(None)`; any other I/O
    /// error closes the link and comes back as `ReadFault`.
    pub fn try_read_line(&mut self) -> SessionResult<Option<String>> {
        if self.link.is_none() {
            return Err(SessionError::NotConnected);
        }
        if let Some(line) = self.lines.next_line() {
            return Ok(Some(line));
        }
        if let Err(e) = self.fill() {
            log::warn!(target: "serial_session", "Read failed, closing link: {}", e);
            self.close();
            return Err(SessionError::ReadFault(e.to_string()));
        }
        let line = self.lines.next_line();
        if let Some(l) = line.as_ref() {
            log::debug!(target: "serial_session", "RECV: {:?}", l);
        }
        Ok(line)
    }

    fn fill(&mut self) -> io::Result<()> {
        let Some(link) = self.link.as_mut() else {
            return Ok(());
        };
        let pending = link.bytes_pending()?;
        if pending == 0 {
            return Ok(());
        }
        let mut chunk = vec![0u8; pending.min(READ_CHUNK)];
        match link.read(&mut chunk) {
            Ok(n) => {
                self.lines.extend(&chunk[..n]);
                Ok(())
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.close();
    }
}
