use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use dotenvy::dotenv;
use serde_yaml::{Mapping, Value};

/// Environment variable that overrides SERIAL_PORT
pub const PORT_ENV_VAR: &str = "ESP32_PORT";

pub const DEFAULT_PORT: &str = "COM3";
pub const DEFAULT_BAUD_RATE: u32 = 115200;
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

const OS_SECTIONS: [&str; 4] = ["RaspberryPi", "Ubuntu", "macOS", "Windows"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleSettings {
    pub port: String,
    pub baud_rate: u32,
    pub read_timeout: Duration,
    pub poll_interval: Duration,
    pub auto_connect: bool,
    /// Transmit `LED<n>` when an indicator is toggled
    pub led_commands: bool,
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            auto_connect: true,
            led_commands: false,
        }
    }
}

/// esp32_console.yaml next to Cargo.toml
pub fn default_config_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("esp32_console.yaml")
}

/// Load settings for `hostname` from `path`.
///
/// A missing file or host entry is not an error: the defaults are used and a
/// warning is logged. Malformed YAML or values of the wrong type fail loudly.
pub fn load_console_settings(path: &Path, hostname: &str) -> Result<ConsoleSettings> {
    if !path.exists() {
        log::warn!(target: "config_loader", "No config at {:?}, using defaults", path);
        return Ok(ConsoleSettings::default());
    }
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    parse_console_settings(&text, hostname).with_context(|| format!("Invalid config in {:?}", path))
}

/// Parse a config document. Keys under `common` apply to every host; the
/// host block (found under one of the OS sections) overrides them.
pub fn parse_console_settings(yaml_text: &str, hostname: &str) -> Result<ConsoleSettings> {
    let yaml: Value = serde_yaml::from_str(yaml_text)?;
    let mut settings = ConsoleSettings::default();

    if yaml.is_null() {
        return Ok(settings);
    }

    if let Some(common) = yaml.get("common") {
        let common = common.as_mapping().ok_or_else(|| anyhow!("'common' must be a mapping"))?;
        apply_block(&mut settings, common, "common")?;
    }

    match find_host_block(&yaml, hostname) {
        Some(block) => apply_block(&mut settings, block, hostname)?,
        None => log::warn!(target: "config_loader", "No host entry for '{}', using common/default settings", hostname),
    }

    log::info!(
        target: "config_loader",
        "Console settings for '{}': port={}, baud={}, timeout={:?}, poll={:?}",
        hostname, settings.port, settings.baud_rate, settings.read_timeout, settings.poll_interval
    );
    Ok(settings)
}

fn find_host_block<'a>(yaml: &'a Value, hostname: &str) -> Option<&'a Mapping> {
    for os_key in OS_SECTIONS.iter() {
        if let Some(os_map) = yaml.get(*os_key).and_then(|v| v.as_mapping()) {
            for (k, v) in os_map.iter() {
                if k.as_str() == Some(hostname) {
                    return v.as_mapping();
                }
            }
        }
    }
    None
}

fn apply_block(settings: &mut ConsoleSettings, block: &Mapping, owner: &str) -> Result<()> {
    if let Some(port) = get_str(block, "SERIAL_PORT", owner)? {
        settings.port = port;
    }
    if let Some(baud) = get_u64(block, "BAUD_RATE", owner)? {
        settings.baud_rate = u32::try_from(baud).map_err(|_| anyhow!("BAUD_RATE {} out of range for '{}'", baud, owner))?;
    }
    if let Some(ms) = get_u64(block, "READ_TIMEOUT_MS", owner)? {
        settings.read_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = get_u64(block, "POLL_INTERVAL_MS", owner)? {
        if ms == 0 {
            return Err(anyhow!("POLL_INTERVAL_MS must be positive for '{}'", owner));
        }
        settings.poll_interval = Duration::from_millis(ms);
    }
    if let Some(v) = get_bool(block, "AUTO_CONNECT", owner)? {
        settings.auto_connect = v;
    }
    if let Some(v) = get_bool(block, "LED_COMMANDS", owner)? {
        settings.led_commands = v;
    }
    Ok(())
}

fn get_value<'a>(block: &'a Mapping, key: &str) -> Option<&'a Value> {
    block.get(&Value::from(key)).filter(|v| !v.is_null())
}

fn get_str(block: &Mapping, key: &str, owner: &str) -> Result<Option<String>> {
    get_value(block, key)
        .map(|v| {
            v.as_str()
                .map(|s| s.to_string())
                .ok_or_else(|| anyhow!("{} must be a string for '{}'", key, owner))
        })
        .transpose()
}

fn get_u64(block: &Mapping, key: &str, owner: &str) -> Result<Option<u64>> {
    get_value(block, key)
        .map(|v| v.as_u64().ok_or_else(|| anyhow!("{} must be a non-negative integer for '{}'", key, owner)))
        .transpose()
}

fn get_bool(block: &Mapping, key: &str, owner: &str) -> Result<Option<bool>> {
    get_value(block, key)
        .map(|v| v.as_bool().ok_or_else(|| anyhow!("{} must be true or false for '{}'", key, owner)))
        .transpose()
}

/// Apply `ESP32_PORT` (also read from a `.env` file) on top of the YAML
pub fn apply_env_overrides(settings: &mut ConsoleSettings) {
    let _ = dotenv();
    if let Ok(port) = std::env::var(PORT_ENV_VAR) {
        let port = port.trim();
        if !port.is_empty() {
            log::info!(target: "config_loader", "{} overrides port: {}", PORT_ENV_VAR, port);
            settings.port = port.to_string();
        }
    }
}
