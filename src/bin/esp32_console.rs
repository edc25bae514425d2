/// ESP32 serial console
///
/// Run with: cargo run --bin esp32_console -- --port /dev/ttyUSB0
/// No hardware? cargo run --bin esp32_console -- --mock

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use eframe::egui;
use gethostname::gethostname;

use esp32_console::config_loader::{self, ConsoleSettings};
use esp32_console::controller::Controller;
use esp32_console::gui::{self, ConsoleGUI};
use esp32_console::mock_device::{MockConnector, MockDevice};
use esp32_console::serial_session::{self, SessionManager};

const MOCK_ENDPOINT: &str = "MOCK0";
const DEBUG_LOG_FILE: &str = "esp32_console_debug.log";

#[derive(Parser, Debug)]
#[command(author, version, about = "Line-oriented serial console for an ESP32", long_about = None)]
struct Args {
    /// Serial port (overrides config and ESP32_PORT)
    #[arg(long)]
    port: Option<String>,
    #[arg(long)]
    baud: Option<u32>,
    /// Poll interval in milliseconds
    #[arg(long)]
    poll_ms: Option<u64>,
    /// Read timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Config file (default: esp32_console.yaml next to Cargo.toml)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Start disconnected
    #[arg(long)]
    no_auto_connect: bool,
    /// Talk to a simulated board instead of a real port
    #[arg(long)]
    mock: bool,
    /// Print the available serial ports and exit
    #[arg(long)]
    list_ports: bool,
    /// Also write every log line to esp32_console_debug.log
    #[arg(long)]
    debug: bool,
}

fn resolve_settings(args: &Args) -> Result<ConsoleSettings> {
    let hostname = gethostname().to_string_lossy().to_string();
    let path = args.config.clone().unwrap_or_else(config_loader::default_config_path);
    let mut settings = config_loader::load_console_settings(&path, &hostname)?;
    config_loader::apply_env_overrides(&mut settings);

    if let Some(port) = args.port.as_ref() {
        settings.port = port.clone();
    }
    if let Some(baud) = args.baud {
        settings.baud_rate = baud;
    }
    if let Some(ms) = args.poll_ms {
        settings.poll_interval = Duration::from_millis(ms.max(1));
    }
    if let Some(ms) = args.timeout_ms {
        settings.read_timeout = Duration::from_millis(ms);
    }
    if args.no_auto_connect {
        settings.auto_connect = false;
    }
    if args.mock {
        settings.port = MOCK_ENDPOINT.to_string();
    }
    Ok(settings)
}

fn build_controller(args: &Args, settings: &ConsoleSettings) -> Result<Controller> {
    let session = if args.mock {
        SessionManager::new(Box::new(MockConnector::new().with_device(MOCK_ENDPOINT, MockDevice::demo())))
    } else {
        SessionManager::serial()
    };
    let controller = Controller::new(session, settings);
    if !args.debug {
        return Ok(controller);
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(DEBUG_LOG_FILE)
        .with_context(|| format!("Failed to open {}", DEBUG_LOG_FILE))?;
    log::info!("Debug log: {}", DEBUG_LOG_FILE);
    Ok(controller.with_debug_file(file))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    if args.list_ports {
        let ports = serial_session::available_endpoints()?;
        if ports.is_empty() {
            println!("No serial ports found");
        }
        for port in ports {
            println!("{}", port);
        }
        return Ok(());
    }

    let settings = resolve_settings(&args)?;
    let controller = build_controller(&args, &settings)?;
    if !controller.is_connected() && settings.auto_connect {
        log::warn!("Failed to connect to {}; use the connect toggle to retry", settings.port);
    }

    let exit_flag = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&exit_flag);
        ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
            .context("Failed to install Ctrl-C handler")?;
    }

    let app = ConsoleGUI::new(controller, settings.poll_interval, exit_flag);

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title(gui::WINDOW_TITLE)
            .with_inner_size([900.0, 460.0]),
        ..Default::default()
    };

    eframe::run_native(
        gui::WINDOW_TITLE,
        options,
        Box::new(|cc| {
            gui::apply_palette(&cc.egui_ctx);
            Box::new(app)
        }),
    )
    .map_err(|e| anyhow::anyhow!("GUI error: {}", e))?;

    Ok(())
}
