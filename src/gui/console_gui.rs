/// ESP32 console window
///
/// Layout:
/// - Right panel: custom info (sensor readouts, LED indicators, connect toggle)
/// - Center panel: message log, clear button, custom buttons, command input
///
/// The window keeps no state of its own. Widget events become `Intent`s that
/// are dispatched after the frame is laid out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use eframe::egui;
use egui::{Color32, FontId, RichText};

use crate::controller::{Controller, Intent, PollTimer, CUSTOM_BUTTON_COUNT};

pub const WINDOW_TITLE: &str = "ESP32 Interface";

pub const MAIN_COLOR: Color32 = Color32::from_rgb(0x1a, 0x1a, 0x1a);
pub const CONTRAST_COLOR: Color32 = Color32::from_rgb(0xff, 0xc5, 0x00);
pub const DISABLED_COLOR: Color32 = Color32::from_rgb(0x80, 0x80, 0x80);

const LOG_HEIGHT: f32 = 260.0;

pub fn color32(rgb: [u8; 3]) -> Color32 {
    Color32::from_rgb(rgb[0], rgb[1], rgb[2])
}

fn mono(text: impl Into<String>, size: f32) -> RichText {
    RichText::new(text).font(FontId::monospace(size))
}

fn flat_button(text: impl Into<String>) -> egui::Button<'static> {
    egui::Button::new(mono(text, 13.0).color(MAIN_COLOR)).fill(CONTRAST_COLOR)
}

pub fn apply_palette(ctx: &egui::Context) {
    let mut visuals = egui::Visuals::dark();
    visuals.panel_fill = MAIN_COLOR;
    visuals.window_fill = MAIN_COLOR;
    visuals.extreme_bg_color = MAIN_COLOR;
    visuals.override_text_color = Some(CONTRAST_COLOR);
    ctx.set_visuals(visuals);
}

pub struct ConsoleGUI {
    controller: Controller,
    poll: PollTimer,
    exit_flag: Arc<AtomicBool>,
}

impl ConsoleGUI {
    pub fn new(controller: Controller, poll_interval: Duration, exit_flag: Arc<AtomicBool>) -> Self {
        Self {
            controller,
            poll: PollTimer::new(poll_interval),
            exit_flag,
        }
    }

    /// Close the link before the window goes away. Safe to call more than once.
    fn release(&mut self) {
        self.controller.shutdown();
    }

    fn render_info_panel(&self, ui: &mut egui::Ui, intents: &mut Vec<Intent>) {
        ui.add_space(10.0);
        ui.label(mono("Informações Personalizadas", 16.0));
        ui.add_space(10.0);

        let readouts = self.controller.readouts();
        egui::Grid::new("readouts").spacing([12.0, 6.0]).show(ui, |ui| {
            ui.label(mono("Distância:", 13.0));
            ui.label(mono(readouts.distance_text(), 13.0));
            ui.end_row();
            ui.label(mono("Temperatura:", 13.0));
            ui.label(mono(readouts.temperature_text(), 13.0));
            ui.end_row();
            ui.label(mono("Umidade:", 13.0));
            ui.label(mono(readouts.humidity_text(), 13.0));
            ui.end_row();
        });

        ui.add_space(12.0);
        ui.label(mono("Leds indicativos:", 13.0));
        egui::Grid::new("leds").spacing([8.0, 4.0]).show(ui, |ui| {
            for led in self.controller.leds() {
                ui.label(mono(led.label(), 13.0));
            }
            ui.end_row();
            for led in self.controller.leds() {
                let button = egui::Button::new("").fill(color32(led.color().rgb())).min_size(egui::vec2(36.0, 22.0));
                if ui.add(button).on_hover_text(led.label()).clicked() {
                    intents.push(Intent::ToggleLed(led.id()));
                }
            }
            ui.end_row();
        });

        ui.add_space(12.0);
        let toggle = self.controller.connect_toggle();
        ui.horizontal(|ui| {
            ui.label(mono("Conexão:", 13.0));
            let button = egui::Button::new(mono(toggle.label(), 13.0).color(Color32::WHITE))
                .fill(color32(toggle.color().rgb()))
                .min_size(egui::vec2(48.0, 22.0));
            if ui.add(button).on_hover_text(self.controller.endpoint()).clicked() {
                intents.push(Intent::ToggleConnect);
            }
        });
    }

    fn render_console(&mut self, ui: &mut egui::Ui, intents: &mut Vec<Intent>) {
        ui.vertical_centered(|ui| {
            ui.label(mono("Interface com ESP32", 20.0));
        });
        ui.add_space(6.0);

        egui::Frame::none()
            .stroke(egui::Stroke::new(1.0, DISABLED_COLOR))
            .inner_margin(6.0)
            .show(ui, |ui| {
                egui::ScrollArea::vertical()
                    .max_height(LOG_HEIGHT)
                    .auto_shrink([false, false])
                    .stick_to_bottom(true)
                    .show(ui, |ui| {
                        for line in self.controller.log().lines() {
                            ui.label(mono(line.as_str(), 12.0));
                        }
                    });
            });

        ui.add_space(6.0);
        if ui.add(flat_button("Apagar Mensagens")).clicked() {
            intents.push(Intent::Clear);
        }

        ui.add_space(6.0);
        ui.horizontal(|ui| {
            for index in 0..CUSTOM_BUTTON_COUNT {
                if ui.add(flat_button(format!("Botão {}", index + 1))).clicked() {
                    intents.push(Intent::CustomButton(index));
                }
            }
        });

        ui.add_space(8.0);
        ui.horizontal(|ui| {
            let response = ui.add(
                egui::TextEdit::singleline(self.controller.input_mut())
                    .font(egui::TextStyle::Monospace)
                    .desired_width(420.0),
            );
            let submitted = response.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
            let clicked = ui.add(flat_button("Enviar")).clicked();
            if submitted || clicked {
                intents.push(Intent::Send(self.controller.input().to_string()));
                if submitted {
                    response.request_focus();
                }
            }
        });
    }
}

impl eframe::App for ConsoleGUI {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if self.exit_flag.load(Ordering::Relaxed) {
            self.release();
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
            return;
        }

        let now = Instant::now();
        if self.poll.due(now) {
            self.controller.dispatch(Intent::PollTick);
        }

        let mut intents = Vec::new();

        egui::SidePanel::right("info_panel")
            .resizable(false)
            .default_width(300.0)
            .show(ctx, |ui| self.render_info_panel(ui, &mut intents));

        egui::CentralPanel::default().show(ctx, |ui| self.render_console(ui, &mut intents));

        for intent in intents {
            self.controller.dispatch(intent);
        }

        // keep ticking without user input
        let wait = self.poll.remaining(Instant::now()).max(Duration::from_millis(1));
        ctx.request_repaint_after(wait);
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        self.release();
    }
}
