/// egui front-end for the console
pub mod console_gui;

pub use console_gui::{apply_palette, ConsoleGUI, WINDOW_TITLE};
