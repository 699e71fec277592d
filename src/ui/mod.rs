mod console;
mod menu;

pub use console::ConsoleUi;
pub use menu::{Menu, MenuChoice};
