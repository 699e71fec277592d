//! Android debloater: list, disable, uninstall and restore packages on a
//! device over adb, with a safety rating for each package.

pub mod adb;
pub mod connection;
pub mod core;
pub mod executor;
pub mod inventory;
pub mod safety;
pub mod ui;
