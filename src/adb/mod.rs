pub mod client;
pub mod device;
pub use client::AdbClient;
pub use device::{Device, DeviceManager, DeviceState};
