use crate::adb::client::AdbClient;
use crate::core::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    /// Authorized for USB debugging.
    Device,
    /// Connected, waiting for the user to accept the debugging prompt.
    Unauthorized,
    Offline,
    Other,
}

impl DeviceState {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "device" => Self::Device,
            "unauthorized" => Self::Unauthorized,
            "offline" => Self::Offline,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Device => "device",
            Self::Unauthorized => "unauthorized",
            Self::Offline => "offline",
            Self::Other => "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub serial: String,
    pub state: DeviceState,
    pub model: Option<String>,
    pub brand: Option<String>,
    pub marketing_name: Option<String>,
    pub android_version: Option<String>,
}

impl Device {
    pub fn display_name(&self) -> String {
        if let Some(brand) = &self.brand {
            if let Some(name) = &self.marketing_name {
                return format!("{} {}", brand, name).trim().to_string();
            }
        }
        if let Some(model) = &self.model {
            return model.clone();
        }
        self.serial.clone()
    }

    pub fn is_authorized(&self) -> bool {
        self.state == DeviceState::Device
    }
}

#[derive(Clone)]
pub struct DeviceManager {
    client: AdbClient,
}

impl DeviceManager {
    pub fn new(client: AdbClient) -> Self {
        Self { client }
    }

    /// All attached devices, authorized or not. Properties are only read from
    /// authorized ones.
    pub async fn list_devices(&self) -> Result<Vec<Device>> {
        let (output, _) = self.client.execute(&["devices", "-l"]).await?;
        let mut devices = Vec::new();
        for (serial, state) in parse_device_list(&output) {
            let mut device = Device {
                serial,
                state,
                model: None,
                brand: None,
                marketing_name: None,
                android_version: None,
            };
            if device.is_authorized() {
                let props = self.get_properties(&device.serial).await.unwrap_or_default();
                device.model = props.get("ro.product.model").cloned();
                device.brand = props.get("ro.product.brand").cloned();
                device.marketing_name = Self::first_non_empty(&[
                    props.get("ro.product.marketname").cloned(),
                    props.get("ro.config.marketing_name").cloned(),
                    props.get("ro.product.vendor.model").cloned(),
                ]);
                device.android_version = props.get("ro.build.version.release").cloned();
            }
            devices.push(device);
        }
        Ok(devices)
    }

    /// State of one serial without touching device properties. `None` when
    /// the device is not attached.
    pub async fn device_state(&self, serial: &str) -> Result<Option<DeviceState>> {
        let (output, _) = self.client.execute(&["devices"]).await?;
        Ok(parse_device_list(&output)
            .into_iter()
            .find(|(s, _)| s == serial)
            .map(|(_, state)| state))
    }

    pub async fn get_properties(&self, serial: &str) -> Result<HashMap<String, String>> {
        let output = self.client.shell(serial, &["getprop"]).await?;
        Ok(parse_properties(&output))
    }

    fn first_non_empty(values: &[Option<String>]) -> Option<String> {
        values
            .iter()
            .find(|v| v.as_ref().map(|s| !s.is_empty()).unwrap_or(false))
            .and_then(|v| v.clone())
    }
}

pub(crate) fn parse_device_list(output: &str) -> Vec<(String, DeviceState)> {
    output
        .lines()
        .skip_while(|line| !line.starts_with("List of devices"))
        .skip(1)
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('*') {
                return None;
            }
            let mut parts = line.split_whitespace();
            let serial = parts.next()?.to_string();
            let state = DeviceState::parse(parts.next()?);
            Some((serial, state))
        })
        .collect()
}

fn parse_properties(output: &str) -> HashMap<String, String> {
    let mut props = HashMap::new();
    for line in output.lines() {
        let line = line.trim();
        if !line.starts_with('[') {
            continue;
        }
        if let Some(idx) = line.find("]: [") {
            let key = &line[1..idx];
            let rest = &line[idx + 4..];
            if let Some(end) = rest.rfind(']') {
                props.insert(key.to_string(), rest[..end].to_string());
            }
        }
    }
    props
}
