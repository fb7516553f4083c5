//! Output device enumeration

use cpal::traits::{DeviceTrait, HostTrait};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Id of the host's default output device
pub const DEFAULT_SINK_ID: &str = "default";

/// Output device information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputDevice {
    /// Identifier accepted as a context `sink_id`
    pub id: String,

    /// Display name
    pub name: String,

    /// Whether this is the host's default output
    pub is_default: bool,
}

/// Device enumeration errors
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to enumerate devices: {0}")]
    EnumerationError(String),
}

/// List available output devices, default first
pub fn list_output_devices() -> Result<Vec<OutputDevice>, SourceError> {
    let mut devices = Vec::new();

    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    if let Some(name) = &default_name {
        devices.push(OutputDevice {
            id: DEFAULT_SINK_ID.to_string(),
            name: format!("Default ({})", name),
            is_default: true,
        });
    }

    let outputs = host
        .output_devices()
        .map_err(|e| SourceError::EnumerationError(e.to_string()))?;

    for device in outputs {
        let Ok(name) = device.name() else {
            continue;
        };
        // Skip the default output device (already listed)
        if default_name.as_deref() == Some(name.as_str()) {
            continue;
        }
        devices.push(OutputDevice {
            id: sink_id_for(&name),
            name,
            is_default: false,
        });
    }

    Ok(devices)
}

pub(crate) fn sink_id_for(name: &str) -> String {
    format!("output:{}", name)
}

/// Device name selected by a sink id; `None` means the default device
pub(crate) fn device_name_from_sink(sink_id: Option<&str>) -> Option<&str> {
    match sink_id {
        None | Some(DEFAULT_SINK_ID) | Some("") => None,
        Some(id) => Some(id.strip_prefix("output:").unwrap_or(id)),
    }
}
