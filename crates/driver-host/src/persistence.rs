//! Device record persistence using JSON file storage

use driver_core::Settings;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

/// Which driver runs a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    Switch,
    Curtain,
}

/// A paired device as stored on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: String,
    pub name: String,
    pub driver: DriverKind,
    #[serde(default)]
    pub settings: Settings,
    pub created_at: String,
}

impl DeviceRecord {
    pub fn new(name: String, driver: DriverKind, settings: Settings) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            driver,
            settings,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Load device records from a JSON file
pub async fn load_devices(path: &Path) -> Vec<DeviceRecord> {
    match fs::read_to_string(path).await {
        Ok(contents) => match serde_json::from_str::<Vec<DeviceRecord>>(&contents) {
            Ok(devices) => {
                tracing::info!("Loaded {} devices from {:?}", devices.len(), path);
                devices
            }
            Err(e) => {
                tracing::warn!("Failed to parse devices file {:?}: {}", path, e);
                Vec::new()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No devices file found at {:?}, starting fresh", path);
            Vec::new()
        }
        Err(e) => {
            tracing::warn!("Failed to read devices file {:?}: {}", path, e);
            Vec::new()
        }
    }
}

/// Save device records to a JSON file atomically
#[allow(clippy::missing_errors_doc)]
pub async fn save_devices(path: &Path, devices: &[DeviceRecord]) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let json = serde_json::to_string_pretty(devices)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    // Write to a temp file first so a crash never leaves a truncated file
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, &json).await?;
    fs::rename(&tmp_path, path).await?;

    tracing::debug!("Saved {} devices to {:?}", devices.len(), path);
    Ok(())
}
