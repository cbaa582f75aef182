//! Paired devices and their driver sessions

use crate::host::{BroadcastFlow, FlowEvent, LoopbackCluster, MemoryCapabilities, MemorySettings};
use crate::persistence::{self, DeviceRecord, DriverKind};
use dashmap::DashMap;
use driver_core::{
    CapabilityStore, CapabilityValue, CurtainConfig, CurtainDevice, DeviceContext, DeviceError,
    RouterAction, Settings, SettingsStore, SwitchConfig, SwitchDevice,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use zcl_frames::{FrameMeta, RawFrame};

/// Errors returned by registry operations
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("{operation} is not supported by {driver:?} devices")]
    Unsupported {
        driver: DriverKind,
        operation: &'static str,
    },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] std::io::Error),
}

/// Request to pair a new device
#[derive(Debug, Deserialize)]
pub struct CreateDeviceRequest {
    pub name: String,
    pub driver: DriverKind,
    #[serde(default)]
    pub settings: Settings,
}

/// A raw frame injected as if delivered by the radio
#[derive(Debug, Deserialize)]
pub struct FrameRequest {
    pub endpoint: u8,
    pub cluster_id: u16,
    /// Hex bytes, optionally separated by spaces or colons
    pub payload: String,
    #[serde(default)]
    pub lqi: Option<u8>,
    #[serde(default)]
    pub rssi: Option<i8>,
}

/// An attribute report injected for a curtain
#[derive(Debug, Deserialize)]
pub struct ReportRequest {
    pub attribute: String,
    pub value: serde_json::Value,
}

/// Device as returned by the API
#[derive(Debug, Clone, Serialize)]
pub struct DeviceView {
    #[serde(flatten)]
    pub record: DeviceRecord,
    pub capabilities: BTreeMap<String, Option<CapabilityValue>>,
}

enum Session {
    Switch(SwitchDevice),
    Curtain(CurtainDevice),
}

struct DeviceEntry {
    record: DeviceRecord,
    session: Session,
    capabilities: Arc<MemoryCapabilities>,
    settings: Arc<MemorySettings>,
}

impl DeviceEntry {
    /// Current record, with settings taken from the live store
    fn record(&self) -> DeviceRecord {
        DeviceRecord {
            settings: self.settings.snapshot(),
            ..self.record.clone()
        }
    }

    fn view(&self) -> DeviceView {
        DeviceView {
            record: self.record(),
            capabilities: self.capabilities.snapshot(),
        }
    }

    fn teardown(&self) {
        match &self.session {
            Session::Switch(device) => device.teardown(),
            Session::Curtain(device) => device.teardown(),
        }
    }

    fn unsupported(&self, operation: &'static str) -> RegistryError {
        RegistryError::Unsupported {
            driver: self.record.driver,
            operation,
        }
    }
}

/// All paired devices
pub struct DeviceRegistry {
    devices: DashMap<String, Arc<DeviceEntry>>,
    switch_config: SwitchConfig,
    curtain_config: CurtainConfig,
    flow_tx: broadcast::Sender<FlowEvent>,
    data_path: PathBuf,
    /// Serializes snapshot and write so saves share one temp file safely
    save_lock: Mutex<()>,
}

impl DeviceRegistry {
    /// Create a registry and restore persisted devices
    pub async fn new(
        data_dir: &Path,
        switch_config: SwitchConfig,
        curtain_config: CurtainConfig,
    ) -> Self {
        let (flow_tx, _) = broadcast::channel(64);
        let registry = Self {
            devices: DashMap::new(),
            switch_config,
            curtain_config,
            flow_tx,
            data_path: data_dir.join("devices.json"),
            save_lock: Mutex::new(()),
        };

        for record in persistence::load_devices(&registry.data_path).await {
            registry.start_session(record).await;
        }
        registry
    }

    /// Subscribe to fired flow triggers
    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.flow_tx.subscribe()
    }

    async fn start_session(&self, record: DeviceRecord) -> Arc<DeviceEntry> {
        let capabilities = Arc::new(MemoryCapabilities::default());
        let settings = Arc::new(MemorySettings::new(record.settings.clone()));
        let ctx = DeviceContext {
            cluster: Arc::new(LoopbackCluster::new(record.id.clone())),
            capabilities: capabilities.clone(),
            settings: settings.clone(),
            flow: Arc::new(BroadcastFlow::new(record.id.clone(), self.flow_tx.clone())),
        };

        let session = match record.driver {
            DriverKind::Switch => {
                let device = SwitchDevice::new(record.name.clone(), self.switch_config.clone(), ctx);
                for capability in device.capabilities() {
                    if let Err(e) = capabilities.add_capability(&capability).await {
                        tracing::warn!(device = %record.id, "Failed to add {}: {}", capability, e);
                    }
                }
                device.init().await;
                Session::Switch(device)
            }
            DriverKind::Curtain => {
                let device = CurtainDevice::new(record.name.clone(), self.curtain_config.clone(), ctx);
                device.init().await;
                Session::Curtain(device)
            }
        };

        let entry = Arc::new(DeviceEntry {
            record,
            session,
            capabilities,
            settings,
        });
        self.devices.insert(entry.record.id.clone(), entry.clone());
        entry
    }

    async fn save(&self) -> Result<(), RegistryError> {
        let _guard = self.save_lock.lock().await;
        let mut records: Vec<DeviceRecord> = self.devices.iter().map(|e| e.record()).collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        persistence::save_devices(&self.data_path, &records).await?;
        Ok(())
    }

    fn entry(&self, id: &str) -> Result<Arc<DeviceEntry>, RegistryError> {
        self.devices
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Get all devices, oldest first
    pub fn list(&self) -> Vec<DeviceView> {
        let mut devices: Vec<DeviceView> = self.devices.iter().map(|e| e.view()).collect();
        devices.sort_by(|a, b| a.record.created_at.cmp(&b.record.created_at));
        devices
    }

    pub fn get(&self, id: &str) -> Option<DeviceView> {
        self.devices.get(id).map(|e| e.view())
    }

    /// Pair a new device and start its session
    pub async fn create(&self, request: CreateDeviceRequest) -> Result<DeviceView, RegistryError> {
        let record = DeviceRecord::new(request.name, request.driver, request.settings);
        tracing::info!(device = %record.id, "Pairing {:?} device {}", record.driver, record.name);
        let entry = self.start_session(record).await;
        if let Err(e) = self.save().await {
            tracing::error!(device = %entry.record.id, "Failed to save new device: {}", e);
            self.devices.remove(&entry.record.id);
            entry.teardown();
            return Err(e);
        }
        Ok(entry.view())
    }

    /// End a device session and forget the device
    pub async fn remove(&self, id: &str) -> Result<(), RegistryError> {
        let (_, entry) = self
            .devices
            .remove(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        entry.teardown();
        self.save().await
    }

    /// Feed a raw frame to a switch
    pub fn handle_frame(
        &self,
        id: &str,
        request: &FrameRequest,
    ) -> Result<Vec<RouterAction>, RegistryError> {
        let entry = self.entry(id)?;
        let Session::Switch(device) = &entry.session else {
            return Err(entry.unsupported("Frame injection"));
        };
        let payload = parse_hex(&request.payload)?;
        let frame = RawFrame::new(request.endpoint, request.cluster_id, payload).with_meta(FrameMeta {
            lqi: request.lqi,
            rssi: request.rssi,
        });
        Ok(device.handle_frame(&frame))
    }

    /// Feed an attribute report to a curtain
    pub async fn handle_report(
        &self,
        id: &str,
        request: &ReportRequest,
    ) -> Result<Option<CapabilityValue>, RegistryError> {
        let entry = self.entry(id)?;
        let Session::Curtain(device) = &entry.session else {
            return Err(entry.unsupported("Attribute reports"));
        };
        Ok(device.handle_report(&request.attribute, &request.value).await)
    }

    /// Set a capability from the UI; the value is stored once the driver accepts it
    pub async fn set_capability(
        &self,
        id: &str,
        capability: &str,
        value: CapabilityValue,
    ) -> Result<(), RegistryError> {
        let entry = self.entry(id)?;
        match &entry.session {
            Session::Switch(device) => device.set_capability(capability, &value).await?,
            Session::Curtain(device) => device.set_capability(capability, &value).await?,
        }
        entry
            .capabilities
            .set_capability_value(capability, value)
            .await?;
        Ok(())
    }

    /// Change settings; they are stored only when the driver accepts them
    pub async fn update_settings(
        &self,
        id: &str,
        changes: Settings,
    ) -> Result<Settings, RegistryError> {
        let entry = self.entry(id)?;
        let mut new_settings = entry.settings.snapshot();
        let changed_keys: Vec<String> = changes
            .iter()
            .filter(|(key, value)| new_settings.get(*key) != Some(*value))
            .map(|(key, _)| key.clone())
            .collect();
        if changed_keys.is_empty() {
            return Ok(new_settings);
        }
        new_settings.extend(changes.clone());

        match &entry.session {
            Session::Switch(device) => device.on_settings(&new_settings, &changed_keys).await?,
            Session::Curtain(device) => device.on_settings(&new_settings, &changed_keys).await,
        }
        entry.settings.set_settings(changes).await?;
        self.save().await?;
        Ok(entry.settings.snapshot())
    }

    /// Run an action card against a device
    pub async fn run_action(
        &self,
        id: &str,
        card: &str,
        args: &serde_json::Value,
    ) -> Result<(), RegistryError> {
        let entry = self.entry(id)?;
        match &entry.session {
            Session::Switch(device) => device.run_action(card, args).await?,
            Session::Curtain(device) => device.run_action(card, args).await?,
        }
        Ok(())
    }

    /// Evaluate a condition card against a device
    pub async fn run_condition(
        &self,
        id: &str,
        card: &str,
        args: &serde_json::Value,
    ) -> Result<bool, RegistryError> {
        let entry = self.entry(id)?;
        let Session::Switch(device) = &entry.session else {
            return Err(DeviceError::UnknownCard(card.to_string()).into());
        };
        Ok(device.run_condition(card, args).await?)
    }

    /// Tear down every session
    pub fn shutdown(&self) {
        for entry in &self.devices {
            entry.teardown();
        }
    }
}

/// Parse hex bytes such as `"08 00 01"`, `"08:00:01"` or `"080001"`
pub fn parse_hex(s: &str) -> Result<Vec<u8>, RegistryError> {
    let digits: String = s
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    if digits.len() % 2 != 0 {
        return Err(RegistryError::InvalidPayload(format!(
            "odd number of hex digits in {s:?}"
        )));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            digits
                .get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| RegistryError::InvalidPayload(format!("invalid hex in {s:?}")))
        })
        .collect()
}
