//! Collaborators supplied by the host platform
//!
//! The drivers never talk to the radio, the capability database or the flow
//! engine directly; each device session is handed a [`DeviceContext`].

use crate::capability::CapabilityValue;
use crate::error::{ClusterError, DeviceError};
use crate::flow::TriggerCard;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use zcl_frames::{OnOffCommand, WindowCoveringCommand};

/// Device settings as stored by the host
pub type Settings = serde_json::Map<String, serde_json::Value>;

/// Attribute values keyed by attribute name
pub type Attributes = serde_json::Map<String, serde_json::Value>;

/// Capability values of one device
#[async_trait]
pub trait CapabilityStore: Send + Sync {
    async fn set_capability_value(
        &self,
        capability: &str,
        value: CapabilityValue,
    ) -> Result<(), DeviceError>;

    async fn capability_value(&self, capability: &str) -> Option<CapabilityValue>;

    /// Currently registered capability names
    async fn capabilities(&self) -> BTreeSet<String>;

    async fn add_capability(&self, capability: &str) -> Result<(), DeviceError>;

    async fn remove_capability(&self, capability: &str) -> Result<(), DeviceError>;
}

/// User-visible device settings
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn settings(&self) -> Settings;

    /// Merge `changes` into the stored settings
    async fn set_settings(&self, changes: Settings) -> Result<(), DeviceError>;
}

/// Flow trigger delivery
#[async_trait]
pub trait FlowTriggers: Send + Sync {
    async fn trigger(&self, card: TriggerCard) -> Result<(), DeviceError>;
}

/// Cluster commands and attribute I/O on the device
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn on_off(&self, endpoint: u8, command: OnOffCommand) -> Result<(), ClusterError>;

    async fn window_covering(
        &self,
        endpoint: u8,
        command: WindowCoveringCommand,
    ) -> Result<(), ClusterError>;

    async fn read_attributes(
        &self,
        endpoint: u8,
        cluster_id: u16,
        attributes: &[&str],
    ) -> Result<Attributes, ClusterError>;

    async fn write_attributes(
        &self,
        endpoint: u8,
        cluster_id: u16,
        attributes: Attributes,
    ) -> Result<(), ClusterError>;

    /// Write an enum datapoint through the Tuya-specific cluster
    async fn write_datapoint_enum(&self, datapoint: u8, value: u8) -> Result<(), ClusterError>;
}

/// Everything a device session needs from the host
#[derive(Clone)]
pub struct DeviceContext {
    pub cluster: Arc<dyn ClusterClient>,
    pub capabilities: Arc<dyn CapabilityStore>,
    pub settings: Arc<dyn SettingsStore>,
    pub flow: Arc<dyn FlowTriggers>,
}
