//! In-process implementations of the driver host collaborators

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use driver_core::{
    Attributes, CapabilityStore, CapabilityValue, ClusterClient, ClusterError, DeviceError,
    FlowTriggers, Settings, SettingsStore, TriggerCard,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::RwLock;
use tokio::sync::broadcast;
use zcl_frames::cluster::{id, window_covering_attrs};
use zcl_frames::{OnOffCommand, WindowCoveringCommand, ZclFrame};

/// Capability registry and values of one device
#[derive(Default)]
pub struct MemoryCapabilities {
    registered: DashSet<String>,
    values: DashMap<String, CapabilityValue>,
}

impl MemoryCapabilities {
    /// Snapshot of registered capabilities with their current values
    pub fn snapshot(&self) -> BTreeMap<String, Option<CapabilityValue>> {
        self.registered
            .iter()
            .map(|name| {
                let value = self.values.get(name.key()).map(|v| v.value().clone());
                (name.key().clone(), value)
            })
            .collect()
    }
}

#[async_trait]
impl CapabilityStore for MemoryCapabilities {
    async fn set_capability_value(
        &self,
        capability: &str,
        value: CapabilityValue,
    ) -> Result<(), DeviceError> {
        if !self.registered.contains(capability) {
            return Err(DeviceError::UnknownCapability(capability.to_string()));
        }
        self.values.insert(capability.to_string(), value);
        Ok(())
    }

    async fn capability_value(&self, capability: &str) -> Option<CapabilityValue> {
        self.values.get(capability).map(|v| v.value().clone())
    }

    async fn capabilities(&self) -> BTreeSet<String> {
        self.registered.iter().map(|c| c.key().clone()).collect()
    }

    async fn add_capability(&self, capability: &str) -> Result<(), DeviceError> {
        self.registered.insert(capability.to_string());
        Ok(())
    }

    async fn remove_capability(&self, capability: &str) -> Result<(), DeviceError> {
        self.registered.remove(capability);
        self.values.remove(capability);
        Ok(())
    }
}

/// Settings of one device
#[derive(Default)]
pub struct MemorySettings {
    settings: RwLock<Settings>,
}

impl MemorySettings {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: RwLock::new(settings),
        }
    }

    pub fn snapshot(&self) -> Settings {
        self.settings
            .read()
            .map(|s| s.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

#[async_trait]
impl SettingsStore for MemorySettings {
    async fn settings(&self) -> Settings {
        self.snapshot()
    }

    async fn set_settings(&self, changes: Settings) -> Result<(), DeviceError> {
        let mut settings = self
            .settings
            .write()
            .map_err(|e| DeviceError::Settings(e.to_string()))?;
        settings.extend(changes);
        Ok(())
    }
}

/// Cluster client that encodes commands without a radio
///
/// Commands are logged as ZCL frames and reflected into an attribute table so
/// reads see the result of earlier writes.
pub struct LoopbackCluster {
    device_id: String,
    seq: AtomicU8,
    attributes: DashMap<(u16, String), serde_json::Value>,
    datapoints: DashMap<u8, u8>,
}

impl LoopbackCluster {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            seq: AtomicU8::new(0),
            attributes: DashMap::new(),
            datapoints: DashMap::new(),
        }
    }

    /// Seed an attribute value answered by later reads
    pub fn set_attribute(&self, cluster_id: u16, name: &str, value: serde_json::Value) {
        self.attributes.insert((cluster_id, name.to_string()), value);
    }

    pub fn attribute(&self, cluster_id: u16, name: &str) -> Option<serde_json::Value> {
        self.attributes
            .get(&(cluster_id, name.to_string()))
            .map(|v| v.value().clone())
    }

    #[cfg(test)]
    pub fn datapoint(&self, datapoint: u8) -> Option<u8> {
        self.datapoints.get(&datapoint).map(|v| *v.value())
    }

    fn next_seq(&self) -> u8 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    fn transmit(&self, endpoint: u8, cluster_id: u16, frame: &ZclFrame) {
        let bytes = frame.serialize();
        match ZclFrame::parse(&bytes) {
            Ok(parsed) => tracing::debug!(
                device = %self.device_id,
                endpoint,
                "TX cluster={:#06x} seq={} cmd={:#04x} payload={:02X?}",
                cluster_id,
                parsed.transaction_seq(),
                parsed.command_id(),
                parsed.payload()
            ),
            Err(e) => tracing::warn!(device = %self.device_id, "Malformed outgoing frame: {}", e),
        }
    }
}

#[async_trait]
impl ClusterClient for LoopbackCluster {
    async fn on_off(&self, endpoint: u8, command: OnOffCommand) -> Result<(), ClusterError> {
        let frame = ZclFrame::on_off_command(self.next_seq(), command);
        self.transmit(endpoint, id::ON_OFF, &frame);
        let state = match command {
            OnOffCommand::On => Some(true),
            OnOffCommand::Off => Some(false),
            OnOffCommand::Toggle => None,
        };
        if let Some(state) = state {
            self.set_attribute(id::ON_OFF, &format!("onOff_{endpoint}"), state.into());
        }
        Ok(())
    }

    async fn window_covering(
        &self,
        endpoint: u8,
        command: WindowCoveringCommand,
    ) -> Result<(), ClusterError> {
        let frame = ZclFrame::window_covering_command(self.next_seq(), command);
        self.transmit(endpoint, id::WINDOW_COVERING, &frame);
        let position = match command {
            WindowCoveringCommand::UpOpen => Some(100),
            WindowCoveringCommand::DownClose => Some(0),
            WindowCoveringCommand::GoToLiftPercentage { percentage } => Some(percentage),
            WindowCoveringCommand::Stop => None,
        };
        if let Some(position) = position {
            self.set_attribute(
                id::WINDOW_COVERING,
                window_covering_attrs::CURRENT_POSITION_LIFT_PERCENTAGE,
                position.into(),
            );
        }
        Ok(())
    }

    async fn read_attributes(
        &self,
        endpoint: u8,
        cluster_id: u16,
        attributes: &[&str],
    ) -> Result<Attributes, ClusterError> {
        tracing::debug!(
            device = %self.device_id,
            endpoint,
            "Read cluster={:#06x} {:?}",
            cluster_id,
            attributes
        );
        Ok(attributes
            .iter()
            .filter_map(|name| {
                self.attribute(cluster_id, name)
                    .map(|value| ((*name).to_string(), value))
            })
            .collect())
    }

    async fn write_attributes(
        &self,
        endpoint: u8,
        cluster_id: u16,
        attributes: Attributes,
    ) -> Result<(), ClusterError> {
        tracing::debug!(
            device = %self.device_id,
            endpoint,
            "Write cluster={:#06x} {:?}",
            cluster_id,
            attributes
        );
        for (name, value) in attributes {
            self.attributes.insert((cluster_id, name), value);
        }
        Ok(())
    }

    async fn write_datapoint_enum(&self, datapoint: u8, value: u8) -> Result<(), ClusterError> {
        let frame = ZclFrame::tuya_enum_datapoint(self.next_seq(), datapoint, value);
        self.transmit(1, id::TUYA_SPECIFIC, &frame);
        self.datapoints.insert(datapoint, value);
        Ok(())
    }
}

/// A flow trigger fired by a device
#[derive(Debug, Clone, Serialize)]
pub struct FlowEvent {
    pub device_id: String,
    #[serde(flatten)]
    pub trigger: TriggerCard,
    pub fired_at: String,
}

/// Flow trigger sink broadcasting to subscribers
pub struct BroadcastFlow {
    device_id: String,
    tx: broadcast::Sender<FlowEvent>,
}

impl BroadcastFlow {
    pub fn new(device_id: impl Into<String>, tx: broadcast::Sender<FlowEvent>) -> Self {
        Self {
            device_id: device_id.into(),
            tx,
        }
    }
}

#[async_trait]
impl FlowTriggers for BroadcastFlow {
    async fn trigger(&self, card: TriggerCard) -> Result<(), DeviceError> {
        tracing::info!(device = %self.device_id, card = %card.card, "Flow trigger fired");
        let event = FlowEvent {
            device_id: self.device_id.clone(),
            trigger: card,
            fired_at: chrono::Utc::now().to_rfc3339(),
        };
        // No subscribers is not a failure
        let _ = self.tx.send(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_unregistered_capability_rejected() {
        let store = MemoryCapabilities::default();
        assert!(matches!(
            store
                .set_capability_value("onoff_1", CapabilityValue::Bool(true))
                .await,
            Err(DeviceError::UnknownCapability(_))
        ));

        store.add_capability("onoff_1").await.unwrap();
        store
            .set_capability_value("onoff_1", CapabilityValue::Bool(true))
            .await
            .unwrap();
        assert_eq!(
            store.snapshot()["onoff_1"],
            Some(CapabilityValue::Bool(true))
        );

        store.remove_capability("onoff_1").await.unwrap();
        assert!(store.capability_value("onoff_1").await.is_none());
    }

    #[tokio::test]
    async fn test_loopback_reflects_commands() {
        let cluster = LoopbackCluster::new("dev");
        cluster
            .window_covering(1, WindowCoveringCommand::GoToLiftPercentage { percentage: 35 })
            .await
            .unwrap();
        let attrs = cluster
            .read_attributes(
                1,
                id::WINDOW_COVERING,
                &[window_covering_attrs::CURRENT_POSITION_LIFT_PERCENTAGE, "missing"],
            )
            .await
            .unwrap();
        assert_eq!(attrs.len(), 1);
        assert_eq!(
            attrs[window_covering_attrs::CURRENT_POSITION_LIFT_PERCENTAGE],
            json!(35)
        );

        cluster.write_datapoint_enum(18, 1).await.unwrap();
        assert_eq!(cluster.datapoint(18), Some(1));
    }

    #[tokio::test]
    async fn test_broadcast_flow_delivers_to_subscribers() {
        let (tx, mut rx) = broadcast::channel(8);
        let flow = BroadcastFlow::new("dev", tx);
        flow.trigger(TriggerCard::scene_triggered(2)).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.device_id, "dev");
        assert_eq!(event.trigger, TriggerCard::scene_triggered(2));
    }

    #[tokio::test]
    async fn test_settings_merge() {
        let mut initial = Settings::new();
        initial.insert("mode_1".into(), json!("switch"));
        let store = MemorySettings::new(initial);

        let mut changes = Settings::new();
        changes.insert("mode_2".into(), json!("scene"));
        store.set_settings(changes).await.unwrap();

        let settings = store.settings().await;
        assert_eq!(settings.len(), 2);
        assert_eq!(settings["mode_2"], json!("scene"));
    }
}
