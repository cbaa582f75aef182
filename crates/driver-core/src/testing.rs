//! Recording fake of the host collaborators for unit tests

use crate::capability::CapabilityValue;
use crate::error::{ClusterError, DeviceError};
use crate::flow::TriggerCard;
use crate::host::{
    Attributes, CapabilityStore, ClusterClient, DeviceContext, FlowTriggers, Settings,
    SettingsStore,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use zcl_frames::{OnOffCommand, WindowCoveringCommand};

#[derive(Default)]
pub struct FakeHost {
    pub on_off: Mutex<Vec<(u8, OnOffCommand)>>,
    pub covering: Mutex<Vec<(u8, WindowCoveringCommand)>>,
    pub datapoints: Mutex<Vec<(u8, u8)>>,
    pub written_attributes: Mutex<Vec<(u16, Attributes)>>,
    pub readable: Mutex<Attributes>,
    pub values: Mutex<BTreeMap<String, CapabilityValue>>,
    pub registered: Mutex<BTreeSet<String>>,
    pub set_calls: Mutex<Vec<(String, CapabilityValue)>>,
    pub settings: Mutex<Settings>,
    pub triggers: Mutex<Vec<TriggerCard>>,
    pub fail_cluster: bool,
    pub fail_capability_writes: bool,
    pub fail_triggers: bool,
    /// When set, each trigger waits for a permit before it is recorded
    pub trigger_gate: Option<Arc<Semaphore>>,
}

impl FakeHost {
    pub fn context(self: &Arc<Self>) -> DeviceContext {
        DeviceContext {
            cluster: self.clone(),
            capabilities: self.clone(),
            settings: self.clone(),
            flow: self.clone(),
        }
    }

    pub fn trigger_names(&self) -> Vec<String> {
        self.triggers
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.card.clone())
            .collect()
    }

    fn cluster_result(&self) -> Result<(), ClusterError> {
        if self.fail_cluster {
            return Err(ClusterError::Timeout);
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterClient for FakeHost {
    async fn on_off(&self, endpoint: u8, command: OnOffCommand) -> Result<(), ClusterError> {
        self.cluster_result()?;
        self.on_off.lock().unwrap().push((endpoint, command));
        Ok(())
    }

    async fn window_covering(
        &self,
        endpoint: u8,
        command: WindowCoveringCommand,
    ) -> Result<(), ClusterError> {
        self.cluster_result()?;
        self.covering.lock().unwrap().push((endpoint, command));
        Ok(())
    }

    async fn read_attributes(
        &self,
        _endpoint: u8,
        _cluster_id: u16,
        attributes: &[&str],
    ) -> Result<Attributes, ClusterError> {
        self.cluster_result()?;
        let readable = self.readable.lock().unwrap();
        Ok(attributes
            .iter()
            .filter_map(|name| readable.get(*name).map(|v| ((*name).to_string(), v.clone())))
            .collect())
    }

    async fn write_attributes(
        &self,
        _endpoint: u8,
        cluster_id: u16,
        attributes: Attributes,
    ) -> Result<(), ClusterError> {
        self.cluster_result()?;
        self.written_attributes
            .lock()
            .unwrap()
            .push((cluster_id, attributes));
        Ok(())
    }

    async fn write_datapoint_enum(&self, datapoint: u8, value: u8) -> Result<(), ClusterError> {
        self.cluster_result()?;
        self.datapoints.lock().unwrap().push((datapoint, value));
        Ok(())
    }
}

#[async_trait]
impl CapabilityStore for FakeHost {
    async fn set_capability_value(
        &self,
        capability: &str,
        value: CapabilityValue,
    ) -> Result<(), DeviceError> {
        self.set_calls
            .lock()
            .unwrap()
            .push((capability.to_string(), value.clone()));
        if self.fail_capability_writes {
            return Err(DeviceError::Capability("store offline".to_string()));
        }
        self.values
            .lock()
            .unwrap()
            .insert(capability.to_string(), value);
        Ok(())
    }

    async fn capability_value(&self, capability: &str) -> Option<CapabilityValue> {
        self.values.lock().unwrap().get(capability).cloned()
    }

    async fn capabilities(&self) -> BTreeSet<String> {
        self.registered.lock().unwrap().clone()
    }

    async fn add_capability(&self, capability: &str) -> Result<(), DeviceError> {
        self.registered
            .lock()
            .unwrap()
            .insert(capability.to_string());
        Ok(())
    }

    async fn remove_capability(&self, capability: &str) -> Result<(), DeviceError> {
        self.registered.lock().unwrap().remove(capability);
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for FakeHost {
    async fn settings(&self) -> Settings {
        self.settings.lock().unwrap().clone()
    }

    async fn set_settings(&self, changes: Settings) -> Result<(), DeviceError> {
        self.settings.lock().unwrap().extend(changes);
        Ok(())
    }
}

#[async_trait]
impl FlowTriggers for FakeHost {
    async fn trigger(&self, card: TriggerCard) -> Result<(), DeviceError> {
        if let Some(gate) = &self.trigger_gate {
            gate.acquire()
                .await
                .map_err(|e| DeviceError::Flow(e.to_string()))?
                .forget();
        }
        self.triggers.lock().unwrap().push(card);
        if self.fail_triggers {
            return Err(DeviceError::Flow("flow engine busy".to_string()));
        }
        Ok(())
    }
}
