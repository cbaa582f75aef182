//! Multi-gang wall switch with scene buttons
//!
//! One [`SwitchDevice`] is created per paired device and lives for the
//! session. It owns the debounce state and a single delivery worker that
//! performs routed actions in arrival order. Both are released by
//! [`SwitchDevice::teardown`].

use crate::capability::{onoff_capability, onoff_endpoint, CapabilityValue};
use crate::config::SwitchConfig;
use crate::debounce::DebounceFilter;
use crate::error::DeviceError;
use crate::flow::{cards, parse_args, TriggerCard};
use crate::host::{DeviceContext, Settings};
use crate::router::{EventRouter, RouterAction};
use serde::Deserialize;
use serde_json::Value;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use zcl_frames::cluster::{basic_attrs, id};
use zcl_frames::{OnOffCommand, RawFrame};

/// Gang n's switch/scene mode is Tuya datapoint base + n
const MODE_DATAPOINT_BASE: u8 = 17;

#[derive(Debug, Deserialize)]
struct SetSwitchStateArgs {
    switch: Value,
    state: String,
}

#[derive(Debug, Deserialize)]
struct SwitchIsArgs {
    switch: Value,
}

/// Work queued for the delivery worker
enum Delivery {
    Actions(Vec<RouterAction>),
    /// Answered once everything queued before it has been delivered
    Flush(oneshot::Sender<()>),
}

struct DeliveryWorker {
    tx: mpsc::UnboundedSender<Delivery>,
    task: JoinHandle<()>,
}

enum WorkerState {
    /// No frame accepted yet
    Idle,
    Running(DeliveryWorker),
    Closed,
}

/// Session of one switch device
pub struct SwitchDevice {
    name: String,
    config: SwitchConfig,
    ctx: DeviceContext,
    router: EventRouter,
    debounce: DebounceFilter,
    worker: Mutex<WorkerState>,
}

impl SwitchDevice {
    #[must_use]
    pub fn new(name: impl Into<String>, config: SwitchConfig, ctx: DeviceContext) -> Self {
        Self {
            name: name.into(),
            router: EventRouter::new(config.endpoints()),
            debounce: DebounceFilter::new(config.debounce_window()),
            config,
            ctx,
            worker: Mutex::new(WorkerState::Idle),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn config(&self) -> &SwitchConfig {
        &self.config
    }

    /// Capabilities this device exposes
    #[must_use]
    pub fn capabilities(&self) -> Vec<String> {
        self.config.endpoints().map(onoff_capability).collect()
    }

    /// Start the session: read device identity
    ///
    /// A failed read is logged and the session continues with defaults.
    pub async fn init(&self) {
        tracing::info!(device = %self.name, "Initializing switch");
        match self
            .ctx
            .cluster
            .read_attributes(1, id::BASIC, &basic_attrs::INIT_SET)
            .await
        {
            Ok(attrs) => tracing::info!(device = %self.name, "Device attributes: {:?}", attrs),
            Err(e) => tracing::warn!(device = %self.name, "Error when reading device attributes: {}", e),
        }
        tracing::info!(
            device = %self.name,
            "Switch ready on endpoints {}..={}",
            self.config.first_endpoint,
            self.config.last_endpoint
        );
    }

    /// Capability listener for `onoff_<n>`
    pub async fn set_capability(
        &self,
        capability: &str,
        value: &CapabilityValue,
    ) -> Result<(), DeviceError> {
        let endpoint = onoff_endpoint(capability)
            .ok_or_else(|| DeviceError::UnknownCapability(capability.to_string()))?;
        let on = value.as_bool().ok_or_else(|| DeviceError::InvalidValue {
            capability: capability.to_string(),
            value: value.to_string(),
        })?;
        self.set_gang(endpoint, on).await
    }

    /// Switch one gang on or off
    pub async fn set_gang(&self, endpoint: u8, on: bool) -> Result<(), DeviceError> {
        if !self.config.contains(endpoint) {
            tracing::error!(device = %self.name, "Invalid endpoint: {}", endpoint);
            return Err(DeviceError::InvalidEndpoint(endpoint));
        }

        self.ctx
            .cluster
            .on_off(endpoint, OnOffCommand::for_state(on))
            .await
            .map_err(|e| {
                tracing::error!(device = %self.name, "Error setting onoff_{}: {}", endpoint, e);
                DeviceError::from(e)
            })
    }

    /// Handle a frame delivered by the transport
    pub fn handle_frame(&self, frame: &RawFrame) -> Vec<RouterAction> {
        self.handle_frame_at(frame, Instant::now())
    }

    /// Handle a frame as if it arrived at `now`
    ///
    /// Returns the routed actions; their delivery runs in the background.
    pub fn handle_frame_at(&self, frame: &RawFrame, now: Instant) -> Vec<RouterAction> {
        if frame.cluster_id != id::ON_OFF {
            tracing::debug!(
                device = %self.name,
                endpoint = frame.source_endpoint,
                "Received not an onoff/scene frame: cluster={:#06x} {:02X?} {:?}",
                frame.cluster_id,
                frame.payload.as_ref(),
                frame.meta
            );
            return Vec::new();
        }

        tracing::debug!(
            device = %self.name,
            endpoint = frame.source_endpoint,
            "Handling onoff/scene frame: {:02X?} {:?}",
            frame.payload.as_ref(),
            frame.meta
        );

        let event = frame.decode();
        let actions = self.router.route(&event, &self.debounce, now);
        if !actions.is_empty() {
            self.dispatch(actions.clone());
        }
        actions
    }

    /// Queue routed actions for the delivery worker without blocking the frame path
    ///
    /// The worker is started by the first accepted frame.
    fn dispatch(&self, actions: Vec<RouterAction>) {
        let mut worker = self.worker();
        if matches!(*worker, WorkerState::Idle) {
            *worker = WorkerState::Running(self.spawn_worker());
        }
        let WorkerState::Running(running) = &*worker else {
            tracing::debug!(device = %self.name, "Session closed, dropping {} actions", actions.len());
            return;
        };
        if running.tx.send(Delivery::Actions(actions)).is_err() {
            tracing::warn!(device = %self.name, "Delivery worker stopped, actions dropped");
        }
    }

    fn spawn_worker(&self) -> DeliveryWorker {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = self.ctx.clone();
        let name = self.name.clone();
        let task = tokio::spawn(async move {
            while let Some(delivery) = rx.recv().await {
                match delivery {
                    Delivery::Actions(actions) => {
                        for action in actions {
                            deliver(&ctx, &name, action).await;
                        }
                    }
                    Delivery::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });
        DeliveryWorker { tx, task }
    }

    /// Wait until every delivery queued so far has been performed
    ///
    /// Returns early if the session is torn down meanwhile.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        {
            let worker = self.worker();
            let WorkerState::Running(running) = &*worker else {
                return;
            };
            if running.tx.send(Delivery::Flush(done_tx)).is_err() {
                return;
            }
        }
        // The sender is dropped with the worker on teardown
        if done_rx.await.is_err() {
            tracing::debug!(device = %self.name, "Flush interrupted by teardown");
        }
    }

    /// Run an action card
    pub async fn run_action(&self, card: &str, args: &Value) -> Result<(), DeviceError> {
        let (endpoint, on) = if card == cards::SET_SWITCH_STATE {
            let args: SetSwitchStateArgs = parse_args(args)?;
            (parse_switch(&args.switch)?, args.state == "true")
        } else {
            parse_legacy_action(card).ok_or_else(|| DeviceError::UnknownCard(card.to_string()))?
        };

        tracing::info!(device = %self.name, "Executing action {} for switch {}", card, endpoint);
        self.set_gang(endpoint, on).await.map_err(|e| {
            tracing::error!(device = %self.name, "Error executing {} for switch {}: {}", card, endpoint, e);
            e
        })
    }

    /// Run a condition card
    pub async fn run_condition(&self, card: &str, args: &Value) -> Result<bool, DeviceError> {
        if card != cards::SWITCH_IS {
            return Err(DeviceError::UnknownCard(card.to_string()));
        }
        let args: SwitchIsArgs = parse_args(args)?;
        let endpoint = parse_switch(&args.switch)?;
        Ok(self
            .ctx
            .capabilities
            .capability_value(&onoff_capability(endpoint))
            .await
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }

    /// Apply changed settings
    ///
    /// `mode_<n>` selects whether gang n acts as a relay switch or a scene button.
    pub async fn on_settings(
        &self,
        new_settings: &Settings,
        changed_keys: &[String],
    ) -> Result<(), DeviceError> {
        tracing::info!(device = %self.name, "Settings were changed: {:?}", new_settings);
        for key in changed_keys {
            let Some(gang) = key.strip_prefix("mode_") else {
                continue;
            };
            let gang = gang
                .parse::<u8>()
                .map_err(|_| DeviceError::InvalidArgs(format!("bad mode setting {key}")))?;
            if !self.config.contains(gang) {
                tracing::error!(device = %self.name, "Invalid gang in {}: {}", key, gang);
                return Err(DeviceError::InvalidEndpoint(gang));
            }
            let datapoint = MODE_DATAPOINT_BASE
                .checked_add(gang)
                .ok_or(DeviceError::InvalidEndpoint(gang))?;
            let scene = new_settings
                .get(key)
                .and_then(Value::as_str)
                .is_some_and(|mode| mode.contains("scene"));

            match self
                .ctx
                .cluster
                .write_datapoint_enum(datapoint, u8::from(scene))
                .await
            {
                Ok(()) => tracing::info!(device = %self.name, "Successfully set {} (dp {})", key, datapoint),
                Err(e) => {
                    tracing::error!(device = %self.name, "Failed to set {}: {}", key, e);
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    /// End the session: stop the delivery worker and drop debounce history
    ///
    /// Queued deliveries are discarded and frames handled afterwards are
    /// routed but not delivered.
    pub fn teardown(&self) {
        let previous = std::mem::replace(&mut *self.worker(), WorkerState::Closed);
        if let WorkerState::Running(running) = previous {
            running.task.abort();
        }
        self.debounce.clear();
        tracing::info!(device = %self.name, "Switch session closed");
    }

    /// Number of debounce keys currently tracked
    #[must_use]
    pub fn debounce_len(&self) -> usize {
        self.debounce.len()
    }

    fn worker(&self) -> MutexGuard<'_, WorkerState> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Perform one routed action, logging failures
async fn deliver(ctx: &DeviceContext, device: &str, action: RouterAction) {
    match action {
        RouterAction::SetCapability { capability, value } => {
            tracing::debug!(device, "Setting capability {} to {}", capability, value);
            if let Err(e) = ctx
                .capabilities
                .set_capability_value(&capability, CapabilityValue::Bool(value))
                .await
            {
                tracing::warn!(device, "Error setting capability value for {}: {}", capability, e);
            }
        }
        RouterAction::NotifyStateChanged { endpoint, is_on } => {
            fire(ctx, device, TriggerCard::switch_state_changed(endpoint, is_on)).await;
            fire(ctx, device, TriggerCard::legacy_switch(endpoint, is_on)).await;
        }
        RouterAction::NotifySceneTriggered { endpoint } => {
            fire(ctx, device, TriggerCard::scene_triggered(endpoint)).await;
            fire(ctx, device, TriggerCard::legacy_scene(endpoint)).await;
        }
    }
}

async fn fire(ctx: &DeviceContext, device: &str, card: TriggerCard) {
    let name = card.card.clone();
    if let Err(e) = ctx.flow.trigger(card).await {
        tracing::warn!(device, card = %name, "Error triggering {}: {}", name, e);
    }
}

/// Switch id from a flow card argument ("2" or 2)
fn parse_switch(value: &Value) -> Result<u8, DeviceError> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64().and_then(|n| u8::try_from(n).ok()),
        _ => None,
    }
    .ok_or_else(|| DeviceError::InvalidArgs(format!("invalid switch: {value}")))
}

/// `set_onoff_<n>_<true|false>`
fn parse_legacy_action(card: &str) -> Option<(u8, bool)> {
    let (endpoint, state) = card.strip_prefix("set_onoff_")?.split_once('_')?;
    Some((endpoint.parse().ok()?, state.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::CapabilityStore;
    use crate::testing::FakeHost;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn device_with(host: FakeHost) -> (SwitchDevice, Arc<FakeHost>) {
        let host = Arc::new(host);
        (
            SwitchDevice::new("test switch", SwitchConfig::default(), host.context()),
            host,
        )
    }

    fn device() -> (SwitchDevice, Arc<FakeHost>) {
        device_with(FakeHost::default())
    }

    fn on_frame(endpoint: u8) -> RawFrame {
        RawFrame::new(endpoint, id::ON_OFF, vec![8, 0, 0, 0, 0, 0, 1])
    }

    #[tokio::test]
    async fn test_switch_press_debounced_end_to_end() {
        let (device, host) = device();
        let t0 = Instant::now();

        assert_eq!(device.handle_frame_at(&on_frame(1), t0).len(), 2);
        device.flush().await;
        assert_eq!(
            *host.set_calls.lock().unwrap(),
            vec![("onoff_1".to_string(), CapabilityValue::Bool(true))]
        );
        assert_eq!(
            host.trigger_names(),
            vec!["switch_state_changed", "onoff_1_true"]
        );

        assert!(device
            .handle_frame_at(&on_frame(1), t0 + Duration::from_millis(500))
            .is_empty());
        device.flush().await;
        assert_eq!(host.set_calls.lock().unwrap().len(), 1);

        assert_eq!(
            device
                .handle_frame_at(&on_frame(1), t0 + Duration::from_millis(1000))
                .len(),
            2
        );
        device.flush().await;
        assert_eq!(host.set_calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_scene_press_end_to_end() {
        let (device, host) = device();
        let t0 = Instant::now();
        let frame = RawFrame::new(2, id::ON_OFF, vec![1]);

        device.handle_frame_at(&frame, t0);
        device.handle_frame_at(&frame, t0 + Duration::from_millis(300));
        device.flush().await;

        let triggers = host.triggers.lock().unwrap().clone();
        assert_eq!(triggers.len(), 2);
        assert_eq!(triggers[0], TriggerCard::scene_triggered(2));
        assert_eq!(triggers[1].card, "scene_2_triggered");
        assert_eq!(triggers[1].tokens, json!({"scene": 2, "scene_name": "Scene 2"}));
        assert!(host.set_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_attribute_reports_and_other_clusters_ignored() {
        let (device, host) = device();
        let t0 = Instant::now();

        for ms in [0, 100, 5000] {
            let report = RawFrame::new(1, id::ON_OFF, vec![24, 0, 0, 0, 0, 0, 1]);
            assert!(device
                .handle_frame_at(&report, t0 + Duration::from_millis(ms))
                .is_empty());
        }
        let basic = RawFrame::new(1, id::BASIC, vec![8, 0, 0, 0, 0, 0, 1]);
        assert!(device.handle_frame_at(&basic, t0).is_empty());

        device.flush().await;
        assert!(host.set_calls.lock().unwrap().is_empty());
        assert!(host.triggers.lock().unwrap().is_empty());
        assert_eq!(device.debounce_len(), 0);
    }

    #[tokio::test]
    async fn test_out_of_range_endpoint_dropped() {
        let (device, host) = device();
        assert!(device.handle_frame_at(&on_frame(5), Instant::now()).is_empty());
        device.flush().await;
        assert!(host.set_calls.lock().unwrap().is_empty());
        assert_eq!(device.debounce_len(), 0);
    }

    #[tokio::test]
    async fn test_failed_delivery_keeps_debounce_acceptance() {
        let (device, host) = device_with(FakeHost {
            fail_capability_writes: true,
            fail_triggers: true,
            ..FakeHost::default()
        });
        let t0 = Instant::now();

        device.handle_frame_at(&on_frame(2), t0);
        device.flush().await;
        // Both trigger cards still attempted after the capability write failed
        assert_eq!(host.set_calls.lock().unwrap().len(), 1);
        assert_eq!(host.triggers.lock().unwrap().len(), 2);

        assert!(device
            .handle_frame_at(&on_frame(2), t0 + Duration::from_millis(200))
            .is_empty());
    }

    #[tokio::test]
    async fn test_capability_listener_sends_on_off() {
        let (device, host) = device();
        device
            .set_capability("onoff_2", &CapabilityValue::Bool(true))
            .await
            .unwrap();
        device
            .set_capability("onoff_3", &CapabilityValue::Bool(false))
            .await
            .unwrap();
        assert_eq!(
            *host.on_off.lock().unwrap(),
            vec![(2, OnOffCommand::On), (3, OnOffCommand::Off)]
        );

        assert!(matches!(
            device.set_capability("onoff_4", &CapabilityValue::Bool(true)).await,
            Err(DeviceError::InvalidEndpoint(4))
        ));
        assert!(matches!(
            device.set_capability("onoff_1", &CapabilityValue::Number(1.0)).await,
            Err(DeviceError::InvalidValue { .. })
        ));
    }

    #[tokio::test]
    async fn test_actions_and_condition() {
        let (device, host) = device();
        device
            .run_action(cards::SET_SWITCH_STATE, &json!({"switch": "1", "state": "true"}))
            .await
            .unwrap();
        device
            .run_action("set_onoff_3_false", &Value::Null)
            .await
            .unwrap();
        assert_eq!(
            *host.on_off.lock().unwrap(),
            vec![(1, OnOffCommand::On), (3, OnOffCommand::Off)]
        );
        assert!(matches!(
            device.run_action("dance", &Value::Null).await,
            Err(DeviceError::UnknownCard(_))
        ));

        assert!(!device
            .run_condition(cards::SWITCH_IS, &json!({"switch": "2"}))
            .await
            .unwrap());
        host
            .set_capability_value("onoff_2", CapabilityValue::Bool(true))
            .await
            .unwrap();
        assert!(device
            .run_condition(cards::SWITCH_IS, &json!({"switch": 2}))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_mode_settings_write_datapoints() {
        let (device, host) = device();
        let mut settings = Settings::new();
        settings.insert("mode_1".into(), json!("scene"));
        settings.insert("mode_2".into(), json!("switch"));
        settings.insert("label".into(), json!("hall"));

        device
            .on_settings(
                &settings,
                &["mode_1".to_string(), "mode_2".to_string(), "label".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(*host.datapoints.lock().unwrap(), vec![(18, 1), (19, 0)]);
    }

    #[tokio::test]
    async fn test_init_survives_failed_read() {
        let (device, _host) = device_with(FakeHost {
            fail_cluster: true,
            ..FakeHost::default()
        });
        device.init().await;
        assert_eq!(device.capabilities(), vec!["onoff_1", "onoff_2", "onoff_3"]);
    }

    #[tokio::test]
    async fn test_teardown_clears_debounce_state() {
        let (device, _host) = device();
        let t0 = Instant::now();
        device.handle_frame_at(&on_frame(1), t0);
        assert_eq!(device.debounce_len(), 1);

        device.teardown();
        assert_eq!(device.debounce_len(), 0);
        assert_eq!(device.handle_frame_at(&on_frame(1), t0).len(), 2);
    }

    #[tokio::test]
    async fn test_mode_setting_outside_gang_range_rejected() {
        let (device, host) = device();
        let mut settings = Settings::new();
        settings.insert("mode_5".into(), json!("scene"));

        let result = device.on_settings(&settings, &["mode_5".to_string()]).await;
        assert!(matches!(result, Err(DeviceError::InvalidEndpoint(5))));

        settings.insert("mode_0".into(), json!("scene"));
        let result = device.on_settings(&settings, &["mode_0".to_string()]).await;
        assert!(matches!(result, Err(DeviceError::InvalidEndpoint(0))));
        assert!(host.datapoints.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_deliveries_keep_frame_order_across_threads() {
        let t0 = Instant::now();
        for _ in 0..200 {
            let (device, host) = device();
            let off = RawFrame::new(1, id::ON_OFF, vec![8, 0, 0, 0, 0, 0, 0]);

            device.handle_frame_at(&on_frame(1), t0);
            device.handle_frame_at(&off, t0 + Duration::from_millis(50));
            device.flush().await;

            assert_eq!(
                *host.set_calls.lock().unwrap(),
                vec![
                    ("onoff_1".to_string(), CapabilityValue::Bool(true)),
                    ("onoff_1".to_string(), CapabilityValue::Bool(false)),
                ]
            );
            assert_eq!(
                host.trigger_names(),
                vec![
                    "switch_state_changed",
                    "onoff_1_true",
                    "switch_state_changed",
                    "onoff_1_false"
                ]
            );
            assert_eq!(
                host.values.lock().unwrap()["onoff_1"],
                CapabilityValue::Bool(false)
            );
        }
    }

    #[tokio::test]
    async fn test_teardown_during_flush_stops_deliveries() {
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let (device, host) = device_with(FakeHost {
            trigger_gate: Some(gate.clone()),
            ..FakeHost::default()
        });
        let device = Arc::new(device);
        let t0 = Instant::now();

        device.handle_frame_at(&on_frame(1), t0);
        device.handle_frame_at(&on_frame(2), t0);
        let flusher = tokio::spawn({
            let device = device.clone();
            async move { device.flush().await }
        });
        // Let the worker block on the first trigger and the flush start waiting
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }

        device.teardown();
        flusher.await.unwrap();

        gate.add_permits(16);
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert!(host.triggers.lock().unwrap().is_empty());
        assert!(host.set_calls.lock().unwrap().len() <= 1);

        // Frames after teardown are routed but never delivered
        assert_eq!(
            device
                .handle_frame_at(&on_frame(3), t0 + Duration::from_secs(5))
                .len(),
            2
        );
        device.flush().await;
        assert!(host.triggers.lock().unwrap().is_empty());
    }

    #[test]
    fn test_legacy_action_names() {
        assert_eq!(parse_legacy_action("set_onoff_2_true"), Some((2, true)));
        assert_eq!(parse_legacy_action("set_onoff_x_true"), None);
        assert_eq!(parse_legacy_action("set_switch_state"), None);
    }
}
