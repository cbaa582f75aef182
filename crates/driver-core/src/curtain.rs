//! Curtain motor on the Window Covering cluster

use crate::bridge::{cover_status_state, LiftBridge, LiftReport};
use crate::capability::{
    apply_diff, reconcile, CapabilityValue, WINDOWCOVERINGS_SET, WINDOWCOVERINGS_STATE,
};
use crate::config::CurtainConfig;
use crate::error::DeviceError;
use crate::flow::cards;
use crate::host::{Attributes, DeviceContext, Settings};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::time::Instant;
use zcl_frames::cluster::{id, window_covering_attrs as attrs};
use zcl_frames::WindowCoveringCommand;

pub const SETTING_REVERSE: &str = "reverse";
pub const SETTING_CALIBRATION_MODE: &str = "calibration_mode";
pub const SETTING_MOVETIME: &str = "movetime";
pub const SETTING_HAS_STATE: &str = "has_state";

/// Session of one curtain motor
pub struct CurtainDevice {
    name: String,
    config: CurtainConfig,
    ctx: DeviceContext,
    lift: LiftBridge,
}

impl CurtainDevice {
    #[must_use]
    pub fn new(name: impl Into<String>, config: CurtainConfig, ctx: DeviceContext) -> Self {
        Self {
            name: name.into(),
            lift: LiftBridge::new(config.report_echo_window()),
            config,
            ctx,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn config(&self) -> &CurtainConfig {
        &self.config
    }

    #[must_use]
    pub fn lift(&self) -> &LiftBridge {
        &self.lift
    }

    /// Start the session
    ///
    /// Registers the optional state capability and pulls calibration time and
    /// motor direction from the device into the settings.
    pub async fn init(&self) {
        tracing::info!(device = %self.name, "Initializing curtain");
        let settings = self.ctx.settings.settings().await;
        self.lift.set_inverted(setting_bool(&settings, SETTING_REVERSE));
        self.configure_state_capability(setting_bool(&settings, SETTING_HAS_STATE))
            .await;

        let device_attrs = match self
            .ctx
            .cluster
            .read_attributes(
                self.config.endpoint,
                id::WINDOW_COVERING,
                &[attrs::CALIBRATION_TIME, attrs::MOTOR_REVERSAL],
            )
            .await
        {
            Ok(device_attrs) => device_attrs,
            Err(e) => {
                tracing::warn!(device = %self.name, "Error when reading settings from device: {}", e);
                return;
            }
        };

        let mut changes = Settings::new();
        if let Some(time) = device_attrs.get(attrs::CALIBRATION_TIME).and_then(Value::as_f64) {
            changes.insert(SETTING_MOVETIME.to_string(), json!(time / 10.0));
        }
        if let Some(reversal) = device_attrs.get(attrs::MOTOR_REVERSAL).and_then(Value::as_str) {
            let reversed = reversal == "On";
            self.lift.set_inverted(reversed);
            changes.insert(SETTING_REVERSE.to_string(), json!(reversed));
        }
        if changes.is_empty() {
            return;
        }
        if let Err(e) = self.ctx.settings.set_settings(changes).await {
            tracing::warn!(device = %self.name, "Failed to store device settings: {}", e);
        }
    }

    /// Add or remove `windowcoverings_state` to match `has_state`
    ///
    /// Returns the number of registration changes that failed.
    pub async fn configure_state_capability(&self, has_state: bool) -> usize {
        let managed: BTreeSet<String> = [WINDOWCOVERINGS_SET, WINDOWCOVERINGS_STATE]
            .into_iter()
            .map(String::from)
            .collect();
        let mut desired = BTreeSet::from([WINDOWCOVERINGS_SET.to_string()]);
        if has_state {
            desired.insert(WINDOWCOVERINGS_STATE.to_string());
        }

        let registered = self.ctx.capabilities.capabilities().await;
        let diff = reconcile(&desired, &registered, &managed);
        if diff.is_empty() {
            return 0;
        }
        tracing::debug!(device = %self.name, "Reconciling capabilities: {:?}", diff);
        apply_diff(self.ctx.capabilities.as_ref(), &diff).await
    }

    /// Capability listener for `windowcoverings_set`
    pub async fn set_capability(
        &self,
        capability: &str,
        value: &CapabilityValue,
    ) -> Result<(), DeviceError> {
        if capability != WINDOWCOVERINGS_SET {
            return Err(DeviceError::UnknownCapability(capability.to_string()));
        }
        let value = value.as_number().ok_or_else(|| DeviceError::InvalidValue {
            capability: capability.to_string(),
            value: value.to_string(),
        })?;
        self.set_lift_at(value, Instant::now()).await
    }

    /// Move to a lift fraction as if requested at `now`
    pub async fn set_lift_at(&self, value: f64, now: Instant) -> Result<(), DeviceError> {
        let set = self.lift.to_device(value, now)?;
        tracing::debug!(
            device = %self.name,
            "set windowcoverings_set: {} -> {:?}",
            value,
            set.command
        );
        self.send(set.command).await?;

        if let Some(immediate) = set.immediate {
            self.ctx
                .capabilities
                .set_capability_value(WINDOWCOVERINGS_SET, CapabilityValue::Number(immediate))
                .await?;
        }
        Ok(())
    }

    /// Handle an attribute report from the Window Covering cluster
    pub async fn handle_report(&self, attribute: &str, value: &Value) -> Option<CapabilityValue> {
        self.handle_report_at(attribute, value, Instant::now()).await
    }

    /// Handle an attribute report as if it arrived at `now`
    ///
    /// Returns the capability value written, if any.
    pub async fn handle_report_at(
        &self,
        attribute: &str,
        value: &Value,
        now: Instant,
    ) -> Option<CapabilityValue> {
        let (capability, update) = match attribute {
            attrs::CURRENT_POSITION_LIFT_PERCENTAGE => {
                let Some(raw) = lift_percentage(value) else {
                    tracing::warn!(device = %self.name, "Lift report is not a whole percentage: {}", value);
                    return None;
                };
                match self.lift.from_device(raw, now) {
                    LiftReport::Value(v) => (WINDOWCOVERINGS_SET, CapabilityValue::Number(v)),
                    LiftReport::Suppressed => {
                        tracing::debug!(device = %self.name, "Suppressed lift report {} after local set", raw);
                        return None;
                    }
                    LiftReport::Invalid => {
                        tracing::warn!(device = %self.name, "Lift report out of range: {}", raw);
                        return None;
                    }
                }
            }
            attrs::WINDOW_COVER_STATUS => {
                let registered = self.ctx.capabilities.capabilities().await;
                if !registered.contains(WINDOWCOVERINGS_STATE) {
                    return None;
                }
                let state = value.as_str().and_then(cover_status_state)?;
                (WINDOWCOVERINGS_STATE, CapabilityValue::from(state))
            }
            _ => {
                tracing::debug!(device = %self.name, "Ignoring report {} = {}", attribute, value);
                return None;
            }
        };

        match self
            .ctx
            .capabilities
            .set_capability_value(capability, update.clone())
            .await
        {
            Ok(()) => Some(update),
            Err(e) => {
                tracing::warn!(device = %self.name, capability, "Error setting capability value: {}", e);
                None
            }
        }
    }

    /// Apply changed settings
    ///
    /// Stops at the first failure, which is logged rather than returned.
    pub async fn on_settings(&self, new_settings: &Settings, changed_keys: &[String]) {
        if let Err(e) = self.apply_settings(new_settings, changed_keys).await {
            tracing::error!(device = %self.name, "Error during setting change: {}", e);
        }
    }

    async fn apply_settings(
        &self,
        new_settings: &Settings,
        changed_keys: &[String],
    ) -> Result<(), DeviceError> {
        let changed = |key: &str| changed_keys.iter().any(|k| k == key);

        if changed(SETTING_REVERSE) {
            let reversed = setting_bool(new_settings, SETTING_REVERSE);
            self.write(attrs::MOTOR_REVERSAL, json!(if reversed { "On" } else { "Off" }))
                .await?;
            self.lift.set_inverted(reversed);
        }

        if changed(SETTING_CALIBRATION_MODE) {
            let calibrating = setting_bool(new_settings, SETTING_CALIBRATION_MODE);
            self.write(
                attrs::CALIBRATION_MODE,
                json!(if calibrating { "Start" } else { "End" }),
            )
            .await?;
        }

        if changed(SETTING_MOVETIME) {
            let movetime = new_settings
                .get(SETTING_MOVETIME)
                .and_then(Value::as_f64)
                .ok_or_else(|| DeviceError::InvalidArgs("movetime must be a number".to_string()))?;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let calibration_time = (movetime * 10.0).round() as u64;
            self.write(attrs::CALIBRATION_TIME, json!(calibration_time))
                .await?;
        }

        if changed(SETTING_HAS_STATE) {
            self.configure_state_capability(setting_bool(new_settings, SETTING_HAS_STATE))
                .await;
        }
        Ok(())
    }

    /// Run an action card
    pub async fn run_action(&self, card: &str, _args: &Value) -> Result<(), DeviceError> {
        let command = match card {
            cards::MOVE_OPEN => WindowCoveringCommand::UpOpen,
            cards::MOVE_CLOSE => WindowCoveringCommand::DownClose,
            _ => return Err(DeviceError::UnknownCard(card.to_string())),
        };
        self.send(command).await
    }

    /// End the session
    pub fn teardown(&self) {
        self.lift.echo().disarm();
        tracing::info!(device = %self.name, "Curtain Module removed");
    }

    async fn send(&self, command: WindowCoveringCommand) -> Result<(), DeviceError> {
        self.ctx
            .cluster
            .window_covering(self.config.endpoint, command)
            .await
            .map_err(|e| {
                tracing::error!(device = %self.name, "Window covering command {:?} failed: {}", command, e);
                DeviceError::from(e)
            })
    }

    async fn write(&self, attribute: &str, value: Value) -> Result<(), DeviceError> {
        let mut attributes = Attributes::new();
        attributes.insert(attribute.to_string(), value);
        self.ctx
            .cluster
            .write_attributes(self.config.endpoint, id::WINDOW_COVERING, attributes)
            .await?;
        Ok(())
    }
}

/// Lift percentage from a report; whole-number floats such as `40.0` are accepted
fn lift_percentage(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && (-1.0..=101.0).contains(f))
            .map(|f| f as i64)
    })
}

fn setting_bool(settings: &Settings, key: &str) -> bool {
    settings.get(key).and_then(Value::as_bool).unwrap_or(false)
}
