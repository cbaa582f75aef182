//! Flow cards fired and answered by the drivers

use crate::error::DeviceError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Card ids
pub mod cards {
    pub const SWITCH_STATE_CHANGED: &str = "switch_state_changed";
    pub const SCENE_TRIGGERED: &str = "scene_triggered_configurable";
    pub const SWITCH_IS: &str = "switch_is";
    pub const SET_SWITCH_STATE: &str = "set_switch_state";
    pub const MOVE_OPEN: &str = "move_open";
    pub const MOVE_CLOSE: &str = "move_close";
}

/// A trigger card firing with its tokens and matching state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerCard {
    pub card: String,
    #[serde(default)]
    pub tokens: Value,
    #[serde(default)]
    pub state: Value,
}

impl TriggerCard {
    fn new(card: impl Into<String>, tokens: Value, state: Value) -> Self {
        Self {
            card: card.into(),
            tokens,
            state,
        }
    }

    /// Configurable card fired on every accepted switch toggle
    #[must_use]
    pub fn switch_state_changed(endpoint: u8, is_on: bool) -> Self {
        Self::new(
            cards::SWITCH_STATE_CHANGED,
            json!({ "state": is_on }),
            json!({ "switch": endpoint.to_string(), "state": is_on }),
        )
    }

    /// Per-gang card `onoff_<n>_<true|false>`
    #[must_use]
    pub fn legacy_switch(endpoint: u8, is_on: bool) -> Self {
        Self::new(
            format!("onoff_{endpoint}_{is_on}"),
            Value::Null,
            Value::Null,
        )
    }

    /// Configurable card fired on every accepted scene press
    #[must_use]
    pub fn scene_triggered(endpoint: u8) -> Self {
        Self::new(
            cards::SCENE_TRIGGERED,
            json!({}),
            json!({ "scene": endpoint.to_string() }),
        )
    }

    /// Per-gang card `scene_<n>_triggered`
    #[must_use]
    pub fn legacy_scene(endpoint: u8) -> Self {
        Self::new(
            format!("scene_{endpoint}_triggered"),
            json!({ "scene": endpoint, "scene_name": format!("Scene {endpoint}") }),
            Value::Null,
        )
    }
}

#[derive(Debug, Deserialize)]
struct SwitchStateArgs {
    switch: String,
    state: String,
}

#[derive(Debug, Deserialize)]
struct SwitchStateState {
    switch: String,
    state: bool,
}

#[derive(Debug, Deserialize)]
struct SceneArgs {
    scene: String,
}

/// Run listener for trigger cards: does a flow configured with `args` fire for `fired`?
///
/// Cards without arguments always match.
pub fn trigger_matches(args: &Value, fired: &TriggerCard) -> Result<bool, DeviceError> {
    match fired.card.as_str() {
        cards::SWITCH_STATE_CHANGED => {
            let args: SwitchStateArgs = parse_args(args)?;
            let state: SwitchStateState = serde_json::from_value(fired.state.clone())?;
            Ok(args.switch == state.switch && args.state == state.state.to_string())
        }
        cards::SCENE_TRIGGERED => {
            let args: SceneArgs = parse_args(args)?;
            let state: SceneArgs = serde_json::from_value(fired.state.clone())?;
            Ok(args.scene == state.scene)
        }
        _ => Ok(true),
    }
}

/// Deserialize flow card arguments
pub fn parse_args<T: DeserializeOwned>(args: &Value) -> Result<T, DeviceError> {
    serde_json::from_value(args.clone()).map_err(|e| DeviceError::InvalidArgs(e.to_string()))
}
