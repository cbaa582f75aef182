//! ZCL (Zigbee Cluster Library) definitions used by the drivers

use serde::{Deserialize, Serialize};

/// ZCL cluster IDs
pub mod id {
    pub const BASIC: u16 = 0x0000;
    pub const ON_OFF: u16 = 0x0006;
    pub const WINDOW_COVERING: u16 = 0x0102;
    /// Tuya manufacturer-specific datapoint cluster
    pub const TUYA_SPECIFIC: u16 = 0xEF00;
}

/// Leading payload byte of frames delivered on the On/Off cluster
pub mod frame_kind {
    /// Attribute report duplicating state already delivered through the report path
    pub const ATTRIBUTE_REPORT: u8 = 0x18;
    /// Physical relay toggle
    pub const SWITCH_TOGGLE: u8 = 0x08;
    /// Momentary scene button press
    pub const SCENE_TRIGGER: u8 = 0x01;
    /// Offset of the on/off flag inside a switch toggle payload
    pub const SWITCH_STATE_OFFSET: usize = 6;
}

/// Basic cluster attributes read at device init
pub mod basic_attrs {
    pub const MANUFACTURER_NAME: &str = "manufacturerName";
    pub const ZCL_VERSION: &str = "zclVersion";
    pub const APP_VERSION: &str = "appVersion";
    pub const MODEL_ID: &str = "modelId";
    pub const POWER_SOURCE: &str = "powerSource";
    pub const ATTRIBUTE_REPORTING_STATUS: &str = "attributeReportingStatus";

    /// Attributes requested from endpoint 1 when a switch session starts
    pub const INIT_SET: [&str; 6] = [
        MANUFACTURER_NAME,
        ZCL_VERSION,
        APP_VERSION,
        MODEL_ID,
        POWER_SOURCE,
        ATTRIBUTE_REPORTING_STATUS,
    ];
}

/// Window Covering cluster attributes (including the Tuya extensions)
pub mod window_covering_attrs {
    pub const CURRENT_POSITION_LIFT_PERCENTAGE: &str = "currentPositionLiftPercentage";
    pub const WINDOW_COVER_STATUS: &str = "windowCoverStatus";
    pub const CALIBRATION_TIME: &str = "calibrationTime";
    pub const CALIBRATION_MODE: &str = "calibrationMode";
    pub const MOTOR_REVERSAL: &str = "motorReversal";
}

/// On/Off cluster commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum OnOffCommand {
    Off = 0x00,
    On = 0x01,
    Toggle = 0x02,
}

impl OnOffCommand {
    /// Command that drives the relay to `on`
    #[must_use]
    pub fn for_state(on: bool) -> Self {
        if on {
            Self::On
        } else {
            Self::Off
        }
    }
}

/// Window Covering cluster commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WindowCoveringCommand {
    UpOpen,
    DownClose,
    Stop,
    /// Lift percentage, 0-100
    GoToLiftPercentage { percentage: u8 },
}

impl WindowCoveringCommand {
    #[must_use]
    pub fn command_id(&self) -> u8 {
        match self {
            Self::UpOpen => 0x00,
            Self::DownClose => 0x01,
            Self::Stop => 0x02,
            Self::GoToLiftPercentage { .. } => 0x05,
        }
    }

    #[must_use]
    pub fn payload(&self) -> Vec<u8> {
        match self {
            Self::GoToLiftPercentage { percentage } => vec![*percentage],
            _ => Vec::new(),
        }
    }
}
