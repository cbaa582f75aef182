//! Device drivers for Zigbee wall switches and curtain motors
//!
//! The switch driver turns raw On/Off frames into capability updates and flow
//! triggers through a debounce filter and event router. The curtain driver
//! bridges the lift slider to the Window Covering cluster. Both talk to the
//! host only through the traits in [`host`].

pub mod bridge;
pub mod capability;
pub mod config;
pub mod curtain;
pub mod debounce;
pub mod error;
pub mod flow;
pub mod host;
pub mod router;
pub mod switch;

#[cfg(test)]
mod testing;

pub use bridge::{cover_status_state, EchoSuppressor, LiftBridge, LiftReport, LiftSet};
pub use capability::{reconcile, CapabilityDiff, CapabilityValue};
pub use config::{CurtainConfig, SwitchConfig};
pub use curtain::CurtainDevice;
pub use debounce::{DebounceFilter, DebounceKey, Discriminant};
pub use error::{ClusterError, DeviceError};
pub use flow::{trigger_matches, TriggerCard};
pub use host::{
    Attributes, CapabilityStore, ClusterClient, DeviceContext, FlowTriggers, Settings,
    SettingsStore,
};
pub use router::{EventRouter, RouterAction};
pub use switch::SwitchDevice;
