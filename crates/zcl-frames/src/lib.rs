//! Zigbee cluster frame vocabulary for the switch and curtain drivers
//!
//! This crate classifies raw On/Off cluster frames delivered by the host
//! transport and builds the cluster-specific command frames the drivers send.

pub mod cluster;
pub mod frame;
pub mod zcl;

pub use cluster::{OnOffCommand, WindowCoveringCommand};
pub use frame::{decode, DecodeAnomaly, DecodedEvent, EventKind, FrameMeta, RawFrame};
pub use zcl::{ProtocolError, ZclFrame};
