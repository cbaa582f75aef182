//! Raw On/Off cluster frames and their classification

use crate::cluster::frame_kind;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Arrival context attached by the transport. Logged, never interpreted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameMeta {
    /// Link quality indicator (0-255)
    #[serde(default)]
    pub lqi: Option<u8>,
    /// Received signal strength in dBm
    #[serde(default)]
    pub rssi: Option<i8>,
}

/// A frame as delivered by the host transport
///
/// Frame layout on the On/Off cluster:
/// ```text
/// [Kind: 1 byte] (0x18 report, 0x08 switch toggle, 0x01 scene press)
/// [..5 bytes..]
/// [State: 1 byte] (switch toggles only, 1 = on)
/// [..]
/// ```
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub source_endpoint: u8,
    pub cluster_id: u16,
    pub payload: Bytes,
    pub meta: FrameMeta,
}

impl RawFrame {
    #[must_use]
    pub fn new(source_endpoint: u8, cluster_id: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            source_endpoint,
            cluster_id,
            payload: payload.into(),
            meta: FrameMeta::default(),
        }
    }

    #[must_use]
    pub fn with_meta(mut self, meta: FrameMeta) -> Self {
        self.meta = meta;
        self
    }

    /// Classify this frame's payload
    #[must_use]
    pub fn decode(&self) -> DecodedEvent {
        let event = decode(self.source_endpoint, &self.payload);
        tracing::trace!(
            endpoint = self.source_endpoint,
            cluster = self.cluster_id,
            "Decoded {:02X?} as {:?}",
            self.payload.as_ref(),
            event
        );
        event
    }
}

/// Why a payload could not be classified
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeAnomaly {
    #[error("empty payload")]
    Empty,

    #[error("unknown frame kind: {0:#04X}")]
    UnknownKind(u8),

    #[error("switch frame too short: {0} bytes")]
    TruncatedSwitch(usize),
}

/// Event kinds that take part in debouncing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventKind {
    SwitchToggle = frame_kind::SWITCH_TOGGLE,
    SceneTrigger = frame_kind::SCENE_TRIGGER,
}

/// Classified frame, exactly one per raw frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedEvent {
    /// Kept for diagnostics only
    AttributeReport { endpoint: u8 },
    SwitchToggle { endpoint: u8, is_on: bool },
    SceneTrigger { endpoint: u8 },
    Unrecognized {
        endpoint: u8,
        raw: Bytes,
        anomaly: DecodeAnomaly,
    },
}

impl DecodedEvent {
    #[must_use]
    pub fn endpoint(&self) -> u8 {
        match self {
            Self::AttributeReport { endpoint }
            | Self::SwitchToggle { endpoint, .. }
            | Self::SceneTrigger { endpoint }
            | Self::Unrecognized { endpoint, .. } => *endpoint,
        }
    }

    #[must_use]
    pub fn kind(&self) -> Option<EventKind> {
        match self {
            Self::SwitchToggle { .. } => Some(EventKind::SwitchToggle),
            Self::SceneTrigger { .. } => Some(EventKind::SceneTrigger),
            _ => None,
        }
    }
}

/// Classify an On/Off cluster payload received on `endpoint`
///
/// Pure and total: payloads of unknown shape become `Unrecognized`.
#[must_use]
pub fn decode(endpoint: u8, payload: &[u8]) -> DecodedEvent {
    let unrecognized = |anomaly| DecodedEvent::Unrecognized {
        endpoint,
        raw: Bytes::copy_from_slice(payload),
        anomaly,
    };

    let Some(&kind) = payload.first() else {
        return unrecognized(DecodeAnomaly::Empty);
    };

    match kind {
        frame_kind::ATTRIBUTE_REPORT => DecodedEvent::AttributeReport { endpoint },
        frame_kind::SWITCH_TOGGLE => match payload.get(frame_kind::SWITCH_STATE_OFFSET) {
            Some(&state) => DecodedEvent::SwitchToggle {
                endpoint,
                is_on: state == 1,
            },
            None => unrecognized(DecodeAnomaly::TruncatedSwitch(payload.len())),
        },
        frame_kind::SCENE_TRIGGER => DecodedEvent::SceneTrigger { endpoint },
        other => unrecognized(DecodeAnomaly::UnknownKind(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_ignores_trailing_bytes() {
        assert_eq!(decode(1, &[0x18]), DecodedEvent::AttributeReport { endpoint: 1 });
        assert_eq!(
            decode(2, &[0x18, 0x42, 0x0A, 0x00, 0x00, 0x10, 0x01]),
            DecodedEvent::AttributeReport { endpoint: 2 }
        );
    }

    #[test]
    fn test_switch_state_read_from_seventh_byte() {
        let on = decode(1, &[0x08, 0, 0, 0, 0, 0, 1]);
        assert_eq!(on, DecodedEvent::SwitchToggle { endpoint: 1, is_on: true });

        let off = decode(1, &[0x08, 1, 1, 1, 1, 1, 0, 1]);
        assert_eq!(off, DecodedEvent::SwitchToggle { endpoint: 1, is_on: false });

        // Only exactly 1 means on
        let other = decode(3, &[0x08, 0, 0, 0, 0, 0, 2]);
        assert_eq!(other, DecodedEvent::SwitchToggle { endpoint: 3, is_on: false });
    }

    #[test]
    fn test_short_switch_frame_is_unrecognized() {
        for len in 1..7 {
            let mut payload = vec![0u8; len];
            payload[0] = 0x08;
            match decode(1, &payload) {
                DecodedEvent::Unrecognized { anomaly, raw, .. } => {
                    assert_eq!(anomaly, DecodeAnomaly::TruncatedSwitch(len));
                    assert_eq!(raw.as_ref(), payload.as_slice());
                }
                other => panic!("expected unrecognized, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_scene_frame() {
        assert_eq!(decode(2, &[0x01]), DecodedEvent::SceneTrigger { endpoint: 2 });
        assert_eq!(decode(2, &[0x01]).kind(), Some(EventKind::SceneTrigger));
    }

    #[test]
    fn test_unknown_and_empty() {
        assert!(matches!(
            decode(1, &[0x7F, 0x00]),
            DecodedEvent::Unrecognized {
                anomaly: DecodeAnomaly::UnknownKind(0x7F),
                ..
            }
        ));
        assert!(matches!(
            decode(1, &[]),
            DecodedEvent::Unrecognized {
                anomaly: DecodeAnomaly::Empty,
                ..
            }
        ));
    }

    /// Every first byte at every length up to 16, with pseudo-random tails
    fn payloads() -> Vec<Vec<u8>> {
        let mut seed: u32 = 0x2545_F491;
        let mut out = Vec::new();
        for len in 1..=16 {
            for kind in 0..=255u8 {
                for _ in 0..4 {
                    let mut payload = Vec::with_capacity(len);
                    payload.push(kind);
                    for _ in 1..len {
                        seed ^= seed << 13;
                        seed ^= seed >> 17;
                        seed ^= seed << 5;
                        payload.push(seed.to_le_bytes()[0]);
                    }
                    out.push(payload);
                }
            }
        }
        out
    }

    #[test]
    fn test_decode_classifies_every_payload() {
        for (i, payload) in payloads().iter().enumerate() {
            let endpoint = (i % 8) as u8;
            let event = decode(endpoint, payload);
            assert_eq!(event.endpoint(), endpoint);

            match payload[0] {
                0x18 => assert_eq!(event, DecodedEvent::AttributeReport { endpoint }),
                0x01 => assert_eq!(event, DecodedEvent::SceneTrigger { endpoint }),
                0x08 if payload.len() >= 7 => assert_eq!(
                    event,
                    DecodedEvent::SwitchToggle {
                        endpoint,
                        is_on: payload[6] == 1
                    }
                ),
                0x08 => assert_eq!(
                    event,
                    DecodedEvent::Unrecognized {
                        endpoint,
                        raw: Bytes::copy_from_slice(payload),
                        anomaly: DecodeAnomaly::TruncatedSwitch(payload.len()),
                    }
                ),
                other => assert_eq!(
                    event,
                    DecodedEvent::Unrecognized {
                        endpoint,
                        raw: Bytes::copy_from_slice(payload),
                        anomaly: DecodeAnomaly::UnknownKind(other),
                    }
                ),
            }
        }
    }

    #[test]
    fn test_switch_state_for_every_seventh_byte() {
        for state in 0..=255u8 {
            for extra in 0..6 {
                let mut payload = vec![0x08, 0xAA, 0x55, 0x01, 0x01, 0x01, state];
                payload.extend(std::iter::repeat(0x01).take(extra));
                assert_eq!(
                    decode(1, &payload),
                    DecodedEvent::SwitchToggle {
                        endpoint: 1,
                        is_on: state == 1
                    },
                    "payload {payload:02X?}"
                );
            }
        }
    }

    #[test]
    fn test_raw_frame_decode_uses_source_endpoint() {
        let frame = RawFrame::new(3, crate::cluster::id::ON_OFF, vec![0x01]);
        assert_eq!(frame.decode().endpoint(), 3);
    }
}
