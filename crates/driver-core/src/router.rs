//! Event router: decoded On/Off frames to capability updates and flow notifications

use crate::capability::onoff_capability;
use crate::debounce::{DebounceFilter, DebounceKey};
use serde::Serialize;
use std::ops::RangeInclusive;
use std::time::Instant;
use zcl_frames::DecodedEvent;

/// Effects requested by the router, delivered by the device session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RouterAction {
    /// Write a gang's on/off capability
    SetCapability { capability: String, value: bool },
    /// A gang changed state physically
    NotifyStateChanged { endpoint: u8, is_on: bool },
    /// A scene button was pressed
    NotifySceneTriggered { endpoint: u8 },
}

/// Routes decoded frames for one device
#[derive(Debug, Clone)]
pub struct EventRouter {
    endpoints: RangeInclusive<u8>,
}

impl EventRouter {
    #[must_use]
    pub fn new(endpoints: RangeInclusive<u8>) -> Self {
        Self { endpoints }
    }

    #[must_use]
    pub fn endpoints(&self) -> &RangeInclusive<u8> {
        &self.endpoints
    }

    /// Decide what a decoded event does
    ///
    /// An empty result means the event was dropped. Acceptance is recorded in
    /// `debounce` before anything is delivered, so a failed delivery never
    /// turns a later duplicate into a new event.
    pub fn route(
        &self,
        event: &DecodedEvent,
        debounce: &DebounceFilter,
        now: Instant,
    ) -> Vec<RouterAction> {
        match event {
            DecodedEvent::AttributeReport { endpoint } => {
                tracing::debug!(endpoint, "Ignoring attribute report onoff/scene frame");
                Vec::new()
            }
            DecodedEvent::SwitchToggle { endpoint, is_on } => {
                if !self.endpoints.contains(endpoint) {
                    tracing::warn!(
                        endpoint,
                        "Unexpected endpoint for onoff frame (expected {}..={})",
                        self.endpoints.start(),
                        self.endpoints.end()
                    );
                    return Vec::new();
                }
                if !debounce.should_accept(DebounceKey::switch(*endpoint, *is_on), now) {
                    tracing::debug!(endpoint, is_on, "Debouncing switch frame");
                    return Vec::new();
                }
                tracing::debug!(endpoint, is_on, "Handling switch frame");
                vec![
                    RouterAction::SetCapability {
                        capability: onoff_capability(*endpoint),
                        value: *is_on,
                    },
                    RouterAction::NotifyStateChanged {
                        endpoint: *endpoint,
                        is_on: *is_on,
                    },
                ]
            }
            DecodedEvent::SceneTrigger { endpoint } => {
                if !debounce.should_accept(DebounceKey::scene(*endpoint), now) {
                    tracing::debug!(endpoint, "Debouncing scene frame");
                    return Vec::new();
                }
                tracing::debug!(endpoint, "Handling scene frame");
                vec![RouterAction::NotifySceneTriggered {
                    endpoint: *endpoint,
                }]
            }
            DecodedEvent::Unrecognized {
                endpoint,
                raw,
                anomaly,
            } => {
                tracing::warn!(
                    endpoint,
                    "Unexpected onoff/scene frame ({}): {:02X?}",
                    anomaly,
                    raw.as_ref()
                );
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use zcl_frames::decode;

    fn setup() -> (EventRouter, DebounceFilter, Instant) {
        (
            EventRouter::new(1..=3),
            DebounceFilter::new(Duration::from_millis(900)),
            Instant::now(),
        )
    }

    #[test]
    fn test_switch_toggle_sets_capability_and_notifies() {
        let (router, filter, t0) = setup();
        let event = decode(1, &[8, 0, 0, 0, 0, 0, 1]);

        assert_eq!(
            router.route(&event, &filter, t0),
            vec![
                RouterAction::SetCapability {
                    capability: "onoff_1".to_string(),
                    value: true,
                },
                RouterAction::NotifyStateChanged {
                    endpoint: 1,
                    is_on: true,
                },
            ]
        );
        assert!(router
            .route(&event, &filter, t0 + Duration::from_millis(500))
            .is_empty());
        assert_eq!(
            router
                .route(&event, &filter, t0 + Duration::from_millis(1000))
                .len(),
            2
        );
    }

    #[test]
    fn test_scene_presses_collapse() {
        let (router, filter, t0) = setup();
        let event = decode(2, &[1]);

        assert_eq!(
            router.route(&event, &filter, t0),
            vec![RouterAction::NotifySceneTriggered { endpoint: 2 }]
        );
        assert!(router
            .route(&event, &filter, t0 + Duration::from_millis(300))
            .is_empty());
    }

    #[test]
    fn test_reports_never_route() {
        let (router, filter, t0) = setup();
        let event = decode(1, &[24, 1, 2, 3]);

        for offset in [0, 100, 2000] {
            assert!(router
                .route(&event, &filter, t0 + Duration::from_millis(offset))
                .is_empty());
        }
        assert!(filter.is_empty());
    }

    #[test]
    fn test_out_of_range_endpoint_leaves_state_untouched() {
        let (router, filter, t0) = setup();
        let event = decode(5, &[8, 0, 0, 0, 0, 0, 1]);

        assert!(router.route(&event, &filter, t0).is_empty());
        assert!(filter.is_empty());
    }

    #[test]
    fn test_unrecognized_is_dropped() {
        let (router, filter, t0) = setup();
        assert!(router.route(&decode(1, &[8, 0, 0]), &filter, t0).is_empty());
        assert!(router.route(&decode(1, &[0x42]), &filter, t0).is_empty());
        assert!(filter.is_empty());
    }

    #[test]
    fn test_opposite_states_do_not_suppress_each_other() {
        let (router, filter, t0) = setup();
        let on = decode(1, &[8, 0, 0, 0, 0, 0, 1]);
        let off = decode(1, &[8, 0, 0, 0, 0, 0, 0]);

        assert_eq!(router.route(&on, &filter, t0).len(), 2);
        assert_eq!(
            router
                .route(&off, &filter, t0 + Duration::from_millis(100))
                .len(),
            2
        );
    }
}
