//! Capability values, names and registration reconcile

use crate::host::CapabilityStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const WINDOWCOVERINGS_SET: &str = "windowcoverings_set";
pub const WINDOWCOVERINGS_STATE: &str = "windowcoverings_state";

/// On/off capability of a switch gang
#[must_use]
pub fn onoff_capability(endpoint: u8) -> String {
    format!("onoff_{endpoint}")
}

/// Gang endpoint of an `onoff_<n>` capability
#[must_use]
pub fn onoff_endpoint(capability: &str) -> Option<u8> {
    capability.strip_prefix("onoff_")?.parse().ok()
}

/// A capability value as exposed to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapabilityValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl CapabilityValue {
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<bool> for CapabilityValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for CapabilityValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for CapabilityValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl std::fmt::Display for CapabilityValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

/// Capabilities to add and remove to reach a desired set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityDiff {
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

impl CapabilityDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// Compute the diff from `registered` to `desired`, limited to `managed` names
///
/// Capabilities outside `managed` belong to someone else and are never removed.
#[must_use]
pub fn reconcile(
    desired: &BTreeSet<String>,
    registered: &BTreeSet<String>,
    managed: &BTreeSet<String>,
) -> CapabilityDiff {
    CapabilityDiff {
        add: desired.difference(registered).cloned().collect(),
        remove: registered
            .iter()
            .filter(|c| managed.contains(*c) && !desired.contains(*c))
            .cloned()
            .collect(),
    }
}

/// Apply a diff to the store, continuing past individual failures
///
/// Returns the number of failed operations.
pub async fn apply_diff(store: &dyn CapabilityStore, diff: &CapabilityDiff) -> usize {
    let mut failures = 0;
    for capability in &diff.add {
        match store.add_capability(capability).await {
            Ok(()) => tracing::info!(capability = %capability, "Added capability"),
            Err(e) => {
                tracing::warn!(capability = %capability, "Failed to add capability: {}", e);
                failures += 1;
            }
        }
    }
    for capability in &diff.remove {
        match store.remove_capability(capability).await {
            Ok(()) => tracing::info!(capability = %capability, "Removed capability"),
            Err(e) => {
                tracing::warn!(capability = %capability, "Failed to remove capability: {}", e);
                failures += 1;
            }
        }
    }
    failures
}
