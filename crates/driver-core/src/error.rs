//! Error types for the device drivers

use thiserror::Error;

/// Errors reported by the host's cluster transport
#[derive(Error, Debug, Clone)]
pub enum ClusterError {
    /// Device did not answer in time
    #[error("Timeout: expected response")]
    Timeout,

    /// Endpoint does not expose the cluster
    #[error("Cluster {cluster_id:#06x} missing on endpoint {endpoint}")]
    MissingCluster { endpoint: u8, cluster_id: u16 },

    /// Anything else the transport reports
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Errors that can occur in a device session
#[derive(Error, Debug)]
pub enum DeviceError {
    /// Endpoint outside the configured switch range
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(u8),

    /// Capability not registered on this device
    #[error("Unknown capability: {0}")]
    UnknownCapability(String),

    /// Capability value has the wrong type or range
    #[error("Invalid value for {capability}: {value}")]
    InvalidValue { capability: String, value: String },

    /// Flow card arguments could not be interpreted
    #[error("Invalid flow card arguments: {0}")]
    InvalidArgs(String),

    /// Unknown flow card for this driver
    #[error("Unknown flow card: {0}")]
    UnknownCard(String),

    /// Host capability store failed
    #[error("Capability store error: {0}")]
    Capability(String),

    /// Host settings store failed
    #[error("Settings store error: {0}")]
    Settings(String),

    /// Host flow trigger failed
    #[error("Flow trigger error: {0}")]
    Flow(String),

    /// Cluster command or attribute I/O failed
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
