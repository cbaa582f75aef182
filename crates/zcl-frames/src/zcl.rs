//! Cluster-specific ZCL command frames sent to devices

use crate::cluster::{OnOffCommand, WindowCoveringCommand};
use thiserror::Error;

/// ZCL frame errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Frame too short: {0} bytes")]
    FrameTooShort(usize),
}

/// ZCL frame (Zigbee Cluster Library)
///
/// ```text
/// [Frame Control: 1 byte]
/// [Manufacturer Code: 2 bytes LE] (only when frame control bit 2 is set)
/// [Transaction Sequence: 1 byte]
/// [Command ID: 1 byte]
/// [Payload: variable]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZclFrame {
    frame_control: u8,
    manufacturer_code: Option<u16>,
    transaction_seq: u8,
    command_id: u8,
    payload: Vec<u8>,
}

impl ZclFrame {
    /// Parse a ZCL frame from raw bytes
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < 3 {
            return Err(ProtocolError::FrameTooShort(data.len()));
        }

        let frame_control = data[0];
        let mut idx = 1;

        // Manufacturer-specific (bit 2)
        let manufacturer_code = if (frame_control & 0x04) != 0 {
            if data.len() < idx + 4 {
                return Err(ProtocolError::FrameTooShort(data.len()));
            }
            let code = u16::from_le_bytes([data[idx], data[idx + 1]]);
            idx += 2;
            Some(code)
        } else {
            None
        };

        let transaction_seq = data[idx];
        let command_id = data[idx + 1];
        let payload = data[idx + 2..].to_vec();

        Ok(Self {
            frame_control,
            manufacturer_code,
            transaction_seq,
            command_id,
            payload,
        })
    }

    #[must_use]
    pub fn is_cluster_specific(&self) -> bool {
        (self.frame_control & 0x03) == 0x01
    }

    #[must_use]
    pub fn manufacturer_code(&self) -> Option<u16> {
        self.manufacturer_code
    }

    #[must_use]
    pub fn transaction_seq(&self) -> u8 {
        self.transaction_seq
    }

    #[must_use]
    pub fn command_id(&self) -> u8 {
        self.command_id
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Create a cluster-specific command frame (client to server)
    #[must_use]
    pub fn cluster_command(transaction_seq: u8, command_id: u8, payload: Vec<u8>) -> Self {
        Self {
            frame_control: 0x01,
            manufacturer_code: None,
            transaction_seq,
            command_id,
            payload,
        }
    }

    #[must_use]
    pub fn on_off_command(transaction_seq: u8, cmd: OnOffCommand) -> Self {
        Self::cluster_command(transaction_seq, cmd as u8, Vec::new())
    }

    #[must_use]
    pub fn window_covering_command(transaction_seq: u8, cmd: WindowCoveringCommand) -> Self {
        Self::cluster_command(transaction_seq, cmd.command_id(), cmd.payload())
    }

    /// Tuya `dataRequest` writing one enum datapoint
    ///
    /// Payload is `[seq: u16 BE][dp][type = 0x04 enum][len: u16 BE = 1][value]`.
    #[must_use]
    pub fn tuya_enum_datapoint(transaction_seq: u8, datapoint: u8, value: u8) -> Self {
        let payload = vec![0x00, transaction_seq, datapoint, 0x04, 0x00, 0x01, value];
        Self::cluster_command(transaction_seq, 0x00, payload)
    }

    /// Serialize to bytes
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(5 + self.payload.len());
        data.push(self.frame_control);
        if let Some(mfr) = self.manufacturer_code {
            data.extend_from_slice(&mfr.to_le_bytes());
        }
        data.push(self.transaction_seq);
        data.push(self.command_id);
        data.extend_from_slice(&self.payload);
        data
    }
}
