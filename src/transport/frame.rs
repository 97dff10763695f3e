use serde::{Deserialize, Serialize};

use crate::error::FrameError;

/// One vibration dip as reported by the node.
///
/// `sequence` is relative to the node's power-on and restarts after every power cycle, so it
/// is never unique on its own.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RawEvent {
    pub sequence: i64,
    pub magnitude: f64,
}

#[derive(Deserialize)]
struct WireEvent {
    dip: f64,
    #[serde(default)]
    time_s: Option<i64>,
    #[serde(default)]
    sequence: Option<i64>,
}

impl RawEvent {
    /// Decodes a notification payload or a single line read from the serial stream.
    pub fn from_frame(payload: &[u8]) -> Result<Self, FrameError> {
        let text = std::str::from_utf8(payload)?;
        Self::from_line(text)
    }

    pub fn from_line(line: &str) -> Result<Self, FrameError> {
        let wire: WireEvent = serde_json::from_str(line.trim())?;
        let sequence = wire
            .time_s
            .or(wire.sequence)
            .ok_or(FrameError::MissingSequence)?;

        Ok(Self {
            sequence,
            magnitude: wire.dip,
        })
    }
}
