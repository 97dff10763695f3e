//! Error kinds that the ingestion pipeline distinguishes.
//!
//! Only [`TransportError`] is surfaced to callers; everything else is absorbed by the
//! pipeline and turned into a degraded field value plus a log line.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("no paired or advertising node named '{0}'")]
    NodeNotFound(String),
    #[error("scanner unavailable: {0}")]
    ScannerUnavailable(String),
    #[error("link to '{node}' refused: {cause}")]
    ConnectFailed { node: String, cause: String },
    #[error("link to '{node}' not established within {timeout:?}")]
    ConnectTimeout { node: String, timeout: Duration },
    #[error("handshake with '{node}' failed: {cause}")]
    HandshakeFailed { node: String, cause: String },
    #[error("link dropped: {0}")]
    Disconnected(String),
    #[error("link resource busy: {0}")]
    Busy(String),
}

/// A second admission for an external id that is already stored.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("report with external id '{external_id}' already exists")]
pub struct DuplicateKey {
    pub external_id: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LocationUnavailable {
    #[error("no cached fix and no fresh fix within {0:?}")]
    NoFix(Duration),
    #[error("location provider unavailable: {0}")]
    Provider(String),
}

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("classifier returned status {0}")]
    Status(u16),
    #[error("classifier response could not be read: {0}")]
    Decode(String),
    #[error("classifier did not answer within {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("upload request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("aggregation service answered {0}")]
    Status(u16),
    #[error("upload did not complete within {0:?}")]
    Timeout(Duration),
    #[error("report could not be encoded: {0}")]
    Encode(String),
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not valid utf-8")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("frame is not a sensor event: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame has neither 'time_s' nor 'sequence'")]
    MissingSequence,
}
