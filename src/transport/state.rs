use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

use super::frame::RawEvent;

// Frame-level chatter is loud while a node is streaming.
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "state", content = "cause")]
pub enum LinkState {
    Idle,
    Discovering,
    Connecting,
    ServiceReady,
    Streaming,
    Disconnected,
    Failed(String),
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::Idle => "Idle",
            LinkState::Discovering => "Discovering",
            LinkState::Connecting => "Connecting",
            LinkState::ServiceReady => "ServiceReady",
            LinkState::Streaming => "Streaming",
            LinkState::Disconnected => "Disconnected",
            LinkState::Failed(_) => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LinkState::Disconnected | LinkState::Failed(_))
    }
}

/// The producer half of a session, handed to a [`super::SensorLink`] for the lifetime of
/// one connection.
pub struct SessionFeed {
    node_name: String,
    events: mpsc::UnboundedSender<RawEvent>,
    state: watch::Sender<LinkState>,
    cancel: CancellationToken,
}

impl SessionFeed {
    pub fn new(
        node_name: impl Into<String>,
        events: mpsc::UnboundedSender<RawEvent>,
        state: watch::Sender<LinkState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            node_name: node_name.into(),
            events,
            state,
            cancel,
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn set_state(&self, next: LinkState) {
        log_info!("link '{}' -> {}", self.node_name, next.as_str());
        self.state.send_replace(next);
    }

    /// Records the failure on the state channel and hands the error back for returning.
    pub fn fail(&self, err: TransportError) -> TransportError {
        self.set_state(LinkState::Failed(err.to_string()));
        err
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Decodes one frame and forwards it. Malformed frames are dropped here.
    ///
    /// Returns `false` once nobody is consuming the stream anymore.
    pub fn deliver(&self, payload: &[u8]) -> bool {
        match RawEvent::from_frame(payload) {
            Ok(event) => {
                log_debug!(
                    "node '{}' event seq={} dip={}",
                    self.node_name,
                    event.sequence,
                    event.magnitude
                );
                self.events.send(event).is_ok()
            }
            Err(err) => {
                log_warn!(
                    "dropping malformed frame from '{}': {err} ({:?})",
                    self.node_name,
                    String::from_utf8_lossy(payload)
                );
                !self.events.is_closed()
            }
        }
    }
}
