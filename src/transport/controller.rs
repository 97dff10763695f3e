use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::TransportError;

use super::{LinkState, RawEvent, SensorLink, SessionFeed};

/// Identity of one connected period. `started_at` is the host wall clock, never node time.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: Uuid,
    pub node_name: String,
    pub started_at: DateTime<Utc>,
}

/// Consumer half of a running session. Events arrive in node order; `next_event`
/// returns `None` once the link has been cancelled or dropped.
pub struct SensorSession {
    pub info: SessionInfo,
    events: mpsc::UnboundedReceiver<RawEvent>,
    state: watch::Receiver<LinkState>,
}

impl SensorSession {
    pub async fn next_event(&mut self) -> Option<RawEvent> {
        self.events.recv().await
    }

    pub fn state(&self) -> LinkState {
        self.state.borrow().clone()
    }
}

struct ActiveSession {
    info: SessionInfo,
    cancel_token: CancellationToken,
    handle: JoinHandle<Result<(), TransportError>>,
}

/// Owns the single active sensor session of the process.
pub struct SensorController<L> {
    link: Arc<L>,
    active: Option<ActiveSession>,
}

impl<L: SensorLink> SensorController<L> {
    pub fn new(link: L) -> Self {
        Self {
            link: Arc::new(link),
            active: None,
        }
    }

    pub fn active_session(&self) -> Option<&SessionInfo> {
        self.active.as_ref().map(|active| &active.info)
    }

    /// Opens a session to `node_name` and returns once it is streaming.
    ///
    /// An already active session is torn down first. Discovery, connect and handshake
    /// failures are returned here; nothing is retried.
    pub async fn start_session(&mut self, node_name: &str) -> Result<SensorSession, TransportError> {
        if self.active.is_some() {
            info!("sensor session already active; stopping it before reconnecting");
            if let Err(err) = self.stop_session().await {
                warn!("previous sensor session ended with: {err}");
            }
        }

        let info = SessionInfo {
            id: Uuid::new_v4(),
            node_name: node_name.to_string(),
            started_at: Utc::now(),
        };

        let cancel_token = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, mut state_rx) = watch::channel(LinkState::Idle);
        let feed = SessionFeed::new(node_name, events_tx, state_tx, cancel_token.clone());

        let link = Arc::clone(&self.link);
        let handle = tokio::spawn(async move { link.run(feed).await });

        let reached = state_rx
            .wait_for(|state| *state == LinkState::Streaming || state.is_terminal())
            .await
            .map(|state| (*state).clone());

        match reached {
            // A link that has already dropped still hands over whatever it buffered.
            Ok(LinkState::Streaming) | Ok(LinkState::Disconnected) => {
                info!("sensor session {} streaming from '{}'", info.id, node_name);
                self.active = Some(ActiveSession {
                    info: info.clone(),
                    cancel_token,
                    handle,
                });
                Ok(SensorSession {
                    info,
                    events: events_rx,
                    state: state_rx,
                })
            }
            _ => match join_link(handle).await {
                Err(err) => Err(err),
                Ok(()) => Err(TransportError::Disconnected(
                    "link closed before streaming".into(),
                )),
            },
        }
    }

    /// Cancels the active session and waits until the link has released its resources.
    ///
    /// Returns how the link ended: `Ok(())` for a cancel, the drop cause otherwise.
    pub async fn stop_session(&mut self) -> Result<(), TransportError> {
        let Some(active) = self.active.take() else {
            return Ok(());
        };

        active.cancel_token.cancel();
        let outcome = join_link(active.handle).await;
        info!("sensor session {} released", active.info.id);
        outcome
    }
}

impl<L> Drop for SensorController<L> {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel_token.cancel();
        }
    }
}

async fn join_link(handle: JoinHandle<Result<(), TransportError>>) -> Result<(), TransportError> {
    match handle.await {
        Ok(outcome) => outcome,
        Err(join_err) => Err(TransportError::Disconnected(format!(
            "link task aborted: {join_err}"
        ))),
    }
}
