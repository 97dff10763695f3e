//! Link to the vibration-sensing node.
//!
//! A [`SensorLink`] drives one session through
//! `Idle -> Discovering -> Connecting -> ServiceReady -> Streaming -> Disconnected | Failed`
//! and pushes decoded [`RawEvent`]s into the session's channel. The two variants (GATT-style
//! notifications and a line-oriented serial socket) are interchangeable behind the trait;
//! [`SensorController`] owns the single active session.

use std::future::Future;

use crate::error::TransportError;

pub mod controller;
pub mod frame;
pub mod line;
pub mod notify;
pub mod state;

pub use controller::{SensorController, SensorSession, SessionInfo};
pub use frame::RawEvent;
pub use line::{LineEndpoint, LineLink, PairedNode};
pub use notify::{NotifyLink, NotifyPeripheral, NotifyRadio};
pub use state::{LinkState, SessionFeed};

pub trait SensorLink: Send + Sync + 'static {
    /// Runs one session against `feed.node_name()` until the feed is cancelled
    /// (`Ok(())`) or the link fails or drops (`Err`).
    ///
    /// Every resource acquired here must be released before the future resolves.
    fn run(&self, feed: SessionFeed) -> impl Future<Output = Result<(), TransportError>> + Send;
}
