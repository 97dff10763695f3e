use std::{future::Future, time::Duration};

use tokio::{sync::mpsc, time};
use uuid::Uuid;

use crate::error::TransportError;

use super::{LinkState, SensorLink, SessionFeed};

/// GATT service the node exposes its dip characteristic under.
pub const SENSOR_SERVICE: Uuid = Uuid::from_u128(0x4fafc201_1fb5_459e_8fcc_c5c9c331914b);
/// Characteristic that notifies one JSON event per payload.
pub const SENSOR_CHARACTERISTIC: Uuid = Uuid::from_u128(0xbeb5483e_36e1_4688_b7f5_ea07361b26a8);

/// Host radio capable of scanning for advertising peripherals.
pub trait NotifyRadio: Send + Sync + 'static {
    type Peripheral: NotifyPeripheral;

    /// Scans for a peripheral advertising `name`. `Ok(None)` means the window elapsed
    /// without a match.
    fn discover(
        &self,
        name: &str,
        window: Duration,
    ) -> impl Future<Output = Result<Option<Self::Peripheral>, TransportError>> + Send;
}

pub trait NotifyPeripheral: Send + 'static {
    fn connect(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Enables notifications on `characteristic`. The receiver closes when the link drops.
    fn subscribe(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
    ) -> impl Future<Output = Result<mpsc::UnboundedReceiver<Vec<u8>>, TransportError>> + Send;

    fn disconnect(&mut self) -> impl Future<Output = ()> + Send;
}

/// Discovery + notify variant: scan, connect, subscribe, then relay notification payloads.
pub struct NotifyLink<R> {
    radio: R,
    scan_window: Duration,
    connect_timeout: Duration,
}

impl<R: NotifyRadio> NotifyLink<R> {
    pub fn new(radio: R, scan_window: Duration, connect_timeout: Duration) -> Self {
        Self {
            radio,
            scan_window,
            connect_timeout,
        }
    }

    async fn stream(
        &self,
        peripheral: &mut R::Peripheral,
        feed: &SessionFeed,
    ) -> Result<(), TransportError> {
        let node = feed.node_name().to_string();

        let connected = tokio::select! {
            res = time::timeout(self.connect_timeout, peripheral.connect()) => res,
            _ = feed.cancelled() => return Ok(()),
        };
        match connected {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(feed.fail(err)),
            Err(_) => {
                return Err(feed.fail(TransportError::ConnectTimeout {
                    node,
                    timeout: self.connect_timeout,
                }))
            }
        }

        feed.set_state(LinkState::ServiceReady);
        let subscribed = tokio::select! {
            res = time::timeout(
                self.connect_timeout,
                peripheral.subscribe(SENSOR_SERVICE, SENSOR_CHARACTERISTIC),
            ) => res,
            _ = feed.cancelled() => return Ok(()),
        };
        let mut notifications = match subscribed {
            Ok(Ok(rx)) => rx,
            Ok(Err(err)) => {
                return Err(feed.fail(TransportError::HandshakeFailed {
                    node,
                    cause: err.to_string(),
                }))
            }
            Err(_) => {
                return Err(feed.fail(TransportError::HandshakeFailed {
                    node,
                    cause: "enabling notifications timed out".into(),
                }))
            }
        };

        feed.set_state(LinkState::Streaming);
        loop {
            tokio::select! {
                biased;
                _ = feed.cancelled() => return Ok(()),
                payload = notifications.recv() => match payload {
                    Some(payload) if payload.is_empty() => continue,
                    Some(payload) => {
                        if !feed.deliver(&payload) {
                            return Ok(());
                        }
                    }
                    None => {
                        return Err(TransportError::Disconnected(format!("'{node}' disconnected")))
                    }
                },
            }
        }
    }
}

impl<R: NotifyRadio> SensorLink for NotifyLink<R> {
    async fn run(&self, feed: SessionFeed) -> Result<(), TransportError> {
        feed.set_state(LinkState::Discovering);
        let found = tokio::select! {
            res = self.radio.discover(feed.node_name(), self.scan_window) => res,
            _ = feed.cancelled() => {
                feed.set_state(LinkState::Disconnected);
                return Ok(());
            }
        };
        let mut peripheral = match found {
            Ok(Some(peripheral)) => peripheral,
            Ok(None) => {
                let node = feed.node_name().to_string();
                return Err(feed.fail(TransportError::NodeNotFound(node)));
            }
            Err(err) => return Err(feed.fail(err)),
        };

        feed.set_state(LinkState::Connecting);
        let outcome = self.stream(&mut peripheral, &feed).await;
        peripheral.disconnect().await;

        // Failures before streaming already left `Failed` on the state channel.
        if let Ok(()) | Err(TransportError::Disconnected(_)) = &outcome {
            feed.set_state(LinkState::Disconnected);
        }
        outcome
    }
}
