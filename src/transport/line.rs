use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
    time,
};

use crate::error::TransportError;

use super::{LinkState, SensorLink, SessionFeed};

/// Where a previously paired node can be reached as a byte stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "kind", content = "target")]
pub enum LineEndpoint {
    /// A bound serial device such as `/dev/rfcomm0`.
    Device(PathBuf),
    /// A `host:port` bridge that relays the node's serial output.
    Tcp(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PairedNode {
    pub name: String,
    pub endpoint: LineEndpoint,
}

type LineReader = Box<dyn AsyncRead + Send + Unpin>;
type LineWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Newline-delimited JSON over a serial-style socket to a paired node.
///
/// Discovery is a lookup in the paired-node table; there is no radio scan.
pub struct LineLink {
    paired: Vec<PairedNode>,
    connect_timeout: Duration,
    handshake: Option<String>,
}

impl LineLink {
    pub fn new(paired: Vec<PairedNode>, connect_timeout: Duration) -> Self {
        Self {
            paired,
            connect_timeout,
            handshake: None,
        }
    }

    /// Line written once after the connection opens, before streaming starts.
    pub fn with_handshake(mut self, line: impl Into<String>) -> Self {
        self.handshake = Some(line.into());
        self
    }

    fn lookup(&self, node_name: &str) -> Option<&PairedNode> {
        self.paired.iter().find(|node| node.name == node_name)
    }

    async fn send_handshake(&self, writer: &mut LineWriter) -> io::Result<()> {
        if let Some(line) = &self.handshake {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }
        Ok(())
    }
}

async fn open_endpoint(endpoint: &LineEndpoint) -> io::Result<(LineReader, LineWriter)> {
    match endpoint {
        LineEndpoint::Tcp(addr) => {
            let stream = TcpStream::connect(addr).await?;
            stream.set_nodelay(true)?;
            let (reader, writer) = stream.into_split();
            Ok((Box::new(reader), Box::new(writer)))
        }
        LineEndpoint::Device(path) => open_device(path),
    }
}

/// Opens both directions of a device non-blocking and registered with the reactor, so a
/// cancelled read leaves nothing behind and dropping the halves closes the descriptors.
#[cfg(unix)]
fn open_device(path: &Path) -> io::Result<(LineReader, LineWriter)> {
    use tokio::net::unix::pipe;

    let mut read_options = pipe::OpenOptions::new();
    read_options.unchecked(true);
    // Keeps a FIFO bridge from reading EOF before its writer attaches.
    #[cfg(target_os = "linux")]
    read_options.read_write(true);

    let reader = read_options.open_receiver(path)?;
    let writer = pipe::OpenOptions::new().unchecked(true).open_sender(path)?;
    Ok((Box::new(reader), Box::new(writer)))
}

#[cfg(not(unix))]
fn open_device(path: &Path) -> io::Result<(LineReader, LineWriter)> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("serial devices are not supported here: {}", path.display()),
    ))
}

impl SensorLink for LineLink {
    async fn run(&self, feed: SessionFeed) -> Result<(), TransportError> {
        let node = feed.node_name().to_string();

        feed.set_state(LinkState::Discovering);
        let Some(paired) = self.lookup(&node) else {
            return Err(feed.fail(TransportError::NodeNotFound(node)));
        };

        feed.set_state(LinkState::Connecting);
        let opened = tokio::select! {
            res = time::timeout(self.connect_timeout, open_endpoint(&paired.endpoint)) => res,
            _ = feed.cancelled() => {
                feed.set_state(LinkState::Disconnected);
                return Ok(());
            }
        };
        let (reader, mut writer) = match opened {
            Ok(Ok(halves)) => halves,
            Ok(Err(err)) => {
                return Err(feed.fail(TransportError::ConnectFailed {
                    node,
                    cause: err.to_string(),
                }))
            }
            Err(_) => {
                return Err(feed.fail(TransportError::ConnectTimeout {
                    node,
                    timeout: self.connect_timeout,
                }))
            }
        };

        feed.set_state(LinkState::ServiceReady);
        match time::timeout(self.connect_timeout, self.send_handshake(&mut writer)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                return Err(feed.fail(TransportError::HandshakeFailed {
                    node,
                    cause: err.to_string(),
                }))
            }
            Err(_) => {
                return Err(feed.fail(TransportError::HandshakeFailed {
                    node,
                    cause: "handshake write timed out".into(),
                }))
            }
        }

        feed.set_state(LinkState::Streaming);
        let mut reader = BufReader::new(reader);
        // Raw bytes: a garbled line is a bad frame for `deliver` to drop, not a link error.
        let mut line = Vec::new();
        let outcome = loop {
            tokio::select! {
                biased;
                _ = feed.cancelled() => break Ok(()),
                read = reader.read_until(b'\n', &mut line) => match read {
                    Ok(0) => {
                        break Err(TransportError::Disconnected(format!("'{node}' closed the stream")))
                    }
                    Ok(_) => {
                        let keep_going = line.iter().all(u8::is_ascii_whitespace)
                            || feed.deliver(&line);
                        line.clear();
                        if !keep_going {
                            break Ok(());
                        }
                    }
                    Err(err) => break Err(TransportError::Disconnected(err.to_string())),
                },
            }
        };

        drop(reader);
        drop(writer);
        feed.set_state(LinkState::Disconnected);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use tokio::{io::AsyncReadExt, net::TcpListener};

    use super::*;
    use crate::transport::state::testing::feed;

    fn link_to(addr: String) -> LineLink {
        LineLink::new(
            vec![PairedNode {
                name: "ESP32_Pothole".into(),
                endpoint: LineEndpoint::Tcp(addr),
            }],
            Duration::from_secs(2),
        )
    }

    #[tokio::test]
    async fn streams_lines_and_skips_malformed_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(b"{\"dip\": -22, \"time_s\": 10}\nnot json\n\n{\"dip\": 4.5, \"sequence\": 11}\n")
                .await
                .unwrap();
        });

        let (feed, mut harness) = feed("ESP32_Pothole");
        let result = link_to(addr).run(feed).await;
        server.await.unwrap();

        assert!(matches!(result, Err(TransportError::Disconnected(_))));
        assert_eq!(*harness.state.borrow(), LinkState::Disconnected);

        let first = harness.events.recv().await.unwrap();
        let second = harness.events.recv().await.unwrap();
        assert_eq!((first.sequence, first.magnitude), (10, -22.0));
        assert_eq!((second.sequence, second.magnitude), (11, 4.5));
        assert!(harness.events.recv().await.is_none());
    }

    #[tokio::test]
    async fn garbled_bytes_are_dropped_without_ending_the_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(b"\xff\xfe noise\n{\"dip\": -22, \"time_s\": 10}\n")
                .await
                .unwrap();
        });

        let (feed, mut harness) = feed("ESP32_Pothole");
        let result = link_to(addr).run(feed).await;
        server.await.unwrap();

        assert!(matches!(result, Err(TransportError::Disconnected(ref cause)) if cause.contains("closed the stream")));
        let event = harness.events.recv().await.unwrap();
        assert_eq!((event.sequence, event.magnitude), (10, -22.0));
        assert!(harness.events.recv().await.is_none());
    }

    #[tokio::test]
    async fn sends_handshake_before_streaming() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 6];
            socket.read_exact(&mut buf).await.unwrap();
            buf
        });

        let (feed, _harness) = feed("ESP32_Pothole");
        let _ = link_to(addr).with_handshake("START").run(feed).await;
        assert_eq!(&server.await.unwrap(), b"START\n");
    }

    #[tokio::test]
    async fn unknown_node_fails_discovery() {
        let (feed, harness) = feed("someone-else");
        let result = link_to("127.0.0.1:9".into()).run(feed).await;

        assert_eq!(
            result,
            Err(TransportError::NodeNotFound("someone-else".into()))
        );
        assert!(matches!(*harness.state.borrow(), LinkState::Failed(_)));
    }

    #[tokio::test]
    async fn refused_connection_is_a_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let (feed, harness) = feed("ESP32_Pothole");
        let result = link_to(addr).run(feed).await;

        assert!(matches!(result, Err(TransportError::ConnectFailed { .. })));
        assert!(matches!(*harness.state.borrow(), LinkState::Failed(_)));
    }

    #[tokio::test]
    async fn cancel_ends_the_stream_cleanly() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            // Hold the socket open until the client goes away.
            let mut socket = socket;
            let mut buf = [0u8; 16];
            let _ = socket.read(&mut buf).await;
        });

        let (feed, mut harness) = feed("ESP32_Pothole");
        let link = link_to(addr);
        let cancel = harness.cancel.clone();
        let run = tokio::spawn(async move { link.run(feed).await });

        harness
            .state
            .wait_for(|state| *state == LinkState::Streaming)
            .await
            .unwrap();
        cancel.cancel();

        assert_eq!(run.await.unwrap(), Ok(()));
        server.await.unwrap();
        assert_eq!(*harness.state.borrow(), LinkState::Disconnected);
    }

    #[cfg(target_os = "linux")]
    mod device {
        use std::path::Path;

        use tokio::{
            net::{unix::pipe, TcpSocket},
            time::timeout,
        };

        use super::*;
        use crate::transport::SensorController;

        fn make_fifo() -> PathBuf {
            let path = std::env::temp_dir()
                .join(format!("roadwatch_node_{}.fifo", uuid::Uuid::new_v4()));
            let status = std::process::Command::new("mkfifo")
                .arg(&path)
                .status()
                .unwrap();
            assert!(status.success());
            path
        }

        fn open_descriptors_to(path: &Path) -> usize {
            let target = std::fs::canonicalize(path).unwrap();
            std::fs::read_dir("/proc/self/fd")
                .unwrap()
                .filter_map(|entry| std::fs::read_link(entry.ok()?.path()).ok())
                .filter(|link| *link == target)
                .count()
        }

        fn device_link(path: &Path, connect_timeout: Duration) -> LineLink {
            LineLink::new(
                vec![PairedNode {
                    name: "ESP32_Pothole".into(),
                    endpoint: LineEndpoint::Device(path.to_path_buf()),
                }],
                connect_timeout,
            )
        }

        #[tokio::test]
        async fn stopping_a_session_releases_the_device() {
            let fifo = make_fifo();
            let mut controller = SensorController::new(device_link(&fifo, Duration::from_secs(2)));

            let mut first = controller.start_session("ESP32_Pothole").await.unwrap();
            let mut node = pipe::OpenOptions::new().open_sender(&fifo).unwrap();
            node.write_all(b"{\"dip\": -22, \"time_s\": 10}\n")
                .await
                .unwrap();
            let event = timeout(Duration::from_secs(2), first.next_event())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(event.sequence, 10);

            assert_eq!(controller.stop_session().await, Ok(()));
            // Only the node's own end is left.
            assert_eq!(open_descriptors_to(&fifo), 1);

            let mut second = controller.start_session("ESP32_Pothole").await.unwrap();
            node.write_all(b"{\"dip\": -15, \"time_s\": 1}\n")
                .await
                .unwrap();
            let event = timeout(Duration::from_secs(2), second.next_event())
                .await
                .unwrap()
                .unwrap();
            assert_eq!((event.sequence, event.magnitude), (1, -15.0));

            assert_eq!(controller.stop_session().await, Ok(()));
            assert_eq!(open_descriptors_to(&fifo), 1);
            std::fs::remove_file(&fifo).ok();
        }

        #[tokio::test]
        async fn stuck_handshake_fails_the_session() {
            let fifo = make_fifo();
            // Far larger than the pipe buffer, and nobody drains it.
            let handshake = "x".repeat(1 << 20);
            let link = device_link(&fifo, Duration::from_millis(300)).with_handshake(handshake);

            let (feed, harness) = feed("ESP32_Pothole");
            let result = link.run(feed).await;

            assert!(matches!(result, Err(TransportError::HandshakeFailed { .. })));
            assert!(matches!(*harness.state.borrow(), LinkState::Failed(_)));
            std::fs::remove_file(&fifo).ok();
        }

        #[tokio::test]
        async fn unanswered_connect_times_out() {
            let socket = TcpSocket::new_v4().unwrap();
            socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
            let listener = socket.listen(0).unwrap();
            let addr = listener.local_addr().unwrap();
            // Fills the accept queue so the next SYN is dropped.
            let _queued = TcpStream::connect(addr).await.unwrap();

            let link = LineLink::new(
                vec![PairedNode {
                    name: "ESP32_Pothole".into(),
                    endpoint: LineEndpoint::Tcp(addr.to_string()),
                }],
                Duration::from_millis(300),
            );
            let (feed, harness) = feed("ESP32_Pothole");
            let result = link.run(feed).await;

            assert!(matches!(result, Err(TransportError::ConnectTimeout { .. })));
            assert!(matches!(*harness.state.borrow(), LinkState::Failed(_)));
            drop(listener);
        }
    }
}
