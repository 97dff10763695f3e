use std::{
    sync::Mutex,
    time::{Duration, Instant},
};

use log::{debug, warn};
use serde::Deserialize;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    time,
};

use super::{Fix, LocationProvider};

const WATCH_COMMAND: &[u8] = b"?WATCH={\"enable\":true,\"json\":true};\n";

#[derive(Deserialize)]
struct GpsdMessage {
    class: String,
    #[serde(default)]
    mode: u8,
    lat: Option<f64>,
    lon: Option<f64>,
}

impl GpsdMessage {
    /// A TPV report with at least a 2D fix.
    fn into_fix(self) -> Option<Fix> {
        if self.class != "TPV" || self.mode < 2 {
            return None;
        }
        Some(Fix::new(self.lat?, self.lon?))
    }
}

struct CachedFix {
    fix: Fix,
    taken_at: Instant,
}

/// Positions from a local `gpsd` daemon over its JSON watch protocol.
///
/// An unreachable daemon is treated like denied positioning: no fix, no error.
pub struct GpsdProvider {
    addr: String,
    max_cached_age: Duration,
    cached: Mutex<Option<CachedFix>>,
}

impl GpsdProvider {
    pub fn new(addr: impl Into<String>, max_cached_age: Duration) -> Self {
        Self {
            addr: addr.into(),
            max_cached_age,
            cached: Mutex::new(None),
        }
    }

    fn remember(&self, fix: Fix) {
        let mut guard = match self.cached.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(CachedFix {
            fix,
            taken_at: Instant::now(),
        });
    }

    async fn read_fix(&self) -> std::io::Result<Option<Fix>> {
        let mut stream = TcpStream::connect(&self.addr).await?;
        stream.write_all(WATCH_COMMAND).await?;

        let mut lines = BufReader::new(stream).lines();
        while let Some(line) = lines.next_line().await? {
            match serde_json::from_str::<GpsdMessage>(&line) {
                Ok(message) => {
                    if let Some(fix) = message.into_fix() {
                        return Ok(Some(fix));
                    }
                }
                Err(err) => debug!("ignoring gpsd line: {err}"),
            }
        }
        Ok(None)
    }
}

impl LocationProvider for GpsdProvider {
    async fn last_known(&self) -> Option<Fix> {
        let guard = match self.cached.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard
            .as_ref()
            .filter(|cached| cached.taken_at.elapsed() <= self.max_cached_age)
            .map(|cached| cached.fix)
    }

    async fn request_fresh(&self, deadline: Duration) -> Option<Fix> {
        match time::timeout(deadline, self.read_fix()).await {
            Ok(Ok(Some(fix))) => {
                self.remember(fix);
                Some(fix)
            }
            Ok(Ok(None)) => {
                debug!("gpsd at {} closed without a fix", self.addr);
                None
            }
            Ok(Err(err)) => {
                warn!("gpsd at {} unavailable: {err}", self.addr);
                None
            }
            Err(_) => {
                debug!("gpsd at {} produced no fix within {deadline:?}", self.addr);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::{io::AsyncReadExt, net::TcpListener};

    use super::*;

    async fn fake_gpsd(lines: &'static str) -> (String, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut command = vec![0u8; WATCH_COMMAND.len()];
            socket.read_exact(&mut command).await.unwrap();
            socket.write_all(lines.as_bytes()).await.unwrap();
            command
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn fresh_fix_skips_until_a_tpv_with_position() {
        let (addr, server) = fake_gpsd(concat!(
            "{\"class\":\"VERSION\",\"release\":\"3.25\"}\n",
            "{\"class\":\"TPV\",\"mode\":1}\n",
            "{\"class\":\"TPV\",\"mode\":3,\"lat\":20.2961,\"lon\":85.8245}\n",
        ))
        .await;
        let provider = GpsdProvider::new(addr, Duration::from_secs(30));

        assert_eq!(provider.last_known().await, None);
        let fix = provider.request_fresh(Duration::from_secs(2)).await;

        assert_eq!(fix, Some(Fix::new(20.2961, 85.8245)));
        assert_eq!(provider.last_known().await, fix);
        assert_eq!(server.await.unwrap(), WATCH_COMMAND);
    }

    #[tokio::test]
    async fn stale_cache_is_not_returned() {
        let provider = GpsdProvider::new("127.0.0.1:9", Duration::ZERO);
        provider.remember(Fix::new(1.0, 2.0));
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(provider.last_known().await, None);
    }

    #[tokio::test]
    async fn unreachable_daemon_yields_nothing() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let provider = GpsdProvider::new(addr, Duration::from_secs(30));
        assert_eq!(provider.request_fresh(Duration::from_secs(1)).await, None);
    }
}
