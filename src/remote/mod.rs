//! HTTP boundary: the aggregation service and the image classifier.

pub mod classifier;
pub mod forwarder;
pub mod wire;

pub use classifier::{Classification, DamageClassifier, HttpClassifier};
pub use forwarder::Forwarder;
pub use wire::{ReportUpload, UploadLocation, UploadReceipt};

#[cfg(test)]
pub(crate) mod testing {
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
        task::JoinHandle,
    };

    /// What the canned server saw.
    pub(crate) struct CapturedRequest {
        pub head: String,
        pub body: Vec<u8>,
    }

    /// Answers exactly one HTTP request with `status` and a JSON `body`.
    pub(crate) async fn serve_once(
        status: u16,
        body: &'static str,
    ) -> (String, JoinHandle<CapturedRequest>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            let head_end = loop {
                let n = socket.read(&mut chunk).await.unwrap();
                assert!(n > 0, "client closed before sending headers");
                buf.extend_from_slice(&chunk[..n]);
                if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };

            let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
            let content_length = head
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);

            let mut body_bytes = buf[head_end..].to_vec();
            while body_bytes.len() < content_length {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                body_bytes.extend_from_slice(&chunk[..n]);
            }

            let response = format!(
                "HTTP/1.1 {status} Status\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();

            CapturedRequest {
                head,
                body: body_bytes,
            }
        });

        (base_url, handle)
    }

    /// A local address nothing listens on.
    pub(crate) async fn closed_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}")
    }
}
