use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use reqwest::Client;

use crate::error::ForwardError;

use super::wire::{ReportUpload, UploadReceipt};

/// One-shot uploader to the aggregation service. Holds no per-report state and never retries.
#[derive(Clone)]
pub struct Forwarder {
    client: Client,
    endpoint: String,
    user_id: String,
    timeout: Duration,
}

impl Forwarder {
    pub fn new(base_url: &str, user_id: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client for the aggregation service")?;

        Ok(Self {
            client,
            endpoint: format!("{}/reports", base_url.trim_end_matches('/')),
            user_id: user_id.into(),
            timeout,
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Single upload attempt. Any non-2xx status or transport error is a failure.
    pub async fn forward(&self, upload: &ReportUpload) -> Result<UploadReceipt, ForwardError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(upload)
            .send()
            .await
            .map_err(|err| self.classify(err))?;

        let status = response.status();
        if !status.is_success() {
            debug!("aggregation service rejected report: {status}");
            return Err(ForwardError::Status(status.as_u16()));
        }

        let body = response.text().await.map_err(|err| self.classify(err))?;
        let receipt = serde_json::from_str::<UploadReceipt>(&body).unwrap_or_else(|err| {
            warn!("accepted upload had an unexpected body ({err}); treating as success");
            UploadReceipt {
                message: body,
                id: None,
            }
        });
        info!(
            "report forwarded to {} (remote id {:?})",
            self.endpoint, receipt.id
        );
        Ok(receipt)
    }

    fn classify(&self, err: reqwest::Error) -> ForwardError {
        if err.is_timeout() {
            ForwardError::Timeout(self.timeout)
        } else {
            ForwardError::Request(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::{
        db::{DamageType, Report, ReportSource, Severity},
        remote::testing::{closed_url, serve_once},
    };

    fn upload() -> ReportUpload {
        let report = Report {
            id: Some(1),
            source: ReportSource::Manual,
            severity: Severity::Medium,
            damage_type: DamageType::WaterLogging,
            latitude: 20.3,
            longitude: 85.83,
            location_resolved: true,
            captured_at: Utc::now(),
            media_ref: None,
            media_type: None,
            description: Some("Flooded lane".into()),
            external_id: None,
            synced: false,
        };
        ReportUpload::from_report(&report, "user_42", None)
    }

    #[tokio::test]
    async fn posts_json_to_reports() {
        let (base_url, server) =
            serve_once(201, r#"{"message": "Report submitted successfully", "id": "r-1"}"#).await;
        let forwarder = Forwarder::new(&base_url, "user_42", Duration::from_secs(5)).unwrap();

        let receipt = forwarder.forward(&upload()).await.unwrap();
        let request = server.await.unwrap();

        assert_eq!(receipt.message, "Report submitted successfully");
        assert!(request.head.starts_with("POST /reports HTTP/1.1"));
        let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(body["type"], "Water Logging");
        assert_eq!(body["userId"], "user_42");
        assert_eq!(body["location"]["address"], "Unknown Address");
    }

    #[tokio::test]
    async fn non_success_status_is_a_failure() {
        let (base_url, server) = serve_once(400, r#"{"error": "Missing location or type"}"#).await;
        let forwarder = Forwarder::new(&base_url, "user_42", Duration::from_secs(5)).unwrap();

        let err = forwarder.forward(&upload()).await.unwrap_err();
        server.await.unwrap();
        assert!(matches!(err, ForwardError::Status(400)));
    }

    #[tokio::test]
    async fn unreachable_service_is_a_failure() {
        let forwarder =
            Forwarder::new(&closed_url().await, "user_42", Duration::from_secs(2)).unwrap();
        assert!(matches!(
            forwarder.forward(&upload()).await,
            Err(ForwardError::Request(_))
        ));
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        let forwarder =
            Forwarder::new("http://localhost:3000/", "u", Duration::from_secs(1)).unwrap();
        assert_eq!(forwarder.endpoint(), "http://localhost:3000/reports");
    }
}
