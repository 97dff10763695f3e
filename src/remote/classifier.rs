use std::{future::Future, time::Duration};

use anyhow::{Context, Result};
use reqwest::{header::CONTENT_TYPE, Client};
use serde::Deserialize;

use crate::{
    db::{DamageType, Severity},
    error::ClassifierError,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub damage_type: DamageType,
    pub severity: Severity,
    pub description: String,
    pub priority: String,
}

impl Classification {
    /// Description with the repair priority appended, as stored on the report.
    pub fn annotated_description(&self) -> String {
        format!("{} [Priority: {}]", self.description, self.priority)
    }
}

/// Image-understanding capability consumed as a black box.
pub trait DamageClassifier: Send + Sync + 'static {
    fn classify(
        &self,
        image: &[u8],
    ) -> impl Future<Output = Result<Classification, ClassifierError>> + Send;
}

fn priority_for(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical | Severity::High => "High",
        Severity::Medium => "Medium",
        Severity::Low => "Low",
    }
}

#[derive(Deserialize)]
struct ClassifierReply {
    #[serde(rename = "type", default)]
    damage_type: Option<String>,
    severity: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    priority: Option<String>,
}

/// Reads either the structured reply or, failing that, a prose answer.
fn parse_reply(body: &str) -> Result<Classification, ClassifierError> {
    if let Ok(reply) = serde_json::from_str::<ClassifierReply>(body) {
        let severity = Severity::from_text(&reply.severity);
        return Ok(Classification {
            damage_type: reply
                .damage_type
                .as_deref()
                .map(DamageType::from_label)
                .unwrap_or(DamageType::Pothole),
            severity,
            description: reply.description,
            priority: reply
                .priority
                .unwrap_or_else(|| priority_for(severity).to_string()),
        });
    }

    let text = body.trim();
    if text.is_empty() || text.starts_with('{') {
        return Err(ClassifierError::Decode(format!(
            "unusable classifier reply: {:.120}",
            text
        )));
    }

    let severity = Severity::from_text(text);
    Ok(Classification {
        damage_type: DamageType::Pothole,
        severity,
        description: text.to_string(),
        priority: priority_for(severity).to_string(),
    })
}

/// Classifier reached over HTTP: image bytes in, JSON `{type, severity, description, priority}` out.
pub struct HttpClassifier {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpClassifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client for the classifier")?;

        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }
}

impl DamageClassifier for HttpClassifier {
    async fn classify(&self, image: &[u8]) -> Result<Classification, ClassifierError> {
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "image/jpeg")
            .body(image.to_vec())
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ClassifierError::Timeout(self.timeout)
                } else {
                    ClassifierError::Request(err)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClassifierError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        parse_reply(&body)
    }
}
