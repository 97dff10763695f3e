//! Report data model.
//!
//! A report is written once at admission. Only `synced` changes afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReportSource {
    Automatic,
    Manual,
}

impl ReportSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportSource::Automatic => "Automatic",
            ReportSource::Manual => "Manual",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
            Severity::Critical => "Critical",
        }
    }

    /// Finds the strongest severity word in free text, e.g. a model's prose answer.
    pub fn from_text(text: &str) -> Self {
        let lowered = text.to_lowercase();
        if lowered.contains("critical") {
            Severity::Critical
        } else if lowered.contains("high") {
            Severity::High
        } else if lowered.contains("medium") {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DamageType {
    Pothole,
    #[serde(rename = "Uneven Road", alias = "UnevenRoad")]
    UnevenRoad,
    #[serde(rename = "Water Logging", alias = "WaterLogging")]
    WaterLogging,
    Invalid,
    Unknown,
}

impl DamageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DamageType::Pothole => "Pothole",
            DamageType::UnevenRoad => "Uneven Road",
            DamageType::WaterLogging => "Water Logging",
            DamageType::Invalid => "Invalid",
            DamageType::Unknown => "Unknown",
        }
    }

    /// Lenient label match; anything unrecognised is `Unknown`.
    pub fn from_label(label: &str) -> Self {
        let squashed: String = label
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        match squashed.as_str() {
            "pothole" => DamageType::Pothole,
            "unevenroad" => DamageType::UnevenRoad,
            "waterlogging" => DamageType::WaterLogging,
            "invalid" | "none" | "nodamage" => DamageType::Invalid,
            _ => DamageType::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MediaType {
    Image,
    Video,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "Image",
            MediaType::Video => "Video",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: Option<i64>,
    pub source: ReportSource,
    pub severity: Severity,
    pub damage_type: DamageType,
    pub latitude: f64,
    pub longitude: f64,
    /// False when the coordinates are the `(0.0, 0.0)` fallback.
    pub location_resolved: bool,
    pub captured_at: DateTime<Utc>,
    pub media_ref: Option<String>,
    pub media_type: Option<MediaType>,
    pub description: Option<String>,
    /// Dedup key, present on automatic reports only.
    pub external_id: Option<String>,
    pub synced: bool,
}

/// Result of an atomic check-then-insert.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Inserted(Report),
    Duplicate,
}
