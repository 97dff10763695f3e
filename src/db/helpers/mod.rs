use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};

use crate::db::models::{DamageType, MediaType, ReportSource, Severity};

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
pub fn format_datetime(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_source(value: &str) -> Result<ReportSource> {
    match value {
        "Automatic" => Ok(ReportSource::Automatic),
        "Manual" => Ok(ReportSource::Manual),
        other => Err(anyhow!("unknown report source {other}")),
    }
}

pub fn parse_severity(value: &str) -> Result<Severity> {
    match value {
        "Low" => Ok(Severity::Low),
        "Medium" => Ok(Severity::Medium),
        "High" => Ok(Severity::High),
        "Critical" => Ok(Severity::Critical),
        other => Err(anyhow!("unknown severity {other}")),
    }
}

pub fn parse_damage_type(value: &str) -> Result<DamageType> {
    match value {
        "Pothole" => Ok(DamageType::Pothole),
        "Uneven Road" => Ok(DamageType::UnevenRoad),
        "Water Logging" => Ok(DamageType::WaterLogging),
        "Invalid" => Ok(DamageType::Invalid),
        "Unknown" => Ok(DamageType::Unknown),
        other => Err(anyhow!("unknown damage type {other}")),
    }
}

pub fn parse_media_type(value: Option<String>) -> Result<Option<MediaType>> {
    match value.as_deref() {
        None => Ok(None),
        Some("Image") => Ok(Some(MediaType::Image)),
        Some("Video") => Ok(Some(MediaType::Video)),
        Some(other) => Err(anyhow!("unknown media type {other}")),
    }
}
