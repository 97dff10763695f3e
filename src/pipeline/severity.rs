use crate::db::Severity;

pub const CRITICAL_ABOVE: f64 = 20.0;
pub const HIGH_ABOVE: f64 = 14.0;
pub const MEDIUM_ABOVE: f64 = 10.0;

/// Buckets a dip by its absolute depth. Bounds are exclusive.
pub fn classify_magnitude(magnitude: f64) -> Severity {
    let depth = magnitude.abs();
    if depth > CRITICAL_ABOVE {
        Severity::Critical
    } else if depth > HIGH_ABOVE {
        Severity::High
    } else if depth > MEDIUM_ABOVE {
        Severity::Medium
    } else {
        Severity::Low
    }
}
