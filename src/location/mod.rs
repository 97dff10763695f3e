//! Best-effort coordinates for admitted events.

use std::{future::Future, time::Duration};

use serde::{Deserialize, Serialize};

pub mod enricher;
pub mod gpsd;

pub use enricher::{LocationEnricher, ResolvedLocation};
pub use gpsd::GpsdProvider;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
}

impl Fix {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude.abs() <= 90.0
            && self.longitude.abs() <= 180.0
    }
}

/// Source of position fixes. Both calls yield `None` when positioning is denied,
/// disabled, or cannot produce a fix in time.
pub trait LocationProvider: Send + Sync + 'static {
    fn last_known(&self) -> impl Future<Output = Option<Fix>> + Send;

    fn request_fresh(&self, deadline: Duration) -> impl Future<Output = Option<Fix>> + Send;
}

/// A provider pinned to one position, or to none at all for hosts without positioning.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedLocation {
    fix: Option<Fix>,
}

impl FixedLocation {
    pub fn new(fix: Option<Fix>) -> Self {
        Self { fix }
    }
}

impl LocationProvider for FixedLocation {
    async fn last_known(&self) -> Option<Fix> {
        self.fix
    }

    async fn request_fresh(&self, _deadline: Duration) -> Option<Fix> {
        self.fix
    }
}

/// Provider chosen from configuration at startup.
pub enum ConfiguredLocation {
    Gpsd(GpsdProvider),
    Fixed(FixedLocation),
}

impl LocationProvider for ConfiguredLocation {
    async fn last_known(&self) -> Option<Fix> {
        match self {
            ConfiguredLocation::Gpsd(provider) => provider.last_known().await,
            ConfiguredLocation::Fixed(provider) => provider.last_known().await,
        }
    }

    async fn request_fresh(&self, deadline: Duration) -> Option<Fix> {
        match self {
            ConfiguredLocation::Gpsd(provider) => provider.request_fresh(deadline).await,
            ConfiguredLocation::Fixed(provider) => provider.request_fresh(deadline).await,
        }
    }
}
