use std::time::Duration;

use log::{debug, warn};
use serde::Serialize;
use tokio::time;

use crate::error::LocationUnavailable;

use super::{Fix, LocationProvider};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub resolved: bool,
}

impl ResolvedLocation {
    pub fn unresolved() -> Self {
        Self {
            latitude: 0.0,
            longitude: 0.0,
            resolved: false,
        }
    }
}

impl From<Fix> for ResolvedLocation {
    fn from(fix: Fix) -> Self {
        Self {
            latitude: fix.latitude,
            longitude: fix.longitude,
            resolved: true,
        }
    }
}

/// Cached fix first, then a fresh fix, then `(0.0, 0.0)`. Each step is bounded.
pub struct LocationEnricher<P> {
    provider: P,
    cached_timeout: Duration,
    fresh_timeout: Duration,
}

impl<P: LocationProvider> LocationEnricher<P> {
    pub fn new(provider: P, cached_timeout: Duration, fresh_timeout: Duration) -> Self {
        Self {
            provider,
            cached_timeout,
            fresh_timeout,
        }
    }

    pub async fn resolve(&self) -> ResolvedLocation {
        match self.try_resolve().await {
            Ok(fix) => fix.into(),
            Err(reason) => {
                warn!("location unresolved, using (0.0, 0.0): {reason}");
                ResolvedLocation::unresolved()
            }
        }
    }

    async fn try_resolve(&self) -> Result<Fix, LocationUnavailable> {
        match time::timeout(self.cached_timeout, self.provider.last_known()).await {
            Ok(Some(fix)) if fix.is_usable() => return Ok(fix),
            Ok(_) => debug!("no cached fix; requesting a fresh one"),
            Err(_) => debug!("cached fix lookup exceeded {:?}", self.cached_timeout),
        }

        // The outer timeout also covers providers that ignore the deadline they are given.
        match time::timeout(
            self.fresh_timeout,
            self.provider.request_fresh(self.fresh_timeout),
        )
        .await
        {
            Ok(Some(fix)) if fix.is_usable() => Ok(fix),
            _ => Err(LocationUnavailable::NoFix(self.fresh_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct ScriptedProvider {
        cached: Option<Fix>,
        fresh: Option<Fix>,
        hang: bool,
        fresh_calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(cached: Option<Fix>, fresh: Option<Fix>) -> Self {
            Self {
                cached,
                fresh,
                hang: false,
                fresh_calls: AtomicUsize::new(0),
            }
        }
    }

    impl LocationProvider for ScriptedProvider {
        async fn last_known(&self) -> Option<Fix> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            self.cached
        }

        async fn request_fresh(&self, _deadline: Duration) -> Option<Fix> {
            self.fresh_calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            self.fresh
        }
    }

    fn enricher(provider: ScriptedProvider) -> LocationEnricher<ScriptedProvider> {
        LocationEnricher::new(
            provider,
            Duration::from_millis(50),
            Duration::from_millis(100),
        )
    }

    #[tokio::test]
    async fn cached_fix_wins_without_a_fresh_request() {
        let enricher = enricher(ScriptedProvider::new(
            Some(Fix::new(20.2961, 85.8245)),
            Some(Fix::new(1.0, 1.0)),
        ));

        let location = enricher.resolve().await;

        assert_eq!(location, Fix::new(20.2961, 85.8245).into());
        assert_eq!(enricher.provider.fresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn falls_back_to_a_fresh_fix() {
        let enricher = enricher(ScriptedProvider::new(None, Some(Fix::new(20.3, 85.83))));
        let location = enricher.resolve().await;
        assert!(location.resolved);
        assert_eq!(location.latitude, 20.3);
    }

    #[tokio::test]
    async fn no_fix_anywhere_degrades_to_zero() {
        let enricher = enricher(ScriptedProvider::new(None, None));
        assert_eq!(enricher.resolve().await, ResolvedLocation::unresolved());
    }

    #[tokio::test]
    async fn unusable_fixes_are_ignored() {
        let enricher = enricher(ScriptedProvider::new(
            Some(Fix::new(f64::NAN, 0.0)),
            Some(Fix::new(120.0, 0.0)),
        ));
        assert!(!enricher.resolve().await.resolved);
    }

    #[tokio::test]
    async fn a_hanging_provider_cannot_stall_the_pipeline() {
        let mut provider = ScriptedProvider::new(Some(Fix::new(1.0, 1.0)), None);
        provider.hang = true;
        let enricher = enricher(provider);

        let location = time::timeout(Duration::from_secs(1), enricher.resolve())
            .await
            .expect("enricher must respect its deadlines");
        assert_eq!(location, ResolvedLocation::unresolved());
    }
}
