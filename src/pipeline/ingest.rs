use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use log::{debug, error, info};
use serde::Serialize;

use crate::{
    db::{Admission, DamageType, Database, Report, ReportSource},
    location::{LocationEnricher, LocationProvider},
    remote::Forwarder,
    transport::{RawEvent, SensorSession, SessionInfo},
};

use super::{identity::external_id_for, severity::classify_magnitude, spawn_forward, Admitted};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestStats {
    pub received: u64,
    pub admitted: u64,
    pub duplicates: u64,
    pub failed: u64,
}

/// Automatic path: dedup, locate, classify, commit, forward.
pub struct SensorIngest<P> {
    db: Database,
    enricher: Arc<LocationEnricher<P>>,
    forwarder: Forwarder,
}

impl<P: LocationProvider> SensorIngest<P> {
    pub fn new(db: Database, enricher: Arc<LocationEnricher<P>>, forwarder: Forwarder) -> Self {
        Self {
            db,
            enricher,
            forwarder,
        }
    }

    /// Consumes the session until its stream ends. Per-event problems are logged and
    /// counted, never returned.
    pub async fn run(&self, session: &mut SensorSession) -> IngestStats {
        let mut stats = IngestStats::default();
        let info = session.info.clone();

        while let Some(event) = session.next_event().await {
            stats.received += 1;
            match self.admit(&info, event).await {
                Ok(Some(_)) => stats.admitted += 1,
                Ok(None) => stats.duplicates += 1,
                Err(err) => {
                    stats.failed += 1;
                    error!(
                        "could not store event seq={} from session {}: {err:?}",
                        event.sequence, info.id
                    );
                }
            }
        }

        info!(
            "session {} stream ended: {} received, {} admitted, {} duplicates",
            info.id, stats.received, stats.admitted, stats.duplicates
        );
        stats
    }

    /// Admits one event. `Ok(None)` means it was already stored.
    pub async fn admit(&self, session: &SessionInfo, event: RawEvent) -> Result<Option<Admitted>> {
        let external_id = external_id_for(session, &event);
        if self.db.exists_by_external_id(&external_id).await? {
            debug!("duplicate event {external_id} discarded");
            return Ok(None);
        }

        let location = self.enricher.resolve().await;
        let severity = classify_magnitude(event.magnitude);

        let report = Report {
            id: None,
            source: ReportSource::Automatic,
            severity,
            damage_type: DamageType::Pothole,
            latitude: location.latitude,
            longitude: location.longitude,
            location_resolved: location.resolved,
            captured_at: Utc::now(),
            media_ref: None,
            media_type: None,
            description: Some(format!("Auto-detected via sensor (Dip: {})", event.magnitude)),
            external_id: Some(external_id),
            synced: false,
        };

        // The pre-check above is only a shortcut; this is the atomic one.
        match self.db.admit_report(&report).await? {
            Admission::Duplicate => {
                debug!("duplicate event {:?} lost the admission race", report.external_id);
                Ok(None)
            }
            Admission::Inserted(stored) => {
                info!(
                    "admitted {} report {:?} (dip {})",
                    stored.severity.as_str(),
                    stored.id,
                    event.magnitude
                );
                let forward =
                    spawn_forward(self.db.clone(), self.forwarder.clone(), stored.clone(), None);
                Ok(Some(Admitted {
                    report: stored,
                    forward,
                }))
            }
        }
    }
}
