use anyhow::{anyhow, Result};
use log::error;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use tokio::sync::watch;

use crate::{
    db::{
        connection::{Database, ReportSnapshot},
        helpers::{
            format_datetime, parse_damage_type, parse_datetime, parse_media_type, parse_severity,
            parse_source,
        },
        models::{Admission, Report},
    },
    error::DuplicateKey,
};

const REPORT_COLUMNS: &str = "id, source, severity, damage_type, latitude, longitude, location_resolved,
     captured_at, media_ref, media_type, description, external_id, synced";

fn row_to_report(row: &Row) -> Result<Report> {
    let source: String = row.get("source")?;
    let severity: String = row.get("severity")?;
    let damage_type: String = row.get("damage_type")?;
    let captured_at: String = row.get("captured_at")?;
    let media_type: Option<String> = row.get("media_type")?;

    Ok(Report {
        id: Some(row.get("id")?),
        source: parse_source(&source)?,
        severity: parse_severity(&severity)?,
        damage_type: parse_damage_type(&damage_type)?,
        latitude: row.get("latitude")?,
        longitude: row.get("longitude")?,
        location_resolved: row.get("location_resolved")?,
        captured_at: parse_datetime(&captured_at, "captured_at")?,
        media_ref: row.get("media_ref")?,
        media_type: parse_media_type(media_type)?,
        description: row.get("description")?,
        external_id: row.get("external_id")?,
        synced: row.get("synced")?,
    })
}

pub(crate) fn load_reports(conn: &Connection) -> Result<Vec<Report>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {REPORT_COLUMNS}
         FROM reports
         ORDER BY captured_at DESC, id DESC"
    ))?;

    let mut rows = stmt.query([])?;
    let mut reports = Vec::new();
    while let Some(row) = rows.next()? {
        reports.push(row_to_report(row)?);
    }
    Ok(reports)
}

fn exists(conn: &Connection, external_id: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM reports WHERE external_id = ?1 LIMIT 1",
            params![external_id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn insert(conn: &Connection, report: &Report) -> Result<Report> {
    let inserted = conn.execute(
        "INSERT INTO reports (source, severity, damage_type, latitude, longitude, location_resolved,
                              captured_at, media_ref, media_type, description, external_id, synced)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            report.source.as_str(),
            report.severity.as_str(),
            report.damage_type.as_str(),
            report.latitude,
            report.longitude,
            report.location_resolved,
            format_datetime(&report.captured_at),
            report.media_ref,
            report.media_type.map(|media| media.as_str()),
            report.description,
            report.external_id,
            report.synced,
        ],
    );

    match inserted {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == ErrorCode::ConstraintViolation && report.external_id.is_some() =>
        {
            return Err(anyhow::Error::new(DuplicateKey {
                external_id: report.external_id.clone().unwrap_or_default(),
            }));
        }
        Err(err) => return Err(err.into()),
    }

    let mut stored = report.clone();
    stored.id = Some(conn.last_insert_rowid());
    Ok(stored)
}

/// Re-reads the table on the DB thread so every emission is a committed state.
fn publish(conn: &Connection, snapshots: &watch::Sender<ReportSnapshot>) {
    match load_reports(conn) {
        Ok(reports) => {
            snapshots.send_replace(ReportSnapshot::new(reports));
        }
        Err(err) => error!("Failed to refresh report snapshot: {err:?}"),
    }
}

impl Database {
    /// Inserts a report. Fails with [`DuplicateKey`] when its external id is taken.
    pub async fn insert_report(&self, report: &Report) -> Result<Report> {
        let record = report.clone();
        let snapshots = self.snapshot_sender();
        self.execute(move |conn| {
            let stored = insert(conn, &record)?;
            publish(conn, &snapshots);
            Ok(stored)
        })
        .await
    }

    /// Existence check and insert as one unit on the DB thread; a report whose external
    /// id is already stored comes back as [`Admission::Duplicate`].
    pub async fn admit_report(&self, report: &Report) -> Result<Admission> {
        let record = report.clone();
        let snapshots = self.snapshot_sender();
        self.execute(move |conn| {
            if let Some(external_id) = record.external_id.as_deref() {
                if exists(conn, external_id)? {
                    return Ok(Admission::Duplicate);
                }
            }

            match insert(conn, &record) {
                Ok(stored) => {
                    publish(conn, &snapshots);
                    Ok(Admission::Inserted(stored))
                }
                Err(err) if err.downcast_ref::<DuplicateKey>().is_some() => {
                    Ok(Admission::Duplicate)
                }
                Err(err) => Err(err),
            }
        })
        .await
    }

    pub async fn exists_by_external_id(&self, external_id: &str) -> Result<bool> {
        let external_id = external_id.to_string();
        self.execute(move |conn| exists(conn, &external_id)).await
    }

    /// All reports, newest first.
    pub async fn list_reports(&self) -> Result<Vec<Report>> {
        self.execute(|conn| load_reports(conn)).await
    }

    pub async fn unsynced_reports(&self) -> Result<Vec<Report>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {REPORT_COLUMNS}
                 FROM reports
                 WHERE synced = 0
                 ORDER BY captured_at ASC, id ASC"
            ))?;

            let mut rows = stmt.query([])?;
            let mut reports = Vec::new();
            while let Some(row) = rows.next()? {
                reports.push(row_to_report(row)?);
            }
            Ok(reports)
        })
        .await
    }

    pub async fn mark_synced(&self, report_id: i64) -> Result<()> {
        let snapshots = self.snapshot_sender();
        self.execute(move |conn| {
            let updated = conn.execute(
                "UPDATE reports SET synced = 1 WHERE id = ?1",
                params![report_id],
            )?;
            if updated == 0 {
                return Err(anyhow!("report {report_id} not found"));
            }
            publish(conn, &snapshots);
            Ok(())
        })
        .await
    }

    /// Bulk clear. Returns the number of removed reports.
    pub async fn clear_reports(&self) -> Result<usize> {
        let snapshots = self.snapshot_sender();
        self.execute(move |conn| {
            let removed = conn.execute("DELETE FROM reports", [])?;
            publish(conn, &snapshots);
            Ok(removed)
        })
        .await
    }
}
