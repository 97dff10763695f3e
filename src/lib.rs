pub mod config;
pub mod db;
pub mod error;
pub mod location;
pub mod pipeline;
pub mod remote;
pub mod transport;
mod utils;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use config::{AppConfig, ConfigStore, TransportConfig};
use db::Database;
use location::{ConfiguredLocation, FixedLocation, GpsdProvider, LocationEnricher};
use pipeline::{ManualReportPipeline, SensorIngest};
use remote::{Forwarder, HttpClassifier};
use transport::LineLink;

/// Installs the global logger. `RUST_LOG` wins over the default level.
pub fn init_logging() {
    let level = if config::debug_requested() {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    let _ = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .try_init();
}

/// Everything a command needs, wired from one config snapshot.
pub struct Services {
    pub config: AppConfig,
    pub db: Database,
    pub forwarder: Forwarder,
    data_dir: PathBuf,
}

impl Services {
    pub fn open(store: &ConfigStore) -> Result<Self> {
        let config = store.get();
        let data_dir = store.data_dir();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;

        let db = Database::new(data_dir.join("roadwatch.sqlite3"))?;
        let forwarder = Forwarder::new(
            &config.backend_url,
            config.user_id.clone(),
            config.forward_timeout(),
        )?;

        log::info!(
            "roadwatch ready: data in {}, forwarding to {}",
            data_dir.display(),
            forwarder.endpoint()
        );

        Ok(Self {
            config,
            db,
            forwarder,
            data_dir,
        })
    }

    pub fn location_enricher(&self) -> LocationEnricher<ConfiguredLocation> {
        let location = &self.config.location;
        let provider = match &location.gpsd_addr {
            Some(addr) => ConfiguredLocation::Gpsd(GpsdProvider::new(
                addr.clone(),
                location.max_cached_age(),
            )),
            None => ConfiguredLocation::Fixed(FixedLocation::new(None)),
        };
        LocationEnricher::new(provider, location.cached_timeout(), location.fresh_timeout())
    }

    pub fn sensor_ingest(&self) -> SensorIngest<ConfiguredLocation> {
        SensorIngest::new(
            self.db.clone(),
            std::sync::Arc::new(self.location_enricher()),
            self.forwarder.clone(),
        )
    }

    pub fn manual_pipeline(&self) -> Result<ManualReportPipeline<HttpClassifier>> {
        let classifier = HttpClassifier::new(
            self.config.classifier_url.clone(),
            self.config.classifier_timeout(),
        )?;
        Ok(ManualReportPipeline::new(
            self.db.clone(),
            classifier,
            self.forwarder.clone(),
            self.data_dir.join("media"),
        ))
    }

    /// The line transport from config. The notify variant needs a host radio backend,
    /// which this build does not carry.
    pub fn line_link(&self) -> Result<LineLink> {
        let TransportConfig::Line { paired } = &self.config.transport else {
            bail!("transport 'notify' has no radio backend in this build; configure a 'line' transport");
        };

        let link = LineLink::new(paired.clone(), self.config.connect_timeout());
        Ok(match &self.config.handshake {
            Some(line) => link.with_handshake(line.clone()),
            None => link,
        })
    }
}
