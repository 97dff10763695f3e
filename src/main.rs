use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use roadwatch_lib::{
    config::ConfigStore,
    db::MediaType,
    error::TransportError,
    pipeline::{self, ManualSubmission, MediaInput},
    transport::SensorController,
    Services,
};

#[derive(Parser)]
#[command(name = "roadwatch", about = "Road-damage sensor ingestion and report sync")]
struct Cli {
    /// Path to the JSON config file. Created on first update; defaults apply until then.
    #[arg(long, default_value = "roadwatch.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one sensor session until Ctrl-C or the node drops.
    Listen {
        /// Node to connect to. Defaults to `node_name` from the config.
        #[arg(long)]
        node: Option<String>,
    },
    /// Submit a citizen report.
    Report {
        /// Photo or clip to attach.
        media: Option<PathBuf>,
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lng: f64,
        /// Treat the media as video regardless of its extension.
        #[arg(long)]
        video: bool,
    },
    /// Print stored reports, newest first.
    List,
    /// Remove every stored report.
    Clear,
    /// Forward each unsynced report once more.
    Resync,
    /// Print the effective config.
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    roadwatch_lib::init_logging();
    let cli = Cli::parse();
    let store = ConfigStore::new(cli.config)?;

    if let Command::Config = cli.command {
        eprintln!("config file: {}", store.path().display());
        println!("{}", serde_json::to_string_pretty(&store.get())?);
        return Ok(());
    }

    let services = Services::open(&store)?;
    match cli.command {
        Command::Listen { node } => listen(&services, node).await,
        Command::Report {
            media,
            lat,
            lng,
            video,
        } => report(&services, media, lat, lng, video).await,
        Command::List => {
            for report in services.db.list_reports().await? {
                println!(
                    "#{:<5} {} {:<8} {:<13} ({:.5}, {:.5}) {} {}{}",
                    report.id.unwrap_or_default(),
                    report.captured_at.format("%Y-%m-%d %H:%M:%S"),
                    report.severity.as_str(),
                    report.damage_type.as_str(),
                    report.latitude,
                    report.longitude,
                    report.source.as_str(),
                    if report.synced { "synced" } else { "local" },
                    report
                        .description
                        .as_deref()
                        .map(|text| format!(" - {text}"))
                        .unwrap_or_default(),
                );
            }
            Ok(())
        }
        Command::Clear => {
            let removed = services.db.clear_reports().await?;
            println!("removed {removed} reports");
            Ok(())
        }
        Command::Resync => {
            let summary = pipeline::resync(&services.db, &services.forwarder).await?;
            println!(
                "forwarded {} of {} unsynced reports",
                summary.forwarded, summary.attempted
            );
            Ok(())
        }
        Command::Config => Ok(()),
    }
}

async fn listen(services: &Services, node: Option<String>) -> Result<()> {
    let node = node.unwrap_or_else(|| services.config.node_name.clone());
    let mut controller = SensorController::new(services.line_link()?);
    let ingest = services.sensor_ingest();

    let mut session = controller.start_session(&node).await?;
    println!("streaming from '{node}', Ctrl-C to stop");

    let run = ingest.run(&mut session);
    tokio::pin!(run);
    let finished = tokio::select! {
        stats = &mut run => Some(stats),
        _ = tokio::signal::ctrl_c() => None,
    };
    let outcome = controller.stop_session().await;
    let stats = match finished {
        Some(stats) => stats,
        None => run.await,
    };

    println!(
        "{} events, {} admitted, {} duplicates, {} failed",
        stats.received, stats.admitted, stats.duplicates, stats.failed
    );
    match outcome {
        Ok(()) | Err(TransportError::Disconnected(_)) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

async fn report(
    services: &Services,
    media: Option<PathBuf>,
    latitude: f64,
    longitude: f64,
    video: bool,
) -> Result<()> {
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        bail!("coordinates out of range: ({latitude}, {longitude})");
    }

    let media = match media {
        Some(path) => {
            let mut input = MediaInput::from_path(&path).await?;
            if video {
                input.media_type = MediaType::Video;
            }
            Some(input)
        }
        None => None,
    };

    let admitted = services
        .manual_pipeline()?
        .submit(ManualSubmission {
            media,
            latitude,
            longitude,
        })
        .await?;

    let report = &admitted.report;
    println!(
        "stored report #{} ({} {})",
        report.id.unwrap_or_default(),
        report.severity.as_str(),
        report.damage_type.as_str()
    );

    // The process exits right after, so give the upload its chance here.
    let synced = admitted.forward.await.unwrap_or(false);
    println!("{}", if synced { "forwarded" } else { "kept locally; run `resync` later" });
    Ok(())
}
