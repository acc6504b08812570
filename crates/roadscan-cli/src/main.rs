mod commands;
mod logging;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use commands::{Cli, Commands};
use roadscan_core::prelude::*;
use roadscan_core::remote;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Environment variable holding the hosted backend's access token
const ACCESS_TOKEN_VAR: &str = "ROADSCAN_ACCESS_TOKEN";

struct App {
    config: RoadScanConfig,
    sync: Arc<SyncEngine>,
}

impl App {
    async fn open(config: RoadScanConfig) -> Result<Self> {
        let local = Arc::new(LocalStore::open(config.sync.database_path.clone()));
        local
            .init()
            .await
            .with_context(|| format!("opening {}", config.sync.database_path.display()))?;

        let token = env::var(ACCESS_TOKEN_VAR).ok();
        let remote = remote::connect(config.sync.remote.as_ref(), token)
            .await
            .context("building the remote store")?;

        let sync = SyncEngine::new(local, remote, NetworkMonitor::new(true))
            .with_settings(config.sync.clone());
        Ok(Self {
            config,
            sync: Arc::new(sync),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logger();

    let args = Cli::parse();
    let config = RoadScanConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    let Some(command) = args.command else {
        Cli::command().print_long_help()?;
        return Ok(());
    };

    if let Commands::InitConfig = command {
        config.save(&args.config)?;
        println!("Wrote {}", args.config.display());
        return Ok(());
    }

    let app = App::open(config).await?;
    match command {
        Commands::Simulate {
            seconds,
            quality,
            seed,
            offline_for,
        } => run_simulate(&app, seconds, &quality, seed, offline_for).await?,
        Commands::Sessions => print_sessions(&app).await?,
        Commands::Segments { id } => print_segments(&app, &id).await?,
        Commands::Resync => {
            let report = app.sync.full_resync().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Delete { id } => {
            if app.sync.delete_session(&id).await? {
                println!("Deleted {}", id);
            } else {
                println!("No session {}", id);
            }
        }
        Commands::Stats => {
            let stats = app.sync.local().stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Clear => {
            app.sync.local().clear_all().await?;
            println!("Local data cleared");
        }
        Commands::InitConfig => {}
    }

    Ok(())
}

async fn run_simulate(
    app: &App,
    seconds: u64,
    quality: &str,
    seed: Option<u64>,
    offline_for: Option<u64>,
) -> Result<()> {
    let quality: RoadQuality = quality.parse()?;
    let simulator = match seed {
        Some(seed) => DriveSimulator::new(quality, seed),
        None => DriveSimulator::from_entropy(quality),
    };
    let (motion, gps) = simulator.into_configured_sources(&app.config);

    let network = app.sync.network().clone();
    if offline_for.is_some() {
        network.set_reachable(false);
    }
    let shutdown = CancellationToken::new();
    let background = app.sync.spawn_background(shutdown.clone());

    let mut recorder = ScanRecorder::new(app.sync.clone(), motion, gps).with_config(&app.config);
    let session = recorder.start().await?;
    println!("Recording session {} for {} s", session.local_id, seconds);

    let (commands, rx) = mpsc::channel(4);
    let driver = tokio::spawn(async move {
        let total = Duration::from_secs(seconds);
        let drive = async {
            if let Some(offline) = offline_for {
                let offline = Duration::from_secs(offline).min(total);
                tokio::time::sleep(offline).await;
                network.set_reachable(true);
                tokio::time::sleep(total - offline).await;
            } else {
                tokio::time::sleep(total).await;
            }
        };
        tokio::select! {
            _ = drive => {}
            _ = tokio::signal::ctrl_c() => info!("Interrupted; stopping scan"),
        }
        commands.send(ScanCommand::Stop).await.ok();
    });

    let ended = recorder.run(rx).await?;
    driver.await?;

    let report = app.sync.full_resync().await?;
    shutdown.cancel();
    background.await?;

    println!("{}", serde_json::to_string_pretty(&ended)?);
    println!(
        "{} segments, {:.0} m in {:?}; resync: {}",
        recorder.segment_count(),
        ended.total_distance_m,
        recorder.elapsed(),
        serde_json::to_string(&report)?
    );
    Ok(())
}

async fn print_sessions(app: &App) -> Result<()> {
    let sessions = app.sync.sessions().await?;
    if sessions.is_empty() {
        println!("No sessions");
        return Ok(());
    }
    for session in sessions {
        println!(
            "{}  {}  {:>9}  {:>8.2} km  {:>6}  {}",
            session.local_id,
            session.started_at.format("%Y-%m-%d %H:%M"),
            session.status.as_str(),
            session.total_distance_m / 1000.0,
            session
                .average_roughness
                .map(|r| format!("{:.1}", r))
                .unwrap_or_else(|| "-".to_string()),
            session.sync_state.as_str(),
        );
    }
    Ok(())
}

async fn print_segments(app: &App, id: &str) -> Result<()> {
    for segment in app.sync.segments(id).await? {
        let category = RoughnessCategory::from_score(segment.average_roughness);
        println!(
            "{}  {:>5.1}  {:<10} {}  {}",
            segment.created_at.format("%H:%M:%S"),
            segment.average_roughness,
            category.label(),
            category.color_hex(),
            segment.wkt_linestring(),
        );
    }
    Ok(())
}
