//! golive - capture a live clip and publish it
//!
//! Subcommands:
//! - `golive record` - open the camera, record, preview and upload
//! - `golive init` - write a default configuration file

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use golive_capture::session::SessionEvent;
use golive_capture::utils::ErrorResponse;
use golive_capture::{
    load_config, save_config, CaptureSession, Category, GoLiveConfig, SessionError, SessionServices,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Parser)]
#[command(name = "golive")]
#[command(about = "Record a short clip and publish it as a live post")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(long, env = "GOLIVE_CONFIG", default_value = "golive.json", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record from the camera and upload the clip
    Record {
        /// Feed category, case-insensitive (General, Crime, Protest, Accident, Riot, Traffic, Fight, Politics, Trending)
        #[arg(long, default_value = "General")]
        category: Category,

        /// Caption shown with the post
        #[arg(long)]
        caption: String,

        /// Recording length in seconds
        #[arg(long, default_value = "10")]
        seconds: u64,

        /// Keep the preview file and print its path instead of uploading
        #[arg(long)]
        dry_run: bool,
    },

    /// Write the default configuration
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn report(error: SessionError) -> anyhow::Error {
    let response = ErrorResponse::from(&error);
    tracing::debug!("Session error detail: {}", error);
    anyhow!("{} [{}]", response.message, response.code)
}

async fn record(config: GoLiveConfig, category: Category, caption: String, seconds: u64, dry_run: bool) -> Result<()> {
    let services = SessionServices::from_config(&config).map_err(report)?;
    let session = CaptureSession::new(services, config.capture.clone());

    let mut events = session.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SessionEvent::StateChanged { from, to } => tracing::debug!("{} -> {}", from, to),
                SessionEvent::ChunksReceived(count) => tracing::trace!("{} chunks received", count),
                SessionEvent::Notice(notice) => tracing::info!("{}", notice.message),
                SessionEvent::Closed => break,
            }
        }
    });

    // Ctrl-C tears the session down from any phase, including open and upload
    let interrupt = session.cancel_when(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Unable to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    });

    let result = capture_and_publish(&session, &interrupt, category, caption, seconds, dry_run).await;
    let interrupted = interrupt.is_finished();
    interrupt.abort();
    session.cancel();

    match result {
        Err(_) if interrupted => Err(anyhow!("Cancelled")),
        other => other,
    }
}

async fn capture_and_publish(
    session: &CaptureSession,
    interrupt: &JoinHandle<()>,
    category: Category,
    caption: String,
    seconds: u64,
    dry_run: bool,
) -> Result<()> {
    session.open(category).await.map_err(report)?;
    session.set_caption(&caption).map_err(report)?;
    session.start_recording().await.map_err(report)?;
    println!("Recording for {}s, press Ctrl-C to cancel", seconds);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(seconds);
    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    while tokio::time::Instant::now() < deadline {
        ticker.tick().await;
        if interrupt.is_finished() {
            return Err(anyhow!("Cancelled"));
        }
        session.poll_chunks();
    }

    let artifact = session.stop_recording().await.map_err(report)?;
    println!(
        "Recorded {} bytes in {} chunks ({})",
        artifact.len(),
        artifact.chunk_count(),
        artifact.mime_type()
    );

    if dry_run {
        let path = session.preview_playback_path().map_err(report)?;
        let kept = path.with_file_name(format!("golive-{}.{}", artifact.id(), artifact.extension()));
        std::fs::copy(&path, &kept)?;
        println!("Preview saved to {}", kept.display());
        return Ok(());
    }

    let receipt = session.submit().await.map_err(report)?;
    println!("{} ({})", receipt.message, receipt.status);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    golive_capture::init_tracing();

    match cli.command {
        Commands::Record {
            category,
            caption,
            seconds,
            dry_run,
        } => {
            let mut config = load_config(&cli.config)?;
            config.apply_env_overrides();
            record(config, category, caption, seconds, dry_run).await?;
        }
        Commands::Init { force } => {
            if cli.config.exists() && !force {
                return Err(anyhow!("{} already exists (use --force)", cli.config.display()));
            }
            save_config(&cli.config, &GoLiveConfig::default())?;
            println!("Wrote {}", cli.config.display());
        }
    }

    Ok(())
}
