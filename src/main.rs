use anyhow::Result;
use clap::Parser;
use log::{error, info, LevelFilter};
use planestream::config::ServerSettings;
use planestream::engine::RoiMeanFactory;
use planestream::server::EventServer;
use planestream::session::{Collaborators, SessionController, SessionOutcome};
use planestream::sources::{ConsolePicker, RawStackDecoder};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// Stream multi-plane acquisitions into per-plane online estimators
#[derive(Parser, Debug)]
#[command(name = "planestream", version, about)]
struct Cli {
    /// Rig settings JSON; built-in defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    ip: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    /// Logging detail: 0 info, 1 debug, 2 debug plus dependencies, 3 everything
    #[arg(short, long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=3))]
    debug: u8,

    /// Second location for final outputs
    #[arg(short, long)]
    output_folder: Option<PathBuf>,
}

fn init_logging(level: u8) {
    let (own, others) = match level {
        0 => (LevelFilter::Info, LevelFilter::Warn),
        1 => (LevelFilter::Debug, LevelFilter::Warn),
        2 => (LevelFilter::Debug, LevelFilter::Info),
        _ => (LevelFilter::Debug, LevelFilter::Debug),
    };
    let mut builder = env_logger::Builder::new();
    builder.filter_level(others).filter_module("planestream", own);
    if level < 3 {
        builder.filter_module("tungstenite", LevelFilter::Warn);
        builder.filter_module("tokio_tungstenite", LevelFilter::Warn);
    }
    builder.format_timestamp_secs().init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let mut settings = match &cli.config {
        Some(path) => ServerSettings::load(path)?,
        None => ServerSettings::default(),
    };
    if let Some(ip) = cli.ip {
        settings.ip = ip;
    }
    if let Some(port) = cli.port {
        settings.port = port;
    }
    if cli.output_folder.is_some() {
        settings.output_folder = cli.output_folder;
    }

    let collaborators = Collaborators {
        decoder: Arc::new(RawStackDecoder::new(settings.frame_height, settings.frame_width)),
        picker: Arc::new(ConsolePicker),
        estimators: Arc::new(RoiMeanFactory::default()),
    };

    let (event_tx, mut event_rx) = mpsc::channel::<String>(1024);
    let server = EventServer::bind(&settings.address()).await?;
    let listener = server.spawn(event_tx);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received");
            let _ = shutdown_tx.send(());
        }
    });

    let mut controller = SessionController::new(settings, collaborators).with_shutdown(shutdown_rx);
    controller.run(&mut event_rx).await;

    listener.abort();
    match controller.outcome() {
        Some(SessionOutcome::Aborted { reason }) => {
            error!("Session aborted: {}", reason);
            std::process::exit(1);
        }
        _ => {
            info!("Done");
            Ok(())
        }
    }
}
