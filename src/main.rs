use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use phd2_client::{config, Phd2Config, Session};

#[derive(Parser)]
#[command(name = "phd2-cli")]
#[command(about = "Command-line client for PHD2's JSON-RPC guiding protocol")]
struct Args {
    /// Path to a JSON configuration file (overrides --host/--instance).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// PHD2 host address.
    #[arg(long, default_value = "localhost")]
    host: String,

    /// PHD2 instance number; port is 4400 + (instance - 1).
    #[arg(long, default_value_t = 1)]
    instance: u16,

    /// Log verbosity (trace, debug, info, warn, error); overridden by RUST_LOG.
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print current AppState and AvgDist.
    Status,
    /// Connect equipment in the named profile.
    ConnectEquipment { profile: String },
    /// Disconnect equipment.
    DisconnectEquipment,
    /// Start guiding and wait for it to settle.
    Guide {
        #[arg(long, default_value_t = 1.5)]
        pixels: f64,
        #[arg(long, default_value_t = 10.0)]
        time: f64,
        #[arg(long, default_value_t = 60.0)]
        timeout: f64,
    },
    /// Dither and wait for it to settle.
    Dither {
        #[arg(long, default_value_t = 3.0)]
        dither_pixels: f64,
        #[arg(long, default_value_t = 1.5)]
        settle_pixels: f64,
        #[arg(long, default_value_t = 10.0)]
        settle_time: f64,
        #[arg(long, default_value_t = 60.0)]
        settle_timeout: f64,
    },
    /// Start looping exposures and wait for AppState to become Looping.
    Loop {
        #[arg(long, default_value_t = 10)]
        timeout_seconds: u64,
    },
    /// Stop looping/guiding.
    Stop,
    /// Pause guiding.
    Pause,
    /// Resume guiding.
    Unpause,
    /// Capture a single frame.
    CaptureSingleFrame {
        #[arg(long)]
        exposure: Option<i64>,
        #[arg(long)]
        path: Option<String>,
    },
    /// Print cumulative guide statistics.
    Stats,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(args.log_level.clone())),
        )
        .init();

    let phd2_config = match &args.config {
        Some(path) => config::load_config(path)?.phd2,
        None => Phd2Config {
            host: args.host.clone(),
            instance: args.instance,
            ..Phd2Config::default()
        },
    };

    let command_timeout = Duration::from_secs(phd2_config.command_timeout_seconds);
    let mut session = Session::new(phd2_config);
    session.connect().await?;
    info!("connected");

    match args.command {
        Commands::Status => {
            let (state, avg_dist) = session.get_status().await?;
            println!("AppState={state} AvgDist={avg_dist}");
        }
        Commands::ConnectEquipment { profile } => {
            session.connect_equipment(&profile).await?;
            println!("equipment connected in profile {profile}");
        }
        Commands::DisconnectEquipment => {
            session.disconnect_equipment().await?;
            println!("equipment disconnected");
        }
        Commands::Guide { pixels, time, timeout } => {
            session.guide(pixels, time, timeout).await?;
            loop {
                let progress = session.check_settling().await?;
                if progress.done {
                    println!("settled: status={} error={:?}", progress.status, progress.error);
                    break;
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
        Commands::Dither {
            dither_pixels,
            settle_pixels,
            settle_time,
            settle_timeout,
        } => {
            session
                .dither(dither_pixels, settle_pixels, settle_time, settle_timeout)
                .await?;
            loop {
                let progress = session.check_settling().await?;
                if progress.done {
                    println!("settled: status={} error={:?}", progress.status, progress.error);
                    break;
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
        Commands::Loop { timeout_seconds } => {
            session.start_loop(Duration::from_secs(timeout_seconds)).await?;
            println!("looping");
        }
        Commands::Stop => {
            session.stop_capture(command_timeout).await?;
            println!("capture stopped");
        }
        Commands::Pause => {
            session.pause().await?;
            println!("paused");
        }
        Commands::Unpause => {
            session.unpause().await?;
            println!("unpaused");
        }
        Commands::CaptureSingleFrame { exposure, path } => {
            let save = path.is_some();
            session
                .capture_single_frame(exposure, None, None, None, path, Some(save))
                .await?;
            loop {
                if let Some(result) = session.check_single_frame().await? {
                    println!(
                        "capture complete: success={} path={:?} error={:?}",
                        result.success, result.path, result.error_message
                    );
                    break;
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }
        Commands::Stats => {
            let stats = session.get_stats().await?;
            println!(
                "rms_tot={:.3} rms_ra={:.3} rms_dec={:.3} peak_ra={:.3} peak_dec={:.3}",
                stats.rms_tot, stats.rms_ra, stats.rms_dec, stats.peak_ra, stats.peak_dec
            );
        }
    }

    session.disconnect().await;
    Ok(())
}
