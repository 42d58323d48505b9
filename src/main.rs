mod app;
mod config;
mod db;
mod guard;
mod logging;
mod net;
mod queue;
mod tiles;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "safetrail")]
#[command(about = "Offline SOS queue and map-tile cache for travellers")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/safetrail/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Send an SOS now, or queue it if the backend is unreachable
  Sos {
    #[arg(long, allow_hyphen_values = true)]
    lat: f64,
    #[arg(long, allow_hyphen_values = true)]
    lng: f64,
    /// Free-text message for responders
    #[arg(short, long)]
    message: Option<String>,
  },
  /// Inspect or maintain the offline SOS queue
  #[command(subcommand)]
  Queue(QueueCommand),
  /// Inspect or maintain the map-tile cache
  #[command(subcommand)]
  Tiles(TilesCommand),
  /// Run until interrupted, replaying queued SOS events when online
  Watch,
}

#[derive(Subcommand, Debug)]
enum QueueCommand {
  /// List pending SOS events
  List,
  /// Try to deliver pending SOS events now
  Replay,
  /// Remove SOS events older than the age horizon
  Sweep {
    /// Age horizon in days (default: queue.max_age_days)
    #[arg(long)]
    days: Option<u32>,
  },
  /// Remove every queued SOS event
  Clear,
}

#[derive(Subcommand, Debug)]
enum TilesCommand {
  /// Fetch a tile through the cache
  Get {
    url: String,
    /// Write the tile bytes here
    #[arg(short, long)]
    out: Option<PathBuf>,
  },
  /// Show cache size and entry count
  Stats,
  /// Remove every cached tile
  Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.data_dir()?.join("logs"))?;

  let app = app::App::new(config)?;

  match args.command {
    Command::Sos { lat, lng, message } => app.sos(lat, lng, message).await?,
    Command::Queue(cmd) => match cmd {
      QueueCommand::List => app.list_queue()?,
      QueueCommand::Replay => app.replay().await?,
      QueueCommand::Sweep { days } => app.sweep(days)?,
      QueueCommand::Clear => app.clear_queue()?,
    },
    Command::Tiles(cmd) => match cmd {
      TilesCommand::Get { url, out } => app.get_tile(&url, out.as_deref()).await?,
      TilesCommand::Stats => app.tile_stats()?,
      TilesCommand::Clear => app.clear_tiles()?,
    },
    Command::Watch => app.watch().await?,
  }

  Ok(())
}
