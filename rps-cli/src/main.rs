//! Remote-play client: entry point.
//!
//! ```text
//! rps hosts                     List known hosts
//! rps set <name> [options]      Create or edit a host entry
//! rps gen-config [-o <path>]    Dump default config and exit
//! rps --config <path> ...       Use custom config TOML
//! ```

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use rps_core::{HostRegistry, Settings, VideoFps, VideoResolution};
use rps_cli::config::ClientConfig;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "rps", about = "Remote-play client host manager")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "rps.toml")]
    config: PathBuf,

    /// Host settings file (overrides config).
    #[arg(long)]
    hosts_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List known hosts.
    Hosts,
    /// Create or edit a host entry.
    Set {
        /// Host name (settings section).
        name: String,
        /// Console IP address.
        #[arg(long)]
        address: Option<IpAddr>,
        /// 360p, 540p, 720p or 1080p.
        #[arg(long)]
        resolution: Option<VideoResolution>,
        /// 30 or 60.
        #[arg(long)]
        fps: Option<VideoFps>,
        /// PSN online id (firmware below 7.0).
        #[arg(long)]
        online_id: Option<String>,
        /// Base64 PSN account id (firmware 7.0 and later).
        #[arg(long)]
        account_id: Option<String>,
    },
    /// Print the default configuration (or write it to a file) and exit.
    GenConfig {
        /// Write to this path instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Some(Command::GenConfig { output }) = &cli.command {
        match output {
            Some(path) => ClientConfig::write_default(path)?,
            None => println!("{}", toml::to_string_pretty(&ClientConfig::default())?),
        }
        return Ok(());
    }

    let mut config = ClientConfig::load(&cli.config);
    if let Some(path) = cli.hosts_file {
        config.storage.hosts_file = path;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("rps v{}", env!("CARGO_PKG_VERSION"));

    let registry = HostRegistry::new();
    let settings = Settings::new(&config.storage.hosts_file);
    settings.load(&registry)?;

    match cli.command.unwrap_or(Command::Hosts) {
        Command::Hosts => list_hosts(&registry),
        Command::Set {
            name,
            address,
            resolution,
            fps,
            online_id,
            account_id,
        } => {
            let host = registry.get_or_create(&name);
            {
                let mut record = host.lock();
                if let Some(address) = address {
                    record.address = address.to_string();
                }
                if let Some(resolution) = resolution {
                    record.video_resolution = resolution;
                }
                if let Some(fps) = fps {
                    record.video_fps = fps;
                }
                if let Some(id) = online_id {
                    record.online_id = id;
                }
                if let Some(id) = account_id {
                    record.account_id = id;
                }
            }
            settings.save(&registry)?;
            info!(host = %name, "host saved");
        }
        Command::GenConfig { .. } => {}
    }

    Ok(())
}

fn list_hosts(registry: &HostRegistry) {
    let hosts = registry.snapshot();
    if hosts.is_empty() {
        println!("no hosts");
        return;
    }
    for host in hosts {
        let pairing = match host.secrets() {
            Some(secrets) => format!("paired ({})", secrets.fingerprint()),
            None => "unpaired".to_string(),
        };
        println!(
            "{:<20} {:<16} {:>5}@{:<2} {}",
            host.name,
            if host.address.is_empty() { "-" } else { host.address.as_str() },
            host.video_resolution.as_str(),
            host.video_fps.as_u32(),
            pairing
        );
    }
}
