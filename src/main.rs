use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use utslink::cli;
use utslink::config::Config;
use utslink::instrument::{Mode, Role};
use utslink::observe::{Filter, ObservationRequest};

#[derive(Parser)]
#[command(name = "utslink")]
#[command(about = "Point and expose a remotely operated telescope")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Observatory server to talk to (overrides the config file)
    #[arg(short, long)]
    server: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Point the telescope and start an exposure
    Observe {
        /// Right ascension, hh:mm:ss
        #[arg(long, allow_hyphen_values = true)]
        ra: String,

        /// Declination, [+-]dd:mm:ss
        #[arg(long, allow_hyphen_values = true)]
        dec: String,

        /// Coordinate epoch
        #[arg(long, default_value = "J2000")]
        epoch: String,

        /// red, blue, green, lunar or clear
        #[arg(short, long)]
        filter: Filter,

        /// Seconds per exposure
        #[arg(short, long)]
        exptime: u32,

        /// Number of exposures
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,

        /// Object name used for the image files
        #[arg(short, long)]
        object: Option<String>,

        /// Keep polling until the exposures are done
        #[arg(short, long)]
        wait: bool,
    },

    /// Show whether the instrument is busy
    Status {
        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Poll until the instrument is idle
    Watch,

    /// Read a property from one role
    Get {
        role: Role,
        property: String,

        /// status or control
        #[arg(short, long, default_value = "status")]
        mode: Mode,
    },

    /// Set a property on one role
    Set {
        role: Role,
        property: String,
        value: String,
    },

    /// Wait for a property change on one role
    Notify { role: Role, property: String },

    /// List the configured service endpoints
    Servers,

    /// Write a default config file
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(Config::default_path);

    if let Commands::Init { force } = cli.command {
        if config_path.exists() && !force {
            anyhow::bail!(
                "Config already exists at {} (use --force to overwrite)",
                config_path.display()
            );
        }
        let mut config = Config::default();
        if let Some(server) = cli.server {
            config.observatory.server = server;
        }
        config.save(&config_path)?;
        println!("Config saved to: {}", config_path.display());
        println!(
            "Add the service ports under [directory.\"{}\"]",
            config.observatory.server
        );
        return Ok(());
    }

    let mut config = Config::load_or_default(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    if let Some(server) = cli.server {
        config.observatory.server = server;
    }

    match cli.command {
        Commands::Observe {
            ra,
            dec,
            epoch,
            filter,
            exptime,
            count,
            object,
            wait,
        } => {
            let mut request =
                ObservationRequest::new(ra, dec, filter, exptime, count).with_epoch(epoch);
            if let Some(object) = object {
                request = request.with_object(object);
            }
            cli::observe(&config, request, wait).await?;
        }

        Commands::Status { json } => {
            cli::show_status(&config, json).await?;
        }

        Commands::Watch => {
            cli::watch(&config).await?;
        }

        Commands::Get {
            role,
            property,
            mode,
        } => {
            cli::get_property(&config, role, &property, mode).await?;
        }

        Commands::Set {
            role,
            property,
            value,
        } => {
            cli::set_property(&config, role, &property, &value).await?;
        }

        Commands::Notify { role, property } => {
            cli::notify_property(&config, role, &property).await?;
        }

        Commands::Servers => {
            cli::list_servers(&config)?;
        }

        Commands::Init { .. } => {}
    }

    Ok(())
}
