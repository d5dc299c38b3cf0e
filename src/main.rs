//! windrelay CLI
//!
//! - `windrelay feed`: read samples, normalize, and forward them to a server
//! - `windrelay serve`: run the broadcast server
//! - `windrelay init-config`: print or write a default config file
//!
//! Settings come from the config file (`--config`, or the default search
//! path), then `WINDRELAY_*` environment variables, then command-line flags.

use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use windrelay::config::{generate_default_config, Config};
use windrelay::connection::ConnectionManager;
use windrelay::logging;
use windrelay::producer::{Producer, ProducerStats};
use windrelay::server::{self, AppState, EmbeddedFeed};
use windrelay::source::{open_source, SampleSource};

#[derive(Parser)]
#[command(name = "windrelay")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Wind turbine telemetry relay")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: search the standard locations)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Forward normalized samples to a broadcast server
    Feed {
        /// Broadcast server URL (e.g., ws://collector:15064/ws)
        #[arg(long)]
        server_url: Option<String>,
        /// Data-acquisition device address
        #[arg(long)]
        address: Option<String>,
        /// Buffer UUID or index
        #[arg(long)]
        buffer: Option<String>,
        /// JSON-lines sample input, "-" for stdin
        #[arg(short, long)]
        input: Option<String>,
        /// Delay after each sample in ms (0 = unpaced)
        #[arg(long)]
        pacing_ms: Option<u64>,
        /// Connect attempts before giving up (0 = forever)
        #[arg(long)]
        max_attempts: Option<u32>,
        /// Event name records are sent under
        #[arg(long)]
        event: Option<String>,
    },

    /// Run the broadcast server
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
        /// Stream samples from this JSON-lines input to subscribers
        #[arg(long)]
        source: Option<String>,
        /// Pacing for the embedded stream in ms
        #[arg(long)]
        pacing_ms: Option<u64>,
        /// Event name records are relayed under
        #[arg(long)]
        event: Option<String>,
    },

    /// Write a default config file
    InitConfig {
        /// Destination (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    if let Commands::InitConfig { output } = &cli.command {
        return init_config(output.as_ref());
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };

    match cli.command {
        Commands::Feed {
            server_url,
            address,
            buffer,
            input,
            pacing_ms,
            max_attempts,
            event,
        } => {
            if let Some(url) = server_url {
                config.connection.server_url = url;
            }
            if let Some(address) = address {
                config.feeder.device_address = address;
            }
            if let Some(buffer) = buffer {
                config.feeder.buffer = buffer;
            }
            if let Some(input) = input {
                config.feeder.input = input;
            }
            if let Some(pacing_ms) = pacing_ms {
                config.feeder.pacing_ms = pacing_ms;
            }
            if let Some(attempts) = max_attempts {
                config.connection.max_attempts = attempts;
            }
            if let Some(event) = event {
                config.connection.data_event = event;
            }

            logging::init(&config.logging);
            run_feed(&config).await
        }
        Commands::Serve {
            host,
            port,
            source,
            pacing_ms,
            event,
        } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if source.is_some() {
                config.server.source = source;
            }
            if let Some(pacing_ms) = pacing_ms {
                config.feeder.pacing_ms = pacing_ms;
            }
            if let Some(event) = event {
                config.server.data_event = event;
            }

            logging::init(&config.logging);
            run_server(&config).await
        }
        Commands::InitConfig { .. } => Ok(()),
    }
}

async fn run_feed(config: &Config) -> Result<(), Box<dyn Error>> {
    tracing::info!("windrelay feeder v{}", env!("CARGO_PKG_VERSION"));

    let buffer = config.feeder.buffer_selector()?;
    tracing::info!(
        address = %config.feeder.device_address,
        buffer = %buffer,
        input = %config.feeder.input,
        "Opening device session"
    );
    let source = open_source(&config.feeder.input)?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            server::shutdown_signal().await;
            cancel.cancel();
        }
    });

    let mut link = ConnectionManager::new(config.connection.link_config());
    let producer = Producer::new(config.feeder.producer_config());

    let result = forward(&mut link, &producer, source, &cancel).await;
    link.disconnect().await;

    let stats = result?;
    tracing::info!(%stats, link = ?link.stats(), "Feeder stopped");
    Ok(())
}

/// Connect, then pump samples until the source ends or Ctrl-C
async fn forward(
    link: &mut ConnectionManager,
    producer: &Producer,
    source: Box<dyn SampleSource>,
    cancel: &CancellationToken,
) -> Result<ProducerStats, Box<dyn Error>> {
    tokio::select! {
        connected = link.connect() => connected?,
        _ = cancel.cancelled() => return Ok(ProducerStats::default()),
    }
    Ok(producer.run(source, link, cancel.clone()).await?)
}

async fn run_server(config: &Config) -> Result<(), Box<dyn Error>> {
    tracing::info!("windrelay server v{}", env!("CARGO_PKG_VERSION"));

    let runtime = config.server.to_server_config();
    let mut state = AppState::new(runtime.clone());

    if let Some(input) = &config.server.source {
        tracing::info!(input = %input, "Embedded stream enabled");
        let source = open_source(input)?;
        let feed = EmbeddedFeed::new(
            source,
            config.feeder.producer_config(),
            Arc::clone(&state.hub),
            runtime.data_event.clone(),
            state.shutdown.child_token(),
        );
        state = state.with_feed(feed);
    }

    server::serve(state, &runtime).await?;
    Ok(())
}

fn init_config(output: Option<&PathBuf>) -> Result<(), Box<dyn Error>> {
    let content = generate_default_config();
    match output {
        Some(path) => {
            if path.exists() {
                return Err(format!("{} already exists", path.display()).into());
            }
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, content)?;
            println!("Wrote {}", path.display());
        }
        None => print!("{}", content),
    }
    Ok(())
}
