//! broadwayd - Broadway display server
//!
//! Serves the HTML5 Broadway client and mirrors window state to it over a
//! WebSocket. With `--demo`, shows a test window and logs every input event.

use std::path::PathBuf;
use std::sync::Arc;

use broadway::config::{self, Config};
use broadway::surface::Surface;
use broadway::{auth, DisplayEvent, ServerError};
use clap::{Parser as ClapParser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// broadwayd - Broadway display server
///
/// Open http://ADDRESS:PORT/ in a browser to connect.
#[derive(ClapParser, Debug)]
#[command(name = "broadwayd", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Address to listen on [default: 127.0.0.1]
    #[arg(long, env = "BROADWAY_ADDRESS")]
    address: Option<String>,

    /// Port to listen on [default: 8080]
    #[arg(long, short, env = "BROADWAY_PORT")]
    port: Option<u16>,

    /// Config file (defaults to broadway/broadway.toml in the user config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Password file (defaults to broadway.passwd in the user config dir)
    #[arg(long, env = "BROADWAY_PASSWORD_FILE")]
    password_file: Option<PathBuf>,

    /// Show a test window and log input events
    #[arg(long)]
    demo: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print a password file line for PASSWORD
    HashPassword { password: String },
}

const DEMO_SIZE: u32 = 256;

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    let cli = Cli::parse();

    if let Some(Commands::HashPassword { password }) = &cli.command {
        println!("{}", auth::hash_password(password));
        return Ok(());
    }

    init_tracing();
    run_server(cli).await
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "broadway=info,broadwayd=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(cli: &Cli) -> Result<Config, ServerError> {
    let path = cli.config.clone().or_else(config::default_config_path);
    let mut config = match path {
        Some(path) => Config::load(&path)?.unwrap_or_default(),
        None => Config::default(),
    };
    if cli.address.is_some() {
        config.address = cli.address.clone();
    }
    if cli.port.is_some() {
        config.port = cli.port;
    }
    if cli.password_file.is_some() {
        config.password_file = cli.password_file.clone();
    }
    Ok(config)
}

async fn run_server(cli: Cli) -> Result<(), ServerError> {
    tracing::info!("broadwayd starting");

    let config = load_config(&cli)?;
    let password = config
        .password_file()
        .and_then(|path| auth::load_password_file(&path));
    if password.is_some() {
        tracing::info!("password authentication enabled");
    }

    let address = config.address();
    let addr = if address.contains(':') {
        format!("[{address}]:{}", config.port())
    } else {
        format!("{address}:{}", config.port())
    };

    let running = broadway::start(&addr, password, config.max_request_size()).await?;
    tracing::info!(addr = %running.addr, "broadwayd ready");

    let events = tokio::spawn(log_events(running.events, cli.demo));

    if cli.demo {
        let handle = running.handle.clone();
        let id = handle.new_window(0, 0, DEMO_SIZE as i32, DEMO_SIZE as i32, false).await?;
        handle.window_show(id).await?;
        handle.window_update(id, Arc::new(gradient(DEMO_SIZE))).await?;
        tracing::info!(window = id, "demo window created");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("received Ctrl+C");
    running.cancel.cancel();
    events.abort();

    tracing::info!("broadwayd exiting");
    Ok(())
}

async fn log_events(mut events: mpsc::UnboundedReceiver<DisplayEvent>, verbose: bool) {
    while let Some(event) = events.recv().await {
        if verbose {
            tracing::info!(client = ?event.client_id, message = ?event.message, "input event");
        } else {
            tracing::debug!(client = ?event.client_id, message = ?event.message, "input event");
        }
    }
}

fn gradient(size: u32) -> Surface {
    let pixels: Vec<u32> = (0..size)
        .flat_map(|y| {
            (0..size).map(move |x| {
                let r = x * 255 / size.max(1);
                let g = y * 255 / size.max(1);
                0xFF00_0000 | (r << 16) | (g << 8) | 0x80
            })
        })
        .collect();
    Surface::from_argb(size, size, &pixels)
}
