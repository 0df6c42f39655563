//! TLS Bridge command line tool
//!
//! This binary is the command-line interface for the plaintext-to-TLS bridge.

use clap::Parser;
use log::{info, warn};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::signal;

use tls_bridge::common::{display_addr, find_free_port, init_logger};
use tls_bridge::config::{defaults, ConfigLoader, ConfigValidator, ProxyConfig, CONFIG_FILE_ENV};
use tls_bridge::{ProxyEvent, ProxyObserver, ProxyServer, Result, ServerOptions, APP_NAME, VERSION};

/// TLS Bridge: expose a TLS-only upstream as a local plaintext endpoint
#[derive(Parser, Debug)]
#[clap(version = VERSION, about, long_about = None)]
struct Args {
    /// Upstream TLS server address
    #[clap(short = 'u', long, alias = "ua")]
    upstream_address: Option<String>,

    /// Upstream TLS server port [default: 443]
    #[clap(long, alias = "up")]
    upstream_port: Option<u16>,

    /// Local plaintext listening address [default: 0.0.0.0]
    #[clap(short = 'a', long, alias = "la")]
    local_address: Option<String>,

    /// Local plaintext listening port [default: first free port from 8000]
    #[clap(short = 'p', long, alias = "lp")]
    local_port: Option<u16>,

    /// Print minimal information
    #[clap(short, long)]
    quiet: bool,

    /// Print no information (implies --quiet)
    #[clap(short, long)]
    silent: bool,

    /// Log level (error, warn, info, debug, trace)
    #[clap(long)]
    log_level: Option<String>,

    /// Load configuration from a JSON file
    #[clap(long, env = CONFIG_FILE_ENV)]
    config_file: Option<PathBuf>,

    /// Do not verify the upstream certificate
    #[clap(long)]
    insecure: bool,

    /// Additional CA bundle (PEM) for verifying the upstream
    #[clap(long)]
    ca_file: Option<PathBuf>,

    /// Name used for SNI and certificate verification instead of the address
    #[clap(long)]
    server_name: Option<String>,

    /// Upstream handshake timeout in seconds [default: none]
    #[clap(long, value_name = "SECONDS")]
    handshake_timeout: Option<u64>,
}

impl Args {
    /// Apply command line values on top of the loaded configuration
    fn apply(&self, config: &mut ProxyConfig) {
        if let Some(host) = &self.upstream_address {
            config.upstream_host = host.clone();
        }
        if let Some(port) = self.upstream_port {
            config.upstream_port = port;
        }
        if let Some(address) = &self.local_address {
            config.local_address = address.clone();
        }
        if self.local_port.is_some() {
            config.local_port = self.local_port;
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        } else if self.silent {
            config.log_level = "error".to_string();
        }
        if self.insecure {
            config.insecure = true;
        }
        if let Some(ca_file) = &self.ca_file {
            config.ca_file = Some(ca_file.clone());
        }
        if let Some(name) = &self.server_name {
            config.server_name = Some(name.clone());
        }
        if self.handshake_timeout.is_some() {
            config.handshake_timeout = self.handshake_timeout;
        }
    }

    fn quiet(&self) -> bool {
        self.quiet || self.silent
    }
}

/// Console line for a non-error lifecycle event
///
/// Handshake time is printed in seconds with millisecond resolution.
fn console_line(event: &ProxyEvent) -> Option<String> {
    match event {
        ProxyEvent::ConnectionStarted { id } => Some(format!("connect {}", id)),
        ProxyEvent::ConnectionEstablished { id, elapsed } => Some(format!(
            "connected {}: {}",
            id,
            elapsed.as_millis() as f64 / 1000.0
        )),
        ProxyEvent::ConnectionEnded { id } => Some(format!("finished {}", id)),
        ProxyEvent::Error { .. } => None,
    }
}

/// Print lifecycle events to the console
///
/// Errors are always printed, even when quiet.
fn console_observer(quiet: bool) -> impl ProxyObserver {
    move |event: ProxyEvent| match event {
        ProxyEvent::Error { error, .. } => eprintln!("{}", error),
        _ if quiet => {}
        event => {
            if let Some(line) = console_line(&event) {
                println!("{}", line);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Defaults < config file < environment < command line
    let mut config = ProxyConfig::load(args.config_file.as_deref())?;
    args.apply(&mut config);

    // Initialize logger
    init_logger(config.log_level());

    info!("Starting {} v{}", APP_NAME, VERSION);

    for warning in config.check_warnings() {
        warn!("{}", warning);
    }
    config.validate()?;

    let local_addr = match config.local_socket_addr()? {
        Some(addr) => addr,
        None => {
            let ip = config.local_ip()?;
            SocketAddr::new(ip, find_free_port(ip, defaults::FREE_PORT_BASE)?)
        }
    };

    let server = ProxyServer::with_observer(
        ServerOptions::from(&config),
        console_observer(args.quiet()),
    )?;
    info!("Upstream: {}", server.upstream());

    let handle = server.listen(local_addr).await?;

    if !args.silent {
        println!("Listening on http://{}", display_addr(handle.local_addr()));
    }

    signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down");

    handle.shutdown().await
}
