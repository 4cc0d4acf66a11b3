//! Freedom Shaper
//!
//! A local TCP forwarder that:
//! - Accepts plain connections on a local address
//! - Dials the configured target through the freedom outbound rules
//! - Optionally wraps the outbound side in TLS so the real ClientHello is shaped

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use freedom_shaper::{
    config::{generate_example_config, Config, ForwardConfig, LoggingConfig},
    transport::{Destination, Dialer},
};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "tls")]
use freedom_shaper::transport::TlsDialer;

/// Freedom Shaper - outbound traffic shaping forwarder
#[derive(Parser, Debug)]
#[command(name = "freedom-shaper")]
#[command(about = "Forward local TCP connections through a shaped outbound")]
#[command(version)]
struct Args {
    /// Configuration file path (TOML, or JSON with a .json extension)
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Listen address (overrides config)
    #[arg(short, long)]
    listen: Option<String>,

    /// Target address (overrides config)
    #[arg(short, long)]
    target: Option<String>,

    /// Validate the configuration, print the built plan and exit
    #[arg(long)]
    check: bool,

    /// Print an example configuration and exit
    #[arg(long)]
    example: bool,

    /// Log level (overrides config)
    #[arg(short = 'v', long)]
    log_level: Option<String>,
}

/// Outbound side of every forwarded connection
struct Forwarder {
    dialer: Dialer,
    target: Destination,
    #[cfg(feature = "tls")]
    tls: Option<TlsDialer>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.example {
        let example = toml::to_string_pretty(&generate_example_config())
            .context("Failed to render example config")?;
        println!("{}", example);
        return Ok(());
    }

    let config = Config::load(&args.config).context("Failed to load configuration")?;
    init_logging(&config.logging, args.log_level.as_deref())?;

    let plan = Arc::new(config.plan().context("Invalid [freedom] settings")?);

    if args.check {
        println!("{:#?}", plan);
        return Ok(());
    }

    let mut forward = config.forward.clone().unwrap_or_else(|| {
        warn!("No [forward] section in config file, using defaults");
        ForwardConfig::default()
    });
    if let Some(listen) = args.listen {
        forward.listen = listen;
    }
    if let Some(target) = args.target {
        forward.target = target;
    }

    let dialer = Dialer::new(config.transport.clone(), Arc::clone(&plan));
    let target = Destination::parse(&forward.target).context("Invalid target address")?;

    info!("Freedom Shaper v{}", freedom_shaper::VERSION);
    info!("Target: {}", target);
    info!("Domain strategy: {:?}", plan.domain_strategy);
    match &plan.fragment {
        Some(fragment) => info!("Fragment: {:?}", fragment.mode),
        None => info!("Fragment: disabled"),
    }
    info!("Noise packets: {}", plan.noise.descriptors.len());

    let forwarder = Arc::new(build_forwarder(dialer, target, &forward)?);

    let listener = TcpListener::bind(&forward.listen)
        .await
        .with_context(|| format!("Failed to bind {}", forward.listen))?;
    info!("Listening on {}", forward.listen);

    tokio::select! {
        result = accept_loop(listener, forwarder) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
        }
    }

    Ok(())
}

#[cfg(feature = "tls")]
fn build_forwarder(dialer: Dialer, target: Destination, forward: &ForwardConfig) -> Result<Forwarder> {
    let tls = match &forward.tls_sni {
        Some(sni) => {
            info!("TLS wrapping enabled, SNI: {}", sni);
            let connector = TlsDialer::new(dialer.clone(), sni.clone())
                .map_err(|e| anyhow!("Failed to set up TLS: {}", e))?;
            Some(connector)
        }
        None => {
            info!("TLS wrapping disabled (raw TCP)");
            None
        }
    };
    Ok(Forwarder { dialer, target, tls })
}

#[cfg(not(feature = "tls"))]
fn build_forwarder(dialer: Dialer, target: Destination, forward: &ForwardConfig) -> Result<Forwarder> {
    if forward.tls_sni.is_some() {
        return Err(anyhow!("tls_sni is set but TLS support is not compiled in"));
    }
    Ok(Forwarder { dialer, target })
}

async fn accept_loop(listener: TcpListener, forwarder: Arc<Forwarder>) -> Result<()> {
    loop {
        let (inbound, peer) = listener.accept().await.context("Accept failed")?;
        let forwarder = Arc::clone(&forwarder);
        tokio::spawn(async move {
            debug!("Accepted connection from {}", peer);
            if let Err(e) = forward_connection(inbound, &forwarder).await {
                error!("Connection from {} failed: {}", peer, e);
            }
        });
    }
}

async fn forward_connection(mut inbound: TcpStream, forwarder: &Forwarder) -> Result<()> {
    inbound.set_nodelay(true).ok();

    #[cfg(feature = "tls")]
    {
        if let Some(tls) = &forwarder.tls {
            let mut outbound = tls.dial(forwarder.target.clone()).await?;
            let (up, down) = tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await?;
            debug!(up, down, "connection finished");
            return Ok(());
        }
    }

    let mut outbound = forwarder.dialer.dial(forwarder.target.clone()).await?;
    let (up, down) = tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await?;
    debug!(up, down, "connection finished");
    Ok(())
}

fn init_logging(logging: &LoggingConfig, level_override: Option<&str>) -> Result<()> {
    let level = level_override.unwrap_or(logging.level.as_str());
    let filter = EnvFilter::try_new(level).with_context(|| format!("Invalid log level {:?}", level))?;

    let writer = match &logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path))?;
            BoxMakeWriter::new(std::sync::Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);

    match logging.format.as_str() {
        "json" => builder.json().init(),
        "compact" => builder.compact().init(),
        _ => builder.pretty().init(),
    }

    Ok(())
}
