//! flex CLI
//!
//! Talks to other nodes of a flex overlay through a relay.

mod config;

use anyhow::Context;
use clap::{Parser, Subcommand};
use flex_core::{Channel, Node};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use config::Config;

/// flex - streams and pings over a relay
#[derive(Parser)]
#[command(name = "flex")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Enable protocol-level tracing
    #[arg(long)]
    debug: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Relay `host:port` or `ws://` URL, overriding the config file
    #[arg(short, long)]
    relay: Option<String>,

    /// Domain to register, overriding the config file
    #[arg(short, long)]
    domain: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Measure round-trip time to a domain
    Ping {
        /// Target domain
        #[arg(required = true)]
        domain: String,

        /// Number of pings
        #[arg(short = 'n', long, default_value_t = 4)]
        count: u32,

        /// Per-ping timeout in milliseconds
        #[arg(short, long, default_value_t = 5000)]
        timeout: u64,
    },

    /// Open a stream and pipe it to stdin/stdout
    Dial {
        /// Target domain
        #[arg(required = true)]
        domain: String,

        /// Target port
        #[arg(required = true)]
        port: u16,

        /// Shared secret; wraps the stream in a secret tunnel
        #[arg(short, long)]
        secret: Option<String>,
    },

    /// Echo back everything received on a port
    Listen {
        /// Port to bind
        #[arg(required = true)]
        port: u16,

        /// Shared secret; accept only secret tunnels
        #[arg(short, long)]
        secret: Option<String>,
    },

    /// Show or create the configuration file
    Config {
        /// Write a default configuration file
        #[arg(long)]
        init: bool,

        /// Print the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config = if cli.config.is_some() {
        Config::load(&config_path)?
    } else {
        Config::load_or_default(&config_path)?
    };
    if let Some(relay) = cli.relay {
        config.relay.endpoint = relay;
    }
    if let Some(domain) = cli.domain {
        config.node.domain = domain;
    }

    // Initialize logging
    let level = if cli.debug {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Validate configuration
    config.validate()?;

    match cli.command {
        Commands::Ping {
            domain,
            count,
            timeout,
        } => {
            ping(&config, &domain, count, Duration::from_millis(timeout)).await?;
        }
        Commands::Dial {
            domain,
            port,
            secret,
        } => {
            dial(&config, &domain, port, secret).await?;
        }
        Commands::Listen { port, secret } => {
            listen(&config, port, secret).await?;
        }
        Commands::Config { init, show } => {
            manage_config(&config, &config_path, init, show)?;
        }
    }

    Ok(())
}

async fn connect(config: &Config) -> anyhow::Result<Node> {
    let node = Node::connect(
        &config.relay.endpoint,
        &config.node.credential,
        config.to_node_config(),
    )
    .await
    .with_context(|| format!("connecting to relay {}", config.relay.endpoint))?;
    tracing::info!(
        "connected as {} (ip {:?})",
        node.domain(),
        node.ip()
    );
    Ok(node)
}

/// Ping a domain `count` times
async fn ping(config: &Config, domain: &str, count: u32, timeout: Duration) -> anyhow::Result<()> {
    let node = connect(config).await?;
    let mut answered = 0u32;

    for seq in 0..count {
        match node.ping(domain, timeout).await {
            Ok(rtt) => {
                answered += 1;
                println!(
                    "reply from {}: seq={} time={:.2} ms",
                    domain,
                    seq,
                    rtt.as_secs_f64() * 1000.0
                );
            }
            Err(e) => println!("{}: seq={} {}", domain, seq, e),
        }
        if seq + 1 < count {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    println!(
        "--- {} ping statistics ---\n{} sent, {} answered",
        domain, count, answered
    );
    node.disconnect().await;
    Ok(())
}

/// Dial a domain and pipe stdin/stdout through the stream
async fn dial(config: &Config, domain: &str, port: u16, secret: Option<String>) -> anyhow::Result<()> {
    let node = connect(config).await?;

    match secret {
        Some(secret) => {
            let tunnel = node
                .dial_secret(domain, port, secret.as_bytes())
                .await
                .with_context(|| format!("opening secret tunnel to {domain}:{port}"))?;
            pipe_stdio(tunnel).await?;
        }
        None => {
            let stream = node
                .dial(domain, port)
                .await
                .with_context(|| format!("dialing {domain}:{port}"))?;
            pipe_stdio(stream).await?;
        }
    }

    node.disconnect().await;
    Ok(())
}

enum Step {
    Input(Option<Vec<u8>>),
    Remote(Option<Vec<u8>>),
}

async fn pipe_stdio<C: Channel>(mut channel: C) -> anyhow::Result<()> {
    let (tx, mut input) = mpsc::channel::<Vec<u8>>(16);
    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = vec![0u8; 16 * 1024];
        loop {
            match stdin.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut stdout = tokio::io::stdout();
    loop {
        let step = tokio::select! {
            chunk = input.recv() => Step::Input(chunk),
            chunk = channel.read() => Step::Remote(chunk),
        };
        match step {
            Step::Input(Some(data)) => channel.write(&data).await?,
            Step::Input(None) => {
                channel.close().await?;
                break;
            }
            Step::Remote(Some(data)) => {
                stdout.write_all(&data).await?;
                stdout.flush().await?;
            }
            Step::Remote(None) => {
                tracing::info!("stream closed by {}", channel.remote_domain());
                break;
            }
        }
    }
    Ok(())
}

/// Run an echo server on `port`
async fn listen(config: &Config, port: u16, secret: Option<String>) -> anyhow::Result<()> {
    let node = connect(config).await?;
    println!("{} echoing on port {}", node.domain(), port);
    println!("Press Ctrl+C to stop");

    match secret {
        Some(secret) => {
            let mut listener = node.listen_secret(port, secret.as_bytes()).await?;
            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Some(tunnel) => {
                            tokio::spawn(echo(tunnel));
                        }
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }
        None => {
            let mut listener = node.listen(port).await?;
            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Some(stream) => {
                            tokio::spawn(echo(stream));
                        }
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }
    }

    node.disconnect().await;
    Ok(())
}

async fn echo<C: Channel>(mut channel: C) {
    let peer = channel.remote_domain().to_string();
    tracing::info!("accepted stream from {}", peer);
    while let Some(chunk) = channel.read().await {
        if let Err(e) = channel.write(&chunk).await {
            tracing::warn!("echo to {} failed: {}", peer, e);
            break;
        }
    }
    let _ = channel.close().await;
    tracing::info!("stream from {} finished", peer);
}

/// Create or print the configuration file
fn manage_config(config: &Config, path: &Path, init: bool, show: bool) -> anyhow::Result<()> {
    if init {
        if path.exists() {
            anyhow::bail!("Config file already exists: {}", path.display());
        }
        Config::default().save(path)?;
        println!("Wrote default configuration to {}", path.display());
    }
    if show || !init {
        println!("# {}", path.display());
        print!("{}", toml::to_string_pretty(config)?);
    }
    Ok(())
}
