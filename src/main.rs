//! Relay server binary.
//!
//! # Usage
//!
//! ```bash
//! # Two known participants
//! pairing-relay --bind 0.0.0.0:3000 --token secret-1=alice --token secret-2=bob
//!
//! # Tokens from a JSON file: {"secret-1": "alice", "secret-2": "bob"}
//! pairing-relay --tokens-file tokens.json
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use pairing_relay::{RelayServer, ServerConfig, TokenAuthenticator};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Matchmaking and signaling relay server
#[derive(Parser, Debug)]
#[command(name = "pairing-relay")]
#[command(about = "Pairs anonymous participants and relays their signaling")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:3000")]
    bind: SocketAddr,

    /// Maximum concurrent connections (0 = unlimited)
    #[arg(long, default_value = "0")]
    max_connections: usize,

    /// Session token granting an identity, as TOKEN=IDENTITY (repeatable)
    #[arg(short, long = "token", value_parser = parse_token)]
    tokens: Vec<(String, String)>,

    /// JSON file mapping session tokens to identities
    #[arg(long)]
    tokens_file: Option<PathBuf>,

    /// Session cookie checked for a token
    #[arg(long, default_value = pairing_relay::server::auth::DEFAULT_SESSION_COOKIE)]
    cookie: String,

    /// Seconds allowed for the WebSocket upgrade
    #[arg(long, default_value = "10")]
    handshake_timeout: u64,

    /// Frames queued per connection before dropping
    #[arg(long, default_value = "64")]
    queue_capacity: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_token(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((token, identity)) if !token.is_empty() && !identity.is_empty() => {
            Ok((token.to_owned(), identity.to_owned()))
        }
        _ => Err(format!("expected TOKEN=IDENTITY, got {value:?}")),
    }
}

fn load_tokens(path: &PathBuf) -> Result<HashMap<String, String>, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let mut auth = TokenAuthenticator::new().cookie_name(args.cookie);
    if let Some(path) = &args.tokens_file {
        for (token, identity) in load_tokens(path)? {
            auth.insert(token, identity);
        }
    }
    for (token, identity) in args.tokens {
        auth.insert(token, identity);
    }
    if auth.is_empty() {
        tracing::warn!("No session tokens configured; every connection will be rejected");
    }
    tracing::info!(tokens = auth.len(), "Token table loaded");

    let config = ServerConfig::default()
        .bind(args.bind)
        .max_connections(args.max_connections)
        .handshake_timeout(Duration::from_secs(args.handshake_timeout))
        .outbound_queue_capacity(args.queue_capacity);

    let server = RelayServer::new(config, auth);
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    tracing::info!("Relay server stopped");
    Ok(())
}
