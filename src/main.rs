//! Molam Webhooks CLI
//!
//! Sign and verify webhook payloads, generate idempotency keys, and run the
//! reference receiver.

use std::io::Read;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use molam_webhooks::config::WebhookConfig;
use molam_webhooks::idempotency::IdempotencyKeyManager;
use molam_webhooks::webhook::{
    webhook_router, EnvSecretResolver, EventDispatcher, LoggingHandler, SignatureVerifier,
    WebhookSigner, WebhookState, DEFAULT_KEY_ID,
};

/// Molam webhook tooling
#[derive(Parser, Debug)]
#[command(name = "molam-webhooks")]
#[command(version)]
#[command(about = "Webhook signatures and idempotency keys for the Molam platform")]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a Molam-Signature header for a body
    Sign {
        /// Webhook secret
        #[arg(long, env = "MOLAM_WEBHOOK_SECRET", hide_env_values = true)]
        secret: String,

        /// Key id to put in the header
        #[arg(long, default_value = DEFAULT_KEY_ID)]
        kid: String,

        /// Timestamp in unix milliseconds (default: now)
        #[arg(long)]
        timestamp: Option<i64>,

        /// Body file, or - for stdin
        body: PathBuf,
    },

    /// Verify a header against a body, resolving secrets from the environment
    Verify {
        /// Molam-Signature header value
        #[arg(long)]
        header: String,

        /// Freshness window (default: MOLAM_WEBHOOK_TOLERANCE_MS or 300000)
        #[arg(long)]
        tolerance_ms: Option<u64>,

        /// Reject headers without kid
        #[arg(long)]
        require_kid: bool,

        /// Body file, or - for stdin
        body: PathBuf,
    },

    /// Print an idempotency key
    Key {
        /// Caller-supplied key to validate
        #[arg(long)]
        provided: Option<String>,

        /// Prefix for generated keys (default: MOLAM_IDEMPOTENCY_PREFIX or molam)
        #[arg(long)]
        prefix: Option<String>,
    },

    /// Run the webhook receiver
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3001")]
        port: u16,

        /// Host to bind to (default: 127.0.0.1, or 0.0.0.0 with MOLAM_WEBHOOK_BIND_ALL)
        #[arg(short = 'H', long)]
        host: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    // Initialize tracing
    let filter = if args.verbose { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = WebhookConfig::from_env().context("invalid configuration")?;

    match args.command {
        Command::Sign {
            secret,
            kid,
            timestamp,
            body,
        } => {
            let body = read_body(&body)?;
            let signer = WebhookSigner::new(secret, kid);
            let header = match timestamp {
                Some(ts) => signer.sign_at(ts, &body)?,
                None => signer.sign(&body)?,
            };
            println!("{header}");
            Ok(ExitCode::SUCCESS)
        }

        Command::Verify {
            header,
            tolerance_ms,
            require_kid,
            body,
        } => {
            let body = read_body(&body)?;
            let mut verifier_config = config.verifier_config();
            if let Some(tolerance_ms) = tolerance_ms {
                verifier_config.tolerance_ms = tolerance_ms;
            }
            verifier_config.require_kid |= require_kid;

            let resolver =
                EnvSecretResolver::new().with_default_key_id(config.default_key_id.clone());
            match SignatureVerifier::new(verifier_config).verify(&header, &body, &resolver) {
                Ok(verified) => {
                    println!(
                        "valid kid={} timestamp_ms={} age_ms={}",
                        verified.key_id, verified.timestamp_ms, verified.age_ms
                    );
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    println!("invalid {}: {e}", e.kind());
                    Ok(ExitCode::FAILURE)
                }
            }
        }

        Command::Key { provided, prefix } => {
            let manager = match prefix {
                Some(prefix) => IdempotencyKeyManager::new(prefix)?,
                None => config.key_manager(),
            };
            println!("{}", manager.make_key(provided.as_deref())?);
            Ok(ExitCode::SUCCESS)
        }

        Command::Serve { port, host } => {
            let addr: SocketAddr = match host {
                Some(host) => format!("{host}:{port}")
                    .parse()
                    .with_context(|| format!("invalid listen address {host}:{port}"))?,
                None => config.socket_addr(port),
            };
            serve(config, addr).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn serve(config: WebhookConfig, addr: SocketAddr) -> anyhow::Result<()> {
    let resolver = EnvSecretResolver::new().with_default_key_id(config.default_key_id.clone());
    let dispatcher = EventDispatcher::new(Arc::new(LoggingHandler), config.dispatch_config());
    let state = WebhookState::new(
        SignatureVerifier::new(config.verifier_config()),
        Arc::new(resolver),
        Arc::new(dispatcher),
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(
        "Molam webhook receiver listening on {} (tolerance {}ms, require_kid={})",
        addr,
        config.tolerance_ms,
        config.require_kid
    );

    axum::serve(listener, webhook_router(Arc::new(state)))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}

fn read_body(path: &Path) -> anyhow::Result<Vec<u8>> {
    if path.as_os_str() == "-" {
        let mut body = Vec::new();
        std::io::stdin()
            .read_to_end(&mut body)
            .context("failed to read body from stdin")?;
        Ok(body)
    } else {
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
    }
}
