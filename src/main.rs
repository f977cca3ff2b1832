//! Documentation relay server.
//!
//! Serves the client WebSocket endpoint and the synthetic HTTP origin the
//! extractor reads from, on one listener.

use clap::{Args, Parser, Subcommand};
use doc_relay::config::{
    DEFAULT_BIND, DEFAULT_EXTRACTOR, DEFAULT_FETCH_TIMEOUT_SECS, DEFAULT_PUBLIC_HOST,
    DEFAULT_STORAGE_DIR,
};
use doc_relay::{expand_path, DenoDoc, RelayConfig, RelayServer, WireFormat};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(
    name = "doc-relay",
    version,
    about = "Documentation relay for files on a remote machine",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(Subcommand)]
enum Command {
    /// Run the relay (default)
    Serve(ServeArgs),
}

#[derive(Args)]
struct ServeArgs {
    /// Bind address (e.g., 127.0.0.1:8081)
    #[arg(long, default_value = DEFAULT_BIND)]
    bind: SocketAddr,
    /// Host name the extractor uses to reach this relay
    #[arg(long, default_value = DEFAULT_PUBLIC_HOST)]
    public_host: String,
    /// Directory for rewritten import maps
    #[arg(long, default_value = DEFAULT_STORAGE_DIR)]
    storage_dir: String,
    /// Extractor program, invoked as `<program> doc --import-map <map> --json <specifier>`
    #[arg(long, default_value = DEFAULT_EXTRACTOR)]
    extractor: String,
    /// Channel wire format
    #[arg(long, value_enum, default_value_t = WireFormat::Text)]
    wire_format: WireFormat,
    /// Seconds to wait for the client to supply file content (HTTP 504 after)
    #[arg(long, default_value_t = DEFAULT_FETCH_TIMEOUT_SECS)]
    fetch_timeout_secs: u64,
}

impl ServeArgs {
    fn into_config(self) -> RelayConfig {
        RelayConfig {
            bind: self.bind,
            public_host: self.public_host,
            storage_dir: expand_path(&self.storage_dir),
            extractor: expand_path(&self.extractor),
            wire_format: self.wire_format,
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("doc_relay=info")))
        .init();

    let cli = Cli::parse();
    let args = match cli.command {
        Some(Command::Serve(args)) => args,
        None => cli.serve,
    };

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    rt.block_on(run_server(args))
}

async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigquit = signal(SignalKind::quit())?;
        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
            _ = sigquit.recv() => {},
            _ = tokio::signal::ctrl_c() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    Ok(())
}

async fn run_server(args: ServeArgs) -> anyhow::Result<()> {
    info!("Starting documentation relay");

    let config = args.into_config();
    let extractor = Arc::new(DenoDoc::new(config.extractor.clone()));
    let server = RelayServer::bind(config, extractor)
        .await
        .map_err(|e| anyhow::anyhow!("bind failed: {e}"))?;

    let cancel = CancellationToken::new();
    let cancel_for_shutdown = cancel.clone();
    tokio::spawn(async move {
        if wait_for_shutdown_signal().await.is_ok() {
            info!("Shutdown signal received");
            cancel_for_shutdown.cancel();
        } else {
            info!("Shutdown signal handler failed; server will continue running");
        }
    });

    server.run(cancel).await?;
    info!("Server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_is_the_default_command() {
        let cli = Cli::parse_from(["doc-relay", "--bind", "127.0.0.1:0"]);
        assert!(cli.command.is_none());
        let config = cli.serve.into_config();
        assert_eq!(config.bind.port(), 0);
        assert_eq!(config.wire_format, WireFormat::Text);
        assert_eq!(config.fetch_timeout, Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS));
    }

    #[test]
    fn serve_subcommand_accepts_flags() {
        let cli = Cli::parse_from([
            "doc-relay",
            "serve",
            "--wire-format",
            "compressed",
            "--storage-dir",
            "/tmp/maps",
            "--fetch-timeout-secs",
            "5",
        ]);
        let Some(Command::Serve(args)) = cli.command else {
            panic!("expected serve");
        };
        let config = args.into_config();
        assert_eq!(config.wire_format, WireFormat::Compressed);
        assert_eq!(config.storage_dir, std::path::PathBuf::from("/tmp/maps"));
        assert_eq!(config.fetch_timeout, Duration::from_secs(5));
    }
}
