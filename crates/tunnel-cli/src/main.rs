mod config;
mod tls;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing_subscriber::{fmt, EnvFilter};

use config::{load_client_config, load_server_config};
use std::time::Duration;
use tunnel_core::TunnelError;
use tunnel_creds::FileCredentialStore;

/// How long a session tolerates silence before `recv` times out. Well
/// above `HEARTBEAT_INTERVAL` so a live peer's heartbeat always lands
/// first.
const RECV_TIMEOUT: Duration = Duration::from_secs(90);

/// How long an accepted connection waits in the queue for a worker
/// permit before it is dropped, per spec.md §5's "short grace period".
const ACCEPT_GRACE_PERIOD: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "tunnel", version, about = "Encrypted point-to-point tunnel")]
struct Cli {
    /// Set log level: error,warn,info,debug,trace
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the tunnel server, accepting and authenticating sessions.
    Server {
        /// Path to the server JSON configuration file
        #[arg(long)]
        config: PathBuf,
    },

    /// Connect to a tunnel server, authenticate, and exchange one message.
    Client {
        /// Path to the client JSON configuration file
        #[arg(long)]
        config: PathBuf,

        /// Plaintext payload to send once the session is established
        #[arg(long)]
        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tokio_rustls::rustls::crypto::ring::default_provider()
        .install_default()
        .ok();

    let cli = Cli::parse();

    fmt()
        .with_env_filter(EnvFilter::new(&cli.log_level))
        .with_target(false)
        .init();

    match cli.cmd {
        Commands::Server { config } => run_server(&config).await,
        Commands::Client { config, message } => run_client(&config, message).await,
    }
}

async fn run_server(config_path: &std::path::Path) -> Result<()> {
    let cfg = load_server_config(config_path)?;
    let verifier = Arc::new(
        FileCredentialStore::load_from_file(&cfg.credential_file)
            .context("loading credential store")?,
    );
    let tls_config = tls::server_tls_config(
        &cfg.cert_file,
        &cfg.key_file,
        cfg.ca_file.as_deref(),
        cfg.require_client_auth,
    )?;
    let acceptor = TlsAcceptor::from(tls_config);

    let listener = TcpListener::bind(cfg.bind_addr)
        .await
        .with_context(|| format!("binding {}", cfg.bind_addr))?;
    tracing::info!(addr = %cfg.bind_addr, "tunnel server listening");

    // `sessions` bounds concurrently-running workers. `queue` bounds how
    // many accepted connections may be waiting for a worker permit at
    // once; a connection that cannot claim a queue slot is rejected
    // immediately, and one that claims a slot but can't get a worker
    // permit within ACCEPT_GRACE_PERIOD is dropped rather than queued
    // indefinitely (spec.md §5).
    let sessions = Arc::new(Semaphore::new(cfg.max_sessions));
    let queue = Arc::new(Semaphore::new(cfg.queue_depth));

    loop {
        let (stream, peer_addr) = listener.accept().await?;

        let Ok(queue_permit) = queue.clone().try_acquire_owned() else {
            tracing::warn!(peer = %peer_addr, "rejecting connection, queue at capacity");
            drop(stream);
            continue;
        };

        let acceptor = acceptor.clone();
        let verifier = verifier.clone();
        let sessions = sessions.clone();
        let session_id = format!("server-{peer_addr}");

        tokio::spawn(async move {
            let session_permit =
                match tokio::time::timeout(ACCEPT_GRACE_PERIOD, sessions.acquire_owned()).await {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) => return,
                    Err(_) => {
                        tracing::warn!(peer = %peer_addr, "dropping connection, no worker permit within grace period");
                        drop(queue_permit);
                        return;
                    }
                };
            drop(queue_permit);

            if let Err(e) = handle_connection(acceptor, stream, session_id, verifier).await {
                tracing::warn!(peer = %peer_addr, error = %e, "session ended with error");
            }
            drop(session_permit);
        });
    }
}

async fn handle_connection(
    acceptor: TlsAcceptor,
    stream: TcpStream,
    session_id: String,
    verifier: Arc<FileCredentialStore>,
) -> Result<(), TunnelError> {
    let tls_stream = acceptor
        .accept(stream)
        .await
        .map_err(|e| TunnelError::Transport(e))?;

    let mut session = tunnel_core::accept_session(tls_stream, session_id, verifier.as_ref()).await?;
    tracing::info!(
        peer_session = %session.session_id_peer,
        user = ?session.authenticated_user,
        "session established"
    );

    loop {
        match session.recv(RECV_TIMEOUT).await {
            Ok(data) => {
                tracing::debug!(bytes = data.len(), "received application data");
                session.send(&data).await?;
            }
            Err(TunnelError::Closed) => {
                tracing::info!("session closed by peer");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "session terminated");
                return Err(e);
            }
        }
    }

    Ok(())
}

async fn run_client(config_path: &std::path::Path, message: String) -> Result<()> {
    let cfg = load_client_config(config_path)?;
    let cert_pair = match (&cfg.cert_file, &cfg.key_file) {
        (Some(c), Some(k)) => Some((c.as_path(), k.as_path())),
        _ => None,
    };
    let tls_config = tls::client_tls_config(cfg.ca_file.as_deref(), cert_pair, cfg.verify_server)?;
    let connector = TlsConnector::from(tls_config);

    let addr: SocketAddr = cfg.server_addr;
    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("connecting to {addr}"))?;

    let server_name = tokio_rustls::rustls::pki_types::ServerName::try_from(cfg.server_name.clone())
        .context("invalid server_name in client config")?;
    let tls_stream = connector
        .connect(server_name, stream)
        .await
        .context("TLS handshake with server failed")?;

    let session_id = format!("client-{}", std::process::id());
    let mut session = tunnel_core::connect_session(
        tls_stream,
        session_id,
        &cfg.username,
        &cfg.password,
    )
    .await
    .context("establishing tunnel session")?;

    tracing::info!(peer_session = %session.session_id_peer, "session established");

    session.send(message.as_bytes()).await?;
    match session.recv(RECV_TIMEOUT).await {
        Ok(reply) => {
            println!("{}", String::from_utf8_lossy(&reply));
        }
        Err(TunnelError::Closed) => {
            tracing::warn!("server closed the session before replying");
        }
        Err(e) => return Err(e.into()),
    }

    session.close().await;
    Ok(())
}
