//! Listener bootstrap and accept loops.
//!
//! One accept loop per configured binding, plain TCP or TLS. Each accepted
//! connection gets its own session task; SIGINT or SIGTERM stops accepting
//! and ends the process.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::ServerConfig;

use icbridge::config::{Binding, Config};
use icbridge::session::{self, ConnectionRegistry};

pub async fn run(config: Arc<Config>) -> anyhow::Result<()> {
    let registry = ConnectionRegistry::default();
    let mut tasks = Vec::new();

    for raw in &config.bindings {
        tracing::info!("found binding: {}", raw);

        match Binding::parse(raw)? {
            Binding::Tcp { host, port } => {
                let listener = TcpListener::bind((host.as_str(), port)).await?;
                tracing::info!("listening on {}:{} (tcp)", host, port);
                tasks.push(tokio::spawn(accept_plain(
                    listener,
                    config.clone(),
                    registry.clone(),
                )));
            }
            Binding::Tls {
                host,
                port,
                cert,
                key,
            } => {
                let acceptor = tls_acceptor(&cert, &key)?;
                let listener = TcpListener::bind((host.as_str(), port)).await?;
                tracing::info!("listening on {}:{} (tcp/tls)", host, port);
                tasks.push(tokio::spawn(accept_tls(
                    listener,
                    acceptor,
                    config.clone(),
                    registry.clone(),
                )));
            }
        }
    }

    wait_for_shutdown().await?;
    tracing::info!("stopping server");
    for task in &tasks {
        task.abort();
    }

    Ok(())
}

async fn accept_plain(listener: TcpListener, config: Arc<Config>, registry: ConnectionRegistry) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tokio::spawn(session::run(stream, peer, config.clone(), registry.clone()));
            }
            Err(e) => tracing::warn!("accept failed: {}", e),
        }
    }
}

async fn accept_tls(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    config: Arc<Config>,
    registry: ConnectionRegistry,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let acceptor = acceptor.clone();
                let config = config.clone();
                let registry = registry.clone();
                tokio::spawn(async move {
                    match acceptor.accept(stream).await {
                        Ok(tls) => session::run(tls, peer, config, registry).await,
                        Err(e) => tracing::warn!("TLS handshake failed: {}", e),
                    }
                });
            }
            Err(e) => tracing::warn!("accept failed: {}", e),
        }
    }
}

fn tls_acceptor(cert_path: &Path, key_path: &Path) -> anyhow::Result<TlsAcceptor> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
        .collect::<Result<Vec<_>, _>>()?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
        .ok_or_else(|| anyhow::anyhow!("no private key found in {}", key_path.display()))?;

    let tls_config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}

async fn wait_for_shutdown() -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res?,
        _ = term.recv() => {}
    }
    Ok(())
}
