//! HTTPS serving.
//!
//! The status API is only ever bound with TLS. A missing or unreadable
//! certificate or key is a startup error, never a reason to fall back to
//! plaintext.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use adbstatus_core::{ServerConfig, TlsConfig};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Errors from preparing or running the HTTPS listener.
#[derive(Debug, Error)]
pub enum ServeError {
    /// `bind_address` is not an IP address.
    #[error("invalid bind address '{0}'")]
    InvalidAddress(String),

    /// A certificate or key file does not exist.
    #[error("TLS file not found: {}", .0.display())]
    MissingFile(PathBuf),

    /// The certificate or key could not be loaded.
    #[error("cannot load TLS certificate {} / key {}: {source}", cert.display(), key.display())]
    Tls {
        /// Certificate path.
        cert: PathBuf,
        /// Key path.
        key: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Binding or serving failed.
    #[error("HTTPS server failed: {0}")]
    Io(#[from] std::io::Error),
}

/// The socket address the server binds.
///
/// # Errors
///
/// Returns [`ServeError::InvalidAddress`] if `bind_address` does not parse.
pub fn socket_addr(config: &ServerConfig) -> Result<SocketAddr, ServeError> {
    let ip: IpAddr = config
        .bind_address
        .parse()
        .map_err(|_| ServeError::InvalidAddress(config.bind_address.clone()))?;
    Ok(SocketAddr::new(ip, config.port))
}

/// Loads the PEM certificate chain and private key.
///
/// Files are read synchronously and parsed in memory, so this also works on a
/// bare current-thread runtime before the process forks.
///
/// # Errors
///
/// Returns [`ServeError::MissingFile`] or [`ServeError::Tls`].
pub async fn load(config: &TlsConfig) -> Result<RustlsConfig, ServeError> {
    let tls_error = |source| ServeError::Tls {
        cert: config.cert_file.clone(),
        key: config.key_file.clone(),
        source,
    };
    for path in [&config.cert_file, &config.key_file] {
        if !path.exists() {
            return Err(ServeError::MissingFile(path.clone()));
        }
    }
    let cert = std::fs::read(&config.cert_file).map_err(tls_error)?;
    let key = std::fs::read(&config.key_file).map_err(tls_error)?;
    RustlsConfig::from_pem(cert, key).await.map_err(tls_error)
}

/// Serves `app` over TLS on `addr` until `cancel` fires, then lets open
/// connections finish within `grace`.
///
/// `handle` reports the bound address once listening.
///
/// # Errors
///
/// Returns [`ServeError::Io`] if the listener cannot be bound or fails.
pub async fn serve(
    addr: SocketAddr,
    tls: RustlsConfig,
    app: Router,
    handle: Handle,
    cancel: CancellationToken,
    grace: Duration,
) -> Result<(), ServeError> {
    let shutdown = handle.clone();
    tokio::spawn(async move {
        cancel.cancelled().await;
        shutdown.graceful_shutdown(Some(grace));
    });

    info!(%addr, "HTTPS status server listening");
    axum_server::bind_rustls(addr, tls)
        .handle(handle)
        .serve(app.into_make_service())
        .await?;
    info!("HTTPS status server stopped");
    Ok(())
}
