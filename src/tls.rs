// TLS listener configuration with certificate hot reload.

use axum_server::tls_rustls::RustlsConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const RELOAD_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to load certificate {cert} / key {key}: {source}")]
    Load {
        cert: PathBuf,
        key: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub async fn load(cert: &Path, key: &Path) -> Result<RustlsConfig, TlsError> {
    RustlsConfig::from_pem_file(cert, key)
        .await
        .map_err(|source| TlsError::Load {
            cert: cert.to_path_buf(),
            key: key.to_path_buf(),
            source,
        })
}

async fn reload(config: &RustlsConfig, cert: &Path, key: &Path) -> Result<(), TlsError> {
    config
        .reload_from_pem_file(cert, key)
        .await
        .map_err(|source| TlsError::Load {
            cert: cert.to_path_buf(),
            key: key.to_path_buf(),
            source,
        })
}

/// Re-read the certificate and key every 15 seconds until cancelled. A
/// failed reload keeps the certificate that is being served.
pub async fn run_reloader(
    config: RustlsConfig,
    cert: PathBuf,
    key: PathBuf,
    cancel: CancellationToken,
) {
    let mut ticker = interval(RELOAD_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick fires immediately and the certificate was just loaded.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("TLS reloader received shutdown signal");
                break;
            }
            _ = ticker.tick() => {
                if let Err(e) = reload(&config, &cert, &key).await {
                    tracing::error!("Keeping previous TLS certificate: {}", e);
                }
            }
        }
    }
}
