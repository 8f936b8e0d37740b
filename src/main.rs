use anyhow::{Context, Result};
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod api;
mod collection;
mod config;
mod db;
mod models;
mod scanner;
mod services;
mod tls;

use api::ipacl::IpAcl;
use collection::Catalog;
use config::{AppConfig, Cli, LogTarget};
use db::{FlushTarget, Repository};
use scanner::Rescanner;
use services::imageresize::Resizer;
use services::search::SearchIndex;

/// Tracks all background task handles for graceful shutdown
struct BackgroundTasks {
    handles: Vec<(&'static str, JoinHandle<()>)>,
    shutdown: CancellationToken,
}

impl BackgroundTasks {
    fn new() -> Self {
        Self {
            handles: Vec::new(),
            shutdown: CancellationToken::new(),
        }
    }

    fn token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn spawn<F>(&mut self, name: &'static str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.handles.push((name, handle));
    }

    async fn shutdown(self) {
        tracing::info!("Initiating graceful shutdown...");

        self.shutdown.cancel();

        // Flushers drain on cancel, so give each task time to finish.
        for (name, handle) in self.handles {
            tracing::debug!("Waiting for {} to finish...", name);
            match tokio::time::timeout(Duration::from_secs(10), handle).await {
                Ok(Ok(())) => tracing::debug!("{} finished cleanly", name),
                Ok(Err(e)) => tracing::warn!("{} panicked: {}", name, e),
                Err(_) => tracing::warn!("{} timed out during shutdown", name),
            }
        }

        tracing::info!("All background tasks stopped");
    }
}

/// Everything a request handler can reach.
pub struct AppState {
    pub config: AppConfig,
    pub catalog: Arc<Catalog>,
    pub repo: Repository,
    pub resizer: Resizer,
    pub search: Arc<SearchIndex>,
    pub ipacl: IpAcl,
}

impl AppState {
    pub fn new(config: AppConfig, repo: Repository) -> Result<Self> {
        let ipacl = IpAcl::parse(&config.listen.ipacl)?;
        let catalog = Arc::new(Catalog::new(&config.collections));
        let resizer = Resizer::new(config.cache_dir.clone());
        let search = Arc::new(SearchIndex::new(repo.clone()));
        Ok(Self {
            config,
            catalog,
            repo,
            resizer,
            search,
            ipacl,
        })
    }
}

fn init_logging(target: &LogTarget) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "jellofin_server=info,tower_http=info".into());

    let stdout = matches!(target, LogTarget::Stdout).then(fmt::layer);
    // The service manager timestamps stderr lines itself.
    let syslog = matches!(target, LogTarget::Syslog).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .without_time()
    });
    let file = match target {
        LogTarget::File(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false),
            )
        }
        _ => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout)
        .with(syslog)
        .with(file)
        .init();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load(&cli.config)?;
    init_logging(&config.log)?;

    config
        .ensure_dirs()
        .await
        .context("creating cache and database directories")?;
    config.log_config();

    let repo = Repository::open(&config.db_path).await?;
    services::auth::ensure_default_user(&repo).await?;

    let state = Arc::new(AppState::new(config.clone(), repo.clone())?);

    let mut bg_tasks = BackgroundTasks::new();
    let shutdown_token = bg_tasks.token();

    // The catalog is complete before the first request is served.
    let rescanner = Rescanner {
        catalog: state.catalog.clone(),
        repo: repo.clone(),
        search: state.search.clone(),
        item_delay: Duration::from_millis(config.scanner.itemdelay_ms),
        interval: Duration::from_secs(config.scanner.interval_secs),
    };
    tracing::info!("Scanning {} collections...", config.collections.len());
    rescanner.scan_all(Duration::ZERO, &shutdown_token).await;
    bg_tasks.spawn("rescanner", rescanner.run(shutdown_token.clone()));

    bg_tasks.spawn(
        "userdata-flusher",
        repo.clone().run_flusher(
            FlushTarget::UserData,
            Duration::from_secs(config.database.flushinterval_secs),
            shutdown_token.clone(),
        ),
    );
    bg_tasks.spawn(
        "token-flusher",
        repo.clone().run_flusher(
            FlushTarget::AccessTokens,
            Duration::from_secs(config.database.tokenflushinterval_secs),
            shutdown_token.clone(),
        ),
    );

    let ip: IpAddr = config
        .listen
        .address
        .parse()
        .with_context(|| format!("invalid listen address '{}'", config.listen.address))?;
    let addr = SocketAddr::new(ip, config.listen.port);

    let handle = axum_server::Handle::new();
    {
        let handle = handle.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            handle.graceful_shutdown(Some(Duration::from_secs(10)));
        });
    }

    let app = api::app(state).into_make_service_with_connect_info::<SocketAddr>();
    let served = match config.tls() {
        Some((cert, key)) => {
            let tls_config = tls::load(cert, key).await?;
            bg_tasks.spawn(
                "tls-reloader",
                tls::run_reloader(
                    tls_config.clone(),
                    cert.to_path_buf(),
                    key.to_path_buf(),
                    shutdown_token.clone(),
                ),
            );
            tracing::info!("Starting server on https://{}", addr);
            axum_server::bind_rustls(addr, tls_config)
                .handle(handle)
                .serve(app)
                .await
        }
        None => {
            tracing::info!("Starting server on http://{}", addr);
            axum_server::bind(addr).handle(handle).serve(app).await
        }
    };

    bg_tasks.shutdown().await;
    repo.close().await;

    served.with_context(|| format!("serving on {addr}"))?;
    tracing::info!("Server shutdown complete");
    Ok(())
}
