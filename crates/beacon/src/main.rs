//! # beacon
//!
//! Beacon subscription server binary: loads settings, wires the registry,
//! context drivers, pub/sub backend, broadcast bridge, and keep-alive timer,
//! then serves WebSocket clients until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use beacon_server::pubsub::{self, Channels, PubSub};
use beacon_server::registry::RegistryManager;
use beacon_server::shutdown::ShutdownCoordinator;
use beacon_server::websocket::run_keep_alive;
use beacon_server::{
    BeaconServer, BroadcastBridge, ContextManager, Publisher, RootValueResolver, ServerConfig,
    TopicBindings, TransportManager,
};
use beacon_settings::{BeaconSettings, LogFormat};
use clap::Parser;
use tokio::task::JoinHandle;

/// Beacon GraphQL subscription server.
#[derive(Parser, Debug)]
#[command(name = "beacon", about = "GraphQL subscription WebSocket server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Keep-alive interval in seconds, 0 to disable (overrides settings).
    #[arg(long)]
    keep_alive: Option<u64>,

    /// Settings file (default `~/.beacon/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter when `RUST_LOG` is unset (overrides settings).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Load settings from the chosen file and apply CLI overrides on top.
    fn load_settings(&self) -> Result<BeaconSettings> {
        let mut settings = match &self.settings {
            Some(path) => beacon_settings::load_settings_from_path(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => beacon_settings::load_settings().context("Failed to load settings")?,
        };
        self.apply_overrides(&mut settings);
        Ok(settings)
    }

    fn apply_overrides(&self, settings: &mut BeaconSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(secs) = self.keep_alive {
            settings.server.keep_alive_secs = secs;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
    }
}

/// Everything `main` starts, kept together so tests can boot it too.
struct App {
    server: BeaconServer,
    publisher: Publisher,
    bridge: Option<BroadcastBridge>,
    keep_alive: Option<Duration>,
}

impl App {
    /// Build the component graph from settings.
    fn build(settings: &BeaconSettings, shutdown: Arc<ShutdownCoordinator>) -> Result<Self> {
        let registry = RegistryManager::new(settings.subscriptions.storage.clone())
            .build()
            .context("Failed to resolve registry storage driver")?;

        let contexts = ContextManager::from_settings(&settings.subscriptions, &settings.auth);
        let _ = contexts
            .build()
            .context("Failed to resolve context driver")?;

        let mut bindings = TopicBindings::new();
        bindings.bind_passthrough(settings.subscriptions.topics.iter().cloned());
        let bindings = Arc::new(bindings);

        let transport = Arc::new(TransportManager::new(
            registry,
            Arc::new(contexts),
            bindings.clone(),
            Arc::new(RootValueResolver::new(bindings.clone())),
        ));

        let backend: Arc<dyn PubSub> =
            pubsub::connect(&settings.pubsub).context("Failed to create pub/sub backend")?;
        let channels = Channels::from_settings(&settings.pubsub);
        let publisher = Publisher::new(backend.clone(), channels.clone());
        let bridge = BroadcastBridge::new(backend, channels, transport.clone()).with_backoff(
            Duration::from_millis(250),
            Duration::from_millis(settings.pubsub.max_reconnect_delay_ms),
        );

        let server = BeaconServer::new(ServerConfig::from_settings(settings), transport)
            .with_shutdown(shutdown);

        let keep_alive = (settings.server.keep_alive_secs > 0)
            .then(|| Duration::from_secs(settings.server.keep_alive_secs));

        tracing::info!(
            storage = %settings.subscriptions.storage,
            context = %settings.subscriptions.context,
            pubsub = ?settings.pubsub.backend,
            topics = ?bindings.topics(),
            "components wired"
        );

        Ok(Self {
            server,
            publisher,
            bridge: Some(bridge),
            keep_alive,
        })
    }

    /// Start the bridge, the keep-alive timer, and the listener.
    async fn start(&mut self) -> Result<(std::net::SocketAddr, Vec<JoinHandle<()>>)> {
        let token = self.server.shutdown().token();
        let mut handles = Vec::new();

        if let Some(bridge) = self.bridge.take() {
            handles.push(bridge.spawn(token.clone()));
        }
        if let Some(interval) = self.keep_alive {
            tracing::info!(interval_secs = interval.as_secs(), "keep-alive enabled");
            handles.push(tokio::spawn(run_keep_alive(
                self.publisher.clone(),
                interval,
                token,
            )));
        }

        let (addr, handle) = self
            .server
            .listen()
            .await
            .context("Failed to bind server")?;
        handles.push(handle);
        Ok((addr, handles))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.load_settings()?;

    match settings.logging.format {
        LogFormat::Compact => beacon_core::logging::init_subscriber(&settings.logging.level),
        LogFormat::Json => beacon_core::logging::init_json_subscriber(&settings.logging.level),
    }

    let metrics_handle = beacon_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let shutdown = Arc::new(ShutdownCoordinator::new());
    let mut app = App::build(&settings, shutdown.clone())?;
    app.server = app.server.with_metrics(metrics_handle);

    let (addr, handles) = app.start().await?;
    tracing::info!("Beacon listening on ws://{addr}/ws");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    if shutdown.graceful_shutdown(handles, None).await {
        tracing::info!("Shutdown complete");
    } else {
        tracing::warn!("Shutdown incomplete, exiting anyway");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_override_nothing() {
        let cli = Cli::parse_from(["beacon"]);
        let mut settings = BeaconSettings::default();
        cli.apply_overrides(&mut settings);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.keep_alive_secs, 0);
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn cli_overrides_settings() {
        let cli = Cli::parse_from([
            "beacon",
            "--host",
            "127.0.0.1",
            "--port",
            "8080",
            "--keep-alive",
            "15",
            "--log-level",
            "debug",
        ]);
        let mut settings = BeaconSettings::default();
        cli.apply_overrides(&mut settings);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.server.keep_alive_secs, 15);
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn settings_file_then_cli() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            serde_json::json!({
                "server": {"port": 9100, "keepAliveSecs": 5},
                "subscriptions": {"topics": ["postCreated"]}
            })
            .to_string(),
        )
        .unwrap();

        let cli = Cli::parse_from([
            "beacon",
            "--settings",
            path.to_str().unwrap(),
            "--keep-alive",
            "30",
        ]);
        let settings = cli.load_settings().unwrap();
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.server.keep_alive_secs, 30);
        assert_eq!(settings.subscriptions.topics, vec!["postCreated"]);
    }

    #[test]
    fn unknown_storage_driver_fails_build() {
        let mut settings = BeaconSettings::default();
        settings.subscriptions.storage = "mongo".into();
        let err = App::build(&settings, Arc::new(ShutdownCoordinator::new()))
            .err()
            .unwrap();
        assert!(format!("{err:#}").contains("storage driver [mongo] is not supported"));
    }

    #[test]
    fn oauth_without_userinfo_url_fails_build() {
        let mut settings = BeaconSettings::default();
        settings.subscriptions.context = "oauth".into();
        assert!(App::build(&settings, Arc::new(ShutdownCoordinator::new())).is_err());

        settings.auth.userinfo_url = Some("http://127.0.0.1:1/userinfo".into());
        assert!(App::build(&settings, Arc::new(ShutdownCoordinator::new())).is_ok());
    }

    #[tokio::test]
    async fn server_graceful_shutdown() {
        let mut settings = BeaconSettings::default();
        settings.server.host = "127.0.0.1".into();
        settings.server.port = 0;
        settings.server.keep_alive_secs = 60;
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let mut app = App::build(&settings, shutdown.clone()).unwrap();
        let (addr, handles) = app.start().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(handles.len(), 3);

        let drained = tokio::time::timeout(
            Duration::from_secs(10),
            shutdown.graceful_shutdown(handles, Some(Duration::from_secs(5))),
        )
        .await
        .expect("shutdown hung");
        assert!(drained);
        assert!(shutdown.is_shutting_down());
    }
}
