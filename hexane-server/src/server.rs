//! Server wiring
//!
//! Builds the registries and the first pipeline from configuration,
//! binds the listeners, starts the worker pool and the control channel,
//! and runs the supervision loop: hot reload, the excessive-exception
//! guard, and the drain-then-stop shutdown sequence.

use std::net::SocketAddrV6;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use hexane_core::config::ServerConfig;
use hexane_core::error::{Error, Result};
use hexane_core::stats::ServerStats;

use hexane_engine::pipeline::{Pipeline, PipelineHandle};
use hexane_engine::registry::{FilterRegistry, HandlerRegistry, StoreCache};
use hexane_wire::registry::OptionRegistry;
use hexane_wire::Duid;

use crate::control::{ControlServer, ServerEvent};
use crate::listener::{self, Listener, WorkItem};
use crate::tcp::{self, LeasequeryListener};
use crate::worker::WorkerPool;

/// How the server came to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Normal shutdown
    Clean,
    /// Shutdown forced by accumulated errors
    ShutdownWithErrors,
}

/// Load and validate a configuration file
pub fn load_config(path: impl AsRef<Path>) -> Result<ServerConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|err| {
        Error::config(format!("cannot read {}: {}", path.display(), err))
    })?;
    let config: ServerConfig = serde_json::from_str(&contents)
        .map_err(|err| Error::config(format!("cannot parse {}: {}", path.display(), err)))?;
    config.validate()?;
    Ok(config)
}

/// Resolve the server identity: the configured hex DUID when one is
/// present, otherwise an LL DUID derived from the link-layer address of
/// a configured listener interface. Only when neither path yields a
/// usable DUID is this a configuration error.
pub fn determine_server_duid(config: &ServerConfig) -> Result<Duid> {
    if let Some(bytes) = config.server.configured_duid() {
        let duid = Duid::decode(&bytes)
            .map_err(|err| Error::config(format!("configured server duid is invalid: {}", err)))?;
        info!(duid = %duid, "Using server DUID from configuration");
        return Ok(duid);
    }

    let mut interfaces: Vec<&str> = config
        .listeners
        .iter()
        .map(|listener| listener.interface.as_str())
        .collect();
    interfaces.sort_unstable();
    interfaces.dedup();

    for interface in interfaces {
        if let Some(duid) = link_layer_duid(interface) {
            info!(
                interface,
                duid = %duid,
                "Using server DUID derived from link-layer address"
            );
            return Ok(duid);
        }
    }

    Err(Error::config(
        "no server duid configured and no listener interface has a usable \
         link-layer address to derive one from",
    ))
}

/// LL DUID for one interface, read from sysfs. Interfaces without a
/// hardware address (loopback, tunnels) yield nothing.
fn link_layer_duid(interface: &str) -> Option<Duid> {
    let text =
        std::fs::read_to_string(format!("/sys/class/net/{}/address", interface)).ok()?;
    duid_from_link_address(text.trim())
}

/// Parse a colon-separated link-layer address into an LL DUID
fn duid_from_link_address(address: &str) -> Option<Duid> {
    let octets: Vec<u8> = address
        .split(':')
        .map(|part| u8::from_str_radix(part, 16))
        .collect::<std::result::Result<_, _>>()
        .ok()?;
    if octets.is_empty() || octets.iter().all(|octet| *octet == 0) {
        return None;
    }
    match <[u8; 6]>::try_from(octets.as_slice()) {
        Ok(mac) => Some(Duid::from_mac(mac)),
        // Hardware addresses other than Ethernet keep their full length
        Err(_) => Some(Duid::LinkLayer {
            hardware_type: 1,
            address: octets,
        }),
    }
}

/// The assembled server
pub struct Server {
    config: ServerConfig,
    config_path: Option<PathBuf>,
    duid: Duid,
    stats: Arc<ServerStats>,
    stores: Arc<StoreCache>,
    handlers: Arc<HandlerRegistry>,
    filters: Arc<FilterRegistry>,
    pipeline: Arc<PipelineHandle>,
}

impl Server {
    /// Build the server: registries, server identity, first pipeline.
    ///
    /// Nothing is bound yet; a configuration error here leaves no
    /// side effects. The identity follows [`determine_server_duid`]:
    /// configured DUID first, derived LL DUID as the fallback.
    pub fn new(config: ServerConfig, config_path: Option<PathBuf>) -> Result<Server> {
        let duid = determine_server_duid(&config)?;
        Self::with_duid(config, config_path, duid)
    }

    /// Build the server with an identity the caller already resolved.
    ///
    /// The seam for loaders that determine the DUID some other way
    /// (stable storage, an out-of-band inventory) instead of the
    /// configured-then-derived chain.
    pub fn with_duid(
        config: ServerConfig,
        config_path: Option<PathBuf>,
        duid: Duid,
    ) -> Result<Server> {
        let stats = Arc::new(ServerStats::new());
        let stores = Arc::new(StoreCache::new());
        let handlers = Arc::new(HandlerRegistry::with_defaults());
        let filters = Arc::new(FilterRegistry::with_defaults());

        let pipeline = Pipeline::build(
            &config.pipeline,
            &handlers,
            &filters,
            &stores,
            duid.clone(),
            stats.clone(),
        )?;

        Ok(Server {
            config,
            config_path,
            duid,
            stats,
            stores,
            handlers,
            filters,
            pipeline: Arc::new(PipelineHandle::new(Arc::new(pipeline))),
        })
    }

    /// Shared statistics block
    pub fn stats(&self) -> Arc<ServerStats> {
        self.stats.clone()
    }

    /// Rebuild the pipeline from a fresh configuration read and swap it in.
    ///
    /// On any error the old pipeline stays active. Listener and worker
    /// topology changes require a restart and are ignored with a warning.
    fn reload(&self) -> std::result::Result<(), String> {
        let path = self
            .config_path
            .as_ref()
            .ok_or_else(|| "no configuration path to reload from".to_string())?;

        let fresh = load_config(path).map_err(|err| err.to_string())?;
        if fresh.listeners.len() != self.config.listeners.len()
            || fresh.worker_pool.workers != self.config.worker_pool.workers
        {
            warn!("Listener and worker-pool changes are ignored until restart");
        }

        let pipeline = Pipeline::build(
            &fresh.pipeline,
            &self.handlers,
            &self.filters,
            &self.stores,
            self.duid.clone(),
            self.stats.clone(),
        )
        .map_err(|err| err.to_string())?;

        self.pipeline.swap(Arc::new(pipeline));
        self.stats.record_reload();
        info!("Pipeline reloaded");
        Ok(())
    }

    /// Bind everything and serve until shutdown.
    ///
    /// Bind failures surface as [`Error::Bind`] before any traffic is
    /// accepted; the CLI maps them to their dedicated exit code.
    pub async fn run(&self) -> Result<ExitStatus> {
        // No registrations past this point
        OptionRegistry::global().freeze();
        self.handlers.freeze();
        self.filters.freeze();

        let deadline = Duration::from_millis(self.config.worker_pool.deadline_ms);
        let queue_depth = self.config.worker_pool.effective_queue_depth();
        let (queue_tx, queue_rx) = mpsc::channel::<WorkItem>(queue_depth);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (events_tx, mut events_rx) = mpsc::channel::<ServerEvent>(8);

        // Listeners first: a bind failure must abort startup cleanly
        let mut listeners: Vec<Listener> = Vec::new();
        let mut lq_listeners: Vec<LeasequeryListener> = Vec::new();
        for section in &self.config.listeners {
            let bound = listener::spawn(
                section,
                queue_tx.clone(),
                self.stats.clone(),
                deadline,
                shutdown_rx.clone(),
            );
            match bound {
                Ok(bound) => listeners.push(bound),
                Err(err) => {
                    for listener in &listeners {
                        listener.abort();
                    }
                    return Err(err);
                }
            }

            if section.leasequery_tcp {
                let address = SocketAddrV6::new(section.address, section.port, 0, 0);
                let bound = tcp::spawn(
                    address.into(),
                    section.interface.clone(),
                    self.pipeline.clone(),
                    self.stats.clone(),
                    deadline,
                    shutdown_rx.clone(),
                )
                .await;
                match bound {
                    Ok(bound) => lq_listeners.push(bound),
                    Err(err) => {
                        for listener in &listeners {
                            listener.abort();
                        }
                        for listener in &lq_listeners {
                            listener.abort();
                        }
                        return Err(err);
                    }
                }
            }
        }

        let mut workers = WorkerPool::spawn(
            self.config.worker_pool.workers,
            queue_rx,
            queue_tx.clone(),
            self.pipeline.clone(),
            self.stats.clone(),
            shutdown_rx.clone(),
        );

        let control = match &self.config.control_socket {
            Some(section) => Some(ControlServer::spawn(
                section,
                self.stats.clone(),
                events_tx.clone(),
            )?),
            None => None,
        };

        let stats_sink = self
            .config
            .statistics
            .as_ref()
            .map(|section| spawn_stats_sink(section.clone(), self.stats.clone()));

        info!("Server is ready to handle requests");

        // Excessive handler failures stop the server rather than let it
        // flap forever
        let window = Duration::from_secs(self.config.server.exception_window_secs.max(1));
        let max_exceptions = u64::from(self.config.server.max_exceptions);
        let mut guard_tick = tokio::time::interval(Duration::from_secs(1));
        let mut error_history: std::collections::VecDeque<(std::time::Instant, u64)> =
            std::collections::VecDeque::new();

        let mut exit = ExitStatus::Clean;
        loop {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    if signal.is_ok() {
                        info!("Received termination request");
                    }
                    break;
                }
                event = events_rx.recv() => match event {
                    Some(ServerEvent::Reload { respond }) => {
                        let _ = respond.send(self.reload());
                    }
                    Some(ServerEvent::Shutdown) => {
                        info!("Shutdown requested over the control channel");
                        if self.stats.handler_error_count() > 0 {
                            exit = ExitStatus::ShutdownWithErrors;
                        }
                        break;
                    }
                    None => break,
                },
                _ = guard_tick.tick() => {
                    let now = std::time::Instant::now();
                    let count = self.stats.handler_error_count();
                    error_history.push_back((now, count));
                    while error_history
                        .front()
                        .map(|(at, _)| now.duration_since(*at) > window)
                        .unwrap_or(false)
                    {
                        error_history.pop_front();
                    }
                    let baseline = error_history.front().map(|(_, c)| *c).unwrap_or(count);
                    if count - baseline > max_exceptions {
                        error!(
                            errors = count - baseline,
                            window_secs = window.as_secs(),
                            "Too many handler failures in the exception window; stopping"
                        );
                        exit = ExitStatus::ShutdownWithErrors;
                        break;
                    }
                }
            }
        }

        // Stop accepting, then drain up to the grace period
        info!("Stopping listeners and draining the work queue");
        let _ = shutdown_tx.send(true);
        for listener in &listeners {
            listener.abort();
        }
        for listener in &lq_listeners {
            listener.abort();
        }
        drop(queue_tx);

        let grace = Duration::from_millis(self.config.server.shutdown_grace_ms);
        if tokio::time::timeout(grace, workers.join()).await.is_err() {
            warn!("Grace period expired; force-terminating workers");
            workers.abort();
        }

        if let Some(control) = &control {
            control.abort();
        }
        if let Some(task) = stats_sink {
            task.abort();
        }

        info!("Server stopped");
        Ok(exit)
    }
}

/// Push a statistics snapshot to the configured UDP sink on an interval
fn spawn_stats_sink(
    section: hexane_core::config::StatisticsSection,
    stats: Arc<ServerStats>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let socket = match tokio::net::UdpSocket::bind("[::]:0").await {
            Ok(socket) => socket,
            Err(err) => {
                warn!(error = %err, "Statistics sink socket failed; disabling sink");
                return;
            }
        };
        let mut tick =
            tokio::time::interval(Duration::from_secs(section.interval_secs.max(1)));
        loop {
            tick.tick().await;
            let dump = stats.snapshot().format();
            if let Err(err) = socket.send_to(dump.as_bytes(), &section.sink).await {
                warn!(sink = %section.sink, error = %err, "Statistics push failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_json(control_path: &str) -> String {
        format!(
            r#"{{
                "server": {{ "duid": "000300012211330a665f" }},
                "listener": [
                    {{ "interface": "lo", "address": "::1", "port": 0 }}
                ],
                "worker-pool": {{ "workers": 2, "deadline-ms": 1000 }},
                "control-socket": {{ "path": "{}" }},
                "pipeline": [
                    {{ "handler": "ia-na-pool", "params": {{ "pool": "2001:db8::/64" }} }}
                ]
            }}"#,
            control_path
        )
    }

    #[test]
    fn test_load_config_rejects_garbage() {
        let dir = std::env::temp_dir().join(format!("hexane-cfg-{}", std::process::id()));
        let _ = std::fs::create_dir_all(&dir);

        let missing = dir.join("missing.json");
        assert!(load_config(&missing).is_err());

        let bad = dir.join("bad.json");
        std::fs::write(&bad, "{ not json").unwrap();
        assert!(load_config(&bad).is_err());

        let unknown = dir.join("unknown.json");
        std::fs::write(
            &unknown,
            r#"{ "server": { "duid": "0001" }, "listener": [], "mystery": 1 }"#,
        )
        .unwrap();
        assert!(load_config(&unknown).is_err());
    }

    fn config_without_duid(interface: &str) -> ServerConfig {
        let json = format!(
            r#"{{
                "server": {{}},
                "listener": [ {{ "interface": "{}", "address": "::1" }} ]
            }}"#,
            interface
        );
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn test_determine_duid_prefers_configured() {
        let config: ServerConfig =
            serde_json::from_str(&config_json("/tmp/hexane-duid.sock")).unwrap();
        let duid = determine_server_duid(&config).unwrap();
        assert_eq!(
            duid,
            Duid::LinkLayer {
                hardware_type: 1,
                address: vec![0x22, 0x11, 0x33, 0x0a, 0x66, 0x5f],
            }
        );
    }

    #[test]
    fn test_determine_duid_rejects_bad_configured_value() {
        let mut config: ServerConfig =
            serde_json::from_str(&config_json("/tmp/hexane-duid2.sock")).unwrap();
        // A bare type code with no body decodes to nothing usable
        config.server.duid = Some("0001".to_string());
        assert!(determine_server_duid(&config).is_err());
    }

    #[test]
    fn test_determine_duid_fails_without_any_source() {
        // No configured DUID and no such interface to derive from
        let config = config_without_duid("definitely-not-a-nic-0");
        let result = determine_server_duid(&config);
        assert!(matches!(result, Err(Error::Config(_))));
        assert!(Server::new(config, None).is_err());
    }

    #[test]
    fn test_duid_from_link_address() {
        assert_eq!(
            duid_from_link_address("00:11:22:33:44:55"),
            Some(Duid::from_mac([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]))
        );

        // Loopback and empty addresses are not usable identities
        assert_eq!(duid_from_link_address("00:00:00:00:00:00"), None);
        assert_eq!(duid_from_link_address(""), None);
        assert_eq!(duid_from_link_address("not-a-mac"), None);

        // Longer hardware addresses keep their full length
        assert_eq!(
            duid_from_link_address("00:11:22:33:44:55:66:77"),
            Some(Duid::LinkLayer {
                hardware_type: 1,
                address: vec![0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77],
            })
        );
    }

    #[test]
    fn test_with_duid_skips_derivation() {
        // Even with nothing to derive from, a caller-supplied identity works
        let config = config_without_duid("definitely-not-a-nic-0");
        let server =
            Server::with_duid(config, None, Duid::from_mac([0xca, 0xfe, 0, 0, 0, 1])).unwrap();
        assert!(server.pipeline.load().len() > 1);
    }

    #[test]
    fn test_server_new_builds_pipeline() {
        let config: ServerConfig =
            serde_json::from_str(&config_json("/tmp/hexane-test.sock")).unwrap();
        let server = Server::new(config, None).unwrap();
        assert!(server.pipeline.load().len() > 1);
    }

    #[test]
    fn test_server_new_rejects_unknown_handler() {
        let json = r#"{
            "server": { "duid": "000300012211330a665f" },
            "listener": [ { "interface": "lo", "address": "::1" } ],
            "pipeline": [ { "handler": "does-not-exist" } ]
        }"#;
        let config: ServerConfig = serde_json::from_str(json).unwrap();
        assert!(Server::new(config, None).is_err());
    }

    #[test]
    fn test_reload_without_path_fails_and_keeps_pipeline() {
        let config: ServerConfig =
            serde_json::from_str(&config_json("/tmp/hexane-test2.sock")).unwrap();
        let server = Server::new(config, None).unwrap();
        let before = server.pipeline.load();

        let outcome = server.reload();
        assert!(outcome.is_err());
        assert!(Arc::ptr_eq(&before, &server.pipeline.load()));
    }

    #[test]
    fn test_reload_from_file_swaps_pipeline() {
        let dir = std::env::temp_dir().join(format!("hexane-reload-{}", std::process::id()));
        let _ = std::fs::create_dir_all(&dir);
        let path = dir.join("server.json");
        let control = dir.join("control.sock");
        std::fs::write(&path, config_json(control.to_str().unwrap())).unwrap();

        let config = load_config(&path).unwrap();
        let server = Server::new(config, Some(path.clone())).unwrap();
        let before = server.pipeline.load();

        server.reload().unwrap();
        let after = server.pipeline.load();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(server.stats.snapshot().values["control.reloads"], 1);
    }
}
