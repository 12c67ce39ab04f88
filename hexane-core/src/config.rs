//! Configuration model
//!
//! The configuration grammar and file loading live outside the core; this
//! module defines the structured tree the loader produces and the validation
//! applied before the server consumes it. Unknown sections or keys are a
//! fatal configuration error.

use std::collections::HashSet;
use std::net::Ipv6Addr;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ServerConfig {
    /// Server identity and global limits
    pub server: ServerSection,

    /// Listener sockets (at least one)
    #[serde(rename = "listener")]
    pub listeners: Vec<ListenerSection>,

    /// Worker pool sizing
    #[serde(default)]
    pub worker_pool: WorkerPoolSection,

    /// Statistics sink
    #[serde(default)]
    pub statistics: Option<StatisticsSection>,

    /// Control socket
    #[serde(default)]
    pub control_socket: Option<ControlSection>,

    /// Ordered filter/handler tree
    #[serde(default)]
    pub pipeline: Vec<PipelineNode>,
}

impl ServerConfig {
    /// Validate the configuration
    ///
    /// Handler and filter names are checked later, against the frozen
    /// registries, when the pipeline is built.
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;

        if self.listeners.is_empty() {
            return Err(Error::config("at least one listener must be configured"));
        }

        let mut seen = HashSet::new();
        for listener in &self.listeners {
            listener.validate()?;
            if !seen.insert((listener.interface.clone(), listener.address, listener.port)) {
                return Err(Error::config(format!(
                    "duplicate listener for {} on {}",
                    listener.address, listener.interface
                )));
            }
        }

        self.worker_pool.validate()?;

        for node in &self.pipeline {
            node.validate()?;
        }

        Ok(())
    }
}

/// The `server` section: identity and global limits
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ServerSection {
    /// Server DUID as a hex string. When absent, the loader derives an
    /// LL DUID from an interface's link-layer address before giving up.
    #[serde(default)]
    pub duid: Option<String>,

    /// Grace period for draining the queue on shutdown
    #[serde(default = "defaults::shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Handler failures tolerated inside the exception window before the
    /// server gives up
    #[serde(default = "defaults::max_exceptions")]
    pub max_exceptions: u32,

    /// Exception window in seconds
    #[serde(default = "defaults::exception_window_secs")]
    pub exception_window_secs: u64,
}

impl ServerSection {
    fn validate(&self) -> Result<()> {
        let duid = match &self.duid {
            Some(duid) => duid.trim(),
            None => return Ok(()),
        };
        if duid.is_empty() || duid.len() % 2 != 0 || !duid.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(Error::config("server duid must be an even-length hex string"));
        }
        if duid.len() < 6 {
            return Err(Error::config("server duid is too short"));
        }
        Ok(())
    }

    /// The configured DUID as raw bytes; `None` when no DUID was
    /// configured and the loader is expected to derive one
    pub fn configured_duid(&self) -> Option<Vec<u8>> {
        let duid = self.duid.as_deref()?.trim();
        Some(
            (0..duid.len())
                .step_by(2)
                .map(|i| u8::from_str_radix(&duid[i..i + 2], 16).unwrap_or(0))
                .collect(),
        )
    }
}

/// A `listener` section: one socket on one interface/address pair
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ListenerSection {
    /// Interface name the socket is bound to
    pub interface: String,

    /// IPv6 address to bind
    pub address: Ipv6Addr,

    /// UDP port (defaults to the DHCPv6 server port)
    #[serde(default = "defaults::server_port")]
    pub port: u16,

    /// Join All_DHCP_Relay_Agents_and_Servers on this interface
    #[serde(default)]
    pub multicast_join: bool,

    /// Also join the site-scoped All_DHCP_Servers group
    #[serde(default)]
    pub all_servers_join: bool,

    /// Accept bulk leasequery connections over TCP on the same address
    #[serde(default)]
    pub leasequery_tcp: bool,
}

impl ListenerSection {
    fn validate(&self) -> Result<()> {
        if self.interface.is_empty() {
            return Err(Error::config("listener interface must not be empty"));
        }
        if self.address.is_multicast() {
            return Err(Error::config(format!(
                "listener address {} is a multicast group; bind a unicast address and set multicast-join",
                self.address
            )));
        }
        if self.multicast_join && !is_link_local(&self.address) {
            return Err(Error::config(format!(
                "listener {} joins multicast but {} is not link-local; replies to multicast \
                 requests must come from a link-local address",
                self.interface, self.address
            )));
        }
        Ok(())
    }
}

/// The `worker-pool` section
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct WorkerPoolSection {
    /// Number of worker tasks
    #[serde(default = "defaults::workers")]
    pub workers: usize,

    /// Work queue depth; defaults to 4x the worker count
    #[serde(default)]
    pub queue_depth: Option<usize>,

    /// Per-transaction deadline in milliseconds
    #[serde(default = "defaults::deadline_ms")]
    pub deadline_ms: u64,
}

impl WorkerPoolSection {
    fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::config("worker-pool workers must be at least 1"));
        }
        if self.deadline_ms == 0 {
            return Err(Error::config("worker-pool deadline-ms must be nonzero"));
        }
        if let Some(depth) = self.queue_depth {
            if depth == 0 {
                return Err(Error::config("worker-pool queue-depth must be nonzero"));
            }
        }
        Ok(())
    }

    /// Effective queue depth
    pub fn effective_queue_depth(&self) -> usize {
        self.queue_depth.unwrap_or(self.workers * 4)
    }
}

impl Default for WorkerPoolSection {
    fn default() -> Self {
        Self {
            workers: defaults::workers(),
            queue_depth: None,
            deadline_ms: defaults::deadline_ms(),
        }
    }
}

/// The `statistics` section
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct StatisticsSection {
    /// UDP address snapshots are pushed to
    pub sink: String,

    /// Push interval in seconds
    #[serde(default = "defaults::stats_interval_secs")]
    pub interval_secs: u64,
}

/// The `control-socket` section
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ControlSection {
    /// Filesystem path of the UNIX socket
    pub path: PathBuf,

    /// Octal permission bits applied to the socket file
    #[serde(default)]
    pub mode: Option<u32>,
}

/// One node of the filter/handler tree
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PipelineNode {
    Handler(HandlerSection),
    Filter(FilterSection),
}

impl PipelineNode {
    fn validate(&self) -> Result<()> {
        match self {
            PipelineNode::Handler(h) => {
                if h.handler.is_empty() {
                    return Err(Error::config("handler name must not be empty"));
                }
            }
            PipelineNode::Filter(f) => {
                if f.filter.is_empty() {
                    return Err(Error::config("filter name must not be empty"));
                }
                for child in &f.children {
                    child.validate()?;
                }
            }
        }
        Ok(())
    }
}

/// A handler section: names a registered handler factory and its parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct HandlerSection {
    /// Registered factory name
    pub handler: String,

    /// Factory parameters
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,

    /// Ordering key within the handler's phase (lower first)
    #[serde(default)]
    pub precedence: Option<u16>,
}

/// A filter section: a predicate scoping the nested handlers and filters
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FilterSection {
    /// Registered filter kind
    pub filter: String,

    /// Filter condition, interpreted by the filter factory
    #[serde(default)]
    pub value: serde_json::Value,

    /// Nested handlers and filters, evaluated only when this filter matches
    #[serde(default)]
    pub children: Vec<PipelineNode>,
}

fn is_link_local(addr: &Ipv6Addr) -> bool {
    addr.segments()[0] & 0xffc0 == 0xfe80
}

mod defaults {
    pub fn server_port() -> u16 {
        crate::types::SERVER_PORT
    }

    pub fn workers() -> usize {
        4
    }

    pub fn deadline_ms() -> u64 {
        1000
    }

    pub fn shutdown_grace_ms() -> u64 {
        5000
    }

    pub fn max_exceptions() -> u32 {
        10
    }

    pub fn exception_window_secs() -> u64 {
        1
    }

    pub fn stats_interval_secs() -> u64 {
        60
    }
}
