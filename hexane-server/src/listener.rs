//! UDP listeners
//!
//! One listener per configured interface/address pair, bound to the
//! DHCPv6 server port. The receive task decodes datagrams and enqueues
//! transactions onto the shared bounded work queue; the send task writes
//! worker responses back out the same socket. Sending is non-blocking:
//! a full send buffer is a counted drop, never backpressure.

use std::net::{SocketAddr, SocketAddrV6};
use std::sync::Arc;
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use hexane_core::config::ListenerSection;
use hexane_core::error::{Error, Result};
use hexane_core::stats::ServerStats;
use hexane_core::types::{DropReason, Transport, ALL_DHCP_RELAY_AGENTS_AND_SERVERS, ALL_DHCP_SERVERS};

use hexane_engine::transaction::{ReceiveInfo, TransactionBundle};
use hexane_wire::Message;

/// One datagram on its way out
#[derive(Debug)]
pub struct Outbound {
    pub payload: Vec<u8>,
    pub destination: SocketAddr,
}

/// One parsed transaction queued for a worker
pub struct WorkItem {
    pub bundle: TransactionBundle,
    /// Channel back to the listener that owns the receiving socket
    pub outbound: mpsc::Sender<Outbound>,
    /// Set when the transaction was already deferred once
    pub deferred: bool,
}

/// A running listener and its tasks
pub struct Listener {
    pub interface: String,
    pub address: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl Listener {
    /// Stop both tasks; queued outbound datagrams are discarded
    pub fn abort(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Resolve an interface name to its index via sysfs; 0 lets the kernel pick
fn interface_index(name: &str) -> u32 {
    std::fs::read_to_string(format!("/sys/class/net/{}/ifindex", name))
        .ok()
        .and_then(|content| content.trim().parse().ok())
        .unwrap_or(0)
}

fn is_link_local(addr: &std::net::Ipv6Addr) -> bool {
    addr.segments()[0] & 0xffc0 == 0xfe80
}

/// Build and bind the UDP socket for one listener section
fn bind_socket(section: &ListenerSection) -> Result<std::net::UdpSocket> {
    let index = interface_index(&section.interface);
    let scope_id = if is_link_local(&section.address) {
        index
    } else {
        0
    };
    let bind_addr = SocketAddrV6::new(section.address, section.port, 0, scope_id);

    let make = || -> std::io::Result<std::net::UdpSocket> {
        let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_only_v6(true)?;
        socket.set_reuse_address(true)?;
        #[cfg(target_os = "linux")]
        socket.bind_device(Some(section.interface.as_bytes()))?;
        socket.bind(&bind_addr.into())?;

        if section.multicast_join {
            socket.join_multicast_v6(&ALL_DHCP_RELAY_AGENTS_AND_SERVERS, index)?;
            if section.all_servers_join {
                socket.join_multicast_v6(&ALL_DHCP_SERVERS, index)?;
            }
        }

        socket.set_nonblocking(true)?;
        Ok(socket.into())
    };

    make().map_err(|source| Error::Bind {
        address: bind_addr.to_string(),
        source,
    })
}

/// Bind one listener and spawn its receive and send tasks
pub fn spawn(
    section: &ListenerSection,
    queue: mpsc::Sender<WorkItem>,
    stats: Arc<ServerStats>,
    deadline: Duration,
    shutdown: watch::Receiver<bool>,
) -> Result<Listener> {
    let std_socket = bind_socket(section)?;
    let socket = Arc::new(UdpSocket::from_std(std_socket)?);
    let local = socket.local_addr()?;

    info!(
        interface = %section.interface,
        address = %local,
        multicast = section.multicast_join,
        "Listener bound"
    );

    let (outbound_tx, outbound_rx) = mpsc::channel::<Outbound>(64);

    let recv_task = tokio::spawn(recv_loop(
        socket.clone(),
        section.interface.clone(),
        local,
        queue,
        outbound_tx,
        stats.clone(),
        deadline,
        shutdown,
    ));
    let send_task = tokio::spawn(send_loop(socket, outbound_rx, stats));

    Ok(Listener {
        interface: section.interface.clone(),
        address: local,
        tasks: vec![recv_task, send_task],
    })
}

#[allow(clippy::too_many_arguments)]
async fn recv_loop(
    socket: Arc<UdpSocket>,
    interface: String,
    local: SocketAddr,
    queue: mpsc::Sender<WorkItem>,
    outbound: mpsc::Sender<Outbound>,
    stats: Arc<ServerStats>,
    deadline: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; 65535];
    loop {
        let (len, source) = tokio::select! {
            _ = shutdown.changed() => {
                debug!(interface = %interface, "Listener stopping");
                break;
            }
            received = socket.recv_from(&mut buf) => match received {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(interface = %interface, error = %err, "Receive failed");
                    continue;
                }
            },
        };
        let received_at = Instant::now();

        let decoded = match Message::decode(&buf[..len]) {
            Ok(decoded) => decoded,
            Err(err) => {
                stats.record_decode_error();
                debug!(%source, error = %err, "Dropping undecodable datagram");
                continue;
            }
        };
        stats.record_rx(decoded.message.msg_type() as u8);
        trace!(
            %source,
            msg_type = %decoded.message.msg_type(),
            bytes = len,
            "Datagram received"
        );

        let recv = ReceiveInfo {
            source,
            destination: local,
            interface: interface.clone(),
            received_at,
            transport: Transport::Udp,
        };
        let bundle = match TransactionBundle::new(decoded, recv, deadline) {
            Ok(bundle) => bundle,
            Err(DropReason::ClientOnly) => {
                stats.record_client_only();
                continue;
            }
            Err(_) => {
                stats.record_decode_error();
                continue;
            }
        };

        let item = WorkItem {
            bundle,
            outbound: outbound.clone(),
            deferred: false,
        };
        match queue.try_send(item) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                stats.record_queue_full();
                warn!(interface = %interface, "Work queue full; dropping datagram");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => break,
        }
    }
}

async fn send_loop(
    socket: Arc<UdpSocket>,
    mut outbound: mpsc::Receiver<Outbound>,
    stats: Arc<ServerStats>,
) {
    while let Some(out) = outbound.recv().await {
        match socket.try_send_to(&out.payload, out.destination) {
            Ok(_) => {
                stats.record_emitted();
                trace!(destination = %out.destination, bytes = out.payload.len(), "Sent");
            }
            Err(err) => {
                stats.record_send_error();
                debug!(destination = %out.destination, error = %err, "Send failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_index_of_unknown_interface_is_zero() {
        assert_eq!(interface_index("definitely-not-a-nic-0"), 0);
    }

    #[tokio::test]
    async fn test_loopback_listener_round_trip() {
        // Bind an ephemeral listener on the loopback interface
        let section = ListenerSection {
            interface: "lo".to_string(),
            address: "::1".parse().unwrap(),
            port: 0,
            multicast_join: false,
            all_servers_join: false,
            leasequery_tcp: false,
        };
        let (queue_tx, mut queue_rx) = mpsc::channel(4);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(ServerStats::new());

        let listener = match spawn(
            &section,
            queue_tx,
            stats.clone(),
            Duration::from_secs(1),
            shutdown_rx,
        ) {
            Ok(listener) => listener,
            // Sandboxed test environments may forbid SO_BINDTODEVICE
            Err(_) => return,
        };

        // Fire a minimal Solicit at it
        let client = UdpSocket::bind("[::1]:0").await.unwrap();
        let solicit = [
            0x01, 0xaa, 0xbb, 0xcc, // solicit, xid
            0x00, 0x01, 0x00, 0x0a, // client-id
            0x00, 0x03, 0x00, 0x01, 0x00, 0x11, 0x22, 0x33, 0x44, 0x55,
        ];
        client.send_to(&solicit, listener.address).await.unwrap();

        let item = tokio::time::timeout(Duration::from_secs(2), queue_rx.recv())
            .await
            .expect("queue delivery timed out")
            .expect("queue closed");
        assert_eq!(
            item.bundle.inner().msg_type,
            hexane_wire::MessageType::Solicit
        );
        assert_eq!(stats.snapshot().values["rx.type.1"], 1);

        listener.abort();
    }

    #[tokio::test]
    async fn test_undecodable_datagram_counts_and_drops() {
        let section = ListenerSection {
            interface: "lo".to_string(),
            address: "::1".parse().unwrap(),
            port: 0,
            multicast_join: false,
            all_servers_join: false,
            leasequery_tcp: false,
        };
        let (queue_tx, mut queue_rx) = mpsc::channel(4);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(ServerStats::new());

        let listener = match spawn(
            &section,
            queue_tx,
            stats.clone(),
            Duration::from_secs(1),
            shutdown_rx,
        ) {
            Ok(listener) => listener,
            Err(_) => return,
        };

        let client = UdpSocket::bind("[::1]:0").await.unwrap();
        // Unknown message type 0xfe
        client
            .send_to(&[0xfe, 0x00, 0x00, 0x00], listener.address)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(stats.snapshot().values["rx.decode_errors"], 1);
        assert!(queue_rx.try_recv().is_err());

        listener.abort();
    }
}
