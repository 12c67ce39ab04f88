//! Bulk leasequery TCP transport (RFC 5460)
//!
//! The same option codec as UDP, framed by a two-octet length prefix.
//! Each connection runs its queries through the active pipeline inline;
//! replies and any streamed leasequery-data/done messages go back with
//! the same framing.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use hexane_core::error::{Error, Result};
use hexane_core::stats::ServerStats;
use hexane_core::types::Transport;

use hexane_engine::pipeline::PipelineHandle;
use hexane_engine::transaction::{ReceiveInfo, TransactionBundle};
use hexane_wire::Message;

/// Frames larger than this are a protocol violation and close the stream
const MAX_FRAME: usize = 65535;

/// The running TCP listener
pub struct LeasequeryListener {
    pub address: SocketAddr,
    task: JoinHandle<()>,
}

impl LeasequeryListener {
    pub fn abort(&self) {
        self.task.abort();
    }
}

/// Bind the bulk leasequery listener and start accepting
pub async fn spawn(
    address: SocketAddr,
    interface: String,
    pipeline: Arc<PipelineHandle>,
    stats: Arc<ServerStats>,
    deadline: Duration,
    shutdown: watch::Receiver<bool>,
) -> Result<LeasequeryListener> {
    let listener = TcpListener::bind(address).await.map_err(|source| Error::Bind {
        address: address.to_string(),
        source,
    })?;
    let local = listener.local_addr()?;
    info!(address = %local, "Bulk leasequery listener bound");

    let task = tokio::spawn(accept_loop(
        listener, interface, pipeline, stats, deadline, shutdown,
    ));
    Ok(LeasequeryListener {
        address: local,
        task,
    })
}

async fn accept_loop(
    listener: TcpListener,
    interface: String,
    pipeline: Arc<PipelineHandle>,
    stats: Arc<ServerStats>,
    deadline: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(error = %err, "Leasequery accept failed");
                    continue;
                }
            },
        };
        debug!(peer = %peer, "Leasequery connection");

        let interface = interface.clone();
        let pipeline = pipeline.clone();
        let stats = stats.clone();
        tokio::spawn(async move {
            if let Err(err) =
                handle_connection(stream, peer, interface, pipeline, stats, deadline).await
            {
                debug!(peer = %peer, error = %err, "Leasequery connection closed");
            }
        });
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    interface: String,
    pipeline: Arc<PipelineHandle>,
    stats: Arc<ServerStats>,
    deadline: Duration,
) -> std::io::Result<()> {
    let local = stream.local_addr()?;
    let mut frame = BytesMut::with_capacity(4096);

    loop {
        // Two-octet length prefix, network byte order
        let mut length_bytes = [0u8; 2];
        match stream.read_exact(&mut length_bytes).await {
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(err) => return Err(err),
        }
        let length = u16::from_be_bytes(length_bytes) as usize;
        if length == 0 || length > MAX_FRAME {
            warn!(peer = %peer, length, "Bad leasequery frame length");
            return Ok(());
        }

        frame.resize(length, 0);
        stream.read_exact(&mut frame[..]).await?;

        let decoded = match Message::decode(&frame[..]) {
            Ok(decoded) => decoded,
            Err(err) => {
                stats.record_decode_error();
                debug!(peer = %peer, error = %err, "Undecodable leasequery frame");
                continue;
            }
        };
        stats.record_rx(decoded.message.msg_type() as u8);

        let recv = ReceiveInfo {
            source: peer,
            destination: local,
            interface: interface.clone(),
            received_at: Instant::now(),
            transport: Transport::Tcp,
        };
        let mut bundle = match TransactionBundle::new(decoded, recv, deadline) {
            Ok(bundle) => bundle,
            Err(_) => {
                stats.record_client_only();
                continue;
            }
        };

        let active = pipeline.load();
        let started = Instant::now();
        active.execute(&mut bundle);
        stats.latency.record(started.elapsed());

        if bundle.is_dropped() {
            continue;
        }

        let reply = bundle
            .outbound()
            .cloned()
            .unwrap_or_else(|| Message::Client(bundle.response().clone()));
        write_frame(&mut stream, &reply).await?;
        for extra in std::mem::take(&mut bundle.extra_responses) {
            write_frame(&mut stream, &Message::Client(extra)).await?;
        }
        stats.record_emitted();
    }
}

async fn write_frame(stream: &mut TcpStream, message: &Message) -> std::io::Result<()> {
    let payload = message.encode().map_err(|err| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string())
    })?;
    if payload.len() > MAX_FRAME {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "reply exceeds frame limit",
        ));
    }
    let mut out = BytesMut::with_capacity(payload.len() + 2);
    out.put_u16(payload.len() as u16);
    out.put_slice(&payload);
    stream.write_all(&out).await?;
    stream.flush().await
}

/// Read one length-prefixed frame from a byte buffer; used by tests and
/// any future in-process transports
pub fn split_frame(buf: &mut BytesMut) -> Option<BytesMut> {
    if buf.len() < 2 {
        return None;
    }
    let length = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    if buf.len() < 2 + length {
        return None;
    }
    buf.advance(2);
    Some(buf.split_to(length))
}
