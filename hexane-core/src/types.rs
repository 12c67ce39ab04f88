//! Common types used throughout hexane

use std::fmt;
use std::net::Ipv6Addr;
use std::str::FromStr;

/// DHCPv6 server port
pub const SERVER_PORT: u16 = 547;

/// DHCPv6 client port
pub const CLIENT_PORT: u16 = 546;

/// All_DHCP_Relay_Agents_and_Servers (ff02::1:2)
pub const ALL_DHCP_RELAY_AGENTS_AND_SERVERS: Ipv6Addr =
    Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0x0001, 0x0002);

/// All_DHCP_Servers (ff05::1:3)
pub const ALL_DHCP_SERVERS: Ipv6Addr = Ipv6Addr::new(0xff05, 0, 0, 0, 0, 0, 0x0001, 0x0003);

/// DHCPv6 transaction-id (24 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TransactionId(pub [u8; 3]);

impl TransactionId {
    pub const fn new(bytes: [u8; 3]) -> Self {
        Self(bytes)
    }

    /// Get bytes as slice
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}{:02x}{:02x}", self.0[0], self.0[1], self.0[2])
    }
}

impl FromStr for TransactionId {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 6 {
            return Err(crate::Error::config("transaction-id must be 6 hex digits"));
        }
        let mut bytes = [0u8; 3];
        for (i, chunk) in [&s[0..2], &s[2..4], &s[4..6]].iter().enumerate() {
            bytes[i] = u8::from_str_radix(chunk, 16)
                .map_err(|_| crate::Error::config("transaction-id contains invalid hex"))?;
        }
        Ok(TransactionId(bytes))
    }
}

/// Terminal decision of the pipeline for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Disposition {
    /// Encode the response and send it
    #[default]
    Emit,
    /// Discard the transaction without a response
    Drop,
    /// Put the transaction back on the queue for one more attempt
    Defer,
}

/// Why a transaction was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The datagram did not decode
    DecodeError,
    /// A handler hook returned an error
    HandlerError,
    /// The transaction deadline passed between phases
    Timeout,
    /// A handler decided the request should not be answered
    Policy,
    /// The work queue was full when the datagram arrived
    QueueFull,
    /// The outbound socket refused the datagram
    SendError,
    /// A client-only message kind was sent to the server
    ClientOnly,
    /// The finished response failed to encode
    EncodeError,
}

impl DropReason {
    /// Stable label used in statistics output
    pub fn label(&self) -> &'static str {
        match self {
            DropReason::DecodeError => "decode_error",
            DropReason::HandlerError => "handler_error",
            DropReason::Timeout => "timeout",
            DropReason::Policy => "policy",
            DropReason::QueueFull => "queue_full",
            DropReason::SendError => "send_error",
            DropReason::ClientOnly => "client_only",
            DropReason::EncodeError => "encode_error",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Transport a transaction arrived over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Plain UDP datagram on the server port
    Udp,
    /// Length-framed TCP stream (bulk leasequery)
    Tcp,
}
