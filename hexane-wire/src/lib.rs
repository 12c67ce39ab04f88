//! DHCPv6 wire codec (RFC 3315 and extensions)
//!
//! Binary encode/decode for DHCPv6 messages and their recursive options.
//! Encoding is unambiguous; decoding is tolerant in a bounded way: unknown
//! option codes become opaque options, unknown DUID types become opaque
//! DUIDs, and structural errors inside a known option demote it to opaque
//! while flagging the message as partially decoded. Unknown message types
//! fail hard.
//!
//! The codec is stateless and re-entrant; nesting is bounded by
//! [`MAX_NESTING_DEPTH`].

pub mod dns_name;
pub mod duid;
pub mod message;
pub mod options;
pub mod registry;

/// Maximum recursion depth for nested options and relay messages
pub const MAX_NESTING_DEPTH: usize = 32;

/// Maximum DUID length in octets (RFC 3315 section 9.1)
pub const MAX_DUID_LEN: usize = 130;

pub use duid::Duid;
pub use message::{ClientMessage, Decoded, Message, MessageType, RelayMessage};
pub use options::{DhcpOption, IaAddress, IaNa, IaPd, IaPrefix, IaTa, StatusCodeOption};
pub use registry::{ContainerKind, DecodeCtx, OptionEntry, OptionRegistry};

// Well-known ports and multicast groups live with the shared types
pub use hexane_core::types::{
    ALL_DHCP_RELAY_AGENTS_AND_SERVERS, ALL_DHCP_SERVERS, CLIENT_PORT, SERVER_PORT,
};
