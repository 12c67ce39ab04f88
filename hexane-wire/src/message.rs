//! DHCPv6 messages (RFC 3315 section 6, RFC 5007, RFC 5460)

use std::fmt;
use std::net::Ipv6Addr;

use hexane_core::error::CodecError;
use hexane_core::types::TransactionId;

use crate::duid::Duid;
use crate::options::{self, DhcpOption};
use crate::registry::{ContainerKind, DecodeCtx, OptionRegistry};

/// DHCPv6 message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Solicit = 1,
    Advertise = 2,
    Request = 3,
    Confirm = 4,
    Renew = 5,
    Rebind = 6,
    Reply = 7,
    Release = 8,
    Decline = 9,
    Reconfigure = 10,
    InformationRequest = 11,
    RelayForward = 12,
    RelayReply = 13,
    Leasequery = 14,
    LeasequeryReply = 15,
    LeasequeryDone = 16,
    LeasequeryData = 17,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Solicit),
            2 => Some(Self::Advertise),
            3 => Some(Self::Request),
            4 => Some(Self::Confirm),
            5 => Some(Self::Renew),
            6 => Some(Self::Rebind),
            7 => Some(Self::Reply),
            8 => Some(Self::Release),
            9 => Some(Self::Decline),
            10 => Some(Self::Reconfigure),
            11 => Some(Self::InformationRequest),
            12 => Some(Self::RelayForward),
            13 => Some(Self::RelayReply),
            14 => Some(Self::Leasequery),
            15 => Some(Self::LeasequeryReply),
            16 => Some(Self::LeasequeryDone),
            17 => Some(Self::LeasequeryData),
            _ => None,
        }
    }

    /// Is this a relay-agent message?
    pub fn is_relay(&self) -> bool {
        matches!(self, Self::RelayForward | Self::RelayReply)
    }

    /// Kinds only a server (or relay, towards the client) originates.
    /// Receiving one of these at the server is a silent, counted drop.
    pub fn is_server_originated(&self) -> bool {
        matches!(
            self,
            Self::Advertise
                | Self::Reply
                | Self::Reconfigure
                | Self::RelayReply
                | Self::LeasequeryReply
                | Self::LeasequeryDone
                | Self::LeasequeryData
        )
    }

    /// Lowercase protocol name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Solicit => "solicit",
            Self::Advertise => "advertise",
            Self::Request => "request",
            Self::Confirm => "confirm",
            Self::Renew => "renew",
            Self::Rebind => "rebind",
            Self::Reply => "reply",
            Self::Release => "release",
            Self::Decline => "decline",
            Self::Reconfigure => "reconfigure",
            Self::InformationRequest => "information-request",
            Self::RelayForward => "relay-forward",
            Self::RelayReply => "relay-reply",
            Self::Leasequery => "leasequery",
            Self::LeasequeryReply => "leasequery-reply",
            Self::LeasequeryDone => "leasequery-done",
            Self::LeasequeryData => "leasequery-data",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A client/server message: type, transaction-id, options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientMessage {
    pub msg_type: MessageType,
    pub transaction_id: TransactionId,
    pub options: Vec<DhcpOption>,
}

impl ClientMessage {
    pub fn new(msg_type: MessageType, transaction_id: TransactionId) -> Self {
        Self {
            msg_type,
            transaction_id,
            options: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: Vec<DhcpOption>) -> Self {
        self.options = options;
        self
    }

    /// First option carrying `code`, in option order
    pub fn find(&self, code: u16) -> Option<&DhcpOption> {
        self.options.iter().find(|option| option.code() == code)
    }

    /// All options carrying `code`
    pub fn find_all(&self, code: u16) -> impl Iterator<Item = &DhcpOption> {
        self.options.iter().filter(move |option| option.code() == code)
    }

    /// The client DUID, when present
    pub fn client_duid(&self) -> Option<&Duid> {
        match self.find(options::OPTION_CLIENTID) {
            Some(DhcpOption::ClientId(duid)) => Some(duid),
            _ => None,
        }
    }

    /// The server DUID, when present
    pub fn server_duid(&self) -> Option<&Duid> {
        match self.find(options::OPTION_SERVERID) {
            Some(DhcpOption::ServerId(duid)) => Some(duid),
            _ => None,
        }
    }

    /// Option codes requested via the option-request option
    pub fn requested_options(&self) -> &[u16] {
        match self.find(options::OPTION_ORO) {
            Some(DhcpOption::Oro(codes)) => codes,
            _ => &[],
        }
    }

    /// Did the client offer rapid commit?
    pub fn has_rapid_commit(&self) -> bool {
        self.find(options::OPTION_RAPID_COMMIT).is_some()
    }
}

/// A relay-forward or relay-reply message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayMessage {
    pub msg_type: MessageType,
    pub hop_count: u8,
    pub link_address: Ipv6Addr,
    pub peer_address: Ipv6Addr,
    pub options: Vec<DhcpOption>,
}

impl RelayMessage {
    /// The message carried by the relay-message option.
    ///
    /// Decode guarantees exactly one is present.
    pub fn inner(&self) -> Option<&Message> {
        self.options.iter().find_map(|option| match option {
            DhcpOption::RelayMessage(message) => Some(message.as_ref()),
            _ => None,
        })
    }

    /// The interface-id option, when the relay added one
    pub fn interface_id(&self) -> Option<&[u8]> {
        self.options.iter().find_map(|option| match option {
            DhcpOption::InterfaceId(id) => Some(id.as_slice()),
            _ => None,
        })
    }
}

/// Any DHCPv6 message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Client(ClientMessage),
    Relay(RelayMessage),
}

/// Result of a successful decode
#[derive(Debug, Clone)]
pub struct Decoded {
    pub message: Message,
    /// Bytes consumed; always the whole buffer for datagram transports
    pub consumed: usize,
    /// One or more options were demoted to opaque
    pub partial: bool,
}

impl Message {
    /// The message kind
    pub fn msg_type(&self) -> MessageType {
        match self {
            Message::Client(msg) => msg.msg_type,
            Message::Relay(msg) => msg.msg_type,
        }
    }

    /// Options at the top level of this message
    pub fn options(&self) -> &[DhcpOption] {
        match self {
            Message::Client(msg) => &msg.options,
            Message::Relay(msg) => &msg.options,
        }
    }

    /// Decode a message using the global registry
    pub fn decode(buf: &[u8]) -> Result<Decoded, CodecError> {
        Self::decode_with(buf, OptionRegistry::global())
    }

    /// Decode a message against a specific registry
    pub fn decode_with(buf: &[u8], registry: &OptionRegistry) -> Result<Decoded, CodecError> {
        let mut ctx = DecodeCtx::new(registry);
        let message = Self::decode_at(buf, &mut ctx)?;
        Ok(Decoded {
            message,
            consumed: buf.len(),
            partial: ctx.partial(),
        })
    }

    /// Decode at the current nesting level of `ctx`
    pub(crate) fn decode_at(buf: &[u8], ctx: &mut DecodeCtx) -> Result<Message, CodecError> {
        if buf.is_empty() {
            return Err(CodecError::Truncated { needed: 1 });
        }
        let msg_type =
            MessageType::from_u8(buf[0]).ok_or(CodecError::UnknownMessageType(buf[0]))?;

        if msg_type.is_relay() {
            if buf.len() < 34 {
                return Err(CodecError::Truncated {
                    needed: 34 - buf.len(),
                });
            }
            let mut link = [0u8; 16];
            link.copy_from_slice(&buf[2..18]);
            let mut peer = [0u8; 16];
            peer.copy_from_slice(&buf[18..34]);

            let options = options::decode_options(&buf[34..], ctx, ContainerKind::Relay)?;
            let carried = options
                .iter()
                .filter(|option| option.code() == options::OPTION_RELAY_MSG)
                .count();
            if carried != 1 {
                return Err(CodecError::BadRelayMessage { count: carried });
            }

            Ok(Message::Relay(RelayMessage {
                msg_type,
                hop_count: buf[1],
                link_address: Ipv6Addr::from(link),
                peer_address: Ipv6Addr::from(peer),
                options,
            }))
        } else {
            if buf.len() < 4 {
                return Err(CodecError::Truncated {
                    needed: 4 - buf.len(),
                });
            }
            let transaction_id = TransactionId([buf[1], buf[2], buf[3]]);
            let options = options::decode_options(&buf[4..], ctx, ContainerKind::Message)?;
            Ok(Message::Client(ClientMessage {
                msg_type,
                transaction_id,
                options,
            }))
        }
    }

    /// Encode to a fresh buffer
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::with_capacity(128);
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// Encode, appending to `buf`
    pub(crate) fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        match self {
            Message::Client(msg) => {
                buf.push(msg.msg_type as u8);
                buf.extend_from_slice(msg.transaction_id.as_bytes());
                options::encode_options(&msg.options, buf)
            }
            Message::Relay(msg) => {
                buf.push(msg.msg_type as u8);
                buf.push(msg.hop_count);
                buf.extend_from_slice(&msg.link_address.octets());
                buf.extend_from_slice(&msg.peer_address.octets());
                options::encode_options(&msg.options, buf)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{IaAddress, IaNa};

    fn solicit_fixture() -> Vec<u8> {
        // Solicit, xid aabbcc, client-id DUID-LL 00:11:22:33:44:55,
        // empty IA_NA iaid 1
        let mut bytes = vec![0x01, 0xaa, 0xbb, 0xcc];
        bytes.extend_from_slice(&[
            0x00, 0x01, 0x00, 0x0a, // client-id, length 10
            0x00, 0x03, 0x00, 0x01, 0x00, 0x11, 0x22, 0x33, 0x44, 0x55,
        ]);
        bytes.extend_from_slice(&[
            0x00, 0x03, 0x00, 0x0c, // ia-na, length 12
            0x00, 0x00, 0x00, 0x01, // iaid 1
            0x00, 0x00, 0x00, 0x00, // t1
            0x00, 0x00, 0x00, 0x00, // t2
        ]);
        bytes
    }

    #[test]
    fn test_solicit_decode() {
        let decoded = Message::decode(&solicit_fixture()).unwrap();
        assert!(!decoded.partial);
        assert_eq!(decoded.consumed, solicit_fixture().len());

        let msg = match decoded.message {
            Message::Client(msg) => msg,
            other => panic!("expected client message, got {:?}", other),
        };
        assert_eq!(msg.msg_type, MessageType::Solicit);
        assert_eq!(msg.transaction_id, TransactionId([0xaa, 0xbb, 0xcc]));
        assert_eq!(
            msg.client_duid(),
            Some(&Duid::from_mac([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]))
        );
        match msg.find(options::OPTION_IA_NA) {
            Some(DhcpOption::IaNa(ia)) => {
                assert_eq!(ia.iaid, 1);
                assert_eq!(ia.t1, 0);
                assert_eq!(ia.t2, 0);
                assert!(ia.options.is_empty());
            }
            other => panic!("expected IA_NA, got {:?}", other),
        }
    }

    #[test]
    fn test_byte_identical_roundtrip() {
        let bytes = solicit_fixture();
        let decoded = Message::decode(&bytes).unwrap();
        assert_eq!(decoded.message.encode().unwrap(), bytes);
    }

    #[test]
    fn test_unknown_option_roundtrip_in_message() {
        let mut bytes = solicit_fixture();
        bytes.extend_from_slice(&[0xff, 0xff, 0x00, 0x03, 0x01, 0x02, 0x03]);
        let decoded = Message::decode(&bytes).unwrap();
        assert!(!decoded.partial);
        assert_eq!(decoded.message.encode().unwrap(), bytes);
    }

    #[test]
    fn test_structured_roundtrip() {
        let message = Message::Client(ClientMessage {
            msg_type: MessageType::Advertise,
            transaction_id: TransactionId([0xaa, 0xbb, 0xcc]),
            options: vec![
                DhcpOption::ServerId(Duid::from_mac([2, 2, 2, 2, 2, 2])),
                DhcpOption::ClientId(Duid::from_mac([1, 1, 1, 1, 1, 1])),
                DhcpOption::IaNa(IaNa {
                    iaid: 1,
                    t1: 1800,
                    t2: 2880,
                    options: vec![DhcpOption::IaAddress(IaAddress {
                        address: "2001:db8::1".parse().unwrap(),
                        preferred_lifetime: 3600,
                        valid_lifetime: 7200,
                        options: vec![],
                    })],
                }),
            ],
        });

        let decoded = Message::decode(&message.encode().unwrap()).unwrap();
        assert_eq!(decoded.message, message);
    }

    #[test]
    fn test_unknown_message_type_fails() {
        let bytes = [0xfe, 0x00, 0x00, 0x00];
        assert_eq!(
            Message::decode(&bytes).map(|_| ()),
            Err(CodecError::UnknownMessageType(0xfe))
        );
    }

    #[test]
    fn test_relay_forward_roundtrip() {
        let inner = Message::decode(&solicit_fixture()).unwrap().message;
        let relay = Message::Relay(RelayMessage {
            msg_type: MessageType::RelayForward,
            hop_count: 0,
            link_address: "2001:db8::ffff".parse().unwrap(),
            peer_address: "fe80::1".parse().unwrap(),
            options: vec![
                DhcpOption::InterfaceId(b"ge-0/0/1".to_vec()),
                DhcpOption::RelayMessage(Box::new(inner.clone())),
            ],
        });

        let bytes = relay.encode().unwrap();
        let decoded = Message::decode(&bytes).unwrap();
        assert!(!decoded.partial);
        assert_eq!(decoded.message, relay);

        match &decoded.message {
            Message::Relay(msg) => {
                assert_eq!(msg.hop_count, 0);
                assert_eq!(msg.inner(), Some(&inner));
                assert_eq!(msg.interface_id(), Some(b"ge-0/0/1".as_slice()));
            }
            other => panic!("expected relay message, got {:?}", other),
        }
    }

    #[test]
    fn test_relay_without_relay_message_fails() {
        let relay = Message::Relay(RelayMessage {
            msg_type: MessageType::RelayForward,
            hop_count: 0,
            link_address: "2001:db8::ffff".parse().unwrap(),
            peer_address: "fe80::1".parse().unwrap(),
            options: vec![DhcpOption::InterfaceId(b"ge-0/0/1".to_vec())],
        });
        let bytes = relay.encode().unwrap();
        assert_eq!(
            Message::decode(&bytes).map(|_| ()),
            Err(CodecError::BadRelayMessage { count: 0 })
        );
    }

    #[test]
    fn test_recursion_limit_no_overflow() {
        // 40 relays deep, exceeding the limit of 32
        let mut message = Message::decode(&solicit_fixture()).unwrap().message;
        for hop in 0..40u8 {
            message = Message::Relay(RelayMessage {
                msg_type: MessageType::RelayForward,
                hop_count: hop,
                link_address: Ipv6Addr::UNSPECIFIED,
                peer_address: "fe80::1".parse().unwrap(),
                options: vec![DhcpOption::RelayMessage(Box::new(message))],
            });
        }
        let bytes = message.encode().unwrap();
        assert_eq!(
            Message::decode(&bytes).map(|_| ()),
            Err(CodecError::RecursionLimit)
        );
    }

    #[test]
    fn test_nesting_below_limit_decodes() {
        let mut message = Message::decode(&solicit_fixture()).unwrap().message;
        for hop in 0..8u8 {
            message = Message::Relay(RelayMessage {
                msg_type: MessageType::RelayForward,
                hop_count: hop,
                link_address: Ipv6Addr::UNSPECIFIED,
                peer_address: "fe80::1".parse().unwrap(),
                options: vec![DhcpOption::RelayMessage(Box::new(message))],
            });
        }
        let bytes = message.encode().unwrap();
        let decoded = Message::decode(&bytes).unwrap();
        assert_eq!(decoded.message, message);
    }

    #[test]
    fn test_truncated_header_fails() {
        assert!(matches!(
            Message::decode(&[0x01, 0xaa]),
            Err(CodecError::Truncated { .. })
        ));
        assert!(matches!(
            Message::decode(&[0x0c, 0x00, 0x00]),
            Err(CodecError::Truncated { .. })
        ));
    }
}
