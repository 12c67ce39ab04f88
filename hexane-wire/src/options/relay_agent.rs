//! Relay agent information options
//!
//! Remote-ID (RFC 4649), Subscriber-ID (RFC 4580) and the client
//! link-layer address option (RFC 6939). All three appear only inside
//! relay-forward messages; filters use them to scope handlers.

use hexane_core::error::CodecError;

use crate::registry::DecodeCtx;

use super::{need, read_u16, read_u32, DhcpOption};

pub const OPTION_REMOTE_ID: u16 = 37;
pub const OPTION_SUBSCRIBER_ID: u16 = 38;
pub const OPTION_CLIENT_LINKLAYER_ADDR: u16 = 79;

pub(crate) fn decode_remote_id(value: &[u8], _ctx: &mut DecodeCtx) -> Result<DhcpOption, CodecError> {
    need(value, 4)?;
    Ok(DhcpOption::RemoteId {
        enterprise: read_u32(value, 0),
        id: value[4..].to_vec(),
    })
}

pub(crate) fn decode_subscriber_id(
    value: &[u8],
    _ctx: &mut DecodeCtx,
) -> Result<DhcpOption, CodecError> {
    if value.is_empty() {
        return Err(CodecError::BadLength {
            context: "subscriber id",
        });
    }
    Ok(DhcpOption::SubscriberId(value.to_vec()))
}

pub(crate) fn decode_client_linklayer(
    value: &[u8],
    _ctx: &mut DecodeCtx,
) -> Result<DhcpOption, CodecError> {
    need(value, 2)?;
    Ok(DhcpOption::ClientLinkLayer {
        hardware_type: read_u16(value, 0),
        address: value[2..].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ContainerKind, OptionRegistry};

    #[test]
    fn test_relay_agent_options_roundtrip() {
        let options = vec![
            DhcpOption::RemoteId {
                enterprise: 9,
                id: vec![0x01, 0x02, 0x03],
            },
            DhcpOption::SubscriberId(b"line-42".to_vec()),
            DhcpOption::ClientLinkLayer {
                hardware_type: 1,
                address: vec![0x00, 0x11, 0x22, 0x33, 0x44, 0x55],
            },
        ];
        let mut buf = Vec::new();
        crate::options::encode_options(&options, &mut buf).unwrap();

        let registry = OptionRegistry::with_defaults();
        let mut ctx = DecodeCtx::new(&registry);
        let decoded =
            crate::options::decode_options(&buf, &mut ctx, ContainerKind::Relay).unwrap();
        assert_eq!(decoded, options);
    }
}
