//! Leasequery options (RFC 5007) and bulk leasequery additions (RFC 5460)

use hexane_core::error::CodecError;

use crate::duid::Duid;
use crate::message::Message;
use crate::registry::{ContainerKind, DecodeCtx};

use super::{decode_options, need, read_ipv6, read_ipv6_list, read_u32, DhcpOption};

pub const OPTION_LQ_QUERY: u16 = 44;
pub const OPTION_CLIENT_DATA: u16 = 45;
pub const OPTION_CLT_TIME: u16 = 46;
pub const OPTION_LQ_RELAY_DATA: u16 = 47;
pub const OPTION_LQ_CLIENT_LINK: u16 = 48;
pub const OPTION_RELAY_ID: u16 = 53;

// Query types (RFC 5007 section 4.1.2.5, RFC 5460 section 5.4)
pub const QUERY_BY_ADDRESS: u8 = 1;
pub const QUERY_BY_CLIENT_ID: u8 = 2;
pub const QUERY_BY_RELAY_ID: u8 = 3;
pub const QUERY_BY_LINK_ADDRESS: u8 = 4;
pub const QUERY_BY_REMOTE_ID: u8 = 5;

/// The query carried by a Leasequery message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LqQuery {
    pub query_type: u8,
    pub link_address: std::net::Ipv6Addr,
    pub options: Vec<DhcpOption>,
}

impl LqQuery {
    /// Address the query asks about, when it is a by-address query
    pub fn queried_address(&self) -> Option<std::net::Ipv6Addr> {
        self.options.iter().find_map(|option| match option {
            DhcpOption::IaAddress(addr) => Some(addr.address),
            _ => None,
        })
    }

    /// Client the query asks about, when it is a by-client-id query
    pub fn queried_client(&self) -> Option<&Duid> {
        self.options.iter().find_map(|option| match option {
            DhcpOption::ClientId(duid) => Some(duid),
            _ => None,
        })
    }
}

pub(crate) fn decode_lq_query(value: &[u8], ctx: &mut DecodeCtx) -> Result<DhcpOption, CodecError> {
    need(value, 17)?;
    ctx.descend()?;
    let options = decode_options(&value[17..], ctx, ContainerKind::LqQuery);
    ctx.ascend();
    Ok(DhcpOption::LqQuery(LqQuery {
        query_type: value[0],
        link_address: read_ipv6(value, 1)?,
        options: options?,
    }))
}

pub(crate) fn decode_client_data(value: &[u8], ctx: &mut DecodeCtx) -> Result<DhcpOption, CodecError> {
    ctx.descend()?;
    let options = decode_options(value, ctx, ContainerKind::ClientData);
    ctx.ascend();
    Ok(DhcpOption::ClientData(options?))
}

pub(crate) fn decode_clt_time(value: &[u8], _ctx: &mut DecodeCtx) -> Result<DhcpOption, CodecError> {
    if value.len() != 4 {
        return Err(CodecError::BadLength {
            context: "client last transaction time",
        });
    }
    Ok(DhcpOption::CltTime(read_u32(value, 0)))
}

pub(crate) fn decode_lq_relay_data(
    value: &[u8],
    ctx: &mut DecodeCtx,
) -> Result<DhcpOption, CodecError> {
    need(value, 16)?;
    ctx.descend()?;
    let message = Message::decode_at(&value[16..], ctx);
    ctx.ascend();
    Ok(DhcpOption::LqRelayData {
        peer_address: read_ipv6(value, 0)?,
        message: Box::new(message?),
    })
}

pub(crate) fn decode_lq_client_link(
    value: &[u8],
    _ctx: &mut DecodeCtx,
) -> Result<DhcpOption, CodecError> {
    Ok(DhcpOption::LqClientLink(read_ipv6_list(value)?))
}

pub(crate) fn decode_relay_id(value: &[u8], _ctx: &mut DecodeCtx) -> Result<DhcpOption, CodecError> {
    Ok(DhcpOption::RelayId(Duid::decode(value)?))
}
