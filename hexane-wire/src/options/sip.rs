//! SIP server options (RFC 3319)

use hexane_core::error::CodecError;

use crate::dns_name;
use crate::registry::DecodeCtx;

use super::{read_ipv6_list, DhcpOption};

pub const OPTION_SIP_SERVER_D: u16 = 21;
pub const OPTION_SIP_SERVER_A: u16 = 22;

pub(crate) fn decode_sip_domains(
    value: &[u8],
    _ctx: &mut DecodeCtx,
) -> Result<DhcpOption, CodecError> {
    Ok(DhcpOption::SipServerDomains(dns_name::parse_name_list(
        value,
    )?))
}

pub(crate) fn decode_sip_addresses(
    value: &[u8],
    _ctx: &mut DecodeCtx,
) -> Result<DhcpOption, CodecError> {
    Ok(DhcpOption::SipServerAddresses(read_ipv6_list(value)?))
}
