//! SNTP server option (RFC 4075)

use hexane_core::error::CodecError;

use crate::registry::DecodeCtx;

use super::{read_ipv6_list, DhcpOption};

pub const OPTION_SNTP_SERVERS: u16 = 31;

pub(crate) fn decode_sntp_servers(
    value: &[u8],
    _ctx: &mut DecodeCtx,
) -> Result<DhcpOption, CodecError> {
    Ok(DhcpOption::SntpServers(read_ipv6_list(value)?))
}
