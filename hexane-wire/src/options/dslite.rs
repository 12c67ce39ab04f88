//! DS-Lite AFTR name option (RFC 6334)

use hexane_core::error::CodecError;

use crate::dns_name;
use crate::registry::DecodeCtx;

use super::DhcpOption;

pub const OPTION_AFTR_NAME: u16 = 64;

pub(crate) fn decode_aftr_name(value: &[u8], _ctx: &mut DecodeCtx) -> Result<DhcpOption, CodecError> {
    let (name, consumed) = dns_name::parse_name(value)?;
    if consumed != value.len() {
        return Err(CodecError::BadLength {
            context: "aftr name",
        });
    }
    Ok(DhcpOption::AftrName(name))
}
