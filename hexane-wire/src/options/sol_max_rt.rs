//! SOL_MAX_RT and INF_MAX_RT options (RFC 7083)

use hexane_core::error::CodecError;

use crate::registry::DecodeCtx;

use super::{read_u32, DhcpOption};

pub const OPTION_SOL_MAX_RT: u16 = 82;
pub const OPTION_INF_MAX_RT: u16 = 83;

/// Allowed range for both options, in seconds
pub const MIN_MAX_RT: u32 = 60;
pub const MAX_MAX_RT: u32 = 86400;

/// Reject values outside the range RFC 7083 allows
pub fn check_range(value: u32) -> Result<(), CodecError> {
    if !(MIN_MAX_RT..=MAX_MAX_RT).contains(&value) {
        return Err(CodecError::InvalidValue {
            context: "max-rt",
            reason: "value outside 60..=86400",
        });
    }
    Ok(())
}

pub(crate) fn decode_sol_max_rt(
    value: &[u8],
    _ctx: &mut DecodeCtx,
) -> Result<DhcpOption, CodecError> {
    if value.len() != 4 {
        return Err(CodecError::BadLength {
            context: "sol-max-rt",
        });
    }
    let seconds = read_u32(value, 0);
    check_range(seconds)?;
    Ok(DhcpOption::SolMaxRt(seconds))
}

pub(crate) fn decode_inf_max_rt(
    value: &[u8],
    _ctx: &mut DecodeCtx,
) -> Result<DhcpOption, CodecError> {
    if value.len() != 4 {
        return Err(CodecError::BadLength {
            context: "inf-max-rt",
        });
    }
    let seconds = read_u32(value, 0);
    check_range(seconds)?;
    Ok(DhcpOption::InfMaxRt(seconds))
}
