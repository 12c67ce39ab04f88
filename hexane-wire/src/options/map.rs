//! Softwire address and port mapping options (RFC 7598)
//!
//! MAP-E, MAP-T and Lightweight 4over6 containers with their S46 rule,
//! BR, DMR, binding and port-parameter suboptions. IPv6 prefixes inside
//! these options are written truncated to `ceil(prefix-len / 8)` octets.

use std::net::{Ipv4Addr, Ipv6Addr};

use hexane_core::error::CodecError;

use crate::registry::{ContainerKind, DecodeCtx};

use super::{decode_options, encode_options, need, read_u16, DhcpOption};

pub const OPTION_S46_RULE: u16 = 89;
pub const OPTION_S46_BR: u16 = 90;
pub const OPTION_S46_DMR: u16 = 91;
pub const OPTION_S46_V4V6BIND: u16 = 92;
pub const OPTION_S46_PORTPARAMS: u16 = 93;
pub const OPTION_S46_CONT_MAPE: u16 = 94;
pub const OPTION_S46_CONT_MAPT: u16 = 95;
pub const OPTION_S46_CONT_LW: u16 = 96;

/// The F-flag: the rule is usable for forwarding
pub const S46_RULE_FLAG_FMR: u8 = 0x01;

/// A basic mapping rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S46Rule {
    pub flags: u8,
    pub ea_len: u8,
    pub prefix4_len: u8,
    pub ipv4_prefix: Ipv4Addr,
    pub prefix6_len: u8,
    pub ipv6_prefix: Ipv6Addr,
    pub options: Vec<DhcpOption>,
}

/// An IPv4-in-IPv6 binding (Lightweight 4over6)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S46V4V6Binding {
    pub ipv4_address: Ipv4Addr,
    pub prefix6_len: u8,
    pub ipv6_prefix: Ipv6Addr,
    pub options: Vec<DhcpOption>,
}

/// PSID port parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct S46PortParams {
    pub offset: u8,
    pub psid_len: u8,
    pub psid: u16,
}

/// Octets needed to carry a prefix of `len` bits
fn prefix_octets(len: u8) -> usize {
    (len as usize + 7) / 8
}

/// Write a prefix truncated to its significant octets
pub(crate) fn encode_variable_prefix(len: u8, prefix: &Ipv6Addr, buf: &mut Vec<u8>) {
    buf.push(len);
    buf.extend_from_slice(&prefix.octets()[..prefix_octets(len)]);
}

/// Read a `len`-bit prefix, zero-extending to a full address
fn read_variable_prefix(value: &[u8], at: usize, len: u8) -> Result<Ipv6Addr, CodecError> {
    if len > 128 {
        return Err(CodecError::InvalidValue {
            context: "s46 prefix",
            reason: "prefix length exceeds 128",
        });
    }
    let octets_len = prefix_octets(len);
    need(value, at + octets_len)?;
    let mut octets = [0u8; 16];
    octets[..octets_len].copy_from_slice(&value[at..at + octets_len]);
    Ok(Ipv6Addr::from(octets))
}

pub(crate) fn encode_rule(rule: &S46Rule, buf: &mut Vec<u8>) -> Result<(), CodecError> {
    buf.push(rule.flags);
    buf.push(rule.ea_len);
    buf.push(rule.prefix4_len);
    buf.extend_from_slice(&rule.ipv4_prefix.octets());
    encode_variable_prefix(rule.prefix6_len, &rule.ipv6_prefix, buf);
    encode_options(&rule.options, buf)
}

pub(crate) fn encode_v4v6_binding(
    binding: &S46V4V6Binding,
    buf: &mut Vec<u8>,
) -> Result<(), CodecError> {
    buf.extend_from_slice(&binding.ipv4_address.octets());
    encode_variable_prefix(binding.prefix6_len, &binding.ipv6_prefix, buf);
    encode_options(&binding.options, buf)
}

pub(crate) fn decode_s46_rule(value: &[u8], ctx: &mut DecodeCtx) -> Result<DhcpOption, CodecError> {
    need(value, 8)?;
    let prefix6_len = value[7];
    let ipv6_prefix = read_variable_prefix(value, 8, prefix6_len)?;
    let rest = 8 + prefix_octets(prefix6_len);
    ctx.descend()?;
    let options = decode_options(&value[rest..], ctx, ContainerKind::S46);
    ctx.ascend();
    Ok(DhcpOption::S46Rule(S46Rule {
        flags: value[0],
        ea_len: value[1],
        prefix4_len: value[2],
        ipv4_prefix: Ipv4Addr::new(value[3], value[4], value[5], value[6]),
        prefix6_len,
        ipv6_prefix,
        options: options?,
    }))
}

pub(crate) fn decode_s46_br(value: &[u8], _ctx: &mut DecodeCtx) -> Result<DhcpOption, CodecError> {
    if value.len() != 16 {
        return Err(CodecError::BadLength { context: "s46 br" });
    }
    Ok(DhcpOption::S46Br(super::read_ipv6(value, 0)?))
}

pub(crate) fn decode_s46_dmr(value: &[u8], _ctx: &mut DecodeCtx) -> Result<DhcpOption, CodecError> {
    need(value, 1)?;
    let prefix_length = value[0];
    let prefix = read_variable_prefix(value, 1, prefix_length)?;
    if value.len() != 1 + prefix_octets(prefix_length) {
        return Err(CodecError::BadLength { context: "s46 dmr" });
    }
    Ok(DhcpOption::S46Dmr {
        prefix_length,
        prefix,
    })
}

pub(crate) fn decode_s46_v4v6_binding(
    value: &[u8],
    ctx: &mut DecodeCtx,
) -> Result<DhcpOption, CodecError> {
    need(value, 5)?;
    let prefix6_len = value[4];
    let ipv6_prefix = read_variable_prefix(value, 5, prefix6_len)?;
    let rest = 5 + prefix_octets(prefix6_len);
    ctx.descend()?;
    let options = decode_options(&value[rest..], ctx, ContainerKind::S46);
    ctx.ascend();
    Ok(DhcpOption::S46V4V6Binding(S46V4V6Binding {
        ipv4_address: Ipv4Addr::new(value[0], value[1], value[2], value[3]),
        prefix6_len,
        ipv6_prefix,
        options: options?,
    }))
}

pub(crate) fn decode_s46_portparams(
    value: &[u8],
    _ctx: &mut DecodeCtx,
) -> Result<DhcpOption, CodecError> {
    if value.len() != 4 {
        return Err(CodecError::BadLength {
            context: "s46 port parameters",
        });
    }
    Ok(DhcpOption::S46PortParams(S46PortParams {
        offset: value[0],
        psid_len: value[1],
        psid: read_u16(value, 2),
    }))
}

pub(crate) fn decode_s46_mape(value: &[u8], ctx: &mut DecodeCtx) -> Result<DhcpOption, CodecError> {
    ctx.descend()?;
    let options = decode_options(value, ctx, ContainerKind::S46);
    ctx.ascend();
    Ok(DhcpOption::S46MapE(options?))
}

pub(crate) fn decode_s46_mapt(value: &[u8], ctx: &mut DecodeCtx) -> Result<DhcpOption, CodecError> {
    ctx.descend()?;
    let options = decode_options(value, ctx, ContainerKind::S46);
    ctx.ascend();
    Ok(DhcpOption::S46MapT(options?))
}

pub(crate) fn decode_s46_lw(value: &[u8], ctx: &mut DecodeCtx) -> Result<DhcpOption, CodecError> {
    ctx.descend()?;
    let options = decode_options(value, ctx, ContainerKind::S46);
    ctx.ascend();
    Ok(DhcpOption::S46Lw(options?))
}
