//! NTP server option (RFC 5908)
//!
//! One option carrying a list of suboptions, each naming a server by
//! unicast address, multicast address or FQDN.

use std::net::Ipv6Addr;

use hexane_core::error::CodecError;

use crate::dns_name;
use crate::registry::DecodeCtx;

use super::{need, read_ipv6, read_u16, write_option, DhcpOption};

pub const OPTION_NTP_SERVER: u16 = 56;

pub const NTP_SUBOPTION_SRV_ADDR: u16 = 1;
pub const NTP_SUBOPTION_MC_ADDR: u16 = 2;
pub const NTP_SUBOPTION_SRV_FQDN: u16 = 3;

/// One NTP server designation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NtpSubOption {
    ServerAddress(Ipv6Addr),
    MulticastAddress(Ipv6Addr),
    ServerFqdn(String),
    /// Unknown suboption, preserved verbatim
    Unknown { code: u16, data: Vec<u8> },
}

pub(crate) fn encode_suboptions(
    subs: &[NtpSubOption],
    buf: &mut Vec<u8>,
) -> Result<(), CodecError> {
    for sub in subs {
        match sub {
            NtpSubOption::ServerAddress(addr) => write_option(buf, NTP_SUBOPTION_SRV_ADDR, |b| {
                b.extend_from_slice(&addr.octets());
                Ok(())
            })?,
            NtpSubOption::MulticastAddress(addr) => write_option(buf, NTP_SUBOPTION_MC_ADDR, |b| {
                b.extend_from_slice(&addr.octets());
                Ok(())
            })?,
            NtpSubOption::ServerFqdn(name) => write_option(buf, NTP_SUBOPTION_SRV_FQDN, |b| {
                dns_name::encode_name(name, b)
            })?,
            NtpSubOption::Unknown { code, data } => write_option(buf, *code, |b| {
                b.extend_from_slice(data);
                Ok(())
            })?,
        }
    }
    Ok(())
}

pub(crate) fn decode_ntp_servers(
    value: &[u8],
    _ctx: &mut DecodeCtx,
) -> Result<DhcpOption, CodecError> {
    let mut subs = Vec::new();
    let mut at = 0;
    while at < value.len() {
        need(value, at + 4)?;
        let code = read_u16(value, at);
        let len = read_u16(value, at + 2) as usize;
        at += 4;
        need(value, at + len)?;
        let body = &value[at..at + len];
        at += len;

        let sub = match code {
            NTP_SUBOPTION_SRV_ADDR if len == 16 => NtpSubOption::ServerAddress(read_ipv6(body, 0)?),
            NTP_SUBOPTION_MC_ADDR if len == 16 => NtpSubOption::MulticastAddress(read_ipv6(body, 0)?),
            NTP_SUBOPTION_SRV_FQDN => {
                let (name, consumed) = dns_name::parse_name(body)?;
                if consumed != body.len() {
                    return Err(CodecError::BadLength {
                        context: "ntp server fqdn",
                    });
                }
                NtpSubOption::ServerFqdn(name)
            }
            NTP_SUBOPTION_SRV_ADDR | NTP_SUBOPTION_MC_ADDR => {
                return Err(CodecError::BadLength {
                    context: "ntp server address",
                })
            }
            _ => NtpSubOption::Unknown {
                code,
                data: body.to_vec(),
            },
        };
        subs.push(sub);
    }
    if subs.is_empty() {
        return Err(CodecError::BadLength {
            context: "ntp server option",
        });
    }
    Ok(DhcpOption::NtpServers(subs))
}
