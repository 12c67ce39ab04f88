//! DHCPv6 options
//!
//! Every option is a `(code, length, value)` TLV; semantically it is a
//! variant of [`DhcpOption`], with [`DhcpOption::Opaque`] preserving
//! anything the registry does not know. Containers (IA options, the
//! relay-message option, vendor options, leasequery client-data, softwire
//! containers) nest recursively; the decode context bounds the depth.

pub mod dns;
pub mod dslite;
pub mod leasequery;
pub mod map;
pub mod ntp;
pub mod prefix_delegation;
pub mod relay_agent;
pub mod sip;
pub mod sntp;
pub mod sol_max_rt;

use std::net::Ipv6Addr;

use hexane_core::error::CodecError;

use crate::duid::Duid;
use crate::message::Message;
use crate::registry::{ContainerKind, DecodeCtx};

pub use leasequery::LqQuery;
pub use map::{S46PortParams, S46Rule, S46V4V6Binding};
pub use ntp::NtpSubOption;
pub use prefix_delegation::{IaPd, IaPrefix};

// Base option codes (RFC 3315)
pub const OPTION_CLIENTID: u16 = 1;
pub const OPTION_SERVERID: u16 = 2;
pub const OPTION_IA_NA: u16 = 3;
pub const OPTION_IA_TA: u16 = 4;
pub const OPTION_IAADDR: u16 = 5;
pub const OPTION_ORO: u16 = 6;
pub const OPTION_PREFERENCE: u16 = 7;
pub const OPTION_ELAPSED_TIME: u16 = 8;
pub const OPTION_RELAY_MSG: u16 = 9;
pub const OPTION_AUTH: u16 = 11;
pub const OPTION_UNICAST: u16 = 12;
pub const OPTION_STATUS_CODE: u16 = 13;
pub const OPTION_RAPID_COMMIT: u16 = 14;
pub const OPTION_USER_CLASS: u16 = 15;
pub const OPTION_VENDOR_CLASS: u16 = 16;
pub const OPTION_VENDOR_OPTS: u16 = 17;
pub const OPTION_INTERFACE_ID: u16 = 18;
pub const OPTION_RECONF_MSG: u16 = 19;
pub const OPTION_RECONF_ACCEPT: u16 = 20;

/// Status codes carried by the status-code option
pub mod status {
    pub const SUCCESS: u16 = 0;
    pub const UNSPEC_FAIL: u16 = 1;
    pub const NO_ADDRS_AVAIL: u16 = 2;
    pub const NO_BINDING: u16 = 3;
    pub const NOT_ON_LINK: u16 = 4;
    pub const USE_MULTICAST: u16 = 5;
    pub const NO_PREFIX_AVAIL: u16 = 6;
    pub const UNKNOWN_QUERY_TYPE: u16 = 7;
    pub const MALFORMED_QUERY: u16 = 8;
    pub const NOT_CONFIGURED: u16 = 9;
    pub const NOT_ALLOWED: u16 = 10;
    pub const QUERY_TERMINATED: u16 = 11;
}

/// Identity Association for Non-temporary Addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IaNa {
    pub iaid: u32,
    pub t1: u32,
    pub t2: u32,
    pub options: Vec<DhcpOption>,
}

/// Identity Association for Temporary Addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IaTa {
    pub iaid: u32,
    pub options: Vec<DhcpOption>,
}

/// An address inside an IA_NA or IA_TA
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IaAddress {
    pub address: Ipv6Addr,
    pub preferred_lifetime: u32,
    pub valid_lifetime: u32,
    pub options: Vec<DhcpOption>,
}

/// The status-code option
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCodeOption {
    pub code: u16,
    pub message: String,
}

impl StatusCodeOption {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn success() -> Self {
        Self::new(status::SUCCESS, "ok")
    }
}

/// A decoded DHCPv6 option
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhcpOption {
    ClientId(Duid),
    ServerId(Duid),
    IaNa(IaNa),
    IaTa(IaTa),
    IaAddress(IaAddress),
    /// Option request option: codes the client wants
    Oro(Vec<u16>),
    Preference(u8),
    /// Hundredths of a second since the client began the exchange
    ElapsedTime(u16),
    RelayMessage(Box<Message>),
    /// Authentication option, body kept verbatim
    Authentication(Vec<u8>),
    ServerUnicast(Ipv6Addr),
    StatusCode(StatusCodeOption),
    RapidCommit,
    UserClass(Vec<Vec<u8>>),
    VendorClass {
        enterprise: u32,
        classes: Vec<Vec<u8>>,
    },
    VendorSpecific {
        enterprise: u32,
        options: Vec<(u16, Vec<u8>)>,
    },
    InterfaceId(Vec<u8>),
    ReconfigureMessage(u8),
    ReconfigureAccept,

    // RFC 3319 (SIP)
    SipServerDomains(Vec<String>),
    SipServerAddresses(Vec<Ipv6Addr>),

    // RFC 3646 (DNS)
    DnsServers(Vec<Ipv6Addr>),
    DomainSearchList(Vec<String>),

    // RFC 3633 (prefix delegation)
    IaPd(IaPd),
    IaPrefix(IaPrefix),

    // RFC 4075 (SNTP)
    SntpServers(Vec<Ipv6Addr>),

    // RFC 4649 / RFC 4580 / RFC 6939 (relay agent information)
    RemoteId {
        enterprise: u32,
        id: Vec<u8>,
    },
    SubscriberId(Vec<u8>),
    ClientLinkLayer {
        hardware_type: u16,
        address: Vec<u8>,
    },

    // RFC 5007 / RFC 5460 (leasequery)
    LqQuery(LqQuery),
    ClientData(Vec<DhcpOption>),
    CltTime(u32),
    LqRelayData {
        peer_address: Ipv6Addr,
        message: Box<Message>,
    },
    LqClientLink(Vec<Ipv6Addr>),
    RelayId(Duid),

    // RFC 5908 (NTP)
    NtpServers(Vec<NtpSubOption>),

    // RFC 6334 (DS-Lite)
    AftrName(String),

    // RFC 7083
    SolMaxRt(u32),
    InfMaxRt(u32),

    // RFC 7598 (softwire / MAP)
    S46Rule(S46Rule),
    S46Br(Ipv6Addr),
    S46Dmr {
        prefix_length: u8,
        prefix: Ipv6Addr,
    },
    S46V4V6Binding(S46V4V6Binding),
    S46PortParams(S46PortParams),
    S46MapE(Vec<DhcpOption>),
    S46MapT(Vec<DhcpOption>),
    S46Lw(Vec<DhcpOption>),

    /// Any option code the registry does not know, preserved verbatim
    Opaque {
        code: u16,
        data: Vec<u8>,
    },
}

impl DhcpOption {
    /// The wire code of this option
    pub fn code(&self) -> u16 {
        match self {
            DhcpOption::ClientId(_) => OPTION_CLIENTID,
            DhcpOption::ServerId(_) => OPTION_SERVERID,
            DhcpOption::IaNa(_) => OPTION_IA_NA,
            DhcpOption::IaTa(_) => OPTION_IA_TA,
            DhcpOption::IaAddress(_) => OPTION_IAADDR,
            DhcpOption::Oro(_) => OPTION_ORO,
            DhcpOption::Preference(_) => OPTION_PREFERENCE,
            DhcpOption::ElapsedTime(_) => OPTION_ELAPSED_TIME,
            DhcpOption::RelayMessage(_) => OPTION_RELAY_MSG,
            DhcpOption::Authentication(_) => OPTION_AUTH,
            DhcpOption::ServerUnicast(_) => OPTION_UNICAST,
            DhcpOption::StatusCode(_) => OPTION_STATUS_CODE,
            DhcpOption::RapidCommit => OPTION_RAPID_COMMIT,
            DhcpOption::UserClass(_) => OPTION_USER_CLASS,
            DhcpOption::VendorClass { .. } => OPTION_VENDOR_CLASS,
            DhcpOption::VendorSpecific { .. } => OPTION_VENDOR_OPTS,
            DhcpOption::InterfaceId(_) => OPTION_INTERFACE_ID,
            DhcpOption::ReconfigureMessage(_) => OPTION_RECONF_MSG,
            DhcpOption::ReconfigureAccept => OPTION_RECONF_ACCEPT,
            DhcpOption::SipServerDomains(_) => sip::OPTION_SIP_SERVER_D,
            DhcpOption::SipServerAddresses(_) => sip::OPTION_SIP_SERVER_A,
            DhcpOption::DnsServers(_) => dns::OPTION_DNS_SERVERS,
            DhcpOption::DomainSearchList(_) => dns::OPTION_DOMAIN_LIST,
            DhcpOption::IaPd(_) => prefix_delegation::OPTION_IA_PD,
            DhcpOption::IaPrefix(_) => prefix_delegation::OPTION_IAPREFIX,
            DhcpOption::SntpServers(_) => sntp::OPTION_SNTP_SERVERS,
            DhcpOption::RemoteId { .. } => relay_agent::OPTION_REMOTE_ID,
            DhcpOption::SubscriberId(_) => relay_agent::OPTION_SUBSCRIBER_ID,
            DhcpOption::ClientLinkLayer { .. } => relay_agent::OPTION_CLIENT_LINKLAYER_ADDR,
            DhcpOption::LqQuery(_) => leasequery::OPTION_LQ_QUERY,
            DhcpOption::ClientData(_) => leasequery::OPTION_CLIENT_DATA,
            DhcpOption::CltTime(_) => leasequery::OPTION_CLT_TIME,
            DhcpOption::LqRelayData { .. } => leasequery::OPTION_LQ_RELAY_DATA,
            DhcpOption::LqClientLink(_) => leasequery::OPTION_LQ_CLIENT_LINK,
            DhcpOption::RelayId(_) => leasequery::OPTION_RELAY_ID,
            DhcpOption::NtpServers(_) => ntp::OPTION_NTP_SERVER,
            DhcpOption::AftrName(_) => dslite::OPTION_AFTR_NAME,
            DhcpOption::SolMaxRt(_) => sol_max_rt::OPTION_SOL_MAX_RT,
            DhcpOption::InfMaxRt(_) => sol_max_rt::OPTION_INF_MAX_RT,
            DhcpOption::S46Rule(_) => map::OPTION_S46_RULE,
            DhcpOption::S46Br(_) => map::OPTION_S46_BR,
            DhcpOption::S46Dmr { .. } => map::OPTION_S46_DMR,
            DhcpOption::S46V4V6Binding(_) => map::OPTION_S46_V4V6BIND,
            DhcpOption::S46PortParams(_) => map::OPTION_S46_PORTPARAMS,
            DhcpOption::S46MapE(_) => map::OPTION_S46_CONT_MAPE,
            DhcpOption::S46MapT(_) => map::OPTION_S46_CONT_MAPT,
            DhcpOption::S46Lw(_) => map::OPTION_S46_CONT_LW,
            DhcpOption::Opaque { code, .. } => *code,
        }
    }

    /// Encode this option, header included, appending to `buf`
    pub fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        let code = self.code();
        match self {
            DhcpOption::ClientId(duid) | DhcpOption::ServerId(duid) | DhcpOption::RelayId(duid) => {
                write_option(buf, code, |b| {
                    b.extend_from_slice(&duid.encode());
                    Ok(())
                })
            }
            DhcpOption::IaNa(ia) => {
                check_timers(ia.t1, ia.t2)?;
                write_option(buf, code, |b| {
                    b.extend_from_slice(&ia.iaid.to_be_bytes());
                    b.extend_from_slice(&ia.t1.to_be_bytes());
                    b.extend_from_slice(&ia.t2.to_be_bytes());
                    encode_options(&ia.options, b)
                })
            }
            DhcpOption::IaTa(ia) => write_option(buf, code, |b| {
                b.extend_from_slice(&ia.iaid.to_be_bytes());
                encode_options(&ia.options, b)
            }),
            DhcpOption::IaAddress(addr) => {
                check_lifetimes(addr.preferred_lifetime, addr.valid_lifetime)?;
                write_option(buf, code, |b| {
                    b.extend_from_slice(&addr.address.octets());
                    b.extend_from_slice(&addr.preferred_lifetime.to_be_bytes());
                    b.extend_from_slice(&addr.valid_lifetime.to_be_bytes());
                    encode_options(&addr.options, b)
                })
            }
            DhcpOption::Oro(codes) => write_option(buf, code, |b| {
                for requested in codes {
                    b.extend_from_slice(&requested.to_be_bytes());
                }
                Ok(())
            }),
            DhcpOption::Preference(value) => write_option(buf, code, |b| {
                b.push(*value);
                Ok(())
            }),
            DhcpOption::ElapsedTime(value) => write_option(buf, code, |b| {
                b.extend_from_slice(&value.to_be_bytes());
                Ok(())
            }),
            DhcpOption::RelayMessage(message) => {
                write_option(buf, code, |b| message.encode_into(b))
            }
            DhcpOption::Authentication(data)
            | DhcpOption::InterfaceId(data)
            | DhcpOption::SubscriberId(data) => write_option(buf, code, |b| {
                b.extend_from_slice(data);
                Ok(())
            }),
            DhcpOption::ServerUnicast(address) | DhcpOption::S46Br(address) => {
                write_option(buf, code, |b| {
                    b.extend_from_slice(&address.octets());
                    Ok(())
                })
            }
            DhcpOption::StatusCode(sc) => write_option(buf, code, |b| {
                b.extend_from_slice(&sc.code.to_be_bytes());
                b.extend_from_slice(sc.message.as_bytes());
                Ok(())
            }),
            DhcpOption::RapidCommit | DhcpOption::ReconfigureAccept => {
                write_option(buf, code, |_| Ok(()))
            }
            DhcpOption::UserClass(classes) => {
                write_option(buf, code, |b| encode_class_data(classes, b))
            }
            DhcpOption::VendorClass {
                enterprise,
                classes,
            } => write_option(buf, code, |b| {
                b.extend_from_slice(&enterprise.to_be_bytes());
                encode_class_data(classes, b)
            }),
            DhcpOption::VendorSpecific {
                enterprise,
                options,
            } => write_option(buf, code, |b| {
                b.extend_from_slice(&enterprise.to_be_bytes());
                for (sub_code, sub_data) in options {
                    write_option(b, *sub_code, |inner| {
                        inner.extend_from_slice(sub_data);
                        Ok(())
                    })?;
                }
                Ok(())
            }),
            DhcpOption::ReconfigureMessage(msg_type) => write_option(buf, code, |b| {
                b.push(*msg_type);
                Ok(())
            }),
            DhcpOption::SipServerDomains(names) | DhcpOption::DomainSearchList(names) => {
                write_option(buf, code, |b| crate::dns_name::encode_name_list(names, b))
            }
            DhcpOption::SipServerAddresses(addrs)
            | DhcpOption::DnsServers(addrs)
            | DhcpOption::SntpServers(addrs)
            | DhcpOption::LqClientLink(addrs) => write_option(buf, code, |b| {
                for addr in addrs {
                    b.extend_from_slice(&addr.octets());
                }
                Ok(())
            }),
            DhcpOption::IaPd(ia) => {
                check_timers(ia.t1, ia.t2)?;
                write_option(buf, code, |b| {
                    b.extend_from_slice(&ia.iaid.to_be_bytes());
                    b.extend_from_slice(&ia.t1.to_be_bytes());
                    b.extend_from_slice(&ia.t2.to_be_bytes());
                    encode_options(&ia.options, b)
                })
            }
            DhcpOption::IaPrefix(prefix) => {
                check_lifetimes(prefix.preferred_lifetime, prefix.valid_lifetime)?;
                write_option(buf, code, |b| {
                    b.extend_from_slice(&prefix.preferred_lifetime.to_be_bytes());
                    b.extend_from_slice(&prefix.valid_lifetime.to_be_bytes());
                    b.push(prefix.prefix_length);
                    b.extend_from_slice(&prefix.prefix.octets());
                    encode_options(&prefix.options, b)
                })
            }
            DhcpOption::RemoteId { enterprise, id } => write_option(buf, code, |b| {
                b.extend_from_slice(&enterprise.to_be_bytes());
                b.extend_from_slice(id);
                Ok(())
            }),
            DhcpOption::ClientLinkLayer {
                hardware_type,
                address,
            } => write_option(buf, code, |b| {
                b.extend_from_slice(&hardware_type.to_be_bytes());
                b.extend_from_slice(address);
                Ok(())
            }),
            DhcpOption::LqQuery(query) => write_option(buf, code, |b| {
                b.push(query.query_type);
                b.extend_from_slice(&query.link_address.octets());
                encode_options(&query.options, b)
            }),
            DhcpOption::ClientData(options) => {
                write_option(buf, code, |b| encode_options(options, b))
            }
            DhcpOption::CltTime(seconds) => write_option(buf, code, |b| {
                b.extend_from_slice(&seconds.to_be_bytes());
                Ok(())
            }),
            DhcpOption::LqRelayData {
                peer_address,
                message,
            } => write_option(buf, code, |b| {
                b.extend_from_slice(&peer_address.octets());
                message.encode_into(b)
            }),
            DhcpOption::NtpServers(subs) => {
                write_option(buf, code, |b| ntp::encode_suboptions(subs, b))
            }
            DhcpOption::AftrName(name) => {
                write_option(buf, code, |b| crate::dns_name::encode_name(name, b))
            }
            DhcpOption::SolMaxRt(value) | DhcpOption::InfMaxRt(value) => {
                sol_max_rt::check_range(*value)?;
                write_option(buf, code, |b| {
                    b.extend_from_slice(&value.to_be_bytes());
                    Ok(())
                })
            }
            DhcpOption::S46Rule(rule) => write_option(buf, code, |b| map::encode_rule(rule, b)),
            DhcpOption::S46Dmr {
                prefix_length,
                prefix,
            } => write_option(buf, code, |b| {
                map::encode_variable_prefix(*prefix_length, prefix, b);
                Ok(())
            }),
            DhcpOption::S46V4V6Binding(binding) => {
                write_option(buf, code, |b| map::encode_v4v6_binding(binding, b))
            }
            DhcpOption::S46PortParams(params) => write_option(buf, code, |b| {
                b.push(params.offset);
                b.push(params.psid_len);
                b.extend_from_slice(&params.psid.to_be_bytes());
                Ok(())
            }),
            DhcpOption::S46MapE(options)
            | DhcpOption::S46MapT(options)
            | DhcpOption::S46Lw(options) => {
                write_option(buf, code, |b| encode_options(options, b))
            }
            DhcpOption::Opaque { data, .. } => write_option(buf, code, |b| {
                b.extend_from_slice(data);
                Ok(())
            }),
        }
    }
}

/// Preferred lifetime must not exceed valid lifetime
fn check_lifetimes(preferred: u32, valid: u32) -> Result<(), CodecError> {
    if preferred > valid {
        return Err(CodecError::InvalidValue {
            context: "ia lifetimes",
            reason: "preferred-lifetime exceeds valid-lifetime",
        });
    }
    Ok(())
}

/// T1 must not exceed T2 when both are nonzero
fn check_timers(t1: u32, t2: u32) -> Result<(), CodecError> {
    if t1 != 0 && t2 != 0 && t1 > t2 {
        return Err(CodecError::InvalidValue {
            context: "ia timers",
            reason: "T1 exceeds T2",
        });
    }
    Ok(())
}

/// Write one option TLV, backpatching the length field
pub(crate) fn write_option<F>(buf: &mut Vec<u8>, code: u16, body: F) -> Result<(), CodecError>
where
    F: FnOnce(&mut Vec<u8>) -> Result<(), CodecError>,
{
    buf.extend_from_slice(&code.to_be_bytes());
    let len_at = buf.len();
    buf.extend_from_slice(&[0, 0]);
    body(buf)?;
    let body_len = buf.len() - len_at - 2;
    if body_len > u16::MAX as usize {
        return Err(CodecError::Oversize { context: "option" });
    }
    buf[len_at..len_at + 2].copy_from_slice(&(body_len as u16).to_be_bytes());
    Ok(())
}

/// Encode an option list in order
pub fn encode_options(options: &[DhcpOption], buf: &mut Vec<u8>) -> Result<(), CodecError> {
    for option in options {
        option.encode_into(buf)?;
    }
    Ok(())
}

/// Decode a sequence of options filling `container`.
///
/// Unknown codes become opaque options. A known decoder that fails
/// structurally demotes its option to opaque and marks the context
/// partially decoded, except for the recursion limit (always fatal) and
/// options whose registry entry is structural (relay-message). A singleton
/// appearing twice in the same container is an error.
pub fn decode_options(
    buf: &[u8],
    ctx: &mut DecodeCtx,
    container: ContainerKind,
) -> Result<Vec<DhcpOption>, CodecError> {
    let mut options = Vec::new();
    let mut seen_singletons = Vec::new();
    let mut offset = 0;

    while offset < buf.len() {
        if buf.len() - offset < 4 {
            return Err(CodecError::Truncated {
                needed: 4 - (buf.len() - offset),
            });
        }
        let code = u16::from_be_bytes([buf[offset], buf[offset + 1]]);
        let length = u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]) as usize;
        offset += 4;

        if buf.len() - offset < length {
            return Err(CodecError::Truncated {
                needed: length - (buf.len() - offset),
            });
        }
        let value = &buf[offset..offset + length];
        offset += length;

        let entry = ctx.registry().get(code);
        let option = match entry {
            Some(entry) if entry.containers.contains(&container) => {
                if entry.singleton {
                    if seen_singletons.contains(&code) {
                        return Err(CodecError::DuplicateOption { code });
                    }
                    seen_singletons.push(code);
                }
                match (entry.decoder)(value, ctx) {
                    Ok(option) => option,
                    Err(CodecError::RecursionLimit) => return Err(CodecError::RecursionLimit),
                    Err(err) if entry.structural => return Err(err),
                    Err(_) => {
                        ctx.mark_partial();
                        DhcpOption::Opaque {
                            code,
                            data: value.to_vec(),
                        }
                    }
                }
            }
            Some(_) => {
                // Known option in a container it does not belong to
                ctx.mark_partial();
                DhcpOption::Opaque {
                    code,
                    data: value.to_vec(),
                }
            }
            None => DhcpOption::Opaque {
                code,
                data: value.to_vec(),
            },
        };
        options.push(option);
    }

    Ok(options)
}

// Shared slice helpers for option decoders

pub(crate) fn need(value: &[u8], n: usize) -> Result<(), CodecError> {
    if value.len() < n {
        return Err(CodecError::Truncated {
            needed: n - value.len(),
        });
    }
    Ok(())
}

pub(crate) fn read_u16(value: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([value[at], value[at + 1]])
}

pub(crate) fn read_u32(value: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([value[at], value[at + 1], value[at + 2], value[at + 3]])
}

pub(crate) fn read_ipv6(value: &[u8], at: usize) -> Result<Ipv6Addr, CodecError> {
    need(value, at + 16)?;
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&value[at..at + 16]);
    Ok(Ipv6Addr::from(octets))
}

/// A list of 16-octet addresses filling the whole value
pub(crate) fn read_ipv6_list(value: &[u8]) -> Result<Vec<Ipv6Addr>, CodecError> {
    if value.len() % 16 != 0 {
        return Err(CodecError::BadLength {
            context: "address list",
        });
    }
    let mut addrs = Vec::with_capacity(value.len() / 16);
    let mut at = 0;
    while at < value.len() {
        addrs.push(read_ipv6(value, at)?);
        at += 16;
    }
    Ok(addrs)
}

fn encode_class_data(classes: &[Vec<u8>], buf: &mut Vec<u8>) -> Result<(), CodecError> {
    for class in classes {
        if class.len() > u16::MAX as usize {
            return Err(CodecError::Oversize {
                context: "class data",
            });
        }
        buf.extend_from_slice(&(class.len() as u16).to_be_bytes());
        buf.extend_from_slice(class);
    }
    Ok(())
}

fn decode_class_data(value: &[u8]) -> Result<Vec<Vec<u8>>, CodecError> {
    let mut classes = Vec::new();
    let mut at = 0;
    while at < value.len() {
        need(value, at + 2)?;
        let len = read_u16(value, at) as usize;
        at += 2;
        need(value, at + len)?;
        classes.push(value[at..at + len].to_vec());
        at += len;
    }
    Ok(classes)
}

// Base option decoders, dispatched through the registry

pub(crate) fn decode_client_id(value: &[u8], _ctx: &mut DecodeCtx) -> Result<DhcpOption, CodecError> {
    Ok(DhcpOption::ClientId(Duid::decode(value)?))
}

pub(crate) fn decode_server_id(value: &[u8], _ctx: &mut DecodeCtx) -> Result<DhcpOption, CodecError> {
    Ok(DhcpOption::ServerId(Duid::decode(value)?))
}

pub(crate) fn decode_ia_na(value: &[u8], ctx: &mut DecodeCtx) -> Result<DhcpOption, CodecError> {
    need(value, 12)?;
    ctx.descend()?;
    let options = decode_options(&value[12..], ctx, ContainerKind::IaNa);
    ctx.ascend();
    Ok(DhcpOption::IaNa(IaNa {
        iaid: read_u32(value, 0),
        t1: read_u32(value, 4),
        t2: read_u32(value, 8),
        options: options?,
    }))
}

pub(crate) fn decode_ia_ta(value: &[u8], ctx: &mut DecodeCtx) -> Result<DhcpOption, CodecError> {
    need(value, 4)?;
    ctx.descend()?;
    let options = decode_options(&value[4..], ctx, ContainerKind::IaTa);
    ctx.ascend();
    Ok(DhcpOption::IaTa(IaTa {
        iaid: read_u32(value, 0),
        options: options?,
    }))
}

pub(crate) fn decode_ia_addr(value: &[u8], ctx: &mut DecodeCtx) -> Result<DhcpOption, CodecError> {
    need(value, 24)?;
    let preferred_lifetime = read_u32(value, 16);
    let valid_lifetime = read_u32(value, 20);
    check_lifetimes(preferred_lifetime, valid_lifetime)?;
    ctx.descend()?;
    let options = decode_options(&value[24..], ctx, ContainerKind::IaAddress);
    ctx.ascend();
    Ok(DhcpOption::IaAddress(IaAddress {
        address: read_ipv6(value, 0)?,
        preferred_lifetime,
        valid_lifetime,
        options: options?,
    }))
}

pub(crate) fn decode_oro(value: &[u8], _ctx: &mut DecodeCtx) -> Result<DhcpOption, CodecError> {
    if value.len() % 2 != 0 {
        return Err(CodecError::BadLength {
            context: "option request option",
        });
    }
    let codes = (0..value.len())
        .step_by(2)
        .map(|at| read_u16(value, at))
        .collect();
    Ok(DhcpOption::Oro(codes))
}

pub(crate) fn decode_preference(value: &[u8], _ctx: &mut DecodeCtx) -> Result<DhcpOption, CodecError> {
    need(value, 1)?;
    if value.len() != 1 {
        return Err(CodecError::BadLength {
            context: "preference",
        });
    }
    Ok(DhcpOption::Preference(value[0]))
}

pub(crate) fn decode_elapsed_time(
    value: &[u8],
    _ctx: &mut DecodeCtx,
) -> Result<DhcpOption, CodecError> {
    if value.len() != 2 {
        return Err(CodecError::BadLength {
            context: "elapsed time",
        });
    }
    Ok(DhcpOption::ElapsedTime(read_u16(value, 0)))
}

pub(crate) fn decode_relay_msg(value: &[u8], ctx: &mut DecodeCtx) -> Result<DhcpOption, CodecError> {
    ctx.descend()?;
    let message = Message::decode_at(value, ctx);
    ctx.ascend();
    Ok(DhcpOption::RelayMessage(Box::new(message?)))
}

pub(crate) fn decode_auth(value: &[u8], _ctx: &mut DecodeCtx) -> Result<DhcpOption, CodecError> {
    need(value, 11)?;
    Ok(DhcpOption::Authentication(value.to_vec()))
}

pub(crate) fn decode_unicast(value: &[u8], _ctx: &mut DecodeCtx) -> Result<DhcpOption, CodecError> {
    if value.len() != 16 {
        return Err(CodecError::BadLength {
            context: "server unicast",
        });
    }
    Ok(DhcpOption::ServerUnicast(read_ipv6(value, 0)?))
}

pub(crate) fn decode_status_code(
    value: &[u8],
    _ctx: &mut DecodeCtx,
) -> Result<DhcpOption, CodecError> {
    need(value, 2)?;
    let message = std::str::from_utf8(&value[2..])
        .map_err(|_| CodecError::InvalidValue {
            context: "status message",
            reason: "not valid UTF-8",
        })?
        .to_string();
    Ok(DhcpOption::StatusCode(StatusCodeOption {
        code: read_u16(value, 0),
        message,
    }))
}

pub(crate) fn decode_rapid_commit(
    value: &[u8],
    _ctx: &mut DecodeCtx,
) -> Result<DhcpOption, CodecError> {
    if !value.is_empty() {
        return Err(CodecError::BadLength {
            context: "rapid commit",
        });
    }
    Ok(DhcpOption::RapidCommit)
}

pub(crate) fn decode_user_class(value: &[u8], _ctx: &mut DecodeCtx) -> Result<DhcpOption, CodecError> {
    Ok(DhcpOption::UserClass(decode_class_data(value)?))
}

pub(crate) fn decode_vendor_class(
    value: &[u8],
    _ctx: &mut DecodeCtx,
) -> Result<DhcpOption, CodecError> {
    need(value, 4)?;
    Ok(DhcpOption::VendorClass {
        enterprise: read_u32(value, 0),
        classes: decode_class_data(&value[4..])?,
    })
}

pub(crate) fn decode_vendor_opts(
    value: &[u8],
    _ctx: &mut DecodeCtx,
) -> Result<DhcpOption, CodecError> {
    need(value, 4)?;
    let mut options = Vec::new();
    let mut at = 4;
    while at < value.len() {
        need(value, at + 4)?;
        let sub_code = read_u16(value, at);
        let sub_len = read_u16(value, at + 2) as usize;
        at += 4;
        need(value, at + sub_len)?;
        options.push((sub_code, value[at..at + sub_len].to_vec()));
        at += sub_len;
    }
    Ok(DhcpOption::VendorSpecific {
        enterprise: read_u32(value, 0),
        options,
    })
}

pub(crate) fn decode_interface_id(
    value: &[u8],
    _ctx: &mut DecodeCtx,
) -> Result<DhcpOption, CodecError> {
    Ok(DhcpOption::InterfaceId(value.to_vec()))
}

pub(crate) fn decode_reconf_msg(value: &[u8], _ctx: &mut DecodeCtx) -> Result<DhcpOption, CodecError> {
    if value.len() != 1 {
        return Err(CodecError::BadLength {
            context: "reconfigure message",
        });
    }
    Ok(DhcpOption::ReconfigureMessage(value[0]))
}

pub(crate) fn decode_reconf_accept(
    value: &[u8],
    _ctx: &mut DecodeCtx,
) -> Result<DhcpOption, CodecError> {
    if !value.is_empty() {
        return Err(CodecError::BadLength {
            context: "reconfigure accept",
        });
    }
    Ok(DhcpOption::ReconfigureAccept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::OptionRegistry;

    fn decode_one(bytes: &[u8]) -> (Vec<DhcpOption>, bool) {
        let registry = OptionRegistry::with_defaults();
        let mut ctx = DecodeCtx::new(&registry);
        let options = decode_options(bytes, &mut ctx, ContainerKind::Message).unwrap();
        (options, ctx.partial())
    }

    #[test]
    fn test_unknown_option_roundtrip() {
        let bytes = [0xff, 0xff, 0x00, 0x03, 0x01, 0x02, 0x03];
        let (options, partial) = decode_one(&bytes);
        assert!(!partial);
        assert_eq!(
            options,
            vec![DhcpOption::Opaque {
                code: 0xffff,
                data: vec![1, 2, 3],
            }]
        );

        let mut out = Vec::new();
        encode_options(&options, &mut out).unwrap();
        assert_eq!(out, bytes.to_vec());
    }

    #[test]
    fn test_ia_na_roundtrip() {
        let ia = DhcpOption::IaNa(IaNa {
            iaid: 1,
            t1: 1800,
            t2: 2880,
            options: vec![DhcpOption::IaAddress(IaAddress {
                address: "2001:db8::1".parse().unwrap(),
                preferred_lifetime: 3600,
                valid_lifetime: 7200,
                options: vec![],
            })],
        });

        let mut buf = Vec::new();
        ia.encode_into(&mut buf).unwrap();

        let (decoded, partial) = decode_one(&buf);
        assert!(!partial);
        assert_eq!(decoded, vec![ia]);
    }

    #[test]
    fn test_truncated_ia_na_fails_container() {
        // IA_NA declares 40 bytes of payload but the buffer carries 20
        let mut bytes = vec![0x00, 0x03, 0x00, 0x28];
        bytes.extend_from_slice(&[0u8; 20]);

        let registry = OptionRegistry::with_defaults();
        let mut ctx = DecodeCtx::new(&registry);
        let result = decode_options(&bytes, &mut ctx, ContainerKind::Message);
        assert!(matches!(result, Err(CodecError::Truncated { .. })));
    }

    #[test]
    fn test_bad_suboption_demotes_to_opaque() {
        // IA_NA with a malformed elapsed-time inside: option 8 length 1
        let mut body = Vec::new();
        body.extend_from_slice(&1u32.to_be_bytes());
        body.extend_from_slice(&0u32.to_be_bytes());
        body.extend_from_slice(&0u32.to_be_bytes());
        body.extend_from_slice(&[0x00, 0x08, 0x00, 0x01, 0xaa]);

        let mut bytes = vec![0x00, 0x03];
        bytes.extend_from_slice(&(body.len() as u16).to_be_bytes());
        bytes.extend_from_slice(&body);

        let (options, partial) = decode_one(&bytes);
        assert!(partial);
        match &options[0] {
            DhcpOption::IaNa(ia) => {
                // elapsed-time does not belong in an IA_NA either way;
                // whichever rule fires first, the sub-option stays opaque
                assert!(matches!(ia.options[0], DhcpOption::Opaque { code: 8, .. }));
            }
            other => panic!("expected IA_NA, got {:?}", other),
        }
    }

    #[test]
    fn test_lifetime_invariant_rejected_on_encode() {
        let bad = DhcpOption::IaAddress(IaAddress {
            address: "2001:db8::1".parse().unwrap(),
            preferred_lifetime: 7200,
            valid_lifetime: 3600,
            options: vec![],
        });
        assert!(matches!(
            bad.encode_into(&mut Vec::new()),
            Err(CodecError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_timer_invariant_rejected_on_encode() {
        let bad = DhcpOption::IaNa(IaNa {
            iaid: 1,
            t1: 4000,
            t2: 2000,
            options: vec![],
        });
        assert!(matches!(
            bad.encode_into(&mut Vec::new()),
            Err(CodecError::InvalidValue { .. })
        ));

        // Zero means "let the server choose" and is always acceptable
        let ok = DhcpOption::IaNa(IaNa {
            iaid: 1,
            t1: 4000,
            t2: 0,
            options: vec![],
        });
        assert!(ok.encode_into(&mut Vec::new()).is_ok());
    }

    #[test]
    fn test_bad_lifetimes_on_decode_demote_ia_address() {
        // IA-address with preferred 7200 > valid 3600 inside an IA_NA
        let mut addr_body = Vec::new();
        addr_body.extend_from_slice(&"2001:db8::1".parse::<Ipv6Addr>().unwrap().octets());
        addr_body.extend_from_slice(&7200u32.to_be_bytes());
        addr_body.extend_from_slice(&3600u32.to_be_bytes());

        let mut ia_body = Vec::new();
        ia_body.extend_from_slice(&1u32.to_be_bytes());
        ia_body.extend_from_slice(&0u32.to_be_bytes());
        ia_body.extend_from_slice(&0u32.to_be_bytes());
        ia_body.extend_from_slice(&[0x00, 0x05]);
        ia_body.extend_from_slice(&(addr_body.len() as u16).to_be_bytes());
        ia_body.extend_from_slice(&addr_body);

        let mut bytes = vec![0x00, 0x03];
        bytes.extend_from_slice(&(ia_body.len() as u16).to_be_bytes());
        bytes.extend_from_slice(&ia_body);

        let (options, partial) = decode_one(&bytes);
        assert!(partial);
        match &options[0] {
            DhcpOption::IaNa(ia) => {
                assert!(matches!(ia.options[0], DhcpOption::Opaque { code: 5, .. }));
            }
            other => panic!("expected IA_NA, got {:?}", other),
        }

        // And the demotion keeps re-encode byte-identical
        let mut out = Vec::new();
        encode_options(&options, &mut out).unwrap();
        assert_eq!(out, bytes);
    }

    #[test]
    fn test_duplicate_singleton_rejected() {
        let mut bytes = Vec::new();
        for _ in 0..2 {
            bytes.extend_from_slice(&[0x00, 0x08, 0x00, 0x02, 0x00, 0x00]);
        }
        let registry = OptionRegistry::with_defaults();
        let mut ctx = DecodeCtx::new(&registry);
        let result = decode_options(&bytes, &mut ctx, ContainerKind::Message);
        assert_eq!(result, Err(CodecError::DuplicateOption { code: 8 }));
    }

    #[test]
    fn test_vendor_opts_roundtrip() {
        let option = DhcpOption::VendorSpecific {
            enterprise: 4491,
            options: vec![(1, vec![0xde, 0xad]), (2, vec![])],
        };
        let mut buf = Vec::new();
        option.encode_into(&mut buf).unwrap();
        let (decoded, partial) = decode_one(&buf);
        assert!(!partial);
        assert_eq!(decoded, vec![option]);
    }

    #[test]
    fn test_status_code_roundtrip() {
        let option = DhcpOption::StatusCode(StatusCodeOption::new(
            status::NO_ADDRS_AVAIL,
            "pool exhausted",
        ));
        let mut buf = Vec::new();
        option.encode_into(&mut buf).unwrap();
        let (decoded, _) = decode_one(&buf);
        assert_eq!(decoded, vec![option]);
    }
}
