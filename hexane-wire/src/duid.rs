//! DHCP Unique Identifiers (RFC 3315 section 9, RFC 6355)

use std::fmt;
use std::str::FromStr;

use hexane_core::error::CodecError;

use crate::MAX_DUID_LEN;

pub const DUID_LLT: u16 = 1;
pub const DUID_EN: u16 = 2;
pub const DUID_LL: u16 = 3;
pub const DUID_UUID: u16 = 4;

/// A DUID, tagged by its two-octet type code.
///
/// Unknown type codes are preserved verbatim so messages round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Duid {
    /// DUID-LLT: link-layer address plus time
    LinkLayerTime {
        hardware_type: u16,
        time: u32,
        address: Vec<u8>,
    },
    /// DUID-EN: vendor-assigned, based on an enterprise number
    Enterprise { enterprise: u32, identifier: Vec<u8> },
    /// DUID-LL: link-layer address
    LinkLayer {
        hardware_type: u16,
        address: Vec<u8>,
    },
    /// DUID-UUID (RFC 6355)
    Uuid([u8; 16]),
    /// Any DUID type this implementation does not know
    Opaque { duid_type: u16, data: Vec<u8> },
}

impl Duid {
    /// The two-octet type code
    pub fn duid_type(&self) -> u16 {
        match self {
            Duid::LinkLayerTime { .. } => DUID_LLT,
            Duid::Enterprise { .. } => DUID_EN,
            Duid::LinkLayer { .. } => DUID_LL,
            Duid::Uuid(_) => DUID_UUID,
            Duid::Opaque { duid_type, .. } => *duid_type,
        }
    }

    /// Decode a DUID from its full wire form (type code included)
    pub fn decode(buf: &[u8]) -> Result<Duid, CodecError> {
        if buf.len() < 2 {
            return Err(CodecError::Truncated {
                needed: 2 - buf.len(),
            });
        }
        if buf.len() > MAX_DUID_LEN {
            return Err(CodecError::BadLength { context: "duid" });
        }

        let duid_type = u16::from_be_bytes([buf[0], buf[1]]);
        let body = &buf[2..];

        match duid_type {
            DUID_LLT => {
                if body.len() < 6 {
                    return Err(CodecError::Truncated {
                        needed: 6 - body.len(),
                    });
                }
                Ok(Duid::LinkLayerTime {
                    hardware_type: u16::from_be_bytes([body[0], body[1]]),
                    time: u32::from_be_bytes([body[2], body[3], body[4], body[5]]),
                    address: body[6..].to_vec(),
                })
            }
            DUID_EN => {
                if body.len() < 4 {
                    return Err(CodecError::Truncated {
                        needed: 4 - body.len(),
                    });
                }
                Ok(Duid::Enterprise {
                    enterprise: u32::from_be_bytes([body[0], body[1], body[2], body[3]]),
                    identifier: body[4..].to_vec(),
                })
            }
            DUID_LL => {
                if body.len() < 2 {
                    return Err(CodecError::Truncated {
                        needed: 2 - body.len(),
                    });
                }
                Ok(Duid::LinkLayer {
                    hardware_type: u16::from_be_bytes([body[0], body[1]]),
                    address: body[2..].to_vec(),
                })
            }
            DUID_UUID => {
                if body.len() != 16 {
                    return Err(CodecError::BadLength {
                        context: "duid-uuid",
                    });
                }
                let mut uuid = [0u8; 16];
                uuid.copy_from_slice(body);
                Ok(Duid::Uuid(uuid))
            }
            _ => Ok(Duid::Opaque {
                duid_type,
                data: body.to_vec(),
            }),
        }
    }

    /// Encode to the full wire form
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16);
        buf.extend_from_slice(&self.duid_type().to_be_bytes());
        match self {
            Duid::LinkLayerTime {
                hardware_type,
                time,
                address,
            } => {
                buf.extend_from_slice(&hardware_type.to_be_bytes());
                buf.extend_from_slice(&time.to_be_bytes());
                buf.extend_from_slice(address);
            }
            Duid::Enterprise {
                enterprise,
                identifier,
            } => {
                buf.extend_from_slice(&enterprise.to_be_bytes());
                buf.extend_from_slice(identifier);
            }
            Duid::LinkLayer {
                hardware_type,
                address,
            } => {
                buf.extend_from_slice(&hardware_type.to_be_bytes());
                buf.extend_from_slice(address);
            }
            Duid::Uuid(uuid) => buf.extend_from_slice(uuid),
            Duid::Opaque { data, .. } => buf.extend_from_slice(data),
        }
        buf
    }

    /// DUID-LL over an Ethernet MAC address
    pub fn from_mac(mac: [u8; 6]) -> Duid {
        Duid::LinkLayer {
            hardware_type: 1,
            address: mac.to_vec(),
        }
    }
}

impl fmt::Display for Duid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.encode() {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl FromStr for Duid {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() % 2 != 0 {
            return Err(CodecError::BadLength { context: "duid" });
        }
        let mut bytes = Vec::with_capacity(s.len() / 2);
        for i in (0..s.len()).step_by(2) {
            let byte = u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| {
                CodecError::InvalidValue {
                    context: "duid",
                    reason: "not a hex string",
                }
            })?;
            bytes.push(byte);
        }
        Duid::decode(&bytes)
    }
}
