//! Prefix delegation options (RFC 3633)

use std::net::Ipv6Addr;

use hexane_core::error::CodecError;

use crate::registry::{ContainerKind, DecodeCtx};

use super::{decode_options, need, read_ipv6, read_u32, DhcpOption};

pub const OPTION_IA_PD: u16 = 25;
pub const OPTION_IAPREFIX: u16 = 26;

/// Identity Association for Prefix Delegation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IaPd {
    pub iaid: u32,
    pub t1: u32,
    pub t2: u32,
    pub options: Vec<DhcpOption>,
}

/// A delegated prefix inside an IA_PD
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IaPrefix {
    pub preferred_lifetime: u32,
    pub valid_lifetime: u32,
    pub prefix_length: u8,
    pub prefix: Ipv6Addr,
    pub options: Vec<DhcpOption>,
}

pub(crate) fn decode_ia_pd(value: &[u8], ctx: &mut DecodeCtx) -> Result<DhcpOption, CodecError> {
    need(value, 12)?;
    ctx.descend()?;
    let options = decode_options(&value[12..], ctx, ContainerKind::IaPd);
    ctx.ascend();
    Ok(DhcpOption::IaPd(IaPd {
        iaid: read_u32(value, 0),
        t1: read_u32(value, 4),
        t2: read_u32(value, 8),
        options: options?,
    }))
}

pub(crate) fn decode_ia_prefix(value: &[u8], ctx: &mut DecodeCtx) -> Result<DhcpOption, CodecError> {
    need(value, 25)?;
    let preferred_lifetime = read_u32(value, 0);
    let valid_lifetime = read_u32(value, 4);
    if preferred_lifetime > valid_lifetime {
        return Err(CodecError::InvalidValue {
            context: "ia lifetimes",
            reason: "preferred-lifetime exceeds valid-lifetime",
        });
    }
    let prefix_length = value[8];
    if prefix_length > 128 {
        return Err(CodecError::InvalidValue {
            context: "ia prefix",
            reason: "prefix length exceeds 128",
        });
    }
    ctx.descend()?;
    let options = decode_options(&value[25..], ctx, ContainerKind::IaPrefix);
    ctx.ascend();
    Ok(DhcpOption::IaPrefix(IaPrefix {
        preferred_lifetime,
        valid_lifetime,
        prefix_length,
        prefix: read_ipv6(value, 9)?,
        options: options?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::OptionRegistry;

    #[test]
    fn test_ia_pd_roundtrip() {
        let option = DhcpOption::IaPd(IaPd {
            iaid: 0x0000_0002,
            t1: 1800,
            t2: 2880,
            options: vec![DhcpOption::IaPrefix(IaPrefix {
                preferred_lifetime: 3600,
                valid_lifetime: 7200,
                prefix_length: 56,
                prefix: "2001:db8:ff00::".parse().unwrap(),
                options: vec![],
            })],
        });

        let mut buf = Vec::new();
        option.encode_into(&mut buf).unwrap();

        let registry = OptionRegistry::with_defaults();
        let mut ctx = DecodeCtx::new(&registry);
        let decoded =
            crate::options::decode_options(&buf, &mut ctx, ContainerKind::Message).unwrap();
        assert!(!ctx.partial());
        assert_eq!(decoded, vec![option]);
    }

    #[test]
    fn test_ia_prefix_length_validation() {
        let mut value = Vec::new();
        value.extend_from_slice(&3600u32.to_be_bytes());
        value.extend_from_slice(&7200u32.to_be_bytes());
        value.push(200); // impossible prefix length
        value.extend_from_slice(&[0u8; 16]);

        let registry = OptionRegistry::with_defaults();
        let mut ctx = DecodeCtx::new(&registry);
        assert!(decode_ia_prefix(&value, &mut ctx).is_err());
    }
}
