//! DNS configuration options (RFC 3646)

use hexane_core::error::CodecError;

use crate::dns_name;
use crate::registry::DecodeCtx;

use super::{read_ipv6_list, DhcpOption};

pub const OPTION_DNS_SERVERS: u16 = 23;
pub const OPTION_DOMAIN_LIST: u16 = 24;

pub(crate) fn decode_dns_servers(
    value: &[u8],
    _ctx: &mut DecodeCtx,
) -> Result<DhcpOption, CodecError> {
    Ok(DhcpOption::DnsServers(read_ipv6_list(value)?))
}

pub(crate) fn decode_domain_list(
    value: &[u8],
    _ctx: &mut DecodeCtx,
) -> Result<DhcpOption, CodecError> {
    Ok(DhcpOption::DomainSearchList(dns_name::parse_name_list(
        value,
    )?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::encode_options;
    use crate::registry::{ContainerKind, OptionRegistry};

    #[test]
    fn test_dns_servers_roundtrip() {
        let option = DhcpOption::DnsServers(vec![
            "2001:db8::53".parse().unwrap(),
            "2001:db8::5353".parse().unwrap(),
        ]);
        let mut buf = Vec::new();
        option.encode_into(&mut buf).unwrap();
        assert_eq!(&buf[..4], &[0x00, 23, 0x00, 32]);

        let registry = OptionRegistry::with_defaults();
        let mut ctx = DecodeCtx::new(&registry);
        let decoded =
            crate::options::decode_options(&buf, &mut ctx, ContainerKind::Message).unwrap();
        assert_eq!(decoded, vec![option]);
    }

    #[test]
    fn test_ragged_address_list_is_demoted() {
        // 17 bytes is not a whole number of addresses
        let mut bytes = vec![0x00, 23, 0x00, 17];
        bytes.extend_from_slice(&[0u8; 17]);

        let registry = OptionRegistry::with_defaults();
        let mut ctx = DecodeCtx::new(&registry);
        let decoded =
            crate::options::decode_options(&bytes, &mut ctx, ContainerKind::Message).unwrap();
        assert!(ctx.partial());
        assert!(matches!(decoded[0], DhcpOption::Opaque { code: 23, .. }));

        let mut out = Vec::new();
        encode_options(&decoded, &mut out).unwrap();
        assert_eq!(out, bytes);
    }

    #[test]
    fn test_domain_list_roundtrip() {
        let option = DhcpOption::DomainSearchList(vec![
            "example.com".to_string(),
            "corp.example.com".to_string(),
        ]);
        let mut buf = Vec::new();
        option.encode_into(&mut buf).unwrap();

        let registry = OptionRegistry::with_defaults();
        let mut ctx = DecodeCtx::new(&registry);
        let decoded =
            crate::options::decode_options(&buf, &mut ctx, ContainerKind::Message).unwrap();
        assert_eq!(decoded, vec![option]);
    }
}
