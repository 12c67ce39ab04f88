//! DNS wire encoding for domain names (RFC 1035 section 3.1)
//!
//! Names are sequences of length-prefixed labels terminated by the root
//! label; multiple names simply concatenate. Compression pointers are not
//! legal in DHCPv6 options and are rejected.

use hexane_core::error::CodecError;

const MAX_LABEL_LEN: usize = 63;
const MAX_NAME_LEN: usize = 255;

/// Encode one domain name into `buf`
pub fn encode_name(name: &str, buf: &mut Vec<u8>) -> Result<(), CodecError> {
    let name = name.strip_suffix('.').unwrap_or(name);
    if name.is_empty() {
        return Err(CodecError::InvalidValue {
            context: "domain name",
            reason: "empty name",
        });
    }

    let start = buf.len();
    for label in name.split('.') {
        if label.is_empty() || label.len() > MAX_LABEL_LEN {
            return Err(CodecError::InvalidValue {
                context: "domain name",
                reason: "labels must be 1 to 63 octets",
            });
        }
        buf.push(label.len() as u8);
        buf.extend_from_slice(label.as_bytes());
    }
    buf.push(0);

    if buf.len() - start > MAX_NAME_LEN {
        return Err(CodecError::InvalidValue {
            context: "domain name",
            reason: "encoded name exceeds 255 octets",
        });
    }
    Ok(())
}

/// Encode a list of names, concatenated
pub fn encode_name_list(names: &[String], buf: &mut Vec<u8>) -> Result<(), CodecError> {
    for name in names {
        encode_name(name, buf)?;
    }
    Ok(())
}

/// Parse one name starting at the beginning of `buf`.
///
/// Returns the name and the number of octets consumed.
pub fn parse_name(buf: &[u8]) -> Result<(String, usize), CodecError> {
    let mut labels: Vec<&str> = Vec::new();
    let mut offset = 0;
    let mut name_len = 0;

    loop {
        let len = *buf.get(offset).ok_or(CodecError::Truncated { needed: 1 })? as usize;
        offset += 1;

        if len == 0 {
            break;
        }
        if len > MAX_LABEL_LEN {
            // High bits set would be a compression pointer
            return Err(CodecError::BadDiscriminant {
                context: "domain label length",
                value: len as u32,
            });
        }
        if buf.len() < offset + len {
            return Err(CodecError::Truncated {
                needed: offset + len - buf.len(),
            });
        }

        name_len += len + 1;
        if name_len > MAX_NAME_LEN {
            return Err(CodecError::BadLength {
                context: "domain name",
            });
        }

        let label = std::str::from_utf8(&buf[offset..offset + len]).map_err(|_| {
            CodecError::InvalidValue {
                context: "domain label",
                reason: "not valid UTF-8",
            }
        })?;
        labels.push(label);
        offset += len;
    }

    if labels.is_empty() {
        return Err(CodecError::InvalidValue {
            context: "domain name",
            reason: "empty name",
        });
    }
    Ok((labels.join("."), offset))
}

/// Parse concatenated names until `buf` is exhausted
pub fn parse_name_list(buf: &[u8]) -> Result<Vec<String>, CodecError> {
    let mut names = Vec::new();
    let mut offset = 0;
    while offset < buf.len() {
        let (name, consumed) = parse_name(&buf[offset..])?;
        names.push(name);
        offset += consumed;
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_name() {
        let mut buf = Vec::new();
        encode_name("ntp.example.org", &mut buf).unwrap();
        assert_eq!(
            buf,
            b"\x03ntp\x07example\x03org\x00".to_vec()
        );
    }

    #[test]
    fn test_trailing_dot_is_normalized() {
        let mut with_dot = Vec::new();
        let mut without = Vec::new();
        encode_name("example.org.", &mut with_dot).unwrap();
        encode_name("example.org", &mut without).unwrap();
        assert_eq!(with_dot, without);
    }

    #[test]
    fn test_parse_name() {
        let (name, consumed) = parse_name(b"\x03ntp\x07example\x03org\x00rest").unwrap();
        assert_eq!(name, "ntp.example.org");
        assert_eq!(consumed, 17);
    }

    #[test]
    fn test_name_list_roundtrip() {
        let names = vec!["a.example.com".to_string(), "b.example.net".to_string()];
        let mut buf = Vec::new();
        encode_name_list(&names, &mut buf).unwrap();
        assert_eq!(parse_name_list(&buf).unwrap(), names);
    }

    #[test]
    fn test_compression_pointer_rejected() {
        // 0xc0 0x0c is a classic DNS compression pointer
        assert!(matches!(
            parse_name(&[0xc0, 0x0c]),
            Err(CodecError::BadDiscriminant { .. })
        ));
    }

    #[test]
    fn test_unterminated_name() {
        assert!(matches!(
            parse_name(b"\x03ntp"),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn test_label_length_limits() {
        let mut buf = Vec::new();
        let long_label = "a".repeat(64);
        assert!(encode_name(&long_label, &mut buf).is_err());

        let ok_label = "a".repeat(63);
        assert!(encode_name(&ok_label, &mut Vec::new()).is_ok());
    }

    #[test]
    fn test_name_length_limit() {
        // Four 63-octet labels encode to 4 * 64 + 1 = 257 octets
        let name = ["a".repeat(63), "b".repeat(63), "c".repeat(63), "d".repeat(63)].join(".");
        assert!(encode_name(&name, &mut Vec::new()).is_err());
    }
}
