use std::net::Ipv4Addr;

/// IPv4 CIDR membership over 32-bit integer arithmetic. Invalid input
/// on either side means "not a member", never an error.
pub fn cidr_contains(cidr: &str, address: &str) -> bool {
    let Some((base, prefix)) = cidr.split_once('/') else {
        return false;
    };
    let Ok(prefix) = prefix.parse::<u8>() else {
        return false;
    };
    if prefix > 32 {
        return false;
    }
    let (Some(base), Some(address)) = (parse_ipv4(base), parse_ipv4(address)) else {
        return false;
    };
    let mask: u32 = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix)
    };
    address & mask == base & mask
}

/// Strict IPv4 literal (rejects leading zeros per octet), as a
/// big-endian integer.
pub fn parse_ipv4(s: &str) -> Option<u32> {
    s.parse::<Ipv4Addr>().ok().map(u32::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_route_contains_itself_only() {
        assert!(cidr_contains("203.0.113.7/32", "203.0.113.7"));
        assert!(!cidr_contains("203.0.113.7/32", "203.0.113.8"));
    }

    #[test]
    fn test_zero_prefix_contains_everything() {
        for address in ["0.0.0.0", "10.1.2.3", "203.0.113.7", "255.255.255.255"] {
            assert!(cidr_contains("0.0.0.0/0", address));
        }
    }

    #[test]
    fn test_slash_24_spans_the_last_octet() {
        for d in [0u8, 1, 127, 254, 255] {
            assert!(cidr_contains("198.51.100.0/24", &format!("198.51.100.{d}")));
        }
        assert!(!cidr_contains("198.51.100.0/24", "198.51.101.0"));
    }

    #[test]
    fn test_base_need_not_be_aligned() {
        assert!(cidr_contains("10.0.0.99/8", "10.255.0.1"));
        assert!(!cidr_contains("10.0.0.99/8", "11.0.0.1"));
    }

    #[test]
    fn test_invalid_inputs_are_not_members() {
        assert!(!cidr_contains("10.0.0.0", "10.0.0.1"));
        assert!(!cidr_contains("10.0.0.0/33", "10.0.0.1"));
        assert!(!cidr_contains("10.0.0.0/x", "10.0.0.1"));
        assert!(!cidr_contains("10.0.0.256/8", "10.0.0.1"));
        assert!(!cidr_contains("10.0.0.0/8", "not-an-address"));
        assert!(!cidr_contains("10.0.0.0/8", "::1"));
    }

    #[test]
    fn test_leading_zero_octets_rejected() {
        assert_eq!(parse_ipv4("01.2.3.4"), None);
        assert_eq!(parse_ipv4("1.2.3.04"), None);
        assert_eq!(parse_ipv4("1.2.3.4"), Some(0x01020304));
    }
}
