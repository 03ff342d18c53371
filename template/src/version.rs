//! Engine versions at which the configuration schema changed.

use config::Version;

/// Rule actions replace the implicit `outbound` field of rules.
pub const RULE_ACTION: Version = Version::alpha(1, 11, 0, 7);
/// Inline rule-sets are understood by the engine.
pub const INLINE_RULE_SET: Version = Version::alpha(1, 10, 0, 19);
/// Tunnel `address` fields replace the `inet4_*`/`inet6_*` pairs; address
/// sets and auto-redirect appear.
pub const ADDRESS_FIELDS: Version = Version::alpha(1, 10, 0, 13);
pub const AUTO_REDIRECT: Version = Version::alpha(1, 10, 0, 2);
/// DNS rules can match on `geoip`, `ip_cidr` and `ip_is_private`.
pub const DNS_RULE_IP_FIELDS: Version = Version::alpha(1, 9, 0, 1);
/// Platform HTTP proxies accept `bypass_domain` and `match_domain`.
pub const HTTP_PROXY_DOMAINS: Version = Version::alpha(1, 9, 0, 10);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds_are_ordered() {
        let thresholds = [
            DNS_RULE_IP_FIELDS,
            HTTP_PROXY_DOMAINS,
            AUTO_REDIRECT,
            ADDRESS_FIELDS,
            INLINE_RULE_SET,
            RULE_ACTION,
        ];
        assert!(thresholds.windows(2).all(|it| it[0].less_than(&it[1])));
    }

    #[test]
    fn test_thresholds_match_their_text() {
        assert_eq!(RULE_ACTION, Version::parse("1.11.0-alpha.7").unwrap());
        assert_eq!(INLINE_RULE_SET.to_string(), "1.10.0-alpha.19");
        assert!(Version::parse("1.10.0").unwrap().greater_than_or_equal(&INLINE_RULE_SET));
        assert!(Version::parse("1.10.0-beta.1").unwrap().greater_than_or_equal(&ADDRESS_FIELDS));
    }
}
