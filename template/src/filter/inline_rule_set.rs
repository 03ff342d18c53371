use anyhow::Result;
use config::dns::DnsRule;
use config::inbound::{InboundOptions, TunInboundOptions};
use config::route::{RuleSet, RuleSetOptions};
use config::{BoxOptions, Metadata};
use ipnet::IpNet;

use crate::expand::expand_all;
use crate::version;

/// Inline rule-sets arrived in 1.10.0-alpha.19: their rules are copied into
/// every rule referencing them.
pub(super) fn apply(metadata: &Metadata, options: &mut BoxOptions) -> Result<()> {
    let inline = match &mut options.route {
        Some(route) => {
            let (inline, kept): (Vec<RuleSet>, Vec<RuleSet>) = route
                .rule_set
                .drain(..)
                .partition(|it| matches!(it.options, RuleSetOptions::Inline(_)));
            route.rule_set = kept;
            if !inline.is_empty() {
                route.rules = expand_all(&inline, std::mem::take(&mut route.rules))?;
            }
            route
                .rules
                .retain(|rule| !rule.has_default_rule(&|rule| rule.rule_set_ip_cidr_match_source));
            inline
        }
        None => Vec::new(),
    };
    if let Some(dns) = &mut options.dns {
        if !inline.is_empty() {
            dns.rules = expand_all(&inline, std::mem::take(&mut dns.rules))?;
        }
        dns.rules.retain(|rule| !uses_new_ip_cidr_fields(rule));
    }
    if !inline.is_empty() {
        tracing::debug!(
            rule_sets = ?inline.iter().map(|it| it.tag.as_str()).collect::<Vec<_>>(),
            "inline rule-sets expanded"
        );
    }

    if metadata.is_before(&version::ADDRESS_FIELDS) {
        for inbound in &mut options.inbounds {
            if let InboundOptions::Tun(tun) = &mut inbound.options {
                legacy_tun_addresses(tun);
            }
        }
    }
    Ok(())
}

fn uses_new_ip_cidr_fields(rule: &DnsRule) -> bool {
    rule.has_default_rule(&|rule| {
        rule.rule_set_ip_cidr_match_source || rule.rule_set_ip_cidr_accept_empty
    })
}

/// Moves merged address lists into the per-family fields older engines read.
fn legacy_tun_addresses(tun: &mut TunInboundOptions) {
    tun.auto_redirect = false;
    tun.route_address_set.clear();
    tun.route_exclude_address_set.clear();
    split(&mut tun.address, &mut tun.inet4_address, &mut tun.inet6_address);
    split(
        &mut tun.route_address,
        &mut tun.inet4_route_address,
        &mut tun.inet6_route_address,
    );
    split(
        &mut tun.route_exclude_address,
        &mut tun.inet4_route_exclude_address,
        &mut tun.inet6_route_exclude_address,
    );
}

fn split(addresses: &mut Vec<IpNet>, inet4: &mut Vec<IpNet>, inet6: &mut Vec<IpNet>) {
    for address in addresses.drain(..) {
        match address {
            IpNet::V4(_) => inet4.push(address),
            IpNet::V6(_) => inet6.push(address),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{Platform, Version};
    use serde_json::json;

    fn metadata(version: Version) -> Metadata {
        Metadata::new(Some(version), Platform::Unknown)
    }

    #[test]
    fn test_expand_and_remove_inline_sets() {
        let mut options: BoxOptions = serde_json::from_value(json!({
            "dns": {"rules": [
                {"rule_set": "lan", "server": "local"},
                {"rule_set": "geoip-cn", "rule_set_ip_cidr_accept_empty": true, "server": "local"}
            ]},
            "route": {
                "rules": [
                    {"rule_set": ["lan"], "outbound": "direct"},
                    {"rule_set": "geoip-cn", "rule_set_ip_cidr_match_source": true, "outbound": "direct"}
                ],
                "rule_set": [
                    {"type": "inline", "tag": "lan", "rules": [{"domain_suffix": [".lan"]}, {"ip_cidr": ["192.168.0.0/16"]}]},
                    {"type": "remote", "tag": "geoip-cn", "format": "binary", "url": "https://x/geoip-cn.srs"}
                ]
            }
        }))
        .unwrap();
        apply(&metadata(Version::new(1, 10, 0)), &mut options).unwrap();
        let route = options.route.as_ref().unwrap();
        assert_eq!(
            route.rule_set.iter().map(|it| it.tag.as_str()).collect::<Vec<_>>(),
            vec!["geoip-cn"]
        );
        assert_eq!(
            serde_json::to_value(&route.rules).unwrap(),
            json!([
                {"domain_suffix": [".lan"], "outbound": "direct"},
                {"ip_cidr": ["192.168.0.0/16"], "outbound": "direct"}
            ])
        );
        assert_eq!(
            serde_json::to_value(&options.dns.as_ref().unwrap().rules).unwrap(),
            json!([
                {"domain_suffix": [".lan"], "server": "local"},
                {"ip_cidr": ["192.168.0.0/16"], "server": "local"}
            ])
        );
    }

    #[test]
    fn test_legacy_tun_addresses() {
        let mut options: BoxOptions = serde_json::from_value(json!({
            "inbounds": [{
                "type": "tun",
                "address": ["172.19.0.1/30", "fdfe:dcba:9876::1/126"],
                "route_exclude_address": ["192.168.0.0/16"],
                "route_exclude_address_set": ["geoip-cn"],
                "auto_route": true,
                "auto_redirect": true
            }]
        }))
        .unwrap();
        apply(&metadata(Version::alpha(1, 10, 0, 12)), &mut options).unwrap();
        assert_eq!(
            serde_json::to_value(&options.inbounds).unwrap(),
            json!([{
                "type": "tun",
                "inet4_address": ["172.19.0.1/30"],
                "inet6_address": ["fdfe:dcba:9876::1/126"],
                "auto_route": true,
                "inet4_route_exclude_address": ["192.168.0.0/16"]
            }])
        );
    }

    #[test]
    fn test_new_address_fields_kept_from_alpha_13() {
        let raw = json!({"inbounds": [{"type": "tun", "address": ["172.19.0.1/30"], "auto_redirect": true}]});
        let mut options: BoxOptions = serde_json::from_value(raw.clone()).unwrap();
        apply(&metadata(Version::alpha(1, 10, 0, 13)), &mut options).unwrap();
        assert_eq!(serde_json::to_value(&options).unwrap(), raw);
    }
}
