use anyhow::Result;
use config::dns::DnsRule;
use config::inbound::InboundOptions;
use config::{BoxOptions, Metadata};

use crate::version;

/// Engines before 1.9 cannot match DNS rules on response addresses, and
/// before 1.9.0-alpha.10 the platform HTTP proxy has no domain lists.
pub(super) fn apply(metadata: &Metadata, options: &mut BoxOptions) -> Result<()> {
    if let Some(dns) = &mut options.dns {
        let before = dns.rules.len();
        dns.rules.retain(|rule| !uses_address_fields(rule));
        if dns.rules.len() != before {
            tracing::debug!(removed = before - dns.rules.len(), "drop address dns rules");
        }
    }
    if metadata.is_before(&version::HTTP_PROXY_DOMAINS) {
        for inbound in &mut options.inbounds {
            let InboundOptions::Tun(tun) = &mut inbound.options else {
                continue;
            };
            if let Some(http_proxy) = tun.platform.as_mut().and_then(|it| it.http_proxy.as_mut()) {
                http_proxy.bypass_domain.clear();
                http_proxy.match_domain.clear();
            }
        }
    }
    Ok(())
}

fn uses_address_fields(rule: &DnsRule) -> bool {
    rule.has_default_rule(&|rule| {
        !rule.geoip.is_empty() || !rule.ip_cidr.is_empty() || rule.ip_is_private
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{Platform, Version};
    use serde_json::json;

    fn options() -> BoxOptions {
        serde_json::from_value(json!({
            "dns": {"rules": [
                {"geoip": "cn", "server": "local"},
                {"type": "logical", "mode": "and", "rules": [{"domain": "a.com"}, {"ip_is_private": true}], "server": "local"},
                {"domain_suffix": ".cn", "server": "local"}
            ]},
            "inbounds": [{
                "type": "tun",
                "platform": {"http_proxy": {
                    "enabled": true, "server": "127.0.0.1", "server_port": 8080,
                    "bypass_domain": ["a.com"], "match_domain": ["b.com"]
                }}
            }]
        }))
        .unwrap()
    }

    #[test]
    fn test_drop_address_rules_and_proxy_domains() {
        let mut options = options();
        let metadata = Metadata::new(Some(Version::new(1, 8, 0)), Platform::MacOS);
        apply(&metadata, &mut options).unwrap();
        assert_eq!(
            serde_json::to_value(&options.dns.as_ref().unwrap().rules).unwrap(),
            json!([{"domain_suffix": ".cn", "server": "local"}])
        );
        let InboundOptions::Tun(tun) = &options.inbounds[0].options else {
            panic!("expected tun inbound");
        };
        let http_proxy = tun.platform.as_ref().unwrap().http_proxy.as_ref().unwrap();
        assert!(http_proxy.bypass_domain.is_empty());
        assert!(http_proxy.match_domain.is_empty());
        assert!(http_proxy.enabled);
    }

    #[test]
    fn test_proxy_domains_kept_from_alpha_10() {
        let mut options = options();
        let metadata = Metadata::new(Some(Version::alpha(1, 9, 0, 10)), Platform::MacOS);
        apply(&metadata, &mut options).unwrap();
        let InboundOptions::Tun(tun) = &options.inbounds[0].options else {
            panic!("expected tun inbound");
        };
        let http_proxy = tun.platform.as_ref().unwrap().http_proxy.as_ref().unwrap();
        assert_eq!(http_proxy.bypass_domain, vec!["a.com"]);
    }
}
