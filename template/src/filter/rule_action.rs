use anyhow::Result;
use config::dns::DnsRuleAction;
use config::outbound::{TYPE_BLOCK, TYPE_DNS};
use config::rule::RuleAction;
use config::template::DNS_TAG;
use config::{BoxOptions, Metadata};

/// Rewrites rule actions into the `outbound` dialect spoken before
/// 1.11.0-alpha.7.
pub(super) fn apply(_metadata: &Metadata, options: &mut BoxOptions) -> Result<()> {
    let first_of_type = |outbound_type: &str| {
        options
            .outbounds
            .iter()
            .find(|it| it.outbound_type() == outbound_type)
            .map(|it| it.tag.clone())
    };
    let dns_outbound = first_of_type(TYPE_DNS).unwrap_or_else(|| DNS_TAG.to_string());
    let block_outbound = first_of_type(TYPE_BLOCK);

    if let Some(route) = &mut options.route {
        route.rules.retain_mut(|rule| {
            let replacement = match rule.action_mut() {
                None => return true,
                Some(RuleAction::Route(route_action)) => {
                    route_action.extra.clear();
                    return true;
                }
                Some(RuleAction::HijackDns) => RuleAction::route(dns_outbound.as_str()),
                Some(RuleAction::Reject(_)) => match &block_outbound {
                    Some(block) => RuleAction::route(block.as_str()),
                    None => {
                        tracing::debug!("drop reject rule without a block outbound");
                        return false;
                    }
                },
                Some(other) => {
                    tracing::debug!(action = other.name(), "drop rule action");
                    return false;
                }
            };
            *rule.action_mut() = Some(replacement);
            true
        });
    }
    if let Some(dns) = &mut options.dns {
        dns.rules
            .retain(|rule| matches!(rule.action(), None | Some(DnsRuleAction::Route(_))));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rewrite(value: serde_json::Value) -> serde_json::Value {
        let mut options: BoxOptions = serde_json::from_value(value).unwrap();
        apply(&Metadata::default(), &mut options).unwrap();
        serde_json::to_value(&options).unwrap()
    }

    #[test]
    fn test_downgrade_actions() {
        let rewritten = rewrite(json!({
            "outbounds": [
                {"type": "direct", "tag": "direct"},
                {"type": "block", "tag": "deny"},
                {"type": "dns", "tag": "dns-out"}
            ],
            "route": {"rules": [
                {"inbound": "tun-in", "action": "sniff"},
                {"type": "logical", "mode": "or", "rules": [{"port": 53}, {"protocol": "dns"}], "action": "hijack-dns"},
                {"ip_is_private": true, "outbound": "direct", "udp_connect": true},
                {"clash_mode": "Global", "action": "route-options", "udp_timeout": "5m"},
                {"action": "resolve"},
                {"network": "udp", "port": 443, "action": "reject"}
            ]}
        }));
        assert_eq!(
            rewritten["route"]["rules"],
            json!([
                {"type": "logical", "mode": "or", "rules": [{"port": [53]}, {"protocol": ["dns"]}], "outbound": "dns-out"},
                {"ip_is_private": true, "outbound": "direct"},
                {"network": ["udp"], "port": [443], "outbound": "deny"}
            ])
        );
    }

    #[test]
    fn test_reject_dropped_without_block_and_dns_stub_default() {
        let rewritten = rewrite(json!({
            "outbounds": [{"type": "direct", "tag": "direct"}],
            "route": {"rules": [
                {"protocol": "dns", "action": "hijack-dns"},
                {"port": 443, "action": "reject"}
            ]}
        }));
        assert_eq!(
            rewritten["route"]["rules"],
            json!([{"protocol": ["dns"], "outbound": "dns"}])
        );
    }

    #[test]
    fn test_dns_rules() {
        let rewritten = rewrite(json!({
            "dns": {"rules": [
                {"query_type": "HTTPS", "action": "reject"},
                {"domain": "a.com", "action": "predefined", "rcode": "NXDOMAIN"},
                {"domain": "b.com", "server": "local", "disable_cache": true}
            ]}
        }));
        assert_eq!(
            rewritten["dns"]["rules"],
            json!([{"domain": "b.com", "server": "local", "disable_cache": true}])
        );
    }
}
