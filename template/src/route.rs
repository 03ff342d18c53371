use anyhow::Result;
use config::rule::{
    DefaultRule, LogicalMode, LogicalRule, RejectActionOptions, ResolveActionOptions, Rule,
    RuleAction, SniffActionOptions, NETWORK_UDP, PROTOCOL_DNS,
};
use config::template::DNS_TAG;
use config::{BoxOptions, Metadata};

use crate::geo_resources::{GEOIP_CN, GEOSITE_CN, GEOSITE_NOT_CN};
use crate::Template;

fn rule(matcher: DefaultRule, action: RuleAction) -> Rule {
    Rule::Default(DefaultRule {
        action: Some(action),
        ..matcher
    })
}

fn logical(mode: LogicalMode, rules: Vec<DefaultRule>, action: RuleAction) -> Rule {
    Rule::Logical(LogicalRule {
        mode,
        rules: rules.into_iter().map(Rule::Default).collect(),
        invert: false,
        action: Some(action),
    })
}

fn udp_port(port: u16) -> DefaultRule {
    DefaultRule {
        network: vec![NETWORK_UDP.to_string()],
        port: vec![port],
        ..Default::default()
    }
}

fn dns_traffic(action: RuleAction) -> Rule {
    logical(
        LogicalMode::Or,
        vec![
            udp_port(53),
            DefaultRule {
                protocol: vec![PROTOCOL_DNS.to_string()],
                ..Default::default()
            },
        ],
        action,
    )
}

fn rule_set(tag: &str, invert: bool) -> DefaultRule {
    DefaultRule {
        rule_set: vec![tag.to_string()],
        invert,
        ..Default::default()
    }
}

impl Template {
    /// Declares rule-sets and replaces the route rules with the template's
    /// rule list.
    pub(crate) fn render_route(&self, metadata: &Metadata, options: &mut BoxOptions) -> Result<()> {
        let template = &self.options;
        let route = options.route_mut();
        if route.rule_set.is_empty() {
            route.rule_set = self.render_rule_sets(&template.custom_rule_set);
        }
        if !template.disable_traffic_bypass {
            self.render_geo_resources(route);
        }

        let direct_tag = template.direct_tag();
        let disable_rule_action = self.disable_rule_action(metadata);
        let mut rules = Vec::new();
        if disable_rule_action {
            rules.push(dns_traffic(RuleAction::route(DNS_TAG)));
        } else {
            if !template.disable_sniff {
                rules.push(rule(
                    DefaultRule::default(),
                    RuleAction::Sniff(SniffActionOptions::default()),
                ));
            }
            rules.push(dns_traffic(RuleAction::HijackDns));
        }
        rules.push(rule(
            DefaultRule {
                ip_is_private: true,
                ..Default::default()
            },
            RuleAction::route(direct_tag),
        ));
        if !template.disable_clash_mode {
            for (mode, outbound) in [
                (template.clash_mode_global(), template.default_tag()),
                (template.clash_mode_direct(), direct_tag),
            ] {
                rules.push(rule(
                    DefaultRule {
                        clash_mode: Some(mode.to_string()),
                        ..Default::default()
                    },
                    RuleAction::route(outbound),
                ));
            }
        }
        if !disable_rule_action {
            rules.push(rule(
                DefaultRule::default(),
                RuleAction::Resolve(ResolveActionOptions::default()),
            ));
        }
        rules.extend(template.pre_rules.iter().cloned());
        if !template.custom_rules.is_empty() {
            rules.extend(template.custom_rules.iter().cloned());
        } else if !template.disable_traffic_bypass {
            rules.push(rule(rule_set(GEOSITE_CN, false), RuleAction::route(direct_tag)));
            rules.push(logical(
                LogicalMode::And,
                vec![rule_set(GEOIP_CN, false), rule_set(GEOSITE_NOT_CN, true)],
                RuleAction::route(direct_tag),
            ));
        }
        if !template.disable_traffic_bypass && !template.disable_default_rules {
            let block = if disable_rule_action {
                RuleAction::route(template.block_tag())
            } else {
                RuleAction::Reject(RejectActionOptions::default())
            };
            rules.push(logical(LogicalMode::Or, vec![udp_port(443)], block));
        }

        tracing::debug!(
            rules = rules.len(),
            rule_sets = route.rule_set.len(),
            disable_rule_action,
            "render route"
        );
        route.rules = rules;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{Platform, Version};
    use serde_json::{json, Value};

    fn render(template: Value, metadata: Metadata) -> BoxOptions {
        let template = Template::new(serde_json::from_value(template).unwrap()).unwrap();
        let mut options = BoxOptions::default();
        template.render_route(&metadata, &mut options).unwrap();
        options
    }

    fn rules(options: &BoxOptions) -> Value {
        serde_json::to_value(&options.route.as_ref().unwrap().rules).unwrap()
    }

    #[test]
    fn test_modern_rules() {
        let options = render(json!({"name": "t"}), Metadata::default());
        assert_eq!(
            rules(&options),
            json!([
                {"action": "sniff"},
                {"type": "logical", "mode": "or", "rules": [
                    {"network": ["udp"], "port": [53]},
                    {"protocol": ["dns"]}
                ], "action": "hijack-dns"},
                {"ip_is_private": true, "outbound": "direct"},
                {"clash_mode": "Global", "outbound": "default"},
                {"clash_mode": "Direct", "outbound": "direct"},
                {"action": "resolve"},
                {"rule_set": ["geosite-geolocation-cn"], "outbound": "direct"},
                {"type": "logical", "mode": "and", "rules": [
                    {"rule_set": ["geoip-cn"]},
                    {"rule_set": ["geosite-geolocation-!cn"], "invert": true}
                ], "outbound": "direct"},
                {"type": "logical", "mode": "or", "rules": [
                    {"network": ["udp"], "port": [443]}
                ], "action": "reject"}
            ])
        );
        let route = options.route.unwrap();
        let tags: Vec<_> = route.rule_set.iter().map(|it| it.tag.as_str()).collect();
        assert_eq!(tags, ["geoip-cn", "geosite-geolocation-cn", "geosite-geolocation-!cn"]);
    }

    #[test]
    fn test_legacy_rules() {
        let metadata = Metadata::new(Some(Version::new(1, 10, 0)), Platform::Unknown);
        let options = render(
            json!({"name": "t", "block_tag": "deny", "clash_mode_global": "Proxy"}),
            metadata,
        );
        let rules = rules(&options);
        assert_eq!(
            rules[0],
            json!({"type": "logical", "mode": "or", "rules": [
                {"network": ["udp"], "port": [53]},
                {"protocol": ["dns"]}
            ], "outbound": "dns"})
        );
        assert_eq!(rules[2], json!({"clash_mode": "Proxy", "outbound": "default"}));
        assert!(rules
            .as_array()
            .unwrap()
            .iter()
            .all(|it| it.get("action").is_none()));
        assert_eq!(rules[6]["outbound"], json!("deny"));
    }

    #[test]
    fn test_bypass_disabled_with_custom_rules() {
        let options = render(
            json!({
                "name": "t",
                "disable_traffic_bypass": true,
                "disable_clash_mode": true,
                "disable_sniff": true,
                "pre_rules": [{"domain_suffix": "corp.example", "outbound": "direct"}],
                "custom_rules": [{"rule_set": "geosite-openai", "outbound": "US"}],
                "custom_rule_set": [{"type": "local", "tag": "lan", "path": "lan.srs", "format": "binary"}]
            }),
            Metadata::default(),
        );
        assert_eq!(
            rules(&options),
            json!([
                {"type": "logical", "mode": "or", "rules": [
                    {"network": ["udp"], "port": [53]},
                    {"protocol": ["dns"]}
                ], "action": "hijack-dns"},
                {"ip_is_private": true, "outbound": "direct"},
                {"action": "resolve"},
                {"domain_suffix": "corp.example", "outbound": "direct"},
                {"rule_set": ["geosite-openai"], "outbound": "US"}
            ])
        );
        let route = options.route.unwrap();
        assert_eq!(route.rule_set.len(), 1);
        assert_eq!(route.rule_set[0].tag, "lan");
    }

    #[test]
    fn test_default_rules_disabled() {
        let options = render(
            json!({"name": "t", "disable_default_rules": true, "direct_tag": "DIRECT"}),
            Metadata::default(),
        );
        let rules = rules(&options);
        let last = rules.as_array().unwrap().last().unwrap();
        assert_eq!(last["outbound"], json!("DIRECT"));
        assert_eq!(last["type"], json!("logical"));
    }

    #[test]
    fn test_existing_rule_sets_are_kept() {
        let template = Template::new(
            serde_json::from_value(json!({
                "name": "t",
                "custom_rule_set": [{"type": "local", "tag": "lan", "path": "lan.srs"}]
            }))
            .unwrap(),
        )
        .unwrap();
        let mut options: BoxOptions = serde_json::from_value(json!({
            "route": {
                "rules": [{"domain": "stale.example", "outbound": "direct"}],
                "rule_set": [{"type": "remote", "tag": "geoip-cn", "url": "https://mirror.example/geoip-cn.srs"}],
                "final": "default"
            }
        }))
        .unwrap();
        template
            .render_route(&Metadata::default(), &mut options)
            .unwrap();
        let route = options.route.unwrap();
        assert_eq!(route.final_outbound.as_deref(), Some("default"));
        let tags: Vec<_> = route.rule_set.iter().map(|it| it.tag.as_str()).collect();
        assert_eq!(tags, ["geoip-cn"]);
        let rendered = serde_json::to_value(&route.rule_set[0]).unwrap();
        assert_eq!(rendered["url"], json!("https://mirror.example/geoip-cn.srs"));
        assert!(!serde_json::to_string(&route.rules).unwrap().contains("stale.example"));
    }
}
