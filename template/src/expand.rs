//! Inlining of inline rule-sets into the rules that reference them.

use anyhow::{Context, Result};
use config::dns::DnsRule;
use config::merge::{merge_into, ListMerge};
use config::route::RuleSet;
use config::rule::Rule;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A rule that can reference rule-sets: route rules and DNS rules.
pub trait ExpandableRule: Clone + Serialize + DeserializeOwned {
    /// Used in error context, e.g. `expand dns rule[2]`.
    const KIND: &'static str;

    /// Rule-set tags of a default rule, `None` for logical rules.
    fn rule_set_mut(&mut self) -> Option<&mut Vec<String>>;

    /// Children of a logical rule, `None` for default rules.
    fn logical_rules_mut(&mut self) -> Option<&mut Vec<Self>>;
}

impl ExpandableRule for Rule {
    const KIND: &'static str = "rule";

    fn rule_set_mut(&mut self) -> Option<&mut Vec<String>> {
        match self {
            Rule::Default(rule) => Some(&mut rule.rule_set),
            Rule::Logical(_) => None,
        }
    }

    fn logical_rules_mut(&mut self) -> Option<&mut Vec<Self>> {
        match self {
            Rule::Default(_) => None,
            Rule::Logical(rule) => Some(&mut rule.rules),
        }
    }
}

impl ExpandableRule for DnsRule {
    const KIND: &'static str = "dns rule";

    fn rule_set_mut(&mut self) -> Option<&mut Vec<String>> {
        match self {
            DnsRule::Default(rule) => Some(&mut rule.rule_set),
            DnsRule::Logical(_) => None,
        }
    }

    fn logical_rules_mut(&mut self) -> Option<&mut Vec<Self>> {
        match self {
            DnsRule::Default(_) => None,
            DnsRule::Logical(rule) => Some(&mut rule.rules),
        }
    }
}

/// Replaces the reference to the inline rule-set `tag` in `rule` by one copy
/// of the rule per literal rule of the set, each copy merged with its
/// literal. Lists are appended, the rule's own items first. Logical rules
/// keep their mode and action and get their children expanded.
pub fn expand<R: ExpandableRule>(tag: &str, literals: &[Rule], rule: &R) -> Result<Vec<R>> {
    let mut rule = rule.clone();
    if let Some(children) = rule.logical_rules_mut() {
        let mut expanded = Vec::with_capacity(children.len());
        for child in children.iter() {
            expanded.extend(expand(tag, literals, child)?);
        }
        *children = expanded;
        return Ok(vec![rule]);
    }
    match rule.rule_set_mut() {
        Some(rule_set) if rule_set.iter().any(|it| it == tag) => {
            rule_set.retain(|it| it != tag);
        }
        _ => return Ok(vec![rule]),
    }
    let mut expanded = Vec::with_capacity(literals.len());
    for (i, literal) in literals.iter().enumerate() {
        let overlay = serde_json::to_value(literal)
            .with_context(|| format!("marshal inline rule {tag}[{i}]"))?;
        let merged = merge_into(&rule, &overlay, ListMerge::Append)
            .with_context(|| format!("inline rule {tag}[{i}]"))?;
        expanded.push(merged);
    }
    Ok(expanded)
}

/// Expands `rules` against every inline rule-set in declaration order. Each
/// set sees the output of the previous one.
pub fn expand_all<R: ExpandableRule>(rule_sets: &[RuleSet], mut rules: Vec<R>) -> Result<Vec<R>> {
    for rule_set in rule_sets {
        let Some(literals) = rule_set.inline_rules() else {
            continue;
        };
        let mut expanded = Vec::with_capacity(rules.len());
        for (i, rule) in rules.iter().enumerate() {
            expanded.extend(
                expand(&rule_set.tag, literals, rule)
                    .with_context(|| format!("expand {}[{i}]", R::KIND))?,
            );
        }
        tracing::debug!(
            tag = %rule_set.tag,
            before = rules.len(),
            after = expanded.len(),
            "expand inline rule-set"
        );
        rules = expanded;
    }
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::dns::DnsRuleAction;
    use config::rule::RuleAction;
    use serde_json::{json, Value};

    fn rules<R: DeserializeOwned>(value: Value) -> Vec<R> {
        serde_json::from_value(value).unwrap()
    }

    fn encode<R: Serialize>(rules: &[R]) -> Value {
        serde_json::to_value(rules).unwrap()
    }

    #[test]
    fn test_each_literal_becomes_a_rule() {
        let literals: Vec<Rule> = rules(json!([
            {"domain": ["a.com"]},
            {"domain_suffix": [".b.com"], "network": "tcp"},
            {"ip_cidr": ["10.0.0.0/8"]},
        ]));
        let rule: Rule = serde_json::from_value(
            json!({"rule_set": ["ads", "geosite-cn"], "network": ["udp"], "outbound": "block"}),
        )
        .unwrap();
        let expanded = expand("ads", &literals, &rule).unwrap();
        assert_eq!(expanded.len(), 3);
        assert!(expanded
            .iter()
            .all(|it| it.action() == Some(&RuleAction::route("block"))));
        assert_eq!(
            encode(&expanded),
            json!([
                {"network": ["udp"], "rule_set": ["geosite-cn"], "domain": ["a.com"], "outbound": "block"},
                {"network": ["udp", "tcp"], "rule_set": ["geosite-cn"], "domain_suffix": [".b.com"], "outbound": "block"},
                {"network": ["udp"], "rule_set": ["geosite-cn"], "ip_cidr": ["10.0.0.0/8"], "outbound": "block"},
            ])
        );
    }

    #[test]
    fn test_rule_without_reference_is_unchanged() {
        let literals: Vec<Rule> = rules(json!([{"domain": ["a.com"]}]));
        let rule: Rule =
            serde_json::from_value(json!({"rule_set": "other", "outbound": "direct"})).unwrap();
        assert_eq!(expand("ads", &literals, &rule).unwrap(), vec![rule]);
    }

    #[test]
    fn test_logical_children_are_flattened() {
        let literals: Vec<Rule> = rules(json!([{"domain": ["a.com"]}, {"domain": ["b.com"]}]));
        let rule: Rule = serde_json::from_value(json!({
            "type": "logical",
            "mode": "and",
            "rules": [{"rule_set": "ads"}, {"port": 443}],
            "outbound": "block"
        }))
        .unwrap();
        let expanded = expand("ads", &literals, &rule).unwrap();
        assert_eq!(
            encode(&expanded),
            json!([{
                "type": "logical",
                "mode": "and",
                "rules": [{"domain": ["a.com"]}, {"domain": ["b.com"]}, {"port": [443]}],
                "outbound": "block"
            }])
        );
    }

    #[test]
    fn test_dns_rules_keep_server() {
        let literals: Vec<Rule> = rules(json!([{"domain": ["a.com"]}, {"domain": ["b.com"]}]));
        let rule: DnsRule =
            serde_json::from_value(json!({"rule_set": "ads", "server": "local"})).unwrap();
        let expanded = expand("ads", &literals, &rule).unwrap();
        assert_eq!(expanded.len(), 2);
        assert!(expanded
            .iter()
            .all(|it| it.action() == Some(&DnsRuleAction::route("local"))));
    }

    #[test]
    fn test_expand_all_compounds() {
        let rule_sets: Vec<RuleSet> = rules(json!([
            {"type": "inline", "tag": "a", "rules": [{"domain": ["a1.com"]}, {"domain": ["a2.com"]}]},
            {"type": "remote", "tag": "geoip-cn", "format": "binary", "url": "https://x/geoip-cn.srs"},
            {"type": "inline", "tag": "b", "rules": [{"port": 80}, {"port": 443}]},
        ]));
        let input: Vec<Rule> = rules(json!([
            {"rule_set": ["a", "b"], "outbound": "proxy"},
            {"rule_set": "geoip-cn", "outbound": "direct"},
        ]));
        let expanded = expand_all(&rule_sets, input).unwrap();
        assert_eq!(expanded.len(), 5);
        assert_eq!(
            encode(&expanded[..4]),
            json!([
                {"port": [80], "domain": ["a1.com"], "outbound": "proxy"},
                {"port": [443], "domain": ["a1.com"], "outbound": "proxy"},
                {"port": [80], "domain": ["a2.com"], "outbound": "proxy"},
                {"port": [443], "domain": ["a2.com"], "outbound": "proxy"},
            ])
        );
        assert_eq!(encode(&expanded[4..]), json!([{"rule_set": ["geoip-cn"], "outbound": "direct"}]));
    }

    #[test]
    fn test_merge_failure_names_position() {
        let rule_sets: Vec<RuleSet> = rules(json!([
            {"type": "inline", "tag": "bad", "rules": [{"domain": ["ok.com"]}, {"geoip": [1]}]},
        ]));
        let input: Vec<DnsRule> = rules(json!([
            {"domain": "x.com", "server": "local"},
            {"rule_set": "bad", "server": "local"},
        ]));
        let err = expand_all(&rule_sets, input).unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("expand dns rule[1]"), "{message}");
        assert!(message.contains("inline rule bad[1]"), "{message}");
    }
}
