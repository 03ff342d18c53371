use serde::ser::Error as _;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::inbound::DomainStrategy;
use crate::serde_helpers::{from_fields, is_false, listable, object_fields, take_keys};

pub const RULE_TYPE_DEFAULT: &str = "default";
pub const RULE_TYPE_LOGICAL: &str = "logical";

pub const PROTOCOL_DNS: &str = "dns";
pub const NETWORK_UDP: &str = "udp";

pub const ACTION_ROUTE: &str = "route";
pub const ACTION_ROUTE_OPTIONS: &str = "route-options";
pub const ACTION_REJECT: &str = "reject";
pub const ACTION_HIJACK_DNS: &str = "hijack-dns";
pub const ACTION_SNIFF: &str = "sniff";
pub const ACTION_RESOLVE: &str = "resolve";

const ROUTE_OPTION_KEYS: &[&str] = &[
    "override_address",
    "override_port",
    "network_strategy",
    "fallback_network_type",
    "fallback_delay",
    "udp_disable_domain_unmapping",
    "udp_connect",
    "udp_timeout",
    "tls_fragment",
    "tls_fragment_fallback_delay",
    "tls_record_fragment",
];
const REJECT_KEYS: &[&str] = &["method", "no_drop"];
const SNIFF_KEYS: &[&str] = &["sniffer", "timeout"];
const RESOLVE_KEYS: &[&str] = &[
    "server",
    "strategy",
    "disable_cache",
    "rewrite_ttl",
    "client_subnet",
];

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogicalMode {
    #[default]
    And,
    Or,
}

/// A route rule: a field matcher or an and/or combination of matchers, both
/// carrying the action taken on match. Rules inside inline rule-sets are
/// headless and have no action.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
pub enum Rule {
    Default(DefaultRule),
    Logical(LogicalRule),
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct DefaultRule {
    #[serde(default, deserialize_with = "listable", skip_serializing_if = "Vec::is_empty")]
    pub network: Vec<String>,
    #[serde(default, deserialize_with = "listable", skip_serializing_if = "Vec::is_empty")]
    pub protocol: Vec<String>,
    #[serde(default, deserialize_with = "listable", skip_serializing_if = "Vec::is_empty")]
    pub port: Vec<u16>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub ip_is_private: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clash_mode: Option<String>,
    #[serde(default, deserialize_with = "listable", skip_serializing_if = "Vec::is_empty")]
    pub rule_set: Vec<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub rule_set_ip_cidr_match_source: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub invert: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    #[serde(skip)]
    pub action: Option<RuleAction>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct LogicalRule {
    #[serde(default)]
    pub mode: LogicalMode,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub invert: bool,
    #[serde(skip)]
    pub action: Option<RuleAction>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RuleAction {
    Route(RouteActionOptions),
    RouteOptions(Map<String, Value>),
    Reject(RejectActionOptions),
    HijackDns,
    Sniff(SniffActionOptions),
    Resolve(ResolveActionOptions),
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct RouteActionOptions {
    pub outbound: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct RejectActionOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub no_drop: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct SniffActionOptions {
    #[serde(default, deserialize_with = "listable", skip_serializing_if = "Vec::is_empty")]
    pub sniffer: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ResolveActionOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<DomainStrategy>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RuleAction {
    pub fn route(outbound: impl Into<String>) -> Self {
        RuleAction::Route(RouteActionOptions {
            outbound: outbound.into(),
            extra: Map::new(),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            RuleAction::Route(_) => ACTION_ROUTE,
            RuleAction::RouteOptions(_) => ACTION_ROUTE_OPTIONS,
            RuleAction::Reject(_) => ACTION_REJECT,
            RuleAction::HijackDns => ACTION_HIJACK_DNS,
            RuleAction::Sniff(_) => ACTION_SNIFF,
            RuleAction::Resolve(_) => ACTION_RESOLVE,
        }
    }

    /// Outbound referenced by a route action.
    pub fn outbound(&self) -> Option<&str> {
        match self {
            RuleAction::Route(options) => Some(&options.outbound),
            _ => None,
        }
    }

    fn decode(fields: &mut Map<String, Value>) -> serde_json::Result<Option<Self>> {
        let action = match fields.remove("action") {
            Some(Value::String(action)) => action,
            Some(other) => {
                return Err(serde_json::Error::custom(format!(
                    "invalid rule action: {other}"
                )))
            }
            // legacy dialect: the outbound field alone routes
            None if fields.contains_key("outbound") => ACTION_ROUTE.to_string(),
            None => return Ok(None),
        };
        let action = match action.as_str() {
            "" | ACTION_ROUTE => {
                let mut options = take_keys(fields, ROUTE_OPTION_KEYS);
                if let Some(outbound) = fields.remove("outbound") {
                    options.insert("outbound".to_string(), outbound);
                }
                RuleAction::Route(from_fields(options)?)
            }
            ACTION_ROUTE_OPTIONS => RuleAction::RouteOptions(take_keys(fields, ROUTE_OPTION_KEYS)),
            ACTION_REJECT => RuleAction::Reject(from_fields(take_keys(fields, REJECT_KEYS))?),
            ACTION_HIJACK_DNS => RuleAction::HijackDns,
            ACTION_SNIFF => RuleAction::Sniff(from_fields(take_keys(fields, SNIFF_KEYS))?),
            ACTION_RESOLVE => RuleAction::Resolve(from_fields(take_keys(fields, RESOLVE_KEYS))?),
            _ => {
                return Err(serde_json::Error::custom(format!(
                    "unknown rule action: {action}"
                )))
            }
        };
        Ok(Some(action))
    }

    /// A route action is written as the bare `outbound` field, which both
    /// rule dialects understand.
    fn encode(&self, fields: &mut Map<String, Value>) -> serde_json::Result<()> {
        let options = match self {
            RuleAction::Route(options) => object_fields(options)?,
            RuleAction::RouteOptions(options) => options.clone(),
            RuleAction::Reject(options) => object_fields(options)?,
            RuleAction::HijackDns => Map::new(),
            RuleAction::Sniff(options) => object_fields(options)?,
            RuleAction::Resolve(options) => object_fields(options)?,
        };
        if !matches!(self, RuleAction::Route(_)) {
            fields.insert("action".to_string(), Value::from(self.name()));
        }
        fields.extend(options);
        Ok(())
    }
}

impl Rule {
    pub fn action(&self) -> Option<&RuleAction> {
        match self {
            Rule::Default(rule) => rule.action.as_ref(),
            Rule::Logical(rule) => rule.action.as_ref(),
        }
    }

    pub fn action_mut(&mut self) -> &mut Option<RuleAction> {
        match self {
            Rule::Default(rule) => &mut rule.action,
            Rule::Logical(rule) => &mut rule.action,
        }
    }

    /// True if this rule, or any rule nested in it, is a default rule matching
    /// `predicate`.
    pub fn has_default_rule(&self, predicate: &impl Fn(&DefaultRule) -> bool) -> bool {
        match self {
            Rule::Default(rule) => predicate(rule),
            Rule::Logical(rule) => rule.rules.iter().any(|rule| rule.has_default_rule(predicate)),
        }
    }
}

impl TryFrom<Map<String, Value>> for Rule {
    type Error = serde_json::Error;

    fn try_from(mut fields: Map<String, Value>) -> Result<Self, Self::Error> {
        let rule_type = match fields.remove("type") {
            Some(Value::String(rule_type)) => rule_type,
            Some(other) => {
                return Err(serde_json::Error::custom(format!("invalid rule type: {other}")))
            }
            None => String::new(),
        };
        let action = RuleAction::decode(&mut fields)?;
        match rule_type.as_str() {
            "" | RULE_TYPE_DEFAULT => {
                let mut rule: DefaultRule = from_fields(fields)?;
                rule.action = action;
                Ok(Rule::Default(rule))
            }
            RULE_TYPE_LOGICAL => {
                let mut rule: LogicalRule = from_fields(fields)?;
                rule.action = action;
                Ok(Rule::Logical(rule))
            }
            _ => Err(serde_json::Error::custom(format!(
                "unknown rule type: {rule_type}"
            ))),
        }
    }
}

impl Serialize for Rule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut fields = Map::new();
        match self {
            Rule::Default(rule) => {
                fields.extend(object_fields(rule).map_err(S::Error::custom)?);
            }
            Rule::Logical(rule) => {
                fields.insert("type".to_string(), Value::from(RULE_TYPE_LOGICAL));
                fields.extend(object_fields(rule).map_err(S::Error::custom)?);
            }
        }
        if let Some(action) = self.action() {
            action.encode(&mut fields).map_err(S::Error::custom)?;
        }
        fields.serialize(serializer)
    }
}

impl From<DefaultRule> for Rule {
    fn from(rule: DefaultRule) -> Self {
        Rule::Default(rule)
    }
}

impl From<LogicalRule> for Rule {
    fn from(rule: LogicalRule) -> Self {
        Rule::Logical(rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(value: Value) -> Rule {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_legacy_outbound_is_route_action() {
        let rule = decode(json!({"domain_suffix": [".cn"], "outbound": "direct"}));
        assert_eq!(rule.action(), Some(&RuleAction::route("direct")));
        let Rule::Default(default) = &rule else {
            panic!("expected default rule");
        };
        assert_eq!(default.extra.get("domain_suffix"), Some(&json!([".cn"])));
        assert!(!default.extra.contains_key("outbound"));
    }

    #[test]
    fn test_route_action_encodes_bare_outbound() {
        let rule = decode(json!({"action": "route", "ip_is_private": true, "outbound": "direct"}));
        assert_eq!(
            serde_json::to_value(&rule).unwrap(),
            json!({"ip_is_private": true, "outbound": "direct"})
        );
    }

    #[test]
    fn test_non_route_actions_round_trip() {
        for raw in [
            json!({"action": "sniff", "sniffer": ["tls"], "inbound": "tun-in"}),
            json!({"action": "hijack-dns", "protocol": ["dns"]}),
            json!({"action": "reject", "method": "drop", "network": ["udp"], "port": [443]}),
            json!({"action": "resolve", "strategy": "prefer_ipv4"}),
        ] {
            let rule = decode(raw.clone());
            assert_eq!(serde_json::to_value(&rule).unwrap(), raw);
        }
    }

    #[test]
    fn test_logical_rule() {
        let rule = decode(json!({
            "type": "logical",
            "mode": "or",
            "rules": [{"network": "udp", "port": 53}, {"protocol": "dns"}],
            "action": "hijack-dns"
        }));
        let Rule::Logical(logical) = &rule else {
            panic!("expected logical rule");
        };
        assert_eq!(logical.mode, LogicalMode::Or);
        assert_eq!(logical.rules.len(), 2);
        assert!(logical.rules.iter().all(|rule| rule.action().is_none()));
        assert!(rule.has_default_rule(&|rule| rule.port == vec![53]));
        assert_eq!(
            serde_json::to_value(&rule).unwrap(),
            json!({
                "type": "logical",
                "mode": "or",
                "rules": [{"network": ["udp"], "port": [53]}, {"protocol": ["dns"]}],
                "action": "hijack-dns"
            })
        );
    }

    #[test]
    fn test_headless_rule_has_no_action() {
        let rule = decode(json!({"domain": ["example.com"]}));
        assert_eq!(rule.action(), None);
    }

    #[test]
    fn test_unknown_action_or_type_rejected() {
        assert!(serde_json::from_value::<Rule>(json!({"action": "teleport"})).is_err());
        assert!(serde_json::from_value::<Rule>(json!({"type": "xor", "rules": []})).is_err());
    }
}
