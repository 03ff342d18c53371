use serde::ser::Error as _;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::rule::{LogicalMode, ACTION_REJECT, ACTION_ROUTE, ACTION_ROUTE_OPTIONS, RULE_TYPE_DEFAULT, RULE_TYPE_LOGICAL};
use crate::serde_helpers::{from_fields, is_false, listable, object_fields, take_keys};

pub const ACTION_PREDEFINED: &str = "predefined";

const ROUTE_OPTION_KEYS: &[&str] = &["disable_cache", "rewrite_ttl", "client_subnet"];
const REJECT_KEYS: &[&str] = &["method", "no_drop"];
const PREDEFINED_KEYS: &[&str] = &["rcode", "answer", "ns", "extra"];

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct DnsOptions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub servers: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<DnsRule>,
    #[serde(default, rename = "final", skip_serializing_if = "Option::is_none")]
    pub final_server: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
pub enum DnsRule {
    Default(DefaultDnsRule),
    Logical(LogicalDnsRule),
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct DefaultDnsRule {
    #[serde(default, deserialize_with = "listable", skip_serializing_if = "Vec::is_empty")]
    pub geoip: Vec<String>,
    #[serde(default, deserialize_with = "listable", skip_serializing_if = "Vec::is_empty")]
    pub ip_cidr: Vec<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub ip_is_private: bool,
    #[serde(default, deserialize_with = "listable", skip_serializing_if = "Vec::is_empty")]
    pub rule_set: Vec<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub rule_set_ip_cidr_match_source: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub rule_set_ip_cidr_accept_empty: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub invert: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    #[serde(skip)]
    pub action: Option<DnsRuleAction>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct LogicalDnsRule {
    #[serde(default)]
    pub mode: LogicalMode,
    #[serde(default)]
    pub rules: Vec<DnsRule>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub invert: bool,
    #[serde(skip)]
    pub action: Option<DnsRuleAction>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DnsRuleAction {
    Route(DnsRouteActionOptions),
    RouteOptions(Map<String, Value>),
    Reject(Map<String, Value>),
    Predefined(Map<String, Value>),
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct DnsRouteActionOptions {
    pub server: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DnsRuleAction {
    pub fn route(server: impl Into<String>) -> Self {
        DnsRuleAction::Route(DnsRouteActionOptions {
            server: server.into(),
            extra: Map::new(),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            DnsRuleAction::Route(_) => ACTION_ROUTE,
            DnsRuleAction::RouteOptions(_) => ACTION_ROUTE_OPTIONS,
            DnsRuleAction::Reject(_) => ACTION_REJECT,
            DnsRuleAction::Predefined(_) => ACTION_PREDEFINED,
        }
    }

    fn decode(fields: &mut Map<String, Value>) -> serde_json::Result<Option<Self>> {
        let action = match fields.remove("action") {
            Some(Value::String(action)) => action,
            Some(other) => {
                return Err(serde_json::Error::custom(format!(
                    "invalid dns rule action: {other}"
                )))
            }
            None if fields.contains_key("server") => ACTION_ROUTE.to_string(),
            None => return Ok(None),
        };
        let action = match action.as_str() {
            "" | ACTION_ROUTE => {
                let mut options = take_keys(fields, ROUTE_OPTION_KEYS);
                for key in ["server", "strategy"] {
                    if let Some(value) = fields.remove(key) {
                        options.insert(key.to_string(), value);
                    }
                }
                DnsRuleAction::Route(from_fields(options)?)
            }
            ACTION_ROUTE_OPTIONS => DnsRuleAction::RouteOptions(take_keys(fields, ROUTE_OPTION_KEYS)),
            ACTION_REJECT => DnsRuleAction::Reject(take_keys(fields, REJECT_KEYS)),
            ACTION_PREDEFINED => DnsRuleAction::Predefined(take_keys(fields, PREDEFINED_KEYS)),
            _ => {
                return Err(serde_json::Error::custom(format!(
                    "unknown dns rule action: {action}"
                )))
            }
        };
        Ok(Some(action))
    }

    fn encode(&self, fields: &mut Map<String, Value>) -> serde_json::Result<()> {
        let options = match self {
            DnsRuleAction::Route(options) => object_fields(options)?,
            DnsRuleAction::RouteOptions(options)
            | DnsRuleAction::Reject(options)
            | DnsRuleAction::Predefined(options) => options.clone(),
        };
        if !matches!(self, DnsRuleAction::Route(_)) {
            fields.insert("action".to_string(), Value::from(self.name()));
        }
        fields.extend(options);
        Ok(())
    }
}

impl DnsRule {
    pub fn action(&self) -> Option<&DnsRuleAction> {
        match self {
            DnsRule::Default(rule) => rule.action.as_ref(),
            DnsRule::Logical(rule) => rule.action.as_ref(),
        }
    }

    pub fn has_default_rule(&self, predicate: &impl Fn(&DefaultDnsRule) -> bool) -> bool {
        match self {
            DnsRule::Default(rule) => predicate(rule),
            DnsRule::Logical(rule) => rule.rules.iter().any(|rule| rule.has_default_rule(predicate)),
        }
    }
}

impl TryFrom<Map<String, Value>> for DnsRule {
    type Error = serde_json::Error;

    fn try_from(mut fields: Map<String, Value>) -> Result<Self, Self::Error> {
        let rule_type = match fields.remove("type") {
            Some(Value::String(rule_type)) => rule_type,
            Some(other) => {
                return Err(serde_json::Error::custom(format!(
                    "invalid dns rule type: {other}"
                )))
            }
            None => String::new(),
        };
        let action = DnsRuleAction::decode(&mut fields)?;
        match rule_type.as_str() {
            "" | RULE_TYPE_DEFAULT => {
                let mut rule: DefaultDnsRule = from_fields(fields)?;
                rule.action = action;
                Ok(DnsRule::Default(rule))
            }
            RULE_TYPE_LOGICAL => {
                let mut rule: LogicalDnsRule = from_fields(fields)?;
                rule.action = action;
                Ok(DnsRule::Logical(rule))
            }
            _ => Err(serde_json::Error::custom(format!(
                "unknown dns rule type: {rule_type}"
            ))),
        }
    }
}

impl Serialize for DnsRule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut fields = Map::new();
        match self {
            DnsRule::Default(rule) => {
                fields.extend(object_fields(rule).map_err(S::Error::custom)?);
            }
            DnsRule::Logical(rule) => {
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_legacy_server_field_routes() {
        let rule: DnsRule =
            serde_json::from_value(json!({"outbound": "any", "server": "local"})).unwrap();
        assert_eq!(rule.action(), Some(&DnsRuleAction::route("local")));
        // `outbound` is a matcher on dns rules
        let DnsRule::Default(default) = &rule else {
            panic!("expected default rule");
        };
        assert_eq!(default.extra.get("outbound"), Some(&json!("any")));
    }

    #[test]
    fn test_dns_rule_round_trip() {
        for raw in [
            json!({"rule_set": ["geosite-cn"], "server": "local", "disable_cache": true}),
            json!({"query_type": ["HTTPS"], "action": "reject"}),
            json!({"type": "logical", "mode": "and", "rules": [{"geoip": ["cn"]}, {"ip_is_private": true}], "server": "local"}),
        ] {
            let rule: DnsRule = serde_json::from_value(raw.clone()).unwrap();
            assert_eq!(serde_json::to_value(&rule).unwrap(), raw);
        }
    }

    #[test]
    fn test_has_default_rule_recurses() {
        let rule: DnsRule = serde_json::from_value(json!({
            "type": "logical", "mode": "or",
            "rules": [{"domain": "a.com"}, {"ip_cidr": "10.0.0.0/8"}],
            "server": "remote"
        }))
        .unwrap();
        assert!(rule.has_default_rule(&|rule| !rule.ip_cidr.is_empty()));
        assert!(!rule.has_default_rule(&|rule| rule.ip_is_private));
    }
}
