use serde::ser::Error as _;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::rule::Rule;
use crate::serde_helpers::{from_fields, is_false, object_fields};

pub const RULE_SET_TYPE_INLINE: &str = "inline";
pub const RULE_SET_TYPE_LOCAL: &str = "local";
pub const RULE_SET_TYPE_REMOTE: &str = "remote";

pub const RULE_SET_FORMAT_SOURCE: &str = "source";
pub const RULE_SET_FORMAT_BINARY: &str = "binary";

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct RouteOptions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<Rule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rule_set: Vec<RuleSet>,
    #[serde(default, rename = "final", skip_serializing_if = "Option::is_none")]
    pub final_outbound: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub auto_detect_interface: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RouteOptions {
    /// Appends rule sets whose tag is not declared yet. The first declaration
    /// of a tag wins.
    pub fn add_rule_sets(&mut self, rule_sets: impl IntoIterator<Item = RuleSet>) {
        for rule_set in rule_sets {
            if self.rule_set.iter().any(|it| it.tag == rule_set.tag) {
                tracing::debug!(tag = %rule_set.tag, "skip duplicate rule-set");
                continue;
            }
            self.rule_set.push(rule_set);
        }
    }
}

/// Engine rule-set declaration.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(try_from = "RawRuleSet")]
pub struct RuleSet {
    pub tag: String,
    pub options: RuleSetOptions,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RuleSetOptions {
    Inline(InlineRuleSet),
    Local(LocalRuleSet),
    Remote(RemoteRuleSet),
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct InlineRuleSet {
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct LocalRuleSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    pub path: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct RemoteRuleSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_detour: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_interval: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RuleSet {
    /// A remote binary rule-set.
    pub fn remote(tag: impl Into<String>, url: String, download_detour: Option<String>) -> Self {
        RuleSet {
            tag: tag.into(),
            options: RuleSetOptions::Remote(RemoteRuleSet {
                format: Some(RULE_SET_FORMAT_BINARY.to_string()),
                url,
                download_detour,
                ..Default::default()
            }),
        }
    }

    pub fn rule_set_type(&self) -> &'static str {
        match self.options {
            RuleSetOptions::Inline(_) => RULE_SET_TYPE_INLINE,
            RuleSetOptions::Local(_) => RULE_SET_TYPE_LOCAL,
            RuleSetOptions::Remote(_) => RULE_SET_TYPE_REMOTE,
        }
    }

    pub fn inline_rules(&self) -> Option<&[Rule]> {
        match &self.options {
            RuleSetOptions::Inline(options) => Some(&options.rules),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
struct RawRuleSet {
    #[serde(rename = "type", default)]
    rule_set_type: String,
    tag: String,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

#[derive(Serialize)]
struct RawRuleSetRef<'a> {
    #[serde(rename = "type")]
    rule_set_type: &'a str,
    tag: &'a str,
    #[serde(flatten)]
    fields: &'a Map<String, Value>,
}

impl TryFrom<RawRuleSet> for RuleSet {
    type Error = serde_json::Error;

    fn try_from(raw: RawRuleSet) -> Result<Self, Self::Error> {
        let options = match raw.rule_set_type.as_str() {
            RULE_SET_TYPE_INLINE => RuleSetOptions::Inline(from_fields(raw.fields)?),
            "" | RULE_SET_TYPE_LOCAL => RuleSetOptions::Local(from_fields(raw.fields)?),
            RULE_SET_TYPE_REMOTE => RuleSetOptions::Remote(from_fields(raw.fields)?),
            other => {
                return Err(serde_json::Error::custom(format!(
                    "unknown rule-set type: {other}"
                )))
            }
        };
        Ok(RuleSet {
            tag: raw.tag,
            options,
        })
    }
}

impl Serialize for RuleSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let fields = match &self.options {
            RuleSetOptions::Inline(options) => object_fields(options),
            RuleSetOptions::Local(options) => object_fields(options),
            RuleSetOptions::Remote(options) => object_fields(options),
        }
        .map_err(S::Error::custom)?;
        RawRuleSetRef {
            rule_set_type: self.rule_set_type(),
            tag: &self.tag,
            fields: &fields,
        }
        .serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_rule_sets() {
        let rule_sets: Vec<RuleSet> = serde_json::from_value(json!([
            {"type": "inline", "tag": "ads", "rules": [{"domain_suffix": ["ads.com"]}]},
            {"type": "local", "tag": "lan", "format": "source", "path": "lan.json"},
            {"type": "remote", "tag": "geoip-cn", "format": "binary", "url": "https://x/geoip-cn.srs", "download_detour": "direct"},
        ]))
        .unwrap();
        assert_eq!(rule_sets[0].inline_rules().unwrap().len(), 1);
        assert_eq!(rule_sets[1].rule_set_type(), RULE_SET_TYPE_LOCAL);
        let RuleSetOptions::Remote(remote) = &rule_sets[2].options else {
            panic!("expected remote rule-set");
        };
        assert_eq!(remote.download_detour.as_deref(), Some("direct"));
    }

    #[test]
    fn test_encode_remote() {
        let rule_set = RuleSet::remote("geoip-cn", "https://x/geoip-cn.srs".to_string(), None);
        assert_eq!(
            serde_json::to_value(&rule_set).unwrap(),
            json!({"type": "remote", "tag": "geoip-cn", "format": "binary", "url": "https://x/geoip-cn.srs"})
        );
    }

    #[test]
    fn test_add_rule_sets_keeps_first_declaration() {
        let mut route = RouteOptions::default();
        route.add_rule_sets([
            RuleSet::remote("a", "https://first".to_string(), None),
            RuleSet::remote("b", "https://b".to_string(), None),
            RuleSet::remote("a", "https://second".to_string(), None),
        ]);
        assert_eq!(route.rule_set.len(), 2);
        let RuleSetOptions::Remote(remote) = &route.rule_set[0].options else {
            panic!("expected remote rule-set");
        };
        assert_eq!(remote.url, "https://first");
    }
}
