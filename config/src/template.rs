use serde::ser::Error as _;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::dns::DnsOptions;
use crate::inbound::{DomainStrategy, Inbound};
use crate::outbound::{DirectOutboundOptions, SelectorOutboundOptions, URLTestOutboundOptions};
use crate::route::RuleSet;
use crate::rule::Rule;
use crate::serde_helpers::{from_fields, is_false, listable, object_fields};

pub const DEFAULT_DIRECT_TAG: &str = "direct";
pub const DEFAULT_DEFAULT_TAG: &str = "default";
pub const DEFAULT_BLOCK_TAG: &str = "block";
pub const DEFAULT_URLTEST_TAG: &str = "URLTest";
pub const DNS_TAG: &str = "dns";
pub const DEFAULT_MIXED_PORT: u16 = 8080;
pub const DEFAULT_CLASH_MODE_GLOBAL: &str = "Global";
pub const DEFAULT_CLASH_MODE_DIRECT: &str = "Direct";

pub const RULE_SET_TYPE_GITHUB: &str = "github";

/// Declarative policy a configuration is generated from.
///
/// Every field is skipped when it holds its default, so a serialized template
/// only carries what its author set. Template inheritance relies on this.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TemplateOptions {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extend: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<DnsOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_strategy: Option<DomainStrategy>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub remote_resolve: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub disable_traffic_bypass: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub disable_sniff: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub disable_rule_action: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub enable_fakeip: bool,

    // inbounds
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inbounds: Vec<Inbound>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub auto_redirect: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub disable_tun: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub disable_system_proxy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_tun: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_mixed: Option<Value>,

    // outbounds
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_groups: Vec<ExtraGroupOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urltest_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_direct: Option<DirectOutboundOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_selector: Option<SelectorOutboundOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_urltest: Option<URLTestOutboundOptions>,

    // route
    #[serde(default, skip_serializing_if = "is_false")]
    pub disable_default_rules: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_rules: Vec<Rule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_rules: Vec<Rule>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub enable_jsdelivr: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_rule_set: Vec<TemplateRuleSet>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_rule_set: Vec<TemplateRuleSet>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub disable_clash_mode: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clash_mode_global: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clash_mode_direct: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experimental: Option<Value>,
}

impl TemplateOptions {
    pub fn disable_ipv6(&self) -> bool {
        self.domain_strategy == Some(DomainStrategy::Ipv4Only)
    }

    pub fn direct_tag(&self) -> &str {
        self.direct_tag.as_deref().unwrap_or(DEFAULT_DIRECT_TAG)
    }

    pub fn default_tag(&self) -> &str {
        self.default_tag.as_deref().unwrap_or(DEFAULT_DEFAULT_TAG)
    }

    pub fn block_tag(&self) -> &str {
        self.block_tag.as_deref().unwrap_or(DEFAULT_BLOCK_TAG)
    }

    pub fn urltest_tag(&self) -> &str {
        self.urltest_tag.as_deref().unwrap_or(DEFAULT_URLTEST_TAG)
    }

    pub fn clash_mode_global(&self) -> &str {
        self.clash_mode_global
            .as_deref()
            .unwrap_or(DEFAULT_CLASH_MODE_GLOBAL)
    }

    pub fn clash_mode_direct(&self) -> &str {
        self.clash_mode_direct
            .as_deref()
            .unwrap_or(DEFAULT_CLASH_MODE_DIRECT)
    }

    /// Listen port of the local mixed inbound, honouring `custom_mixed`.
    pub fn mixed_port(&self) -> u16 {
        self.custom_mixed
            .as_ref()
            .and_then(|it| it.get("listen_port"))
            .and_then(Value::as_u64)
            .and_then(|port| u16::try_from(port).ok())
            .filter(|port| *port != 0)
            .unwrap_or(DEFAULT_MIXED_PORT)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExtraGroupType {
    Selector,
    #[serde(rename = "urltest")]
    URLTest,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExtraGroupTarget {
    #[default]
    Default,
    Global,
    Subscription,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ExtraGroupOptions {
    pub tag: String,
    #[serde(rename = "type")]
    pub group_type: ExtraGroupType,
    #[serde(default)]
    pub target: ExtraGroupTarget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_per_subscription: Option<String>,
    #[serde(default, deserialize_with = "listable", skip_serializing_if = "Vec::is_empty")]
    pub filter: Vec<String>,
    #[serde(default, deserialize_with = "listable", skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_selector: Option<SelectorOutboundOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_urltest: Option<URLTestOutboundOptions>,
}

/// A rule-set as written in a template: an engine rule-set, or a shorthand
/// for binary rule-sets hosted in a GitHub repository.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
pub enum TemplateRuleSet {
    Default(RuleSet),
    GitHub(GitHubRuleSet),
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GitHubRuleSet {
    /// `owner/name`
    pub repository: String,
    /// Branch followed by the directory holding the `.srs` files,
    /// e.g. `rule-set/`.
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prefix: String,
    #[serde(default, deserialize_with = "listable")]
    pub rule_set: Vec<String>,
}

impl TryFrom<Map<String, Value>> for TemplateRuleSet {
    type Error = serde_json::Error;

    fn try_from(mut fields: Map<String, Value>) -> Result<Self, Self::Error> {
        if fields.get("type").and_then(Value::as_str) == Some(RULE_SET_TYPE_GITHUB) {
            fields.remove("type");
            return Ok(TemplateRuleSet::GitHub(from_fields(fields)?));
        }
        Ok(TemplateRuleSet::Default(from_fields(fields)?))
    }
}

impl Serialize for TemplateRuleSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TemplateRuleSet::Default(rule_set) => rule_set.serialize(serializer),
            TemplateRuleSet::GitHub(options) => {
                let mut fields = Map::new();
                fields.insert("type".to_string(), Value::from(RULE_SET_TYPE_GITHUB));
                fields.extend(object_fields(options).map_err(S::Error::custom)?);
                fields.serialize(serializer)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let template: TemplateOptions = serde_json::from_value(json!({"name": "t"})).unwrap();
        assert_eq!(template.direct_tag(), "direct");
        assert_eq!(template.default_tag(), "default");
        assert_eq!(template.block_tag(), "block");
        assert_eq!(template.urltest_tag(), "URLTest");
        assert_eq!(template.mixed_port(), 8080);
        assert!(!template.disable_ipv6());
        assert_eq!(serde_json::to_value(&template).unwrap(), json!({"name": "t"}));
    }

    #[test]
    fn test_disable_ipv6_follows_domain_strategy() {
        let template: TemplateOptions =
            serde_json::from_value(json!({"domain_strategy": "ipv4_only"})).unwrap();
        assert!(template.disable_ipv6());
    }

    #[test]
    fn test_mixed_port_from_custom_mixed() {
        let template: TemplateOptions =
            serde_json::from_value(json!({"custom_mixed": {"listen_port": 7890}})).unwrap();
        assert_eq!(template.mixed_port(), 7890);
    }

    #[test]
    fn test_unknown_template_field_rejected() {
        assert!(serde_json::from_value::<TemplateOptions>(json!({"disable_tunnel": true})).is_err());
    }

    #[test]
    fn test_rule_set_kinds() {
        let rule_sets: Vec<TemplateRuleSet> = serde_json::from_value(json!([
            {"type": "github", "repository": "SagerNet/sing-geosite", "path": "rule-set/", "prefix": "geosite-", "rule_set": ["apple", "google"]},
            {"type": "remote", "tag": "ads", "format": "binary", "url": "https://example.com/ads.srs"},
        ]))
        .unwrap();
        let TemplateRuleSet::GitHub(github) = &rule_sets[0] else {
            panic!("expected github rule-set");
        };
        assert_eq!(github.rule_set, vec!["apple", "google"]);
        assert!(matches!(rule_sets[1], TemplateRuleSet::Default(_)));
    }

    #[test]
    fn test_extra_group() {
        let group: ExtraGroupOptions = serde_json::from_value(json!({
            "tag": "HK", "type": "urltest", "target": "subscription", "filter": "HK"
        }))
        .unwrap();
        assert_eq!(group.group_type, ExtraGroupType::URLTest);
        assert_eq!(group.target, ExtraGroupTarget::Subscription);
        assert_eq!(group.filter, vec!["HK"]);
    }
}
