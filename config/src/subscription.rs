use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::outbound::{SelectorOutboundOptions, URLTestOutboundOptions};
use crate::serde_helpers::{duration, is_false, listable, ordered_pairs, serialize_pairs};

pub const DEFAULT_SUBSCRIPTION_UPDATE_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SubscriptionOptions {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, with = "duration", skip_serializing_if = "Option::is_none")]
    pub update_interval: Option<Duration>,
    #[serde(default, deserialize_with = "listable", skip_serializing_if = "Vec::is_empty")]
    pub process: Vec<OutboundProcessOptions>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub deduplication: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub generate_selector: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub generate_urltest: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urltest_suffix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_selector: Option<SelectorOutboundOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_urltest: Option<URLTestOutboundOptions>,
}

impl SubscriptionOptions {
    pub fn update_interval(&self) -> Duration {
        self.update_interval
            .unwrap_or(DEFAULT_SUBSCRIPTION_UPDATE_INTERVAL)
    }
}

/// One processing step applied to the outbounds of a subscription.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct OutboundProcessOptions {
    #[serde(default, deserialize_with = "listable", skip_serializing_if = "Vec::is_empty")]
    pub filter: Vec<String>,
    #[serde(default, deserialize_with = "listable", skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
    #[serde(default, deserialize_with = "listable", skip_serializing_if = "Vec::is_empty")]
    pub filter_type: Vec<String>,
    #[serde(default, deserialize_with = "listable", skip_serializing_if = "Vec::is_empty")]
    pub exclude_type: Vec<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub invert: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub remove: bool,
    /// Regex to replacement, applied in order.
    #[serde(
        default,
        deserialize_with = "ordered_pairs",
        serialize_with = "serialize_pairs",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub rename: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub remove_emoji: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewrite_multiplex: Option<Value>,
}
