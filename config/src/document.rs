use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dns::DnsOptions;
use crate::inbound::Inbound;
use crate::outbound::Outbound;
use crate::route::RouteOptions;

/// Root of a generated engine configuration.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct BoxOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<DnsOptions>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inbounds: Vec<Inbound>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outbounds: Vec<Outbound>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<RouteOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experimental: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BoxOptions {
    pub fn route_mut(&mut self) -> &mut RouteOptions {
        self.route.get_or_insert_with(RouteOptions::default)
    }

    pub fn outbound_tags(&self) -> Vec<&str> {
        self.outbounds.iter().map(|it| it.tag.as_str()).collect()
    }

    pub fn find_outbound_mut(&mut self, tag: &str) -> Option<&mut Outbound> {
        self.outbounds.iter_mut().find(|it| it.tag == tag)
    }

    pub fn to_pretty_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
