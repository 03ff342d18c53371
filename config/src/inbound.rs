use std::net::IpAddr;

use ipnet::IpNet;
use serde::ser::Error as _;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::serde_helpers::{from_fields, is_false, is_zero_u16, listable, object_fields};

pub const TYPE_TUN: &str = "tun";
pub const TYPE_MIXED: &str = "mixed";

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DomainStrategy {
    PreferIpv4,
    PreferIpv6,
    Ipv4Only,
    Ipv6Only,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(try_from = "RawInbound")]
pub struct Inbound {
    pub tag: String,
    pub options: InboundOptions,
}

#[derive(Clone, Debug, PartialEq)]
pub enum InboundOptions {
    Tun(TunInboundOptions),
    Mixed(MixedInboundOptions),
    Other {
        inbound_type: String,
        fields: Map<String, Value>,
    },
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct TunInboundOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface_name: Option<String>,
    #[serde(default, deserialize_with = "listable", skip_serializing_if = "Vec::is_empty")]
    pub address: Vec<IpNet>,
    #[serde(default, deserialize_with = "listable", skip_serializing_if = "Vec::is_empty")]
    pub inet4_address: Vec<IpNet>,
    #[serde(default, deserialize_with = "listable", skip_serializing_if = "Vec::is_empty")]
    pub inet6_address: Vec<IpNet>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub auto_route: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub auto_redirect: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub strict_route: bool,
    #[serde(default, deserialize_with = "listable", skip_serializing_if = "Vec::is_empty")]
    pub route_address: Vec<IpNet>,
    #[serde(default, deserialize_with = "listable", skip_serializing_if = "Vec::is_empty")]
    pub inet4_route_address: Vec<IpNet>,
    #[serde(default, deserialize_with = "listable", skip_serializing_if = "Vec::is_empty")]
    pub inet6_route_address: Vec<IpNet>,
    #[serde(default, deserialize_with = "listable", skip_serializing_if = "Vec::is_empty")]
    pub route_exclude_address: Vec<IpNet>,
    #[serde(default, deserialize_with = "listable", skip_serializing_if = "Vec::is_empty")]
    pub inet4_route_exclude_address: Vec<IpNet>,
    #[serde(default, deserialize_with = "listable", skip_serializing_if = "Vec::is_empty")]
    pub inet6_route_exclude_address: Vec<IpNet>,
    #[serde(default, deserialize_with = "listable", skip_serializing_if = "Vec::is_empty")]
    pub route_address_set: Vec<String>,
    #[serde(default, deserialize_with = "listable", skip_serializing_if = "Vec::is_empty")]
    pub route_exclude_address_set: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<TunPlatformOptions>,
    // legacy inbound options, replaced by rule actions in newer engines
    #[serde(default, skip_serializing_if = "is_false")]
    pub sniff: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_strategy: Option<DomainStrategy>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct TunPlatformOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_proxy: Option<HttpProxyOptions>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct HttpProxyOptions {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub server_port: u16,
    #[serde(default, deserialize_with = "listable", skip_serializing_if = "Vec::is_empty")]
    pub bypass_domain: Vec<String>,
    #[serde(default, deserialize_with = "listable", skip_serializing_if = "Vec::is_empty")]
    pub match_domain: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct MixedInboundOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "is_zero_u16")]
    pub listen_port: u16,
    #[serde(default, skip_serializing_if = "is_false")]
    pub set_system_proxy: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub sniff: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_strategy: Option<DomainStrategy>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Inbound {
    pub fn new(tag: impl Into<String>, options: InboundOptions) -> Self {
        Inbound {
            tag: tag.into(),
            options,
        }
    }

    pub fn inbound_type(&self) -> &str {
        match &self.options {
            InboundOptions::Tun(_) => TYPE_TUN,
            InboundOptions::Mixed(_) => TYPE_MIXED,
            InboundOptions::Other { inbound_type, .. } => inbound_type,
        }
    }

    pub fn tun_options_mut(&mut self) -> Option<&mut TunInboundOptions> {
        match &mut self.options {
            InboundOptions::Tun(options) => Some(options),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
struct RawInbound {
    #[serde(rename = "type")]
    inbound_type: String,
    #[serde(default)]
    tag: String,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

#[derive(Serialize)]
struct RawInboundRef<'a> {
    #[serde(rename = "type")]
    inbound_type: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    tag: &'a str,
    #[serde(flatten)]
    fields: &'a Map<String, Value>,
}

impl TryFrom<RawInbound> for Inbound {
    type Error = serde_json::Error;

    fn try_from(raw: RawInbound) -> Result<Self, Self::Error> {
        let options = match raw.inbound_type.as_str() {
            TYPE_TUN => InboundOptions::Tun(from_fields(raw.fields)?),
            TYPE_MIXED => InboundOptions::Mixed(from_fields(raw.fields)?),
            _ => InboundOptions::Other {
                inbound_type: raw.inbound_type,
                fields: raw.fields,
            },
        };
        Ok(Inbound {
            tag: raw.tag,
            options,
        })
    }
}

impl Serialize for Inbound {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let typed_fields;
        let fields = match &self.options {
            InboundOptions::Tun(options) => {
                typed_fields = object_fields(options).map_err(S::Error::custom)?;
                &typed_fields
            }
            InboundOptions::Mixed(options) => {
                typed_fields = object_fields(options).map_err(S::Error::custom)?;
                &typed_fields
            }
            InboundOptions::Other { fields, .. } => fields,
        };
        RawInboundRef {
            inbound_type: self.inbound_type(),
            tag: &self.tag,
            fields,
        }
        .serialize(serializer)
    }
}
