use serde::ser::Error as _;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::serde_helpers::{from_fields, is_false, is_zero_u16, listable, object_fields};

pub const TYPE_DIRECT: &str = "direct";
pub const TYPE_BLOCK: &str = "block";
pub const TYPE_DNS: &str = "dns";
pub const TYPE_SELECTOR: &str = "selector";
pub const TYPE_URLTEST: &str = "urltest";

/// An engine outbound. Group and bootstrap types are typed, every server
/// protocol is carried verbatim.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(try_from = "RawOutbound")]
pub struct Outbound {
    pub tag: String,
    pub options: OutboundOptions,
}

#[derive(Clone, Debug, PartialEq)]
pub enum OutboundOptions {
    Direct(DirectOutboundOptions),
    Block(StubOptions),
    Dns(StubOptions),
    Selector(SelectorOutboundOptions),
    URLTest(URLTestOutboundOptions),
    Other {
        outbound_type: String,
        fields: Map<String, Value>,
    },
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct DirectOutboundOptions {
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct StubOptions {}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct SelectorOutboundOptions {
    #[serde(default, deserialize_with = "listable")]
    pub outbounds: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub interrupt_exist_connections: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct URLTestOutboundOptions {
    #[serde(default, deserialize_with = "listable")]
    pub outbounds: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(default, skip_serializing_if = "is_zero_u16")]
    pub tolerance: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub interrupt_exist_connections: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Outbound {
    pub fn new(tag: impl Into<String>, options: OutboundOptions) -> Self {
        Outbound {
            tag: tag.into(),
            options,
        }
    }

    pub fn selector(tag: impl Into<String>, outbounds: Vec<String>) -> Self {
        Outbound::new(
            tag,
            OutboundOptions::Selector(SelectorOutboundOptions {
                outbounds,
                ..Default::default()
            }),
        )
    }

    pub fn urltest(tag: impl Into<String>, outbounds: Vec<String>) -> Self {
        Outbound::new(
            tag,
            OutboundOptions::URLTest(URLTestOutboundOptions {
                outbounds,
                ..Default::default()
            }),
        )
    }

    pub fn outbound_type(&self) -> &str {
        match &self.options {
            OutboundOptions::Direct(_) => TYPE_DIRECT,
            OutboundOptions::Block(_) => TYPE_BLOCK,
            OutboundOptions::Dns(_) => TYPE_DNS,
            OutboundOptions::Selector(_) => TYPE_SELECTOR,
            OutboundOptions::URLTest(_) => TYPE_URLTEST,
            OutboundOptions::Other { outbound_type, .. } => outbound_type,
        }
    }

    pub fn is_group(&self) -> bool {
        self.group_members().is_some()
    }

    pub fn group_members(&self) -> Option<&Vec<String>> {
        match &self.options {
            OutboundOptions::Selector(options) => Some(&options.outbounds),
            OutboundOptions::URLTest(options) => Some(&options.outbounds),
            _ => None,
        }
    }

    pub fn group_members_mut(&mut self) -> Option<&mut Vec<String>> {
        match &mut self.options {
            OutboundOptions::Selector(options) => Some(&mut options.outbounds),
            OutboundOptions::URLTest(options) => Some(&mut options.outbounds),
            _ => None,
        }
    }

    /// Value of a top level field of a server outbound, e.g. `server`.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match &self.options {
            OutboundOptions::Other { fields, .. } => fields.get(name),
            _ => None,
        }
    }

    pub fn set_field(&mut self, name: &str, value: Value) {
        if let OutboundOptions::Other { fields, .. } = &mut self.options {
            fields.insert(name.to_string(), value);
        }
    }
}

#[derive(Deserialize)]
struct RawOutbound {
    #[serde(rename = "type")]
    outbound_type: String,
    #[serde(default)]
    tag: String,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

#[derive(Serialize)]
struct RawOutboundRef<'a> {
    #[serde(rename = "type")]
    outbound_type: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    tag: &'a str,
    #[serde(flatten)]
    fields: &'a Map<String, Value>,
}

impl TryFrom<RawOutbound> for Outbound {
    type Error = serde_json::Error;

    fn try_from(raw: RawOutbound) -> Result<Self, Self::Error> {
        let options = match raw.outbound_type.as_str() {
            TYPE_DIRECT => OutboundOptions::Direct(from_fields(raw.fields)?),
            TYPE_BLOCK => OutboundOptions::Block(from_fields(raw.fields)?),
            TYPE_DNS => OutboundOptions::Dns(from_fields(raw.fields)?),
            TYPE_SELECTOR => OutboundOptions::Selector(from_fields(raw.fields)?),
            TYPE_URLTEST => OutboundOptions::URLTest(from_fields(raw.fields)?),
            _ => OutboundOptions::Other {
                outbound_type: raw.outbound_type,
                fields: raw.fields,
            },
        };
        Ok(Outbound {
            tag: raw.tag,
            options,
        })
    }
}

impl Serialize for Outbound {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let typed_fields;
        let fields = match &self.options {
            OutboundOptions::Direct(options) => {
                typed_fields = object_fields(options).map_err(S::Error::custom)?;
                &typed_fields
            }
            OutboundOptions::Block(options) | OutboundOptions::Dns(options) => {
                typed_fields = object_fields(options).map_err(S::Error::custom)?;
                &typed_fields
            }
            OutboundOptions::Selector(options) => {
                typed_fields = object_fields(options).map_err(S::Error::custom)?;
                &typed_fields
            }
            OutboundOptions::URLTest(options) => {
                typed_fields = object_fields(options).map_err(S::Error::custom)?;
                &typed_fields
            }
            OutboundOptions::Other { fields, .. } => fields,
        };
        RawOutboundRef {
            outbound_type: self.outbound_type(),
            tag: &self.tag,
            fields,
        }
        .serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_group_and_server() {
        let outbounds: Vec<Outbound> = serde_json::from_value(json!([
            {"type": "selector", "tag": "proxy", "outbounds": ["a", "b"], "default": "a"},
            {"type": "urltest", "tag": "auto", "outbounds": "a", "interval": "3m"},
            {"type": "shadowsocks", "tag": "a", "server": "1.1.1.1", "server_port": 443},
        ]))
        .unwrap();
        assert_eq!(outbounds[0].group_members().unwrap(), &vec!["a", "b"]);
        assert_eq!(outbounds[1].group_members().unwrap(), &vec!["a"]);
        assert_eq!(outbounds[2].outbound_type(), "shadowsocks");
        assert_eq!(outbounds[2].field("server_port"), Some(&json!(443)));
        assert!(!outbounds[2].is_group());
    }

    #[test]
    fn test_encode_keeps_type_and_tag_first() {
        let mut outbound = Outbound::selector("proxy", vec!["a".into()]);
        if let OutboundOptions::Selector(options) = &mut outbound.options {
            options.extra.insert("custom".into(), json!(1));
        }
        let encoded = serde_json::to_string(&outbound).unwrap();
        assert_eq!(
            encoded,
            r#"{"type":"selector","tag":"proxy","outbounds":["a"],"custom":1}"#
        );
    }

    #[test]
    fn test_server_outbound_round_trips_verbatim() {
        let raw = json!({"type": "vmess", "tag": "v", "server": "example.com", "uuid": "x", "multiplex": {"enabled": true}});
        let outbound: Outbound = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(serde_json::to_value(&outbound).unwrap(), raw);
    }

    #[test]
    fn test_stub_outbounds() {
        let block: Outbound = serde_json::from_value(json!({"type": "block", "tag": "block"})).unwrap();
        assert_eq!(block.options, OutboundOptions::Block(StubOptions {}));
        assert_eq!(
            serde_json::to_value(&block).unwrap(),
            json!({"type": "block", "tag": "block"})
        );
    }
}
