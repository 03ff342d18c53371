use serde::{Deserialize, Serialize};

use crate::metadata::Platform;
use crate::serde_helpers::{listable, ordered_pairs, serialize_pairs};

/// A named combination of a template, outbound sets and subscriptions.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    pub name: String,
    #[serde(default)]
    pub template: String,
    #[serde(
        default,
        deserialize_with = "ordered_pairs",
        serialize_with = "serialize_pairs",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub template_for_platform: Vec<(String, String)>,
    #[serde(
        default,
        deserialize_with = "ordered_pairs",
        serialize_with = "serialize_pairs",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub template_for_user_agent: Vec<(String, String)>,
    #[serde(default, deserialize_with = "listable", skip_serializing_if = "Vec::is_empty")]
    pub outbound: Vec<String>,
    #[serde(default, deserialize_with = "listable", skip_serializing_if = "Vec::is_empty")]
    pub subscription: Vec<String>,
}

impl Profile {
    /// Template configured for `platform`, if any.
    pub fn template_for_platform(&self, platform: Platform) -> Option<&str> {
        self.template_for_platform
            .iter()
            .find(|(name, _)| name.parse::<Platform>().ok() == Some(platform))
            .map(|(_, template)| template.as_str())
    }

    /// Every template name the profile can resolve to.
    pub fn template_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.template.as_str())
            .filter(|it| !it.is_empty())
            .chain(self.template_for_platform.iter().map(|(_, it)| it.as_str()))
            .chain(self.template_for_user_agent.iter().map(|(_, it)| it.as_str()))
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct User {
    pub name: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, deserialize_with = "listable", skip_serializing_if = "Vec::is_empty")]
    pub profile: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_profile: Option<String>,
}
