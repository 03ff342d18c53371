pub mod dns;
pub mod document;
pub mod inbound;
pub mod merge;
pub mod metadata;
pub mod outbound;
pub mod profile;
pub mod route;
pub mod rule;
pub mod semver;
mod serde_helpers;
pub mod subscription;
pub mod template;

pub use document::BoxOptions;
pub use metadata::{Metadata, Platform};
pub use profile::{Profile, User};
pub use semver::Version;
pub use subscription::{OutboundProcessOptions, SubscriptionOptions};
pub use template::TemplateOptions;

use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::merge::{merge_into, ListMerge};
use crate::outbound::Outbound;
use crate::serde_helpers::{is_false, listable, object_fields};

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LogOptions {
    #[serde(default, skip_serializing_if = "is_false")]
    pub disabled: bool,
    /// `trace`, `debug`, `info`, `warn` or `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

/// Outbounds declared together; the first one names the set.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(transparent)]
pub struct OutboundSet(#[serde(deserialize_with = "listable")] pub Vec<Outbound>);

impl OutboundSet {
    pub fn tag(&self) -> Option<&str> {
        self.0.first().map(|it| it.tag.as_str())
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Options {
    #[serde(default)]
    pub log: Option<LogOptions>,
    #[serde(default)]
    pub outbounds: Vec<OutboundSet>,
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionOptions>,
    #[serde(default)]
    pub templates: Vec<TemplateOptions>,
    #[serde(default)]
    pub profiles: Vec<Profile>,
    #[serde(default)]
    pub users: Vec<User>,
}

#[derive(Eq, PartialEq, Copy, Clone, Debug)]
pub enum Format {
    Json,
    Yaml,
}

impl Format {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|it| it.to_str()) {
            Some("yaml" | "yml") => Format::Yaml,
            _ => Format::Json,
        }
    }
}

impl Options {
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file =
            File::open(path).with_context(|| format!("open config file {}", path.display()))?;
        Options::from_reader(file, Format::from_path(path))
            .with_context(|| format!("load config file {}", path.display()))
    }

    pub fn from_reader<R: Read>(reader: R, format: Format) -> Result<Self> {
        let options: Options = match format {
            Format::Json => serde_json::from_reader(reader).context("decode json options")?,
            Format::Yaml => serde_yaml::from_reader(reader).context("decode yaml options")?,
        };
        options.validate()?;
        tracing::info!(
            outbounds = options.outbounds.len(),
            subscriptions = options.subscriptions.len(),
            templates = options.templates.len(),
            profiles = options.profiles.len(),
            "loaded options"
        );
        Ok(options)
    }

    fn validate(&self) -> Result<()> {
        for set in &self.outbounds {
            if set.0.is_empty() {
                bail!("empty outbound set");
            }
        }
        unique_names("outbound set", self.outbounds.iter().filter_map(|it| it.tag()))?;
        unique_names("subscription", self.subscriptions.iter().map(|it| it.name.as_str()))?;
        unique_names("template", self.templates.iter().map(|it| it.name.as_str()))?;
        unique_names("profile", self.profiles.iter().map(|it| it.name.as_str()))?;
        unique_names("user", self.users.iter().map(|it| it.name.as_str()))?;
        for subscription in &self.subscriptions {
            if self.outbound_set(&subscription.name).is_some() {
                bail!(
                    "subscription {} has the tag of an outbound set",
                    subscription.name
                );
            }
        }

        for template in &self.templates {
            self.template(&template.name)?;
        }
        for profile in &self.profiles {
            for template in profile.template_names() {
                if self.find_template(template).is_none() {
                    bail!("profile {}: unknown template {template}", profile.name);
                }
            }
            if profile.template_names().next().is_none() {
                bail!("profile {}: missing template", profile.name);
            }
            for tag in &profile.outbound {
                if self.outbound_set(tag).is_none() {
                    bail!("profile {}: unknown outbound {tag}", profile.name);
                }
            }
            for name in &profile.subscription {
                if self.subscription(name).is_none() {
                    bail!("profile {}: unknown subscription {name}", profile.name);
                }
            }
        }
        for user in &self.users {
            for name in user.profile.iter().chain(user.default_profile.iter()) {
                if self.profile(name).is_none() {
                    bail!("user {}: unknown profile {name}", user.name);
                }
            }
        }
        Ok(())
    }

    fn find_template(&self, name: &str) -> Option<&TemplateOptions> {
        self.templates.iter().find(|it| it.name == name)
    }

    /// The named template with its `extend` chain resolved: the parent is the
    /// base and every field the child sets replaces it.
    pub fn template(&self, name: &str) -> Result<TemplateOptions> {
        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        let mut current = name;
        loop {
            if !visited.insert(current) {
                bail!("template {name}: extend cycle through {current}");
            }
            let Some(template) = self.find_template(current) else {
                bail!("unknown template: {current}");
            };
            chain.push(template);
            match template.extend.as_deref() {
                Some(parent) => current = parent,
                None => break,
            }
        }
        let mut resolved = match chain.pop() {
            Some(root) => root.clone(),
            None => bail!("unknown template: {name}"),
        };
        while let Some(child) = chain.pop() {
            let overlay = object_fields(child)
                .with_context(|| format!("encode template {}", child.name))?;
            resolved = merge_into(&resolved, &Value::Object(overlay), ListMerge::Replace)
                .with_context(|| format!("extend template {} from {}", child.name, resolved.name))?;
        }
        resolved.extend = None;
        Ok(resolved)
    }

    pub fn outbound_set(&self, tag: &str) -> Option<&OutboundSet> {
        self.outbounds.iter().find(|it| it.tag() == Some(tag))
    }

    pub fn subscription(&self, name: &str) -> Option<&SubscriptionOptions> {
        self.subscriptions.iter().find(|it| it.name == name)
    }

    pub fn profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.iter().find(|it| it.name == name)
    }
}

fn unique_names<'a>(kind: &str, names: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if name.is_empty() {
            bail!("{kind} without a name");
        }
        if !seen.insert(name) {
            bail!("duplicate {kind} name: {name}");
        }
    }
    Ok(())
}
