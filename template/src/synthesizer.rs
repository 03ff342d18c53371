use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use config::outbound::Outbound;
use config::{BoxOptions, Metadata, Options, Profile};
use regex::Regex;
use subscription::Subscription;

use crate::Template;

struct CompiledProfile {
    profile: Profile,
    user_agents: Vec<(Regex, String)>,
}

impl CompiledProfile {
    fn new(profile: Profile) -> Result<Self> {
        let user_agents = profile
            .template_for_user_agent
            .iter()
            .map(|(pattern, template)| {
                let regex = Regex::new(pattern)
                    .with_context(|| format!("parse user agent regex `{pattern}`"))?;
                Ok((regex, template.clone()))
            })
            .collect::<Result<_>>()?;
        Ok(CompiledProfile {
            profile,
            user_agents,
        })
    }

    /// User agent patterns win over the platform table, which wins over the
    /// profile's default template.
    fn template_name(&self, metadata: &Metadata, user_agent: Option<&str>) -> Option<&str> {
        user_agent
            .and_then(|ua| {
                self.user_agents
                    .iter()
                    .find(|(regex, _)| regex.is_match(ua))
                    .map(|(_, template)| template.as_str())
            })
            .or_else(|| self.profile.template_for_platform(metadata.platform))
            .or(Some(self.profile.template.as_str()).filter(|it| !it.is_empty()))
    }
}

/// Resolves profiles to templates, outbound sets and subscriptions and
/// renders them. Everything is compiled up front, so one instance can serve
/// any number of renders.
pub struct Synthesizer {
    options: Options,
    templates: HashMap<String, Template>,
    profiles: Vec<CompiledProfile>,
}

impl Synthesizer {
    pub fn new(options: Options) -> Result<Self> {
        let mut templates = HashMap::new();
        for template in &options.templates {
            let resolved = options.template(&template.name)?;
            templates.insert(template.name.clone(), Template::new(resolved)?);
        }
        let profiles = options
            .profiles
            .iter()
            .map(|profile| {
                CompiledProfile::new(profile.clone())
                    .with_context(|| format!("profile {}", profile.name))
            })
            .collect::<Result<_>>()?;
        tracing::debug!(templates = templates.len(), "synthesizer ready");
        Ok(Synthesizer {
            options,
            templates,
            profiles,
        })
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn profile(&self, name: &str) -> Option<&Profile> {
        self.find_profile(name).map(|it| &it.profile)
    }

    fn find_profile(&self, name: &str) -> Option<&CompiledProfile> {
        self.profiles.iter().find(|it| it.profile.name == name)
    }

    /// Template the profile renders with for this client.
    pub fn template_for(
        &self,
        profile: &str,
        metadata: &Metadata,
        user_agent: Option<&str>,
    ) -> Result<&Template> {
        let compiled = self
            .find_profile(profile)
            .ok_or_else(|| anyhow!("unknown profile: {profile}"))?;
        let name = compiled
            .template_name(metadata, user_agent)
            .ok_or_else(|| anyhow!("profile {profile}: no template"))?;
        self.templates
            .get(name)
            .ok_or_else(|| anyhow!("profile {profile}: unknown template {name}"))
    }

    /// Renders a profile. `snapshots` holds the fetched subscriptions; a
    /// subscription of the profile without a snapshot is skipped.
    pub fn render_profile(
        &self,
        name: &str,
        metadata: &Metadata,
        user_agent: Option<&str>,
        snapshots: &[Subscription],
    ) -> Result<BoxOptions> {
        let template = self.template_for(name, metadata, user_agent)?;
        let profile = &self
            .find_profile(name)
            .ok_or_else(|| anyhow!("unknown profile: {name}"))?
            .profile;

        let outbound_sets: Vec<Vec<Outbound>> = self
            .options
            .outbounds
            .iter()
            .filter(|set| {
                set.tag()
                    .is_some_and(|tag| profile.outbound.iter().any(|it| it == tag))
            })
            .map(|set| set.0.clone())
            .collect();

        let mut subscriptions = Vec::new();
        for subscription in &profile.subscription {
            match snapshots.iter().find(|it| &it.name == subscription) {
                Some(snapshot) => subscriptions.push(snapshot.clone()),
                None => tracing::warn!(
                    profile = %name,
                    %subscription,
                    "subscription not fetched, skipping"
                ),
            }
        }

        tracing::info!(
            profile = %name,
            template = %template.name(),
            outbound_sets = outbound_sets.len(),
            subscriptions = subscriptions.len(),
            "render profile"
        );
        template
            .render(metadata, &outbound_sets, &subscriptions)
            .with_context(|| format!("render profile {name}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{Format, Platform};
    use serde_json::json;

    fn synthesizer() -> Synthesizer {
        let document = json!({
            "outbounds": [
                [{"type": "socks", "tag": "home", "server": "10.0.0.1", "server_port": 1080}],
                [{"type": "socks", "tag": "office", "server": "10.0.0.2", "server_port": 1080}]
            ],
            "subscriptions": [
                {"name": "A", "url": "https://example.com/a"},
                {"name": "B", "url": "https://example.com/b"}
            ],
            "templates": [
                {"name": "desktop"},
                {"name": "mobile", "extend": "desktop", "disable_tun": true},
                {"name": "legacy", "disable_rule_action": true}
            ],
            "profiles": [{
                "name": "p",
                "template": "desktop",
                "template_for_platform": {"android": "mobile"},
                "template_for_user_agent": {"^SFA/1\\.9": "legacy"},
                "outbound": ["office"],
                "subscription": ["A", "B"]
            }]
        });
        let options =
            Options::from_reader(document.to_string().as_bytes(), Format::Json).unwrap();
        Synthesizer::new(options).unwrap()
    }

    #[test]
    fn test_template_resolution_order() {
        let synthesizer = synthesizer();
        let android = Metadata::new(None, Platform::Android);
        let name = |metadata: &Metadata, ua| {
            synthesizer
                .template_for("p", metadata, ua)
                .unwrap()
                .name()
                .to_string()
        };
        assert_eq!(name(&Metadata::default(), None), "desktop");
        assert_eq!(name(&android, None), "mobile");
        assert_eq!(name(&android, Some("SFA/1.9.3 (1; sing-box 1.9.3)")), "legacy");
        assert_eq!(name(&android, Some("curl/8.0")), "mobile");
        assert!(synthesizer
            .template_for("missing", &Metadata::default(), None)
            .is_err());
    }

    #[test]
    fn test_render_profile_picks_sets_and_snapshots() {
        let synthesizer = synthesizer();
        let options = synthesizer.options().subscription("A").unwrap();
        let servers: Vec<Outbound> = serde_json::from_value(json!([
            {"type": "shadowsocks", "tag": "HK 01", "server": "1.1.1.1", "server_port": 443, "method": "aes-128-gcm", "password": "x"}
        ]))
        .unwrap();
        let snapshot = Subscription::new(options, servers);

        let rendered = synthesizer
            .render_profile("p", &Metadata::default(), None, &[snapshot])
            .unwrap();
        let tags = rendered.outbound_tags();
        assert!(tags.contains(&"office"));
        assert!(!tags.contains(&"home"));
        assert!(tags.contains(&"HK 01"));
        let default = rendered
            .outbounds
            .iter()
            .find(|it| it.tag == "default")
            .unwrap();
        assert_eq!(
            default.group_members().unwrap(),
            &vec!["office".to_string(), "HK 01".to_string()]
        );
    }

    #[test]
    fn test_bad_user_agent_pattern() {
        let document = json!({
            "templates": [{"name": "t"}],
            "profiles": [{"name": "p", "template": "t", "template_for_user_agent": {"(": "t"}}]
        });
        let options =
            Options::from_reader(document.to_string().as_bytes(), Format::Json).unwrap();
        let err = Synthesizer::new(options).err().unwrap();
        assert!(format!("{err:#}").contains("profile p"));
    }
}
