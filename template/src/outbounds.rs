use std::collections::HashSet;

use anyhow::{Context, Result};
use config::outbound::{
    Outbound, OutboundOptions, SelectorOutboundOptions, StubOptions, URLTestOutboundOptions,
};
use config::template::{ExtraGroupTarget, ExtraGroupType, DNS_TAG};
use config::{BoxOptions, Metadata};
use subscription::Subscription;

use crate::{ExtraGroup, Template};

const URLTEST_SUFFIX: &str = " - URLTest";

/// Keeps the first occurrence of every tag.
pub fn dedup_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(tags.len());
    tags.into_iter()
        .filter(|tag| seen.insert(tag.clone()))
        .collect()
}

/// Adds `tags` to the members of the group named `target`, in front of or
/// after the current members. Nothing happens when no such outbound exists.
///
/// # Panics
///
/// When `target` names an outbound that is not a selector or url-test group.
pub fn splice(outbounds: &mut [Outbound], target: &str, front: bool, tags: &[String]) {
    let Some(outbound) = outbounds.iter_mut().find(|it| it.tag == target) else {
        return;
    };
    assert!(
        outbound.is_group(),
        "unexpected group type: {}",
        outbound.outbound_type()
    );
    let Some(members) = outbound.group_members_mut() else {
        return;
    };
    let joined = if front {
        tags.iter().cloned().chain(members.drain(..)).collect()
    } else {
        members.drain(..).chain(tags.iter().cloned()).collect()
    };
    *members = dedup_tags(joined);
}

fn tags_of(outbounds: &[Outbound]) -> Vec<String> {
    outbounds.iter().map(|it| it.tag.clone()).collect()
}

fn selector(
    tag: impl Into<String>,
    custom: Option<&SelectorOutboundOptions>,
    members: impl IntoIterator<Item = String>,
) -> Outbound {
    let mut options = custom.cloned().unwrap_or_default();
    options.outbounds.extend(members);
    options.outbounds = dedup_tags(std::mem::take(&mut options.outbounds));
    Outbound::new(tag, OutboundOptions::Selector(options))
}

fn urltest(
    tag: impl Into<String>,
    custom: Option<&URLTestOutboundOptions>,
    members: impl IntoIterator<Item = String>,
) -> Outbound {
    let mut options = custom.cloned().unwrap_or_default();
    options.outbounds.extend(members);
    options.outbounds = dedup_tags(std::mem::take(&mut options.outbounds));
    Outbound::new(tag, OutboundOptions::URLTest(options))
}

impl ExtraGroup {
    /// The group outbound, or `None` when it would have no members.
    fn build(&self, tag: impl Into<String>, members: Vec<String>) -> Option<Outbound> {
        let outbound = match self.options.group_type {
            ExtraGroupType::Selector => {
                selector(tag, self.options.custom_selector.as_ref(), members)
            }
            ExtraGroupType::URLTest => urltest(tag, self.options.custom_urltest.as_ref(), members),
        };
        match outbound.group_members() {
            Some(members) if !members.is_empty() => Some(outbound),
            _ => {
                tracing::debug!(group = %outbound.tag, "skip empty extra group");
                None
            }
        }
    }

    fn matching<'a>(&self, tags: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        tags.into_iter()
            .filter(|tag| self.matches(tag))
            .map(String::from)
            .collect()
    }
}

impl Template {
    pub(crate) fn render_outbounds(
        &self,
        metadata: &Metadata,
        options: &mut BoxOptions,
        outbound_sets: &[Vec<Outbound>],
        subscriptions: &[Subscription],
    ) -> Result<()> {
        let template = &self.options;
        let default_tag = template.default_tag();
        options.route_mut().final_outbound = Some(default_tag.to_string());

        let mut outbounds = vec![
            Outbound::new(
                template.direct_tag(),
                OutboundOptions::Direct(template.custom_direct.clone().unwrap_or_default()),
            ),
            selector(default_tag, template.custom_selector.as_ref(), Vec::new()),
        ];
        if self.disable_rule_action(metadata) {
            outbounds.push(Outbound::new(
                template.block_tag(),
                OutboundOptions::Block(StubOptions::default()),
            ));
            outbounds.push(Outbound::new(
                DNS_TAG,
                OutboundOptions::Dns(StubOptions::default()),
            ));
        }

        let mut global_tags = Vec::new();
        for set in outbound_sets {
            let Some(first) = set.first() else {
                continue;
            };
            global_tags.push(first.tag.clone());
            outbounds.extend(set.iter().cloned());
        }

        let mut subscription_groups = Vec::new();
        let mut servers = Vec::new();
        for subscription in subscriptions {
            if subscription.servers.is_empty() {
                tracing::debug!(subscription = %subscription.name, "skip empty subscription");
                continue;
            }
            let tags: Vec<String> = subscription.server_tags().map(String::from).collect();
            if subscription.generate_selector {
                subscription_groups.push(selector(
                    &subscription.name,
                    subscription.custom_selector.as_ref(),
                    tags.iter().cloned(),
                ));
            }
            if subscription.generate_urltest {
                let tag = match &subscription.urltest_suffix {
                    _ if !subscription.generate_selector => subscription.name.clone(),
                    Some(suffix) if !suffix.is_empty() => format!("{} {suffix}", subscription.name),
                    _ => format!("{}{URLTEST_SUFFIX}", subscription.name),
                };
                let custom = subscription
                    .custom_urltest
                    .as_ref()
                    .or(template.custom_urltest.as_ref());
                subscription_groups.push(urltest(tag, custom, tags.iter().cloned()));
            }
            if !subscription.generate_selector && !subscription.generate_urltest {
                global_tags.extend(tags);
            }
            servers.extend(subscription.servers.iter().cloned());
        }
        let group_tags = tags_of(&subscription_groups);

        let mut per_subscription: Vec<Vec<Outbound>> = vec![Vec::new(); subscriptions.len()];
        for group in self
            .groups
            .iter()
            .filter(|it| it.options.target == ExtraGroupTarget::Subscription)
        {
            for (subscription, groups) in subscriptions.iter().zip(per_subscription.iter_mut()) {
                let members = group.matching(subscription.server_tags());
                let tag = if subscriptions.len() == 1 {
                    group.options.tag.clone()
                } else {
                    group
                        .tag_per_subscription
                        .render(&group.options.tag, &subscription.name)
                        .with_context(|| {
                            format!(
                                "generate tag for extra group: tag={}, subscription={}",
                                group.options.tag, subscription.name
                            )
                        })?
                };
                groups.extend(group.build(tag, members));
            }
        }

        let mut default_groups = Vec::new();
        let mut global_groups = Vec::new();
        for group in self
            .groups
            .iter()
            .filter(|it| it.options.target != ExtraGroupTarget::Subscription)
        {
            let mut members: Vec<String> = group_tags
                .iter()
                .cloned()
                .chain(per_subscription.iter().flat_map(|it| tags_of(it)))
                .collect();
            members.sort();
            if members.is_empty() || group.has_patterns() {
                members.extend(
                    group.matching(subscriptions.iter().flat_map(|it| it.server_tags())),
                );
            }
            let Some(outbound) = group.build(&group.options.tag, members) else {
                continue;
            };
            match group.options.target {
                ExtraGroupTarget::Global => global_groups.push(outbound),
                _ => default_groups.push(outbound),
            }
        }

        outbounds.extend(subscription_groups);
        let default_group_tags = tags_of(&default_groups);
        outbounds.extend(default_groups);
        if !global_groups.is_empty() {
            let tags = tags_of(&global_groups);
            outbounds.extend(global_groups);
            splice(&mut outbounds, default_tag, false, &tags);
        }
        for (subscription, groups) in subscriptions.iter().zip(per_subscription) {
            if groups.is_empty() {
                continue;
            }
            let tags = tags_of(&groups);
            outbounds.extend(groups);
            splice(&mut outbounds, &subscription.name, true, &tags);
        }
        splice(&mut outbounds, default_tag, false, &default_group_tags);
        splice(&mut outbounds, default_tag, false, &group_tags);
        splice(&mut outbounds, default_tag, false, &global_tags);
        outbounds.extend(servers);

        tracing::debug!(
            outbounds = outbounds.len(),
            groups = group_tags.len(),
            "render outbounds"
        );
        options.outbounds = outbounds;
        Ok(())
    }
}
