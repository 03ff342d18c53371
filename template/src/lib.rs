//! Turns a template, subscriptions and a target engine description into a
//! complete engine configuration.

pub mod expand;
pub mod filter;
mod geo_resources;
mod inbounds;
mod outbounds;
mod route;
mod synthesizer;
mod tag_template;
pub mod version;

pub use outbounds::{dedup_tags, splice};
pub use synthesizer::Synthesizer;
pub use tag_template::TagTemplate;

use anyhow::{Context, Result};
use config::outbound::Outbound;
use config::template::{ExtraGroupOptions, TemplateOptions};
use config::{BoxOptions, Metadata};
use regex::Regex;
use subscription::Subscription;

/// A template ready for rendering. Patterns and tag templates are compiled
/// once here and shared by every render.
#[derive(Debug)]
pub struct Template {
    options: TemplateOptions,
    groups: Vec<ExtraGroup>,
}

#[derive(Debug)]
pub(crate) struct ExtraGroup {
    options: ExtraGroupOptions,
    filter: Vec<Regex>,
    exclude: Vec<Regex>,
    tag_per_subscription: TagTemplate,
}

impl ExtraGroup {
    fn new(options: ExtraGroupOptions) -> Result<Self> {
        let compile = |patterns: &[String]| -> Result<Vec<Regex>> {
            patterns
                .iter()
                .map(|it| Regex::new(it).with_context(|| format!("parse regex `{it}`")))
                .collect()
        };
        let filter = compile(&options.filter).context("filter")?;
        let exclude = compile(&options.exclude).context("exclude")?;
        let tag_per_subscription = match &options.tag_per_subscription {
            Some(source) => TagTemplate::parse(source)
                .with_context(|| format!("parse `tag_per_subscription`: {source}"))?,
            None => TagTemplate::default(),
        };
        Ok(ExtraGroup {
            options,
            filter,
            exclude,
            tag_per_subscription,
        })
    }

    /// Included by a filter (or no filter given) and excluded by none.
    fn matches(&self, tag: &str) -> bool {
        (self.filter.is_empty() || self.filter.iter().any(|it| it.is_match(tag)))
            && !self.exclude.iter().any(|it| it.is_match(tag))
    }

    fn has_patterns(&self) -> bool {
        !self.filter.is_empty() || !self.exclude.is_empty()
    }
}

impl Template {
    pub fn new(options: TemplateOptions) -> Result<Self> {
        let groups = options
            .extra_groups
            .iter()
            .map(|group| {
                ExtraGroup::new(group.clone())
                    .with_context(|| format!("extra group {}", group.tag))
            })
            .collect::<Result<_>>()
            .with_context(|| format!("compile template {}", options.name))?;
        Ok(Template { options, groups })
    }

    pub fn name(&self) -> &str {
        &self.options.name
    }

    pub fn options(&self) -> &TemplateOptions {
        &self.options
    }

    /// Rule actions are unavailable when disabled by the template or when the
    /// engine predates them.
    pub(crate) fn disable_rule_action(&self, metadata: &Metadata) -> bool {
        self.options.disable_rule_action || metadata.is_before(&version::RULE_ACTION)
    }

    pub fn render(
        &self,
        metadata: &Metadata,
        outbound_sets: &[Vec<Outbound>],
        subscriptions: &[Subscription],
    ) -> Result<BoxOptions> {
        self.render_onto(BoxOptions::default(), metadata, outbound_sets, subscriptions)
    }

    /// Renders onto `options`, which may already carry sections such as a
    /// route or DNS block. The document is only returned once every
    /// compatibility filter has run.
    pub fn render_onto(
        &self,
        mut options: BoxOptions,
        metadata: &Metadata,
        outbound_sets: &[Vec<Outbound>],
        subscriptions: &[Subscription],
    ) -> Result<BoxOptions> {
        tracing::debug!(
            template = %self.options.name,
            version = ?metadata.version,
            platform = %metadata.platform,
            "render template"
        );
        if let Some(log) = &self.options.log {
            options.log = Some(log.clone());
        }
        if let Some(dns) = &self.options.dns {
            options.dns = Some(dns.clone());
        }
        if let Some(experimental) = &self.options.experimental {
            options.experimental = Some(experimental.clone());
        }
        self.render_inbounds(metadata, &mut options)
            .context("render inbounds")?;
        self.render_outbounds(metadata, &mut options, outbound_sets, subscriptions)
            .context("render outbounds")?;
        self.render_route(metadata, &mut options)
            .context("render route")?;
        filter::apply(metadata, &mut options)?;
        tracing::info!(
            template = %self.options.name,
            inbounds = options.inbounds.len(),
            outbounds = options.outbounds.len(),
            rules = options.route.as_ref().map_or(0, |it| it.rules.len()),
            "rendered configuration"
        );
        Ok(options)
    }
}
