use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use config::outbound::Outbound;
use config::OutboundProcessOptions;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static EMOJI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\p{Extended_Pictographic}\p{Emoji_Modifier}\u{1F1E6}-\u{1F1FF}\u{FE0F}\u{200D}\u{20E3}]")
        .expect("emoji pattern is valid")
});

/// A compiled `process` entry of a subscription.
#[derive(Debug)]
pub struct OutboundProcessor {
    filter: Vec<Regex>,
    exclude: Vec<Regex>,
    filter_type: Vec<String>,
    exclude_type: Vec<String>,
    invert: bool,
    remove: bool,
    rename: Vec<(Regex, String)>,
    remove_emoji: bool,
    rewrite_multiplex: Option<Value>,
}

fn compile_all(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|it| Regex::new(it).with_context(|| format!("parse regex `{it}`")))
        .collect()
}

impl OutboundProcessor {
    pub fn new(options: &OutboundProcessOptions) -> Result<Self> {
        let rename = options
            .rename
            .iter()
            .map(|(from, to)| {
                Regex::new(from)
                    .with_context(|| format!("parse rename regex `{from}`"))
                    .map(|from| (from, to.clone()))
            })
            .collect::<Result<_>>()?;
        Ok(OutboundProcessor {
            filter: compile_all(&options.filter).context("filter")?,
            exclude: compile_all(&options.exclude).context("exclude")?,
            filter_type: options.filter_type.clone(),
            exclude_type: options.exclude_type.clone(),
            invert: options.invert,
            remove: options.remove,
            rename,
            remove_emoji: options.remove_emoji,
            rewrite_multiplex: options.rewrite_multiplex.clone(),
        })
    }

    fn selects(&self, outbound: &Outbound) -> bool {
        let tag = outbound.tag.as_str();
        let outbound_type = outbound.outbound_type();
        let selected = if self.filter.is_empty()
            && self.exclude.is_empty()
            && self.filter_type.is_empty()
            && self.exclude_type.is_empty()
        {
            true
        } else {
            self.filter.iter().any(|it| it.is_match(tag))
                || self.filter_type.iter().any(|it| it == outbound_type)
                || (!self.exclude.is_empty() && !self.exclude.iter().any(|it| it.is_match(tag)))
                || (!self.exclude_type.is_empty()
                    && !self.exclude_type.iter().any(|it| it == outbound_type))
        };
        selected != self.invert
    }

    fn rewrite_tag(&self, tag: &str) -> String {
        let mut tag = tag.to_string();
        for (from, to) in &self.rename {
            tag = from.replace_all(&tag, to.as_str()).into_owned();
        }
        if self.remove_emoji {
            tag = EMOJI.replace_all(&tag, "").into_owned();
        }
        tag.trim().to_string()
    }

    pub fn process(&self, outbounds: Vec<Outbound>) -> Vec<Outbound> {
        let mut processed = Vec::with_capacity(outbounds.len());
        let mut renamed = HashMap::new();
        for mut outbound in outbounds {
            if !self.selects(&outbound) {
                processed.push(outbound);
                continue;
            }
            if self.remove {
                tracing::debug!(tag = %outbound.tag, "remove outbound");
                continue;
            }
            let tag = self.rewrite_tag(&outbound.tag);
            if tag != outbound.tag {
                renamed.insert(outbound.tag.clone(), tag.clone());
                outbound.tag = tag;
            }
            if let Some(multiplex) = &self.rewrite_multiplex {
                outbound.set_field("multiplex", multiplex.clone());
            }
            processed.push(outbound);
        }
        if !renamed.is_empty() {
            rename_detours(&mut processed, &renamed);
        }
        processed
    }
}

fn rename_detours(outbounds: &mut [Outbound], renamed: &HashMap<String, String>) {
    for outbound in outbounds {
        let Some(detour) = outbound.field("detour").and_then(Value::as_str) else {
            continue;
        };
        if let Some(tag) = renamed.get(detour) {
            let tag = tag.clone();
            outbound.set_field("detour", Value::from(tag));
        }
    }
}

/// Drops outbounds pointing at a server endpoint seen before.
pub fn deduplicate(outbounds: Vec<Outbound>) -> Vec<Outbound> {
    let mut seen = HashSet::new();
    outbounds
        .into_iter()
        .filter(|outbound| {
            let (Some(server), Some(port)) = (outbound.field("server"), outbound.field("server_port"))
            else {
                return true;
            };
            let key = (
                outbound.outbound_type().to_string(),
                server.to_string(),
                port.to_string(),
            );
            if seen.insert(key) {
                true
            } else {
                tracing::debug!(tag = %outbound.tag, "drop duplicate server");
                false
            }
        })
        .collect()
}

/// Makes every tag unique by suffixing ` (n)` to later occurrences.
pub fn unique_tags(outbounds: &mut [Outbound]) {
    let mut used: HashSet<String> = HashSet::new();
    for outbound in outbounds.iter_mut() {
        if used.insert(outbound.tag.clone()) {
            continue;
        }
        let mut n = 1;
        let tag = loop {
            let candidate = format!("{} ({n})", outbound.tag);
            if !used.contains(&candidate) {
                break candidate;
            }
            n += 1;
        };
        tracing::debug!(from = %outbound.tag, to = %tag, "rename duplicate tag");
        used.insert(tag.clone());
        outbound.tag = tag;
    }
}
