//! Compatibility rewrites applied to a rendered document. Inline rule-sets
//! are expanded before any other filter inspects rules.

mod dns_rule_fields;
mod inline_rule_set;
mod null_references;
mod rule_action;

use anyhow::{Context, Result};
use config::{BoxOptions, Metadata, Version};

use crate::version;

pub struct Filter {
    pub name: &'static str,
    /// The filter runs for engines older than this version. `None` runs it
    /// unconditionally.
    pub threshold: Option<Version>,
    pub apply: fn(&Metadata, &mut BoxOptions) -> Result<()>,
}

impl Filter {
    fn applies_to(&self, metadata: &Metadata) -> bool {
        match &self.threshold {
            Some(threshold) => metadata.is_before(threshold),
            None => true,
        }
    }
}

pub static FILTERS: &[Filter] = &[
    Filter {
        name: "inline_rule_set",
        threshold: Some(version::INLINE_RULE_SET),
        apply: inline_rule_set::apply,
    },
    Filter {
        name: "dns_rule_fields",
        threshold: Some(version::DNS_RULE_IP_FIELDS),
        apply: dns_rule_fields::apply,
    },
    Filter {
        name: "rule_action",
        threshold: Some(version::RULE_ACTION),
        apply: rule_action::apply,
    },
    Filter {
        name: "null_references",
        threshold: None,
        apply: null_references::apply,
    },
];

/// Runs every applicable filter in order. The first failure stops the chain.
pub fn apply(metadata: &Metadata, options: &mut BoxOptions) -> Result<()> {
    for filter in FILTERS {
        if !filter.applies_to(metadata) {
            continue;
        }
        tracing::debug!(filter = filter.name, "apply filter");
        (filter.apply)(metadata, options).with_context(|| format!("filter {}", filter.name))?;
    }
    Ok(())
}
