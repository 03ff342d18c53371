use std::fmt;

use anyhow::{bail, Result};

pub const DEFAULT_TAG_PER_SUBSCRIPTION: &str = "{{ .tag }} ({{ .subscription_name }})";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Variable {
    Tag,
    SubscriptionName,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Text(String),
    Variable(Variable),
}

/// Names the copy of an extra group made for one subscription, e.g.
/// `{{ .tag }} ({{ .subscription_name }})`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TagTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl TagTemplate {
    pub fn parse(source: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut rest = source;
        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Text(rest[..start].to_string()));
            }
            let Some(end) = rest[start..].find("}}") else {
                bail!("unclosed action at offset {}", source.len() - rest.len() + start);
            };
            let action = rest[start + 2..start + end].trim();
            let variable = match action {
                ".tag" => Variable::Tag,
                ".subscription_name" => Variable::SubscriptionName,
                _ => bail!("unknown variable `{action}`"),
            };
            segments.push(Segment::Variable(variable));
            rest = &rest[start + end + 2..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }
        Ok(TagTemplate {
            source: source.to_string(),
            segments,
        })
    }

    pub fn render(&self, tag: &str, subscription_name: &str) -> Result<String> {
        let mut rendered = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => rendered.push_str(text),
                Segment::Variable(Variable::Tag) => rendered.push_str(tag),
                Segment::Variable(Variable::SubscriptionName) => {
                    rendered.push_str(subscription_name)
                }
            }
        }
        if rendered.trim().is_empty() {
            bail!("`{}` renders an empty tag", self.source);
        }
        Ok(rendered)
    }
}

impl Default for TagTemplate {
    fn default() -> Self {
        TagTemplate {
            source: DEFAULT_TAG_PER_SUBSCRIPTION.to_string(),
            segments: vec![
                Segment::Variable(Variable::Tag),
                Segment::Text(" (".to_string()),
                Segment::Variable(Variable::SubscriptionName),
                Segment::Text(")".to_string()),
            ],
        }
    }
}

impl fmt::Display for TagTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_its_source() {
        assert_eq!(
            TagTemplate::parse(DEFAULT_TAG_PER_SUBSCRIPTION).unwrap(),
            TagTemplate::default()
        );
        assert_eq!(
            TagTemplate::default().render("HK", "A").unwrap(),
            "HK (A)"
        );
    }

    #[test]
    fn test_custom_template() {
        let template = TagTemplate::parse("{{.subscription_name}}/{{ .tag }}").unwrap();
        assert_eq!(template.render("HK", "Sub").unwrap(), "Sub/HK");
        let literal = TagTemplate::parse("fixed").unwrap();
        assert_eq!(literal.render("HK", "Sub").unwrap(), "fixed");
    }

    #[test]
    fn test_parse_errors() {
        assert!(TagTemplate::parse("{{ .tag ").is_err());
        assert!(TagTemplate::parse("{{ .name }}").is_err());
    }

    #[test]
    fn test_empty_tag_is_an_error() {
        let template = TagTemplate::parse("{{ .subscription_name }}").unwrap();
        assert!(template.render("HK", "").is_err());
    }
}
