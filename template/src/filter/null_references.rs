use std::collections::HashSet;

use anyhow::Result;
use config::{BoxOptions, Metadata};

/// Removes references to outbounds that are not in the document.
pub(super) fn apply(_metadata: &Metadata, options: &mut BoxOptions) -> Result<()> {
    let tags: HashSet<String> = options.outbounds.iter().map(|it| it.tag.clone()).collect();
    for outbound in &mut options.outbounds {
        let group = outbound.tag.clone();
        if let Some(members) = outbound.group_members_mut() {
            members.retain(|member| {
                let exists = tags.contains(member);
                if !exists {
                    tracing::debug!(%group, %member, "remove missing group member");
                }
                exists
            });
        }
    }
    if let Some(route) = &mut options.route {
        route.rules.retain(|rule| {
            match rule.action().and_then(|it| it.outbound()) {
                Some(outbound) if !tags.contains(outbound) => {
                    tracing::debug!(%outbound, "drop rule routing to missing outbound");
                    false
                }
                _ => true,
            }
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_no_dangling_references() {
        let mut options: BoxOptions = serde_json::from_value(json!({
            "outbounds": [
                {"type": "selector", "tag": "default", "outbounds": ["HK", "gone", "auto"]},
                {"type": "urltest", "tag": "auto", "outbounds": ["gone", "HK"]},
                {"type": "shadowsocks", "tag": "HK", "server": "1.1.1.1", "server_port": 443}
            ],
            "route": {"rules": [
                {"domain": "a.com", "outbound": "gone"},
                {"domain": "b.com", "outbound": "HK"},
                {"action": "sniff"}
            ]}
        }))
        .unwrap();
        apply(&Metadata::default(), &mut options).unwrap();

        let tags: HashSet<_> = options.outbound_tags().into_iter().collect();
        for outbound in &options.outbounds {
            for member in outbound.group_members().into_iter().flatten() {
                assert!(tags.contains(member.as_str()), "dangling member {member}");
            }
        }
        assert_eq!(
            serde_json::to_value(&options.route.as_ref().unwrap().rules).unwrap(),
            json!([{"domain": "b.com", "outbound": "HK"}, {"action": "sniff"}])
        );
        assert_eq!(options.outbounds[0].group_members().unwrap(), &vec!["HK", "auto"]);
    }
}
