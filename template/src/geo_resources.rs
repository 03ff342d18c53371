use config::route::{RouteOptions, RuleSet};
use config::template::{GitHubRuleSet, TemplateRuleSet};

use crate::Template;

const JSDELIVR: &str = "https://testingcf.jsdelivr.net/gh/";
const GITHUB_RAW: &str = "https://raw.githubusercontent.com/";

pub(crate) const GEOIP_CN: &str = "geoip-cn";
pub(crate) const GEOSITE_CN: &str = "geosite-geolocation-cn";
pub(crate) const GEOSITE_NOT_CN: &str = "geosite-geolocation-!cn";

/// Where binary rule-sets hosted on GitHub are downloaded from.
struct Mirror<'a> {
    base: &'static str,
    branch_split: &'static str,
    download_detour: Option<&'a str>,
}

impl Mirror<'_> {
    fn url(&self, repository: &str, path: &str, code: &str) -> String {
        format!(
            "{}{repository}{}{path}{code}.srs",
            self.base, self.branch_split
        )
    }

    fn rule_set(&self, tag: String, repository: &str, path: &str, code: &str) -> RuleSet {
        RuleSet::remote(
            tag,
            self.url(repository, path, code),
            self.download_detour.map(String::from),
        )
    }
}

impl Template {
    fn mirror(&self) -> Mirror<'_> {
        if self.options.enable_jsdelivr {
            Mirror {
                base: JSDELIVR,
                branch_split: "@",
                download_detour: Some(self.options.direct_tag()),
            }
        } else {
            Mirror {
                base: GITHUB_RAW,
                branch_split: "/",
                download_detour: None,
            }
        }
    }

    /// Engine rule-sets for rule-sets declared in the template. GitHub
    /// shorthands turn into one remote rule-set per listed code.
    pub(crate) fn render_rule_sets(&self, rule_sets: &[TemplateRuleSet]) -> Vec<RuleSet> {
        let mirror = self.mirror();
        let mut rendered = Vec::new();
        for rule_set in rule_sets {
            match rule_set {
                TemplateRuleSet::Default(rule_set) => rendered.push(rule_set.clone()),
                TemplateRuleSet::GitHub(GitHubRuleSet {
                    repository,
                    path,
                    prefix,
                    rule_set,
                }) => {
                    rendered.extend(rule_set.iter().map(|code| {
                        mirror.rule_set(format!("{prefix}{code}"), repository, path, code)
                    }));
                }
            }
        }
        rendered
    }

    /// Declares the rule-sets used by the traffic bypass rules.
    pub(crate) fn render_geo_resources(&self, route: &mut RouteOptions) {
        if self.options.custom_rule_set.is_empty() {
            let mirror = self.mirror();
            route.add_rule_sets([
                mirror.rule_set(
                    GEOIP_CN.to_string(),
                    "SagerNet/sing-geoip",
                    "rule-set/",
                    GEOIP_CN,
                ),
                mirror.rule_set(
                    GEOSITE_CN.to_string(),
                    "SagerNet/sing-geosite",
                    "rule-set/",
                    GEOSITE_CN,
                ),
                mirror.rule_set(
                    GEOSITE_NOT_CN.to_string(),
                    "SagerNet/sing-geosite",
                    "rule-set/",
                    GEOSITE_NOT_CN,
                ),
            ]);
        }
        route.add_rule_sets(self.render_rule_sets(&self.options.post_rule_set));
    }
}
