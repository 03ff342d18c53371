use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use anyhow::bail;
use serde::{Deserialize, Serialize};

use crate::semver::Version;

#[derive(Eq, PartialEq, Copy, Clone, Debug, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    #[serde(rename = "")]
    Unknown,
    Android,
    #[serde(rename = "ios")]
    IOS,
    #[serde(rename = "macos")]
    MacOS,
    #[serde(rename = "tvos")]
    AppleTVOS,
}

impl Platform {
    pub fn is_apple(&self) -> bool {
        matches!(self, Platform::IOS | Platform::MacOS | Platform::AppleTVOS)
    }

    /// Graphical clients can only run the engine through a VPN service, so a
    /// tunnel inbound is always required there.
    pub fn tun_only(&self) -> bool {
        self.is_apple() || *self == Platform::Android
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Unknown => "",
            Platform::Android => "android",
            Platform::IOS => "ios",
            Platform::MacOS => "macos",
            Platform::AppleTVOS => "tvos",
        }
    }
}

impl FromStr for Platform {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "" | "unknown" => Platform::Unknown,
            "android" => Platform::Android,
            "ios" => Platform::IOS,
            "macos" => Platform::MacOS,
            "tvos" | "appletvos" => Platform::AppleTVOS,
            _ => bail!("unknown platform: {s}"),
        })
    }
}

impl Display for Platform {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Unknown => write!(f, "unknown"),
            _ => write!(f, "{}", self.as_str()),
        }
    }
}

/// Describes the engine that is going to consume the rendered configuration.
///
/// An unset version means "latest": version-gated compatibility rewrites never
/// apply to it.
#[derive(Eq, PartialEq, Copy, Clone, Debug, Default)]
pub struct Metadata {
    pub version: Option<Version>,
    pub platform: Platform,
}

impl Metadata {
    pub fn new(version: Option<Version>, platform: Platform) -> Self {
        Metadata { version, platform }
    }

    /// True when a version is known and it is older than `threshold`.
    pub fn is_before(&self, threshold: &Version) -> bool {
        self.version
            .as_ref()
            .is_some_and(|version| version.less_than(threshold))
    }

    /// Recognises the user agents of the graphical clients, e.g.
    /// `SFA/1.10.1 (458; sing-box 1.10.1)`.
    pub fn detect(user_agent: &str) -> Self {
        let platform = match user_agent.get(..4) {
            Some("SFA/") => Platform::Android,
            Some("SFI/") => Platform::IOS,
            Some("SFM/") => Platform::MacOS,
            Some("SFT/") => Platform::AppleTVOS,
            _ => return Metadata::default(),
        };
        let version = user_agent.split_once("sing-box ").and_then(|(_, rest)| {
            let end = rest
                .find(|c: char| c == ')' || c == ';' || c.is_whitespace())
                .unwrap_or(rest.len());
            match Version::parse(&rest[..end]) {
                Ok(version) => Some(version),
                Err(e) => {
                    tracing::warn!("invalid engine version in user agent `{user_agent}`: {e}");
                    None
                }
            }
        });
        Metadata { version, platform }
    }
}
