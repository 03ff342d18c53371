use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Eq, PartialEq, Copy, Clone, Debug, Hash, PartialOrd, Ord)]
pub enum PreReleaseKind {
    Alpha,
    Beta,
    Rc,
}

/// `alpha.7`, `beta.1`, `rc.2`
#[derive(Eq, PartialEq, Copy, Clone, Debug, Hash, PartialOrd, Ord)]
pub struct PreRelease {
    pub kind: PreReleaseKind,
    pub number: u64,
}

/// Engine version as published by sing-box: `major.minor.patch[-kind.N]`.
#[derive(Eq, PartialEq, Copy, Clone, Debug, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre_release: Option<PreRelease>,
}

impl Version {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Version {
            major,
            minor,
            patch,
            pre_release: None,
        }
    }

    pub const fn alpha(major: u64, minor: u64, patch: u64, number: u64) -> Self {
        Version {
            major,
            minor,
            patch,
            pre_release: Some(PreRelease {
                kind: PreReleaseKind::Alpha,
                number,
            }),
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let (core, pre) = match trimmed.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (trimmed, None),
        };
        let mut parts = core.split('.');
        let mut next_number = |name: &str| -> Result<u64> {
            let part = parts
                .next()
                .ok_or_else(|| anyhow!("missing {name} version in `{s}`"))?;
            part.parse::<u64>()
                .with_context(|| format!("invalid {name} version `{part}` in `{s}`"))
        };
        let major = next_number("major")?;
        let minor = next_number("minor")?;
        // `1.10` is accepted and means `1.10.0`
        let patch = if core.matches('.').count() >= 2 {
            next_number("patch")?
        } else {
            0
        };
        if core.matches('.').count() > 2 {
            bail!("too many version components in `{s}`");
        }
        let pre_release = pre.map(|pre| parse_pre_release(pre, s)).transpose()?;
        Ok(Version {
            major,
            minor,
            patch,
            pre_release,
        })
    }

    pub fn greater_than_or_equal(&self, other: &Version) -> bool {
        self >= other
    }

    pub fn less_than(&self, other: &Version) -> bool {
        self < other
    }

    pub fn is_pre_release(&self) -> bool {
        self.pre_release.is_some()
    }
}

fn parse_pre_release(pre: &str, full: &str) -> Result<PreRelease> {
    let (kind, number) = match pre.split_once('.') {
        Some((kind, number)) => (kind, Some(number)),
        None => (pre, None),
    };
    let kind = match kind {
        "alpha" => PreReleaseKind::Alpha,
        "beta" => PreReleaseKind::Beta,
        "rc" => PreReleaseKind::Rc,
        _ => bail!("unknown pre-release identifier `{kind}` in `{full}`"),
    };
    let number = match number {
        Some(number) => number
            .parse::<u64>()
            .with_context(|| format!("invalid pre-release number `{number}` in `{full}`"))?,
        None => 0,
    };
    Ok(PreRelease { kind, number })
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.pre_release, &other.pre_release) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(lhs), Some(rhs)) => lhs.cmp(rhs),
            })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for Version {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl Display for PreReleaseKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PreReleaseKind::Alpha => write!(f, "alpha"),
            PreReleaseKind::Beta => write!(f, "beta"),
            PreReleaseKind::Rc => write!(f, "rc"),
        }
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.pre_release {
            write!(f, "-{}.{}", pre.kind, pre.number)?;
        }
        Ok(())
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Version::parse(&s).map_err(serde::de::Error::custom)
    }
}
