// ── Build and version information ──
//
// Carried in backup manifests and analytics reports, and compared by the
// upgrade registry. Versions are `major.minor.patch` with an optional
// leading `v` and optional pre-release/build suffix, which is ignored.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Build information of the running binary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub git_commit: String,
    #[serde(default)]
    pub build_date: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub arch: String,
}

impl VersionInfo {
    pub fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_owned(),
            git_commit: option_env!("MC_GIT_COMMIT").unwrap_or_default().to_owned(),
            build_date: option_env!("MC_BUILD_DATE").unwrap_or_default().to_owned(),
            platform: std::env::consts::OS.to_owned(),
            arch: std::env::consts::ARCH.to_owned(),
        }
    }

    pub fn semver(&self) -> Option<SemVer> {
        self.version.parse().ok()
    }
}

/// A parsed `major.minor.patch` triple.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SemVer {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl SemVer {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid version '{0}'")]
pub struct InvalidVersion(pub String);

impl FromStr for SemVer {
    type Err = InvalidVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('v');
        let core = trimmed
            .split(['-', '+'])
            .next()
            .unwrap_or_default();
        let mut parts = core.split('.');
        let mut next = || -> Result<u64, InvalidVersion> {
            match parts.next() {
                None | Some("") => Ok(0),
                Some(p) => p.parse().map_err(|_| InvalidVersion(s.to_owned())),
            }
        };
        let version = Self::new(next()?, next()?, next()?);
        if core.is_empty() || parts.next().is_some() {
            return Err(InvalidVersion(s.to_owned()));
        }
        Ok(version)
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Compare two version strings; unparsable versions sort first.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (a.parse::<SemVer>(), b.parse::<SemVer>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Err(_), Ok(_)) => Ordering::Less,
        (Ok(_), Err(_)) => Ordering::Greater,
        (Err(_), Err(_)) => Ordering::Equal,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_loose_versions() {
        assert_eq!("v2.0.1".parse::<SemVer>().unwrap(), SemVer::new(2, 0, 1));
        assert_eq!("1.9".parse::<SemVer>().unwrap(), SemVer::new(1, 9, 0));
        assert_eq!("2.1.0-rc1".parse::<SemVer>().unwrap(), SemVer::new(2, 1, 0));
        assert!("2.x".parse::<SemVer>().is_err());
        assert!("".parse::<SemVer>().is_err());
        assert!("1.2.3.4".parse::<SemVer>().is_err());
    }

    #[test]
    fn compares_numerically() {
        assert_eq!(compare_versions("1.10.0", "1.9.9"), Ordering::Greater);
        assert_eq!(compare_versions("garbage", "0.0.1"), Ordering::Less);
    }

    #[test]
    fn current_reports_crate_version() {
        let info = VersionInfo::current();
        assert!(info.semver().is_some());
        assert!(!info.arch.is_empty());
    }
}
