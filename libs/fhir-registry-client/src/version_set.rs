//! Ordered set of semver versions with a stable/prerelease resolution policy.

use semver::{Version, VersionReq};

/// Versions known for one package, partitioned into listed and unlisted
/// members. Unlisted versions never win range resolution but can still be
/// requested exactly.
///
/// Strings that do not parse as semver are dropped at construction; the CI
/// backend cross-checks the surviving count against its listing to catch
/// synthesis bugs.
#[derive(Debug, Clone, Default)]
pub struct VersionSet {
    listed: Vec<Version>,
    unlisted: Vec<Version>,
}

impl VersionSet {
    /// Build from `(version, unlisted)` pairs, dropping unparseable entries.
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, bool)>,
        S: AsRef<str>,
    {
        let mut listed = Vec::new();
        let mut unlisted = Vec::new();
        for (raw, hidden) in entries {
            match Version::parse(raw.as_ref()) {
                Ok(version) => {
                    if hidden {
                        unlisted.push(version);
                    } else {
                        listed.push(version);
                    }
                }
                Err(_) => {
                    tracing::debug!(version = raw.as_ref(), "skipping unparseable version");
                }
            }
        }
        listed.sort();
        unlisted.sort();
        Self { listed, unlisted }
    }

    pub fn from_versions<I, S>(versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(versions.into_iter().map(|v| (v, false)))
    }

    pub fn is_empty(&self) -> bool {
        self.listed.is_empty() && self.unlisted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.listed.len() + self.unlisted.len()
    }

    pub fn listed(&self) -> &[Version] {
        &self.listed
    }

    /// Greatest listed member; with `stable` the prerelease members are
    /// excluded entirely.
    pub fn latest(&self, stable: bool) -> Option<&Version> {
        if stable {
            self.listed.iter().rev().find(|v| v.pre.is_empty())
        } else {
            self.listed.last()
        }
    }

    /// Greatest listed member preferring stable releases, falling back to
    /// prereleases when nothing stable exists.
    pub fn latest_preferring_stable(&self) -> Option<&Version> {
        self.latest(true).or_else(|| self.latest(false))
    }

    /// Resolve a range expression to the greatest satisfying member.
    ///
    /// An empty range or `latest` picks the latest under the stable policy.
    /// An exact version string also matches unlisted members.
    pub fn resolve(&self, range: &str, stable: bool) -> Option<Version> {
        let range = range.trim();
        if range.is_empty() || range == "latest" {
            return self.latest(stable).cloned();
        }

        if let Ok(exact) = Version::parse(range) {
            if self.listed.contains(&exact) || self.unlisted.contains(&exact) {
                return Some(exact);
            }
        }

        let req = VersionReq::parse(range).ok()?;
        self.listed
            .iter()
            .rev()
            .find(|v| {
                if stable && !v.pre.is_empty() {
                    return false;
                }
                matches_including_prerelease(&req, v)
            })
            .cloned()
    }

    pub fn contains(&self, version: &Version) -> bool {
        self.listed.contains(version) || self.unlisted.contains(version)
    }
}

// `VersionReq::matches` refuses prerelease versions unless the requirement
// itself names a prerelease. Range resolution under the non-stable policy
// needs npm's include-prerelease reading instead.
fn matches_including_prerelease(req: &VersionReq, version: &Version) -> bool {
    if req.matches(version) {
        return true;
    }
    if version.pre.is_empty() {
        return false;
    }
    let mut released = version.clone();
    released.pre = semver::Prerelease::EMPTY;
    released.build = semver::BuildMetadata::EMPTY;
    req.matches(&released)
}
