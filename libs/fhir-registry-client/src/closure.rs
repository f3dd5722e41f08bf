//! Accumulator for a restore operation.

use semver::Version;
use siderite_package::{PackageDependency, PackageReference};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// The set of references accepted so far plus the requirements nobody
/// could satisfy. Keys are lowercased names; on a duplicate name the
/// highest semver wins and ties keep the incumbent.
#[derive(Debug, Default, Clone)]
pub struct PackageClosure {
    resolved: BTreeMap<String, PackageReference>,
    missing: Vec<PackageDependency>,
}

impl PackageClosure {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a reference. Returns `true` iff it was newly accepted — in
    /// which case the caller is expected to walk its sub-manifest.
    ///
    /// Highest-wins is commutative and associative, so the final closure
    /// does not depend on the order references are offered in.
    pub fn add(&mut self, reference: PackageReference) -> bool {
        let key = reference.name.to_ascii_lowercase();
        match self.resolved.get(&key) {
            None => {
                self.resolved.insert(key, reference);
                true
            }
            Some(incumbent) => {
                if compare_versions(&reference, incumbent) == Ordering::Greater {
                    tracing::debug!(
                        winner = %reference,
                        loser = %incumbent,
                        "replacing closure entry with higher version"
                    );
                    self.resolved.insert(key, reference);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record an unsatisfiable requirement. Never displaces an accepted
    /// reference of the same name.
    pub fn add_missing(&mut self, dependency: PackageDependency) {
        if !self.missing.contains(&dependency) {
            self.missing.push(dependency);
        }
    }

    pub fn get(&self, name: &str) -> Option<&PackageReference> {
        self.resolved.get(&name.to_ascii_lowercase())
    }

    pub fn references(&self) -> impl Iterator<Item = &PackageReference> {
        self.resolved.values()
    }

    pub fn missing(&self) -> &[PackageDependency] {
        &self.missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }
}

// Semver ordering with prerelease rules where both sides parse. A
// parseable version beats an unparseable one; two unparseable versions
// keep the incumbent.
fn compare_versions(candidate: &PackageReference, incumbent: &PackageReference) -> Ordering {
    let candidate = candidate.version.as_deref().and_then(|v| Version::parse(v).ok());
    let incumbent = incumbent.version.as_deref().and_then(|v| Version::parse(v).ok());
    match (candidate, incumbent) {
        (Some(a), Some(b)) => a.cmp_precedence(&b),
        (Some(_), None) => Ordering::Greater,
        _ => Ordering::Less,
    }
}
