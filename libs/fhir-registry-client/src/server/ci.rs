//! FHIR CI build-server backend.
//!
//! `build.fhir.org` is not a registry: it exposes one JSON document,
//! `ig/qas.json`, listing the current CI build of every Implementation
//! Guide per branch. This backend synthesizes NPM-style listings from that
//! document, maps tag-style discriminators (`current`, `current$<branch>`,
//! bare branch names) to concrete build versions, and constructs tarball
//! URLs on the build site itself.

use super::{build_http_client, fetch_bytes, PackageServer};
use crate::error::{Error, Result};
use crate::listing::{Dist, PackageListing, PackageRelease};
use crate::version_set::VersionSet;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use siderite_package::{PackageDependency, PackageReference};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};

/// Sentinel scope routing references to this backend.
pub const CI_SCOPE: &str = "build.fhir.org";

const DEFAULT_ROOT: &str = "https://build.fhir.org";
const QAS_PATH: &str = "/ig/qas.json";
const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%SZ";

/// One row of `qas.json`: the QA summary of a single CI build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CiQaRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(rename = "package-id", default, skip_serializing_if = "Option::is_none")]
    pub package_id: Option<String>,
    #[serde(rename = "ig-ver", default, skip_serializing_if = "Option::is_none")]
    pub package_version: Option<String>,
    /// Build date in the server's verbose format, e.g.
    /// `Fri, 09 Aug, 2024 19:46:42 +0000`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(rename = "dateISO8601", default, skip_serializing_if = "Option::is_none")]
    pub date_iso: Option<String>,
    /// FHIR version the IG targets, e.g. `4.0.1`.
    #[serde(rename = "version", default, skip_serializing_if = "Option::is_none")]
    pub fhir_version: Option<String>,
    /// Relative GitHub path of the build source, e.g.
    /// `HL7/fhir-ig/branches/master/qa.json`.
    #[serde(rename = "repo", default, skip_serializing_if = "Option::is_none")]
    pub repository_url: Option<String>,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl CiQaRecord {
    /// The build instant, from `dateISO8601` when present, else `date`.
    pub fn build_timestamp(&self) -> Option<DateTime<Utc>> {
        if let Some(iso) = self.date_iso.as_deref() {
            if let Ok(ts) = DateTime::parse_from_rfc3339(iso) {
                return Some(ts.with_timezone(&Utc));
            }
            if let Ok(ts) = NaiveDateTime::parse_from_str(iso, "%Y-%m-%dT%H:%M:%S") {
                return Some(Utc.from_utc_datetime(&ts));
            }
        }
        if let Some(date) = self.date.as_deref() {
            if let Ok(ts) = DateTime::parse_from_str(date, "%a, %d %b, %Y %H:%M:%S %z") {
                return Some(ts.with_timezone(&Utc));
            }
            if let Ok(ts) = DateTime::parse_from_rfc2822(date) {
                return Some(ts.with_timezone(&Utc));
            }
        }
        None
    }

    pub fn branch(&self) -> Option<Branch> {
        branch_from_repo(self.repository_url.as_deref()?)
    }

    /// The build-site URL: the record's `url` with any
    /// `/ImplementationGuide/...` suffix stripped.
    pub fn site_url(&self) -> Option<String> {
        let url = self.url.as_deref()?;
        let trimmed = match url.find("/ImplementationGuide") {
            Some(idx) => &url[..idx],
            None => url,
        };
        Some(trimmed.trim_end_matches('/').to_string())
    }
}

/// Branch parsed out of a `repo` path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    pub name: String,
    pub is_default: bool,
}

/// Scan for a `branches/` or `tree/` marker; the branch name runs to the
/// next slash. `main` and `master` are default branches either way.
fn branch_from_repo(repo: &str) -> Option<Branch> {
    let start = repo
        .find("branches/")
        .map(|idx| idx + "branches/".len())
        .or_else(|| repo.find("tree/").map(|idx| idx + "tree/".len()))?;
    let name = repo[start..].split('/').next().unwrap_or("");
    if name.is_empty() {
        return None;
    }
    Some(Branch {
        name: name.to_string(),
        is_default: matches!(name, "main" | "master"),
    })
}

/// Replace every non-alphanumeric character with `-`; length-preserving.
pub fn clean_for_semver(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

/// Deterministic semver-compliant version string for one CI build.
///
/// `<ig-ver>[-cibuild[.b-<branch>]]+<yyyyMMdd-HHmmssZ | repo-prefix | ci>`
fn synthesized_version(record: &CiQaRecord) -> String {
    let core = record
        .package_version
        .clone()
        .unwrap_or_else(|| "0.0.0".to_string());
    let mut prerelease = if core.contains('-') {
        String::new()
    } else {
        "-cibuild".to_string()
    };

    let meta = match record.build_timestamp() {
        Some(ts) => ts.format(TIMESTAMP_FORMAT).to_string(),
        None => {
            let repo = record.repository_url.as_deref().unwrap_or("");
            if let Some(branch) = branch_from_repo(repo) {
                if !branch.is_default {
                    prerelease.push_str(".b-");
                    prerelease.push_str(&clean_for_semver(&branch.name));
                }
            }
            let mut parts = repo.split('/').filter(|s| !s.is_empty());
            match (parts.next(), parts.next()) {
                (Some(owner), Some(repo_name)) => format!("{}.{}", owner, repo_name),
                _ => "ci".to_string(),
            }
        }
    };

    format!("{}{}+{}", core, prerelease, clean_for_semver(&meta))
}

/// Listing synthesized from all records of one package id.
///
/// Versions are inserted in status-ascending order so `active` beats
/// `retired` for the same synthesized version; tags are assigned in
/// build-date-ascending order so later builds overwrite earlier ones,
/// except the plain `current` alias from a default branch which keeps its
/// first writer.
fn build_listing(package_id: &str, records: &[CiQaRecord]) -> PackageListing {
    let mut listing = PackageListing {
        id: Some(package_id.to_string()),
        name: package_id.to_string(),
        description: records.iter().find_map(|r| r.description.clone()),
        ..Default::default()
    };

    let mut by_status: Vec<&CiQaRecord> = records.iter().collect();
    by_status.sort_by_key(|r| r.status.clone().unwrap_or_default());

    for record in by_status {
        let version = synthesized_version(record);
        if listing.versions.contains_key(&version) {
            continue;
        }
        let site = record.site_url();
        listing.versions.insert(
            version.clone(),
            PackageRelease {
                name: Some(package_id.to_string()),
                version,
                description: record.description.clone(),
                dist: Some(Dist {
                    tarball: site.clone(),
                    ..Default::default()
                }),
                fhir_version: record.fhir_version.clone(),
                url: site,
                unlisted: None,
                extra: Map::new(),
            },
        );
    }

    let mut by_date: Vec<&CiQaRecord> = records.iter().collect();
    by_date.sort_by_key(|r| r.build_timestamp());

    for record in by_date {
        let version = synthesized_version(record);
        if !listing.versions.contains_key(&version) {
            continue;
        }
        match record.branch() {
            None => {
                listing.dist_tags.insert("current".to_string(), version);
            }
            Some(branch) => {
                listing
                    .dist_tags
                    .insert(format!("current${}", branch.name), version.clone());
                if branch.is_default {
                    listing
                        .dist_tags
                        .entry("current".to_string())
                        .or_insert(version);
                }
            }
        }
    }

    listing
}

/// Options recognized by the CI backend.
#[derive(Debug, Clone)]
pub struct CiServerOptions {
    /// `-1`: never refresh once loaded. `0`: never store a cache; every
    /// request downloads. Positive: refresh when older than this many
    /// seconds.
    pub listing_invalidation_seconds: i64,
    /// Accept invalid TLS certificates (testing only).
    pub insecure: bool,
}

impl Default for CiServerOptions {
    fn default() -> Self {
        Self {
            listing_invalidation_seconds: -1,
            insecure: false,
        }
    }
}

/// Catalog search filters; all provided filters must match.
#[derive(Debug, Clone, Default)]
pub struct CatalogQuery {
    /// Exact package id.
    pub package_id: Option<String>,
    /// Exact FHIR version, e.g. `4.0.1`.
    pub fhir_version: Option<String>,
    /// Exact site canonical URL.
    pub url: Option<String>,
    /// Repository prefix; a leading GitHub host is stripped before matching.
    pub repository: Option<String>,
    /// Bare branch name, matched as a `/branches/{branch}/qa.json` suffix.
    pub branch: Option<String>,
}

struct QasSnapshot {
    records: Vec<CiQaRecord>,
    by_package_id: HashMap<String, Vec<usize>>,
    fetched_at: Instant,
}

impl QasSnapshot {
    fn new(records: Vec<CiQaRecord>) -> Self {
        let mut by_package_id: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, record) in records.iter().enumerate() {
            if let Some(id) = record.package_id.as_deref() {
                by_package_id
                    .entry(id.to_ascii_lowercase())
                    .or_default()
                    .push(idx);
            }
        }
        Self {
            records,
            by_package_id,
            fetched_at: Instant::now(),
        }
    }

    fn records_for(&self, package: &str) -> Option<Vec<CiQaRecord>> {
        let indices = self.by_package_id.get(&package.to_ascii_lowercase())?;
        Some(indices.iter().map(|&idx| self.records[idx].clone()).collect())
    }
}

/// A resolved CI reference in both its tag form and its concrete form.
#[derive(Debug, Clone)]
pub struct CiReference {
    pub tagged: PackageReference,
    pub resolved: PackageReference,
}

/// Backend for the FHIR CI build server.
pub struct CiServer {
    client: reqwest::Client,
    root: String,
    listing_invalidation_seconds: i64,
    snapshot: RwLock<Option<Arc<QasSnapshot>>>,
    refresh_lock: Mutex<()>,
}

impl CiServer {
    pub fn new(options: CiServerOptions) -> Result<Self> {
        Self::with_root(DEFAULT_ROOT, options)
    }

    pub fn with_root(root: impl Into<String>, options: CiServerOptions) -> Result<Self> {
        Ok(Self {
            client: build_http_client(options.insecure)?,
            root: root.into().trim_end_matches('/').to_string(),
            listing_invalidation_seconds: options.listing_invalidation_seconds,
            snapshot: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        })
    }

    /// Seed the cache with an already-downloaded `qas.json` document.
    /// Bypasses the invalidation policy; useful for offline operation.
    pub async fn preload(&self, records: Vec<CiQaRecord>) {
        let snapshot = Arc::new(QasSnapshot::new(records));
        *self.snapshot.write().await = Some(snapshot);
    }

    /// Force a refresh regardless of the invalidation policy.
    pub async fn update_cache(&self) -> Result<()> {
        self.refresh(true).await.map(|_| ())
    }

    /// Resolve a version discriminator to both its tag form and the
    /// concrete build reference. `None` discriminator means `current`.
    pub async fn get_references(
        &self,
        package: &str,
        discriminator: Option<&str>,
    ) -> Result<Option<CiReference>> {
        let Some((record, version)) = self.qa_record_for(package, discriminator).await? else {
            return Ok(None);
        };

        let tag = match record.branch() {
            Some(branch) if !branch.is_default => format!("current${}", branch.name),
            _ => "current".to_string(),
        };

        Ok(Some(CiReference {
            tagged: PackageReference::scoped(CI_SCOPE, package, tag),
            resolved: PackageReference::scoped(CI_SCOPE, package, version),
        }))
    }

    /// Tarball URL for a concrete or tag-form CI reference, without
    /// downloading anything.
    pub async fn get_package_url(&self, reference: &PackageReference) -> Result<String> {
        if reference.scope.as_deref() != Some(CI_SCOPE) {
            return Err(Error::MisroutedReference {
                reference: reference.moniker(),
                server: self.root.clone(),
            });
        }
        let Some((record, _)) = self
            .qa_record_for(&reference.name, reference.version.as_deref())
            .await?
        else {
            return Err(Error::PackageNotFound(reference.moniker()));
        };
        self.tarball_url(&record)
    }

    /// Search the record set. Records are deduplicated by package id,
    /// first hit wins.
    pub async fn catalog(&self, query: &CatalogQuery) -> Result<Vec<CiQaRecord>> {
        let snapshot = self.current_snapshot().await?;
        let mut seen: Vec<String> = Vec::new();
        let mut hits = Vec::new();

        for record in &snapshot.records {
            let Some(package_id) = record.package_id.as_deref() else {
                continue;
            };
            if !matches_query(record, query) {
                continue;
            }
            let key = package_id.to_ascii_lowercase();
            if seen.contains(&key) {
                continue;
            }
            seen.push(key);
            hits.push(record.clone());
        }

        Ok(hits)
    }

    async fn current_snapshot(&self) -> Result<Arc<QasSnapshot>> {
        if self.listing_invalidation_seconds != 0 {
            let guard = self.snapshot.read().await;
            if let Some(snapshot) = guard.as_ref() {
                if self.is_fresh(snapshot) {
                    return Ok(snapshot.clone());
                }
            }
        }
        self.refresh(false).await
    }

    fn is_fresh(&self, snapshot: &QasSnapshot) -> bool {
        self.listing_invalidation_seconds < 0
            || snapshot.fetched_at.elapsed().as_secs() <= self.listing_invalidation_seconds as u64
    }

    // One refresh at a time; readers keep the prior snapshot until the new
    // one is published in a single store.
    async fn refresh(&self, force: bool) -> Result<Arc<QasSnapshot>> {
        let _refreshing = self.refresh_lock.lock().await;

        // A concurrent refresh may have published while we waited.
        if !force && self.listing_invalidation_seconds != 0 {
            let guard = self.snapshot.read().await;
            if let Some(snapshot) = guard.as_ref() {
                if self.is_fresh(snapshot) {
                    return Ok(snapshot.clone());
                }
            }
        }

        let records = self.download_qas().await?;
        tracing::info!(records = records.len(), "refreshed CI build listing");
        let snapshot = Arc::new(QasSnapshot::new(records));

        if self.listing_invalidation_seconds != 0 {
            *self.snapshot.write().await = Some(snapshot.clone());
        }
        Ok(snapshot)
    }

    async fn download_qas(&self) -> Result<Vec<CiQaRecord>> {
        let url = format!("{}{}", self.root, QAS_PATH);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(Error::UnexpectedStatus {
                server: self.root.clone(),
                status: response.status().as_u16(),
                url,
            });
        }

        response.json().await.map_err(|e| Error::Protocol {
            server: self.root.clone(),
            package: "qas.json".to_string(),
            detail: format!("undecodable build listing: {}", e),
        })
    }

    /// Map a discriminator to the QA record it names and the synthesized
    /// version string.
    async fn qa_record_for(
        &self,
        package: &str,
        discriminator: Option<&str>,
    ) -> Result<Option<(CiQaRecord, String)>> {
        let snapshot = self.current_snapshot().await?;
        let Some(records) = snapshot.records_for(package) else {
            return Ok(None);
        };
        let listing = build_listing(package, &records);

        let discriminator = match discriminator {
            None | Some("") | Some("latest") => "current",
            Some(other) => other,
        };

        // Anything without build metadata is a tag or a bare branch name.
        let version = if !discriminator.contains('+') {
            let tagged = listing
                .dist_tags
                .get(discriminator)
                .or_else(|| listing.dist_tags.get(&format!("current${}", discriminator)));
            match tagged {
                Some(version) => version.clone(),
                None => return Ok(None),
            }
        } else {
            discriminator.to_string()
        };

        let record = match parse_build_metadata(&version) {
            Some(ts) => records
                .iter()
                .find(|r| r.build_timestamp() == Some(ts))
                .cloned(),
            None => records
                .iter()
                .find(|r| synthesized_version(r) == version)
                .cloned(),
        };

        Ok(record.map(|record| (record, version)))
    }

    fn tarball_url(&self, record: &CiQaRecord) -> Result<String> {
        let site = record.site_url().ok_or_else(|| Error::Protocol {
            server: self.root.clone(),
            package: record.package_id.clone().unwrap_or_default(),
            detail: "QA record carries no site URL".to_string(),
        })?;

        Ok(match record.branch() {
            Some(branch) if !branch.is_default => {
                format!("{}/branches/{}/package.tgz", site, branch.name)
            }
            _ => format!("{}/package.tgz", site),
        })
    }
}

fn parse_build_metadata(version: &str) -> Option<DateTime<Utc>> {
    let meta = version.rsplit('+').next()?;
    let parsed = NaiveDateTime::parse_from_str(meta, TIMESTAMP_FORMAT).ok()?;
    Some(Utc.from_utc_datetime(&parsed))
}

fn matches_query(record: &CiQaRecord, query: &CatalogQuery) -> bool {
    if let Some(package_id) = query.package_id.as_deref() {
        let matches = record
            .package_id
            .as_deref()
            .map(|id| id.eq_ignore_ascii_case(package_id))
            .unwrap_or(false);
        if !matches {
            return false;
        }
    }
    if let Some(fhir_version) = query.fhir_version.as_deref() {
        if record.fhir_version.as_deref() != Some(fhir_version) {
            return false;
        }
    }
    if let Some(url) = query.url.as_deref() {
        if record.url.as_deref() != Some(url) {
            return false;
        }
    }
    if let Some(repository) = query.repository.as_deref() {
        let wanted = repository
            .strip_prefix("https://github.com/")
            .or_else(|| repository.strip_prefix("http://github.com/"))
            .unwrap_or(repository);
        let matches = record
            .repository_url
            .as_deref()
            .map(|repo| repo.starts_with(wanted))
            .unwrap_or(false);
        if !matches {
            return false;
        }
    }
    if let Some(branch) = query.branch.as_deref() {
        let suffix = format!("/branches/{}/qa.json", branch);
        let matches = record
            .repository_url
            .as_deref()
            .map(|repo| repo.ends_with(&suffix))
            .unwrap_or(false);
        if !matches {
            return false;
        }
    }
    true
}

#[async_trait]
impl PackageServer for CiServer {
    fn name(&self) -> &str {
        &self.root
    }

    fn handles(&self, reference: &PackageReference) -> bool {
        reference.scope.as_deref() == Some(CI_SCOPE)
    }

    async fn download_listing(&self, package: &str) -> Result<Option<PackageListing>> {
        let snapshot = self.current_snapshot().await?;
        Ok(snapshot
            .records_for(package)
            .map(|records| build_listing(package, &records)))
    }

    /// Cross-checks the parsed version count against the synthesized
    /// listing; a mismatch means the synthesis emitted something semver
    /// cannot read back.
    async fn get_versions(&self, package: &str) -> Result<VersionSet> {
        let Some(listing) = self.download_listing(package).await? else {
            return Ok(VersionSet::default());
        };
        let set = listing.version_set();
        if set.len() != listing.versions.len() {
            return Err(Error::VersionMismatch {
                package: package.to_string(),
                listed: listing.versions.len(),
                parsed: set.len(),
            });
        }
        Ok(set)
    }

    async fn resolve(&self, dependency: &PackageDependency) -> Result<Option<PackageReference>> {
        let discriminator = if dependency.wants_latest() {
            None
        } else {
            Some(dependency.range.as_str())
        };

        if let Some((_, version)) = self.qa_record_for(&dependency.name, discriminator).await? {
            return Ok(Some(PackageReference::scoped(
                CI_SCOPE,
                dependency.name.clone(),
                version,
            )));
        }

        // A semver range over synthesized build versions.
        let Some(listing) = self.download_listing(&dependency.name).await? else {
            return Ok(None);
        };
        Ok(listing
            .resolve(&dependency.range, false)
            .map(|version| PackageReference::scoped(CI_SCOPE, dependency.name.clone(), version)))
    }

    async fn get_package(&self, reference: &PackageReference) -> Result<Vec<u8>> {
        let url = self.get_package_url(reference).await?;
        tracing::debug!(package = %reference, %url, "downloading CI build");
        fetch_bytes(&self.client, &self.root, &reference.moniker(), &url).await
    }
}
