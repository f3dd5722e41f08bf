//! Polymorphic package-server backends.
//!
//! Three concrete backends implement the same resolve/fetch contract: the
//! NPM protocol ([`NpmServer`]), the flat FHIR registry scheme
//! ([`FlatServer`]), and the CI build server ([`CiServer`]). The resolver
//! treats them as an ordered chain with uniform failure semantics.

mod ci;
mod flat;
mod npm;

pub use ci::{Branch, CatalogQuery, CiQaRecord, CiReference, CiServer, CiServerOptions, CI_SCOPE};
pub use flat::FlatServer;
pub use npm::NpmServer;

use crate::error::{Error, Result};
use crate::listing::PackageListing;
use crate::version_set::VersionSet;
use async_trait::async_trait;
use siderite_package::{PackageDependency, PackageReference};
use std::time::Duration;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// One package source in the resolution chain.
#[async_trait]
pub trait PackageServer: Send + Sync {
    /// Identity used in logs and error context.
    fn name(&self) -> &str;

    /// Whether this backend is responsible for the given reference.
    /// Routing is by scope: the CI backend owns the `build.fhir.org`
    /// sentinel scope, the registry backends own everything else.
    fn handles(&self, reference: &PackageReference) -> bool;

    /// Fetch the package's listing document. `Ok(None)` means the server
    /// answered authoritatively that the package does not exist (404).
    async fn download_listing(&self, package: &str) -> Result<Option<PackageListing>>;

    /// All versions this server knows for the package.
    async fn get_versions(&self, package: &str) -> Result<VersionSet> {
        Ok(self
            .download_listing(package)
            .await?
            .map(|listing| listing.version_set())
            .unwrap_or_default())
    }

    /// Resolve a requirement to a concrete reference. `Ok(None)` when the
    /// package is unknown here or no version satisfies the range.
    async fn resolve(&self, dependency: &PackageDependency) -> Result<Option<PackageReference>> {
        let Some(listing) = self.download_listing(&dependency.name).await? else {
            return Ok(None);
        };

        let version = if dependency.wants_latest() {
            listing
                .resolve(&dependency.range, true)
                .or_else(|| listing.resolve(&dependency.range, false))
        } else {
            listing.resolve(&dependency.range, false)
        };

        Ok(version.map(|version| PackageReference::new(dependency.name.clone(), version)))
    }

    /// Download the tarball bytes for a concrete reference.
    async fn get_package(&self, reference: &PackageReference) -> Result<Vec<u8>>;
}

pub(crate) fn build_http_client(insecure: bool) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().timeout(HTTP_TIMEOUT);
    if insecure {
        builder = builder.danger_accept_invalid_certs(true);
    }
    Ok(builder.build()?)
}

/// GET a listing document; 404 is an authoritative "no such package".
pub(crate) async fn fetch_listing(
    client: &reqwest::Client,
    server: &str,
    package: &str,
    url: &str,
) -> Result<Option<PackageListing>> {
    let response = client.get(url).send().await?;

    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !response.status().is_success() {
        return Err(Error::UnexpectedStatus {
            server: server.to_string(),
            status: response.status().as_u16(),
            url: url.to_string(),
        });
    }

    let listing = response
        .json::<PackageListing>()
        .await
        .map_err(|e| Error::Protocol {
            server: server.to_string(),
            package: package.to_string(),
            detail: format!("undecodable listing: {}", e),
        })?;
    Ok(Some(listing))
}

/// GET raw bytes (tarballs); 404 maps to `PackageNotFound`.
pub(crate) async fn fetch_bytes(
    client: &reqwest::Client,
    server: &str,
    moniker: &str,
    url: &str,
) -> Result<Vec<u8>> {
    let response = client.get(url).send().await?;

    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Err(Error::PackageNotFound(moniker.to_string()));
    }
    if !response.status().is_success() {
        return Err(Error::UnexpectedStatus {
            server: server.to_string(),
            status: response.status().as_u16(),
            url: url.to_string(),
        });
    }

    Ok(response.bytes().await?.to_vec())
}
