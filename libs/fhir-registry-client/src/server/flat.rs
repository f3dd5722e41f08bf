//! Flat-scheme FHIR registry backend.

use super::{build_http_client, fetch_bytes, fetch_listing, PackageServer, CI_SCOPE};
use crate::error::{Error, Result};
use crate::listing::PackageListing;
use async_trait::async_trait;
use siderite_package::PackageReference;

/// Backend for FHIR-flavored registries with the flat URL scheme:
/// `{root}/{name}` for the listing, `{root}/{name}/{version}` for the
/// tarball. The listing document shape is the same as NPM's.
pub struct FlatServer {
    client: reqwest::Client,
    root: String,
}

impl FlatServer {
    pub fn new(root: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: build_http_client(false)?,
            root: root.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn with_client(root: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            client,
            root: root.into().trim_end_matches('/').to_string(),
        }
    }

    fn tarball_url(&self, reference: &PackageReference, version: &str) -> String {
        format!("{}/{}/{}", self.root, reference.name, version)
    }
}

#[async_trait]
impl PackageServer for FlatServer {
    fn name(&self) -> &str {
        &self.root
    }

    fn handles(&self, reference: &PackageReference) -> bool {
        reference.scope.as_deref() != Some(CI_SCOPE)
    }

    async fn download_listing(&self, package: &str) -> Result<Option<PackageListing>> {
        let url = format!("{}/{}", self.root, package);
        fetch_listing(&self.client, &self.root, package, &url).await
    }

    async fn get_package(&self, reference: &PackageReference) -> Result<Vec<u8>> {
        let Some(version) = reference.version.as_deref() else {
            return Err(Error::MisroutedReference {
                reference: reference.moniker(),
                server: self.root.clone(),
            });
        };
        let url = self.tarball_url(reference, version);
        fetch_bytes(&self.client, &self.root, &reference.moniker(), &url).await
    }
}
