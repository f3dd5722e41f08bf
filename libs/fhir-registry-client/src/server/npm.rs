//! NPM-protocol registry backend.

use super::{build_http_client, fetch_bytes, fetch_listing, PackageServer, CI_SCOPE};
use crate::error::{Error, Result};
use crate::listing::PackageListing;
use async_trait::async_trait;
use siderite_package::PackageReference;

/// Backend for NPM-protocol registries (`registry.npmjs.org`,
/// `packages.simplifier.net` and mirrors).
pub struct NpmServer {
    client: reqwest::Client,
    root: String,
}

impl NpmServer {
    pub fn new(root: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: build_http_client(false)?,
            root: normalize_root(root.into()),
        })
    }

    pub fn with_client(root: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            client,
            root: normalize_root(root.into()),
        }
    }

    /// `{root}/{name}`, with the scope separator URL-encoded for scoped
    /// names: `{root}/@{scope}%2F{name}`.
    fn listing_url(&self, package: &str) -> String {
        match split_scoped(package) {
            Some((scope, name)) => format!("{}/@{}%2F{}", self.root, scope, name),
            None => format!("{}/{}", self.root, package),
        }
    }

    /// `{root}/{name}/-/{name}-{version}.tgz`, with the scope as an
    /// unencoded path segment for scoped names.
    fn tarball_url(&self, reference: &PackageReference, version: &str) -> String {
        match &reference.scope {
            Some(scope) => format!(
                "{}/@{}/{}/-/{}-{}.tgz",
                self.root, scope, reference.name, reference.name, version
            ),
            None => format!(
                "{}/{}/-/{}-{}.tgz",
                self.root, reference.name, reference.name, version
            ),
        }
    }
}

#[async_trait]
impl PackageServer for NpmServer {
    fn name(&self) -> &str {
        &self.root
    }

    fn handles(&self, reference: &PackageReference) -> bool {
        reference.scope.as_deref() != Some(CI_SCOPE)
    }

    async fn download_listing(&self, package: &str) -> Result<Option<PackageListing>> {
        let url = self.listing_url(package);
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

fn normalize_root(root: String) -> String {
    root.trim_end_matches('/').to_string()
}

fn split_scoped(package: &str) -> Option<(&str, &str)> {
    let rest = package.strip_prefix('@')?;
    rest.split_once('/')
}
