//! FHIR package resolution and restoration.
//!
//! This crate provides the async core of a client-side package manager for
//! FHIR Implementation Guides: a prioritized chain of package servers (NPM
//! protocol, flat FHIR registries, and the CI build server), a local cache
//! used as the last-resort resolver and install target, and a restorer
//! that computes the full transitive dependency closure of a manifest.
//!
//! # Examples
//!
//! ## Restore a closure from the public registries
//!
//! ```rust,no_run
//! use siderite_registry_client::{
//!     CiServer, CiServerOptions, FileSystemCache, FlatServer, NpmServer, PackageServer, Restorer,
//! };
//! use siderite_package::PackageManifest;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let servers: Vec<Arc<dyn PackageServer>> = vec![
//!     Arc::new(FlatServer::new("https://packages.simplifier.net")?),
//!     Arc::new(NpmServer::new("https://registry.npmjs.org")?),
//!     Arc::new(CiServer::new(CiServerOptions::default())?),
//! ];
//! let cache = Arc::new(FileSystemCache::new("/tmp/fhir-packages"));
//!
//! let mut manifest = PackageManifest::new("example.project", "0.1.0");
//! manifest.add_dependency("hl7.fhir.us.core", "6.1.0");
//!
//! let closure = Restorer::new(servers, cache).restore(&manifest).await?;
//! for reference in closure.references() {
//!     println!("restored {}", reference);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Resolve a CI build by branch
//!
//! ```rust,no_run
//! use siderite_registry_client::{CiServer, CiServerOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ci = CiServer::new(CiServerOptions::default())?;
//! if let Some(refs) = ci.get_references("cinc.fhir.ig", Some("RFphase1")).await? {
//!     println!("{} -> {}", refs.tagged, refs.resolved);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod closure;
pub mod error;
pub mod listing;
pub mod resolver;
pub mod restore;
pub mod server;
pub mod version_set;

pub use cache::{FileSystemCache, PackageCache};
pub use closure::PackageClosure;
pub use error::{Error, Result};
pub use listing::{Dist, PackageListing, PackageRelease};
pub use resolver::Resolver;
pub use restore::{OnInstalled, Restorer};
pub use server::{
    Branch, CatalogQuery, CiQaRecord, CiReference, CiServer, CiServerOptions, FlatServer,
    NpmServer, PackageServer, CI_SCOPE,
};
pub use version_set::VersionSet;

// Re-export the manifest model for convenience.
pub use siderite_package::{PackageDependency, PackageManifest, PackageReference};
