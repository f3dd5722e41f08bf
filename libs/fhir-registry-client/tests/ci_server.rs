//! CI build-server behavior against the bundled `qas.json` fixture.

use siderite_package::{PackageDependency, PackageReference};
use siderite_registry_client::{
    CatalogQuery, CiQaRecord, CiServer, CiServerOptions, PackageServer, CI_SCOPE,
};

fn fixture_records() -> Vec<CiQaRecord> {
    serde_json::from_str(include_str!("fixtures/qas.json")).expect("fixture parses")
}

async fn fixture_server() -> CiServer {
    let server = CiServer::new(CiServerOptions::default()).expect("server builds");
    server.preload(fixture_records()).await;
    server
}

#[tokio::test]
async fn catalog_without_filters_lists_each_package_once() {
    let server = fixture_server().await;
    let hits = server.catalog(&CatalogQuery::default()).await.unwrap();

    assert_eq!(hits.len(), 5);
    let mut ids: Vec<&str> = hits.iter().filter_map(|r| r.package_id.as_deref()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 5);
}

#[tokio::test]
async fn catalog_by_package_id() {
    let server = fixture_server().await;
    let hits = server
        .catalog(&CatalogQuery {
            package_id: Some("hl7.fhir.ca.baseline".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].package_id.as_deref(), Some("hl7.fhir.ca.baseline"));
}

#[tokio::test]
async fn catalog_by_fhir_version() {
    let server = fixture_server().await;

    for (fhir_version, expected) in [("4.0.1", 3), ("4.3.0", 1), ("5.0.0", 1), ("3.0.2", 0)] {
        let hits = server
            .catalog(&CatalogQuery {
                fhir_version: Some(fhir_version.to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), expected, "fhirVersion {}", fhir_version);
    }
}

#[tokio::test]
async fn catalog_by_repository_strips_github_host() {
    let server = fixture_server().await;
    let hits = server
        .catalog(&CatalogQuery {
            repository: Some("https://github.com/tewhatuora/cinc-fhir-ig".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].package_id.as_deref(), Some("cinc.fhir.ig"));
}

#[tokio::test]
async fn catalog_by_bare_branch_name() {
    let server = fixture_server().await;
    let hits = server
        .catalog(&CatalogQuery {
            branch: Some("RFphase1".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].package_id.as_deref(), Some("cinc.fhir.ig"));
}

#[tokio::test]
async fn listing_sizes_match_build_count() {
    let server = fixture_server().await;

    let baseline = server
        .download_listing("hl7.fhir.ca.baseline")
        .await
        .unwrap()
        .expect("listing exists");
    assert_eq!(baseline.versions.len(), 2);

    let cinc = server
        .download_listing("cinc.fhir.ig")
        .await
        .unwrap()
        .expect("listing exists");
    assert_eq!(cinc.versions.len(), 3);

    assert!(server.download_listing("no.such.package").await.unwrap().is_none());
}

#[tokio::test]
async fn every_dist_tag_points_at_an_existing_version() {
    let server = fixture_server().await;

    for package in [
        "hl7.fhir.ca.baseline",
        "cinc.fhir.ig",
        "hl7.fhir.us.core",
        "hl7.fhir.uv.subscriptions-backport",
        "hl7.fhir.uv.sql-on-fhir",
    ] {
        let listing = server
            .download_listing(package)
            .await
            .unwrap()
            .expect("listing exists");
        for (tag, version) in &listing.dist_tags {
            assert!(
                listing.versions.contains_key(version),
                "{package}: tag {tag} points at missing {version}"
            );
        }
    }
}

#[tokio::test]
async fn default_branch_resolves_under_every_discriminator_spelling() {
    let server = fixture_server().await;

    for discriminator in [None, Some("current"), Some("master"), Some("current$master")] {
        let refs = server
            .get_references("hl7.fhir.ca.baseline", discriminator)
            .await
            .unwrap()
            .expect("reference resolves");

        assert_eq!(refs.tagged.version.as_deref(), Some("current"));
        assert_eq!(
            refs.resolved.version.as_deref(),
            Some("1.1.0-cibuild+20240809-194642Z"),
            "discriminator {:?}",
            discriminator
        );
        assert_eq!(refs.resolved.scope.as_deref(), Some(CI_SCOPE));
    }
}

#[tokio::test]
async fn feature_branch_resolves_to_its_own_build() {
    let server = fixture_server().await;

    let refs = server
        .get_references("cinc.fhir.ig", Some("RFphase1"))
        .await
        .unwrap()
        .expect("reference resolves");

    assert_eq!(refs.tagged.version.as_deref(), Some("current$RFphase1"));
    assert_eq!(
        refs.resolved.version.as_deref(),
        Some("0.3.9-cibuild+20240618-041305Z")
    );
}

#[tokio::test]
async fn unknown_discriminator_resolves_to_nothing() {
    let server = fixture_server().await;
    assert!(server
        .get_references("cinc.fhir.ig", Some("no-such-branch"))
        .await
        .unwrap()
        .is_none());
    assert!(server
        .get_references("no.such.package", None)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn tarball_urls_follow_the_branch() {
    let server = fixture_server().await;

    let default_branch = server
        .get_references("cinc.fhir.ig", None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        server.get_package_url(&default_branch.resolved).await.unwrap(),
        "https://build.fhir.org/ig/tewhatuora/cinc-fhir-ig/package.tgz"
    );

    let feature_branch = server
        .get_references("cinc.fhir.ig", Some("RFphase1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        server.get_package_url(&feature_branch.resolved).await.unwrap(),
        "https://build.fhir.org/ig/tewhatuora/cinc-fhir-ig/branches/RFphase1/package.tgz"
    );
}

#[tokio::test]
async fn synthesized_versions_round_trip_through_discrimination() {
    let server = fixture_server().await;

    for package in ["hl7.fhir.ca.baseline", "cinc.fhir.ig", "hl7.fhir.us.core"] {
        let listing = server.download_listing(package).await.unwrap().unwrap();
        for version in listing.versions.keys() {
            let refs = server
                .get_references(package, Some(version))
                .await
                .unwrap()
                .unwrap_or_else(|| panic!("{package}@{version} discriminates"));
            assert_eq!(refs.resolved.version.as_deref(), Some(version.as_str()));
        }
    }
}

#[tokio::test]
async fn resolve_treats_ranges_and_tags_uniformly() {
    let server = fixture_server().await;

    let by_tag = server
        .resolve(&PackageDependency::new("cinc.fhir.ig", "current$RFphase1"))
        .await
        .unwrap()
        .expect("tag resolves");
    assert_eq!(
        by_tag.version.as_deref(),
        Some("0.3.9-cibuild+20240618-041305Z")
    );

    let latest = server
        .resolve(&PackageDependency::new("cinc.fhir.ig", ""))
        .await
        .unwrap()
        .expect("empty range resolves to current");
    assert_eq!(
        latest.version.as_deref(),
        Some("0.4.2-cibuild+20240701-120000Z")
    );
}

#[tokio::test]
async fn get_versions_agrees_with_the_listing() {
    let server = fixture_server().await;

    let listing = server.download_listing("cinc.fhir.ig").await.unwrap().unwrap();
    let versions = server.get_versions("cinc.fhir.ig").await.unwrap();
    assert_eq!(versions.len(), listing.versions.len());
}

#[tokio::test]
async fn misrouted_scope_is_rejected_for_urls_too() {
    let server = fixture_server().await;
    let reference = PackageReference::new("cinc.fhir.ig", "current");
    assert!(server.get_package_url(&reference).await.is_err());
}
