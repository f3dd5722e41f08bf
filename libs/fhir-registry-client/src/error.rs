//! Error types for registry-client

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Registry client errors
#[derive(Error, Debug)]
pub enum Error {
    /// No server in the chain, and not the cache either, could satisfy a
    /// directly-requested package. During a restore this is recovered into
    /// the closure's missing set instead of being raised.
    #[error("Package not found: {0}")]
    PackageNotFound(String),

    /// A reference was handed to a server that can never serve it, e.g. a
    /// non-CI-scoped reference passed to the CI build server.
    #[error("Reference {reference} cannot be served by {server}")]
    MisroutedReference { reference: String, server: String },

    /// Malformed listing JSON, a missing required field, or an otherwise
    /// undecodable server answer.
    #[error("Protocol error from {server} for {package}: {detail}")]
    Protocol {
        server: String,
        package: String,
        detail: String,
    },

    /// A non-2xx, non-404 HTTP answer.
    #[error("Server {server} answered {status} for {url}")]
    UnexpectedStatus {
        server: String,
        status: u16,
        url: String,
    },

    /// The CI listing synthesis produced versions the semver parser does
    /// not agree with; indicates a synthesis bug, never recovered.
    #[error("Version count mismatch for {package}: listing has {listed}, parsed {parsed}")]
    VersionMismatch {
        package: String,
        listed: usize,
        parsed: usize,
    },

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Package error: {0}")]
    Package(#[from] siderite_package::PackageError),
}

impl Error {
    /// Transport-level failures make a server fall out of the resolution
    /// chain; everything else aborts the operation.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Http(_) | Error::UnexpectedStatus { .. })
    }
}
