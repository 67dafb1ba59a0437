//! Trait implemented by every repository hosting provider.

use async_trait::async_trait;
use pinmonl_common::{Report, Result};
use serde::Serialize;

use super::uri::PkgUri;

/// An opened repository: where it lives and what it looked like when
/// fetched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepoHandle {
    /// Name of the provider that produced the handle.
    pub provider: String,
    pub uri: PkgUri,
    pub report: Report,
}

/// A pluggable integration with one hosting service.
///
/// `ping` must stay cheap (pattern or existence check, no full fetch).
/// `open` and `parse` resolve the repository and fetch its report.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short lowercase identifier, also used as the URI scheme.
    fn name(&self) -> &str;

    /// Succeeds if this provider can handle `url`.
    async fn ping(&self, url: &str) -> Result<()>;

    /// Open the repository a web URL points at.
    async fn open(&self, url: &str) -> Result<RepoHandle>;

    /// Open the repository identified by a package URI.
    async fn parse(&self, uri: &PkgUri) -> Result<RepoHandle>;
}
