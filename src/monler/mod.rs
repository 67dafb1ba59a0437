//! Repository monitoring: providers that turn a bookmark URL into a
//! [`Report`](pinmonl_common::Report), and the registry that picks them.

pub mod credentials;
pub mod github;
pub mod normalize;
pub mod provider;
pub mod registry;
pub mod uri;

pub use credentials::{CredentialLease, CredentialPool, PoolOptions, RateWindow};
pub use normalize::normalize_url;
pub use provider::{Provider, RepoHandle};
pub use registry::ProviderRegistry;
pub use uri::PkgUri;

use std::sync::Arc;

use crate::config::GithubConfig;
use github::{GithubClient, GithubProvider};

/// Build the registry of enabled providers from configuration.
///
/// GitHub is registered only when enabled and at least one token is
/// configured. An empty registry is valid: `guess` then returns nothing.
pub fn build_registry(github: &GithubConfig) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();

    if github.enabled && !github.tokens.is_empty() {
        let pool = Arc::new(CredentialPool::new(
            github.tokens.iter().cloned(),
            PoolOptions {
                ceiling: github.rate_limit_ceiling,
                acquire_timeout: github.acquire_timeout(),
                poll_interval: github.acquire_poll(),
            },
        ));
        let client = Arc::new(GithubClient::new(
            &github.api_url,
            pool,
            github.requests_per_second,
        ));
        registry.register(github::PROVIDER_NAME, Arc::new(GithubProvider::new(client)));
        tracing::info!(tokens = github.tokens.len(), "Registered GitHub provider");
    } else if github.enabled {
        tracing::warn!("GitHub provider enabled but no tokens configured; skipping");
    }

    registry
}
