//! Registry of [`Provider`] implementations keyed by name.
//!
//! The registry is built with `&mut self` during startup and then shared as
//! `Arc<ProviderRegistry>`, which makes it read-only once traffic begins.
//! Providers are kept in a `BTreeMap` so listing and `guess` results come
//! out in a stable, name-sorted order.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::{join_all, try_join_all};
use pinmonl_common::{Error, Result};
use tracing::debug;

use super::provider::{Provider, RepoHandle};
use super::uri::PkgUri;

#[derive(Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under `name`. Registering the same name again
    /// replaces the earlier provider.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        let name = name.into();
        if self.providers.insert(name.clone(), provider).is_some() {
            debug!(provider = %name, "Replaced registered provider");
        }
    }

    /// Registered provider names, sorted.
    pub fn providers(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Provider>> {
        self.providers.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    fn lookup(&self, name: &str) -> Result<&Arc<dyn Provider>> {
        self.get(name).ok_or_else(|| Error::unknown_provider(name))
    }

    pub async fn open(&self, provider: &str, url: &str) -> Result<RepoHandle> {
        self.lookup(provider)?.open(url).await
    }

    /// Open a `provider://owner/repo` URI with the provider named by its
    /// scheme.
    pub async fn parse(&self, uri: &str) -> Result<RepoHandle> {
        let uri: PkgUri = uri.parse()?;
        self.lookup(&uri.provider)?.parse(&uri).await
    }

    pub async fn ping(&self, provider: &str, url: &str) -> Result<()> {
        self.lookup(provider)?.ping(url).await
    }

    /// Open `url` with every provider that accepts it.
    pub async fn guess(&self, url: &str) -> Result<Vec<RepoHandle>> {
        self.guess_without(&[], url).await
    }

    /// Like [`guess`](Self::guess), skipping the providers named in
    /// `excluded`.
    ///
    /// All providers are pinged concurrently. Every provider whose ping
    /// succeeds is then opened concurrently; the first open failure aborts
    /// the call and discards the other results. Callers that want partial
    /// results should ping and open providers individually.
    pub async fn guess_without(&self, excluded: &[&str], url: &str) -> Result<Vec<RepoHandle>> {
        let candidates: Vec<(&str, &Arc<dyn Provider>)> = self
            .providers
            .iter()
            .filter(|(name, _)| !excluded.contains(&name.as_str()))
            .map(|(name, provider)| (name.as_str(), provider))
            .collect();

        let pings = join_all(candidates.iter().map(|(name, provider)| async move {
            match provider.ping(url).await {
                Ok(()) => Some(*provider),
                Err(e) => {
                    debug!(provider = %name, url, error = %e, "Provider does not match url");
                    None
                }
            }
        }))
        .await;

        let matched: Vec<&Arc<dyn Provider>> = pings.into_iter().flatten().collect();
        if matched.is_empty() {
            return Ok(Vec::new());
        }

        try_join_all(matched.into_iter().map(|provider| provider.open(url))).await
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}
