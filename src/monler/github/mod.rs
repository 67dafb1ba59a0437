//! GitHub repository provider.

mod client;

pub use client::GithubClient;

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use pinmonl_common::{Error, Result};
use regex::Regex;

use super::provider::{Provider, RepoHandle};
use super::uri::PkgUri;

pub const PROVIDER_NAME: &str = "github";

fn repo_url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^https?://github\.com/([^/?#]+)/([^/?#]+)").expect("valid github url regex")
    })
}

/// Extract `(owner, repo)` from a github.com web URL.
pub fn parse_repo_url(url: &str) -> Option<(String, String)> {
    let caps = repo_url_pattern().captures(url.trim())?;
    let owner = caps.get(1)?.as_str();
    let repo = caps.get(2)?.as_str();
    let repo = repo.strip_suffix(".git").unwrap_or(repo);
    if repo.is_empty() {
        return None;
    }
    Some((owner.to_string(), repo.to_string()))
}

pub struct GithubProvider {
    client: Arc<GithubClient>,
}

impl GithubProvider {
    pub fn new(client: Arc<GithubClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<GithubClient> {
        &self.client
    }

    async fn fetch(&self, owner: &str, repo: &str) -> Result<RepoHandle> {
        let report = self.client.fetch_report(owner, repo).await?;
        Ok(RepoHandle {
            provider: PROVIDER_NAME.to_string(),
            uri: PkgUri::new(PROVIDER_NAME, owner, repo),
            report,
        })
    }
}

#[async_trait]
impl Provider for GithubProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn ping(&self, url: &str) -> Result<()> {
        parse_repo_url(url)
            .map(|_| ())
            .ok_or_else(|| Error::invalid_input(format!("not a github repository url: {url}")))
    }

    async fn open(&self, url: &str) -> Result<RepoHandle> {
        let (owner, repo) = parse_repo_url(url)
            .ok_or_else(|| Error::invalid_input(format!("not a github repository url: {url}")))?;
        self.fetch(&owner, &repo).await
    }

    async fn parse(&self, uri: &PkgUri) -> Result<RepoHandle> {
        if uri.provider != PROVIDER_NAME {
            return Err(Error::invalid_input(format!(
                "{uri} is not a {PROVIDER_NAME} package uri"
            )));
        }
        self.fetch(&uri.owner, &uri.repo).await
    }
}
