//! GitHub GraphQL metadata client.
//!
//! One fetch is one POST to `{api_url}/graphql` asking for every field of
//! the report at once, so a report costs a single call against the token's
//! quota. The token is held for exactly that call: acquire, send, read the
//! `X-RateLimit-*` headers back into the pool, read the body, release. The
//! header update happens before any status or decode check.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use pinmonl_common::{Error, FundingLink, Language, License, Report, Result};
use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::monler::credentials::CredentialPool;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("pinmonl/", env!("CARGO_PKG_VERSION"));

const REPOSITORY_QUERY: &str = r#"query($owner: String!, $name: String!) {
  repository(owner: $owner, name: $name) {
    stargazers { totalCount }
    updatedAt
    watchers { totalCount }
    homepageUrl
    issues(filterBy: {states: OPEN}) { totalCount }
    pullRequests(states: OPEN) { totalCount }
    isArchived
    isDisabled
    forkCount
    isMirror
    primaryLanguage { name color }
    licenseInfo { name key }
    fundingLinks { platform url }
  }
}"#;

// ---------------------------------------------------------------------------
// GraphQL response types (private)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    data: Option<RepositoryData>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    #[serde(rename = "type")]
    kind: Option<String>,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RepositoryData {
    repository: Option<RepositoryResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryResponse {
    fork_count: i64,
    homepage_url: Option<String>,
    is_archived: bool,
    is_disabled: bool,
    is_mirror: bool,
    updated_at: Option<DateTime<Utc>>,
    stargazers: CountResponse,
    watchers: CountResponse,
    issues: CountResponse,
    pull_requests: CountResponse,
    primary_language: Option<PrimaryLanguage>,
    license_info: Option<LicenseInfo>,
    #[serde(default)]
    funding_links: Vec<FundingLinkResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CountResponse {
    total_count: i64,
}

#[derive(Debug, Deserialize)]
struct PrimaryLanguage {
    name: String,
    color: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LicenseInfo {
    name: String,
    key: String,
}

#[derive(Debug, Deserialize)]
struct FundingLinkResponse {
    platform: String,
    url: String,
}

impl From<RepositoryResponse> for Report {
    fn from(repo: RepositoryResponse) -> Self {
        Report {
            stars: repo.stargazers.total_count,
            watchers: repo.watchers.total_count,
            open_issues: repo.issues.total_count,
            open_pull_requests: repo.pull_requests.total_count,
            forks: repo.fork_count,
            archived: repo.is_archived,
            disabled: repo.is_disabled,
            mirror: repo.is_mirror,
            homepage_url: repo.homepage_url.filter(|u| !u.is_empty()),
            primary_language: repo.primary_language.map(|l| Language {
                name: l.name,
                color: l.color,
            }),
            license: repo.license_info.map(|l| License {
                name: l.name,
                key: l.key,
            }),
            funding_links: repo
                .funding_links
                .into_iter()
                .map(|f| FundingLink {
                    platform: f.platform,
                    url: f.url,
                })
                .collect(),
            source_updated_at: repo.updated_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct GithubClient {
    client: reqwest::Client,
    api_url: String,
    credentials: Arc<CredentialPool>,
    rate_limiter: governor::RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl GithubClient {
    /// `api_url` is the API root without a trailing `/graphql`, e.g.
    /// `https://api.github.com`.
    pub fn new(api_url: &str, credentials: Arc<CredentialPool>, requests_per_second: u32) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        let per_second = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);

        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            credentials,
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
        }
    }

    pub fn credentials(&self) -> &Arc<CredentialPool> {
        &self.credentials
    }

    /// Fetch the report for `owner/repo`.
    pub async fn fetch_report(&self, owner: &str, repo: &str) -> Result<Report> {
        let body = json!({
            "query": REPOSITORY_QUERY,
            "variables": { "owner": owner, "name": repo },
        });

        let mut credential = self.credentials.acquire().await?;
        self.rate_limiter.until_ready().await;

        let sent = self
            .client
            .post(format!("{}/graphql", self.api_url))
            .bearer_auth(credential.token())
            .json(&body)
            .send()
            .await;

        let resp = match sent {
            Ok(resp) => resp,
            Err(e) => {
                self.credentials.release(credential);
                warn!(owner, repo, error = %e, "GitHub request failed");
                return Err(Error::transport(e.to_string()));
            }
        };

        let (remaining, reset_at) = rate_limit_headers(resp.headers());
        self.credentials
            .update_from_response(&mut credential, remaining, reset_at);

        let status = resp.status();
        let bytes = resp.bytes().await;
        self.credentials.release(credential);

        if status.as_u16() >= 400 {
            warn!(owner, repo, status = status.as_u16(), "GitHub returned an error status");
            return Err(Error::ProviderResponse {
                status: status.as_u16(),
            });
        }

        let bytes = bytes.map_err(|e| Error::transport(e.to_string()))?;
        let report = decode_report(&bytes, owner, repo)?;
        debug!(owner, repo, stars = report.stars, "Fetched GitHub report");
        Ok(report)
    }
}

/// Read `X-RateLimit-Remaining` and `X-RateLimit-Reset` (epoch seconds).
fn rate_limit_headers(headers: &HeaderMap) -> (Option<i64>, Option<DateTime<Utc>>) {
    let number = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
    };

    let remaining = number("x-ratelimit-remaining");
    let reset_at = number("x-ratelimit-reset").and_then(|secs| DateTime::from_timestamp(secs, 0));
    (remaining, reset_at)
}

fn decode_report(bytes: &[u8], owner: &str, repo: &str) -> Result<Report> {
    let payload: GraphqlResponse =
        serde_json::from_slice(bytes).map_err(|e| Error::malformed(e.to_string()))?;

    match payload.data.and_then(|d| d.repository) {
        Some(repository) => Ok(repository.into()),
        None if payload
            .errors
            .iter()
            .any(|e| e.kind.as_deref() == Some("NOT_FOUND")) =>
        {
            Err(Error::not_found(format!("github repository {owner}/{repo}")))
        }
        // RATE_LIMITED, SERVICE_UNAVAILABLE and friends arrive with a 200.
        None if !payload.errors.is_empty() => {
            let messages: Vec<_> = payload.errors.iter().map(|e| e.message.as_str()).collect();
            Err(Error::provider(messages.join("; ")))
        }
        None => Err(Error::malformed("response has no repository")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn decodes_full_repository() {
        let body = serde_json::json!({
            "data": { "repository": {
                "stargazers": { "totalCount": 120 },
                "updatedAt": "2024-03-01T12:00:00Z",
                "watchers": { "totalCount": 8 },
                "homepageUrl": "https://widget.dev",
                "issues": { "totalCount": 4 },
                "pullRequests": { "totalCount": 2 },
                "isArchived": false,
                "isDisabled": false,
                "forkCount": 15,
                "isMirror": true,
                "primaryLanguage": { "name": "Rust", "color": "#dea584" },
                "licenseInfo": { "name": "MIT License", "key": "mit" },
                "fundingLinks": [{ "platform": "GITHUB", "url": "https://github.com/sponsors/acme" }]
            }}
        });

        let report = decode_report(body.to_string().as_bytes(), "acme", "widget").unwrap();
        assert_eq!(report.stars, 120);
        assert_eq!(report.watchers, 8);
        assert_eq!(report.open_issues, 4);
        assert_eq!(report.open_pull_requests, 2);
        assert_eq!(report.forks, 15);
        assert!(report.mirror);
        assert_eq!(report.homepage_url.as_deref(), Some("https://widget.dev"));
        assert_eq!(report.primary_language.unwrap().name, "Rust");
        assert_eq!(report.license.unwrap().key, "mit");
        assert_eq!(report.funding_links.len(), 1);
        assert!(report.source_updated_at.is_some());
    }

    #[test]
    fn empty_homepage_and_missing_optionals() {
        let body = serde_json::json!({
            "data": { "repository": {
                "stargazers": { "totalCount": 0 },
                "updatedAt": null,
                "watchers": { "totalCount": 0 },
                "homepageUrl": "",
                "issues": { "totalCount": 0 },
                "pullRequests": { "totalCount": 0 },
                "isArchived": true,
                "isDisabled": false,
                "forkCount": 0,
                "isMirror": false,
                "primaryLanguage": null,
                "licenseInfo": null,
                "fundingLinks": []
            }}
        });

        let report = decode_report(body.to_string().as_bytes(), "acme", "widget").unwrap();
        assert!(report.archived);
        assert!(report.homepage_url.is_none());
        assert!(report.primary_language.is_none());
        assert!(report.license.is_none());
    }

    #[test]
    fn not_found_error_maps_to_not_found() {
        let body = r#"{"data":{"repository":null},"errors":[{"type":"NOT_FOUND","message":"Could not resolve to a Repository"}]}"#;
        assert_matches!(
            decode_report(body.as_bytes(), "acme", "gone"),
            Err(Error::NotFound(_))
        );
    }

    #[test]
    fn graphql_errors_are_retryable_provider_errors() {
        let body = r#"{"errors":[{"type":"RATE_LIMITED","message":"API rate limit exceeded for user ID 1."}]}"#;
        let err = decode_report(body.as_bytes(), "acme", "widget").unwrap_err();
        assert_matches!(&err, Error::Provider(msg) if msg.contains("rate limit"));
        assert!(err.is_retryable());
    }

    #[test]
    fn garbage_is_malformed() {
        assert_matches!(
            decode_report(b"<html>", "acme", "widget"),
            Err(Error::MalformedResponse(_))
        );
        assert_matches!(
            decode_report(br#"{"data":{"repository":{"stargazers":"many"}}}"#, "acme", "widget"),
            Err(Error::MalformedResponse(_))
        );
        assert_matches!(
            decode_report(br#"{"data":null}"#, "acme", "widget"),
            Err(Error::MalformedResponse(_))
        );
    }

    #[test]
    fn reads_rate_limit_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", "42".parse().unwrap());
        headers.insert("x-ratelimit-reset", "1700000000".parse().unwrap());

        let (remaining, reset_at) = rate_limit_headers(&headers);
        assert_eq!(remaining, Some(42));
        assert_eq!(reset_at.unwrap().timestamp(), 1_700_000_000);

        assert_eq!(rate_limit_headers(&HeaderMap::new()), (None, None));
    }
}
