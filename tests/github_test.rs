//! GitHub provider against a mocked GraphQL endpoint.

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::Utc;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::TestHarness;
use pinmonl::monler::github::{GithubClient, GithubProvider};
use pinmonl::monler::{CredentialPool, PkgUri, PoolOptions, ProviderRegistry};
use pinmonl::queue::{JobRegistry, MonlCrawler};
use pinmonl_common::{Error, JobState};
use pinmonl_db::queries::{monls, reports};

fn repository_body() -> serde_json::Value {
    json!({
        "data": { "repository": {
            "stargazers": { "totalCount": 1200 },
            "updatedAt": "2024-05-01T08:30:00Z",
            "watchers": { "totalCount": 40 },
            "homepageUrl": "https://widget.dev",
            "issues": { "totalCount": 12 },
            "pullRequests": { "totalCount": 3 },
            "isArchived": false,
            "isDisabled": false,
            "forkCount": 85,
            "isMirror": false,
            "primaryLanguage": { "name": "Rust", "color": "#dea584" },
            "licenseInfo": { "name": "Apache License 2.0", "key": "apache-2.0" },
            "fundingLinks": [
                { "platform": "GITHUB", "url": "https://github.com/sponsors/acme" },
                { "platform": "OPEN_COLLECTIVE", "url": "https://opencollective.com/acme" }
            ]
        }}
    })
}

fn future_reset() -> String {
    (Utc::now().timestamp() + 3600).to_string()
}

fn pool(tokens: &[&str]) -> Arc<CredentialPool> {
    Arc::new(CredentialPool::new(
        tokens.iter().map(|t| t.to_string()),
        PoolOptions {
            ceiling: 5000,
            acquire_timeout: Duration::from_millis(100),
            poll_interval: Duration::from_millis(10),
        },
    ))
}

fn registry(server: &MockServer, credentials: Arc<CredentialPool>) -> ProviderRegistry {
    let client = Arc::new(GithubClient::new(&server.uri(), credentials, 100));
    let mut registry = ProviderRegistry::new();
    registry.register("github", Arc::new(GithubProvider::new(client)));
    registry
}

#[tokio::test]
async fn guess_with_github_only_returns_one_handle() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(header("authorization", "Bearer t0"))
        .and(body_partial_json(json!({
            "variables": { "owner": "acme", "name": "widget" }
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(repository_body())
                .insert_header("x-ratelimit-remaining", "4999")
                .insert_header("x-ratelimit-reset", future_reset().as_str()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let credentials = pool(&["t0"]);
    let registry = registry(&server, credentials.clone());

    let handles = registry.guess("https://github.com/acme/widget").await.unwrap();
    assert_eq!(handles.len(), 1);

    let handle = &handles[0];
    assert_eq!(handle.provider, "github");
    assert_eq!(handle.uri, PkgUri::new("github", "acme", "widget"));
    assert_eq!(handle.report.stars, 1200);
    assert_eq!(handle.report.watchers, 40);
    assert_eq!(handle.report.open_issues, 12);
    assert_eq!(handle.report.open_pull_requests, 3);
    assert_eq!(handle.report.forks, 85);
    assert_eq!(handle.report.license.as_ref().unwrap().key, "apache-2.0");
    assert_eq!(handle.report.funding_links.len(), 2);

    let status = credentials.status();
    assert!(!status[0].in_use);
    assert_eq!(status[0].window.unwrap().remaining, 4999);
}

#[test]
fn guess_with_no_providers_is_empty() {
    let registry = ProviderRegistry::new();
    let handles = tokio_test::block_on(registry.guess("https://github.com/acme/widget")).unwrap();
    assert!(handles.is_empty());
}

#[tokio::test]
async fn parse_uses_package_uri() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(repository_body()))
        .mount(&server)
        .await;

    let registry = registry(&server, pool(&["t0"]));
    let handle = registry.parse("github://acme/widget").await.unwrap();
    assert_eq!(handle.report.stars, 1200);
}

#[tokio::test]
async fn error_status_still_updates_rate_limit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(
            ResponseTemplate::new(502)
                .insert_header("x-ratelimit-remaining", "0")
                .insert_header("x-ratelimit-reset", future_reset().as_str()),
        )
        .mount(&server)
        .await;

    let credentials = pool(&["t0"]);
    let registry = registry(&server, credentials.clone());

    assert_matches!(
        registry.open("github", "https://github.com/acme/widget").await,
        Err(Error::ProviderResponse { status: 502 })
    );

    // Exhausted until the reset an hour out.
    assert!(credentials.try_acquire().is_none());
    let window = credentials.status()[0].window.unwrap();
    assert_eq!(window.remaining, 0);

    // The next fetch gives up waiting for a credential.
    assert_matches!(
        registry.open("github", "https://github.com/acme/widget").await,
        Err(Error::NoCredentialAvailable)
    );
}

#[tokio::test]
async fn exhausted_token_rotates_to_the_next() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(repository_body())
                .insert_header("x-ratelimit-remaining", "0")
                .insert_header("x-ratelimit-reset", future_reset().as_str()),
        )
        .expect(2)
        .mount(&server)
        .await;

    let credentials = pool(&["t0", "t1"]);
    let registry = registry(&server, credentials.clone());

    registry.open("github", "https://github.com/acme/widget").await.unwrap();
    registry.open("github", "https://github.com/acme/widget").await.unwrap();

    // Each token served one call and is now exhausted.
    let remaining: Vec<_> = credentials
        .status()
        .iter()
        .map(|s| s.window.unwrap().remaining)
        .collect();
    assert_eq!(remaining, vec![0, 0]);
    assert!(credentials.try_acquire().is_none());
}

#[tokio::test]
async fn bad_payload_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let registry = registry(&server, pool(&["t0"]));
    assert_matches!(
        registry.open("github", "https://github.com/acme/widget").await,
        Err(Error::MalformedResponse(_))
    );
}

#[tokio::test]
async fn missing_repository_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "repository": null },
            "errors": [{ "type": "NOT_FOUND", "message": "Could not resolve to a Repository" }]
        })))
        .mount(&server)
        .await;

    let registry = registry(&server, pool(&["t0"]));
    assert_matches!(
        registry.open("github", "https://github.com/acme/gone").await,
        Err(Error::NotFound(_))
    );
}

#[tokio::test]
async fn rate_limited_payload_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errors": [{ "type": "RATE_LIMITED", "message": "API rate limit exceeded for user ID 1." }]
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(repository_body()))
        .mount(&server)
        .await;

    let h = TestHarness::with(JobRegistry::with_defaults(), registry(&server, pool(&["t0"])));
    let (monl, _) = monls::find_or_create(&h.conn(), "https://github.com/acme/widget").unwrap();
    let enqueued = h.dispatcher.enqueue(&MonlCrawler::new(monl.id)).unwrap();

    let processed = h.drain().await;
    assert_eq!(processed.len(), 2);
    assert_eq!(processed[0].state, JobState::Pending);
    assert!(processed[0]
        .last_error
        .as_deref()
        .unwrap()
        .contains("API rate limit exceeded"));

    let job = h.job(enqueued.id);
    assert_eq!(job.state, JobState::Succeeded);
    assert_eq!(job.attempts, 2);
    assert_eq!(reports::list_reports(&h.conn(), monl.id).unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// Crawl job through the real provider
// ---------------------------------------------------------------------------

#[tokio::test]
async fn crawl_job_stores_github_report() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(repository_body()))
        .mount(&server)
        .await;

    let h = TestHarness::with(JobRegistry::with_defaults(), registry(&server, pool(&["t0"])));
    let (monl, _) = monls::find_or_create(&h.conn(), "https://github.com/acme/widget").unwrap();
    let enqueued = h.dispatcher.enqueue(&MonlCrawler::new(monl.id)).unwrap();

    h.drain().await;

    assert_eq!(h.job(enqueued.id).state, JobState::Succeeded);
    let stored = reports::list_reports(&h.conn(), monl.id).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].uri, "github://acme/widget");
    assert_eq!(stored[0].report.stars, 1200);
}

#[tokio::test]
async fn provider_outage_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(repository_body()))
        .mount(&server)
        .await;

    let h = TestHarness::with(JobRegistry::with_defaults(), registry(&server, pool(&["t0"])));
    let (monl, _) = monls::find_or_create(&h.conn(), "https://github.com/acme/widget").unwrap();
    let enqueued = h.dispatcher.enqueue(&MonlCrawler::new(monl.id)).unwrap();

    let processed = h.drain().await;
    assert_eq!(processed.len(), 2);
    assert_eq!(
        processed[0].last_error.as_deref(),
        Some("Provider responded with status 503")
    );

    let job = h.job(enqueued.id);
    assert_eq!(job.state, JobState::Succeeded);
    assert_eq!(job.attempts, 2);
}
