//! Normalized repository statistics returned by every provider.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata snapshot for one repository, built fresh on every fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub stars: i64,
    pub watchers: i64,
    pub open_issues: i64,
    pub open_pull_requests: i64,
    pub forks: i64,
    pub archived: bool,
    pub disabled: bool,
    pub mirror: bool,
    pub homepage_url: Option<String>,
    pub primary_language: Option<Language>,
    pub license: Option<License>,
    #[serde(default)]
    pub funding_links: Vec<FundingLink>,
    /// Last update time as reported by the hosting service.
    pub source_updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Language {
    pub name: String,
    /// Hex color such as `#dea584`, when the host knows one.
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct License {
    pub name: String,
    /// SPDX-like short key, e.g. `mit`.
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingLink {
    pub platform: String,
    pub url: String,
}
