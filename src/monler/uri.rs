//! `provider://owner/repo` package URIs.

use std::fmt;
use std::str::FromStr;

use pinmonl_common::Error;
use serde::{Deserialize, Serialize};
use url::Url;

/// Provider-qualified repository location, e.g. `github://rust-lang/rust`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PkgUri {
    pub provider: String,
    pub owner: String,
    pub repo: String,
}

impl PkgUri {
    pub fn new(provider: impl Into<String>, owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            owner: owner.into(),
            repo: repo.into(),
        }
    }
}

impl FromStr for PkgUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::invalid_input(format!("invalid package uri: {s:?}"));

        let url = Url::parse(s).map_err(|_| invalid())?;
        if !url.scheme().chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            || !url.username().is_empty()
            || url.password().is_some()
            || url.port().is_some()
            || url.query().is_some()
            || url.fragment().is_some()
        {
            return Err(invalid());
        }

        let owner = url.host_str().filter(|h| !h.is_empty()).ok_or_else(invalid)?;
        let mut segments: Vec<&str> = url.path_segments().ok_or_else(invalid)?.collect();
        if segments.last() == Some(&"") {
            segments.pop();
        }
        let [repo] = segments[..] else {
            return Err(invalid());
        };
        if repo.is_empty() {
            return Err(invalid());
        }

        // The scheme comes back lowercased.
        Ok(Self::new(url.scheme(), owner, repo))
    }
}

impl fmt::Display for PkgUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.provider, self.owner, self.repo)
    }
}

impl TryFrom<String> for PkgUri {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PkgUri> for String {
    fn from(uri: PkgUri) -> Self {
        uri.to_string()
    }
}
