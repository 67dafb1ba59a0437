//! Canonical form of bookmark URLs, used as the monl identity.

use pinmonl_common::{Error, Result};
use url::Url;

/// Normalize a user-entered URL so equivalent spellings map to one monl.
///
/// Scheme and host are lowercased, default ports, fragments, trailing
/// slashes and a trailing `.git` are dropped. Only http(s) URLs with a host
/// are accepted.
pub fn normalize_url(raw: &str) -> Result<String> {
    let mut url = Url::parse(raw.trim())
        .map_err(|e| Error::invalid_input(format!("invalid url {raw:?}: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::invalid_input(format!(
            "unsupported url scheme {:?}",
            url.scheme()
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(Error::invalid_input(format!("url has no host: {raw:?}")));
    }

    url.set_fragment(None);

    let path = url.path().trim_end_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path).to_string();
    url.set_path(&path);

    let mut out = String::from(url.as_str());
    if url.query().is_none() && out.ends_with('/') {
        out.pop();
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equivalent_spellings_collapse() {
        let canonical = "https://github.com/acme/widget";
        for raw in [
            "https://github.com/acme/widget",
            "https://GitHub.com/acme/widget/",
            "  https://github.com/acme/widget.git ",
            "https://github.com:443/acme/widget#readme",
        ] {
            assert_eq!(normalize_url(raw).unwrap(), canonical, "{raw}");
        }
    }

    #[test]
    fn keeps_query_and_path_case() {
        assert_eq!(
            normalize_url("http://Example.com/Docs/Page?x=1").unwrap(),
            "http://example.com/Docs/Page?x=1"
        );
    }

    #[test]
    fn bare_host_has_no_trailing_slash() {
        assert_eq!(normalize_url("https://example.com/").unwrap(), "https://example.com");
    }

    #[test]
    fn rejects_non_http() {
        assert!(normalize_url("ftp://example.com/file").is_err());
        assert!(normalize_url("not a url").is_err());
        assert!(normalize_url("mailto:someone@example.com").is_err());
    }
}
