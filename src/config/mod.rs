mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Environment variable holding comma-separated GitHub tokens. Overrides the
/// `github.tokens` list so secrets can stay out of the config file.
pub const GITHUB_TOKENS_ENV: &str = "PINMONL_GITHUB_TOKENS";

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    apply_env(&mut config);
    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./pinmonl.toml",
        "./config.toml",
        "~/.config/pinmonl/config.toml",
        "/etc/pinmonl/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    let mut config = Config::default();
    apply_env(&mut config);
    if config.github.tokens.is_empty() {
        config.github.enabled = false;
    }
    Ok(config)
}

fn apply_env(config: &mut Config) {
    if let Ok(raw) = std::env::var(GITHUB_TOKENS_ENV) {
        let tokens = parse_tokens(&raw);
        if !tokens.is_empty() {
            config.github.tokens = tokens;
        }
    }
}

fn parse_tokens(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.queue.workers == 0 {
        anyhow::bail!("queue.workers must be at least 1");
    }

    if config.queue.max_attempts == 0 {
        anyhow::bail!("queue.max_attempts must be at least 1");
    }

    if config.queue.retry_base_delay_ms > config.queue.retry_max_delay_ms {
        anyhow::bail!("queue.retry_base_delay_ms cannot exceed queue.retry_max_delay_ms");
    }

    if config.github.enabled {
        if config.github.tokens.is_empty() {
            anyhow::bail!(
                "GitHub is enabled but has no tokens (set github.tokens or {})",
                GITHUB_TOKENS_ENV
            );
        }
        if config.github.requests_per_second == 0 {
            anyhow::bail!("github.requests_per_second must be at least 1");
        }
        if config.github.rate_limit_ceiling <= 0 {
            anyhow::bail!("github.rate_limit_ceiling must be positive");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    #[serial]
    fn test_load_minimal_config_uses_defaults() {
        std::env::remove_var(GITHUB_TOKENS_ENV);
        let file = write_config(
            r#"
            [github]
            tokens = ["t1"]
            "#,
        );

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.queue.workers, 4);
        assert_eq!(config.queue.max_attempts, 5);
        assert_eq!(config.github.api_url, "https://api.github.com");
        assert_eq!(config.github.tokens, vec!["t1".to_string()]);
        assert_eq!(config.database.path, std::path::PathBuf::from("pinmonl.db"));
    }

    #[test]
    #[serial]
    fn test_enabled_github_requires_tokens() {
        std::env::remove_var(GITHUB_TOKENS_ENV);
        let file = write_config("[github]\nenabled = true\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("no tokens"));
    }

    #[test]
    #[serial]
    fn test_env_tokens_override_file() {
        std::env::set_var(GITHUB_TOKENS_ENV, "a, b,,c");
        let file = write_config("[github]\ntokens = [\"file\"]\n");
        let config = load_config(file.path()).unwrap();
        std::env::remove_var(GITHUB_TOKENS_ENV);

        assert_eq!(config.github.tokens, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_rejects_zero_workers() {
        let mut config = Config::default();
        config.github.enabled = false;
        config.queue.workers = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_refresh_interval_zero_disables() {
        let mut queue = QueueConfig::default();
        assert!(queue.refresh_interval().is_some());
        queue.refresh_interval_secs = 0;
        assert!(queue.refresh_interval().is_none());
    }

    #[test]
    fn test_parse_config_toml() {
        let config: Config = toml::from_str(
            r#"
            [database]
            path = "/tmp/p.db"

            [queue]
            workers = 2
            max_attempts = 3
            retry_base_delay_ms = 10
            refresh_interval_secs = 0

            [github]
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(config.queue.workers, 2);
        assert_eq!(config.queue.max_attempts, 3);
        assert_eq!(config.queue.retry_base_delay().as_millis(), 10);
        assert!(!config.github.enabled);
        assert!(validate_config(&config).is_ok());
    }
}
