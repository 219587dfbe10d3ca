use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// Tokens missing from the file are resolved from `GITHUB_TOKENS`
/// (comma-separated) and then `GITHUB_TOKEN`.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use star_harvest::config::load_config;
///
/// let config = load_config(Path::new("harvest.toml")).unwrap();
/// println!("Discovery limit: {}", config.discovery.limit);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content, |name| std::env::var(name).ok())
}

/// Parses configuration text, resolving tokens through `env`
pub fn parse_config<F>(content: &str, env: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config: Config = toml::from_str(content)?;

    config.api.tokens = resolve_tokens(&config.api.tokens, env);
    if config.api.tokens.is_empty() {
        return Err(ConfigError::MissingTokens);
    }

    validate(&config)?;

    Ok(config)
}

/// Resolves the credential list
///
/// Explicit tokens win. Otherwise `GITHUB_TOKENS` is split on commas, and a
/// lone `GITHUB_TOKEN` is used as a last resort. Blank entries are dropped.
pub fn resolve_tokens<F>(configured: &[String], env: F) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    let explicit = split_tokens(configured.iter().map(String::as_str));
    if !explicit.is_empty() {
        return explicit;
    }

    if let Some(raw) = env("GITHUB_TOKENS") {
        let tokens = split_tokens(raw.split(','));
        if !tokens.is_empty() {
            return tokens;
        }
    }

    env("GITHUB_TOKEN")
        .map(|raw| split_tokens(std::iter::once(raw.as_str())))
        .unwrap_or_default()
}

fn split_tokens<'a>(raw: impl Iterator<Item = &'a str>) -> Vec<String> {
    raw.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Computes a SHA-256 hash of the configuration file content
///
/// This is recorded on every run so runs made with different settings can be
/// told apart.
///
/// # Returns
///
/// * `Ok(String)` - Hex-encoded SHA-256 hash of the file content
/// * `Err(ConfigError)` - Failed to read the file
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    Ok(hex::encode(result))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}
