use crate::export::BackoffPolicy;
use crate::{Error, Result};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Identity provider host; regional tenants get a `<region>.` prefix.
const DEFAULT_IAM_HOST: &str = "iam.checkmarx.net";

/// Platform API host; regional tenants get a `<region>.` prefix.
const DEFAULT_API_HOST: &str = "ast.checkmarx.net";

/// Environment variable name for identity URL override
const ENV_IAM_URL: &str = "AST_TOOLKIT_IAM_URL";

/// Environment variable name for API URL override
const ENV_API_URL: &str = "AST_TOOLKIT_API_URL";

/// Concurrent link fetches during audit aggregation
pub const DEFAULT_AUDIT_WORKERS: usize = 8;

const DEFAULT_POLL_MAX_ATTEMPTS: u32 = 10;
const DEFAULT_POLL_BASE_DELAY_SECS: u64 = 2;
const DEFAULT_POLL_MAX_DELAY_SECS: u64 = 60;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    endpoints: Option<EndpointsSection>,
    audit: Option<AuditSection>,
    export: Option<ExportSection>,
    http: Option<HttpSection>,
}

#[derive(Debug, Deserialize, Default)]
struct EndpointsSection {
    /// Identity base URL including the `/auth` prefix
    /// (e.g., "https://eu.iam.checkmarx.net/auth")
    iam_url: Option<String>,
    /// Platform API base URL (e.g., "https://eu.ast.checkmarx.net")
    api_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct AuditSection {
    workers: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct ExportSection {
    max_attempts: Option<u32>,
    base_delay_secs: Option<u64>,
    /// `0` disables the cap
    max_delay_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct HttpSection {
    timeout_secs: Option<u64>,
}

/// Runtime endpoint configuration
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Base URL for the token exchange (e.g., "https://us.iam.checkmarx.net/auth")
    pub identity_url: String,
    /// Base URL for API calls (e.g., "https://us.ast.checkmarx.net")
    pub api_url: String,
    /// Source of the configuration (for logging)
    pub source: ConfigSource,
}

/// Everything a run needs besides the credential.
#[derive(Debug, Clone)]
pub struct ToolkitConfig {
    pub endpoints: EndpointConfig,
    pub audit_workers: usize,
    pub poll: BackoffPolicy,
    pub http_timeout: Duration,
}

/// Where the endpoint configuration came from
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    /// Derived from the region
    Default,
    /// Loaded from environment variable
    Environment,
    /// Loaded from config file
    ConfigFile,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "region default"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::ConfigFile => write!(f, "config file"),
        }
    }
}

/// Identity base URL for a region. An empty region selects the global host.
pub fn default_identity_url(region: &str) -> String {
    format!("https://{}/auth", regional_host(region, DEFAULT_IAM_HOST))
}

/// API base URL for a region. An empty region selects the global host.
pub fn default_api_url(region: &str) -> String {
    format!("https://{}", regional_host(region, DEFAULT_API_HOST))
}

fn regional_host(region: &str, host: &str) -> String {
    let region = region.trim();
    if region.is_empty() {
        host.to_string()
    } else {
        format!("{}.{}", region, host)
    }
}

/// Get the path to the configuration file
fn get_config_file_path() -> Option<PathBuf> {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .map(|p| p.join("ast-toolkit").join("config.toml"))
}

/// Load configuration from the config file
fn load_config_file() -> Option<ConfigFile> {
    let path = get_config_file_path()?;

    if !path.exists() {
        return None;
    }

    match fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::debug!("Loaded config from {:?}", path);
                Some(config)
            }
            Err(e) => {
                tracing::warn!("Failed to parse config file {:?}: {}", path, e);
                None
            }
        },
        Err(e) => {
            tracing::warn!("Failed to read config file {:?}: {}", path, e);
            None
        }
    }
}

/// Parse config file contents. Exposed for callers that keep the file elsewhere.
pub fn parse_config(content: &str) -> Result<ConfigFile> {
    toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
}

/// Load configuration for `region` with priority:
/// 1. Environment variables (AST_TOOLKIT_IAM_URL, AST_TOOLKIT_API_URL)
/// 2. Config file (~/.config/ast-toolkit/config.toml)
/// 3. Values derived from the region
pub fn load_config(region: &str) -> ToolkitConfig {
    resolve_config(region, |key| std::env::var(key).ok(), load_config_file())
}

/// Resolution logic behind [`load_config`], with the environment and file
/// supplied by the caller.
pub fn resolve_config<F>(region: &str, env: F, file: Option<ConfigFile>) -> ToolkitConfig
where
    F: Fn(&str) -> Option<String>,
{
    let file = file.unwrap_or_default();

    let endpoints = resolve_endpoints(region, &env, file.endpoints.unwrap_or_default());

    let audit_workers = file
        .audit
        .and_then(|a| a.workers)
        .filter(|w| *w > 0)
        .unwrap_or(DEFAULT_AUDIT_WORKERS);

    let export = file.export.unwrap_or_default();
    let max_delay = match export.max_delay_secs {
        Some(0) => None,
        Some(secs) => Some(Duration::from_secs(secs)),
        None => Some(Duration::from_secs(DEFAULT_POLL_MAX_DELAY_SECS)),
    };
    let poll = BackoffPolicy {
        max_attempts: export
            .max_attempts
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_POLL_MAX_ATTEMPTS),
        base_delay: Duration::from_secs(
            export
                .base_delay_secs
                .unwrap_or(DEFAULT_POLL_BASE_DELAY_SECS),
        ),
        max_delay,
    };

    let http_timeout = Duration::from_secs(
        file.http
            .and_then(|h| h.timeout_secs)
            .filter(|t| *t > 0)
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
    );

    ToolkitConfig {
        endpoints,
        audit_workers,
        poll,
        http_timeout,
    }
}

fn normalize_url(url: String) -> Option<String> {
    let url = url.trim().trim_end_matches('/').to_string();
    if url.is_empty() { None } else { Some(url) }
}

fn resolve_endpoints<F>(region: &str, env: &F, section: EndpointsSection) -> EndpointConfig
where
    F: Fn(&str) -> Option<String>,
{
    // Priority 1: Environment variables
    let env_iam = env(ENV_IAM_URL).and_then(normalize_url);
    let env_api = env(ENV_API_URL).and_then(normalize_url);
    if env_iam.is_some() || env_api.is_some() {
        let identity_url = env_iam.unwrap_or_else(|| default_identity_url(region));
        let api_url = env_api.unwrap_or_else(|| default_api_url(region));
        tracing::info!(
            "Using endpoints from environment: identity={}, api={}",
            identity_url,
            api_url
        );
        return EndpointConfig {
            identity_url,
            api_url,
            source: ConfigSource::Environment,
        };
    }

    // Priority 2: Config file
    let file_iam = section.iam_url.and_then(normalize_url);
    let file_api = section.api_url.and_then(normalize_url);
    if file_iam.is_some() || file_api.is_some() {
        let identity_url = file_iam.unwrap_or_else(|| default_identity_url(region));
        let api_url = file_api.unwrap_or_else(|| default_api_url(region));
        tracing::info!(
            "Using endpoints from config file: identity={}, api={}",
            identity_url,
            api_url
        );
        return EndpointConfig {
            identity_url,
            api_url,
            source: ConfigSource::ConfigFile,
        };
    }

    // Priority 3: Region defaults
    let config = EndpointConfig {
        identity_url: default_identity_url(region),
        api_url: default_api_url(region),
        source: ConfigSource::Default,
    };
    tracing::debug!("Using region endpoints: {:?}", config);
    config
}

/// Get the path to the config file for documentation purposes
pub fn get_config_file_path_string() -> String {
    get_config_file_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "~/.config/ast-toolkit/config.toml".to_string())
}

/// Generate example config file content
pub fn generate_example_config() -> String {
    r#"# AST Toolkit Configuration
# Place this file at: ~/.config/ast-toolkit/config.toml

[endpoints]
# Override the region-derived endpoints (single-tenant or private deployments)
# iam_url = "https://eu.iam.checkmarx.net/auth"
# api_url = "https://eu.ast.checkmarx.net"

[audit]
# Maximum concurrent link fetches while aggregating the audit trail
# workers = 8

[export]
# Poll attempts before giving up on an export job
# max_attempts = 10
# Delay after the first poll; doubles after every attempt
# base_delay_secs = 2
# Upper bound on a single delay (0 disables the cap)
# max_delay_secs = 60

[http]
# Per-request timeout
# timeout_secs = 30
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_region_defaults() {
        let config = resolve_config("eu", no_env, None);
        assert_eq!(
            config.endpoints.identity_url,
            "https://eu.iam.checkmarx.net/auth"
        );
        assert_eq!(config.endpoints.api_url, "https://eu.ast.checkmarx.net");
        assert_eq!(config.endpoints.source, ConfigSource::Default);
        assert_eq!(config.audit_workers, DEFAULT_AUDIT_WORKERS);
        assert_eq!(config.poll.max_delay, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_empty_region_uses_global_hosts() {
        assert_eq!(default_identity_url(""), "https://iam.checkmarx.net/auth");
        assert_eq!(default_api_url("  "), "https://ast.checkmarx.net");
    }

    #[test]
    fn test_environment_beats_config_file() {
        let file = parse_config(
            r#"
            [endpoints]
            api_url = "https://file.example.com/"
            "#,
        )
        .unwrap();
        let env = |key: &str| {
            (key == ENV_API_URL).then(|| "https://env.example.com/ ".to_string())
        };

        let config = resolve_config("us", env, Some(file));
        assert_eq!(config.endpoints.api_url, "https://env.example.com");
        assert_eq!(
            config.endpoints.identity_url,
            "https://us.iam.checkmarx.net/auth"
        );
        assert_eq!(config.endpoints.source, ConfigSource::Environment);
    }

    #[test]
    fn test_config_file_tuning() {
        let file = parse_config(
            r#"
            [endpoints]
            iam_url = "https://sso.example.com/auth"

            [audit]
            workers = 3

            [export]
            max_attempts = 4
            base_delay_secs = 5
            max_delay_secs = 0

            [http]
            timeout_secs = 12
            "#,
        )
        .unwrap();

        let config = resolve_config("us", no_env, Some(file));
        assert_eq!(config.endpoints.identity_url, "https://sso.example.com/auth");
        assert_eq!(config.endpoints.api_url, "https://us.ast.checkmarx.net");
        assert_eq!(config.endpoints.source, ConfigSource::ConfigFile);
        assert_eq!(config.audit_workers, 3);
        assert_eq!(config.poll.max_attempts, 4);
        assert_eq!(config.poll.base_delay, Duration::from_secs(5));
        assert_eq!(config.poll.max_delay, None);
        assert_eq!(config.http_timeout, Duration::from_secs(12));
    }

    #[test]
    fn test_example_config_parses() {
        assert!(parse_config(&generate_example_config()).is_ok());
    }
}
