use chrono::Duration;

use crate::token::TokenSettings;

/// Upper bound on token lifetime (100 years).
const MAX_TOKEN_TTL_SECS: u64 = 100 * 365 * 86_400;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Postgres connection string. Unset runs on the in-memory store.
    pub database_url: Option<String>,
    /// Path all resources are mounted under. Set via TOKENGATE_API_BASE_PATH.
    pub api_base_path: String,
    /// Segment appended to the base path for the login token resource.
    pub token_login_path_segment: String,
    /// Delete an expired token when it is found. Default: true.
    pub delete_expired_tokens: bool,
    /// Lifetime of newly issued tokens in seconds. 0 = never expire.
    pub token_ttl_secs: u64,
    /// Accept the uid forwarded by a fronting login layer in
    /// `x-authenticated-uid`. Only safe when that layer strips the header
    /// from client requests. Default: false.
    pub trust_uid_header: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            database_url: None,
            api_base_path: "api".to_string(),
            token_login_path_segment: "login-token".to_string(),
            delete_expired_tokens: true,
            token_ttl_secs: 86_400,
            trust_uid_header: false,
        }
    }
}

impl Config {
    /// Expiry period for new tokens; `None` when they never expire.
    pub fn token_ttl(&self) -> Option<Duration> {
        match self.token_ttl_secs {
            0 => None,
            secs => Some(Duration::seconds(secs.min(MAX_TOKEN_TTL_SECS) as i64)),
        }
    }

    pub fn token_settings(&self) -> TokenSettings {
        TokenSettings {
            api_base_path: self.api_base_path.clone(),
            login_path_segment: self.token_login_path_segment.clone(),
            delete_expired_tokens: self.delete_expired_tokens,
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    from_lookup(|key| std::env::var(key).ok())
}

/// Build a config from any key → value source.
pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = Config::default();

    let delete_expired_tokens = match lookup("TOKENGATE_DELETE_EXPIRED_TOKENS") {
        Some(v) => parse_bool("TOKENGATE_DELETE_EXPIRED_TOKENS", &v)?,
        None => defaults.delete_expired_tokens,
    };

    let trust_uid_header = match lookup("TOKENGATE_TRUST_UID_HEADER") {
        Some(v) => parse_bool("TOKENGATE_TRUST_UID_HEADER", &v)?,
        None => defaults.trust_uid_header,
    };

    let api_base_path = lookup("TOKENGATE_API_BASE_PATH")
        .map(|v| v.trim().trim_matches('/').to_string())
        .unwrap_or(defaults.api_base_path);

    let token_login_path_segment = lookup("TOKENGATE_LOGIN_PATH_SEGMENT")
        .map(|v| v.trim().trim_matches('/').to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or(defaults.token_login_path_segment);

    if token_login_path_segment.contains('/') {
        anyhow::bail!(
            "TOKENGATE_LOGIN_PATH_SEGMENT must be a single path segment, got '{}'",
            token_login_path_segment
        );
    }

    Ok(Config {
        port: lookup("TOKENGATE_PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.port),
        database_url: lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()),
        api_base_path,
        token_login_path_segment,
        delete_expired_tokens,
        token_ttl_secs: lookup("TOKENGATE_TOKEN_TTL_SECS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.token_ttl_secs),
        trust_uid_header,
    })
}

fn parse_bool(key: &str, value: &str) -> anyhow::Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("{} must be a boolean, got '{}'", key, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> anyhow::Result<Config> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config_from(&[]).unwrap();
        assert_eq!(cfg.port, 8080);
        assert!(cfg.database_url.is_none());
        assert_eq!(cfg.api_base_path, "api");
        assert_eq!(cfg.token_login_path_segment, "login-token");
        assert!(cfg.delete_expired_tokens);
        assert_eq!(cfg.token_ttl(), Some(Duration::days(1)));
        assert_eq!(cfg.token_settings().base_path(), "api/login-token");
        assert!(!cfg.trust_uid_header);
    }

    #[test]
    fn test_overrides() {
        let cfg = config_from(&[
            ("TOKENGATE_PORT", "9000"),
            ("DATABASE_URL", "postgres://localhost/tokens"),
            ("TOKENGATE_API_BASE_PATH", "/v2/"),
            ("TOKENGATE_LOGIN_PATH_SEGMENT", "token"),
            ("TOKENGATE_DELETE_EXPIRED_TOKENS", "no"),
            ("TOKENGATE_TOKEN_TTL_SECS", "0"),
            ("TOKENGATE_TRUST_UID_HEADER", "true"),
        ])
        .unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/tokens"));
        assert_eq!(cfg.token_settings().base_path(), "v2/token");
        assert!(!cfg.delete_expired_tokens);
        assert_eq!(cfg.token_ttl(), None);
        assert!(cfg.trust_uid_header);
    }

    #[test]
    fn test_invalid_bool_is_rejected() {
        let err = config_from(&[("TOKENGATE_DELETE_EXPIRED_TOKENS", "maybe")]).unwrap_err();
        assert!(err.to_string().contains("TOKENGATE_DELETE_EXPIRED_TOKENS"));
    }

    #[test]
    fn test_nested_login_segment_is_rejected() {
        assert!(config_from(&[("TOKENGATE_LOGIN_PATH_SEGMENT", "auth/token")]).is_err());
    }

    #[test]
    fn test_blank_database_url_means_memory() {
        let cfg = config_from(&[("DATABASE_URL", "  ")]).unwrap();
        assert!(cfg.database_url.is_none());
    }
}
