use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKey {
    pub token: String,
    pub role: Role,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// `None` keeps everything in memory.
    pub database_url: Option<String>,
    pub artifacts_dir: PathBuf,
    pub workspace_root: PathBuf,
    pub scheduler_enabled: bool,
    pub scheduler_cron: String,
    pub executor_timeout: Duration,
    pub max_results: u32,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub result_cache_per_user: usize,
    pub web_port: u16,
    pub environment: Environment,
    pub api_keys: Vec<ApiKey>,
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            artifacts_dir: PathBuf::from("./artifacts"),
            workspace_root: PathBuf::from("."),
            scheduler_enabled: true,
            scheduler_cron: "0 * * * * *".to_string(),
            executor_timeout: Duration::from_secs(30),
            max_results: bms_core::schedule::DEFAULT_MAX_RESULTS,
            user_agent: "bms-bot/0.1".to_string(),
            http_timeout_secs: 20,
            result_cache_per_user: 200,
            web_port: 8080,
            environment: Environment::Development,
            api_keys: Vec::new(),
            log_level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let environment = match get("BMS_ENV").as_deref() {
            None | Some("development") | Some("dev") => Environment::Development,
            Some(_) => Environment::Production,
        };
        let api_keys = match get("BMS_API_KEYS") {
            Some(raw) => parse_api_keys(&raw)?,
            None => Vec::new(),
        };
        if api_keys.is_empty() && environment == Environment::Production {
            anyhow::bail!("BMS_API_KEYS is required outside development");
        }

        Ok(Self {
            database_url: get("DATABASE_URL"),
            artifacts_dir: get("ARTIFACTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.artifacts_dir),
            workspace_root: get("BMS_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_root),
            scheduler_enabled: get("BMS_SCHEDULER_ENABLED")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(defaults.scheduler_enabled),
            scheduler_cron: get("BMS_SCHEDULER_CRON").unwrap_or(defaults.scheduler_cron),
            executor_timeout: Duration::from_secs(parse_or(
                get("BMS_EXECUTOR_TIMEOUT_SECS"),
                "BMS_EXECUTOR_TIMEOUT_SECS",
                defaults.executor_timeout.as_secs(),
            )?),
            max_results: parse_or(get("BMS_MAX_RESULTS"), "BMS_MAX_RESULTS", defaults.max_results)?,
            user_agent: get("BMS_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout_secs: parse_or(
                get("BMS_HTTP_TIMEOUT_SECS"),
                "BMS_HTTP_TIMEOUT_SECS",
                defaults.http_timeout_secs,
            )?,
            result_cache_per_user: parse_or(
                get("BMS_RESULT_CACHE_PER_USER"),
                "BMS_RESULT_CACHE_PER_USER",
                defaults.result_cache_per_user,
            )?,
            web_port: parse_or(get("BMS_WEB_PORT"), "BMS_WEB_PORT", defaults.web_port)?,
            environment,
            api_keys,
            log_level: get("BMS_LOG_LEVEL").unwrap_or(defaults.log_level),
        })
    }

    pub fn sources_path(&self) -> PathBuf {
        self.workspace_root.join("sources.yaml")
    }

    pub fn fixtures_dir(&self) -> PathBuf {
        self.workspace_root.join("fixtures")
    }

    pub fn reports_root(&self) -> PathBuf {
        self.workspace_root.join("reports")
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) => raw
            .parse()
            .map_err(|err| anyhow::anyhow!("{err}"))
            .with_context(|| format!("invalid {key}={raw}")),
        None => Ok(default),
    }
}

/// `token:role,token:role`
pub fn parse_api_keys(raw: &str) -> Result<Vec<ApiKey>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (token, role) = entry
                .rsplit_once(':')
                .with_context(|| format!("api key entry '{entry}' is not token:role"))?;
            let role = role.parse::<Role>().map_err(|err| anyhow::anyhow!(err))?;
            let token = token.trim();
            if token.is_empty() {
                anyhow::bail!("api key entry '{entry}' has an empty token");
            }
            Ok(ApiKey {
                token: token.to_string(),
                role,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert!(config.database_url.is_none());
        assert_eq!(config.scheduler_cron, "0 * * * * *");
        assert_eq!(config.environment, Environment::Development);
        assert!(config.api_keys.is_empty());
        assert_eq!(config.executor_timeout, Duration::from_secs(30));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://bms@localhost/bms"),
            ("BMS_SCHEDULER_ENABLED", "false"),
            ("BMS_EXECUTOR_TIMEOUT_SECS", "5"),
            ("BMS_API_KEYS", "abc:validator, def:admin"),
            ("BMS_ENV", "production"),
        ]))
        .unwrap();
        assert_eq!(config.database_url.as_deref(), Some("postgres://bms@localhost/bms"));
        assert!(!config.scheduler_enabled);
        assert_eq!(config.executor_timeout, Duration::from_secs(5));
        assert_eq!(
            config.api_keys,
            vec![
                ApiKey { token: "abc".into(), role: Role::Validator },
                ApiKey { token: "def".into(), role: Role::Admin },
            ]
        );
    }

    #[test]
    fn production_requires_keys_and_bad_values_fail() {
        assert!(EngineConfig::from_lookup(lookup(&[("BMS_ENV", "production")])).is_err());
        assert!(EngineConfig::from_lookup(lookup(&[("BMS_WEB_PORT", "http")])).is_err());
        assert!(parse_api_keys("abc:superuser").is_err());
    }
}
