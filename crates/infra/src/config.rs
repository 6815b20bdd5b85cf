//! Process configuration, read from the environment.
//!
//! Variables use the `KESTREL_` prefix; a `.env` file in the working directory
//! is loaded first when present.

use serde::Deserialize;

pub use kestrel_observability::LogFormat;

const DEV_JWT_SECRET: &str = "kestrel-dev-secret-change-me";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// HS256 secret used to validate bearer tokens.
    pub jwt_secret: Option<String>,
    #[serde(default)]
    pub log_format: LogFormat,
    /// Clock skew tolerated on token `issued_at` / `expires_at`.
    #[serde(default)]
    pub token_leeway_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            jwt_secret: None,
            log_format: LogFormat::default(),
            token_leeway_secs: 0,
        }
    }
}

impl AppConfig {
    /// Load `.env` (if any) then the `KESTREL_*` variables.
    pub fn load() -> Result<Self, envy::Error> {
        let _ = dotenvy::dotenv();
        Self::from_env()
    }

    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("KESTREL_").from_env::<AppConfig>()
    }

    pub fn from_iter<I>(vars: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::prefixed("KESTREL_").from_iter(vars)
    }

    /// The configured secret, or the development default with a warning.
    pub fn jwt_secret_or_dev(&self) -> String {
        match &self.jwt_secret {
            Some(secret) if !secret.is_empty() => secret.clone(),
            _ => {
                tracing::warn!("KESTREL_JWT_SECRET is not set; using an insecure development secret");
                DEV_JWT_SECRET.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = AppConfig::from_iter(vars(&[])).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
    }

    #[test]
    fn prefixed_variables_are_read() {
        let config = AppConfig::from_iter(vars(&[
            ("KESTREL_BIND_ADDR", "127.0.0.1:9000"),
            ("KESTREL_JWT_SECRET", "s3cret"),
            ("KESTREL_LOG_FORMAT", "pretty"),
            ("KESTREL_TOKEN_LEEWAY_SECS", "30"),
            ("JWT_SECRET", "ignored"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.jwt_secret_or_dev(), "s3cret");
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.token_leeway_secs, 30);
    }

    #[test]
    fn unknown_log_format_is_an_error() {
        assert!(AppConfig::from_iter(vars(&[("KESTREL_LOG_FORMAT", "xml")])).is_err());
    }

    #[test]
    fn missing_secret_falls_back_to_dev_secret() {
        assert_eq!(AppConfig::default().jwt_secret_or_dev(), DEV_JWT_SECRET);
    }
}
