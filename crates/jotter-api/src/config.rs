use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use jotter_core::media::{MediaUrlScheme, DEFAULT_ROOT_FOLDER};
use jotter_core::storage::R2Config;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_path: PathBuf,
    pub admin_pass: String,
    pub jwt_secret: String,
    pub jwt_ttl: Duration,
    pub auth_clock_skew: Duration,
    pub r2: R2Config,
    pub media: MediaUrlScheme,
    pub max_pdfs_per_request: usize,
    pub max_upload_bytes: usize,
    pub rate_limit_window: Duration,
    pub login_rate_limit_per_window: u32,
    pub upload_rate_limit_per_window: u32,
    /// Take the caller address from `x-forwarded-for`/`x-real-ip`.
    pub trust_proxy_headers: bool,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database_path", &self.database_path)
            .field("admin_pass", &"[REDACTED]")
            .field("jwt_secret", &"[REDACTED]")
            .field("jwt_ttl", &self.jwt_ttl)
            .field("auth_clock_skew", &self.auth_clock_skew)
            .field("r2", &self.r2)
            .field("media_public_base_url", &self.media.public_base_url())
            .field("max_pdfs_per_request", &self.max_pdfs_per_request)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("rate_limit_window", &self.rate_limit_window)
            .field(
                "login_rate_limit_per_window",
                &self.login_rate_limit_per_window,
            )
            .field(
                "upload_rate_limit_per_window",
                &self.upload_rate_limit_per_window,
            )
            .field("trust_proxy_headers", &self.trust_proxy_headers)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "JOTTER_API_BIND_ADDR", "127.0.0.1:8080");
        let database_path =
            PathBuf::from(value_or_default(&lookup, "JOTTER_DATABASE_PATH", "jotter.db"));

        let admin_pass = required_trimmed(&lookup, "ADMIN_PASS")?;
        let jwt_secret = required_trimmed(&lookup, "JWT_SECRET")?;
        if jwt_secret.len() < 16 {
            return Err(ConfigError::Invalid(
                "JWT_SECRET must be at least 16 characters".to_string(),
            ));
        }

        let jwt_ttl_secs = value_or_default(&lookup, "JWT_TTL_SECS", "86400")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::Invalid("JWT_TTL_SECS must be an integer in [300, 604800]".to_string())
            })?;
        if !(300..=604_800).contains(&jwt_ttl_secs) {
            return Err(ConfigError::Invalid(
                "JWT_TTL_SECS must be in [300, 604800]".to_string(),
            ));
        }

        let auth_clock_skew_secs = value_or_default(&lookup, "AUTH_CLOCK_SKEW_SECS", "60")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::Invalid(
                    "AUTH_CLOCK_SKEW_SECS must be an integer in [0, 300]".to_string(),
                )
            })?;
        if auth_clock_skew_secs > 300 {
            return Err(ConfigError::Invalid(
                "AUTH_CLOCK_SKEW_SECS must be in [0, 300]".to_string(),
            ));
        }

        let r2 = parse_r2_config(&lookup)?;

        let public_base_url = required_trimmed(&lookup, "R2_PUBLIC_BASE_URL")?;
        let root_folder = value_or_default(&lookup, "MEDIA_ROOT_FOLDER", DEFAULT_ROOT_FOLDER);
        let media = MediaUrlScheme::new(&public_base_url, &root_folder)
            .map_err(|error| ConfigError::Invalid(error.to_string()))?;

        let max_pdfs_per_request = value_or_default(&lookup, "MAX_PDFS_PER_REQUEST", "5")
            .parse::<usize>()
            .map_err(|_| {
                ConfigError::Invalid(
                    "MAX_PDFS_PER_REQUEST must be an integer in [1, 20]".to_string(),
                )
            })?;
        if !(1..=20).contains(&max_pdfs_per_request) {
            return Err(ConfigError::Invalid(
                "MAX_PDFS_PER_REQUEST must be in [1, 20]".to_string(),
            ));
        }

        let max_upload_bytes = value_or_default(&lookup, "MAX_UPLOAD_BYTES", "26214400")
            .parse::<usize>()
            .map_err(|_| {
                ConfigError::Invalid("MAX_UPLOAD_BYTES must be a positive integer".to_string())
            })?;
        if max_upload_bytes == 0 {
            return Err(ConfigError::Invalid(
                "MAX_UPLOAD_BYTES must be a positive integer".to_string(),
            ));
        }

        let rate_limit_window_secs = value_or_default(&lookup, "RATE_LIMIT_WINDOW_SECS", "60")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::Invalid(
                    "RATE_LIMIT_WINDOW_SECS must be an integer in [10, 3600]".to_string(),
                )
            })?;
        if !(10..=3_600).contains(&rate_limit_window_secs) {
            return Err(ConfigError::Invalid(
                "RATE_LIMIT_WINDOW_SECS must be in [10, 3600]".to_string(),
            ));
        }

        let login_rate_limit_per_window =
            value_or_default(&lookup, "LOGIN_RATE_LIMIT_PER_WINDOW", "10")
                .parse::<u32>()
                .map_err(|_| {
                    ConfigError::Invalid(
                        "LOGIN_RATE_LIMIT_PER_WINDOW must be an integer in [1, 1000]".to_string(),
                    )
                })?;
        if !(1..=1_000).contains(&login_rate_limit_per_window) {
            return Err(ConfigError::Invalid(
                "LOGIN_RATE_LIMIT_PER_WINDOW must be in [1, 1000]".to_string(),
            ));
        }

        let upload_rate_limit_per_window =
            value_or_default(&lookup, "UPLOAD_RATE_LIMIT_PER_WINDOW", "60")
                .parse::<u32>()
                .map_err(|_| {
                    ConfigError::Invalid(
                        "UPLOAD_RATE_LIMIT_PER_WINDOW must be an integer in [1, 5000]"
                            .to_string(),
                    )
                })?;
        if !(1..=5_000).contains(&upload_rate_limit_per_window) {
            return Err(ConfigError::Invalid(
                "UPLOAD_RATE_LIMIT_PER_WINDOW must be in [1, 5000]".to_string(),
            ));
        }

        let trust_proxy_headers = parse_flag(&lookup, "TRUST_PROXY_HEADERS")?;

        Ok(Self {
            bind_addr,
            database_path,
            admin_pass,
            jwt_secret,
            jwt_ttl: Duration::from_secs(jwt_ttl_secs),
            auth_clock_skew: Duration::from_secs(auth_clock_skew_secs),
            r2,
            media,
            max_pdfs_per_request,
            max_upload_bytes,
            rate_limit_window: Duration::from_secs(rate_limit_window_secs),
            login_rate_limit_per_window,
            upload_rate_limit_per_window,
            trust_proxy_headers,
        })
    }
}

fn parse_r2_config(lookup: impl Fn(&str) -> Option<String>) -> Result<R2Config, ConfigError> {
    Ok(R2Config {
        account_id: required_trimmed(&lookup, "R2_ACCOUNT_ID")?,
        bucket: required_trimmed(&lookup, "R2_BUCKET")?,
        access_key_id: required_trimmed(&lookup, "R2_ACCESS_KEY_ID")?,
        secret_access_key: required_trimmed(&lookup, "R2_SECRET_ACCESS_KEY")?,
    })
}

fn parse_flag(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<bool, ConfigError> {
    match optional_trimmed(lookup, name)
        .map(|value| value.to_ascii_lowercase())
        .as_deref()
    {
        None | Some("0" | "false" | "no" | "off") => Ok(false),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some(_) => Err(ConfigError::Invalid(format!("{name} must be a boolean"))),
    }
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
pub(crate) fn test_values() -> HashMap<&'static str, &'static str> {
    HashMap::from([
        ("ADMIN_PASS", "sensitive-admin-pass"),
        ("JWT_SECRET", "sensitive-jwt-secret-0123456789"),
        ("R2_ACCOUNT_ID", "acc"),
        ("R2_BUCKET", "bucket"),
        ("R2_ACCESS_KEY_ID", "access"),
        ("R2_SECRET_ACCESS_KEY", "sensitive-r2-secret"),
        ("R2_PUBLIC_BASE_URL", "https://media.example.com"),
    ])
}
