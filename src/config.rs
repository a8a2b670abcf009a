use std::env;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::submission::SubmissionPolicy;

pub const MIN_JWT_SECRET_LEN: usize = 32;
/// One year.
pub const MAX_JWT_TTL_HOURS: i64 = 24 * 365;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("JWT_SECRET must be at least {MIN_JWT_SECRET_LEN} characters long")]
    WeakSecret,
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_ttl_hours: i64,
    pub database_url: Option<String>,
    /// Snapshot directory for the in-memory store; `None` keeps state in memory only.
    pub data_dir: Option<PathBuf>,
    pub frontend_url: String,
    pub enable_hsts: bool,
    pub submission_policy: SubmissionPolicy,
}

impl AppConfig {
    /// Defaults for everything except the signing secret.
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            bind_addr: "0.0.0.0".into(),
            port: 8080,
            jwt_secret: jwt_secret.into(),
            jwt_ttl_hours: 24,
            database_url: None,
            data_dir: None,
            frontend_url: "http://localhost:5173".into(),
            enable_hsts: false,
            submission_policy: SubmissionPolicy::default(),
        }
    }

    pub fn with_submission_policy(mut self, policy: SubmissionPolicy) -> Self {
        self.submission_policy = policy;
        self
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let secret = env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;
        if secret.len() < MIN_JWT_SECRET_LEN {
            return Err(ConfigError::WeakSecret);
        }
        let mut cfg = Self::new(secret);

        if let Ok(v) = env::var("BIND_ADDR") {
            cfg.bind_addr = v;
        }
        cfg.port = parsed("PORT", cfg.port)?;
        cfg.jwt_ttl_hours = parsed("JWT_TTL_HOURS", cfg.jwt_ttl_hours)?;
        if !(1..=MAX_JWT_TTL_HOURS).contains(&cfg.jwt_ttl_hours) {
            return Err(ConfigError::Invalid {
                key: "JWT_TTL_HOURS",
                reason: format!("must be between 1 and {MAX_JWT_TTL_HOURS}"),
            });
        }
        cfg.database_url = env::var("DATABASE_URL").ok();
        cfg.data_dir = env::var("FORMS_DATA_DIR").ok().map(PathBuf::from);
        if let Ok(v) = env::var("FRONTEND_URL") {
            cfg.frontend_url = v;
        }
        cfg.enable_hsts = env::var("ENABLE_HSTS")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if let Ok(v) = env::var("SUBMISSION_POLICY") {
            cfg.submission_policy = v
                .parse()
                .map_err(|reason| ConfigError::Invalid { key: "SUBMISSION_POLICY", reason })?;
        }
        Ok(cfg)
    }

    /// Logs the non-sensitive parts of the configuration.
    pub fn log_summary(&self) {
        info!("Listening address: {}:{}", self.bind_addr, self.port);
        info!("Frontend URL: {}", self.frontend_url);
        info!("Submission policy: {}", self.submission_policy);
        match &self.data_dir {
            Some(dir) => info!("In-memory snapshots under {}", dir.display()),
            None => warn!("FORMS_DATA_DIR not set, in-memory state is not persisted"),
        }
    }
}

fn parsed<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) => v.parse().map_err(|e: T::Err| ConfigError::Invalid { key, reason: e.to_string() }),
        Err(_) => Ok(default),
    }
}
