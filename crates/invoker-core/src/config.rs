//! RuntimeConfig - 起動時に一度だけ組み立てる設定
//!
//! プロセス環境変数はここでしか読みません。ループの途中で環境を
//! 読み直すことはありません。

use std::time::Duration;

use crate::app::retry::RetryPolicy;

pub const RUNTIME_API_VAR: &str = "AWS_LAMBDA_RUNTIME_API";
pub const HANDLER_VAR: &str = "_HANDLER";
pub const REPORT_TIMEOUT_VAR: &str = "INVOKER_REPORT_TIMEOUT_MS";
pub const HANDLER_TIMEOUT_VAR: &str = "INVOKER_HANDLER_TIMEOUT_MS";
pub const FETCH_BACKOFF_VAR: &str = "INVOKER_FETCH_BACKOFF_MS";

/// Version segment appended to the control-plane host.
pub const API_VERSION: &str = "2018-06-01";

const DEFAULT_REPORT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("required variable {0} is not set")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// `host:port` of the control plane, without scheme.
    pub runtime_api: String,

    /// Raw `"<namespace>.<entryPoint>"` handler identifier.
    pub handler: Option<String>,

    /// Bound on every report request. Fetch is never bounded.
    pub report_timeout: Duration,

    /// Optional deadline for a single handler call.
    pub handler_timeout: Option<Duration>,

    /// Delay policy after a failed fetch or report.
    pub backoff: RetryPolicy,
}

impl RuntimeConfig {
    pub fn new(runtime_api: impl Into<String>) -> Self {
        Self {
            runtime_api: runtime_api.into(),
            handler: None,
            report_timeout: DEFAULT_REPORT_TIMEOUT,
            handler_timeout: None,
            backoff: RetryPolicy::fetch_default(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup, so tests never touch the real
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let runtime_api = lookup(RUNTIME_API_VAR)
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing(RUNTIME_API_VAR))?;

        let mut config = Self::new(runtime_api.trim());
        config.handler = lookup(HANDLER_VAR).filter(|v| !v.trim().is_empty());

        if let Some(timeout) = millis(&lookup, REPORT_TIMEOUT_VAR)? {
            config.report_timeout = timeout;
        }
        config.handler_timeout = millis(&lookup, HANDLER_TIMEOUT_VAR)?;
        if let Some(base) = millis(&lookup, FETCH_BACKOFF_VAR)? {
            config.backoff.base_delay = base;
            config.backoff.max_delay = config.backoff.max_delay.max(base);
        }

        Ok(config)
    }

    pub fn with_handler(mut self, handler: impl Into<String>) -> Self {
        self.handler = Some(handler.into());
        self
    }

    pub fn with_report_timeout(mut self, timeout: Duration) -> Self {
        self.report_timeout = timeout;
        self
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = Some(timeout);
        self
    }

    pub fn with_backoff(mut self, backoff: RetryPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// `http://{runtime_api}/{API_VERSION}`
    pub fn base_url(&self) -> String {
        format!("http://{}/{}", self.runtime_api, API_VERSION)
    }
}

/// Parse an optional, strictly positive millisecond value.
fn millis<F>(lookup: &F, key: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    match raw.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(Some(Duration::from_millis(ms))),
        _ => Err(ConfigError::Invalid { key, value: raw }),
    }
}
