// SPDX-License-Identifier: MIT

//! Recruitment endpoint configuration

use std::env;
use std::time::Duration;
use url::Url;

use crate::adk::error::{Result, RunError};

const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Where and how to reach the recruitment endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct RecruiterConfig {
    pub endpoint: Url,
    /// Sent as `X-API-Key` when set
    pub api_key: Option<String>,
    /// Sent as `X-Role` when set
    pub role: Option<String>,
    /// Overall budget for one recruitment, retries included
    pub timeout: Duration,
}

impl RecruiterConfig {
    pub fn new(endpoint: &str) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| RunError::config(format!("invalid recruiter URL '{}': {}", endpoint, e)))?;
        Ok(Self {
            endpoint,
            api_key: None,
            role: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        })
    }

    /// Build from the environment.
    ///
    /// Requires `RECRUITER_URL`. Optionally uses `RECRUITER_API_KEY`,
    /// `RECRUITER_ROLE` and `RECRUITER_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self> {
        let endpoint =
            env::var("RECRUITER_URL").map_err(|_| RunError::config("RECRUITER_URL must be set"))?;
        let mut config = Self::new(&endpoint)?;
        config.api_key = non_empty_var("RECRUITER_API_KEY");
        config.role = non_empty_var("RECRUITER_ROLE");

        if let Some(secs) = non_empty_var("RECRUITER_TIMEOUT_SECS") {
            let secs: u64 = secs.parse().map_err(|_| {
                RunError::config(format!("RECRUITER_TIMEOUT_SECS must be an integer, got '{}'", secs))
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}
