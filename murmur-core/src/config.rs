//! Client configuration.
//!
//! Priority: build-time env -> runtime env -> defaults.

use crate::error::{ChatError, Result};
use crate::models::input::ValidateExt;
use garde::Validate;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

const DEFAULT_SERVER_URL: &str = "http://localhost:8000";
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CYCLE_TIMEOUT_SECS: u64 = 15;
const DEFAULT_OPTIMISTIC_WINDOW_SECS: u64 = 30;
const DEFAULT_EDIT_HIGHLIGHT_MS: u64 = 2000;
const MAX_USERNAME_LENGTH: usize = 128;

const SERVER_URL_VAR: &str = "MURMUR_SERVER_URL";
const SESSION_COOKIE_VAR: &str = "MURMUR_SESSION_COOKIE";
const USERNAME_VAR: &str = "MURMUR_USERNAME";
const POLL_INTERVAL_VAR: &str = "MURMUR_POLL_INTERVAL_MS";
const REQUEST_TIMEOUT_VAR: &str = "MURMUR_REQUEST_TIMEOUT_SECS";
const CYCLE_TIMEOUT_VAR: &str = "MURMUR_CYCLE_TIMEOUT_SECS";
const OPTIMISTIC_WINDOW_VAR: &str = "MURMUR_OPTIMISTIC_WINDOW_SECS";
const EDIT_HIGHLIGHT_VAR: &str = "MURMUR_EDIT_HIGHLIGHT_MS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[garde(context(()))]
#[serde(default)]
pub struct ClientConfig {
    #[garde(url, custom(http_scheme))]
    pub server_url: String,
    /// Pre-obtained `Cookie` header value identifying the logged-in user
    #[garde(skip)]
    pub session_cookie: Option<String>,
    /// Sender name the server shows for our own messages
    #[garde(length(min = 1, max = MAX_USERNAME_LENGTH))]
    pub username: Option<String>,
    #[garde(range(min = 1))]
    pub poll_interval_ms: u64,
    #[garde(range(min = 1))]
    pub request_timeout_secs: u64,
    #[garde(range(min = 1))]
    pub cycle_timeout_secs: u64,
    #[garde(range(min = 1))]
    pub optimistic_window_secs: u64,
    #[garde(skip)]
    pub edit_highlight_ms: u64,
}

fn http_scheme(value: &str, _ctx: &()) -> garde::Result {
    match url::Url::parse(value) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => Ok(()),
        _ => Err(garde::Error::new("server URL must use http or https")),
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            session_cookie: None,
            username: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            cycle_timeout_secs: DEFAULT_CYCLE_TIMEOUT_SECS,
            optimistic_window_secs: DEFAULT_OPTIMISTIC_WINDOW_SECS,
            edit_highlight_ms: DEFAULT_EDIT_HIGHLIGHT_MS,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from a variable lookup, then validate
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let build_time_url = option_env!("MURMUR_SERVER_URL");
        let runtime_url = lookup(SERVER_URL_VAR);

        info!(
            build_time = ?build_time_url,
            runtime = ?runtime_url,
            "Server URL sources"
        );

        let defaults = Self::default();
        let config = Self {
            server_url: build_time_url
                .map(String::from)
                .or(runtime_url)
                .unwrap_or(defaults.server_url),
            session_cookie: lookup(SESSION_COOKIE_VAR).filter(|c| !c.trim().is_empty()),
            username: lookup(USERNAME_VAR).filter(|u| !u.trim().is_empty()),
            poll_interval_ms: parse_var(&lookup, POLL_INTERVAL_VAR, defaults.poll_interval_ms)?,
            request_timeout_secs: parse_var(
                &lookup,
                REQUEST_TIMEOUT_VAR,
                defaults.request_timeout_secs,
            )?,
            cycle_timeout_secs: parse_var(&lookup, CYCLE_TIMEOUT_VAR, defaults.cycle_timeout_secs)?,
            optimistic_window_secs: parse_var(
                &lookup,
                OPTIMISTIC_WINDOW_VAR,
                defaults.optimistic_window_secs,
            )?,
            edit_highlight_ms: parse_var(&lookup, EDIT_HIGHLIGHT_VAR, defaults.edit_highlight_ms)?,
        };

        config.check()?;
        info!(url = %config.server_url, "Using chat server URL");
        Ok(config)
    }

    pub fn check(&self) -> Result<()> {
        self.validate_input()
            .map_err(|e| ChatError::Config(e.to_string()))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle_timeout_secs)
    }

    pub fn optimistic_window(&self) -> Duration {
        Duration::from_secs(self.optimistic_window_secs)
    }

    pub fn edit_highlight(&self) -> Duration {
        Duration::from_millis(self.edit_highlight_ms)
    }
}

fn parse_var<F>(lookup: &F, name: &str, default: u64) -> Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            ChatError::Config(format!("{} must be a non-negative integer, got {:?}", name, raw))
        }),
        None => Ok(default),
    }
}
