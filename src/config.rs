// Race configuration and session credentials
// Everything here is resolved once at startup and then only read.

use std::time::Duration;

use chrono::{FixedOffset, NaiveTime, Offset, Utc};
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://www.cult.fit/api";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/144.0.0.0 Safari/537.36";

// Asia/Kolkata has no DST, a fixed offset is exact
const IST_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;
const MAX_HORIZON_DAYS: u32 = 366;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(String),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

impl ConfigError {
    fn invalid(key: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

// Fixed headers identifying us as the platform's web client
#[derive(Debug, Clone)]
pub struct PlatformHeaders {
    pub app_version: String,
    pub browser_name: String,
    pub os_name: String,
    pub city_id: String,
    pub timezone: String,
    pub user_agent: String,
}

impl Default for PlatformHeaders {
    fn default() -> Self {
        Self {
            app_version: "7".to_string(),
            browser_name: "Web".to_string(),
            os_name: "browser".to_string(),
            city_id: "Bangalore".to_string(),
            timezone: "Asia/Kolkata".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

// Immutable settings for one race against one resource
#[derive(Debug, Clone)]
pub struct RaceConfig {
    pub base_url: String,
    pub center_id: u32,
    pub workout_id: u32,
    pub target_slot_id: String,
    pub fallback_slot_ids: Vec<String>,
    pub max_retries: u32,
    pub retry_delay: Duration,
    // Fraction of `retry_delay` added as random extra wait, 0.0 keeps the delay fixed
    pub retry_jitter: f64,
    pub request_timeout: Duration,
    pub booking_horizon_days: u32,
    pub reference_tz: FixedOffset,
    pub release_at: Option<NaiveTime>,
    pub headers: PlatformHeaders,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            center_id: 988,
            workout_id: 350,
            target_slot_id: "15".to_string(),
            fallback_slot_ids: ["16", "15", "17", "14"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_retries: 15,
            retry_delay: Duration::from_millis(300),
            retry_jitter: 0.0,
            request_timeout: Duration::from_millis(5000),
            booking_horizon_days: 4,
            reference_tz: reference_timezone(),
            release_at: None,
            headers: PlatformHeaders::default(),
        }
    }
}

pub fn reference_timezone() -> FixedOffset {
    FixedOffset::east_opt(IST_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

impl RaceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    // Defaults overridden by whatever `lookup` yields. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(url) = get("BASE_URL") {
            config.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(v) = get("CENTER_ID") {
            config.center_id = parse_number("CENTER_ID", &v)?;
        }
        if let Some(v) = get("WORKOUT_ID") {
            config.workout_id = parse_number("WORKOUT_ID", &v)?;
        }
        if let Some(v) = get("TARGET_SLOT_ID") {
            config.target_slot_id = v;
        }
        if let Some(v) = get("FALLBACK_SLOT_IDS") {
            config.fallback_slot_ids = parse_id_list(&v);
        }
        if let Some(v) = get("MAX_RETRIES") {
            config.max_retries = parse_number("MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("RETRY_DELAY_MS") {
            config.retry_delay = Duration::from_millis(parse_number("RETRY_DELAY_MS", &v)?);
        }
        if let Some(v) = get("REQUEST_TIMEOUT_MS") {
            let ms: u64 = parse_number("REQUEST_TIMEOUT_MS", &v)?;
            if ms == 0 {
                return Err(ConfigError::invalid("REQUEST_TIMEOUT_MS", "must be positive"));
            }
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(v) = get("BOOKING_HORIZON_DAYS") {
            let days: u32 = parse_number("BOOKING_HORIZON_DAYS", &v)?;
            if days > MAX_HORIZON_DAYS {
                return Err(ConfigError::invalid(
                    "BOOKING_HORIZON_DAYS",
                    format!("must be at most {MAX_HORIZON_DAYS}"),
                ));
            }
            config.booking_horizon_days = days;
        }
        if let Some(v) = get("RELEASE_AT") {
            config.release_at = Some(parse_release_time(&v)?);
        }

        Ok(config)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| ConfigError::invalid(key, format!("{value:?}: {e}")))
}

pub fn parse_id_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn parse_release_time(value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .map_err(|_| ConfigError::invalid("RELEASE_AT", format!("{value:?} is not HH:MM[:SS]")))
}

// The two session cookies, `at` and `st`
#[derive(Clone, PartialEq, Eq)]
pub struct SessionTokens {
    pub at: String,
    pub st: String,
}

impl std::fmt::Debug for SessionTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTokens")
            .field("at", &"<redacted>")
            .field("st", &"<redacted>")
            .finish()
    }
}

impl SessionTokens {
    pub fn new(at: impl Into<String>, st: impl Into<String>) -> Self {
        Self {
            at: at.into(),
            st: st.into(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            at: required(&lookup, "AT")?,
            st: required(&lookup, "ST")?,
        })
    }

    pub fn cookie_header(&self) -> String {
        format!("at={}; st={}", self.at, self.st)
    }
}

// Everything the booking client must send on every call
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub tokens: SessionTokens,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("tokens", &self.tokens)
            .finish()
    }
}

impl Credentials {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = required(&lookup, "API_KEY")?;
        let tokens = SessionTokens::from_lookup(&lookup)?;
        Ok(Self { api_key, tokens })
    }
}

fn required<F>(lookup: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::Missing(key.to_string()))?;

    // Values end up in HTTP headers
    if value.chars().any(|c| c.is_control() || !c.is_ascii()) {
        return Err(ConfigError::invalid(key, "contains characters not allowed in a header"));
    }

    Ok(value)
}
