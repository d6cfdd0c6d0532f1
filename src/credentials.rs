// Session credential refresh
//
// Revisits the site with the current `at`/`st` cookies so the platform rotates them,
// then reads the cookie store back. Whether the session is still alive is judged from
// page text, which is a heuristic: treat every result here as best effort.
// Runs out of band from the race.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::Url;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{SessionTokens, DEFAULT_USER_AGENT};

pub const SITE_URL: &str = "https://www.cult.fit";
pub const REFRESH_PAGE_URL: &str = "https://www.cult.fit/cult";
pub const AT_COOKIE: &str = "at";
pub const ST_COOKIE: &str = "st";

#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("Missing AT or ST token")]
    MissingTokens,

    #[error("Browser session failed: {0}")]
    Browser(String),

    #[error("Could not extract cookies, session may be fully expired")]
    ExtractionFailed,

    #[error("Session expired, not logged in")]
    LoggedOut,
}

// What the site left behind after navigation
#[derive(Debug, Clone, Default)]
pub struct BrowserSnapshot {
    pub page_content: String,
    pub cookies: Vec<(String, String)>,
}

impl BrowserSnapshot {
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(cookie, _)| cookie == name)
            .map(|(_, value)| value.as_str())
    }
}

#[async_trait]
pub trait SessionBrowser: Send + Sync {
    async fn visit(&self, tokens: &SessionTokens) -> Result<BrowserSnapshot, RefreshError>;
}

// Navigates with a cookie-jar HTTP client instead of a full browser engine.
// Rotation driven purely by page scripts is not observed.
pub struct HttpSessionBrowser {
    site_url: String,
    page_url: String,
    user_agent: String,
    timeout: Duration,
}

impl Default for HttpSessionBrowser {
    fn default() -> Self {
        Self {
            site_url: SITE_URL.to_string(),
            page_url: REFRESH_PAGE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(15),
        }
    }
}

impl HttpSessionBrowser {
    pub fn for_site(site_url: impl Into<String>, page_path: &str) -> Self {
        let site_url = site_url.into();
        Self {
            page_url: format!("{site_url}{page_path}"),
            site_url,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    // Host-only, so a plain rotating `Set-Cookie` from the site replaces it in the jar
    fn seed_cookie(name: &str, value: &str) -> String {
        format!("{name}={value}; Path=/")
    }
}

#[async_trait]
impl SessionBrowser for HttpSessionBrowser {
    async fn visit(&self, tokens: &SessionTokens) -> Result<BrowserSnapshot, RefreshError> {
        let site = Url::parse(&self.site_url)
            .map_err(|e| RefreshError::Browser(format!("bad site url: {e}")))?;

        let jar = Arc::new(Jar::default());
        jar.add_cookie_str(&Self::seed_cookie(AT_COOKIE, &tokens.at), &site);
        jar.add_cookie_str(&Self::seed_cookie(ST_COOKIE, &tokens.st), &site);

        let client = reqwest::Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .user_agent(self.user_agent.as_str())
            .timeout(self.timeout)
            .build()
            .map_err(|e| RefreshError::Browser(e.to_string()))?;

        let response = client
            .get(&self.page_url)
            .send()
            .await
            .map_err(|e| RefreshError::Browser(e.to_string()))?;
        debug!(status = response.status().as_u16(), url = %response.url(), "page loaded");

        let page_content = response
            .text()
            .await
            .map_err(|e| RefreshError::Browser(e.to_string()))?;

        let cookies = jar_cookies(&jar, &site, tokens);

        Ok(BrowserSnapshot {
            page_content,
            cookies,
        })
    }
}

// Cookies the jar would send to `site`, one per name. A name can still appear twice
// when the site rotates it under a wider domain; the value that differs from what
// was seeded is the rotated one.
fn jar_cookies(jar: &Jar, site: &Url, seeded: &SessionTokens) -> Vec<(String, String)> {
    let raw = jar
        .cookies(site)
        .and_then(|header| header.to_str().ok().map(parse_cookie_header))
        .unwrap_or_default();
    prefer_rotated(raw, seeded)
}

pub fn prefer_rotated(cookies: Vec<(String, String)>, seeded: &SessionTokens) -> Vec<(String, String)> {
    let seeded_value = |name: &str| match name {
        AT_COOKIE => Some(seeded.at.as_str()),
        ST_COOKIE => Some(seeded.st.as_str()),
        _ => None,
    };

    let mut merged: Vec<(String, String)> = Vec::with_capacity(cookies.len());
    for (name, value) in cookies {
        match merged.iter_mut().find(|(seen, _)| *seen == name) {
            Some(existing) => {
                if seeded_value(&name) == Some(existing.1.as_str()) {
                    existing.1 = value;
                }
            }
            None => merged.push((name, value)),
        }
    }
    merged
}

pub fn parse_cookie_header(header: &str) -> Vec<(String, String)> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect()
}

// Logged-out pages offer "Login" and mention neither "logout" nor "account"
pub fn looks_logged_out(page_content: &str) -> bool {
    page_content.contains("Login")
        && !page_content.contains("logout")
        && !page_content.contains("account")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshedTokens {
    pub tokens: SessionTokens,
    pub at_changed: bool,
    pub st_changed: bool,
}

impl RefreshedTokens {
    // `KEY=value` lines for an automation pipeline to capture
    pub fn export_lines(&self) -> [String; 2] {
        [
            format!("FRESH_AT={}", self.tokens.at),
            format!("FRESH_ST={}", self.tokens.st),
        ]
    }
}

pub struct CredentialRefresher<B> {
    browser: B,
}

impl<B: SessionBrowser> CredentialRefresher<B> {
    pub fn new(browser: B) -> Self {
        Self { browser }
    }

    pub async fn refresh(&self, current: &SessionTokens) -> Result<RefreshedTokens, RefreshError> {
        if current.at.trim().is_empty() || current.st.trim().is_empty() {
            return Err(RefreshError::MissingTokens);
        }

        let snapshot = self.browser.visit(current).await?;

        let fresh_at = non_empty_cookie(&snapshot, AT_COOKIE)?;
        let fresh_st = non_empty_cookie(&snapshot, ST_COOKIE)?;

        if looks_logged_out(&snapshot.page_content) {
            return Err(RefreshError::LoggedOut);
        }

        let refreshed = RefreshedTokens {
            at_changed: fresh_at != current.at,
            st_changed: fresh_st != current.st,
            tokens: SessionTokens::new(fresh_at, fresh_st),
        };
        info!(
            at_changed = refreshed.at_changed,
            st_changed = refreshed.st_changed,
            "session tokens extracted"
        );
        Ok(refreshed)
    }
}

fn non_empty_cookie(snapshot: &BrowserSnapshot, name: &str) -> Result<String, RefreshError> {
    snapshot
        .cookie(name)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .ok_or(RefreshError::ExtractionFailed)
}
