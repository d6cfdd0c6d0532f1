// Booking client for the platform's web API
// Two calls matter for the race: the blind booking POST and the schedule GET.
// Both go through one pooled reqwest client so the race reuses a warm connection.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, COOKIE};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config::{Credentials, RaceConfig};
use crate::schedule::Schedule;

pub const BOOK_PATH: &str = "/v2/fitso/web/class/book";
pub const SCHEDULE_PATH: &str = "/v2/fitso/web/schedule";
pub const WARM_UP_PATH: &str = "/user/cities/v2";
pub const PRODUCT_TYPE: &str = "PLAY";

// Per-call failures. None of these is fatal to the process.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BookingError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("HTTP {status}: {}", .code.as_deref().unwrap_or("no error code"))]
    Http { status: u16, code: Option<String> },

    #[error("Schedule has no days")]
    EmptySchedule,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl BookingError {
    // Short reason for log lines: the platform's error code when it sent one
    pub fn reason(&self) -> String {
        match self {
            BookingError::Http {
                code: Some(code), ..
            } => code.clone(),
            BookingError::Http { status, .. } => status.to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Initialization error: {0}")]
    Init(String),
}

// A confirmed booking and whatever the server said about it
#[derive(Debug, Clone, PartialEq)]
pub struct BookingReceipt {
    pub slot_id: String,
    pub date: String,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub slot_id: String,
    pub class_id: String,
    pub product_type: String,
    pub date: String,
    pub workout_id: u32,
    #[serde(rename = "centerID")]
    pub center_id: u32,
}

impl BookingRequest {
    pub fn new(date: &str, slot_id: &str, workout_id: u32, center_id: u32) -> Self {
        Self {
            slot_id: slot_id.to_string(),
            class_id: slot_id.to_string(),
            product_type: PRODUCT_TYPE.to_string(),
            date: date.to_string(),
            workout_id,
            center_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleQuery {
    pub workout_id: u32,
    pub product_type: String,
    pub page_from: String,
    pub page_type: String,
    pub center_id: u32,
}

impl ScheduleQuery {
    pub fn new(workout_id: u32, center_id: u32) -> Self {
        Self {
            workout_id,
            product_type: PRODUCT_TYPE.to_string(),
            page_from: PRODUCT_TYPE.to_string(),
            page_type: "slotbooking".to_string(),
            center_id,
        }
    }
}

impl From<&RaceConfig> for ScheduleQuery {
    fn from(config: &RaceConfig) -> Self {
        Self::new(config.workout_id, config.center_id)
    }
}

// The seam the race runs against
#[async_trait]
pub trait BookingApi: Send + Sync {
    // Speculative write, no availability check first. `date` is `YYYY-MM-DD`.
    async fn blind_book(&self, date: &str, slot_id: &str) -> Result<BookingReceipt, BookingError>;

    async fn fetch_schedule(&self, query: &ScheduleQuery) -> Result<Schedule, BookingError>;

    // Opens the transport ahead of the race. Result is irrelevant.
    async fn warm_up(&self) {}
}

pub struct CultClient {
    http: reqwest::Client,
    base_url: String,
    workout_id: u32,
    center_id: u32,
    timeout: Duration,
}

impl CultClient {
    pub fn new(config: &RaceConfig, credentials: &Credentials) -> Result<Self, ClientError> {
        let headers = build_headers(config, credentials)?;

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(config.headers.user_agent.as_str())
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| ClientError::Init(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            workout_id: config.workout_id,
            center_id: config.center_id,
            timeout: config.request_timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn classify(&self, err: reqwest::Error) -> BookingError {
        if err.is_timeout() {
            BookingError::Timeout(self.timeout.as_millis() as u64)
        } else if err.is_decode() {
            BookingError::InvalidResponse(err.to_string())
        } else {
            BookingError::Network(err.to_string())
        }
    }

    // Body of a 2xx response. Anything else becomes `Http` with the platform's error code.
    async fn read_body(&self, response: reqwest::Response) -> Result<String, BookingError> {
        let status = response.status();
        let body = response.text().await.map_err(|e| self.classify(e))?;

        if !status.is_success() {
            return Err(BookingError::Http {
                status: status.as_u16(),
                code: error_code(&body),
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl BookingApi for CultClient {
    async fn blind_book(&self, date: &str, slot_id: &str) -> Result<BookingReceipt, BookingError> {
        let request = BookingRequest::new(date, slot_id, self.workout_id, self.center_id);

        let response = self
            .http
            .post(self.url(BOOK_PATH))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        // A 2xx is a confirmed booking whatever the body looks like
        let payload = booking_payload(self.read_body(response).await?);
        Ok(BookingReceipt {
            slot_id: slot_id.to_string(),
            date: date.to_string(),
            payload,
        })
    }

    async fn fetch_schedule(&self, query: &ScheduleQuery) -> Result<Schedule, BookingError> {
        let response = self
            .http
            .get(self.url(SCHEDULE_PATH))
            .query(query)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let body = self.read_body(response).await?;
        let schedule: Schedule = serde_json::from_str(&body)
            .map_err(|e| BookingError::InvalidResponse(format!("schedule: {e}")))?;

        if schedule.is_empty() {
            return Err(BookingError::EmptySchedule);
        }
        Ok(schedule)
    }

    async fn warm_up(&self) {
        match self.http.get(self.url(WARM_UP_PATH)).send().await {
            Ok(response) => debug!(status = response.status().as_u16(), "connection pool ready"),
            Err(e) => debug!(error = %e, "warm-up request failed"),
        }
    }
}

pub fn build_headers(config: &RaceConfig, credentials: &Credentials) -> Result<HeaderMap, ClientError> {
    let platform = &config.headers;
    let pairs: [(&'static str, String); 7] = [
        ("apikey", credentials.api_key.clone()),
        ("appversion", platform.app_version.clone()),
        ("browsername", platform.browser_name.clone()),
        ("osname", platform.os_name.clone()),
        ("cityid", platform.city_id.clone()),
        ("timezone", platform.timezone.clone()),
        ("cookie", credentials.tokens.cookie_header()),
    ];

    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        let value = HeaderValue::from_str(&value)
            .map_err(|_| ClientError::Config(format!("invalid value for header {name}")))?;
        headers.insert(HeaderName::from_static(name), value);
    }
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(headers)
}

// JSON when the body parses, the raw text otherwise, `null` when blank
pub fn booking_payload(body: String) -> Value {
    if body.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(&body).unwrap_or(Value::String(body))
}

// `meta.code` from an error body, if the platform sent one
pub fn error_code(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.pointer("/meta/code")? {
        Value::String(code) => Some(code.clone()),
        Value::Number(code) => Some(code.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionTokens;
    use crate::test_server::{canned_server, http_response, json_response, silent_server};
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    fn credentials() -> Credentials {
        Credentials {
            api_key: "test-key".to_string(),
            tokens: SessionTokens::new("at-1", "st-1"),
        }
    }

    fn client_for(server: &str, timeout_ms: u64) -> CultClient {
        let config = RaceConfig {
            base_url: format!("{server}/api"),
            request_timeout: Duration::from_millis(timeout_ms),
            ..RaceConfig::default()
        };
        CultClient::new(&config, &credentials()).unwrap()
    }

    #[test]
    fn test_booking_body_matches_platform_shape() {
        let body = serde_json::to_value(BookingRequest::new("2026-10-20", "15", 350, 988)).unwrap();
        assert_eq!(
            body,
            json!({
                "slotId": "15",
                "classId": "15",
                "productType": "PLAY",
                "date": "2026-10-20",
                "workoutId": 350,
                "centerID": 988
            })
        );
    }

    #[test]
    fn test_error_code_prefers_meta_code() {
        assert_eq!(error_code(r#"{"meta":{"code":"SLOT_FULL"}}"#), Some("SLOT_FULL".into()));
        assert_eq!(error_code(r#"{"meta":{"code":409}}"#), Some("409".into()));
        assert_eq!(error_code("<html>nope</html>"), None);

        let err = BookingError::Http {
            status: 409,
            code: None,
        };
        assert_eq!(err.reason(), "409");
    }

    #[test]
    fn test_headers_carry_credentials() {
        let headers = assert_ok!(build_headers(&RaceConfig::default(), &credentials()));
        assert_eq!(headers["apikey"], "test-key");
        assert_eq!(headers[COOKIE], "at=at-1; st=st-1");
        assert_eq!(headers["cityid"], "Bangalore");
        assert_eq!(headers[CONTENT_TYPE], "application/json");
    }

    #[test]
    fn test_header_invalid_credentials_rejected() {
        let mut creds = credentials();
        creds.api_key = "bad\nkey".to_string();
        let err = assert_err!(build_headers(&RaceConfig::default(), &creds));
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[tokio::test]
    async fn test_blind_book_success_returns_payload() {
        let (server, mut requests) =
            canned_server(vec![json_response("200 OK", r#"{"bookingId":"b-1"}"#)]).await;
        let client = client_for(&server, 2000);

        let receipt = assert_ok!(client.blind_book("2026-10-20", "15").await);
        assert_eq!(receipt.slot_id, "15");
        assert_eq!(receipt.payload, json!({"bookingId": "b-1"}));

        let raw = requests.recv().await.unwrap();
        assert!(raw.starts_with("POST /api/v2/fitso/web/class/book"));
        assert!(raw.contains("\"centerID\":988"));
        assert!(raw.to_ascii_lowercase().contains("apikey: test-key"));
    }

    #[tokio::test]
    async fn test_non_json_success_body_is_still_a_booking() {
        let (server, _requests) = canned_server(vec![http_response(
            "200 OK",
            &["Content-Type: text/html"],
            "Booked!",
        )])
        .await;
        let client = client_for(&server, 2000);

        let receipt = assert_ok!(client.blind_book("2026-10-20", "15").await);
        assert_eq!(receipt.slot_id, "15");
        assert_eq!(receipt.payload, Value::String("Booked!".to_string()));
    }

    #[test]
    fn test_booking_payload_shapes() {
        assert_eq!(booking_payload(r#"{"id":1}"#.to_string()), json!({"id": 1}));
        assert_eq!(booking_payload("  ".to_string()), Value::Null);
        assert_eq!(booking_payload("<p>ok</p>".to_string()), json!("<p>ok</p>"));
    }

    #[tokio::test]
    async fn test_schedule_that_is_not_json_is_invalid() {
        let (server, _requests) = canned_server(vec![http_response(
            "200 OK",
            &["Content-Type: text/html"],
            "<html>maintenance</html>",
        )])
        .await;
        let client = client_for(&server, 2000);

        let err = assert_err!(client.fetch_schedule(&ScheduleQuery::new(350, 988)).await);
        assert!(matches!(err, BookingError::InvalidResponse(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_rejected_booking_surfaces_status_and_code() {
        let (server, _requests) = canned_server(vec![json_response(
            "409 Conflict",
            r#"{"meta":{"code":"CLASS_FULL"}}"#,
        )])
        .await;
        let client = client_for(&server, 2000);

        let err = assert_err!(client.blind_book("2026-10-20", "15").await);
        assert_eq!(
            err,
            BookingError::Http {
                status: 409,
                code: Some("CLASS_FULL".to_string())
            }
        );
        assert_eq!(err.reason(), "CLASS_FULL");
    }

    #[tokio::test]
    async fn test_schedule_fetch_decodes_and_sends_query() {
        let body = json!({
            "classByDateList": [
                { "id": "2026-10-20", "classByTimeList": [ { "classes": [ { "id": "15", "date": "2026-10-20", "state": "AVAILABLE" } ] } ] }
            ]
        })
        .to_string();
        let (server, mut requests) = canned_server(vec![json_response("200 OK", &body)]).await;
        let client = client_for(&server, 2000);

        let schedule = assert_ok!(client.fetch_schedule(&ScheduleQuery::new(350, 988)).await);
        assert_eq!(schedule.class_by_date_list.len(), 1);

        let raw = requests.recv().await.unwrap();
        let request_line = raw.lines().next().unwrap();
        assert!(request_line.starts_with("GET /api/v2/fitso/web/schedule?"));
        assert!(request_line.contains("workoutId=350"));
        assert!(request_line.contains("pageType=slotbooking"));
        assert!(request_line.contains("centerId=988"));
    }

    #[tokio::test]
    async fn test_schedule_without_days_is_empty_schedule() {
        let (server, _requests) =
            canned_server(vec![json_response("200 OK", r#"{"classByDateList":[]}"#)]).await;
        let client = client_for(&server, 2000);

        let err = assert_err!(client.fetch_schedule(&ScheduleQuery::new(350, 988)).await);
        assert_eq!(err, BookingError::EmptySchedule);
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let server = silent_server().await;
        let client = client_for(&server, 100);

        let err = assert_err!(client.blind_book("2026-10-20", "15").await);
        assert_eq!(err, BookingError::Timeout(100));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        // Bind then drop so the port is closed
        let addr = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let client = client_for(&format!("http://{addr}"), 2000);

        let err = assert_err!(client.blind_book("2026-10-20", "15").await);
        assert!(matches!(err, BookingError::Network(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_warm_up_swallows_failures() {
        let server = silent_server().await;
        let client = client_for(&server, 100);

        // Must return rather than propagate the timeout
        client.warm_up().await;
    }
}
