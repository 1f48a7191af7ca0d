//! Backend requests and the HTTP client port.
//!
//! Ingestion requests (genuine or dummy) are padded so that URL, method,
//! headers and body add up to exactly the configured target size, making a
//! dummy upload indistinguishable from a real one on the wire.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::analytics::AnalyticsRecord;
use crate::calendar::{CalendarDay, Timestamp};
use crate::error::NetworkError;
use crate::exposure::ExposureDetectionSummary;
use crate::otp::Otp;

const INGESTION_UPLOAD_PATH: &str = "/v1/ingestion/upload";
const OTP_VALIDATION_PATH: &str = "/v1/ingestion/check-otp";
const CUN_VALIDATION_PATH: &str = "/v1/ingestion/check-cun";
const ANALYTICS_PATH: &str = "/v1/analytics/apple/operational-info";
const ANALYTICS_TOKEN_PATH: &str = "/v1/analytics/apple/token";

const PADDING_FIELD: &str = "padding";
const JSON_CONTENT_TYPE: &str = "application/json; charset=UTF-8";

/// Headers sent with every request.
pub const DEFAULT_HEADERS: [(&str, &str); 3] = [
    ("User-Agent", "Immuni"),
    ("Accept-Language", "en-US;q=1.0"),
    ("Accept-Encoding", "br;q=1.0"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    DummyIngestion,
    DataUpload,
    OtpValidation,
    CunValidation,
    Analytics,
    DummyAnalytics,
    AnalyticsTokenValidation,
}

impl RequestKind {
    /// Failures of these requests are never surfaced.
    pub fn is_best_effort(&self) -> bool {
        matches!(
            self,
            RequestKind::DummyIngestion
                | RequestKind::Analytics
                | RequestKind::DummyAnalytics
                | RequestKind::AnalyticsTokenValidation
        )
    }
}

/// A fully built HTTP request.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkRequest {
    pub kind: RequestKind,
    pub method: HttpMethod,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// A successful response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// A diagnosis key as handed over by the proximity framework.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporaryExposureKey {
    /// Base64 key material.
    pub key_data: String,
    pub rolling_start_number: u32,
    pub rolling_period: u32,
}

/// Body of a genuine diagnosis-key upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataUploadBody {
    pub teks: Vec<TemporaryExposureKey>,
    pub province: String,
    pub exposure_detection_summaries: Vec<ExposureDetectionSummary>,
}

/// Extra body of a CUN validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CunValidationBody {
    pub last_his_number: String,
    pub symptoms_started_on: CalendarDay,
}

fn endpoint(base: &Url, path: &str) -> Result<Url, NetworkError> {
    base.join(path)
        .map_err(|e| NetworkError::Connection(format!("invalid endpoint: {e}")))
}

fn ingestion_headers(token: &str, is_dummy: bool, clock: i64) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = DEFAULT_HEADERS
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    headers.push(("Authorization".into(), format!("Bearer {token}")));
    headers.push(("Content-Type".into(), JSON_CONTENT_TYPE.into()));
    headers.push(("Immuni-Dummy-Data".into(), u8::from(is_dummy).to_string()));
    headers.push(("Immuni-Client-Clock".into(), clock.to_string()));
    headers
}

pub(crate) fn random_alphanumeric(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Bytes an HTTP/1.1 request line + headers contribute before the body.
fn envelope_size(method: HttpMethod, url: &Url, headers: &[(String, String)]) -> usize {
    let headers: usize = headers
        .iter()
        .map(|(name, value)| format!("{name}: {value}\r\n").len())
        .sum();
    url.as_str().len() + method.as_str().len() + headers
}

/// Serialize `params` with a random `padding` field sized so that the whole
/// request weighs exactly `target_size` bytes.
pub fn padded_json_body(
    params: serde_json::Map<String, serde_json::Value>,
    envelope: usize,
    target_size: usize,
) -> Result<Vec<u8>, NetworkError> {
    let unpadded = serde_json::to_vec(&params)
        .map_err(|_| NetworkError::BadRequest)?
        .len();
    // `"padding":""` plus a separating comma when other fields exist.
    let overhead = PADDING_FIELD.len() + 5 + usize::from(!params.is_empty());
    let needed = envelope + unpadded + overhead;
    let padding = target_size
        .checked_sub(needed)
        .ok_or(NetworkError::PaddingOverflow {
            needed,
            target: target_size,
        })?;

    let mut padded = params;
    padded.insert(
        PADDING_FIELD.to_string(),
        serde_json::Value::String(random_alphanumeric(padding)),
    );
    serde_json::to_vec(&padded).map_err(|_| NetworkError::BadRequest)
}

fn to_map<T: Serialize>(value: &T) -> Result<serde_json::Map<String, serde_json::Value>, NetworkError> {
    match serde_json::to_value(value).map_err(|_| NetworkError::BadRequest)? {
        serde_json::Value::Object(map) => Ok(map),
        _ => Err(NetworkError::BadRequest),
    }
}

impl NetworkRequest {
    fn padded(
        kind: RequestKind,
        url: Url,
        headers: Vec<(String, String)>,
        params: serde_json::Map<String, serde_json::Value>,
        target_size: usize,
    ) -> Result<Self, NetworkError> {
        let method = HttpMethod::Post;
        let envelope = envelope_size(method, &url, &headers);
        let body = padded_json_body(params, envelope, target_size)?;
        Ok(Self {
            kind,
            method,
            url,
            headers,
            body,
        })
    }

    /// Upload with a random code and no content, flagged as dummy. The client
    /// clock is zeroed so it carries no timing information.
    pub fn dummy_ingestion(base: &Url, target_size: usize) -> Result<Self, NetworkError> {
        let otp = Otp::generate(&mut rand::thread_rng());
        Self::padded(
            RequestKind::DummyIngestion,
            endpoint(base, INGESTION_UPLOAD_PATH)?,
            ingestion_headers(&otp.sha256(), true, 0),
            serde_json::Map::new(),
            target_size,
        )
    }

    pub fn data_upload(
        base: &Url,
        otp: &Otp,
        body: &DataUploadBody,
        now: Timestamp,
        target_size: usize,
    ) -> Result<Self, NetworkError> {
        Self::padded(
            RequestKind::DataUpload,
            endpoint(base, INGESTION_UPLOAD_PATH)?,
            ingestion_headers(&otp.sha256(), false, now.timestamp()),
            to_map(body)?,
            target_size,
        )
    }

    pub fn otp_validation(
        base: &Url,
        otp: &Otp,
        now: Timestamp,
        target_size: usize,
    ) -> Result<Self, NetworkError> {
        Self::padded(
            RequestKind::OtpValidation,
            endpoint(base, OTP_VALIDATION_PATH)?,
            ingestion_headers(&otp.sha256(), false, now.timestamp()),
            serde_json::Map::new(),
            target_size,
        )
    }

    pub fn cun_validation(
        base: &Url,
        cun: &Otp,
        body: &CunValidationBody,
        now: Timestamp,
        target_size: usize,
    ) -> Result<Self, NetworkError> {
        Self::padded(
            RequestKind::CunValidation,
            endpoint(base, CUN_VALIDATION_PATH)?,
            ingestion_headers(&cun.sha256(), false, now.timestamp()),
            to_map(body)?,
            target_size,
        )
    }

    /// Operational-info record authorized by the analytics token. Dummy
    /// records carry a random token of the same length.
    pub fn analytics(
        base: &Url,
        record: &AnalyticsRecord,
        analytics_token: &str,
    ) -> Result<Self, NetworkError> {
        let token = if record.is_dummy {
            random_alphanumeric(analytics_token.len())
        } else {
            analytics_token.to_string()
        };
        let mut headers: Vec<(String, String)> = DEFAULT_HEADERS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        headers.push(("Authorization".into(), format!("Bearer {token}")));
        headers.push(("Content-Type".into(), JSON_CONTENT_TYPE.into()));
        headers.push((
            "Immuni-Dummy-Data".into(),
            u8::from(record.is_dummy).to_string(),
        ));
        let body = serde_json::to_vec(&record.body).map_err(|_| NetworkError::BadRequest)?;
        Ok(Self {
            kind: if record.is_dummy {
                RequestKind::DummyAnalytics
            } else {
                RequestKind::Analytics
            },
            method: HttpMethod::Post,
            url: endpoint(base, ANALYTICS_PATH)?,
            headers,
            body,
        })
    }

    /// Ask the backend to bind `analytics_token` to this device. The device
    /// token is sent as issued by the [`DeviceTokenProvider`].
    ///
    /// [`DeviceTokenProvider`]: crate::device::DeviceTokenProvider
    pub fn analytics_token_validation(
        base: &Url,
        analytics_token: &str,
        device_token: &str,
    ) -> Result<Self, NetworkError> {
        let mut headers: Vec<(String, String)> = DEFAULT_HEADERS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        headers.push(("Content-Type".into(), JSON_CONTENT_TYPE.into()));
        let body = serde_json::to_vec(&serde_json::json!({
            "analytics_token": analytics_token,
            "device_token": device_token,
        }))
        .map_err(|_| NetworkError::BadRequest)?;
        Ok(Self {
            kind: RequestKind::AnalyticsTokenValidation,
            method: HttpMethod::Post,
            url: endpoint(base, ANALYTICS_TOKEN_PATH)?,
            headers,
            body,
        })
    }

    /// Size of the request as seen on an HTTP/1.1 wire (request line + headers + body).
    pub fn wire_size(&self) -> usize {
        envelope_size(self.method, &self.url, &self.headers) + self.body.len()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// HTTP transport.
#[async_trait]
pub trait NetworkClient: Send + Sync {
    /// Non-2xx answers come back as typed errors.
    async fn send(&self, request: NetworkRequest) -> Result<NetworkResponse, NetworkError>;
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error_code: i64,
}

/// [`NetworkClient`] over `reqwest`.
pub struct ReqwestNetworkClient {
    client: reqwest::Client,
}

impl ReqwestNetworkClient {
    pub fn new(timeout: Duration) -> Result<Self, NetworkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .http1_only()
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl NetworkClient for ReqwestNetworkClient {
    async fn send(&self, request: NetworkRequest) -> Result<NetworkResponse, NetworkError> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
        };
        let mut builder = self.client.request(method, request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        if status.is_success() {
            return Ok(NetworkResponse {
                status: status.as_u16(),
                body: bytes.to_vec(),
            });
        }

        let error = match serde_json::from_slice::<ErrorBody>(&bytes) {
            Ok(body) => NetworkError::from_code(body.error_code),
            Err(_) if status == reqwest::StatusCode::BAD_REQUEST => NetworkError::BadRequest,
            Err(_) => NetworkError::Unknown,
        };
        tracing::debug!(kind = ?request.kind, %status, code = error.code(), "request failed");
        Err(error)
    }
}

/// In-memory [`NetworkClient`] that records every request and answers with a
/// fixed result, `201 Created` with an empty body unless told otherwise. Used
/// by tests and offline simulations.
pub struct RecordingNetworkClient {
    sent: Mutex<Vec<NetworkRequest>>,
    failure: Mutex<Option<NetworkError>>,
    status: Mutex<u16>,
}

impl Default for RecordingNetworkClient {
    fn default() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            status: Mutex::new(201),
        }
    }
}

impl RecordingNetworkClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status of the successful answers from now on.
    pub fn respond_with_status(&self, status: u16) {
        *self.status.lock().unwrap_or_else(|p| p.into_inner()) = status;
    }

    /// Answer every request with `error` from now on.
    pub fn fail_with(&self, error: NetworkError) {
        *self.failure.lock().unwrap_or_else(|p| p.into_inner()) = Some(error);
    }

    pub fn sent(&self) -> Vec<NetworkRequest> {
        self.sent.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn sent_of(&self, kind: RequestKind) -> usize {
        self.sent
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .filter(|r| r.kind == kind)
            .count()
    }
}

#[async_trait]
impl NetworkClient for RecordingNetworkClient {
    async fn send(&self, request: NetworkRequest) -> Result<NetworkResponse, NetworkError> {
        self.sent
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(request);
        if let Some(error) = self.failure.lock().unwrap_or_else(|p| p.into_inner()).clone() {
            return Err(error);
        }
        Ok(NetworkResponse {
            status: *self.status.lock().unwrap_or_else(|p| p.into_inner()),
            body: Vec::new(),
        })
    }
}
