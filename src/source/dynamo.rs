//! # DynamoDB Record Store
//!
//! [`RecordStore`] backed by a DynamoDB `Scan` over HTTPS.
//!
//! Requests are signed with AWS Signature Version 4 when static credentials
//! are configured. Without credentials the request is sent unsigned, which is
//! only useful against local emulators or signing proxies.
//!
//! Items come back in the DynamoDB attribute-value encoding
//! (`{"N": "12.5"}`, `{"M": {...}}`) and are unmarshalled into plain JSON
//! before being handed to the fragment parser.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, trace};

use super::scan::RecordStore;
use crate::config::SourceConfig;
use crate::error::{Result, TelemetryError};
use crate::telemetry::fragment::RawRecord;

/// DynamoDB JSON protocol content type
const CONTENT_TYPE: &str = "application/x-amz-json-1.0";

/// Target header value for the Scan operation
const SCAN_TARGET: &str = "DynamoDB_20120810.Scan";

const SERVICE: &str = "dynamodb";

const SIGNING_ALGORITHM: &str = "AWS4-HMAC-SHA256";

type HmacSha256 = Hmac<Sha256>;

/// Static AWS credentials
#[derive(Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct ScanResponse {
    #[serde(rename = "Items", default)]
    items: Vec<Map<String, Value>>,
}

/// DynamoDB scan client
pub struct DynamoScanStore {
    http: reqwest::Client,
    endpoint: reqwest::Url,
    region: String,
    table_name: String,
    credentials: Option<Credentials>,
}

impl std::fmt::Debug for DynamoScanStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamoScanStore")
            .field("endpoint", &self.endpoint.as_str())
            .field("region", &self.region)
            .field("table_name", &self.table_name)
            .field("signed", &self.credentials.is_some())
            .finish_non_exhaustive()
    }
}

impl DynamoScanStore {
    /// Build a scan client from source configuration
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint URL is invalid or the HTTP client cannot
    /// be constructed
    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        let endpoint = if config.dynamodb_endpoint.is_empty() {
            format!("https://dynamodb.{}.amazonaws.com/", config.region)
        } else {
            config.dynamodb_endpoint.clone()
        };

        let endpoint = reqwest::Url::parse(&endpoint)
            .map_err(|e| TelemetryError::Malformed(format!("invalid DynamoDB endpoint {}: {}", endpoint, e)))?;

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        let credentials = config.credentials().map(|(key, secret)| Credentials {
            access_key_id: key.to_string(),
            secret_access_key: secret.to_string(),
            session_token: Some(config.session_token.clone()).filter(|t| !t.is_empty()),
        });

        Ok(Self {
            http,
            endpoint,
            region: config.region.clone(),
            table_name: config.table_name.clone(),
            credentials,
        })
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }

    fn host(&self) -> String {
        let host = self.endpoint.host_str().unwrap_or_default();
        match self.endpoint.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }
}

#[async_trait]
impl RecordStore for DynamoScanStore {
    async fn scan(&self, limit: usize) -> Result<Vec<RawRecord>> {
        let body = json!({ "TableName": self.table_name, "Limit": limit }).to_string();
        let amz_date = chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string();

        let mut headers = vec![
            ("content-type".to_string(), CONTENT_TYPE.to_string()),
            ("host".to_string(), self.host()),
            ("x-amz-date".to_string(), amz_date.clone()),
            ("x-amz-target".to_string(), SCAN_TARGET.to_string()),
        ];
        if let Some(token) = self.credentials.as_ref().and_then(|c| c.session_token.clone()) {
            headers.push(("x-amz-security-token".to_string(), token));
        }

        let mut request = self
            .http
            .post(self.endpoint.clone())
            .header("Content-Type", CONTENT_TYPE)
            .header("X-Amz-Target", SCAN_TARGET)
            .header("X-Amz-Date", &amz_date);

        if let Some(credentials) = &self.credentials {
            if let Some(token) = &credentials.session_token {
                request = request.header("X-Amz-Security-Token", token);
            }
            let authorization = authorization_header(
                credentials,
                &SigningRequest {
                    method: "POST",
                    path: self.endpoint.path(),
                    query: "",
                    headers: &headers,
                    payload: body.as_bytes(),
                },
                &self.region,
                SERVICE,
                &amz_date,
            )?;
            request = request.header("Authorization", authorization);
        }

        trace!(table = %self.table_name, limit, "Sending DynamoDB scan");
        let response = request.body(body).send().await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(TelemetryError::HttpStatus {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: ScanResponse = serde_json::from_str(&text)?;
        debug!(items = parsed.items.len(), "DynamoDB scan returned");

        Ok(parsed
            .items
            .iter()
            .map(|item| RawRecord::from_value(unmarshal_item(item)))
            .collect())
    }
}

/// Convert a DynamoDB item into plain JSON
pub fn unmarshal_item(item: &Map<String, Value>) -> Value {
    Value::Object(
        item.iter()
            .map(|(k, v)| (k.clone(), unmarshal_attribute(v)))
            .collect(),
    )
}

/// Convert one DynamoDB attribute value into plain JSON
///
/// Values that are not in attribute-value form are returned unchanged.
pub fn unmarshal_attribute(value: &Value) -> Value {
    let Some(object) = value.as_object() else {
        return value.clone();
    };
    if object.len() != 1 {
        return value.clone();
    }

    let Some((tag, inner)) = object.iter().next() else {
        return value.clone();
    };

    match (tag.as_str(), inner) {
        ("S", Value::String(s)) => Value::String(s.clone()),
        ("N", Value::String(n)) => number_value(n),
        ("BOOL", Value::Bool(b)) => Value::Bool(*b),
        ("NULL", _) => Value::Null,
        ("M", Value::Object(map)) => unmarshal_item(map),
        ("L", Value::Array(items)) => Value::Array(items.iter().map(unmarshal_attribute).collect()),
        ("SS", Value::Array(items)) | ("BS", Value::Array(items)) => Value::Array(items.clone()),
        ("NS", Value::Array(items)) => Value::Array(
            items
                .iter()
                .map(|n| n.as_str().map(number_value).unwrap_or_else(|| n.clone()))
                .collect(),
        ),
        ("B", Value::String(b)) => Value::String(b.clone()),
        _ => value.clone(),
    }
}

fn number_value(n: &str) -> Value {
    if let Ok(i) = n.parse::<i64>() {
        return Value::from(i);
    }
    n.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(n.to_string()))
}

/// Request parts covered by the signature
pub struct SigningRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub query: &'a str,
    /// Headers to sign, names in any case
    pub headers: &'a [(String, String)],
    pub payload: &'a [u8],
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| TelemetryError::Transport(format!("signing key rejected: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Derive the SigV4 signing key for a date, region and service
pub fn signing_key(secret: &str, date_stamp: &str, region: &str, service: &str) -> Result<Vec<u8>> {
    let k_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date_stamp.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

fn canonical_headers(headers: &[(String, String)]) -> (String, String) {
    let mut normalized: Vec<(String, String)> = headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.trim().to_string()))
        .collect();
    normalized.sort_by(|a, b| a.0.cmp(&b.0));

    let canonical = normalized
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, value))
        .collect::<String>();
    let signed = normalized
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");

    (canonical, signed)
}

/// Build the `Authorization` header value for a request
///
/// `amz_date` is the `YYYYMMDD'T'HHMMSS'Z'` timestamp also sent as `x-amz-date`.
pub fn authorization_header(
    credentials: &Credentials,
    request: &SigningRequest<'_>,
    region: &str,
    service: &str,
    amz_date: &str,
) -> Result<String> {
    let date_stamp = amz_date.get(..8).ok_or_else(|| {
        TelemetryError::Malformed(format!("invalid x-amz-date: {}", amz_date))
    })?;

    let (canonical_headers, signed_headers) = canonical_headers(request.headers);
    let path = if request.path.is_empty() { "/" } else { request.path };

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        request.method,
        path,
        request.query,
        canonical_headers,
        signed_headers,
        hex::encode(Sha256::digest(request.payload)),
    );

    let scope = format!("{}/{}/{}/aws4_request", date_stamp, region, service);
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        SIGNING_ALGORITHM,
        amz_date,
        scope,
        hex::encode(Sha256::digest(canonical_request.as_bytes())),
    );

    let key = signing_key(&credentials.secret_access_key, date_stamp, region, service)?;
    let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?);

    Ok(format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        SIGNING_ALGORITHM, credentials.access_key_id, scope, signed_headers, signature
    ))
}
