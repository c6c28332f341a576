//! S3 object-store client
//!
//! A thin typed facade over the handful of S3 API operations the upload
//! backend needs: HeadBucket, HeadObject, PutObject, CreateMultipartUpload,
//! UploadPart, ListParts, CompleteMultipartUpload, AbortMultipartUpload.
//!
//! # Example
//!
//! ```no_run
//! use tus_s3_store::s3::{S3Client, S3ClientConfig};
//! use bytes::Bytes;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = S3ClientConfig {
//!     bucket: "my-bucket".to_string(),
//!     region: "us-east-1".to_string(),
//!     endpoint: Some("http://localhost:9000".to_string()), // MinIO
//!     access_key: Some("minioadmin".to_string()),
//!     secret_key: Some("minioadmin".to_string()),
//!     retry: None,
//!     timeout: None,
//! };
//!
//! let client = S3Client::new(config)?;
//! let body = Bytes::from("Hello, World!");
//! let response = client.put_object("hello.txt", body, Some("text/plain"), &[]).await?;
//! println!("ETag: {}", response.etag);
//! # Ok(())
//! # }
//! ```
//!
//! # Tracing
//!
//! Every operation is instrumented with a `tracing` span (`s3.put_object`,
//! `s3.create_multipart_upload`, ...) carrying bucket/key/status attributes,
//! the same convention used throughout this crate's call stack.
//!
//! Requests are signed with AWS SigV4 when credentials are configured, and
//! retried with exponential backoff on 5xx/429/408 responses.

pub mod credentials;

pub use credentials::{
    Credentials, CredentialsError, CredentialsProvider, CredentialsProviderTrait,
    EnvironmentCredentials, StaticCredentials,
};

use aws_sigv4::http_request::{
    sign, SignableBody, SignableRequest, SigningParams, SigningSettings,
};
use aws_sigv4::sign::v4;
use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::collections::HashMap;
use std::time::SystemTime;
use thiserror::Error;

/// Characters that must survive unescaped in an S3 key, mirroring AWS's own
/// URI-encoding rules (unreserved characters plus the path separator).
const S3_KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

fn encode_key(key: &str) -> String {
    utf8_percent_encode(key, S3_KEY_ENCODE_SET).to_string()
}

/// S3 client errors.
///
/// `Response` carries the parsed status code and, when present, the S3
/// `<Code>` element from the error body (e.g. `NoSuchUpload`,
/// `NoSuchBucket`). Callers classify these into domain-level
/// [`crate::store::StoreError`] variants, since the same HTTP status means
/// different things to different callers (a 404 on `bucket_exists` is a
/// missing bucket; a 404 on `head_object` is a missing file).
#[derive(Error, Debug)]
pub enum S3ClientError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("request error: {0}")]
    Request(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("S3 error {status}: {message}")]
    Response {
        status: u16,
        code: Option<String>,
        message: String,
    },
}

impl S3ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            S3ClientError::Response { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            S3ClientError::Response { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

/// Retry configuration for S3 operations
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Timeout configuration for S3 operations
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            request_timeout_ms: 30_000,
        }
    }
}

/// S3 client configuration
#[derive(Debug, Clone)]
pub struct S3ClientConfig {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub retry: Option<RetryConfig>,
    pub timeout: Option<TimeoutConfig>,
}

/// A single part as reported by ListParts.
#[derive(Debug, Clone)]
pub struct S3Part {
    pub part_number: u32,
    pub etag: String,
    pub size: u64,
}

/// A part about to be submitted to CompleteMultipartUpload.
#[derive(Debug, Clone)]
pub struct S3CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

#[derive(Debug, Clone, Default)]
pub struct S3PutObjectResponse {
    pub etag: String,
}

#[derive(Debug, Clone)]
pub struct S3CreateMultipartUploadResponse {
    pub upload_id: String,
}

#[derive(Debug, Clone)]
pub struct S3UploadPartResponse {
    pub etag: String,
}

#[derive(Debug, Clone)]
pub struct S3CompleteMultipartUploadResponse {
    pub etag: String,
}

#[derive(Debug, Clone, Default)]
pub struct S3HeadObjectResponse {
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct S3ListPartsResponse {
    pub parts: Vec<S3Part>,
    pub next_part_number_marker: Option<String>,
}

/// S3 client
pub struct S3Client {
    config: S3ClientConfig,
    http_client: reqwest::Client,
    retry_config: RetryConfig,
}

impl S3Client {
    pub fn new(config: S3ClientConfig) -> Result<Self, S3ClientError> {
        let timeout_config = config.timeout.clone().unwrap_or_default();
        let retry_config = config.retry.clone().unwrap_or_default();

        let http_client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_millis(
                timeout_config.connect_timeout_ms,
            ))
            .timeout(std::time::Duration::from_millis(
                timeout_config.request_timeout_ms,
            ))
            .build()
            .map_err(|e| S3ClientError::Config(e.to_string()))?;

        Ok(Self {
            config,
            http_client,
            retry_config,
        })
    }

    fn is_retryable_error(status: reqwest::StatusCode) -> bool {
        status.is_server_error()
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status == reqwest::StatusCode::REQUEST_TIMEOUT
    }

    fn calculate_backoff(&self, attempt: u32) -> std::time::Duration {
        let delay_ms = (self.retry_config.initial_backoff_ms as f64
            * self.retry_config.backoff_multiplier.powi(attempt as i32))
        .min(self.retry_config.max_backoff_ms as f64) as u64;

        std::time::Duration::from_millis(delay_ms)
    }

    fn compute_content_hash(body: &[u8]) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(body);
        hex::encode(hasher.finalize())
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }

    pub fn region(&self) -> &str {
        &self.config.region
    }

    pub fn endpoint(&self) -> String {
        self.config
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://s3.{}.amazonaws.com", self.config.region))
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint(), self.config.bucket, encode_key(key))
    }

    fn bucket_url(&self) -> String {
        format!("{}/{}", self.endpoint(), self.config.bucket)
    }

    fn get_host(&self) -> String {
        let endpoint = self.endpoint();
        if let Some(stripped) = endpoint.strip_prefix("https://") {
            stripped.split('/').next().unwrap_or(&endpoint).to_string()
        } else if let Some(stripped) = endpoint.strip_prefix("http://") {
            stripped.split('/').next().unwrap_or(&endpoint).to_string()
        } else {
            endpoint
        }
    }

    fn extract_xml_tag(xml: &str, tag: &str) -> Option<String> {
        let start_tag = format!("<{}>", tag);
        let end_tag = format!("</{}>", tag);

        let start_pos = xml.find(&start_tag)? + start_tag.len();
        let end_pos = xml[start_pos..].find(&end_tag)? + start_pos;

        Some(xml[start_pos..end_pos].to_string())
    }

    /// Build an `S3ClientError::Response` from a non-2xx HTTP response,
    /// extracting the S3 `<Code>`/`<Message>` elements from the XML error
    /// body when present.
    async fn error_from_response(response: reqwest::Response) -> S3ClientError {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::new());
        let code = Self::extract_xml_tag(&body, "Code");
        let message = Self::extract_xml_tag(&body, "Message").unwrap_or(body);
        S3ClientError::Response {
            status,
            code,
            message,
        }
    }

    fn sign_request(
        &self,
        method: &str,
        uri: &str,
        headers: &[(String, String)],
        body: &[u8],
    ) -> Result<Vec<(String, String)>, S3ClientError> {
        let access_key = self
            .config
            .access_key
            .as_ref()
            .ok_or_else(|| S3ClientError::Signing("missing access key".into()))?;
        let secret_key = self
            .config
            .secret_key
            .as_ref()
            .ok_or_else(|| S3ClientError::Signing("missing secret key".into()))?;
        let provider = StaticCredentials::new(access_key.clone(), secret_key.clone());
        let resolved = provider.credentials();

        let credentials = aws_credential_types::Credentials::new(
            resolved.access_key_id(),
            resolved.secret_access_key(),
            resolved.session_token().map(String::from),
            None,
            "tus-s3-store",
        );

        let identity = aws_smithy_runtime_api::client::identity::Identity::new(credentials, None);

        let settings = SigningSettings::default();

        let signing_params = v4::SigningParams::builder()
            .identity(&identity)
            .region(&self.config.region)
            .name("s3")
            .time(SystemTime::now())
            .settings(settings)
            .build()
            .map_err(|e| S3ClientError::Signing(e.to_string()))?;

        let signing_params = SigningParams::V4(signing_params);

        let signable_body = SignableBody::Bytes(body);
        let signable_request = SignableRequest::new(
            method,
            uri,
            headers.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            signable_body,
        )
        .map_err(|e| S3ClientError::Signing(e.to_string()))?;

        let (signing_instructions, _signature) = sign(signable_request, &signing_params)
            .map_err(|e| S3ClientError::Signing(e.to_string()))?
            .into_parts();

        let mut signed_headers = Vec::new();
        for (name, value) in signing_instructions.headers() {
            signed_headers.push((name.to_string(), value.to_string()));
        }

        Ok(signed_headers)
    }

    pub fn has_credentials(&self) -> bool {
        self.config.access_key.is_some() && self.config.secret_key.is_some()
    }

    /// HeadBucket: confirm the configured bucket exists and is reachable.
    #[tracing::instrument(name = "s3.head_bucket", skip(self), fields(s3.bucket = %self.config.bucket), err)]
    pub async fn bucket_exists(&self) -> Result<(), S3ClientError> {
        let url = self.bucket_url();
        let headers = vec![("host".to_string(), self.get_host())];
        let signed_headers = if self.has_credentials() {
            self.sign_request("HEAD", &url, &headers, &[])?
        } else {
            vec![]
        };

        let mut request = self.http_client.head(&url);
        for (name, value) in &signed_headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| S3ClientError::Request(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_from_response(response).await)
        }
    }

    /// HeadObject: fetch the `x-amz-meta-*` user metadata of an object.
    #[tracing::instrument(name = "s3.head_object", skip(self), fields(s3.bucket = %self.config.bucket, s3.key = %key), err)]
    pub async fn head_object(&self, key: &str) -> Result<S3HeadObjectResponse, S3ClientError> {
        let url = self.object_url(key);
        let headers = vec![("host".to_string(), self.get_host())];
        let signed_headers = if self.has_credentials() {
            self.sign_request("HEAD", &url, &headers, &[])?
        } else {
            vec![]
        };

        let mut request = self.http_client.head(&url);
        for (name, value) in &signed_headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| S3ClientError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let mut metadata = HashMap::new();
        for (name, value) in response.headers() {
            if let Some(meta_key) = name.as_str().strip_prefix("x-amz-meta-") {
                if let Ok(v) = value.to_str() {
                    metadata.insert(meta_key.to_string(), v.to_string());
                }
            }
        }

        Ok(S3HeadObjectResponse { metadata })
    }

    /// PutObject, carrying optional `x-amz-meta-*` user metadata.
    #[tracing::instrument(
        name = "s3.put_object",
        skip(self, body, user_metadata),
        fields(
            s3.bucket = %self.config.bucket,
            s3.key = %key,
            upload.bytes = body.len(),
            s3.etag = tracing::field::Empty,
        ),
        err
    )]
    pub async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
        user_metadata: &[(&str, &str)],
    ) -> Result<S3PutObjectResponse, S3ClientError> {
        let url = self.object_url(key);
        let content_hash = Self::compute_content_hash(&body);

        let mut headers = vec![
            ("host".to_string(), self.get_host()),
            ("x-amz-content-sha256".to_string(), content_hash.clone()),
        ];
        if let Some(ct) = content_type {
            headers.push(("content-type".to_string(), ct.to_string()));
        }
        for (k, v) in user_metadata {
            headers.push((format!("x-amz-meta-{}", k), v.to_string()));
        }

        let signed_headers = if self.has_credentials() {
            self.sign_request("PUT", &url, &headers, &body)?
        } else {
            vec![]
        };

        let mut last_error = None;
        for attempt in 0..=self.retry_config.max_retries {
            if attempt > 0 {
                let backoff = self.calculate_backoff(attempt - 1);
                tracing::debug!(attempt, backoff_ms = backoff.as_millis(), "retrying PutObject");
                tokio::time::sleep(backoff).await;
            }

            let mut request = self.http_client.put(&url).body(body.clone());
            if let Some(ct) = content_type {
                request = request.header("Content-Type", ct);
            }
            request = request.header("x-amz-content-sha256", &content_hash);
            for (k, v) in user_metadata {
                request = request.header(format!("x-amz-meta-{}", k), *v);
            }
            for (name, value) in &signed_headers {
                request = request.header(name, value);
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    let status = response.status();
                    let etag = response
                        .headers()
                        .get("ETag")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    tracing::Span::current().record("s3.etag", etag.as_str());
                    tracing::info!(etag = %etag, status = status.as_u16(), "PutObject completed");
                    return Ok(S3PutObjectResponse { etag });
                }
                Ok(response) => {
                    let status = response.status();
                    if Self::is_retryable_error(status) && attempt < self.retry_config.max_retries {
                        last_error = Some(Self::error_from_response(response).await);
                        continue;
                    }
                    return Err(Self::error_from_response(response).await);
                }
                Err(e) => {
                    if attempt < self.retry_config.max_retries {
                        last_error = Some(S3ClientError::Request(e.to_string()));
                        continue;
                    }
                    return Err(S3ClientError::Request(e.to_string()));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| S3ClientError::Request("all retries exhausted".into())))
    }

    #[tracing::instrument(
        name = "s3.create_multipart_upload",
        skip(self, user_metadata),
        fields(s3.bucket = %self.config.bucket, s3.key = %key, s3.upload_id = tracing::field::Empty),
        err
    )]
    pub async fn create_multipart_upload(
        &self,
        key: &str,
        content_type: Option<&str>,
        user_metadata: &[(&str, &str)],
    ) -> Result<S3CreateMultipartUploadResponse, S3ClientError> {
        let url = format!("{}?uploads", self.object_url(key));
        let content_hash = Self::compute_content_hash(&[]);

        let mut headers = vec![
            ("host".to_string(), self.get_host()),
            ("x-amz-content-sha256".to_string(), content_hash.clone()),
        ];
        if let Some(ct) = content_type {
            headers.push(("content-type".to_string(), ct.to_string()));
        }
        for (k, v) in user_metadata {
            headers.push((format!("x-amz-meta-{}", k), v.to_string()));
        }

        let signed_headers = if self.has_credentials() {
            self.sign_request("POST", &url, &headers, &[])?
        } else {
            vec![]
        };

        let mut request = self.http_client.post(&url);
        if let Some(ct) = content_type {
            request = request.header("Content-Type", ct);
        }
        request = request.header("x-amz-content-sha256", &content_hash);
        for (k, v) in user_metadata {
            request = request.header(format!("x-amz-meta-{}", k), *v);
        }
        for (name, value) in &signed_headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| S3ClientError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let body = response
            .text()
            .await
            .map_err(|e| S3ClientError::Request(e.to_string()))?;

        let upload_id = Self::extract_xml_tag(&body, "UploadId")
            .ok_or_else(|| S3ClientError::Response {
                status: 200,
                code: None,
                message: "missing UploadId in response".into(),
            })?;

        tracing::Span::current().record("s3.upload_id", upload_id.as_str());
        tracing::info!(upload_id = %upload_id, "CreateMultipartUpload completed");

        Ok(S3CreateMultipartUploadResponse { upload_id })
    }

    #[tracing::instrument(
        name = "s3.upload_part",
        skip(self, body),
        fields(
            s3.bucket = %self.config.bucket,
            s3.key = %key,
            s3.upload_id = %upload_id,
            s3.part_number = part_number,
            upload.bytes = body.len(),
            s3.etag = tracing::field::Empty,
        ),
        err
    )]
    pub async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<S3UploadPartResponse, S3ClientError> {
        let url = format!(
            "{}?partNumber={}&uploadId={}",
            self.object_url(key),
            part_number,
            upload_id
        );
        let content_hash = Self::compute_content_hash(&body);

        let headers = vec![
            ("host".to_string(), self.get_host()),
            ("x-amz-content-sha256".to_string(), content_hash.clone()),
        ];
        let signed_headers = if self.has_credentials() {
            self.sign_request("PUT", &url, &headers, &body)?
        } else {
            vec![]
        };

        let mut last_error = None;
        for attempt in 0..=self.retry_config.max_retries {
            if attempt > 0 {
                let backoff = self.calculate_backoff(attempt - 1);
                tokio::time::sleep(backoff).await;
            }

            let mut request = self
                .http_client
                .put(&url)
                .header("x-amz-content-sha256", &content_hash)
                .body(body.clone());
            for (name, value) in &signed_headers {
                request = request.header(name, value);
            }
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    let etag = response
                        .headers()
                        .get("ETag")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    tracing::Span::current().record("s3.etag", etag.as_str());
                    tracing::info!(etag = %etag, part_number, "UploadPart completed");
                    return Ok(S3UploadPartResponse { etag });
                }
                Ok(response) => {
                    let status = response.status();
                    if Self::is_retryable_error(status) && attempt < self.retry_config.max_retries {
                        last_error = Some(Self::error_from_response(response).await);
                        continue;
                    }
                    return Err(Self::error_from_response(response).await);
                }
                Err(e) => {
                    if attempt < self.retry_config.max_retries {
                        last_error = Some(S3ClientError::Request(e.to_string()));
                        continue;
                    }
                    return Err(S3ClientError::Request(e.to_string()));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| S3ClientError::Request("all retries exhausted".into())))
    }

    /// ListParts, one page. Callers paginate using `next_part_number_marker`.
    #[tracing::instrument(
        name = "s3.list_parts",
        skip(self),
        fields(s3.bucket = %self.config.bucket, s3.key = %key, s3.upload_id = %upload_id),
        err
    )]
    pub async fn list_parts(
        &self,
        key: &str,
        upload_id: &str,
        part_number_marker: Option<&str>,
    ) -> Result<S3ListPartsResponse, S3ClientError> {
        let mut url = format!("{}?uploadId={}&max-parts=1000", self.object_url(key), upload_id);
        if let Some(marker) = part_number_marker {
            url.push_str(&format!("&part-number-marker={}", marker));
        }
        let content_hash = Self::compute_content_hash(&[]);

        let headers = vec![
            ("host".to_string(), self.get_host()),
            ("x-amz-content-sha256".to_string(), content_hash.clone()),
        ];
        let signed_headers = if self.has_credentials() {
            self.sign_request("GET", &url, &headers, &[])?
        } else {
            vec![]
        };

        let mut request = self.http_client.get(&url).header("x-amz-content-sha256", &content_hash);
        for (name, value) in &signed_headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| S3ClientError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let body = response
            .text()
            .await
            .map_err(|e| S3ClientError::Request(e.to_string()))?;

        parse_list_parts_xml(&body)
    }

    #[tracing::instrument(
        name = "s3.complete_multipart_upload",
        skip(self, parts),
        fields(
            s3.bucket = %self.config.bucket,
            s3.key = %key,
            s3.upload_id = %upload_id,
            parts_count = parts.len(),
            s3.etag = tracing::field::Empty,
        ),
        err
    )]
    pub async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<S3CompletedPart>,
    ) -> Result<S3CompleteMultipartUploadResponse, S3ClientError> {
        let url = format!("{}?uploadId={}", self.object_url(key), upload_id);

        let mut xml_parts = String::new();
        for part in &parts {
            xml_parts.push_str(&format!(
                "<Part><PartNumber>{}</PartNumber><ETag>{}</ETag></Part>",
                part.part_number, part.etag
            ));
        }
        let xml_body = format!("<CompleteMultipartUpload>{}</CompleteMultipartUpload>", xml_parts);
        let content_hash = Self::compute_content_hash(xml_body.as_bytes());

        let headers = vec![
            ("host".to_string(), self.get_host()),
            ("x-amz-content-sha256".to_string(), content_hash.clone()),
            ("content-type".to_string(), "application/xml".to_string()),
        ];
        let signed_headers = if self.has_credentials() {
            self.sign_request("POST", &url, &headers, xml_body.as_bytes())?
        } else {
            vec![]
        };

        let mut request = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/xml")
            .header("x-amz-content-sha256", &content_hash)
            .body(xml_body);
        for (name, value) in &signed_headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| S3ClientError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let body = response
            .text()
            .await
            .map_err(|e| S3ClientError::Request(e.to_string()))?;

        let etag = Self::extract_xml_tag(&body, "ETag").ok_or_else(|| S3ClientError::Response {
            status: 200,
            code: None,
            message: "missing ETag in response".into(),
        })?;

        tracing::Span::current().record("s3.etag", etag.as_str());
        tracing::info!(etag = %etag, parts = parts.len(), "CompleteMultipartUpload completed");

        Ok(S3CompleteMultipartUploadResponse { etag })
    }

    #[tracing::instrument(
        name = "s3.abort_multipart_upload",
        skip(self),
        fields(s3.bucket = %self.config.bucket, s3.key = %key, s3.upload_id = %upload_id),
        err
    )]
    pub async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<(), S3ClientError> {
        let url = format!("{}?uploadId={}", self.object_url(key), upload_id);
        let content_hash = Self::compute_content_hash(&[]);

        let headers = vec![
            ("host".to_string(), self.get_host()),
            ("x-amz-content-sha256".to_string(), content_hash.clone()),
        ];
        let signed_headers = if self.has_credentials() {
            self.sign_request("DELETE", &url, &headers, &[])?
        } else {
            vec![]
        };

        let mut request = self.http_client.delete(&url).header("x-amz-content-sha256", &content_hash);
        for (name, value) in &signed_headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| S3ClientError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        tracing::info!(upload_id = %upload_id, "AbortMultipartUpload completed");
        Ok(())
    }
}

/// Parse a ListParts XML body into parts plus the next pagination marker.
fn parse_list_parts_xml(xml: &str) -> Result<S3ListPartsResponse, S3ClientError> {
    use quick_xml::events::Event;
    use quick_xml::reader::Reader;

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut parts = Vec::new();
    let mut next_part_number_marker = None;
    let mut is_truncated = false;

    let mut current_tag: Vec<u8> = Vec::new();
    let mut in_part = false;
    let mut part_number: Option<u32> = None;
    let mut etag: Option<String> = None;
    let mut size: Option<u64> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.name().as_ref().to_vec();
                if name == b"Part" {
                    in_part = true;
                    part_number = None;
                    etag = None;
                    size = None;
                }
                current_tag = name;
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .decode()
                    .map_err(|e| S3ClientError::Response {
                        status: 200,
                        code: None,
                        message: format!("malformed ListParts XML: {}", e),
                    })
                    .and_then(|decoded| {
                        quick_xml::escape::unescape(&decoded)
                            .map(|s| s.into_owned())
                            .map_err(|e| S3ClientError::Response {
                                status: 200,
                                code: None,
                                message: format!("malformed ListParts XML: {}", e),
                            })
                    })?;

                if in_part {
                    match current_tag.as_slice() {
                        b"PartNumber" => part_number = text.parse().ok(),
                        b"ETag" => etag = Some(text),
                        b"Size" => size = text.parse().ok(),
                        _ => {}
                    }
                } else if current_tag.as_slice() == b"NextPartNumberMarker" && !text.is_empty() {
                    next_part_number_marker = Some(text);
                } else if current_tag.as_slice() == b"IsTruncated" {
                    is_truncated = text == "true";
                }
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"Part" {
                    if let (Some(part_number), Some(etag), Some(size)) =
                        (part_number.take(), etag.take(), size.take())
                    {
                        parts.push(S3Part {
                            part_number,
                            etag,
                            size,
                        });
                    }
                    in_part = false;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(S3ClientError::Response {
                    status: 200,
                    code: None,
                    message: format!("malformed ListParts XML: {}", e),
                })
            }
            _ => {}
        }
    }

    // S3 and MinIO both echo NextPartNumberMarker on the final, non-truncated
    // page (AWS repeats the last part number, MinIO sends "0"); only treat it
    // as a real pagination cursor when IsTruncated says more pages follow.
    Ok(S3ListPartsResponse {
        parts,
        next_part_number_marker: if is_truncated { next_part_number_marker } else { None },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> S3ClientConfig {
        S3ClientConfig {
            bucket: "test-bucket".into(),
            region: "us-east-1".into(),
            endpoint: None,
            access_key: None,
            secret_key: None,
            retry: None,
            timeout: None,
        }
    }

    #[test]
    fn test_s3_client_creation() {
        let client = S3Client::new(test_config()).unwrap();
        assert_eq!(client.bucket(), "test-bucket");
        assert_eq!(client.region(), "us-east-1");
    }

    #[test]
    fn test_default_endpoint() {
        let mut config = test_config();
        config.region = "us-west-2".into();
        let client = S3Client::new(config).unwrap();
        assert_eq!(client.endpoint(), "https://s3.us-west-2.amazonaws.com");
    }

    #[test]
    fn test_custom_endpoint() {
        let mut config = test_config();
        config.endpoint = Some("http://localhost:9000".into());
        let client = S3Client::new(config).unwrap();
        assert_eq!(client.endpoint(), "http://localhost:9000");
    }

    #[test]
    fn test_retry_config_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.initial_backoff_ms, 100);
        assert_eq!(config.max_backoff_ms, 10_000);
        assert!((config.backoff_multiplier - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_calculate_backoff() {
        let mut config = test_config();
        config.retry = Some(RetryConfig {
            max_retries: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2.0,
        });
        let client = S3Client::new(config).unwrap();

        assert_eq!(client.calculate_backoff(0), std::time::Duration::from_millis(100));
        assert_eq!(client.calculate_backoff(1), std::time::Duration::from_millis(200));
        assert_eq!(client.calculate_backoff(2), std::time::Duration::from_millis(400));
        assert_eq!(client.calculate_backoff(10), std::time::Duration::from_millis(10_000));
    }

    #[test]
    fn test_is_retryable_error() {
        use reqwest::StatusCode;
        assert!(S3Client::is_retryable_error(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(S3Client::is_retryable_error(StatusCode::TOO_MANY_REQUESTS));
        assert!(S3Client::is_retryable_error(StatusCode::REQUEST_TIMEOUT));
        assert!(!S3Client::is_retryable_error(StatusCode::BAD_REQUEST));
        assert!(!S3Client::is_retryable_error(StatusCode::NOT_FOUND));
    }

    #[test]
    fn test_content_hash_computation() {
        let hash = S3Client::compute_content_hash(b"hello");
        assert_eq!(
            hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_encode_key_preserves_slash() {
        assert_eq!(encode_key("a/b c"), "a/b%20c");
    }

    #[test]
    fn test_parse_list_parts_xml() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListPartsResult>
  <Bucket>test</Bucket>
  <Key>upload-1</Key>
  <UploadId>abc</UploadId>
  <NextPartNumberMarker>2</NextPartNumberMarker>
  <IsTruncated>true</IsTruncated>
  <Part><PartNumber>1</PartNumber><ETag>"e1"</ETag><Size>5242880</Size></Part>
  <Part><PartNumber>2</PartNumber><ETag>"e2"</ETag><Size>1024</Size></Part>
</ListPartsResult>"#;

        let parsed = parse_list_parts_xml(xml).unwrap();
        assert_eq!(parsed.parts.len(), 2);
        assert_eq!(parsed.parts[0].part_number, 1);
        assert_eq!(parsed.parts[0].etag, "\"e1\"");
        assert_eq!(parsed.parts[1].size, 1024);
        assert_eq!(parsed.next_part_number_marker.as_deref(), Some("2"));
    }

    #[test]
    fn test_parse_list_parts_xml_empty() {
        let xml = r#"<ListPartsResult><Bucket>test</Bucket></ListPartsResult>"#;
        let parsed = parse_list_parts_xml(xml).unwrap();
        assert!(parsed.parts.is_empty());
        assert!(parsed.next_part_number_marker.is_none());
    }

    #[test]
    fn test_parse_list_parts_xml_final_page_marker_ignored() {
        // AWS echoes the last part number and MinIO echoes "0" in
        // NextPartNumberMarker even on the final page; IsTruncated=false is
        // the only reliable end-of-listing signal.
        let xml = r#"<ListPartsResult>
  <NextPartNumberMarker>2</NextPartNumberMarker>
  <IsTruncated>false</IsTruncated>
  <Part><PartNumber>1</PartNumber><ETag>"e1"</ETag><Size>5242880</Size></Part>
  <Part><PartNumber>2</PartNumber><ETag>"e2"</ETag><Size>1024</Size></Part>
</ListPartsResult>"#;
        let parsed = parse_list_parts_xml(xml).unwrap();
        assert_eq!(parsed.parts.len(), 2);
        assert!(parsed.next_part_number_marker.is_none());
    }

    #[test]
    fn test_parse_list_parts_xml_minio_zero_marker_on_final_page() {
        let xml = r#"<ListPartsResult>
  <NextPartNumberMarker>0</NextPartNumberMarker>
  <IsTruncated>false</IsTruncated>
  <Part><PartNumber>1</PartNumber><ETag>"e1"</ETag><Size>5242880</Size></Part>
</ListPartsResult>"#;
        let parsed = parse_list_parts_xml(xml).unwrap();
        assert!(parsed.next_part_number_marker.is_none());
    }

    #[test]
    fn test_s3_client_error_classification() {
        let err = S3ClientError::Response {
            status: 404,
            code: Some("NoSuchUpload".into()),
            message: "gone".into(),
        };
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.code(), Some("NoSuchUpload"));
    }

    // Note: HTTP integration tests are in tests/s3_http_api_test.rs
}
