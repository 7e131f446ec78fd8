//! S3-compatible Object Storage Client
//!
//! Provides signed access to a single bucket on any S3-compatible service
//! (AWS S3, MinIO, Ceph RGW, ...) using path-style addressing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use reqwest::{Client, Method, Url};
use tracing::{debug, error, info, warn};

use super::errors::{TransportError, TransportResult};
use super::sigv4::{self, Credentials, SigningRequest, EMPTY_PAYLOAD_SHA256};
use super::types::{ErrorDocument, ListBucketResult};
use super::ObjectTransport;

/// HTTP client timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum number of retries for retryable errors
const MAX_RETRIES: u32 = 3;

/// Maximum number of recent errors to track
const MAX_ERROR_HISTORY: usize = 10;

/// Keys requested per ListObjectsV2 page
const LIST_PAGE_SIZE: u32 = 1000;

/// Health status values
pub const HEALTH_HEALTHY: u8 = 0;
pub const HEALTH_DEGRADED: u8 = 1;
pub const HEALTH_UNHEALTHY: u8 = 2;

/// A recent error entry for tracking
#[derive(Debug, Clone)]
pub struct ErrorEntry {
    pub timestamp: u64,
    pub operation: String,
    pub key: String,
    pub error: String,
}

/// Connection settings for an S3-compatible bucket
#[derive(Debug, Clone)]
pub struct S3Settings {
    /// Endpoint host with optional port, e.g. `localhost:9000`
    pub endpoint: String,
    /// Bucket holding the registry
    pub bucket: String,
    /// Key prefix inside the bucket (empty for the bucket root)
    pub prefix: String,
    /// Use HTTPS
    pub secure: bool,
    /// Signing credentials and region
    pub credentials: Credentials,
}

/// S3 API client for making signed requests against one bucket
#[derive(Clone)]
pub struct S3Client {
    /// HTTP client for making requests
    http_client: Client,
    /// `scheme://host[:port]`
    base_url: String,
    /// Host header value that gets signed
    host: String,
    /// Bucket name
    bucket: String,
    /// Key prefix, normalized to end with `/` when non-empty
    prefix: String,
    /// Signing credentials
    credentials: Credentials,
    /// Connection health (0=healthy, 1=degraded, 2=unhealthy)
    health: Arc<AtomicU8>,
    /// Recent error log
    error_log: Arc<RwLock<VecDeque<ErrorEntry>>>,
}

impl S3Client {
    /// Create a client for the bucket described by `settings`
    pub fn new(settings: &S3Settings) -> TransportResult<Self> {
        let scheme = if settings.secure { "https" } else { "http" };
        let url = Url::parse(&format!("{}://{}", scheme, settings.endpoint))
            .map_err(|e| TransportError::Request(format!("invalid endpoint: {}", e)))?;
        let host_name = url
            .host_str()
            .ok_or_else(|| TransportError::Request("endpoint has no host".to_string()))?;
        let host = match url.port() {
            Some(port) => format!("{}:{}", host_name, port),
            None => host_name.to_string(),
        };

        let http_client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(TransportError::from)?;

        let prefix = settings.prefix.trim_matches('/');
        let prefix = if prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", prefix)
        };

        info!(endpoint = %host, bucket = %settings.bucket, prefix = %prefix, "S3 client ready");

        Ok(Self {
            http_client,
            base_url: format!("{}://{}", scheme, host),
            host,
            bucket: settings.bucket.clone(),
            prefix,
            credentials: settings.credentials.clone(),
            health: Arc::new(AtomicU8::new(HEALTH_HEALTHY)),
            error_log: Arc::new(RwLock::new(VecDeque::with_capacity(MAX_ERROR_HISTORY))),
        })
    }

    /// Get the bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Stable identity of the bucket this client addresses
    pub fn identity(&self) -> String {
        format!("{}/{}/{}", self.base_url, self.bucket, self.prefix)
    }

    /// Sign and send one request, mapping non-2xx statuses to errors
    async fn send(
        &self,
        method: Method,
        key: Option<&str>,
        query: &[(String, String)],
        body: Vec<u8>,
        extra_headers: &[(String, String)],
    ) -> TransportResult<reqwest::Response> {
        let canonical_uri = match key {
            Some(key) => format!(
                "/{}/{}",
                sigv4::encode_component(&self.bucket),
                sigv4::encode_path(&format!("{}{}", self.prefix, key))
            ),
            None => format!("/{}", sigv4::encode_component(&self.bucket)),
        };
        let query_string = query
            .iter()
            .map(|(k, v)| format!("{}={}", sigv4::encode_component(k), sigv4::encode_component(v)))
            .collect::<Vec<_>>()
            .join("&");
        let url = if query_string.is_empty() {
            format!("{}{}", self.base_url, canonical_uri)
        } else {
            format!("{}{}?{}", self.base_url, canonical_uri, query_string)
        };

        let now = Utc::now();
        let payload_hash = if body.is_empty() {
            EMPTY_PAYLOAD_SHA256.to_string()
        } else {
            sigv4::sha256_hex(&body)
        };
        let amz_date = sigv4::amz_date(now);

        let mut headers = vec![
            ("host".to_string(), self.host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date),
        ];
        headers.extend(extra_headers.iter().cloned());

        let authorization = sigv4::authorization(
            &self.credentials,
            &SigningRequest {
                method: method.as_str(),
                canonical_uri: &canonical_uri,
                query,
                headers: &headers,
                payload_hash: &payload_hash,
            },
            now,
        );

        debug!(method = %method, url = %url, "Sending S3 request");

        let mut request = self
            .http_client
            .request(method, &url)
            .header("Authorization", authorization);
        for (name, value) in headers.iter().filter(|(name, _)| name != "host") {
            request = request.header(name.as_str(), value.as_str());
        }
        // Always attach the body so PUT carries Content-Length even when empty
        let response = request.body(body).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::from_status(status, &ErrorDocument::describe(&body)));
        }
        Ok(response)
    }

    /// Execute an operation with retry logic and fixed backoff
    async fn with_retry<F, Fut, T>(&self, operation: &str, key: &str, f: F) -> TransportResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = TransportResult<T>>,
    {
        let backoff_ms = [500u64, 1000, 2000];
        let mut attempt = 0u32;

        loop {
            match f().await {
                Ok(result) => {
                    self.health.store(HEALTH_HEALTHY, Ordering::Relaxed);
                    return Ok(result);
                }
                Err(e) => {
                    if !e.is_retryable() || attempt == MAX_RETRIES {
                        // Final failure: log error and update health
                        match &e {
                            TransportError::Network(_) | TransportError::Timeout => {
                                self.health.store(HEALTH_UNHEALTHY, Ordering::Relaxed);
                            }
                            TransportError::RateLimited | TransportError::Server(_, _) => {
                                self.health.store(HEALTH_DEGRADED, Ordering::Relaxed);
                            }
                            _ => {}
                        }
                        // Business outcomes are not transport failures
                        if !matches!(
                            e,
                            TransportError::NotFound(_) | TransportError::PreconditionFailed(_)
                        ) {
                            error!(operation = operation, key = key, error = %e, "S3 operation failed");
                            self.log_error(operation, key, &e.to_string());
                        }
                        return Err(e);
                    }

                    let delay = backoff_ms.get(attempt as usize).copied().unwrap_or(2000);
                    warn!(
                        operation = operation,
                        attempt = attempt + 1,
                        max = MAX_RETRIES,
                        delay_ms = delay,
                        error = %e,
                        "Retrying S3 operation"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Log an error to the error history ring buffer
    fn log_error(&self, operation: &str, key: &str, error: &str) {
        let entry = ErrorEntry {
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            operation: operation.to_string(),
            key: key.to_string(),
            error: error.to_string(),
        };

        let mut log = self.error_log.write().unwrap_or_else(|e| e.into_inner());
        if log.len() >= MAX_ERROR_HISTORY {
            log.pop_front();
        }
        log.push_back(entry);
    }

    /// Get connection health status string
    pub fn health_status(&self) -> &'static str {
        match self.health.load(Ordering::Relaxed) {
            HEALTH_HEALTHY => "healthy",
            HEALTH_DEGRADED => "degraded",
            _ => "unhealthy",
        }
    }

    /// Get recent errors
    pub fn recent_errors(&self) -> Vec<ErrorEntry> {
        self.error_log
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Upload an object
    ///
    /// With `if_absent` the request carries `If-None-Match: *` and a
    /// `412 Precondition Failed` answer is reported as `Ok(false)`. When an
    /// earlier attempt failed ambiguously, the `412` may come from that
    /// attempt's own commit; the stored bytes are compared with `data` to
    /// tell the two apart.
    pub async fn put_object(&self, key: &str, data: &[u8], if_absent: bool) -> TransportResult<bool> {
        let extra = if if_absent {
            vec![("if-none-match".to_string(), "*".to_string())]
        } else {
            Vec::new()
        };

        let attempts = AtomicU32::new(0);
        let result = self
            .with_retry("put_object", key, || {
                attempts.fetch_add(1, Ordering::Relaxed);
                self.send(Method::PUT, Some(key), &[], data.to_vec(), &extra)
            })
            .await;

        match result {
            Ok(_) => {
                debug!(key = key, size = data.len(), "Uploaded object");
                Ok(true)
            }
            Err(TransportError::PreconditionFailed(_)) if if_absent => {
                if attempts.load(Ordering::Relaxed) > 1 {
                    match self.get_object(key).await {
                        Ok(stored) if stored == data => {
                            debug!(key = key, "Conditional upload was committed by an earlier attempt");
                            return Ok(true);
                        }
                        Ok(_) | Err(TransportError::NotFound(_)) => {}
                        Err(e) => return Err(e),
                    }
                }
                debug!(key = key, "Conditional upload lost: object already exists");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Download object content
    pub async fn get_object(&self, key: &str) -> TransportResult<Vec<u8>> {
        let bytes = self
            .with_retry("get_object", key, || async {
                let response = self.send(Method::GET, Some(key), &[], Vec::new(), &[]).await?;
                Ok::<_, TransportError>(response.bytes().await?)
            })
            .await
            .map_err(|e| match e {
                TransportError::NotFound(_) => TransportError::NotFound(key.to_string()),
                other => other,
            })?;

        debug!(key = key, size = bytes.len(), "Downloaded object");
        Ok(bytes.to_vec())
    }

    /// Check whether an object exists
    pub async fn head_object(&self, key: &str) -> TransportResult<bool> {
        match self
            .with_retry("head_object", key, || {
                self.send(Method::HEAD, Some(key), &[], Vec::new(), &[])
            })
            .await
        {
            Ok(_) => Ok(true),
            Err(TransportError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Delete an object; S3 answers 204 for missing keys as well
    pub async fn delete_object(&self, key: &str) -> TransportResult<()> {
        match self
            .with_retry("delete_object", key, || {
                self.send(Method::DELETE, Some(key), &[], Vec::new(), &[])
            })
            .await
        {
            Ok(_) | Err(TransportError::NotFound(_)) => {
                debug!(key = key, "Deleted object");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// List every key under `prefix`, following continuation tokens
    pub async fn list_objects(&self, prefix: &str) -> TransportResult<Vec<String>> {
        let full_prefix = format!("{}{}", self.prefix, prefix);
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut query = vec![
                ("list-type".to_string(), "2".to_string()),
                ("max-keys".to_string(), LIST_PAGE_SIZE.to_string()),
                ("prefix".to_string(), full_prefix.clone()),
            ];
            if let Some(token) = &continuation {
                query.push(("continuation-token".to_string(), token.clone()));
            }

            debug!(prefix = %full_prefix, start = ?continuation, "Listing objects");

            let body = self
                .with_retry("list_objects", prefix, || async {
                    let response = self.send(Method::GET, None, &query, Vec::new(), &[]).await?;
                    Ok::<_, TransportError>(response.text().await?)
                })
                .await?;

            let page = ListBucketResult::from_xml(&body)
                .map_err(|e| TransportError::Request(format!("malformed list response: {}", e)))?;

            keys.extend(
                page.contents
                    .into_iter()
                    .filter_map(|o| o.key.strip_prefix(&self.prefix).map(str::to_string)),
            );

            // Check for more pages
            match (page.is_truncated, page.next_continuation_token) {
                (true, Some(next)) => continuation = Some(next),
                _ => break,
            }
        }

        debug!(count = keys.len(), "Listed objects");
        Ok(keys)
    }
}

/// Blocking [`ObjectTransport`] over an [`S3Client`]
///
/// Owns a small tokio runtime and drives each request to completion on the
/// calling thread. Must not be called from inside another tokio runtime.
pub struct S3Transport {
    client: S3Client,
    runtime: tokio::runtime::Runtime,
    conditional_writes: bool,
}

impl S3Transport {
    /// Build the client and its runtime
    pub fn connect(settings: &S3Settings) -> TransportResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("registry-s3")
            .enable_all()
            .build()?;
        let client = S3Client::new(settings)?;
        Ok(Self {
            client,
            runtime,
            conditional_writes: true,
        })
    }

    /// Declare that the service ignores `If-None-Match` on PUT
    pub fn with_conditional_writes(mut self, enabled: bool) -> Self {
        self.conditional_writes = enabled;
        self
    }

    /// Access the underlying async client
    pub fn client(&self) -> &S3Client {
        &self.client
    }
}

impl ObjectTransport for S3Transport {
    fn put(&self, key: &str, data: &[u8]) -> TransportResult<()> {
        self.runtime
            .block_on(self.client.put_object(key, data, false))
            .map(|_| ())
    }

    fn put_if_absent(&self, key: &str, data: &[u8]) -> TransportResult<bool> {
        self.runtime.block_on(self.client.put_object(key, data, true))
    }

    fn get(&self, key: &str) -> TransportResult<Vec<u8>> {
        self.runtime.block_on(self.client.get_object(key))
    }

    fn exists(&self, key: &str) -> TransportResult<bool> {
        self.runtime.block_on(self.client.head_object(key))
    }

    fn delete(&self, key: &str) -> TransportResult<()> {
        self.runtime.block_on(self.client.delete_object(key))
    }

    fn list(&self, prefix: &str) -> TransportResult<Vec<String>> {
        self.runtime.block_on(self.client.list_objects(prefix))
    }

    fn identity(&self) -> String {
        self.client.identity()
    }

    fn supports_conditional_writes(&self) -> bool {
        self.conditional_writes
    }
}
