//! JSON-over-HTTP client shared by the explorer adapters.
//!
//! [`ExplorerClient`] wraps a `reqwest` client with a base URL, default
//! headers, a per-request timeout and a bounded retry loop. Transport errors,
//! `5xx` and `429` responses are retried with a linear backoff; every other
//! failure surfaces immediately.
//!
//! ## Error Handling
//!
//! [`ExplorerError`] records a human-readable `context` for each request
//! (e.g. `"GET tokentx"`) alongside the underlying failure. Transport errors
//! are stripped of their URL, since Etherscan-family URLs carry the API key.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;
use usdt_gate::UpstreamError;

/// Errors that can occur while talking to an explorer.
#[derive(Debug, thiserror::Error)]
pub enum ExplorerError {
    /// URL parse error.
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        /// Human-readable context.
        context: &'static str,
        /// The underlying parse error.
        #[source]
        source: url::ParseError,
    },
    /// A configured header name or value is not valid.
    #[error("invalid header: {context}: {message}")]
    InvalidHeader {
        /// Human-readable context.
        context: &'static str,
        /// What was wrong.
        message: String,
    },
    /// HTTP transport error.
    #[error("HTTP error: {context}: {source}")]
    Http {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// JSON deserialization error.
    #[error("Failed to deserialize JSON: {context}: {source}")]
    JsonDeserialization {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// Unexpected HTTP status code.
    #[error("Unexpected HTTP status {status}: {context}: {body}")]
    HttpStatus {
        /// Human-readable context.
        context: &'static str,
        /// The HTTP status code.
        status: StatusCode,
        /// The response body.
        body: String,
    },
    /// Failed to read response body.
    #[error("Failed to read response body as text: {context}: {source}")]
    ResponseBodyRead {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// The explorer reported an error inside a successful response.
    #[error("explorer error: {context}: {message}")]
    Explorer {
        /// Human-readable context.
        context: &'static str,
        /// The explorer's message.
        message: String,
    },
    /// A field in the response had an unexpected shape.
    #[error("unexpected response: {context}: {message}")]
    Decode {
        /// Human-readable context.
        context: &'static str,
        /// What was wrong.
        message: String,
    },
}

impl ExplorerError {
    /// Returns `true` if repeating the request may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { .. } => true,
            Self::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }

    pub(crate) fn decode(context: &'static str, message: impl Into<String>) -> Self {
        Self::Decode {
            context,
            message: message.into(),
        }
    }
}

impl From<ExplorerError> for UpstreamError {
    fn from(err: ExplorerError) -> Self {
        match err {
            ExplorerError::HttpStatus {
                context,
                status,
                body,
            } => Self::Status {
                context,
                status: status.as_u16(),
                body,
            },
            ExplorerError::Explorer { context, message } => Self::Explorer { context, message },
            ExplorerError::Decode { context, message } => Self::Decode { context, message },
            ExplorerError::JsonDeserialization { context, source } => Self::Decode {
                context,
                message: source.to_string(),
            },
            ExplorerError::UrlParse { context, .. }
            | ExplorerError::InvalidHeader { context, .. }
            | ExplorerError::Http { context, .. }
            | ExplorerError::ResponseBodyRead { context, .. } => Self::Transport {
                context,
                source: Box::new(err),
            },
        }
    }
}

/// HTTP client bound to one explorer base URL.
#[derive(Clone, Debug)]
pub struct ExplorerClient {
    /// Base URL, e.g. `https://api.trongrid.io`
    base_url: Url,
    /// Shared Reqwest HTTP client
    client: Client,
    /// Headers sent with each request
    headers: HeaderMap,
    /// Per-request timeout
    timeout: Duration,
    /// Retries after the first attempt
    max_retries: u32,
    /// Delay unit between retries, multiplied by the attempt number
    retry_backoff: Duration,
}

impl ExplorerClient {
    /// Default per-request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Default delay unit between retries.
    pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);

    /// Creates a client for `base_url` with no retries.
    ///
    /// # Errors
    ///
    /// Returns [`ExplorerError::UrlParse`] if `base_url` is not a valid URL.
    pub fn try_new(base_url: &str) -> Result<Self, ExplorerError> {
        let base_url = Url::parse(base_url).map_err(|e| ExplorerError::UrlParse {
            context: "Failed to parse explorer base url",
            source: e,
        })?;
        Ok(Self {
            base_url,
            client: Client::new(),
            headers: HeaderMap::new(),
            timeout: Self::DEFAULT_TIMEOUT,
            max_retries: 0,
            retry_backoff: Self::DEFAULT_RETRY_BACKOFF,
        })
    }

    /// Returns the base URL used by this client.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Adds a sensitive header sent with every request.
    ///
    /// # Errors
    ///
    /// Returns [`ExplorerError::InvalidHeader`] if `name` or `value` is not
    /// valid in an HTTP header.
    pub fn with_header(mut self, name: &'static str, value: &str) -> Result<Self, ExplorerError> {
        let invalid = |e: &dyn std::fmt::Display| ExplorerError::InvalidHeader {
            context: name,
            message: e.to_string(),
        };
        let header = HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(&e))?;
        let mut value = HeaderValue::from_str(value).map_err(|e| invalid(&e))?;
        value.set_sensitive(true);
        self.headers.insert(header, value);
        Ok(self)
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets how many times a retryable failure is retried.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the delay unit between retries.
    #[must_use]
    pub const fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Builds `base_url + path` with the given query pairs.
    fn url(
        &self,
        path: &str,
        query: &[(&str, &str)],
        context: &'static str,
    ) -> Result<Url, ExplorerError> {
        let mut url = if path.is_empty() {
            self.base_url.clone()
        } else {
            let joined = format!("{}{path}", self.base_url.as_str().trim_end_matches('/'));
            Url::parse(&joined).map_err(|e| ExplorerError::UrlParse { context, source: e })?
        };
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    /// Sends a GET request and decodes the JSON body, retrying transient failures.
    ///
    /// `context` is a human-readable identifier used in tracing and error
    /// messages (e.g. `"GET /v1/blocks/latest"`).
    ///
    /// # Errors
    ///
    /// Returns [`ExplorerError`] once retries are exhausted or on a
    /// non-retryable failure.
    pub async fn get_json<R>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        context: &'static str,
    ) -> Result<R, ExplorerError>
    where
        R: DeserializeOwned,
    {
        let url = self.url(path, query, context)?;
        self.send_json(|| self.client.get(url.clone()), context).await
    }

    /// Sends `body` as a JSON POST and decodes the JSON response, retrying
    /// transient failures.
    ///
    /// # Errors
    ///
    /// Returns [`ExplorerError`] once retries are exhausted or on a
    /// non-retryable failure.
    pub async fn post_json<T, R>(
        &self,
        path: &str,
        body: &T,
        context: &'static str,
    ) -> Result<R, ExplorerError>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = self.url(path, &[], context)?;
        self.send_json(|| self.client.post(url.clone()).json(body), context)
            .await
    }

    async fn send_json<R, F>(&self, request: F, context: &'static str) -> Result<R, ExplorerError>
    where
        R: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            match self.send_once(request(), context).await {
                Ok(response) => return Ok(response),
                Err(e) if attempt < self.max_retries && e.is_retryable() => {
                    attempt += 1;
                    tracing::debug!(context, attempt, error = %e, "Retrying explorer request");
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                Err(e) => {
                    tracing::warn!(context, error = %e, "Explorer request failed");
                    return Err(e);
                }
            }
        }
    }

    async fn send_once<R>(
        &self,
        request: RequestBuilder,
        context: &'static str,
    ) -> Result<R, ExplorerError>
    where
        R: DeserializeOwned,
    {
        let http_response = request
            .headers(self.headers.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ExplorerError::Http {
                context,
                source: e.without_url(),
            })?;

        if http_response.status() == StatusCode::OK {
            http_response
                .json::<R>()
                .await
                .map_err(|e| ExplorerError::JsonDeserialization {
                    context,
                    source: e.without_url(),
                })
        } else {
            let status = http_response.status();
            let body = http_response
                .text()
                .await
                .map_err(|e| ExplorerError::ResponseBodyRead {
                    context,
                    source: e.without_url(),
                })?;
            Err(ExplorerError::HttpStatus {
                context,
                status,
                body,
            })
        }
    }
}
