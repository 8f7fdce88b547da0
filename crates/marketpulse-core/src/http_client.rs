use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::provider::SourceError;
use crate::ProviderId;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How a provider presents its API key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Raw key in a vendor header such as `X-Finnhub-Token`.
    Header { name: &'static str, key: String },
    /// `Authorization: <scheme> <key>`.
    Authorization { scheme: &'static str, key: String },
}

impl Credential {
    fn header(&self) -> (String, String) {
        match self {
            Self::Header { name, key } => (name.to_ascii_lowercase(), key.clone()),
            Self::Authorization { scheme, key } => {
                (String::from("authorization"), format!("{scheme} {key}"))
            }
        }
    }
}

/// One outgoing GET. Header names are stored lower-case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: BTreeMap<String, String>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
            headers: BTreeMap::new(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_credential(mut self, credential: &Credential) -> Self {
        let (name, value) = credential.header();
        self.headers.insert(name, value);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn with_status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<String>) -> Self {
        Self::with_status(200, body)
    }

    pub const fn is_success(&self) -> bool {
        matches!(self.status, 200..=299)
    }

    /// Decodes the body on behalf of `provider` after checking the status.
    ///
    /// 429 is `rate_limited`, any other 4xx is `invalid_request`, and the
    /// rest of the non-2xx range is `unavailable`.
    pub fn json<T: DeserializeOwned>(&self, provider: ProviderId) -> Result<T, SourceError> {
        let status = self.status;
        match status {
            200..=299 => serde_json::from_str(&self.body).map_err(|error| {
                SourceError::parse(format!("{provider} sent a body that is not JSON: {error}"))
            }),
            429 => Err(SourceError::rate_limited(format!(
                "{provider} is throttling requests (status 429)"
            ))),
            400..=499 => Err(SourceError::invalid_request(format!(
                "{provider} rejected the request with status {status}"
            ))),
            _ => Err(SourceError::unavailable(format!(
                "{provider} upstream returned status {status}"
            ))),
        }
    }
}

/// Failure below HTTP: DNS, connect, TLS, timeout or a truncated body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    message: String,
    malformed_request: bool,
}

impl HttpError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            malformed_request: false,
        }
    }

    /// The request could not be built; retrying will not help.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            malformed_request: true,
        }
    }

    pub fn into_source_error(self, provider: ProviderId) -> SourceError {
        if self.malformed_request {
            SourceError::internal(format!("{provider} request could not be built: {}", self.message))
        } else {
            SourceError::unavailable(format!("{provider} transport error: {}", self.message))
        }
    }
}

impl Display for HttpError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HttpError {}

pub type HttpFuture<'a> = Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>>;

/// Seam between adapters and the network.
pub trait HttpClient: Send + Sync {
    fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a>;
}

/// reqwest-backed client with a shared cookie jar.
///
/// The jar lets Yahoo's consent cookie from one request authorize the crumb
/// fetched by the next.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("marketpulse/", env!("CARGO_PKG_VERSION")))
            .cookie_store(true)
            .build()
            .unwrap_or_else(|error| {
                tracing::warn!(%error, "falling back to a default http client");
                reqwest::Client::new()
            });
        Self { client }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

fn classify(error: reqwest::Error) -> HttpError {
    if error.is_builder() {
        HttpError::malformed(error.to_string())
    } else if error.is_timeout() {
        HttpError::new(format!("timed out: {error}"))
    } else if error.is_connect() {
        HttpError::new(format!("could not connect: {error}"))
    } else {
        HttpError::new(error.to_string())
    }
}

impl HttpClient for ReqwestHttpClient {
    fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a> {
        Box::pin(async move {
            let response = request
                .headers
                .iter()
                .fold(
                    self.client
                        .get(&request.url)
                        .query(&request.query)
                        .timeout(request.timeout),
                    |builder, (name, value)| builder.header(name, value),
                )
                .send()
                .await
                .map_err(classify)?;

            let status = response.status().as_u16();
            let body = response.text().await.map_err(classify)?;
            tracing::trace!(url = %request.url, status, bytes = body.len(), "http response");

            Ok(HttpResponse { status, body })
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::provider::SourceErrorKind;

    #[test]
    fn credentials_become_lowercase_headers() {
        let vendor = HttpRequest::get("https://quotes.test/quote").with_credential(
            &Credential::Header {
                name: "X-Finnhub-Token",
                key: String::from("demo"),
            },
        );
        assert_eq!(
            vendor.headers.get("x-finnhub-token").map(String::as_str),
            Some("demo")
        );

        let scheme = HttpRequest::get("https://quotes.test/price").with_credential(
            &Credential::Authorization {
                scheme: "Apikey",
                key: String::from("k-1"),
            },
        );
        assert_eq!(
            scheme.headers.get("authorization").map(String::as_str),
            Some("Apikey k-1")
        );
    }

    #[test]
    fn query_pairs_keep_insertion_order() {
        let request = HttpRequest::get("https://quotes.test/v7/quote")
            .with_query("symbols", "AAPL,BRK.B")
            .with_query("crumb", "abc");

        assert_eq!(request.query_value("symbols"), Some("AAPL,BRK.B"));
        assert_eq!(request.query[1].0, "crumb");
        assert_eq!(request.query_value("missing"), None);
    }

    #[test]
    fn status_classes_map_to_error_kinds() {
        let kind = |status: u16, body: &str| {
            HttpResponse::with_status(status, body)
                .json::<Value>(ProviderId::COINGECKO)
                .map_err(|error| error.kind())
        };

        assert_eq!(kind(429, ""), Err(SourceErrorKind::RateLimited));
        assert_eq!(kind(401, ""), Err(SourceErrorKind::InvalidRequest));
        assert_eq!(kind(503, ""), Err(SourceErrorKind::Unavailable));
        assert_eq!(kind(200, "<html>"), Err(SourceErrorKind::Parse));
        assert_eq!(kind(200, "[1]"), Ok(serde_json::json!([1])));
    }

    #[test]
    fn transport_errors_are_retryable_unless_malformed() {
        let reset = HttpError::new("reset").into_source_error(ProviderId::YAHOO);
        assert_eq!(reset.kind(), SourceErrorKind::Unavailable);
        assert!(reset.retryable());

        let malformed = HttpError::malformed("bad url").into_source_error(ProviderId::YAHOO);
        assert_eq!(malformed.kind(), SourceErrorKind::Internal);
    }
}
