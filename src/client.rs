use std::{fmt, sync::Arc};

use reqwest::{
    header::{self, HeaderMap, HeaderName, HeaderValue},
    Url,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    ApiRequest, CallContext, ClientOptions, Clock, DispatchError, HttpRequest, HttpResponse,
    ReqwestTransport, Result, RetryLoop, Transport,
};

/// Header carrying the number of retries that preceded an attempt.
pub const RETRY_COUNT_HEADER: &str = "x-retry-count";

/// `user-agent` sent with every physical request.
pub const USER_AGENT: &str = concat!("DispatchHttp/Rust ", env!("CARGO_PKG_VERSION"));

/// HTTP API client that dispatches each call through the retry loop.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    default_headers: HeaderMap,
    options: ClientOptions,
    transport: Arc<dyn Transport>,
    retry: RetryLoop,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: Vec<(&str, &str)> = self
            .default_headers
            .iter()
            .map(|(name, value)| {
                let shown = if value.is_sensitive() {
                    "<redacted>"
                } else {
                    value.to_str().unwrap_or("<binary>")
                };
                (name.as_str(), shown)
            })
            .collect();
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("default_headers", &headers)
            .field("options", &self.options)
            .finish()
    }
}

impl ApiClient {
    /// Creates a client that sends over `reqwest`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_transport(base_url, ReqwestTransport::new())
    }

    /// Creates a client over a custom transport.
    pub fn with_transport(
        base_url: impl Into<String>,
        transport: impl Transport + 'static,
    ) -> Self {
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let options = ClientOptions::default();
        Self {
            base_url: base_url.into(),
            default_headers: HeaderMap::new(),
            retry: RetryLoop::new(transport.clone(), &options),
            transport,
            options,
        }
    }

    /// Creates a client from environment variables.
    ///
    /// Reads:
    /// - `DISPATCH_HTTP_BASE_URL` — API base URL
    /// - `DISPATCH_HTTP_MAX_RETRIES`, `DISPATCH_HTTP_TIMEOUT_MS` — optional,
    ///   see [`ClientOptions::from_env`]
    ///
    /// Returns an error if the base URL is missing or empty.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use dispatch_http::ApiClient;
    ///
    /// let client = ApiClient::from_env().expect("missing DISPATCH_HTTP_BASE_URL");
    /// ```
    pub fn from_env() -> std::result::Result<Self, String> {
        let base_url = std::env::var("DISPATCH_HTTP_BASE_URL")
            .map_err(|_| "missing DISPATCH_HTTP_BASE_URL environment variable".to_owned())?;
        if base_url.trim().is_empty() {
            return Err("DISPATCH_HTTP_BASE_URL is set but empty".to_owned());
        }
        let options = ClientOptions::from_env()?;
        Ok(Self::new(base_url.trim()).with_options(options))
    }

    /// Applies retry budget, backoff and timeout options.
    ///
    /// A clock installed with [`ApiClient::with_clock`] is kept.
    pub fn with_options(mut self, opts: ClientOptions) -> Self {
        let clock = self.retry.clock();
        self.retry = RetryLoop::new(self.transport.clone(), &opts).with_clock(clock);
        self.options = opts;
        self
    }

    /// Replaces the clock used for backoff waits and attempt timing.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.retry = self.retry.with_clock(clock);
        self
    }

    /// Adds a header sent with every request.
    ///
    /// `authorization` and `proxy-authorization` values are marked sensitive
    /// and redacted from `Debug` output.
    pub fn with_default_header(mut self, name: HeaderName, mut value: HeaderValue) -> Self {
        if name == header::AUTHORIZATION || name == header::PROXY_AUTHORIZATION {
            value.set_sensitive(true);
        }
        self.default_headers.insert(name, value);
        self
    }

    /// Options the client was configured with.
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Sends `request`, retrying per the client options.
    ///
    /// Returns the first 2xx response. Everything else ends as a
    /// [`DispatchError`]. A context that has already fired is reported before
    /// the request is validated.
    pub async fn send(&self, ctx: &CallContext, request: ApiRequest) -> Result<HttpResponse> {
        ctx.check()?;
        let url = self.resolve_url(&request.path)?;
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
        headers.extend(self.default_headers.clone());
        headers.extend(request.headers);

        self.retry
            .run(ctx, |attempt| {
                let mut headers = headers.clone();
                headers.insert(
                    HeaderName::from_static(RETRY_COUNT_HEADER),
                    HeaderValue::from(attempt.saturating_sub(1)),
                );
                Ok(HttpRequest {
                    method: request.method.clone(),
                    url: url.to_string(),
                    headers,
                    body: request.body.clone(),
                })
            })
            .await
    }

    /// Sends `request` and decodes the successful body as JSON.
    ///
    /// Decode failures are returned as [`DispatchError::Decode`] and are not
    /// retried.
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        ctx: &CallContext,
        request: ApiRequest,
    ) -> Result<T> {
        let request = if request.headers.contains_key(header::ACCEPT) {
            request
        } else {
            request.header(header::ACCEPT, HeaderValue::from_static("application/json"))
        };
        self.send(ctx, request).await?.json()
    }

    /// `GET path` and decode the JSON response.
    pub async fn get_json<T: DeserializeOwned>(&self, ctx: &CallContext, path: &str) -> Result<T> {
        self.send_json(ctx, ApiRequest::get(path)).await
    }

    /// `POST path` with `body` serialized as JSON, and decode the JSON response.
    pub async fn post_json<B, T>(&self, ctx: &CallContext, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(ctx, ApiRequest::post(path).json(body)?).await
    }

    fn resolve_url(&self, path: &str) -> Result<Url> {
        let raw = if path.starts_with("http://") || path.starts_with("https://") {
            path.to_owned()
        } else {
            format!(
                "{}/{}",
                self.base_url.trim_end_matches('/'),
                path.trim_start_matches('/')
            )
        };
        Url::parse(&raw)
            .map_err(|err| DispatchError::InvalidRequest(format!("invalid url '{raw}': {err}")))
    }
}
