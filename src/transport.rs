use std::{future::Future, sync::Arc};

use async_trait::async_trait;

use crate::{CallContext, HttpRequest, HttpResponse, TransportError};

/// Sends one physical HTTP request.
///
/// Implementations must stop promptly once `ctx` fires instead of letting
/// the send linger; the retry loop relies on it to honor caller deadlines.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: HttpRequest,
        ctx: &CallContext,
    ) -> Result<HttpResponse, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(
        &self,
        request: HttpRequest,
        ctx: &CallContext,
    ) -> Result<HttpResponse, TransportError> {
        (**self).send(request, ctx).await
    }
}

/// [`Transport`] backed by `reqwest`. The whole body is read before returning.
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a preconfigured client (proxies, TLS, pooling).
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: HttpRequest,
        ctx: &CallContext,
    ) -> Result<HttpResponse, TransportError> {
        let mut builder = self
            .http
            .request(request.method, request.url.as_str())
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let exchange = async move {
            let response = builder.send().await?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>(HttpResponse {
                status,
                headers,
                body: body.to_vec(),
            })
        };

        tokio::select! {
            biased;
            _ = ctx.done() => Err(TransportError::canceled()),
            result = exchange => result.map_err(TransportError::from),
        }
    }
}

/// Adapts an async closure into a [`Transport`].
///
/// ```
/// use dispatch_http::{transport_fn, HttpResponse};
/// use reqwest::StatusCode;
///
/// let transport = transport_fn(|_request, _ctx| async { Ok(HttpResponse::new(StatusCode::OK)) });
/// # let _ = transport;
/// ```
pub struct FnTransport<F>(F);

pub fn transport_fn<F, Fut>(f: F) -> FnTransport<F>
where
    F: Fn(HttpRequest, CallContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<HttpResponse, TransportError>> + Send + 'static,
{
    FnTransport(f)
}

#[async_trait]
impl<F, Fut> Transport for FnTransport<F>
where
    F: Fn(HttpRequest, CallContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<HttpResponse, TransportError>> + Send + 'static,
{
    async fn send(
        &self,
        request: HttpRequest,
        ctx: &CallContext,
    ) -> Result<HttpResponse, TransportError> {
        (self.0)(request, ctx.clone()).await
    }
}
