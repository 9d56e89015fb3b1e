//! Transport adapter and centralized error handling.
//!
//! The connection loop (listener, TLS, shutdown) belongs to whoever embeds
//! this crate. This module is the seam it calls into: it turns a hyper
//! request into a [`Request`], runs the chain, and renders any [`Error`]
//! through one [`ErrorHandler`] so no gas builds error responses itself.
//!
//! ```rust,no_run
//! use std::net::SocketAddr;
//!
//! use gases::{Chain, Error, Request, Response};
//! use gases::middleware::Recover;
//!
//! async fn hello(_req: Request) -> Result<Response, Error> {
//!     Ok(Response::text("hello"))
//! }
//!
//! let app = Chain::new().gas(Recover::default()).handler(hello);
//! let peer: SocketAddr = "127.0.0.1:50000".parse().unwrap();
//! // Hand this to hyper's `serve_connection` for the accepted stream.
//! let svc = gases::service::service(app, peer);
//! # let _ = svc;
//! ```

use std::convert::Infallible;
use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::service::Service;

use crate::error::{Error, HttpError};
use crate::handler::{BoxFuture, Endpoint, Outcome};
use crate::request::Request;
use crate::response::Response;

/// Renders an [`Error`] that reached the top of the chain.
pub type ErrorHandler = Arc<dyn Fn(Error) -> Response + Send + Sync + 'static>;

/// HTTP errors keep their status, headers and message; panics and I/O
/// failures become a bare 500 so no internals reach the client.
pub fn default_error_handler(err: Error) -> Response {
    let status = err.status();
    if status.is_server_error() {
        tracing::error!(status = status.as_u16(), error = %err, "request failed");
    } else {
        tracing::debug!(status = status.as_u16(), error = %err, "request rejected");
    }

    match err {
        Error::Http(e) => {
            let mut res = Response::builder().status(e.status()).text(e.message().to_owned());
            for (name, value) in e.headers() {
                res.headers_mut().append(name.clone(), value.clone());
            }
            res
        }
        Error::Panic { .. } | Error::Io(_) => Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .text("Internal Server Error"),
    }
}

// ── Dispatcher ────────────────────────────────────────────────────────────────

/// An endpoint plus the transport-level settings used to run it.
#[derive(Clone)]
pub struct Dispatcher {
    endpoint: Endpoint,
    on_error: ErrorHandler,
    tls: bool,
}

impl Dispatcher {
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint, on_error: Arc::new(default_error_handler), tls: false }
    }

    /// Replaces the centralized error handler.
    pub fn on_error(mut self, handler: impl Fn(Error) -> Response + Send + Sync + 'static) -> Self {
        self.on_error = Arc::new(handler);
        self
    }

    /// Marks every request as received over TLS. Set this when the
    /// connection loop terminates TLS itself.
    pub fn tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    /// Turns an outcome into the response written to the client.
    pub fn render(&self, outcome: Outcome) -> Response {
        outcome.unwrap_or_else(|e| (self.on_error)(e))
    }

    /// Runs one request through the chain.
    pub async fn dispatch<B>(&self, req: http::Request<B>, remote_addr: SocketAddr) -> http::Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Display,
    {
        let (parts, body) = req.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                let err = HttpError::new(StatusCode::BAD_REQUEST).with_message(format!("failed to read request body: {e}"));
                return self.render(Err(err.into())).into_http();
            }
        };

        let req = Request::from(http::Request::from_parts(parts, body))
            .with_remote_addr(remote_addr)
            .with_tls(self.tls);
        self.render(self.endpoint.call(req).await).into_http()
    }

    /// A hyper [`Service`] for one connection from `remote_addr`.
    pub fn service(self, remote_addr: SocketAddr) -> ConnectionService {
        ConnectionService { dispatcher: self, remote_addr }
    }
}

/// [`Dispatcher::dispatch`] with the default error handler.
pub async fn dispatch<B>(endpoint: &Endpoint, req: http::Request<B>, remote_addr: SocketAddr) -> http::Response<Full<Bytes>>
where
    B: Body,
    B::Error: Display,
{
    Dispatcher::new(endpoint.clone()).dispatch(req, remote_addr).await
}

/// [`Dispatcher::service`] with the default error handler.
pub fn service(endpoint: Endpoint, remote_addr: SocketAddr) -> ConnectionService {
    Dispatcher::new(endpoint).service(remote_addr)
}

// ── Connection service ────────────────────────────────────────────────────────

/// hyper [`Service`] bound to one peer. Cloning is cheap.
#[derive(Clone)]
pub struct ConnectionService {
    dispatcher: Dispatcher,
    remote_addr: SocketAddr,
}

impl<B> Service<http::Request<B>> for ConnectionService
where
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Display + Send,
{
    type Response = http::Response<Full<Bytes>>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Infallible>>;

    fn call(&self, req: http::Request<B>) -> Self::Future {
        let this = self.clone();
        Box::pin(async move { Ok(this.dispatcher.dispatch(req, this.remote_addr).await) })
    }
}
