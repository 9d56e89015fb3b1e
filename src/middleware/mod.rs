//! Gases: the middleware layer.
//!
//! A gas wraps the rest of the chain and handles one cross-cutting concern
//! before and/or after delegating to it. Gases are stacked with [`Chain`]:
//!
//! ```rust,no_run
//! use gases::{Chain, Error, Request, Response};
//! use gases::middleware::{Gzip, Logger, Recover, Secure};
//!
//! async fn hello(_req: Request) -> Result<Response, Error> {
//!     Ok(Response::text("hello"))
//! }
//!
//! // Logger sees every request first and the final response last.
//! let app = Chain::new()
//!     .gas(Logger::default())
//!     .gas(Recover::default())
//!     .gas(Secure::default())
//!     .gas(Gzip::default())
//!     .handler(hello);
//! ```
//!
//! Every gas config carries a [`Skipper`]; when it returns `true` for a
//! request, the gas is bypassed and the request goes straight to the next
//! handler.

use std::sync::Arc;

use http::HeaderMap;
use http::header::{HeaderName, HeaderValue, VARY};

use crate::handler::{BoxFuture, Endpoint, ErasedHandler, Handler, Outcome};
use crate::request::Request;

mod basic_auth;
mod cors;
mod csrf;
mod gzip;
mod logger;
mod recover;
mod secure;
mod static_files;

pub use basic_auth::{BasicAuth, BasicAuthConfig, BasicAuthUser, Validator};
pub use cors::{Cors, CorsConfig};
pub use csrf::{Csrf, CsrfConfig, CsrfToken, SharedRng, TokenLookup, shared_rng};
pub use gzip::{Gzip, GzipConfig};
pub use logger::{Logger, LoggerConfig, Sink, sink};
pub use recover::{Recover, RecoverConfig};
pub use secure::{Secure, SecureConfig};
pub use static_files::{Static, StaticConfig};

// ── Gas trait ─────────────────────────────────────────────────────────────────

/// Predicate deciding whether a gas is bypassed for a request.
pub type Skipper = Arc<dyn Fn(&Request) -> bool + Send + Sync + 'static>;

/// A middleware unit in the handler chain.
///
/// `handle` receives ownership of the request and a reference to the rest
/// of the chain. Call `next.call(req)` to continue; return without calling
/// it to short-circuit.
pub trait Gas: Send + Sync + 'static {
    fn handle<'a>(&'a self, req: Request, next: &'a Endpoint) -> BoxFuture<'a, Outcome>;

    /// Bypass predicate, checked before [`handle`](Gas::handle).
    fn skipper(&self) -> Option<&Skipper> {
        None
    }
}

/// Wraps `next` with `gas`: the `(next: Handler) -> Handler` form.
pub fn wrap(gas: impl Gas, next: impl Handler) -> Endpoint {
    Endpoint::from_erased(Wrapped { gas: Arc::new(gas), next: next.into_endpoint() })
}

struct Wrapped {
    gas: Arc<dyn Gas>,
    next: Endpoint,
}

impl ErasedHandler for Wrapped {
    fn call(&self, req: Request) -> BoxFuture<'static, Outcome> {
        let gas = Arc::clone(&self.gas);
        let next = self.next.clone();
        Box::pin(async move {
            if gas.skipper().is_some_and(|skip| skip(&req)) {
                return next.call(req).await;
            }
            gas.handle(req, &next).await
        })
    }
}

// ── Chain ─────────────────────────────────────────────────────────────────────

/// Ordered list of gases around a terminal handler.
///
/// The first gas added is the outermost: it sees the request first and the
/// outcome last.
#[derive(Default)]
pub struct Chain {
    gases: Vec<Arc<dyn Gas>>,
}

impl Chain {
    pub fn new() -> Self {
        Self { gases: Vec::new() }
    }

    /// Appends a gas inside the ones already added. Returns `self` for chaining.
    pub fn gas(mut self, gas: impl Gas) -> Self {
        self.gases.push(Arc::new(gas));
        self
    }

    pub fn len(&self) -> usize { self.gases.len() }
    pub fn is_empty(&self) -> bool { self.gases.is_empty() }

    /// Closes the chain around `handler`.
    pub fn handler(self, handler: impl Handler) -> Endpoint {
        self.gases
            .into_iter()
            .rev()
            .fold(handler.into_endpoint(), |next, gas| Endpoint::from_erased(Wrapped { gas, next }))
    }
}

// ── Shared helpers ────────────────────────────────────────────────────────────

/// Headers of whatever the outcome will be rendered as: the response on
/// success, the HTTP error's extra headers on failure.
pub(crate) fn outcome_headers(outcome: &mut Outcome) -> Option<&mut HeaderMap> {
    match outcome {
        Ok(res) => Some(res.headers_mut()),
        Err(e) => e.headers_mut(),
    }
}

/// Appends `value` to `Vary` unless an existing `Vary` already names it.
pub(crate) fn add_vary(headers: &mut HeaderMap, value: &'static str) {
    let present = headers
        .get_all(VARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|v| v.trim().eq_ignore_ascii_case(value));
    if !present {
        headers.append(VARY, HeaderValue::from_static(value));
    }
}

/// Inserts `value` under `name`, skipping values that are not valid header text.
pub(crate) fn set_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(v) => {
            headers.insert(name, v);
        }
        Err(_) => tracing::warn!(header = %name, "dropping invalid header value"),
    }
}
