//! Handler trait, type erasure and the [`Endpoint`] every chain ends up as.
//!
//! # How async handlers are stored
//!
//! A chain is built from handlers of *different* concrete types: user
//! `async fn`s at the bottom and gases stacked on top. We hide each
//! concrete type behind a trait object (`dyn ErasedHandler`) so a gas only
//! ever sees one type for "the rest of the chain".
//!
//! ```text
//! async fn hello(req: Request) -> Result<Response, Error> { … }
//!        ↓ Chain::new().gas(Logger::default()).handler(hello)
//! hello.into_endpoint()                      ← Handler blanket impl
//!        ↓
//! Endpoint(Arc::new(FnHandler(hello)))       ← heap-allocated wrapper
//!        ↓ wrapped by each gas, innermost first
//! endpoint.call(req)  at request time        ← one vtable dispatch per layer
//! ```
//!
//! The only runtime cost per layer is **one Arc clone** (atomic inc) +
//! **one virtual call**, negligible compared to network I/O.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::Error;
use crate::request::Request;
use crate::response::{IntoResponse, Response};

/// What every handler yields: a response, or an error for the centralized
/// error handler.
pub type Outcome = Result<Response, Error>;

/// A heap-allocated, type-erased future.
///
/// `Send` lets tokio move the future across worker threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` because [`Endpoint::from_erased`] needs it for gases
/// defined outside this crate; application code never implements it.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, req: Request) -> BoxFuture<'static, Outcome>;
}

// ── Endpoint ──────────────────────────────────────────────────────────────────

/// A type-erased, cheaply clonable handler: a plain handler or a whole chain.
///
/// Gases receive the rest of the chain as an `&Endpoint` and decide whether,
/// and with which request, to [`call`](Endpoint::call) it.
#[derive(Clone)]
pub struct Endpoint(Arc<dyn ErasedHandler + Send + Sync + 'static>);

impl Endpoint {
    #[doc(hidden)]
    pub fn from_erased(handler: impl ErasedHandler + Send + Sync + 'static) -> Self {
        Self(Arc::new(handler))
    }

    /// Runs the handler (and every gas below it) for `req`.
    pub fn call(&self, req: Request) -> BoxFuture<'static, Outcome> {
        self.0.call(req)
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Endpoint")
    }
}

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid terminal handler.
///
/// You never implement this yourself. It is automatically satisfied for any
/// `async fn` with the signature:
///
/// ```text
/// async fn name(req: Request) -> Result<impl IntoResponse, impl Into<Error>>
/// ```
///
/// and for [`Endpoint`], so finished chains nest inside other chains.
///
/// The trait is **sealed** (via the private `Sealed` supertrait): only the
/// impls below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    fn into_endpoint(self) -> Endpoint;
}

mod private {
    pub trait Sealed {}
}

// ── Blanket implementations ───────────────────────────────────────────────────

impl<F, Fut, R, E> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: IntoResponse + Send + 'static,
    E: Into<Error> + Send + 'static,
{
}

impl<F, Fut, R, E> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: IntoResponse + Send + 'static,
    E: Into<Error> + Send + 'static,
{
    fn into_endpoint(self) -> Endpoint {
        Endpoint::from_erased(FnHandler(self))
    }
}

impl private::Sealed for Endpoint {}

impl Handler for Endpoint {
    fn into_endpoint(self) -> Endpoint { self }
}

// ── Concrete wrapper ──────────────────────────────────────────────────────────

/// Newtype wrapper that holds a concrete handler `F` and implements
/// [`ErasedHandler`], bridging the typed world to the trait-object world.
struct FnHandler<F>(F);

impl<F, Fut, R, E> ErasedHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: IntoResponse + Send + 'static,
    E: Into<Error> + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture<'static, Outcome> {
        let fut = (self.0)(req);
        Box::pin(async move {
            match fut.await {
                Ok(r) => Ok(r.into_response()),
                Err(e) => Err(e.into()),
            }
        })
    }
}
