//! # gases
//!
//! Composable HTTP middleware for minimal async services.
//!
//! ## The contract
//!
//! A handler is an async function from [`Request`] to
//! `Result<impl IntoResponse, impl Into<Error>>`. A gas wraps a handler and
//! returns another one, so cross-cutting concerns stack without the handler
//! knowing about them. The transport (listener, TLS, shutdown, routing) is
//! yours; [`service`] is the seam it calls.
//!
//! What ships:
//!
//! - **Logger**: one access-log line per request from a `${tag}` template
//! - **Recover**: panics become a 500, with the stack trace logged
//! - **Gzip**: compression with pooled compressors
//! - **CORS**, **CSRF**, **Basic Auth**, **Secure** headers
//! - **Static**: files, directory listings and an HTML5 fallback
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use gases::middleware::{BasicAuth, Logger, Recover, Secure};
//! use gases::{Chain, Error, Request, Response};
//!
//! async fn dashboard(req: Request) -> Result<Response, Error> {
//!     let agent = req.header("user-agent").unwrap_or("unknown");
//!     Ok(Response::text(format!("hello, {agent}")))
//! }
//!
//! let app = Chain::new()
//!     .gas(Logger::default())
//!     .gas(Recover::default())
//!     .gas(Secure::default())
//!     .gas(BasicAuth::new(|user, pass| user == "admin" && pass == "s3cret"))
//!     .handler(dashboard);
//!
//! // In the connection loop:
//! // hyper::server::conn::http1::Builder::new()
//! //     .serve_connection(io, gases::service::service(app.clone(), peer))
//! ```

mod error;
mod handler;
mod request;
mod response;

pub mod middleware;
pub mod pool;
pub mod service;

pub use error::{Error, HttpError};
pub use handler::{BoxFuture, Endpoint, Handler, Outcome};
pub use middleware::{Chain, Gas, Skipper, wrap};
pub use request::Request;
pub use response::{ContentType, IntoResponse, Response, ResponseBuilder};
