//! Cross-site request forgery protection (double-submit cookie).
//!
//! Every response carries the token in a cookie. Requests with unsafe
//! methods must echo it back through a header, form field or query
//! parameter; the echoed value is compared to the cookie in constant time.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use cookie::Cookie;
use http::header::{HeaderValue, SET_COOKIE};
use http::{HeaderMap, Method, StatusCode};
use parking_lot::Mutex;
use rand::distr::Alphanumeric;
use rand::rngs::StdRng;
use rand::{CryptoRng, Rng, SeedableRng};
use subtle::ConstantTimeEq;

use super::{Gas, Skipper, add_vary, outcome_headers};
use crate::error::{Error, HttpError};
use crate::handler::{BoxFuture, Endpoint, Outcome};
use crate::request::Request;

/// A cryptographically secure RNG shared by every request a gas handles.
pub type SharedRng = Arc<Mutex<Box<dyn CryptoRng + Send>>>;

/// Wraps an RNG for use in [`CsrfConfig::rng`].
pub fn shared_rng(rng: impl CryptoRng + Send + 'static) -> SharedRng {
    let rng: Box<dyn CryptoRng + Send> = Box::new(rng);
    Arc::new(Mutex::new(rng))
}

/// The request's CSRF token, stored in the request extensions so handlers
/// can embed it in forms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfToken(pub String);

/// Where the client echoes the token back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenLookup {
    Header(String),
    Form(String),
    Query(String),
}

impl TokenLookup {
    fn extract(&self, req: &Request) -> Option<String> {
        match self {
            Self::Header(name) => req.header(name).map(str::to_owned),
            Self::Form(field) => req.form_value(field),
            Self::Query(param) => req.query(param),
        }
    }
}

/// Parses `"<source>:<name>"`, source being `header`, `form` or `query`.
impl FromStr for TokenLookup {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some(("header", name)) if !name.is_empty() => Ok(Self::Header(name.to_owned())),
            Some(("form", name)) if !name.is_empty() => Ok(Self::Form(name.to_owned())),
            Some(("query", name)) if !name.is_empty() => Ok(Self::Query(name.to_owned())),
            _ => Err(format!("invalid token lookup `{s}`")),
        }
    }
}

impl fmt::Display for TokenLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Header(name) => write!(f, "header:{name}"),
            Self::Form(name) => write!(f, "form:{name}"),
            Self::Query(name) => write!(f, "query:{name}"),
        }
    }
}

pub struct CsrfConfig {
    pub skipper: Option<Skipper>,
    pub token_length: usize,
    pub token_lookup: TokenLookup,
    pub rng: SharedRng,
    pub cookie_name: String,
    pub cookie_domain: Option<String>,
    pub cookie_path: String,
    /// Seconds.
    pub cookie_max_age: i64,
    pub cookie_secure: bool,
    pub cookie_http_only: bool,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            skipper: None,
            token_length: 32,
            token_lookup: TokenLookup::Header("X-CSRF-Token".to_owned()),
            rng: shared_rng(StdRng::from_os_rng()),
            cookie_name: "_csrf".to_owned(),
            cookie_domain: None,
            cookie_path: "/".to_owned(),
            cookie_max_age: 86_400,
            cookie_secure: false,
            cookie_http_only: false,
        }
    }
}

/// Double-submit-cookie CSRF guard.
///
/// Safe methods (`GET`, `HEAD`, `OPTIONS`, `TRACE`) are never rejected. For
/// the rest a missing client token is `400`, a mismatching one `403`. The
/// cookie is re-issued and `Vary: Cookie` set on every outcome, rejections
/// included.
#[derive(Default)]
pub struct Csrf {
    config: CsrfConfig,
}

impl Csrf {
    pub fn with_config(config: CsrfConfig) -> Self {
        Self { config }
    }

    fn generate_token(&self) -> String {
        let mut rng = self.config.rng.lock();
        (0..self.config.token_length)
            .map(|_| char::from(rng.sample::<u8, _>(Alphanumeric)))
            .collect()
    }

    fn cookie(&self, token: &str) -> Option<HeaderValue> {
        let c = &self.config;
        let mut builder = Cookie::build((c.cookie_name.as_str(), token))
            .path(c.cookie_path.as_str())
            .max_age(cookie::time::Duration::seconds(c.cookie_max_age))
            .secure(c.cookie_secure)
            .http_only(c.cookie_http_only);
        if let Some(domain) = &c.cookie_domain {
            builder = builder.domain(domain.as_str());
        }
        HeaderValue::from_str(&builder.build().to_string()).ok()
    }

    fn reissue(&self, headers: &mut HeaderMap, cookie: Option<&HeaderValue>) {
        if let Some(cookie) = cookie {
            headers.append(SET_COOKIE, cookie.clone());
        }
        add_vary(headers, "Cookie");
    }

    fn check(&self, req: &Request, token: &str) -> Result<(), Error> {
        if is_safe(req.method()) {
            return Ok(());
        }
        let Some(client) = self.config.token_lookup.extract(req) else {
            return Err(HttpError::new(StatusCode::BAD_REQUEST)
                .with_message("missing csrf token")
                .into());
        };
        if bool::from(client.as_bytes().ct_eq(token.as_bytes())) {
            Ok(())
        } else {
            Err(HttpError::new(StatusCode::FORBIDDEN)
                .with_message("invalid csrf token")
                .into())
        }
    }
}

fn is_safe(method: &Method) -> bool {
    [Method::GET, Method::HEAD, Method::OPTIONS, Method::TRACE].contains(method)
}

impl Gas for Csrf {
    fn handle<'a>(&'a self, mut req: Request, next: &'a Endpoint) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let token = req
                .cookie(&self.config.cookie_name)
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| self.generate_token());
            let cookie = self.cookie(&token);
            if cookie.is_none() {
                tracing::warn!(cookie = %self.config.cookie_name, "csrf cookie is not valid header text");
            }

            let mut outcome = match self.check(&req, &token) {
                Ok(()) => {
                    req.extensions_mut().insert(CsrfToken(token));
                    next.call(req).await
                }
                Err(e) => Err(e),
            };
            if let Some(headers) = outcome_headers(&mut outcome) {
                self.reissue(headers, cookie.as_ref());
            }
            outcome
        })
    }

    fn skipper(&self) -> Option<&Skipper> {
        self.config.skipper.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use http::header::VARY;

    use super::*;
    use crate::handler::Handler;
    use crate::middleware::testing::{get, request};
    use crate::middleware::wrap;
    use crate::response::Response;

    fn seeded() -> CsrfConfig {
        CsrfConfig { rng: shared_rng(StdRng::seed_from_u64(7)), ..Default::default() }
    }

    fn echo_token() -> Endpoint {
        (|req: Request| async move {
            let token = req.extensions().get::<CsrfToken>().cloned().map(|t| t.0).unwrap_or_default();
            Ok::<_, Error>(Response::text(token))
        })
        .into_endpoint()
    }

    fn post(cookie: &str, header: Option<&str>) -> Request {
        let mut builder = http::Request::post("/transfer").header("cookie", format!("_csrf={cookie}"));
        if let Some(token) = header {
            builder = builder.header("x-csrf-token", token);
        }
        request(builder)
    }

    #[tokio::test]
    async fn get_issues_fresh_token_cookie() {
        let app = wrap(Csrf::with_config(seeded()), echo_token());
        let res = app.call(get("/form")).await.unwrap();

        let token = std::str::from_utf8(res.body()).unwrap().to_owned();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));

        let set_cookie = res.headers()[SET_COOKIE].to_str().unwrap();
        assert!(set_cookie.starts_with(&format!("_csrf={token}")));
        assert!(set_cookie.contains("Path=/"));
        assert!(set_cookie.contains("Max-Age=86400"));
        assert_eq!(res.headers()[VARY], "Cookie");
    }

    #[tokio::test]
    async fn get_is_never_rejected() {
        let app = wrap(Csrf::with_config(seeded()), echo_token());
        let req = request(
            http::Request::get("/")
                .header("cookie", "_csrf=abc")
                .header("x-csrf-token", "not-abc"),
        );
        let res = app.call(req).await.unwrap();
        assert_eq!(&res.body()[..], b"abc");
    }

    #[tokio::test]
    async fn post_with_matching_token_passes() {
        let app = wrap(Csrf::with_config(seeded()), echo_token());
        let res = app.call(post("abc123", Some("abc123"))).await.unwrap();
        assert_eq!(&res.body()[..], b"abc123");
    }

    #[tokio::test]
    async fn post_with_mismatched_token_is_forbidden_and_reissued() {
        let app = wrap(Csrf::with_config(seeded()), echo_token());
        let Err(Error::Http(err)) = app.call(post("abc123", Some("abc124"))).await else {
            panic!("expected rejection");
        };
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert!(err.headers()[SET_COOKIE].to_str().unwrap().starts_with("_csrf=abc123"));
    }

    #[tokio::test]
    async fn post_without_token_is_bad_request() {
        let app = wrap(Csrf::with_config(seeded()), echo_token());
        let err = app.call(post("abc123", None)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn form_and_query_lookups() {
        let config = CsrfConfig { token_lookup: "form:csrf".parse().unwrap(), ..seeded() };
        let app = wrap(Csrf::with_config(config), echo_token());
        let req = request(
            http::Request::post("/")
                .header("cookie", "_csrf=tok")
                .header("content-type", "application/x-www-form-urlencoded"),
        );
        // Empty form body: no token.
        assert_eq!(app.call(req).await.unwrap_err().status(), StatusCode::BAD_REQUEST);

        let req: Request = http::Request::post("/")
            .header("cookie", "_csrf=tok")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(bytes::Bytes::from_static(b"csrf=tok"))
            .unwrap()
            .into();
        assert!(app.call(req).await.is_ok());

        let config = CsrfConfig { token_lookup: TokenLookup::Query("csrf".into()), ..seeded() };
        let app = wrap(Csrf::with_config(config), echo_token());
        let req = request(http::Request::delete("/item?csrf=tok").header("cookie", "_csrf=tok"));
        assert!(app.call(req).await.is_ok());
    }

    #[test]
    fn token_lookup_parsing() {
        assert_eq!(
            "header:X-CSRF-Token".parse::<TokenLookup>(),
            Ok(TokenLookup::Header("X-CSRF-Token".into()))
        );
        assert_eq!("query:t".parse::<TokenLookup>().unwrap().to_string(), "query:t");
        assert!("cookie:x".parse::<TokenLookup>().is_err());
        assert!("header:".parse::<TokenLookup>().is_err());
    }

    #[test]
    fn cookie_attributes() {
        let csrf = Csrf::with_config(CsrfConfig {
            cookie_domain: Some("example.com".into()),
            cookie_secure: true,
            cookie_http_only: true,
            ..seeded()
        });
        let value = csrf.cookie("tok").unwrap();
        let value = value.to_str().unwrap();
        assert!(value.contains("Domain=example.com"));
        assert!(value.contains("Secure"));
        assert!(value.contains("HttpOnly"));
    }
}
