//! Cross-origin resource sharing headers.

use http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS, ACCESS_CONTROL_MAX_AGE,
    ACCESS_CONTROL_REQUEST_HEADERS, HeaderMap, HeaderValue, ORIGIN,
};
use http::Method;

use super::{Gas, Skipper, add_vary, outcome_headers, set_header};
use crate::handler::{BoxFuture, Endpoint, Outcome};
use crate::request::Request;

pub struct CorsConfig {
    pub skipper: Option<Skipper>,
    /// Origins allowed to read responses. Empty mirrors the request origin.
    pub allow_origins: Vec<String>,
    pub allow_methods: Vec<Method>,
    /// Empty mirrors `Access-Control-Request-Headers`.
    pub allow_headers: Vec<String>,
    pub allow_credentials: bool,
    pub expose_headers: Vec<String>,
    /// Seconds a preflight result may be cached; 0 omits the header.
    pub max_age: u32,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            skipper: None,
            allow_origins: Vec::new(),
            allow_methods: vec![
                Method::GET,
                Method::HEAD,
                Method::PUT,
                Method::PATCH,
                Method::POST,
                Method::DELETE,
            ],
            allow_headers: Vec::new(),
            allow_credentials: false,
            expose_headers: Vec::new(),
            max_age: 0,
        }
    }
}

/// Emits `Access-Control-Allow-*` headers from static configuration.
///
/// There is no preflight short-circuit: every request, `OPTIONS` included,
/// continues down the chain and the headers are added to its outcome.
pub struct Cors {
    config: CorsConfig,
    allow_methods: String,
    allow_headers: String,
    expose_headers: String,
}

impl Cors {
    pub fn with_config(config: CorsConfig) -> Self {
        let allow_methods = config.allow_methods.iter().map(Method::as_str).collect::<Vec<_>>().join(",");
        let allow_headers = config.allow_headers.join(",");
        let expose_headers = config.expose_headers.join(",");
        Self { config, allow_methods, allow_headers, expose_headers }
    }

    /// Value of `Access-Control-Allow-Origin` for a request origin, if any.
    fn allowed_origin(&self, origin: Option<&str>) -> Option<String> {
        let credentials = self.config.allow_credentials;
        if self.config.allow_origins.is_empty() {
            return match origin {
                Some(origin) => Some(origin.to_owned()),
                None if !credentials => Some("*".to_owned()),
                None => None,
            };
        }
        let origin = origin?;
        if self.config.allow_origins.iter().any(|o| o == origin) {
            return Some(origin.to_owned());
        }
        if self.config.allow_origins.iter().any(|o| o == "*") {
            return Some(if credentials { origin.to_owned() } else { "*".to_owned() });
        }
        None
    }

    fn apply(&self, headers: &mut HeaderMap, origin: Option<&str>, requested: Option<&str>) {
        add_vary(headers, "Origin");

        if let Some(allowed) = self.allowed_origin(origin) {
            set_header(headers, ACCESS_CONTROL_ALLOW_ORIGIN, &allowed);
        }
        if !self.allow_methods.is_empty() {
            set_header(headers, ACCESS_CONTROL_ALLOW_METHODS, &self.allow_methods);
        }
        match (self.allow_headers.as_str(), requested) {
            ("", Some(requested)) => set_header(headers, ACCESS_CONTROL_ALLOW_HEADERS, requested),
            ("", None) => {}
            (configured, _) => set_header(headers, ACCESS_CONTROL_ALLOW_HEADERS, configured),
        }
        if self.config.allow_credentials {
            headers.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        }
        if !self.expose_headers.is_empty() {
            set_header(headers, ACCESS_CONTROL_EXPOSE_HEADERS, &self.expose_headers);
        }
        if self.config.max_age > 0 {
            headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from(self.config.max_age));
        }
    }
}

impl Default for Cors {
    fn default() -> Self {
        Self::with_config(CorsConfig::default())
    }
}

impl Gas for Cors {
    fn handle<'a>(&'a self, req: Request, next: &'a Endpoint) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let origin = req.header(ORIGIN.as_str()).map(str::to_owned);
            let requested = req.header(ACCESS_CONTROL_REQUEST_HEADERS.as_str()).map(str::to_owned);

            let mut outcome = next.call(req).await;
            if let Some(headers) = outcome_headers(&mut outcome) {
                self.apply(headers, origin.as_deref(), requested.as_deref());
            }
            outcome
        })
    }

    fn skipper(&self) -> Option<&Skipper> {
        self.config.skipper.as_ref()
    }
}
