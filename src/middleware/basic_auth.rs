//! HTTP basic authentication.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use http::StatusCode;
use http::header::{AUTHORIZATION, HeaderValue, WWW_AUTHENTICATE};

use super::{Gas, Skipper};
use crate::error::{Error, HttpError};
use crate::handler::{BoxFuture, Endpoint, Outcome};
use crate::request::Request;

/// Checks a username/password pair.
pub type Validator = Arc<dyn Fn(&str, &str) -> bool + Send + Sync + 'static>;

/// Username of the authenticated caller, stored in the request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicAuthUser(pub String);

pub struct BasicAuthConfig {
    pub skipper: Option<Skipper>,
    pub validator: Validator,
    /// Realm sent in the `WWW-Authenticate` challenge.
    pub realm: String,
}

impl BasicAuthConfig {
    pub fn new(validator: impl Fn(&str, &str) -> bool + Send + Sync + 'static) -> Self {
        Self { skipper: None, validator: Arc::new(validator), realm: "Restricted".to_owned() }
    }
}

/// Requires `Authorization: Basic …` credentials accepted by the validator.
///
/// Missing, malformed or rejected credentials yield `401 Unauthorized` with
/// a `WWW-Authenticate: Basic realm="…"` challenge.
pub struct BasicAuth {
    config: BasicAuthConfig,
    challenge: HeaderValue,
}

impl BasicAuth {
    pub fn new(validator: impl Fn(&str, &str) -> bool + Send + Sync + 'static) -> Self {
        Self::with_config(BasicAuthConfig::new(validator))
    }

    pub fn with_config(config: BasicAuthConfig) -> Self {
        let challenge = HeaderValue::from_str(&format!("Basic realm=\"{}\"", config.realm))
            .unwrap_or_else(|_| {
                tracing::warn!(realm = %config.realm, "realm is not valid header text, using default");
                HeaderValue::from_static("Basic realm=\"Restricted\"")
            });
        Self { config, challenge }
    }

    fn unauthorized(&self) -> Error {
        HttpError::new(StatusCode::UNAUTHORIZED)
            .with_header(WWW_AUTHENTICATE, self.challenge.clone())
            .into()
    }
}

impl Gas for BasicAuth {
    fn handle<'a>(&'a self, mut req: Request, next: &'a Endpoint) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let Some((user, pass)) = req.header(AUTHORIZATION.as_str()).and_then(parse_basic) else {
                return Err(self.unauthorized());
            };
            if !(self.config.validator)(&user, &pass) {
                return Err(self.unauthorized());
            }
            req.extensions_mut().insert(BasicAuthUser(user));
            next.call(req).await
        })
    }

    fn skipper(&self) -> Option<&Skipper> {
        self.config.skipper.as_ref()
    }
}

/// Splits `Basic <base64(user:pass)>` into its credentials.
fn parse_basic(header: &str) -> Option<(String, String)> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_owned(), pass.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::testing::{get, request};
    use crate::middleware::wrap;
    use crate::response::Response;
    use crate::handler::Handler;

    fn alice() -> BasicAuth {
        BasicAuth::new(|user, pass| user == "alice" && pass == "secret")
    }

    fn whoami() -> Endpoint {
        (|req: Request| async move {
            let user = req.extensions().get::<BasicAuthUser>().cloned();
            Ok::<_, Error>(Response::text(user.map(|u| u.0).unwrap_or_default()))
        })
        .into_endpoint()
    }

    fn with_auth(value: &str) -> Request {
        request(http::Request::get("/").header("authorization", value))
    }

    fn assert_challenge(outcome: Outcome) {
        let err = outcome.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        let Error::Http(http) = err else { panic!("expected http error") };
        assert_eq!(http.headers()[WWW_AUTHENTICATE], "Basic realm=\"Restricted\"");
    }

    #[tokio::test]
    async fn valid_credentials_continue_with_user() {
        let app = wrap(alice(), whoami());
        let res = app.call(with_auth("Basic YWxpY2U6c2VjcmV0")).await.unwrap();
        assert_eq!(&res.body()[..], b"alice");
    }

    #[tokio::test]
    async fn scheme_is_case_insensitive() {
        let app = wrap(alice(), whoami());
        assert!(app.call(with_auth("basic YWxpY2U6c2VjcmV0")).await.is_ok());
    }

    #[tokio::test]
    async fn wrong_password_is_challenged() {
        let app = wrap(alice(), whoami());
        // alice:wrong
        assert_challenge(app.call(with_auth("Basic YWxpY2U6d3Jvbmc=")).await);
    }

    #[tokio::test]
    async fn missing_or_malformed_header_is_challenged() {
        let app = wrap(alice(), whoami());
        assert_challenge(app.call(get("/")).await);
        assert_challenge(app.call(with_auth("Bearer YWxpY2U6c2VjcmV0")).await);
        assert_challenge(app.call(with_auth("Basic not-base64!")).await);
        // "alicesecret": no colon
        assert_challenge(app.call(with_auth("Basic YWxpY2VzZWNyZXQ=")).await);
    }

    #[test]
    fn password_may_contain_colons() {
        // alice:se:cret
        assert_eq!(
            parse_basic("Basic YWxpY2U6c2U6Y3JldA=="),
            Some(("alice".to_owned(), "se:cret".to_owned()))
        );
    }

    #[tokio::test]
    async fn custom_realm() {
        let config = BasicAuthConfig { realm: "Admin".into(), ..BasicAuthConfig::new(|_, _| false) };
        let app = wrap(BasicAuth::with_config(config), whoami());
        let Err(Error::Http(err)) = app.call(get("/")).await else { panic!("expected 401") };
        assert_eq!(err.headers()[WWW_AUTHENTICATE], "Basic realm=\"Admin\"");
    }
}
