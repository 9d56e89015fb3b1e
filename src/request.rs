//! Incoming HTTP request type.

use std::net::SocketAddr;

use bytes::Bytes;
use cookie::Cookie;
use http::{Extensions, HeaderMap, Method, Uri};

/// An incoming HTTP request, owned by the chain for one request's lifetime.
///
/// The transport builds it once; gases read it and attach request-scoped
/// values through [`extensions_mut`](Request::extensions_mut) before
/// handing it to the next handler.
#[derive(Debug)]
pub struct Request {
    pub(crate) method: Method,
    pub(crate) uri: Uri,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
    pub(crate) remote_addr: Option<SocketAddr>,
    pub(crate) tls: bool,
    pub(crate) extensions: Extensions,
}

impl Request {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            method,
            uri,
            headers,
            body,
            remote_addr: None,
            tls: false,
            extensions: Extensions::new(),
        }
    }

    /// Records the peer address of the underlying connection.
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Marks the request as received over a TLS connection.
    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn path(&self) -> &str { self.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.remote_addr }
    pub fn extensions(&self) -> &Extensions { &self.extensions }
    pub fn extensions_mut(&mut self) -> &mut Extensions { &mut self.extensions }

    /// Case-insensitive header lookup. Non-UTF-8 values are treated as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Value of the named cookie across all `Cookie` headers.
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.headers
            .get_all(http::header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(Cookie::split_parse)
            .filter_map(Result::ok)
            .find(|c| c.name() == name)
            .map(|c| c.value().to_owned())
    }

    /// First value of the named query-string parameter.
    pub fn query(&self, name: &str) -> Option<String> {
        let query = self.uri.query()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    /// First value of the named field of an
    /// `application/x-www-form-urlencoded` body.
    pub fn form_value(&self, name: &str) -> Option<String> {
        let content_type = self.header("content-type")?;
        if !content_type
            .split(';')
            .next()
            .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/x-www-form-urlencoded"))
        {
            return None;
        }
        url::form_urlencoded::parse(&self.body)
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    /// Client IP: `X-Real-IP`, then the first `X-Forwarded-For` hop, then
    /// the socket address. Proxy headers are trusted as-is.
    pub fn real_ip(&self) -> Option<String> {
        if let Some(ip) = self.header("x-real-ip").map(str::trim).filter(|s| !s.is_empty()) {
            return Some(ip.to_owned());
        }
        if let Some(first) = self
            .header("x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            return Some(first.to_owned());
        }
        self.remote_addr.map(|addr| addr.ip().to_string())
    }

    /// Host the client addressed, from the URI authority or `Host` header.
    pub fn host(&self) -> Option<&str> {
        self.uri.host().or_else(|| self.header("host"))
    }

    /// True when the connection is TLS or a proxy forwarded it as `https`.
    pub fn is_tls(&self) -> bool {
        self.tls
            || self
                .header("x-forwarded-proto")
                .is_some_and(|proto| proto.eq_ignore_ascii_case("https"))
    }
}

impl From<http::Request<Bytes>> for Request {
    fn from(req: http::Request<Bytes>) -> Self {
        let (parts, body) = req.into_parts();
        Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
            remote_addr: None,
            tls: false,
            extensions: parts.extensions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(builder: http::request::Builder, body: &'static str) -> Request {
        builder.body(Bytes::from_static(body.as_bytes())).unwrap().into()
    }

    #[test]
    fn real_ip_prefers_proxy_headers_in_order() {
        let addr: SocketAddr = "10.0.0.9:4000".parse().unwrap();

        let req = request(
            http::Request::builder()
                .header("x-real-ip", "1.1.1.1")
                .header("x-forwarded-for", "2.2.2.2, 3.3.3.3"),
            "",
        )
        .with_remote_addr(addr);
        assert_eq!(req.real_ip().as_deref(), Some("1.1.1.1"));

        let req = request(http::Request::builder().header("x-forwarded-for", "2.2.2.2, 3.3.3.3"), "")
            .with_remote_addr(addr);
        assert_eq!(req.real_ip().as_deref(), Some("2.2.2.2"));

        let req = request(http::Request::builder(), "").with_remote_addr(addr);
        assert_eq!(req.real_ip().as_deref(), Some("10.0.0.9"));
    }

    #[test]
    fn cookie_lookup_spans_headers() {
        let req = request(
            http::Request::builder()
                .header("cookie", "a=1; b=2")
                .header("cookie", "_csrf=tok"),
            "",
        );
        assert_eq!(req.cookie("b").as_deref(), Some("2"));
        assert_eq!(req.cookie("_csrf").as_deref(), Some("tok"));
        assert_eq!(req.cookie("missing"), None);
    }

    #[test]
    fn query_and_form_values() {
        let req = request(
            http::Request::builder()
                .uri("/submit?csrf=from%20query")
                .header("content-type", "application/x-www-form-urlencoded; charset=utf-8"),
            "name=alice&csrf=from+form",
        );
        assert_eq!(req.query("csrf").as_deref(), Some("from query"));
        assert_eq!(req.form_value("csrf").as_deref(), Some("from form"));

        let json = request(http::Request::builder().header("content-type", "application/json"), "csrf=x");
        assert_eq!(json.form_value("csrf"), None);
    }

    #[test]
    fn tls_from_flag_or_forwarded_proto() {
        assert!(request(http::Request::builder(), "").with_tls(true).is_tls());
        assert!(request(http::Request::builder().header("x-forwarded-proto", "HTTPS"), "").is_tls());
        assert!(!request(http::Request::builder(), "").is_tls());
    }
}
