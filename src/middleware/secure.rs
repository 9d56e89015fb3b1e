//! Security response headers.

use http::HeaderMap;
use http::header::{
    CONTENT_SECURITY_POLICY, REFERRER_POLICY, STRICT_TRANSPORT_SECURITY, X_CONTENT_TYPE_OPTIONS,
    X_FRAME_OPTIONS, X_XSS_PROTECTION,
};

use super::{Gas, Skipper, outcome_headers, set_header};
use crate::handler::{BoxFuture, Endpoint, Outcome};
use crate::request::Request;

/// Header values; an empty string leaves the header out.
pub struct SecureConfig {
    pub skipper: Option<Skipper>,
    pub xss_protection: String,
    pub content_type_nosniff: String,
    pub x_frame_options: String,
    /// `Strict-Transport-Security` max-age in seconds; 0 disables HSTS.
    pub hsts_max_age: u64,
    pub hsts_exclude_subdomains: bool,
    pub hsts_preload: bool,
    pub content_security_policy: String,
    pub referrer_policy: String,
}

impl Default for SecureConfig {
    fn default() -> Self {
        Self {
            skipper: None,
            xss_protection: "1; mode=block".to_owned(),
            content_type_nosniff: "nosniff".to_owned(),
            x_frame_options: "SAMEORIGIN".to_owned(),
            hsts_max_age: 0,
            hsts_exclude_subdomains: false,
            hsts_preload: false,
            content_security_policy: String::new(),
            referrer_policy: String::new(),
        }
    }
}

/// Sets XSS, sniffing, framing, CSP and referrer headers on every outcome,
/// and HSTS on requests that arrived over TLS (directly or via a proxy).
pub struct Secure {
    config: SecureConfig,
    hsts: Option<String>,
}

impl Secure {
    pub fn with_config(config: SecureConfig) -> Self {
        let hsts = (config.hsts_max_age > 0).then(|| {
            let mut value = format!("max-age={}", config.hsts_max_age);
            if !config.hsts_exclude_subdomains {
                value.push_str("; includeSubdomains");
            }
            if config.hsts_preload {
                value.push_str("; preload");
            }
            value
        });
        Self { config, hsts }
    }

    fn apply(&self, headers: &mut HeaderMap, tls: bool) {
        let c = &self.config;
        for (name, value) in [
            (X_XSS_PROTECTION, &c.xss_protection),
            (X_CONTENT_TYPE_OPTIONS, &c.content_type_nosniff),
            (X_FRAME_OPTIONS, &c.x_frame_options),
            (CONTENT_SECURITY_POLICY, &c.content_security_policy),
            (REFERRER_POLICY, &c.referrer_policy),
        ] {
            if !value.is_empty() {
                set_header(headers, name, value);
            }
        }
        if let (true, Some(hsts)) = (tls, &self.hsts) {
            set_header(headers, STRICT_TRANSPORT_SECURITY, hsts);
        }
    }
}

impl Default for Secure {
    fn default() -> Self {
        Self::with_config(SecureConfig::default())
    }
}

impl Gas for Secure {
    fn handle<'a>(&'a self, req: Request, next: &'a Endpoint) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let tls = req.is_tls();
            let mut outcome = next.call(req).await;
            if let Some(headers) = outcome_headers(&mut outcome) {
                self.apply(headers, tls);
            }
            outcome
        })
    }

    fn skipper(&self) -> Option<&Skipper> {
        self.config.skipper.as_ref()
    }
}
