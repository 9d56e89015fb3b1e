//! Access logging.
//!
//! One line per request, rendered from a `${tag}` template and written to a
//! sink (standard output by default). The template is parsed once when the
//! gas is built.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use http::header::{REFERER, USER_AGENT};
use parking_lot::Mutex;

use super::{Gas, Skipper};
use crate::handler::{BoxFuture, Endpoint, Outcome};
use crate::request::Request;

/// Shared output for log lines.
pub type Sink = Arc<Mutex<Box<dyn Write + Send>>>;

/// Wraps a writer for use as [`LoggerConfig::output`].
pub fn sink(writer: impl Write + Send + 'static) -> Sink {
    let writer: Box<dyn Write + Send> = Box::new(writer);
    Arc::new(Mutex::new(writer))
}

const DEFAULT_TEMPLATE: &str = concat!(
    r#"{"time":"${time_rfc3339}","remote_ip":"${remote_ip}","host":"${host}","#,
    r#""method":"${method}","uri":"${uri}","path":"${path}","referer":"${referer}","#,
    r#""user_agent":"${user_agent}","status":${status},"latency":${latency},"#,
    r#""latency_human":"${latency_human}","bytes_in":${bytes_in},"bytes_out":${bytes_out}}"#,
);

pub struct LoggerConfig {
    pub skipper: Option<Skipper>,
    /// Line template; see [`Logger`] for the tags.
    pub template: String,
    pub output: Sink,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            skipper: None,
            template: DEFAULT_TEMPLATE.to_owned(),
            output: sink(io::stdout()),
        }
    }
}

/// Writes one access-log line per request.
///
/// Tags: `time_rfc3339`, `time_unix`, `remote_ip`, `host`, `method`, `uri`,
/// `path`, `referer`, `user_agent`, `status`, `latency` (µs),
/// `latency_human`, `bytes_in`, `bytes_out`. Unknown tags render as `-`.
/// A failed write is reported through `tracing` and never reaches the client.
pub struct Logger {
    config: LoggerConfig,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    TimeRfc3339,
    TimeUnix,
    RemoteIp,
    Host,
    Method,
    Uri,
    Path,
    Referer,
    UserAgent,
    Status,
    Latency,
    LatencyHuman,
    BytesIn,
    BytesOut,
    Unknown,
}

impl Tag {
    fn parse(name: &str) -> Self {
        match name {
            "time_rfc3339"  => Self::TimeRfc3339,
            "time_unix"     => Self::TimeUnix,
            "remote_ip"     => Self::RemoteIp,
            "host"          => Self::Host,
            "method"        => Self::Method,
            "uri"           => Self::Uri,
            "path"          => Self::Path,
            "referer"       => Self::Referer,
            "user_agent"    => Self::UserAgent,
            "status"        => Self::Status,
            "latency"       => Self::Latency,
            "latency_human" => Self::LatencyHuman,
            "bytes_in"      => Self::BytesIn,
            "bytes_out"     => Self::BytesOut,
            _               => Self::Unknown,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Segment {
    Text(String),
    Tag(Tag),
}

/// Splits a template into literal text and `${tag}` placeholders. An
/// unterminated `${` is kept as text.
fn parse_template(template: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start + 2..].find('}') else { break };
        if start > 0 {
            segments.push(Segment::Text(rest[..start].to_owned()));
        }
        let name = &rest[start + 2..start + 2 + len];
        let tag = Tag::parse(name);
        if tag == Tag::Unknown {
            tracing::warn!(tag = name, "unknown logger template tag");
        }
        segments.push(Segment::Tag(tag));
        rest = &rest[start + 2 + len + 1..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Text(rest.to_owned()));
    }
    segments
}

/// Request-side values captured before the request moves down the chain.
struct Fields {
    remote_ip: String,
    host: String,
    method: String,
    uri: String,
    path: String,
    referer: String,
    user_agent: String,
    bytes_in: usize,
}

impl Fields {
    fn capture(req: &Request) -> Self {
        let header = |name: &str| req.header(name).unwrap_or_default().to_owned();
        Self {
            remote_ip: req.real_ip().unwrap_or_default(),
            host: req.host().unwrap_or_default().to_owned(),
            method: req.method().to_string(),
            uri: req.uri().to_string(),
            path: req.path().to_owned(),
            referer: header(REFERER.as_str()),
            user_agent: header(USER_AGENT.as_str()),
            bytes_in: req.body().len(),
        }
    }
}

impl Logger {
    pub fn with_config(config: LoggerConfig) -> Self {
        let segments = parse_template(&config.template);
        Self { config, segments }
    }

    fn render(&self, fields: &Fields, outcome: &Outcome, latency: Duration) -> String {
        use std::fmt::Write as _;

        let (status, bytes_out) = match outcome {
            Ok(res) => (res.status_code().as_u16(), res.body().len()),
            Err(e) => (e.status().as_u16(), 0),
        };
        let mut line = String::with_capacity(256);
        for segment in &self.segments {
            let _ = match segment {
                Segment::Text(text) => line.write_str(text),
                Segment::Tag(tag) => match tag {
                    Tag::TimeRfc3339 => line.write_str(&Utc::now().to_rfc3339()),
                    Tag::TimeUnix => write!(line, "{}", Utc::now().timestamp()),
                    Tag::RemoteIp => line.write_str(&fields.remote_ip),
                    Tag::Host => line.write_str(&fields.host),
                    Tag::Method => line.write_str(&fields.method),
                    Tag::Uri => line.write_str(&fields.uri),
                    Tag::Path => line.write_str(&fields.path),
                    Tag::Referer => line.write_str(&fields.referer),
                    Tag::UserAgent => line.write_str(&fields.user_agent),
                    Tag::Status => write!(line, "{status}"),
                    Tag::Latency => write!(line, "{}", latency.as_micros()),
                    Tag::LatencyHuman => write!(line, "{latency:?}"),
                    Tag::BytesIn => write!(line, "{}", fields.bytes_in),
                    Tag::BytesOut => write!(line, "{bytes_out}"),
                    Tag::Unknown => line.write_str("-"),
                },
            };
        }
        line.push('\n');
        line
    }
}

fn write_line(output: &Sink, line: &str) -> io::Result<()> {
    let mut out = output.lock();
    out.write_all(line.as_bytes())?;
    out.flush()
}

impl Default for Logger {
    fn default() -> Self {
        Self::with_config(LoggerConfig::default())
    }
}

impl Gas for Logger {
    fn handle<'a>(&'a self, req: Request, next: &'a Endpoint) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let fields = Fields::capture(&req);
            let start = Instant::now();
            let outcome = next.call(req).await;
            let latency = start.elapsed();

            let line = self.render(&fields, &outcome, latency);
            if let Err(e) = write_line(&self.config.output, &line) {
                tracing::warn!(error = %e, "failed to write access log line");
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
    use http::StatusCode;

    use super::*;
    use crate::error::Error;
    use crate::handler::Handler;
    use crate::middleware::testing::{ok_text, request};
    use crate::middleware::wrap;
    use crate::response::Response;

    /// Sink that appends to a shared buffer.
    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().clone()).unwrap()
        }
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn logger(template: &str, capture: &Capture) -> Logger {
        Logger::with_config(LoggerConfig {
            template: template.to_owned(),
            output: sink(capture.clone()),
            ..Default::default()
        })
    }

    #[test]
    fn template_parsing() {
        assert_eq!(
            parse_template("a ${method} b ${nope}${status"),
            vec![
                Segment::Text("a ".into()),
                Segment::Tag(Tag::Method),
                Segment::Text(" b ".into()),
                Segment::Tag(Tag::Unknown),
                Segment::Text("${status".into()),
            ]
        );
    }

    #[tokio::test]
    async fn writes_one_line_per_request() {
        let capture = Capture::default();
        let app = wrap(
            logger("${remote_ip} ${method} ${path} ${status} ${bytes_in} ${bytes_out} ${user_agent}", &capture),
            ok_text("hello"),
        );
        let req = http::Request::post("/users?x=1")
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .header("user-agent", "curl/8")
            .body(bytes::Bytes::from_static(b"abc"))
            .unwrap();

        app.call(req.into()).await.unwrap();

        assert_eq!(capture.text(), "203.0.113.7 POST /users 200 3 5 curl/8\n");
    }

    #[tokio::test]
    async fn error_outcome_logs_rendered_status() {
        let capture = Capture::default();
        let failing = (|_req: Request| async { Err::<Response, _>(Error::from(StatusCode::FORBIDDEN)) })
            .into_endpoint();
        let app = wrap(logger("${status} ${bytes_out}", &capture), failing);

        let err = app.call(request(http::Request::get("/"))).await.unwrap_err();

        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(capture.text(), "403 0\n");
    }

    #[tokio::test]
    async fn default_template_has_every_field() {
        let capture = Capture::default();
        let app = wrap(logger(DEFAULT_TEMPLATE, &capture), ok_text("ok"));
        app.call(request(http::Request::get("/").header("host", "example.com"))).await.unwrap();

        let line = capture.text();
        assert!(line.starts_with(r#"{"time":""#));
        assert!(line.contains(r#""host":"example.com""#));
        assert!(line.contains(r#""status":200"#));
        assert!(line.ends_with("}\n"));
    }

    #[tokio::test]
    async fn write_failure_does_not_reach_client() {
        let app = wrap(
            Logger::with_config(LoggerConfig {
                output: sink(Broken),
                ..Default::default()
            }),
            ok_text("still fine"),
        );
        let res = app.call(request(http::Request::get("/"))).await.unwrap();
        assert_eq!(&res.body()[..], b"still fine");
    }
}
