//! Static file serving.
//!
//! Paths are percent-decoded and cleaned before they touch the filesystem,
//! so `..` never climbs above `root`. Anything that does not resolve to a
//! file (or to a directory with an index or a listing) falls through to the
//! next handler.

use std::fs::Metadata;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use http::header::{CONTENT_TYPE, IF_MODIFIED_SINCE, LAST_MODIFIED};
use http::{Method, StatusCode};
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};

use super::{Gas, Skipper, set_header};
use crate::error::Error;
use crate::handler::{BoxFuture, Endpoint, Outcome};
use crate::request::Request;
use crate::response::{ContentType, Response};

/// Characters escaped in listing hrefs.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

const HTTP_DATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

pub struct StaticConfig {
    pub skipper: Option<Skipper>,
    pub root: PathBuf,
    /// File served for directory requests.
    pub index: String,
    /// Serve `root/index` when the rest of the chain answers 404, for
    /// single-page apps with client-side routing.
    pub html5: bool,
    /// List directories that have no index file.
    pub browse: bool,
}

impl Default for StaticConfig {
    fn default() -> Self {
        Self {
            skipper: None,
            root: PathBuf::from("."),
            index: "index.html".to_owned(),
            html5: false,
            browse: false,
        }
    }
}

/// Serves files under a root directory for `GET` and `HEAD` requests.
#[derive(Default)]
pub struct Static {
    config: StaticConfig,
}

impl Static {
    pub fn with_config(config: StaticConfig) -> Self {
        Self { config }
    }

    /// Shorthand for the default config rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_config(StaticConfig { root: root.into(), ..Default::default() })
    }

    async fn fallback(&self, req: Request, next: &Endpoint, ims: Option<&str>) -> Outcome {
        let outcome = next.call(req).await;
        if !self.config.html5 || !is_not_found(&outcome) {
            return outcome;
        }
        let index = self.config.root.join(&self.config.index);
        match tokio::fs::metadata(&index).await {
            Ok(meta) if meta.is_file() => serve_file(&index, &meta, ims).await,
            _ => outcome,
        }
    }
}

impl Gas for Static {
    fn handle<'a>(&'a self, req: Request, next: &'a Endpoint) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            if req.method() != Method::GET && req.method() != Method::HEAD {
                return next.call(req).await;
            }
            let Some(relative) = clean_path(req.path()) else {
                return next.call(req).await;
            };
            let ims = req.header(IF_MODIFIED_SINCE.as_str()).map(str::to_owned);
            let ims = ims.as_deref();
            let path = self.config.root.join(&relative);

            let meta = match tokio::fs::metadata(&path).await {
                Ok(meta) => meta,
                Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
                    return self.fallback(req, next, ims).await;
                }
                Err(e) => return Err(e.into()),
            };

            if !meta.is_dir() {
                return serve_file(&path, &meta, ims).await;
            }

            let index = path.join(&self.config.index);
            if let Ok(index_meta) = tokio::fs::metadata(&index).await {
                if index_meta.is_file() {
                    return serve_file(&index, &index_meta, ims).await;
                }
            }
            if self.config.browse {
                return list_dir(&path, req.path()).await;
            }
            next.call(req).await
        })
    }

    fn skipper(&self) -> Option<&Skipper> {
        self.config.skipper.as_ref()
    }
}

fn is_not_found(outcome: &Outcome) -> bool {
    match outcome {
        Ok(res) => res.status_code() == StatusCode::NOT_FOUND,
        Err(e) => e.status() == StatusCode::NOT_FOUND,
    }
}

/// Decodes `path` and resolves `.` and `..` without leaving the root.
/// `None` when the decoded path is not UTF-8.
fn clean_path(path: &str) -> Option<PathBuf> {
    let decoded = percent_decode_str(path).decode_utf8().ok()?;
    let mut parts: Vec<&str> = Vec::new();
    for part in decoded.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            part => parts.push(part),
        }
    }
    let cleaned: PathBuf = parts.iter().collect();
    // A segment like `C:` or one holding a separator must not escape either.
    let contained = cleaned.components().all(|c| matches!(c, Component::Normal(_)));
    contained.then_some(cleaned)
}

async fn serve_file(path: &Path, meta: &Metadata, ims: Option<&str>) -> Outcome {
    let modified: Option<DateTime<Utc>> = meta.modified().ok().map(DateTime::from);
    let last_modified = modified.map(|m| m.format(HTTP_DATE).to_string());

    if let (Some(modified), Some(since)) = (modified, ims.and_then(|s| DateTime::parse_from_rfc2822(s).ok())) {
        if modified.timestamp() <= since.timestamp() {
            let mut res = Response::status(StatusCode::NOT_MODIFIED);
            if let Some(lm) = &last_modified {
                set_header(res.headers_mut(), LAST_MODIFIED, lm);
            }
            return Ok(res);
        }
    }

    let body = tokio::fs::read(path).await.map_err(Error::from)?;
    let mime = mime_guess::from_path(path).first_or_octet_stream();

    let mut res = Response::status(StatusCode::OK);
    res.replace_body(body);
    set_header(res.headers_mut(), CONTENT_TYPE, mime.as_ref());
    if let Some(lm) = &last_modified {
        set_header(res.headers_mut(), LAST_MODIFIED, lm);
    }
    Ok(res)
}

async fn list_dir(dir: &Path, request_path: &str) -> Outcome {
    let mut entries = Vec::new();
    let mut read_dir = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_dir = tokio::fs::metadata(entry.path()).await.is_ok_and(|m| m.is_dir());
        entries.push((name, is_dir));
    }
    entries.sort();

    let base = request_path.trim_end_matches('/');
    let title = htmlescape::encode_minimal(if request_path.is_empty() { "/" } else { request_path });
    let mut html = format!(
        "<!doctype html>\n<html>\n<head><meta charset=\"utf-8\"><title>Index of {title}</title></head>\n\
         <body>\n<h1>Index of {title}</h1>\n<ul>\n"
    );
    for (name, is_dir) in &entries {
        let slash = if *is_dir { "/" } else { "" };
        let href = format!("{base}/{}{slash}", utf8_percent_encode(name, SEGMENT));
        html.push_str(&format!(
            "<li><a href=\"{}\">{}{slash}</a></li>\n",
            htmlescape::encode_minimal(&href),
            htmlescape::encode_minimal(name),
        ));
    }
    html.push_str("</ul>\n</body>\n</html>\n");

    Ok(Response::builder().bytes(ContentType::Html, html))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use http::header::{LAST_MODIFIED, VARY};

    use super::*;
    use crate::error::HttpError;
    use crate::handler::Handler;
    use crate::middleware::testing::{get, ok_text, request};
    use crate::middleware::wrap;

    fn site() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();
        fs::write(dir.path().join("app.js"), "console.log(1)").unwrap();
        fs::create_dir(dir.path().join("docs")).unwrap();
        fs::write(dir.path().join("docs").join("a <b>.txt"), "a").unwrap();
        fs::create_dir(dir.path().join("docs").join("sub")).unwrap();
        dir
    }

    fn not_found() -> Endpoint {
        (|_req: Request| async { Err::<Response, _>(HttpError::new(StatusCode::NOT_FOUND)) }).into_endpoint()
    }

    #[tokio::test]
    async fn serves_files_with_type_and_last_modified() {
        let dir = site();
        let app = wrap(Static::new(dir.path()), ok_text("next"));

        let res = app.call(get("/app.js")).await.unwrap();
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(&res.body()[..], b"console.log(1)");
        assert!(res.headers()[CONTENT_TYPE].to_str().unwrap().contains("javascript"));
        assert!(res.headers()[LAST_MODIFIED].to_str().unwrap().ends_with(" GMT"));

        let res = app.call(get("/")).await.unwrap();
        assert_eq!(&res.body()[..], b"<h1>home</h1>");
        assert!(res.headers()[CONTENT_TYPE].to_str().unwrap().starts_with("text/html"));
    }

    #[tokio::test]
    async fn if_modified_since_yields_304() {
        let dir = site();
        let app = wrap(Static::new(dir.path()), ok_text("next"));
        let first = app.call(get("/index.html")).await.unwrap();
        let stamp = first.headers()[LAST_MODIFIED].to_str().unwrap().to_owned();

        let res = app
            .call(request(http::Request::get("/index.html").header("if-modified-since", stamp)))
            .await
            .unwrap();
        assert_eq!(res.status_code(), StatusCode::NOT_MODIFIED);
        assert!(res.body().is_empty());

        let stale = request(http::Request::get("/index.html").header("if-modified-since", "Thu, 01 Jan 1970 00:00:00 GMT"));
        assert_eq!(app.call(stale).await.unwrap().status_code(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_file_falls_through() {
        let dir = site();
        let app = wrap(Static::new(dir.path()), ok_text("next"));
        let res = app.call(get("/nope.css")).await.unwrap();
        assert_eq!(&res.body()[..], b"next");

        let post = request(http::Request::post("/index.html"));
        assert_eq!(&app.call(post).await.unwrap().body()[..], b"next");
    }

    #[tokio::test]
    async fn traversal_cannot_escape_root() {
        let outer = tempfile::tempdir().unwrap();
        fs::write(outer.path().join("secret.txt"), "secret").unwrap();
        let public = outer.path().join("public");
        fs::create_dir(&public).unwrap();

        let app = wrap(Static::new(&public), ok_text("next"));
        for path in ["/../secret.txt", "/%2e%2e/secret.txt", "/a/../../secret.txt"] {
            let res = app.call(get(path)).await.unwrap();
            assert_eq!(&res.body()[..], b"next", "{path}");
        }
    }

    #[tokio::test]
    async fn html5_fallback_serves_index_on_404() {
        let dir = site();
        let config = StaticConfig { root: dir.path().into(), html5: true, ..Default::default() };
        let app = wrap(Static::with_config(config), not_found());
        let res = app.call(get("/app/settings/profile")).await.unwrap();
        assert_eq!(&res.body()[..], b"<h1>home</h1>");

        let app = wrap(Static::new(dir.path()), not_found());
        let err = app.call(get("/app/settings/profile")).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn directory_listing() {
        let dir = site();
        let config = StaticConfig { root: dir.path().into(), browse: true, ..Default::default() };
        let app = wrap(Static::with_config(config), ok_text("next"));

        let res = app.call(get("/docs/")).await.unwrap();
        let html = std::str::from_utf8(res.body()).unwrap();
        assert!(res.headers()[CONTENT_TYPE].to_str().unwrap().starts_with("text/html"));
        assert!(html.contains(r#"<a href="/docs/a%20%3Cb%3E.txt">a &lt;b&gt;.txt</a>"#), "{html}");
        assert!(html.contains(r#"<a href="/docs/sub/">sub/</a>"#), "{html}");
        assert!(html.find("a &lt;b&gt;.txt").unwrap() < html.find("sub/").unwrap());
        assert!(res.headers().get(VARY).is_none());

        let app = wrap(Static::new(dir.path()), ok_text("next"));
        assert_eq!(&app.call(get("/docs/")).await.unwrap().body()[..], b"next");
    }

    #[test]
    fn path_cleaning() {
        assert_eq!(clean_path("/a/./b/../c"), Some(PathBuf::from("a/c")));
        assert_eq!(clean_path("/../../etc/passwd"), Some(PathBuf::from("etc/passwd")));
        assert_eq!(clean_path("/"), Some(PathBuf::new()));
        assert_eq!(clean_path("/%ff"), None);
    }
}
