//! Gzip response compression with pooled compressors.
//!
//! The deflate state is the expensive part, so raw-deflate compressors are
//! kept in a [`Pool`] and reset between requests. The gzip framing (header,
//! CRC-32, length trailer) is written around the deflate stream here.

use std::io;

use flate2::{Compress, Compression, Crc, FlushCompress, Status};
use http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, HeaderValue};
use http::StatusCode;

use super::{Gas, Skipper, add_vary};
use crate::error::Error;
use crate::handler::{BoxFuture, Endpoint, Outcome};
use crate::pool::Pool;
use crate::request::Request;

/// Gzip member header: magic, deflate, no flags, no mtime, unknown OS.
const GZIP_HEADER: [u8; 10] = [0x1f, 0x8b, 0x08, 0, 0, 0, 0, 0, 0, 0xff];

const MAX_IDLE_COMPRESSORS: usize = 64;

pub struct GzipConfig {
    pub skipper: Option<Skipper>,
    pub level: Compression,
    /// Bodies shorter than this are sent uncompressed.
    pub min_length: usize,
}

impl Default for GzipConfig {
    fn default() -> Self {
        Self { skipper: None, level: Compression::default(), min_length: 0 }
    }
}

/// Compresses response bodies for clients that accept gzip.
///
/// Empty bodies are never compressed and carry no `Content-Encoding`.
/// Responses that are already encoded pass through untouched.
pub struct Gzip {
    config: GzipConfig,
    compressors: Pool<Compress>,
}

impl Gzip {
    pub fn with_config(config: GzipConfig) -> Self {
        let level = config.level;
        let compressors = Pool::new(
            MAX_IDLE_COMPRESSORS,
            move || Compress::new(level, false),
            Compress::reset,
        );
        Self { config, compressors }
    }

    /// Compresses `body` into a complete gzip member.
    fn encode(&self, body: &[u8]) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(GZIP_HEADER.len() + body.len() / 2 + 64);
        out.extend_from_slice(&GZIP_HEADER);

        let mut compressor = self.compressors.checkout();
        loop {
            if out.len() == out.capacity() {
                out.reserve(out.capacity().max(1024));
            }
            let consumed = compressor.total_in() as usize;
            let status = compressor
                .compress_vec(&body[consumed..], &mut out, FlushCompress::Finish)
                .map_err(io::Error::other)?;
            match status {
                Status::StreamEnd => break,
                Status::Ok | Status::BufError => out.reserve(out.capacity().max(1024)),
            }
        }
        drop(compressor);

        let mut crc = Crc::new();
        crc.update(body);
        out.extend_from_slice(&crc.sum().to_le_bytes());
        out.extend_from_slice(&crc.amount().to_le_bytes());
        Ok(out)
    }
}

impl Default for Gzip {
    fn default() -> Self {
        Self::with_config(GzipConfig::default())
    }
}

impl Gas for Gzip {
    fn handle<'a>(&'a self, req: Request, next: &'a Endpoint) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            if !accepts_gzip(req.header(ACCEPT_ENCODING.as_str())) {
                return next.call(req).await;
            }

            let mut res = match next.call(req).await {
                Ok(res) => res,
                Err(mut e) => {
                    if let Some(headers) = e.headers_mut() {
                        add_vary(headers, "Accept-Encoding");
                    }
                    return Err(e);
                }
            };
            add_vary(res.headers_mut(), "Accept-Encoding");

            let skip = res.body().is_empty()
                || res.body().len() < self.config.min_length
                || res.headers().contains_key(CONTENT_ENCODING)
                || res.status_code() == StatusCode::NO_CONTENT
                || res.status_code() == StatusCode::NOT_MODIFIED;
            if skip {
                return Ok(res);
            }

            let compressed = self.encode(res.body()).map_err(Error::from)?;
            res.replace_body(compressed);
            res.headers_mut().remove(CONTENT_LENGTH);
            res.headers_mut().insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            Ok(res)
        })
    }

    fn skipper(&self) -> Option<&Skipper> {
        self.config.skipper.as_ref()
    }
}

/// True when `Accept-Encoding` lists `gzip` (or `*`) with a non-zero q-value.
fn accepts_gzip(header: Option<&str>) -> bool {
    let Some(header) = header else { return false };
    header.split(',').any(|entry| {
        let mut parts = entry.split(';');
        let coding = parts.next().unwrap_or("").trim();
        if !(coding.eq_ignore_ascii_case("gzip") || coding == "*") {
            return false;
        }
        !parts.any(|p| {
            p.trim()
                .strip_prefix("q=")
                .and_then(|q| q.trim().parse::<f32>().ok())
                .is_some_and(|q| q == 0.0)
        })
    })
}
