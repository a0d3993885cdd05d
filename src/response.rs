//! Outbound responses.
//!
//! A [`Response`] is built by a handler, a middleware or an error path and is
//! owned by the dispatcher until [`Response::encode`] turns it into wire
//! bytes. Handlers that do not want to build one can return anything
//! convertible into a [`Reply`]; the pipeline terminal normalises it.

use serde_json::Value;
use smallvec::SmallVec;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use crate::static_files::content_type;
use crate::view::ViewRenderer;

/// Maximum number of headers stored inline before spilling to the heap.
pub const MAX_INLINE_HEADERS: usize = 16;

/// Header list, stack-allocated for the common case.
pub type HeaderVec = SmallVec<[(Arc<str>, String); MAX_INLINE_HEADERS]>;

/// Marker rendered for a handler that returned nothing.
pub const NULL_MARKER: &str = "NULL";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Empty,
    Text(String),
    Bytes(Vec<u8>),
    /// Read whole from disk by [`Response::encode`]
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    headers: HeaderVec,
    body: Body,
    exception: Option<Arc<anyhow::Error>>,
}

impl Default for Response {
    fn default() -> Self {
        Self::new(200)
    }
}

impl Response {
    /// Empty response with the given status.
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HeaderVec::new(),
            body: Body::Empty,
            exception: None,
        }
    }

    #[must_use]
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self::new(status)
            .with_header("Content-Type", "text/plain; charset=utf-8")
            .with_body(Body::Text(body.into()))
    }

    /// Compact JSON body.
    #[must_use]
    pub fn json(status: u16, body: &Value) -> Self {
        Self::new(status)
            .with_header("Content-Type", "application/json")
            .with_body(Body::Text(body.to_string()))
    }

    #[must_use]
    pub fn html(status: u16, body: impl Into<String>) -> Self {
        Self::new(status)
            .with_header("Content-Type", "text/html; charset=utf-8")
            .with_body(Body::Text(body.into()))
    }

    /// JSON `{"error": message}` body.
    #[must_use]
    pub fn error(status: u16, message: &str) -> Self {
        Self::json(status, &serde_json::json!({ "error": message }))
    }

    /// 302 to `location`.
    #[must_use]
    pub fn redirect(location: &str) -> Self {
        Self::new(302).with_header("Location", location)
    }

    #[must_use]
    pub fn not_found() -> Self {
        Self::text(404, "404 Not Found")
    }

    /// 500 carrying `err`.
    ///
    /// With `debug` the body is the full error chain; otherwise only the
    /// top-level message.
    #[must_use]
    pub fn from_error(err: anyhow::Error, debug: bool) -> Self {
        let body = if debug {
            format!("{err:?}")
        } else {
            err.to_string()
        };
        Self::text(500, body).with_exception(Arc::new(err))
    }

    /// Serve a file, or 304 when `if_modified_since` equals its mtime as an
    /// HTTP date.
    #[must_use]
    pub fn file(path: impl Into<PathBuf>, if_modified_since: Option<&str>) -> Self {
        let path = path.into();
        let modified = fs::metadata(&path).and_then(|m| m.modified()).ok();
        if let (Some(since), Some(mtime)) = (if_modified_since, modified) {
            if since == httpdate::fmt_http_date(mtime) {
                return Self::new(304);
            }
        }
        Self::file_response(path, modified)
    }

    /// File as an attachment named `download_name` (when non-empty).
    #[must_use]
    pub fn download(path: impl Into<PathBuf>, download_name: &str) -> Self {
        let path = path.into();
        let modified = fs::metadata(&path).and_then(|m| m.modified()).ok();
        let response = Self::file_response(path, modified);
        if download_name.is_empty() {
            response
        } else {
            response.with_header(
                "Content-Disposition",
                format!("attachment; filename=\"{download_name}\""),
            )
        }
    }

    fn file_response(path: PathBuf, modified: Option<SystemTime>) -> Self {
        let mut response = Self::new(200).with_header("Content-Type", content_type(&path));
        if let Some(mtime) = modified {
            response.set_header("Last-Modified", httpdate::fmt_http_date(mtime));
        }
        response.with_body(Body::File(path))
    }

    /// Render `template` through `renderer` into an HTML response.
    pub fn view(
        renderer: &dyn ViewRenderer,
        template: &str,
        vars: &Value,
    ) -> anyhow::Result<Self> {
        Ok(Self::html(200, renderer.render(template, vars)?))
    }

    // ------------------------------------------------------------------
    // builders
    // ------------------------------------------------------------------

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Add or replace a header.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    #[must_use]
    pub fn with_exception(mut self, err: Arc<anyhow::Error>) -> Self {
        self.exception = Some(err);
        self
    }

    /// Add or update a header (case-insensitive replace).
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((Arc::from(name), value.into()));
    }

    // ------------------------------------------------------------------
    // accessors
    // ------------------------------------------------------------------

    #[inline]
    pub fn status(&self) -> u16 {
        self.status
    }

    #[inline]
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &HeaderVec {
        &self.headers
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Body as text, for in-memory bodies.
    pub fn body_text(&self) -> Option<&str> {
        match &self.body {
            Body::Text(s) => Some(s),
            Body::Bytes(b) => std::str::from_utf8(b).ok(),
            Body::Empty => Some(""),
            Body::File(_) => None,
        }
    }

    /// The error attached by a failure path, if any.
    pub fn exception(&self) -> Option<&Arc<anyhow::Error>> {
        self.exception.as_ref()
    }

    pub fn is_chunked(&self) -> bool {
        self.header("Transfer-Encoding")
            .is_some_and(|v| v.eq_ignore_ascii_case("chunked"))
    }

    // ------------------------------------------------------------------
    // wire encoding
    // ------------------------------------------------------------------

    /// HTTP/1.1 wire bytes.
    ///
    /// Chunked responses are framed as a single chunk; everything else gets
    /// a `Content-Length`. 1xx, 204 and 304 never carry a body.
    pub fn encode(&self) -> io::Result<Vec<u8>> {
        let payload: Vec<u8> = if self.bodyless_status() {
            Vec::new()
        } else {
            match &self.body {
                Body::Empty => Vec::new(),
                Body::Text(s) => s.as_bytes().to_vec(),
                Body::Bytes(b) => b.clone(),
                Body::File(path) => fs::read(path)?,
            }
        };

        let mut out = Vec::with_capacity(payload.len() + 128);
        out.extend_from_slice(
            format!("HTTP/1.1 {} {}\r\n", self.status, status_reason(self.status)).as_bytes(),
        );
        for (name, value) in &self.headers {
            if name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }

        if self.is_chunked() {
            out.extend_from_slice(b"\r\n");
            if !payload.is_empty() {
                out.extend_from_slice(format!("{:x}\r\n", payload.len()).as_bytes());
                out.extend_from_slice(&payload);
                out.extend_from_slice(b"\r\n");
            }
            out.extend_from_slice(b"0\r\n\r\n");
        } else {
            if !self.bodyless_status() {
                out.extend_from_slice(format!("Content-Length: {}\r\n", payload.len()).as_bytes());
            }
            out.extend_from_slice(b"\r\n");
            out.extend_from_slice(&payload);
        }
        Ok(out)
    }

    fn bodyless_status(&self) -> bool {
        (100..200).contains(&self.status) || self.status == 204 || self.status == 304
    }
}

pub fn status_reason(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        413 => "Payload Too Large",
        415 => "Unsupported Media Type",
        422 => "Unprocessable Entity",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// What a handler may return instead of a full [`Response`].
#[derive(Debug, Clone)]
pub enum Reply {
    Response(Response),
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Json(Value),
    Null,
}

impl Reply {
    /// Normalise into a response.
    ///
    /// Text and numbers become a 200 text body, booleans `true`/`false`,
    /// null the `NULL` marker, objects and arrays compact JSON.
    pub fn into_response(self) -> Response {
        match self {
            Reply::Response(r) => r,
            Reply::Text(s) => Response::text(200, s),
            Reply::Int(n) => Response::text(200, n.to_string()),
            Reply::Float(f) => Response::text(200, f.to_string()),
            Reply::Bool(b) => Response::text(200, b.to_string()),
            Reply::Null => Response::text(200, NULL_MARKER),
            Reply::Json(value) => match value {
                Value::Null => Response::text(200, NULL_MARKER),
                Value::Bool(b) => Response::text(200, b.to_string()),
                Value::Number(n) => Response::text(200, n.to_string()),
                Value::String(s) => Response::text(200, s),
                other => Response::json(200, &other),
            },
        }
    }
}

impl From<Response> for Reply {
    fn from(r: Response) -> Self {
        Reply::Response(r)
    }
}

impl From<String> for Reply {
    fn from(s: String) -> Self {
        Reply::Text(s)
    }
}

impl From<&str> for Reply {
    fn from(s: &str) -> Self {
        Reply::Text(s.to_string())
    }
}

impl From<i64> for Reply {
    fn from(n: i64) -> Self {
        Reply::Int(n)
    }
}

impl From<i32> for Reply {
    fn from(n: i32) -> Self {
        Reply::Int(i64::from(n))
    }
}

impl From<u32> for Reply {
    fn from(n: u32) -> Self {
        Reply::Int(i64::from(n))
    }
}

impl From<f64> for Reply {
    fn from(f: f64) -> Self {
        Reply::Float(f)
    }
}

impl From<bool> for Reply {
    fn from(b: bool) -> Self {
        Reply::Bool(b)
    }
}

impl From<Value> for Reply {
    fn from(v: Value) -> Self {
        Reply::Json(v)
    }
}

impl From<()> for Reply {
    fn from(_: ()) -> Self {
        Reply::Null
    }
}

impl<T: Into<Reply>> From<Option<T>> for Reply {
    fn from(v: Option<T>) -> Self {
        v.map_or(Reply::Null, Into::into)
    }
}
