use once_cell::unsync::OnceCell;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Instant, SystemTime};
use url::form_urlencoded;

use super::headers::{
    first_line, header_block, parse_cookies, parse_header_block, split_head, split_target,
    HeaderMap,
};
use super::memo::{BodyKind, BodyMap, ParseMemo, QueryMap};
use super::multipart::{boundary_of, MultipartParser};
use super::sanitize::sanitize;
use super::upload::{release, UploadSettings, UploadedFile};
use crate::ids::RequestId;
use crate::router::RouteMatch;

static JSON_CONTENT_TYPE_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"(?i)\bjson\b").expect("json content-type pattern is valid")
});

static HOST_PORT_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r":\d{1,5}$").expect("host port pattern is valid")
});

/// Lazily parsed field groups, for [`Request::parse_count`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// method + uri
    RequestLine,
    ProtocolVersion,
    Path,
    QueryString,
    Headers,
    Cookies,
    Query,
    /// body params + files
    Body,
}

const FIELD_COUNT: usize = 8;

/// Shared state a worker hands to every request it builds.
#[derive(Debug, Clone, Default)]
pub struct ParseContext {
    pub memo: Option<Rc<RefCell<ParseMemo>>>,
    pub uploads: UploadSettings,
}

/// Routing facts bound to a request once its pipeline is chosen.
#[derive(Debug, Clone, Default)]
pub struct DispatchInfo {
    pub controller: String,
    pub action: String,
    pub route: Option<RouteMatch>,
}

#[derive(Debug, Default)]
struct ParsedBody {
    params: Rc<BodyMap>,
    files: Vec<(String, UploadedFile)>,
}

#[derive(Debug)]
struct RequestLine {
    method: String,
    uri: String,
}

/// Serialisable form of a request, for handing work to another process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSnapshot {
    pub request_id: RequestId,
    pub buffer: Vec<u8>,
    /// Parsed body, present when it had been read before the snapshot
    pub body: Option<SnapshotBody>,
    pub properties: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotBody {
    pub params: BodyMap,
    pub files: Vec<(String, UploadedFile)>,
}

/// One inbound HTTP message.
///
/// Every accessor parses its field group on first use and memoises the
/// result for the life of the request. Nothing is parsed up front.
///
/// Upload temp files belong to the request and are removed by
/// [`Request::destroy`] or on drop, unless the request was rebuilt with
/// [`Request::restore`].
#[derive(Debug)]
pub struct Request {
    buffer: Vec<u8>,
    context: ParseContext,
    id: OnceCell<RequestId>,
    started: Instant,
    started_at: SystemTime,
    owns_uploads: bool,
    counters: [Cell<u32>; FIELD_COUNT],

    line: OnceCell<RequestLine>,
    protocol: OnceCell<String>,
    path: OnceCell<String>,
    query_string: OnceCell<String>,
    headers: OnceCell<Rc<HeaderMap>>,
    cookies: OnceCell<HashMap<String, String>>,
    query: OnceCell<Rc<QueryMap>>,
    body: OnceCell<ParsedBody>,

    properties: RefCell<HashMap<String, Value>>,
    dispatch: OnceCell<DispatchInfo>,
}

impl Request {
    /// A request with no shared memo and default upload settings.
    pub fn new(buffer: impl Into<Vec<u8>>) -> Self {
        Self::with_context(buffer, ParseContext::default())
    }

    pub fn with_context(buffer: impl Into<Vec<u8>>, context: ParseContext) -> Self {
        Self {
            buffer: buffer.into(),
            context,
            id: OnceCell::new(),
            started: Instant::now(),
            started_at: SystemTime::now(),
            owns_uploads: true,
            counters: Default::default(),
            line: OnceCell::new(),
            protocol: OnceCell::new(),
            path: OnceCell::new(),
            query_string: OnceCell::new(),
            headers: OnceCell::new(),
            cookies: OnceCell::new(),
            query: OnceCell::new(),
            body: OnceCell::new(),
            properties: RefCell::new(HashMap::new()),
            dispatch: OnceCell::new(),
        }
    }

    /// How many times `field` has been parsed. Never more than 1.
    pub fn parse_count(&self, field: Field) -> u32 {
        self.counters[field as usize].get()
    }

    fn mark_parsed(&self, field: Field) {
        let counter = &self.counters[field as usize];
        counter.set(counter.get() + 1);
    }

    // ------------------------------------------------------------------
    // identity and timing
    // ------------------------------------------------------------------

    /// The inbound `x-request-id` when it is a valid ULID, otherwise a
    /// fresh id. Fixed on first call.
    pub fn request_id(&self) -> RequestId {
        *self
            .id
            .get_or_init(|| RequestId::from_header_or_new(self.header("x-request-id")))
    }

    pub fn start_time(&self) -> SystemTime {
        self.started_at
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }

    // ------------------------------------------------------------------
    // raw access
    // ------------------------------------------------------------------

    pub fn raw_buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Request line and headers, without the terminating blank line.
    pub fn raw_head(&self) -> &[u8] {
        split_head(&self.buffer).0
    }

    pub fn raw_body(&self) -> &[u8] {
        split_head(&self.buffer).1
    }

    // ------------------------------------------------------------------
    // request line
    // ------------------------------------------------------------------

    fn request_line(&self) -> &RequestLine {
        self.line.get_or_init(|| {
            self.mark_parsed(Field::RequestLine);
            let line = String::from_utf8_lossy(first_line(&self.buffer));
            let mut parts = line.splitn(3, ' ');
            let method = parts.next().unwrap_or_default().to_string();
            let uri = parts.next().unwrap_or("/").to_string();
            RequestLine { method, uri }
        })
    }

    pub fn method(&self) -> &str {
        &self.request_line().method
    }

    pub fn uri(&self) -> &str {
        &self.request_line().uri
    }

    /// Text after `HTTP/` on the request line, `1.0` when absent.
    pub fn protocol_version(&self) -> &str {
        self.protocol.get_or_init(|| {
            self.mark_parsed(Field::ProtocolVersion);
            let line = String::from_utf8_lossy(first_line(&self.buffer));
            match line.find("HTTP/") {
                Some(pos) => line[pos + 5..].to_string(),
                None => "1.0".to_string(),
            }
        })
    }

    pub fn path(&self) -> &str {
        self.path.get_or_init(|| {
            self.mark_parsed(Field::Path);
            split_target(self.uri()).0.to_string()
        })
    }

    pub fn query_string(&self) -> &str {
        self.query_string.get_or_init(|| {
            self.mark_parsed(Field::QueryString);
            split_target(self.uri()).1.to_string()
        })
    }

    // ------------------------------------------------------------------
    // headers and cookies
    // ------------------------------------------------------------------

    pub fn headers(&self) -> &HeaderMap {
        self.headers.get_or_init(|| {
            self.mark_parsed(Field::Headers);
            let block = String::from_utf8_lossy(header_block(self.raw_head()));
            if let Some(memo) = &self.context.memo {
                if let Some(hit) = memo.borrow().headers(&block) {
                    return hit;
                }
            }
            let parsed = Rc::new(parse_header_block(&block));
            if let Some(memo) = &self.context.memo {
                memo.borrow_mut().remember_headers(&block, &parsed);
            }
            parsed
        })
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        let headers = self.headers();
        match headers.get(name) {
            Some(v) => Some(v.as_str()),
            None => headers.get(&name.to_ascii_lowercase()).map(String::as_str),
        }
    }

    /// `Host` header, optionally with a trailing `:port` removed.
    pub fn host(&self, without_port: bool) -> Option<Cow<'_, str>> {
        let host = self.header("host")?;
        if without_port {
            Some(HOST_PORT_RE.replace(host, ""))
        } else {
            Some(Cow::Borrowed(host))
        }
    }

    pub fn cookies(&self) -> &HashMap<String, String> {
        self.cookies.get_or_init(|| {
            self.mark_parsed(Field::Cookies);
            parse_cookies(self.header("cookie").unwrap_or_default())
        })
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies().get(name).map(String::as_str)
    }

    // ------------------------------------------------------------------
    // query and body
    // ------------------------------------------------------------------

    /// Decoded query parameters, unsanitised.
    pub fn query_params(&self) -> &QueryMap {
        self.query.get_or_init(|| {
            self.mark_parsed(Field::Query);
            let query = self.query_string();
            if query.is_empty() {
                return Rc::new(QueryMap::new());
            }
            if let Some(memo) = &self.context.memo {
                if let Some(hit) = memo.borrow().query(query) {
                    return hit;
                }
            }
            let parsed: Rc<QueryMap> = Rc::new(
                form_urlencoded::parse(query.as_bytes())
                    .into_owned()
                    .collect(),
            );
            if let Some(memo) = &self.context.memo {
                memo.borrow_mut().remember_query(query, &parsed);
            }
            parsed
        })
    }

    /// Sanitised query parameter.
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.query_params().get(name).map(|v| sanitize(v))
    }

    /// Decoded body parameters, unsanitised. Empty for multipart bodies
    /// without regular fields.
    pub fn body_params(&self) -> &BodyMap {
        &self.parsed_body().params
    }

    /// Sanitised scalar body parameter. Null, arrays and objects read as `None`.
    pub fn body_param(&self, name: &str) -> Option<String> {
        match self.body_params().get(name)? {
            Value::String(s) => Some(sanitize(s)),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// All uploaded files as `(field name, file)` in body order.
    pub fn files(&self) -> &[(String, UploadedFile)] {
        &self.parsed_body().files
    }

    /// The last file uploaded under `name`.
    pub fn file(&self, name: &str) -> Option<&UploadedFile> {
        self.files()
            .iter()
            .rev()
            .find(|(field, _)| field == name)
            .map(|(_, file)| file)
    }

    fn parsed_body(&self) -> &ParsedBody {
        self.body.get_or_init(|| {
            self.mark_parsed(Field::Body);
            self.parse_body()
        })
    }

    fn parse_body(&self) -> ParsedBody {
        let content_type = self.header("content-type").unwrap_or_default();

        if let Some(boundary) = boundary_of(content_type) {
            let form = MultipartParser::new(&boundary, &self.context.uploads).parse(self.raw_body());
            return ParsedBody {
                params: Rc::new(form.fields),
                files: form.files,
            };
        }

        let body = self.raw_body();
        if body.is_empty() {
            return ParsedBody::default();
        }

        let kind = if JSON_CONTENT_TYPE_RE.is_match(content_type) {
            BodyKind::Json
        } else {
            BodyKind::Form
        };
        if let Some(memo) = &self.context.memo {
            if let Some(hit) = memo.borrow().body(kind, body) {
                return ParsedBody {
                    params: hit,
                    files: Vec::new(),
                };
            }
        }

        let params = Rc::new(match kind {
            BodyKind::Json => match serde_json::from_slice::<Value>(body) {
                Ok(Value::Object(map)) => map,
                _ => BodyMap::new(),
            },
            BodyKind::Form => form_urlencoded::parse(body)
                .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
                .collect(),
        });
        if let Some(memo) = &self.context.memo {
            memo.borrow_mut().remember_body(kind, body, &params);
        }
        ParsedBody {
            params,
            files: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // request-scoped state
    // ------------------------------------------------------------------

    pub fn set_property(&self, key: impl Into<String>, value: Value) {
        self.properties.borrow_mut().insert(key.into(), value);
    }

    pub fn property(&self, key: &str) -> Option<Value> {
        self.properties.borrow().get(key).cloned()
    }

    /// Bind routing facts. The first binding wins; returns `false` if one was
    /// already present.
    pub fn bind_dispatch(&self, info: DispatchInfo) -> bool {
        self.dispatch.set(info).is_ok()
    }

    pub fn dispatch_info(&self) -> Option<&DispatchInfo> {
        self.dispatch.get()
    }

    pub fn controller(&self) -> &str {
        self.dispatch.get().map(|d| d.controller.as_str()).unwrap_or_default()
    }

    pub fn action(&self) -> &str {
        self.dispatch.get().map(|d| d.action.as_str()).unwrap_or_default()
    }

    pub fn route(&self) -> Option<&RouteMatch> {
        self.dispatch.get().and_then(|d| d.route.as_ref())
    }

    /// Value bound to `{name}` in the matched route pattern.
    pub fn route_param(&self, name: &str) -> Option<&str> {
        self.route().and_then(|r| r.param(name))
    }

    // ------------------------------------------------------------------
    // lifecycle
    // ------------------------------------------------------------------

    /// Capture the buffer, id, parsed body and properties.
    pub fn snapshot(&self) -> RequestSnapshot {
        RequestSnapshot {
            request_id: self.request_id(),
            buffer: self.buffer.clone(),
            body: self.body.get().map(|b| SnapshotBody {
                params: (*b.params).clone(),
                files: b.files.clone(),
            }),
            properties: self.properties.borrow().clone(),
        }
    }

    /// Rebuild a request from a snapshot. The result never removes upload
    /// files: whoever took the snapshot still owns them.
    pub fn restore(snapshot: RequestSnapshot, context: ParseContext) -> Self {
        let mut request = Self::with_context(snapshot.buffer, context);
        request.id = OnceCell::with_value(snapshot.request_id);
        request.owns_uploads = false;
        request.properties = RefCell::new(snapshot.properties);
        if let Some(body) = snapshot.body {
            request.body = OnceCell::with_value(ParsedBody {
                params: Rc::new(body.params),
                files: body.files,
            });
        }
        request
    }

    /// Remove upload temp files and clear request-scoped state. Idempotent.
    pub fn destroy(&mut self) {
        if let Some(body) = self.body.take() {
            if self.owns_uploads {
                release(&body.files);
            }
        }
        self.properties.get_mut().clear();
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_line_defaults() {
        let req = Request::new("GET\r\n\r\n");
        assert_eq!(req.method(), "GET");
        assert_eq!(req.uri(), "/");
        assert_eq!(req.protocol_version(), "1.0");
    }

    #[test]
    fn test_host_without_port() {
        let req = Request::new("GET / HTTP/1.1\r\nHost: example.com:8080\r\n\r\n");
        assert_eq!(req.host(false).as_deref(), Some("example.com:8080"));
        assert_eq!(req.host(true).as_deref(), Some("example.com"));
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let mut req = Request::new("GET / HTTP/1.1\r\n\r\n");
        req.set_property("user", Value::from("ada"));
        req.destroy();
        req.destroy();
        assert!(req.property("user").is_none());
    }
}
