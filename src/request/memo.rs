use std::collections::HashMap;
use std::rc::Rc;

use serde_json::{Map, Value};

use crate::cache::FifoCache;

use super::headers::HeaderMap;

/// Entries kept per memo table.
pub const MEMO_CAPACITY: usize = 256;
/// Keys this long or longer are never memoised.
pub const MAX_MEMO_KEY_LEN: usize = 4096;

pub type QueryMap = HashMap<String, String>;
pub type BodyMap = Map<String, Value>;

/// Which decoder produced a memoised body map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Json,
    Form,
}

/// Per-worker memo of parsed header blocks, query strings and bodies.
///
/// Requests on pooled connections tend to repeat the same header block
/// byte-for-byte; looking it up here skips re-parsing. Values are shared
/// with the requests that read them, never copied.
#[derive(Debug)]
pub struct ParseMemo {
    headers: FifoCache<String, Rc<HeaderMap>>,
    queries: FifoCache<String, Rc<QueryMap>>,
    json_bodies: FifoCache<Vec<u8>, Rc<BodyMap>>,
    form_bodies: FifoCache<Vec<u8>, Rc<BodyMap>>,
}

impl Default for ParseMemo {
    fn default() -> Self {
        Self::with_capacity(MEMO_CAPACITY)
    }
}

#[inline]
pub fn is_memoizable(key_len: usize) -> bool {
    key_len < MAX_MEMO_KEY_LEN
}

impl ParseMemo {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            headers: FifoCache::with_capacity(capacity),
            queries: FifoCache::with_capacity(capacity),
            json_bodies: FifoCache::with_capacity(capacity),
            form_bodies: FifoCache::with_capacity(capacity),
        }
    }

    pub fn headers(&self, block: &str) -> Option<Rc<HeaderMap>> {
        self.headers.get(block).map(Rc::clone)
    }

    pub fn remember_headers(&mut self, block: &str, parsed: &Rc<HeaderMap>) {
        if is_memoizable(block.len()) {
            self.headers.insert(block.to_string(), Rc::clone(parsed));
        }
    }

    pub fn query(&self, query: &str) -> Option<Rc<QueryMap>> {
        self.queries.get(query).map(Rc::clone)
    }

    pub fn remember_query(&mut self, query: &str, parsed: &Rc<QueryMap>) {
        if is_memoizable(query.len()) {
            self.queries.insert(query.to_string(), Rc::clone(parsed));
        }
    }

    pub fn body(&self, kind: BodyKind, body: &[u8]) -> Option<Rc<BodyMap>> {
        self.bodies(kind).get(body).map(Rc::clone)
    }

    pub fn remember_body(&mut self, kind: BodyKind, body: &[u8], parsed: &Rc<BodyMap>) {
        if is_memoizable(body.len()) {
            let table = match kind {
                BodyKind::Json => &mut self.json_bodies,
                BodyKind::Form => &mut self.form_bodies,
            };
            table.insert(body.to_vec(), Rc::clone(parsed));
        }
    }

    fn bodies(&self, kind: BodyKind) -> &FifoCache<Vec<u8>, Rc<BodyMap>> {
        match kind {
            BodyKind::Json => &self.json_bodies,
            BodyKind::Form => &self.form_bodies,
        }
    }

    pub fn header_entries(&self) -> usize {
        self.headers.len()
    }

    pub fn query_entries(&self) -> usize {
        self.queries.len()
    }

    pub fn body_entries(&self) -> usize {
        self.json_bodies.len() + self.form_bodies.len()
    }

    pub fn clear(&mut self) {
        self.headers.clear();
        self.queries.clear();
        self.json_bodies.clear();
        self.form_bodies.clear();
    }
}
