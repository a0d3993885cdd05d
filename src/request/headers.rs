use std::collections::HashMap;

/// Header map with lower-cased names. Repeated names are comma-joined.
pub type HeaderMap = HashMap<String, String>;

pub(crate) const CRLF: &[u8] = b"\r\n";
pub(crate) const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Position of `needle` in `haystack` at or after `from`.
pub(crate) fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Head section (request line + headers) without the blank-line terminator.
///
/// A buffer without a terminator is treated as all head.
pub(crate) fn split_head(buffer: &[u8]) -> (&[u8], &[u8]) {
    match find(buffer, HEAD_TERMINATOR, 0) {
        Some(pos) => (&buffer[..pos], &buffer[pos + HEAD_TERMINATOR.len()..]),
        None => (buffer, &[]),
    }
}

/// The request line: everything up to the first CRLF.
pub(crate) fn first_line(buffer: &[u8]) -> &[u8] {
    match find(buffer, CRLF, 0) {
        Some(pos) => &buffer[..pos],
        None => buffer,
    }
}

/// Header lines of a head section, i.e. what follows the request line.
pub(crate) fn header_block(head: &[u8]) -> &[u8] {
    match find(head, CRLF, 0) {
        Some(pos) => &head[pos + CRLF.len()..],
        None => &[],
    }
}

/// Parse `key: value` lines.
///
/// Keys are lower-cased and values left-trimmed; a line with no `:` is kept
/// as a key with an empty value.
pub fn parse_header_block(block: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for line in block.split("\r\n").filter(|l| !l.is_empty()) {
        let (key, value) = match line.split_once(':') {
            Some((k, v)) => (k.to_ascii_lowercase(), v.trim_start()),
            None => (line.to_ascii_lowercase(), ""),
        };
        headers
            .entry(key)
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    headers
}

/// Parse a `Cookie` header. Pairs without `=` are dropped; names are trimmed.
pub fn parse_cookies(header: &str) -> HashMap<String, String> {
    header
        .split(';')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .collect()
}

/// Split a request target into (path, query string).
///
/// Accepts origin-form (`/a?b`) and absolute-form (`http://host/a?b`) targets;
/// any fragment is dropped.
pub(crate) fn split_target(uri: &str) -> (&str, &str) {
    let uri = uri.split('#').next().unwrap_or_default();
    let (before, query) = uri.split_once('?').unwrap_or((uri, ""));
    let path = match before.find("://") {
        Some(pos) if !before[..pos].contains('/') => {
            let rest = &before[pos + 3..];
            rest.find('/').map(|i| &rest[i..]).unwrap_or("/")
        }
        _ => before,
    };
    (path, query)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header_block() {
        let headers = parse_header_block("Host: example.com\r\nX-Tag:  a\r\nx-tag: b\r\nDNT");
        assert_eq!(headers.get("host").map(String::as_str), Some("example.com"));
        assert_eq!(headers.get("x-tag").map(String::as_str), Some("a,b"));
        assert_eq!(headers.get("dnt").map(String::as_str), Some(""));
    }

    #[test]
    fn test_value_keeps_inner_colons() {
        let headers = parse_header_block("Referer: http://a.test:8080/x");
        assert_eq!(
            headers.get("referer").map(String::as_str),
            Some("http://a.test:8080/x")
        );
    }

    #[test]
    fn test_parse_cookies() {
        let cookies = parse_cookies("sid=abc; theme=dark=1; broken; lang =en");
        assert_eq!(cookies.get("sid").map(String::as_str), Some("abc"));
        assert_eq!(cookies.get("theme").map(String::as_str), Some("dark=1"));
        assert_eq!(cookies.get("lang").map(String::as_str), Some("en"));
        assert!(!cookies.contains_key("broken"));
    }

    #[test]
    fn test_split_target() {
        assert_eq!(split_target("/a/b?x=1#frag"), ("/a/b", "x=1"));
        assert_eq!(split_target("/a/b"), ("/a/b", ""));
        assert_eq!(split_target("http://host:80/p?q"), ("/p", "q"));
        assert_eq!(split_target("http://host"), ("/", ""));
        assert_eq!(split_target("/redirect?to=http://x/y"), ("/redirect", "to=http://x/y"));
    }

    #[test]
    fn test_split_head_without_terminator() {
        let (head, body) = split_head(b"GET / HTTP/1.1\r\nHost: a");
        assert_eq!(head, b"GET / HTTP/1.1\r\nHost: a");
        assert!(body.is_empty());
        assert_eq!(header_block(head), b"Host: a");
        assert_eq!(first_line(head), b"GET / HTTP/1.1");
    }

    #[test]
    fn test_find_from_offset() {
        assert_eq!(find(b"abcabc", b"abc", 1), Some(3));
        assert_eq!(find(b"abc", b"abc", 4), None);
        assert_eq!(find(b"abc", b"", 0), None);
    }
}
