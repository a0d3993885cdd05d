//! `multipart/form-data` body parser.
//!
//! The parser walks the body one section at a time:
//!
//! ```text
//! ScanningSection -> ReadingHeaders -> ReadingBody -> SectionBoundaryFound
//!        |                 |
//!        +-----------------+---------> Malformed
//! ```
//!
//! File parts are spooled to temp files as they are found. Regular fields are
//! appended to a `key=value&` stream that is decoded once at the end, so a
//! malformed section leaves every earlier field and file intact. The number
//! of sections is capped to bound work on hostile input.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;
use url::form_urlencoded;

use super::headers::{find, CRLF, HEAD_TERMINATOR};
use super::upload::{spool, UploadError, UploadSettings, UploadedFile};

static BOUNDARY_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r#"boundary="?(\S+)"?"#).expect("boundary pattern is valid")
});

static FILE_DISPOSITION_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r#"(?i)name="(.*?)"; filename="(.*?)""#).expect("file disposition pattern is valid")
});

static FIELD_DISPOSITION_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r#"name="(.*?)"$"#).expect("field disposition pattern is valid")
});

/// Boundary declared in a `Content-Type` header, without quotes.
pub fn boundary_of(content_type: &str) -> Option<String> {
    BOUNDARY_RE
        .captures(content_type)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim_matches('"').to_string())
        .filter(|b| !b.is_empty())
}

/// Why parsing stopped before the closing boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Malformed {
    /// No further `\r\n--boundary` after the section start
    MissingBoundary,
    /// No blank line between part headers and part body
    MissingHeaderSeparator,
    /// A part header line without `": "`
    InvalidHeaderLine,
    /// A part without `Content-Disposition`
    MissingDisposition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    /// Closing boundary reached (or the body ran out cleanly)
    Complete,
    /// Section cap hit before the end
    SectionLimit,
    Malformed(Malformed),
}

/// Everything recovered from a multipart body.
#[derive(Debug, Clone)]
pub struct MultipartForm {
    pub fields: Map<String, Value>,
    /// `(field name, file)` in body order
    pub files: Vec<(String, UploadedFile)>,
    /// Sections fully consumed
    pub sections: usize,
    pub outcome: ParseOutcome,
}

enum Disposition {
    File { field: String, filename: String },
    Field(String),
    Unnamed,
}

struct PartHeaders {
    disposition: Option<Disposition>,
    content_type: Option<String>,
    relative_path: Option<String>,
}

enum State {
    ScanningSection {
        offset: usize,
    },
    ReadingHeaders {
        start: usize,
        headers_end: usize,
        section_end: usize,
    },
    ReadingBody {
        headers: PartHeaders,
        body_start: usize,
        section_end: usize,
    },
    SectionBoundaryFound {
        section_end: usize,
    },
    Malformed(Malformed),
}

pub struct MultipartParser<'a> {
    /// `--` + boundary
    marker: Vec<u8>,
    /// `\r\n--` + boundary
    delimiter: Vec<u8>,
    settings: &'a UploadSettings,
}

impl<'a> MultipartParser<'a> {
    pub fn new(boundary: &str, settings: &'a UploadSettings) -> Self {
        let marker = [b"--", boundary.as_bytes()].concat();
        let delimiter = [CRLF, marker.as_slice()].concat();
        Self {
            marker,
            delimiter,
            settings,
        }
    }

    /// Parse `body`, which must start at the opening boundary marker.
    pub fn parse(&self, body: &[u8]) -> MultipartForm {
        let mut encoded_fields = String::new();
        let mut files = Vec::new();
        let mut sections = 0;
        let mut remaining = self.settings.max_sections;
        let mut state = State::ScanningSection {
            offset: self.marker.len() + CRLF.len(),
        };

        let outcome = loop {
            state = match state {
                State::ScanningSection { offset } => {
                    if offset > body.len() {
                        break ParseOutcome::Complete;
                    }
                    if remaining == 0 {
                        break ParseOutcome::SectionLimit;
                    }
                    remaining -= 1;
                    self.scan(body, offset)
                }
                State::ReadingHeaders {
                    start,
                    headers_end,
                    section_end,
                } => match parse_part_headers(&body[start..headers_end]) {
                    Ok(headers) => State::ReadingBody {
                        headers,
                        body_start: headers_end + HEAD_TERMINATOR.len(),
                        section_end,
                    },
                    Err(reason) => State::Malformed(reason),
                },
                State::ReadingBody {
                    headers,
                    body_start,
                    section_end,
                } => {
                    let value = &body[body_start..section_end];
                    match headers.disposition {
                        Some(Disposition::File { field, filename }) => {
                            let file = self.store_file(
                                filename,
                                headers.content_type,
                                headers.relative_path,
                                value,
                            );
                            files.push((field, file));
                            State::SectionBoundaryFound { section_end }
                        }
                        Some(Disposition::Field(name)) => {
                            encoded_fields.extend(form_urlencoded::byte_serialize(name.as_bytes()));
                            encoded_fields.push('=');
                            encoded_fields.extend(form_urlencoded::byte_serialize(value));
                            encoded_fields.push('&');
                            State::SectionBoundaryFound { section_end }
                        }
                        Some(Disposition::Unnamed) => State::SectionBoundaryFound { section_end },
                        None => State::Malformed(Malformed::MissingDisposition),
                    }
                }
                State::SectionBoundaryFound { section_end } => {
                    sections += 1;
                    let after = section_end + self.delimiter.len();
                    if body.get(after..).is_some_and(|rest| rest.starts_with(b"--")) {
                        break ParseOutcome::Complete;
                    }
                    State::ScanningSection {
                        offset: after + CRLF.len(),
                    }
                }
                State::Malformed(reason) => break ParseOutcome::Malformed(reason),
            };
        };

        if let ParseOutcome::Malformed(reason) = outcome {
            debug!(?reason, sections, "Multipart parsing stopped early");
        }

        let fields = form_urlencoded::parse(encoded_fields.as_bytes())
            .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
            .collect();

        MultipartForm {
            fields,
            files,
            sections,
            outcome,
        }
    }

    fn scan(&self, body: &[u8], offset: usize) -> State {
        let Some(section_end) = find(body, &self.delimiter, offset) else {
            return State::Malformed(Malformed::MissingBoundary);
        };
        match find(body, HEAD_TERMINATOR, offset) {
            Some(headers_end) if headers_end + HEAD_TERMINATOR.len() <= section_end => {
                State::ReadingHeaders {
                    start: offset,
                    headers_end,
                    section_end,
                }
            }
            _ => State::Malformed(Malformed::MissingHeaderSeparator),
        }
    }

    fn store_file(
        &self,
        filename: String,
        content_type: Option<String>,
        relative_path: Option<String>,
        value: &[u8],
    ) -> UploadedFile {
        let mut tmp_path = None;
        let error = match self.settings.resolve_tmp_dir() {
            None => UploadError::NoTmpDir,
            Some(_) if value.is_empty() && filename.is_empty() => UploadError::NoFile,
            Some(dir) => match spool(&dir, value) {
                Ok(path) => {
                    tmp_path = Some(path);
                    UploadError::Ok
                }
                Err(e) => {
                    debug!(error = %e, dir = %dir.display(), "Failed to spool upload");
                    UploadError::CantWrite
                }
            },
        };

        UploadedFile {
            full_path: relative_path.unwrap_or_else(|| filename.clone()),
            name: filename,
            content_type: content_type.unwrap_or_default(),
            tmp_path,
            size: value.len(),
            error,
        }
    }
}

/// Parse the header lines of one part.
///
/// A field disposition ends header reading for the part; later lines are
/// not inspected.
fn parse_part_headers(raw: &[u8]) -> Result<PartHeaders, Malformed> {
    let text = String::from_utf8_lossy(raw);
    let mut headers = PartHeaders {
        disposition: None,
        content_type: None,
        relative_path: None,
    };

    for line in text.trim().split("\r\n") {
        let Some((key, value)) = line.split_once(": ").filter(|(k, _)| !k.is_empty()) else {
            return Err(Malformed::InvalidHeaderLine);
        };
        match key.to_ascii_lowercase().as_str() {
            "content-disposition" => {
                if let Some(c) = FILE_DISPOSITION_RE.captures(value) {
                    headers.disposition = Some(Disposition::File {
                        field: c[1].to_string(),
                        filename: c[2].to_string(),
                    });
                    continue;
                }
                headers.disposition = Some(match FIELD_DISPOSITION_RE.captures(value) {
                    Some(c) => Disposition::Field(c[1].to_string()),
                    None => Disposition::Unnamed,
                });
                break;
            }
            "content-type" => headers.content_type = Some(value.trim().to_string()),
            "webkitrelativepath" => headers.relative_path = Some(value.trim().to_string()),
            _ => {}
        }
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(dir: &std::path::Path) -> UploadSettings {
        UploadSettings {
            tmp_dir: Some(dir.to_path_buf()),
            max_sections: 16,
        }
    }

    #[test]
    fn test_boundary_of() {
        assert_eq!(
            boundary_of("multipart/form-data; boundary=----abc").as_deref(),
            Some("----abc")
        );
        assert_eq!(
            boundary_of("multipart/form-data; boundary=\"q\"").as_deref(),
            Some("q")
        );
        assert_eq!(boundary_of("application/json"), None);
    }

    #[test]
    fn test_fields_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let body = b"--XX\r\n\
Content-Disposition: form-data; name=\"title\"\r\n\r\n\
a & b\r\n\
--XX\r\n\
Content-Disposition: form-data; name=\"doc\"; filename=\"n.txt\"\r\n\
Content-Type: text/plain\r\n\r\n\
hello\r\n\
--XX--\r\n";
        let form = MultipartParser::new("XX", &settings).parse(body);
        assert_eq!(form.outcome, ParseOutcome::Complete);
        assert_eq!(form.sections, 2);
        assert_eq!(form.fields["title"], Value::String("a & b".into()));
        let (field, file) = &form.files[0];
        assert_eq!(field, "doc");
        assert_eq!(file.name, "n.txt");
        assert_eq!(file.content_type, "text/plain");
        assert_eq!(file.full_path, "n.txt");
        assert_eq!(file.size, 5);
        assert_eq!(file.error, UploadError::Ok);
        assert_eq!(file.contents().unwrap(), b"hello");
    }

    #[test]
    fn test_bad_header_line_keeps_earlier_sections() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let body = b"--B\r\n\
Content-Disposition: form-data; name=\"a\"\r\n\r\n\
1\r\n\
--B\r\n\
garbage-line\r\n\r\n\
2\r\n\
--B--\r\n";
        let form = MultipartParser::new("B", &settings).parse(body);
        assert_eq!(
            form.outcome,
            ParseOutcome::Malformed(Malformed::InvalidHeaderLine)
        );
        assert_eq!(form.sections, 1);
        assert_eq!(form.fields["a"], Value::String("1".into()));
    }

    #[test]
    fn test_section_limit() {
        let dir = tempfile::tempdir().unwrap();
        let settings = UploadSettings {
            tmp_dir: Some(dir.path().to_path_buf()),
            max_sections: 1,
        };
        let body = b"--B\r\n\
Content-Disposition: form-data; name=\"a\"\r\n\r\n\
1\r\n\
--B\r\n\
Content-Disposition: form-data; name=\"b\"\r\n\r\n\
2\r\n\
--B--\r\n";
        let form = MultipartParser::new("B", &settings).parse(body);
        assert_eq!(form.outcome, ParseOutcome::SectionLimit);
        assert!(form.fields.contains_key("a"));
        assert!(!form.fields.contains_key("b"));
    }

    #[test]
    fn test_empty_file_part_is_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let body = b"--B\r\n\
Content-Disposition: form-data; name=\"doc\"; filename=\"\"\r\n\r\n\
\r\n\
--B--\r\n";
        let form = MultipartParser::new("B", &settings).parse(body);
        let (_, file) = &form.files[0];
        assert_eq!(file.error, UploadError::NoFile);
        assert!(file.tmp_path.is_none());
    }
}
