//! Inbound request model.
//!
//! [`Request`] wraps the raw bytes of one message and materialises method,
//! path, headers, query, body and uploads on demand. A worker shares one
//! [`ParseMemo`] across its requests through [`ParseContext`] so identical
//! header blocks, query strings and small bodies are parsed once.

mod core;
pub mod headers;
pub mod memo;
pub mod multipart;
pub mod sanitize;
pub mod upload;

pub use core::{DispatchInfo, Field, ParseContext, Request, RequestSnapshot, SnapshotBody};
pub use headers::HeaderMap;
pub use memo::{BodyMap, ParseMemo, QueryMap};
pub use multipart::{MultipartForm, MultipartParser, ParseOutcome};
pub use upload::{UploadError, UploadSettings, UploadedFile};
