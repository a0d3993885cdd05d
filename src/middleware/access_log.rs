use std::time::Instant;

use tracing::field::Empty;
use tracing::info_span;

use super::{Middleware, Next};
use crate::request::Request;
use crate::response::Response;

/// Opens an `http_request` span around the rest of the chain and records the
/// final status and latency on it.
#[derive(Debug, Default, Clone, Copy)]
pub struct AccessLogMiddleware;

impl Middleware for AccessLogMiddleware {
    fn process(&self, req: &Request, next: Next<'_>) -> anyhow::Result<Response> {
        let span = info_span!(
            "http_request",
            request_id = %req.request_id(),
            method = %req.method(),
            path = %req.path(),
            status = Empty,
            latency_ms = Empty,
        );
        let _entered = span.enter();
        let started = Instant::now();

        let response = next.run(req);

        span.record("status", response.status());
        span.record("latency_ms", started.elapsed().as_millis() as u64);
        Ok(response)
    }

    fn name(&self) -> &str {
        "access_log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passes_response_through() {
        let rest = |_: &Request| Response::text(201, "made");
        let req = Request::new("POST /things HTTP/1.1\r\n\r\n");
        let response = AccessLogMiddleware.process(&req, Next::new(&rest)).unwrap();
        assert_eq!(response.status(), 201);
        assert_eq!(response.body_text(), Some("made"));
    }
}
