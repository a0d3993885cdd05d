use super::{Middleware, Next};
use crate::request::Request;
use crate::response::Response;

/// Rejects requests whose `Authorization` header is not exactly `token`.
#[derive(Debug, Clone)]
pub struct AuthMiddleware {
    token: String,
}

impl AuthMiddleware {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl Middleware for AuthMiddleware {
    fn process(&self, req: &Request, next: Next<'_>) -> anyhow::Result<Response> {
        match req.header("authorization") {
            Some(h) if h == self.token => Ok(next.run(req)),
            _ => {
                tracing::debug!(request_id = %req.request_id(), path = %req.path(), "Unauthorized request");
                Ok(Response::error(401, "Unauthorized"))
            }
        }
    }

    fn name(&self) -> &str {
        "auth"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(raw: &str) -> Response {
        let rest = |_: &Request| Response::text(200, "secret");
        let req = Request::new(raw);
        AuthMiddleware::new("Bearer t0k")
            .process(&req, Next::new(&rest))
            .unwrap()
    }

    #[test]
    fn test_matching_token_passes() {
        let response = run("GET / HTTP/1.1\r\nAuthorization: Bearer t0k\r\n\r\n");
        assert_eq!(response.status(), 200);
    }

    #[test]
    fn test_missing_or_wrong_token_short_circuits() {
        assert_eq!(run("GET / HTTP/1.1\r\n\r\n").status(), 401);
        let response = run("GET / HTTP/1.1\r\nAuthorization: Bearer nope\r\n\r\n");
        assert_eq!(response.status(), 401);
        assert_eq!(response.body_text(), Some(r#"{"error":"Unauthorized"}"#));
    }
}
