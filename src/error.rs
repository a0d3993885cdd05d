//! Error taxonomy for the dispatch path.
//!
//! Handlers and middleware speak `anyhow`; everything the dispatcher itself
//! can fail with is one of the typed enums below, and each maps onto exactly
//! one HTTP status.

use thiserror::Error;

/// Why a message never reached (or never finished) a pipeline.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Unsafe or unparseable request; answered with 400 before routing.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("no route for {method} {path}")]
    RouteNotFound { method: String, path: String },

    #[error("method {method} not allowed for {path}")]
    MethodNotAllowed {
        method: String,
        path: String,
        allowed: Vec<http::Method>,
    },

    /// Building the pipeline for a matched route failed.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// A panic escaped outside any pipeline link.
    #[error("dispatch panicked: {0}")]
    Panic(String),
}

impl DispatchError {
    pub fn status(&self) -> u16 {
        match self {
            DispatchError::MalformedRequest(_) => 400,
            DispatchError::RouteNotFound { .. } => 404,
            DispatchError::MethodNotAllowed { .. } => 405,
            DispatchError::Pipeline(_) | DispatchError::Panic(_) => 500,
        }
    }
}

/// Middleware resolution failures surfaced while composing a pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("middleware '{0}' is not registered")]
    UnknownMiddleware(String),

    #[error("controller '{0}' is not registered")]
    UnknownController(String),

    #[error("action '{action}' is not defined on controller '{controller}'")]
    UnknownAction { controller: String, action: String },
}

/// Registration and reverse-routing failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("route pattern '{0}' must start with '/'")]
    InvalidPattern(String),

    #[error("invalid constraint for parameter '{param}': {reason}")]
    InvalidConstraint { param: String, reason: String },

    #[error("missing value for parameter '{0}'")]
    MissingParameter(String),

    #[error("value '{value}' for parameter '{param}' does not satisfy its constraint")]
    ConstraintMismatch { param: String, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(DispatchError::MalformedRequest("x".into()).status(), 400);
        assert_eq!(
            DispatchError::RouteNotFound {
                method: "GET".into(),
                path: "/".into()
            }
            .status(),
            404
        );
        let err: DispatchError = PipelineError::UnknownMiddleware("auth".into()).into();
        assert_eq!(err.status(), 500);
        assert_eq!(err.to_string(), "middleware 'auth' is not registered");
    }
}
