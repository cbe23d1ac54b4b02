use serde_json::{json, Value};

use crate::model::path::InvalidPath;

/// Errors surfaced by schema construction and operation execution.
///
/// `Forbidden` and `InvalidInput` are raised before any manager call.
/// `Integrity` marks broken internal state (duplicate derived names, cyclic
/// parent chains) and always aborts the request.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("forbidden")]
    Forbidden,

    #[error("{0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

pub type Result<T, E = ApiError> = std::result::Result<T, E>;

impl ApiError {
    /// True when the message may be shown to API clients with debug off.
    pub fn is_client_safe(&self) -> bool {
        matches!(
            self,
            ApiError::Forbidden | ApiError::InvalidInput(_) | ApiError::NotFound(_)
        )
    }
}

impl From<InvalidPath> for ApiError {
    fn from(err: InvalidPath) -> Self {
        ApiError::InvalidInput(err.to_string())
    }
}

/// Renders an error as the JSON body returned to clients. Without debug,
/// non-client-safe errors collapse to a generic message; with debug, the
/// full message and source chain are included.
pub fn error_body(err: &ApiError, debug: bool) -> Value {
    if !debug {
        let message = if err.is_client_safe() {
            err.to_string()
        } else {
            "internal error".to_string()
        };
        return json!({ "message": message });
    }

    let mut detail = Vec::new();
    if let ApiError::Upstream(inner) = err {
        for cause in inner.chain().skip(1) {
            detail.push(cause.to_string());
        }
    }
    json!({ "message": err.to_string(), "detail": detail })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_client_safety_split() {
        assert!(ApiError::Forbidden.is_client_safe());
        assert!(ApiError::InvalidInput("bad".into()).is_client_safe());
        assert!(ApiError::NotFound("product 1".into()).is_client_safe());
        assert!(!ApiError::Integrity("dup".into()).is_client_safe());
        assert!(!ApiError::Upstream(anyhow::anyhow!("db gone")).is_client_safe());
    }

    #[test]
    fn test_error_body_hides_detail_without_debug() {
        let err = ApiError::Upstream(anyhow::anyhow!("db gone").context("save failed"));
        assert_eq!(error_body(&err, false), json!({ "message": "internal error" }));

        let body = error_body(&err, true);
        assert_eq!(body["message"], json!("save failed"));
        assert_eq!(body["detail"], json!(["db gone"]));
    }

    #[test]
    fn test_forbidden_message_shown_without_debug() {
        assert_eq!(
            error_body(&ApiError::Forbidden, false),
            json!({ "message": "forbidden" })
        );
    }
}
