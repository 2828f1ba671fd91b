//! Framing-agnostic request handlers (§6): each HTTP endpoint's behavior is a plain `async fn`
//! over a parsed request struct and a shared context, returning `Result<T, ApiError>`. The
//! (out-of-scope) HTTP layer is responsible only for parsing the request and serializing the
//! `{success, error, error_ext}` envelope described below.

pub mod coordinator;
pub mod worker;

use serde_json::{json, Value as Json};

/// Every error an API handler can return, mapped to the envelope's `error`/`error_ext` fields.
#[derive(Debug, snafu::Snafu)]
pub enum ApiError {
    /// No or mismatched bearer key on a mutating endpoint.
    #[snafu(display("missing or invalid authorization key"))]
    Unauthorized,
    /// The super-transaction manager rejected the request.
    #[snafu(display("{source}"))]
    Transaction { source: qserv_catalog::ManagerError },
    /// The catalog store failed the lookup or write.
    #[snafu(display("{source}"))]
    Catalog { source: qserv_catalog::CatalogError },
    /// The per-worker file service failed the request.
    #[snafu(display("{source}"))]
    File { source: ingester::FileServiceError },
    /// The per-worker request manager failed the request.
    #[snafu(display("{source}"))]
    Request { source: ingester::RequestManagerError },
}

impl ApiError {
    /// Renders this error as the `{ "success": 0, "error": ..., "error_ext": ... }` envelope (§7).
    pub fn to_envelope(&self) -> Json {
        json!({
            "success": 0,
            "error": self.to_string(),
            "error_ext": self.error_ext(),
        })
    }

    fn error_ext(&self) -> Json {
        match self {
            Self::Unauthorized => json!({}),
            Self::Transaction { .. } => json!({ "kind": "transaction" }),
            Self::Catalog { .. } => json!({ "kind": "catalog" }),
            Self::File { .. } => json!({ "kind": "file" }),
            Self::Request { .. } => json!({ "kind": "request" }),
        }
    }
}

/// Wraps a successful payload in the `{ "success": 1, ... }` envelope (§7).
pub fn success_envelope(payload: Json) -> Json {
    let mut envelope = json!({ "success": 1 });
    if let Json::Object(fields) = payload {
        if let Json::Object(map) = &mut envelope {
            map.extend(fields);
        }
    }
    envelope
}

/// Checks a caller-provided key against the administrative key configured at startup. Every
/// mutating endpoint calls this first (§6); an empty configured key never matches, so the
/// service fails closed if it was never set.
pub fn check_admin_auth(provided: &str, configured: &str) -> Result<(), ApiError> {
    if configured.is_empty() || provided != configured {
        return Err(ApiError::Unauthorized);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_rejects_mismatched_or_unset_key() {
        assert!(check_admin_auth("abc", "abc").is_ok());
        assert!(check_admin_auth("abc", "xyz").is_err());
        assert!(check_admin_auth("abc", "").is_err());
    }

    #[test]
    fn success_envelope_merges_payload_fields() {
        let envelope = success_envelope(json!({ "transaction_id": 7 }));
        assert_eq!(envelope["success"], 1);
        assert_eq!(envelope["transaction_id"], 7);
    }

    #[test]
    fn error_envelope_reports_failure() {
        let err = ApiError::Unauthorized;
        let envelope = err.to_envelope();
        assert_eq!(envelope["success"], 0);
        assert!(envelope["error"].as_str().unwrap().contains("authorization"));
    }
}
