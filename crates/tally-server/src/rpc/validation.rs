//! Parameter extraction and validation helpers.

use serde_json::Value;

use super::errors::RpcError;

/// Maximum length of a client-supplied identifier (callback ids etc.).
pub const MAX_ID_LENGTH: usize = 256;

/// Extract a required parameter from the params object.
pub fn require_param<'a>(params: Option<&'a Value>, key: &str) -> Result<&'a Value, RpcError> {
    params
        .and_then(|p| p.get(key))
        .filter(|v| !v.is_null())
        .ok_or_else(|| RpcError::InvalidParams {
            message: format!("Missing required parameter: {key}"),
        })
}

/// Extract a required, non-empty string parameter.
pub fn require_string_param(params: Option<&Value>, key: &str) -> Result<String, RpcError> {
    let value = require_param(params, key)?
        .as_str()
        .ok_or_else(|| RpcError::InvalidParams {
            message: format!("Parameter '{key}' must be a string"),
        })?;
    if value.is_empty() {
        return Err(RpcError::InvalidParams {
            message: format!("Parameter '{key}' must not be empty"),
        });
    }
    validate_string_param(value, key, MAX_ID_LENGTH)?;
    Ok(value.to_owned())
}

/// Extract a required integer parameter.
///
/// Floats with no fractional part are rejected along with every other
/// non-integer.
pub fn require_i64_param(params: Option<&Value>, key: &str) -> Result<i64, RpcError> {
    require_param(params, key)?
        .as_i64()
        .ok_or_else(|| RpcError::InvalidParams {
            message: format!("Parameter '{key}' must be an integer"),
        })
}

/// Extract an optional boolean parameter.
pub fn optional_bool_param(params: Option<&Value>, key: &str) -> Result<Option<bool>, RpcError> {
    match params.and_then(|p| p.get(key)) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(RpcError::InvalidParams {
            message: format!("Parameter '{key}' must be a boolean"),
        }),
    }
}

/// Validate that a string parameter does not exceed `max_len` bytes.
pub fn validate_string_param(value: &str, name: &str, max_len: usize) -> Result<(), RpcError> {
    if value.len() > max_len {
        return Err(RpcError::InvalidParams {
            message: format!(
                "Parameter '{name}' exceeds maximum length ({} > {max_len})",
                value.len()
            ),
        });
    }
    Ok(())
}

/// Sanitize an error message for client consumption.
///
/// Internal errors are replaced with a generic message.
pub fn sanitize_error_message(err: &RpcError) -> String {
    match err {
        RpcError::Internal { .. } => "Internal error".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn require_param_present() {
        let p = json!({"a": 1});
        assert_eq!(require_param(Some(&p), "a").unwrap(), &json!(1));
    }

    #[test]
    fn require_param_missing_or_null() {
        let p = json!({"a": null});
        assert!(require_param(Some(&p), "a").is_err());
        assert!(require_param(Some(&p), "b").is_err());
        assert!(require_param(None, "a").is_err());
    }

    #[test]
    fn require_string_ok() {
        let p = json!({"name": "x"});
        assert_eq!(require_string_param(Some(&p), "name").unwrap(), "x");
    }

    #[test]
    fn require_string_wrong_type_or_empty() {
        let p = json!({"n": 5, "e": ""});
        let err = require_string_param(Some(&p), "n").unwrap_err();
        assert!(err.to_string().contains("must be a string"));
        let err = require_string_param(Some(&p), "e").unwrap_err();
        assert!(err.to_string().contains("must not be empty"));
    }

    #[test]
    fn require_string_too_long() {
        let p = json!({"id": "x".repeat(MAX_ID_LENGTH + 1)});
        let err = require_string_param(Some(&p), "id").unwrap_err();
        assert_eq!(err.code(), "INVALID_PARAMS");
        assert!(err.to_string().contains("exceeds maximum length"));
    }

    #[test]
    fn require_i64_accepts_integers_only() {
        let p = json!({"a": 5, "b": -3, "c": 1.5, "d": "5", "e": 2.0});
        assert_eq!(require_i64_param(Some(&p), "a").unwrap(), 5);
        assert_eq!(require_i64_param(Some(&p), "b").unwrap(), -3);
        assert!(require_i64_param(Some(&p), "c").is_err());
        assert!(require_i64_param(Some(&p), "d").is_err());
        assert!(require_i64_param(Some(&p), "e").is_err());
    }

    #[test]
    fn optional_bool() {
        let p = json!({"t": true, "n": null, "bad": 1});
        assert_eq!(optional_bool_param(Some(&p), "t").unwrap(), Some(true));
        assert_eq!(optional_bool_param(Some(&p), "n").unwrap(), None);
        assert_eq!(optional_bool_param(Some(&p), "missing").unwrap(), None);
        assert!(optional_bool_param(Some(&p), "bad").is_err());
        assert_eq!(optional_bool_param(None, "t").unwrap(), None);
    }

    #[test]
    fn sanitize_internal_error_strips_details() {
        let err = RpcError::Internal {
            message: "lock poisoned at broker.rs:42".into(),
        };
        assert_eq!(sanitize_error_message(&err), "Internal error");
    }

    #[test]
    fn sanitize_preserves_user_errors() {
        let err = RpcError::InvalidParams {
            message: "Missing amount".into(),
        };
        assert_eq!(sanitize_error_message(&err), "Missing amount");
    }
}
