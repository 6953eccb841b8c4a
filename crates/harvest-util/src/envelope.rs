//! The envelope every public call returns.
//!
//! Fail-open callers surface `{ok: false, errors: [...]}` instead of raising;
//! the CLI maps `errors[]` to a non-zero exit code.

use serde::{Deserialize, Serialize};

/// Terminal status of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeStatus {
    Success,
    Skipped,
    Error,
}

/// Result wrapper for public operations: `{ok, status, errors[], payload}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub ok: bool,
    pub status: EnvelopeStatus,
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(flatten)]
    pub payload: T,
}

impl<T> Envelope<T> {
    /// Successful envelope with the given payload.
    #[must_use]
    pub fn success(payload: T) -> Self {
        Self {
            ok: true,
            status: EnvelopeStatus::Success,
            errors: Vec::new(),
            warnings: Vec::new(),
            payload,
        }
    }

    /// Skipped envelope (nothing to do); still `ok`.
    #[must_use]
    pub fn skipped(payload: T) -> Self {
        Self {
            ok: true,
            status: EnvelopeStatus::Skipped,
            errors: Vec::new(),
            warnings: Vec::new(),
            payload,
        }
    }

    /// Failed envelope carrying the errors that caused it.
    #[must_use]
    pub fn error(payload: T, errors: Vec<String>) -> Self {
        Self {
            ok: false,
            status: EnvelopeStatus::Error,
            errors,
            warnings: Vec::new(),
            payload,
        }
    }

    /// Attach warnings without changing the status.
    #[must_use]
    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize, Deserialize)]
    struct Payload {
        count: u32,
    }

    #[test]
    fn payload_is_flattened() {
        let env = Envelope::success(Payload { count: 3 });
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["ok"], json!(true));
        assert_eq!(value["status"], json!("success"));
        assert_eq!(value["count"], json!(3));
    }

    #[test]
    fn error_envelope_is_not_ok() {
        let env = Envelope::error(Payload { count: 0 }, vec!["boom".into()]);
        assert!(!env.ok);
        assert_eq!(env.errors, vec!["boom".to_string()]);
        assert_eq!(env.status, EnvelopeStatus::Error);
    }
}
