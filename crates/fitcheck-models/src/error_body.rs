//! User-visible failure document.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// `{ "error": ..., "kind": ... }` returned with every non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ErrorBody {
    /// Human-readable message
    pub error: String,
    /// Stable machine-readable error kind (e.g. `malformed_response`)
    pub kind: String,
}

impl ErrorBody {
    pub fn new(kind: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            kind: kind.into(),
        }
    }
}
