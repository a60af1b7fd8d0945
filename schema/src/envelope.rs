//! Response envelope and the user-visible error taxonomy
//!
//! Every operation returns `{success, elapsed_seconds, ...}` with either the
//! typed payload flattened in, or an error body. An error body always carries
//! a concrete remediation suggestion and the reason the guard exists; no
//! error leaves the engine without telling the caller what to do next.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Short classification of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ErrorKind {
    /// The target PID does not exist (or exited before the operation)
    ProcessNotFound,
    /// The target is infrastructure or system critical; never killable
    ProtectedProcess,
    /// A descendant of the target is protected; the tree stays up
    ProtectedDescendant,
    /// The target was spawned by this server; pass the override flag
    UserSpawnedGuard,
    /// The target has children that would be orphaned
    HasChildren,
    /// The OS denied the operation
    PermissionDenied,
    /// The process survived every signal we were allowed to send
    TerminationFailed,
    /// The request itself was malformed or out of bounds
    InvalidArgument,
    /// The command is not on the whitelist
    CommandNotAllowed,
    /// The operation ran out of its time budget
    Timeout,
    /// Unexpected failure; details are in the debug log
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ProcessNotFound => "ProcessNotFound",
            Self::ProtectedProcess => "ProtectedProcess",
            Self::ProtectedDescendant => "ProtectedDescendant",
            Self::UserSpawnedGuard => "UserSpawnedGuard",
            Self::HasChildren => "HasChildren",
            Self::PermissionDenied => "PermissionDenied",
            Self::TerminationFailed => "TerminationFailed",
            Self::InvalidArgument => "InvalidArgument",
            Self::CommandNotAllowed => "CommandNotAllowed",
            Self::Timeout => "Timeout",
            Self::Internal => "Internal",
        };
        f.write_str(s)
    }
}

/// The three-field error body every failed response carries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ErrorBody {
    /// Short classification
    pub error: ErrorKind,
    /// A concrete next action for the caller
    pub suggestion: String,
    /// Why the guard or failure exists
    pub developer_hint: String,
    /// Structured context (child lists, verdict reasons, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl ErrorBody {
    /// Build an error body; suggestion and hint are mandatory by design
    #[must_use]
    pub fn new(
        error: ErrorKind,
        suggestion: impl Into<String>,
        developer_hint: impl Into<String>,
    ) -> Self {
        Self {
            error,
            suggestion: suggestion.into(),
            developer_hint: developer_hint.into(),
            detail: None,
        }
    }

    /// Attach structured context to the body
    #[must_use]
    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// The envelope wrapped around every operation result
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct ToolResponse {
    /// Whether the operation succeeded
    pub success: bool,
    /// Wall-clock duration of the operation in seconds
    pub elapsed_seconds: f64,
    /// Typed payload, flattened into the envelope on success
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Error body on failure
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ErrorBody>,
}

impl ToolResponse {
    /// Successful response with a typed payload
    ///
    /// # Panics
    ///
    /// Panics if the payload fails to serialize, which would be a programming
    /// error in the reply type itself.
    #[must_use]
    pub fn ok<T: Serialize>(elapsed_seconds: f64, payload: &T) -> Self {
        Self {
            success: true,
            elapsed_seconds,
            payload: Some(
                serde_json::to_value(payload).expect("reply types always serialize"),
            ),
            failure: None,
        }
    }

    /// Failed response carrying the three-field error body
    #[must_use]
    pub fn fail(elapsed_seconds: f64, failure: ErrorBody) -> Self {
        Self {
            success: false,
            elapsed_seconds,
            payload: None,
            failure: Some(failure),
        }
    }

    /// One-word outcome class for the operation log
    #[must_use]
    pub fn outcome_class(&self) -> &'static str {
        match &self.failure {
            None => "ok",
            Some(body) => match body.error {
                ErrorKind::Internal => "internal",
                _ => "rejected",
            },
        }
    }
}
