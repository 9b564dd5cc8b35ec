use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    InvalidRequest,
    Conflict,
    ExecutableNotFound,
    EngineFailure,
    StreamError,
    RulesLoadFailure,
}

impl ErrorType {
    pub fn as_urn(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "urn:chat-relay:error:invalid_request",
            Self::Conflict => "urn:chat-relay:error:conflict",
            Self::ExecutableNotFound => "urn:chat-relay:error:executable_not_found",
            Self::EngineFailure => "urn:chat-relay:error:engine_failure",
            Self::StreamError => "urn:chat-relay:error:stream_error",
            Self::RulesLoadFailure => "urn:chat-relay:error:rules_load_failure",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "Invalid Request",
            Self::Conflict => "Conflict",
            Self::ExecutableNotFound => "Executable Not Found",
            Self::EngineFailure => "Engine Failure",
            Self::StreamError => "Stream Error",
            Self::RulesLoadFailure => "Rules Load Failure",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest => 400,
            Self::Conflict => 409,
            Self::ExecutableNotFound => 500,
            Self::EngineFailure => 502,
            Self::StreamError => 502,
            Self::RulesLoadFailure => 500,
        }
    }
}

/// RFC 7807 problem document returned on non-streaming failure paths.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub type_: String,
    pub title: String,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
}

impl ProblemDetails {
    pub fn new(error_type: ErrorType, detail: Option<String>) -> Self {
        Self {
            type_: error_type.as_urn().to_string(),
            title: error_type.title().to_string(),
            status: error_type.status_code(),
            detail,
            instance: None,
            extensions: Map::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
    #[error("request '{request_id}' is already in flight")]
    Conflict { request_id: String },
    #[error("claude executable not found{}", hint_suffix(.hint))]
    ExecutableNotFound { hint: Option<String> },
    #[error("engine failure: {message}")]
    EngineFailure { message: String },
    #[error("stream error: {message}")]
    StreamError { message: String },
    #[error("failed to load rules document: {message}")]
    RulesLoadFailure { message: String },
}

fn hint_suffix(hint: &Option<String>) -> String {
    match hint {
        Some(hint) => format!(" (tried {hint})"),
        None => String::new(),
    }
}

impl RelayError {
    pub fn error_type(&self) -> ErrorType {
        match self {
            Self::InvalidRequest { .. } => ErrorType::InvalidRequest,
            Self::Conflict { .. } => ErrorType::Conflict,
            Self::ExecutableNotFound { .. } => ErrorType::ExecutableNotFound,
            Self::EngineFailure { .. } => ErrorType::EngineFailure,
            Self::StreamError { .. } => ErrorType::StreamError,
            Self::RulesLoadFailure { .. } => ErrorType::RulesLoadFailure,
        }
    }

    pub fn to_problem_details(&self) -> ProblemDetails {
        let mut problem = ProblemDetails::new(self.error_type(), Some(self.to_string()));

        let mut extensions = Map::new();
        match self {
            Self::Conflict { request_id } => {
                extensions.insert("requestId".to_string(), Value::String(request_id.clone()));
            }
            Self::ExecutableNotFound { hint: Some(hint) } => {
                extensions.insert("hint".to_string(), Value::String(hint.clone()));
            }
            _ => {}
        }
        problem.extensions = extensions;
        problem
    }
}

impl From<RelayError> for ProblemDetails {
    fn from(value: RelayError) -> Self {
        value.to_problem_details()
    }
}

impl From<&RelayError> for ProblemDetails {
    fn from(value: &RelayError) -> Self {
        value.to_problem_details()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_maps_to_409_with_request_id_extension() {
        let err = RelayError::Conflict {
            request_id: "r1".to_string(),
        };
        let problem = err.to_problem_details();
        assert_eq!(problem.status, 409);
        assert_eq!(problem.type_, "urn:chat-relay:error:conflict");
        assert_eq!(
            problem.extensions.get("requestId"),
            Some(&Value::String("r1".to_string()))
        );
    }

    #[test]
    fn executable_not_found_mentions_hint() {
        let err = RelayError::ExecutableNotFound {
            hint: Some("/opt/claude".to_string()),
        };
        assert!(err.to_string().contains("/opt/claude"));
        assert_eq!(err.error_type().status_code(), 500);
    }

    #[test]
    fn problem_details_round_trips_through_json() {
        let problem = ProblemDetails::new(ErrorType::EngineFailure, Some("boom".to_string()));
        let json = serde_json::to_value(&problem).unwrap();
        assert_eq!(json["type"], "urn:chat-relay:error:engine_failure");
        assert_eq!(json["status"], 502);
        assert_eq!(json["detail"], "boom");
    }
}
