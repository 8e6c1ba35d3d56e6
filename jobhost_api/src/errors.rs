// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use crate::function_location::FunctionLocation;

/// A path template or resource name that cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("unterminated token starting at position {position} in '{template}'")]
    UnterminatedToken { template: String, position: usize },
    #[error("unexpected '}}' at position {position} in '{template}'")]
    UnexpectedClosingBrace { template: String, position: usize },
    #[error("invalid token name '{name}' in '{template}'")]
    InvalidTokenName { template: String, name: String },
    #[error("token '{name}' appears more than once in '{template}'")]
    DuplicateToken { template: String, name: String },
    #[error("tokens must be separated by a literal in '{template}'")]
    AdjacentTokens { template: String },
    #[error("container name '{0}' must not contain tokens")]
    TokenInContainerName(String),
    #[error("invalid container name '{name}': {reason}")]
    InvalidContainerName { name: String, reason: String },
    #[error("invalid blob name '{name}': {reason}")]
    InvalidBlobName { name: String, reason: String },
    #[error("invalid queue name '{name}': {reason}")]
    InvalidQueueName { name: String, reason: String },
}

/// Invoke-time failure to turn a static binding into a concrete value.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BindError {
    #[error("no value for token '{token}' required by '{template}'")]
    MissingToken { token: String, template: String },
    #[error("no value supplied for parameter '{parameter}'")]
    MissingArgument { parameter: String },
    #[error("parameter '{parameter}' expects {expected} but was given {actual}")]
    TypeMismatch { parameter: String, expected: String, actual: String },
    #[error("resource '{resource}' not found")]
    ResourceNotFound { resource: String },
    #[error("trigger value '{value}' does not match '{template}'")]
    TriggerMismatch { value: String, template: String },
    #[error("payload of parameter '{parameter}' is invalid: {detail}")]
    InvalidPayload { parameter: String, detail: String },
    #[error("no connection configured for {0}")]
    MissingConnection(String),
    #[error("binding kind '{0}' is not registered")]
    UnsupportedBindingKind(String),
    #[error(transparent)]
    Format(#[from] FormatError),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IndexErrorKind {
    #[error(transparent)]
    MalformedPath(#[from] FormatError),
    /// Tokens consumed by the bindings but produced by none of them.
    #[error("unbound route parameter(s) {}", .0.join(", "))]
    UnboundRouteToken(Vec<String>),
    #[error("unsupported binding kind '{0}'")]
    UnsupportedBindingKind(String),
    #[error("more than one trigger parameter: {0:?}")]
    MultipleTriggers(Vec<String>),
    #[error("duplicate function location")]
    DuplicateFunction,
    #[error("invalid binding: {0}")]
    InvalidBinding(String),
}

/// Index-time error, tagged with the function and, when known, the parameter.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub struct IndexError {
    pub location: FunctionLocation,
    pub parameter: Option<String>,
    pub kind: IndexErrorKind,
}

impl IndexError {
    pub fn new(location: &FunctionLocation, parameter: Option<&str>, kind: IndexErrorKind) -> Self {
        Self {
            location: location.clone(),
            parameter: parameter.map(|p| p.to_string()),
            kind,
        }
    }
}

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.parameter {
            Some(parameter) => write!(f, "error indexing {} (parameter '{}'): {}", self.location, parameter, self.kind),
            None => write!(f, "error indexing {}: {}", self.location, self.kind),
        }
    }
}

/// A dequeued request references a function absent from the function table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("function {0} not found")]
pub struct FunctionNotFoundError(pub FunctionLocation);

/// Failure reported by a durable store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("queue '{0}' does not exist")]
    QueueNotFound(String),
    #[error("container '{0}' does not exist")]
    ContainerNotFound(String),
    #[error("blob '{0}' does not exist")]
    BlobNotFound(String),
    #[error("lease on message '{0}' is no longer held")]
    LeaseLost(String),
    #[error("operation timed out")]
    Timeout,
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Timeout | StoreError::Backend(_) | StoreError::QueueNotFound(_))
    }
}
