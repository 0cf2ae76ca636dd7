//! Error types for the benchmarking engine

use thiserror::Error;

use crate::params::ParamType;

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur while building or running a workflow
#[derive(Debug, Error)]
pub enum EngineError {
    /// Step kind name not recognized
    #[error("'{name}' is not a valid step; valid steps are: {valid:?}")]
    UnknownStep { name: String, valid: Vec<&'static str> },

    /// Method name not registered for a capability category
    #[error("'{name}' is not a valid {category} method; available methods are: {available:?}")]
    UnknownMethod {
        name: String,
        category: &'static str,
        available: Vec<&'static str>,
    },

    /// A mandatory parameter was neither supplied nor deferred to the pipeline
    #[error(
        "parameter '{0}' is mandatory, please provide a value! \
         If the value is produced by an upstream step of the pipeline, \
         declare it as `ParamSetting::FromPipeline`"
    )]
    MissingMandatoryParameter(String),

    /// A parameter value (or list element) failed the declared type check
    #[error(
        "{actual} is not a valid type for '{param}'; valid types are: {expected:?}. \
         If the value is produced by an upstream step of the pipeline, \
         declare it as `ParamSetting::FromPipeline`"
    )]
    InvalidParameterType {
        param: String,
        actual: ParamType,
        expected: Vec<ParamType>,
    },

    /// Expansion-axis lists had unequal lengths under align mode
    #[error("{expected} != {actual}: lengths of parameter lists for align mode must be equal")]
    AlignmentLengthMismatch { expected: usize, actual: usize },

    /// Expansion mode string not recognized
    #[error("'{0}' is not a valid mode; must be \"align\" or \"permute\"")]
    InvalidMode(String),

    /// A step requires more upstream steps than the workflow holds
    #[error(
        "not enough previous steps in the workflow for step {step}: \
         {available} were added, {required} are required"
    )]
    NotEnoughUpstreamSteps {
        step: &'static str,
        required: usize,
        available: usize,
    },

    /// Explicit input-step indices are malformed or out of range
    #[error("invalid input step reference for step {step}: {reason}")]
    InvalidInputStepReference { step: &'static str, reason: String },

    /// Number of positional inputs does not match the number of deferred parameters
    #[error("number of inputs to '{method}' must be {expected}, {provided} provided")]
    ArityMismatch {
        method: String,
        expected: usize,
        provided: usize,
    },

    /// A method invocation failed
    #[error("method execution failed: {0}")]
    ExecutionFailed(String),

    /// An artifact value had the wrong kind for its port
    #[error("artifact for port '{port}' has unexpected kind: {actual}")]
    PortValueMismatch { port: &'static str, actual: &'static str },

    /// Malformed persisted state (graph JSON, parameter CSV, descriptor)
    #[error("malformed {what}: {detail}")]
    Malformed { what: &'static str, detail: String },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Binary artifact codec error
    #[error("artifact codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Create an execution failed error with a message
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::ExecutionFailed(msg.into())
    }
}
