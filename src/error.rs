use miette::Diagnostic;
use thiserror::Error;

/// Result type for slicer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Custom error types for the trace slicer
#[derive(Error, Debug, Diagnostic, Clone)]
pub enum Error {
    #[error("I/O error: {0}")]
    #[diagnostic(code(trace_slicer::io_error))]
    Io(String),

    #[error("JSON error: {0}")]
    #[diagnostic(code(trace_slicer::json_error))]
    Json(String),

    #[error("Invalid program: {message}")]
    #[diagnostic(code(trace_slicer::invalid_program))]
    InvalidProgram { message: String },

    #[error("Invalid descriptor: {descriptor}")]
    #[diagnostic(code(trace_slicer::invalid_descriptor))]
    InvalidDescriptor { descriptor: String },

    #[error("Unknown method id {method}")]
    #[diagnostic(code(trace_slicer::unknown_method))]
    UnknownMethod { method: u32 },

    #[error("Unknown instruction {index} in method {method}")]
    #[diagnostic(code(trace_slicer::unknown_instruction))]
    UnknownInstruction { method: u32, index: u32 },

    #[error("No control dependences cached for instruction {index} of method {method}")]
    #[diagnostic(
        code(trace_slicer::missing_control_dependences),
        help("the control dependence cache must cover every instruction of an analysed method")
    )]
    MissingControlDependences { method: u32, index: u32 },

    #[error("Invalid slicing criterion '{criterion}': {message}")]
    #[diagnostic(
        code(trace_slicer::invalid_criterion),
        help("expected <class>.<method>[:<line>][(<occurrence>)][:<variables>]")
    )]
    InvalidCriterion { criterion: String, message: String },

    #[error("Trace error: {message}")]
    #[diagnostic(code(trace_slicer::trace_error))]
    Trace { message: String },

    #[error("Trace producer failed: {message}")]
    #[diagnostic(code(trace_slicer::producer_failure))]
    ProducerFailure { message: String },

    #[error("Backward pass was interrupted")]
    #[diagnostic(code(trace_slicer::interrupted))]
    Interrupted,

    #[error("Internal error: {message}")]
    #[diagnostic(code(trace_slicer::internal_error))]
    Internal { message: String },
}

impl Error {
    /// Create an invalid program error
    pub fn invalid_program(message: impl Into<String>) -> Self {
        Error::InvalidProgram {
            message: message.into(),
        }
    }

    /// Create a trace error
    pub fn trace(message: impl Into<String>) -> Self {
        Error::Trace {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            message: message.into(),
        }
    }

    /// Whether this error is a cooperative interruption
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Error::Interrupted)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err.to_string())
    }
}
