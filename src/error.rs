//! Error handling for odeflow
//!
//! Every mutating API returns [`Result`]. The error carries enough detail
//! for logs, and [`OdeError::code`] collapses it into the small enumerated
//! [`ResultCode`] set that callers branch on.

use thiserror::Error;

/// Main error type for odeflow operations
#[derive(Error, Debug)]
pub enum OdeError {
    /// A name used in a lookup or relationship call does not exist
    #[error("'{name}' was not found")]
    NotFound { name: String },

    /// A create call used a name that is already registered
    #[error("name '{0}' is not unique")]
    DuplicateName(String),

    /// The action is already in the trigger's action list
    #[error("action '{action}' is already added to trigger '{trigger}'")]
    DuplicateAction { trigger: String, action: String },

    /// The probe handler is already attached to a pad
    #[error("handler '{handler}' is already attached to '{component}'")]
    AlreadyAttached { handler: String, component: String },

    /// The object is still referenced by another object
    #[error("'{name}' is in use by '{user}'")]
    InUse { name: String, user: String },

    /// The call is not legal in the current pipeline state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A configuration value is out of range
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// An engine or device could not be acquired
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// A broker connection or publish failed
    #[error("connection failure: {0}")]
    ConnectionFailure(String),

    /// Configuration loading/saving errors
    #[error("configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<OdeError>,
    },
}

impl OdeError {
    pub(crate) fn not_found(name: impl Into<String>) -> Self {
        OdeError::NotFound { name: name.into() }
    }

    pub(crate) fn in_use(name: impl Into<String>, user: impl Into<String>) -> Self {
        OdeError::InUse {
            name: name.into(),
            user: user.into(),
        }
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        OdeError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The enumerated result code for this error.
    pub fn code(&self) -> ResultCode {
        match self {
            OdeError::NotFound { .. } => ResultCode::NotFound,
            OdeError::DuplicateName(_) => ResultCode::DuplicateName,
            OdeError::DuplicateAction { .. } => ResultCode::DuplicateAction,
            OdeError::AlreadyAttached { .. } => ResultCode::AlreadyAttached,
            OdeError::InUse { .. } => ResultCode::InUse,
            OdeError::InvalidState(_) => ResultCode::InvalidState,
            OdeError::InvalidParameter(_) | OdeError::Config(_) => ResultCode::InvalidParameter,
            OdeError::ResourceUnavailable(_) | OdeError::Io(_) => ResultCode::ResourceUnavailable,
            OdeError::ConnectionFailure(_) => ResultCode::ConnectionFailure,
            OdeError::WithContext { source, .. } => source.code(),
        }
    }
}

/// Enumerated outcome of a mutating call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Success,
    NotFound,
    DuplicateName,
    DuplicateAction,
    AlreadyAttached,
    InUse,
    InvalidState,
    InvalidParameter,
    ResourceUnavailable,
    ConnectionFailure,
}

impl ResultCode {
    /// Collapse any result into its code; `Ok` is `Success`.
    pub fn from_result<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => ResultCode::Success,
            Err(e) => e.code(),
        }
    }

    pub fn is_success(self) -> bool {
        self == ResultCode::Success
    }

    /// Stable string form, suitable for printing at the end of a setup sequence.
    pub fn as_str(self) -> &'static str {
        match self {
            ResultCode::Success => "DSL_RESULT_SUCCESS",
            ResultCode::NotFound => "DSL_RESULT_NAME_NOT_FOUND",
            ResultCode::DuplicateName => "DSL_RESULT_NAME_NOT_UNIQUE",
            ResultCode::DuplicateAction => "DSL_RESULT_ODE_TRIGGER_ACTION_NOT_UNIQUE",
            ResultCode::AlreadyAttached => "DSL_RESULT_PPH_ALREADY_ATTACHED",
            ResultCode::InUse => "DSL_RESULT_NAME_IN_USE",
            ResultCode::InvalidState => "DSL_RESULT_INVALID_STATE",
            ResultCode::InvalidParameter => "DSL_RESULT_INVALID_INPUT_PARAM",
            ResultCode::ResourceUnavailable => "DSL_RESULT_RESOURCE_UNAVAILABLE",
            ResultCode::ConnectionFailure => "DSL_RESULT_CONNECTION_FAILURE",
        }
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result type alias for odeflow operations
pub type Result<T> = std::result::Result<T, OdeError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}
