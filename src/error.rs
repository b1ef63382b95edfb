//! Error types for the mdns-lifecycle library
//!
//! Parse errors are returned synchronously to the caller. Everything that happens
//! after a request has been submitted to the resolver is delivered through the
//! operation callback as an [`ErrorCode`].

use std::{
    error::Error as StdError,
    fmt,
    io,
    path::{Path, PathBuf},
    sync::Mutex,
};

/// Resolver status codes, in the DNS-SD numeric space
pub mod codes {
    /// Unclassified resolver failure
    pub const UNKNOWN: i32 = -65537;
    /// A request parameter was rejected
    pub const BAD_PARAM: i32 = -65540;
    /// The requested instance name is already in use
    pub const NAME_CONFLICT: i32 = -65548;
    /// The resolver daemon is not running or went away
    pub const SERVICE_NOT_RUNNING: i32 = -65563;
}

/// The primary error type for the mdns-lifecycle crate
#[derive(Debug)]
pub enum MdnsError {
    /// The service description file does not exist
    FileNotFound {
        /// Path that was requested
        path: PathBuf,
    },
    /// The description is empty or not valid JSON
    MalformedJson {
        /// Origin of the document
        path: PathBuf,
        /// Line of the parser error (1-based, 0 when unknown)
        line: usize,
        /// Column of the parser error (1-based, 0 when unknown)
        column: usize,
        /// Parser message
        message: String,
    },
    /// The JSON document does not match the service description schema
    InvalidFormat {
        /// Origin of the document
        path: PathBuf,
        /// Which check failed
        reason: String,
    },
    /// I/O error while reading a description
    Io(io::Error),
    /// The `_<name>._<protocol>` registration type cannot be built
    InvalidRegistrationType(String),
    /// The resolver rejected the initial request
    SubmissionFailed {
        /// Resolver status code
        code: i32,
        /// Resolver message
        message: String,
    },
    /// The requested name is already in use on the network
    NameConflict {
        /// Fully qualified name that conflicted
        name: String,
    },
    /// The resolver reported a mid-session failure
    SessionError {
        /// Resolver status code
        code: i32,
        /// Resolver message
        message: String,
    },
    /// The readiness wait failed
    WaitFailed {
        /// OS error number, or -1 when the failure has none
        errno: i32,
        /// Underlying error text
        message: String,
    },
    /// Invalid engine configuration
    Configuration(String),
}

impl fmt::Display for MdnsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FileNotFound { path } => {
                write!(f, "Service description file not found: {}", path.display())
            }
            Self::MalformedJson { path, line, column, message } => write!(
                f,
                "Malformed JSON in {} at line {line} column {column}: {message}",
                path.display()
            ),
            Self::InvalidFormat { path, reason } => {
                write!(f, "Invalid JSON format for {} file: {reason}", path.display())
            }
            Self::Io(err) => write!(f, "I/O error: {err}"),
            Self::InvalidRegistrationType(msg) => write!(f, "Invalid registration type: {msg}"),
            Self::SubmissionFailed { code, message } => {
                write!(f, "Resolver request failed ({code}): {message}")
            }
            Self::NameConflict { name } => {
                write!(f, "Name in use, please choose another {name}")
            }
            Self::SessionError { code, message } => {
                write!(f, "Resolver session error ({code}): {message}")
            }
            Self::WaitFailed { errno, message } => {
                write!(f, "Readiness wait failed (errno {errno}): {message}")
            }
            Self::Configuration(msg) => write!(f, "Configuration error: {msg}"),
        }
    }
}

impl StdError for MdnsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for MdnsError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// Common result type for library operations
pub type Result<T> = std::result::Result<T, MdnsError>;

impl MdnsError {
    /// Create a new invalid format error
    pub fn invalid_format<P: AsRef<Path>, S: Into<String>>(path: P, reason: S) -> Self {
        Self::InvalidFormat {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Create a new invalid registration type error
    pub fn invalid_registration_type<S: Into<String>>(msg: S) -> Self {
        Self::InvalidRegistrationType(msg.into())
    }

    /// Create a new submission error
    pub fn submission_failed<S: Into<String>>(code: i32, message: S) -> Self {
        Self::SubmissionFailed {
            code,
            message: message.into(),
        }
    }

    /// Create a new session error
    pub fn session<S: Into<String>>(code: i32, message: S) -> Self {
        Self::SessionError {
            code,
            message: message.into(),
        }
    }

    /// Create a new wait failure from an I/O error
    pub fn wait_failed(err: &io::Error) -> Self {
        Self::WaitFailed {
            errno: err.raw_os_error().unwrap_or(-1),
            message: err.to_string(),
        }
    }

    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// Code delivered to operation callbacks for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NameConflict { .. } => ErrorCode::NameConflict,
            Self::SubmissionFailed { code, .. } => ErrorCode::SubmissionFailed(*code),
            Self::SessionError { code, .. } => ErrorCode::SessionError(*code),
            Self::WaitFailed { errno, .. } => ErrorCode::WaitFailed(*errno),
            Self::InvalidRegistrationType(_) => ErrorCode::InvalidRegistrationType,
            Self::FileNotFound { .. }
            | Self::MalformedJson { .. }
            | Self::InvalidFormat { .. }
            | Self::Io(_)
            | Self::Configuration(_) => ErrorCode::SubmissionFailed(codes::BAD_PARAM),
        }
    }

    /// Check if the failure is a transient interruption worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Io(err) => err.kind() == io::ErrorKind::Interrupted,
            _ => false,
        }
    }
}

/// Status delivered alongside every callback invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The event reports success
    NoError,
    /// The advertised name is already taken
    NameConflict,
    /// The resolver rejected the initial request
    SubmissionFailed(i32),
    /// The resolver reported a failure during the session
    SessionError(i32),
    /// The readiness wait failed with the given errno
    WaitFailed(i32),
    /// The service name or protocol cannot form a registration type
    InvalidRegistrationType,
}

impl ErrorCode {
    /// Check if the code reports success
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::NoError)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoError => write!(f, "no error"),
            Self::NameConflict => write!(f, "name conflict"),
            Self::SubmissionFailed(code) => write!(f, "submission failed ({code})"),
            Self::SessionError(code) => write!(f, "session error ({code})"),
            Self::WaitFailed(errno) => write!(f, "wait failed (errno {errno})"),
            Self::InvalidRegistrationType => write!(f, "invalid registration type"),
        }
    }
}

static LAST_ERROR: Mutex<String> = Mutex::new(String::new());

/// Most recent diagnostic message recorded by any operation.
///
/// This is a process-wide convenience and is racy: concurrent operations overwrite
/// each other's messages. Use the [`ErrorCode`] passed to the callback, or
/// [`OperationHandle::last_error`](crate::operation::OperationHandle::last_error),
/// to learn what happened to a specific operation.
pub fn last_error() -> String {
    match LAST_ERROR.lock() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

pub(crate) fn record_last_error(message: &str) {
    tracing::warn!("{}", message);
    let mut guard = match LAST_ERROR.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    guard.clear();
    guard.push_str(message);
}
