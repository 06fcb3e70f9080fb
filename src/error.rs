//! Error types exposed by the Rust SDK.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

/// Shared underlying cause attached to an SDK error.
pub type ErrorCause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level error type for all SDK operations.
#[derive(Debug, Error, Clone)]
pub enum SdkError {
    /// Raised when the Claude Code CLI binary cannot be located.
    #[error(transparent)]
    CliNotFound(#[from] CliNotFoundError),

    /// Raised when the CLI cannot be started or its pipes are unusable.
    #[error(transparent)]
    CliConnection(#[from] CliConnectionError),

    /// Raised when the CLI process exits with an error.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// Raised when output from the CLI is not valid JSON.
    #[error(transparent)]
    JsonDecode(#[from] JsonDecodeError),

    /// Raised when JSON cannot be mapped onto a typed message.
    #[error(transparent)]
    MessageParse(#[from] MessageParseError),

    /// Raised when a control exchange fails or cannot be correlated.
    #[error(transparent)]
    ControlProtocol(#[from] ControlProtocolError),

    /// Raised when a tool permission request is rejected.
    #[error(transparent)]
    PermissionDenied(#[from] PermissionDeniedError),
}

impl SdkError {
    /// Human message of the error without its cause.
    pub fn message(&self) -> &str {
        match self {
            SdkError::CliNotFound(err) => err.message(),
            SdkError::CliConnection(err) => err.message(),
            SdkError::Process(err) => err.message(),
            SdkError::JsonDecode(err) => err.message(),
            SdkError::MessageParse(err) => err.message(),
            SdkError::ControlProtocol(err) => err.message(),
            SdkError::PermissionDenied(err) => err.message(),
        }
    }
}

/// Implements the shared `message`/`cause` surface, `Display` as `message` or
/// `message: cause`, and `Error::source` returning the cause itself.
macro_rules! error_with_cause {
    ($($name:ident),+ $(,)?) => {$(
        impl $name {
            pub fn with_cause<E>(mut self, cause: E) -> Self
            where
                E: std::error::Error + Send + Sync + 'static,
            {
                self.cause = Some(Arc::new(cause));
                self
            }

            pub fn message(&self) -> &str {
                &self.message
            }

            pub fn cause(&self) -> Option<&ErrorCause> {
                self.cause.as_ref()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match &self.cause {
                    Some(cause) => write!(f, "{}: {}", self.message, cause),
                    None => f.write_str(&self.message),
                }
            }
        }

        impl std::error::Error for $name {
            fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
                self.cause
                    .as_deref()
                    .map(|cause| cause as &(dyn std::error::Error + 'static))
            }
        }
    )+};
}

error_with_cause!(
    CliNotFoundError,
    CliConnectionError,
    ProcessError,
    JsonDecodeError,
    MessageParseError,
    ControlProtocolError,
    PermissionDeniedError,
);

/// Raised when Claude Code is not found or not installed.
#[derive(Debug, Clone)]
pub struct CliNotFoundError {
    message: String,
    cli_path: Option<PathBuf>,
    cause: Option<ErrorCause>,
}

impl CliNotFoundError {
    pub fn new(message: impl Into<String>, cli_path: Option<PathBuf>) -> Self {
        let message = match cli_path.as_ref() {
            Some(path) => format!("{}: {}", message.into(), path.display()),
            None => message.into(),
        };
        Self {
            message,
            cli_path,
            cause: None,
        }
    }

    pub fn cli_path(&self) -> Option<&PathBuf> {
        self.cli_path.as_ref()
    }
}

/// Raised when unable to start or talk to the Claude Code CLI.
#[derive(Debug, Clone)]
pub struct CliConnectionError {
    message: String,
    cause: Option<ErrorCause>,
}

impl CliConnectionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }
}

/// Raised when the CLI process fails.
#[derive(Debug, Clone)]
pub struct ProcessError {
    message: String,
    exit_code: Option<i32>,
    stderr: Option<String>,
    cause: Option<ErrorCause>,
}

impl ProcessError {
    pub fn new(message: impl Into<String>, exit_code: Option<i32>, stderr: Option<String>) -> Self {
        let mut message = message.into();

        if let Some(ref stderr) = stderr {
            if !stderr.is_empty() {
                message = format!("{message}\nError output: {stderr}");
            }
        }

        Self {
            message,
            exit_code,
            stderr,
            cause: None,
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn stderr(&self) -> Option<&str> {
        self.stderr.as_deref()
    }
}

/// Raised when output from the CLI cannot be decoded as JSON.
#[derive(Debug, Clone)]
pub struct JsonDecodeError {
    message: String,
    line: Option<String>,
    cause: Option<ErrorCause>,
}

impl JsonDecodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
            cause: None,
        }
    }

    /// Attach the offending input, truncated to a short snippet.
    pub fn with_line(mut self, line: impl AsRef<str>) -> Self {
        self.line = Some(line.as_ref().chars().take(100).collect());
        self
    }

    pub fn line(&self) -> Option<&str> {
        self.line.as_deref()
    }
}

/// Raised when a CLI message cannot be parsed into a typed structure.
#[derive(Debug, Clone)]
pub struct MessageParseError {
    message: String,
    data: Option<Value>,
    cause: Option<ErrorCause>,
}

impl MessageParseError {
    pub fn new(message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            message: message.into(),
            data,
            cause: None,
        }
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }
}

/// Raised when a control request fails, times out or cannot be correlated.
#[derive(Debug, Clone)]
pub struct ControlProtocolError {
    message: String,
    cause: Option<ErrorCause>,
}

impl ControlProtocolError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }
}

/// Raised when the CLI refuses a tool permission request.
#[derive(Debug, Clone)]
pub struct PermissionDeniedError {
    message: String,
    cause: Option<ErrorCause>,
}

impl PermissionDeniedError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }
}
