use std::{backtrace::Backtrace, path::PathBuf};

use snafu::Snafu;
use thiserror::Error;

use crate::{
    dispatch::CallId,
    platform::{Feature, Platform},
    plugin::PluginState,
};

/// Coarse classification used by callers to decide how to surface an error.
/// Nothing in this crate retries on its own, whatever the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// bad field value or missing required field
    Validation,
    /// feature not declared, or not available on this OS in strict mode
    Capability,
    /// integration bug between this crate and the native plugin
    Protocol,
    /// the native side tried and failed
    Native,
    /// plugin handle not in a usable state
    Lifecycle,
}

#[derive(Snafu, Debug)]
#[snafu(visibility(pub(crate)))]
pub enum DispatchError {
    #[snafu(display("operation `{op}` is not exposed by the loaded plugin"))]
    UnknownOperation { op: String, backtrace: Backtrace },
    #[snafu(display(
        "async call to `{op}` returned an immediate payload of {len} bytes"
    ))]
    ProtocolViolation {
        op: String,
        len: usize,
        backtrace: Backtrace,
    },
    #[snafu(display("response carries neither `ok` nor `err`"))]
    MalformedResponse { backtrace: Backtrace },
    #[snafu(display(
        "response frame of {len} bytes exceeds the {max} byte limit"
    ))]
    FrameTooLarge { len: usize, max: usize },
    #[snafu(display("native call returned a null response pointer"))]
    NullResponse,
    #[snafu(display("JSON error: {source}"))]
    Json {
        source: serde_json::Error,
        backtrace: Backtrace,
    },
    #[snafu(display(
        "{message} (when: {})",
        when.as_deref().unwrap_or("unknown")
    ))]
    Native {
        message: String,
        when: Option<String>,
    },
    #[snafu(display("plugin is not loaded (state: {state})"))]
    PluginNotLoaded { state: PluginState },
    #[snafu(display("completion for call {call} was dropped before it fired"))]
    CompletionDropped { call: CallId },
    #[snafu(display("call {call} already has a registered completion"))]
    CallInFlight { call: CallId },
    #[snafu(display("async dispatch requires a running tokio runtime"))]
    NoRuntime,
}

impl From<serde_json::Error> for DispatchError {
    fn from(source: serde_json::Error) -> Self {
        DispatchError::Json {
            source,
            backtrace: Backtrace::capture(),
        }
    }
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::Native { .. } => ErrorKind::Native,
            DispatchError::PluginNotLoaded { .. }
            | DispatchError::NoRuntime => ErrorKind::Lifecycle,
            DispatchError::UnknownOperation { .. }
            | DispatchError::ProtocolViolation { .. }
            | DispatchError::MalformedResponse { .. }
            | DispatchError::FrameTooLarge { .. }
            | DispatchError::NullResponse
            | DispatchError::Json { .. }
            | DispatchError::CompletionDropped { .. }
            | DispatchError::CallInFlight { .. } => ErrorKind::Protocol,
        }
    }
}

#[derive(Snafu, Debug)]
#[snafu(visibility(pub(crate)))]
pub enum LoadError {
    #[snafu(display("a plugin load is already in progress"))]
    LoadInProgress,
    #[snafu(display(
        "plugin location `{location}` is not a local path or file:// URL"
    ))]
    UnsupportedLocation { location: String },
    #[snafu(display("plugin library not found at {}", path.display()))]
    LibraryNotFound { path: PathBuf },
    #[snafu(display("failed to open {}: {source}", path.display()))]
    Library {
        path: PathBuf,
        source: libloading::Error,
    },
    #[snafu(display("plugin does not export `{symbol}`: {source}"))]
    MissingSymbol {
        symbol: String,
        source: libloading::Error,
    },
    #[snafu(display("I/O error preparing {}: {source}", path.display()))]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("{message}"))]
    Loader { message: String },
}

impl LoadError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Lifecycle
    }
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notification instance must have a {0}")]
    MissingRequiredField(&'static str),
    #[error(
        "notification timeout must be a number greater than 0 (or 'never'), \
         got {0}"
    )]
    InvalidTimeout(i64),
    #[error("icon path must be a file:// URI, got `{0}`")]
    InvalidIconPath(String),
    #[error(
        "notification instance does not explicitly support {}",
        join_platforms(.platforms)
    )]
    CapabilityNotDeclared {
        feature: Feature,
        platforms: Vec<Platform>,
    },
    #[error("current operating system ({os}) does not support {feature}")]
    UnsupportedOnCurrentPlatform { os: String, feature: Feature },
    #[error("{message} (when: {})", .when.as_deref().unwrap_or("unknown"))]
    NativeDispatch {
        message: String,
        when: Option<String>,
    },
    #[error(transparent)]
    Dispatch(DispatchError),
}

impl From<DispatchError> for NotificationError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Native { message, when } => {
                NotificationError::NativeDispatch { message, when }
            }
            other => NotificationError::Dispatch(other),
        }
    }
}

impl NotificationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            NotificationError::MissingRequiredField(_)
            | NotificationError::InvalidTimeout(_)
            | NotificationError::InvalidIconPath(_) => ErrorKind::Validation,
            NotificationError::CapabilityNotDeclared { .. }
            | NotificationError::UnsupportedOnCurrentPlatform { .. } => {
                ErrorKind::Capability
            }
            NotificationError::NativeDispatch { .. } => ErrorKind::Native,
            NotificationError::Dispatch(err) => err.kind(),
        }
    }
}

fn join_platforms(platforms: &[Platform]) -> String {
    platforms
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", or ")
}
