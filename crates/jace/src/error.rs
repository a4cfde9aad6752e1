//! Error types for the Jace bridge.
//!
//! Every fallible bridge operation returns [`Result`]. Failures raised inside
//! the host runtime arrive as [`Error::Foreign`] carrying the most specific
//! registered proxy type; everything else describes a failure of the bridge
//! itself (initialization, resolution, reference exhaustion, invariant
//! violations).

use crate::exception::ForeignException;
use std::fmt;

/// Errors produced by the bridge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The host runtime could not be created, found, or attached to.
    #[error("{message}")]
    RuntimeInit {
        /// Human-readable description including the failing operation
        message: String,
    },

    /// The runtime refused to allocate a local or global reference.
    #[error("{operation}: unable to create a new {kind} reference. {hint}")]
    ReferenceExhaustion {
        /// Operation that attempted the allocation
        operation: &'static str,
        /// `"local"` or `"global"`
        kind: &'static str,
        /// Likely cause
        hint: &'static str,
    },

    /// Class lookup failed.
    #[error("Unable to find the class, {name}.{}", CauseSuffix(.cause))]
    ClassNotFound {
        /// Class name as passed to the lookup
        name: String,
        /// Diagnostic of the underlying runtime failure
        cause: Option<String>,
    },

    /// Method or constructor lookup failed.
    #[error("Unable to find the method, {class}.{name} with signature {signature}.{}", CauseSuffix(.cause))]
    MethodNotFound {
        /// Declaring class name
        class: String,
        /// Method name (`<init>` for constructors)
        name: String,
        /// Attempted signature, e.g. `(II)I`
        signature: String,
        /// Diagnostic of the underlying runtime failure
        cause: Option<String>,
    },

    /// Field lookup failed.
    #[error("Unable to find the field, {class}.{name} with signature {signature}.{}", CauseSuffix(.cause))]
    FieldNotFound {
        /// Declaring class name
        class: String,
        /// Field name
        name: String,
        /// Attempted type signature
        signature: String,
        /// Diagnostic of the underlying runtime failure
        cause: Option<String>,
    },

    /// An exception raised inside the host runtime, translated to its proxy.
    #[error(transparent)]
    Foreign(ForeignException),

    /// The bridge invariants no longer hold.
    #[error("{message}")]
    RuntimeInterop {
        /// Human-readable description
        message: String,
    },

    /// Operation on a null foreign handle (checked builds only).
    #[error("Null pointer: {operation} on a null reference")]
    NullPointer {
        /// Operation that observed the null handle
        operation: &'static str,
    },

    /// Array index outside `0..length` (checked builds only).
    #[error("Array index out of bounds: index {index}, length {length}")]
    ArrayIndexOutOfBounds {
        /// Requested index
        index: i32,
        /// Array length
        length: i32,
    },
}

/// Result type for bridge operations.
pub type Result<T> = std::result::Result<T, Error>;

struct CauseSuffix<'a>(&'a Option<String>);

impl fmt::Display for CauseSuffix<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(cause) => write!(f, "\ncaused by:\n{cause}"),
            None => Ok(()),
        }
    }
}

impl Error {
    pub(crate) fn runtime_init(message: impl Into<String>) -> Self {
        Error::RuntimeInit {
            message: message.into(),
        }
    }

    pub(crate) fn interop(message: impl Into<String>) -> Self {
        Error::RuntimeInterop {
            message: message.into(),
        }
    }

    /// Appends `caused by` text from a secondary failure observed while
    /// diagnosing this one.
    #[must_use]
    pub fn caused_by(self, secondary: &Error) -> Self {
        let secondary = secondary.to_string();
        match self {
            Error::ClassNotFound { name, cause } => Error::ClassNotFound {
                name,
                cause: Some(chain(cause, secondary)),
            },
            Error::MethodNotFound {
                class,
                name,
                signature,
                cause,
            } => Error::MethodNotFound {
                class,
                name,
                signature,
                cause: Some(chain(cause, secondary)),
            },
            Error::FieldNotFound {
                class,
                name,
                signature,
                cause,
            } => Error::FieldNotFound {
                class,
                name,
                signature,
                cause: Some(chain(cause, secondary)),
            },
            Error::RuntimeInit { message } => Error::RuntimeInit {
                message: format!("{message}\ncaused by:\n{secondary}"),
            },
            Error::RuntimeInterop { message } => Error::RuntimeInterop {
                message: format!("{message}\ncaused by:\n{secondary}"),
            },
            other => other,
        }
    }

    /// Returns the translated foreign exception, if this is one.
    pub fn as_foreign(&self) -> Option<&ForeignException> {
        match self {
            Error::Foreign(e) => Some(e),
            _ => None,
        }
    }
}

fn chain(existing: Option<String>, secondary: String) -> String {
    match existing {
        Some(first) => format!("{first}\ncaused by:\n{secondary}"),
        None => secondary,
    }
}
