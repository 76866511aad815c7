//! Error types for the wallet messaging core.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use wallet_bridge::{Result, Error};
//!
//! async fn example(connection: &Connection) -> Result<()> {
//!     let address = connection
//!         .invoke(Method::GetAccountAddress, vec![])
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Dispatch | [`Error::Middleware`], [`Error::HandlerNotRegistered`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`], [`Error::RequestTimeout`], [`Error::TooManyPending`] |
//! | Approval | [`Error::RequestDeclined`], [`Error::RequestExpired`], [`Error::PopupFailed`] |
//! | Wallet | [`Error::CredentialNotFound`], [`Error::CredentialsNotFound`] |
//! | Protocol | [`Error::Remote`], [`Error::Protocol`], [`Error::InvalidArgument`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] |
//!
//! Local dispatch failures are converted into [`RemoteError`] response
//! payloads at the dispatch boundary (see [`Error::to_remote`]) so the
//! transport layer never carries business errors as platform exceptions.

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::connection::middleware::{MiddlewareError, MiddlewareErrorKind};
use crate::identifiers::RequestId;
use crate::protocol::method::Method;
use crate::protocol::message::{RemoteError, RemoteErrorKind};

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Dispatch Errors
    // ========================================================================
    /// A middleware rejected the invokation before the handler ran.
    #[error(transparent)]
    Middleware(#[from] MiddlewareError),

    /// No handler is registered for the invoked method.
    ///
    /// Surfaced as an explicit error response instead of leaving the
    /// caller pending forever.
    #[error("No handler registered for {method}")]
    HandlerNotRegistered {
        /// The unhandled method.
        method: Method,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Transport-level failure.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Establishing a connection exceeded its deadline.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The connection was torn down.
    ///
    /// Every invokation still pending on the connection is rejected with
    /// this error.
    #[error("Connection closed")]
    ConnectionClosed,

    /// An invokation's response did not arrive within its timeout.
    #[error("Invokation {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The invokation that timed out.
        request_id: RequestId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The connection refused a new invokation at its pending cap.
    #[error("Too many pending invokations: {pending}/{max}")]
    TooManyPending {
        /// Current number of pending invokations.
        pending: usize,
        /// Maximum allowed.
        max: usize,
    },

    // ========================================================================
    // Approval Errors
    // ========================================================================
    /// The user declined an approval-gated request.
    #[error("Verification request {id} was declined")]
    RequestDeclined {
        /// The declined request.
        id: RequestId,
    },

    /// An approval-gated request ran out its deadline.
    #[error("Verification request {id} timed out")]
    RequestExpired {
        /// The expired request.
        id: RequestId,
    },

    /// The approval popup could not be opened.
    #[error("Could not open approval popup: {message}")]
    PopupFailed {
        /// Description of the window-service failure.
        message: String,
    },

    // ========================================================================
    // Wallet Errors
    // ========================================================================
    /// A credential id did not resolve to a stored credential.
    #[error("Credential not found: {id}")]
    CredentialNotFound {
        /// The missing credential id.
        id: String,
    },

    /// No stored credential satisfies the requested level/validity.
    #[error("No matching credentials found")]
    CredentialsNotFound,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// The counterpart settled an invokation with an error payload.
    #[error("Remote {kind:?} error: {message}")]
    Remote {
        /// Failure category from the wire.
        kind: RemoteErrorKind,
        /// Counterpart's description.
        message: String,
    },

    /// Protocol violation or unparseable message.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Invalid argument in an invokation's args tuple.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a handler-not-registered error.
    #[inline]
    pub fn handler_not_registered(method: Method) -> Self {
        Self::HandlerNotRegistered { method }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(request_id: RequestId, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            request_id,
            timeout_ms,
        }
    }

    /// Creates a pending-cap error.
    #[inline]
    pub fn too_many_pending(pending: usize, max: usize) -> Self {
        Self::TooManyPending { pending, max }
    }

    /// Creates a declined-request error.
    #[inline]
    pub fn request_declined(id: RequestId) -> Self {
        Self::RequestDeclined { id }
    }

    /// Creates an expired-request error.
    #[inline]
    pub fn request_expired(id: RequestId) -> Self {
        Self::RequestExpired { id }
    }

    /// Creates a popup-failure error.
    #[inline]
    pub fn popup_failed(message: impl Into<String>) -> Self {
        Self::PopupFailed {
            message: message.into(),
        }
    }

    /// Creates a credential-not-found error.
    #[inline]
    pub fn credential_not_found(id: impl Into<String>) -> Self {
        Self::CredentialNotFound { id: id.into() }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. }
                | Self::RequestTimeout { .. }
                | Self::RequestExpired { .. }
                | Self::Remote {
                    kind: RemoteErrorKind::Timeout,
                    ..
                }
        )
    }

    /// Returns `true` if this is a connection/transport error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::WebSocket(_)
                | Self::Remote {
                    kind: RemoteErrorKind::Connection,
                    ..
                }
        )
    }

    /// Returns `true` if the user actively declined the request.
    ///
    /// Distinguishes a deliberate decline from transport failures so the
    /// UI can skip retry affordances.
    #[inline]
    #[must_use]
    pub fn is_user_declined(&self) -> bool {
        matches!(
            self,
            Self::RequestDeclined { .. }
                | Self::Remote {
                    kind: RemoteErrorKind::Declined,
                    ..
                }
        )
    }
}

// ============================================================================
// Wire Conversion
// ============================================================================

impl Error {
    /// Converts the error into the payload sent back in a [`Response`].
    ///
    /// [`Response`]: crate::protocol::Response
    #[must_use]
    pub fn to_remote(&self) -> RemoteError {
        let kind = match self {
            Self::Middleware(err) => match err.kind {
                MiddlewareErrorKind::Unauthorized => RemoteErrorKind::Unauthorized,
                MiddlewareErrorKind::Forbidden => RemoteErrorKind::Forbidden,
            },
            Self::HandlerNotRegistered { .. } => RemoteErrorKind::HandlerNotRegistered,
            Self::RequestDeclined { .. } => RemoteErrorKind::Declined,
            Self::RequestTimeout { .. }
            | Self::ConnectionTimeout { .. }
            | Self::RequestExpired { .. } => RemoteErrorKind::Timeout,
            Self::Connection { .. } | Self::ConnectionClosed | Self::WebSocket(_) | Self::Io(_) => {
                RemoteErrorKind::Connection
            }
            Self::Remote { kind, .. } => *kind,
            _ => RemoteErrorKind::Handler,
        };

        RemoteError::new(kind, self.to_string())
    }
}

impl From<RemoteError> for Error {
    fn from(error: RemoteError) -> Self {
        Self::Remote {
            kind: error.kind,
            message: error.message,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
