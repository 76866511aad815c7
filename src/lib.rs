//! Wallet Bridge - Cross-context messaging core for a browser-extension
//! wallet.
//!
//! This library implements the connection layer of a decentralized-identity
//! wallet extension: a request/response protocol that lets code running in
//! isolated browser contexts invoke named methods on one another
//! asynchronously.
//!
//! # Architecture
//!
//! Four logical contexts participate, each an independent execution unit
//! communicating solely through asynchronous message passing:
//!
//! - **Inpage**: the provider script injected into the page
//! - **ContentScript**: relays between the page and the extension
//! - **Background**: the extension service hosting the wallet handlers
//! - **Popup**: the approval UI
//!
//! Key design principles:
//!
//! - Every invokation carries a correlation id and a timeout; an unmatched
//!   method fails explicitly instead of hanging
//! - Handlers are gated by composable middlewares (session, page origin)
//! - [`ProxyConnection`] relays methods between two connections without
//!   either knowing the other's transport
//! - Connections are constructed explicitly and passed down; there is no
//!   process-wide instance
//!
//! # Quick Start
//!
//! ```no_run
//! use futures_util::FutureExt;
//! use serde_json::json;
//! use wallet_bridge::connection::{ExtensionConnection, Port, PortInfo};
//! use wallet_bridge::{EndpointName, Method, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // One port pair links two same-process contexts.
//!     let (background_port, content_port) = Port::pair(
//!         PortInfo::new(EndpointName::ContentScript),
//!         PortInfo::new(EndpointName::Background),
//!     );
//!
//!     let background = ExtensionConnection::attach(
//!         EndpointName::Background,
//!         EndpointName::ContentScript,
//!         background_port,
//!     );
//!     let content = ExtensionConnection::attach(
//!         EndpointName::ContentScript,
//!         EndpointName::Background,
//!         content_port,
//!     );
//!
//!     background.on(
//!         Method::GetAccountAddress,
//!         Box::new(|_args, _source| async { Ok(json!("0xabc")) }.boxed()),
//!         vec![],
//!     );
//!
//!     let address = content.invoke(Method::GetAccountAddress, vec![]).await?;
//!     println!("account: {address}");
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`connection`] | Endpoints, middleware, proxying, transport binding |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Wire message types (Invokation / Response) |
//! | [`wallet`] | Background broker and capability traits |
//! | [`watcher`] | Timeout-bounded approval observers |
//!
//! # Features
//!
//! - **Bounded**: every invoke times out; disconnects reject all pending
//!   calls instead of leaving them hanging
//! - **Gated**: authorization and origin checks run before any handler
//! - **Transparent relaying**: proxy methods across context boundaries
//! - **At-most-once delivery**: no hidden retries at any layer

// ============================================================================
// Modules
// ============================================================================

/// Cross-context connection layer.
///
/// This module contains the endpoint machinery:
///
/// - [`Connection`] - named endpoint with invoke/dispatch semantics
/// - [`ProxyConnection`] - relay binding two connections
/// - [`ExtensionConnection`] - transport-bound endpoint with lifecycle
pub mod connection;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for protocol entities.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Wire protocol message types.
///
/// Defines the JSON Invokation/Response records and the method namespace.
pub mod protocol;

/// Wallet application layer over the connection core.
///
/// The background broker and the capability traits it consumes.
pub mod wallet;

/// Timeout-bounded one-shot observers for approval-gated requests.
pub mod watcher;

// ============================================================================
// Re-exports
// ============================================================================

// Connection types
pub use connection::{
    AuthMiddleware, Connection, ExtensionConnection, Middleware, MiddlewareError,
    OriginMiddleware, ProxyConnection, ReconnectPolicy, Session, SessionProvider, Transport,
};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{RequestId, WindowId};

// Protocol types
pub use protocol::{
    EndpointName, Invokation, Method, RemoteError, RemoteErrorKind, Response, WireMessage,
};

// Wallet types
pub use wallet::{BackgroundBroker, WalletStore, WindowService};

// Watcher types
pub use watcher::RequestsWatcher;
