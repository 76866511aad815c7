//! Cross-context connection layer.
//!
//! This module implements the endpoint machinery on top of the wire
//! protocol: named connections with invoke/dispatch semantics, middleware
//! gating, proxying between connections, and transport binding with
//! lifecycle management.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐   Port    ┌────────────────┐   Port    ┌──────────┐
//! │  Inpage  │◄─────────►│ ContentScript  │◄─────────►│Background│
//! │Connection│           │ ProxyConnection│           │Connection│
//! └──────────┘           └────────────────┘           └──────────┘
//!                                                          ▲
//!                                                     Port │
//!                                                          ▼
//!                                                     ┌──────────┐
//!                                                     │  Popup   │
//!                                                     └──────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `base` | [`Connection`]: invoke, dispatch, correlation |
//! | `middleware` | Pre-dispatch authorization gates |
//! | `proxy` | [`ProxyConnection`]: method relaying |
//! | `port` | Duplex channel abstraction over platform messaging |
//! | `extension` | [`ExtensionConnection`]: transport binding + lifecycle |
//! | `socket` | WebSocket-bridged ports for cross-process contexts |

// ============================================================================
// Submodules
// ============================================================================

/// Named connection endpoint with invoke/dispatch semantics.
pub mod base;

/// Pre-dispatch middleware for invokation authorization.
pub mod middleware;

/// Relay binding two connections together.
pub mod proxy;

/// Port abstraction over the platform messaging primitive.
pub mod port;

/// Connection bound to a platform port, with lifecycle management.
pub mod extension;

/// WebSocket-backed ports for cross-process contexts.
pub mod socket;

// ============================================================================
// Re-exports
// ============================================================================

pub use base::{
    CallbackFuture, Connection, DEFAULT_INVOKE_TIMEOUT, InvokationCallback, RegisteredCallback,
    Transport,
};
pub use extension::{ExtensionConnection, ReconnectPolicy};
pub use middleware::{
    AuthMiddleware, InvokationContext, Middleware, MiddlewareError, MiddlewareErrorKind,
    MiddlewareResult, OriginMiddleware, Session, SessionProvider,
};
pub use port::{Port, PortConnector, PortInfo};
pub use proxy::ProxyConnection;
pub use socket::{SocketListener, dial};
