//! Pre-dispatch middleware for invokation authorization.
//!
//! Middlewares run before a registered callback, in registration order,
//! with simple short-circuit composition: the first failure becomes the
//! caller's rejection and the callback never executes.
//!
//! Two variants cover the wallet's gating needs:
//!
//! - [`AuthMiddleware`] — requires a present, unexpired session.
//! - [`OriginMiddleware`] — requires the caller's page origin to be on an
//!   allow-list.

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::protocol::{EndpointName, Method};

// ============================================================================
// InvokationContext
// ============================================================================

/// What a middleware gets to look at before the callback runs.
#[derive(Debug, Clone)]
pub struct InvokationContext {
    /// The invoked method.
    pub method: Method,

    /// Logical endpoint the invokation came from.
    pub source: EndpointName,

    /// Page origin of the sender, when the transport knows it.
    ///
    /// In-process ports have no origin; socket ports capture the HTTP
    /// `Origin` header at the handshake.
    pub origin: Option<Url>,
}

// ============================================================================
// MiddlewareError
// ============================================================================

/// Rejection raised by a middleware.
///
/// Becomes the invoking side's error; the callback is never executed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct MiddlewareError {
    /// Rejection category.
    pub kind: MiddlewareErrorKind,
    /// Human-readable reason.
    pub reason: String,
}

/// Categories of middleware rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiddlewareErrorKind {
    /// No valid session backing the call.
    Unauthorized,
    /// The caller's origin is not allowed.
    Forbidden,
}

impl MiddlewareError {
    /// Creates an unauthorized rejection.
    #[inline]
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self {
            kind: MiddlewareErrorKind::Unauthorized,
            reason: reason.into(),
        }
    }

    /// Creates a forbidden rejection.
    #[inline]
    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self {
            kind: MiddlewareErrorKind::Forbidden,
            reason: reason.into(),
        }
    }
}

/// Result alias for middleware application.
pub type MiddlewareResult = StdResult<(), MiddlewareError>;

// ============================================================================
// Middleware
// ============================================================================

/// A pre-dispatch check that can block a handler from executing.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Passes (`Ok`) or rejects the invokation with a reason.
    async fn apply(&self, context: &InvokationContext) -> MiddlewareResult;
}

// ============================================================================
// Session
// ============================================================================

/// An authenticated wallet session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Opaque backend session token.
    pub token: String,

    /// Wall-clock expiry, if the backend issued one.
    pub expires_at: Option<SystemTime>,
}

impl Session {
    /// Creates a session without an expiry.
    #[inline]
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_at: None,
        }
    }

    /// Creates a session expiring at the given instant.
    #[inline]
    #[must_use]
    pub fn with_expiry(token: impl Into<String>, expires_at: SystemTime) -> Self {
        Self {
            token: token.into(),
            expires_at: Some(expires_at),
        }
    }

    /// Returns `true` if the expiry has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at <= SystemTime::now())
    }
}

/// Read-only access to the current session.
///
/// The application state store is an opaque collaborator; this is the one
/// slice of it the connection layer needs.
pub trait SessionProvider: Send + Sync {
    /// Returns the active session, if any.
    fn active_session(&self) -> Option<Session>;
}

// ============================================================================
// AuthMiddleware
// ============================================================================

/// Requires a present, non-empty, unexpired session.
pub struct AuthMiddleware {
    sessions: Arc<dyn SessionProvider>,
}

impl AuthMiddleware {
    /// Creates the middleware over a session source.
    #[must_use]
    pub fn new(sessions: Arc<dyn SessionProvider>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl Middleware for AuthMiddleware {
    async fn apply(&self, _context: &InvokationContext) -> MiddlewareResult {
        let Some(session) = self.sessions.active_session() else {
            return Err(MiddlewareError::unauthorized("no active session"));
        };

        if session.token.is_empty() {
            return Err(MiddlewareError::unauthorized("empty session token"));
        }

        if session.is_expired() {
            return Err(MiddlewareError::unauthorized("session expired"));
        }

        Ok(())
    }
}

// ============================================================================
// OriginMiddleware
// ============================================================================

/// Requires the sender's page origin to be on an allow-list.
///
/// Comparison is by RFC 6454 origin (scheme + host + port); paths and
/// fragments on the configured URLs are ignored.
pub struct OriginMiddleware {
    allowed: Vec<Url>,
}

impl OriginMiddleware {
    /// Creates the middleware from the allowed origins.
    #[must_use]
    pub fn new(allowed: impl IntoIterator<Item = Url>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }
}

#[async_trait]
impl Middleware for OriginMiddleware {
    async fn apply(&self, context: &InvokationContext) -> MiddlewareResult {
        let Some(origin) = context.origin.as_ref() else {
            return Err(MiddlewareError::forbidden(format!(
                "caller origin unknown for {}",
                context.method
            )));
        };

        let allowed = self
            .allowed
            .iter()
            .any(|candidate| candidate.origin() == origin.origin());

        if allowed {
            Ok(())
        } else {
            Err(MiddlewareError::forbidden(format!(
                "origin {} not allowed for {}",
                origin, context.method
            )))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    struct FixedSessions(Option<Session>);

    impl SessionProvider for FixedSessions {
        fn active_session(&self) -> Option<Session> {
            self.0.clone()
        }
    }

    fn context(origin: Option<&str>) -> InvokationContext {
        InvokationContext {
            method: Method::StakeRequest,
            source: EndpointName::ContentScript,
            origin: origin.map(|o| Url::parse(o).expect("valid url")),
        }
    }

    #[tokio::test]
    async fn test_auth_passes_with_valid_session() {
        let sessions = Arc::new(FixedSessions(Some(Session::new("token-123"))));
        let middleware = AuthMiddleware::new(sessions);

        assert!(middleware.apply(&context(None)).await.is_ok());
    }

    #[tokio::test]
    async fn test_auth_rejects_missing_session() {
        let middleware = AuthMiddleware::new(Arc::new(FixedSessions(None)));

        let err = middleware.apply(&context(None)).await.unwrap_err();
        assert_eq!(err.kind, MiddlewareErrorKind::Unauthorized);
    }

    #[tokio::test]
    async fn test_auth_rejects_expired_session() {
        let expired = Session::with_expiry("token", SystemTime::now() - Duration::from_secs(1));
        let middleware = AuthMiddleware::new(Arc::new(FixedSessions(Some(expired))));

        let err = middleware.apply(&context(None)).await.unwrap_err();
        assert_eq!(err.kind, MiddlewareErrorKind::Unauthorized);
        assert!(err.reason.contains("expired"));
    }

    #[tokio::test]
    async fn test_origin_allows_listed_origin() {
        let middleware =
            OriginMiddleware::new([Url::parse("https://wallet.example.com").unwrap()]);

        // Same origin, different path.
        let ctx = context(Some("https://wallet.example.com/staking"));
        assert!(middleware.apply(&ctx).await.is_ok());
    }

    #[tokio::test]
    async fn test_origin_rejects_unlisted_origin() {
        let middleware =
            OriginMiddleware::new([Url::parse("https://wallet.example.com").unwrap()]);

        let err = middleware
            .apply(&context(Some("https://evil.example.com")))
            .await
            .unwrap_err();
        assert_eq!(err.kind, MiddlewareErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn test_origin_rejects_unknown_origin() {
        let middleware =
            OriginMiddleware::new([Url::parse("https://wallet.example.com").unwrap()]);

        let err = middleware.apply(&context(None)).await.unwrap_err();
        assert_eq!(err.kind, MiddlewareErrorKind::Forbidden);
    }
}
