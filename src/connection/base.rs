//! Named connection endpoint with invoke/dispatch semantics.
//!
//! A [`Connection`] is one logical endpoint of the cross-context protocol:
//! it sends [`Invokation`]s through a [`Transport`], correlates incoming
//! [`Response`]s with pending calls by id, and dispatches incoming
//! invokations to registered per-method callbacks behind their middleware
//! chains.
//!
//! # Event Flow
//!
//! ```text
//! invoke(m, args) ──► pending[id] = waiter ──► transport.post(Invokation)
//!                                                        │
//!                     waiter ◄── pending.remove(id) ◄── Response
//!
//! Invokation ──► middlewares ──► callback ──► transport.post(Response)
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::{EndpointName, Invokation, Method, Response, WireMessage};

use super::middleware::{InvokationContext, Middleware};

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for an invokation round trip.
///
/// Every invoke is bounded; an unmatched method on the remote side fails
/// instead of hanging forever.
pub const DEFAULT_INVOKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum pending invokations before new ones are rejected.
const MAX_PENDING_INVOKATIONS: usize = 100;

// ============================================================================
// Types
// ============================================================================

/// Future returned by an invokation callback.
pub type CallbackFuture = BoxFuture<'static, Result<Value>>;

/// Handler for one method: receives the args tuple and the logical source
/// endpoint of the invokation.
pub type InvokationCallback =
    Box<dyn Fn(Vec<Value>, EndpointName) -> CallbackFuture + Send + Sync>;

/// A registered handler with its middleware chain.
pub struct RegisteredCallback {
    callback: InvokationCallback,
    middlewares: Vec<Arc<dyn Middleware>>,
}

type CallbackMap = FxHashMap<Method, Arc<RegisteredCallback>>;
type PendingMap = FxHashMap<RequestId, oneshot::Sender<Result<Value>>>;

// ============================================================================
// Transport
// ============================================================================

/// One-way hand-off of a wire message toward the counterpart context.
///
/// Delivery is at-most-once: a successful `post` means the message was
/// accepted by the channel, not that the peer processed it. There is no
/// retry at this layer.
pub trait Transport: Send + Sync {
    /// Posts a message, failing synchronously if the channel is down.
    fn post(&self, message: WireMessage) -> Result<()>;
}

// ============================================================================
// Connection
// ============================================================================

/// A named endpoint that can invoke remote methods and serve its own.
///
/// Cheap to clone: clones share the callback registry, the pending map and
/// the transport. Constructed explicitly and passed down; there is no
/// process-wide instance.
pub struct Connection {
    /// This endpoint's logical name.
    name: EndpointName,

    /// Default counterpart for [`Connection::invoke`].
    target: EndpointName,

    /// Outgoing message channel.
    transport: Arc<dyn Transport>,

    /// Registered handlers by method.
    callbacks: Arc<RwLock<CallbackMap>>,

    /// Unsettled invokations by correlation id.
    pending: Arc<Mutex<PendingMap>>,
}

impl Clone for Connection {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            target: self.target,
            transport: Arc::clone(&self.transport),
            callbacks: Arc::clone(&self.callbacks),
            pending: Arc::clone(&self.pending),
        }
    }
}

impl Connection {
    /// Creates an endpoint over a transport.
    #[must_use]
    pub fn new(name: EndpointName, target: EndpointName, transport: Arc<dyn Transport>) -> Self {
        Self {
            name,
            target,
            transport,
            callbacks: Arc::new(RwLock::new(CallbackMap::default())),
            pending: Arc::new(Mutex::new(PendingMap::default())),
        }
    }

    /// This endpoint's logical name.
    #[inline]
    #[must_use]
    pub const fn name(&self) -> EndpointName {
        self.name
    }

    /// The default counterpart endpoint.
    #[inline]
    #[must_use]
    pub const fn target(&self) -> EndpointName {
        self.target
    }

    /// Returns the number of unsettled invokations.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns `true` if a handler is registered for the method.
    #[inline]
    #[must_use]
    pub fn has_callback(&self, method: Method) -> bool {
        self.callbacks.read().contains_key(&method)
    }

    /// Returns the number of registered handlers.
    #[inline]
    #[must_use]
    pub fn callback_count(&self) -> usize {
        self.callbacks.read().len()
    }
}

// ============================================================================
// Connection - Invoke
// ============================================================================

impl Connection {
    /// Invokes a method on the default counterpart with the default timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the transport is down
    /// - [`Error::RequestTimeout`] if no response arrives in time
    /// - [`Error::Remote`] if the counterpart settled with an error
    /// - [`Error::TooManyPending`] at the pending cap
    pub async fn invoke(&self, method: Method, args: Vec<Value>) -> Result<Value> {
        self.invoke_with(method, args, self.target, DEFAULT_INVOKE_TIMEOUT)
            .await
    }

    /// Invokes a method on a specific destination endpoint.
    ///
    /// Used on multi-target transports where one port fans out to several
    /// logical counterparts.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::invoke`].
    pub async fn invoke_to(
        &self,
        method: Method,
        args: Vec<Value>,
        destination: EndpointName,
    ) -> Result<Value> {
        self.invoke_with(method, args, destination, DEFAULT_INVOKE_TIMEOUT)
            .await
    }

    /// Invokes a method with a custom timeout.
    ///
    /// Approval-gated flows take longer than plain RPC; callers bound them
    /// explicitly instead of inheriting the 30s default.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::invoke`].
    pub async fn invoke_with_timeout(
        &self,
        method: Method,
        args: Vec<Value>,
        invoke_timeout: Duration,
    ) -> Result<Value> {
        self.invoke_with(method, args, self.target, invoke_timeout)
            .await
    }

    /// Invokes a method with explicit destination and timeout.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::invoke`].
    pub async fn invoke_with(
        &self,
        method: Method,
        args: Vec<Value>,
        destination: EndpointName,
        invoke_timeout: Duration,
    ) -> Result<Value> {
        {
            let pending = self.pending.lock();
            if pending.len() >= MAX_PENDING_INVOKATIONS {
                warn!(
                    pending = pending.len(),
                    max = MAX_PENDING_INVOKATIONS,
                    "Too many pending invokations"
                );
                return Err(Error::too_many_pending(
                    pending.len(),
                    MAX_PENDING_INVOKATIONS,
                ));
            }
        }

        let invokation = Invokation::new(method, args, self.name, destination);
        let id = invokation.id;

        let (waiter_tx, waiter_rx) = oneshot::channel();
        self.pending.lock().insert(id, waiter_tx);

        if let Err(e) = self.transport.post(WireMessage::Invokation(invokation)) {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        trace!(%id, %method, %destination, "Invokation sent");

        match timeout(invoke_timeout, waiter_rx).await {
            Ok(Ok(result)) => result,
            // Waiter dropped without settling: the connection closed.
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                self.pending.lock().remove(&id);
                debug!(%id, %method, "Invokation timed out");
                Err(Error::request_timeout(id, invoke_timeout.as_millis() as u64))
            }
        }
    }
}

// ============================================================================
// Connection - Registration
// ============================================================================

impl Connection {
    /// Registers a handler for a method.
    ///
    /// Registering the same method twice replaces the previous handler
    /// (and logs it); re-initialization stays idempotent.
    pub fn on(
        &self,
        method: Method,
        callback: InvokationCallback,
        middlewares: Vec<Arc<dyn Middleware>>,
    ) {
        let registered = Arc::new(RegisteredCallback {
            callback,
            middlewares,
        });

        let previous = self.callbacks.write().insert(method, registered);
        if previous.is_some() {
            warn!(%method, name = %self.name, "Replacing registered handler");
        }
    }
}

// ============================================================================
// Connection - Dispatch
// ============================================================================

impl Connection {
    /// Routes one incoming wire message.
    ///
    /// Invokations addressed to this endpoint are dispatched on their own
    /// task, so a handler that itself invokes over this connection cannot
    /// deadlock the receive loop. Responses settle the matching pending
    /// entry; unknown or duplicate correlation ids are dropped.
    pub fn handle_message(&self, message: WireMessage, origin: Option<Url>) {
        match message {
            WireMessage::Invokation(invokation) => {
                if invokation.destination != self.name {
                    warn!(
                        %invokation.id,
                        destination = %invokation.destination,
                        name = %self.name,
                        "Dropping invokation addressed to another endpoint"
                    );
                    return;
                }

                let connection = self.clone();
                tokio::spawn(async move {
                    connection.dispatch_invokation(invokation, origin).await;
                });
            }

            WireMessage::Response(response) => self.settle(response),
        }
    }

    /// Runs middleware chain and callback for one invokation, then posts
    /// the response under the same correlation id.
    async fn dispatch_invokation(&self, invokation: Invokation, origin: Option<Url>) {
        let id = invokation.id;
        let method = invokation.method;

        let Some(registered) = self.callbacks.read().get(&method).map(Arc::clone) else {
            debug!(%id, %method, "No handler registered");
            self.post_response(Response::failure(
                id,
                Error::handler_not_registered(method).to_remote(),
            ));
            return;
        };

        let context = InvokationContext {
            method,
            source: invokation.source,
            origin,
        };

        // First middleware failure wins; the callback never runs.
        for middleware in &registered.middlewares {
            if let Err(rejection) = middleware.apply(&context).await {
                debug!(%id, %method, reason = %rejection, "Middleware rejected invokation");
                self.post_response(Response::failure(
                    id,
                    Error::from(rejection).to_remote(),
                ));
                return;
            }
        }

        let outcome = (registered.callback)(invokation.args, invokation.source).await;

        let response = match outcome {
            Ok(result) => Response::success(id, result),
            Err(error) => {
                debug!(%id, %method, %error, "Handler failed");
                Response::failure(id, error.to_remote())
            }
        };

        self.post_response(response);
    }

    /// Settles a pending invokation by correlation id.
    fn settle(&self, response: Response) {
        let id = response.id;
        let waiter = self.pending.lock().remove(&id);

        match waiter {
            Some(waiter) => {
                let _ = waiter.send(response.into_result());
                trace!(%id, "Invokation settled");
            }
            // Late, duplicate, or already timed-out locally.
            None => debug!(%id, "Dropping response with unknown correlation id"),
        }
    }

    fn post_response(&self, response: Response) {
        let id = response.id;
        if let Err(e) = self.transport.post(WireMessage::Response(response)) {
            warn!(%id, error = %e, "Failed to post response");
        }
    }
}

// ============================================================================
// Connection - Teardown
// ============================================================================

impl Connection {
    /// Rejects every pending invokation with [`Error::ConnectionClosed`]
    /// and clears the pending map.
    ///
    /// Called when the underlying transport is torn down; in-flight calls
    /// must fail rather than hang once the context disappears.
    pub fn close(&self) {
        let pending: Vec<_> = {
            let mut pending = self.pending.lock();
            pending.drain().collect()
        };

        let count = pending.len();
        for (_, waiter) in pending {
            let _ = waiter.send(Err(Error::ConnectionClosed));
        }

        if count > 0 {
            debug!(name = %self.name, count, "Rejected pending invokations on close");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures_util::FutureExt;
    use serde_json::json;
    use tokio::sync::mpsc;

    use crate::connection::middleware::{MiddlewareError, MiddlewareResult};
    use crate::protocol::RemoteErrorKind;

    /// Transport posting into an unbounded channel.
    struct SenderTransport(mpsc::UnboundedSender<WireMessage>);

    impl Transport for SenderTransport {
        fn post(&self, message: WireMessage) -> Result<()> {
            self.0.send(message).map_err(|_| Error::ConnectionClosed)
        }
    }

    /// Transport that always fails synchronously.
    struct DeadTransport;

    impl Transport for DeadTransport {
        fn post(&self, _message: WireMessage) -> Result<()> {
            Err(Error::ConnectionClosed)
        }
    }

    /// Transport that accepts and drops everything (no peer).
    struct SinkTransport;

    impl Transport for SinkTransport {
        fn post(&self, _message: WireMessage) -> Result<()> {
            Ok(())
        }
    }

    /// Two endpoints wired through crossed channels with pump tasks.
    fn linked_pair(a: EndpointName, b: EndpointName) -> (Connection, Connection) {
        let (tx_ab, mut rx_ab) = mpsc::unbounded_channel();
        let (tx_ba, mut rx_ba) = mpsc::unbounded_channel();

        let conn_a = Connection::new(a, b, Arc::new(SenderTransport(tx_ab)));
        let conn_b = Connection::new(b, a, Arc::new(SenderTransport(tx_ba)));

        let receiver_b = conn_b.clone();
        tokio::spawn(async move {
            while let Some(message) = rx_ab.recv().await {
                receiver_b.handle_message(message, None);
            }
        });

        let receiver_a = conn_a.clone();
        tokio::spawn(async move {
            while let Some(message) = rx_ba.recv().await {
                receiver_a.handle_message(message, None);
            }
        });

        (conn_a, conn_b)
    }

    /// Middleware with a fixed verdict.
    struct FixedMiddleware(Option<MiddlewareError>);

    #[async_trait::async_trait]
    impl Middleware for FixedMiddleware {
        async fn apply(&self, _context: &InvokationContext) -> MiddlewareResult {
            match &self.0 {
                None => Ok(()),
                Some(err) => Err(err.clone()),
            }
        }
    }

    #[tokio::test]
    async fn test_invoke_resolves_with_callback_return() {
        let (page, background) =
            linked_pair(EndpointName::ContentScript, EndpointName::Background);

        background.on(
            Method::GetAccountAddress,
            Box::new(|_args, _source| async { Ok(json!("0xabc")) }.boxed()),
            vec![],
        );

        let result = page
            .invoke(Method::GetAccountAddress, vec![])
            .await
            .expect("invoke");
        assert_eq!(result, json!("0xabc"));
    }

    #[tokio::test]
    async fn test_invoke_preserves_arbitrary_args_shape() {
        let (page, background) =
            linked_pair(EndpointName::ContentScript, EndpointName::Background);

        background.on(
            Method::StakeRequest,
            Box::new(|args, source| {
                async move { Ok(json!({ "args": args, "from": source })) }.boxed()
            }),
            vec![],
        );

        let args = vec![json!("100"), json!({"token": "FCL"}), json!([1, 2, 3])];
        let result = page
            .invoke(Method::StakeRequest, args.clone())
            .await
            .expect("invoke");

        assert_eq!(result["args"], json!(args));
        assert_eq!(result["from"], json!("content_script"));
    }

    #[tokio::test]
    async fn test_middleware_short_circuit_blocks_callback() {
        let (page, background) =
            linked_pair(EndpointName::ContentScript, EndpointName::Background);

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_callback = Arc::clone(&calls);

        background.on(
            Method::StakeRequest,
            Box::new(move |_args, _source| {
                calls_in_callback.fetch_add(1, Ordering::SeqCst);
                async { Ok(Value::Null) }.boxed()
            }),
            vec![
                Arc::new(FixedMiddleware(Some(MiddlewareError::unauthorized(
                    "no active session",
                )))),
                // Never reached: first failure wins.
                Arc::new(FixedMiddleware(Some(MiddlewareError::forbidden("later")))),
            ],
        );

        let err = page
            .invoke(Method::StakeRequest, vec![])
            .await
            .expect_err("should reject");

        assert!(matches!(
            err,
            Error::Remote {
                kind: RemoteErrorKind::Unauthorized,
                ..
            }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_passing_middlewares_run_in_order_until_failure() {
        let (page, background) =
            linked_pair(EndpointName::ContentScript, EndpointName::Background);

        background.on(
            Method::StakeRequest,
            Box::new(|_args, _source| async { Ok(Value::Null) }.boxed()),
            vec![
                Arc::new(FixedMiddleware(None)),
                Arc::new(FixedMiddleware(Some(MiddlewareError::forbidden(
                    "bad origin",
                )))),
            ],
        );

        let err = page
            .invoke(Method::StakeRequest, vec![])
            .await
            .expect_err("should reject");
        assert!(matches!(
            err,
            Error::Remote {
                kind: RemoteErrorKind::Forbidden,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unregistered_method_rejects_explicitly() {
        let (page, _background) =
            linked_pair(EndpointName::ContentScript, EndpointName::Background);

        let err = page
            .invoke(Method::WithdrawRequest, vec![])
            .await
            .expect_err("should reject");

        assert!(matches!(
            err,
            Error::Remote {
                kind: RemoteErrorKind::HandlerNotRegistered,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_duplicate_registration_replaces_handler() {
        let (page, background) =
            linked_pair(EndpointName::ContentScript, EndpointName::Background);

        let first_calls = Arc::new(AtomicUsize::new(0));
        let first_calls_cb = Arc::clone(&first_calls);

        background.on(
            Method::GetBackendSession,
            Box::new(move |_args, _source| {
                first_calls_cb.fetch_add(1, Ordering::SeqCst);
                async { Ok(json!("first")) }.boxed()
            }),
            vec![],
        );
        background.on(
            Method::GetBackendSession,
            Box::new(|_args, _source| async { Ok(json!("second")) }.boxed()),
            vec![],
        );

        let result = page
            .invoke(Method::GetBackendSession, vec![])
            .await
            .expect("invoke");

        assert_eq!(result, json!("second"));
        assert_eq!(first_calls.load(Ordering::SeqCst), 0);
        assert_eq!(background.callback_count(), 1);
    }

    #[tokio::test]
    async fn test_correlation_survives_out_of_order_responses() {
        let (page, background) =
            linked_pair(EndpointName::ContentScript, EndpointName::Background);

        // Later calls answer sooner: delay shrinks as the arg grows.
        background.on(
            Method::GetSignedNonce,
            Box::new(|args, _source| {
                async move {
                    let n = args[0].as_u64().unwrap_or(0);
                    tokio::time::sleep(Duration::from_millis(50 - 5 * n)).await;
                    Ok(json!(n))
                }
                .boxed()
            }),
            vec![],
        );

        let invokes = (0..8u64).map(|n| {
            let page = page.clone();
            async move { (n, page.invoke(Method::GetSignedNonce, vec![json!(n)]).await) }
        });

        for (n, result) in futures_util::future::join_all(invokes).await {
            assert_eq!(result.expect("invoke"), json!(n));
        }
        assert_eq!(page.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_correlation_id_is_dropped() {
        let connection = Connection::new(
            EndpointName::Background,
            EndpointName::ContentScript,
            Arc::new(SinkTransport),
        );

        connection.handle_message(
            WireMessage::Response(Response::success(RequestId::generate(), json!(1))),
            None,
        );

        assert_eq!(connection.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_close_rejects_all_pending() {
        let connection = Connection::new(
            EndpointName::Popup,
            EndpointName::Background,
            Arc::new(SinkTransport),
        );

        let invokes: Vec<_> = (0..3)
            .map(|_| {
                let connection = connection.clone();
                tokio::spawn(async move {
                    connection
                        .invoke_with_timeout(
                            Method::GetAccountAddress,
                            vec![],
                            Duration::from_secs(10),
                        )
                        .await
                })
            })
            .collect();

        // Let all three reach the pending map before closing.
        while connection.pending_count() < 3 {
            tokio::task::yield_now().await;
        }

        connection.close();

        for invoke in invokes {
            let err = invoke.await.expect("join").expect_err("should reject");
            assert!(matches!(err, Error::ConnectionClosed));
        }
        assert_eq!(connection.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_synchronous_transport_failure_rejects_and_cleans_up() {
        let connection = Connection::new(
            EndpointName::Inpage,
            EndpointName::ContentScript,
            Arc::new(DeadTransport),
        );

        let err = connection
            .invoke(Method::VerifyConnectionRequest, vec![])
            .await
            .expect_err("should reject");

        assert!(matches!(err, Error::ConnectionClosed));
        assert_eq!(connection.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_invoke_times_out_and_cleans_up() {
        let connection = Connection::new(
            EndpointName::Inpage,
            EndpointName::ContentScript,
            Arc::new(SinkTransport),
        );

        let err = connection
            .invoke_with_timeout(
                Method::GetStakingDetailsRequest,
                vec![],
                Duration::from_millis(20),
            )
            .await
            .expect_err("should time out");

        assert!(err.is_timeout());
        assert_eq!(connection.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_invoke_to_overrides_destination() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection = Connection::new(
            EndpointName::Background,
            EndpointName::ContentScript,
            Arc::new(SenderTransport(tx)),
        );

        let invoker = connection.clone();
        tokio::spawn(async move {
            let _ = invoker
                .invoke_with(
                    Method::GetAccountAddress,
                    vec![],
                    EndpointName::Popup,
                    Duration::from_millis(20),
                )
                .await;
        });

        let posted = rx.recv().await.expect("posted message");
        match posted {
            WireMessage::Invokation(invokation) => {
                assert_eq!(invokation.destination, EndpointName::Popup);
                assert_eq!(invokation.source, EndpointName::Background);
            }
            WireMessage::Response(_) => panic!("expected invokation"),
        }
    }

    #[tokio::test]
    async fn test_invokation_for_other_endpoint_is_dropped() {
        let connection = Connection::new(
            EndpointName::Background,
            EndpointName::ContentScript,
            Arc::new(SinkTransport),
        );

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_cb = Arc::clone(&calls);
        connection.on(
            Method::StakeRequest,
            Box::new(move |_args, _source| {
                calls_cb.fetch_add(1, Ordering::SeqCst);
                async { Ok(Value::Null) }.boxed()
            }),
            vec![],
        );

        connection.handle_message(
            WireMessage::Invokation(Invokation::new(
                Method::StakeRequest,
                vec![],
                EndpointName::ContentScript,
                EndpointName::Popup,
            )),
            None,
        );

        tokio::task::yield_now().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
