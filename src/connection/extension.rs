//! Connection bound to a platform port, with lifecycle management.
//!
//! [`ExtensionConnection`] wires a [`Connection`] to a [`Port`]: it spawns
//! the receive loop feeding base dispatch, maps port metadata into the
//! logical sender origin, detects peer disconnects, and optionally
//! reacquires ports through a [`PortConnector`].
//!
//! # Lifecycle
//!
//! 1. [`ExtensionConnection::attach`] — bind an established port
//! 2. [`ExtensionConnection::connect`] — acquire ports via connector,
//!    with bounded retry and reconnection per [`ReconnectPolicy`]
//! 3. On disconnect (peer or explicit), every pending invokation is
//!    rejected with `ConnectionClosed` — nothing is left hanging
//! 4. [`ExtensionConnection::disconnect`] — explicit teardown

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::Result;
use crate::protocol::{EndpointName, Method, WireMessage};

use super::base::{Connection, InvokationCallback};
use super::middleware::Middleware;
use super::port::{Port, PortConnector, PortTransport};

// ============================================================================
// Constants
// ============================================================================

/// Default delay between reconnect attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Default number of reconnect attempts after a dropped port.
const RECONNECT_ATTEMPTS: u32 = 3;

// ============================================================================
// ReconnectPolicy
// ============================================================================

/// How an [`ExtensionConnection`] handles a dropped port.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    /// Connect retries per acquisition; `0` also disables reconnection
    /// after a drop.
    pub max_attempts: u32,

    /// Delay between attempts.
    pub retry_delay: Duration,
}

impl ReconnectPolicy {
    /// Never retry or reconnect; the first drop is final.
    #[inline]
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 0,
            retry_delay: RECONNECT_DELAY,
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: RECONNECT_ATTEMPTS,
            retry_delay: RECONNECT_DELAY,
        }
    }
}

// ============================================================================
// SessionEnd
// ============================================================================

/// Why a port session stopped.
enum SessionEnd {
    /// The peer dropped its end.
    PeerClosed,
    /// Local shutdown was requested.
    Shutdown,
}

// ============================================================================
// ExtensionConnection
// ============================================================================

/// A [`Connection`] bound to the platform messaging transport.
pub struct ExtensionConnection {
    connection: Connection,
    transport: Arc<PortTransport>,
    connected: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
}

impl ExtensionConnection {
    /// Binds an already-established port and spawns the receive loop.
    #[must_use]
    pub fn attach(name: EndpointName, target: EndpointName, port: Port) -> Self {
        let Port {
            info,
            sender,
            receiver,
        } = port;

        let transport = Arc::new(PortTransport::new(sender));
        let connection = Connection::new(name, target, transport.clone());
        let connected = Arc::new(AtomicBool::new(true));
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        {
            let connection = connection.clone();
            let transport = Arc::clone(&transport);
            let connected = Arc::clone(&connected);
            tokio::spawn(async move {
                let _ = run_session(&connection, receiver, info.origin, &mut shutdown_rx).await;
                transport.detach();
                connected.store(false, Ordering::SeqCst);
                connection.close();
                debug!(name = %connection.name(), "Port session ended");
            });
        }

        info!(name = %name, peer = %info.peer, "Port attached");

        Self {
            connection,
            transport,
            connected,
            shutdown: shutdown_tx,
        }
    }

    /// Acquires a port through the connector and binds it, reacquiring on
    /// drops per the policy.
    ///
    /// # Errors
    ///
    /// Returns the connector's error once initial acquisition exhausts
    /// `policy.max_attempts` retries.
    pub async fn connect(
        name: EndpointName,
        target: EndpointName,
        connector: Arc<dyn PortConnector>,
        policy: ReconnectPolicy,
    ) -> Result<Self> {
        let port = acquire_port(connector.as_ref(), &policy).await?;

        let transport = Arc::new(PortTransport::detached_new());
        let connection = Connection::new(name, target, transport.clone());
        let connected = Arc::new(AtomicBool::new(false));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(supervise(
            connection.clone(),
            Arc::clone(&transport),
            connector,
            policy,
            Arc::clone(&connected),
            shutdown_rx,
            port,
        ));

        Ok(Self {
            connection,
            transport,
            connected,
            shutdown: shutdown_tx,
        })
    }

    /// The underlying endpoint, for handler registration and relaying.
    #[inline]
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// This endpoint's logical name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> EndpointName {
        self.connection.name()
    }

    /// Returns `true` while a port is bound.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Invokes a method on the counterpart. See [`Connection::invoke`].
    ///
    /// # Errors
    ///
    /// Same as [`Connection::invoke`].
    pub async fn invoke(&self, method: Method, args: Vec<Value>) -> Result<Value> {
        self.connection.invoke(method, args).await
    }

    /// Invokes with a custom timeout. See
    /// [`Connection::invoke_with_timeout`].
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
        self.connection
            .invoke_with_timeout(method, args, invoke_timeout)
            .await
    }

    /// Registers a handler. See [`Connection::on`].
    pub fn on(
        &self,
        method: Method,
        callback: InvokationCallback,
        middlewares: Vec<Arc<dyn Middleware>>,
    ) {
        self.connection.on(method, callback, middlewares);
    }

    /// Tears the connection down, rejecting all pending invokations.
    pub fn disconnect(&self) {
        let _ = self.shutdown.send(true);
        self.transport.detach();
        self.connected.store(false, Ordering::SeqCst);
        self.connection.close();
    }
}

// ============================================================================
// Session Loop
// ============================================================================

/// Pumps one port's incoming messages into base dispatch.
async fn run_session(
    connection: &Connection,
    mut receiver: mpsc::UnboundedReceiver<WireMessage>,
    origin: Option<Url>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> SessionEnd {
    loop {
        tokio::select! {
            message = receiver.recv() => match message {
                Some(message) => connection.handle_message(message, origin.clone()),
                None => {
                    debug!(name = %connection.name(), "Port closed by peer");
                    return SessionEnd::PeerClosed;
                }
            },

            _ = shutdown_rx.changed() => return SessionEnd::Shutdown,
        }
    }
}

/// Acquires a port with bounded retry.
async fn acquire_port(connector: &dyn PortConnector, policy: &ReconnectPolicy) -> Result<Port> {
    let mut attempt = 0u32;

    loop {
        match connector.connect().await {
            Ok(port) => return Ok(port),
            Err(error) if attempt < policy.max_attempts => {
                attempt += 1;
                warn!(%error, attempt, "Port connect failed, retrying");
                sleep(policy.retry_delay).await;
            }
            Err(error) => return Err(error),
        }
    }
}

/// Runs port sessions back to back, reacquiring on peer drops.
async fn supervise(
    connection: Connection,
    transport: Arc<PortTransport>,
    connector: Arc<dyn PortConnector>,
    policy: ReconnectPolicy,
    connected: Arc<AtomicBool>,
    mut shutdown_rx: watch::Receiver<bool>,
    first_port: Port,
) {
    let mut next_port = Some(first_port);

    loop {
        let port = match next_port.take() {
            Some(port) => port,
            None => match acquire_port(connector.as_ref(), &policy).await {
                Ok(port) => port,
                Err(error) => {
                    warn!(%error, "Reconnect failed, giving up");
                    break;
                }
            },
        };

        let Port {
            info,
            sender,
            receiver,
        } = port;

        transport.rebind(sender);
        connected.store(true, Ordering::SeqCst);
        info!(name = %connection.name(), peer = %info.peer, "Port attached");

        let end = run_session(&connection, receiver, info.origin, &mut shutdown_rx).await;

        transport.detach();
        connected.store(false, Ordering::SeqCst);
        connection.close();

        match end {
            SessionEnd::Shutdown => break,
            SessionEnd::PeerClosed if policy.max_attempts == 0 => break,
            SessionEnd::PeerClosed => debug!(name = %connection.name(), "Reconnecting"),
        }
    }

    debug!(name = %connection.name(), "Connection supervisor terminated");
}

// ============================================================================
// Tests
// ============================================================================
