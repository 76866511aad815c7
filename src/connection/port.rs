//! Port abstraction over the platform messaging primitive.
//!
//! A [`Port`] is one end of a duplex message channel between two browser
//! contexts, carrying [`WireMessage`]s plus [`PortInfo`] metadata about
//! the peer. Same-process contexts use [`Port::pair`]; cross-process
//! contexts get a port bridged over WebSocket (see the `socket` module).

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::{EndpointName, WireMessage};

use super::base::Transport;

// ============================================================================
// PortInfo
// ============================================================================

/// Metadata about the context on the other end of a port.
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Logical endpoint of the peer.
    pub peer: EndpointName,

    /// Page origin of the peer, when the transport knows it.
    pub origin: Option<Url>,
}

impl PortInfo {
    /// Peer metadata without an origin (in-process contexts).
    #[inline]
    #[must_use]
    pub fn new(peer: EndpointName) -> Self {
        Self { peer, origin: None }
    }

    /// Peer metadata with a page origin.
    #[inline]
    #[must_use]
    pub fn with_origin(peer: EndpointName, origin: Url) -> Self {
        Self {
            peer,
            origin: Some(origin),
        }
    }
}

// ============================================================================
// Port
// ============================================================================

/// One end of a duplex message channel between two contexts.
///
/// Dropping a port's receiver half is how the peer observes disconnect:
/// its sends start failing and its own receiver yields `None`.
pub struct Port {
    /// Metadata about the peer this port talks to.
    pub info: PortInfo,

    /// Outgoing half, toward the peer.
    pub(crate) sender: mpsc::UnboundedSender<WireMessage>,

    /// Incoming half, from the peer.
    pub(crate) receiver: mpsc::UnboundedReceiver<WireMessage>,
}

impl Port {
    /// Creates two connected ports.
    ///
    /// `left_info` is the peer metadata reported by the first returned
    /// port (i.e. it describes the context holding the second port), and
    /// vice versa.
    #[must_use]
    pub fn pair(left_info: PortInfo, right_info: PortInfo) -> (Port, Port) {
        let (tx_left_to_right, rx_from_left) = mpsc::unbounded_channel();
        let (tx_right_to_left, rx_from_right) = mpsc::unbounded_channel();

        let left = Port {
            info: left_info,
            sender: tx_left_to_right,
            receiver: rx_from_right,
        };
        let right = Port {
            info: right_info,
            sender: tx_right_to_left,
            receiver: rx_from_left,
        };

        (left, right)
    }

    /// Assembles a port from pre-wired channel halves.
    ///
    /// Used by transports that bridge ports over another medium.
    #[must_use]
    pub fn from_channels(
        info: PortInfo,
        sender: mpsc::UnboundedSender<WireMessage>,
        receiver: mpsc::UnboundedReceiver<WireMessage>,
    ) -> Self {
        Self {
            info,
            sender,
            receiver,
        }
    }
}

// ============================================================================
// PortConnector
// ============================================================================

/// Capability to (re)establish a port to a counterpart context.
///
/// Drives the connect/reconnect lifecycle of an `ExtensionConnection`.
#[async_trait]
pub trait PortConnector: Send + Sync {
    /// Opens a fresh port.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the counterpart is unreachable.
    async fn connect(&self) -> Result<Port>;
}

// ============================================================================
// PortTransport
// ============================================================================

/// [`Transport`] over a port's outgoing half.
///
/// The sender is swappable so a reconnecting connection can rebind to a
/// fresh port; while detached, posts fail fast with `ConnectionClosed`.
pub(crate) struct PortTransport {
    sender: Mutex<Option<mpsc::UnboundedSender<WireMessage>>>,
}

impl PortTransport {
    pub(crate) fn new(sender: mpsc::UnboundedSender<WireMessage>) -> Self {
        Self {
            sender: Mutex::new(Some(sender)),
        }
    }

    /// Creates a transport with no port bound yet.
    pub(crate) fn detached_new() -> Self {
        Self {
            sender: Mutex::new(None),
        }
    }

    /// Detaches the current sender; subsequent posts fail.
    pub(crate) fn detach(&self) {
        *self.sender.lock() = None;
    }

    /// Binds a fresh sender after reconnect.
    pub(crate) fn rebind(&self, sender: mpsc::UnboundedSender<WireMessage>) {
        *self.sender.lock() = Some(sender);
    }
}

impl Transport for PortTransport {
    fn post(&self, message: WireMessage) -> Result<()> {
        let guard = self.sender.lock();
        let sender = guard.as_ref().ok_or(Error::ConnectionClosed)?;
        sender.send(message).map_err(|_| Error::ConnectionClosed)
    }
}

// ============================================================================
// Tests
// ============================================================================
