//! WebSocket-backed ports for cross-process contexts.
//!
//! Same-process contexts exchange messages through [`Port::pair`]; a
//! context living in another process (the in-page provider talking to a
//! native background service) gets its port bridged over WebSocket. A
//! pump task translates between JSON text frames and [`WireMessage`]
//! channel halves, so the connection layer never sees the socket.
//!
//! # Connection Flow
//!
//! 1. [`SocketListener::bind`] on localhost (random port with `0`)
//! 2. The remote context dials the `ws://` URL ([`dial`])
//! 3. [`SocketListener::accept`] upgrades the stream, capturing the HTTP
//!    `Origin` header into the port's [`PortInfo`]
//! 4. Both sides attach the resulting ports to `ExtensionConnection`s

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response as HandshakeResponse,
};
use tokio_tungstenite::tungstenite::http::header::ORIGIN;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{WebSocketStream, accept_hdr_async, connect_async};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::{EndpointName, WireMessage};

use super::port::{Port, PortInfo};

// ============================================================================
// Constants
// ============================================================================

/// Timeout for waiting for the remote context to connect.
const ACCEPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for dialing a listener.
const DIAL_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// SocketListener
// ============================================================================

/// A bound WebSocket endpoint waiting for one remote context.
pub struct SocketListener {
    listener: TcpListener,
    port: u16,
}

impl SocketListener {
    /// Binds to the given address; use port `0` for an OS-assigned port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind(ip: IpAddr, port: u16) -> Result<Self> {
        let addr = SocketAddr::new(ip, port);
        let listener = TcpListener::bind(addr).await?;
        let actual_port = listener.local_addr()?.port();

        debug!(port = actual_port, "Socket listener bound");

        Ok(Self {
            listener,
            port: actual_port,
        })
    }

    /// Returns the bound port.
    #[inline]
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Returns the URL remote contexts dial.
    ///
    /// Format: `ws://127.0.0.1:{port}`
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.port)
    }

    /// Accepts one connection and bridges it into a [`Port`].
    ///
    /// The HTTP `Origin` header sent by the peer, if any, becomes the
    /// port's origin metadata and feeds `OriginMiddleware`.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionTimeout`] if nothing connects within 30s
    /// - [`Error::Connection`] if the WebSocket upgrade fails
    pub async fn accept(&self, peer: EndpointName) -> Result<Port> {
        let accepted = timeout(ACCEPT_TIMEOUT, self.listener.accept())
            .await
            .map_err(|_| Error::connection_timeout(ACCEPT_TIMEOUT.as_millis() as u64))?;
        let (stream, addr) = accepted?;

        debug!(?addr, "TCP connection accepted");

        // The Origin header is only visible during the upgrade callback.
        let origin_slot: Arc<Mutex<Option<Url>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&origin_slot);

        let callback = move |request: &Request,
                             response: HandshakeResponse|
              -> std::result::Result<HandshakeResponse, ErrorResponse> {
            if let Some(value) = request.headers().get(ORIGIN)
                && let Ok(text) = value.to_str()
                && let Ok(url) = Url::parse(text)
            {
                *slot.lock() = Some(url);
            }
            Ok(response)
        };

        let ws_stream = accept_hdr_async(stream, callback)
            .await
            .map_err(|e| Error::connection(format!("WebSocket upgrade failed: {e}")))?;

        let origin = origin_slot.lock().take();
        info!(port = self.port, %peer, ?origin, "WebSocket port established");

        let (sender, receiver) = spawn_pump(ws_stream);
        Ok(Port::from_channels(PortInfo { peer, origin }, sender, receiver))
    }
}

// ============================================================================
// Dial
// ============================================================================

/// Dials a [`SocketListener`] and bridges the stream into a [`Port`].
///
/// `origin` is sent as the HTTP `Origin` header so the listener side can
/// gate methods on it.
///
/// # Errors
///
/// - [`Error::ConnectionTimeout`] if the listener does not answer in 30s
/// - [`Error::WebSocket`] if the handshake fails
pub async fn dial(url: &str, peer: EndpointName, origin: Option<&Url>) -> Result<Port> {
    let mut request = url.into_client_request()?;

    if let Some(origin) = origin {
        let serialized = origin.origin().ascii_serialization();
        let header = HeaderValue::from_str(&serialized)
            .map_err(|_| Error::invalid_argument(format!("invalid origin header: {serialized}")))?;
        request.headers_mut().insert(ORIGIN, header);
    }

    let connected = timeout(DIAL_TIMEOUT, connect_async(request))
        .await
        .map_err(|_| Error::connection_timeout(DIAL_TIMEOUT.as_millis() as u64))?;
    let (ws_stream, _response) = connected?;

    debug!(url, %peer, "Dialed WebSocket port");

    let (sender, receiver) = spawn_pump(ws_stream);
    Ok(Port::from_channels(PortInfo::new(peer), sender, receiver))
}

// ============================================================================
// Pump
// ============================================================================

/// Spawns the task translating between the socket and channel halves.
///
/// Returns the (sender, receiver) pair the bridged [`Port`] is built
/// from. The task exits when either side goes away; dropping the
/// returned halves closes the socket.
fn spawn_pump<S>(
    ws_stream: WebSocketStream<S>,
) -> (
    mpsc::UnboundedSender<WireMessage>,
    mpsc::UnboundedReceiver<WireMessage>,
)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
    let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<WireMessage>();

    tokio::spawn(async move {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        loop {
            tokio::select! {
                frame = ws_read.next() => match frame {
                    Some(Ok(Message::Text(text))) => match WireMessage::parse(&text) {
                        Ok(message) => {
                            if incoming_tx.send(message).is_err() {
                                break;
                            }
                        }
                        Err(error) => warn!(%error, "Dropping unparseable frame"),
                    },

                    Some(Ok(Message::Close(_))) => {
                        debug!("WebSocket closed by remote");
                        break;
                    }

                    Some(Err(error)) => {
                        error!(%error, "WebSocket error");
                        break;
                    }

                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }

                    // Ignore Binary, Ping, Pong
                    _ => {}
                },

                outgoing = outgoing_rx.recv() => match outgoing {
                    Some(message) => match message.to_json() {
                        Ok(json) => {
                            if let Err(error) = ws_write.send(Message::Text(json.into())).await {
                                warn!(%error, "Failed to send frame");
                                break;
                            }
                        }
                        Err(error) => warn!(%error, "Dropping unserializable message"),
                    },

                    None => {
                        let _ = ws_write.close().await;
                        break;
                    }
                },
            }
        }

        debug!("Socket pump terminated");
    });

    (outgoing_tx, incoming_rx)
}

// ============================================================================
// Tests
// ============================================================================
