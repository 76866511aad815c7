//! Relay binding two connections together.
//!
//! A [`ProxyConnection`] lets the background context forward specific
//! methods between the page-injected provider and the popup UI without
//! either side holding a reference to the other's transport. It installs
//! forwarding handlers only; it owns no other state.

// ============================================================================
// Imports
// ============================================================================

use futures_util::FutureExt;
use tracing::debug;

use crate::protocol::{EndpointName, Method};

use super::base::Connection;

// ============================================================================
// ProxyConnection
// ============================================================================

/// Binds two connections so invocations of a method on one are re-invoked
/// on the other, with the result or error piped back.
///
/// The connections are shared handles; the proxy does not own them.
pub struct ProxyConnection {
    source: Connection,
    source_name: EndpointName,
    destination: Connection,
    destination_name: EndpointName,
}

impl ProxyConnection {
    /// Creates a relay between two connections.
    ///
    /// `source_name`/`destination_name` are the logical destinations used
    /// when re-invoking on the respective connection.
    #[must_use]
    pub fn new(
        source: Connection,
        source_name: EndpointName,
        destination: Connection,
        destination_name: EndpointName,
    ) -> Self {
        Self {
            source,
            source_name,
            destination,
            destination_name,
        }
    }

    /// Registers a forwarding handler for `method` on the source
    /// connection, relaying toward the destination.
    ///
    /// Nothing is registered on the destination connection.
    pub fn proxy(&self, method: Method) {
        debug!(%method, destination = %self.destination_name, "Proxying method");
        Self::install(method, &self.source, &self.destination, self.destination_name);
    }

    /// Mirror of [`ProxyConnection::proxy`]: registers the forwarding
    /// handler on the destination connection, relaying toward the source.
    ///
    /// Calling both for the same method creates independent handlers on
    /// both ends, i.e. bidirectional relaying for that method.
    pub fn reversed_proxy(&self, method: Method) {
        debug!(%method, destination = %self.source_name, "Reverse-proxying method");
        Self::install(method, &self.destination, &self.source, self.source_name);
    }

    fn install(method: Method, from: &Connection, to: &Connection, to_name: EndpointName) {
        let forward_to = to.clone();

        from.on(
            method,
            Box::new(move |args, _source| {
                let forward_to = forward_to.clone();
                async move { forward_to.invoke_to(method, args, to_name).await }.boxed()
            }),
            vec![],
        );
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;
    use tokio::sync::mpsc;

    use crate::connection::base::Transport;
    use crate::error::{Error, Result};
    use crate::protocol::WireMessage;

    struct SinkTransport;

    impl Transport for SinkTransport {
        fn post(&self, _message: WireMessage) -> Result<()> {
            Ok(())
        }
    }

    fn mocked_connection(name: EndpointName, target: EndpointName) -> Connection {
        Connection::new(name, target, Arc::new(SinkTransport))
    }

    fn mocked_proxy() -> (Connection, Connection, ProxyConnection) {
        let source = mocked_connection(EndpointName::ContentScript, EndpointName::Inpage);
        let destination = mocked_connection(EndpointName::ContentScript, EndpointName::Background);

        let proxy = ProxyConnection::new(
            source.clone(),
            EndpointName::Inpage,
            destination.clone(),
            EndpointName::Background,
        );

        (source, destination, proxy)
    }

    #[tokio::test]
    async fn test_proxy_registers_on_source_only() {
        let (source, destination, proxy) = mocked_proxy();

        proxy.proxy(Method::StakeRequest);

        assert!(source.has_callback(Method::StakeRequest));
        assert_eq!(destination.callback_count(), 0);
    }

    #[tokio::test]
    async fn test_reversed_proxy_registers_on_destination_only() {
        let (source, destination, proxy) = mocked_proxy();

        proxy.reversed_proxy(Method::StakeRequest);

        assert!(destination.has_callback(Method::StakeRequest));
        assert_eq!(source.callback_count(), 0);
    }

    #[tokio::test]
    async fn test_both_directions_register_independent_handlers() {
        let (source, destination, proxy) = mocked_proxy();

        proxy.proxy(Method::VerifyConnectionRequest);
        proxy.reversed_proxy(Method::VerifyConnectionRequest);

        assert!(source.has_callback(Method::VerifyConnectionRequest));
        assert!(destination.has_callback(Method::VerifyConnectionRequest));
    }

    /// Full relay: the page invokes on the content script, which forwards
    /// to the background over a second channel pair.
    #[tokio::test]
    async fn test_proxy_forwards_call_and_result() {
        // Page ↔ content script (page-facing side).
        let (tx_page_cs, mut rx_page_cs) = mpsc::unbounded_channel();
        let (tx_cs_page, mut rx_cs_page) = mpsc::unbounded_channel();
        // Content script (background-facing side) ↔ background.
        let (tx_cs_bg, mut rx_cs_bg) = mpsc::unbounded_channel();
        let (tx_bg_cs, mut rx_bg_cs) = mpsc::unbounded_channel();

        struct ChannelTransport(mpsc::UnboundedSender<WireMessage>);
        impl Transport for ChannelTransport {
            fn post(&self, message: WireMessage) -> Result<()> {
                self.0.send(message).map_err(|_| Error::ConnectionClosed)
            }
        }

        let page = Connection::new(
            EndpointName::Inpage,
            EndpointName::ContentScript,
            Arc::new(ChannelTransport(tx_page_cs)),
        );
        let cs_page_side = Connection::new(
            EndpointName::ContentScript,
            EndpointName::Inpage,
            Arc::new(ChannelTransport(tx_cs_page)),
        );
        let cs_bg_side = Connection::new(
            EndpointName::ContentScript,
            EndpointName::Background,
            Arc::new(ChannelTransport(tx_cs_bg)),
        );
        let background = Connection::new(
            EndpointName::Background,
            EndpointName::ContentScript,
            Arc::new(ChannelTransport(tx_bg_cs)),
        );

        for (mut rx, conn) in [
            (rx_page_cs, cs_page_side.clone()),
            (rx_cs_page, page.clone()),
            (rx_cs_bg, background.clone()),
            (rx_bg_cs, cs_bg_side.clone()),
        ] {
            tokio::spawn(async move {
                while let Some(message) = rx.recv().await {
                    conn.handle_message(message, None);
                }
            });
        }

        let handled = Arc::new(AtomicUsize::new(0));
        let handled_cb = Arc::clone(&handled);
        background.on(
            Method::GetAccountAddress,
            Box::new(move |_args, _source| {
                handled_cb.fetch_add(1, Ordering::SeqCst);
                async { Ok(json!("0xabc")) }.boxed()
            }),
            vec![],
        );

        let relay = ProxyConnection::new(
            cs_page_side,
            EndpointName::Inpage,
            cs_bg_side,
            EndpointName::Background,
        );
        relay.proxy(Method::GetAccountAddress);

        let result = page
            .invoke(Method::GetAccountAddress, vec![])
            .await
            .expect("relayed invoke");

        assert_eq!(result, json!("0xabc"));
        assert_eq!(handled.load(Ordering::SeqCst), 1);
    }
}
