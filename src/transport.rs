//! Relay transport collaborator.
//!
//! The client does not open sockets or build signed relay events itself.
//! An implementation of [`RelayTransport`] owns that: it dials a relay,
//! subscribes for traffic addressed to the client identity, encrypts and
//! wraps outgoing request bodies, and delivers decrypted reply bodies as
//! [`IncomingFrame`]s. One live connection is represented by a
//! [`RelayLink`]; dropping the link (or the transport closing the frame
//! channel) counts as connection loss.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

/// A decrypted reply delivered by the transport.
#[derive(Debug, Clone)]
pub struct IncomingFrame {
    /// Public identity (hex) of the event author, i.e. the replying signer.
    pub author: String,
    /// The RPC body text.
    pub payload: String,
}

/// Factory for relay connections, keyed by relay URI.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Open a duplex link to the relay at `url`.
    async fn open(&self, url: &str) -> Result<RelayLink>;
}

/// One live relay connection: a sink for outgoing bodies and a stream of
/// incoming frames. The transport closes the frame channel when the
/// underlying connection is lost.
pub struct RelayLink {
    pub sink: Box<dyn RelaySink>,
    pub frames: mpsc::Receiver<IncomingFrame>,
}

/// Write half of a relay connection.
#[async_trait]
pub trait RelaySink: Send {
    /// Encrypt, wrap and transmit one request body.
    async fn send(&mut self, frame: &str) -> Result<()>;
    /// Release the underlying connection.
    async fn close(&mut self);
}
