//! Error taxonomy for the remote-signing client.
//!
//! Parse/generate/render failures are fatal for that call only. Transport
//! loss is absorbed by the reconnection loop and only reaches a caller when
//! its specific request can no longer complete.

use std::time::Duration;

use thiserror::Error;

use crate::session::SessionState;

/// Errors surfaced by URL handling, the remote signer, and connect sessions.
#[derive(Debug, Error)]
pub enum Error {
    /// A bunker or connect URL failed structural or relay-scheme validation.
    #[error("malformed url: {0}")]
    MalformedUrl(String),

    /// An operation was invoked from a state that forbids it. Caller misuse,
    /// not a transient condition.
    #[error("invalid state: {0}")]
    State(String),

    /// The response for a sent request did not arrive before its deadline.
    /// Other pending requests and the connection itself are unaffected.
    #[error("request {id} timed out after {timeout:?}")]
    RequestTimeout { id: String, timeout: Duration },

    /// The signer was closed while this request was still pending.
    #[error("signer closed")]
    SignerClosed,

    /// Underlying relay connection failure.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The remote signer replied, and the reply carries an error.
    #[error("signer error: {0}")]
    Rpc(String),

    /// The connect session reached a terminal state other than connected
    /// while a caller was waiting on it.
    #[error("connect session ended: {0:?}")]
    SessionTerminal(SessionState),
}

pub type Result<T> = std::result::Result<T, Error>;
