//! NIP-46 remote signing client (Nostr Connect).
//!
//! Lets an application obtain signatures from a user's key held by a
//! separate signer process, without ever touching the key itself. Two
//! pairing flows are supported:
//!
//! - **Bunker flow**: the application already holds a `bunker://` URL naming
//!   the signer. Parse it with [`ConnectionInfo::parse_bunker_url`] and
//!   build a [`RemoteSigner`] directly.
//! - **Connect flow**: the application mints the pairing URL itself with a
//!   [`ConnectSession`], displays it, and waits for the signer's
//!   acknowledgment; the resulting [`ConnectResult`] carries the completed
//!   [`ConnectionInfo`].
//!
//! The relay transport and the encrypted event envelope are collaborators:
//! implement [`RelayTransport`] over your relay stack and hand it to either
//! entry point.
//!
//! ```ignore
//! // Bunker flow
//! let info = ConnectionInfo::parse_bunker_url(
//!     "bunker://<signer-pubkey>?relay=wss://relay.example.com&secret=TOKEN",
//!     None,
//! )?;
//! let signer = RemoteSigner::new(info, transport, SignerOptions::default());
//! signer.connect().await?;
//! signer.connect_handshake().await?;
//! let signed = signer.sign_event(&unsigned_json).await?;
//!
//! // Connect flow
//! let session = ConnectSession::new(transport, relays, None, None, SignerOptions::default());
//! let url = session.start()?; // display as QR / deep link
//! let result = session.wait_for_connection().await?;
//! let signer = RemoteSigner::new(result.info, transport, SignerOptions::default());
//! ```

pub mod audit;
pub mod error;
pub mod info;
pub mod rpc;
pub mod session;
pub mod signer;
pub mod transport;

pub use audit::AuditLog;
pub use error::{Error, Result};
pub use info::{is_bunker_url, is_nostr_connect_url, ConnectionInfo};
pub use rpc::{Method, Request, Response};
pub use session::{ConnectResult, ConnectSession, SessionState};
pub use signer::{RemoteSigner, SignerOptions};
pub use transport::{IncomingFrame, RelayLink, RelaySink, RelayTransport};
