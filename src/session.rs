//! Client-initiated pairing flow.
//!
//! A [`ConnectSession`] mints an ephemeral identity, renders the
//! `nostrconnect://` URL for display, and listens on the relay set until a
//! signer acknowledges with the session secret. Sessions are single use:
//! once started they run to exactly one terminal state.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::info::ConnectionInfo;
use crate::signer::SignerOptions;
use crate::transport::{IncomingFrame, RelayLink, RelayTransport};

/// Buffered state transitions per subscriber; a session emits at most a
/// handful over its lifetime.
const STATE_STREAM_DEPTH: usize = 16;

/// Lifecycle of a connect-flow pairing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Generating,
    Listening,
    Connected,
    Timeout,
    Cancelled,
    Error,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Connected
                | SessionState::Timeout
                | SessionState::Cancelled
                | SessionState::Error
        )
    }
}

/// Outcome of a successful pairing.
#[derive(Debug, Clone)]
pub struct ConnectResult {
    /// The signer that acknowledged the session.
    pub remote_signer_pubkey: String,
    /// The end-user's public identity, when the signer discloses it.
    pub user_pubkey: Option<String>,
    /// The session info completed with the discovered signer identity;
    /// ready to build a [`crate::signer::RemoteSigner`] from.
    pub info: ConnectionInfo,
}

/// Single-use connect-flow session.
pub struct ConnectSession {
    transport: Arc<dyn RelayTransport>,
    opts: SignerOptions,
    relays: Vec<String>,
    app_name: Option<String>,
    app_url: Option<String>,
    inner: Arc<SessionInner>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

struct SessionInner {
    state: StdMutex<SessionState>,
    connect_url: StdMutex<Option<String>>,
    info: StdMutex<Option<ConnectionInfo>>,
    result: StdMutex<Option<ConnectResult>>,
    state_tx: broadcast::Sender<SessionState>,
    cancel_tx: watch::Sender<bool>,
}

impl SessionInner {
    /// Move to `to` unless a terminal state has already been reached.
    /// Every successful transition is emitted on the state stream.
    fn transition(&self, to: SessionState) -> bool {
        {
            let mut state = self.state.lock().unwrap();
            if state.is_terminal() {
                return false;
            }
            *state = to;
        }
        let _ = self.state_tx.send(to);
        true
    }
}

impl ConnectSession {
    /// A new session in `idle`. Nothing touches the network until
    /// [`ConnectSession::start`].
    pub fn new(
        transport: Arc<dyn RelayTransport>,
        relays: Vec<String>,
        app_name: Option<String>,
        app_url: Option<String>,
        opts: SignerOptions,
    ) -> Self {
        let (state_tx, _) = broadcast::channel(STATE_STREAM_DEPTH);
        let (cancel_tx, _) = watch::channel(false);
        Self {
            transport,
            opts,
            relays,
            app_name,
            app_url,
            inner: Arc::new(SessionInner {
                state: StdMutex::new(SessionState::Idle),
                connect_url: StdMutex::new(None),
                info: StdMutex::new(None),
                result: StdMutex::new(None),
                state_tx,
                cancel_tx,
            }),
            tasks: StdMutex::new(Vec::new()),
        }
    }

    /// Generate the session identity and URL, then listen for the signer.
    ///
    /// Single use: only valid from `idle`. Returns the `nostrconnect://` URL
    /// to display. Must be called within a Tokio runtime; listening happens
    /// on a background task.
    pub fn start(&self) -> Result<String> {
        {
            let mut state = self.inner.state.lock().unwrap();
            if *state != SessionState::Idle {
                return Err(Error::State("already started".to_string()));
            }
            *state = SessionState::Generating;
        }
        let _ = self.inner.state_tx.send(SessionState::Generating);

        let info = match ConnectionInfo::generate_connect_url(
            self.relays.clone(),
            self.app_name.clone(),
            self.app_url.clone(),
        ) {
            Ok(info) => info,
            Err(e) => {
                self.inner.transition(SessionState::Error);
                return Err(e);
            }
        };
        let url = match info.to_nostr_connect_url(None) {
            Ok(url) => url,
            Err(e) => {
                self.inner.transition(SessionState::Error);
                return Err(e);
            }
        };
        let secret = match info.shared_secret.clone() {
            Some(secret) => secret,
            None => {
                self.inner.transition(SessionState::Error);
                return Err(Error::State("generated session missing secret".to_string()));
            }
        };

        *self.inner.info.lock().unwrap() = Some(info.clone());
        *self.inner.connect_url.lock().unwrap() = Some(url.clone());
        if !self.inner.transition(SessionState::Listening) {
            // A racing cancel already terminated the session.
            return Err(Error::SessionTerminal(self.state()));
        }

        let task = tokio::spawn(listen(
            Arc::clone(&self.transport),
            self.relays.clone(),
            secret,
            info,
            Arc::clone(&self.inner),
            self.opts.connect_window,
        ));
        self.tasks.lock().unwrap().push(task);

        Ok(url)
    }

    /// Block until the session reaches a terminal state.
    ///
    /// Valid while `listening`; once `connected` it returns the stored
    /// result. Calling it before the session listens is misuse.
    pub async fn wait_for_connection(&self) -> Result<ConnectResult> {
        let mut state_rx = self.inner.state_tx.subscribe();
        match *self.inner.state.lock().unwrap() {
            SessionState::Listening => {}
            SessionState::Connected => return self.stored_result(),
            other => {
                return Err(Error::State(format!(
                    "wait_for_connection requires a listening session (state: {other:?})"
                )))
            }
        }

        loop {
            let state = match state_rx.recv().await {
                Ok(state) => state,
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    *self.inner.state.lock().unwrap()
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(Error::State("session state stream closed".to_string()))
                }
            };
            match state {
                SessionState::Connected => return self.stored_result(),
                state if state.is_terminal() => return Err(Error::SessionTerminal(state)),
                _ => {}
            }
        }
    }

    /// Abort the session. Valid from `idle` onward; a no-op once terminal.
    /// Safe to race against an arriving acknowledgment: exactly one terminal
    /// state wins.
    pub fn cancel(&self) {
        if self.inner.transition(SessionState::Cancelled) {
            self.inner.cancel_tx.send_replace(true);
        }
    }

    /// Release the listener and its relay connections. Safe to call in any
    /// state, including `idle` and after a terminal transition.
    pub fn dispose(&self) {
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.lock().unwrap()
    }

    /// The generated pairing URL; `None` until generation completes.
    pub fn connect_url(&self) -> Option<String> {
        self.inner.connect_url.lock().unwrap().clone()
    }

    /// The generated session info; `None` until generation completes.
    pub fn info(&self) -> Option<ConnectionInfo> {
        self.inner.info.lock().unwrap().clone()
    }

    /// The pairing outcome; populated only on the transition to `connected`.
    pub fn result(&self) -> Option<ConnectResult> {
        self.inner.result.lock().unwrap().clone()
    }

    /// Subscribe to state transitions. Every transition, including the
    /// terminal one, is delivered to all subscribers.
    pub fn state_stream(&self) -> broadcast::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    fn stored_result(&self) -> Result<ConnectResult> {
        self.inner
            .result
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::State("connected session without a result".to_string()))
    }
}

impl Drop for ConnectSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Listener task: open the relay set, wait for an acknowledgment carrying
/// the session secret, and drive the session to its terminal state.
async fn listen(
    transport: Arc<dyn RelayTransport>,
    relays: Vec<String>,
    secret: String,
    info: ConnectionInfo,
    inner: Arc<SessionInner>,
    window: Duration,
) {
    let mut cancel_rx = inner.cancel_tx.subscribe();
    // A cancel issued before this task subscribed would otherwise go unseen.
    if *cancel_rx.borrow() {
        inner.transition(SessionState::Cancelled);
        return;
    }
    let (frame_tx, mut frame_rx) = mpsc::channel::<IncomingFrame>(STATE_STREAM_DEPTH);

    let mut forwarders = Vec::new();
    for url in &relays {
        match transport.open(url).await {
            Ok(link) => {
                let tx = frame_tx.clone();
                let url = url.clone();
                forwarders.push(tokio::spawn(async move {
                    let RelayLink { sink, mut frames } = link;
                    // Keep the write half alive so the connection stays open.
                    let _sink = sink;
                    while let Some(frame) = frames.recv().await {
                        if tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    debug!(relay = %url, "listener connection ended");
                }));
            }
            Err(e) => warn!(relay = %url, error = %e, "failed to open relay for connect listener"),
        }
    }
    drop(frame_tx);

    if forwarders.is_empty() {
        inner.transition(SessionState::Error);
        return;
    }

    let deadline = tokio::time::sleep(window);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                inner.transition(SessionState::Timeout);
                break;
            }
            res = cancel_rx.changed() => {
                if res.is_err() {
                    break;
                }
                if *cancel_rx.borrow() {
                    inner.transition(SessionState::Cancelled);
                    break;
                }
            }
            maybe = frame_rx.recv() => match maybe {
                Some(frame) => {
                    if let Some((signer_pk, user_pk)) = ack_from_frame(&frame, &secret) {
                        let result = ConnectResult {
                            remote_signer_pubkey: signer_pk.clone(),
                            user_pubkey: user_pk,
                            info: info.with_remote_signer(&signer_pk),
                        };
                        // Store under the result lock so any waiter that
                        // observes `connected` also sees the result.
                        let mut slot = inner.result.lock().unwrap();
                        if inner.transition(SessionState::Connected) {
                            *slot = Some(result);
                        }
                        break;
                    }
                }
                None => {
                    // Every relay connection ended without an acknowledgment.
                    inner.transition(SessionState::Error);
                    break;
                }
            },
        }
    }

    for task in forwarders {
        task.abort();
    }
}

/// Accept a frame as the signer's acknowledgment when its result echoes the
/// session secret (or the legacy literal `ack`). The frame author is the
/// signer identity; an optional `pubkey` field discloses the user identity.
fn ack_from_frame(frame: &IncomingFrame, secret: &str) -> Option<(String, Option<String>)> {
    let value: Value = match serde_json::from_str(&frame.payload) {
        Ok(value) => value,
        Err(e) => {
            debug!(error = %e, "ignoring undecodable frame while listening");
            return None;
        }
    };
    if let Some(error) = value.get("error").and_then(Value::as_str) {
        warn!(error = %error, "signer reported an error during pairing");
        return None;
    }
    let result = value.get("result").and_then(Value::as_str)?;
    if result != secret && result != "ack" {
        warn!("connect response with invalid secret ignored");
        return None;
    }
    let user_pubkey = value
        .get("pubkey")
        .and_then(Value::as_str)
        .map(str::to_string);
    Some((frame.author.clone(), user_pubkey))
}
