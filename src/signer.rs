//! Remote signer connection: request correlation, reconnection, lifecycle.
//!
//! A [`RemoteSigner`] owns one worker task per relay named by its
//! [`ConnectionInfo`]. Workers pump incoming frames into the shared pending
//! table (correlation id -> completion handle) and reconnect with
//! exponential backoff when the transport drops. `pause` suspends
//! reconnection, `close` fails every pending request and tears the
//! instance down for good.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audit::AuditLog;
use crate::error::{Error, Result};
use crate::info::ConnectionInfo;
use crate::rpc::{Method, Request, Response};
use crate::transport::{IncomingFrame, RelayLink, RelaySink, RelayTransport};

/// Per-request response deadline.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// First reconnection delay; doubles per failed attempt.
const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(100);
/// Reconnection delay ceiling.
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);
/// How long a connect-flow session listens for the signer's acknowledgment.
const DEFAULT_CONNECT_WINDOW: Duration = Duration::from_secs(120);
/// Outgoing frames queued per relay while it reconnects.
const OUTGOING_QUEUE: usize = 32;

/// Tunable timeouts and backoff policy, shared by [`RemoteSigner`] and
/// [`crate::session::ConnectSession`].
#[derive(Debug, Clone)]
pub struct SignerOptions {
    /// Deadline for a single request's response.
    pub request_timeout: Duration,
    /// Delay before the first reconnection attempt.
    pub backoff_base: Duration,
    /// Upper bound on the reconnection delay.
    pub max_backoff: Duration,
    /// Acknowledgment window for the connect flow.
    pub connect_window: Duration,
}

impl Default for SignerOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            backoff_base: DEFAULT_BACKOFF_BASE,
            max_backoff: DEFAULT_MAX_BACKOFF,
            connect_window: DEFAULT_CONNECT_WINDOW,
        }
    }
}

/// Reconnection delay for the given attempt: `backoff_base * 2^retry_count`,
/// capped at `max_backoff`.
pub(crate) fn backoff_delay(retry_count: u32, opts: &SignerOptions) -> Duration {
    let base = opts.backoff_base.as_millis() as u64;
    let millis = base.checked_shl(retry_count).unwrap_or(u64::MAX);
    Duration::from_millis(millis.min(opts.max_backoff.as_millis() as u64))
}

type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<Result<Response>>>>>;

struct RelayHandle {
    url: String,
    out_tx: mpsc::Sender<String>,
    task: JoinHandle<()>,
}

/// Client side of an established signing delegation.
pub struct RemoteSigner {
    info: ConnectionInfo,
    opts: SignerOptions,
    transport: Arc<dyn RelayTransport>,
    pending: Pending,
    relays: Mutex<Vec<RelayHandle>>,
    closed: AtomicBool,
    closed_tx: watch::Sender<bool>,
    paused_tx: watch::Sender<bool>,
    audit: Option<Arc<Mutex<AuditLog>>>,
}

impl RemoteSigner {
    pub fn new(
        info: ConnectionInfo,
        transport: Arc<dyn RelayTransport>,
        opts: SignerOptions,
    ) -> Self {
        let (closed_tx, _) = watch::channel(false);
        let (paused_tx, _) = watch::channel(false);
        Self {
            info,
            opts,
            transport,
            pending: Arc::new(Mutex::new(HashMap::new())),
            relays: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            closed_tx,
            paused_tx,
            audit: None,
        }
    }

    /// Record request lifecycle events to the given audit log.
    pub fn with_audit(mut self, audit: Arc<Mutex<AuditLog>>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn connection_info(&self) -> &ConnectionInfo {
        &self.info
    }

    /// Open a transport to every relay, best effort: a subset succeeding is
    /// enough to proceed, relays that refused keep retrying in their worker.
    /// Fails only when no relay at all could be reached.
    pub async fn connect(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::SignerClosed);
        }
        if !self.relays.lock().await.is_empty() {
            return Err(Error::State("already connected".to_string()));
        }

        let mut opened = Vec::with_capacity(self.info.relays.len());
        for url in &self.info.relays {
            match self.transport.open(url).await {
                Ok(link) => opened.push((url.clone(), Some(link))),
                Err(e) => {
                    warn!(relay = %url, error = %e, "initial connect failed");
                    opened.push((url.clone(), None));
                }
            }
        }
        if opened.iter().all(|(_, link)| link.is_none()) {
            return Err(Error::Transport("no relay could be reached".to_string()));
        }

        let mut handles = Vec::with_capacity(opened.len());
        for (url, link) in opened {
            let (out_tx, out_rx) = mpsc::channel(OUTGOING_QUEUE);
            let ctx = WorkerCtx {
                url: url.clone(),
                transport: Arc::clone(&self.transport),
                pending: Arc::clone(&self.pending),
                opts: self.opts.clone(),
                out_rx,
                closed_rx: self.closed_tx.subscribe(),
                paused_rx: self.paused_tx.subscribe(),
            };
            let task = tokio::spawn(relay_worker(ctx, link));
            handles.push(RelayHandle { url, out_tx, task });
        }

        let mut relays = self.relays.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            // close() won the race: do not leave workers behind.
            for handle in handles {
                handle.task.abort();
            }
            return Err(Error::SignerClosed);
        }
        *relays = handles;
        drop(relays);

        self.audit_record(
            "connected",
            &format!("relays: {}", self.info.relays.len()),
        )
        .await;
        Ok(())
    }

    /// Send a request and await the matching response.
    ///
    /// The request goes to every live relay; the first response carrying its
    /// correlation id resolves it. On deadline the pending entry is removed
    /// and a late reply is dropped silently.
    pub async fn send(&self, method: Method, params: Vec<String>) -> Result<Response> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::SignerClosed);
        }

        let request = Request::new(&method, params);
        let frame = request.to_json()?;
        let id = request.id.clone();

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        {
            let relays = self.relays.lock().await;
            if relays.is_empty() {
                self.pending.lock().await.remove(&id);
                if self.closed.load(Ordering::SeqCst) {
                    return Err(Error::SignerClosed);
                }
                return Err(Error::State("not connected".to_string()));
            }
            for handle in relays.iter() {
                if let Err(e) = handle.out_tx.try_send(frame.clone()) {
                    warn!(relay = %handle.url, error = %e, "outgoing queue full, frame dropped for this relay");
                }
            }
        }
        self.audit_record("request_sent", &format!("id: {id}, method: {method}"))
            .await;

        match tokio::time::timeout(self.opts.request_timeout, rx).await {
            Ok(Ok(outcome)) => {
                match &outcome {
                    Ok(_) => {
                        self.audit_record("response_received", &format!("id: {id}"))
                            .await
                    }
                    Err(e) => {
                        self.audit_record("request_failed", &format!("id: {id}, error: {e}"))
                            .await
                    }
                }
                outcome
            }
            // Completion handle dropped without resolving: the map was cleared.
            Ok(Err(_)) => Err(Error::SignerClosed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                self.audit_record("request_timeout", &format!("id: {id}")).await;
                Err(Error::RequestTimeout {
                    id,
                    timeout: self.opts.request_timeout,
                })
            }
        }
    }

    /// Initial `connect` request, carrying the shared secret that authorizes
    /// this client with the signer.
    pub async fn connect_handshake(&self) -> Result<String> {
        let mut params = vec![self.info.remote_signer_pubkey.clone()];
        if let Some(secret) = &self.info.shared_secret {
            params.push(secret.clone());
        }
        self.send(Method::Connect, params).await?.into_result()
    }

    /// Ask the signer for the end-user's public key.
    pub async fn get_public_key(&self) -> Result<String> {
        self.send(Method::GetPublicKey, Vec::new()).await?.into_result()
    }

    pub async fn ping(&self) -> Result<String> {
        self.send(Method::Ping, Vec::new()).await?.into_result()
    }

    /// Ask the signer to sign the given unsigned event (JSON text).
    pub async fn sign_event(&self, unsigned_event: &str) -> Result<String> {
        self.send(Method::SignEvent, vec![unsigned_event.to_string()])
            .await?
            .into_result()
    }

    pub async fn nip44_encrypt(&self, peer_pubkey: &str, plaintext: &str) -> Result<String> {
        self.send(
            Method::Nip44Encrypt,
            vec![peer_pubkey.to_string(), plaintext.to_string()],
        )
        .await?
        .into_result()
    }

    pub async fn nip44_decrypt(&self, peer_pubkey: &str, ciphertext: &str) -> Result<String> {
        self.send(
            Method::Nip44Decrypt,
            vec![peer_pubkey.to_string(), ciphertext.to_string()],
        )
        .await?
        .into_result()
    }

    /// Suspend reconnection attempts. Idempotent.
    pub fn pause(&self) {
        self.paused_tx.send_replace(true);
    }

    /// Re-arm reconnection if the transport is currently down. Idempotent;
    /// calling it while not paused has no observable effect.
    pub fn resume(&self) {
        self.paused_tx.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.paused_tx.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Tear the signer down. Idempotent and terminal: every pending request
    /// resolves with [`Error::SignerClosed`] before this returns, the
    /// pending table and relay list are cleared, and no reconnection is
    /// attempted afterwards.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.closed_tx.send_replace(true);

        let drained: Vec<_> = {
            let mut pending = self.pending.lock().await;
            pending.drain().collect()
        };
        for (_, tx) in drained {
            let _ = tx.send(Err(Error::SignerClosed));
        }

        // Dropping the handles drops the outgoing senders; workers observe
        // the closed signal and release their transports.
        self.relays.lock().await.clear();

        self.audit_record("signer_closed", "pending requests failed with signer closed")
            .await;
        info!("remote signer closed");
    }

    /// Number of requests still awaiting a response. Read-only, for tests.
    pub async fn pending_requests(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Number of relay workers currently owned. Read-only, for tests.
    pub async fn relay_count(&self) -> usize {
        self.relays.lock().await.len()
    }

    async fn audit_record(&self, operation: &str, details: &str) {
        if let Some(audit) = &self.audit {
            audit.lock().await.record(operation, details);
        }
    }
}

struct WorkerCtx {
    url: String,
    transport: Arc<dyn RelayTransport>,
    pending: Pending,
    opts: SignerOptions,
    out_rx: mpsc::Receiver<String>,
    closed_rx: watch::Receiver<bool>,
    paused_rx: watch::Receiver<bool>,
}

enum Exit {
    Closed,
    Disconnected,
}

/// Per-relay worker: pump the live link, reconnect with backoff on loss.
async fn relay_worker(mut ctx: WorkerCtx, initial: Option<RelayLink>) {
    let mut retry_count: u32 = 0;
    let mut current = initial;

    loop {
        if *ctx.closed_rx.borrow() {
            break;
        }

        let link = match current.take() {
            Some(link) => link,
            None => {
                if !hold_while_paused(&mut ctx.paused_rx, &mut ctx.closed_rx).await {
                    break;
                }
                match ctx.transport.open(&ctx.url).await {
                    Ok(link) => link,
                    Err(e) => {
                        debug!(relay = %ctx.url, error = %e, "reconnect attempt failed");
                        let delay = backoff_delay(retry_count, &ctx.opts);
                        retry_count = retry_count.saturating_add(1);
                        if !sleep_or_closed(delay, &mut ctx.closed_rx).await {
                            break;
                        }
                        continue;
                    }
                }
            }
        };

        retry_count = 0;
        info!(relay = %ctx.url, "relay connected");

        let RelayLink { mut sink, mut frames } = link;
        let exit = pump(&mut sink, &mut frames, &mut ctx).await;
        sink.close().await;

        match exit {
            Exit::Closed => break,
            Exit::Disconnected => {
                let delay = backoff_delay(retry_count, &ctx.opts);
                retry_count = retry_count.saturating_add(1);
                if !sleep_or_closed(delay, &mut ctx.closed_rx).await {
                    break;
                }
            }
        }
    }
    debug!(relay = %ctx.url, "relay worker exiting");
}

/// Drive one live connection until it drops or the signer closes.
async fn pump(
    sink: &mut Box<dyn RelaySink>,
    frames: &mut mpsc::Receiver<IncomingFrame>,
    ctx: &mut WorkerCtx,
) -> Exit {
    loop {
        tokio::select! {
            res = ctx.closed_rx.changed() => {
                if res.is_err() || *ctx.closed_rx.borrow() {
                    return Exit::Closed;
                }
            }
            maybe = ctx.out_rx.recv() => match maybe {
                Some(frame) => {
                    if let Err(e) = sink.send(&frame).await {
                        warn!(relay = %ctx.url, error = %e, "send failed, reconnecting");
                        return Exit::Disconnected;
                    }
                }
                None => return Exit::Closed,
            },
            maybe = frames.recv() => match maybe {
                Some(frame) => dispatch_response(&ctx.pending, frame).await,
                None => {
                    debug!(relay = %ctx.url, "relay connection lost");
                    return Exit::Disconnected;
                }
            },
        }
    }
}

/// Resolve the pending entry matching the frame's correlation id. Replies
/// for unknown or already-expired ids are dropped.
async fn dispatch_response(pending: &Pending, frame: IncomingFrame) {
    let response = match Response::from_json(&frame.payload) {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "dropping undecodable response frame");
            return;
        }
    };
    if response.id.is_empty() {
        debug!("dropping response without correlation id");
        return;
    }
    let slot = pending.lock().await.remove(&response.id);
    match slot {
        Some(tx) => {
            let _ = tx.send(Ok(response));
        }
        None => debug!(id = %response.id, "response for unknown or expired request dropped"),
    }
}

/// Returns false when the signer closed while paused.
async fn hold_while_paused(
    paused_rx: &mut watch::Receiver<bool>,
    closed_rx: &mut watch::Receiver<bool>,
) -> bool {
    while *paused_rx.borrow() {
        tokio::select! {
            res = paused_rx.changed() => {
                if res.is_err() {
                    return false;
                }
            }
            _ = closed_rx.changed() => return false,
        }
    }
    true
}

/// Returns false when the signer closed during the delay.
async fn sleep_or_closed(delay: Duration, closed_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = closed_rx.changed() => false,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};
    use tokio::time::sleep;

    use super::*;
    use crate::transport::mock::MockTransport;

    const SIGNER_PK: &str = "deadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef";
    const RELAY: &str = "wss://relay.example.com";
    const RELAY2: &str = "wss://relay2.example.com";

    fn bunker_url(relays: &[&str]) -> String {
        let mut url = format!("bunker://{SIGNER_PK}?secret=testsecret");
        for relay in relays {
            url.push_str(&format!("&relay={relay}"));
        }
        url
    }

    fn test_opts() -> SignerOptions {
        SignerOptions {
            request_timeout: Duration::from_millis(300),
            backoff_base: Duration::from_millis(5),
            max_backoff: Duration::from_millis(50),
            connect_window: Duration::from_millis(500),
        }
    }

    fn signer_for(relays: &[&str]) -> (RemoteSigner, std::sync::Arc<crate::transport::mock::MockState>) {
        let (transport, state) = MockTransport::new();
        let info = ConnectionInfo::parse_bunker_url(&bunker_url(relays), None).unwrap();
        (RemoteSigner::new(info, transport, test_opts()), state)
    }

    fn frame_id(frame: &str) -> String {
        let value: Value = serde_json::from_str(frame).unwrap();
        value["id"].as_str().unwrap().to_string()
    }

    #[test]
    fn test_backoff_sequence() {
        let opts = SignerOptions::default();
        let delays: Vec<u64> = (0..5)
            .map(|n| backoff_delay(n, &opts).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1600]);
    }

    #[test]
    fn test_backoff_is_capped() {
        let opts = SignerOptions::default();
        assert_eq!(backoff_delay(20, &opts), opts.max_backoff);
        assert_eq!(backoff_delay(u32::MAX, &opts), opts.max_backoff);
    }

    #[tokio::test]
    async fn test_send_resolves_matching_response() {
        let (signer, state) = signer_for(&[RELAY]);
        signer.connect().await.unwrap();

        let responder = tokio::spawn({
            let state = std::sync::Arc::clone(&state);
            async move {
                let frames = state.wait_for_sent(1).await;
                let id = frame_id(&frames[0]);
                let payload = json!({"id": id, "result": "pong"}).to_string();
                assert!(state.deliver(RELAY, SIGNER_PK, &payload).await);
            }
        });

        let response = signer.send(Method::Ping, Vec::new()).await.unwrap();
        assert_eq!(response.result.as_deref(), Some("pong"));
        assert_eq!(signer.pending_requests().await, 0);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_responses_matched_by_id_not_arrival_order() {
        let (signer, state) = signer_for(&[RELAY]);
        signer.connect().await.unwrap();

        let responder = tokio::spawn({
            let state = std::sync::Arc::clone(&state);
            async move {
                let frames = state.wait_for_sent(2).await;
                // Answer in reverse order of sending; each reply echoes the
                // first param of its own request.
                for frame in frames.iter().rev() {
                    let value: Value = serde_json::from_str(frame).unwrap();
                    let id = value["id"].as_str().unwrap();
                    let param = value["params"][0].as_str().unwrap();
                    let payload = json!({"id": id, "result": format!("echo:{param}")}).to_string();
                    assert!(state.deliver(RELAY, SIGNER_PK, &payload).await);
                }
            }
        });

        let (first, second) = tokio::join!(
            signer.send(Method::Other("probe".to_string()), vec!["a".to_string()]),
            signer.send(Method::Other("probe".to_string()), vec!["b".to_string()]),
        );
        assert_eq!(first.unwrap().result.as_deref(), Some("echo:a"));
        assert_eq!(second.unwrap().result.as_deref(), Some("echo:b"));
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_request_timeout_and_late_response_dropped() {
        let (signer, state) = signer_for(&[RELAY]);
        signer.connect().await.unwrap();

        let err = signer.send(Method::Ping, Vec::new()).await.unwrap_err();
        let id = match err {
            Error::RequestTimeout { id, .. } => id,
            other => panic!("unexpected error: {other}"),
        };
        assert_eq!(signer.pending_requests().await, 0);

        // A late reply for the expired id is dropped without disturbing
        // anything else.
        let payload = json!({"id": id, "result": "too late"}).to_string();
        assert!(state.deliver(RELAY, SIGNER_PK, &payload).await);
        sleep(Duration::from_millis(50)).await;
        assert_eq!(signer.pending_requests().await, 0);
    }

    #[tokio::test]
    async fn test_timeout_leaves_other_requests_pending() {
        let (signer, state) = signer_for(&[RELAY]);
        signer.connect().await.unwrap();

        let responder = tokio::spawn({
            let state = std::sync::Arc::clone(&state);
            async move {
                let frames = state.wait_for_sent(2).await;
                // Only answer the request that asked for "slow-but-answered".
                for frame in &frames {
                    let value: Value = serde_json::from_str(frame).unwrap();
                    if value["params"][0] == "answered" {
                        let id = value["id"].as_str().unwrap();
                        // Let the other request expire first.
                        sleep(Duration::from_millis(100)).await;
                        let payload = json!({"id": id, "result": "ok"}).to_string();
                        assert!(state.deliver(RELAY, SIGNER_PK, &payload).await);
                    }
                }
            }
        });

        let (ignored, answered) = tokio::join!(
            signer.send(Method::Other("probe".to_string()), vec!["ignored".to_string()]),
            signer.send(Method::Other("probe".to_string()), vec!["answered".to_string()]),
        );
        assert!(matches!(ignored, Err(Error::RequestTimeout { .. })));
        assert_eq!(answered.unwrap().result.as_deref(), Some("ok"));
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_fails_pending_and_is_idempotent() {
        let (signer, _state) = signer_for(&[RELAY]);
        let signer = std::sync::Arc::new(signer);
        signer.connect().await.unwrap();

        let pending = tokio::spawn({
            let signer = std::sync::Arc::clone(&signer);
            async move { signer.send(Method::Ping, Vec::new()).await }
        });
        while signer.pending_requests().await == 0 {
            sleep(Duration::from_millis(5)).await;
        }

        signer.close().await;
        assert!(matches!(pending.await.unwrap(), Err(Error::SignerClosed)));
        assert_eq!(signer.pending_requests().await, 0);
        assert_eq!(signer.relay_count().await, 0);
        assert!(signer.is_closed());

        // Safe to call again, and sends stay rejected.
        signer.close().await;
        assert!(matches!(
            signer.send(Method::Ping, Vec::new()).await,
            Err(Error::SignerClosed)
        ));
    }

    #[tokio::test]
    async fn test_connect_requires_at_least_one_relay() {
        let (signer, state) = signer_for(&[RELAY, RELAY2]);
        state.refuse(RELAY);
        state.refuse(RELAY2);
        assert!(matches!(
            signer.connect().await,
            Err(Error::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_proceeds_with_partial_relay_set() {
        let (signer, state) = signer_for(&[RELAY, RELAY2]);
        state.refuse(RELAY2);
        signer.connect().await.unwrap();
        // A worker is kept for the refused relay so it can come back later.
        assert_eq!(signer.relay_count().await, 2);
        signer.close().await;
    }

    #[tokio::test]
    async fn test_reconnects_with_backoff_after_disconnect() {
        let (signer, state) = signer_for(&[RELAY]);
        signer.connect().await.unwrap();
        state.wait_for_opens(RELAY, 1).await;

        state.sever(RELAY);
        state.wait_for_opens(RELAY, 2).await;
        signer.close().await;
    }

    #[tokio::test]
    async fn test_pause_suspends_reconnection_and_resume_rearms_it() {
        let (signer, state) = signer_for(&[RELAY]);
        signer.connect().await.unwrap();
        state.wait_for_opens(RELAY, 1).await;

        signer.pause();
        state.sever(RELAY);
        sleep(Duration::from_millis(100)).await;
        assert_eq!(state.open_count(RELAY), 1);

        signer.resume();
        state.wait_for_opens(RELAY, 2).await;
        signer.close().await;
    }

    #[tokio::test]
    async fn test_pause_and_resume_are_idempotent() {
        let (signer, _state) = signer_for(&[RELAY]);
        assert!(!signer.is_paused());
        signer.pause();
        signer.pause();
        assert!(signer.is_paused());
        signer.resume();
        signer.resume();
        assert!(!signer.is_paused());
    }

    #[tokio::test]
    async fn test_send_before_connect_is_a_state_error() {
        let (signer, _state) = signer_for(&[RELAY]);
        assert!(matches!(
            signer.send(Method::Ping, Vec::new()).await,
            Err(Error::State(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_handshake_carries_secret() {
        let (signer, state) = signer_for(&[RELAY]);
        signer.connect().await.unwrap();

        let responder = tokio::spawn({
            let state = std::sync::Arc::clone(&state);
            async move {
                let frames = state.wait_for_sent(1).await;
                let value: Value = serde_json::from_str(&frames[0]).unwrap();
                assert_eq!(value["method"], "connect");
                assert_eq!(value["params"][0], SIGNER_PK);
                assert_eq!(value["params"][1], "testsecret");
                let id = value["id"].as_str().unwrap();
                let payload = json!({"id": id, "result": "ack"}).to_string();
                assert!(state.deliver(RELAY, SIGNER_PK, &payload).await);
            }
        });

        assert_eq!(signer.connect_handshake().await.unwrap(), "ack");
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_rpc_error_surfaces_through_helpers() {
        let (signer, state) = signer_for(&[RELAY]);
        signer.connect().await.unwrap();

        let responder = tokio::spawn({
            let state = std::sync::Arc::clone(&state);
            async move {
                let frames = state.wait_for_sent(1).await;
                let id = frame_id(&frames[0]);
                let payload = json!({"id": id, "error": "denied"}).to_string();
                assert!(state.deliver(RELAY, SIGNER_PK, &payload).await);
            }
        });

        match signer.get_public_key().await.unwrap_err() {
            Error::Rpc(detail) => assert_eq!(detail, "denied"),
            other => panic!("unexpected error: {other}"),
        }
        responder.await.unwrap();
    }
}
