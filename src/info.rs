//! Connection descriptors for both pairing flows.
//!
//! A [`ConnectionInfo`] says how to reach a remote signer: parsed from a
//! `bunker://` URL the user already holds, or generated for the
//! `nostrconnect://` flow where the application mints an ephemeral identity
//! and waits for the signer to call back.

use nostr::prelude::*;
use ::url::Url;

use crate::error::{Error, Result};

/// Scheme prefix of signer-provided pairing URLs.
pub const BUNKER_SCHEME: &str = "bunker://";
/// Scheme prefix of client-generated pairing URLs.
pub const NOSTR_CONNECT_SCHEME: &str = "nostrconnect://";

/// Permissions requested when the caller does not supply any.
const DEFAULT_PERMISSIONS: &str = "sign_event,get_public_key,nip44_encrypt,nip44_decrypt";

/// Byte length of the generated connect-flow secret (hex-encoded on the wire).
const SECRET_LEN: usize = 16;

/// Returns true for URLs carrying the `bunker://` scheme.
///
/// Pure prefix test: empty input and `nostrconnect://` URLs return false.
pub fn is_bunker_url(url: &str) -> bool {
    url.starts_with(BUNKER_SCHEME)
}

/// Returns true for URLs carrying the `nostrconnect://` scheme.
pub fn is_nostr_connect_url(url: &str) -> bool {
    url.starts_with(NOSTR_CONNECT_SCHEME)
}

/// Immutable description of how to reach a remote signer.
///
/// Constructed once by [`ConnectionInfo::parse_bunker_url`] or
/// [`ConnectionInfo::generate_connect_url`]; derived values are new copies,
/// never in-place mutations.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// The signer's public identity (hex). Empty for a connect-flow session
    /// until the signer acknowledges.
    pub remote_signer_pubkey: String,
    /// Relay endpoints used as the rendezvous for protocol traffic.
    /// Non-empty, each `wss://` or `ws://`; validated at construction only.
    pub relays: Vec<String>,
    /// Out-of-band secret authorizing the very first request (bunker flow)
    /// or proving the signer answered the right request (connect flow).
    pub shared_secret: Option<String>,
    /// Ephemeral keypair identifying this application to the signer.
    pub client_keys: Option<Keys>,
    /// True when the application generated the pairing URL itself.
    pub client_initiated: bool,
    /// App display name embedded in a connect-flow URL.
    pub app_name: Option<String>,
    /// App URL embedded in a connect-flow URL.
    pub app_url: Option<String>,
}

impl ConnectionInfo {
    /// Parse a `bunker://` URL into a [`ConnectionInfo`].
    ///
    /// Format: `bunker://<remote-signer-pubkey>?relay=wss://...&secret=TOKEN`.
    /// When `nsec` is given the client keypair is derived from it verbatim,
    /// which keeps sessions deterministic for testing; otherwise a fresh
    /// ephemeral keypair is generated.
    pub fn parse_bunker_url(url: &str, nsec: Option<&str>) -> Result<Self> {
        if !is_bunker_url(url) {
            return Err(Error::MalformedUrl(format!(
                "expected a {BUNKER_SCHEME} url, got {url}"
            )));
        }

        let parsed = Url::parse(url).map_err(|e| Error::MalformedUrl(e.to_string()))?;

        let mut relays = Vec::new();
        let mut secret = None;
        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "relay" => relays.push(value.into_owned()),
                "secret" => secret = Some(value.into_owned()),
                _ => {}
            }
        }
        validate_relays(&relays)?;

        let remote_signer_pubkey = parsed.host_str().unwrap_or_default().to_string();
        if remote_signer_pubkey.is_empty() {
            return Err(Error::MalformedUrl(
                "remote signer pubkey missing".to_string(),
            ));
        }

        Ok(Self {
            remote_signer_pubkey,
            relays,
            shared_secret: secret,
            client_keys: Some(resolve_or_generate(nsec)?),
            client_initiated: false,
            app_name: None,
            app_url: None,
        })
    }

    /// Build the [`ConnectionInfo`] for a client-initiated pairing session.
    ///
    /// Generates a fresh ephemeral keypair (the subject of the URL, since the
    /// signer does not yet know who is asking) and a fresh 128-bit secret the
    /// signer must echo to prove it answered this request. Every call yields
    /// statistically independent key material.
    pub fn generate_connect_url(
        relays: Vec<String>,
        app_name: Option<String>,
        app_url: Option<String>,
    ) -> Result<Self> {
        validate_relays(&relays)?;
        Ok(Self {
            remote_signer_pubkey: String::new(),
            relays,
            shared_secret: Some(generate_secret()),
            client_keys: Some(resolve_or_generate(None)?),
            client_initiated: true,
            app_name,
            app_url,
        })
    }

    /// Render this info as a `nostrconnect://` URL for display to the signer.
    ///
    /// Requires a client keypair and a shared secret, both always present on
    /// infos built by [`ConnectionInfo::generate_connect_url`]. Calling this
    /// on a bunker-flow info is caller misuse and fails immediately instead
    /// of producing a malformed URL.
    pub fn to_nostr_connect_url(&self, permissions: Option<&str>) -> Result<String> {
        let keys = self
            .client_keys
            .as_ref()
            .ok_or_else(|| Error::State("connect url requires a client keypair".to_string()))?;
        let secret = self
            .shared_secret
            .as_deref()
            .ok_or_else(|| Error::State("connect url requires a shared secret".to_string()))?;

        let mut url = Url::parse(&format!(
            "{NOSTR_CONNECT_SCHEME}{}",
            keys.public_key().to_hex()
        ))
        .map_err(|e| Error::MalformedUrl(e.to_string()))?;

        {
            let mut query = url.query_pairs_mut();
            for relay in &self.relays {
                query.append_pair("relay", relay);
            }
            query.append_pair("secret", secret);
            if let Some(name) = &self.app_name {
                query.append_pair("name", name);
            }
            if let Some(app_url) = &self.app_url {
                query.append_pair("url", app_url);
            }
            query.append_pair("perms", permissions.unwrap_or(DEFAULT_PERMISSIONS));
        }

        Ok(url.to_string())
    }

    /// The client identity (hex pubkey), if a keypair is present.
    pub fn client_pubkey(&self) -> Option<String> {
        self.client_keys
            .as_ref()
            .map(|keys| keys.public_key().to_hex())
    }

    /// The client secret key encoded as hex, if a keypair is present.
    pub fn client_secret_hex(&self) -> Option<String> {
        self.client_keys
            .as_ref()
            .map(|keys| keys.secret_key().to_secret_hex())
    }

    /// A copy of this info completed with the signer identity discovered
    /// during the connect flow.
    pub fn with_remote_signer(&self, pubkey: &str) -> Self {
        let mut info = self.clone();
        info.remote_signer_pubkey = pubkey.to_string();
        info
    }
}

/// Resolve client key material: parse the supplied secret key, or generate a
/// fresh ephemeral keypair. Both pairing flows go through this single
/// primitive so they share identical randomness and encoding guarantees.
pub(crate) fn resolve_or_generate(material: Option<&str>) -> Result<Keys> {
    match material {
        Some(raw) => {
            let keys = if raw.starts_with("nsec") {
                Keys::parse(raw)
            } else {
                SecretKey::from_hex(raw).map(Keys::new)
            };
            keys.map_err(|e| Error::MalformedUrl(format!("invalid client key material: {e}")))
        }
        None => Ok(Keys::generate()),
    }
}

fn validate_relays(relays: &[String]) -> Result<()> {
    if relays.is_empty() {
        return Err(Error::MalformedUrl("relay parameter missing".to_string()));
    }
    for relay in relays {
        if !relay.starts_with("wss://") && !relay.starts_with("ws://") {
            return Err(Error::MalformedUrl(format!(
                "relay {relay} should start with wss:// or ws://"
            )));
        }
    }
    Ok(())
}

fn generate_secret() -> String {
    use rand::RngCore;

    let mut bytes = [0u8; SECRET_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
