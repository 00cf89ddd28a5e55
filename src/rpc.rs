//! Request/response body exchanged with the remote signer.
//!
//! The encrypted event wrapper around these bodies belongs to the transport
//! collaborator; this layer only builds `{id, method, params}` requests and
//! reads the correlation id and success/error discriminant out of replies.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Number of random bytes in a correlation id (hex-encoded on the wire).
const REQUEST_ID_LEN: usize = 8;

/// Operation delegated to the remote signer.
///
/// The client only routes these; interpreting a method's params and result
/// is between the caller and the signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    /// Initial handshake, authorized by the shared secret.
    Connect,
    /// Ask for the end-user's public key.
    GetPublicKey,
    /// Sign an event on the user's behalf.
    SignEvent,
    /// Liveness check.
    Ping,
    Nip04Encrypt,
    Nip04Decrypt,
    Nip44Encrypt,
    Nip44Decrypt,
    /// A method this client does not know; forwarded verbatim.
    Other(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Connect => "connect",
            Method::GetPublicKey => "get_public_key",
            Method::SignEvent => "sign_event",
            Method::Ping => "ping",
            Method::Nip04Encrypt => "nip04_encrypt",
            Method::Nip04Decrypt => "nip04_decrypt",
            Method::Nip44Encrypt => "nip44_encrypt",
            Method::Nip44Decrypt => "nip44_decrypt",
            Method::Other(name) => name,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outbound request with its correlation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub method: String,
    pub params: Vec<String>,
}

impl Request {
    /// Build a request with a fresh correlation id.
    pub fn new(method: &Method, params: Vec<String>) -> Self {
        Self {
            id: request_id(),
            method: method.as_str().to_string(),
            params,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::Transport(format!("failed to encode request: {e}")))
    }
}

/// An inbound reply, matched back to its request by `id`.
#[derive(Debug, Clone)]
pub struct Response {
    pub id: String,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl Response {
    /// Parse a reply body. Non-string results are kept as their JSON text so
    /// the caller can interpret them.
    pub fn from_json(payload: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(payload)
            .map_err(|e| Error::Transport(format!("undecodable response: {e}")))?;

        let id = value
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let error = value
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_string);
        let result = match value.get("result") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        };

        Ok(Self { id, result, error })
    }

    /// Collapse the success/error discriminant into a `Result`.
    pub fn into_result(self) -> Result<String> {
        if let Some(error) = self.error {
            return Err(Error::Rpc(error));
        }
        Ok(self.result.unwrap_or_default())
    }
}

/// Fresh random correlation id.
pub(crate) fn request_id() -> String {
    use rand::RngCore;

    let mut bytes = [0u8; REQUEST_ID_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serializes_wire_fields() {
        let request = Request::new(&Method::SignEvent, vec!["{\"kind\":1}".to_string()]);
        let json = request.to_json().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["id"], Value::String(request.id.clone()));
        assert_eq!(value["method"], "sign_event");
        assert_eq!(value["params"][0], "{\"kind\":1}");
    }

    #[test]
    fn test_request_ids_are_distinct() {
        let a = Request::new(&Method::Ping, Vec::new());
        let b = Request::new(&Method::Ping, Vec::new());
        assert_ne!(a.id, b.id);
        assert_eq!(a.id.len(), REQUEST_ID_LEN * 2);
    }

    #[test]
    fn test_method_wire_names() {
        assert_eq!(Method::Connect.as_str(), "connect");
        assert_eq!(Method::GetPublicKey.as_str(), "get_public_key");
        assert_eq!(Method::Nip44Decrypt.as_str(), "nip44_decrypt");
        assert_eq!(Method::Other("describe".to_string()).as_str(), "describe");
    }

    #[test]
    fn test_response_string_result() {
        let response = Response::from_json(r#"{"id":"r1","result":"pong"}"#).unwrap();
        assert_eq!(response.id, "r1");
        assert_eq!(response.into_result().unwrap(), "pong");
    }

    #[test]
    fn test_response_object_result_kept_as_json_text() {
        let response =
            Response::from_json(r#"{"id":"r2","result":{"kind":1,"content":"hi"}}"#).unwrap();
        let text = response.into_result().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["kind"], 1);
    }

    #[test]
    fn test_response_null_fields() {
        let response =
            Response::from_json(r#"{"id":"r3","result":null,"error":null}"#).unwrap();
        assert!(response.result.is_none());
        assert!(response.error.is_none());
    }

    #[test]
    fn test_response_error_discriminant() {
        let response =
            Response::from_json(r#"{"id":"r4","error":"unauthorized"}"#).unwrap();
        match response.into_result().unwrap_err() {
            Error::Rpc(detail) => assert_eq!(detail, "unauthorized"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_response_rejects_garbage() {
        assert!(Response::from_json("not json").is_err());
    }
}
