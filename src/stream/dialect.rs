//! Wire dialects for subscription-based venues
//!
//! Two shapes cover the supported venues:
//! - `Topic`: `{"op":"subscribe","args":[...]}` requests, data frames keyed by
//!   `"topic"` (Bybit V5)
//! - `Rpc`: JSON-RPC 2.0 requests, data delivered as `"subscription"`
//!   notifications keyed by `params.channel` (Deribit)

use super::Credentials;
use crate::{Result, StreamError};
use hmac::{Hmac, Mac};
use secrecy::ExposeSecret;
use serde_json::{json, Value};
use sha2::Sha256;
use time::OffsetDateTime;

type HmacSha256 = Hmac<Sha256>;

/// Signed auth requests stay valid this long (ms)
const AUTH_EXPIRY_MS: i64 = 10_000;

/// Request builder and envelope classifier for one venue protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Topic/op protocol
    Topic,
    /// JSON-RPC protocol; `private` selects the `private/*` subscribe methods
    Rpc { private: bool },
}

/// Classified inbound frame
#[derive(Debug, PartialEq)]
pub enum Envelope<'a> {
    /// Acknowledgement, pong, heartbeat: dropped
    Control,
    /// Channel data; `payload` goes to the codec
    Data { channel: &'a str, payload: &'a Value },
}

impl Dialect {
    /// One subscribe request for an already batched list of channels
    pub fn subscribe_request(&self, channels: &[String], id: i64) -> String {
        match self {
            Dialect::Topic => json!({ "op": "subscribe", "args": channels }).to_string(),
            Dialect::Rpc { private } => {
                let method = if *private { "private/subscribe" } else { "public/subscribe" };
                rpc_request(method, json!({ "channels": channels }), id)
            }
        }
    }

    pub fn unsubscribe_request(&self, channels: &[String], id: i64) -> String {
        match self {
            Dialect::Topic => json!({ "op": "unsubscribe", "args": channels }).to_string(),
            Dialect::Rpc { private } => {
                let method = if *private { "private/unsubscribe" } else { "public/unsubscribe" };
                rpc_request(method, json!({ "channels": channels }), id)
            }
        }
    }

    /// Application-level keepalive
    pub fn heartbeat(&self, id: i64) -> String {
        match self {
            Dialect::Topic => json!({ "op": "ping" }).to_string(),
            Dialect::Rpc { .. } => rpc_request("public/test", json!({}), id),
        }
    }

    /// Authentication request sent before any resubscription
    pub fn auth_request(&self, creds: &Credentials, id: i64) -> Result<String> {
        self.auth_request_at(creds, id, now_millis())
    }

    /// Same as [`Dialect::auth_request`] with an explicit clock, in ms
    pub fn auth_request_at(&self, creds: &Credentials, id: i64, now_ms: i64) -> Result<String> {
        match self {
            Dialect::Topic => {
                let expires = now_ms + AUTH_EXPIRY_MS;
                let signature =
                    sign(creds.client_secret.expose_secret(), &format!("GET/realtime{expires}"))?;
                Ok(json!({
                    "op": "auth",
                    "args": [creds.client_id, expires, signature],
                })
                .to_string())
            }
            Dialect::Rpc { .. } => Ok(rpc_request(
                "public/auth",
                json!({
                    "grant_type": "client_credentials",
                    "client_id": creds.client_id,
                    "client_secret": creds.client_secret.expose_secret(),
                }),
                id,
            )),
        }
    }

    /// Split a parsed frame into control traffic and channel data
    ///
    /// # Errors
    /// - [`StreamError::Server`] for venue error responses
    /// - [`StreamError::InvalidMessage`] for frames that fit neither shape
    pub fn classify<'a>(&self, frame: &'a Value) -> Result<Envelope<'a>> {
        if !frame.is_object() {
            return Err(StreamError::InvalidMessage(format!(
                "expected object, got {}",
                truncate(frame)
            )));
        }
        match self {
            Dialect::Topic => classify_topic(frame),
            Dialect::Rpc { .. } => classify_rpc(frame),
        }
    }
}

fn classify_topic(frame: &Value) -> Result<Envelope<'_>> {
    if frame.get("op").is_some() {
        if frame.get("success").and_then(Value::as_bool) == Some(false) {
            let reason = frame.get("ret_msg").and_then(Value::as_str).unwrap_or("rejected");
            return Err(StreamError::Server(reason.to_string()));
        }
        return Ok(Envelope::Control);
    }
    match frame.get("topic").and_then(Value::as_str) {
        Some(channel) => Ok(Envelope::Data {
            channel,
            payload: frame,
        }),
        None => Err(StreamError::InvalidMessage(format!(
            "frame without topic: {}",
            truncate(frame)
        ))),
    }
}

fn classify_rpc(frame: &Value) -> Result<Envelope<'_>> {
    let Some(method) = frame.get("method").and_then(Value::as_str) else {
        // Response to one of our requests
        if let Some(err) = frame.get("error") {
            return Err(StreamError::Server(err.to_string()));
        }
        return Ok(Envelope::Control);
    };
    if method != "subscription" {
        return Ok(Envelope::Control);
    }

    let params = frame
        .get("params")
        .ok_or_else(|| StreamError::InvalidMessage("subscription without params".into()))?;
    let channel = params
        .get("channel")
        .and_then(Value::as_str)
        .ok_or_else(|| StreamError::InvalidMessage("subscription without channel".into()))?;
    let payload = params
        .get("data")
        .ok_or_else(|| StreamError::InvalidMessage("subscription without data".into()))?;

    Ok(Envelope::Data { channel, payload })
}

fn rpc_request(method: &str, params: Value, id: i64) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
    .to_string()
}

fn sign(secret: &str, payload: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| StreamError::Config(format!("invalid signing key: {e}")))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

fn truncate(frame: &Value) -> String {
    let mut text = frame.to_string();
    if text.len() > 256 {
        let mut cut = 256;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("...");
    }
    text
}
