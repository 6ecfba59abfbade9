//! Payload decoding seam between the session and venue records
//!
//! A decoder turns one classified payload into an owned record. It only
//! borrows the parsed frame for the duration of the call.

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// Errors raised by payload decoders
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("invalid number `{0}`")]
    InvalidNumber(String),
}

/// Decoder for one record type
pub type DecodeFn<T> = fn(&Value) -> Result<T, CodecError>;

/// Generic serde decoder, usable as a [`DecodeFn`]
#[inline]
pub fn decode_json<T: DeserializeOwned>(payload: &Value) -> Result<T, CodecError> {
    T::deserialize(payload).map_err(CodecError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        value: i64,
    }

    #[test]
    fn test_decode_json() {
        let decode: DecodeFn<Sample> = decode_json::<Sample>;
        let sample = decode(&json!({"name": "a", "value": 3, "extra": true})).unwrap();
        assert_eq!(sample, Sample { name: "a".into(), value: 3 });
    }

    #[test]
    fn test_decode_json_error() {
        let err = decode_json::<Sample>(&json!({"name": "a"})).unwrap_err();
        assert!(matches!(err, CodecError::Json(_)));
        assert!(err.to_string().contains("value"));
    }
}
