//! Lenient numeric parsing shared by venue records
//!
//! Venues disagree on number encoding: Bybit sends prices as JSON strings,
//! Deribit as JSON numbers. Fields declared with these helpers accept both
//! and serialize back as strings.

use crate::stream::codec::CodecError;
use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::ser::{SerializeTuple, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Parse a decimal string; an empty string reads as zero
#[inline]
pub fn parse_f64(text: &str) -> Result<f64, CodecError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(0.0);
    }
    text.parse::<f64>()
        .map_err(|_| CodecError::InvalidNumber(text.to_string()))
}

struct FlexVisitor;

impl<'de> Visitor<'de> for FlexVisitor {
    type Value = Option<f64>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a number or a numeric string")
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        Ok(Some(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        if v.trim().is_empty() {
            return Ok(None);
        }
        parse_f64(v).map(Some).map_err(E::custom)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
        d.deserialize_any(FlexVisitor)
    }
}

#[inline]
fn format_f64(v: f64) -> String {
    // Display gives the shortest round-trip form without exponent
    v.to_string()
}

/// `f64` from a JSON string or number; `""` and `null` read as zero
pub mod flex_f64 {
    use super::*;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        Ok(d.deserialize_any(FlexVisitor)?.unwrap_or(0.0))
    }

    pub fn serialize<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_f64(*v))
    }
}

/// `Option<f64>` from a JSON string, number or null; `""` reads as `None`
pub mod opt_flex_f64 {
    use super::*;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        d.deserialize_any(FlexVisitor)
    }

    pub fn serialize<S: Serializer>(v: &Option<f64>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(v) => s.serialize_str(&format_f64(*v)),
            None => s.serialize_none(),
        }
    }
}

/// One order book level
///
/// Wire form is a `[price, amount]` pair of strings or numbers. A trailing
/// element, if present, is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Level {
    pub price: f64,
    pub amount: f64,
}

impl Level {
    pub fn new(price: f64, amount: f64) -> Self {
        Self { price, amount }
    }
}

impl<'de> Deserialize<'de> for Level {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        struct LevelVisitor;

        impl<'de> Visitor<'de> for LevelVisitor {
            type Value = Level;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a [price, amount] pair")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Level, A::Error> {
                let price = seq
                    .next_element::<Flex>()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let amount = seq
                    .next_element::<Flex>()?
                    .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                while seq.next_element::<de::IgnoredAny>()?.is_some() {}
                Ok(Level::new(price.0, amount.0))
            }
        }

        d.deserialize_seq(LevelVisitor)
    }
}

impl Serialize for Level {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let mut tup = s.serialize_tuple(2)?;
        tup.serialize_element(&format_f64(self.price))?;
        tup.serialize_element(&format_f64(self.amount))?;
        tup.end()
    }
}

struct Flex(f64);

impl<'de> Deserialize<'de> for Flex {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        flex_f64::deserialize(d).map(Flex)
    }
}
