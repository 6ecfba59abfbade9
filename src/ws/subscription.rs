//! Subscription tracking for batched (un)subscribe requests
//!
//! The set holds channel identifiers the consumer currently wants. It is the
//! source of truth for filtering inbound data and for resubscribing after a
//! reconnect. Requests are split into batches of at most [`MAX_BATCH_SIZE`].

use std::collections::HashSet;

/// Maximum channels per (un)subscribe request
pub const MAX_BATCH_SIZE: usize = 20;

/// A subscription descriptor
///
/// Identity is the channel string; two descriptors with the same channel are
/// the same subscription.
pub trait Subscription: Send + 'static {
    /// Venue channel identifier, e.g. `publicTrade.BTCUSDT`
    fn channel(&self) -> String;
}

impl Subscription for String {
    fn channel(&self) -> String {
        self.clone()
    }
}

/// Deduplicated set of channel identifiers
#[derive(Debug, Default, Clone)]
pub struct SubscriptionSet {
    channels: HashSet<String>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    #[inline]
    pub fn contains(&self, channel: &str) -> bool {
        self.channels.contains(channel)
    }

    /// Returns `true` if the channel was not present
    pub fn insert(&mut self, channel: impl Into<String>) -> bool {
        self.channels.insert(channel.into())
    }

    /// Returns `true` if the channel was present
    pub fn remove(&mut self, channel: &str) -> bool {
        self.channels.remove(channel)
    }

    /// Insert every channel, returning those that were not already present
    ///
    /// Input order is kept; duplicates within the input are reported once.
    pub fn add_new<I>(&mut self, channels: I) -> Vec<String>
    where
        I: IntoIterator<Item = String>,
    {
        channels
            .into_iter()
            .filter(|ch| self.channels.insert(ch.clone()))
            .collect()
    }

    /// Remove every channel, returning those that were present
    pub fn remove_present<I>(&mut self, channels: I) -> Vec<String>
    where
        I: IntoIterator<Item = String>,
    {
        channels
            .into_iter()
            .filter(|ch| self.channels.remove(ch.as_str()))
            .collect()
    }

    /// All channels, sorted for stable request ordering
    pub fn to_vec(&self) -> Vec<String> {
        let mut all: Vec<String> = self.channels.iter().cloned().collect();
        all.sort_unstable();
        all
    }
}

impl FromIterator<String> for SubscriptionSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            channels: iter.into_iter().collect(),
        }
    }
}

/// Split `channels` into request-sized batches
///
/// An empty input yields no batches, so no request is sent.
pub fn batches(channels: &[String], max_batch: usize) -> std::slice::Chunks<'_, String> {
    channels.chunks(max_batch.max(1))
}
