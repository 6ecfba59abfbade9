//! Reconnect classification for session-level errors
//!
//! An ordered, injectable list of matchers decides whether an error coming
//! out of a connection is worth a reconnect or terminates the stream.

use crate::{ErrorKind, StreamError};
use std::borrow::Cow;

/// Error text fragments that mark a transient transport failure
pub const DEFAULT_RECONNECT_PATTERNS: [&str; 4] = [
    "read tcp",
    "write tcp",
    "websocket: close sent",
    "websocket: bad handshake",
];

/// Single reconnect rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorMatcher {
    /// Error display text contains the fragment
    Substring(Cow<'static, str>),
    /// Error belongs to the category
    Kind(ErrorKind),
}

impl ErrorMatcher {
    pub fn substring(fragment: impl Into<Cow<'static, str>>) -> Self {
        ErrorMatcher::Substring(fragment.into())
    }

    #[inline]
    pub fn matches(&self, err: &StreamError) -> bool {
        match self {
            ErrorMatcher::Substring(fragment) => err.to_string().contains(fragment.as_ref()),
            ErrorMatcher::Kind(kind) => err.kind() == *kind,
        }
    }
}

/// Decides reconnect vs terminate
///
/// Dial exhaustion on first start and cancellation are never reconnectable,
/// whatever the matchers say. A failed in-place re-dial is judged by the
/// error that ended its last attempt.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    matchers: Vec<ErrorMatcher>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(
            DEFAULT_RECONNECT_PATTERNS
                .iter()
                .map(|p| ErrorMatcher::Substring(Cow::Borrowed(*p)))
                .collect(),
        )
    }
}

impl ErrorClassifier {
    /// Classifier with exactly these matchers
    pub fn new(matchers: Vec<ErrorMatcher>) -> Self {
        Self { matchers }
    }

    /// Append a matcher, keeping the existing ones
    pub fn with_matcher(mut self, matcher: ErrorMatcher) -> Self {
        self.matchers.push(matcher);
        self
    }

    pub fn matchers(&self) -> &[ErrorMatcher] {
        &self.matchers
    }

    pub fn is_reconnectable(&self, err: &StreamError) -> bool {
        if matches!(err.kind(), ErrorKind::Dial | ErrorKind::Cancelled) {
            return false;
        }
        self.matchers.iter().any(|m| m.matches(err))
    }
}
