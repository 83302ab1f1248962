// Copyright MongoDB, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Monotonic deadlines for blocking operations

use core::time::Duration;
use std::time::Instant;

/// A point in time after which a blocking operation gives up.
///
/// A deadline is either infinite, not yet expired (positive remaining) or
/// expired (zero remaining). Deadlines are compared against the monotonic
/// clock and are unrelated to any calendar time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub const INFINITE: Self = Self(None);

    #[inline]
    pub fn infinite() -> Self {
        Self::INFINITE
    }

    /// A deadline the given duration from now
    #[inline]
    pub fn after(timeout: Duration) -> Self {
        // an overflowing addition is indistinguishable from infinite
        Self(Instant::now().checked_add(timeout))
    }

    /// A deadline `millis` from now; negative values mean infinite
    #[inline]
    pub fn from_millis(millis: i64) -> Self {
        if millis < 0 {
            Self::INFINITE
        } else {
            Self::after(Duration::from_millis(millis as u64))
        }
    }

    #[inline]
    pub fn is_infinite(&self) -> bool {
        self.0.is_none()
    }

    /// Returns the time left until the deadline, or `None` when infinite.
    ///
    /// An expired deadline reports a zero duration.
    #[inline]
    pub fn remaining(&self) -> Option<Duration> {
        self.0
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    #[inline]
    pub fn has_expired(&self) -> bool {
        matches!(self.remaining(), Some(Duration::ZERO))
    }

    /// Moves the deadline earlier by the given amount
    #[inline]
    pub fn shorten_by(&self, amount: Duration) -> Self {
        Self(self.0.map(|at| at.checked_sub(amount).unwrap_or_else(Instant::now)))
    }

    /// The instant the deadline elapses, when finite
    #[inline]
    pub fn instant(&self) -> Option<Instant> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infinite_never_expires() {
        let deadline = Deadline::from_millis(-1);
        assert!(deadline.is_infinite());
        assert!(!deadline.has_expired());
        assert_eq!(deadline.remaining(), None);
    }

    #[test]
    fn zero_expires_immediately() {
        let deadline = Deadline::after(Duration::ZERO);
        assert!(deadline.has_expired());
        assert_eq!(deadline.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn future_deadline_reports_remaining() {
        let deadline = Deadline::after(Duration::from_secs(60));
        assert!(!deadline.has_expired());
        assert!(deadline.remaining().unwrap() > Duration::from_secs(30));
    }

    #[test]
    fn shorten_keeps_infinite() {
        let deadline = Deadline::infinite().shorten_by(Duration::from_secs(1));
        assert!(deadline.is_infinite());

        let deadline = Deadline::after(Duration::from_secs(60)).shorten_by(Duration::from_secs(30));
        assert!(deadline.remaining().unwrap() <= Duration::from_secs(30));
    }
}
