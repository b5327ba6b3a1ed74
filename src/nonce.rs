//! Response-nonce parsing and freshness.

use chrono::NaiveDateTime;

use crate::errors::{Error, Result};

/// Maximum accepted skew between a nonce timestamp and local time, seconds.
pub const FRESHNESS_WINDOW: i64 = 7200;

/// A provider-issued response nonce: an ISO-8601 UTC second timestamp
/// followed by an arbitrary ASCII uniqueness suffix.
///
/// Replay bookkeeping (remembering seen nonces per endpoint) belongs to the
/// external store; this type only parses and freshness-checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nonce {
    epoch: i64,
    suffix: String,
}

impl Nonce {
    /// Parse `YYYY-MM-DDTHH:MM:SSZ<suffix>`.
    pub fn parse(s: &str) -> Result<Self> {
        let malformed = || Error::MalformedNonce(s.to_owned());

        let stamp = s.get(..20).ok_or_else(malformed)?;
        let parsed =
            NaiveDateTime::parse_from_str(stamp, "%Y-%m-%dT%H:%M:%SZ").map_err(|_| malformed())?;

        let suffix = &s[20..];
        if !suffix.is_ascii() {
            return Err(malformed());
        }

        Ok(Self {
            epoch: parsed.and_utc().timestamp(),
            suffix: suffix.to_owned(),
        })
    }

    /// Whether the timestamp lies within the freshness window around `now`.
    pub fn is_fresh(&self, now: i64) -> bool {
        (now - self.epoch).abs() <= FRESHNESS_WINDOW
    }

    /// Epoch seconds of the timestamp part.
    pub fn epoch(&self) -> i64 {
        self.epoch
    }

    /// The uniqueness suffix, for replay-store keying.
    pub fn suffix(&self) -> &str {
        &self.suffix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_timestamp_and_suffix() {
        let nonce = Nonce::parse("2005-05-15T17:11:51ZUNIQUE").unwrap();
        assert_eq!(nonce.epoch(), 1116177111);
        assert_eq!(nonce.suffix(), "UNIQUE");
    }

    #[test]
    fn empty_suffix_is_fine() {
        let nonce = Nonce::parse("2005-05-15T17:11:51Z").unwrap();
        assert_eq!(nonce.suffix(), "");
    }

    #[test]
    fn freshness_window_is_inclusive() {
        let nonce = Nonce::parse("2005-05-15T17:11:51Z0").unwrap();
        let epoch = nonce.epoch();
        assert!(nonce.is_fresh(epoch + FRESHNESS_WINDOW));
        assert!(nonce.is_fresh(epoch - FRESHNESS_WINDOW));
        assert!(!nonce.is_fresh(epoch + FRESHNESS_WINDOW + 1));
        assert!(!nonce.is_fresh(epoch - FRESHNESS_WINDOW - 1));
    }

    #[test]
    fn rejects_garbage() {
        assert!(Nonce::parse("yesterday, around noon").is_err());
        assert!(Nonce::parse("2005-05-15").is_err());
        assert!(Nonce::parse("2005-05-15T17:11:51Xabc").is_err());
    }
}
