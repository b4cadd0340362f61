//! Confirmation-depth cache policy.
//!
//! A record buried deep enough under the chain tip will not be reorganized
//! away, so its response may be cached by clients and shared caches.

use axum::http::HeaderValue;
use axum::http::header::{CACHE_CONTROL, HeaderMap};

/// Blocks a record must be buried beneath the tip before it is cacheable.
pub const CACHEABLE_DEPTH: u64 = 100;

/// How long a cacheable response may be kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    /// Thirty days.
    Month,
}

impl CacheTier {
    #[must_use]
    pub const fn max_age_secs(self) -> u64 {
        match self {
            Self::Month => 30 * 24 * 60 * 60,
        }
    }

    const fn header_value(self) -> HeaderValue {
        match self {
            Self::Month => HeaderValue::from_static("public, max-age=2592000, s-maxage=2592000"),
        }
    }

    /// Writes the `Cache-Control` directive for this tier.
    pub fn apply(self, headers: &mut HeaderMap) {
        headers.insert(CACHE_CONTROL, self.header_value());
    }
}

/// Decides the cache tier of a record at `record_height` given the current
/// `tip_height`. Unknown heights on either side are never cacheable.
#[must_use]
pub fn evaluate(tip_height: Option<u64>, record_height: Option<u64>) -> Option<CacheTier> {
    let depth = tip_height?.checked_sub(record_height?)?;
    (depth > CACHEABLE_DEPTH).then_some(CacheTier::Month)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_threshold_is_strict() {
        assert_eq!(evaluate(Some(1_000), Some(850)), Some(CacheTier::Month));
        assert_eq!(evaluate(Some(1_000), Some(899)), Some(CacheTier::Month));
        assert_eq!(evaluate(Some(1_000), Some(900)), None);
        assert_eq!(evaluate(Some(1_000), Some(1_000)), None);
    }

    #[test]
    fn unknown_heights_are_not_cacheable() {
        assert_eq!(evaluate(None, Some(1)), None);
        assert_eq!(evaluate(Some(1_000), None), None);
        assert_eq!(evaluate(None, None), None);
    }

    #[test]
    fn records_above_the_tip_are_not_cacheable() {
        assert_eq!(evaluate(Some(10), Some(500)), None);
    }

    #[test]
    fn month_header_matches_max_age() {
        let mut headers = HeaderMap::new();
        CacheTier::Month.apply(&mut headers);
        let value = headers[CACHE_CONTROL].to_str().expect("ascii");
        assert_eq!(value, "public, max-age=2592000, s-maxage=2592000");
        assert!(value.contains(&CacheTier::Month.max_age_secs().to_string()));
    }
}
