//! Conversions between `chrono` and protobuf timestamps.

use chrono::{DateTime, Utc};
use prost_types::Timestamp;

/// Convert a UTC time to a protobuf `Timestamp`.
#[must_use]
pub fn to_proto(time: DateTime<Utc>) -> Timestamp {
    Timestamp {
        seconds: time.timestamp(),
        // subsec nanos are < 2e9 (leap seconds included)
        nanos: i32::try_from(time.timestamp_subsec_nanos()).unwrap_or(0),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_to_proto() {
        let time = DateTime::<Utc>::from_timestamp(1_700_000_000, 250_000_000).unwrap();
        let ts = to_proto(time);
        assert_eq!(ts.seconds, 1_700_000_000);
        assert_eq!(ts.nanos, 250_000_000);
    }
}
