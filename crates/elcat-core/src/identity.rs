//! Stable identity for one physical flight leg across sources.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Width of the departure-time bucket the identity floors into, in seconds.
///
/// The floor is fixed, non-overlapping and asymmetric: two departures a few
/// minutes apart that straddle a bucket boundary hash to different identities
/// even when they describe the same real flight. That is the contract, not a
/// bug to smooth over; widening the bucket trades missed matches for false
/// merges.
pub const IDENTITY_BUCKET_SECS: i64 = 300;

/// Floor a timestamp to the start of its identity bucket, second precision.
pub fn floor_to_bucket(ts: DateTime<Utc>) -> DateTime<Utc> {
    let secs = ts.timestamp();
    let floored = secs - secs.rem_euclid(IDENTITY_BUCKET_SECS);
    DateTime::from_timestamp(floored, 0).expect("bucket floor of a valid timestamp is in range")
}

/// Derive the identity key for a leg: uppercased codes, bucketed departure,
/// case-folded aircraft, joined and digested. Pure — no clock, no I/O;
/// identical inputs always produce identical output.
pub fn identity_hash(
    origin: &str,
    destination: &str,
    departure: DateTime<Utc>,
    aircraft: Option<&str>,
) -> String {
    let origin = origin.trim().to_ascii_uppercase();
    let destination = destination.trim().to_ascii_uppercase();
    let bucket = floor_to_bucket(departure)
        .format("%Y-%m-%dT%H:%M:%SZ")
        .to_string();
    let aircraft = aircraft.unwrap_or("").trim().to_ascii_lowercase();

    let key = [
        origin.as_str(),
        destination.as_str(),
        bucket.as_str(),
        aircraft.as_str(),
    ]
    .join("|");

    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 9, h, m, s).single().unwrap()
    }

    #[test]
    fn identical_inputs_always_hash_identically() {
        let a = identity_hash("FRA", "JFK", at(10, 6, 0), Some("Citation XLS"));
        let b = identity_hash("FRA", "JFK", at(10, 6, 0), Some("Citation XLS"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn codes_and_aircraft_are_case_and_whitespace_insensitive() {
        let a = identity_hash(" fra ", "jfk", at(10, 6, 0), Some(" CITATION xls "));
        let b = identity_hash("FRA", "JFK", at(10, 6, 0), Some("citation xls"));
        assert_eq!(a, b);
    }

    #[test]
    fn missing_aircraft_equals_empty_aircraft() {
        let a = identity_hash("FRA", "JFK", at(10, 6, 0), None);
        let b = identity_hash("FRA", "JFK", at(10, 6, 0), Some(""));
        assert_eq!(a, b);
    }

    #[test]
    fn departures_within_one_bucket_collapse() {
        // 10:05:00 and 10:09:59 share the 10:05 bucket.
        let a = identity_hash("FRA", "JFK", at(10, 5, 0), None);
        let b = identity_hash("FRA", "JFK", at(10, 9, 59), None);
        assert_eq!(a, b);
    }

    #[test]
    fn departures_straddling_a_bucket_boundary_split() {
        // 10:04:59 floors to 10:00, 10:05:00 floors to 10:05.
        let a = identity_hash("FRA", "JFK", at(10, 4, 59), None);
        let b = identity_hash("FRA", "JFK", at(10, 5, 0), None);
        assert_ne!(a, b);
    }

    #[test]
    fn route_direction_matters() {
        let out = identity_hash("FRA", "JFK", at(10, 5, 0), None);
        let back = identity_hash("JFK", "FRA", at(10, 5, 0), None);
        assert_ne!(out, back);
    }

    #[test]
    fn floor_keeps_exact_bucket_starts() {
        let start = at(10, 5, 0);
        assert_eq!(floor_to_bucket(start), start);
        assert_eq!(floor_to_bucket(at(10, 9, 59)), start);
    }
}
