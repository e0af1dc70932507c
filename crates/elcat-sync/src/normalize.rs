//! Observation normalizer.
//!
//! Turns one [`RawObservation`] into a [`NormalizedObservation`] or drops it
//! with a reason. Rejects are logged by the caller and never surface past the
//! pipeline.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use elcat_core::{NormalizedObservation, ObservedStatus, RawObservation, RawPrice};
use serde_json::json;
use thiserror::Error;

/// Longest plausible leg. Arrivals further out (or not after departure at
/// all) are treated as parsing noise and cleared, not rejected.
const MAX_LEG_DURATION_HOURS: i64 = 24;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeReject {
    #[error("missing origin or destination code")]
    MissingRoute,
    #[error("missing departure timestamp")]
    MissingDeparture,
    #[error("unparseable departure timestamp {0:?}")]
    BadDeparture(String),
}

pub fn normalize(
    raw: &RawObservation,
    observed_at: DateTime<Utc>,
) -> Result<NormalizedObservation, NormalizeReject> {
    let origin = raw.origin.trim().to_ascii_uppercase();
    let destination = raw.destination.trim().to_ascii_uppercase();
    if origin.is_empty() || destination.is_empty() {
        return Err(NormalizeReject::MissingRoute);
    }

    let offset = FixedOffset::east_opt(raw.utc_offset_secs)
        .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset is valid"));

    let departure_text = raw
        .departure
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(NormalizeReject::MissingDeparture)?;
    let departure = parse_timestamp(departure_text, offset)
        .ok_or_else(|| NormalizeReject::BadDeparture(departure_text.to_string()))?;

    let mut arrival = raw
        .arrival
        .as_deref()
        .and_then(|text| parse_timestamp(text.trim(), offset));
    if let Some(arr) = arrival {
        let delta = arr - departure;
        if delta <= Duration::zero() || delta > Duration::hours(MAX_LEG_DURATION_HOURS) {
            arrival = None;
        }
    }

    let price_current = raw.price_current.as_ref().and_then(coerce_price);
    let price_normal = raw.price_normal.as_ref().and_then(coerce_price);

    // Outside the allow-list everything collapses to the base currency; the
    // reported value survives below in the audit payload.
    let currency = raw.currency.parse().unwrap_or_default();

    // Status is price-driven: sources contradict their own labels often
    // enough that a positive bookable price is the only signal trusted.
    let status = if price_current.is_some() {
        ObservedStatus::Available
    } else {
        ObservedStatus::Pending
    };

    let mut audit = match raw.raw.clone() {
        serde_json::Value::Object(map) => map,
        serde_json::Value::Null => serde_json::Map::new(),
        other => {
            let mut map = serde_json::Map::new();
            map.insert("payload".to_string(), other);
            map
        }
    };
    audit.insert("reported_currency".to_string(), json!(raw.currency));
    audit.insert("reported_status".to_string(), json!(raw.status_text));

    Ok(NormalizedObservation {
        source: raw.source.clone(),
        origin,
        destination,
        origin_name: raw.origin_name.clone(),
        destination_name: raw.destination_name.clone(),
        departure,
        arrival,
        aircraft: raw
            .aircraft
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        currency,
        price_current,
        price_normal,
        link: raw.link.clone(),
        status,
        observed_at: truncate_to_seconds(observed_at),
        raw: serde_json::Value::Object(audit),
    })
}

/// Parse a flexible timestamp representation into UTC, second precision.
/// Zone-less values are interpreted in the adapter-supplied offset.
pub fn parse_timestamp(text: &str, offset: FixedOffset) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(truncate_to_seconds(ts.with_timezone(&Utc)));
    }

    const NAIVE_FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%d.%m.%Y %H:%M",
        "%d-%m-%Y %H:%M",
    ];
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return local_to_utc(naive, offset);
        }
    }

    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d.%m.%Y", "%d-%m-%Y"];
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return local_to_utc(date.and_hms_opt(0, 0, 0)?, offset);
        }
    }

    None
}

fn local_to_utc(naive: NaiveDateTime, offset: FixedOffset) -> Option<DateTime<Utc>> {
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|ts| truncate_to_seconds(ts.with_timezone(&Utc)))
}

fn truncate_to_seconds(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(ts.timestamp(), 0).unwrap_or(ts)
}

fn coerce_price(price: &RawPrice) -> Option<f64> {
    match price {
        RawPrice::Number(n) if n.is_finite() && *n > 0.0 => Some(*n),
        RawPrice::Number(_) => None,
        RawPrice::Text(text) => parse_money(text),
    }
}

/// Coerce a grouped/decimal-formatted price fragment to a positive float.
/// Accepts surrounding text (`"Book for € 1.190"`), both grouping styles
/// (`"12.000"`, `"8,700"`), and decimal forms (`"1.234,56"`, `"8700.50"`).
pub fn parse_money(text: &str) -> Option<f64> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let group: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    let group = group.trim_end_matches(['.', ',']);

    let dots = group.matches('.').count();
    let commas = group.matches(',').count();

    let cleaned = if dots > 0 && commas > 0 {
        // Rightmost separator is the decimal point, the other is grouping.
        let decimal = if group.rfind('.') > group.rfind(',') { '.' } else { ',' };
        let grouping = if decimal == '.' { ',' } else { '.' };
        group.replace(grouping, "").replace(decimal, ".")
    } else if dots + commas == 1 {
        let separator = if dots == 1 { '.' } else { ',' };
        let tail_len = group
            .rsplit(separator)
            .next()
            .map(str::len)
            .unwrap_or_default();
        if tail_len == 3 {
            // "12.000" / "8,700" are grouped thousands.
            group.replace(separator, "")
        } else {
            group.replace(',', ".")
        }
    } else if dots > 1 {
        group.replace('.', "")
    } else if commas > 1 {
        group.replace(',', "")
    } else {
        group.to_string()
    };

    let value: f64 = cleaned.parse().ok()?;
    if value.is_finite() && value > 0.0 {
        Some(value)
    } else {
        None
    }
}
