//! Core domain model for the empty-leg catalog.

pub mod airports;
pub mod identity;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "elcat-core";

/// Currency allow-list. Anything a source reports outside this list is
/// normalized to the base currency (EUR); the reported value survives in the
/// observation's audit payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    #[default]
    Eur,
    Usd,
    Gbp,
    Chf,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Eur => "EUR",
            Currency::Usd => "USD",
            Currency::Gbp => "GBP",
            Currency::Chf => "CHF",
        }
    }
}

#[derive(Debug, Error)]
#[error("currency {0:?} is not in the allow-list")]
pub struct UnknownCurrency(pub String);

impl std::str::FromStr for Currency {
    type Err = UnknownCurrency;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EUR" => Ok(Currency::Eur),
            "USD" => Ok(Currency::Usd),
            "GBP" => Ok(Currency::Gbp),
            "CHF" => Ok(Currency::Chf),
            other => Err(UnknownCurrency(other.to_string())),
        }
    }
}

/// Status carried by a single observation or provider ref. Observations never
/// report `unavailable`; that state exists only on canonical rows, written by
/// the staleness sweeper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservedStatus {
    Available,
    Pending,
}

impl ObservedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObservedStatus::Available => "available",
            ObservedStatus::Pending => "pending",
        }
    }
}

/// Status of a canonical flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlightStatus {
    Available,
    Pending,
    Unavailable,
}

impl FlightStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlightStatus::Available => "available",
            FlightStatus::Pending => "pending",
            FlightStatus::Unavailable => "unavailable",
        }
    }
}

impl From<ObservedStatus> for FlightStatus {
    fn from(status: ObservedStatus) -> Self {
        match status {
            ObservedStatus::Available => FlightStatus::Available,
            ObservedStatus::Pending => FlightStatus::Pending,
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown flight status {0:?}")]
pub struct UnknownStatus(pub String);

impl std::str::FromStr for FlightStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(FlightStatus::Available),
            "pending" => Ok(FlightStatus::Pending),
            "unavailable" => Ok(FlightStatus::Unavailable),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Price as reported by a source: already numeric, or a formatted string
/// like `"12.000"` / `"8,700"` that the normalizer coerces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawPrice {
    Number(f64),
    Text(String),
}

impl From<f64> for RawPrice {
    fn from(value: f64) -> Self {
        RawPrice::Number(value)
    }
}

impl From<&str> for RawPrice {
    fn from(value: &str) -> Self {
        RawPrice::Text(value.to_string())
    }
}

/// One raw observation handed over by a source adapter, before any
/// validation. Timestamps are kept as the strings the source showed;
/// `utc_offset_secs` is the source-local zone the adapter vouches for when a
/// stamp carries no zone of its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    pub source: String,
    pub origin: String,
    pub destination: String,
    pub origin_name: Option<String>,
    pub destination_name: Option<String>,
    pub departure: Option<String>,
    pub arrival: Option<String>,
    pub utc_offset_secs: i32,
    pub aircraft: Option<String>,
    pub currency: String,
    pub price_current: Option<RawPrice>,
    pub price_normal: Option<RawPrice>,
    pub link: Option<String>,
    pub status_text: String,
    /// Opaque audit bag. Never interpreted downstream of the normalizer.
    pub raw: serde_json::Value,
}

/// A cleaned observation, ready for identity hashing and merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedObservation {
    pub source: String,
    pub origin: String,
    pub destination: String,
    pub origin_name: Option<String>,
    pub destination_name: Option<String>,
    pub departure: DateTime<Utc>,
    pub arrival: Option<DateTime<Utc>>,
    pub aircraft: Option<String>,
    pub currency: Currency,
    pub price_current: Option<f64>,
    pub price_normal: Option<f64>,
    pub link: Option<String>,
    pub status: ObservedStatus,
    pub observed_at: DateTime<Utc>,
    pub raw: serde_json::Value,
}

impl NormalizedObservation {
    pub fn identity(&self) -> String {
        identity::identity_hash(
            &self.origin,
            &self.destination,
            self.departure,
            self.aircraft.as_deref(),
        )
    }

    /// Dedup key for this observation inside a canonical flight's ref list.
    /// The link doubles as the external id; sources without stable links fall
    /// back to the source name, giving them one slot per flight.
    pub fn external_key(&self) -> &str {
        self.link.as_deref().unwrap_or(&self.source)
    }
}

/// One source's current knowledge of a canonical flight. At most one ref per
/// (source, external_key) exists at any time; a later observation from the
/// same key replaces the earlier ref.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRef {
    pub source: String,
    pub external_key: String,
    pub price: Option<f64>,
    pub price_normal: Option<f64>,
    pub currency: Currency,
    pub status: ObservedStatus,
    pub link: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl ProviderRef {
    pub fn from_observation(obs: &NormalizedObservation) -> Self {
        Self {
            source: obs.source.clone(),
            external_key: obs.external_key().to_string(),
            price: obs.price_current,
            price_normal: obs.price_normal,
            currency: obs.currency,
            status: obs.status,
            link: obs.link.clone(),
            observed_at: obs.observed_at,
        }
    }

    pub fn same_slot(&self, other: &ProviderRef) -> bool {
        self.source == other.source && self.external_key == other.external_key
    }
}

/// The single consolidated record per identity. Static leg attributes are
/// fixed at creation; the ref list is owned and mutated only by the merge
/// engine; the derived fields are recomputed on every merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalFlight {
    pub identity: String,
    pub origin: String,
    pub destination: String,
    pub origin_name: Option<String>,
    pub destination_name: Option<String>,
    pub departure: DateTime<Utc>,
    pub arrival: Option<DateTime<Utc>>,
    pub aircraft: Option<String>,
    pub created_at: DateTime<Utc>,
    pub refs: Vec<ProviderRef>,
    pub best_price: Option<f64>,
    pub currency: Currency,
    pub status: FlightStatus,
    pub link: Option<String>,
    pub last_seen: DateTime<Utc>,
}

/// Immutable audit record of one merge event. Never updated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: Uuid,
    pub flight_identity: String,
    pub source: String,
    pub price_current: Option<f64>,
    pub price_normal: Option<f64>,
    pub currency: Currency,
    pub status: ObservedStatus,
    pub link: Option<String>,
    pub raw: serde_json::Value,
    pub inserted_at: DateTime<Utc>,
}
