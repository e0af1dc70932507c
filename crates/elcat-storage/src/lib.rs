//! Consolidation store + hardened HTTP fetch layer.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use elcat_core::{CanonicalFlight, FlightStatus, ProviderRef, Snapshot};
use rand::Rng;
use reqwest::StatusCode;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tracing::info_span;

pub const CRATE_NAME: &str = "elcat-storage";

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("canonical flight {identity} already exists")]
    Conflict { identity: String },
    #[error("canonical flight {identity} not found")]
    Missing { identity: String },
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("stored row is corrupt: {0}")]
    Corrupt(String),
}

/// Persistent table of canonical flights keyed by identity, plus the
/// append-only snapshot log. `insert` enforces at most one row per identity;
/// a duplicate surfaces as [`StoreError::Conflict`] so the merge engine can
/// re-read and retry.
#[async_trait]
pub trait FlightStore: Send + Sync {
    async fn get(&self, identity: &str) -> Result<Option<CanonicalFlight>, StoreError>;

    async fn insert(&self, flight: &CanonicalFlight) -> Result<(), StoreError>;

    /// Persist the mutable half of a flight (refs + derived aggregates).
    /// Static leg attributes are never rewritten.
    async fn update(&self, flight: &CanonicalFlight) -> Result<(), StoreError>;

    async fn append_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError>;

    async fn all(&self) -> Result<Vec<CanonicalFlight>, StoreError>;

    async fn snapshots_for(&self, identity: &str) -> Result<Vec<Snapshot>, StoreError>;

    /// Demote flights whose `last_seen` predates `cutoff` to `unavailable`.
    /// Refs and snapshots stay untouched. Returns the number of demoted rows.
    async fn demote_stale(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn count_by_status(&self) -> Result<BTreeMap<String, u64>, StoreError>;
}

/// In-memory store used by tests and database-less runs.
#[derive(Debug, Default)]
pub struct MemoryFlightStore {
    flights: RwLock<HashMap<String, CanonicalFlight>>,
    snapshots: RwLock<Vec<Snapshot>>,
}

impl MemoryFlightStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FlightStore for MemoryFlightStore {
    async fn get(&self, identity: &str) -> Result<Option<CanonicalFlight>, StoreError> {
        Ok(self.flights.read().await.get(identity).cloned())
    }

    async fn insert(&self, flight: &CanonicalFlight) -> Result<(), StoreError> {
        let mut flights = self.flights.write().await;
        if flights.contains_key(&flight.identity) {
            return Err(StoreError::Conflict {
                identity: flight.identity.clone(),
            });
        }
        flights.insert(flight.identity.clone(), flight.clone());
        Ok(())
    }

    async fn update(&self, flight: &CanonicalFlight) -> Result<(), StoreError> {
        let mut flights = self.flights.write().await;
        match flights.get_mut(&flight.identity) {
            Some(existing) => {
                existing.refs = flight.refs.clone();
                existing.best_price = flight.best_price;
                existing.currency = flight.currency;
                existing.status = flight.status;
                existing.link = flight.link.clone();
                existing.last_seen = flight.last_seen;
                Ok(())
            }
            None => Err(StoreError::Missing {
                identity: flight.identity.clone(),
            }),
        }
    }

    async fn append_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        self.snapshots.write().await.push(snapshot.clone());
        Ok(())
    }

    async fn all(&self) -> Result<Vec<CanonicalFlight>, StoreError> {
        let mut rows: Vec<_> = self.flights.read().await.values().cloned().collect();
        rows.sort_by_key(|flight| flight.departure);
        Ok(rows)
    }

    async fn snapshots_for(&self, identity: &str) -> Result<Vec<Snapshot>, StoreError> {
        Ok(self
            .snapshots
            .read()
            .await
            .iter()
            .filter(|snapshot| snapshot.flight_identity == identity)
            .cloned()
            .collect())
    }

    async fn demote_stale(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut flights = self.flights.write().await;
        let mut demoted = 0u64;
        for flight in flights.values_mut() {
            if flight.status != FlightStatus::Unavailable && flight.last_seen < cutoff {
                flight.status = FlightStatus::Unavailable;
                demoted += 1;
            }
        }
        Ok(demoted)
    }

    async fn count_by_status(&self) -> Result<BTreeMap<String, u64>, StoreError> {
        let mut counts = BTreeMap::new();
        for flight in self.flights.read().await.values() {
            *counts.entry(flight.status.as_str().to_string()).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

/// Postgres-backed store. `flights` is keyed uniquely by identity with the
/// ref list as JSONB; `flight_snapshots` is append-only with a foreign key to
/// `flights`, ordered by insertion time.
pub struct PgFlightStore {
    pool: PgPool,
}

impl PgFlightStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!().run(&self.pool).await?;
        Ok(())
    }
}

fn flight_from_row(row: &PgRow) -> Result<CanonicalFlight, StoreError> {
    let status: String = row.try_get("status")?;
    let currency: String = row.try_get("currency")?;
    let refs: Json<Vec<ProviderRef>> = row.try_get("refs")?;
    Ok(CanonicalFlight {
        identity: row.try_get("identity")?,
        origin: row.try_get("origin")?,
        destination: row.try_get("destination")?,
        origin_name: row.try_get("origin_name")?,
        destination_name: row.try_get("destination_name")?,
        departure: row.try_get("departure_ts")?,
        arrival: row.try_get("arrival_ts")?,
        aircraft: row.try_get("aircraft")?,
        created_at: row.try_get("created_at")?,
        refs: refs.0,
        best_price: row.try_get("best_price")?,
        currency: currency
            .parse()
            .map_err(|err: elcat_core::UnknownCurrency| StoreError::Corrupt(err.to_string()))?,
        status: status
            .parse()
            .map_err(|err: elcat_core::UnknownStatus| StoreError::Corrupt(err.to_string()))?,
        link: row.try_get("link")?,
        last_seen: row.try_get("last_seen")?,
    })
}

fn snapshot_from_row(row: &PgRow) -> Result<Snapshot, StoreError> {
    let status: String = row.try_get("status")?;
    let currency: String = row.try_get("currency")?;
    Ok(Snapshot {
        id: row.try_get("id")?,
        flight_identity: row.try_get("flight_identity")?,
        source: row.try_get("source")?,
        price_current: row.try_get("price_current")?,
        price_normal: row.try_get("price_normal")?,
        currency: currency
            .parse()
            .map_err(|err: elcat_core::UnknownCurrency| StoreError::Corrupt(err.to_string()))?,
        status: match status.as_str() {
            "available" => elcat_core::ObservedStatus::Available,
            "pending" => elcat_core::ObservedStatus::Pending,
            other => return Err(StoreError::Corrupt(format!("snapshot status {other:?}"))),
        },
        link: row.try_get("link")?,
        raw: row.try_get("raw")?,
        inserted_at: row.try_get("inserted_at")?,
    })
}

#[async_trait]
impl FlightStore for PgFlightStore {
    async fn get(&self, identity: &str) -> Result<Option<CanonicalFlight>, StoreError> {
        let row = sqlx::query("SELECT * FROM flights WHERE identity = $1")
            .bind(identity)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(flight_from_row).transpose()
    }

    async fn insert(&self, flight: &CanonicalFlight) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO flights \
             (identity, origin, destination, origin_name, destination_name, \
              departure_ts, arrival_ts, aircraft, created_at, refs, \
              best_price, currency, status, link, last_seen) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
             ON CONFLICT (identity) DO NOTHING",
        )
        .bind(&flight.identity)
        .bind(&flight.origin)
        .bind(&flight.destination)
        .bind(&flight.origin_name)
        .bind(&flight.destination_name)
        .bind(flight.departure)
        .bind(flight.arrival)
        .bind(&flight.aircraft)
        .bind(flight.created_at)
        .bind(Json(&flight.refs))
        .bind(flight.best_price)
        .bind(flight.currency.as_str())
        .bind(flight.status.as_str())
        .bind(&flight.link)
        .bind(flight.last_seen)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict {
                identity: flight.identity.clone(),
            });
        }
        Ok(())
    }

    async fn update(&self, flight: &CanonicalFlight) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE flights \
             SET refs = $2, best_price = $3, currency = $4, status = $5, \
                 link = $6, last_seen = $7 \
             WHERE identity = $1",
        )
        .bind(&flight.identity)
        .bind(Json(&flight.refs))
        .bind(flight.best_price)
        .bind(flight.currency.as_str())
        .bind(flight.status.as_str())
        .bind(&flight.link)
        .bind(flight.last_seen)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Missing {
                identity: flight.identity.clone(),
            });
        }
        Ok(())
    }

    async fn append_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO flight_snapshots \
             (id, flight_identity, source, price_current, price_normal, \
              currency, status, link, raw, inserted_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(snapshot.id)
        .bind(&snapshot.flight_identity)
        .bind(&snapshot.source)
        .bind(snapshot.price_current)
        .bind(snapshot.price_normal)
        .bind(snapshot.currency.as_str())
        .bind(snapshot.status.as_str())
        .bind(&snapshot.link)
        .bind(&snapshot.raw)
        .bind(snapshot.inserted_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn all(&self) -> Result<Vec<CanonicalFlight>, StoreError> {
        let rows = sqlx::query("SELECT * FROM flights ORDER BY departure_ts")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(flight_from_row).collect()
    }

    async fn snapshots_for(&self, identity: &str) -> Result<Vec<Snapshot>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM flight_snapshots WHERE flight_identity = $1 ORDER BY inserted_at",
        )
        .bind(identity)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(snapshot_from_row).collect()
    }

    async fn demote_stale(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE flights SET status = 'unavailable' \
             WHERE last_seen < $1 AND status <> 'unavailable'",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn count_by_status(&self) -> Result<BTreeMap<String, u64>, StoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM flights GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        let mut counts = BTreeMap::new();
        for row in rows {
            let status: String = row.try_get("status")?;
            let n: i64 = row.try_get("n")?;
            counts.insert(status, n as u64);
        }
        Ok(counts)
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

/// Default client identities rotated across requests.
pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0 Safari/537.36",
];

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agents: Vec<String>,
    pub global_concurrency: usize,
    pub min_host_delay: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agents: DEFAULT_USER_AGENTS
                .iter()
                .map(|ua| ua.to_string())
                .collect(),
            global_concurrency: 16,
            min_host_delay: Duration::from_millis(250),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Minimum spacing between hits on one host, with a little jitter so
/// concurrent fetchers don't fall into lockstep.
#[derive(Debug)]
pub struct PerHostLimiter {
    min_delay: Duration,
    next_slot: Mutex<HashMap<String, tokio::time::Instant>>,
}

impl PerHostLimiter {
    pub fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    pub async fn wait(&self, host: &str) {
        if host.is_empty() || self.min_delay.is_zero() {
            return;
        }
        let slot = {
            let mut slots = self.next_slot.lock().await;
            let now = tokio::time::Instant::now();
            let jitter_cap = (self.min_delay.as_millis() / 5).max(1) as u64;
            let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..jitter_cap));
            let slot = match slots.get(host) {
                Some(next) if *next > now => *next + jitter,
                _ => now,
            };
            slots.insert(host.to_string(), slot + self.min_delay);
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("invalid url {0:?}")]
    InvalidUrl(String),
}

/// Shared HTTP client with retry/backoff, a global concurrency cap, polite
/// per-host pacing, and a rotating User-Agent. Constructed once at startup
/// and passed by reference.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    host_limiter: PerHostLimiter,
    user_agents: Vec<String>,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        use anyhow::Context;

        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .build()
            .context("building reqwest client")?;

        let user_agents = if config.user_agents.is_empty() {
            DEFAULT_USER_AGENTS.iter().map(|ua| ua.to_string()).collect()
        } else {
            config.user_agents
        };

        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            host_limiter: PerHostLimiter::new(config.min_host_delay),
            user_agents,
            backoff: config.backoff,
        })
    }

    fn pick_user_agent(&self) -> &str {
        let index = rand::thread_rng().gen_range(0..self.user_agents.len());
        &self.user_agents[index]
    }

    /// Fetch a page body as text, retrying 429/5xx and transport errors with
    /// exponential backoff.
    pub async fn fetch_text(&self, source_id: &str, url: &str) -> Result<String, FetchError> {
        let host = reqwest::Url::parse(url)
            .map_err(|_| FetchError::InvalidUrl(url.to_string()))?
            .host_str()
            .map(|h| h.to_string())
            .unwrap_or_default();

        let _global = self
            .global_limit
            .acquire()
            .await
            .expect("semaphore not closed");

        let span = info_span!("http_fetch", source_id, url);
        let _guard = span.enter();

        let mut last_request_error: Option<reqwest::Error> = None;

        for attempt in 0..=self.backoff.max_retries {
            self.host_limiter.wait(&host).await;

            let response = self
                .client
                .get(url)
                .header(reqwest::header::USER_AGENT, self.pick_user_agent())
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        return Ok(resp.text().await?);
                    }

                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        last_request_error = Some(err);
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }

        Err(FetchError::Request(
            last_request_error.expect("retry loop should capture a request error"),
        ))
    }
}
