//! Merge engine: the create-or-update path combining one normalized
//! observation with the store under its identity.
//!
//! Merges for the same identity are serialized through a per-identity lock;
//! insert conflicts from writers outside this process are retried a bounded
//! number of times. No network I/O happens inside the critical section —
//! hashing and normalization are done before `merge` is called.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use elcat_core::{
    CanonicalFlight, FlightStatus, NormalizedObservation, ObservedStatus, ProviderRef, Snapshot,
};
use elcat_storage::{FlightStore, StoreError};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Bounded retries after a store-level conflict before the observation is
/// reported as failed.
const MAX_CONFLICT_RETRIES: usize = 3;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("merge conflict on identity {identity} persisted after {attempts} attempts")]
    Conflict { identity: String, attempts: usize },
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct MergeEngine {
    store: Arc<dyn FlightStore>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MergeEngine {
    pub fn new(store: Arc<dyn FlightStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn identity_lock(&self, identity: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(identity.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Merge one observation under its precomputed identity. Exactly one
    /// snapshot is appended per successful merge, stamped with this merge's
    /// wall-clock time.
    pub async fn merge(
        &self,
        identity: &str,
        observation: &NormalizedObservation,
    ) -> Result<CanonicalFlight, MergeError> {
        let lock = self.identity_lock(identity).await;
        let _guard = lock.lock().await;

        let mut attempts = 0usize;
        let flight = loop {
            match self.store.get(identity).await? {
                None => {
                    let flight = new_flight(identity, observation);
                    match self.store.insert(&flight).await {
                        Ok(()) => break flight,
                        Err(StoreError::Conflict { .. }) if attempts < MAX_CONFLICT_RETRIES => {
                            // Another writer created the row between our read
                            // and insert; re-read and fold into it.
                            attempts += 1;
                            debug!(identity, attempts, "insert conflict, retrying merge");
                            continue;
                        }
                        Err(StoreError::Conflict { .. }) => {
                            return Err(MergeError::Conflict {
                                identity: identity.to_string(),
                                attempts,
                            });
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
                Some(mut flight) => {
                    upsert_ref(&mut flight.refs, ProviderRef::from_observation(observation));
                    recompute_aggregates(&mut flight);
                    match self.store.update(&flight).await {
                        Ok(()) => break flight,
                        Err(StoreError::Missing { .. }) if attempts < MAX_CONFLICT_RETRIES => {
                            attempts += 1;
                            debug!(identity, attempts, "row vanished mid-merge, retrying");
                            continue;
                        }
                        Err(StoreError::Missing { .. }) => {
                            return Err(MergeError::Conflict {
                                identity: identity.to_string(),
                                attempts,
                            });
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
            }
        };

        let snapshot = Snapshot {
            id: Uuid::new_v4(),
            flight_identity: identity.to_string(),
            source: observation.source.clone(),
            price_current: observation.price_current,
            price_normal: observation.price_normal,
            currency: observation.currency,
            status: observation.status,
            link: observation.link.clone(),
            raw: observation.raw.clone(),
            inserted_at: Utc::now(),
        };
        self.store.append_snapshot(&snapshot).await?;

        Ok(flight)
    }
}

fn new_flight(identity: &str, observation: &NormalizedObservation) -> CanonicalFlight {
    let mut flight = CanonicalFlight {
        identity: identity.to_string(),
        origin: observation.origin.clone(),
        destination: observation.destination.clone(),
        origin_name: observation.origin_name.clone(),
        destination_name: observation.destination_name.clone(),
        departure: observation.departure,
        arrival: observation.arrival,
        aircraft: observation.aircraft.clone(),
        created_at: observation.observed_at,
        refs: vec![ProviderRef::from_observation(observation)],
        best_price: None,
        currency: observation.currency,
        status: observation.status.into(),
        link: None,
        last_seen: observation.observed_at,
    };
    recompute_aggregates(&mut flight);
    flight
}

/// Replace the ref occupying the same (source, external_key) slot, or append.
/// Never grows a second ref for the same slot.
pub fn upsert_ref(refs: &mut Vec<ProviderRef>, incoming: ProviderRef) {
    match refs.iter_mut().find(|existing| existing.same_slot(&incoming)) {
        Some(existing) => *existing = incoming,
        None => refs.push(incoming),
    }
}

/// Recompute the derived fields over the full ref list.
///
/// - best price: minimum among priced refs, ties to the most recently
///   observed ref
/// - status: available beats pending; with no refs the prior status stands
/// - link: the best-price ref's link, else the most recent ref's
/// - last_seen: max observed-at, never moving backward
pub fn recompute_aggregates(flight: &mut CanonicalFlight) {
    let best_pick =
        best_priced_ref(&flight.refs).map(|r| (r.price, r.link.clone(), r.currency));
    let recent_pick = flight
        .refs
        .iter()
        .max_by_key(|r| r.observed_at)
        .map(|r| (r.link.clone(), r.currency));
    let newest_seen = flight.refs.iter().map(|r| r.observed_at).max();
    let any_available = flight
        .refs
        .iter()
        .any(|r| r.status == ObservedStatus::Available);

    flight.best_price = best_pick.as_ref().and_then(|(price, _, _)| *price);

    if any_available {
        flight.status = FlightStatus::Available;
    } else if !flight.refs.is_empty() {
        flight.status = FlightStatus::Pending;
    }

    if let Some((link, currency)) = best_pick
        .map(|(_, link, currency)| (link, currency))
        .or(recent_pick)
    {
        flight.link = link;
        flight.currency = currency;
    }

    if let Some(newest) = newest_seen {
        if newest > flight.last_seen {
            flight.last_seen = newest;
        }
    }
}

fn best_priced_ref(refs: &[ProviderRef]) -> Option<&ProviderRef> {
    let mut best: Option<(&ProviderRef, f64)> = None;
    for candidate in refs {
        let Some(price) = candidate.price else {
            continue;
        };
        best = Some(match best {
            None => (candidate, price),
            Some((current, current_price)) => {
                if price < current_price
                    || (price == current_price && candidate.observed_at > current.observed_at)
                {
                    (candidate, price)
                } else {
                    (current, current_price)
                }
            }
        });
    }
    best.map(|(r, _)| r)
}
