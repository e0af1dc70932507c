//! Consolidation pipeline: fetch → normalize → merge → sweep → report.

pub mod merge;
pub mod normalize;
pub mod sweep;

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use elcat_adapters::{adapter_for_source, AdapterError, SourceAdapter};
use elcat_core::airports::AirportDirectory;
use elcat_core::RawObservation;
use elcat_storage::{
    FlightStore, HttpClientConfig, HttpFetcher, MemoryFlightStore, PgFlightStore,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};
use uuid::Uuid;

use crate::merge::MergeEngine;
use crate::normalize::normalize;
use crate::sweep::Sweeper;

pub const CRATE_NAME: &str = "elcat-sync";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("DATABASE_URL is set but empty")]
    EmptyDatabaseUrl,
    #[error("sources file {0} does not exist")]
    MissingSourcesFile(String),
    #[error("airports file {0} does not exist")]
    MissingAirportsFile(String),
    #[error("freshness window must be positive, got {0}")]
    BadFreshnessWindow(i64),
    #[error("http timeout must be positive")]
    ZeroHttpTimeout,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Postgres connection string; absent means the in-memory store.
    pub database_url: Option<String>,
    pub sources_file: PathBuf,
    pub airports_file: PathBuf,
    pub reports_dir: PathBuf,
    pub freshness_window_hours: i64,
    pub http_timeout_secs: u64,
    pub min_host_delay_ms: u64,
    pub user_agents: Vec<String>,
    pub scheduler_enabled: bool,
    pub sync_cron_1: String,
    pub sync_cron_2: String,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            sources_file: std::env::var("ELCAT_SOURCES_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("sources.yaml")),
            airports_file: std::env::var("ELCAT_AIRPORTS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/airports.json")),
            reports_dir: std::env::var("ELCAT_REPORTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("reports")),
            freshness_window_hours: std::env::var("ELCAT_FRESHNESS_WINDOW_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(48),
            http_timeout_secs: std::env::var("ELCAT_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            min_host_delay_ms: std::env::var("ELCAT_MIN_HOST_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(250),
            user_agents: std::env::var("ELCAT_USER_AGENT")
                .map(|ua| vec![ua])
                .unwrap_or_default(),
            scheduler_enabled: std::env::var("ELCAT_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            sync_cron_1: std::env::var("SYNC_CRON_1").unwrap_or_else(|_| "0 0 6 * * *".to_string()),
            sync_cron_2: std::env::var("SYNC_CRON_2")
                .unwrap_or_else(|_| "0 0 18 * * *".to_string()),
        }
    }

    /// Fail fast on settings the cycle cannot run with. Called before any
    /// fetch happens.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.database_url {
            if url.trim().is_empty() {
                return Err(ConfigError::EmptyDatabaseUrl);
            }
        }
        if self.freshness_window_hours <= 0 {
            return Err(ConfigError::BadFreshnessWindow(self.freshness_window_hours));
        }
        if self.http_timeout_secs == 0 {
            return Err(ConfigError::ZeroHttpTimeout);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Source registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub source_id: String,
    pub display_name: String,
    pub enabled: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

impl SourceRegistry {
    pub async fn load(path: &PathBuf) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

// ---------------------------------------------------------------------------
// Cycle report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct SourceCycleReport {
    pub source_id: String,
    pub raw: usize,
    pub normalized: usize,
    pub rejected: usize,
    pub merged: usize,
    pub failed: usize,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub sources: Vec<SourceCycleReport>,
    pub total_raw: usize,
    pub total_normalized: usize,
    pub total_merged: usize,
    pub total_failed: usize,
    pub swept_unavailable: u64,
    pub status_counts: BTreeMap<String, u64>,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Pipeline {
    config: SyncConfig,
    adapters: Vec<Arc<dyn SourceAdapter>>,
    http: Arc<HttpFetcher>,
    store: Arc<dyn FlightStore>,
    engine: Arc<MergeEngine>,
    sweeper: Sweeper,
}

impl Pipeline {
    pub fn new(
        config: SyncConfig,
        adapters: Vec<Arc<dyn SourceAdapter>>,
        store: Arc<dyn FlightStore>,
    ) -> Result<Self> {
        config.validate()?;
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: StdDuration::from_secs(config.http_timeout_secs),
            min_host_delay: StdDuration::from_millis(config.min_host_delay_ms),
            user_agents: config.user_agents.clone(),
            ..Default::default()
        })?;
        Ok(Self {
            config,
            adapters,
            http: Arc::new(http),
            store: store.clone(),
            engine: Arc::new(MergeEngine::new(store.clone())),
            sweeper: Sweeper::new(store),
        })
    }

    /// Assemble a pipeline from config: airport directory, source registry,
    /// adapters for every enabled source, and the configured store. An
    /// optional filter restricts the cycle to the named sources.
    pub async fn from_config(config: SyncConfig, source_filter: Option<&[String]>) -> Result<Self> {
        config.validate()?;
        if !config.sources_file.exists() {
            return Err(
                ConfigError::MissingSourcesFile(config.sources_file.display().to_string()).into(),
            );
        }
        if !config.airports_file.exists() {
            return Err(
                ConfigError::MissingAirportsFile(config.airports_file.display().to_string()).into(),
            );
        }

        let airports = Arc::new(
            AirportDirectory::load(&config.airports_file)
                .with_context(|| format!("loading {}", config.airports_file.display()))?,
        );
        info!(airports = airports.len(), "airport directory loaded");

        let registry = SourceRegistry::load(&config.sources_file).await?;
        let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::new();
        for source in registry.sources.iter().filter(|s| s.enabled) {
            if let Some(filter) = source_filter {
                if !filter.iter().any(|wanted| wanted == &source.source_id) {
                    continue;
                }
            }
            let adapter = adapter_for_source(&source.source_id, &airports)
                .with_context(|| format!("no adapter registered for {}", source.source_id))?;
            adapters.push(Arc::from(adapter));
        }

        let store: Arc<dyn FlightStore> = match &config.database_url {
            Some(url) => Arc::new(
                PgFlightStore::connect(url)
                    .await
                    .context("connecting to the flight store")?,
            ),
            None => Arc::new(MemoryFlightStore::new()),
        };

        Self::new(config, adapters, store)
    }

    /// Read surface for external consumers: aggregate rows only, never raw
    /// ref internals.
    pub fn store(&self) -> &Arc<dyn FlightStore> {
        &self.store
    }

    /// Drive one full cycle. With `dry_run` only fetching and normalizing
    /// run — the store is never touched — which is how a source adapter
    /// change gets validated without side effects.
    pub async fn run_cycle(&self, dry_run: bool) -> Result<CycleReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, dry_run, sources = self.adapters.len(), "cycle started");

        // Fetching: sources are independent; one failing never blocks the
        // others.
        let mut fetches: JoinSet<(
            &'static str,
            Result<Vec<RawObservation>, AdapterError>,
            StdDuration,
        )> = JoinSet::new();
        for adapter in &self.adapters {
            let adapter = adapter.clone();
            let http = self.http.clone();
            fetches.spawn(async move {
                let fetch_started = std::time::Instant::now();
                let result = adapter.fetch(&http).await;
                (adapter.source_id(), result, fetch_started.elapsed())
            });
        }

        let mut fetched: HashMap<&'static str, (Result<Vec<RawObservation>, AdapterError>, StdDuration)> =
            HashMap::new();
        while let Some(joined) = fetches.join_next().await {
            match joined {
                Ok((source_id, result, elapsed)) => {
                    fetched.insert(source_id, (result, elapsed));
                }
                Err(err) => warn!(%err, "source fetch task aborted"),
            }
        }

        // Normalizing + merging, source by source. Merges inside one source
        // run concurrently; the engine serializes per identity.
        let mut sources = Vec::with_capacity(self.adapters.len());
        for adapter in &self.adapters {
            let source_id = adapter.source_id();
            let entry = match fetched.remove(source_id) {
                Some((Ok(raws), elapsed)) => {
                    self.process_source(source_id, raws, elapsed, dry_run).await
                }
                Some((Err(err), elapsed)) => {
                    warn!(source = source_id, %err, "source fetch failed");
                    SourceCycleReport {
                        source_id: source_id.to_string(),
                        raw: 0,
                        normalized: 0,
                        rejected: 0,
                        merged: 0,
                        failed: 0,
                        elapsed_ms: elapsed.as_millis() as u64,
                        error: Some(err.to_string()),
                    }
                }
                None => SourceCycleReport {
                    source_id: source_id.to_string(),
                    raw: 0,
                    normalized: 0,
                    rejected: 0,
                    merged: 0,
                    failed: 0,
                    elapsed_ms: 0,
                    error: Some("fetch task aborted".to_string()),
                },
            };
            sources.push(entry);
        }

        // Sweeping runs strictly after every merge of this cycle committed.
        // A sweep failure is logged and never rolls the merges back.
        let swept_unavailable = if dry_run {
            0
        } else {
            match self
                .sweeper
                .sweep(Duration::hours(self.config.freshness_window_hours))
                .await
            {
                Ok(count) => count,
                Err(err) => {
                    warn!(%err, "staleness sweep failed; merges stand");
                    0
                }
            }
        };

        let status_counts = if dry_run {
            BTreeMap::new()
        } else {
            match self.store.count_by_status().await {
                Ok(counts) => counts,
                Err(err) => {
                    warn!(%err, "status distribution unavailable");
                    BTreeMap::new()
                }
            }
        };

        let report = CycleReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            dry_run,
            total_raw: sources.iter().map(|s| s.raw).sum(),
            total_normalized: sources.iter().map(|s| s.normalized).sum(),
            total_merged: sources.iter().map(|s| s.merged).sum(),
            total_failed: sources.iter().map(|s| s.failed).sum(),
            swept_unavailable,
            status_counts,
            sources,
        };

        self.write_reports(&report).await?;
        info!(
            %run_id,
            merged = report.total_merged,
            failed = report.total_failed,
            swept = report.swept_unavailable,
            "cycle complete"
        );
        Ok(report)
    }

    async fn process_source(
        &self,
        source_id: &str,
        raws: Vec<RawObservation>,
        fetch_elapsed: StdDuration,
        dry_run: bool,
    ) -> SourceCycleReport {
        let raw = raws.len();
        let mut rejected = 0usize;
        let mut observations = Vec::with_capacity(raw);
        for raw_observation in &raws {
            match normalize(raw_observation, Utc::now()) {
                Ok(obs) => observations.push(obs),
                Err(reason) => {
                    rejected += 1;
                    warn!(
                        source = source_id,
                        origin = %raw_observation.origin,
                        destination = %raw_observation.destination,
                        %reason,
                        "observation rejected"
                    );
                }
            }
        }
        let normalized = observations.len();

        let (merged, failed) = if dry_run {
            (0, 0)
        } else {
            let mut merges = JoinSet::new();
            for obs in observations {
                let engine = self.engine.clone();
                merges.spawn(async move {
                    let identity = obs.identity();
                    engine.merge(&identity, &obs).await
                });
            }
            let mut merged = 0usize;
            let mut failed = 0usize;
            while let Some(joined) = merges.join_next().await {
                match joined {
                    Ok(Ok(_)) => merged += 1,
                    Ok(Err(err)) => {
                        failed += 1;
                        warn!(source = source_id, %err, "merge failed");
                    }
                    Err(err) => {
                        failed += 1;
                        warn!(source = source_id, %err, "merge task aborted");
                    }
                }
            }
            (merged, failed)
        };

        SourceCycleReport {
            source_id: source_id.to_string(),
            raw,
            normalized,
            rejected,
            merged,
            failed,
            elapsed_ms: fetch_elapsed.as_millis() as u64,
            error: None,
        }
    }

    async fn write_reports(&self, report: &CycleReport) -> Result<PathBuf> {
        let reports_dir = self.config.reports_dir.join(report.run_id.to_string());
        tokio::fs::create_dir_all(&reports_dir)
            .await
            .with_context(|| format!("creating {}", reports_dir.display()))?;

        let json = serde_json::to_vec_pretty(report).context("serializing cycle report")?;
        tokio::fs::write(reports_dir.join("cycle_report.json"), json)
            .await
            .context("writing cycle_report.json")?;

        let brief = render_brief(report);
        tokio::fs::write(reports_dir.join("cycle_brief.md"), brief)
            .await
            .context("writing cycle_brief.md")?;

        Ok(reports_dir)
    }

    /// Build the recurring-cycle scheduler when enabled. Each cron fire runs
    /// one full (non-dry) cycle.
    pub async fn maybe_build_scheduler(self: &Arc<Self>) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }

        let scheduler = JobScheduler::new().await.context("creating scheduler")?;
        for cron in [&self.config.sync_cron_1, &self.config.sync_cron_2] {
            let pipeline = Arc::clone(self);
            let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
                let pipeline = pipeline.clone();
                Box::pin(async move {
                    if let Err(err) = pipeline.run_cycle(false).await {
                        warn!(%err, "scheduled cycle failed");
                    }
                })
            })
            .with_context(|| format!("creating scheduler job for cron {cron}"))?;
            scheduler.add(job).await.context("adding scheduler job")?;
        }
        Ok(Some(scheduler))
    }
}

fn render_brief(report: &CycleReport) -> String {
    let per_source = report
        .sources
        .iter()
        .map(|s| match &s.error {
            Some(error) => format!("- {}: FAILED ({error})", s.source_id),
            None => format!(
                "- {}: raw={} normalized={} rejected={} merged={} failed={} ({} ms)",
                s.source_id, s.raw, s.normalized, s.rejected, s.merged, s.failed, s.elapsed_ms
            ),
        })
        .collect::<Vec<_>>()
        .join("\n");
    let statuses = report
        .status_counts
        .iter()
        .map(|(status, count)| format!("- {status}: {count}"))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "# Catalog Cycle Brief\n\n- Run ID: `{}`\n- Started: {}\n- Finished: {}\n- Dry run: {}\n- Merged: {} / Failed: {}\n- Swept unavailable: {}\n\n## Sources\n{}\n\n## Status distribution\n{}\n",
        report.run_id,
        report.started_at,
        report.finished_at,
        report.dry_run,
        report.total_merged,
        report.total_failed,
        report.swept_unavailable,
        per_source,
        statuses
    )
}

/// One-shot entry point used by the CLI: config from env, full cycle.
pub async fn run_cycle_once_from_env(
    dry_run: bool,
    source_filter: Option<&[String]>,
) -> Result<CycleReport> {
    let config = SyncConfig::from_env();
    let pipeline = Pipeline::from_config(config, source_filter).await?;
    pipeline.run_cycle(dry_run).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use elcat_core::RawPrice;

    fn test_config(reports_dir: PathBuf) -> SyncConfig {
        SyncConfig {
            database_url: None,
            sources_file: PathBuf::from("sources.yaml"),
            airports_file: PathBuf::from("data/airports.json"),
            reports_dir,
            freshness_window_hours: 48,
            http_timeout_secs: 5,
            min_host_delay_ms: 0,
            user_agents: Vec::new(),
            scheduler_enabled: false,
            sync_cron_1: "0 0 6 * * *".to_string(),
            sync_cron_2: "0 0 18 * * *".to_string(),
        }
    }

    fn observation(origin: &str, minute: u32, price: Option<f64>) -> RawObservation {
        RawObservation {
            source: "stub".to_string(),
            origin: origin.to_string(),
            destination: "NCE".to_string(),
            origin_name: None,
            destination_name: None,
            departure: Some(format!("2025-08-09T10:{minute:02}:00Z")),
            arrival: None,
            utc_offset_secs: 0,
            aircraft: None,
            currency: "EUR".to_string(),
            price_current: price.map(RawPrice::Number),
            price_normal: None,
            link: Some(format!("https://stub.example/{origin}")),
            status_text: "listed".to_string(),
            raw: serde_json::json!({}),
        }
    }

    struct StaticAdapter {
        source_id: &'static str,
        rows: Vec<RawObservation>,
    }

    #[async_trait]
    impl SourceAdapter for StaticAdapter {
        fn source_id(&self) -> &'static str {
            self.source_id
        }

        async fn fetch(&self, _http: &HttpFetcher) -> Result<Vec<RawObservation>, AdapterError> {
            Ok(self.rows.clone())
        }
    }

    struct FailingAdapter;

    #[async_trait]
    impl SourceAdapter for FailingAdapter {
        fn source_id(&self) -> &'static str {
            "broken"
        }

        async fn fetch(&self, _http: &HttpFetcher) -> Result<Vec<RawObservation>, AdapterError> {
            Err(AdapterError::Parse("listing markup changed".to_string()))
        }
    }

    fn pipeline_with(
        adapters: Vec<Arc<dyn SourceAdapter>>,
        reports_dir: PathBuf,
    ) -> (Pipeline, Arc<MemoryFlightStore>) {
        let store = Arc::new(MemoryFlightStore::new());
        let pipeline = Pipeline::new(test_config(reports_dir), adapters, store.clone())
            .expect("pipeline builds");
        (pipeline, store)
    }

    #[tokio::test]
    async fn one_failing_source_never_blocks_the_others() {
        let dir = tempfile::tempdir().expect("tempdir");
        let good = StaticAdapter {
            source_id: "stub",
            rows: vec![
                observation("GVA", 6, Some(4200.0)),
                observation("ZRH", 20, None),
            ],
        };
        let (pipeline, store) = pipeline_with(
            vec![Arc::new(FailingAdapter) as Arc<dyn SourceAdapter>, Arc::new(good)],
            dir.path().to_path_buf(),
        );

        let report = pipeline.run_cycle(false).await.unwrap();

        let broken = &report.sources[0];
        assert_eq!(broken.source_id, "broken");
        assert!(broken.error.is_some());
        assert_eq!(broken.merged, 0);

        let stub = &report.sources[1];
        assert_eq!(stub.raw, 2);
        assert_eq!(stub.normalized, 2);
        assert_eq!(stub.merged, 2);
        assert_eq!(stub.failed, 0);

        assert_eq!(report.total_merged, 2);
        assert_eq!(store.all().await.unwrap().len(), 2);
        assert_eq!(report.status_counts.get("available"), Some(&1));
        assert_eq!(report.status_counts.get("pending"), Some(&1));
    }

    #[tokio::test]
    async fn rejected_observations_are_counted_not_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut bad = observation("GVA", 6, None);
        bad.departure = Some("soon".to_string());
        let adapter = StaticAdapter {
            source_id: "stub",
            rows: vec![bad, observation("ZRH", 20, Some(900.0))],
        };
        let (pipeline, store) = pipeline_with(
            vec![Arc::new(adapter) as Arc<dyn SourceAdapter>],
            dir.path().to_path_buf(),
        );

        let report = pipeline.run_cycle(false).await.unwrap();
        let stub = &report.sources[0];
        assert_eq!(stub.raw, 2);
        assert_eq!(stub.rejected, 1);
        assert_eq!(stub.normalized, 1);
        assert_eq!(stub.merged, 1);
        assert_eq!(store.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dry_run_counts_but_never_touches_the_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let adapter = StaticAdapter {
            source_id: "stub",
            rows: vec![observation("GVA", 6, Some(4200.0))],
        };
        let (pipeline, store) = pipeline_with(
            vec![Arc::new(adapter) as Arc<dyn SourceAdapter>],
            dir.path().to_path_buf(),
        );

        let report = pipeline.run_cycle(true).await.unwrap();
        assert!(report.dry_run);
        assert_eq!(report.sources[0].raw, 1);
        assert_eq!(report.sources[0].normalized, 1);
        assert_eq!(report.total_merged, 0);
        assert_eq!(report.swept_unavailable, 0);
        assert!(store.all().await.unwrap().is_empty());
        assert!(report.status_counts.is_empty());
    }

    #[tokio::test]
    async fn cycle_writes_a_machine_readable_report() {
        let dir = tempfile::tempdir().expect("tempdir");
        let adapter = StaticAdapter {
            source_id: "stub",
            rows: vec![observation("GVA", 6, Some(4200.0))],
        };
        let (pipeline, _store) = pipeline_with(
            vec![Arc::new(adapter) as Arc<dyn SourceAdapter>],
            dir.path().to_path_buf(),
        );

        let report = pipeline.run_cycle(false).await.unwrap();
        let run_dir = dir.path().join(report.run_id.to_string());
        let json = std::fs::read_to_string(run_dir.join("cycle_report.json")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["total_merged"], 1);
        assert_eq!(parsed["sources"][0]["source_id"], "stub");
        assert!(run_dir.join("cycle_brief.md").exists());
    }

    #[tokio::test]
    async fn same_leg_from_two_adapters_consolidates_into_one_row() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut alpha_row = observation("FRA", 6, Some(9000.0));
        alpha_row.source = "alpha".to_string();
        alpha_row.destination = "JFK".to_string();
        alpha_row.link = Some("https://alpha.example/leg".to_string());
        let mut beta_row = observation("FRA", 8, Some(8700.0));
        beta_row.source = "beta".to_string();
        beta_row.destination = "JFK".to_string();
        beta_row.departure = Some("2025-08-09T10:08:40Z".to_string());
        beta_row.link = Some("https://beta.example/leg".to_string());

        let alpha = StaticAdapter {
            source_id: "alpha",
            rows: vec![alpha_row],
        };
        let beta = StaticAdapter {
            source_id: "beta",
            rows: vec![beta_row],
        };
        let (pipeline, store) = pipeline_with(
            vec![Arc::new(alpha) as Arc<dyn SourceAdapter>, Arc::new(beta)],
            dir.path().to_path_buf(),
        );

        let report = pipeline.run_cycle(false).await.unwrap();
        assert_eq!(report.total_merged, 2);

        let flights = store.all().await.unwrap();
        assert_eq!(flights.len(), 1);
        assert_eq!(flights[0].best_price, Some(8700.0));
        assert_eq!(flights[0].refs.len(), 2);
    }

    #[test]
    fn config_validation_fails_fast() {
        let mut config = test_config(PathBuf::from("reports"));
        config.database_url = Some("  ".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyDatabaseUrl)
        ));

        let mut config = test_config(PathBuf::from("reports"));
        config.freshness_window_hours = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BadFreshnessWindow(0))
        ));
    }

    #[test]
    fn registry_yaml_parses_with_optional_notes() {
        let yaml = r#"
sources:
  - source_id: globeair
    display_name: GlobeAir
    enabled: true
  - source_id: aslgroup
    display_name: ASL Group
    enabled: false
    notes: markup shifts often
"#;
        let registry: SourceRegistry = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(registry.sources.len(), 2);
        assert!(registry.sources[0].enabled);
        assert_eq!(
            registry.sources[1].notes.as_deref(),
            Some("markup shifts often")
        );
    }
}
