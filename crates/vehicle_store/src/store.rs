use crate::enrichment::EnrichmentGate;
use crate::state::{
    coord_number, valid_coordinates, StoreSnapshot, VehicleCacheEntry,
};
use async_trait::async_trait;
use common::{
    AliasResource, DomainError, DomainResult, GeocodeClient, LinkControl, SignalMap, TelemetryRequest,
    TelemetrySink, VehicleApi, VehicleInfo, WeatherClient,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, instrument, warn};
use voltra_payload::{core_telemetry_requests, normalize_batch, AliasLookup};

/// Time box for each individual external enrichment call.
const ENRICH_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Full-catalogue sweeps are cached this long per vehicle.
const FULL_TELEMETRY_TTL_MS: i64 = 5 * 60 * 1000;

/// Catalogue version retried when a vehicle's own version has no entries.
const FALLBACK_ALIAS_VERSION: &str = "1.0";

/// One cached full-catalogue sweep.
#[derive(Debug, Clone)]
pub struct FullTelemetrySnapshot {
    pub resources: Vec<AliasResource>,
    pub samples: Vec<Value>,
    pub fetched_at_ms: i64,
}

struct StoreState {
    vehicles: Vec<VehicleInfo>,
    cache: HashMap<String, VehicleCacheEntry>,
    active_vin: Option<String>,
    refreshing: bool,
    enriching: bool,
    scanning: bool,
    initialized: bool,
    fetch_count: usize,
    full_telemetry: HashMap<String, FullTelemetrySnapshot>,
}

struct StoreInner {
    api: Arc<dyn VehicleApi>,
    geocoder: Arc<dyn GeocodeClient>,
    weather: Arc<dyn WeatherClient>,
    link: Arc<dyn LinkControl>,
    aliases: AliasLookup,
    state: Mutex<StoreState>,
    /// Per-vehicle in-flight fetch markers; followers await the leader's
    /// completion signal instead of issuing a duplicate request.
    fetch_inflight: Mutex<HashMap<String, watch::Receiver<bool>>>,
    enrich_gate: Mutex<EnrichmentGate>,
}

/// Per-vehicle telemetry store.
///
/// Exclusively owns the telemetry cache; every mutation goes through its
/// merge path. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct VehicleStore {
    inner: Arc<StoreInner>,
}

impl VehicleStore {
    pub fn new(
        api: Arc<dyn VehicleApi>,
        geocoder: Arc<dyn GeocodeClient>,
        weather: Arc<dyn WeatherClient>,
        link: Arc<dyn LinkControl>,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                api,
                geocoder,
                weather,
                link,
                aliases: AliasLookup::from_static_table(),
                state: Mutex::new(StoreState {
                    vehicles: Vec::new(),
                    cache: HashMap::new(),
                    active_vin: None,
                    refreshing: false,
                    enriching: false,
                    scanning: false,
                    initialized: false,
                    fetch_count: 0,
                    full_telemetry: HashMap::new(),
                }),
                fetch_inflight: Mutex::new(HashMap::new()),
                enrich_gate: Mutex::new(EnrichmentGate::default()),
            }),
        }
    }

    /// Read-only view of the active vehicle and store flags.
    pub async fn snapshot(&self) -> StoreSnapshot {
        let state = self.inner.state.lock().await;
        let entry = state
            .active_vin
            .as_ref()
            .and_then(|vin| state.cache.get(vin));
        StoreSnapshot {
            active_vin: state.active_vin.clone(),
            vehicles: state.vehicles.clone(),
            signals: entry.map(|e| e.signals.clone()).unwrap_or_default(),
            last_updated_ms: entry.and_then(|e| e.last_updated_ms),
            refreshing: state.refreshing,
            enriching: state.enriching,
            scanning: state.scanning,
            initialized: state.initialized,
        }
    }

    /// Fetch the account vehicle list, seed the cache, select the first
    /// vehicle and prefetch the rest in the background.
    pub async fn load_vehicles(&self) -> DomainResult<Option<String>> {
        let vehicles = self.inner.api.fetch_vehicles().await?;

        // Deduplicate by VIN, keeping first occurrence.
        let mut unique: Vec<VehicleInfo> = Vec::new();
        for vehicle in vehicles {
            if !unique.iter().any(|v| v.vin == vehicle.vin) {
                unique.push(vehicle);
            }
        }

        let first_vin = {
            let mut state = self.inner.state.lock().await;
            for vehicle in &unique {
                let entry = state
                    .cache
                    .entry(vehicle.vin.clone())
                    .or_insert_with(|| VehicleCacheEntry::new(&vehicle.vin));
                entry.info = Some(vehicle.clone());
            }
            state.vehicles = unique.clone();
            unique.first().map(|v| v.vin.clone())
        };

        if let Some(vin) = &first_vin {
            self.switch_vehicle(vin).await?;
            let store = self.clone();
            tokio::spawn(async move {
                store.prefetch_other_vehicles().await;
            });
        }

        Ok(first_vin)
    }

    /// Make a vehicle active: hydrate visible state from cache immediately,
    /// retarget the broker link, and refresh only when the cached telemetry
    /// is stale.
    #[instrument(skip(self), fields(vin = %vin))]
    pub async fn switch_vehicle(&self, vin: &str) -> DomainResult<()> {
        let (fresh, coordinates) = {
            let mut state = self.inner.state.lock().await;
            let info = state
                .vehicles
                .iter()
                .find(|v| v.vin == vin)
                .cloned()
                .ok_or_else(|| DomainError::VehicleNotFound(vin.to_string()))?;

            let entry = state
                .cache
                .entry(vin.to_string())
                .or_insert_with(|| VehicleCacheEntry::new(vin));
            entry.info = Some(info);

            let fresh = entry.has_fresh_telemetry(now_ms());
            let coordinates = entry.coordinates();

            state.active_vin = Some(vin.to_string());
            // Cached data is shown as-is; only a stale entry flips the
            // refreshing flag.
            state.refreshing = !fresh;
            (fresh, coordinates)
        };

        debug!(fresh = fresh, "switched active vehicle");

        // Retarget the broker link without blocking on it; the cached data
        // is already visible.
        {
            let link = Arc::clone(&self.inner.link);
            let vin = vin.to_string();
            tokio::spawn(async move {
                if let Err(e) = link.switch_vehicle(&vin).await {
                    warn!(vin = %vin, error = %e, "broker link switch failed");
                }
            });
        }

        // Re-gate enrichment from cached coordinates; thresholds decide.
        if let Some((lat, lon)) = coordinates {
            self.spawn_enrichment(vin, lat, lon, false);
        }

        if !fresh {
            self.fetch_telemetry(vin).await;
        }
        Ok(())
    }

    /// Force a refresh: invalidate only the freshness marker so live data
    /// stays visible, then fetch.
    pub async fn refresh_vehicle(&self, vin: &str) -> DomainResult<()> {
        if vin.is_empty() {
            return Ok(());
        }
        {
            let mut state = self.inner.state.lock().await;
            let info = state.vehicles.iter().find(|v| v.vin == vin).cloned();
            let entry = state
                .cache
                .entry(vin.to_string())
                .or_insert_with(|| VehicleCacheEntry::new(vin));
            if entry.info.is_none() {
                entry.info = info;
            }
            entry.last_updated_ms = None;
            state.refreshing = true;
        }

        self.fetch_telemetry(vin).await;
        Ok(())
    }

    /// Background-fetch every vehicle on the account without fresh cached
    /// telemetry, excluding the active one.
    pub async fn prefetch_other_vehicles(&self) {
        let vins: Vec<String> = {
            let state = self.inner.state.lock().await;
            state
                .vehicles
                .iter()
                .filter(|v| Some(&v.vin) != state.active_vin.as_ref())
                .filter(|v| {
                    state
                        .cache
                        .get(&v.vin)
                        .map(|entry| entry.last_updated_ms.is_none())
                        .unwrap_or(true)
                })
                .map(|v| v.vin.clone())
                .collect()
        };

        for vin in vins {
            info!(vin = %vin, "prefetching telemetry for background vehicle");
            let store = self.clone();
            tokio::spawn(async move {
                store.fetch_telemetry_with_mode(&vin, true).await;
            });
        }
    }

    /// Fetch and merge the core telemetry for one vehicle.
    ///
    /// At most one fetch is in flight per vehicle id: concurrent callers
    /// await the same underlying request and observe the same merged cache.
    /// Failures are logged, not surfaced; the cache simply stays stale.
    pub async fn fetch_telemetry(&self, vin: &str) {
        self.fetch_telemetry_with_mode(vin, false).await;
    }

    async fn fetch_telemetry_with_mode(&self, vin: &str, background: bool) {
        if vin.is_empty() {
            return;
        }

        let leader = {
            let mut inflight = self.inner.fetch_inflight.lock().await;
            match inflight.get(vin) {
                Some(receiver) => Err(receiver.clone()),
                None => {
                    let (tx, rx) = watch::channel(false);
                    inflight.insert(vin.to_string(), rx);
                    Ok(tx)
                }
            }
        };

        match leader {
            Ok(done_tx) => {
                self.run_fetch(vin, background).await;
                self.inner.fetch_inflight.lock().await.remove(vin);
                let _ = done_tx.send(true);
            }
            Err(mut done_rx) => {
                // A fetch is already in flight; wait for its completion.
                while !*done_rx.borrow_and_update() {
                    if done_rx.changed().await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    async fn run_fetch(&self, vin: &str, background: bool) {
        {
            let mut state = self.inner.state.lock().await;
            state.fetch_count += 1;
            if state.fetch_count == 1 && !background {
                state.refreshing = true;
                state.enriching = true;
            }
        }

        let result = self.do_fetch(vin).await;
        let success = result.is_ok();

        {
            let mut state = self.inner.state.lock().await;
            state.fetch_count = state.fetch_count.saturating_sub(1);
            if state.fetch_count == 0 || !background {
                state.refreshing = false;
                state.enriching = false;
            }
            if success && !state.initialized {
                state.initialized = true;
            }
        }

        if let Err(e) = result {
            error!(vin = %vin, error = %e, "telemetry refresh failed");
        }
    }

    async fn do_fetch(&self, vin: &str) -> DomainResult<()> {
        let requests = core_telemetry_requests();
        let elements = self.inner.api.fetch_telemetry(vin, &requests).await?;
        let signals = normalize_batch(&elements, &self.inner.aliases);
        if signals.is_empty() {
            // "No data yet" is an absent value, not an error.
            debug!(vin = %vin, "telemetry fetch returned no mapped signals");
            return Ok(());
        }

        let coordinates = self.merge(vin, &signals, true).await;

        // Enrich only when the payload did not already carry enrichment
        // fields, and never block the caller on it.
        let has_enrichment_fields = signals.contains_key("location_address")
            || signals.contains_key("weather_address")
            || signals.contains_key("weather_outside_temp")
            || signals.contains_key("weather_code");
        if let Some((lat, lon)) = coordinates {
            if !has_enrichment_fields {
                self.spawn_enrichment(vin, lat, lon, false);
            }
        }
        Ok(())
    }

    /// Merge signals into a vehicle's cache entry; returns the entry's
    /// coordinates after the merge.
    async fn merge(&self, vin: &str, signals: &SignalMap, skip_nulls: bool) -> Option<(f64, f64)> {
        let mut state = self.inner.state.lock().await;
        let entry = state
            .cache
            .entry(vin.to_string())
            .or_insert_with(|| VehicleCacheEntry::new(vin));
        entry.merge_signals(signals, skip_nulls, now_ms());
        entry.coordinates()
    }

    /// Fetch the full alias catalogue and a complete sample sweep for one
    /// vehicle, cached per vehicle for five minutes.
    #[instrument(skip(self), fields(vin = %vin))]
    pub async fn full_telemetry(
        &self,
        vin: &str,
        force: bool,
    ) -> DomainResult<FullTelemetrySnapshot> {
        {
            let state = self.inner.state.lock().await;
            if !force {
                if let Some(snapshot) = state.full_telemetry.get(vin) {
                    if now_ms() - snapshot.fetched_at_ms < FULL_TELEMETRY_TTL_MS {
                        debug!("serving cached full telemetry");
                        return Ok(snapshot.clone());
                    }
                }
            }
        }

        self.set_scanning(true).await;
        let result = self.fetch_full_telemetry(vin).await;
        self.set_scanning(false).await;

        let snapshot = result?;
        self.inner
            .state
            .lock()
            .await
            .full_telemetry
            .insert(vin.to_string(), snapshot.clone());
        Ok(snapshot)
    }

    async fn fetch_full_telemetry(&self, vin: &str) -> DomainResult<FullTelemetrySnapshot> {
        let version = {
            let state = self.inner.state.lock().await;
            state
                .vehicles
                .iter()
                .find(|v| v.vin == vin)
                .and_then(|v| v.alias_version.clone())
                .unwrap_or_else(|| FALLBACK_ALIAS_VERSION.to_string())
        };

        let mut resources = self.inner.api.fetch_aliases(vin, &version).await?;
        if resources.is_empty() && version != FALLBACK_ALIAS_VERSION {
            info!(version = %version, "no aliases for vehicle version, falling back");
            resources = self
                .inner
                .api
                .fetch_aliases(vin, FALLBACK_ALIAS_VERSION)
                .await?;
        }
        if resources.is_empty() {
            return Err(DomainError::Parse(format!(
                "no alias catalogue available for vehicle {}",
                vin
            )));
        }

        let requests: Vec<TelemetryRequest> = resources
            .iter()
            .filter_map(|resource| {
                Some(TelemetryRequest {
                    object_id: resource.object_id.clone()?,
                    instance_id: resource.instance_id.clone().unwrap_or_else(|| "0".to_string()),
                    resource_id: resource.resource_id.clone().unwrap_or_else(|| "0".to_string()),
                })
            })
            .collect();

        let samples = self.inner.api.fetch_telemetry(vin, &requests).await?;
        info!(
            resources = resources.len(),
            samples = samples.len(),
            "full telemetry sweep complete"
        );

        Ok(FullTelemetrySnapshot {
            resources,
            samples,
            fetched_at_ms: now_ms(),
        })
    }

    async fn set_scanning(&self, scanning: bool) {
        self.inner.state.lock().await.scanning = scanning;
    }

    fn spawn_enrichment(&self, vin: &str, lat: f64, lon: f64, force: bool) {
        let store = self.clone();
        let vin = vin.to_string();
        tokio::spawn(async move {
            store.enrich(&vin, lat, lon, force).await;
        });
    }

    /// Run external enrichment for a coordinate pair, if the per-vehicle
    /// gate allows it. Geocode and weather calls are individually
    /// time-boxed; partial success still updates the cache.
    pub async fn enrich(&self, vin: &str, lat: f64, lon: f64, force: bool) {
        if !valid_coordinates(lat, lon) {
            return;
        }
        {
            let mut gate = self.inner.enrich_gate.lock().await;
            if !gate.try_begin(vin, lat, lon, force, now_ms()) {
                return;
            }
        }

        let is_active = {
            let mut state = self.inner.state.lock().await;
            let is_active = state.active_vin.as_deref() == Some(vin);
            if is_active {
                state.enriching = true;
            }
            is_active
        };

        let (geocode, weather) = tokio::join!(
            tokio::time::timeout(ENRICH_CALL_TIMEOUT, self.inner.geocoder.reverse_geocode(lat, lon)),
            tokio::time::timeout(ENRICH_CALL_TIMEOUT, self.inner.weather.current_weather(lat, lon)),
        );

        let mut signals = SignalMap::new();
        match geocode {
            Ok(Ok(Some(address))) => {
                signals.insert("location_address".to_string(), Value::String(address.location_address));
                signals.insert("weather_address".to_string(), Value::String(address.weather_address));
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => warn!(vin = %vin, error = %e, "reverse geocode failed"),
            Err(_) => warn!(vin = %vin, "reverse geocode timed out"),
        }
        match weather {
            Ok(Ok(Some(observation))) => {
                if let Some(temperature) = observation.temperature {
                    if let Some(number) = serde_json::Number::from_f64(temperature) {
                        signals.insert("weather_outside_temp".to_string(), Value::Number(number));
                    }
                }
                if let Some(code) = observation.weather_code {
                    signals.insert("weather_code".to_string(), Value::Number(code.into()));
                }
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => warn!(vin = %vin, error = %e, "weather fetch failed"),
            Err(_) => warn!(vin = %vin, "weather fetch timed out"),
        }

        if !signals.is_empty() {
            self.merge(vin, &signals, true).await;
            debug!(vin = %vin, fields = signals.len(), "enrichment merged");
        }

        // Attempt state is recorded even on total failure so a dead
        // endpoint is retried on the TTL, not on every update.
        self.inner
            .enrich_gate
            .lock()
            .await
            .finish(vin, lat, lon, now_ms());

        {
            let mut state = self.inner.state.lock().await;
            if is_active && state.active_vin.as_deref() == Some(vin) {
                state.enriching = false;
            }
        }
    }
}

/// Broker pushes land in the cache through the same merge path as REST
/// fetches, but with null-preserving semantics: a push is authoritative.
#[async_trait]
impl TelemetrySink for VehicleStore {
    async fn ingest(&self, vin: &str, signals: SignalMap) -> DomainResult<()> {
        if vin.is_empty() || signals.is_empty() {
            return Ok(());
        }

        self.merge(vin, &signals, false).await;

        let lat = signals.get("latitude").and_then(coord_number);
        let lon = signals.get("longitude").and_then(coord_number);
        if let (Some(lat), Some(lon)) = (lat, lon) {
            if valid_coordinates(lat, lon) {
                self.spawn_enrichment(vin, lat, lon, false);
            }
        }
        Ok(())
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
