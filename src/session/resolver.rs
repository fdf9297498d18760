// src/session/resolver.rs - Scenario lookup backed by a process-lifetime cache
//
// First miss on an empty cache triggers one bulk listing shared by every
// concurrent caller. Misses after that fall back to a coalesced by-id fetch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use super::single_flight::{FlightKey, SingleFlight};
use super::types::Scenario;
use crate::infra::errors::{ResourceKind, SimError};
use crate::remote::{ScenarioFilter, SimulationService};

type Cache = Arc<RwLock<HashMap<String, Arc<Scenario>>>>;

pub struct ScenarioResolver {
    service: Arc<dyn SimulationService>,
    cache: Cache,
    populated: Arc<AtomicBool>,
    bulk: SingleFlight<FlightKey, Vec<Arc<Scenario>>>,
    single: SingleFlight<FlightKey, Arc<Scenario>>,
}

impl ScenarioResolver {
    pub fn new(service: Arc<dyn SimulationService>) -> Self {
        Self {
            service,
            cache: Arc::new(RwLock::new(HashMap::new())),
            populated: Arc::new(AtomicBool::new(false)),
            bulk: SingleFlight::new(),
            single: SingleFlight::new(),
        }
    }

    /// Resolve a scenario id to its record.
    pub async fn resolve(&self, scenario_id: &str) -> Result<Arc<Scenario>, SimError> {
        if let Some(hit) = self.cached(scenario_id) {
            tracing::debug!(scenario = scenario_id, "Scenario cache hit");
            return Ok(hit);
        }

        if !self.populated.load(Ordering::Acquire) {
            let listed = self.list(&ScenarioFilter::default()).await?;
            tracing::debug!("Scenario cache populated with {} entries", listed.len());
            return self
                .cached(scenario_id)
                .ok_or_else(|| SimError::not_found(ResourceKind::Scenario, scenario_id));
        }

        let service = Arc::clone(&self.service);
        let cache = Arc::clone(&self.cache);
        let id = scenario_id.to_string();
        self.single
            .run(FlightKey::new("get_scenario", scenario_id), move || async move {
                let scenario = service.get_scenario(&id).await?;
                Ok(insert(&cache, scenario))
            })
            .await
    }

    /// Filtered listing straight from the remote. Results are cached but an
    /// existing entry is never replaced.
    pub async fn list(&self, filter: &ScenarioFilter) -> Result<Vec<Arc<Scenario>>, SimError> {
        let service = Arc::clone(&self.service);
        let cache = Arc::clone(&self.cache);
        let populated = Arc::clone(&self.populated);
        let owned = filter.clone();
        self.bulk
            .run(FlightKey::new("list_scenarios", filter.cache_key()), move || async move {
                let scenarios = service.list_scenarios(&owned).await?;
                let listed: Vec<Arc<Scenario>> =
                    scenarios.into_iter().map(|s| insert(&cache, s)).collect();
                // Cache is filled before any waiter is released.
                if owned.is_empty() {
                    populated.store(true, Ordering::Release);
                }
                Ok(listed)
            })
            .await
    }

    /// Drop every cached scenario; the next resolve lists again.
    pub fn clear(&self) {
        let mut cache = self.cache.write().unwrap_or_else(|p| p.into_inner());
        cache.clear();
        self.populated.store(false, Ordering::Release);
    }

    pub fn cached_len(&self) -> usize {
        self.cache.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    fn cached(&self, scenario_id: &str) -> Option<Arc<Scenario>> {
        self.cache
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(scenario_id)
            .cloned()
    }
}

fn insert(cache: &Cache, scenario: Scenario) -> Arc<Scenario> {
    let mut cache = cache.write().unwrap_or_else(|p| p.into_inner());
    Arc::clone(
        cache
            .entry(scenario.id.clone())
            .or_insert_with(|| Arc::new(scenario)),
    )
}
