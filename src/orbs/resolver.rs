use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tokio::task::JoinSet;

use crate::builder::build_orb_info;
use crate::config::SettingsStore;
use crate::error::OrbResolutionError;

use super::{OrbInfo, OrbKey, OrbLookup, OrbSourceFetcher, OrbState};

type Resolution = Result<Arc<OrbInfo>, OrbResolutionError>;

/// Shared result of the one fetch running for a key
type InFlight = Arc<OnceCell<Resolution>>;

/// Cache of registry orbs keyed by `namespace/name@version`
///
/// At most one fetch runs per key; concurrent callers await the same
/// result. Failures are remembered for [`OrbLookup`] and retried on the next
/// explicit [`resolve`](OrbResolver::resolve).
pub struct OrbResolver {
    fetcher: Arc<dyn OrbSourceFetcher>,
    settings: Arc<SettingsStore>,
    cache: DashMap<OrbKey, Arc<OrbInfo>>,
    failures: DashMap<OrbKey, OrbResolutionError>,
    in_flight: DashMap<OrbKey, InFlight>,
    /// Bumped by `invalidate_all` so fetches started before it are not cached
    generation: AtomicU64,
}

impl OrbResolver {
    pub fn new(fetcher: Arc<dyn OrbSourceFetcher>, settings: Arc<SettingsStore>) -> Self {
        Self {
            fetcher,
            settings,
            cache: DashMap::new(),
            failures: DashMap::new(),
            in_flight: DashMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    pub async fn resolve(&self, key: &OrbKey) -> Resolution {
        if let Some(info) = self.cache.get(key) {
            return Ok(Arc::clone(info.value()));
        }

        let generation = self.generation.load(Ordering::Acquire);
        let slot: InFlight = self
            .in_flight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .value()
            .clone();

        // A fetch finishing between the first check and taking the slot has
        // already cached its result and released its slot
        if let Some(info) = self.cache.get(key) {
            let info = Arc::clone(info.value());
            self.in_flight
                .remove_if(key, |_, current| Arc::ptr_eq(current, &slot));
            return Ok(info);
        }

        let result = slot.get_or_init(|| self.fetch(key)).await.clone();

        if self.generation.load(Ordering::Acquire) == generation {
            match &result {
                Ok(info) => {
                    self.cache.insert(key.clone(), Arc::clone(info));
                    self.failures.remove(key);
                }
                Err(err) => {
                    self.failures.insert(key.clone(), err.clone());
                }
            }
        } else {
            tracing::debug!("Dropping resolution of {} started before invalidation", key);
        }

        self.in_flight
            .remove_if(key, |_, current| Arc::ptr_eq(current, &slot));

        result
    }

    /// Resolve distinct keys concurrently. Results follow no particular order.
    pub async fn resolve_all(
        self: &Arc<Self>,
        keys: impl IntoIterator<Item = OrbKey>,
    ) -> Vec<(OrbKey, Resolution)> {
        let keys: HashSet<OrbKey> = keys.into_iter().collect();
        let mut tasks = JoinSet::new();

        for key in keys {
            let resolver = Arc::clone(self);
            tasks.spawn(async move {
                let result = resolver.resolve(&key).await;
                (key, result)
            });
        }

        let mut results = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(err) => tracing::warn!("Orb resolution task failed: {}", err),
            }
        }
        results
    }

    /// Forget every cached orb and failure, e.g. after the token or host changed
    pub fn invalidate_all(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.cache.clear();
        self.failures.clear();
        self.in_flight.clear();
        tracing::debug!("Orb cache invalidated");
    }

    pub fn cached(&self, key: &OrbKey) -> Option<Arc<OrbInfo>> {
        self.cache.get(key).map(|info| Arc::clone(info.value()))
    }

    async fn fetch(&self, key: &OrbKey) -> Resolution {
        let settings = self.settings.snapshot();
        let name = key.to_string();

        let fetched = tokio::time::timeout(
            settings.fetch_timeout(),
            self.fetcher.fetch_orb_source(key, &settings),
        )
        .await
        .map_err(|_| {
            tracing::warn!("Timed out fetching orb {}", name);
            OrbResolutionError::Timeout(name.clone())
        })?
        .map_err(|err| {
            tracing::warn!("Failed to fetch orb {}: {}", name, err);
            OrbResolutionError::from_fetch(&name, err)
        })?;

        let mut info = build_orb_info(key, &fetched.source)?;
        info.version_info = fetched.version_info;

        tracing::debug!("Resolved orb {}", name);
        Ok(Arc::new(info))
    }
}

impl OrbLookup for OrbResolver {
    fn lookup(&self, key: &OrbKey) -> OrbState {
        if let Some(info) = self.cache.get(key) {
            return OrbState::Resolved(Arc::clone(info.value()));
        }
        match self.failures.get(key) {
            Some(err) => OrbState::Failed(err.value().clone()),
            None => OrbState::Pending,
        }
    }
}
