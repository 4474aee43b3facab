//! Endpoint configuration store and the short-lived snapshot cache in front
//! of it.
//!
//! The real store is owned by the CRUD service; the engine only needs the
//! read path defined by [`EndpointStore`]. [`EndpointCache`] parses each
//! fetched mock once and reuses the snapshot for a few seconds. When the store
//! fails, a stale snapshot is served rather than nothing.

use crate::config::{EngineSettings, ResolverConfig};
use crate::error::{ConfigError, StoreError};
use crate::model::{MockEndpoint, StoredMock};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Read path of the configuration store.
#[async_trait]
pub trait EndpointStore: Send + Sync {
    /// Fetch the current configuration of one mock. `Ok(None)` means the
    /// store does not know the endpoint.
    async fn get_endpoint_config(
        &self,
        project_slug: &str,
        method: &str,
        path: &str,
    ) -> Result<Option<StoredMock>, StoreError>;
}

#[async_trait]
impl<S: EndpointStore + ?Sized> EndpointStore for Arc<S> {
    async fn get_endpoint_config(
        &self,
        project_slug: &str,
        method: &str,
        path: &str,
    ) -> Result<Option<StoredMock>, StoreError> {
        (**self).get_endpoint_config(project_slug, method, path).await
    }
}

/// Identifies one mock: project slug, uppercased method, path pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointKey {
    pub project: String,
    pub method: String,
    pub path: String,
}

impl EndpointKey {
    pub fn new(project: &str, method: &str, path: &str) -> Self {
        Self {
            project: project.to_string(),
            method: method.to_uppercase(),
            path: path.to_string(),
        }
    }
}

/// Store backed by an in-process map, seeded from the configuration file.
#[derive(Default)]
pub struct InMemoryEndpointStore {
    mocks: RwLock<HashMap<EndpointKey, StoredMock>>,
}

impl InMemoryEndpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &ResolverConfig) -> Self {
        let mocks = config
            .projects
            .iter()
            .flat_map(|project| {
                project.mocks.iter().map(move |mock| {
                    (
                        EndpointKey::new(&project.slug, &mock.method, &mock.path),
                        mock.clone(),
                    )
                })
            })
            .collect();

        Self {
            mocks: RwLock::new(mocks),
        }
    }

    /// Insert or replace a mock.
    pub async fn upsert(&self, project_slug: &str, mock: StoredMock) {
        let key = EndpointKey::new(project_slug, &mock.method, &mock.path);
        self.mocks.write().await.insert(key, mock);
    }

    pub async fn remove(&self, project_slug: &str, method: &str, path: &str) -> Option<StoredMock> {
        self.mocks
            .write()
            .await
            .remove(&EndpointKey::new(project_slug, method, path))
    }

    pub async fn len(&self) -> usize {
        self.mocks.read().await.len()
    }
}

#[async_trait]
impl EndpointStore for InMemoryEndpointStore {
    async fn get_endpoint_config(
        &self,
        project_slug: &str,
        method: &str,
        path: &str,
    ) -> Result<Option<StoredMock>, StoreError> {
        let key = EndpointKey::new(project_slug, method, path);
        Ok(self.mocks.read().await.get(&key).cloned())
    }
}

struct CachedEndpoint {
    endpoint: Arc<MockEndpoint>,
    fetched_at: Instant,
}

/// TTL cache of parsed endpoint snapshots in front of an [`EndpointStore`].
pub struct EndpointCache<S> {
    store: S,
    settings: Arc<EngineSettings>,
    ttl: Duration,
    entries: DashMap<EndpointKey, CachedEndpoint>,
    store_fetches: AtomicU64,
}

impl<S: EndpointStore> EndpointCache<S> {
    pub fn new(store: S, settings: Arc<EngineSettings>) -> Self {
        let ttl = settings.config_cache_ttl();
        Self {
            store,
            settings,
            ttl,
            entries: DashMap::new(),
            store_fetches: AtomicU64::new(0),
        }
    }

    /// Current snapshot of an endpoint, fetching it when missing or expired.
    pub async fn get(
        &self,
        project_slug: &str,
        method: &str,
        path: &str,
    ) -> Result<Arc<MockEndpoint>, ConfigError> {
        let key = EndpointKey::new(project_slug, method, path);

        // Clone out of the map before awaiting; shard guards must not be held
        let cached = self
            .entries
            .get(&key)
            .map(|entry| (Arc::clone(&entry.endpoint), entry.fetched_at.elapsed()));

        if let Some((endpoint, age)) = &cached {
            if *age < self.ttl {
                return Ok(Arc::clone(endpoint));
            }
        }

        self.store_fetches.fetch_add(1, Ordering::Relaxed);
        match self
            .store
            .get_endpoint_config(&key.project, &key.method, &key.path)
            .await
        {
            Ok(Some(stored)) => {
                let endpoint = Arc::new(MockEndpoint::from_stored(&stored, &self.settings));
                debug!(
                    mock_id = %endpoint.id,
                    candidates = endpoint.candidates.len(),
                    "Loaded endpoint snapshot"
                );
                self.entries.insert(
                    key,
                    CachedEndpoint {
                        endpoint: Arc::clone(&endpoint),
                        fetched_at: Instant::now(),
                    },
                );
                Ok(endpoint)
            }
            Ok(None) => {
                self.entries.remove(&key);
                Err(ConfigError::UnknownEndpoint {
                    project: key.project,
                    method: key.method,
                    path: key.path,
                })
            }
            Err(e) => match cached {
                Some((endpoint, age)) => {
                    warn!(
                        mock_id = %endpoint.id,
                        age_ms = age.as_millis() as u64,
                        error = %e,
                        "Config store failed, serving stale endpoint snapshot"
                    );
                    Ok(endpoint)
                }
                None => Err(ConfigError::Store(e)),
            },
        }
    }

    /// Drop one endpoint's snapshot.
    pub fn invalidate(&self, project_slug: &str, method: &str, path: &str) {
        self.entries
            .remove(&EndpointKey::new(project_slug, method, path));
    }

    /// Drop every snapshot belonging to a project.
    pub fn invalidate_project(&self, project_slug: &str) {
        self.entries.retain(|key, _| key.project != project_slug);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of round trips made to the underlying store.
    pub fn store_fetches(&self) -> u64 {
        self.store_fetches.load(Ordering::Relaxed)
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}
