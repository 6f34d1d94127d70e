//! Create, replace, fetch and delete routing rules
//!
//! Every mutating operation runs the same pipeline:
//!
//! ```text
//! validate/normalize → render → existence check → write both files → signal proxies
//! ```
//!
//! Storage and signaling are not one transaction. When signaling fails the
//! files are already written and stay written; the caller gets
//! [`ReconcileError::SignalPropagation`] and may retry the whole operation.
//!
//! Operations on the same identifier are serialized, so two concurrent
//! creates for one identifier produce one success and one conflict.
//! Operations on different identifiers run in parallel.

use crate::config::ReconcilerConfig;
use crate::error::ReconcileError;
use crate::matcher::NameMatcher;
use crate::record::{validate_identifier, ChangeRecord};
use crate::render::Renderer;
use crate::runtime::ProcessRuntime;
use crate::signal::ProcessController;
use crate::store::{Store, StoreError};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

pub struct Reconciler {
    store: Store,
    renderer: Renderer,
    controller: ProcessController,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Drops the identifier's map entry once nobody else holds or waits on it.
/// Armed before waiting, so a cancelled wait cleans up too.
struct LockRelease<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    identifier: String,
}

impl Drop for LockRelease<'_> {
    fn drop(&mut self) {
        self.locks
            .remove_if(&self.identifier, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Holds the per-identifier lock. Fields drop in order: the mutex is
/// released before the map entry is considered for removal.
struct IdentifierGuard<'a> {
    _guard: OwnedMutexGuard<()>,
    _release: LockRelease<'a>,
}

impl Reconciler {
    pub fn new(store: Store, renderer: Renderer, controller: ProcessController) -> Self {
        Self {
            store,
            renderer,
            controller,
            locks: DashMap::new(),
        }
    }

    /// Build a reconciler from configuration. Fails if the config directory
    /// is missing, or the template is missing or does not parse.
    pub fn from_config(
        config: &ReconcilerConfig,
        runtime: Arc<dyn ProcessRuntime>,
    ) -> Result<Self, ReconcileError> {
        if !config.config_dir.is_dir() {
            return Err(ReconcileError::Configuration(format!(
                "config directory {} does not exist or is not a directory",
                config.config_dir.display()
            )));
        }

        let renderer = Renderer::from_file(&config.template).map_err(|e| {
            ReconcileError::Configuration(format!(
                "error loading template {}: {}",
                config.template.display(),
                e
            ))
        })?;

        let matcher = NameMatcher::new(&config.name_pattern).map_err(|e| {
            ReconcileError::Configuration(format!(
                "invalid container name pattern '{}': {}",
                config.name_pattern, e
            ))
        })?;

        let store = Store::with_extensions(
            &config.config_dir,
            &config.record_extension,
            &config.artifact_extension,
        );

        Ok(Self::new(store, renderer, ProcessController::new(runtime, matcher)))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    async fn lock(&self, identifier: &str) -> IdentifierGuard<'_> {
        let release = LockRelease {
            locks: &self.locks,
            identifier: identifier.to_string(),
        };
        let lock = Arc::clone(
            self.locks
                .entry(identifier.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        IdentifierGuard {
            _guard: lock.lock_owned().await,
            _release: release,
        }
    }

    /// Run blocking file I/O off the async worker threads
    async fn with_store<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Store) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }

    /// Store a new entry and reload the proxies. Either half already being
    /// on disk counts as existing.
    pub async fn create(&self, mut record: ChangeRecord) -> Result<ChangeRecord, ReconcileError> {
        validate_identifier(&record.identifier)?;
        record.normalize()?;
        let artifact = self.renderer.render(&record)?;

        let identifier = record.identifier.clone();
        let _guard = self.lock(&identifier).await;

        let id = identifier.clone();
        let presence = self.with_store(move |store| store.exists(&id)).await?;
        if presence.any() {
            if !presence.both() {
                warn!(identifier = %identifier, ?presence, "Refusing create over incomplete entry");
            }
            return Err(ReconcileError::Conflict { identifier });
        }

        let stored = record.clone();
        self.with_store(move |store| store.write(&stored, &artifact))
            .await?;
        info!(identifier = %identifier, host = ?record.host, port = ?record.port, "Entry created");

        self.propagate(&identifier).await?;
        Ok(record)
    }

    /// Overwrite an existing entry and reload the proxies. Both halves must
    /// exist.
    pub async fn replace(
        &self,
        identifier: &str,
        mut record: ChangeRecord,
    ) -> Result<ChangeRecord, ReconcileError> {
        validate_identifier(identifier)?;
        record.bind_identifier(identifier)?;
        record.normalize()?;
        let artifact = self.renderer.render(&record)?;

        let _guard = self.lock(identifier).await;

        let id = identifier.to_string();
        let presence = self.with_store(move |store| store.exists(&id)).await?;
        if !presence.both() {
            if presence.any() {
                warn!(identifier, ?presence, "Refusing replace of incomplete entry");
            }
            return Err(ReconcileError::NotFound {
                identifier: identifier.to_string(),
            });
        }

        let stored = record.clone();
        self.with_store(move |store| store.write(&stored, &artifact))
            .await?;
        info!(identifier, host = ?record.host, port = ?record.port, "Entry replaced");

        self.propagate(identifier).await?;
        Ok(record)
    }

    /// The stored record bytes, exactly as written
    pub async fn fetch(&self, identifier: &str) -> Result<Vec<u8>, ReconcileError> {
        validate_identifier(identifier)?;
        let _guard = self.lock(identifier).await;

        let id = identifier.to_string();
        let presence = self.with_store(move |store| store.exists(&id)).await?;
        if !presence.record {
            return Err(ReconcileError::NotFound {
                identifier: identifier.to_string(),
            });
        }
        if !presence.artifact {
            return Err(StoreError::Incomplete {
                identifier: identifier.to_string(),
                missing: self.store.artifact_path(identifier),
            }
            .into());
        }

        let id = identifier.to_string();
        self.with_store(move |store| store.read(&id)).await.map_err(|e| match e {
            StoreError::NotFound(_) => ReconcileError::NotFound {
                identifier: identifier.to_string(),
            },
            other => other.into(),
        })
    }

    /// Remove whatever exists for the identifier. Proxies are only reloaded
    /// when something was removed. Returns whether anything was removed.
    pub async fn delete(&self, identifier: &str) -> Result<bool, ReconcileError> {
        validate_identifier(identifier)?;
        let _guard = self.lock(identifier).await;

        let id = identifier.to_string();
        let removed = self.with_store(move |store| store.delete(&id)).await?;
        if !removed.any() {
            debug!(identifier, "Nothing to delete");
            return Ok(false);
        }
        info!(identifier, ?removed, "Entry deleted");

        self.propagate(identifier).await?;
        Ok(true)
    }

    async fn propagate(&self, identifier: &str) -> Result<(), ReconcileError> {
        match self.controller.signal_matching().await {
            Ok(signaled) => {
                debug!(identifier, count = signaled.len(), "Reload propagated");
                Ok(())
            }
            Err(e) => {
                warn!(identifier, error = %e, "Change stored but reload failed");
                Err(e.into())
            }
        }
    }
}
