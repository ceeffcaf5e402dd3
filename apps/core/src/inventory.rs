use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};

use crate::collection_sync::{self, SyncStats};
use crate::config::Config;
use crate::contract::{WorkerRequest, SCAN_COMMAND};
use crate::discovery::DiscoveryProvider;
use crate::model::{ScanItem, WindowItem};
use crate::reconcile::Reconciler;
use crate::scan_cache::ScanCache;
use crate::search;
use crate::worker_stream::{StreamConsumer, WorkerStreamRunner, WorkerTransport};

/// The merged live view over every registered provider. Local providers
/// are scanned in parallel through their own caches and funneled through
/// one merge lock; delegated providers arrive asynchronously over the
/// worker stream and land in the same merge path.
pub struct InventoryService {
    config: Config,
    caches: Vec<Arc<ScanCache>>,
    worker_providers: Vec<Arc<dyn DiscoveryProvider>>,
    worker_runner: WorkerStreamRunner,
    store: Mutex<InventoryStore>,
}

#[derive(Default)]
struct InventoryStore {
    reconciler: Reconciler,
    // One slot per registered provider, in registration order; the display
    // list is rebuilt from these so its ordering stays deterministic.
    resolved: Vec<(String, Vec<Arc<WindowItem>>)>,
    display: Vec<Arc<WindowItem>>,
    query: String,
}

impl InventoryService {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            caches: Vec::new(),
            worker_providers: Vec::new(),
            worker_runner: WorkerStreamRunner::new(),
            store: Mutex::new(InventoryStore::default()),
        }
    }

    pub fn with_local_providers(mut self, providers: Vec<Arc<dyn DiscoveryProvider>>) -> Self {
        for provider in providers {
            self.register_slot(provider.provider_name());
            self.caches.push(Arc::new(ScanCache::with_item_limit(
                provider,
                self.config.max_cache_items,
            )));
        }
        self
    }

    pub fn with_worker_providers(mut self, providers: Vec<Arc<dyn DiscoveryProvider>>) -> Self {
        for provider in &providers {
            self.register_slot(provider.provider_name());
        }
        self.worker_providers.extend(providers);
        self
    }

    fn register_slot(&mut self, provider_name: &str) {
        let mut store = self.locked_store();
        if !store.resolved.iter().any(|(name, _)| name == provider_name) {
            store.resolved.push((provider_name.to_string(), Vec::new()));
        }
    }

    /// Scans every local provider in parallel and merges the results one
    /// batch at a time. Returns the rebuilt display list.
    pub fn refresh(&self) -> Vec<Arc<WindowItem>> {
        let (tx, rx) = mpsc::channel::<(String, Vec<ScanItem>)>();

        std::thread::scope(|scope| {
            for cache in &self.caches {
                let tx = tx.clone();
                let cache = Arc::clone(cache);
                scope.spawn(move || {
                    let items = cache.get_items();
                    let _ = tx.send((cache.provider_name().to_string(), items));
                });
            }
            drop(tx);

            while let Ok((provider, items)) = rx.recv() {
                self.absorb_scan(&provider, items);
            }
        });

        self.rebuild_display()
    }

    /// Kicks off one streaming worker scan for the delegated providers.
    /// Returns false when skipped (none delegated, or a run is in flight).
    pub fn request_worker_scan(self: &Arc<Self>, transport: Arc<dyn WorkerTransport>) -> bool {
        if self.worker_providers.is_empty() {
            return false;
        }

        let service = Arc::clone(self);
        let consumer: Arc<StreamConsumer> = Arc::new(move |provider: &str, items: Vec<ScanItem>| {
            service.absorb_scan(provider, items);
            service.rebuild_display();
        });

        self.worker_runner
            .run(&self.worker_providers, self.worker_request(), transport, consumer)
    }

    pub fn worker_scan_running(&self) -> bool {
        self.worker_runner.is_running()
    }

    fn worker_request(&self) -> WorkerRequest {
        let plugins: Vec<String> = self
            .worker_providers
            .iter()
            .map(|p| p.provider_name().to_string())
            .collect();

        WorkerRequest {
            command: SCAN_COMMAND.to_string(),
            plugins: Some(plugins),
            excluded_processes: if self.config.excluded_processes.is_empty() {
                None
            } else {
                Some(self.config.excluded_processes.clone())
            },
            disabled_plugins: if self.config.disabled_providers.is_empty() {
                None
            } else {
                Some(self.config.disabled_providers.clone())
            },
        }
    }

    /// Single serialized merge step: reconcile one provider's batch and
    /// update its slot.
    fn absorb_scan(&self, provider: &str, items: Vec<ScanItem>) {
        let kept: Vec<ScanItem> = items
            .into_iter()
            .filter(|item| !self.is_excluded(&item.owner_label))
            .collect();

        let mut store = self.locked_store();
        let resolved = store.reconciler.reconcile(&kept, provider);
        match store.resolved.iter_mut().find(|(name, _)| name == provider) {
            Some(slot) => slot.1 = resolved,
            None => store.resolved.push((provider.to_string(), resolved)),
        }
    }

    fn is_excluded(&self, owner_label: &str) -> bool {
        self.config
            .excluded_processes
            .iter()
            .any(|excluded| excluded.eq_ignore_ascii_case(owner_label))
    }

    /// Re-filters the merged set and patches the display list in place.
    fn rebuild_display(&self) -> Vec<Arc<WindowItem>> {
        let mut store = self.locked_store();

        let merged: Vec<Arc<WindowItem>> = store
            .resolved
            .iter()
            .flat_map(|(_, items)| items.iter().cloned())
            .collect();
        let target = search::filter_items(&merged, &store.query, self.config.max_results as usize);

        collection_sync::sync(&mut store.display, &target);
        store.display.clone()
    }

    /// Changes the active query and returns the re-synced display list.
    pub fn set_query(&self, query: &str) -> Vec<Arc<WindowItem>> {
        {
            let mut store = self.locked_store();
            store.query = query.to_string();
        }
        self.rebuild_display()
    }

    pub fn items(&self) -> Vec<Arc<WindowItem>> {
        self.locked_store().display.clone()
    }

    pub fn item_count(&self) -> usize {
        self.locked_store().display.len()
    }

    /// Re-applies the current target to the display list; useful to assert
    /// the patching settled.
    pub fn resync(&self) -> SyncStats {
        let mut store = self.locked_store();

        let merged: Vec<Arc<WindowItem>> = store
            .resolved
            .iter()
            .flat_map(|(_, items)| items.iter().cloned())
            .collect();
        let target = search::filter_items(&merged, &store.query, self.config.max_results as usize);

        collection_sync::sync(&mut store.display, &target)
    }

    fn locked_store(&self) -> std::sync::MutexGuard<'_, InventoryStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
