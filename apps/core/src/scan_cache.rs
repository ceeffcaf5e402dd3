use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::discovery::DiscoveryProvider;
use crate::group_lkg::GroupLkgStore;
use crate::logging;
use crate::model::{ScanItem, UNKNOWN_GROUP, UNKNOWN_OWNER};

/// Turns a possibly slow, possibly flaky provider scan into a cheap
/// concurrency-safe read. At most one scan runs at a time; while one is in
/// flight every caller gets the previous snapshot. A failed scan never
/// clears the snapshot, and groups that momentarily degrade are served
/// from their last good result as long as they are still alive.
pub struct ScanCache {
    provider: Arc<dyn DiscoveryProvider>,
    snapshot: RwLock<Vec<ScanItem>>,
    scanning: RwLock<bool>,
    lkg: Mutex<GroupLkgStore>,
    max_items: usize,
}

impl ScanCache {
    pub fn new(provider: Arc<dyn DiscoveryProvider>) -> Self {
        Self::with_item_limit(provider, 0)
    }

    /// `max_items` of 0 means unlimited.
    pub fn with_item_limit(provider: Arc<dyn DiscoveryProvider>, max_items: usize) -> Self {
        Self {
            provider,
            snapshot: RwLock::new(Vec::new()),
            scanning: RwLock::new(false),
            lkg: Mutex::new(GroupLkgStore::new()),
            max_items,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.provider_name()
    }

    pub fn provider(&self) -> &Arc<dyn DiscoveryProvider> {
        &self.provider
    }

    /// Current view of this provider's windows. Never blocks on a scan that
    /// another caller already owns and never surfaces a scan failure.
    pub fn get_items(&self) -> Vec<ScanItem> {
        if self.scan_in_progress() {
            return self.cached_snapshot();
        }

        {
            let mut scanning = self
                .scanning
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if *scanning {
                // Lost the race to another caller between the check and here.
                drop(scanning);
                return self.cached_snapshot();
            }
            *scanning = true;
        }

        let _ownership = ScanOwnership { flag: &self.scanning };

        match self.provider.scan() {
            Ok(raw) => {
                let mut emitted = self.commit_with_lkg(raw);
                if self.max_items != 0 && emitted.len() > self.max_items {
                    logging::warn(&format!(
                        "provider '{}' returned {} items; truncating to {}",
                        self.provider_name(),
                        emitted.len(),
                        self.max_items
                    ));
                    emitted.truncate(self.max_items);
                }
                let mut snapshot = self
                    .snapshot
                    .write()
                    .unwrap_or_else(PoisonError::into_inner);
                *snapshot = emitted.clone();
                emitted
            }
            Err(error) => {
                logging::warn(&format!(
                    "scan failed for provider '{}': {error}",
                    self.provider_name()
                ));
                self.cached_snapshot()
            }
        }
    }

    pub fn scan_in_progress(&self) -> bool {
        *self.scanning.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cached_snapshot(&self) -> Vec<ScanItem> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn lkg_group_count(&self) -> usize {
        self.lkg.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Classifies one successful scan against the last-known-good store.
    ///
    /// Groups with at least one fully resolved window are authoritative and
    /// refresh the store. Fallback-only groups are masked by their stored
    /// entry while the owning process still resolves; once it stops
    /// resolving, the entry is dropped and the degraded result shows
    /// through. Groups the scan missed entirely are kept alive as long as
    /// one of their stored handles still exists.
    fn commit_with_lkg(&self, raw: Vec<ScanItem>) -> Vec<ScanItem> {
        let mut group_order: Vec<u32> = Vec::new();
        let mut grouped: HashMap<u32, Vec<ScanItem>> = HashMap::new();
        let mut ungrouped: Vec<ScanItem> = Vec::new();

        for item in raw {
            if item.group_key == UNKNOWN_GROUP {
                ungrouped.push(item);
                continue;
            }
            let slot = grouped.entry(item.group_key).or_default();
            if slot.is_empty() {
                group_order.push(item.group_key);
            }
            slot.push(item);
        }

        let mut lkg = self.lkg.lock().unwrap_or_else(PoisonError::into_inner);
        let mut emitted: Vec<ScanItem> = Vec::new();

        for key in &group_order {
            let Some(items) = grouped.remove(key) else {
                continue;
            };

            if items.iter().any(|item| !item.is_fallback) {
                lkg.record_good(*key, items.clone());
                emitted.extend(items);
            } else if lkg.contains(*key) {
                if self.group_owner_alive(*key) {
                    if let Some(stored) = lkg.get(*key) {
                        emitted.extend(stored.to_vec());
                    }
                } else {
                    lkg.evict(*key);
                    emitted.extend(items);
                }
            } else {
                emitted.extend(items);
            }
        }

        emitted.extend(ungrouped);

        for key in lkg.keys_not_in(group_order.iter()) {
            let still_valid = lkg
                .get(key)
                .map(|stored| {
                    stored
                        .iter()
                        .any(|item| self.provider.is_resource_alive(item.handle))
                })
                .unwrap_or(false);

            if still_valid {
                if let Some(stored) = lkg.get(key) {
                    emitted.extend(stored.to_vec());
                }
            } else {
                lkg.evict(key);
            }
        }

        emitted
    }

    fn group_owner_alive(&self, group_key: u32) -> bool {
        let label = self.provider.resolve_group_owner(group_key);
        !label.is_empty() && label != UNKNOWN_OWNER
    }
}

/// Releases scan ownership on every exit path, including panics inside a
/// provider scan.
struct ScanOwnership<'a> {
    flag: &'a RwLock<bool>,
}

impl Drop for ScanOwnership<'_> {
    fn drop(&mut self) {
        let mut scanning = self.flag.write().unwrap_or_else(PoisonError::into_inner);
        *scanning = false;
    }
}
