use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::model::{ScanItem, WindowItem};

/// Maps freshly scanned windows onto the stable item objects already handed
/// out to consumers. An item survives as long as its handle+title key keeps
/// appearing; a title change is absorbed by the loose same-handle fallback.
/// Anything a provider stops reporting is dropped from both indices.
#[derive(Default)]
pub struct Reconciler {
    by_handle: HashMap<i64, Vec<Arc<WindowItem>>>,
    by_provider: HashMap<String, Vec<Arc<WindowItem>>>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reconcile(&mut self, incoming: &[ScanItem], provider: &str) -> Vec<Arc<WindowItem>> {
        let mut claimed: HashSet<*const WindowItem> = HashSet::new();
        let mut resolved: Vec<Arc<WindowItem>> = Vec::with_capacity(incoming.len());

        for scan in incoming {
            if let Some(existing) = self.claim_match(scan, &mut claimed) {
                existing.apply_scan(scan, provider);
                resolved.push(existing);
            } else {
                let fresh = Arc::new(WindowItem::new(scan, provider));
                claimed.insert(Arc::as_ptr(&fresh));
                self.by_handle
                    .entry(scan.handle)
                    .or_default()
                    .push(Arc::clone(&fresh));
                self.by_provider
                    .entry(provider.to_string())
                    .or_default()
                    .push(Arc::clone(&fresh));
                resolved.push(fresh);
            }
        }

        self.evict_unclaimed(provider, &claimed);
        debug_assert!(self.indices_agree());
        resolved
    }

    /// Exact handle+title match wins; otherwise the first unclaimed item
    /// sharing the handle, in cache iteration order, absorbs the scan.
    fn claim_match(
        &self,
        scan: &ScanItem,
        claimed: &mut HashSet<*const WindowItem>,
    ) -> Option<Arc<WindowItem>> {
        let candidates = self.by_handle.get(&scan.handle)?;

        let exact = candidates.iter().find(|item| {
            !claimed.contains(&Arc::as_ptr(item)) && item.matches_key(scan.handle, &scan.title)
        });
        if let Some(item) = exact {
            claimed.insert(Arc::as_ptr(item));
            return Some(Arc::clone(item));
        }

        let loose = candidates
            .iter()
            .find(|item| !claimed.contains(&Arc::as_ptr(item)))?;
        claimed.insert(Arc::as_ptr(loose));
        Some(Arc::clone(loose))
    }

    fn evict_unclaimed(&mut self, provider: &str, claimed: &HashSet<*const WindowItem>) {
        let Some(owned) = self.by_provider.get_mut(provider) else {
            return;
        };

        let mut evicted: Vec<Arc<WindowItem>> = Vec::new();
        owned.retain(|item| {
            if claimed.contains(&Arc::as_ptr(item)) {
                true
            } else {
                evicted.push(Arc::clone(item));
                false
            }
        });
        if owned.is_empty() {
            self.by_provider.remove(provider);
        }

        for item in evicted {
            if let Some(tracked) = self.by_handle.get_mut(&item.handle) {
                tracked.retain(|candidate| !Arc::ptr_eq(candidate, &item));
                if tracked.is_empty() {
                    self.by_handle.remove(&item.handle);
                }
            }
        }
    }

    pub fn tracked_for_handle(&self, handle: i64) -> usize {
        self.by_handle.get(&handle).map_or(0, Vec::len)
    }

    pub fn tracked_for_provider(&self, provider: &str) -> usize {
        self.by_provider.get(provider).map_or(0, Vec::len)
    }

    pub fn item_count(&self) -> usize {
        self.by_handle.values().map(Vec::len).sum()
    }

    /// Both indices reach the same items: equal totals, and every item in
    /// one is present in the other.
    pub fn indices_agree(&self) -> bool {
        let by_provider_total: usize = self.by_provider.values().map(Vec::len).sum();
        if by_provider_total != self.item_count() {
            return false;
        }

        self.by_provider.values().flatten().all(|item| {
            self.by_handle
                .get(&item.handle)
                .is_some_and(|tracked| tracked.iter().any(|c| Arc::ptr_eq(c, item)))
        })
    }
}
