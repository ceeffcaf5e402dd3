use std::collections::HashSet;
use std::sync::Arc;

use crate::model::WindowItem;

/// Structural edits it took to bring a display list in line with its target.
/// A second application of the same target reports all zeros.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub removed: usize,
    pub moved: usize,
    pub inserted: usize,
}

impl SyncStats {
    pub fn is_noop(&self) -> bool {
        self.removed == 0 && self.moved == 0 && self.inserted == 0
    }
}

/// Patches `display` in place until it matches `target`, reusing every item
/// present in both (no remove-then-reinsert of a surviving entry). Quadratic
/// in the worst case, which is fine for lists of tens of windows.
pub fn sync(display: &mut Vec<Arc<WindowItem>>, target: &[Arc<WindowItem>]) -> SyncStats {
    let mut stats = SyncStats::default();

    let wanted: HashSet<*const WindowItem> = target.iter().map(Arc::as_ptr).collect();
    for index in (0..display.len()).rev() {
        if !wanted.contains(&Arc::as_ptr(&display[index])) {
            display.remove(index);
            stats.removed += 1;
        }
    }

    for (position, item) in target.iter().enumerate() {
        if position < display.len() && Arc::ptr_eq(&display[position], item) {
            continue;
        }

        let found = (position + 1..display.len()).find(|&i| Arc::ptr_eq(&display[i], item));
        match found {
            Some(from) => {
                let moved = display.remove(from);
                display.insert(position, moved);
                stats.moved += 1;
            }
            None => {
                display.insert(position, Arc::clone(item));
                stats.inserted += 1;
            }
        }
    }

    debug_assert_eq!(display.len(), target.len());
    stats
}
