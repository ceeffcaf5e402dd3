use std::sync::Mutex;

/// Group key for windows whose owning process could not be determined.
pub const UNKNOWN_GROUP: u32 = 0;
/// Owner label reported when process resolution fails.
pub const UNKNOWN_OWNER: &str = "Unknown";

/// One raw scan result as a provider reports it. Plain value, copied freely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanItem {
    pub handle: i64,
    pub title: String,
    pub group_key: u32,
    pub owner_label: String,
    pub executable_path: Option<String>,
    pub is_fallback: bool,
}

impl ScanItem {
    pub fn new(handle: i64, title: &str, group_key: u32, owner_label: &str) -> Self {
        Self {
            handle,
            title: title.to_string(),
            group_key,
            owner_label: owner_label.to_string(),
            executable_path: None,
            is_fallback: false,
        }
    }

    pub fn fallback(handle: i64, title: &str, group_key: u32) -> Self {
        Self {
            handle,
            title: title.to_string(),
            group_key,
            owner_label: UNKNOWN_OWNER.to_string(),
            executable_path: None,
            is_fallback: true,
        }
    }

    pub fn with_executable_path(mut self, path: &str) -> Self {
        self.executable_path = Some(path.to_string());
        self
    }
}

/// Per-item state owned by the consumer, never touched when a scan merely
/// refreshes title or owner fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UiState {
    pub pinned: bool,
    pub marked: bool,
}

/// A merged window entry. Shared as `Arc<WindowItem>`; identity across refresh
/// cycles is the allocation itself (`Arc::ptr_eq`), while the fields inside are
/// updated in place by the reconciler.
#[derive(Debug)]
pub struct WindowItem {
    pub handle: i64,
    inner: Mutex<ItemInner>,
}

#[derive(Debug, Clone)]
struct ItemInner {
    title: String,
    group_key: u32,
    owner_label: String,
    executable_path: Option<String>,
    is_fallback: bool,
    source: Option<String>,
    ui: UiState,
}

impl WindowItem {
    pub fn new(scan: &ScanItem, source: &str) -> Self {
        Self {
            handle: scan.handle,
            inner: Mutex::new(ItemInner {
                title: scan.title.clone(),
                group_key: scan.group_key,
                owner_label: scan.owner_label.clone(),
                executable_path: scan.executable_path.clone(),
                is_fallback: scan.is_fallback,
                source: Some(source.to_string()),
                ui: UiState::default(),
            }),
        }
    }

    pub fn title(&self) -> String {
        self.locked().title.clone()
    }

    pub fn group_key(&self) -> u32 {
        self.locked().group_key
    }

    pub fn owner_label(&self) -> String {
        self.locked().owner_label.clone()
    }

    pub fn executable_path(&self) -> Option<String> {
        self.locked().executable_path.clone()
    }

    pub fn is_fallback(&self) -> bool {
        self.locked().is_fallback
    }

    pub fn source(&self) -> Option<String> {
        self.locked().source.clone()
    }

    pub fn ui_state(&self) -> UiState {
        self.locked().ui.clone()
    }

    pub fn set_pinned(&self, pinned: bool) {
        self.locked().ui.pinned = pinned;
    }

    pub fn set_marked(&self, marked: bool) {
        self.locked().ui.marked = marked;
    }

    pub fn matches_key(&self, handle: i64, title: &str) -> bool {
        self.handle == handle && self.locked().title == title
    }

    /// Refresh the identity-adjacent fields from a new scan of the same
    /// window. The source sticks to whoever claimed the item first; UI state
    /// is left alone.
    pub fn apply_scan(&self, scan: &ScanItem, source: &str) {
        let mut inner = self.locked();
        inner.title = scan.title.clone();
        inner.group_key = scan.group_key;
        inner.owner_label = scan.owner_label.clone();
        inner.executable_path = scan.executable_path.clone();
        inner.is_fallback = scan.is_fallback;
        if inner.source.is_none() {
            inner.source = Some(source.to_string());
        }
    }

    /// Deliberate source handoff, e.g. when a backend is retired and another
    /// takes over its windows.
    pub fn reassign_source(&self, source: &str) {
        self.locked().source = Some(source.to_string());
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, ItemInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

pub fn normalize_for_filter(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{normalize_for_filter, ScanItem, WindowItem};

    #[test]
    fn apply_scan_keeps_first_source() {
        let item = WindowItem::new(&ScanItem::new(7, "Inbox", 42, "mail"), "win32");
        item.apply_scan(&ScanItem::new(7, "Inbox - updated", 42, "mail"), "uia");

        assert_eq!(item.source().as_deref(), Some("win32"));
        assert_eq!(item.title(), "Inbox - updated");
    }

    #[test]
    fn apply_scan_preserves_ui_state() {
        let item = WindowItem::new(&ScanItem::new(7, "Inbox", 42, "mail"), "win32");
        item.set_pinned(true);
        item.apply_scan(&ScanItem::new(7, "Inbox (2)", 42, "mail"), "win32");

        assert!(item.ui_state().pinned);
    }

    #[test]
    fn normalize_strips_punctuation_and_case() {
        assert_eq!(normalize_for_filter("Visual Studio Code"), "visualstudiocode");
        assert_eq!(normalize_for_filter("Q4_Report.xlsx"), "q4reportxlsx");
    }
}
