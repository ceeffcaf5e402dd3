use std::fmt::{Display, Formatter};

use crate::model::{ScanItem, UNKNOWN_OWNER};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    message: String,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Display for ProviderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ProviderError {}

/// A window discovery backend. `scan` is the only required operation; the
/// group-owner and liveness hooks back the cache's recovery decisions and
/// default to "nothing is alive" for providers that cannot answer them.
pub trait DiscoveryProvider: Send + Sync {
    fn provider_name(&self) -> &str;

    fn scan(&self) -> Result<Vec<ScanItem>, ProviderError>;

    /// Resolve a group key (owning process id) to a display label. The
    /// sentinel label means the group is gone.
    fn resolve_group_owner(&self, group_key: u32) -> String {
        let _ = group_key;
        UNKNOWN_OWNER.to_string()
    }

    /// Whether the underlying OS resource behind a handle still exists.
    fn is_resource_alive(&self, handle: i64) -> bool {
        let _ = handle;
        false
    }

    /// Secondary label under which worker results may report this provider's
    /// windows, for when the reported backend name is not recognized.
    fn owner_alias(&self) -> Option<&str> {
        None
    }
}

/// Canned provider used by tests and the fixture runtime mode.
pub struct FixtureWindowProvider {
    name: String,
    windows: Vec<ScanItem>,
}

impl FixtureWindowProvider {
    pub fn from_windows(name: &str, windows: Vec<ScanItem>) -> Self {
        Self {
            name: name.to_string(),
            windows,
        }
    }

    pub fn deterministic_fixture() -> Self {
        Self {
            windows: vec![
                ScanItem::new(0x1010, "Inbox - Mail", 4242, "mail")
                    .with_executable_path("C:\\Program Files\\Mail\\Mail.exe"),
                ScanItem::new(0x2020, "Quarterly Report - Editor", 5151, "editor")
                    .with_executable_path("C:\\Program Files\\Editor\\Editor.exe"),
                ScanItem::new(0x3030, "Build Output - Terminal", 6161, "term"),
            ],
            name: "fixture".to_string(),
        }
    }
}

impl DiscoveryProvider for FixtureWindowProvider {
    fn provider_name(&self) -> &str {
        &self.name
    }

    fn scan(&self) -> Result<Vec<ScanItem>, ProviderError> {
        Ok(self.windows.clone())
    }

    fn resolve_group_owner(&self, group_key: u32) -> String {
        self.windows
            .iter()
            .find(|w| w.group_key == group_key)
            .map(|w| w.owner_label.clone())
            .unwrap_or_else(|| UNKNOWN_OWNER.to_string())
    }

    fn is_resource_alive(&self, handle: i64) -> bool {
        self.windows.iter().any(|w| w.handle == handle)
    }
}
