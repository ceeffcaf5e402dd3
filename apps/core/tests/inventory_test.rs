use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use winscout_core::config::Config;
use winscout_core::contract::{WindowDto, WorkerLine, WorkerRequest, WorkerResult};
use winscout_core::discovery::{DiscoveryProvider, FixtureWindowProvider};
use winscout_core::inventory::InventoryService;
use winscout_core::model::ScanItem;
use winscout_core::worker_stream::{TransportError, WorkerStream, WorkerTransport};

struct ScriptedTransport {
    lines: Mutex<Option<Vec<Result<WorkerLine, TransportError>>>>,
    opens: AtomicUsize,
}

impl WorkerTransport for ScriptedTransport {
    fn open_scan(&self, _request: &WorkerRequest) -> Result<WorkerStream, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let lines = self.lines.lock().unwrap().take().unwrap_or_default();
        Ok(Box::new(lines.into_iter()))
    }
}

fn local_service(config: Config) -> Arc<InventoryService> {
    let providers: Vec<Arc<dyn DiscoveryProvider>> = vec![
        Arc::new(FixtureWindowProvider::deterministic_fixture()),
        Arc::new(FixtureWindowProvider::from_windows(
            "secondary",
            vec![ScanItem::new(0x7070, "Scratchpad", 7777, "notes")],
        )),
    ];
    Arc::new(InventoryService::new(config).with_local_providers(providers))
}

fn wait_for(mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn refresh_merges_every_local_provider() {
    let service = local_service(Config::default());
    let items = service.refresh();

    assert_eq!(items.len(), 4);
    let sources: Vec<Option<String>> = items.iter().map(|item| item.source()).collect();
    assert!(sources.iter().any(|s| s.as_deref() == Some("fixture")));
    assert!(sources.iter().any(|s| s.as_deref() == Some("secondary")));
}

#[test]
fn items_keep_identity_and_ui_state_across_refreshes() {
    let service = local_service(Config::default());

    let first = service.refresh();
    let pinned = first
        .iter()
        .find(|item| item.title() == "Scratchpad")
        .expect("scratchpad should be discovered");
    pinned.set_pinned(true);

    let second = service.refresh();
    let survivor = second
        .iter()
        .find(|item| item.title() == "Scratchpad")
        .expect("scratchpad should survive the refresh");

    assert!(Arc::ptr_eq(pinned, survivor));
    assert!(survivor.ui_state().pinned);
}

#[test]
fn query_narrows_the_display_list() {
    let service = local_service(Config::default());
    service.refresh();

    let narrowed = service.set_query("inbox");
    assert_eq!(narrowed.len(), 1);
    assert_eq!(narrowed[0].title(), "Inbox - Mail");

    let widened = service.set_query("");
    assert_eq!(widened.len(), 4);
}

#[test]
fn excluded_processes_never_enter_the_view() {
    let mut config = Config::default();
    config.excluded_processes = vec!["mail".to_string()];

    let service = local_service(config);
    let items = service.refresh();

    assert_eq!(items.len(), 3);
    assert!(items.iter().all(|item| item.owner_label() != "mail"));
}

#[test]
fn settled_display_needs_no_further_edits() {
    let service = local_service(Config::default());
    service.refresh();

    assert!(service.resync().is_noop());
}

#[test]
fn worker_results_merge_into_the_view() {
    let uia: Vec<Arc<dyn DiscoveryProvider>> = vec![Arc::new(
        FixtureWindowProvider::from_windows("uia", Vec::new()),
    )];
    let service = Arc::new(InventoryService::new(Config::default()).with_worker_providers(uia));

    let transport = Arc::new(ScriptedTransport {
        lines: Mutex::new(Some(vec![Ok(WorkerLine::Result(WorkerResult {
            plugin_name: "uia".to_string(),
            windows: Some(vec![WindowDto {
                hwnd: 0x9090,
                title: "Remote Pane".to_string(),
                process_name: "remote".to_string(),
                executable_path: None,
                is_fallback: false,
            }]),
            error: None,
            is_final: true,
        }))])),
        opens: AtomicUsize::new(0),
    });

    assert!(service.request_worker_scan(transport));
    assert!(wait_for(|| service.item_count() == 1));

    let items = service.items();
    assert_eq!(items[0].title(), "Remote Pane");
    assert_eq!(items[0].source().as_deref(), Some("uia"));
}

#[test]
fn worker_scan_without_delegated_providers_is_refused() {
    let service = local_service(Config::default());
    let transport = Arc::new(ScriptedTransport {
        lines: Mutex::new(None),
        opens: AtomicUsize::new(0),
    });

    assert!(!service.request_worker_scan(transport.clone()));
    assert_eq!(transport.opens.load(Ordering::SeqCst), 0);
}
