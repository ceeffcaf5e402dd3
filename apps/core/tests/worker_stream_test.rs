use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use winscout_core::contract::{
    WindowDto, WorkerBatchResult, WorkerLine, WorkerRequest, WorkerResult,
};
use winscout_core::discovery::{DiscoveryProvider, FixtureWindowProvider, ProviderError};
use winscout_core::model::ScanItem;
use winscout_core::worker_stream::{
    StreamConsumer, TransportError, WorkerStream, WorkerStreamRunner, WorkerTransport,
};

/// Hands out a pre-scripted stream once.
struct ScriptedTransport {
    lines: Mutex<Option<Vec<Result<WorkerLine, TransportError>>>>,
    opens: AtomicUsize,
}

impl ScriptedTransport {
    fn new(lines: Vec<Result<WorkerLine, TransportError>>) -> Self {
        Self {
            lines: Mutex::new(Some(lines)),
            opens: AtomicUsize::new(0),
        }
    }
}

impl WorkerTransport for ScriptedTransport {
    fn open_scan(&self, _request: &WorkerRequest) -> Result<WorkerStream, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let lines = self.lines.lock().unwrap().take().unwrap_or_default();
        Ok(Box::new(lines.into_iter()))
    }
}

/// A stream that stays open until the test releases it.
struct GatedTransport {
    release: Mutex<Option<Receiver<()>>>,
    opens: AtomicUsize,
}

impl WorkerTransport for GatedTransport {
    fn open_scan(&self, _request: &WorkerRequest) -> Result<WorkerStream, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let gate = self.release.lock().unwrap().take();
        Ok(Box::new(std::iter::once_with(move || {
            if let Some(gate) = gate {
                let _ = gate.recv();
            }
            Err(TransportError::Pipe("gated stream closed".to_string()))
        })))
    }
}

struct AliasedProvider;

impl DiscoveryProvider for AliasedProvider {
    fn provider_name(&self) -> &str {
        "legacy"
    }

    fn scan(&self) -> Result<Vec<ScanItem>, ProviderError> {
        Ok(Vec::new())
    }

    fn owner_alias(&self) -> Option<&str> {
        Some("helper")
    }
}

fn providers(names: &[&str]) -> Vec<Arc<dyn DiscoveryProvider>> {
    names
        .iter()
        .map(|name| {
            Arc::new(FixtureWindowProvider::from_windows(name, Vec::new()))
                as Arc<dyn DiscoveryProvider>
        })
        .collect()
}

fn window(hwnd: i64, process_name: &str) -> WindowDto {
    WindowDto {
        hwnd,
        title: format!("Window {hwnd}"),
        process_name: process_name.to_string(),
        executable_path: None,
        is_fallback: false,
    }
}

fn result_line(plugin: &str, windows: Vec<WindowDto>, is_final: bool) -> Result<WorkerLine, TransportError> {
    Ok(WorkerLine::Result(WorkerResult {
        plugin_name: plugin.to_string(),
        windows: Some(windows),
        error: None,
        is_final,
    }))
}

fn collecting_consumer() -> (Arc<Mutex<Vec<(String, usize)>>>, Arc<StreamConsumer>) {
    let received: Arc<Mutex<Vec<(String, usize)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let consumer: Arc<StreamConsumer> = Arc::new(move |name: &str, items: Vec<ScanItem>| {
        sink.lock().unwrap().push((name.to_string(), items.len()));
    });
    (received, consumer)
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
fn results_reach_the_consumer_in_arrival_order() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        result_line("fast", vec![window(1, "proc")], false),
        result_line("slow", vec![window(2, "proc")], true),
    ]));
    let (received, consumer) = collecting_consumer();
    let runner = WorkerStreamRunner::new();

    assert!(runner.run(
        &providers(&["slow", "fast"]),
        WorkerRequest::scan_all(),
        transport,
        consumer,
    ));
    assert!(wait_for(|| received.lock().unwrap().len() == 2));

    let order: Vec<String> = received.lock().unwrap().iter().map(|(n, _)| n.clone()).collect();
    assert_eq!(order, vec!["fast", "slow"]);
}

#[test]
fn overlapping_invocation_is_skipped_entirely() {
    let (release_tx, release_rx) = std::sync::mpsc::channel();
    let transport = Arc::new(GatedTransport {
        release: Mutex::new(Some(release_rx)),
        opens: AtomicUsize::new(0),
    });
    let (_, consumer) = collecting_consumer();
    let runner = WorkerStreamRunner::new();
    let fleet = providers(&["fast"]);

    assert!(runner.run(
        &fleet,
        WorkerRequest::scan_all(),
        transport.clone(),
        consumer.clone(),
    ));
    assert!(wait_for(|| transport.opens.load(Ordering::SeqCst) == 1));

    assert!(
        !runner.run(&fleet, WorkerRequest::scan_all(), transport.clone(), consumer.clone()),
        "second call while in flight must be a no-op"
    );
    assert_eq!(transport.opens.load(Ordering::SeqCst), 1);

    release_tx.send(()).expect("gate should release");
    assert!(wait_for(|| !runner.is_running()));

    assert!(runner.run(&fleet, WorkerRequest::scan_all(), transport.clone(), consumer));
    assert_eq!(transport.opens.load(Ordering::SeqCst), 2);
}

#[test]
fn per_backend_error_does_not_stop_the_stream() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        Ok(WorkerLine::Result(WorkerResult {
            plugin_name: "fast".to_string(),
            windows: None,
            error: Some("walk failed".to_string()),
            is_final: false,
        })),
        result_line("slow", vec![window(2, "proc")], true),
    ]));
    let (received, consumer) = collecting_consumer();
    let runner = WorkerStreamRunner::new();

    runner.run(
        &providers(&["fast", "slow"]),
        WorkerRequest::scan_all(),
        transport,
        consumer,
    );
    assert!(wait_for(|| received.lock().unwrap().len() == 1));

    let received = received.lock().unwrap();
    assert_eq!(received[0], ("slow".to_string(), 1));
}

#[test]
fn unrecognized_backend_is_discarded() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        result_line("mystery", vec![window(1, "nobody")], false),
        result_line("fast", vec![window(2, "proc")], true),
    ]));
    let (received, consumer) = collecting_consumer();
    let runner = WorkerStreamRunner::new();

    runner.run(
        &providers(&["fast"]),
        WorkerRequest::scan_all(),
        transport,
        consumer,
    );
    assert!(wait_for(|| received.lock().unwrap().len() == 1));

    let received = received.lock().unwrap();
    assert_eq!(received[0].0, "fast");
}

#[test]
fn unknown_name_falls_back_to_owner_label_resolution() {
    let transport = Arc::new(ScriptedTransport::new(vec![result_line(
        "legacy-helper-v2",
        vec![window(1, "Helper")],
        true,
    )]));
    let (received, consumer) = collecting_consumer();
    let runner = WorkerStreamRunner::new();
    let fleet: Vec<Arc<dyn DiscoveryProvider>> = vec![Arc::new(AliasedProvider)];

    runner.run(&fleet, WorkerRequest::scan_all(), transport, consumer);
    assert!(wait_for(|| received.lock().unwrap().len() == 1));

    let received = received.lock().unwrap();
    assert_eq!(received[0], ("legacy".to_string(), 1));
}

#[test]
fn final_marker_ends_the_run() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        result_line("fast", vec![window(1, "proc")], true),
        result_line("slow", vec![window(2, "proc")], false),
    ]));
    let (received, consumer) = collecting_consumer();
    let runner = WorkerStreamRunner::new();

    runner.run(
        &providers(&["fast", "slow"]),
        WorkerRequest::scan_all(),
        transport,
        consumer,
    );
    assert!(wait_for(|| !runner.is_running()));

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0, "fast");
}

#[test]
fn batch_fallback_shape_is_delivered_via_label_lookup() {
    let transport = Arc::new(ScriptedTransport::new(vec![Ok(WorkerLine::Batch(
        WorkerBatchResult {
            success: true,
            error: None,
            windows: Some(vec![window(3, "helper")]),
        },
    ))]));
    let (received, consumer) = collecting_consumer();
    let runner = WorkerStreamRunner::new();
    let fleet: Vec<Arc<dyn DiscoveryProvider>> = vec![Arc::new(AliasedProvider)];

    runner.run(&fleet, WorkerRequest::scan_all(), transport, consumer);
    assert!(wait_for(|| received.lock().unwrap().len() == 1));

    let received = received.lock().unwrap();
    assert_eq!(received[0], ("legacy".to_string(), 1));
}
