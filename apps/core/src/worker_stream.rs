use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::contract::{decode_line, WindowDto, WorkerLine, WorkerRequest, WorkerResult};
use crate::discovery::DiscoveryProvider;
use crate::logging;
use crate::model::ScanItem;

#[derive(Debug)]
pub enum TransportError {
    Spawn(std::io::Error),
    Io(std::io::Error),
    Pipe(String),
    Decode(serde_json::Error),
    WorkerMissing(PathBuf),
}

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spawn(error) => write!(f, "failed to spawn worker: {error}"),
            Self::Io(error) => write!(f, "worker io error: {error}"),
            Self::Pipe(detail) => write!(f, "worker pipe unavailable: {detail}"),
            Self::Decode(error) => write!(f, "invalid worker message: {error}"),
            Self::WorkerMissing(path) => {
                write!(f, "worker executable not found: {}", path.display())
            }
        }
    }
}

impl std::error::Error for TransportError {}

impl From<serde_json::Error> for TransportError {
    fn from(value: serde_json::Error) -> Self {
        Self::Decode(value)
    }
}

pub type WorkerStream = Box<dyn Iterator<Item = Result<WorkerLine, TransportError>> + Send>;

/// Opens one streaming scan against the worker and yields decoded lines
/// until the stream closes.
pub trait WorkerTransport: Send + Sync {
    fn open_scan(&self, request: &WorkerRequest) -> Result<WorkerStream, TransportError>;
}

/// Receives `(provider_name, items)` batches as each backend completes.
pub type StreamConsumer = dyn Fn(&str, Vec<ScanItem>) + Send + Sync;

/// Drives the out-of-process worker on its own thread. A single-slot guard
/// makes overlapping invocations a no-op rather than a queue: if a previous
/// run is still in flight, the new one is skipped entirely. This guard is
/// independent of every scan-cache lock, so a stalled worker cannot hold up
/// local scans.
pub struct WorkerStreamRunner {
    in_flight: Arc<AtomicBool>,
}

impl Default for WorkerStreamRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerStreamRunner {
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Returns false when the invocation was skipped because an earlier run
    /// still holds the slot.
    pub fn run(
        &self,
        providers: &[Arc<dyn DiscoveryProvider>],
        request: WorkerRequest,
        transport: Arc<dyn WorkerTransport>,
        consumer: Arc<StreamConsumer>,
    ) -> bool {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            logging::info("worker scan skipped: previous run still in flight");
            return false;
        }

        let by_name: HashMap<String, Arc<dyn DiscoveryProvider>> = providers
            .iter()
            .map(|p| (p.provider_name().to_ascii_lowercase(), Arc::clone(p)))
            .collect();
        let by_label: HashMap<String, Arc<dyn DiscoveryProvider>> = providers
            .iter()
            .filter_map(|p| {
                p.owner_alias()
                    .map(|alias| (alias.to_ascii_lowercase(), Arc::clone(p)))
            })
            .collect();

        let release_flag = Arc::clone(&self.in_flight);
        std::thread::spawn(move || {
            let _release = InFlightRelease { flag: release_flag };

            let stream = match transport.open_scan(&request) {
                Ok(stream) => stream,
                Err(error) => {
                    logging::error(&format!("worker stream failed to open: {error}"));
                    return;
                }
            };

            for decoded in stream {
                match decoded {
                    Ok(WorkerLine::Result(result)) => {
                        let done = result.is_final;
                        deliver_result(result, &by_name, &by_label, consumer.as_ref());
                        if done {
                            break;
                        }
                    }
                    Ok(WorkerLine::Batch(batch)) => {
                        if !batch.success {
                            logging::warn(&format!(
                                "worker refused scan: {}",
                                batch.error.unwrap_or_else(|| "unknown error".to_string())
                            ));
                            break;
                        }
                        let windows = batch.windows.unwrap_or_default();
                        deliver_windows(&windows, None, &by_name, &by_label, consumer.as_ref());
                        break;
                    }
                    Err(error) => {
                        logging::error(&format!("worker stream broke: {error}"));
                        break;
                    }
                }
            }
        });

        true
    }
}

fn deliver_result(
    result: WorkerResult,
    by_name: &HashMap<String, Arc<dyn DiscoveryProvider>>,
    by_label: &HashMap<String, Arc<dyn DiscoveryProvider>>,
    consumer: &StreamConsumer,
) {
    if let Some(error) = result.error {
        logging::warn(&format!(
            "worker backend '{}' reported: {error}",
            result.plugin_name
        ));
        return;
    }

    let windows = result.windows.unwrap_or_default();
    deliver_windows(&windows, Some(&result.plugin_name), by_name, by_label, consumer);
}

fn deliver_windows(
    windows: &[WindowDto],
    plugin_name: Option<&str>,
    by_name: &HashMap<String, Arc<dyn DiscoveryProvider>>,
    by_label: &HashMap<String, Arc<dyn DiscoveryProvider>>,
    consumer: &StreamConsumer,
) {
    let named = plugin_name.and_then(|name| by_name.get(&name.to_ascii_lowercase()));
    let provider = named.or_else(|| {
        windows
            .first()
            .and_then(|dto| by_label.get(&dto.process_name.to_ascii_lowercase()))
    });

    let Some(provider) = provider else {
        logging::warn(&format!(
            "discarding worker result for unrecognized backend '{}'",
            plugin_name.unwrap_or("<unnamed>")
        ));
        return;
    };

    let items: Vec<ScanItem> = windows.iter().map(ScanItem::from).collect();
    consumer(provider.provider_name(), items);
}

struct InFlightRelease {
    flag: Arc<AtomicBool>,
}

impl Drop for InFlightRelease {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Spawns this same executable in worker mode, hands it the request on
/// stdin, and reads result lines off its stdout. A watchdog kills the child
/// once the configured timeout passes; the reader then sees the stream
/// close and the runner treats it as a failed run.
pub struct ProcessWorkerTransport {
    worker_path: PathBuf,
    timeout: Duration,
}

impl ProcessWorkerTransport {
    pub fn new(worker_path: &Path, timeout: Duration) -> Self {
        Self {
            worker_path: worker_path.to_path_buf(),
            timeout,
        }
    }
}

impl WorkerTransport for ProcessWorkerTransport {
    fn open_scan(&self, request: &WorkerRequest) -> Result<WorkerStream, TransportError> {
        if !self.worker_path.exists() {
            return Err(TransportError::WorkerMissing(self.worker_path.clone()));
        }

        let mut child = Command::new(&self.worker_path)
            .arg("--worker")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(TransportError::Spawn)?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Pipe("stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Pipe("stdout".to_string()))?;

        let payload = serde_json::to_string(request)?;
        stdin
            .write_all(payload.as_bytes())
            .and_then(|()| stdin.write_all(b"\n"))
            .and_then(|()| stdin.flush())
            .map_err(TransportError::Io)?;
        drop(stdin);

        let timeout = self.timeout;
        std::thread::spawn(move || {
            let started = Instant::now();
            loop {
                match child.try_wait() {
                    Ok(Some(_)) => break,
                    Ok(None) => {
                        if started.elapsed() > timeout {
                            logging::warn(&format!(
                                "worker exceeded {}s timeout; killing it",
                                timeout.as_secs()
                            ));
                            let _ = child.kill();
                            let _ = child.wait();
                            break;
                        }
                        std::thread::sleep(Duration::from_millis(50));
                    }
                    Err(_) => break,
                }
            }
        });

        let lines = BufReader::new(stdout).lines().filter_map(|line| match line {
            Err(error) => Some(Err(TransportError::Io(error))),
            Ok(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(decode_line(trimmed).map_err(TransportError::Decode))
                }
            }
        });

        Ok(Box::new(lines))
    }
}
