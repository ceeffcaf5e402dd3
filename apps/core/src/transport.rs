use std::fmt::{Display, Formatter};
use std::io::{BufRead, Write};
use std::sync::mpsc;
use std::sync::Arc;

use crate::contract::{WindowDto, WorkerBatchResult, WorkerRequest, WorkerResult, SCAN_COMMAND};
use crate::discovery::DiscoveryProvider;

#[derive(Debug)]
pub enum ServeError {
    Io(std::io::Error),
    Encode(serde_json::Error),
    MissingRequest,
}

impl Display for ServeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(error) => write!(f, "io error: {error}"),
            Self::Encode(error) => write!(f, "encode error: {error}"),
            Self::MissingRequest => write!(f, "no request line received"),
        }
    }
}

impl std::error::Error for ServeError {}

impl From<std::io::Error> for ServeError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for ServeError {
    fn from(value: serde_json::Error) -> Self {
        Self::Encode(value)
    }
}

/// Worker-mode entry: one scan request on stdin, streamed results on stdout.
pub fn run_worker(providers: &[Arc<dyn DiscoveryProvider>]) -> Result<(), ServeError> {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    serve_scan(providers, &mut stdin.lock(), &mut stdout.lock())
}

/// Reads one request line, scans each selected provider on its own thread,
/// and writes one result line per provider in completion order. The last
/// line written carries the final marker. A request that cannot be parsed
/// is answered with the single-object fallback shape instead of a stream.
pub fn serve_scan<R: BufRead, W: Write>(
    providers: &[Arc<dyn DiscoveryProvider>],
    reader: &mut R,
    writer: &mut W,
) -> Result<(), ServeError> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err(ServeError::MissingRequest);
    }

    let request: WorkerRequest = match serde_json::from_str(line.trim()) {
        Ok(request) => request,
        Err(error) => {
            return write_refusal(writer, &format!("invalid request: {error}"));
        }
    };
    if request.command != SCAN_COMMAND {
        return write_refusal(writer, &format!("unsupported command '{}'", request.command));
    }

    let selected = select_providers(providers, &request);
    if selected.is_empty() {
        let empty = WorkerBatchResult {
            success: true,
            error: None,
            windows: Some(Vec::new()),
        };
        writeln!(writer, "{}", serde_json::to_string(&empty)?)?;
        writer.flush()?;
        return Ok(());
    }

    let excluded: Vec<String> = request
        .excluded_processes
        .unwrap_or_default()
        .iter()
        .map(|p| p.to_ascii_lowercase())
        .collect();

    let (tx, rx) = mpsc::channel::<WorkerResult>();
    std::thread::scope(|scope| -> Result<(), ServeError> {
        for provider in &selected {
            let tx = tx.clone();
            let provider = Arc::clone(provider);
            let excluded = &excluded;
            scope.spawn(move || {
                let result = scan_one(provider.as_ref(), excluded);
                let _ = tx.send(result);
            });
        }
        drop(tx);

        let total = selected.len();
        let mut written = 0;
        while let Ok(mut result) = rx.recv() {
            written += 1;
            result.is_final = written == total;
            writeln!(writer, "{}", serde_json::to_string(&result)?)?;
            writer.flush()?;
        }
        Ok(())
    })
}

fn scan_one(provider: &dyn DiscoveryProvider, excluded: &[String]) -> WorkerResult {
    let name = provider.provider_name().to_string();
    match provider.scan() {
        Ok(items) => {
            let windows: Vec<WindowDto> = items
                .iter()
                .filter(|item| !excluded.contains(&item.owner_label.to_ascii_lowercase()))
                .map(WindowDto::from)
                .collect();
            WorkerResult {
                plugin_name: name,
                windows: Some(windows),
                error: None,
                is_final: false,
            }
        }
        Err(error) => WorkerResult {
            plugin_name: name,
            windows: None,
            error: Some(error.to_string()),
            is_final: false,
        },
    }
}

fn select_providers(
    providers: &[Arc<dyn DiscoveryProvider>],
    request: &WorkerRequest,
) -> Vec<Arc<dyn DiscoveryProvider>> {
    let disabled: Vec<String> = request
        .disabled_plugins
        .clone()
        .unwrap_or_default()
        .iter()
        .map(|name| name.to_ascii_lowercase())
        .collect();

    providers
        .iter()
        .filter(|provider| {
            let name = provider.provider_name().to_ascii_lowercase();
            if disabled.contains(&name) {
                return false;
            }
            match &request.plugins {
                Some(requested) => requested
                    .iter()
                    .any(|wanted| wanted.eq_ignore_ascii_case(&name)),
                None => true,
            }
        })
        .map(Arc::clone)
        .collect()
}

fn write_refusal<W: Write>(writer: &mut W, message: &str) -> Result<(), ServeError> {
    let refusal = WorkerBatchResult {
        success: false,
        error: Some(message.to_string()),
        windows: None,
    };
    writeln!(writer, "{}", serde_json::to_string(&refusal)?)?;
    writer.flush()?;
    Ok(())
}
