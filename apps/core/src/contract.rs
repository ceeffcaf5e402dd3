use serde::{Deserialize, Serialize};

use crate::model::{ScanItem, UNKNOWN_GROUP};

pub const SCAN_COMMAND: &str = "scan";

/// Request sent to the worker, one JSON object on one line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRequest {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugins: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excluded_processes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_plugins: Option<Vec<String>>,
}

impl WorkerRequest {
    pub fn scan_all() -> Self {
        Self {
            command: SCAN_COMMAND.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WindowDto {
    pub hwnd: i64,
    pub title: String,
    pub process_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable_path: Option<String>,
    #[serde(default)]
    pub is_fallback: bool,
}

/// One backend's outcome within a streaming scan, one JSON object per line.
/// `error` is per-backend and does not abort the stream; the last line the
/// worker writes carries `is_final`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkerResult {
    pub plugin_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub windows: Option<Vec<WindowDto>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub is_final: bool,
}

/// Single-object answer used when the worker cannot stream, e.g. a request
/// it could not parse.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkerBatchResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub windows: Option<Vec<WindowDto>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerLine {
    Result(WorkerResult),
    Batch(WorkerBatchResult),
}

/// Decodes one wire line. The streaming shape is tried first; it requires
/// `pluginName`, so a batch object falls through to the fallback shape.
pub fn decode_line(line: &str) -> Result<WorkerLine, serde_json::Error> {
    serde_json::from_str::<WorkerResult>(line)
        .map(WorkerLine::Result)
        .or_else(|_| serde_json::from_str::<WorkerBatchResult>(line).map(WorkerLine::Batch))
}

impl From<&WindowDto> for ScanItem {
    fn from(value: &WindowDto) -> Self {
        Self {
            handle: value.hwnd,
            title: value.title.clone(),
            group_key: UNKNOWN_GROUP,
            owner_label: value.process_name.clone(),
            executable_path: value.executable_path.clone(),
            is_fallback: value.is_fallback,
        }
    }
}

impl From<&ScanItem> for WindowDto {
    fn from(value: &ScanItem) -> Self {
        Self {
            hwnd: value.handle,
            title: value.title.clone(),
            process_name: value.owner_label.clone(),
            executable_path: value.executable_path.clone(),
            is_fallback: value.is_fallback,
        }
    }
}
