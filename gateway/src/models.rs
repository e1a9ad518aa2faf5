use std::collections::BTreeMap;

use bridge_lib::callbacks::LogEvent;
use bridge_lib::logging::LogLevel;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============ Status ============

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub state: String,
    pub store_path: Option<String>,
    pub handles: BTreeMap<String, usize>,
}

// ============ Script calls ============

#[derive(Debug, Serialize, Deserialize)]
pub struct CallResponse {
    pub result: Value,
}

#[derive(Debug, Serialize)]
pub struct FunctionsResponse {
    pub functions: Vec<String>,
}

// ============ Logs ============

#[derive(Debug, Default, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub target: String,
    pub content: String,
}

impl From<LogEvent> for LogEntry {
    fn from(event: LogEvent) -> Self {
        LogEntry {
            level: event.level,
            target: event.target,
            content: event.content,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub events: Vec<LogEntry>,
}
