use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::attrs::Attributes;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogData {
    pub span_id: Option<String>,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub severity_number: i32,
    pub severity_text: String,
    pub attributes: Attributes,
}

impl LogData {
    pub fn into_log(self, resource_id: &str) -> Log {
        Log {
            span_id: self.span_id,
            body: self.body,
            timestamp: self.timestamp,
            severity_number: self.severity_number,
            severity_text: self.severity_text,
            resource_id: resource_id.to_string(),
            attributes: self.attributes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Log {
    pub span_id: Option<String>,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub severity_number: i32,
    pub severity_text: String,
    pub resource_id: String,
    pub attributes: Attributes,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ResourceLogs {
    pub resource: Attributes,
    pub logs: Vec<LogData>,
}

pub fn severity_label(level: i32) -> &'static str {
    match level {
        1..=4 => "TRACE",
        5..=8 => "DEBUG",
        9..=12 => "INFO",
        13..=16 => "WARN",
        17..=20 => "ERROR",
        21..=24 => "FATAL",
        _ => "UNSPECIFIED",
    }
}
