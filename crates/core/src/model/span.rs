use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{OtellyError, Result};
use crate::model::attrs::Attributes;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SpanKind {
    #[default]
    Unspecified,
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

impl SpanKind {
    pub fn from_otlp(kind: i32) -> Self {
        match kind {
            1 => Self::Internal,
            2 => Self::Server,
            3 => Self::Client,
            4 => Self::Producer,
            5 => Self::Consumer,
            _ => Self::Unspecified,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unspecified => "Unspecified",
            Self::Internal => "Internal",
            Self::Server => "Server",
            Self::Client => "Client",
            Self::Producer => "Producer",
            Self::Consumer => "Consumer",
        }
    }
}

impl FromStr for SpanKind {
    type Err = OtellyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Unspecified" => Ok(Self::Unspecified),
            "Internal" => Ok(Self::Internal),
            "Server" => Ok(Self::Server),
            "Client" => Ok(Self::Client),
            "Producer" => Ok(Self::Producer),
            "Consumer" => Ok(Self::Consumer),
            _ => Err(OtellyError::Parse(format!("unknown span kind: {s}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum StatusCode {
    #[default]
    Unset,
    Ok,
    Error,
}

impl StatusCode {
    pub fn from_otlp(code: i32) -> Self {
        match code {
            1 => Self::Ok,
            2 => Self::Error,
            _ => Self::Unset,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unset => "Unset",
            Self::Ok => "Ok",
            Self::Error => "Error",
        }
    }
}

impl FromStr for StatusCode {
    type Err = OtellyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Unset" => Ok(Self::Unset),
            "Ok" => Ok(Self::Ok),
            "Error" => Ok(Self::Error),
            _ => Err(OtellyError::Parse(format!("unknown status code: {s}"))),
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A span as delivered by the source, before it is bound to a stored resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpanData {
    pub id: String,
    pub trace_id: String,
    pub parent_span_id: Option<String>,
    pub name: String,
    pub kind: SpanKind,
    pub start_time: DateTime<Utc>,
    #[serde(with = "crate::model::duration_ns")]
    pub duration: Duration,
    pub status_code: StatusCode,
    pub status_message: Option<String>,
    pub attributes: Attributes,
}

impl SpanData {
    pub fn into_span(self, resource_id: &str) -> Span {
        Span {
            id: self.id,
            trace_id: self.trace_id,
            parent_span_id: self.parent_span_id,
            name: self.name,
            kind: self.kind,
            start_time: self.start_time,
            duration: self.duration,
            status_code: self.status_code,
            status_message: self.status_message,
            attributes: self.attributes,
            resource_id: resource_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Span {
    pub id: String,
    pub trace_id: String,
    pub parent_span_id: Option<String>,
    pub name: String,
    pub kind: SpanKind,
    pub start_time: DateTime<Utc>,
    #[serde(with = "crate::model::duration_ns")]
    pub duration: Duration,
    pub status_code: StatusCode,
    pub status_message: Option<String>,
    pub attributes: Attributes,
    pub resource_id: String,
}

impl Span {
    pub fn end_time(&self) -> DateTime<Utc> {
        self.start_time + self.duration
    }

    pub fn parent(&self) -> Option<&str> {
        effective_parent(self.parent_span_id.as_deref())
    }

    pub fn is_root(&self) -> bool {
        self.parent().is_none()
    }
}

/// An empty parent id counts as absent; some exporters send `""` instead of
/// omitting it.
pub fn effective_parent(parent_span_id: Option<&str>) -> Option<&str> {
    parent_span_id.filter(|p| !p.is_empty())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpanWithResource {
    #[serde(flatten)]
    pub span: Span,
    pub service_name: String,
    pub service_namespace: String,
}

impl std::ops::Deref for SpanWithResource {
    type Target = Span;

    fn deref(&self) -> &Span {
        &self.span
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ResourceSpans {
    pub resource: Attributes,
    pub spans: Vec<SpanData>,
}
