pub mod attrs;
pub mod log;
pub mod resource;
pub mod span;

pub use attrs::{AttrValue, Attributes};
pub use log::{Log, LogData, ResourceLogs};
pub use resource::Resource;
pub use span::{
    ResourceSpans, Span, SpanData, SpanKind, SpanWithResource, StatusCode, effective_parent,
};

/// Nanoseconds in `d`, saturating for spans longer than ~292 years.
pub fn nanos(d: chrono::Duration) -> i64 {
    d.num_nanoseconds().unwrap_or(i64::MAX)
}

pub(crate) mod duration_ns {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(super::nanos(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        i64::deserialize(deserializer).map(Duration::nanoseconds)
    }
}
