//! Time-to-geometry layouts over a trace.
//!
//! Both engines measure every span against one shared [`SpanWindow`]: the
//! earliest start to the latest end across all inputs.

pub mod flamegraph;
pub mod waterfall;

use chrono::{DateTime, Duration, Utc};

use crate::model::{SpanWithResource, nanos};

pub use flamegraph::FlamegraphNode;
pub use waterfall::WaterfallBar;

/// What a layout needs to know about one item.
#[derive(Debug, Clone, PartialEq)]
pub struct FlameInput {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub duration: Duration,
}

impl From<&SpanWithResource> for FlameInput {
    fn from(span: &SpanWithResource) -> Self {
        Self {
            id: span.id.clone(),
            name: span.name.clone(),
            parent_id: span.parent_span_id.clone(),
            start_time: span.start_time,
            duration: span.duration,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SpanWindow {
    /// `None` when `extents` is empty.
    pub fn of(extents: impl IntoIterator<Item = (DateTime<Utc>, Duration)>) -> Option<Self> {
        extents
            .into_iter()
            .map(|(start, duration)| Self {
                start,
                end: start + duration,
            })
            .reduce(|acc, w| Self {
                start: acc.start.min(w.start),
                end: acc.end.max(w.end),
            })
    }

    pub fn duration_ns(&self) -> i64 {
        nanos(self.end - self.start)
    }

    /// `(width, offset)` of an item as fractions of the window, or `None`
    /// for a zero-length window.
    pub(crate) fn fractions(&self, start: DateTime<Utc>, duration: Duration) -> Option<(f64, f64)> {
        let total = self.duration_ns();
        if total == 0 {
            return None;
        }
        let total = total as f64;
        Some((
            nanos(duration) as f64 / total,
            nanos(start - self.start) as f64 / total,
        ))
    }
}
