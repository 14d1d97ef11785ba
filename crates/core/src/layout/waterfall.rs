use serde::Serialize;

use crate::layout::{FlameInput, SpanWindow};
use crate::model::{SpanWithResource, nanos};

/// A bar in column units of a fixed-width render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WaterfallBar {
    pub span_id: String,
    pub name: String,
    pub offset: usize,
    pub width: usize,
}

/// One bar per item, in input order, scaled to `columns`.
///
/// Every bar is at least one column wide and starts inside `0..columns`,
/// so zero-length and trailing spans stay visible.
pub fn layout<T>(
    items: &[T],
    columns: usize,
    retrieve: impl Fn(&T) -> FlameInput,
) -> Vec<WaterfallBar> {
    let inputs = items.iter().map(retrieve).collect::<Vec<_>>();
    let Some(window) = SpanWindow::of(inputs.iter().map(|i| (i.start_time, i.duration))) else {
        return Vec::new();
    };
    let total = window.duration_ns();

    inputs
        .into_iter()
        .map(|input| {
            let (offset, width) = if total == 0 {
                (0, 1)
            } else {
                let scale = columns as f64 / total as f64;
                let width = (nanos(input.duration) as f64 * scale).round() as usize;
                let offset =
                    (nanos(input.start_time - window.start) as f64 * scale).round() as usize;
                (clamp_offset(offset, columns), width.max(1))
            };
            WaterfallBar {
                span_id: input.id,
                name: input.name,
                offset,
                width,
            }
        })
        .collect()
}

pub fn layout_spans(spans: &[SpanWithResource], columns: usize) -> Vec<WaterfallBar> {
    layout(spans, columns, |span| FlameInput::from(span))
}

fn clamp_offset(offset: usize, columns: usize) -> usize {
    if columns > 0 && offset >= columns {
        columns - 1
    } else {
        offset
    }
}
