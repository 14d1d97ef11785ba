use std::io::{self, Write};

use chrono::{DateTime, SecondsFormat, Utc};
use otelly_core::layout::flamegraph::FlamegraphNode;
use otelly_core::layout::waterfall::{self, WaterfallBar};
use otelly_core::model::attrs::attrs_text;
use otelly_core::model::{Log, Resource, SpanWithResource, StatusCode};
use otelly_core::trace::{TraceTreeNode, TreeNode};
use otelly_store::{MinuteBucket, StoreStatus};
use owo_colors::OwoColorize;

const LABEL_WIDTH: usize = 32;
const HISTOGRAM_WIDTH: usize = 40;

/// Text renderer for the offline commands.
pub struct Printer<W> {
    out: W,
    color: bool,
    width: usize,
}

impl<W: Write> Printer<W> {
    pub fn new(out: W, color: bool, width: usize) -> Self {
        Self {
            out,
            color,
            width: width.max(1),
        }
    }

    pub fn set_width(&mut self, width: usize) {
        self.width = width.max(1);
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn traces(&mut self, roots: &[SpanWithResource]) -> io::Result<()> {
        for root in roots {
            let status = self.status(root.status_code);
            let service = self.service(&root.service_name, &root.service_namespace);
            writeln!(
                self.out,
                "{} trace={} {} \"{}\" {} {}",
                ts(root.start_time),
                root.trace_id,
                service,
                root.name,
                ms(root.duration),
                status
            )?;
        }
        writeln!(self.out, "-- {} traces --", roots.len())
    }

    /// Span tree in depth-first order with a waterfall bar per row.
    pub fn trace(&mut self, tree: &TraceTreeNode) -> io::Result<()> {
        let rows = preorder(tree);
        let spans = rows.iter().map(|(_, node)| node.span.clone()).collect::<Vec<_>>();
        let bars = waterfall::layout_spans(&spans, self.width);
        let (start, end) = tree.time_range();
        let errors = spans
            .iter()
            .filter(|s| s.status_code == StatusCode::Error)
            .count();

        writeln!(
            self.out,
            "TRACE {} duration={} spans={} errors={}",
            tree.span.trace_id,
            ms(end - start),
            spans.len(),
            errors
        )?;
        for ((depth, node), bar) in rows.iter().zip(&bars) {
            let label = truncate(
                &format!("{}{}", "  ".repeat(*depth), node.span.name),
                LABEL_WIDTH,
            );
            let bar_text = self.bar(bar, node.span.status_code);
            writeln!(
                self.out,
                "{label:<LABEL_WIDTH$} |{bar_text}| {} {:.0}%",
                ms(node.span.duration),
                node.duration_of_parent * 100.0
            )?;
        }
        Ok(())
    }

    /// Icicle chart: one row per depth, every row on the whole-trace scale.
    pub fn flamegraph(&mut self, root: &FlamegraphNode) -> io::Result<()> {
        let mut rows: Vec<Vec<char>> = Vec::new();
        for (depth, node) in root.breadth_first() {
            if rows.len() <= depth {
                rows.push(vec![' '; self.width]);
            }
            let row = &mut rows[depth];
            let offset = ((node.offset_pct * self.width as f64).round() as usize)
                .min(self.width - 1);
            let width = ((node.width_pct * self.width as f64).round() as usize)
                .max(1)
                .min(self.width - offset);
            paint_cell(&mut row[offset..offset + width], &node.name);
        }

        writeln!(self.out, "FLAMEGRAPH {} {}", root.name, ms(root.duration))?;
        for row in rows {
            writeln!(self.out, "{}", row.into_iter().collect::<String>().trim_end())?;
        }
        Ok(())
    }

    pub fn span(&mut self, span: &SpanWithResource) -> io::Result<()> {
        let status = self.status(span.status_code);
        writeln!(
            self.out,
            "SPAN {} name=\"{}\" kind={} status={}",
            span.id,
            span.name,
            span.kind.as_str(),
            status
        )?;
        writeln!(self.out, "trace={}", span.trace_id)?;
        writeln!(
            self.out,
            "parent={}",
            span.parent_span_id.as_deref().unwrap_or("-")
        )?;
        writeln!(
            self.out,
            "resource={} service={} namespace={}",
            span.resource_id, span.service_name, span.service_namespace
        )?;
        writeln!(
            self.out,
            "start={} duration={}",
            ts(span.start_time),
            ms(span.duration)
        )?;
        if let Some(message) = &span.status_message {
            writeln!(self.out, "status_message={message}")?;
        }
        writeln!(self.out, "attrs={}", attrs_text(&span.attributes))
    }

    pub fn resources(&mut self, resources: &[Resource]) -> io::Result<()> {
        for resource in resources {
            let service = self.service(&resource.service_name, &resource.service_namespace);
            writeln!(self.out, "{} {}", resource.id, service)?;
        }
        writeln!(self.out, "-- {} resources --", resources.len())
    }

    /// Spans per minute, newest first, as horizontal bars.
    pub fn history(&mut self, resource: &Resource, buckets: &[MinuteBucket]) -> io::Result<()> {
        writeln!(self.out, "HISTORY {}", resource.id)?;
        let peak = buckets.iter().map(|b| b.count).max().unwrap_or(0);
        for bucket in buckets {
            let len = if peak == 0 {
                0
            } else {
                ((bucket.count as f64 / peak as f64) * HISTOGRAM_WIDTH as f64).round() as usize
            };
            writeln!(
                self.out,
                "{} {:>6} {}",
                bucket.bucket_start.format("%Y-%m-%dT%H:%MZ"),
                bucket.count,
                "#".repeat(len.max(1))
            )?;
        }
        writeln!(self.out, "-- {} minutes --", buckets.len())
    }

    pub fn logs(&mut self, logs: &[Log]) -> io::Result<()> {
        for log in logs {
            let severity = self.severity(log.severity_number, &log.severity_text);
            let resource = if self.color {
                log.resource_id.cyan().to_string()
            } else {
                log.resource_id.clone()
            };
            let text = attrs_text(&log.attributes);
            writeln!(
                self.out,
                "{} {} {} span={} | {}{}{}",
                ts(log.timestamp),
                resource,
                severity,
                log.span_id.as_deref().unwrap_or("-"),
                log.body,
                if text.is_empty() { "" } else { " " },
                text
            )?;
        }
        writeln!(self.out, "-- {} logs --", logs.len())
    }

    pub fn status_report(&mut self, status: &StoreStatus) -> io::Result<()> {
        writeln!(self.out, "db_path={}", status.db_path)?;
        writeln!(self.out, "db_size_bytes={}", status.db_size_bytes)?;
        writeln!(
            self.out,
            "resources={} spans={} logs={}",
            status.resources_count, status.spans_count, status.logs_count
        )?;
        if let Some(oldest) = status.oldest_span {
            writeln!(self.out, "oldest_span={}", ts(oldest))?;
        }
        if let Some(newest) = status.newest_span {
            writeln!(self.out, "newest_span={}", ts(newest))?;
        }
        Ok(())
    }

    fn bar(&self, bar: &WaterfallBar, status: StatusCode) -> String {
        let offset = bar.offset.min(self.width);
        let width = bar.width.min(self.width.saturating_sub(offset)).max(1);
        let filled = "█".repeat(width);
        let filled = match (self.color, status) {
            (false, _) => filled,
            (true, StatusCode::Error) => filled.red().to_string(),
            (true, _) => filled.green().to_string(),
        };
        let tail = self.width.saturating_sub(offset + width);
        format!("{}{}{}", " ".repeat(offset), filled, " ".repeat(tail))
    }

    fn status(&self, code: StatusCode) -> String {
        match (self.color, code) {
            (false, code) => code.as_str().to_string(),
            (true, StatusCode::Error) => code.as_str().red().to_string(),
            (true, StatusCode::Ok) => code.as_str().green().to_string(),
            (true, StatusCode::Unset) => code.as_str().bright_black().to_string(),
        }
    }

    fn service(&self, name: &str, namespace: &str) -> String {
        let label = format!("{name}/{namespace}");
        if self.color {
            label.cyan().to_string()
        } else {
            label
        }
    }

    fn severity(&self, number: i32, text: &str) -> String {
        severity_colored(number, text, self.color)
    }
}

pub fn severity_colored(number: i32, text: &str, color: bool) -> String {
    if !color {
        return text.to_string();
    }
    match number {
        1..=4 => text.blue().to_string(),
        5..=8 => text.bright_black().to_string(),
        9..=12 => text.green().to_string(),
        13..=16 => text.yellow().to_string(),
        17..=20 => text.red().to_string(),
        _ => text.magenta().to_string(),
    }
}

fn preorder(tree: &TraceTreeNode) -> Vec<(usize, &TraceTreeNode)> {
    let mut rows = Vec::with_capacity(tree.len());
    let mut stack = vec![(0, tree)];
    while let Some((depth, node)) = stack.pop() {
        rows.push((depth, node));
        stack.extend(node.children.iter().rev().map(|child| (depth + 1, child)));
    }
    rows
}

/// Writes `[name]` into the cells, cut to fit.
fn paint_cell(cells: &mut [char], name: &str) {
    let label = format!("[{name}");
    for (i, cell) in cells.iter_mut().enumerate() {
        *cell = label.chars().nth(i).unwrap_or('-');
    }
    if let Some(last) = cells.last_mut() {
        *last = ']';
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out = text.chars().take(max.saturating_sub(1)).collect::<String>();
    out.push('…');
    out
}

pub fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn ms(d: chrono::Duration) -> String {
    let micros = d.num_microseconds().unwrap_or(i64::MAX);
    if micros % 1000 == 0 {
        format!("{}ms", micros / 1000)
    } else {
        format!("{:.3}ms", micros as f64 / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use otelly_core::layout::flamegraph;
    use otelly_core::trace::build_tree;
    use testkit::{base_time, checkout_spans};

    use super::*;

    fn rendered(f: impl FnOnce(&mut Printer<Vec<u8>>) -> io::Result<()>) -> String {
        let mut printer = Printer::new(Vec::new(), false, 40);
        f(&mut printer).unwrap();
        String::from_utf8(printer.into_inner()).unwrap()
    }

    fn checkout() -> Vec<SpanWithResource> {
        checkout_spans("t1")
            .spans
            .into_iter()
            .map(|data| SpanWithResource {
                span: data.into_span("api:shop"),
                service_name: "api".into(),
                service_namespace: "shop".into(),
            })
            .collect()
    }

    #[test]
    fn trace_rows_follow_tree_with_bars() {
        let tree = build_tree(&checkout()).unwrap();
        let text = rendered(|p| p.trace(&tree));
        let lines = text.lines().collect::<Vec<_>>();

        assert_eq!(lines[0], "TRACE t1 duration=1000ms spans=3 errors=0");
        assert!(lines[1].starts_with("checkout "));
        assert!(lines[2].starts_with("  payment "));
        assert!(lines[3].starts_with("    charge "));
        assert!(lines[1].contains(&format!("|{}|", "█".repeat(40))));
        let charge_bar = format!("|{}{}{}|", " ".repeat(20), "█".repeat(10), " ".repeat(10));
        assert!(lines[3].contains(&charge_bar));
        assert!(lines[2].ends_with("500ms 50%"));
    }

    #[test]
    fn flamegraph_rows_are_scaled_to_the_root() {
        let flame = flamegraph::from_spans(&checkout()).unwrap();
        let text = rendered(|p| p.flamegraph(&flame));
        let lines = text.lines().collect::<Vec<_>>();

        assert_eq!(lines[0], "FLAMEGRAPH checkout 1000ms");
        assert_eq!(lines[1].chars().count(), 40);
        assert!(lines[1].starts_with("[checkout"));
        assert!(lines[2].starts_with(&format!("{}[payment", " ".repeat(10))));
        assert_eq!(lines[2].chars().count(), 30);
        assert_eq!(lines[3].chars().count(), 30);
    }

    #[test]
    fn history_scales_to_busiest_minute() {
        let buckets = vec![
            MinuteBucket {
                bucket_start: base_time(),
                count: 4,
            },
            MinuteBucket {
                bucket_start: base_time() - chrono::Duration::minutes(1),
                count: 1,
            },
        ];
        let text = rendered(|p| p.history(&Resource::new("api", "shop"), &buckets));

        assert!(text.contains(&format!("2026-02-01T00:00Z      4 {}\n", "#".repeat(40))));
        assert!(text.contains(&format!("2026-01-31T23:59Z      1 {}\n", "#".repeat(10))));
        assert!(text.ends_with("-- 2 minutes --\n"));
    }

    #[test]
    fn formats_durations() {
        assert_eq!(ms(chrono::Duration::milliseconds(250)), "250ms");
        assert_eq!(ms(chrono::Duration::microseconds(1500)), "1.500ms");
    }

    #[test]
    fn truncates_long_labels() {
        assert_eq!(truncate("abcdef", 4), "abc…");
        assert_eq!(truncate("abc", 4), "abc");
    }
}
