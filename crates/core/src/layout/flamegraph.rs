use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::layout::{FlameInput, SpanWindow};
use crate::model::{SpanWithResource, effective_parent};
use crate::trace::{TraceError, TraceTreeNode, TreeNode, single_root};

/// One bar of an icicle chart. Percentages are fractions in `0..=1` of the
/// whole trace window, at every depth.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlamegraphNode {
    pub id: String,
    pub name: String,
    pub start_time: DateTime<Utc>,
    #[serde(with = "crate::model::duration_ns")]
    pub duration: Duration,
    pub width_pct: f64,
    pub offset_pct: f64,
    pub children: Vec<FlamegraphNode>,
}

impl TreeNode for FlamegraphNode {
    fn children(&self) -> &[Self] {
        &self.children
    }
}

/// Lays out any item type that `retrieve` can describe.
pub fn build<T>(
    items: &[T],
    retrieve: impl Fn(&T) -> FlameInput,
) -> Result<FlamegraphNode, TraceError> {
    let mut inputs = items.iter().map(retrieve).collect::<Vec<_>>();
    inputs.sort_by_key(|input| input.start_time);

    let window = SpanWindow::of(inputs.iter().map(|i| (i.start_time, i.duration)))
        .ok_or(TraceError::Empty)?;
    let root = single_root(
        inputs
            .iter()
            .map(|i| (i.id.as_str(), effective_parent(i.parent_id.as_deref()))),
    )?;

    // inputs are already in start order, so every sibling list is too
    let mut children: HashMap<&str, Vec<&FlameInput>> = HashMap::new();
    for input in &inputs {
        if let Some(parent) = effective_parent(input.parent_id.as_deref()) {
            children.entry(parent).or_default().push(input);
        }
    }

    let mut visited = HashSet::new();
    place(&inputs[root], &window, &children, &mut visited)
}

pub fn from_spans(spans: &[SpanWithResource]) -> Result<FlamegraphNode, TraceError> {
    build(spans, |span| FlameInput::from(span))
}

pub fn from_tree(tree: &TraceTreeNode) -> Result<FlamegraphNode, TraceError> {
    let spans = tree
        .breadth_first()
        .map(|(_, node)| &node.span)
        .collect::<Vec<_>>();
    build(&spans, |span| FlameInput::from(*span))
}

fn place<'a>(
    input: &'a FlameInput,
    window: &SpanWindow,
    children: &HashMap<&str, Vec<&'a FlameInput>>,
    visited: &mut HashSet<&'a str>,
) -> Result<FlamegraphNode, TraceError> {
    if !visited.insert(input.id.as_str()) {
        return Err(TraceError::Cycle {
            span_id: input.id.clone(),
        });
    }

    let (width_pct, offset_pct) = window
        .fractions(input.start_time, input.duration)
        .unwrap_or((1.0, 0.0));

    let mut nodes = Vec::new();
    for child in children.get(input.id.as_str()).into_iter().flatten() {
        nodes.push(place(child, window, children, visited)?);
    }

    Ok(FlamegraphNode {
        id: input.id.clone(),
        name: input.name.clone(),
        start_time: input.start_time,
        duration: input.duration,
        width_pct,
        offset_pct,
        children: nodes,
    })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::trace::build_tree;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()
    }

    fn input(id: &str, parent: Option<&str>, start_ms: i64, dur_ms: i64) -> FlameInput {
        FlameInput {
            id: id.into(),
            name: id.to_uppercase(),
            parent_id: parent.map(str::to_string),
            start_time: t0() + Duration::milliseconds(start_ms),
            duration: Duration::milliseconds(dur_ms),
        }
    }

    fn chain() -> Vec<FlameInput> {
        vec![
            input("c", Some("b"), 500, 250),
            input("a", None, 0, 1000),
            input("b", Some("a"), 250, 500),
        ]
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn chain_scales_against_the_whole_window() {
        let root = build(&chain(), Clone::clone).unwrap();
        let b = &root.children[0];
        let c = &b.children[0];

        assert_eq!(root.name, "A");
        assert!(close(root.width_pct, 1.0));
        assert!(close(b.width_pct, 0.5));
        assert!(close(c.width_pct, 0.25));

        assert!(close(root.offset_pct, 0.0));
        assert!(close(b.offset_pct, 0.25));
        assert!(close(c.offset_pct, 0.5));
    }

    #[test]
    fn retriever_accepts_foreign_item_types() {
        let rows = [("root", "", 0_i64, 100_i64), ("leaf", "root", 50, 50)];
        let root = build(&rows, |(id, parent, start, dur)| FlameInput {
            id: id.to_string(),
            name: id.to_string(),
            parent_id: Some(parent.to_string()),
            start_time: t0() + Duration::milliseconds(*start),
            duration: Duration::milliseconds(*dur),
        })
        .unwrap();
        assert_eq!(root.id, "root");
        assert!(close(root.children[0].offset_pct, 0.5));
    }

    #[test]
    fn child_starting_before_root_widens_the_window() {
        let items = vec![
            input("root", None, 100, 100),
            input("early", Some("root"), 0, 50),
        ];
        let root = build(&items, Clone::clone).unwrap();
        assert!(close(root.width_pct, 0.5));
        assert!(close(root.offset_pct, 0.5));
        assert!(close(root.children[0].offset_pct, 0.0));
    }

    #[test]
    fn zero_window_gives_full_width() {
        let items = vec![input("a", None, 0, 0), input("b", Some("a"), 0, 0)];
        let root = build(&items, Clone::clone).unwrap();
        for (_, node) in root.breadth_first() {
            assert_eq!(node.width_pct, 1.0);
            assert_eq!(node.offset_pct, 0.0);
        }
    }

    #[test]
    fn structural_errors() {
        assert_eq!(
            build(&Vec::<FlameInput>::new(), Clone::clone),
            Err(TraceError::Empty)
        );
        assert_eq!(
            build(&[input("b", Some("a"), 0, 1)], Clone::clone),
            Err(TraceError::NoRoot)
        );
        assert!(matches!(
            build(&[input("a", None, 0, 1), input("b", None, 0, 1)], Clone::clone),
            Err(TraceError::MultipleRoots { .. })
        ));
        assert_eq!(
            build(
                &[
                    input("a", None, 0, 4),
                    input("b", Some("a"), 1, 1),
                    input("b", Some("a"), 2, 1),
                ],
                Clone::clone
            ),
            Err(TraceError::Cycle {
                span_id: "b".into()
            })
        );
    }

    #[test]
    fn from_tree_matches_from_spans() {
        let spans = chain()
            .into_iter()
            .map(|i| SpanWithResource {
                span: crate::model::SpanData {
                    id: i.id,
                    trace_id: "t".into(),
                    parent_span_id: i.parent_id,
                    name: i.name,
                    kind: Default::default(),
                    start_time: i.start_time,
                    duration: i.duration,
                    status_code: Default::default(),
                    status_message: None,
                    attributes: Default::default(),
                }
                .into_span("api:shop"),
                service_name: "api".into(),
                service_namespace: "shop".into(),
            })
            .collect::<Vec<_>>();

        let tree = build_tree(&spans).unwrap();
        assert_eq!(from_tree(&tree).unwrap(), from_spans(&spans).unwrap());
        assert_eq!(from_spans(&spans).unwrap().breadth_first().count(), 3);
    }
}
