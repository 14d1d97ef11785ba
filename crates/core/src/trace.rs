//! Rebuilds the parent/child structure of one trace from its flat span list.
//!
//! The store hands back spans in start order with nothing but a parent id to
//! link them, so the tree is rebuilt here on every read. Both the hierarchical
//! view and the flamegraph layout consume the result.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::debug;

use crate::model::SpanWithResource;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TraceError {
    #[error("no spans to build from")]
    Empty,

    #[error("no root span found")]
    NoRoot,

    #[error("multiple root spans found: {}", ids.join(", "))]
    MultipleRoots { ids: Vec<String> },

    #[error("span {span_id} visited twice; parent links form a cycle or span ids repeat")]
    Cycle { span_id: String },
}

/// A node with ordered children, walkable breadth first.
pub trait TreeNode: Sized {
    fn children(&self) -> &[Self];

    fn breadth_first(&self) -> BreadthFirst<'_, Self> {
        BreadthFirst {
            queue: VecDeque::from([(0, self)]),
        }
    }
}

/// Yields `(depth, node)` pairs level by level. Every call to
/// [`TreeNode::breadth_first`] starts a fresh walk.
pub struct BreadthFirst<'a, N> {
    queue: VecDeque<(usize, &'a N)>,
}

impl<'a, N: TreeNode> Iterator for BreadthFirst<'a, N> {
    type Item = (usize, &'a N);

    fn next(&mut self) -> Option<Self::Item> {
        let (depth, node) = self.queue.pop_front()?;
        self.queue
            .extend(node.children().iter().map(|child| (depth + 1, child)));
        Some((depth, node))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraceTreeNode {
    pub span: SpanWithResource,
    /// Own duration over the parent's. Not clamped: broken instrumentation
    /// can make a child outlast its parent.
    pub duration_of_parent: f64,
    pub parent_start_time: DateTime<Utc>,
    pub children: Vec<TraceTreeNode>,
}

impl TreeNode for TraceTreeNode {
    fn children(&self) -> &[Self] {
        &self.children
    }
}

impl TraceTreeNode {
    pub fn time_range(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        self.breadth_first().fold(
            (self.span.start_time, self.span.end_time()),
            |(start, end), (_, node)| {
                (
                    start.min(node.span.start_time),
                    end.max(node.span.end_time()),
                )
            },
        )
    }

    pub fn len(&self) -> usize {
        self.breadth_first().count()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

pub fn build_tree(spans: &[SpanWithResource]) -> Result<TraceTreeNode, TraceError> {
    if spans.is_empty() {
        return Err(TraceError::Empty);
    }
    let root = &spans[single_root(
        spans
            .iter()
            .map(|s| (s.id.as_str(), s.parent())),
    )?];

    let mut children: HashMap<&str, Vec<&SpanWithResource>> = HashMap::new();
    for span in spans {
        if let Some(parent) = span.parent() {
            children.entry(parent).or_default().push(span);
        }
    }
    for siblings in children.values_mut() {
        siblings.sort_by_key(|s| s.start_time);
    }

    let mut visited = HashSet::new();
    let tree = populate(root, None, &children, &mut visited)?;

    let detached = spans.len() - visited.len();
    if detached > 0 {
        debug!(
            trace_id = %root.trace_id,
            detached,
            "spans not reachable from the root were left out of the tree"
        );
    }

    Ok(tree)
}

/// Index of the only `(id, parent)` pair without a parent. Callers pass the
/// effective parent, see [`effective_parent`](crate::model::effective_parent).
pub(crate) fn single_root<'a>(
    nodes: impl Iterator<Item = (&'a str, Option<&'a str>)>,
) -> Result<usize, TraceError> {
    let roots = nodes
        .enumerate()
        .filter(|(_, (_, parent))| parent.is_none())
        .map(|(idx, (id, _))| (idx, id))
        .collect::<Vec<_>>();
    match roots.as_slice() {
        [] => Err(TraceError::NoRoot),
        [(idx, _)] => Ok(*idx),
        many => Err(TraceError::MultipleRoots {
            ids: many.iter().map(|(_, id)| id.to_string()).collect(),
        }),
    }
}

fn populate<'a>(
    span: &'a SpanWithResource,
    parent: Option<&'a SpanWithResource>,
    children: &HashMap<&str, Vec<&'a SpanWithResource>>,
    visited: &mut HashSet<&'a str>,
) -> Result<TraceTreeNode, TraceError> {
    if !visited.insert(span.id.as_str()) {
        return Err(TraceError::Cycle {
            span_id: span.id.clone(),
        });
    }

    let (duration_of_parent, parent_start_time) = match parent {
        None => (1.0, span.start_time),
        Some(parent) => (
            duration_ratio(span.duration, parent.duration),
            parent.start_time,
        ),
    };

    let mut nodes = Vec::new();
    for child in children.get(span.id.as_str()).into_iter().flatten() {
        nodes.push(populate(child, Some(span), children, visited)?);
    }

    Ok(TraceTreeNode {
        span: span.clone(),
        duration_of_parent,
        parent_start_time,
        children: nodes,
    })
}

fn duration_ratio(own: Duration, parent: Duration) -> f64 {
    let parent_ns = crate::model::nanos(parent);
    if parent_ns == 0 {
        return 1.0;
    }
    crate::model::nanos(own) as f64 / parent_ns as f64
}
