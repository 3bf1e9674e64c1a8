//! Turns a flat list of spans into a [`SpanNode`] tree plus the id maps the
//! visibility state machine needs.
//!
//! Spans whose parent can't be found (lost root, partial data) are not an
//! error: they hang off a synthetic root, making the trace "headless".
//!
//! Nothing here recurses over the tree, a trace can be arbitrarily deep.

use crate::span::{ServiceName, Span, SpanId};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, instrument, warn};

/// A tree node. Either wraps a span or is a synthetic root holding the spans
/// whose parent is unknown.
#[derive(Default)]
pub struct SpanNode {
    span: Option<Span>,
    children: Vec<SpanNode>,
}

impl SpanNode {
    /// A synthetic node, used as the root of headless traces.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_span(span: Span) -> Self {
        Self {
            span: Some(span),
            children: vec![],
        }
    }

    pub fn span(&self) -> Option<&Span> {
        self.span.as_ref()
    }

    pub fn is_synthetic(&self) -> bool {
        self.span.is_none()
    }

    pub fn children(&self) -> &[SpanNode] {
        &self.children
    }

    pub fn add_child(&mut self, child: SpanNode) {
        self.children.push(child);
    }

    /// Depth-first, pre-order, children in their stored order.
    pub fn iter(&self) -> DepthFirst<'_> {
        DepthFirst { stack: vec![self] }
    }

    /// Every span in the tree, depth-first. Synthetic nodes are skipped.
    pub fn spans(&self) -> impl Iterator<Item = &Span> {
        self.iter().filter_map(SpanNode::span)
    }

    /// Calls `f` once per span in the tree.
    pub fn traverse<F: FnMut(&Span)>(&self, mut f: F) {
        for span in self.spans() {
            f(span);
        }
    }

    pub fn span_count(&self) -> usize {
        self.spans().count()
    }

    fn sort_children_by_timestamp(&mut self) {
        // stable, so spans without a timestamp keep their relative input order
        self.children
            .sort_by_key(|c| c.span.as_ref().and_then(|s| s.timestamp).map_or((1, 0), |t| (0, t)));
    }
}

impl std::fmt::Debug for SpanNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpanNode")
            .field("span_id", &self.span.as_ref().map(|s| s.id.as_str()))
            .field("children", &self.children.len())
            .finish()
    }
}

impl Drop for SpanNode {
    // the derived drop recurses once per level
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.children);
        }
    }
}

pub struct DepthFirst<'a> {
    stack: Vec<&'a SpanNode>,
}

impl<'a> Iterator for DepthFirst<'a> {
    type Item = &'a SpanNode;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.stack.pop()?;
        self.stack.extend(current.children.iter().rev());
        Some(current)
    }
}

/// A trace ready for display: the tree and the id maps derived from it.
/// Maps are keyed by span id, so the client and server legs of a shared span
/// are a single row.
#[derive(Debug)]
pub struct TraceTree {
    root: SpanNode,
    /// Distinct span ids, depth-first.
    row_ids: Vec<SpanId>,
    child_ids: HashMap<SpanId, Vec<SpanId>>,
    parent_ids: HashMap<SpanId, SpanId>,
    /// Number of ancestor rows, 0 for roots.
    depths: HashMap<SpanId, usize>,
    spans_by_service: BTreeMap<ServiceName, BTreeSet<SpanId>>,
}

enum Visit<'a> {
    Enter(&'a SpanNode),
    Leave,
}

impl TraceTree {
    /// Derives the id maps from an already built tree, for example one
    /// produced by clock skew correction.
    pub fn from_root(root: SpanNode) -> Self {
        let mut row_ids = vec![];
        let mut child_ids: HashMap<SpanId, Vec<SpanId>> = HashMap::new();
        let mut parent_ids: HashMap<SpanId, SpanId> = HashMap::new();
        let mut depths: HashMap<SpanId, usize> = HashMap::new();
        let mut spans_by_service: BTreeMap<ServiceName, BTreeSet<SpanId>> = BTreeMap::new();

        let mut path: Vec<&SpanId> = vec![];
        let mut stack = vec![Visit::Enter(&root)];
        while let Some(visit) = stack.pop() {
            let node = match visit {
                Visit::Enter(node) => node,
                Visit::Leave => {
                    path.pop();
                    continue;
                }
            };
            if let Some(span) = &node.span {
                let id = &span.id;
                // a shared server leg sits right under its client leg, same row
                let same_row_as_parent = path.last() == Some(&id);
                if !same_row_as_parent {
                    if let Some(parent) = path.last() {
                        let siblings = child_ids.entry((*parent).clone()).or_default();
                        if !siblings.contains(id) {
                            siblings.push(id.clone());
                        }
                    }
                    if !depths.contains_key(id) {
                        if let Some(parent) = path.last() {
                            parent_ids.insert(id.clone(), (*parent).clone());
                        }
                        depths.insert(id.clone(), path.len());
                        child_ids.entry(id.clone()).or_default();
                        row_ids.push(id.clone());
                    }
                    path.push(id);
                    stack.push(Visit::Leave);
                }
                for service_name in span.service_names() {
                    spans_by_service
                        .entry(service_name.to_string())
                        .or_default()
                        .insert(id.clone());
                }
            }
            stack.extend(node.children.iter().rev().map(Visit::Enter));
        }

        Self {
            root,
            row_ids,
            child_ids,
            parent_ids,
            depths,
            spans_by_service,
        }
    }

    pub fn root(&self) -> &SpanNode {
        &self.root
    }

    pub fn into_root(self) -> SpanNode {
        self.root
    }

    pub fn is_headless(&self) -> bool {
        self.root.is_synthetic()
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.root.spans().next().map(|s| s.trace_id.as_str())
    }

    /// Distinct span ids in display order.
    pub fn row_ids(&self) -> &[SpanId] {
        &self.row_ids
    }

    pub fn contains(&self, id: &str) -> bool {
        self.depths.contains_key(id)
    }

    /// Direct children of `id`, in display order.
    pub fn child_ids(&self, id: &str) -> &[SpanId] {
        self.child_ids.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn parent_id(&self, id: &str) -> Option<&str> {
        self.parent_ids.get(id).map(String::as_str)
    }

    /// Ancestors of `id`, parent first, up to the root.
    pub fn ancestor_ids(&self, id: &str) -> Vec<&str> {
        let mut ancestors = vec![];
        let mut current = self.parent_id(id);
        while let Some(parent) = current {
            ancestors.push(parent);
            current = self.parent_id(parent);
        }
        ancestors
    }

    /// How many ancestor rows `id` has, 0 for roots and unknown ids.
    pub fn row_depth(&self, id: &str) -> usize {
        self.depths.get(id).copied().unwrap_or(0)
    }

    pub fn spans_by_service(&self) -> &BTreeMap<ServiceName, BTreeSet<SpanId>> {
        &self.spans_by_service
    }

    pub fn spans_for_service(&self, service_name: &str) -> Option<&BTreeSet<SpanId>> {
        self.spans_by_service.get(service_name)
    }

    /// Number of row levels, counting a shared span's legs once.
    pub fn depth(&self) -> usize {
        self.depths.values().max().map_or(0, |deepest| deepest + 1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct NodeKey {
    id: SpanId,
    shared: bool,
}

/// Builds the tree from spans in any order.
#[instrument(skip_all, fields(span_count = spans.len()))]
pub fn build_tree(spans: Vec<Span>) -> TraceTree {
    TraceTree::from_root(link(spans))
}

fn link(spans: Vec<Span>) -> SpanNode {
    let mut index: HashMap<NodeKey, usize> = HashMap::new();
    let mut nodes: Vec<Option<Span>> = Vec::with_capacity(spans.len());
    for span in spans {
        let key = NodeKey {
            id: span.id.clone(),
            shared: span.shared,
        };
        if index.contains_key(&key) {
            warn!(
                span_id = %span.id,
                shared = span.shared,
                "Dropping span with duplicate id"
            );
            continue;
        }
        index.insert(key, nodes.len());
        nodes.push(Some(span));
    }

    let mut parents: Vec<Option<usize>> = nodes
        .iter()
        .flatten()
        .map(|span| resolve_parent(span, &index, &nodes))
        .collect();
    break_cycles(&mut parents, &nodes);

    let mut children: Vec<Vec<usize>> = vec![vec![]; nodes.len()];
    let mut roots = vec![];
    for (idx, parent) in parents.iter().enumerate() {
        match parent {
            Some(parent) => children[*parent].push(idx),
            None => roots.push(idx),
        }
    }

    let single_true_root = match roots.as_slice() {
        [root] => nodes[*root].as_ref().map_or(false, Span::is_root),
        _ => false,
    };
    let mut top = assemble(&roots, &mut nodes, &children);
    if single_true_root {
        if let Some(root) = top.pop() {
            return root;
        }
    }
    debug!(
        root_count = roots.len(),
        "No single root span, using a synthetic root"
    );
    let mut synthetic = SpanNode::new();
    for node in top {
        synthetic.add_child(node);
    }
    synthetic.sort_children_by_timestamp();
    synthetic
}

fn resolve_parent(
    span: &Span,
    index: &HashMap<NodeKey, usize>,
    nodes: &[Option<Span>],
) -> Option<usize> {
    if span.shared {
        let client_side = NodeKey {
            id: span.id.clone(),
            shared: false,
        };
        if let Some(client) = index.get(&client_side) {
            return Some(*client);
        }
    }
    let parent_id = span.parent_id.as_ref()?;
    let server_side = index.get(&NodeKey {
        id: parent_id.clone(),
        shared: true,
    });
    let client_side = index.get(&NodeKey {
        id: parent_id.clone(),
        shared: false,
    });
    // children of a shared span belong to the server leg running in their own service
    let same_service_server = server_side.filter(|server| {
        let server_service = nodes[**server].as_ref().and_then(Span::local_service_name);
        server_service.is_some() && server_service == span.local_service_name()
    });
    same_service_server.or(client_side).or(server_side).copied()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnPath,
    Done,
}

/// Cut parent links that loop back, the earliest span of each loop becomes a root.
/// Every span is walked once.
fn break_cycles(parents: &mut [Option<usize>], nodes: &[Option<Span>]) {
    let mut marks = vec![Mark::Unvisited; parents.len()];
    let mut path: Vec<usize> = vec![];
    for start in 0..parents.len() {
        let mut current = Some(start);
        while let Some(idx) = current {
            match marks[idx] {
                Mark::Done => break,
                Mark::OnPath => {
                    let loop_start = path.iter().position(|p| *p == idx).unwrap_or(0);
                    if let Some(&first) = path[loop_start..].iter().min() {
                        warn!(
                            span_id = ?nodes[first].as_ref().map(|s| s.id.as_str()),
                            "Span parent chain loops back to itself, treating it as a root"
                        );
                        parents[first] = None;
                    }
                    break;
                }
                Mark::Unvisited => {
                    marks[idx] = Mark::OnPath;
                    path.push(idx);
                    current = parents[idx];
                }
            }
        }
        for idx in path.drain(..) {
            marks[idx] = Mark::Done;
        }
    }
}

/// Builds the subtrees under `roots` bottom-up, children before their parent.
fn assemble(roots: &[usize], nodes: &mut [Option<Span>], children: &[Vec<usize>]) -> Vec<SpanNode> {
    let mut pre_order = Vec::with_capacity(nodes.len());
    let mut stack: Vec<usize> = roots.iter().rev().copied().collect();
    while let Some(idx) = stack.pop() {
        pre_order.push(idx);
        stack.extend(children[idx].iter().rev());
    }
    let mut built: Vec<Option<SpanNode>> = (0..nodes.len()).map(|_| None).collect();
    for &idx in pre_order.iter().rev() {
        let Some(span) = nodes[idx].take() else {
            continue;
        };
        let mut node = SpanNode::with_span(span);
        for &child in &children[idx] {
            if let Some(child) = built[child].take() {
                node.add_child(child);
            }
        }
        node.sort_children_by_timestamp();
        built[idx] = Some(node);
    }
    roots.iter().filter_map(|root| built[*root].take()).collect()
}
