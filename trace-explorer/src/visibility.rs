//! Show/hide state for the rows of a trace view.
//!
//! Expanding a row makes its children visible by bumping their `open_parents`
//! count, and bumps `open_children` on every ancestor. Collapsing undoes that,
//! and a child left with no open parent is hidden along with everything its
//! own expansion had opened.

use crate::span::{ServiceName, SpanId};
use crate::tree::TraceTree;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, instrument};

/// Non-negative reference count. Only the state machine changes it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct OpenCount(u32);

impl OpenCount {
    pub fn get(&self) -> u32 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    fn increment(&mut self) {
        self.0 = self.0.saturating_add(1);
    }

    /// Returns false, leaving the count at zero, when it was already zero.
    fn decrement(&mut self) -> bool {
        match self.0.checked_sub(1) {
            Some(decremented) => {
                self.0 = decremented;
                true
            }
            None => false,
        }
    }

    fn reset(&mut self) {
        self.0 = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowState {
    Hidden,
    VisibleCollapsed,
    VisibleExpanded,
}

#[derive(Debug, Clone)]
pub struct VisibilityRecord {
    id: SpanId,
    is_root: bool,
    expanded: bool,
    visible: bool,
    open_parents: OpenCount,
    open_children: OpenCount,
    // arena indices
    child_ids: Vec<usize>,
    parent: Option<usize>,
}

impl VisibilityRecord {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_root(&self) -> bool {
        self.is_root
    }

    pub fn expanded(&self) -> bool {
        self.expanded
    }

    pub fn visible(&self) -> bool {
        self.visible
    }

    pub fn open_parents(&self) -> OpenCount {
        self.open_parents
    }

    pub fn open_children(&self) -> OpenCount {
        self.open_children
    }

    pub fn state(&self) -> RowState {
        match (self.visible, self.expanded) {
            (false, _) => RowState::Hidden,
            (true, false) => RowState::VisibleCollapsed,
            (true, true) => RowState::VisibleExpanded,
        }
    }
}

/// First seen visibility of every row touched by one operation.
#[derive(Debug, Default)]
struct Touched(BTreeMap<usize, bool>);

/// View state of one trace. Not meant to be shared, every change goes
/// through `&mut self`.
#[derive(Debug, Clone)]
pub struct TraceVisibility {
    records: Vec<VisibilityRecord>,
    index: HashMap<SpanId, usize>,
    spans_by_service: BTreeMap<ServiceName, Vec<usize>>,
}

impl TraceVisibility {
    /// Roots start visible, every other row hidden and collapsed.
    pub fn new(tree: &TraceTree) -> Self {
        let index: HashMap<SpanId, usize> = tree
            .row_ids()
            .iter()
            .enumerate()
            .map(|(idx, id)| (id.clone(), idx))
            .collect();
        let to_indices = |ids: &[SpanId]| -> Vec<usize> {
            // ids that aren't rows (a lost parent for example) are skipped
            ids.iter().filter_map(|id| index.get(id).copied()).collect()
        };
        let records = tree
            .row_ids()
            .iter()
            .map(|id| {
                let parent = tree.parent_id(id).and_then(|p| index.get(p).copied());
                let is_root = parent.is_none();
                VisibilityRecord {
                    id: id.clone(),
                    is_root,
                    expanded: false,
                    visible: is_root,
                    open_parents: OpenCount::default(),
                    open_children: OpenCount::default(),
                    child_ids: to_indices(tree.child_ids(id)),
                    parent,
                }
            })
            .collect();
        let spans_by_service = tree
            .spans_by_service()
            .iter()
            .map(|(service, ids)| {
                let ids: Vec<SpanId> = ids.iter().cloned().collect();
                (service.clone(), to_indices(&ids))
            })
            .collect();
        Self {
            records,
            index,
            spans_by_service,
        }
    }

    pub fn record(&self, id: &str) -> Option<&VisibilityRecord> {
        self.index.get(id).map(|idx| &self.records[*idx])
    }

    pub fn records(&self) -> &[VisibilityRecord] {
        &self.records
    }

    pub fn state(&self, id: &str) -> Option<RowState> {
        self.record(id).map(VisibilityRecord::state)
    }

    pub fn is_visible(&self, id: &str) -> bool {
        self.record(id).map_or(false, VisibilityRecord::visible)
    }

    pub fn visible_ids(&self) -> Vec<&str> {
        self.records
            .iter()
            .filter(|r| r.visible)
            .map(VisibilityRecord::id)
            .collect()
    }

    /// Expands every given row. Counts from all rows are applied before any
    /// row is made visible. Returns the ids whose visibility changed.
    pub fn show<I, S>(&mut self, ids: I) -> Vec<SpanId>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let selected = self.resolve(ids);
        let mut touched = Touched::default();
        self.show_rows(&selected, &mut touched);
        self.changed_ids(touched)
    }

    /// Collapses every given row, hiding it too unless `children_only`.
    /// Children left without an open parent are hidden, cascading down.
    pub fn hide<I, S>(&mut self, ids: I, children_only: bool) -> Vec<SpanId>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let selected = self.resolve(ids);
        let mut touched = Touched::default();
        self.hide_rows(&selected, children_only, &mut touched);
        self.changed_ids(touched)
    }

    pub fn toggle(&mut self, id: &str) -> Vec<SpanId> {
        let expanded = match self.record(id) {
            None => {
                debug!(span_id = id, "Toggle on unknown span ignored");
                return vec![];
            }
            Some(record) => record.expanded,
        };
        if expanded {
            self.hide([id], true)
        } else {
            self.show([id])
        }
    }

    #[instrument(skip_all)]
    pub fn expand_all(&mut self) -> Vec<SpanId> {
        let all: Vec<usize> = (0..self.records.len()).collect();
        let mut touched = Touched::default();
        self.show_rows(&all, &mut touched);
        self.changed_ids(touched)
    }

    /// Resets every row to its initial state without cascading.
    #[instrument(skip_all)]
    pub fn collapse_all(&mut self) -> Vec<SpanId> {
        let mut touched = Touched::default();
        for idx in 0..self.records.len() {
            let record = &mut self.records[idx];
            record.open_parents.reset();
            record.open_children.reset();
            record.expanded = false;
            if !record.is_root {
                self.set_visible(idx, false, &mut touched);
            }
        }
        self.changed_ids(touched)
    }

    /// Expands every row where `service_name` is the local or remote service.
    pub fn expand_service(&mut self, service_name: &str) -> Vec<SpanId> {
        let selected = self
            .spans_by_service
            .get(service_name)
            .cloned()
            .unwrap_or_default();
        let mut touched = Touched::default();
        self.show_rows(&selected, &mut touched);
        self.changed_ids(touched)
    }

    fn resolve<I, S>(&self, ids: I) -> Vec<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        ids.into_iter()
            .filter_map(|id| {
                let idx = self.index.get(id.as_ref()).copied();
                if idx.is_none() {
                    debug!(span_id = id.as_ref(), "Unknown span ignored");
                }
                idx
            })
            .collect()
    }

    /// A row already expanded keeps its counts, but its family is still made
    /// visible again.
    fn show_rows(&mut self, selected: &[usize], touched: &mut Touched) {
        let mut family = BTreeSet::new();
        for &idx in selected {
            self.set_visible(idx, true, touched);
            let count = !std::mem::replace(&mut self.records[idx].expanded, true);
            for pos in 0..self.records[idx].child_ids.len() {
                let child = self.records[idx].child_ids[pos];
                if count {
                    self.records[child].open_parents.increment();
                }
                family.insert(child);
            }
            let mut ancestor = self.records[idx].parent;
            while let Some(current) = ancestor {
                if count {
                    self.records[current].open_children.increment();
                }
                family.insert(current);
                ancestor = self.records[current].parent;
            }
        }
        for idx in family {
            self.set_visible(idx, true, touched);
        }
    }

    /// Works level by level: rows left without an open parent are hidden and
    /// collapsed as the next level.
    fn hide_rows(&mut self, selected: &[usize], children_only: bool, touched: &mut Touched) {
        let mut level = selected.to_vec();
        let mut children_only = children_only;
        while !level.is_empty() {
            let mut cascade = BTreeSet::new();
            for &idx in &level {
                if !children_only && !self.records[idx].is_root {
                    self.set_visible(idx, false, touched);
                }
                let was_expanded = std::mem::replace(&mut self.records[idx].expanded, false);
                if was_expanded {
                    let mut ancestor = self.records[idx].parent;
                    while let Some(current) = ancestor {
                        if !self.records[current].open_children.decrement() {
                            debug!(span_id = %self.records[current].id, "open_children already zero");
                        }
                        ancestor = self.records[current].parent;
                    }
                }
                for pos in 0..self.records[idx].child_ids.len() {
                    let child = self.records[idx].child_ids[pos];
                    if !self.records[child].open_parents.decrement() {
                        debug!(span_id = %self.records[child].id, "open_parents already zero");
                    }
                    if self.records[child].open_parents.is_zero() {
                        cascade.insert(child);
                    }
                }
            }
            level = cascade.into_iter().collect();
            for &idx in &level {
                if !self.records[idx].is_root {
                    self.set_visible(idx, false, touched);
                }
            }
            children_only = true;
        }
    }

    fn set_visible(&mut self, idx: usize, visible: bool, touched: &mut Touched) {
        let record = &mut self.records[idx];
        touched.0.entry(idx).or_insert(record.visible);
        record.visible = visible;
    }

    fn changed_ids(&self, touched: Touched) -> Vec<SpanId> {
        touched
            .0
            .into_iter()
            .filter(|(idx, was_visible)| self.records[*idx].visible != *was_visible)
            .map(|(idx, _)| self.records[idx].id.clone())
            .collect()
    }
}
