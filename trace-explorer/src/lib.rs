pub mod error_type;
pub mod ranking;
pub mod span;
pub mod summary;
pub mod time_conversion;
pub mod tree;
pub mod visibility;
pub mod zoom;

pub use error_type::{ErrorClassifier, ErrorType, TagAndAnnotationClassifier};
pub use ranking::{rank_summaries, TraceListItem};
pub use span::{Annotation, Endpoint, Kind, ServiceName, Span, SpanId, TraceId};
pub use summary::{
    service_summaries, summarize_batch, total_duration, trace_summary, trace_summary_with,
    DiagnosticSink, Interval, ServiceSummary, SummaryError, TraceSummary,
};
pub use tree::{build_tree, SpanNode, TraceTree};
pub use visibility::{OpenCount, RowState, TraceVisibility, VisibilityRecord};
pub use zoom::{span_bars, zoom, zoom_out, SpanBar, Timeline, ZoomError, ZoomView, ZoomedBar};

/// Groups spans by trace id, keeping first-seen order of the traces.
pub fn group_by_trace(spans: Vec<Span>) -> Vec<Vec<Span>> {
    let mut order: Vec<TraceId> = Vec::new();
    let mut groups: std::collections::HashMap<TraceId, Vec<Span>> = Default::default();
    for span in spans {
        if !groups.contains_key(&span.trace_id) {
            order.push(span.trace_id.clone());
        }
        groups.entry(span.trace_id.clone()).or_default().push(span);
    }
    order
        .into_iter()
        .filter_map(|trace_id| groups.remove(&trace_id))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn groups_keep_first_seen_order() {
        let span = |trace_id: &str, id: &str| Span {
            trace_id: trace_id.to_string(),
            id: id.to_string(),
            ..Span::default()
        };
        let groups = group_by_trace(vec![span("2", "a"), span("1", "b"), span("2", "c")]);
        let ids: Vec<Vec<&str>> = groups
            .iter()
            .map(|g| g.iter().map(|s| s.id.as_str()).collect())
            .collect();
        assert_eq!(ids, vec![vec!["a", "c"], vec!["b"]]);
    }
}
