use crate::error_type::{ErrorClassifier, ErrorType, TagAndAnnotationClassifier};
use crate::span::{ServiceName, Span, TraceId};
use crate::time_conversion::duration_str;
use crate::tree::TraceTree;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SummaryError {
    #[error("Trace {trace_id} is missing a timestamp")]
    MissingTimestamp { trace_id: TraceId },
}

/// `[timestamp, timestamp + duration)` in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub timestamp: u64,
    pub duration: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceSummary {
    pub trace_id: TraceId,
    /// Earliest timestamp seen in the trace.
    pub timestamp: u64,
    pub duration: u64,
    pub span_count: usize,
    pub error_type: ErrorType,
    /// Every span interval, keyed by the local and the remote service it touched.
    pub grouped_timestamps: BTreeMap<ServiceName, Vec<Interval>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSummary {
    pub service_name: ServiceName,
    pub span_count: usize,
    pub max_span_duration: u64,
    pub max_span_duration_str: String,
}

pub fn trace_summary(tree: &TraceTree) -> Result<TraceSummary, SummaryError> {
    trace_summary_with(tree, &TagAndAnnotationClassifier)
}

#[instrument(skip_all, fields(trace_id = tree.trace_id().unwrap_or_default()))]
pub fn trace_summary_with<C: ErrorClassifier + ?Sized>(
    tree: &TraceTree,
    classifier: &C,
) -> Result<TraceSummary, SummaryError> {
    let mut trace_id = TraceId::new();
    let mut span_count = 0;
    let mut error_type = ErrorType::None;
    let mut timestamps = Vec::new();
    let mut grouped_timestamps: BTreeMap<ServiceName, Vec<Interval>> = BTreeMap::new();

    tree.root().traverse(|span| {
        span_count += 1;
        if trace_id.is_empty() {
            trace_id = span.trace_id.clone();
        }
        error_type = error_type.max(classifier.classify(span, error_type));
        add_timestamps(span, &mut timestamps);
        let interval = Interval {
            timestamp: span.timestamp.unwrap_or(0),
            duration: span.duration.unwrap_or(0),
        };
        for service_name in span.service_names() {
            grouped_timestamps
                .entry(service_name.to_string())
                .or_default()
                .push(interval);
        }
    });

    let (Some(&first), Some(&last)) = (timestamps.iter().min(), timestamps.iter().max()) else {
        return Err(SummaryError::MissingTimestamp { trace_id });
    };
    let duration = if timestamps.len() > 1 { last - first } else { 0 };
    Ok(TraceSummary {
        trace_id,
        timestamp: first,
        duration,
        span_count,
        error_type,
        grouped_timestamps,
    })
}

// ends count too, so nothing reaches past the displayed range
fn add_timestamps(span: &Span, timestamps: &mut Vec<u64>) {
    let Some(timestamp) = span.timestamp.filter(|ts| *ts > 0) else {
        return;
    };
    timestamps.push(timestamp);
    if let Some(duration) = span.duration.filter(|d| *d > 0) {
        timestamps.push(timestamp.saturating_add(duration));
    }
}

/// Time covered by the intervals, counting overlaps once. Zero length
/// intervals are ignored.
pub fn total_duration(intervals: &[Interval]) -> u64 {
    let mut sorted: Vec<&Interval> = intervals.iter().filter(|i| i.duration > 0).collect();
    sorted.sort_by_key(|i| i.timestamp);
    let Some((first, rest)) = sorted.split_first() else {
        return 0;
    };
    let mut total = first.duration;
    let mut current_end = first.timestamp.saturating_add(first.duration);
    for next in rest {
        let next_end = next.timestamp.saturating_add(next.duration);
        if next_end <= current_end {
            continue;
        } else if next.timestamp <= current_end {
            total = total.saturating_add(next_end - current_end);
        } else {
            total = total.saturating_add(next.duration);
        }
        current_end = next_end;
    }
    total
}

/// Longest services first, ties by name.
pub fn service_summaries(grouped: &BTreeMap<ServiceName, Vec<Interval>>) -> Vec<ServiceSummary> {
    let mut summaries: Vec<ServiceSummary> = grouped
        .iter()
        .map(|(service_name, intervals)| {
            let max_span_duration = intervals.iter().map(|i| i.duration).max().unwrap_or(0);
            ServiceSummary {
                service_name: service_name.clone(),
                span_count: intervals.len(),
                max_span_duration,
                max_span_duration_str: duration_str(max_span_duration),
            }
        })
        .collect();
    summaries.sort_by(|a, b| {
        b.max_span_duration
            .cmp(&a.max_span_duration)
            .then_with(|| a.service_name.cmp(&b.service_name))
    });
    summaries
}

/// Receives the traces a batch had to skip.
pub trait DiagnosticSink {
    fn report(&mut self, error: SummaryError);
}

impl DiagnosticSink for Vec<SummaryError> {
    fn report(&mut self, error: SummaryError) {
        self.push(error);
    }
}

/// Summarizes every tree, skipping the ones that fail.
#[instrument(skip_all, fields(trees = trees.len()))]
pub fn summarize_batch(trees: &[TraceTree], sink: &mut dyn DiagnosticSink) -> Vec<TraceSummary> {
    let mut summaries = Vec::with_capacity(trees.len());
    for tree in trees {
        match trace_summary(tree) {
            Ok(summary) => summaries.push(summary),
            Err(e) => {
                warn!("Skipping trace: {e}");
                sink.report(e);
            }
        }
    }
    summaries
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::span::Endpoint;
    use crate::tree::build_tree;
    use crate::tree::test::span;

    fn timed(id: &str, parent_id: Option<&str>, timestamp: u64, duration: u64, service: &str) -> Span {
        Span {
            duration: Some(duration),
            local_endpoint: Some(Endpoint::for_service(service)),
            ..span(id, parent_id, Some(timestamp))
        }
    }

    fn interval(timestamp: u64, duration: u64) -> Interval {
        Interval {
            timestamp,
            duration,
        }
    }

    #[test]
    fn duration_spans_first_start_to_last_end() {
        let tree = build_tree(vec![
            timed("a", None, 100, 50, "frontend"),
            timed("b", Some("a"), 120, 200, "backend"),
            timed("c", Some("a"), 110, 10, "backend"),
        ]);
        let summary = trace_summary(&tree).unwrap();
        assert_eq!(summary.trace_id, "1");
        assert_eq!(summary.timestamp, 100);
        assert_eq!(summary.duration, 220);
        assert_eq!(summary.span_count, 3);
        assert_eq!(summary.error_type, ErrorType::None);
        assert_eq!(summary.grouped_timestamps["backend"].len(), 2);
    }

    #[test]
    fn single_timestamp_has_no_duration() {
        let tree = build_tree(vec![span("a", None, Some(100)), span("b", Some("a"), None)]);
        let summary = trace_summary(&tree).unwrap();
        assert_eq!(summary.timestamp, 100);
        assert_eq!(summary.duration, 0);
    }

    #[test]
    fn missing_timestamp_is_an_error() {
        let tree = build_tree(vec![span("a", None, None), span("b", Some("a"), None)]);
        assert_eq!(
            trace_summary(&tree),
            Err(SummaryError::MissingTimestamp {
                trace_id: "1".to_string()
            })
        );
    }

    #[test]
    fn headless_summary_uses_earliest_timestamp() {
        let tree = build_tree(vec![
            timed("b", Some("missing"), 300, 10, "backend"),
            timed("c", Some("missing"), 200, 10, "backend"),
        ]);
        assert!(tree.is_headless());
        let summary = trace_summary(&tree).unwrap();
        assert_eq!(summary.timestamp, 200);
        assert_eq!(summary.duration, 110);
        assert_eq!(summary.span_count, 2);
    }

    #[test]
    fn remote_endpoints_are_counted() {
        let tree = build_tree(vec![Span {
            remote_endpoint: Some(Endpoint::for_service("mysql")),
            ..timed("a", None, 100, 50, "frontend")
        }]);
        let summary = trace_summary(&tree).unwrap();
        assert_eq!(summary.grouped_timestamps["frontend"], vec![interval(100, 50)]);
        assert_eq!(summary.grouped_timestamps["mysql"], vec![interval(100, 50)]);
    }

    #[test]
    fn errors_escalate_to_critical() {
        let mut failing = timed("c", Some("a"), 130, 1, "backend");
        failing.tags.insert("error".to_string(), "boom".to_string());
        let tree = build_tree(vec![
            timed("a", None, 100, 50, "frontend"),
            failing,
            timed("b", Some("a"), 120, 1, "backend"),
        ]);
        assert_eq!(trace_summary(&tree).unwrap().error_type, ErrorType::Critical);
    }

    #[test]
    fn custom_classifier_is_used() {
        let tree = build_tree(vec![timed("a", None, 100, 50, "frontend")]);
        let classifier = |span: &Span, _current: ErrorType| {
            if span.duration > Some(10) {
                ErrorType::Transient
            } else {
                ErrorType::None
            }
        };
        let summary = trace_summary_with(&tree, &classifier).unwrap();
        assert_eq!(summary.error_type, ErrorType::Transient);
    }

    #[test]
    fn total_duration_merges_overlaps() {
        assert_eq!(total_duration(&[interval(0, 10), interval(5, 10)]), 15);
        assert_eq!(total_duration(&[interval(0, 10), interval(20, 10)]), 20);
        assert_eq!(total_duration(&[interval(0, 10), interval(2, 3)]), 10);
        assert_eq!(total_duration(&[interval(20, 10), interval(0, 10), interval(10, 5)]), 25);
        assert_eq!(total_duration(&[interval(3, 0)]), 0);
        assert_eq!(total_duration(&[]), 0);
    }

    #[test]
    fn total_duration_saturates() {
        let half = 1u64 << 63;
        assert_eq!(total_duration(&[interval(0, half), interval(half + 1, half)]), u64::MAX);
        assert_eq!(total_duration(&[interval(u64::MAX - 5, 10)]), 10);
    }

    #[test]
    fn very_deep_trace_is_summarized() {
        let tree = build_tree(crate::tree::test::chain(50_000));
        let summary = trace_summary(&tree).unwrap();
        assert_eq!(summary.span_count, 50_000);
    }

    #[test]
    fn total_duration_is_idempotent() {
        let intervals = [interval(0, 10), interval(5, 10), interval(40, 2)];
        let once = total_duration(&intervals);
        let doubled: Vec<Interval> = intervals.iter().chain(intervals.iter()).copied().collect();
        assert_eq!(total_duration(&doubled), once);
        assert_eq!(once, 17);
    }

    #[test]
    fn service_summaries_order() {
        let grouped = BTreeMap::from([
            ("zeta".to_string(), vec![interval(0, 5_000)]),
            ("alpha".to_string(), vec![interval(0, 5_000), interval(1, 10)]),
            ("beta".to_string(), vec![interval(0, 168_731)]),
        ]);
        let summaries = service_summaries(&grouped);
        let names: Vec<&str> = summaries.iter().map(|s| s.service_name.as_str()).collect();
        assert_eq!(names, ["beta", "alpha", "zeta"]);
        assert_eq!(summaries[0].max_span_duration_str, "168.731ms");
        assert_eq!(summaries[1].span_count, 2);
        assert_eq!(summaries[1].max_span_duration_str, "5ms");
    }

    #[test]
    fn batch_skips_failing_traces() {
        tracing_config_helper::setup_tracing_console_logging_for_test();
        let good = build_tree(vec![timed("a", None, 100, 50, "frontend")]);
        let bad = build_tree(vec![Span {
            trace_id: "2".to_string(),
            ..span("a", None, None)
        }]);
        let mut errors: Vec<SummaryError> = Vec::new();
        let summaries = summarize_batch(&[good, bad], &mut errors);
        assert_eq!(summaries.len(), 1);
        assert_eq!(
            errors,
            vec![SummaryError::MissingTimestamp {
                trace_id: "2".to_string()
            }]
        );
    }
}
