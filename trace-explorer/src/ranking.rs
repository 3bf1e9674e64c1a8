use crate::error_type::ErrorType;
use crate::span::TraceId;
use crate::summary::{service_summaries, total_duration, ServiceSummary, TraceSummary};
use crate::time_conversion::{duration_str, format_start_ts, micros_to_millis_f64};
use serde::{Deserialize, Serialize};

/// One row of the trace list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceListItem {
    pub trace_id: TraceId,
    pub timestamp: u64,
    pub start_ts: String,
    pub span_count: usize,
    /// Milliseconds.
    pub duration: f64,
    pub duration_str: String,
    /// Duration relative to the longest listed trace, in whole percent.
    pub width: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_summaries: Vec<ServiceSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_percentage: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info_class: Option<String>,
}

/// Turns summaries into list rows, longest trace first. With a
/// `service_name`, each row also gets the share of the trace spent in that service.
pub fn rank_summaries(
    summaries: &[TraceSummary],
    service_name: Option<&str>,
    utc: bool,
) -> Vec<TraceListItem> {
    let max_duration = summaries.iter().map(|s| s.duration).max().unwrap_or(0);
    let mut ranked: Vec<(u64, TraceListItem)> = summaries
        .iter()
        .map(|summary| (summary.duration, list_item(summary, max_duration, service_name, utc)))
        .collect();
    ranked.sort_by(|(a_duration, a), (b_duration, b)| {
        b_duration
            .cmp(a_duration)
            .then_with(|| a.trace_id.cmp(&b.trace_id))
    });
    ranked.into_iter().map(|(_, item)| item).collect()
}

fn list_item(
    summary: &TraceSummary,
    max_duration: u64,
    service_name: Option<&str>,
    utc: bool,
) -> TraceListItem {
    let duration = summary.duration;
    let width = if duration > 0 && max_duration > 0 {
        percent(duration, max_duration)
    } else {
        0
    };
    let service_percentage = service_name
        .filter(|_| duration > 0)
        .and_then(|name| summary.grouped_timestamps.get(name))
        .map(|intervals| percent(total_duration(intervals), duration));
    let info_class = match summary.error_type {
        ErrorType::None => None,
        error_type => Some(format!("trace-error-{error_type}")),
    };
    TraceListItem {
        trace_id: summary.trace_id.clone(),
        timestamp: summary.timestamp,
        start_ts: format_start_ts(summary.timestamp, utc),
        span_count: summary.span_count,
        duration: micros_to_millis_f64(duration),
        duration_str: duration_str(duration),
        width,
        service_summaries: service_summaries(&summary.grouped_timestamps),
        service_percentage,
        info_class,
    }
}

// truncated, like the list has always shown it
fn percent(part: u64, whole: u64) -> u32 {
    u32::try_from(u128::from(part) * 100 / u128::from(whole)).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::summary::Interval;
    use std::collections::BTreeMap;

    fn summary(trace_id: &str, duration: u64) -> TraceSummary {
        TraceSummary {
            trace_id: trace_id.to_string(),
            timestamp: 1_541_138_169_297_572,
            duration,
            span_count: 1,
            error_type: ErrorType::None,
            grouped_timestamps: BTreeMap::new(),
        }
    }

    fn ids(items: &[TraceListItem]) -> Vec<&str> {
        items.iter().map(|i| i.trace_id.as_str()).collect()
    }

    #[test]
    fn longest_first() {
        let ranked = rank_summaries(&[summary("a", 300), summary("b", 500)], None, true);
        assert_eq!(ids(&ranked), ["b", "a"]);
        assert_eq!(ranked[0].width, 100);
        assert_eq!(ranked[1].width, 60);
        assert_eq!(ranked[0].duration, 0.5);
        assert_eq!(ranked[0].duration_str, "500μs");
        assert_eq!(ranked[0].start_ts, "11-02-2018T05:56:09.297+0000");
    }

    #[test]
    fn ties_ordered_by_trace_id() {
        let ranked = rank_summaries(
            &[summary("c", 100), summary("a", 100), summary("b", 100)],
            None,
            true,
        );
        assert_eq!(ids(&ranked), ["a", "b", "c"]);
    }

    #[test]
    fn width_is_truncated() {
        let ranked = rank_summaries(&[summary("a", 3), summary("b", 2)], None, true);
        assert_eq!(ranked[1].width, 66);
    }

    #[test]
    fn zero_durations_have_no_width() {
        let ranked = rank_summaries(&[summary("a", 0)], None, true);
        assert_eq!(ranked[0].width, 0);
        assert_eq!(ranked[0].duration_str, "");
    }

    #[test]
    fn service_percentage_only_for_present_service() {
        let mut with_service = summary("a", 300);
        with_service.grouped_timestamps.insert(
            "backend".to_string(),
            vec![
                Interval {
                    timestamp: 0,
                    duration: 100,
                },
                Interval {
                    timestamp: 50,
                    duration: 100,
                },
            ],
        );
        let ranked = rank_summaries(
            &[with_service.clone(), summary("b", 100)],
            Some("backend"),
            true,
        );
        assert_eq!(ranked[0].service_percentage, Some(50));
        assert_eq!(ranked[0].service_summaries.len(), 1);
        assert_eq!(ranked[1].service_percentage, None);

        let unfiltered = rank_summaries(&[with_service], None, true);
        assert_eq!(unfiltered[0].service_percentage, None);
    }

    #[test]
    fn info_class_from_error_type() {
        let mut transient = summary("a", 10);
        transient.error_type = ErrorType::Transient;
        let mut critical = summary("b", 20);
        critical.error_type = ErrorType::Critical;
        let ranked = rank_summaries(&[transient, critical, summary("c", 5)], None, true);
        assert_eq!(ranked[0].info_class.as_deref(), Some("trace-error-critical"));
        assert_eq!(ranked[1].info_class.as_deref(), Some("trace-error-transient"));
        assert_eq!(ranked[2].info_class, None);
    }
}
