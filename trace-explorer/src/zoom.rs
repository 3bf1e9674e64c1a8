use crate::span::{Span, SpanId};
use crate::tree::TraceTree;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::instrument;

/// Where a row's bar sits on the timeline, in percent of the displayed range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanBar {
    pub id: SpanId,
    pub offset_percent: f64,
    pub width_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoomedBar {
    pub id: SpanId,
    pub offset_percent: f64,
    pub width_percent: f64,
    /// The span runs inside the selected window.
    pub highlighted: bool,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ZoomError {
    #[error("Empty zoom selection: mintime {mintime} is not below maxtime {maxtime}")]
    EmptySelection { mintime: f64, maxtime: f64 },
    #[error("Already zoomed in, zoom out before selecting again")]
    AlreadyZoomed,
}

/// Bars of every row relative to the whole trace.
#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    /// Earliest timestamp in the trace, microseconds since epoch.
    pub start: u64,
    /// Microseconds from the earliest timestamp to the latest end.
    pub duration: u64,
    pub bars: Vec<SpanBar>,
}

/// Bars of every distinct row relative to the trace start and duration.
#[instrument(skip_all)]
pub fn span_bars(tree: &TraceTree) -> Timeline {
    let mut start = u64::MAX;
    let mut end = 0;
    for span in tree.root().spans() {
        if let Some(timestamp) = span.timestamp {
            start = start.min(timestamp);
            end = end.max(span.end().unwrap_or(timestamp));
        }
    }
    if start == u64::MAX {
        start = 0;
    }
    let duration = end.saturating_sub(start);
    // one bar per row, the first leg of a shared span decides its position
    let mut seen = HashSet::new();
    let bars = tree
        .root()
        .spans()
        .filter(|span| seen.insert(span.id.as_str()))
        .map(|span| bar(span, start, duration))
        .collect();
    Timeline {
        start,
        duration,
        bars,
    }
}

fn bar(span: &Span, trace_start: u64, trace_duration: u64) -> SpanBar {
    let (offset_percent, width_percent) = match span.timestamp {
        Some(timestamp) if trace_duration > 0 => {
            let offset = timestamp.saturating_sub(trace_start);
            let offset_percent = offset as f64 * 100. / trace_duration as f64;
            let max_width_percent = 100. - offset_percent;
            let width_percent = span.duration.map_or(0., |duration| {
                (duration as f64 * 100. / trace_duration as f64).min(max_width_percent)
            });
            (offset_percent, width_percent)
        }
        _ => (0., 0.),
    };
    SpanBar {
        id: span.id.clone(),
        offset_percent,
        width_percent,
    }
}

/// Clips every bar to `[mintime, maxtime]`, both in the same unit as
/// `original_duration` and relative to the trace start.
pub fn zoom(
    bars: &[SpanBar],
    original_duration: f64,
    mintime: f64,
    maxtime: f64,
) -> Result<Vec<ZoomedBar>, ZoomError> {
    // also rejects NaN
    if !(mintime < maxtime) {
        return Err(ZoomError::EmptySelection { mintime, maxtime });
    }
    let new_duration = maxtime - mintime;
    Ok(bars
        .iter()
        .map(|bar| {
            let start = bar.offset_percent * original_duration / 100.;
            let end = start + bar.width_percent * original_duration / 100.;
            let (offset_percent, width_percent, highlighted) =
                clip(start, end, mintime, maxtime, new_duration);
            ZoomedBar {
                id: bar.id.clone(),
                offset_percent,
                width_percent,
                highlighted,
            }
        })
        .collect())
}

fn clip(start: f64, end: f64, mintime: f64, maxtime: f64, new_duration: f64) -> (f64, f64, bool) {
    let percent = |time: f64| time / new_duration * 100.;
    if end <= mintime {
        (0., 0., false)
    } else if start < mintime && end <= maxtime {
        (0., percent(end - mintime), true)
    } else if start < mintime && end > maxtime {
        (0., 100., true)
    } else if start >= mintime && start < maxtime && end <= maxtime {
        (percent(start - mintime), percent(end - start), true)
    } else if start >= mintime && start < maxtime && end > maxtime {
        (percent(start - mintime), percent(maxtime - start), true)
    } else if start >= maxtime {
        // a span starting exactly at maxtime still counts as inside, one
        // ending exactly at mintime doesn't
        (100., 0., start == maxtime)
    } else {
        (0., 0., false)
    }
}

/// The bars as originally computed, untouched by any zoom.
pub fn zoom_out(original: &[SpanBar]) -> Vec<SpanBar> {
    original.to_vec()
}

/// Zoom state of one trace view: keeps the original bars to restore them
/// and only accepts a new selection while zoomed out.
#[derive(Debug, Clone)]
pub struct ZoomView {
    original_duration: f64,
    original: Vec<SpanBar>,
    selection: Option<(f64, f64)>,
}

impl ZoomView {
    pub fn new(timeline: &Timeline) -> Self {
        Self {
            original_duration: timeline.duration as f64,
            original: timeline.bars.clone(),
            selection: None,
        }
    }

    pub fn selection_enabled(&self) -> bool {
        self.selection.is_none()
    }

    pub fn selection(&self) -> Option<(f64, f64)> {
        self.selection
    }

    pub fn zoom(&mut self, mintime: f64, maxtime: f64) -> Result<Vec<ZoomedBar>, ZoomError> {
        if self.selection.is_some() {
            return Err(ZoomError::AlreadyZoomed);
        }
        let zoomed = zoom(&self.original, self.original_duration, mintime, maxtime)?;
        self.selection = Some((mintime, maxtime));
        Ok(zoomed)
    }

    pub fn zoom_out(&mut self) -> Vec<SpanBar> {
        self.selection = None;
        zoom_out(&self.original)
    }

    /// Six evenly spaced time axis labels for the displayed range.
    pub fn time_markers(&self) -> [f64; 6] {
        let (mintime, maxtime) = self.selection.unwrap_or((0., self.original_duration));
        let range = maxtime - mintime;
        std::array::from_fn(|i| mintime + range * i as f64 / 5.)
    }
}
