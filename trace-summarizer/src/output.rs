use crate::OutputFormat;
use backtraced_error::SerdeJsonError;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Write;
use trace_explorer::time_conversion::duration_str;
use trace_explorer::{
    build_tree, rank_summaries, span_bars, summarize_batch, RowState, Span, SummaryError,
    TraceListItem, TraceVisibility, ZoomError, ZoomView,
};
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expansion {
    Collapsed,
    All,
    Service(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeRow {
    pub id: String,
    pub depth: usize,
    pub expanded: bool,
    pub has_children: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub duration_str: String,
    pub offset_percent: f64,
    pub width_percent: f64,
    pub highlighted: bool,
}

fn to_json<T: Serialize>(value: &T) -> Result<String, SerdeJsonError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| SerdeJsonError::from_serde_json_error(e, "serializing output", ""))
}

#[instrument(skip_all, fields(traces = traces.len()))]
pub fn summarize(
    traces: Vec<Vec<Span>>,
    service_name: Option<&str>,
    utc: bool,
    format: OutputFormat,
) -> Result<String, SerdeJsonError> {
    let trees: Vec<_> = traces.into_iter().map(build_tree).collect();
    let mut skipped: Vec<SummaryError> = Vec::new();
    let summaries = summarize_batch(&trees, &mut skipped);
    if !skipped.is_empty() {
        warn!("Skipped {} traces without timestamps", skipped.len());
    }
    let items = rank_summaries(&summaries, service_name, utc);
    match format {
        OutputFormat::Json => to_json(&items),
        OutputFormat::Text => Ok(items.iter().map(list_item_line).collect::<Vec<_>>().join("\n")),
    }
}

fn list_item_line(item: &TraceListItem) -> String {
    let mut line = format!(
        "{} {} {:>12} {:>4} spans {:>3}%",
        item.trace_id, item.start_ts, item.duration_str, item.span_count, item.width
    );
    if let Some(service_percentage) = item.service_percentage {
        let _ = write!(line, " service {service_percentage}%");
    }
    if let Some(info_class) = &item.info_class {
        let _ = write!(line, " [{info_class}]");
    }
    for service in &item.service_summaries {
        let _ = write!(
            line,
            "\n    {} x{} max {}",
            service.service_name, service.span_count, service.max_span_duration_str
        );
    }
    line
}

#[instrument(skip_all, fields(spans = spans.len()))]
pub fn tree(
    spans: Vec<Span>,
    expansion: &Expansion,
    zoom_window: Option<(f64, f64)>,
    format: OutputFormat,
) -> Result<String, crate::SummarizerError> {
    let rows = tree_rows(spans, expansion, zoom_window)?;
    match format {
        OutputFormat::Json => Ok(to_json(&rows)?),
        OutputFormat::Text => Ok(rows.iter().map(tree_row_line).collect::<Vec<_>>().join("\n")),
    }
}

/// Visible rows in display order, with their bars zoomed when a window is given.
pub fn tree_rows(
    spans: Vec<Span>,
    expansion: &Expansion,
    zoom_window: Option<(f64, f64)>,
) -> Result<Vec<TreeRow>, ZoomError> {
    let tree = build_tree(spans);
    let mut visibility = TraceVisibility::new(&tree);
    let changed = match expansion {
        Expansion::Collapsed => visibility.collapse_all(),
        Expansion::All => visibility.expand_all(),
        Expansion::Service(service_name) => visibility.expand_service(service_name),
    };
    info!("{} rows changed visibility", changed.len());

    let timeline = span_bars(&tree);
    let mut view = ZoomView::new(&timeline);
    let bars: HashMap<String, (f64, f64, bool)> = match zoom_window {
        Some((mintime, maxtime)) => view
            .zoom(mintime, maxtime)?
            .into_iter()
            .map(|bar| (bar.id, (bar.offset_percent, bar.width_percent, bar.highlighted)))
            .collect(),
        None => timeline
            .bars
            .into_iter()
            .map(|bar| (bar.id, (bar.offset_percent, bar.width_percent, false)))
            .collect(),
    };

    let mut first_leg: HashMap<&str, &Span> = HashMap::new();
    for span in tree.root().spans() {
        first_leg.entry(span.id.as_str()).or_insert(span);
    }
    let rows = tree
        .row_ids()
        .iter()
        .filter(|id| visibility.is_visible(id))
        .map(|id| {
            let span = first_leg.get(id.as_str());
            let (offset_percent, width_percent, highlighted) =
                bars.get(id).copied().unwrap_or((0., 0., false));
            TreeRow {
                id: id.clone(),
                depth: tree.row_depth(id),
                expanded: visibility.state(id) == Some(RowState::VisibleExpanded),
                has_children: !tree.child_ids(id).is_empty(),
                service_name: span
                    .and_then(|s| s.service_names().next())
                    .map(str::to_string),
                name: span.and_then(|s| s.name.clone()),
                duration_str: duration_str(span.and_then(|s| s.duration).unwrap_or(0)),
                offset_percent,
                width_percent,
                highlighted,
            }
        })
        .collect();
    Ok(rows)
}

fn tree_row_line(row: &TreeRow) -> String {
    let marker = match (row.has_children, row.expanded) {
        (false, _) => ' ',
        (true, true) => '-',
        (true, false) => '+',
    };
    format!(
        "{:indent$}{marker} {} {}: {} {} [{:.1}% +{:.1}%]{}",
        "",
        row.service_name.as_deref().unwrap_or("unknown"),
        row.name.as_deref().unwrap_or(""),
        row.id,
        row.duration_str,
        row.offset_percent,
        row.width_percent,
        if row.highlighted { " *" } else { "" },
        indent = row.depth * 2,
    )
}
