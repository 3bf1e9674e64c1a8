use backtraced_error::{IoError, SerdeJsonError};
use serde::Deserialize;
use std::path::Path;
use trace_explorer::{group_by_trace, Span};
use tracing::{info, instrument};

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Failed to read input file")]
    Io(#[from] IoError),
    #[error("Input is not zipkin v2 json")]
    Json(#[from] SerdeJsonError),
}

/// What the zipkin api returns for a trace search, or a single trace's spans.
#[derive(Deserialize)]
#[serde(untagged)]
enum TracesFile {
    Traces(Vec<Vec<Span>>),
    Spans(Vec<Span>),
}

/// Spans of each trace in the file, in file order.
#[instrument(skip_all, fields(path = %path.display()))]
pub async fn load_traces(path: &Path) -> Result<Vec<Vec<Span>>, LoadError> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| IoError::from_io_error(e, format!("reading {}", path.display())))?;
    let parsed: TracesFile = serde_json::from_str(&contents).map_err(|e| {
        SerdeJsonError::from_serde_json_error(
            e,
            format!("parsing {} as traces", path.display()),
            &contents,
        )
    })?;
    let traces = match parsed {
        TracesFile::Traces(traces) => traces
            .into_iter()
            .filter(|spans| !spans.is_empty())
            .collect(),
        TracesFile::Spans(spans) => {
            info!("Flat span list, grouping by trace id");
            group_by_trace(spans)
        }
    };
    Ok(traces)
}

#[cfg(test)]
mod test {
    use super::*;

    async fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("{}-{name}", std::process::id()));
        tokio::fs::write(&path, contents).await.unwrap();
        path
    }

    #[tokio::test]
    async fn loads_list_of_traces() {
        tracing_config_helper::setup_tracing_console_logging_for_test();
        let path = write_temp(
            "traces.json",
            r#"[
                [{"traceId":"1","id":"a","timestamp":10,"duration":5}],
                [],
                [{"traceId":"2","id":"b","timestamp":20},{"traceId":"2","id":"c","parentId":"b"}]
            ]"#,
        )
        .await;
        let traces = load_traces(&path).await.unwrap();
        assert_eq!(traces.len(), 2);
        assert_eq!(traces[1].len(), 2);
        assert_eq!(traces[1][1].parent_id.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn groups_flat_span_list() {
        let path = write_temp(
            "spans.json",
            r#"[
                {"traceId":"1","id":"a","timestamp":10},
                {"traceId":"2","id":"b","timestamp":20},
                {"traceId":"1","id":"c","parentId":"a"}
            ]"#,
        )
        .await;
        let traces = load_traces(&path).await.unwrap();
        assert_eq!(traces.len(), 2);
        assert_eq!(traces[0].len(), 2);
        assert_eq!(traces[1][0].id, "b");
    }

    #[tokio::test]
    async fn reports_bad_json_and_missing_file() {
        let path = write_temp("broken.json", r#"{"not":"spans"}"#).await;
        assert!(matches!(load_traces(&path).await, Err(LoadError::Json(_))));

        let missing = std::env::temp_dir().join("surely-missing-traces.json");
        assert!(matches!(load_traces(&missing).await, Err(LoadError::Io(_))));
    }
}
