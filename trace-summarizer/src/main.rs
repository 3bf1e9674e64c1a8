use backtraced_error::{error_chain_to_pretty_formatted, SerdeJsonError};
use clap::Parser;
use std::path::PathBuf;
use trace_explorer::ZoomError;
use tracing::{error, info, instrument};

mod load;
mod output;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // load env vars so clap can use it when parsing a config
    dotenv::dotenv().ok();
    let config = LaunchConfig::parse();
    if let Err(e) = tracing_config_helper::setup_tracing_console_logging(&config.log_filter) {
        eprintln!("Failed to set up logging: {e}");
    }
    if let Err(e) = run(config).await {
        let error_chain_as_string = error_chain_to_pretty_formatted(&e);
        error!("{}", error_chain_as_string);
        std::process::exit(1);
    }
}

#[derive(Debug, clap::Parser)]
pub struct LaunchConfig {
    /// File with zipkin v2 json: either a list of traces or a flat list of spans.
    #[clap(long, env = "TRACES_PATH")]
    pub input: PathBuf,
    /// Only used to compute how much of each trace was spent in this service.
    #[clap(long, env)]
    pub service_name: Option<String>,
    /// Show start times in UTC instead of local time.
    #[clap(long, env, default_value_t = false)]
    pub utc: bool,
    #[clap(long, env, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,
    #[clap(long, env = "RUST_LOG", default_value = "info")]
    pub log_filter: String,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, clap::Subcommand)]
pub enum Command {
    /// Ranked list of every trace in the input, longest first.
    Summarize,
    /// Span tree of one trace.
    Tree {
        /// Defaults to the first trace in the input.
        #[clap(long)]
        trace_id: Option<String>,
        /// Start of the zoom window, microseconds after the trace start.
        #[clap(long, requires = "zoom_max")]
        zoom_min: Option<f64>,
        /// End of the zoom window, microseconds after the trace start.
        #[clap(long, requires = "zoom_min")]
        zoom_max: Option<f64>,
        /// Only show the root rows.
        #[clap(long, conflicts_with = "expand_service")]
        collapse: bool,
        /// Only expand the spans of this service.
        #[clap(long)]
        expand_service: Option<String>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum SummarizerError {
    #[error("Failed to load traces")]
    Load(#[from] load::LoadError),
    #[error("Trace {0} not found in input")]
    TraceNotFound(String),
    #[error("Invalid zoom window")]
    Zoom(#[from] ZoomError),
    #[error("Failed to serialize output")]
    Output(#[from] SerdeJsonError),
}

#[instrument(skip_all)]
async fn run(config: LaunchConfig) -> Result<(), SummarizerError> {
    info!("Using config: {:#?}", config);
    let traces = load::load_traces(&config.input).await?;
    info!("Loaded {} traces", traces.len());
    let rendered = match config.command {
        Command::Summarize => output::summarize(
            traces,
            config.service_name.as_deref(),
            config.utc,
            config.output,
        )?,
        Command::Tree {
            trace_id,
            zoom_min,
            zoom_max,
            collapse,
            expand_service,
        } => {
            let spans = match trace_id {
                None => traces.into_iter().next().unwrap_or_default(),
                Some(trace_id) => traces
                    .into_iter()
                    .find(|spans| spans.first().is_some_and(|s| s.trace_id == trace_id))
                    .ok_or(SummarizerError::TraceNotFound(trace_id))?,
            };
            let expansion = match (collapse, expand_service) {
                (true, _) => output::Expansion::Collapsed,
                (false, Some(service_name)) => output::Expansion::Service(service_name),
                (false, None) => output::Expansion::All,
            };
            let zoom_window = zoom_min.zip(zoom_max);
            output::tree(spans, &expansion, zoom_window, config.output)?
        }
    };
    println!("{rendered}");
    Ok(())
}
