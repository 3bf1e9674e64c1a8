//! Console logging setup shared by the workspace binaries and tests.
//! Uses RUST_LOG, see https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/struct.EnvFilter.html
//! on how to configure that.

use std::sync::OnceLock;
use tracing::subscriber::{self, SetGlobalDefaultError};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Goes to stderr so it never mixes with a binary's output on stdout. Only
/// printed when `TRACE_EXPLORER_DEBUG=true`, since it runs before any
/// subscriber exists.
pub fn print_if_dbg<S: AsRef<str>>(context: &'static str, debug_statement: S) {
    static DEBUG: OnceLock<bool> = OnceLock::new();
    let enabled =
        *DEBUG.get_or_init(|| debug_enabled(std::env::var("TRACE_EXPLORER_DEBUG").ok().as_deref()));
    if enabled {
        eprintln!("{context} - {}", debug_statement.as_ref());
    }
}

fn debug_enabled(value: Option<&str>) -> bool {
    value.and_then(|v| v.trim().parse::<bool>().ok()).unwrap_or(false)
}

/// `RUST_LOG` when present and valid, otherwise `default_filter`, otherwise plain "info".
pub fn env_filter_or(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|e| {
        print_if_dbg(
            "env_filter_or",
            format!("Missing or invalid RUST_LOG, defaulting to {default_filter}. {e}"),
        );
        EnvFilter::builder()
            .parse(default_filter)
            .unwrap_or_else(|e| {
                eprintln!("Invalid default filter {default_filter}: {e}, using info");
                EnvFilter::new("info")
            })
    })
}

/// Compact logs to stdout. Fails if a global subscriber was already set.
pub fn setup_tracing_console_logging(default_filter: &str) -> Result<(), SetGlobalDefaultError> {
    let filter = env_filter_or(default_filter);
    let fmt = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .compact()
        .with_filter(filter);
    let subscriber = tracing_subscriber::Registry::default().with(fmt);
    subscriber::set_global_default(subscriber)?;
    install_panic_logging_hook();
    Ok(())
}

/// Same as [`setup_tracing_console_logging`] but safe to call from every test,
/// only the first call installs the subscriber.
pub fn setup_tracing_console_logging_for_test() {
    static ONCE: OnceLock<()> = OnceLock::new();
    ONCE.get_or_init(|| {
        let fmt = tracing_subscriber::fmt::layer()
            // for tests ansi if nice
            .with_ansi(true)
            .with_test_writer()
            .compact()
            .with_filter(env_filter_or("debug"));
        let subscriber = tracing_subscriber::Registry::default().with(fmt);
        if let Err(e) = subscriber::set_global_default(subscriber) {
            println!("Test logging already set up elsewhere: {e}");
        }
    });
}

/// Logs panics through tracing before running the previous hook.
fn install_panic_logging_hook() {
    let current = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let bt = std::backtrace::Backtrace::force_capture();
        tracing::error!("Code panicked: Panic info: {}.", panic_info);
        tracing::error!("Backtrace:\n{bt}.");
        current(panic_info)
    }));
}
