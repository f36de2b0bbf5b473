use std::fs::File;

use opentelemetry::sdk::trace::Tracer;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn env_filter(debug: bool) -> EnvFilter {
    if debug {
        return EnvFilter::new("seeder=debug,mongodb=info");
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("seeder=info,mongodb=warn"))
}

/// Pretty human output in development, JSON elsewhere (to `LOG_FILE` when set)
fn output_layer(is_dev: bool) -> BoxedLayer {
    if is_dev {
        return fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .with_line_number(true)
            .with_ansi(true)
            .pretty()
            .boxed();
    }
    let file = std::env::var("LOG_FILE").ok().and_then(|path| File::create(path).ok());
    match file {
        Some(file) => fmt::layer()
            .with_writer(std::sync::Mutex::new(file))
            .with_target(true)
            .with_level(true)
            .with_line_number(true)
            .json()
            .boxed(),
        None => fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .with_line_number(true)
            .with_ansi(false)
            .json()
            .boxed(),
    }
}

pub fn init_logging(debug: bool, tracer: Option<Tracer>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let is_dev = std::env::var("APP_ENV").unwrap_or_else(|_| "development".into()) == "development";
    let otel_layer = tracer.map(|t| tracing_opentelemetry::layer().with_tracer(t));
    let exporting = otel_layer.is_some();

    tracing_subscriber::registry()
        .with(output_layer(is_dev))
        .with(otel_layer)
        .with(env_filter(debug))
        .try_init()?;

    tracing::info!(
        mode = if is_dev { "development" } else { "production" },
        trace_export = exporting,
        "Logging system initialized"
    );
    Ok(())
}

pub fn set_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        let backtrace = std::backtrace::Backtrace::capture();
        if let Some(location) = panic_info.location() {
            tracing::error!(
                message = %panic_info,
                file = %location.file(),
                line = %location.line(),
                column = %location.column(),
                backtrace = %format!("{:?}", backtrace),
                "Application panic"
            );
        } else {
            tracing::error!(
                message = %panic_info,
                backtrace = %format!("{:?}", backtrace),
                "Application panic (unknown location)"
            );
        }
        eprintln!("PANIC: {}", panic_info);
        eprintln!("{:?}", backtrace);
    }));
}

pub fn init_logging_with_fallback(debug: bool, tracer: Option<Tracer>) {
    if let Err(e) = init_logging(debug, tracer) {
        eprintln!("Failed to initialize structured logging: {}", e);
        eprintln!("Falling back to simple stderr logging");
        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(std::io::stderr);
        if let Err(e) = tracing_subscriber::registry().with(stderr_layer).try_init() {
            eprintln!("Failed to initialize fallback logging: {}", e);
        }
    }
}
