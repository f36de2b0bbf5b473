use opentelemetry::global;
use opentelemetry::sdk::propagation::TraceContextPropagator;
use opentelemetry::sdk::trace::Tracer;
use opentelemetry::trace::TraceError;

/// Build a batch-exporting tracer that ships spans to a Jaeger agent.
///
/// Must be called from within a tokio runtime.
pub fn init_tracer(service_name: &str, agent_endpoint: &str) -> Result<Tracer, TraceError> {
    global::set_text_map_propagator(TraceContextPropagator::new());
    opentelemetry_jaeger::new_agent_pipeline()
        .with_service_name(service_name)
        .with_endpoint(agent_endpoint)
        .install_batch(opentelemetry::runtime::Tokio)
}

/// Flush pending spans before exit
pub fn shutdown_tracer() {
    global::shutdown_tracer_provider();
}

pub fn create_db_span(operation: &str, collection: &str) -> tracing::Span {
    tracing::span!(
        tracing::Level::DEBUG,
        "database",
        operation = operation,
        collection = collection,
        db_type = "mongodb"
    )
}

pub fn create_phase_span(phase: &str) -> tracing::Span {
    tracing::span!(tracing::Level::INFO, "phase", phase = phase)
}
