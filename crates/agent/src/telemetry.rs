use tracing::info;

/// One observed external call: a labeled span with its input and its
/// output or error.
#[derive(Clone, Copy, Debug)]
pub struct SpanReport<'a> {
    pub name: &'a str,
    pub session_id: &'a str,
    pub input: &'a str,
    pub outcome: Result<&'a str, &'a str>,
}

/// Optional observability collaborator. The orchestrator reports every
/// suspension point through this trait unconditionally; when nothing is
/// configured the no-op implementation absorbs the calls, so the pipeline
/// never branches on "is telemetry on".
pub trait Telemetry: Send + Sync {
    fn report(&self, span: SpanReport<'_>);
}

#[derive(Default)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn report(&self, _span: SpanReport<'_>) {}
}

/// Telemetry sink that forwards span reports to the process log.
#[derive(Default)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn report(&self, span: SpanReport<'_>) {
        match span.outcome {
            Ok(output) => info!(
                event_name = "agent.telemetry.span",
                span = span.name,
                session_id = span.session_id,
                input = truncate(span.input),
                output = truncate(output),
                "external call completed"
            ),
            Err(error) => info!(
                event_name = "agent.telemetry.span",
                span = span.name,
                session_id = span.session_id,
                input = truncate(span.input),
                error = truncate(error),
                "external call failed"
            ),
        }
    }
}

const MAX_FIELD_CHARS: usize = 240;

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(MAX_FIELD_CHARS) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::{truncate, NoopTelemetry, SpanReport, Telemetry};

    #[test]
    fn noop_absorbs_reports() {
        let telemetry = NoopTelemetry;
        telemetry.report(SpanReport {
            name: "llm_invoke",
            session_id: "sess-1",
            input: "hello",
            outcome: Err("unreachable"),
        });
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let long = "é".repeat(500);
        let cut = truncate(&long);
        assert_eq!(cut.chars().count(), 240);
    }
}
