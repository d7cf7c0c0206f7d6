use nextrouter_common::ProxyResult;
use tracing::info;

/// Receives every finished request's outcome. Stream requests report
/// after the copy loop terminates.
pub trait ResultSink: Send + Sync {
    fn record(&self, result: ProxyResult);
}

/// Default sink: structured log line per request.
pub struct LogSink;

impl ResultSink for LogSink {
    fn record(&self, result: ProxyResult) {
        info!(
            event = "proxy_result",
            provider = %result.provider,
            key = %result.provider_key_name,
            api = %result.api,
            stream = result.stream,
            model = %result.model,
            status = result.status,
            latency_ms = result.latency_ms,
            input_tokens = result.usage.input_tokens,
            output_tokens = result.usage.output_tokens,
            total_tokens = result.usage.total_tokens,
            usage_stage = %result.usage_stage.as_str(),
            finish_reason = %result.finish_reason,
            client_disconnect = result.client_disconnect,
        );
    }
}
