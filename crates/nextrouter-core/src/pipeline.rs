//! The streaming response pipeline: optional gunzip, optional SSE dialect
//! transform, a tail tee for metrics, optional SSE-level JSON mutation,
//! then the downstream writer. One producer task per request; a bounded
//! channel provides the back-pressure bridge.

use std::io;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use nextrouter_dsl::{JsonOp, SseDelIf};
use nextrouter_protocol::sse::{SseEvent, SseParser};
use nextrouter_transform::SseTransform;

use crate::gzip::GzStreamDecoder;
use crate::meta::ScopeVals;
use crate::tail::TailBuffer;

/// `sse_json_del_if` rules plus response `json_ops`, applied per event to
/// the parsed `data:` payload. Non-object payloads pass through unchanged.
pub struct SseMutator {
    pub del_if: Vec<SseDelIf>,
    pub ops: Vec<JsonOp>,
    pub scope: ScopeVals,
}

impl SseMutator {
    pub fn mutate(&self, event: &SseEvent) -> Bytes {
        if !event.had_data || event.data.is_empty() || event.is_done() {
            return event.encode();
        }
        let Ok(mut doc) = serde_json::from_str::<Value>(&event.data) else {
            return event.encode();
        };
        if !doc.is_object() {
            return event.encode();
        }
        for rule in &self.del_if {
            if rule.cond_path.get_one(&doc) == Some(&rule.equals) {
                rule.del_path.del(&mut doc);
            }
        }
        let scope = self.scope.as_scope();
        for op in &self.ops {
            op.apply(&mut doc, &scope);
        }
        event.encode_with_data(&doc.to_string())
    }
}

pub struct PipelineSpec {
    /// Upstream body is gzip-encoded and a transform is selected.
    pub gunzip: bool,
    pub transform: Option<Box<dyn SseTransform>>,
    pub mutator: Option<SseMutator>,
    pub tail_cap: usize,
}

/// Delivered once the copy loop terminates.
pub struct StreamOutcome {
    /// Post-transform, pre-mutation trailing bytes.
    pub tail: Vec<u8>,
    pub client_disconnect: bool,
}

/// Matches the downstream-write failure modes that mean "client went
/// away" rather than a proxy fault.
pub fn is_disconnect_error(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
    ) {
        return true;
    }
    let message = err.to_string().to_ascii_lowercase();
    message.contains("broken pipe")
        || message.contains("connection reset")
        || message.contains("epipe")
        || message.contains("econnreset")
        || message.contains("canceled")
        || message.contains("cancelled")
}

pub fn run_pipeline<S>(
    upstream: S,
    spec: PipelineSpec,
) -> (
    BoxStream<'static, io::Result<Bytes>>,
    oneshot::Receiver<StreamOutcome>,
)
where
    S: Stream<Item = io::Result<Bytes>> + Send + Unpin + 'static,
{
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(16);
    let (outcome_tx, outcome_rx) = oneshot::channel();

    tokio::spawn(drive(upstream, spec, tx, outcome_tx));

    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
    .boxed();
    (stream, outcome_rx)
}

async fn drive<S>(
    mut upstream: S,
    mut spec: PipelineSpec,
    tx: mpsc::Sender<io::Result<Bytes>>,
    outcome_tx: oneshot::Sender<StreamOutcome>,
) where
    S: Stream<Item = io::Result<Bytes>> + Send + Unpin + 'static,
{
    let mut gz = spec.gunzip.then(GzStreamDecoder::new);
    let mut parser = SseParser::new();
    let mut mut_parser = SseParser::new();
    let mut tail = TailBuffer::new(spec.tail_cap);
    let mut disconnected = false;

    loop {
        let item = upstream.next().await;
        let chunk = match item {
            Some(Ok(chunk)) => chunk,
            Some(Err(err)) => {
                // Upstream failure mid-stream: surface it downstream and
                // stop; bytes already written stand.
                if !disconnected {
                    let _ = tx.send(Err(err)).await;
                }
                break;
            }
            None => break,
        };

        let bytes = match &mut gz {
            Some(decoder) => match decoder.push(&chunk) {
                Ok(decoded) => Bytes::from(decoded),
                Err(err) => {
                    if !disconnected {
                        let _ = tx.send(Err(err)).await;
                    }
                    break;
                }
            },
            None => chunk,
        };
        if bytes.is_empty() {
            continue;
        }

        let frames = match &mut spec.transform {
            Some(transform) => {
                let mut frames = Vec::new();
                for event in parser.push_bytes(&bytes) {
                    frames.extend(transform.on_event(&event));
                }
                frames
            }
            None => vec![bytes],
        };

        disconnected |= emit(&frames, &mut tail, &spec.mutator, &mut mut_parser, &tx, disconnected).await;
    }

    // End of upstream input: flush parser remainders and the transform's
    // trailing frames (the single [DONE] terminator included).
    let mut frames = Vec::new();
    if let Some(transform) = &mut spec.transform {
        for event in parser.finish() {
            frames.extend(transform.on_event(&event));
        }
        frames.extend(transform.finish());
    }
    disconnected |= emit(&frames, &mut tail, &spec.mutator, &mut mut_parser, &tx, disconnected).await;
    if let Some(mutator) = &spec.mutator {
        let mut trailing = Vec::new();
        for event in mut_parser.finish() {
            trailing.push(mutator.mutate(&event));
        }
        if !disconnected {
            for frame in trailing {
                if tx.send(Ok(frame)).await.is_err() {
                    disconnected = true;
                    break;
                }
            }
        }
    }

    if disconnected {
        debug!(event = "stream_client_disconnect");
    }
    let _ = outcome_tx.send(StreamOutcome {
        tail: tail.into_bytes(),
        client_disconnect: disconnected,
    });
}

/// Tee frames into the tail, mutate if configured, forward downstream.
/// Returns whether the client disconnected during the sends.
async fn emit(
    frames: &[Bytes],
    tail: &mut TailBuffer,
    mutator: &Option<SseMutator>,
    mut_parser: &mut SseParser,
    tx: &mpsc::Sender<io::Result<Bytes>>,
    already_disconnected: bool,
) -> bool {
    let mut disconnected = already_disconnected;
    for frame in frames {
        tail.push(frame);
        let outgoing: Vec<Bytes> = match mutator {
            Some(mutator) => mut_parser
                .push_bytes(frame)
                .iter()
                .map(|event| mutator.mutate(event))
                .collect(),
            None => vec![frame.clone()],
        };
        if disconnected {
            continue;
        }
        for out in outgoing {
            if tx.send(Ok(out)).await.is_err() {
                // Client went away: keep draining upstream for the tail,
                // stop writing.
                disconnected = true;
                break;
            }
        }
    }
    disconnected
}

#[cfg(test)]
mod tests {
    use super::*;
    use nextrouter_dsl::{Expr, JsonPath};
    use serde_json::json;

    fn upstream_of(frames: Vec<&'static str>) -> BoxStream<'static, io::Result<Bytes>> {
        futures_util::stream::iter(
            frames
                .into_iter()
                .map(|f| Ok(Bytes::from_static(f.as_bytes()))),
        )
        .boxed()
    }

    async fn collect(stream: BoxStream<'static, io::Result<Bytes>>) -> String {
        let chunks: Vec<_> = stream.collect().await;
        chunks
            .into_iter()
            .filter_map(|c| c.ok())
            .map(|b| String::from_utf8_lossy(&b).to_string())
            .collect()
    }

    #[tokio::test]
    async fn passthrough_tees_tail() {
        let upstream = upstream_of(vec!["data: {\"a\":1}\n\n", "data: [DONE]\n\n"]);
        let (stream, outcome) = run_pipeline(
            upstream,
            PipelineSpec {
                gunzip: false,
                transform: None,
                mutator: None,
                tail_cap: 1024,
            },
        );
        let body = collect(stream).await;
        assert!(body.contains("{\"a\":1}"));
        let outcome = outcome.await.unwrap();
        assert!(!outcome.client_disconnect);
        assert_eq!(
            String::from_utf8_lossy(&outcome.tail),
            "data: {\"a\":1}\n\ndata: [DONE]\n\n"
        );
    }

    #[tokio::test]
    async fn mutator_applies_del_if_and_ops() {
        let upstream = upstream_of(vec![
            "data: {\"type\":\"ping\",\"ping\":{\"x\":1},\"keep\":true}\n\n",
            "data: not json\n\n",
        ]);
        let mutator = SseMutator {
            del_if: vec![SseDelIf {
                cond_path: JsonPath::parse("$.type").unwrap(),
                equals: json!("ping"),
                del_path: JsonPath::parse("$.ping").unwrap(),
            }],
            ops: vec![JsonOp::Set {
                path: JsonPath::parse("$.tagged").unwrap(),
                value: Expr::literal("true"),
            }],
            scope: ScopeVals::default(),
        };
        let (stream, outcome) = run_pipeline(
            upstream,
            PipelineSpec {
                gunzip: false,
                transform: None,
                mutator: Some(mutator),
                tail_cap: 1024,
            },
        );
        let body = collect(stream).await;
        assert!(!body.contains("\"ping\":{"), "del_if removed the field");
        assert!(body.contains("\"tagged\":true"));
        // Invalid JSON passes through untouched.
        assert!(body.contains("data: not json"));
        // Tail sees pre-mutation bytes.
        let outcome = outcome.await.unwrap();
        assert!(String::from_utf8_lossy(&outcome.tail).contains("\"ping\":{\"x\":1}"));
    }

    #[tokio::test]
    async fn dropped_receiver_counts_as_disconnect() {
        let upstream = upstream_of(vec![
            "data: {\"n\":1}\n\n",
            "data: {\"n\":2}\n\n",
            "data: {\"n\":3}\n\n",
        ]);
        let (stream, outcome) = run_pipeline(
            upstream,
            PipelineSpec {
                gunzip: false,
                transform: None,
                mutator: None,
                tail_cap: 1024,
            },
        );
        drop(stream);
        let outcome = outcome.await.unwrap();
        assert!(outcome.client_disconnect);
        // The tail still captured the full upstream for metrics.
        assert!(String::from_utf8_lossy(&outcome.tail).contains("\"n\":3"));
    }

    #[test]
    fn disconnect_classification() {
        assert!(is_disconnect_error(&io::Error::new(
            io::ErrorKind::BrokenPipe,
            "x"
        )));
        assert!(is_disconnect_error(&io::Error::other("connection reset by peer")));
        assert!(is_disconnect_error(&io::Error::other("request canceled")));
        assert!(!is_disconnect_error(&io::Error::other("tls handshake failed")));
    }
}
