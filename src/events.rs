// Events module - the inbound side of the bridge
//
// statsd (or any wrapper around it) delivers one JSON event per line:
//
//   {"event":"flush","time":1700000000,"metrics":{"counters":{"app.requests":42}}}
//   {"event":"status"}
//
// Flush events are handed to the dispatcher without waiting for the writes.
// Status events are answered with one JSON line per status value:
//
//   {"scope":"mongoDB","name":"last_flush","value":1700000000}

use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, warn};

use crate::dispatcher::{FlushCycle, FlushDispatcher};
use crate::metrics::MetricSnapshot;

/// Errors that stop the event loop
#[derive(Error, Debug)]
pub enum EventError {
    #[error("Event stream I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A single inbound event
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum Event {
    /// One flush cycle worth of aggregated metrics
    Flush {
        time: i64,
        #[serde(default)]
        metrics: MetricSnapshot,
    },

    /// Request for the backend's own status values
    Status,
}

impl Event {
    /// Parses one line of the event stream
    ///
    /// # Returns
    /// * `Ok(None)` - Blank line
    /// * `Ok(Some(Event))` - A recognized event
    /// * `Err(serde_json::Error)` - Malformed or unknown event
    pub fn parse(line: &str) -> Result<Option<Event>, serde_json::Error> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        serde_json::from_str(line).map(Some)
    }
}

/// Counters describing one run of the event loop
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub flushes: usize,
    pub status_requests: usize,
    pub invalid_lines: usize,
    pub records_submitted: usize,
}

/// Drives the dispatcher from a stream of events
pub struct EventLoop {
    dispatcher: FlushDispatcher,
}

impl EventLoop {
    pub fn new(dispatcher: FlushDispatcher) -> Self {
        EventLoop { dispatcher }
    }

    /// Processes events until the reader is exhausted
    ///
    /// # Behavior
    /// - Malformed lines are logged and skipped
    /// - Flush cycles may overlap; their writes are not awaited per event
    /// - When the loop ends, the writes of every started cycle are awaited,
    ///   including when it ends on an I/O failure
    ///
    /// # Errors
    /// Only I/O failures on `reader` or `writer` end the loop early.
    pub async fn run<R, W>(&self, reader: R, mut writer: W) -> Result<RunSummary, EventError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut summary = RunSummary::default();
        let mut in_flight: Vec<FlushCycle> = Vec::new();
        let mut lines = reader.lines();

        let mut failure: Option<EventError> = None;

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read event stream: {}", e);
                    failure = Some(e.into());
                    break;
                }
            };

            let event = match Event::parse(&line) {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Ignoring malformed event: {}", e);
                    summary.invalid_lines += 1;
                    continue;
                }
            };

            match event {
                Event::Flush { time, metrics } => {
                    let cycle = self.dispatcher.on_flush(time, &metrics);
                    summary.flushes += 1;
                    summary.records_submitted += cycle.submitted;

                    in_flight.retain(|pending| !pending.is_finished());
                    in_flight.push(cycle);
                }
                Event::Status => {
                    summary.status_requests += 1;
                    if let Err(e) = self.write_status(&mut writer).await {
                        error!("Failed to answer status request: {}", e);
                        failure = Some(e);
                        break;
                    }
                }
            }
        }

        // pending writes are drained even when the stream failed
        debug!("Event stream closed, waiting for {} flush cycle(s)", in_flight.len());
        for cycle in in_flight {
            let time = cycle.time;
            cycle.join().await;
            debug!("Flush {}: all writes completed", time);
        }

        if let Some(e) = failure {
            return Err(e);
        }

        info!(
            "Processed {} flush(es), {} status request(s), {} record(s) submitted, {} invalid line(s)",
            summary.flushes,
            summary.status_requests,
            summary.records_submitted,
            summary.invalid_lines
        );

        Ok(summary)
    }

    /// Writes one JSON line per status value
    async fn write_status<W>(&self, writer: &mut W) -> Result<(), EventError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut output = String::new();
        self.dispatcher.status().on_status(|scope, name, value| {
            output.push_str(&json!({ "scope": scope, "name": name, "value": value }).to_string());
            output.push('\n');
        });

        writer.write_all(output.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricType;
    use crate::status::BackendStatus;
    use crate::storage::memory::MemorySink;
    use crate::storage::RecordSink;
    use serde_json::Value;
    use std::sync::Arc;

    fn event_loop(sink: &Arc<MemorySink>, startup_time: i64) -> EventLoop {
        let sink: Arc<dyn RecordSink> = sink.clone();
        EventLoop::new(FlushDispatcher::new(
            sink,
            Arc::new(BackendStatus::new(startup_time)),
        ))
    }

    #[test]
    fn test_parse_events() {
        assert_eq!(Event::parse("   ").unwrap(), None);
        assert_eq!(Event::parse(r#"{"event":"status"}"#).unwrap(), Some(Event::Status));

        match Event::parse(r#"{"event":"flush","time":1000,"metrics":{"gauges":{"x":1}}}"#) {
            Ok(Some(Event::Flush { time, metrics })) => {
                assert_eq!(time, 1000);
                assert_eq!(metrics.groups().count(), 1);
            }
            other => panic!("unexpected parse result: {:?}", other),
        }

        // metrics may be omitted
        match Event::parse(r#"{"event":"flush","time":5}"#) {
            Ok(Some(Event::Flush { metrics, .. })) => assert!(metrics.is_empty()),
            other => panic!("unexpected parse result: {:?}", other),
        }

        assert!(Event::parse(r#"{"event":"packet"}"#).is_err());
        assert!(Event::parse(r#"{"event":"flush"}"#).is_err());
        assert!(Event::parse("{").is_err());
    }

    #[tokio::test]
    async fn test_run_flush_and_status() {
        let sink = Arc::new(MemorySink::new());
        let event_loop = event_loop(&sink, 100);

        let input = concat!(
            r#"{"event":"flush","time":1000,"metrics":{"counters":{"app.requests":42},"pctThreshold":[90]}}"#,
            "\n",
            "\n",
            "garbage\n",
            r#"{"event":"flush","time":1010,"metrics":{"gauges":{"freemem":512}}}"#,
            "\n",
            r#"{"event":"status"}"#,
            "\n",
        );
        let mut output = Vec::new();

        let summary = event_loop.run(input.as_bytes(), &mut output).await.unwrap();

        assert_eq!(
            summary,
            RunSummary {
                flushes: 2,
                status_requests: 1,
                invalid_lines: 1,
                records_submitted: 2,
            }
        );

        let mut records = sink.records();
        records.sort_by_key(|(_, r)| r.time);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].0, MetricType::Counter);
        assert_eq!(records[0].1.key(), "app.requests");
        assert_eq!(records[1].0, MetricType::Gauge);
        assert_eq!(records[1].1.time, 1010);

        let lines: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(
            lines,
            vec![
                serde_json::json!({ "scope": "mongoDB", "name": "last_flush", "value": 1010 }),
                serde_json::json!({ "scope": "mongoDB", "name": "last_exception", "value": 100 }),
            ]
        );
    }

    #[tokio::test]
    async fn test_run_empty_input() {
        let sink = Arc::new(MemorySink::new());
        let event_loop = event_loop(&sink, 100);
        let mut output = Vec::new();

        let summary = event_loop.run("".as_bytes(), &mut output).await.unwrap();

        assert_eq!(summary, RunSummary::default());
        assert!(output.is_empty());
        assert!(sink.records().is_empty());
    }

    /// Writer whose every write fails, like a closed stdout
    struct BrokenPipe;

    impl AsyncWrite for BrokenPipe {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            std::task::Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_failed_status_write_still_drains_pending_writes() {
        let sink = Arc::new(MemorySink::new());
        let event_loop = event_loop(&sink, 100);

        let input = concat!(
            r#"{"event":"flush","time":1000,"metrics":{"counters":{"app.requests":42}}}"#,
            "\n",
            r#"{"event":"status"}"#,
            "\n",
            r#"{"event":"flush","time":1010,"metrics":{"gauges":{"freemem":512}}}"#,
            "\n",
        );

        let result = event_loop.run(input.as_bytes(), BrokenPipe).await;

        assert!(matches!(result, Err(EventError::Io(_))));
        // the first cycle's write completed, the loop stopped before the second flush
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].1.key(), "app.requests");
    }
}
