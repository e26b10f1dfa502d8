//! Log pipeline wiring.
//!
//! Connects the tailer to the parser and feeds normalized events into the
//! engine's channel. Shutdown cascades stage by stage: cancelling the
//! token makes the tailer return and drop its sender, which ends the
//! parse task, which drops the events sender.

use crate::config::Config;
use crate::logtail::Tailer;
use crate::parser::{self, Event, ParseError, Parser};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Capacity of the bounded channels joining pipeline stages. A slow
/// downstream backend applies backpressure all the way to the tailer;
/// events are never dropped.
pub const CHANNEL_CAPACITY: usize = 100;

/// Errors starting the log pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Parser(#[from] ParseError),
    #[error("log file {path}: {source}")]
    LogFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Wire the tailer and parser together and start both tasks.
///
/// Parse failures are per-line: logged at error level, the line dropped,
/// processing continues. Returns the task handles for the orchestrator to
/// join on shutdown.
pub fn start_log_pipeline(
    token: CancellationToken,
    config: &Config,
    events: mpsc::Sender<Event>,
) -> Result<Vec<JoinHandle<()>>, PipelineError> {
    let parser = parser::by_name(&config.log.parser)?;

    let path = config.log.path.clone();
    // Catch a missing log file at startup instead of inside the task.
    std::fs::metadata(&path).map_err(|source| PipelineError::LogFile {
        path: path.clone(),
        source,
    })?;

    let (lines_tx, lines_rx) = mpsc::channel(CHANNEL_CAPACITY);

    let tailer_token = token.clone();
    let tailer_handle = tokio::spawn(async move {
        let tailer = Tailer::new(&path);
        if let Err(e) = tailer.run(tailer_token, lines_tx).await {
            error!(path = %path, error = %e, "tailer exited");
        }
    });

    let parse_handle = tokio::spawn(parse_loop(token, parser, lines_rx, events));

    Ok(vec![tailer_handle, parse_handle])
}

async fn parse_loop(
    token: CancellationToken,
    parser: Box<dyn Parser>,
    mut lines: mpsc::Receiver<String>,
    events: mpsc::Sender<Event>,
) {
    loop {
        let line = tokio::select! {
            _ = token.cancelled() => return,
            line = lines.recv() => match line {
                Some(line) => line,
                None => return,
            },
        };
        let event = match parser.parse(&line) {
            Ok(event) => event,
            Err(e) => {
                error!(error = %e, "parse error");
                continue;
            }
        };
        if events.send(event).await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn config(path: &str, parser: &str) -> Config {
        serde_yaml::from_str(&format!(
            r#"
log:
  path: {path}
  parser: {parser}
rules:
  - id: r1
    method: GET
    path: /
    max_errors: 1
    window: 1s
    ban_duration: 1s
backend:
  type: iptables
  iptables:
    table: filter
    chain: INPUT
"#
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn rejects_unknown_parser() {
        let (events_tx, _events_rx) = mpsc::channel(1);
        let result = start_log_pipeline(
            CancellationToken::new(),
            &config("/tmp/access.log", "syslog"),
            events_tx,
        );
        assert!(matches!(result, Err(PipelineError::Parser(_))));
    }

    #[tokio::test]
    async fn rejects_missing_log_file() {
        let (events_tx, _events_rx) = mpsc::channel(1);
        let result = start_log_pipeline(
            CancellationToken::new(),
            &config("/nonexistent/access.log", "nginx_combined"),
            events_tx,
        );
        assert!(matches!(result, Err(PipelineError::LogFile { .. })));
    }
}
