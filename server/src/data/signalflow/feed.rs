//! JSON lines feed client
//!
//! Each flow reads `<dir>/<flow>.jsonl`, one [`StreamMessage`] per line.
//! The file may be a named pipe kept open by a sidecar; end of file closes
//! the computation. A line that does not decode ends the computation with a
//! protocol error.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};

use super::{Computation, ExecuteRequest, SignalFlowClient, StreamError, StreamMessage};
use crate::core::constants::FEED_FILE_EXTENSION;

pub struct FeedClient {
    dir: PathBuf,
}

impl FeedClient {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Feed file for a flow
    pub fn feed_path(&self, flow: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", flow, FEED_FILE_EXTENSION))
    }
}

struct FeedState {
    lines: Lines<BufReader<tokio::fs::File>>,
    line_no: usize,
    done: bool,
}

#[async_trait]
impl SignalFlowClient for FeedClient {
    async fn execute(&self, request: ExecuteRequest) -> Result<Computation, StreamError> {
        let path = self.feed_path(&request.flow);
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| StreamError::Connection(format!("{}: {}", path.display(), e)))?;

        tracing::debug!(flow = %request.flow, path = %path.display(), "Opened feed");

        let state = FeedState {
            lines: BufReader::new(file).lines(),
            line_no: 0,
            done: false,
        };

        let stream = futures::stream::unfold(state, |mut state| async move {
            if state.done {
                return None;
            }
            loop {
                state.line_no += 1;
                let line = match state.lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => return None,
                    Err(e) => {
                        state.done = true;
                        let err = StreamError::Connection(format!("read failed: {}", e));
                        return Some((Err(err), state));
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let item = serde_json::from_str::<StreamMessage>(&line).map_err(|e| {
                    state.done = true;
                    StreamError::Protocol(format!("line {}: {}", state.line_no, e))
                });
                return Some((item, state));
            }
        });

        Ok(Computation::new(Box::pin(stream), request.start))
    }

    fn name(&self) -> &'static str {
        "feed"
    }
}
