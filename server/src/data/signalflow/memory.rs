//! In-process SignalFlow client
//!
//! Programs are registered with the messages they produce. Every execution
//! replays the registered messages from the start, then the stream ends.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{Computation, ExecuteRequest, SignalFlowClient, StreamError, StreamMessage};

#[derive(Default)]
pub struct MemoryClient {
    programs: RwLock<HashMap<String, Vec<StreamMessage>>>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the messages produced by `program`
    pub fn register(&self, program: &str, messages: Vec<StreamMessage>) {
        self.programs.write().insert(program.to_string(), messages);
    }
}

#[async_trait]
impl SignalFlowClient for MemoryClient {
    async fn execute(&self, request: ExecuteRequest) -> Result<Computation, StreamError> {
        let messages = self
            .programs
            .read()
            .get(&request.program)
            .cloned()
            .ok_or_else(|| {
                StreamError::InvalidProgram(format!(
                    "program for flow '{}' is not registered",
                    request.flow
                ))
            })?;

        tracing::debug!(
            flow = %request.flow,
            messages = messages.len(),
            "Replaying registered program"
        );

        let stream = futures::stream::iter(messages.into_iter().map(Ok));
        Ok(Computation::new(Box::pin(stream), request.start))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
