//! SignalFlow streaming client boundary
//!
//! The bridge never speaks the SignalFlow wire protocol itself. A client
//! starts a computation for a program and hands back a [`Computation`] that
//! yields decoded messages:
//!
//! - `Metadata` - time series metadata, delivered before data referencing it
//! - `Data` - one batch of data points for a logical timestamp
//! - `Error` - upstream failure; the computation ends after it
//!
//! Transports:
//! - [`MemoryClient`] - programs registered in-process (embedding, tests)
//! - [`FeedClient`] - JSON lines read from `<dir>/<flow>.jsonl`, written by
//!   a sidecar that holds the actual SignalFlow connection

mod error;
mod feed;
mod memory;

pub use error::StreamError;
pub use feed::FeedClient;
pub use memory::MemoryClient;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::core::constants::{DEFAULT_SFX_REALM, SFX_STREAM_LABEL_PROPERTY};

/// Time series identifier assigned by SignalFlow
pub type Tsid = String;

/// SignalFx account credentials
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Credentials {
    pub realm: String,
    pub token: String,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            realm: DEFAULT_SFX_REALM.to_string(),
            token: String::new(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("realm", &self.realm)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl Credentials {
    /// SignalFlow streaming endpoint for the realm
    pub fn stream_url(&self) -> String {
        format!("wss://stream.{}.signalfx.com", self.realm)
    }
}

/// Request to start a computation
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    /// Flow name, used by transports that keep one channel per flow
    pub flow: String,
    pub program: String,
    pub credentials: Credentials,
    /// Start of the computation; `None` means now
    pub start: Option<DateTime<Utc>>,
}

/// Properties attached to a time series
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesMetadata {
    pub originating_metric: String,
    /// Dimensions and custom properties
    #[serde(default)]
    pub custom_properties: BTreeMap<String, String>,
    #[serde(default)]
    pub internal_properties: BTreeMap<String, serde_json::Value>,
}

impl TimeSeriesMetadata {
    /// Publish stream label, when present and a string
    pub fn stream_label(&self) -> Option<&str> {
        self.internal_properties
            .get(SFX_STREAM_LABEL_PROPERTY)
            .and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DataPoint {
    pub tsid: Tsid,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataBatch {
    pub logical_timestamp_ms: i64,
    #[serde(default)]
    pub points: Vec<DataPoint>,
}

/// One decoded message of a computation
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StreamMessage {
    Metadata {
        tsid: Tsid,
        metadata: TimeSeriesMetadata,
    },
    Data(DataBatch),
    Error {
        message: String,
    },
}

pub type MessageStream = Pin<Box<dyn Stream<Item = Result<StreamMessage, StreamError>> + Send>>;

/// A running computation
///
/// Consumes the message stream, records metadata as it arrives and hands
/// out data batches. Once [`next_batch`](Self::next_batch) returns `None`
/// the computation is over and [`take_error`](Self::take_error) reports why.
pub struct Computation {
    messages: MessageStream,
    metadata: HashMap<Tsid, TimeSeriesMetadata>,
    start_ms: Option<i64>,
    error: Option<StreamError>,
    done: bool,
}

impl Computation {
    pub fn new(messages: MessageStream, start: Option<DateTime<Utc>>) -> Self {
        Self {
            messages,
            metadata: HashMap::new(),
            start_ms: start.map(|s| s.timestamp_millis()),
            error: None,
            done: false,
        }
    }

    /// Next data batch, or `None` once the stream has ended
    ///
    /// Batches older than the computation start are skipped.
    pub async fn next_batch(&mut self) -> Option<DataBatch> {
        if self.done {
            return None;
        }
        while let Some(message) = self.messages.next().await {
            match message {
                Ok(StreamMessage::Metadata { tsid, metadata }) => {
                    self.metadata.insert(tsid, metadata);
                }
                Ok(StreamMessage::Data(batch)) => {
                    if let Some(start_ms) = self.start_ms
                        && batch.logical_timestamp_ms < start_ms
                    {
                        continue;
                    }
                    return Some(batch);
                }
                Ok(StreamMessage::Error { message }) => {
                    self.error = Some(StreamError::Upstream(message));
                    break;
                }
                Err(e) => {
                    self.error = Some(e);
                    break;
                }
            }
        }
        self.done = true;
        None
    }

    pub fn metadata(&self, tsid: &str) -> Option<&TimeSeriesMetadata> {
        self.metadata.get(tsid)
    }

    /// Error that ended the computation, if any
    pub fn take_error(&mut self) -> Option<StreamError> {
        self.error.take()
    }
}

/// Starts SignalFlow computations
#[async_trait]
pub trait SignalFlowClient: Send + Sync {
    /// Start a computation. Connection and program validation failures are
    /// reported here, before any message is consumed.
    async fn execute(&self, request: ExecuteRequest) -> Result<Computation, StreamError>;

    fn name(&self) -> &'static str;
}
