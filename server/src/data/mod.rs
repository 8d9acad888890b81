//! Data source layer
//!
//! - `signalflow` - streaming client boundary and its transports

pub mod signalflow;
