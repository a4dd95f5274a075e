//! Core types for the bridge.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (SessionId, SessionPort, Guid)
//! - **Errors**: Application error types with thiserror derives
//! - **Status**: Bus-protocol status codes and their managed translation
//! - **Config**: Configuration structures for the bus and observability

mod config;
mod errors;
mod ids;
mod status;

pub use config::{BusConfig, Config, ObservabilityConfig};
pub use errors::{Error, Result};
pub use ids::{Guid, SessionId, SessionPort};
pub use status::{NativeStatus, Status};
